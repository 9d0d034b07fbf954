// ==========================================
// NRQZ 记录管理系统 - 应用层
// ==========================================
// 职责: 组装共享状态,连接 CLI 与 API
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
