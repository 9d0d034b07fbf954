// ==========================================
// NRQZ 记录管理系统 - API 层
// ==========================================
// 职责: 提供业务 API 接口,供 CLI 调用
// ==========================================

pub mod error;
pub mod import_api;
pub mod reconcile_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use import_api::{BatchImportItem, FileAttemptDetail, ImportApi};
pub use reconcile_api::ReconcileApi;
