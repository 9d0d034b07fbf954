// ==========================================
// NRQZ 记录管理系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================
// 约定: *_tx 关联函数在调用方事务/保存点内执行;
//       &self 方法自行加锁,用于查询与独立写入
// ==========================================

pub mod error;
pub mod group_repo;
pub mod import_audit_repo;
pub mod merge_repo;
pub mod record_repo;
pub mod record_store;
pub mod snapshot_repo;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use group_repo::GroupRepository;
pub use import_audit_repo::ImportAuditRepository;
pub use merge_repo::MergeRepository;
pub use record_repo::SqliteRecordStore;
pub use record_store::{GenericRef, RecordStore, SaveOutcome};
pub use snapshot_repo::SnapshotRepository;
