// ==========================================
// NRQZ 记录管理系统 - 对账引擎层
// ==========================================
// 职责: 交叉引用分组 / 疑似重复查找 / 实体合并
// 红线: 引擎不拼业务 SQL,持久化经由 Repository 与 RecordStore
// ==========================================

pub mod disjoint_set;
pub mod duplicate_finder;
pub mod grouping;
pub mod merge;
pub mod reference_resolver;

// 重导出核心引擎
pub use disjoint_set::DisjointSet;
pub use duplicate_finder::{find_clusters, DuplicateFinder};
pub use grouping::{build_groups, GroupingEngine};
pub use merge::{resolve_fields, MergeEngine, MergeError, MergePolicy};
pub use reference_resolver::ReferencePatterns;
