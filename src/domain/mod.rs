// ==========================================
// NRQZ 记录管理系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、Schema
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod group;
pub mod import;
pub mod merge;
pub mod record;
pub mod schema;
pub mod types;
pub mod value;

// 重导出核心类型
pub use group::{GroupingReport, RecordRef, ReferenceGroup, ReferenceSource};
pub use import::{
    FieldError, FieldErrorKind, FileError, FileErrorKind, FileImportAttempt, FileImportReport,
    ImportAttempt, ImportSummary, RawRow, RowErrorSummary, RowSnapshot,
};
pub use merge::{ConflictResolution, DuplicateCluster, FieldDiff, MergeOperationResult, RelationDiff};
pub use record::{DraftRecord, FieldValues, StoredRecord};
pub use schema::{FieldKind, FieldSpec, RecordSchema, RelationSpec, SchemaRegistry};
pub use types::{Cardinality, ImportStatus, RecordType, RefCardinality};
pub use value::FieldValue;
