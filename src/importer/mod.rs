// ==========================================
// NRQZ 记录管理系统 - 导入层
// ==========================================
// 职责: 外部数据导入 → 领域记录 + 审计记录
// 支持: CSV / TSV / Excel / 键值文本
// 流程: 解析 → 表头归类 → FormMap 渲染 → 模型级尝试 → 审计
// ==========================================

// 模块声明
pub mod converters;
pub mod error;
pub mod field_map;
pub mod file_importer;
pub mod file_parser;
pub mod form_map;
pub mod import_attempt;
pub mod profiles;

// 重导出核心类型
pub use error::{ConversionError, ImportError, ImportResult, MappingConfigError};
pub use field_map::{Converter, FieldMap, MapCardinality, SourceKey};
pub use file_importer::{FileImporter, ImportOptions};
pub use file_parser::{ParsedFile, RawRowSource, UniversalFileParser};
pub use form_map::{FormMap, HeaderReport, HeaderResolution, ImportProfile, RenderedRow, RowLink};
pub use import_attempt::{attempt_import, attempt_model, derive_status, ModelAttempt};
