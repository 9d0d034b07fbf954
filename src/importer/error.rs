// ==========================================
// NRQZ 记录管理系统 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

// ==========================================
// ConversionError - 单元格转换失败
// ==========================================
// 携带出错的原始值 + 可读原因; 默认非致命
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("无法转换 {raw:?}: {reason}")]
pub struct ConversionError {
    pub raw: String,
    pub reason: String,
}

impl ConversionError {
    pub fn new(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            reason: reason.into(),
        }
    }
}

// ==========================================
// MappingConfigError - 映射配置错误（构造期）
// ==========================================
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingConfigError {
    #[error("FieldMap 缺少源键或目标键: {0}")]
    EmptyKeys(String),

    #[error("FieldMap {name} 有 {sources} 个源键、{targets} 个目标键,必须提供转换器")]
    ConverterRequired {
        name: String,
        sources: usize,
        targets: usize,
    },

    #[error("FormMap {form} 的目标字段 {field} 不是 {record_type} 的可写字段")]
    NotWritable {
        form: String,
        field: String,
        record_type: String,
    },

    #[error("记录类型 {0} 未注册 schema")]
    UnknownRecordType(String),

    #[error("关系 {0} 未注册")]
    UnknownRelation(String),

    #[error("FormMap 名称重复: {0}")]
    DuplicateFormMap(String),

    #[error("FormMap 未定义: {0}")]
    UnknownFormMap(String),

    #[error("正则表达式无效 ({pattern}): {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .xlsx/.xls/.csv/.tsv/.txt）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("表头重复: {0}")]
    DuplicateHeader(String),

    // ===== 映射错误 =====
    #[error(transparent)]
    MappingConfig(#[from] MappingConfigError),

    #[error("未识别表头比例 {ratio:.2} 超过阈值 {threshold:.2}: {unmapped:?}")]
    UnmappedHeaderRatio {
        ratio: f64,
        threshold: f64,
        unmapped: Vec<String>,
    },

    // ===== 导入过程错误 =====
    #[error("行 {row} 被拒绝: {reason}")]
    RowRejected { row: usize, reason: String },

    #[error("抽样比例无效: {0}（需在 (0, 1] 区间）")]
    InvalidLimit(f64),

    // ===== 数据库错误 =====
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ===== 配置错误 =====
    #[error("配置值格式错误 (key: {key}, value: {value}): {message}")]
    ConfigValueError {
        key: String,
        value: String,
        message: String,
    },

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Repository(RepositoryError::from(err))
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
