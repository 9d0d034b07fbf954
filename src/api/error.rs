// ==========================================
// NRQZ 记录管理系统 - API 层错误类型
// ==========================================
// 职责: 把导入 / 仓储 / 合并错误转换为面向操作员的错误消息
// ==========================================

use crate::engine::merge::MergeError;
use crate::importer::error::{ImportError, MappingConfigError};
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API 层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入与业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    /// 合并冲突（需要操作员指定策略或显式值）
    #[error("合并冲突 ({subject}): {detail}")]
    MergeConflict { subject: String, detail: String },

    #[error("映射配置错误: {0}")]
    MappingConfig(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 导入错误
    // ==========================================
    #[error("文件导入失败: {0}")]
    ImportError(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => ApiError::DatabaseTransactionError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::CardinalityViolation { relation, message } => {
                ApiError::BusinessRuleViolation(format!("关系 {} 基数违反: {}", relation, message))
            }
            RepositoryError::UnknownRelation(name) => ApiError::InvalidInput(format!("未注册的关系: {}", name)),
            RepositoryError::ValidationError(msg) => ApiError::ValidationError(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::SerializationError(msg) => ApiError::InternalError(msg),
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Repository(repo) => repo.into(),
            ImportError::MappingConfig(cfg) => cfg.into(),
            ImportError::FileNotFound(path) => ApiError::NotFound(format!("文件 {}", path)),
            ImportError::InvalidLimit(limit) => ApiError::InvalidInput(format!("--limit 必须在 (0, 1] 内: {}", limit)),
            other => ApiError::ImportError(other.to_string()),
        }
    }
}

impl From<MappingConfigError> for ApiError {
    fn from(err: MappingConfigError) -> Self {
        ApiError::MappingConfig(err.to_string())
    }
}

impl From<MergeError> for ApiError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::Conflict { subject, detail } => ApiError::MergeConflict { subject, detail },
            MergeError::RecordNotFound(id) => ApiError::NotFound(format!("记录(id={})不存在", id)),
            MergeError::Repository(repo) => repo.into(),
            other => ApiError::InvalidInput(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "Record".to_string(),
            id: "42".to_string(),
        };
        match ApiError::from(repo_err) {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("Record"));
                assert!(msg.contains("42"));
            }
            other => panic!("Expected NotFound, got {other}"),
        }
    }

    #[test]
    fn test_nested_errors_unwrap_to_their_layer() {
        let err: ApiError = ImportError::Repository(RepositoryError::LockError("poisoned".into())).into();
        assert!(matches!(err, ApiError::DatabaseConnectionError(_)));

        let err: ApiError = MergeError::Conflict {
            subject: "fields".into(),
            detail: "name {\"A\", \"B\"}".into(),
        }
        .into();
        assert!(matches!(err, ApiError::MergeConflict { .. }));

        let err: ApiError = MergeError::NoAliases.into();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }
}
