// ==========================================
// NRQZ 记录管理系统 - 导入/对账配置读取 Trait
// ==========================================
// 职责: 定义导入管道与对账引擎所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::merge::ConflictResolution;
use crate::repository::error::RepositoryResult;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
pub trait ImportConfigReader: Send + Sync {
    /// 未识别表头比例阈值
    ///
    /// # 返回
    /// - f64: [0, 1]; 未识别表头占比超过该值 → 文件级错误
    ///
    /// # 默认值
    /// - 0.7
    fn get_unmapped_header_threshold(&self) -> RepositoryResult<f64>;

    /// 未显式指定时是否使用持久模式（逐行提交）
    ///
    /// # 默认值
    /// - false
    fn get_default_durable(&self) -> RepositoryResult<bool>;

    /// 疑似重复的相似度阈值
    ///
    /// # 默认值
    /// - 0.85
    fn get_similarity_threshold(&self) -> RepositoryResult<f64>;

    /// 合并时字段冲突的默认解决策略
    ///
    /// # 默认值
    /// - ESCALATE
    fn get_default_resolution(&self) -> RepositoryResult<ConflictResolution>;
}

/// 固定值配置（测试与无数据库场景）
#[derive(Debug, Clone)]
pub struct StaticImportConfig {
    pub unmapped_header_threshold: f64,
    pub default_durable: bool,
    pub similarity_threshold: f64,
    pub default_resolution: ConflictResolution,
}

impl Default for StaticImportConfig {
    fn default() -> Self {
        Self {
            unmapped_header_threshold: 0.7,
            default_durable: false,
            similarity_threshold: 0.85,
            default_resolution: ConflictResolution::Escalate,
        }
    }
}

impl ImportConfigReader for StaticImportConfig {
    fn get_unmapped_header_threshold(&self) -> RepositoryResult<f64> {
        Ok(self.unmapped_header_threshold)
    }

    fn get_default_durable(&self) -> RepositoryResult<bool> {
        Ok(self.default_durable)
    }

    fn get_similarity_threshold(&self) -> RepositoryResult<f64> {
        Ok(self.similarity_threshold)
    }

    fn get_default_resolution(&self) -> RepositoryResult<ConflictResolution> {
        Ok(self.default_resolution)
    }
}
