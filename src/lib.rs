// ==========================================
// NRQZ 记录管理系统 - 核心库
// ==========================================
// 职责: 遗留数据导入 → 审计 → 交叉引用分组 → 去重合并
// 技术栈: Rust + SQLite
// 系统定位: 操作员驱动（冲突交人工,不自动表决）
// ==========================================

// 初始化国际化系统
rust_i18n::i18n!("locales", fallback = "zh-CN");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 记录、Schema、审计实体
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 分组 / 查重 / 合并
pub mod engine;

// 导入层 - 转换器、映射、导入尝试
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 国际化
pub mod i18n;

// API 层 - 业务接口
pub mod api;

// 应用层 - 状态组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

pub use domain::{
    ConflictResolution, FieldValue, FileImportReport, ImportStatus, MergeOperationResult, RecordType,
    SchemaRegistry,
};
pub use engine::{DuplicateFinder, GroupingEngine, MergeEngine, MergePolicy, ReferencePatterns};
pub use importer::{FileImporter, ImportOptions};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "NRQZ 记录管理系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
