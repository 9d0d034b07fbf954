// ==========================================
// NRQZ 记录管理系统 - 应用状态
// ==========================================
// 职责: 管理共享连接、Schema、配置与 API 实例
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::{ImportApi, ReconcileApi};
use crate::config::config_manager::ConfigManager;
use crate::db::open_and_init;
use crate::domain::schema::SchemaRegistry;

/// 应用状态
///
/// 包含所有 API 实例和共享资源,由 CLI 在启动时构建一次
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 记录 Schema
    pub schema: Arc<SchemaRegistry>,

    /// 配置管理器
    pub config: Arc<ConfigManager>,

    /// 导入 API（每个文件独立连接）
    pub import_api: Arc<ImportApi>,

    /// 对账 API（共享连接）
    pub reconcile_api: Arc<ReconcileApi>,
}

impl AppState {
    /// 创建新的 AppState 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 返回
    /// - Ok(AppState): 初始化成功（schema 已就绪）
    /// - Err(String): 初始化错误
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_and_init(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        let schema = Arc::new(SchemaRegistry::nrqz());
        let config = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );

        let import_api = Arc::new(ImportApi::new(db_path.clone(), schema.clone()));
        let reconcile_api = Arc::new(ReconcileApi::new(conn, schema.clone(), config.clone()));

        tracing::info!("AppState初始化完成");
        Ok(Self {
            db_path,
            schema,
            config,
            import_api,
            reconcile_api,
        })
    }
}

/// 默认数据库路径
///
/// # 优先级
/// 1. 环境变量 NRQZ_DB_PATH
/// 2. 用户数据目录下的 nrqz-records/nrqz.db
/// 3. 当前目录 ./nrqz.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("NRQZ_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./nrqz.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("nrqz-records");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("nrqz.db");
        }
    }

    path.to_string_lossy().to_string()
}
