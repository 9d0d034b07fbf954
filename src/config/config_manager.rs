// ==========================================
// NRQZ 记录管理系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、写入、快照/恢复
// 存储: config_kv 表 (key-value + scope,当前仅 global)
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::db::open_sqlite_connection;
use crate::domain::merge::ConflictResolution;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 读取配置,不存在时返回默认值
    pub fn get_config_or_default(&self, key: &str, default: &str) -> RepositoryResult<String> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 读取并解析配置; 值无法解析时记录告警并回退到默认值
    fn get_parsed_or<T>(&self, key: &str, default: T) -> RepositoryResult<T>
    where
        T: FromStr,
    {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(value) => Ok(value),
                Err(_) => {
                    warn!(key, value = %raw, "配置值无法解析,使用默认值");
                    Ok(default)
                }
            },
        }
    }

    /// 写入配置（UPSERT）
    pub fn set_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取当前全部配置的快照（JSON 对象,键有序）
    ///
    /// # 用途
    /// - 导入/合并前记录配置,便于复现
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let config_map = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<BTreeMap<String, String>, _>>()?;

        Ok(serde_json::to_string(&config_map)?)
    }

    /// 从配置快照恢复配置
    ///
    /// # 返回
    /// - Ok(usize): 恢复的配置项数量
    ///
    /// # 注意
    /// - 此方法会覆盖现有的 global 配置
    pub fn restore_config_from_snapshot(&self, snapshot_json: &str) -> RepositoryResult<usize> {
        let config_map: BTreeMap<String, String> = serde_json::from_str(snapshot_json)?;

        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut count = 0;
        for (key, value) in config_map.iter() {
            // 元信息不回写
            if key.starts_with("__meta_") {
                continue;
            }
            count += tx.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
                 ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
        }

        tx.commit()?;
        Ok(count)
    }
}

impl ImportConfigReader for ConfigManager {
    fn get_unmapped_header_threshold(&self) -> RepositoryResult<f64> {
        let value = self.get_parsed_or(
            config_keys::UNMAPPED_HEADER_THRESHOLD,
            defaults::UNMAPPED_HEADER_THRESHOLD,
        )?;
        if !(0.0..=1.0).contains(&value) {
            warn!(value, "未识别表头阈值超出 [0,1],使用默认值");
            return Ok(defaults::UNMAPPED_HEADER_THRESHOLD);
        }
        Ok(value)
    }

    fn get_default_durable(&self) -> RepositoryResult<bool> {
        self.get_parsed_or(config_keys::DEFAULT_DURABLE, defaults::DEFAULT_DURABLE)
    }

    fn get_similarity_threshold(&self) -> RepositoryResult<f64> {
        let value = self.get_parsed_or(config_keys::SIMILARITY_THRESHOLD, defaults::SIMILARITY_THRESHOLD)?;
        if !(0.0..=1.0).contains(&value) {
            warn!(value, "相似度阈值超出 [0,1],使用默认值");
            return Ok(defaults::SIMILARITY_THRESHOLD);
        }
        Ok(value)
    }

    fn get_default_resolution(&self) -> RepositoryResult<ConflictResolution> {
        self.get_parsed_or(config_keys::DEFAULT_RESOLUTION, ConflictResolution::default())
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 导入
    pub const UNMAPPED_HEADER_THRESHOLD: &str = "import.unmapped_header_threshold";
    pub const DEFAULT_DURABLE: &str = "import.default_durable";

    // 去重
    pub const SIMILARITY_THRESHOLD: &str = "dedup.similarity_threshold";

    // 合并
    pub const DEFAULT_RESOLUTION: &str = "merge.default_resolution";
}

/// 配置缺省值
pub mod defaults {
    pub const UNMAPPED_HEADER_THRESHOLD: f64 = 0.7;
    pub const DEFAULT_DURABLE: bool = false;
    pub const SIMILARITY_THRESHOLD: f64 = 0.85;
}
