// ==========================================
// NRQZ 记录管理系统 - 对账 API
// ==========================================
// 职责: 引用分组重建 / 疑似重复查找 / 实体合并
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, ImportConfigReader};
use crate::domain::group::{GroupingReport, ReferenceGroup};
use crate::domain::merge::{ConflictResolution, DuplicateCluster, MergeOperationResult};
use crate::domain::schema::SchemaRegistry;
use crate::domain::types::RecordType;
use crate::engine::{DuplicateFinder, GroupingEngine, MergeEngine, MergePolicy, ReferencePatterns};
use crate::repository::group_repo::GroupRepository;
use crate::repository::merge_repo::MergeRepository;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

/// 对账 API
pub struct ReconcileApi {
    conn: Arc<Mutex<Connection>>,
    schema: Arc<SchemaRegistry>,
    config: Arc<ConfigManager>,
}

impl ReconcileApi {
    pub fn new(conn: Arc<Mutex<Connection>>, schema: Arc<SchemaRegistry>, config: Arc<ConfigManager>) -> Self {
        Self { conn, schema, config }
    }

    /// 重建引用分组（NRQZ 默认引用模式）
    pub fn rebuild_groups(&self) -> ApiResult<GroupingReport> {
        let patterns = ReferencePatterns::nrqz()?;
        let engine = GroupingEngine::new(self.conn.clone(), self.schema.clone(), patterns);
        Ok(engine.rebuild()?)
    }

    pub fn list_groups(&self) -> ApiResult<Vec<ReferenceGroup>> {
        Ok(GroupRepository::from_connection(self.conn.clone()).list_groups()?)
    }

    /// 查找疑似重复
    ///
    /// # 参数
    /// - threshold: None → 配置 dedup.similarity_threshold
    pub fn find_duplicates(&self, record_type: RecordType, threshold: Option<f64>) -> ApiResult<Vec<DuplicateCluster>> {
        let threshold = match threshold {
            Some(t) if !(0.0..=1.0).contains(&t) => {
                return Err(ApiError::InvalidInput(format!("相似度阈值必须在 [0, 1] 内: {}", t)));
            }
            Some(t) => t,
            None => self.config.get_similarity_threshold()?,
        };
        let finder = DuplicateFinder::new(self.conn.clone(), self.schema.clone(), threshold);
        Ok(finder.find(record_type)?)
    }

    /// 默认合并策略（配置 merge.default_resolution）
    pub fn default_policy(&self) -> ApiResult<MergePolicy> {
        Ok(MergePolicy::new(self.config.get_default_resolution()?))
    }

    /// 合并别名到 primary
    ///
    /// # 参数
    /// - prefer: None → 默认策略
    pub fn merge(
        &self,
        primary_id: i64,
        alias_ids: &[i64],
        prefer: Option<ConflictResolution>,
    ) -> ApiResult<MergeOperationResult> {
        let policy = self.policy_for(prefer)?;
        Ok(self.engine().merge(primary_id, alias_ids, &policy)?)
    }

    /// 按完整策略合并（逐字段策略 / 显式值）
    pub fn merge_with_policy(
        &self,
        primary_id: i64,
        alias_ids: &[i64],
        policy: &MergePolicy,
    ) -> ApiResult<MergeOperationResult> {
        Ok(self.engine().merge(primary_id, alias_ids, policy)?)
    }

    /// 预览合并（执行后回滚）
    pub fn preview_merge(
        &self,
        primary_id: i64,
        alias_ids: &[i64],
        prefer: Option<ConflictResolution>,
    ) -> ApiResult<MergeOperationResult> {
        let policy = self.policy_for(prefer)?;
        Ok(self.engine().preview(primary_id, alias_ids, &policy)?)
    }

    pub fn merge_history(&self, limit: usize) -> ApiResult<Vec<MergeOperationResult>> {
        Ok(MergeRepository::from_connection(self.conn.clone()).list_recent(limit)?)
    }

    fn engine(&self) -> MergeEngine {
        MergeEngine::new(self.conn.clone(), self.schema.clone())
    }

    fn policy_for(&self, prefer: Option<ConflictResolution>) -> ApiResult<MergePolicy> {
        match prefer {
            Some(resolution) => Ok(MergePolicy::new(resolution)),
            None => self.default_policy(),
        }
    }
}
