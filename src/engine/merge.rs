// ==========================================
// NRQZ 记录管理系统 - 实体合并引擎
// ==========================================
// 流程:
// 1. 字段: primary 与全部别名的不同非空值; 唯一值静默采用,多值按策略解决
//    （默认 Escalate 报错交人工; 不做多数表决）
// 2. 单值关系: 指向别名的入向链接改指 primary; 一对一冲突致命
// 3. 多值关系: 并集
// 4. 通用引用: 按声明基数改指 / 转移
// 5. 分组成员身份、快照关联、导入尝试指针迁移到 primary
// 6. 删除别名,写回 primary 字段,记录合并 diff
// 红线: 整个合并一个 IMMEDIATE 事务,任一错误 → 零修改
// ==========================================

use crate::domain::merge::{ConflictResolution, FieldDiff, MergeOperationResult, RelationDiff};
use crate::domain::record::{FieldValues, StoredRecord};
use crate::domain::schema::{RecordSchema, RelationSpec, SchemaRegistry};
use crate::domain::types::{Cardinality, RecordType, RefCardinality};
use crate::domain::value::{distinct_values, FieldValue};
use crate::repository::error::RepositoryError;
use crate::repository::group_repo::GroupRepository;
use crate::repository::import_audit_repo::ImportAuditRepository;
use crate::repository::merge_repo::MergeRepository;
use crate::repository::record_repo::SqliteRecordStore;
use crate::repository::record_store::RecordStore;
use crate::repository::snapshot_repo::SnapshotRepository;
use chrono::Utc;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

// ==========================================
// MergeError - 合并错误
// ==========================================
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("合并冲突 ({subject}): {detail}")]
    Conflict { subject: String, detail: String },

    #[error("记录不存在: {0}")]
    RecordNotFound(i64),

    #[error("记录类型不一致: primary 为 {primary}, 别名 {alias_id} 为 {alias}")]
    TypeMismatch {
        primary: RecordType,
        alias_id: i64,
        alias: RecordType,
    },

    #[error("合并至少需要一个别名")]
    NoAliases,

    #[error("primary {0} 不能同时作为别名")]
    SelfMerge(i64),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<rusqlite::Error> for MergeError {
    fn from(err: rusqlite::Error) -> Self {
        MergeError::Repository(RepositoryError::from(err))
    }
}

pub type MergeResult<T> = Result<T, MergeError>;

// ==========================================
// MergePolicy - 字段冲突解决策略
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergePolicy {
    /// 未单独配置的字段使用的策略
    pub default: ConflictResolution,
    /// 字段（或关系名）→ 策略
    pub per_field: BTreeMap<String, ConflictResolution>,
    /// 操作员直接给定的最终值
    pub explicit: BTreeMap<String, FieldValue>,
}

impl MergePolicy {
    pub fn new(default: ConflictResolution) -> Self {
        Self {
            default,
            ..Self::default()
        }
    }

    pub fn with_field(mut self, field: &str, resolution: ConflictResolution) -> Self {
        self.per_field.insert(field.to_string(), resolution);
        self
    }

    pub fn with_value(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.explicit.insert(field.to_string(), value.into());
        self
    }

    pub fn resolution_for(&self, field: &str) -> ConflictResolution {
        self.per_field.get(field).copied().unwrap_or(self.default)
    }
}

/// 计算合并后的字段值与字段 diff（纯函数）
///
/// # 参数
/// - participants: primary 在前,别名按给定顺序
///
/// # 返回
/// - Ok((合并后字段, diff)): diff 覆盖任一参与记录存在非空值的字段
/// - Err(Conflict): 存在未解决的多值冲突（列出全部冲突字段）
pub fn resolve_fields(
    schema: &RecordSchema,
    primary: &StoredRecord,
    aliases: &[StoredRecord],
    policy: &MergePolicy,
) -> MergeResult<(FieldValues, Vec<FieldDiff>)> {
    let participants: Vec<&StoredRecord> = std::iter::once(primary).chain(aliases.iter()).collect();
    let mut merged = primary.fields.clone();
    let mut diffs = Vec::new();
    let mut conflicts: Vec<String> = Vec::new();

    for spec in &schema.fields {
        let field = spec.name.as_str();
        let candidates = distinct_values(
            participants
                .iter()
                .filter_map(|r| r.get(field))
                .filter(|v| !v.is_blank()),
        );
        if candidates.is_empty() && !policy.explicit.contains_key(field) {
            continue;
        }
        let original = primary.get(field).cloned().unwrap_or(FieldValue::Null);

        let final_value = if let Some(value) = policy.explicit.get(field) {
            value.clone()
        } else if candidates.len() == 1 {
            candidates[0].clone()
        } else {
            match pick(field, &participants, policy.resolution_for(field)) {
                Some(value) => value,
                None => {
                    let shown: Vec<String> = candidates.iter().map(|v| v.to_string()).collect();
                    conflicts.push(format!("{} {{{}}}", field, shown.join(", ")));
                    continue;
                }
            }
        };

        if final_value.is_blank() {
            merged.remove(field);
        } else {
            merged.insert(field.to_string(), final_value.clone());
        }
        diffs.push(FieldDiff {
            field: field.to_string(),
            original,
            candidates,
            final_value,
        });
    }

    if !conflicts.is_empty() {
        return Err(MergeError::Conflict {
            subject: "fields".to_string(),
            detail: conflicts.join("; "),
        });
    }
    Ok((merged, diffs))
}

/// 按策略在多个非空值中取一个; Escalate 或无法判定 → None
fn pick(field: &str, participants: &[&StoredRecord], resolution: ConflictResolution) -> Option<FieldValue> {
    let non_blank = |r: &&StoredRecord| r.get(field).filter(|v| !v.is_blank()).cloned();
    match resolution {
        ConflictResolution::Escalate => None,
        ConflictResolution::PreferPrimary => participants.first().and_then(non_blank),
        ConflictResolution::PreferLongest => {
            let mut best: Option<FieldValue> = None;
            for value in participants.iter().filter_map(non_blank) {
                // 长度相同保留先出现的值（primary 优先）
                if best.as_ref().map_or(true, |b| value.display_len() > b.display_len()) {
                    best = Some(value);
                }
            }
            best
        }
        ConflictResolution::PreferMostRecent => {
            let mut ordered: Vec<&&StoredRecord> = participants.iter().collect();
            ordered.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            ordered.into_iter().find_map(non_blank)
        }
    }
}

// ==========================================
// MergeEngine - 实体合并引擎
// ==========================================
pub struct MergeEngine {
    conn: Arc<Mutex<Connection>>,
    schema: Arc<SchemaRegistry>,
    store: Box<dyn RecordStore>,
}

impl MergeEngine {
    /// 创建新的 MergeEngine 实例
    ///
    /// # 参数
    /// - conn: 共享数据库连接
    /// - schema: Schema 注册表（决定字段集合与关系迁移规则）
    pub fn new(conn: Arc<Mutex<Connection>>, schema: Arc<SchemaRegistry>) -> Self {
        let store = Box::new(SqliteRecordStore::new(schema.clone()));
        Self { conn, schema, store }
    }

    fn get_conn(&self) -> MergeResult<MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| MergeError::Repository(RepositoryError::LockError(e.to_string())))
    }

    /// 合并别名到 primary（提交）
    ///
    /// # 返回
    /// - Ok(MergeOperationResult): 已持久化的合并记录
    /// - Err: 任一冲突或错误,数据库保持不变
    #[instrument(skip(self, policy), fields(default_resolution = %policy.default))]
    pub fn merge(&self, primary_id: i64, alias_ids: &[i64], policy: &MergePolicy) -> MergeResult<MergeOperationResult> {
        self.run(primary_id, alias_ids, policy, true)
    }

    /// 预览合并: 完整执行后回滚,返回 diff
    pub fn preview(&self, primary_id: i64, alias_ids: &[i64], policy: &MergePolicy) -> MergeResult<MergeOperationResult> {
        self.run(primary_id, alias_ids, policy, false)
    }

    fn run(&self, primary_id: i64, alias_ids: &[i64], policy: &MergePolicy, commit: bool) -> MergeResult<MergeOperationResult> {
        let aliases: Vec<i64> = alias_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        if aliases.is_empty() {
            return Err(MergeError::NoAliases);
        }
        if aliases.contains(&primary_id) {
            return Err(MergeError::SelfMerge(primary_id));
        }

        let conn = self.get_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;

        match self.merge_in(&tx, primary_id, &aliases, policy) {
            Ok(result) => {
                if commit {
                    tx.commit()?;
                    info!(
                        merge_id = %result.merge_id,
                        primary_id,
                        consumed = ?result.consumed_ids,
                        "合并完成"
                    );
                } else {
                    tx.rollback()?;
                    debug!(primary_id, "合并预览完成,已回滚");
                }
                Ok(result)
            }
            Err(err) => {
                // tx drop 时回滚
                warn!(primary_id, aliases = ?aliases, error = %err, "合并失败,已回滚");
                Err(err)
            }
        }
    }

    fn load(&self, conn: &Connection, record_id: i64) -> MergeResult<StoredRecord> {
        self.store
            .get(conn, record_id)?
            .ok_or(MergeError::RecordNotFound(record_id))
    }

    fn merge_in(
        &self,
        conn: &Connection,
        primary_id: i64,
        alias_ids: &[i64],
        policy: &MergePolicy,
    ) -> MergeResult<MergeOperationResult> {
        let primary = self.load(conn, primary_id)?;
        let mut aliases = Vec::with_capacity(alias_ids.len());
        for alias_id in alias_ids {
            let alias = self.load(conn, *alias_id)?;
            if alias.record_type != primary.record_type {
                return Err(MergeError::TypeMismatch {
                    primary: primary.record_type,
                    alias_id: alias.record_id,
                    alias: alias.record_type,
                });
            }
            aliases.push(alias);
        }

        let schema = self
            .schema
            .get(primary.record_type)
            .ok_or_else(|| RepositoryError::ValidationError(format!("记录类型 {} 未注册", primary.record_type)))?;

        // 1. 字段
        let (merged_fields, field_diffs) = resolve_fields(schema, &primary, &aliases, policy)?;

        // 2-3. 类型化关系
        let mut relation_diffs = Vec::new();
        for spec in self.schema.relations_touching(primary.record_type) {
            if spec.to_type == primary.record_type {
                if let Some(diff) = self.migrate_incoming(conn, spec, &primary, &aliases)? {
                    relation_diffs.push(diff);
                }
            }
            if spec.from_type == primary.record_type {
                if let Some(diff) = self.migrate_outgoing(conn, spec, &primary, &aliases, policy)? {
                    relation_diffs.push(diff);
                }
            }
        }

        // 4. 通用引用
        relation_diffs.extend(self.migrate_generic_refs(conn, &primary, &aliases)?);

        // 5. 分组 / 快照 / 导入尝试指针
        for alias in &aliases {
            GroupRepository::transfer_membership_tx(conn, alias.record_id, primary.record_id)?;
            let moved = SnapshotRepository::move_record_links_tx(conn, alias.record_id, primary.record_id)?;
            let repointed = ImportAuditRepository::repoint_created_record_tx(conn, alias.record_id, primary.record_id)?;
            debug!(alias_id = alias.record_id, snapshots = moved.len(), attempts = repointed, "别名审计关联已迁移");
        }
        GroupRepository::prune_small_groups_tx(conn)?;

        // 6. 删除别名后写回字段（自然键可能变为某个别名的自然键）
        for alias in &aliases {
            self.store.delete(conn, alias.record_id)?;
        }
        self.store.update_fields(conn, primary.record_id, &merged_fields)?;

        let result = MergeOperationResult {
            merge_id: uuid::Uuid::new_v4().to_string(),
            record_type: primary.record_type,
            primary_id: primary.record_id,
            consumed_ids: alias_ids.to_vec(),
            field_diffs,
            relation_diffs,
            created_at: Utc::now(),
        };
        MergeRepository::insert_tx(conn, &result)?;
        Ok(result)
    }

    /// 入向链接（其他记录 → 别名）改指 primary
    fn migrate_incoming(
        &self,
        conn: &Connection,
        spec: &RelationSpec,
        primary: &StoredRecord,
        aliases: &[StoredRecord],
    ) -> MergeResult<Option<RelationDiff>> {
        let original = self.store.linking(conn, &spec.name, primary.record_id)?;
        let mut migrated = BTreeSet::new();

        for alias in aliases {
            let holders = self.store.linking(conn, &spec.name, alias.record_id)?;
            if holders.is_empty() {
                continue;
            }
            if spec.cardinality == Cardinality::OneToOne {
                let current = self.store.linking(conn, &spec.name, primary.record_id)?;
                if !current.is_empty() && current != holders {
                    return Err(MergeError::Conflict {
                        subject: spec.name.clone(),
                        detail: format!(
                            "primary {} 已被 {:?} 链接,别名 {} 被 {:?} 链接",
                            primary.record_id, current, alias.record_id, holders
                        ),
                    });
                }
            }
            for holder in holders {
                self.store
                    .repoint_reference(conn, &spec.name, holder, alias.record_id, primary.record_id)?;
                migrated.insert(holder);
            }
        }

        if migrated.is_empty() {
            return Ok(None);
        }
        Ok(Some(RelationDiff {
            relation: spec.name.clone(),
            original,
            migrated: migrated.into_iter().collect(),
            final_value: self.store.linking(conn, &spec.name, primary.record_id)?,
        }))
    }

    /// 出向链接（别名 → 其他记录）并入 primary
    ///
    /// - 多对多: 并集
    /// - 一对一: primary 已有不同目标 → 冲突
    /// - 多对一: 按字段策略（关系名作为字段名）解决
    fn migrate_outgoing(
        &self,
        conn: &Connection,
        spec: &RelationSpec,
        primary: &StoredRecord,
        aliases: &[StoredRecord],
        policy: &MergePolicy,
    ) -> MergeResult<Option<RelationDiff>> {
        let original = self.store.linked(conn, &spec.name, primary.record_id)?;
        let mut migrated = BTreeSet::new();
        let mut chosen_at = primary.updated_at;

        for alias in aliases {
            let targets = self.store.linked(conn, &spec.name, alias.record_id)?;
            if targets.is_empty() {
                continue;
            }
            let current = self.store.linked(conn, &spec.name, primary.record_id)?;

            match spec.cardinality {
                Cardinality::ManyToMany => {
                    for target in targets {
                        if self.store.add_to_set(conn, &spec.name, primary.record_id, target)? {
                            migrated.insert(target);
                        }
                    }
                }
                Cardinality::OneToOne => {
                    if !current.is_empty() && current != targets {
                        return Err(MergeError::Conflict {
                            subject: spec.name.clone(),
                            detail: format!(
                                "primary {} 已链接 {:?},别名 {} 链接 {:?}",
                                primary.record_id, current, alias.record_id, targets
                            ),
                        });
                    }
                    for target in targets {
                        if current.contains(&target) {
                            continue;
                        }
                        self.store.remove_from_set(conn, &spec.name, alias.record_id, target)?;
                        self.store.set_single(conn, &spec.name, primary.record_id, target)?;
                        migrated.insert(target);
                    }
                }
                Cardinality::ManyToOne => {
                    let Some(&target) = targets.first() else { continue };
                    if current.contains(&target) {
                        continue;
                    }
                    let adopt = if current.is_empty() {
                        true
                    } else {
                        match policy.resolution_for(&spec.name) {
                            ConflictResolution::Escalate => {
                                return Err(MergeError::Conflict {
                                    subject: spec.name.clone(),
                                    detail: format!(
                                        "primary {} 指向 {:?},别名 {} 指向 {}",
                                        primary.record_id, current, alias.record_id, target
                                    ),
                                });
                            }
                            ConflictResolution::PreferMostRecent => alias.updated_at > chosen_at,
                            ConflictResolution::PreferPrimary | ConflictResolution::PreferLongest => false,
                        }
                    };
                    if adopt {
                        self.store.set_single(conn, &spec.name, primary.record_id, target)?;
                        chosen_at = alias.updated_at;
                        migrated.insert(target);
                    }
                }
            }
        }

        if migrated.is_empty() {
            return Ok(None);
        }
        Ok(Some(RelationDiff {
            relation: spec.name.clone(),
            original,
            migrated: migrated.into_iter().collect(),
            final_value: self.store.linked(conn, &spec.name, primary.record_id)?,
        }))
    }

    /// 通用引用: 指向别名的改指 primary; 别名持有的转移给 primary
    fn migrate_generic_refs(
        &self,
        conn: &Connection,
        primary: &StoredRecord,
        aliases: &[StoredRecord],
    ) -> MergeResult<Vec<RelationDiff>> {
        let owners_by_role = |target_id: i64| -> MergeResult<BTreeMap<String, Vec<i64>>> {
            let mut out: BTreeMap<String, Vec<i64>> = BTreeMap::new();
            for r in self.store.generic_refs_to(conn, target_id)? {
                out.entry(r.role).or_default().push(r.owner_id);
            }
            Ok(out)
        };
        let original = owners_by_role(primary.record_id)?;
        let mut migrated: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();

        for alias in aliases {
            // 入向: owner → 别名
            for r in self.store.generic_refs_to(conn, alias.record_id)? {
                let existing = self.store.generic_refs_from(conn, r.owner_id, &r.role)?;
                if existing.iter().any(|e| e.target_id == primary.record_id) {
                    self.store.delete_generic_ref(conn, r.ref_id)?;
                } else {
                    self.store.repoint_generic_ref(conn, r.ref_id, primary.record_id)?;
                }
                migrated.entry(r.role).or_default().insert(r.owner_id);
            }

            // 出向: 别名 → target,转移给 primary
            for r in self.store.generic_refs_owned_by(conn, alias.record_id)? {
                if r.cardinality == RefCardinality::Single {
                    let held = self.store.generic_refs_from(conn, primary.record_id, &r.role)?;
                    if held.iter().any(|h| h.target_id != r.target_id) {
                        return Err(MergeError::Conflict {
                            subject: r.role.clone(),
                            detail: format!(
                                "primary {} 的单值引用已指向其他记录,别名 {} 指向 {}",
                                primary.record_id, alias.record_id, r.target_id
                            ),
                        });
                    }
                }
                let target = if r.target_id == alias.record_id {
                    primary.record_id
                } else {
                    r.target_id
                };
                self.store.delete_generic_ref(conn, r.ref_id)?;
                self.store
                    .add_generic_ref(conn, primary.record_id, &r.role, target, r.cardinality)?;
            }
        }

        let mut diffs = Vec::new();
        for (role, owners) in migrated {
            let final_value: Vec<i64> = owners_by_role(primary.record_id)?.remove(&role).unwrap_or_default();
            diffs.push(RelationDiff {
                relation: format!("ref:{}", role),
                original: original.get(&role).cloned().unwrap_or_default(),
                migrated: owners.into_iter().collect(),
                final_value,
            });
        }
        Ok(diffs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::DraftRecord;

    fn stored(id: i64, fields: &[(&str, FieldValue)]) -> StoredRecord {
        StoredRecord {
            record_id: id,
            record_type: RecordType::Person,
            natural_key: None,
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn person_schema() -> RecordSchema {
        SchemaRegistry::nrqz().get(RecordType::Person).cloned().unwrap()
    }

    #[test]
    fn test_blank_primary_adopts_single_alias_value() {
        let primary = stored(1, &[("name", FieldValue::text("John Smith"))]);
        let alias = stored(2, &[("name", FieldValue::text("John Smith")), ("phone", FieldValue::text("5551234"))]);
        let (fields, diffs) = resolve_fields(&person_schema(), &primary, &[alias], &MergePolicy::default()).unwrap();

        assert_eq!(fields.get("phone"), Some(&FieldValue::text("5551234")));
        let name = diffs.iter().find(|d| d.field == "name").unwrap();
        assert_eq!(name.to_string(), "name: {\"John Smith\"} -> \"John Smith\"");
        assert!(diffs.iter().find(|d| d.field == "phone").unwrap().changed());
    }

    #[test]
    fn test_escalate_reports_every_conflict() {
        let primary = stored(1, &[("name", FieldValue::text("John Smith")), ("city", FieldValue::text("Elkins"))]);
        let alias = stored(2, &[("name", FieldValue::text("J. Smith")), ("city", FieldValue::text("Marlinton"))]);
        let err = resolve_fields(&person_schema(), &primary, &[alias], &MergePolicy::default()).unwrap_err();
        match err {
            MergeError::Conflict { detail, .. } => {
                assert!(detail.contains("name"));
                assert!(detail.contains("city"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_policies_pick_values() {
        let primary = stored(1, &[("name", FieldValue::text("J. Smith"))]);
        let mut alias = stored(2, &[("name", FieldValue::text("John Q. Smith"))]);
        alias.updated_at = primary.updated_at + chrono::Duration::seconds(5);
        let schema = person_schema();

        let pick_name = |policy: MergePolicy| {
            let (fields, _) = resolve_fields(&schema, &primary, std::slice::from_ref(&alias), &policy).unwrap();
            fields.get("name").cloned().unwrap()
        };
        assert_eq!(pick_name(MergePolicy::new(ConflictResolution::PreferPrimary)), FieldValue::text("J. Smith"));
        assert_eq!(pick_name(MergePolicy::new(ConflictResolution::PreferLongest)), FieldValue::text("John Q. Smith"));
        assert_eq!(
            pick_name(MergePolicy::new(ConflictResolution::PreferMostRecent)),
            FieldValue::text("John Q. Smith")
        );
        assert_eq!(
            pick_name(MergePolicy::default().with_value("name", "Smith, John")),
            FieldValue::text("Smith, John")
        );
        assert_eq!(
            pick_name(MergePolicy::default().with_field("name", ConflictResolution::PreferPrimary)),
            FieldValue::text("J. Smith")
        );
    }

    #[test]
    fn test_prefer_primary_with_blank_primary_still_conflicts() {
        let primary = stored(1, &[("name", FieldValue::text("John Smith"))]);
        let a = stored(2, &[("name", FieldValue::text("John Smith")), ("city", FieldValue::text("Elkins"))]);
        let b = stored(3, &[("name", FieldValue::text("John Smith")), ("city", FieldValue::text("Bartow"))]);
        let policy = MergePolicy::new(ConflictResolution::PreferPrimary);
        assert!(resolve_fields(&person_schema(), &primary, &[a, b], &policy).is_err());
    }

    // ---- 数据库级 ----

    use crate::db::{configure_sqlite_connection, init_schema};

    fn setup() -> (MergeEngine, Arc<Mutex<Connection>>, SqliteRecordStore) {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let schema = Arc::new(SchemaRegistry::nrqz());
        (
            MergeEngine::new(conn.clone(), schema.clone()),
            conn,
            SqliteRecordStore::new(schema),
        )
    }

    fn save(store: &SqliteRecordStore, conn: &Connection, draft: DraftRecord) -> i64 {
        let outcome = store.validate_and_save(conn, &draft).unwrap();
        outcome.record.unwrap().record_id
    }

    fn case(store: &SqliteRecordStore, conn: &Connection, num: i64) -> i64 {
        save(store, conn, DraftRecord::new(RecordType::Case).with_field("case_num", num))
    }

    #[test]
    fn test_merge_unions_contacts_and_removes_alias() {
        let (engine, conn, store) = setup();
        let (primary, alias, cases) = {
            let c = conn.lock().unwrap();
            let primary = save(&store, &c, DraftRecord::new(RecordType::Person)
                .with_field("name", "John Smith")
                .with_field("email", "js@example.com"));
            let alias = save(&store, &c, DraftRecord::new(RecordType::Person).with_field("name", "John Smith"));
            let cases: Vec<i64> = (1..=5).map(|n| case(&store, &c, n)).collect();
            for (i, case_id) in cases.iter().enumerate() {
                let person = if i < 3 { primary } else { alias };
                store.add_to_set(&c, "case.contacts", *case_id, person).unwrap();
            }
            (primary, alias, cases)
        };

        let result = engine.merge(primary, &[alias], &MergePolicy::default()).unwrap();
        assert_eq!(result.consumed_ids, vec![alias]);
        let name = result.field_diffs.iter().find(|d| d.field == "name").unwrap();
        assert_eq!(name.to_string(), "name: {\"John Smith\"} -> \"John Smith\"");
        let contacts = result.relation_diffs.iter().find(|d| d.relation == "case.contacts").unwrap();
        assert_eq!(contacts.final_value, cases);

        {
            let c = conn.lock().unwrap();
            assert!(store.get(&c, alias).unwrap().is_none());
            assert_eq!(store.linking(&c, "case.contacts", primary).unwrap().len(), 5);
        }
        let history = MergeRepository::from_connection(conn.clone());
        assert_eq!(history.list_for_primary(primary).unwrap().len(), 1);
    }

    #[test]
    fn test_one_to_one_conflict_rolls_back_everything() {
        let (engine, conn, store) = setup();
        let (primary, alias, prelim_a, prelim_b) = {
            let c = conn.lock().unwrap();
            let primary = case(&store, &c, 10);
            let alias = case(&store, &c, 11);
            let prelim_a = save(&store, &c, DraftRecord::new(RecordType::PreliminaryCase).with_field("case_num", 1_i64));
            let prelim_b = save(&store, &c, DraftRecord::new(RecordType::PreliminaryCase).with_field("case_num", 2_i64));
            store.set_single(&c, "prelim.converted_case", prelim_a, primary).unwrap();
            store.set_single(&c, "prelim.converted_case", prelim_b, alias).unwrap();
            (primary, alias, prelim_a, prelim_b)
        };

        let policy = MergePolicy::new(ConflictResolution::PreferPrimary);
        let err = engine.merge(primary, &[alias], &policy).unwrap_err();
        assert!(matches!(err, MergeError::Conflict { ref subject, .. } if subject == "prelim.converted_case"));

        {
            let c = conn.lock().unwrap();
            assert!(store.get(&c, alias).unwrap().is_some());
            assert_eq!(store.linked(&c, "prelim.converted_case", prelim_a).unwrap(), vec![primary]);
            assert_eq!(store.linked(&c, "prelim.converted_case", prelim_b).unwrap(), vec![alias]);
        }
        assert!(MergeRepository::from_connection(conn).list_recent(10).unwrap().is_empty());
    }

    #[test]
    fn test_preview_does_not_persist() {
        let (engine, conn, store) = setup();
        let (primary, alias) = {
            let c = conn.lock().unwrap();
            (case(&store, &c, 20), case(&store, &c, 21))
        };
        let policy = MergePolicy::new(ConflictResolution::PreferPrimary);
        let preview = engine.preview(primary, &[alias], &policy).unwrap();
        assert_eq!(preview.primary_id, primary);

        {
            let c = conn.lock().unwrap();
            assert!(store.get(&c, alias).unwrap().is_some());
        }
        assert!(MergeRepository::from_connection(conn).list_recent(10).unwrap().is_empty());
    }

    #[test]
    fn test_argument_errors() {
        let (engine, conn, store) = setup();
        let (case_id, person_id) = {
            let c = conn.lock().unwrap();
            let person = save(&store, &c, DraftRecord::new(RecordType::Person).with_field("name", "A"));
            (case(&store, &c, 30), person)
        };
        let policy = MergePolicy::default();
        assert!(matches!(engine.merge(case_id, &[], &policy), Err(MergeError::NoAliases)));
        assert!(matches!(engine.merge(case_id, &[case_id], &policy), Err(MergeError::SelfMerge(_))));
        assert!(matches!(engine.merge(case_id, &[9999], &policy), Err(MergeError::RecordNotFound(9999))));
        assert!(matches!(
            engine.merge(case_id, &[person_id], &policy),
            Err(MergeError::TypeMismatch { .. })
        ));
    }
}
