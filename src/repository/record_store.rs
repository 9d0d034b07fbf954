// ==========================================
// NRQZ 记录管理系统 - 持久化协作者接口
// ==========================================
// 职责: 导入管道与合并引擎所依赖的记录存取 / 校验 / 关系迁移原语
// 约定: 所有方法接收调用方的连接（可为事务或保存点）,
//       由调用方决定事务边界
// ==========================================

use crate::domain::import::{FieldError, FieldErrorKind};
use crate::domain::record::{natural_key, DraftRecord, FieldValues, StoredRecord};
use crate::domain::schema::SchemaRegistry;
use crate::domain::types::{RecordType, RefCardinality};
use crate::repository::error::RepositoryResult;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

// ==========================================
// SaveOutcome - validate_and_save 的结果
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    /// 已保存的记录（被拒绝时为 None）
    pub record: Option<StoredRecord>,
    /// 校验错误（非空即被拒绝）
    pub errors: Vec<FieldError>,
    /// true: 新建; false: 按自然键原地更新
    pub created: bool,
}

impl SaveOutcome {
    pub fn rejected(errors: Vec<FieldError>) -> Self {
        Self {
            record: None,
            errors,
            created: false,
        }
    }

    pub fn saved(record: StoredRecord, created: bool) -> Self {
        Self {
            record: Some(record),
            errors: Vec::new(),
            created,
        }
    }

    pub fn is_saved(&self) -> bool {
        self.record.is_some()
    }
}

// ==========================================
// GenericRef - 通用（多态）引用
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericRef {
    pub ref_id: i64,
    pub owner_id: i64,
    pub role: String,
    pub target_id: i64,
    pub cardinality: RefCardinality,
}

// ==========================================
// RecordStore Trait
// ==========================================
pub trait RecordStore: Send + Sync {
    fn schema(&self) -> &SchemaRegistry;

    /// 按 Schema 校验草稿（不触库）
    ///
    /// # 规则
    /// - 字段必须可写
    /// - 值类型必须匹配字段类型
    /// - 必填字段不可为空
    fn validate(&self, draft: &DraftRecord) -> Vec<FieldError> {
        let schema = match self.schema().get(draft.record_type) {
            Some(s) => s,
            None => {
                return vec![FieldError::new(
                    "record_type",
                    FieldErrorKind::Validation,
                    format!("记录类型 {} 未注册", draft.record_type),
                )
                .fatal()]
            }
        };

        let mut errors = Vec::new();
        for (name, value) in &draft.fields {
            match schema.field(name) {
                None => errors.push(
                    FieldError::new(name, FieldErrorKind::Validation, "不是可写字段").fatal(),
                ),
                Some(spec) if !value.matches_kind(spec.kind) => errors.push(
                    FieldError::new(
                        name,
                        FieldErrorKind::Validation,
                        format!("类型不符,期望 {:?}", spec.kind),
                    )
                    .with_raw(value.to_raw_string())
                    .fatal(),
                ),
                Some(_) => {}
            }
        }
        for spec in schema.required_fields() {
            let blank = draft.get(&spec.name).map(|v| v.is_blank()).unwrap_or(true);
            if blank {
                errors.push(FieldError::new(&spec.name, FieldErrorKind::Validation, "必填字段为空").fatal());
            }
        }
        errors
    }

    /// 校验并保存; 自然键已存在时原地更新（记录 ID 不变）
    fn validate_and_save(&self, conn: &Connection, draft: &DraftRecord) -> RepositoryResult<SaveOutcome>;

    fn get(&self, conn: &Connection, record_id: i64) -> RepositoryResult<Option<StoredRecord>>;

    /// 按自然键查找（由字段计算自然键）
    fn get_by_natural_key(
        &self,
        conn: &Connection,
        record_type: RecordType,
        fields: &FieldValues,
    ) -> RepositoryResult<Option<StoredRecord>> {
        let key = match self.schema().get(record_type).and_then(|s| natural_key(s, fields)) {
            Some(k) => k,
            None => return Ok(None),
        };
        self.get_by_key_string(conn, record_type, &key)
    }

    fn get_by_key_string(
        &self,
        conn: &Connection,
        record_type: RecordType,
        key: &str,
    ) -> RepositoryResult<Option<StoredRecord>>;

    fn list_by_type(&self, conn: &Connection, record_type: RecordType) -> RepositoryResult<Vec<StoredRecord>>;

    /// 覆盖写入字段（合并引擎使用）
    fn update_fields(&self, conn: &Connection, record_id: i64, fields: &FieldValues) -> RepositoryResult<()>;

    fn delete(&self, conn: &Connection, record_id: i64) -> RepositoryResult<()>;

    // ===== 类型化关系 =====

    /// from_id 通过 relation 指向的记录（升序）
    fn linked(&self, conn: &Connection, relation: &str, from_id: i64) -> RepositoryResult<Vec<i64>>;

    /// 通过 relation 指向 to_id 的记录（升序）
    fn linking(&self, conn: &Connection, relation: &str, to_id: i64) -> RepositoryResult<Vec<i64>>;

    /// 加入集合; 已存在 → Ok(false); 违反基数 → CardinalityViolation
    fn add_to_set(&self, conn: &Connection, relation: &str, from_id: i64, to_id: i64) -> RepositoryResult<bool>;

    /// 移出集合; 不存在 → Ok(false)
    fn remove_from_set(&self, conn: &Connection, relation: &str, from_id: i64, to_id: i64)
        -> RepositoryResult<bool>;

    /// 单值关系: 替换 from_id 的唯一目标
    fn set_single(&self, conn: &Connection, relation: &str, from_id: i64, to_id: i64) -> RepositoryResult<()>;

    /// 将 from_id 的链接从 old_to 改指 new_to（目标已存在则去重）
    fn repoint_reference(
        &self,
        conn: &Connection,
        relation: &str,
        from_id: i64,
        old_to: i64,
        new_to: i64,
    ) -> RepositoryResult<()>;

    // ===== 通用引用 =====

    fn add_generic_ref(
        &self,
        conn: &Connection,
        owner_id: i64,
        role: &str,
        target_id: i64,
        cardinality: RefCardinality,
    ) -> RepositoryResult<i64>;

    fn generic_refs_to(&self, conn: &Connection, target_id: i64) -> RepositoryResult<Vec<GenericRef>>;

    fn generic_refs_from(&self, conn: &Connection, owner_id: i64, role: &str) -> RepositoryResult<Vec<GenericRef>>;

    /// 某记录持有的全部通用引用（任意 role）
    fn generic_refs_owned_by(&self, conn: &Connection, owner_id: i64) -> RepositoryResult<Vec<GenericRef>>;

    fn repoint_generic_ref(&self, conn: &Connection, ref_id: i64, new_target: i64) -> RepositoryResult<()>;

    fn delete_generic_ref(&self, conn: &Connection, ref_id: i64) -> RepositoryResult<()>;
}
