// ==========================================
// NRQZ 记录管理系统 - 记录仓储（SQLite 实现）
// ==========================================
// 表: record / relation_link / generic_ref
// 红线: Repository 不含业务逻辑（合并策略 / 分组规则在引擎层）
// ==========================================

use crate::domain::import::FieldError;
use crate::domain::record::{natural_key, DraftRecord, FieldValues, StoredRecord};
use crate::domain::schema::{RelationSpec, SchemaRegistry};
use crate::domain::types::{Cardinality, RecordType, RefCardinality};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::record_store::{GenericRef, RecordStore, SaveOutcome};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::Arc;

const RECORD_COLUMNS: &str = "record_id, record_type, natural_key, fields_json, created_at, updated_at";

/// record 表的原始行（解析在闭包外完成,解析失败走 RepositoryError）
struct RecordRow {
    record_id: i64,
    record_type: String,
    natural_key: Option<String>,
    fields_json: String,
    created_at: String,
    updated_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            record_id: row.get(0)?,
            record_type: row.get(1)?,
            natural_key: row.get(2)?,
            fields_json: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_record(self) -> RepositoryResult<StoredRecord> {
        let record_type = RecordType::from_str(&self.record_type).map_err(|e| RepositoryError::FieldValueError {
            field: "record_type".to_string(),
            message: e,
        })?;
        Ok(StoredRecord {
            record_id: self.record_id,
            record_type,
            natural_key: self.natural_key,
            fields: serde_json::from_str(&self.fields_json)?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

pub(crate) fn parse_timestamp(field: &str, raw: &str) -> RepositoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::FieldValueError {
            field: field.to_string(),
            message: format!("{}: {}", raw, e),
        })
}

// ==========================================
// SqliteRecordStore
// ==========================================
/// 记录仓储
/// 职责: 记录 CRUD、自然键 upsert、类型化关系与通用引用
/// 说明: 无内部连接,由调用方传入连接（事务边界由调用方决定）
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    schema: Arc<SchemaRegistry>,
}

impl SqliteRecordStore {
    pub fn new(schema: Arc<SchemaRegistry>) -> Self {
        Self { schema }
    }

    fn relation_spec(&self, relation: &str) -> RepositoryResult<&RelationSpec> {
        self.schema
            .relation(relation)
            .ok_or_else(|| RepositoryError::UnknownRelation(relation.to_string()))
    }

    fn record_type_of(&self, conn: &Connection, record_id: i64) -> RepositoryResult<RecordType> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT record_type FROM record WHERE record_id = ?1",
                params![record_id],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or_else(|| RepositoryError::NotFound {
            entity: "record".to_string(),
            id: record_id.to_string(),
        })?;
        RecordType::from_str(&raw).map_err(|e| RepositoryError::FieldValueError {
            field: "record_type".to_string(),
            message: e,
        })
    }

    /// 关系两端的记录类型必须与关系声明一致
    fn check_endpoints(&self, conn: &Connection, spec: &RelationSpec, from_id: i64, to_id: i64) -> RepositoryResult<()> {
        let from_type = self.record_type_of(conn, from_id)?;
        let to_type = self.record_type_of(conn, to_id)?;
        if from_type != spec.from_type || to_type != spec.to_type {
            return Err(RepositoryError::ValidationError(format!(
                "关系 {} 需要 {} → {},实际为 {} → {}",
                spec.name, spec.from_type, spec.to_type, from_type, to_type
            )));
        }
        Ok(())
    }

    /// 一对一: to_id 不能已被其他 from 链接
    fn check_one_to_one_target(
        &self,
        conn: &Connection,
        spec: &RelationSpec,
        from_id: i64,
        to_id: i64,
    ) -> RepositoryResult<()> {
        if spec.cardinality != Cardinality::OneToOne {
            return Ok(());
        }
        let holders = self.linking(conn, &spec.name, to_id)?;
        if let Some(other) = holders.into_iter().find(|id| *id != from_id) {
            return Err(RepositoryError::CardinalityViolation {
                relation: spec.name.clone(),
                message: format!("记录 {} 已被记录 {} 占用", to_id, other),
            });
        }
        Ok(())
    }

    fn insert_link(&self, conn: &Connection, relation: &str, from_id: i64, to_id: i64) -> RepositoryResult<bool> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO relation_link (relation, from_id, to_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![relation, from_id, to_id, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    fn query_ids(&self, conn: &Connection, sql: &str, relation: &str, id: i64) -> RepositoryResult<Vec<i64>> {
        let mut stmt = conn.prepare(sql)?;
        let ids = stmt
            .query_map(params![relation, id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    fn query_refs(&self, conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> RepositoryResult<Vec<GenericRef>> {
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(args, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(ref_id, owner_id, role, target_id, cardinality)| {
                let cardinality =
                    RefCardinality::from_str(&cardinality).map_err(|e| RepositoryError::FieldValueError {
                        field: "cardinality".to_string(),
                        message: e,
                    })?;
                Ok(GenericRef {
                    ref_id,
                    owner_id,
                    role,
                    target_id,
                    cardinality,
                })
            })
            .collect()
    }
}

impl RecordStore for SqliteRecordStore {
    fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// 校验并保存
    ///
    /// # 说明
    /// - 校验失败 → SaveOutcome::rejected,不触库
    /// - 自然键命中 → 草稿中的非空字段覆盖到已有字段上;
    ///   未出现或为空（空单元格 / 空值哨兵）的字段保留原值
    fn validate_and_save(&self, conn: &Connection, draft: &DraftRecord) -> RepositoryResult<SaveOutcome> {
        let errors: Vec<FieldError> = self.validate(draft);
        if !errors.is_empty() {
            return Ok(SaveOutcome::rejected(errors));
        }

        let schema = self
            .schema
            .get(draft.record_type)
            .ok_or_else(|| RepositoryError::ValidationError(format!("记录类型 {} 未注册", draft.record_type)))?;
        let key = natural_key(schema, &draft.fields);

        let existing = match &key {
            Some(k) => self.get_by_key_string(conn, draft.record_type, k)?,
            None => None,
        };

        let now = Utc::now();
        match existing {
            Some(mut record) => {
                for (name, value) in draft.fields.iter().filter(|(_, v)| !v.is_blank()) {
                    record.fields.insert(name.clone(), value.clone());
                }
                conn.execute(
                    "UPDATE record SET fields_json = ?1, updated_at = ?2 WHERE record_id = ?3",
                    params![serde_json::to_string(&record.fields)?, now.to_rfc3339(), record.record_id],
                )?;
                record.updated_at = now;
                Ok(SaveOutcome::saved(record, false))
            }
            None => {
                conn.execute(
                    r#"
                    INSERT INTO record (record_type, natural_key, fields_json, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?4)
                    "#,
                    params![
                        draft.record_type.as_str(),
                        key,
                        serde_json::to_string(&draft.fields)?,
                        now.to_rfc3339(),
                    ],
                )?;
                let record = StoredRecord {
                    record_id: conn.last_insert_rowid(),
                    record_type: draft.record_type,
                    natural_key: key,
                    fields: draft.fields.clone(),
                    created_at: now,
                    updated_at: now,
                };
                Ok(SaveOutcome::saved(record, true))
            }
        }
    }

    fn get(&self, conn: &Connection, record_id: i64) -> RepositoryResult<Option<StoredRecord>> {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM record WHERE record_id = ?1", RECORD_COLUMNS),
                params![record_id],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(RecordRow::into_record).transpose()
    }

    fn get_by_key_string(
        &self,
        conn: &Connection,
        record_type: RecordType,
        key: &str,
    ) -> RepositoryResult<Option<StoredRecord>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM record WHERE record_type = ?1 AND natural_key = ?2",
                    RECORD_COLUMNS
                ),
                params![record_type.as_str(), key],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(RecordRow::into_record).transpose()
    }

    fn list_by_type(&self, conn: &Connection, record_type: RecordType) -> RepositoryResult<Vec<StoredRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM record WHERE record_type = ?1 ORDER BY record_id",
            RECORD_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![record_type.as_str()], RecordRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RecordRow::into_record).collect()
    }

    /// 整体替换字段,并按新字段重算自然键
    fn update_fields(&self, conn: &Connection, record_id: i64, fields: &FieldValues) -> RepositoryResult<()> {
        let record_type = self.record_type_of(conn, record_id)?;
        let key = self
            .schema
            .get(record_type)
            .and_then(|schema| natural_key(schema, fields));
        conn.execute(
            "UPDATE record SET fields_json = ?1, natural_key = ?2, updated_at = ?3 WHERE record_id = ?4",
            params![serde_json::to_string(fields)?, key, Utc::now().to_rfc3339(), record_id],
        )?;
        Ok(())
    }

    fn delete(&self, conn: &Connection, record_id: i64) -> RepositoryResult<()> {
        let deleted = conn.execute("DELETE FROM record WHERE record_id = ?1", params![record_id])?;
        if deleted == 0 {
            return Err(RepositoryError::NotFound {
                entity: "record".to_string(),
                id: record_id.to_string(),
            });
        }
        Ok(())
    }

    // ===== 类型化关系 =====

    fn linked(&self, conn: &Connection, relation: &str, from_id: i64) -> RepositoryResult<Vec<i64>> {
        self.query_ids(
            conn,
            "SELECT to_id FROM relation_link WHERE relation = ?1 AND from_id = ?2 ORDER BY to_id",
            relation,
            from_id,
        )
    }

    fn linking(&self, conn: &Connection, relation: &str, to_id: i64) -> RepositoryResult<Vec<i64>> {
        self.query_ids(
            conn,
            "SELECT from_id FROM relation_link WHERE relation = ?1 AND to_id = ?2 ORDER BY from_id",
            relation,
            to_id,
        )
    }

    fn add_to_set(&self, conn: &Connection, relation: &str, from_id: i64, to_id: i64) -> RepositoryResult<bool> {
        let spec = self.relation_spec(relation)?;
        self.check_endpoints(conn, spec, from_id, to_id)?;

        if spec.cardinality.is_single_valued() {
            let current = self.linked(conn, relation, from_id)?;
            if let Some(other) = current.iter().find(|id| **id != to_id) {
                return Err(RepositoryError::CardinalityViolation {
                    relation: relation.to_string(),
                    message: format!("记录 {} 已链接到 {}", from_id, other),
                });
            }
        }
        self.check_one_to_one_target(conn, spec, from_id, to_id)?;
        self.insert_link(conn, relation, from_id, to_id)
    }

    fn remove_from_set(
        &self,
        conn: &Connection,
        relation: &str,
        from_id: i64,
        to_id: i64,
    ) -> RepositoryResult<bool> {
        self.relation_spec(relation)?;
        let deleted = conn.execute(
            "DELETE FROM relation_link WHERE relation = ?1 AND from_id = ?2 AND to_id = ?3",
            params![relation, from_id, to_id],
        )?;
        Ok(deleted > 0)
    }

    fn set_single(&self, conn: &Connection, relation: &str, from_id: i64, to_id: i64) -> RepositoryResult<()> {
        let spec = self.relation_spec(relation)?;
        if !spec.cardinality.is_single_valued() {
            return Err(RepositoryError::CardinalityViolation {
                relation: relation.to_string(),
                message: "多对多关系不能按单值设置".to_string(),
            });
        }
        self.check_endpoints(conn, spec, from_id, to_id)?;
        self.check_one_to_one_target(conn, spec, from_id, to_id)?;

        conn.execute(
            "DELETE FROM relation_link WHERE relation = ?1 AND from_id = ?2 AND to_id <> ?3",
            params![relation, from_id, to_id],
        )?;
        self.insert_link(conn, relation, from_id, to_id)?;
        Ok(())
    }

    fn repoint_reference(
        &self,
        conn: &Connection,
        relation: &str,
        from_id: i64,
        old_to: i64,
        new_to: i64,
    ) -> RepositoryResult<()> {
        let spec = self.relation_spec(relation)?;
        if old_to == new_to {
            return Ok(());
        }
        self.check_one_to_one_target(conn, spec, from_id, new_to)?;

        let already_linked: bool = conn
            .query_row(
                "SELECT 1 FROM relation_link WHERE relation = ?1 AND from_id = ?2 AND to_id = ?3",
                params![relation, from_id, new_to],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        if already_linked {
            conn.execute(
                "DELETE FROM relation_link WHERE relation = ?1 AND from_id = ?2 AND to_id = ?3",
                params![relation, from_id, old_to],
            )?;
        } else {
            conn.execute(
                "UPDATE relation_link SET to_id = ?4 WHERE relation = ?1 AND from_id = ?2 AND to_id = ?3",
                params![relation, from_id, old_to, new_to],
            )?;
        }
        Ok(())
    }

    // ===== 通用引用 =====

    fn add_generic_ref(
        &self,
        conn: &Connection,
        owner_id: i64,
        role: &str,
        target_id: i64,
        cardinality: RefCardinality,
    ) -> RepositoryResult<i64> {
        if cardinality == RefCardinality::Single {
            let existing = self.generic_refs_from(conn, owner_id, role)?;
            if let Some(other) = existing.iter().find(|r| r.target_id != target_id) {
                return Err(RepositoryError::CardinalityViolation {
                    relation: role.to_string(),
                    message: format!("记录 {} 的单值引用已指向 {}", owner_id, other.target_id),
                });
            }
            if let Some(same) = existing.into_iter().next() {
                return Ok(same.ref_id);
            }
        }

        conn.execute(
            r#"
            INSERT INTO generic_ref (owner_id, role, target_id, cardinality, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(owner_id, role, target_id) DO NOTHING
            "#,
            params![owner_id, role, target_id, cardinality.to_string(), Utc::now().to_rfc3339()],
        )?;
        let ref_id: i64 = conn.query_row(
            "SELECT ref_id FROM generic_ref WHERE owner_id = ?1 AND role = ?2 AND target_id = ?3",
            params![owner_id, role, target_id],
            |row| row.get(0),
        )?;
        Ok(ref_id)
    }

    fn generic_refs_to(&self, conn: &Connection, target_id: i64) -> RepositoryResult<Vec<GenericRef>> {
        self.query_refs(
            conn,
            "SELECT ref_id, owner_id, role, target_id, cardinality FROM generic_ref WHERE target_id = ?1 ORDER BY ref_id",
            &[&target_id],
        )
    }

    fn generic_refs_from(&self, conn: &Connection, owner_id: i64, role: &str) -> RepositoryResult<Vec<GenericRef>> {
        self.query_refs(
            conn,
            "SELECT ref_id, owner_id, role, target_id, cardinality FROM generic_ref WHERE owner_id = ?1 AND role = ?2 ORDER BY ref_id",
            &[&owner_id, &role],
        )
    }

    fn generic_refs_owned_by(&self, conn: &Connection, owner_id: i64) -> RepositoryResult<Vec<GenericRef>> {
        self.query_refs(
            conn,
            "SELECT ref_id, owner_id, role, target_id, cardinality FROM generic_ref WHERE owner_id = ?1 ORDER BY role, ref_id",
            &[&owner_id],
        )
    }

    fn repoint_generic_ref(&self, conn: &Connection, ref_id: i64, new_target: i64) -> RepositoryResult<()> {
        let updated = conn.execute(
            "UPDATE generic_ref SET target_id = ?1 WHERE ref_id = ?2",
            params![new_target, ref_id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound {
                entity: "generic_ref".to_string(),
                id: ref_id.to_string(),
            });
        }
        Ok(())
    }

    fn delete_generic_ref(&self, conn: &Connection, ref_id: i64) -> RepositoryResult<()> {
        conn.execute("DELETE FROM generic_ref WHERE ref_id = ?1", params![ref_id])?;
        Ok(())
    }
}
