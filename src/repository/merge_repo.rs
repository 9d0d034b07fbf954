// ==========================================
// NRQZ 记录管理系统 - 合并操作审计仓储
// ==========================================
// 表: merge_operation
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::merge::MergeOperationResult;
use crate::domain::types::RecordType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::record_repo::parse_timestamp;
use rusqlite::{params, Connection, Row};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

type MergeRow = (String, String, i64, String, String, String, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<MergeRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_domain(raw: MergeRow) -> RepositoryResult<MergeOperationResult> {
    let (merge_id, record_type, primary_id, consumed, fields, relations, created_at) = raw;
    Ok(MergeOperationResult {
        merge_id,
        record_type: RecordType::from_str(&record_type).map_err(|message| RepositoryError::FieldValueError {
            field: "record_type".to_string(),
            message,
        })?,
        primary_id,
        consumed_ids: serde_json::from_str(&consumed)?,
        field_diffs: serde_json::from_str(&fields)?,
        relation_diffs: serde_json::from_str(&relations)?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

const MERGE_COLUMNS: &str =
    "merge_id, record_type, primary_id, consumed_ids_json, field_diffs_json, relation_diffs_json, created_at";

/// 合并操作审计仓储
pub struct MergeRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MergeRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 在合并事务中写入审计记录
    pub fn insert_tx(conn: &Connection, result: &MergeOperationResult) -> RepositoryResult<()> {
        conn.execute(
            &format!("INSERT INTO merge_operation ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)", MERGE_COLUMNS),
            params![
                result.merge_id,
                result.record_type.as_str(),
                result.primary_id,
                serde_json::to_string(&result.consumed_ids)?,
                serde_json::to_string(&result.field_diffs)?,
                serde_json::to_string(&result.relation_diffs)?,
                result.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// 某幸存记录的全部合并历史（按时间）
    pub fn list_for_primary(&self, primary_id: i64) -> RepositoryResult<Vec<MergeOperationResult>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM merge_operation WHERE primary_id = ?1 ORDER BY created_at, merge_id",
            MERGE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![primary_id], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_domain).collect()
    }

    pub fn list_recent(&self, limit: usize) -> RepositoryResult<Vec<MergeOperationResult>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM merge_operation ORDER BY created_at DESC, merge_id LIMIT ?1",
            MERGE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_domain).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use crate::domain::merge::{FieldDiff, RelationDiff};
    use crate::domain::value::FieldValue;
    use chrono::Utc;

    #[test]
    fn test_insert_and_list() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();

        let result = MergeOperationResult {
            merge_id: "m1".to_string(),
            record_type: RecordType::Person,
            primary_id: 1,
            consumed_ids: vec![2, 3],
            field_diffs: vec![FieldDiff {
                field: "email".to_string(),
                original: FieldValue::Null,
                candidates: vec![FieldValue::text("a@x.org")],
                final_value: FieldValue::text("a@x.org"),
            }],
            relation_diffs: vec![RelationDiff {
                relation: "case.applicant".to_string(),
                original: vec![10],
                migrated: vec![11],
                final_value: vec![10, 11],
            }],
            created_at: Utc::now(),
        };
        MergeRepository::insert_tx(&conn, &result).unwrap();

        let repo = MergeRepository::from_connection(Arc::new(Mutex::new(conn)));
        let loaded = repo.list_for_primary(1).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].consumed_ids, vec![2, 3]);
        assert_eq!(loaded[0].field_diffs[0].final_value, FieldValue::text("a@x.org"));
        assert_eq!(repo.list_recent(5).unwrap().len(), 1);
    }
}
