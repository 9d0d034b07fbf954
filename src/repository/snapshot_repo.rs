// ==========================================
// NRQZ 记录管理系统 - 原始行快照仓储
// ==========================================
// 表: row_snapshot / record_snapshot
// 红线: 快照创建后不可变（只有插入与查询,无更新）
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::import::RowSnapshot;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::record_repo::parse_timestamp;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

/// 原始行快照仓储
pub struct SnapshotRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SnapshotRepository {
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

    /// 在事务中插入快照
    pub fn insert_snapshot_tx(conn: &Connection, snapshot: &RowSnapshot) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO row_snapshot (snapshot_id, file_attempt_id, row_number, data_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                snapshot.snapshot_id,
                snapshot.file_attempt_id,
                snapshot.row_number as i64,
                serde_json::to_string(&snapshot.data)?,
                snapshot.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// 在事务中关联 记录 ↔ 快照（重复关联忽略）
    pub fn link_record_tx(conn: &Connection, record_id: i64, snapshot_id: &str) -> RepositoryResult<()> {
        conn.execute(
            "INSERT OR IGNORE INTO record_snapshot (record_id, snapshot_id) VALUES (?1, ?2)",
            params![record_id, snapshot_id],
        )?;
        Ok(())
    }

    /// 在事务中把 from_record 的全部快照关联迁移到 to_record
    ///
    /// # 返回
    /// - 迁移的快照 ID（升序）
    pub fn move_record_links_tx(conn: &Connection, from_record: i64, to_record: i64) -> RepositoryResult<Vec<String>> {
        let moved = Self::snapshot_ids_for_record_tx(conn, from_record)?;
        conn.execute(
            r#"
            INSERT OR IGNORE INTO record_snapshot (record_id, snapshot_id)
            SELECT ?2, snapshot_id FROM record_snapshot WHERE record_id = ?1
            "#,
            params![from_record, to_record],
        )?;
        conn.execute("DELETE FROM record_snapshot WHERE record_id = ?1", params![from_record])?;
        Ok(moved)
    }

    pub fn get_snapshot_tx(conn: &Connection, snapshot_id: &str) -> RepositoryResult<Option<RowSnapshot>> {
        let raw = conn
            .query_row(
                "SELECT snapshot_id, file_attempt_id, row_number, data_json, created_at FROM row_snapshot WHERE snapshot_id = ?1",
                params![snapshot_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        match raw {
            None => Ok(None),
            Some((snapshot_id, file_attempt_id, row_number, data_json, created_at)) => Ok(Some(RowSnapshot {
                snapshot_id,
                file_attempt_id,
                row_number: row_number as usize,
                data: serde_json::from_str(&data_json)?,
                created_at: parse_timestamp("created_at", &created_at)?,
            })),
        }
    }

    pub fn snapshot_ids_for_record_tx(conn: &Connection, record_id: i64) -> RepositoryResult<Vec<String>> {
        let mut stmt =
            conn.prepare("SELECT snapshot_id FROM record_snapshot WHERE record_id = ?1 ORDER BY snapshot_id")?;
        let ids = stmt
            .query_map(params![record_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// 按 ID 查询快照
    pub fn get_snapshot(&self, snapshot_id: &str) -> RepositoryResult<Option<RowSnapshot>> {
        let conn = self.get_conn()?;
        Self::get_snapshot_tx(&conn, snapshot_id)
    }

    /// 查询记录的全部来源快照
    pub fn snapshots_for_record(&self, record_id: i64) -> RepositoryResult<Vec<RowSnapshot>> {
        let conn = self.get_conn()?;
        let ids = Self::snapshot_ids_for_record_tx(&conn, record_id)?;
        let mut snapshots = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(snapshot) = Self::get_snapshot_tx(&conn, &id)? {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }
}
