// ==========================================
// NRQZ 记录管理系统 - 导入审计仓储
// ==========================================
// 表: file_import_attempt / import_attempt
// 职责: 文件级与行级尝试的持久化、查询、确认（acknowledge）
// 红线: 状态由导入管道派生后写入,此处不做状态推断
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::import::{FileImportAttempt, ImportAttempt, RowErrorSummary};
use crate::domain::types::{ImportStatus, RecordType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::record_repo::parse_timestamp;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

fn parse_field<T: FromStr<Err = String>>(field: &str, raw: &str) -> RepositoryResult<T> {
    T::from_str(raw).map_err(|message| RepositoryError::FieldValueError {
        field: field.to_string(),
        message,
    })
}

const FILE_ATTEMPT_COLUMNS: &str = r#"
    file_attempt_id, source_path, profile, durable, dry_run, status, row_count,
    unmapped_headers_json, ambiguous_headers_json, file_errors_json,
    acknowledged, created_at, elapsed_ms
"#;

const ATTEMPT_COLUMNS: &str = r#"
    attempt_id, file_attempt_id, snapshot_id, row_number, form_map, record_type,
    status, errors_json, created_record_id, acknowledged, created_at
"#;

struct FileAttemptRow {
    file_attempt_id: String,
    source_path: String,
    profile: String,
    durable: bool,
    dry_run: bool,
    status: String,
    row_count: i64,
    unmapped_headers_json: String,
    ambiguous_headers_json: String,
    file_errors_json: String,
    acknowledged: bool,
    created_at: String,
    elapsed_ms: i64,
}

impl FileAttemptRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            file_attempt_id: row.get(0)?,
            source_path: row.get(1)?,
            profile: row.get(2)?,
            durable: row.get(3)?,
            dry_run: row.get(4)?,
            status: row.get(5)?,
            row_count: row.get(6)?,
            unmapped_headers_json: row.get(7)?,
            ambiguous_headers_json: row.get(8)?,
            file_errors_json: row.get(9)?,
            acknowledged: row.get(10)?,
            created_at: row.get(11)?,
            elapsed_ms: row.get(12)?,
        })
    }

    fn into_domain(self) -> RepositoryResult<FileImportAttempt> {
        Ok(FileImportAttempt {
            file_attempt_id: self.file_attempt_id,
            source_path: self.source_path,
            profile: self.profile,
            durable: self.durable,
            dry_run: self.dry_run,
            status: parse_field("status", &self.status)?,
            row_count: self.row_count.max(0) as usize,
            unmapped_headers: serde_json::from_str(&self.unmapped_headers_json)?,
            ambiguous_headers: serde_json::from_str(&self.ambiguous_headers_json)?,
            file_errors: serde_json::from_str(&self.file_errors_json)?,
            acknowledged: self.acknowledged,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            elapsed_ms: self.elapsed_ms,
        })
    }
}

struct AttemptRow {
    attempt_id: String,
    file_attempt_id: Option<String>,
    snapshot_id: String,
    row_number: i64,
    form_map: String,
    record_type: String,
    status: String,
    errors_json: String,
    created_record_id: Option<i64>,
    acknowledged: bool,
    created_at: String,
}

impl AttemptRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            attempt_id: row.get(0)?,
            file_attempt_id: row.get(1)?,
            snapshot_id: row.get(2)?,
            row_number: row.get(3)?,
            form_map: row.get(4)?,
            record_type: row.get(5)?,
            status: row.get(6)?,
            errors_json: row.get(7)?,
            created_record_id: row.get(8)?,
            acknowledged: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_domain(self) -> RepositoryResult<ImportAttempt> {
        Ok(ImportAttempt {
            attempt_id: self.attempt_id,
            file_attempt_id: self.file_attempt_id,
            snapshot_id: self.snapshot_id,
            row_number: self.row_number.max(0) as usize,
            form_map: self.form_map,
            record_type: parse_field::<RecordType>("record_type", &self.record_type)?,
            status: parse_field::<ImportStatus>("status", &self.status)?,
            errors: serde_json::from_str(&self.errors_json)?,
            created_record_id: self.created_record_id,
            acknowledged: self.acknowledged,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

// ==========================================
// ImportAuditRepository
// ==========================================
/// 导入审计仓储
/// 用途: 导入管道写入（*_tx,随调用方事务提交/回滚）; API 层查询与确认
pub struct ImportAuditRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ImportAuditRepository {
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

    // ==========================================
    // 写入（调用方事务内）
    // ==========================================

    /// 插入文件级尝试
    ///
    /// # 参数
    /// - row_errors: 行错误汇总（非持久模式回滚后唯一保留行错误的位置）
    pub fn insert_file_attempt_tx(
        conn: &Connection,
        attempt: &FileImportAttempt,
        row_errors: &[RowErrorSummary],
    ) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO file_import_attempt (
                file_attempt_id, source_path, profile, durable, dry_run, status, row_count,
                unmapped_headers_json, ambiguous_headers_json, file_errors_json, row_errors_json,
                acknowledged, created_at, elapsed_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                attempt.file_attempt_id,
                attempt.source_path,
                attempt.profile,
                attempt.durable,
                attempt.dry_run,
                attempt.status.as_str(),
                attempt.row_count as i64,
                serde_json::to_string(&attempt.unmapped_headers)?,
                serde_json::to_string(&attempt.ambiguous_headers)?,
                serde_json::to_string(&attempt.file_errors)?,
                serde_json::to_string(row_errors)?,
                attempt.acknowledged,
                attempt.created_at.to_rfc3339(),
                attempt.elapsed_ms,
            ],
        )?;
        Ok(())
    }

    /// 更新文件级尝试的结果字段（状态 / 行数 / 错误 / 耗时）
    pub fn update_file_attempt_tx(
        conn: &Connection,
        attempt: &FileImportAttempt,
        row_errors: &[RowErrorSummary],
    ) -> RepositoryResult<()> {
        let updated = conn.execute(
            r#"
            UPDATE file_import_attempt SET
                status = ?2, row_count = ?3, unmapped_headers_json = ?4, ambiguous_headers_json = ?5,
                file_errors_json = ?6, row_errors_json = ?7, elapsed_ms = ?8
            WHERE file_attempt_id = ?1
            "#,
            params![
                attempt.file_attempt_id,
                attempt.status.as_str(),
                attempt.row_count as i64,
                serde_json::to_string(&attempt.unmapped_headers)?,
                serde_json::to_string(&attempt.ambiguous_headers)?,
                serde_json::to_string(&attempt.file_errors)?,
                serde_json::to_string(row_errors)?,
                attempt.elapsed_ms,
            ],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound {
                entity: "file_import_attempt".to_string(),
                id: attempt.file_attempt_id.clone(),
            });
        }
        Ok(())
    }

    /// 插入行/模型级尝试
    pub fn insert_attempt_tx(conn: &Connection, attempt: &ImportAttempt) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO import_attempt (
                attempt_id, file_attempt_id, snapshot_id, row_number, form_map, record_type,
                status, errors_json, created_record_id, acknowledged, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                attempt.attempt_id,
                attempt.file_attempt_id,
                attempt.snapshot_id,
                attempt.row_number as i64,
                attempt.form_map,
                attempt.record_type.as_str(),
                attempt.status.as_str(),
                serde_json::to_string(&attempt.errors)?,
                attempt.created_record_id,
                attempt.acknowledged,
                attempt.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// 合并后把历史尝试的 created_record_id 改指幸存记录
    pub fn repoint_created_record_tx(conn: &Connection, from_record: i64, to_record: i64) -> RepositoryResult<usize> {
        let updated = conn.execute(
            "UPDATE import_attempt SET created_record_id = ?2 WHERE created_record_id = ?1",
            params![from_record, to_record],
        )?;
        Ok(updated)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_file_attempt_tx(conn: &Connection, file_attempt_id: &str) -> RepositoryResult<Option<FileImportAttempt>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM file_import_attempt WHERE file_attempt_id = ?1",
                    FILE_ATTEMPT_COLUMNS
                ),
                params![file_attempt_id],
                FileAttemptRow::from_row,
            )
            .optional()?;
        row.map(FileAttemptRow::into_domain).transpose()
    }

    pub fn list_attempts_for_file_tx(conn: &Connection, file_attempt_id: &str) -> RepositoryResult<Vec<ImportAttempt>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_attempt WHERE file_attempt_id = ?1 ORDER BY row_number, created_at, attempt_id",
            ATTEMPT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![file_attempt_id], AttemptRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(AttemptRow::into_domain).collect()
    }

    /// 查询文件级尝试
    pub fn get_file_attempt(&self, file_attempt_id: &str) -> RepositoryResult<Option<FileImportAttempt>> {
        let conn = self.get_conn()?;
        Self::get_file_attempt_tx(&conn, file_attempt_id)
    }

    /// 查询文件级尝试记录的行错误汇总
    pub fn get_row_errors(&self, file_attempt_id: &str) -> RepositoryResult<Vec<RowErrorSummary>> {
        let conn = self.get_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT row_errors_json FROM file_import_attempt WHERE file_attempt_id = ?1",
                params![file_attempt_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(RepositoryError::NotFound {
                entity: "file_import_attempt".to_string(),
                id: file_attempt_id.to_string(),
            }),
        }
    }

    /// 最近的文件级尝试（按创建时间倒序）
    pub fn list_file_attempts(&self, limit: usize) -> RepositoryResult<Vec<FileImportAttempt>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM file_import_attempt ORDER BY created_at DESC, file_attempt_id LIMIT ?1",
            FILE_ATTEMPT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], FileAttemptRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(FileAttemptRow::into_domain).collect()
    }

    /// 文件下的全部行级尝试（按行号）
    pub fn list_attempts_for_file(&self, file_attempt_id: &str) -> RepositoryResult<Vec<ImportAttempt>> {
        let conn = self.get_conn()?;
        Self::list_attempts_for_file_tx(&conn, file_attempt_id)
    }

    /// 待处理的尝试: 非 created_clean 且未确认
    pub fn list_unacknowledged(&self) -> RepositoryResult<Vec<ImportAttempt>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_attempt WHERE acknowledged = 0 AND status <> ?1 ORDER BY created_at, attempt_id",
            ATTEMPT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![ImportStatus::CreatedClean.as_str()], AttemptRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(AttemptRow::into_domain).collect()
    }

    /// 某记录的全部导入尝试
    pub fn list_attempts_for_record(&self, record_id: i64) -> RepositoryResult<Vec<ImportAttempt>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_attempt WHERE created_record_id = ?1 ORDER BY created_at, attempt_id",
            ATTEMPT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![record_id], AttemptRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(AttemptRow::into_domain).collect()
    }

    // ==========================================
    // 确认
    // ==========================================

    /// 确认行级尝试
    ///
    /// # 返回
    /// - Ok(true): 状态由未确认变为已确认
    /// - Ok(false): 原本已确认
    pub fn acknowledge_attempt(&self, attempt_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let exists: Option<bool> = conn
            .query_row(
                "SELECT acknowledged FROM import_attempt WHERE attempt_id = ?1",
                params![attempt_id],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            None => Err(RepositoryError::NotFound {
                entity: "import_attempt".to_string(),
                id: attempt_id.to_string(),
            }),
            Some(true) => Ok(false),
            Some(false) => {
                conn.execute(
                    "UPDATE import_attempt SET acknowledged = 1 WHERE attempt_id = ?1",
                    params![attempt_id],
                )?;
                Ok(true)
            }
        }
    }

    /// 确认文件级尝试及其全部行级尝试
    ///
    /// # 返回
    /// - 新确认的行级尝试数
    pub fn acknowledge_file_attempt(&self, file_attempt_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE file_import_attempt SET acknowledged = 1 WHERE file_attempt_id = ?1",
            params![file_attempt_id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound {
                entity: "file_import_attempt".to_string(),
                id: file_attempt_id.to_string(),
            });
        }
        let rows = tx.execute(
            "UPDATE import_attempt SET acknowledged = 1 WHERE file_attempt_id = ?1 AND acknowledged = 0",
            params![file_attempt_id],
        )?;
        tx.commit()?;
        Ok(rows)
    }
}
