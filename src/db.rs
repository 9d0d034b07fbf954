// ==========================================
// NRQZ 记录管理系统 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键 / busy_timeout）
// - 集中维护 schema（init_schema 幂等,可重复执行）
// - 提供 SAVEPOINT 辅助（模型级尝试的局部回滚）
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开连接并确保 schema 存在
pub fn open_and_init(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 建表（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 在 SAVEPOINT 中执行; 闭包返回 Err 时回滚到保存点
///
/// # 参数
/// - `name`: 保存点名称（仅字母数字下划线）
pub fn with_savepoint<T, E, F>(conn: &Connection, name: &str, f: F) -> Result<T, E>
where
    F: FnOnce(&Connection) -> Result<T, E>,
    E: From<rusqlite::Error>,
{
    conn.execute_batch(&format!("SAVEPOINT {}", name))?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {}", name))?;
            Ok(value)
        }
        Err(err) => {
            conn.execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", name))?;
            Err(err)
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL
);

-- 配置（scope_id = 'global'）
CREATE TABLE IF NOT EXISTS config_scope (
    scope_id    TEXT PRIMARY KEY,
    scope_type  TEXT NOT NULL,
    scope_key   TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);
INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key) VALUES ('global', 'GLOBAL', 'global');

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id    TEXT NOT NULL REFERENCES config_scope(scope_id),
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

-- 领域记录（字段以 JSON 存储; 自然键唯一）
CREATE TABLE IF NOT EXISTS record (
    record_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    record_type  TEXT NOT NULL,
    natural_key  TEXT,
    fields_json  TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    UNIQUE (record_type, natural_key)
);
CREATE INDEX IF NOT EXISTS idx_record_type ON record(record_type);

-- 类型化关系（from 持有指向 to 的链接）
CREATE TABLE IF NOT EXISTS relation_link (
    link_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    relation    TEXT NOT NULL,
    from_id     INTEGER NOT NULL REFERENCES record(record_id) ON DELETE CASCADE,
    to_id       INTEGER NOT NULL REFERENCES record(record_id),
    created_at  TEXT NOT NULL,
    UNIQUE (relation, from_id, to_id)
);
CREATE INDEX IF NOT EXISTS idx_relation_link_to ON relation_link(relation, to_id);

-- 通用（多态）引用
CREATE TABLE IF NOT EXISTS generic_ref (
    ref_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id     INTEGER NOT NULL REFERENCES record(record_id) ON DELETE CASCADE,
    role         TEXT NOT NULL,
    target_id    INTEGER NOT NULL REFERENCES record(record_id),
    cardinality  TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE (owner_id, role, target_id)
);
CREATE INDEX IF NOT EXISTS idx_generic_ref_target ON generic_ref(target_id);

-- 文件级导入尝试
CREATE TABLE IF NOT EXISTS file_import_attempt (
    file_attempt_id        TEXT PRIMARY KEY,
    source_path            TEXT NOT NULL,
    profile                TEXT NOT NULL,
    durable                INTEGER NOT NULL,
    dry_run                INTEGER NOT NULL,
    status                 TEXT NOT NULL,
    row_count              INTEGER NOT NULL DEFAULT 0,
    unmapped_headers_json  TEXT NOT NULL DEFAULT '[]',
    ambiguous_headers_json TEXT NOT NULL DEFAULT '[]',
    file_errors_json       TEXT NOT NULL DEFAULT '[]',
    row_errors_json        TEXT NOT NULL DEFAULT '[]',
    acknowledged           INTEGER NOT NULL DEFAULT 0,
    created_at             TEXT NOT NULL,
    elapsed_ms             INTEGER NOT NULL DEFAULT 0
);

-- 原始行快照（创建后不可变）
CREATE TABLE IF NOT EXISTS row_snapshot (
    snapshot_id      TEXT PRIMARY KEY,
    file_attempt_id  TEXT REFERENCES file_import_attempt(file_attempt_id),
    row_number       INTEGER NOT NULL,
    data_json        TEXT NOT NULL,
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_row_snapshot_file ON row_snapshot(file_attempt_id);

-- 快照 ↔ 记录
CREATE TABLE IF NOT EXISTS record_snapshot (
    record_id    INTEGER NOT NULL REFERENCES record(record_id) ON DELETE CASCADE,
    snapshot_id  TEXT NOT NULL REFERENCES row_snapshot(snapshot_id),
    PRIMARY KEY (record_id, snapshot_id)
);

-- 行/模型级导入尝试（created_record_id 为历史指针,不设外键）
CREATE TABLE IF NOT EXISTS import_attempt (
    attempt_id         TEXT PRIMARY KEY,
    file_attempt_id    TEXT REFERENCES file_import_attempt(file_attempt_id),
    snapshot_id        TEXT NOT NULL REFERENCES row_snapshot(snapshot_id),
    row_number         INTEGER NOT NULL,
    form_map           TEXT NOT NULL,
    record_type        TEXT NOT NULL,
    status             TEXT NOT NULL,
    errors_json        TEXT NOT NULL DEFAULT '[]',
    created_record_id  INTEGER,
    acknowledged       INTEGER NOT NULL DEFAULT 0,
    created_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_import_attempt_file ON import_attempt(file_attempt_id);
CREATE INDEX IF NOT EXISTS idx_import_attempt_status ON import_attempt(status);

-- 引用分组
CREATE TABLE IF NOT EXISTS reference_group (
    group_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_member (
    record_id  INTEGER PRIMARY KEY REFERENCES record(record_id) ON DELETE CASCADE,
    group_id   INTEGER NOT NULL REFERENCES reference_group(group_id) ON DELETE CASCADE,
    added_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_group_member_group ON group_member(group_id);

-- 合并操作审计
CREATE TABLE IF NOT EXISTS merge_operation (
    merge_id             TEXT PRIMARY KEY,
    record_type          TEXT NOT NULL,
    primary_id           INTEGER NOT NULL,
    consumed_ids_json    TEXT NOT NULL,
    field_diffs_json     TEXT NOT NULL,
    relation_diffs_json  TEXT NOT NULL,
    created_at           TEXT NOT NULL
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_savepoint_rolls_back_on_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();

        let result: Result<(), rusqlite::Error> = with_savepoint(&conn, "sp_test", |c| {
            c.execute("INSERT INTO t VALUES (1)", [])?;
            Err(rusqlite::Error::InvalidQuery)
        });
        assert!(result.is_err());

        with_savepoint::<_, rusqlite::Error, _>(&conn, "sp_test", |c| {
            c.execute("INSERT INTO t VALUES (2)", []).map(|_| ())
        })
        .unwrap();

        let values: Vec<i64> = conn
            .prepare("SELECT v FROM t")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(values, vec![2]);
    }
}
