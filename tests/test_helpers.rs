// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、测试数据文件生成等功能
// ==========================================

#![allow(dead_code)]

use nrqz_reconcile::config::ConfigManager;
use nrqz_reconcile::db::open_and_init;
use nrqz_reconcile::domain::{DraftRecord, SchemaRegistry};
use nrqz_reconcile::importer::FileImporter;
use nrqz_reconcile::repository::{RecordStore, SqliteRecordStore};
use rusqlite::Connection;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_string_lossy().to_string();
    open_and_init(&db_path)?;
    Ok((temp_file, db_path))
}

/// 打开共享连接（已建表）
pub fn open_shared(db_path: &str) -> Arc<Mutex<Connection>> {
    Arc::new(Mutex::new(open_and_init(db_path).expect("Failed to open db")))
}

pub fn schema() -> Arc<SchemaRegistry> {
    Arc::new(SchemaRegistry::nrqz())
}

/// 以数据库配置构建导入器
pub fn create_importer(conn: Arc<Mutex<Connection>>) -> FileImporter<ConfigManager> {
    let config = ConfigManager::from_connection(conn.clone()).expect("Failed to create config");
    FileImporter::new(conn, schema(), config)
}

/// 在目录中写入 CSV 文件
///
/// # 参数
/// - headers: 表头
/// - rows: 每行单元格（与表头等长）
pub fn write_csv(dir: &Path, name: &str, headers: &[&str], rows: &[Vec<&str>]) -> PathBuf {
    let path = dir.join(name);
    let mut writer = csv::Writer::from_path(&path).expect("Failed to create csv");
    writer.write_record(headers).expect("Failed to write header");
    for row in rows {
        writer.write_record(row).expect("Failed to write row");
    }
    writer.flush().expect("Failed to flush csv");
    path
}

/// 直接保存一条记录,返回 record_id
pub fn save_record(conn: &Arc<Mutex<Connection>>, draft: DraftRecord) -> i64 {
    let store = SqliteRecordStore::new(schema());
    let guard = conn.lock().unwrap();
    let outcome = store.validate_and_save(&guard, &draft).expect("save failed");
    outcome.record.expect("draft rejected").record_id
}

/// 某类型记录数量
pub fn count_records(conn: &Arc<Mutex<Connection>>, record_type: &str) -> i64 {
    let guard = conn.lock().unwrap();
    guard
        .query_row(
            "SELECT COUNT(*) FROM record WHERE record_type = ?1",
            [record_type],
            |row| row.get(0),
        )
        .unwrap()
}

/// 某张表的行数
pub fn count_rows(conn: &Arc<Mutex<Connection>>, table: &str) -> i64 {
    let guard = conn.lock().unwrap();
    guard
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}
