// ==========================================
// 导入管道集成测试
// ==========================================
// 测试目标: 文件 → 快照 → 模型级尝试 → 审计,以及持久 / 非持久 / 演练模式
// ==========================================

mod test_helpers;

use nrqz_reconcile::config::{config_keys, ConfigManager};
use nrqz_reconcile::domain::{
    FieldValue, FileErrorKind, ImportStatus, RecordRef, RecordType, StoredRecord,
};
use nrqz_reconcile::engine::ReferencePatterns;
use nrqz_reconcile::importer::{ImportError, ImportOptions};
use nrqz_reconcile::logging;
use nrqz_reconcile::repository::{ImportAuditRepository, RecordStore, SnapshotRepository, SqliteRecordStore};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use test_helpers::{count_records, count_rows, create_importer, create_test_db, open_shared, schema, write_csv};

fn cases(conn: &Arc<Mutex<Connection>>) -> Vec<StoredRecord> {
    let store = SqliteRecordStore::new(schema());
    let guard = conn.lock().unwrap();
    store.list_by_type(&guard, RecordType::Case).unwrap()
}

fn case_nums(conn: &Arc<Mutex<Connection>>) -> BTreeSet<i64> {
    cases(conn).iter().filter_map(|c| c.case_num()).collect()
}

#[test]
fn test_case_row_with_reference_comment() {
    logging::init_test();
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let conn = open_shared(&db_path);

    let path = write_csv(dir.path(), "cases.csv", &["NRQZ_NO", "COMMENTS"], &[vec!["1234", "see NRQZ#5678"]]);
    let report = create_importer(conn.clone())
        .import_file(&path, &ImportOptions::default())
        .unwrap();

    assert_eq!(report.status(), ImportStatus::CreatedClean);
    let stored = cases(&conn);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].case_num(), Some(1234));

    let patterns = ReferencePatterns::nrqz().unwrap();
    let comments = stored[0].text("comments").unwrap();
    assert_eq!(patterns.extract(comments), BTreeSet::from([RecordRef::case(5678)]));

    // 5678 尚不存在 → 派生引用为空; 导入后出现
    let known: BTreeSet<RecordRef> = BTreeSet::from([RecordRef::case(1234)]);
    assert!(patterns.derive_references(comments, &known).is_empty());

    let path = write_csv(dir.path(), "more.csv", &["NRQZ_NO"], &[vec!["5678"]]);
    create_importer(conn.clone()).import_file(&path, &ImportOptions::default()).unwrap();
    let known: BTreeSet<RecordRef> = case_nums(&conn).into_iter().map(RecordRef::case).collect();
    assert_eq!(
        patterns.derive_references(comments, &known),
        BTreeSet::from([RecordRef::case(5678)])
    );
}

#[test]
fn test_unmapped_header_ratio_rejects_file() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let conn = open_shared(&db_path);

    let headers = ["NRQZ_NO", "COMMENTS", "X1", "X2", "X3", "X4", "X5", "X6", "X7", "X8"];
    let rows = vec![
        vec!["100", "ok", "", "", "", "", "", "", "", ""],
        vec!["101", "ok", "", "", "", "", "", "", "", ""],
    ];
    let path = write_csv(dir.path(), "wide.csv", &headers, &rows);

    let report = create_importer(conn.clone())
        .import_file(&path, &ImportOptions::default())
        .unwrap();
    assert_eq!(report.status(), ImportStatus::Rejected);
    assert_eq!(report.unmapped_headers().len(), 8);
    assert_eq!(report.file_attempt.file_errors[0].kind, FileErrorKind::UnmappedHeaderRatio);
    assert_eq!(count_records(&conn, "CASE"), 0);

    let audit = ImportAuditRepository::from_connection(conn.clone());
    let persisted = audit.get_file_attempt(&report.file_attempt.file_attempt_id).unwrap().unwrap();
    assert_eq!(persisted.status, ImportStatus::Rejected);

    // 放宽阈值后同一文件可以导入
    ConfigManager::from_connection(conn.clone())
        .unwrap()
        .set_config_value(config_keys::UNMAPPED_HEADER_THRESHOLD, "0.9")
        .unwrap();
    let report = create_importer(conn.clone())
        .import_file(&path, &ImportOptions::default())
        .unwrap();
    assert_eq!(report.status(), ImportStatus::CreatedClean);
    assert_eq!(case_nums(&conn), BTreeSet::from([100, 101]));
}

#[test]
fn test_reimport_is_idempotent_on_records() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let conn = open_shared(&db_path);
    let path = write_csv(
        dir.path(),
        "cases.csv",
        &["NRQZ_NO", "Project Name"],
        &[vec!["1", "Tower A"], vec!["2", "Tower B"]],
    );

    for _ in 0..2 {
        let report = create_importer(conn.clone())
            .import_file(&path, &ImportOptions::default())
            .unwrap();
        assert_eq!(report.status(), ImportStatus::CreatedClean);
    }

    assert_eq!(count_records(&conn, "CASE"), 2);
    assert_eq!(count_rows(&conn, "file_import_attempt"), 2);
    assert_eq!(count_rows(&conn, "import_attempt"), 4);

    let snapshots = SnapshotRepository::from_connection(conn.clone());
    for case in cases(&conn) {
        assert_eq!(snapshots.snapshots_for_record(case.record_id).unwrap().len(), 2);
    }
}

#[test]
fn test_blank_cell_on_reimport_keeps_stored_value() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let conn = open_shared(&db_path);

    let full = write_csv(dir.path(), "full.csv", &["NRQZ_NO", "COMMENTS"], &[vec!["1", "see NRQZ#5"]]);
    create_importer(conn.clone()).import_file(&full, &ImportOptions::default()).unwrap();

    let sparse = write_csv(dir.path(), "sparse.csv", &["NRQZ_NO", "COMMENTS"], &[vec!["1", ""]]);
    let report = create_importer(conn.clone())
        .import_file(&sparse, &ImportOptions::default())
        .unwrap();
    assert_ne!(report.status(), ImportStatus::Rejected);

    let stored = cases(&conn);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].text("comments"), Some("see NRQZ#5"));
}

fn mixed_file(dir: &std::path::Path) -> std::path::PathBuf {
    write_csv(
        dir,
        "mixed.csv",
        &["NRQZ_NO", "COMMENTS"],
        &[vec!["10", "good"], vec!["not-a-case", "bad"], vec!["11", "good"]],
    )
}

#[test]
fn test_non_durable_rejection_rolls_back_records() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let conn = open_shared(&db_path);

    let report = create_importer(conn.clone())
        .import_file(mixed_file(dir.path()), &ImportOptions::default().durable(false))
        .unwrap();

    assert_eq!(report.status(), ImportStatus::Rejected);
    assert!(report
        .file_attempt
        .file_errors
        .iter()
        .any(|e| e.kind == FileErrorKind::RowRejected && e.row_number == Some(2)));
    assert_eq!(count_records(&conn, "CASE"), 0);
    assert_eq!(count_rows(&conn, "import_attempt"), 0);

    // 文件级尝试与行错误保留
    let audit = ImportAuditRepository::from_connection(conn.clone());
    let row_errors = audit.get_row_errors(&report.file_attempt.file_attempt_id).unwrap();
    assert!(row_errors.iter().any(|r| r.row_number == 2 && r.errors.contains_key("case_num")));
}

#[test]
fn test_durable_keeps_good_rows() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let conn = open_shared(&db_path);

    let report = create_importer(conn.clone())
        .import_file(mixed_file(dir.path()), &ImportOptions::default().durable(true))
        .unwrap();

    assert_eq!(report.status(), ImportStatus::Rejected);
    assert_eq!(report.summary.created_clean, 2);
    assert_eq!(report.summary.rejected, 1);
    assert_eq!(case_nums(&conn), BTreeSet::from([10, 11]));
    // 被拒绝的行也留下快照与尝试
    assert_eq!(count_rows(&conn, "row_snapshot"), 3);
    assert_eq!(count_rows(&conn, "import_attempt"), 3);
}

#[test]
fn test_default_durable_comes_from_config() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let conn = open_shared(&db_path);
    ConfigManager::from_connection(conn.clone())
        .unwrap()
        .set_config_value(config_keys::DEFAULT_DURABLE, "true")
        .unwrap();

    let report = create_importer(conn.clone())
        .import_file(mixed_file(dir.path()), &ImportOptions::default())
        .unwrap();
    assert!(report.file_attempt.durable);
    assert_eq!(count_records(&conn, "CASE"), 2);
}

#[test]
fn test_dry_run_writes_nothing() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let conn = open_shared(&db_path);
    let path = write_csv(dir.path(), "cases.csv", &["NRQZ_NO"], &[vec!["7"], vec!["8"]]);

    let report = create_importer(conn.clone())
        .import_file(&path, &ImportOptions::default().durable(true).dry_run(true))
        .unwrap();

    assert_eq!(report.status(), ImportStatus::CreatedClean);
    assert_eq!(report.summary.created_clean, 2);
    for table in ["record", "row_snapshot", "import_attempt", "file_import_attempt"] {
        assert_eq!(count_rows(&conn, table), 0, "{table} should be empty");
    }
}

#[test]
fn test_limit_samples_reproducibly() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let conn = open_shared(&db_path);
    let rows: Vec<Vec<String>> = (1..=10).map(|n| vec![n.to_string()]).collect();
    let rows: Vec<Vec<&str>> = rows.iter().map(|r| r.iter().map(String::as_str).collect()).collect();
    let path = write_csv(dir.path(), "ten.csv", &["NRQZ_NO"], &rows);

    let sampled_rows = |seed| {
        let report = create_importer(conn.clone())
            .import_file(&path, &ImportOptions::default().dry_run(true).limit(0.25, Some(seed)))
            .unwrap();
        assert_eq!(report.summary.total_rows, 10);
        assert_eq!(report.summary.sampled_rows, 3);
        report.row_attempts.iter().map(|a| a.row_number).collect::<Vec<_>>()
    };

    let first = sampled_rows(7);
    assert_eq!(first, sampled_rows(7));
    assert!(first.windows(2).all(|w| w[0] < w[1]));

    let err = create_importer(conn.clone())
        .import_file(&path, &ImportOptions::default().limit(0.0, None))
        .unwrap_err();
    assert!(matches!(err, ImportError::InvalidLimit(_)));
}

#[test]
fn test_composite_map_declared_first_wins_regardless_of_header_order() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let conn = open_shared(&db_path);

    let a = write_csv(dir.path(), "a.csv", &["NRQZ_NO", "FREQ_LOW", "BW"], &[vec!["1", "100", "10"]]);
    let b = write_csv(dir.path(), "b.csv", &["BW", "FREQ_LOW", "NRQZ_NO"], &[vec!["20", "200", "2"]]);
    for path in [&a, &b] {
        create_importer(conn.clone()).import_file(path, &ImportOptions::default()).unwrap();
    }

    let stored = cases(&conn);
    let by_num = |n: i64| stored.iter().find(|c| c.case_num() == Some(n)).unwrap();
    assert_eq!(by_num(1).get("freq_high"), Some(&FieldValue::Float(110.0)));
    assert_eq!(by_num(2).get("freq_high"), Some(&FieldValue::Float(220.0)));
}

#[test]
fn test_dirty_rows_await_acknowledgement() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let conn = open_shared(&db_path);
    let path = write_csv(dir.path(), "dirty.csv", &["NRQZ_NO", "FREQ_HIGH"], &[vec!["3", "lots"]]);

    let report = create_importer(conn.clone())
        .import_file(&path, &ImportOptions::default())
        .unwrap();
    assert_eq!(report.status(), ImportStatus::CreatedDirty);
    assert_eq!(report.errors_by_row()[&1]["freq_high"].len(), 1);

    let audit = ImportAuditRepository::from_connection(conn.clone());
    let pending = audit.list_unacknowledged().unwrap();
    assert_eq!(pending.len(), 1);
    assert!(audit.acknowledge_attempt(&pending[0].attempt_id).unwrap());
    assert!(audit.list_unacknowledged().unwrap().is_empty());
}
