// ==========================================
// 批量导入测试
// ==========================================
// 测试目标: 多文件并发导入,单文件失败互不影响,确认流程
// ==========================================

mod test_helpers;

use nrqz_reconcile::api::ImportApi;
use nrqz_reconcile::domain::ImportStatus;
use nrqz_reconcile::importer::ImportOptions;
use nrqz_reconcile::logging;
use std::time::Instant;
use test_helpers::{count_records, create_test_db, open_shared, schema, write_csv};

#[tokio::test]
async fn test_batch_import_multiple_files() {
    logging::init_test();
    let (_db, db_path) = create_test_db().expect("Failed to create test db");
    let dir = tempfile::tempdir().unwrap();

    let mut paths = Vec::new();
    for file_no in 0..3 {
        let rows: Vec<Vec<String>> = (0..20)
            .map(|i| vec![(file_no * 100 + i + 1).to_string(), format!("batch file {}", file_no)])
            .collect();
        let rows: Vec<Vec<&str>> = rows.iter().map(|r| r.iter().map(String::as_str).collect()).collect();
        paths.push(write_csv(dir.path(), &format!("cases_{}.csv", file_no), &["NRQZ_NO", "COMMENTS"], &rows));
    }
    paths.insert(1, dir.path().join("missing.csv"));

    let api = ImportApi::new(db_path.clone(), schema());
    let start = Instant::now();
    let items = api.batch_import(paths, ImportOptions::default()).await;
    tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "批量导入耗时");

    assert_eq!(items.len(), 4);
    assert!(items[1].report.is_none());
    assert!(items[1].error.as_deref().unwrap().contains("missing.csv"));
    for idx in [0, 2, 3] {
        let report = items[idx].report.as_ref().expect("report");
        assert_eq!(report.status(), ImportStatus::CreatedClean);
        assert_eq!(report.summary.created_clean, 20);
    }

    let conn = open_shared(&db_path);
    assert_eq!(count_records(&conn, "CASE"), 60);
    assert_eq!(api.list_file_attempts(10).unwrap().len(), 3);
}

#[tokio::test]
async fn test_acknowledge_file_attempt_clears_pending_rows() {
    let (_db, db_path) = create_test_db().expect("Failed to create test db");
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(
        dir.path(),
        "dirty.csv",
        &["NRQZ_NO", "DATE_RECEIVED"],
        &[vec!["1", "someday"], vec!["2", "never"], vec!["3", "2001-02-03"]],
    );

    let api = ImportApi::new(db_path, schema());
    let items = api.batch_import(vec![path], ImportOptions::default()).await;
    let report = items[0].report.as_ref().expect("report");
    assert_eq!(report.status(), ImportStatus::CreatedDirty);
    assert_eq!(api.list_unacknowledged().unwrap().len(), 2);

    let detail = api.file_attempt_detail(&report.file_attempt.file_attempt_id).unwrap();
    assert_eq!(detail.row_attempts.len(), 3);
    assert_eq!(detail.row_errors.len(), 2);

    let acknowledged = api.acknowledge(&report.file_attempt.file_attempt_id).unwrap();
    assert_eq!(acknowledged, 3);
    assert!(api.list_unacknowledged().unwrap().is_empty());
    assert!(api.acknowledge("no-such-attempt").is_err());
}

#[tokio::test]
async fn test_batch_import_large_files_share_one_database() {
    let (_db, db_path) = create_test_db().expect("Failed to create test db");
    let dir = tempfile::tempdir().unwrap();

    let files = 8;
    let rows_per_file = 250;
    let paths: Vec<_> = (0..files)
        .map(|file_no| {
            let rows: Vec<Vec<String>> = (0..rows_per_file)
                .map(|i| vec![(file_no * 1000 + i + 1).to_string(), format!("see NRQZ#{}", file_no * 1000 + 1)])
                .collect();
            let rows: Vec<Vec<&str>> = rows.iter().map(|r| r.iter().map(String::as_str).collect()).collect();
            write_csv(dir.path(), &format!("large_{}.csv", file_no), &["NRQZ_NO", "COMMENTS"], &rows)
        })
        .collect();

    let api = ImportApi::new(db_path.clone(), schema());
    for durable in [false, true] {
        let items = api.batch_import(paths.clone(), ImportOptions::default().durable(durable)).await;
        for item in &items {
            assert!(item.error.is_none(), "{}: {:?}", item.path, item.error);
            assert_eq!(item.report.as_ref().unwrap().summary.attempts, rows_per_file as usize);
        }
    }

    let conn = open_shared(&db_path);
    assert_eq!(count_records(&conn, "CASE"), (files * rows_per_file) as i64);
    assert_eq!(api.list_file_attempts(100).unwrap().len(), (files * 2) as usize);
}
