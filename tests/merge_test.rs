// ==========================================
// 去重合并集成测试
// ==========================================
// 测试目标: 导入 → 查重 → 合并,关系 / 分组 / 快照 / 审计随合并迁移
// ==========================================

mod test_helpers;

use nrqz_reconcile::api::{ApiError, ReconcileApi};
use nrqz_reconcile::config::ConfigManager;
use nrqz_reconcile::domain::{ConflictResolution, DraftRecord, RecordType};
use nrqz_reconcile::importer::ImportOptions;
use nrqz_reconcile::repository::{
    GroupRepository, ImportAuditRepository, RecordStore, SnapshotRepository, SqliteRecordStore,
};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use test_helpers::{count_records, create_importer, create_test_db, open_shared, save_record, schema, write_csv};

fn reconcile_api(conn: &Arc<Mutex<Connection>>) -> ReconcileApi {
    let config = ConfigManager::from_connection(conn.clone()).unwrap();
    ReconcileApi::new(conn.clone(), schema(), Arc::new(config))
}

fn store() -> SqliteRecordStore {
    SqliteRecordStore::new(schema())
}

#[test]
fn test_import_then_merge_applicants() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let conn = open_shared(&db_path);

    let path = write_csv(
        dir.path(),
        "applicants.csv",
        &["NRQZ_NO", "APPLICANT", "APPLICANT_EMAIL"],
        &[
            vec!["1", "John Smith", "js@example.com"],
            vec!["2", "John Smith", "js@example.com"],
            vec!["3", "John Smith", "js@example.com"],
            vec!["4", "John Smith", ""],
            vec!["5", "John Smith", ""],
        ],
    );
    create_importer(conn.clone())
        .import_file(&path, &ImportOptions::default())
        .unwrap();
    assert_eq!(count_records(&conn, "PERSON"), 2);

    let api = reconcile_api(&conn);
    let clusters = api.find_duplicates(RecordType::Person, None).unwrap();
    assert_eq!(clusters.len(), 1);
    let (primary, alias) = (clusters[0].record_ids[0], clusters[0].record_ids[1]);

    let store = store();
    let case_ids: Vec<i64> = {
        let c = conn.lock().unwrap();
        assert_eq!(store.linking(&c, "case.applicant", primary).unwrap().len(), 3);
        assert_eq!(store.linking(&c, "case.applicant", alias).unwrap().len(), 2);
        store.list_by_type(&c, RecordType::Case).unwrap().iter().map(|r| r.record_id).collect()
    };

    let result = api.merge(primary, &[alias], None).unwrap();
    assert_eq!(result.consumed_ids, vec![alias]);
    let name = result.field_diffs.iter().find(|d| d.field == "name").unwrap();
    assert_eq!(name.to_string(), "name: {\"John Smith\"} -> \"John Smith\"");

    {
        let c = conn.lock().unwrap();
        assert!(store.get(&c, alias).unwrap().is_none());
        let mut linked = store.linking(&c, "case.applicant", primary).unwrap();
        linked.sort_unstable();
        assert_eq!(linked, case_ids);
        let merged = store.get(&c, primary).unwrap().unwrap();
        assert_eq!(merged.text("email"), Some("js@example.com"));
    }

    // 别名的快照与导入尝试归到 primary
    let snapshots = SnapshotRepository::from_connection(conn.clone());
    assert_eq!(snapshots.snapshots_for_record(primary).unwrap().len(), 5);
    assert!(snapshots.snapshots_for_record(alias).unwrap().is_empty());
    let audit = ImportAuditRepository::from_connection(conn.clone());
    assert_eq!(audit.list_attempts_for_record(primary).unwrap().len(), 5);
    assert!(audit.list_attempts_for_record(alias).unwrap().is_empty());

    let history = api.merge_history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].merge_id, result.merge_id);
}

fn grouped_cases(conn: &Arc<Mutex<Connection>>) -> [i64; 4] {
    let case = |num: i64, comments: Option<&str>| {
        let mut draft = DraftRecord::new(RecordType::Case).with_field("case_num", num);
        if let Some(text) = comments {
            draft = draft.with_field("comments", text);
        }
        save_record(conn, draft)
    };
    [
        case(1, Some("NRQZ#2")),
        case(2, None),
        case(3, Some("NRQZ#4")),
        case(4, None),
    ]
}

#[test]
fn test_merge_moves_group_membership() {
    let (_db, db_path) = create_test_db().unwrap();
    let conn = open_shared(&db_path);
    let [c1, c2, c3, c4] = grouped_cases(&conn);

    let api = reconcile_api(&conn);
    api.rebuild_groups().unwrap();
    let groups = GroupRepository::from_connection(conn.clone());
    let g1 = groups.group_for_record(c1).unwrap().unwrap().group_id;
    let g2 = groups.group_for_record(c3).unwrap().unwrap().group_id;
    assert_ne!(g1, g2);

    api.merge(c1, &[c3], Some(ConflictResolution::PreferPrimary)).unwrap();

    let merged = groups.group_for_record(c4).unwrap().unwrap();
    assert_eq!(merged.group_id, g1.min(g2));
    let mut expected = vec![c1, c2, c4];
    expected.sort_unstable();
    assert_eq!(merged.member_ids, expected);
    assert_eq!(api.list_groups().unwrap().len(), 1);
}

#[test]
fn test_escalated_conflict_changes_nothing() {
    let (_db, db_path) = create_test_db().unwrap();
    let conn = open_shared(&db_path);
    let [c1, c2, c3, _] = grouped_cases(&conn);
    let api = reconcile_api(&conn);
    api.rebuild_groups().unwrap();
    let before = api.list_groups().unwrap();

    let err = api.merge(c1, &[c3], Some(ConflictResolution::Escalate)).unwrap_err();
    match err {
        ApiError::MergeConflict { subject, detail } => {
            assert_eq!(subject, "fields");
            assert!(detail.contains("comments"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let c = conn.lock().unwrap();
    assert!(store().get(&c, c3).unwrap().is_some());
    assert!(store().get(&c, c2).unwrap().is_some());
    drop(c);
    assert_eq!(api.list_groups().unwrap(), before);
    assert!(api.merge_history(10).unwrap().is_empty());
}

#[test]
fn test_preview_reports_diff_without_writing() {
    let (_db, db_path) = create_test_db().unwrap();
    let conn = open_shared(&db_path);
    let [c1, _, c3, _] = grouped_cases(&conn);
    let api = reconcile_api(&conn);

    let preview = api
        .preview_merge(c1, &[c3], Some(ConflictResolution::PreferLongest))
        .unwrap();
    let comments = preview.field_diffs.iter().find(|d| d.field == "comments").unwrap();
    assert_eq!(comments.candidates.len(), 2);
    assert_eq!(count_records(&conn, "CASE"), 4);
    assert!(api.merge_history(10).unwrap().is_empty());
}

#[test]
fn test_duplicate_threshold_is_validated() {
    let (_db, db_path) = create_test_db().unwrap();
    let conn = open_shared(&db_path);
    let api = reconcile_api(&conn);
    assert!(matches!(
        api.find_duplicates(RecordType::Person, Some(1.5)),
        Err(ApiError::InvalidInput(_))
    ));
    assert!(api.find_duplicates(RecordType::Case, Some(0.9)).is_err());
}
