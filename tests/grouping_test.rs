// ==========================================
// 交叉引用分组集成测试
// ==========================================
// 测试目标: build_groups 纯函数 + GroupingEngine 持久化重建
// ==========================================

mod test_helpers;

use nrqz_reconcile::domain::{DraftRecord, RecordRef, RecordType, ReferenceSource};
use nrqz_reconcile::engine::grouping::components;
use nrqz_reconcile::engine::{build_groups, GroupingEngine, ReferencePatterns};
use nrqz_reconcile::repository::GroupRepository;
use proptest::prelude::*;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use test_helpers::{create_test_db, open_shared, save_record, schema};

fn case(conn: &Arc<Mutex<Connection>>, num: i64, comments: Option<&str>) -> i64 {
    let mut draft = DraftRecord::new(RecordType::Case).with_field("case_num", num);
    if let Some(text) = comments {
        draft = draft.with_field("comments", text);
    }
    save_record(conn, draft)
}

fn engine(conn: &Arc<Mutex<Connection>>) -> GroupingEngine {
    GroupingEngine::new(conn.clone(), schema(), ReferencePatterns::nrqz().unwrap())
}

#[test]
fn test_dangling_reference_is_ignored() {
    let patterns = ReferencePatterns::nrqz().unwrap();
    let records = vec![
        ReferenceSource::new(RecordRef::case(1234), Some("NRQZ#5678")),
        ReferenceSource::new(RecordRef::case(5678), None),
        ReferenceSource::new(RecordRef::case(9999), Some("NRQZ#25")),
    ];

    let groups = build_groups(&records, &patterns);
    assert_eq!(groups.len(), 3);
    assert_eq!(groups[&RecordRef::case(1234)], groups[&RecordRef::case(5678)]);
    assert_ne!(groups[&RecordRef::case(9999)], groups[&RecordRef::case(1234)]);
    assert!(!groups.contains_key(&RecordRef::case(25)));
}

#[test]
fn test_persisted_groups_skip_singletons() {
    let (_db, db_path) = create_test_db().unwrap();
    let conn = open_shared(&db_path);
    let a = case(&conn, 1234, Some("NRQZ#5678"));
    let b = case(&conn, 5678, None);
    let lonely = case(&conn, 9999, Some("NRQZ#25"));

    let report = engine(&conn).rebuild().unwrap();
    assert_eq!(report.records_scanned, 3);
    assert_eq!(report.references_found, 1);
    assert_eq!(report.groups_created, 1);
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].member_ids, vec![a.min(b), a.max(b)]);

    let repo = GroupRepository::from_connection(conn.clone());
    assert!(repo.group_for_record(lonely).unwrap().is_none());
}

#[test]
fn test_bridging_record_merges_only_bridged_groups() {
    let (_db, db_path) = create_test_db().unwrap();
    let conn = open_shared(&db_path);
    let a1 = case(&conn, 1, Some("NRQZ#2"));
    let a2 = case(&conn, 2, None);
    let b1 = case(&conn, 3, Some("NRQZ#4"));
    let b2 = case(&conn, 4, None);
    let c1 = case(&conn, 5, Some("NRQZ#6"));
    let c2 = case(&conn, 6, None);

    let first = engine(&conn).rebuild().unwrap();
    assert_eq!(first.groups_created, 3);

    let repo = GroupRepository::from_connection(conn.clone());
    let group_a = repo.group_for_record(a1).unwrap().unwrap().group_id;
    let group_b = repo.group_for_record(b1).unwrap().unwrap();
    let group_c = repo.group_for_record(c1).unwrap().unwrap().group_id;

    let d = case(&conn, 7, Some("relates to NRQZ#1 and NRQZ#5"));
    let second = engine(&conn).rebuild().unwrap();
    assert_eq!(second.groups_created, 0);
    assert_eq!(second.groups_merged, 1);
    assert_eq!(second.groups.len(), 2);

    let merged = repo.group_for_record(d).unwrap().unwrap();
    assert_eq!(merged.group_id, group_a.min(group_c));
    let mut expected = vec![a1, a2, c1, c2, d];
    expected.sort_unstable();
    assert_eq!(merged.member_ids, expected);

    // 未被桥接的分组原样保留
    let untouched = repo.group_for_record(b2).unwrap().unwrap();
    assert_eq!(untouched.group_id, group_b.group_id);
    assert_eq!(untouched.member_ids, group_b.member_ids);
}

#[test]
fn test_rebuild_is_idempotent() {
    let (_db, db_path) = create_test_db().unwrap();
    let conn = open_shared(&db_path);
    case(&conn, 10, Some("see NRQZ#11"));
    case(&conn, 11, Some("see NRQZ#12"));
    case(&conn, 12, None);

    let first = engine(&conn).rebuild().unwrap();
    let second = engine(&conn).rebuild().unwrap();

    assert_eq!(second.groups_created, 0);
    assert_eq!(second.groups_merged, 0);
    assert_eq!(second.members_added, 0);
    assert_eq!(
        first.groups.iter().map(|g| &g.member_ids).collect::<Vec<_>>(),
        second.groups.iter().map(|g| &g.member_ids).collect::<Vec<_>>()
    );
}

#[test]
fn test_prelim_and_case_share_group() {
    let (_db, db_path) = create_test_db().unwrap();
    let conn = open_shared(&db_path);
    let prelim = save_record(
        &conn,
        DraftRecord::new(RecordType::PreliminaryCase).with_field("case_num", 45_i64),
    );
    let converted = case(&conn, 900, Some("converted from NRQZ#P45"));

    let report = engine(&conn).rebuild().unwrap();
    assert_eq!(report.groups.len(), 1);
    let mut expected = vec![prelim, converted];
    expected.sort_unstable();
    assert_eq!(report.groups[0].member_ids, expected);
}

fn sources_strategy() -> impl Strategy<Value = Vec<(i64, Vec<i64>)>> {
    prop::collection::btree_set(1i64..40, 1..15).prop_flat_map(|nums| {
        let nums: Vec<i64> = nums.into_iter().collect();
        let len = nums.len();
        let refs = prop::collection::vec(prop::collection::vec(1i64..45, 0..3), len);
        (Just(nums), refs).prop_map(|(nums, refs)| nums.into_iter().zip(refs).collect())
    })
}

fn to_sources(spec: &[(i64, Vec<i64>)]) -> Vec<ReferenceSource> {
    spec.iter()
        .map(|(num, refs)| {
            let text: Vec<String> = refs.iter().map(|r| format!("NRQZ#{}", r)).collect();
            ReferenceSource::new(RecordRef::case(*num), Some(&text.join(" ")))
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_groups_ignore_input_order(spec in sources_strategy(), rotate in 0usize..15) {
        let patterns = ReferencePatterns::nrqz().unwrap();
        let forward = to_sources(&spec);
        let mut shuffled = forward.clone();
        shuffled.reverse();
        let len = shuffled.len();
        shuffled.rotate_left(rotate % len);

        let a = build_groups(&forward, &patterns);
        let b = build_groups(&shuffled, &patterns);
        prop_assert_eq!(components(&a), components(&b));
        prop_assert_eq!(a.len(), spec.len());
    }

    #[test]
    fn prop_referenced_existing_records_share_group(spec in sources_strategy()) {
        let patterns = ReferencePatterns::nrqz().unwrap();
        let groups = build_groups(&to_sources(&spec), &patterns);
        for (num, refs) in &spec {
            for target in refs {
                let target = RecordRef::case(*target);
                if let Some(group) = groups.get(&target) {
                    prop_assert_eq!(groups[&RecordRef::case(*num)], *group);
                }
            }
        }
    }
}
