// ==========================================
// NRQZ 记录管理系统 - 疑似重复查找
// ==========================================
// 职责: 同类型记录两两比较 → 相似度 ≥ 阈值的记录聚成候选簇
// 比较键:
// - Person: 规范化姓名; 邮箱相同（非空）直接视为重复
// - Facility: 同一案件号下的规范化站点名
// 说明: 只产出候选,合并由操作员通过 MergeEngine 发起
// ==========================================

use crate::domain::merge::DuplicateCluster;
use crate::domain::record::StoredRecord;
use crate::domain::schema::SchemaRegistry;
use crate::domain::types::RecordType;
use crate::engine::disjoint_set::DisjointSet;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::record_repo::SqliteRecordStore;
use crate::repository::record_store::RecordStore;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, instrument};

/// 支持查重的记录类型
pub const DEDUP_TYPES: [RecordType; 2] = [RecordType::Person, RecordType::Facility];

/// 小写、去标点、压缩空白
pub fn normalize_name(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 两个规范化字符串的相似度 [0, 1]（编辑距离与 Jaro-Winkler 取大）
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b).max(strsim::jaro_winkler(a, b))
}

fn compare_key(record: &StoredRecord) -> Option<String> {
    let raw = match record.record_type {
        RecordType::Facility => record.text("site_name"),
        _ => record.text("name"),
    }?;
    let key = normalize_name(raw);
    (!key.is_empty()).then_some(key)
}

fn lowered_email(record: &StoredRecord) -> Option<String> {
    record.text("email").map(|e| e.trim().to_lowercase())
}

/// 两条记录的重复得分; None 表示不可比较
fn pair_score(a: &StoredRecord, b: &StoredRecord) -> Option<f64> {
    match a.record_type {
        RecordType::Person => {
            if let (Some(ea), Some(eb)) = (lowered_email(a), lowered_email(b)) {
                if ea == eb {
                    return Some(1.0);
                }
            }
        }
        RecordType::Facility => {
            if a.case_num() != b.case_num() {
                return None;
            }
        }
        _ => {}
    }
    Some(similarity(&compare_key(a)?, &compare_key(b)?))
}

/// 聚类疑似重复（纯函数）
///
/// # 参数
/// - records: 同一类型的记录
/// - threshold: 相似度阈值（含）
///
/// # 返回
/// - 成员数 ≥ 2 的簇,按最小 record_id 升序; 簇内 record_id 升序
pub fn find_clusters(records: &[StoredRecord], threshold: f64) -> Vec<DuplicateCluster> {
    let mut set = DisjointSet::new();
    let mut best: BTreeMap<i64, f64> = BTreeMap::new();

    for (i, a) in records.iter().enumerate() {
        for b in records.iter().skip(i + 1) {
            let Some(score) = pair_score(a, b) else { continue };
            if score >= threshold {
                set.union(a.record_id, b.record_id);
                for id in [a.record_id, b.record_id] {
                    let entry = best.entry(id).or_insert(0.0);
                    *entry = entry.max(score);
                }
            }
        }
    }

    let Some(record_type) = records.first().map(|r| r.record_type) else {
        return Vec::new();
    };
    set.sets()
        .into_iter()
        .filter(|members| members.len() >= 2)
        .map(|record_ids| {
            let best_score = record_ids
                .iter()
                .filter_map(|id| best.get(id))
                .fold(0.0_f64, |acc, s| acc.max(*s));
            DuplicateCluster {
                record_type,
                record_ids,
                best_score,
            }
        })
        .collect()
}

// ==========================================
// DuplicateFinder - 数据库级查重
// ==========================================
pub struct DuplicateFinder {
    conn: Arc<Mutex<Connection>>,
    store: Box<dyn RecordStore>,
    threshold: f64,
}

impl DuplicateFinder {
    /// # 参数
    /// - threshold: 相似度阈值,通常来自 dedup.similarity_threshold
    pub fn new(conn: Arc<Mutex<Connection>>, schema: Arc<SchemaRegistry>, threshold: f64) -> Self {
        Self {
            conn,
            store: Box::new(SqliteRecordStore::new(schema)),
            threshold,
        }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    #[instrument(skip(self), fields(threshold = self.threshold))]
    pub fn find(&self, record_type: RecordType) -> RepositoryResult<Vec<DuplicateCluster>> {
        if !DEDUP_TYPES.contains(&record_type) {
            return Err(RepositoryError::ValidationError(format!(
                "记录类型 {} 不支持查重",
                record_type
            )));
        }
        let records = {
            let conn = self.get_conn()?;
            self.store.list_by_type(&conn, record_type)?
        };
        let clusters = find_clusters(&records, self.threshold);
        info!(record_type = %record_type, records = records.len(), clusters = clusters.len(), "查重完成");
        Ok(clusters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::FieldValue;
    use chrono::Utc;

    fn record(id: i64, record_type: RecordType, fields: &[(&str, FieldValue)]) -> StoredRecord {
        StoredRecord {
            record_id: id,
            record_type,
            natural_key: None,
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn person(id: i64, name: &str, email: Option<&str>) -> StoredRecord {
        let mut fields = vec![("name", FieldValue::text(name))];
        if let Some(email) = email {
            fields.push(("email", FieldValue::text(email)));
        }
        record(id, RecordType::Person, &fields)
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Smith,  John Q. "), "smith john q");
        assert_eq!(similarity("", "x"), 0.0);
        assert_eq!(similarity("john smith", "john smith"), 1.0);
    }

    #[test]
    fn test_person_clusters() {
        let records = vec![
            person(1, "John Smith", None),
            person(2, "Jon Smith", None),
            person(3, "Alice Jones", Some("aj@example.com")),
            person(4, "A. Jones-Brown", Some("AJ@example.com ")),
            person(5, "Zed Q", None),
        ];
        let clusters = find_clusters(&records, 0.85);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].record_ids, vec![1, 2]);
        assert_eq!(clusters[1].record_ids, vec![3, 4]);
        assert_eq!(clusters[1].best_score, 1.0);
    }

    #[test]
    fn test_facilities_compare_within_case_only() {
        let facility = |id, case_num: i64, site: &str| {
            record(id, RecordType::Facility, &[
                ("case_num", FieldValue::Integer(case_num)),
                ("site_name", FieldValue::text(site)),
            ])
        };
        let records = vec![
            facility(1, 100, "Spruce Knob Tower"),
            facility(2, 100, "Spruce Knob Tower #2"),
            facility(3, 200, "Spruce Knob Tower"),
        ];
        let clusters = find_clusters(&records, 0.85);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].record_ids, vec![1, 2]);
    }

    #[test]
    fn test_empty_input() {
        assert!(find_clusters(&[], 0.5).is_empty());
    }
}
