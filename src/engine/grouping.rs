// ==========================================
// NRQZ 记录管理系统 - 引用分组引擎
// ==========================================
// 职责: 文本交叉引用 → 等价类,并增量维护已持久化的分组
// 规则（对每个连通分量）:
// - 不触及任何已有分组 → 新建分组
// - 触及一个已有分组 → 加入该分组
// - 触及多个已有分组 → 以最小 group_id 为幸存者吸收其余分组,再加入
// 红线:
// - 分组只合并,不拆分
// - 任意处理顺序得到相同划分
// - 整个重建在一个 IMMEDIATE 事务内完成
// ==========================================

use crate::domain::group::{GroupingReport, RecordRef, ReferenceSource};
use crate::domain::schema::SchemaRegistry;
use crate::domain::types::RecordType;
use crate::engine::disjoint_set::DisjointSet;
use crate::engine::reference_resolver::ReferencePatterns;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::group_repo::GroupRepository;
use crate::repository::record_repo::SqliteRecordStore;
use crate::repository::record_store::RecordStore;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument};

/// 参与分组的记录类型
pub const GROUPED_TYPES: [RecordType; 2] = [RecordType::Case, RecordType::PreliminaryCase];

/// 计算引用分组（纯函数）
///
/// # 参数
/// - records: 记录标识 + 自由文本
/// - patterns: 引用正则
///
/// # 返回
/// - 记录标识 → 分组序号; 序号为该分组最小成员在全部记录（升序）中的位置,
///   没有任何引用的记录自成一组
pub fn build_groups(records: &[ReferenceSource], patterns: &ReferencePatterns) -> BTreeMap<RecordRef, usize> {
    let known: BTreeSet<RecordRef> = records.iter().map(|r| r.record).collect();

    let mut set = DisjointSet::new();
    for source in records {
        set.insert(source.record);
        if let Some(text) = &source.text {
            for target in patterns.derive_references(text, &known) {
                set.union(source.record, target);
            }
        }
    }

    let ordinals: BTreeMap<RecordRef, usize> = known.iter().enumerate().map(|(i, r)| (*r, i)).collect();
    let mut groups = BTreeMap::new();
    for members in set.sets() {
        // sets() 内部升序,第一个即最小成员
        let Some(lowest) = members.first() else { continue };
        let group_id = ordinals[lowest];
        for member in members {
            groups.insert(member, group_id);
        }
    }
    groups
}

/// 分组结果 → 升序的分量列表
pub fn components(groups: &BTreeMap<RecordRef, usize>) -> Vec<Vec<RecordRef>> {
    let mut by_group: BTreeMap<usize, Vec<RecordRef>> = BTreeMap::new();
    for (record, group_id) in groups {
        by_group.entry(*group_id).or_default().push(*record);
    }
    by_group.into_values().collect()
}

// ==========================================
// GroupingEngine - 持久化分组重建
// ==========================================
pub struct GroupingEngine {
    conn: Arc<Mutex<Connection>>,
    store: Box<dyn RecordStore>,
    patterns: ReferencePatterns,
}

impl GroupingEngine {
    /// 创建新的 GroupingEngine 实例
    ///
    /// # 参数
    /// - conn: 共享数据库连接
    /// - schema: Schema 注册表
    /// - patterns: 引用正则（通常为 ReferencePatterns::nrqz()）
    pub fn new(conn: Arc<Mutex<Connection>>, schema: Arc<SchemaRegistry>, patterns: ReferencePatterns) -> Self {
        Self {
            conn,
            store: Box::new(SqliteRecordStore::new(schema)),
            patterns,
        }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取参与分组的记录（案件号 + comments）
    ///
    /// # 返回
    /// - (分组输入, 记录标识 → record_id)
    fn load_sources(&self, conn: &Connection) -> RepositoryResult<(Vec<ReferenceSource>, BTreeMap<RecordRef, i64>)> {
        let mut sources = Vec::new();
        let mut ids = BTreeMap::new();
        for record_type in GROUPED_TYPES {
            for record in self.store.list_by_type(conn, record_type)? {
                let Some(case_num) = record.case_num() else {
                    continue;
                };
                let reference = RecordRef::new(record_type, case_num);
                ids.insert(reference, record.record_id);
                sources.push(ReferenceSource::new(reference, record.text("comments")));
            }
        }
        Ok((sources, ids))
    }

    /// 重建引用分组
    ///
    /// # 说明
    /// - 只持久化成员数 ≥ 2 的分量
    /// - 已有分组不会被拆分; 被桥接的分组合并到最小 group_id
    #[instrument(skip(self))]
    pub fn rebuild(&self) -> RepositoryResult<GroupingReport> {
        let conn = self.get_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;

        let (sources, ids) = self.load_sources(&tx)?;
        let known: BTreeSet<RecordRef> = ids.keys().copied().collect();
        let references_found: usize = sources
            .iter()
            .filter_map(|s| s.text.as_deref())
            .map(|text| self.patterns.derive_references(text, &known).len())
            .sum();

        let groups = build_groups(&sources, &self.patterns);
        let mut report = GroupingReport {
            records_scanned: sources.len(),
            references_found,
            ..GroupingReport::default()
        };

        for component in components(&groups).into_iter().filter(|c| c.len() >= 2) {
            let member_ids: Vec<i64> = component.iter().filter_map(|r| ids.get(r).copied()).collect();
            self.apply_component(&tx, &member_ids, &mut report)?;
        }

        report.groups = GroupRepository::list_groups_tx(&tx)?;
        tx.commit()?;

        info!(
            records = report.records_scanned,
            references = report.references_found,
            created = report.groups_created,
            merged = report.groups_merged,
            added = report.members_added,
            "引用分组重建完成"
        );
        Ok(report)
    }

    /// 对一个连通分量应用 0 / 1 / 多 规则
    fn apply_component(&self, conn: &Connection, member_ids: &[i64], report: &mut GroupingReport) -> RepositoryResult<()> {
        let mut touched = BTreeSet::new();
        for record_id in member_ids {
            if let Some(group_id) = GroupRepository::group_of_tx(conn, *record_id)? {
                touched.insert(group_id);
            }
        }

        let survivor = match touched.iter().next() {
            None => {
                report.groups_created += 1;
                GroupRepository::create_group_tx(conn)?
            }
            Some(&lowest) => {
                for absorbed in touched.iter().skip(1) {
                    let moved = GroupRepository::absorb_group_tx(conn, lowest, *absorbed)?;
                    debug!(survivor = lowest, absorbed, moved, "分组合并");
                    report.groups_merged += 1;
                }
                lowest
            }
        };

        for record_id in member_ids {
            if GroupRepository::group_of_tx(conn, *record_id)? != Some(survivor) {
                GroupRepository::add_member_tx(conn, survivor, *record_id)?;
                report.members_added += 1;
            }
        }
        Ok(())
    }
}
