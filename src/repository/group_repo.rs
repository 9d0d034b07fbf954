// ==========================================
// NRQZ 记录管理系统 - 引用分组仓储
// ==========================================
// 表: reference_group / group_member
// 约束: 每条记录至多属于一个分组（group_member.record_id 为主键）
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::group::ReferenceGroup;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::record_repo::parse_timestamp;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

/// 引用分组仓储
pub struct GroupRepository {
    conn: Arc<Mutex<Connection>>,
}

impl GroupRepository {
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
    // 事务内操作
    // ==========================================

    pub fn create_group_tx(conn: &Connection) -> RepositoryResult<i64> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO reference_group (created_at, updated_at) VALUES (?1, ?1)",
            params![now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 加入分组; 记录已在其他分组 → UniqueConstraintViolation
    pub fn add_member_tx(conn: &Connection, group_id: i64, record_id: i64) -> RepositoryResult<()> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO group_member (record_id, group_id, added_at) VALUES (?1, ?2, ?3)",
            params![record_id, group_id, now],
        )?;
        Self::touch_tx(conn, group_id)
    }

    pub fn group_of_tx(conn: &Connection, record_id: i64) -> RepositoryResult<Option<i64>> {
        let group_id = conn
            .query_row(
                "SELECT group_id FROM group_member WHERE record_id = ?1",
                params![record_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(group_id)
    }

    pub fn members_tx(conn: &Connection, group_id: i64) -> RepositoryResult<Vec<i64>> {
        let mut stmt = conn.prepare("SELECT record_id FROM group_member WHERE group_id = ?1 ORDER BY record_id")?;
        let ids = stmt
            .query_map(params![group_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// 把 from_group 的全部成员并入 into_group,并删除 from_group
    ///
    /// # 返回
    /// - 迁移的成员数
    pub fn absorb_group_tx(conn: &Connection, into_group: i64, from_group: i64) -> RepositoryResult<usize> {
        if into_group == from_group {
            return Ok(0);
        }
        let moved = conn.execute(
            "UPDATE group_member SET group_id = ?1 WHERE group_id = ?2",
            params![into_group, from_group],
        )?;
        conn.execute("DELETE FROM reference_group WHERE group_id = ?1", params![from_group])?;
        Self::touch_tx(conn, into_group)?;
        Ok(moved)
    }

    /// 合并实体时迁移分组成员身份
    ///
    /// # 规则
    /// - from_record 不在分组 → 无操作
    /// - to_record 不在分组 → 接管 from_record 的成员身份
    /// - 两者在不同分组 → 两组合并（保留较小 group_id）
    /// - 最后移除 from_record 的成员身份
    pub fn transfer_membership_tx(conn: &Connection, from_record: i64, to_record: i64) -> RepositoryResult<()> {
        let from_group = match Self::group_of_tx(conn, from_record)? {
            Some(g) => g,
            None => return Ok(()),
        };

        match Self::group_of_tx(conn, to_record)? {
            None => {
                conn.execute(
                    "UPDATE group_member SET record_id = ?2 WHERE record_id = ?1",
                    params![from_record, to_record],
                )?;
                Self::touch_tx(conn, from_group)?;
            }
            Some(to_group) => {
                let survivor = to_group.min(from_group);
                Self::absorb_group_tx(conn, survivor, to_group.max(from_group))?;
                conn.execute("DELETE FROM group_member WHERE record_id = ?1", params![from_record])?;
            }
        }
        Ok(())
    }

    /// 删除成员数不足 2 的分组
    pub fn prune_small_groups_tx(conn: &Connection) -> RepositoryResult<usize> {
        let deleted = conn.execute(
            r#"
            DELETE FROM reference_group
            WHERE group_id NOT IN (
                SELECT group_id FROM group_member GROUP BY group_id HAVING COUNT(*) >= 2
            )
            "#,
            [],
        )?;
        Ok(deleted)
    }

    fn touch_tx(conn: &Connection, group_id: i64) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE reference_group SET updated_at = ?1 WHERE group_id = ?2",
            params![Utc::now().to_rfc3339(), group_id],
        )?;
        Ok(())
    }

    pub fn get_group_tx(conn: &Connection, group_id: i64) -> RepositoryResult<Option<ReferenceGroup>> {
        let raw: Option<(String, String)> = conn
            .query_row(
                "SELECT created_at, updated_at FROM reference_group WHERE group_id = ?1",
                params![group_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match raw {
            None => Ok(None),
            Some((created_at, updated_at)) => Ok(Some(ReferenceGroup {
                group_id,
                member_ids: Self::members_tx(conn, group_id)?,
                created_at: parse_timestamp("created_at", &created_at)?,
                updated_at: parse_timestamp("updated_at", &updated_at)?,
            })),
        }
    }

    pub fn list_groups_tx(conn: &Connection) -> RepositoryResult<Vec<ReferenceGroup>> {
        let mut stmt = conn.prepare("SELECT group_id FROM reference_group ORDER BY group_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(group) = Self::get_group_tx(conn, id)? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_group(&self, group_id: i64) -> RepositoryResult<Option<ReferenceGroup>> {
        let conn = self.get_conn()?;
        Self::get_group_tx(&conn, group_id)
    }

    /// 记录所在分组
    pub fn group_for_record(&self, record_id: i64) -> RepositoryResult<Option<ReferenceGroup>> {
        let conn = self.get_conn()?;
        match Self::group_of_tx(&conn, record_id)? {
            Some(group_id) => Self::get_group_tx(&conn, group_id),
            None => Ok(None),
        }
    }

    pub fn list_groups(&self) -> RepositoryResult<Vec<ReferenceGroup>> {
        let conn = self.get_conn()?;
        Self::list_groups_tx(&conn)
    }
}
