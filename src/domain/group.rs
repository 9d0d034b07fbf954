// ==========================================
// NRQZ 记录管理系统 - 引用分组领域模型
// ==========================================
// 职责: 文本交叉引用 → 等价类（Reference Group / Case Group）
// 红线: 分组只合并,不拆分
// ==========================================

use crate::domain::types::RecordType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// RecordRef - 文本中可引用的记录标识
// ==========================================
// 例: "NRQZ#5678" → RecordRef { Case, 5678 }
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub record_type: RecordType,
    pub case_num: i64,
}

impl RecordRef {
    pub fn new(record_type: RecordType, case_num: i64) -> Self {
        Self {
            record_type,
            case_num,
        }
    }

    pub fn case(case_num: i64) -> Self {
        Self::new(RecordType::Case, case_num)
    }

    pub fn prelim(case_num: i64) -> Self {
        Self::new(RecordType::PreliminaryCase, case_num)
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.record_type {
            RecordType::PreliminaryCase => write!(f, "NRQZ#P{}", self.case_num),
            _ => write!(f, "NRQZ#{}", self.case_num),
        }
    }
}

// ==========================================
// ReferenceSource - 分组输入（记录 + 自由文本）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSource {
    pub record: RecordRef,
    pub text: Option<String>,
}

impl ReferenceSource {
    pub fn new(record: RecordRef, text: Option<&str>) -> Self {
        Self {
            record,
            text: text.map(str::to_string),
        }
    }
}

// ==========================================
// ReferenceGroup - 已持久化的分组
// ==========================================
// 对齐: reference_group / group_member 表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceGroup {
    pub group_id: i64,
    pub member_ids: Vec<i64>, // record_id,升序
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==========================================
// GroupingReport - 一次分组重建的结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingReport {
    pub records_scanned: usize,
    pub references_found: usize,
    pub groups_created: usize,
    pub groups_merged: usize, // 被吸收（删除）的分组数
    pub members_added: usize,
    pub groups: Vec<ReferenceGroup>,
}
