// ==========================================
// NRQZ 记录管理系统 - 实体合并领域模型
// ==========================================
// 职责: 合并操作结果 + 字段/关系 diff（人工审计用）
// ==========================================

use crate::domain::types::RecordType;
use crate::domain::value::FieldValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// FieldDiff - 字段级 diff
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub original: FieldValue,        // primary 上的原值
    pub candidates: Vec<FieldValue>, // 所有参与记录中出现过的不同值
    pub final_value: FieldValue,     // 最终取值
}

impl FieldDiff {
    pub fn changed(&self) -> bool {
        self.original != self.final_value
    }
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let candidates: Vec<String> = self.candidates.iter().map(|v| v.to_string()).collect();
        write!(
            f,
            "{}: {{{}}} -> {}",
            self.field,
            candidates.join(", "),
            self.final_value
        )
    }
}

// ==========================================
// RelationDiff - 关系级 diff
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDiff {
    pub relation: String,
    pub original: Vec<i64>,    // primary 原有关联记录
    pub migrated: Vec<i64>,    // 从别名迁移来的关联记录
    pub final_value: Vec<i64>, // 合并后的关联记录（升序）
}

impl fmt::Display for RelationDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:?} + {:?} -> {:?}",
            self.relation, self.original, self.migrated, self.final_value
        )
    }
}

// ==========================================
// MergeOperationResult - 一次去重合并的记录
// ==========================================
// 对齐: merge_operation 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeOperationResult {
    pub merge_id: String,
    pub record_type: RecordType,
    pub primary_id: i64,
    pub consumed_ids: Vec<i64>,
    pub field_diffs: Vec<FieldDiff>,
    pub relation_diffs: Vec<RelationDiff>,
    pub created_at: DateTime<Utc>,
}

impl MergeOperationResult {
    /// 人类可读的 diff 摘要（每行一条）
    pub fn summary_lines(&self) -> Vec<String> {
        self.field_diffs
            .iter()
            .map(|d| d.to_string())
            .chain(self.relation_diffs.iter().map(|d| d.to_string()))
            .collect()
    }
}

// ==========================================
// DuplicateCluster - 疑似重复候选簇
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCluster {
    pub record_type: RecordType,
    pub record_ids: Vec<i64>, // 升序; 第一个为建议 primary
    pub best_score: f64,
}

// ==========================================
// ConflictResolution - 字段冲突解决策略
// ==========================================
// 默认 Escalate: 冲突即报错,交由人工处理（不做多数表决）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictResolution {
    #[default]
    Escalate,         // 报告冲突,合并失败
    PreferPrimary,    // 保留 primary 的非空值
    PreferLongest,    // 取最长值
    PreferMostRecent, // 取最近更新记录的值
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictResolution::Escalate => write!(f, "ESCALATE"),
            ConflictResolution::PreferPrimary => write!(f, "PREFER_PRIMARY"),
            ConflictResolution::PreferLongest => write!(f, "PREFER_LONGEST"),
            ConflictResolution::PreferMostRecent => write!(f, "PREFER_MOST_RECENT"),
        }
    }
}

impl FromStr for ConflictResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_matches('"').to_uppercase().as_str() {
            "ESCALATE" => Ok(ConflictResolution::Escalate),
            "PREFER_PRIMARY" | "PRIMARY" => Ok(ConflictResolution::PreferPrimary),
            "PREFER_LONGEST" | "LONGEST" => Ok(ConflictResolution::PreferLongest),
            "PREFER_MOST_RECENT" | "RECENT" => Ok(ConflictResolution::PreferMostRecent),
            other => Err(format!("未知冲突策略: {}", other)),
        }
    }
}
