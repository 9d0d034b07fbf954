// ==========================================
// NRQZ 记录管理系统 - 领域类型定义
// ==========================================
// 职责: 记录类型 / 导入状态格 / 关系基数
// 红线: 导入状态只能由结果派生,不能独立设置
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 记录类型 (Record Type)
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Case,            // 正式案件
    PreliminaryCase, // 预备案件
    Person,          // 人员（申请人/联系人）
    Facility,        // 设施
    Attachment,      // 附件
}

impl RecordType {
    pub const ALL: [RecordType; 5] = [
        RecordType::Case,
        RecordType::PreliminaryCase,
        RecordType::Person,
        RecordType::Facility,
        RecordType::Attachment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Case => "CASE",
            RecordType::PreliminaryCase => "PRELIMINARY_CASE",
            RecordType::Person => "PERSON",
            RecordType::Facility => "FACILITY",
            RecordType::Attachment => "ATTACHMENT",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_matches('"').to_uppercase();
        match normalized.as_str() {
            "CASE" => Ok(RecordType::Case),
            "PRELIMINARY_CASE" | "PRELIM" | "PRELIM_CASE" => Ok(RecordType::PreliminaryCase),
            "PERSON" => Ok(RecordType::Person),
            "FACILITY" => Ok(RecordType::Facility),
            "ATTACHMENT" => Ok(RecordType::Attachment),
            _ => Err(format!("未知记录类型: {}", s)),
        }
    }
}

// ==========================================
// 导入状态 (Import Status)
// ==========================================
// 顺序: Empty < Rejected < CreatedDirty < CreatedClean
// 文件/批次状态 = 所有行尝试中最差（最小）的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Empty,        // 无行/无尝试
    Rejected,     // 未创建记录（致命校验失败）
    CreatedDirty, // 已创建,但存在可恢复的字段错误
    CreatedClean, // 已创建,零错误
}

impl ImportStatus {
    /// 聚合多个尝试的状态
    ///
    /// # 规则
    /// - 无任何尝试 → Empty
    /// - 否则取最小值（最差状态）
    pub fn aggregate<I>(statuses: I) -> ImportStatus
    where
        I: IntoIterator<Item = ImportStatus>,
    {
        statuses.into_iter().min().unwrap_or(ImportStatus::Empty)
    }

    /// 是否创建了记录
    pub fn is_created(&self) -> bool {
        matches!(self, ImportStatus::CreatedDirty | ImportStatus::CreatedClean)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Empty => "empty",
            ImportStatus::Rejected => "rejected",
            ImportStatus::CreatedDirty => "created_dirty",
            ImportStatus::CreatedClean => "created_clean",
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_matches('"') {
            "empty" => Ok(ImportStatus::Empty),
            "rejected" => Ok(ImportStatus::Rejected),
            "created_dirty" => Ok(ImportStatus::CreatedDirty),
            "created_clean" => Ok(ImportStatus::CreatedClean),
            other => Err(format!("未知导入状态: {}", other)),
        }
    }
}

// ==========================================
// 关系基数 (Cardinality)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cardinality {
    OneToOne,   // 一对一（冲突即致命）
    ManyToOne,  // 多对一（外键）
    ManyToMany, // 多对多（集合）
}

impl Cardinality {
    /// 是否单值关系
    pub fn is_single_valued(&self) -> bool {
        !matches!(self, Cardinality::ManyToMany)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::OneToOne => write!(f, "ONE_TO_ONE"),
            Cardinality::ManyToOne => write!(f, "MANY_TO_ONE"),
            Cardinality::ManyToMany => write!(f, "MANY_TO_MANY"),
        }
    }
}

// ==========================================
// 通用引用基数 (Generic Reference Cardinality)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefCardinality {
    Single,   // 每个 owner+role 只能指向一个目标
    Multiple, // 每个 owner+role 可指向多个目标
}

impl fmt::Display for RefCardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefCardinality::Single => write!(f, "SINGLE"),
            RefCardinality::Multiple => write!(f, "MULTIPLE"),
        }
    }
}

impl FromStr for RefCardinality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "SINGLE" => Ok(RefCardinality::Single),
            "MULTIPLE" => Ok(RefCardinality::Multiple),
            other => Err(format!("未知引用基数: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lattice_order() {
        assert!(ImportStatus::Empty < ImportStatus::Rejected);
        assert!(ImportStatus::Rejected < ImportStatus::CreatedDirty);
        assert!(ImportStatus::CreatedDirty < ImportStatus::CreatedClean);
    }

    #[test]
    fn test_aggregate_takes_worst() {
        let statuses = vec![
            ImportStatus::CreatedClean,
            ImportStatus::CreatedDirty,
            ImportStatus::CreatedClean,
        ];
        assert_eq!(ImportStatus::aggregate(statuses), ImportStatus::CreatedDirty);

        let statuses = vec![ImportStatus::CreatedClean, ImportStatus::Rejected];
        assert_eq!(ImportStatus::aggregate(statuses), ImportStatus::Rejected);
    }

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(ImportStatus::aggregate(Vec::new()), ImportStatus::Empty);
    }

    #[test]
    fn test_status_round_trip_str() {
        for status in [
            ImportStatus::Empty,
            ImportStatus::Rejected,
            ImportStatus::CreatedDirty,
            ImportStatus::CreatedClean,
        ] {
            assert_eq!(status.as_str().parse::<ImportStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_record_type_parse_aliases() {
        assert_eq!("prelim".parse::<RecordType>().unwrap(), RecordType::PreliminaryCase);
        assert_eq!("case".parse::<RecordType>().unwrap(), RecordType::Case);
        assert!("unknown".parse::<RecordType>().is_err());
    }
}
