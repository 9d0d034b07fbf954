// ==========================================
// NRQZ 记录管理系统 - 交叉引用解析
// ==========================================
// 职责: 自由文本 → 被引用的记录标识集合（纯函数,无数据库访问）
// 规则:
// - 按声明顺序应用正则,每个正则绑定一种记录类型
// - 大小写不敏感,结果去重
// - 不存在的标识被忽略
// ==========================================

use crate::domain::group::RecordRef;
use crate::domain::types::RecordType;
use crate::importer::error::MappingConfigError;
use regex::Regex;
use std::collections::BTreeSet;

/// 预备案件: "NRQZ#P5678" / "NRQZ ID P-12"
pub const PRELIM_NRQZ_PATTERN: &str = r"(?i)NRQZ\s*(?:ID)?\s*#?\s*P-?(\d+)";
/// 预备案件: "prelim 12" / "preliminary case #12"
pub const PRELIM_WORD_PATTERN: &str = r"(?i)prelim(?:inary)?\s+(?:case\s*)?#?\s*(\d+)";
/// 正式案件: "NRQZ#1234" / "NRQZ ID 1234"
pub const CASE_PATTERN: &str = r"(?i)NRQZ\s*(?:ID)?\s*#?\s*(\d+)";

// ==========================================
// ReferencePatterns - 有序的 (记录类型, 正则) 列表
// ==========================================
#[derive(Debug, Clone)]
pub struct ReferencePatterns {
    patterns: Vec<(RecordType, Regex)>,
}

impl ReferencePatterns {
    /// 由 (记录类型, 正则文本) 构造; 每个正则的第一个捕获组为编号
    pub fn new(patterns: &[(RecordType, &str)]) -> Result<Self, MappingConfigError> {
        let compiled = patterns
            .iter()
            .map(|(record_type, pattern)| {
                Regex::new(pattern)
                    .map(|re| (*record_type, re))
                    .map_err(|e| MappingConfigError::InvalidPattern {
                        pattern: pattern.to_string(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns: compiled })
    }

    /// NRQZ 数据集默认模式（预备案件在前）
    pub fn nrqz() -> Result<Self, MappingConfigError> {
        Self::new(&[
            (RecordType::PreliminaryCase, PRELIM_NRQZ_PATTERN),
            (RecordType::PreliminaryCase, PRELIM_WORD_PATTERN),
            (RecordType::Case, CASE_PATTERN),
        ])
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// 文本中出现的全部引用（不过滤是否存在）
    pub fn extract(&self, text: &str) -> BTreeSet<RecordRef> {
        let mut found = BTreeSet::new();
        for (record_type, regex) in &self.patterns {
            for captures in regex.captures_iter(text) {
                let number = captures
                    .get(1)
                    .and_then(|m| m.as_str().parse::<i64>().ok());
                if let Some(case_num) = number {
                    found.insert(RecordRef::new(*record_type, case_num));
                }
            }
        }
        found
    }

    /// 文本引用的已存在记录
    ///
    /// # 参数
    /// - known: 已存在的记录标识集合
    pub fn derive_references(&self, text: &str, known: &BTreeSet<RecordRef>) -> BTreeSet<RecordRef> {
        self.extract(text)
            .into_iter()
            .filter(|r| known.contains(r))
            .collect()
    }
}
