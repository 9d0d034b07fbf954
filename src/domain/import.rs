// ==========================================
// NRQZ 记录管理系统 - 导入审计领域模型
// ==========================================
// 职责: Row Snapshot / Import Attempt / 文件级尝试 / 操作员汇总
// 红线: Row Snapshot 创建后不可变; Import Attempt 仅 acknowledged 可后续修改
// ==========================================

use crate::domain::types::{ImportStatus, RecordType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 原始行: 表头 → 原始单元格值
pub type RawRow = BTreeMap<String, String>;

// ==========================================
// RowSnapshot - 原始行快照
// ==========================================
// 用途: 保存外部记录的原样数据,与是否成功创建领域记录无关
// 对齐: row_snapshot 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSnapshot {
    pub snapshot_id: String,             // UUID
    pub file_attempt_id: Option<String>, // 所属文件级尝试
    pub row_number: usize,               // 原始文件行号（1 起）
    pub data: RawRow,                    // 原始键值
    pub created_at: DateTime<Utc>,
}

impl RowSnapshot {
    pub fn new(file_attempt_id: Option<String>, row_number: usize, data: RawRow) -> Self {
        Self {
            snapshot_id: uuid::Uuid::new_v4().to_string(),
            file_attempt_id,
            row_number,
            data,
            created_at: Utc::now(),
        }
    }
}

// ==========================================
// FieldErrorKind - 字段级错误类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldErrorKind {
    Conversion,      // 单元格无法转换（默认非致命）
    MissingHeader,   // 必填源键无匹配表头
    AmbiguousHeader, // 源键匹配到多个取值冲突的表头
    Validation,      // 持久化校验拒绝
    Mapping,         // 转换器输出与声明的目标字段不符
}

impl fmt::Display for FieldErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldErrorKind::Conversion => write!(f, "CONVERSION"),
            FieldErrorKind::MissingHeader => write!(f, "MISSING_HEADER"),
            FieldErrorKind::AmbiguousHeader => write!(f, "AMBIGUOUS_HEADER"),
            FieldErrorKind::Validation => write!(f, "VALIDATION"),
            FieldErrorKind::Mapping => write!(f, "MAPPING"),
        }
    }
}

// ==========================================
// FieldError - 字段级错误（按目标字段记录）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,             // 目标字段名（不是原始表头）
    pub kind: FieldErrorKind,
    pub raw_value: Option<String>, // 出错的原始值
    pub message: String,
    pub fatal: bool,               // 是否致命（致命 → rejected）
}

impl FieldError {
    pub fn new(field: &str, kind: FieldErrorKind, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            kind,
            raw_value: None,
            message: message.into(),
            fatal: false,
        }
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw_value = Some(raw.into());
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

// ==========================================
// FileErrorKind / FileError - 文件级错误
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileErrorKind {
    UnmappedHeaderRatio, // 未识别表头比例超限（结构性错误）
    Parse,               // 文件无法解析
    RowRejected,         // 非持久模式下某行被拒绝,整体回滚
    Interrupted,         // 导入被中断
    Storage,             // 数据库写入失败,导入中止
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileError {
    pub kind: FileErrorKind,
    pub message: String,
    pub row_number: Option<usize>,
}

impl FileError {
    pub fn new(kind: FileErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            row_number: None,
        }
    }

    pub fn at_row(mut self, row_number: usize) -> Self {
        self.row_number = Some(row_number);
        self
    }
}

// ==========================================
// ImportAttempt - 行/模型级导入尝试
// ==========================================
// 对齐: import_attempt 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportAttempt {
    pub attempt_id: String,
    pub file_attempt_id: Option<String>,
    pub snapshot_id: String,
    pub row_number: usize,
    pub form_map: String,
    pub record_type: RecordType,
    pub status: ImportStatus,
    pub errors: Vec<FieldError>,
    pub created_record_id: Option<i64>,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

impl ImportAttempt {
    /// 按目标字段分组的错误消息
    pub fn errors_by_field(&self) -> BTreeMap<String, Vec<String>> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for error in &self.errors {
            out.entry(error.field.clone())
                .or_default()
                .push(error.message.clone());
        }
        out
    }
}

// ==========================================
// FileImportAttempt - 文件级导入尝试
// ==========================================
// 对齐: file_import_attempt 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileImportAttempt {
    pub file_attempt_id: String,
    pub source_path: String,
    pub profile: String,
    pub durable: bool,
    pub dry_run: bool,
    pub status: ImportStatus,
    pub row_count: usize,
    pub unmapped_headers: Vec<String>,
    pub ambiguous_headers: Vec<String>,
    pub file_errors: Vec<FileError>,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
    pub elapsed_ms: i64,
}

// ==========================================
// RowErrorSummary - 单行错误汇总（操作员视图）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowErrorSummary {
    pub row_number: usize,
    pub form_map: String,
    pub status: ImportStatus,
    pub errors: BTreeMap<String, Vec<String>>, // 目标字段 → 错误消息
}

// ==========================================
// ImportSummary - 导入统计
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub total_rows: usize,   // 文件总行数
    pub sampled_rows: usize, // 实际处理行数（--limit 抽样后）
    pub attempts: usize,     // 模型级尝试次数
    pub created_clean: usize,
    pub created_dirty: usize,
    pub rejected: usize,
}

impl ImportSummary {
    pub fn record(&mut self, status: ImportStatus) {
        self.attempts += 1;
        match status {
            ImportStatus::CreatedClean => self.created_clean += 1,
            ImportStatus::CreatedDirty => self.created_dirty += 1,
            ImportStatus::Rejected => self.rejected += 1,
            ImportStatus::Empty => {}
        }
    }
}

// ==========================================
// FileImportReport - 文件导入的机器可读汇总
// ==========================================
// 用途: 报表/CLI 层消费（未识别表头 / 按字段的行错误 / 最终状态）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileImportReport {
    pub file_attempt: FileImportAttempt,
    pub summary: ImportSummary,
    pub row_errors: Vec<RowErrorSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub row_attempts: Vec<ImportAttempt>,
}

impl FileImportReport {
    pub fn status(&self) -> ImportStatus {
        self.file_attempt.status
    }

    pub fn unmapped_headers(&self) -> &[String] {
        &self.file_attempt.unmapped_headers
    }

    /// 行号 → 目标字段 → 错误消息
    pub fn errors_by_row(&self) -> BTreeMap<usize, BTreeMap<String, Vec<String>>> {
        let mut out: BTreeMap<usize, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for row in &self.row_errors {
            let entry = out.entry(row.row_number).or_default();
            for (field, messages) in &row.errors {
                entry
                    .entry(field.clone())
                    .or_default()
                    .extend(messages.iter().cloned());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt_with_errors(errors: Vec<FieldError>) -> ImportAttempt {
        ImportAttempt {
            attempt_id: "a1".to_string(),
            file_attempt_id: None,
            snapshot_id: "s1".to_string(),
            row_number: 1,
            form_map: "case".to_string(),
            record_type: RecordType::Case,
            status: ImportStatus::CreatedDirty,
            errors,
            created_record_id: Some(1),
            acknowledged: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_errors_by_field_groups_messages() {
        let attempt = attempt_with_errors(vec![
            FieldError::new("latitude", FieldErrorKind::Conversion, "bad lat"),
            FieldError::new("latitude", FieldErrorKind::Conversion, "still bad"),
            FieldError::new("freq_low", FieldErrorKind::Conversion, "bad freq"),
        ]);
        let grouped = attempt.errors_by_field();
        assert_eq!(grouped["latitude"].len(), 2);
        assert_eq!(grouped["freq_low"], vec!["bad freq".to_string()]);
    }

    #[test]
    fn test_summary_record_counts() {
        let mut summary = ImportSummary::default();
        summary.record(ImportStatus::CreatedClean);
        summary.record(ImportStatus::Rejected);
        summary.record(ImportStatus::CreatedDirty);
        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.created_clean, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.created_dirty, 1);
    }

    #[test]
    fn test_snapshot_ids_are_unique() {
        let a = RowSnapshot::new(None, 1, RawRow::new());
        let b = RowSnapshot::new(None, 1, RawRow::new());
        assert_ne!(a.snapshot_id, b.snapshot_id);
    }
}
