// ==========================================
// NRQZ 记录管理系统 - 字段值类型
// ==========================================
// 职责: 转换器输出 / 草稿记录字段 / 合并 diff 的统一值类型
// ==========================================

use crate::domain::schema::FieldKind;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 日期规范格式（转换器可重新解析）
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// 日期时间规范格式
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ==========================================
// FieldValue - 单个字段的类型化值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    /// 空值判断（Null 或空白文本）
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// 规范化的原始字符串表示
    ///
    /// 转换器对该输出再次转换必须得到相等的值
    pub fn to_raw_string(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            FieldValue::Date(d) => d.format(DATE_FORMAT).to_string(),
            FieldValue::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            FieldValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// 值是否满足字段类型（Null 总是满足；整数可写入浮点字段）
    pub fn matches_kind(&self, kind: FieldKind) -> bool {
        match (self, kind) {
            (FieldValue::Null, _) => true,
            (FieldValue::Text(_), FieldKind::Text) => true,
            (FieldValue::Integer(_), FieldKind::Integer) => true,
            (FieldValue::Integer(_), FieldKind::Float) => true,
            (FieldValue::Float(_), FieldKind::Float) => true,
            (FieldValue::Bool(_), FieldKind::Bool) => true,
            (FieldValue::Date(_), FieldKind::Date) => true,
            (FieldValue::DateTime(_), FieldKind::DateTime) => true,
            _ => false,
        }
    }

    /// 用于 "prefer longest" 策略的长度度量
    pub fn display_len(&self) -> usize {
        self.to_raw_string().chars().count()
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "<null>"),
            FieldValue::Text(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other.to_raw_string()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// 去重（保持首次出现顺序）
///
/// FieldValue 含浮点数,不能放入 HashSet,这里按 PartialEq 线性去重
pub fn distinct_values<'a, I>(values: I) -> Vec<FieldValue>
where
    I: IntoIterator<Item = &'a FieldValue>,
{
    let mut out: Vec<FieldValue> = Vec::new();
    for value in values {
        if !out.contains(value) {
            out.push(value.clone());
        }
    }
    out
}
