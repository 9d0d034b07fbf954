// ==========================================
// NRQZ 记录管理系统 - 记录实体
// ==========================================
// DraftRecord: 导入管道中间产物（FormMap 渲染 → 此结构 → 持久化校验）
// StoredRecord: 已落库的领域记录（record 表）
// ==========================================

use crate::domain::schema::RecordSchema;
use crate::domain::types::RecordType;
use crate::domain::value::FieldValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 字段名 → 值（有序,保证序列化与 diff 稳定）
pub type FieldValues = BTreeMap<String, FieldValue>;

// ==========================================
// DraftRecord - 草稿记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRecord {
    pub record_type: RecordType,
    pub fields: FieldValues,
}

impl DraftRecord {
    pub fn new(record_type: RecordType) -> Self {
        Self {
            record_type,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

// ==========================================
// StoredRecord - 已落库记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record_id: i64,
    pub record_type: RecordType,
    pub natural_key: Option<String>,
    pub fields: FieldValues,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// 读取文本字段（空白视为 None）
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|v| v.as_text())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// 读取案件号
    pub fn case_num(&self) -> Option<i64> {
        self.fields.get("case_num").and_then(|v| v.as_i64())
    }
}

/// 计算自然键
///
/// # 规则
/// - 各组成字段取规范字符串（文本小写去空白）,以 `|` 连接
/// - Schema 无自然键,或所有组成字段均为空 → None（不做唯一性约束）
pub fn natural_key(schema: &RecordSchema, fields: &FieldValues) -> Option<String> {
    if schema.natural_key.is_empty() {
        return None;
    }

    let parts: Vec<String> = schema
        .natural_key
        .iter()
        .map(|key| match fields.get(key) {
            Some(FieldValue::Text(s)) => s.trim().to_lowercase(),
            Some(value) => value.to_raw_string(),
            None => String::new(),
        })
        .collect();

    if parts.iter().all(|p| p.is_empty()) {
        None
    } else {
        Some(parts.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::SchemaRegistry;

    #[test]
    fn test_natural_key_case() {
        let registry = SchemaRegistry::nrqz();
        let schema = registry.get(RecordType::Case).unwrap();
        let draft = DraftRecord::new(RecordType::Case).with_field("case_num", 1234i64);
        assert_eq!(natural_key(schema, &draft.fields), Some("1234".to_string()));
    }

    #[test]
    fn test_natural_key_person_is_case_insensitive() {
        let registry = SchemaRegistry::nrqz();
        let schema = registry.get(RecordType::Person).unwrap();
        let a = DraftRecord::new(RecordType::Person)
            .with_field("name", "John Smith")
            .with_field("email", "JS@example.org");
        let b = DraftRecord::new(RecordType::Person)
            .with_field("name", " john smith ")
            .with_field("email", "js@example.org");
        assert_eq!(natural_key(schema, &a.fields), natural_key(schema, &b.fields));
    }

    #[test]
    fn test_natural_key_absent() {
        let registry = SchemaRegistry::nrqz();
        let attachment = registry.get(RecordType::Attachment).unwrap();
        let draft = DraftRecord::new(RecordType::Attachment).with_field("file_path", "/a.pdf");
        assert_eq!(natural_key(attachment, &draft.fields), None);

        let person = registry.get(RecordType::Person).unwrap();
        assert_eq!(natural_key(person, &DraftRecord::new(RecordType::Person).fields), None);
    }
}
