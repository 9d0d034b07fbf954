// ==========================================
// NRQZ 记录管理系统 - 记录与关系 Schema
// ==========================================
// 职责: 每种记录类型的可写字段、字段类型、必填项、自然键;
//       以及记录之间的具名关系及其基数
// 用途: FormMap 构造校验 / 持久化校验 / 合并引擎关系迁移
// ==========================================

use crate::domain::types::{Cardinality, RecordType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// FieldKind - 字段类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Bool,
    Date,
    DateTime,
}

// ==========================================
// FieldSpec - 字段定义
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

// ==========================================
// RecordSchema - 单个记录类型的 Schema
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSchema {
    pub record_type: RecordType,
    pub fields: Vec<FieldSpec>,
    /// 自然键字段（为空表示无唯一性约束）
    pub natural_key: Vec<String>,
}

impl RecordSchema {
    pub fn new(record_type: RecordType, fields: Vec<FieldSpec>, natural_key: &[&str]) -> Self {
        Self {
            record_type,
            fields,
            natural_key: natural_key.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_writable(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }
}

// ==========================================
// RelationSpec - 具名类型化关系
// ==========================================
// from_type 持有指向 to_type 的链接,存储于 relation_link 表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSpec {
    pub name: String,
    pub from_type: RecordType,
    pub to_type: RecordType,
    pub cardinality: Cardinality,
}

impl RelationSpec {
    pub fn new(name: &str, from_type: RecordType, to_type: RecordType, cardinality: Cardinality) -> Self {
        Self {
            name: name.to_string(),
            from_type,
            to_type,
            cardinality,
        }
    }
}

// ==========================================
// SchemaRegistry - 不可变 Schema 注册表
// ==========================================
// 构造一次,显式传入管道入口（不使用全局状态）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRegistry {
    records: BTreeMap<RecordType, RecordSchema>,
    relations: Vec<RelationSpec>,
}

impl SchemaRegistry {
    pub fn new(records: Vec<RecordSchema>, relations: Vec<RelationSpec>) -> Self {
        Self {
            records: records.into_iter().map(|s| (s.record_type, s)).collect(),
            relations,
        }
    }

    pub fn get(&self, record_type: RecordType) -> Option<&RecordSchema> {
        self.records.get(&record_type)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn relations(&self) -> &[RelationSpec] {
        &self.relations
    }

    /// 与某记录类型相关的全部关系（作为 from 或 to）
    pub fn relations_touching(&self, record_type: RecordType) -> Vec<&RelationSpec> {
        self.relations
            .iter()
            .filter(|r| r.from_type == record_type || r.to_type == record_type)
            .collect()
    }

    /// NRQZ 数据集的默认 Schema
    pub fn nrqz() -> Self {
        use FieldKind::*;

        let case = RecordSchema::new(
            RecordType::Case,
            vec![
                FieldSpec::new("case_num", Integer).required(),
                FieldSpec::new("name", Text),
                FieldSpec::new("comments", Text),
                FieldSpec::new("status", Text),
                FieldSpec::new("date_received", Date),
                FieldSpec::new("date_completed", Date),
                FieldSpec::new("completed", Bool),
                FieldSpec::new("is_federal", Bool),
                FieldSpec::new("agency_num", Text),
                FieldSpec::new("latitude", Float),
                FieldSpec::new("longitude", Float),
                FieldSpec::new("freq_low", Float),
                FieldSpec::new("freq_high", Float),
                FieldSpec::new("bandwidth", Float),
                FieldSpec::new("applicant_name", Text),
                FieldSpec::new("data_source", Text),
            ],
            &["case_num"],
        );

        let prelim = RecordSchema::new(
            RecordType::PreliminaryCase,
            vec![
                FieldSpec::new("case_num", Integer).required(),
                FieldSpec::new("name", Text),
                FieldSpec::new("comments", Text),
                FieldSpec::new("date_received", Date),
                FieldSpec::new("latitude", Float),
                FieldSpec::new("longitude", Float),
                FieldSpec::new("applicant_name", Text),
                FieldSpec::new("data_source", Text),
            ],
            &["case_num"],
        );

        let person = RecordSchema::new(
            RecordType::Person,
            vec![
                FieldSpec::new("name", Text).required(),
                FieldSpec::new("first_name", Text),
                FieldSpec::new("last_name", Text),
                FieldSpec::new("email", Text),
                FieldSpec::new("phone", Text),
                FieldSpec::new("fax", Text),
                FieldSpec::new("street", Text),
                FieldSpec::new("city", Text),
                FieldSpec::new("state", Text),
                FieldSpec::new("zipcode", Text),
                FieldSpec::new("comments", Text),
                FieldSpec::new("data_source", Text),
            ],
            &["name", "email"],
        );

        let facility = RecordSchema::new(
            RecordType::Facility,
            vec![
                FieldSpec::new("case_num", Integer).required(),
                FieldSpec::new("site_name", Text).required(),
                FieldSpec::new("latitude", Float),
                FieldSpec::new("longitude", Float),
                FieldSpec::new("amsl", Float),
                FieldSpec::new("agl", Float),
                FieldSpec::new("freq_low", Float),
                FieldSpec::new("freq_high", Float),
                FieldSpec::new("bandwidth", Float),
                FieldSpec::new("comments", Text),
                FieldSpec::new("data_source", Text),
            ],
            &["case_num", "site_name"],
        );

        let attachment = RecordSchema::new(
            RecordType::Attachment,
            vec![
                FieldSpec::new("file_path", Text).required(),
                FieldSpec::new("original_filename", Text),
                FieldSpec::new("comments", Text),
            ],
            &[],
        );

        let relations = vec![
            RelationSpec::new("case.applicant", RecordType::Case, RecordType::Person, Cardinality::ManyToOne),
            RelationSpec::new("case.contacts", RecordType::Case, RecordType::Person, Cardinality::ManyToMany),
            RelationSpec::new("case.attachments", RecordType::Case, RecordType::Attachment, Cardinality::ManyToMany),
            RelationSpec::new("facility.case", RecordType::Facility, RecordType::Case, Cardinality::ManyToOne),
            RelationSpec::new(
                "prelim.converted_case",
                RecordType::PreliminaryCase,
                RecordType::Case,
                Cardinality::OneToOne,
            ),
            RelationSpec::new("person.signature", RecordType::Person, RecordType::Attachment, Cardinality::OneToOne),
        ];

        SchemaRegistry::new(vec![case, prelim, person, facility, attachment], relations)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::nrqz()
    }
}
