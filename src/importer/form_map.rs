// ==========================================
// NRQZ 记录管理系统 - Form Map（表单映射）与导入 Profile
// ==========================================
// FormMap: 有序 FieldMap 集合 + 静态默认值 + 必填目标字段,绑定一种记录类型
// ImportProfile: 有序 FormMap（一行可产出多条记录）+ 行内记录关联（RowLink）
// 红线:
// - 所有 to_keys 与默认值字段必须是目标记录类型的可写字段（构造期校验）
// - 声明顺序是契约的一部分: 先声明且源键全部解析成功的 FieldMap 占有目标字段
// - 转换错误按目标字段记录,单元格错误不中断整行
// ==========================================

use crate::domain::import::{FieldError, FieldErrorKind, RawRow};
use crate::domain::record::{DraftRecord, FieldValues};
use crate::domain::schema::{FieldKind, SchemaRegistry};
use crate::domain::types::RecordType;
use crate::domain::value::FieldValue;
use crate::importer::converters;
use crate::importer::error::MappingConfigError;
use crate::importer::field_map::{FieldMap, KeyResolution, SourceValues};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

// ==========================================
// HeaderResolution - 表头归类
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderResolution {
    /// 表头唯一对应一个逻辑源键,列出其目标字段
    Resolved(Vec<String>),
    /// 表头同时是多个逻辑源键的别名
    Ambiguous(Vec<String>),
    Unmapped,
}

// ==========================================
// RenderedRow - 单行渲染结果
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRow {
    pub draft: DraftRecord,
    pub errors: Vec<FieldError>,
    /// 被任一 FieldMap 消费的原始表头
    pub consumed: BTreeSet<String>,
    /// 行中存在但未被消费的原始表头
    pub unmapped: BTreeSet<String>,
    /// 应用默认值之前是否有任何非空字段
    pub populated: bool,
}

impl RenderedRow {
    pub fn has_fatal(&self) -> bool {
        self.errors.iter().any(|e| e.fatal)
    }

    /// 没有任何数据,且错误仅为必填字段缺失（可选 FormMap 据此跳过）
    pub fn is_blank(&self) -> bool {
        !self.populated
            && self
                .errors
                .iter()
                .all(|e| matches!(e.kind, FieldErrorKind::MissingHeader | FieldErrorKind::Validation))
    }
}

// ==========================================
// FormMap
// ==========================================
#[derive(Debug, Clone)]
pub struct FormMap {
    name: String,
    record_type: RecordType,
    field_maps: Vec<FieldMap>,
    defaults: FieldValues,
    mandatory: BTreeSet<String>,
    kinds: BTreeMap<String, FieldKind>,
}

impl FormMap {
    /// 构造并校验目标字段
    ///
    /// # 参数
    /// - `name`: FormMap 名称（审计记录使用）
    /// - `record_type`: 目标记录类型
    /// - `field_maps`: 按声明顺序排列的 FieldMap
    /// - `schema`: Schema 注册表（校验可写字段,收集必填字段）
    ///
    /// # 说明
    /// Schema 中的必填字段自动视为 mandatory
    pub fn new(
        name: &str,
        record_type: RecordType,
        field_maps: Vec<FieldMap>,
        schema: &SchemaRegistry,
    ) -> Result<Self, MappingConfigError> {
        let record_schema = schema
            .get(record_type)
            .ok_or_else(|| MappingConfigError::UnknownRecordType(record_type.to_string()))?;

        for map in &field_maps {
            for key in map.to_keys() {
                if !record_schema.is_writable(key) {
                    return Err(MappingConfigError::NotWritable {
                        form: name.to_string(),
                        field: key.clone(),
                        record_type: record_type.to_string(),
                    });
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            record_type,
            field_maps,
            defaults: FieldValues::new(),
            mandatory: record_schema.required_fields().map(|f| f.name.clone()).collect(),
            kinds: record_schema
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.kind))
                .collect(),
        })
    }

    /// 追加静态默认值
    pub fn with_default(
        mut self,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> Result<Self, MappingConfigError> {
        self.check_writable(field)?;
        self.defaults.insert(field.to_string(), value.into());
        Ok(self)
    }

    /// 追加必填目标字段
    pub fn with_mandatory(mut self, fields: &[&str]) -> Result<Self, MappingConfigError> {
        for field in fields {
            self.check_writable(field)?;
            self.mandatory.insert(field.to_string());
        }
        Ok(self)
    }

    fn check_writable(&self, field: &str) -> Result<(), MappingConfigError> {
        if self.kinds.contains_key(field) {
            Ok(())
        } else {
            Err(MappingConfigError::NotWritable {
                form: self.name.clone(),
                field: field.to_string(),
                record_type: self.record_type.to_string(),
            })
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn field_maps(&self) -> &[FieldMap] {
        &self.field_maps
    }

    pub fn defaults(&self) -> &FieldValues {
        &self.defaults
    }

    pub fn is_mandatory(&self, field: &str) -> bool {
        self.mandatory.contains(field)
    }

    /// 归类单个表头
    pub fn resolve_header(&self, header: &str) -> HeaderResolution {
        let mut source_names: BTreeSet<&str> = BTreeSet::new();
        let mut targets: Vec<String> = Vec::new();

        for map in &self.field_maps {
            for key in map.from_keys() {
                if key.matches(header) {
                    source_names.insert(key.name.as_str());
                    for target in map.to_keys() {
                        if !targets.contains(target) {
                            targets.push(target.clone());
                        }
                    }
                }
            }
        }

        match source_names.len() {
            0 => HeaderResolution::Unmapped,
            1 => HeaderResolution::Resolved(targets),
            _ => HeaderResolution::Ambiguous(source_names.into_iter().map(str::to_string).collect()),
        }
    }

    /// 渲染一行
    ///
    /// # 流程
    /// 1. 按声明顺序处理 FieldMap; 任一源键无匹配表头 → 跳过该 FieldMap
    /// 2. 源键匹配到多个取值冲突的表头 → AmbiguousHeader（目标必填时致命）
    /// 3. 源键全部解析 → 该 FieldMap 占有尚未被占有的目标字段,执行转换
    /// 4. 转换失败 → 按目标字段记录 Conversion 错误（目标必填时致命）
    /// 5. 对缺失（或为 Null）的字段应用默认值
    /// 6. 必填字段仍为空 → MissingHeader / Validation 致命错误
    pub fn render(&self, row: &RawRow) -> RenderedRow {
        let mut fields = FieldValues::new();
        let mut claimed: BTreeSet<String> = BTreeSet::new();
        let mut consumed: BTreeSet<String> = BTreeSet::new();
        let mut errors: Vec<FieldError> = Vec::new();
        let mut header_present: BTreeSet<String> = BTreeSet::new();

        for map in &self.field_maps {
            let mut values = SourceValues::new();
            let mut skipped = false;

            for key in map.from_keys() {
                match FieldMap::resolve_key(key, row) {
                    KeyResolution::Found {
                        value, matched, ..
                    } => {
                        consumed.extend(matched);
                        values.insert(key.name.clone(), value);
                    }
                    KeyResolution::Missing => {
                        skipped = true;
                    }
                    KeyResolution::Ambiguous(headers) => {
                        consumed.extend(headers.iter().cloned());
                        for target in map.to_keys() {
                            if claimed.contains(target) {
                                continue;
                            }
                            let mut error = FieldError::new(
                                target,
                                FieldErrorKind::AmbiguousHeader,
                                format!("源键 {} 匹配到多个取值冲突的表头: {:?}", key.name, headers),
                            );
                            if self.is_mandatory(target) {
                                error = error.fatal();
                            }
                            errors.push(error);
                            // 目标仍归先声明的 FieldMap,后续 FieldMap 不能补位
                            claimed.insert(target.clone());
                        }
                        skipped = true;
                    }
                }
            }

            if skipped {
                trace!(form_map = %self.name, field_map = %map.describe(), "FieldMap 跳过");
                continue;
            }

            let open_targets: Vec<&String> =
                map.to_keys().iter().filter(|t| !claimed.contains(*t)).collect();
            if open_targets.is_empty() {
                // 目标已被先声明的 FieldMap 占有
                continue;
            }
            for target in &open_targets {
                claimed.insert((*target).clone());
                header_present.insert((*target).clone());
            }

            let pass_through = map
                .to_keys()
                .first()
                .and_then(|t| self.kinds.get(t))
                .map(|kind| converters::for_kind(*kind))
                .unwrap_or(converters::coerce_text);

            match map.convert(&values, pass_through) {
                Ok(output) => {
                    for (target, value) in output {
                        if open_targets.contains(&&target) {
                            self.check_kind(&target, &value, &mut errors);
                            fields.insert(target, value);
                        }
                    }
                }
                Err(err) => {
                    for target in open_targets {
                        let mut error = FieldError::new(
                            target,
                            FieldErrorKind::Conversion,
                            err.reason.clone(),
                        )
                        .with_raw(err.raw.clone());
                        if self.is_mandatory(target) {
                            error = error.fatal();
                        }
                        errors.push(error);
                    }
                }
            }
        }

        let populated = fields.values().any(|v| !v.is_blank());

        for (field, default) in &self.defaults {
            let absent = fields.get(field).map(FieldValue::is_blank).unwrap_or(true);
            if absent {
                fields.insert(field.clone(), default.clone());
            }
        }

        for field in &self.mandatory {
            let blank = fields.get(field).map(FieldValue::is_blank).unwrap_or(true);
            let already_reported = errors.iter().any(|e| &e.field == field);
            if !blank || already_reported {
                continue;
            }
            let error = if header_present.contains(field) {
                FieldError::new(field, FieldErrorKind::Validation, "必填字段为空")
            } else {
                FieldError::new(field, FieldErrorKind::MissingHeader, "必填字段没有匹配的表头")
            };
            errors.push(error.fatal());
        }

        let unmapped: BTreeSet<String> = row
            .keys()
            .filter(|h| !h.trim().is_empty() && !consumed.contains(*h))
            .cloned()
            .collect();

        RenderedRow {
            draft: DraftRecord {
                record_type: self.record_type,
                fields,
            },
            errors,
            consumed,
            unmapped,
            populated,
        }
    }

    fn check_kind(&self, field: &str, value: &FieldValue, errors: &mut Vec<FieldError>) {
        if let Some(kind) = self.kinds.get(field) {
            if !value.matches_kind(*kind) {
                let mut error = FieldError::new(
                    field,
                    FieldErrorKind::Mapping,
                    format!("转换结果类型与字段类型 {:?} 不符", kind),
                )
                .with_raw(value.to_raw_string());
                if self.is_mandatory(field) {
                    error = error.fatal();
                }
                errors.push(error);
            }
        }
    }
}

// ==========================================
// RowLink - 同一行产出的记录之间的关联
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowLink {
    pub relation: String,
    pub from_form: String,
    pub to_form: String,
}

// ==========================================
// ProfileEntry - Profile 中的一个 FormMap
// ==========================================
#[derive(Debug, Clone)]
pub struct ProfileEntry {
    pub form_map: FormMap,
    /// 可选: 该行渲染为空时不产生尝试
    pub optional: bool,
}

// ==========================================
// HeaderReport - 文件表头归类汇总
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderReport {
    pub total: usize,
    pub unmapped: Vec<String>,
    pub ambiguous: Vec<String>,
}

impl HeaderReport {
    /// 未识别表头比例（无表头 → 0）
    pub fn unmapped_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.unmapped.len() as f64 / self.total as f64
        }
    }
}

// ==========================================
// ImportProfile
// ==========================================
#[derive(Debug, Clone)]
pub struct ImportProfile {
    name: String,
    entries: Vec<ProfileEntry>,
    links: Vec<RowLink>,
}

impl ImportProfile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
            links: Vec::new(),
        }
    }

    /// 追加必须产出记录的 FormMap
    pub fn with_form(self, form_map: FormMap) -> Result<Self, MappingConfigError> {
        self.push_entry(form_map, false)
    }

    /// 追加可选 FormMap（行内无对应数据时跳过）
    pub fn with_optional_form(self, form_map: FormMap) -> Result<Self, MappingConfigError> {
        self.push_entry(form_map, true)
    }

    fn push_entry(mut self, form_map: FormMap, optional: bool) -> Result<Self, MappingConfigError> {
        if self.form_map(form_map.name()).is_some() {
            return Err(MappingConfigError::DuplicateFormMap(form_map.name().to_string()));
        }
        self.entries.push(ProfileEntry { form_map, optional });
        Ok(self)
    }

    /// 追加行内关联,校验关系存在且两端类型匹配
    pub fn with_link(
        mut self,
        relation: &str,
        from_form: &str,
        to_form: &str,
        schema: &SchemaRegistry,
    ) -> Result<Self, MappingConfigError> {
        let spec = schema
            .relation(relation)
            .ok_or_else(|| MappingConfigError::UnknownRelation(relation.to_string()))?;
        let from = self
            .form_map(from_form)
            .ok_or_else(|| MappingConfigError::UnknownFormMap(from_form.to_string()))?;
        let to = self
            .form_map(to_form)
            .ok_or_else(|| MappingConfigError::UnknownFormMap(to_form.to_string()))?;

        if from.record_type() != spec.from_type || to.record_type() != spec.to_type {
            return Err(MappingConfigError::UnknownRelation(format!(
                "{} 不连接 {} → {}",
                relation,
                from.record_type(),
                to.record_type()
            )));
        }

        self.links.push(RowLink {
            relation: relation.to_string(),
            from_form: from_form.to_string(),
            to_form: to_form.to_string(),
        });
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[ProfileEntry] {
        &self.entries
    }

    pub fn links(&self) -> &[RowLink] {
        &self.links
    }

    pub fn form_map(&self, name: &str) -> Option<&FormMap> {
        self.entries
            .iter()
            .map(|e| &e.form_map)
            .find(|f| f.name() == name)
    }

    /// 在全部 FormMap 上归类表头
    ///
    /// 任一 FormMap 判定为 Ambiguous → Ambiguous; 否则合并各 FormMap 的目标字段
    pub fn resolve_header(&self, header: &str) -> HeaderResolution {
        let mut targets: Vec<String> = Vec::new();
        for entry in &self.entries {
            match entry.form_map.resolve_header(header) {
                HeaderResolution::Ambiguous(candidates) => {
                    return HeaderResolution::Ambiguous(candidates);
                }
                HeaderResolution::Resolved(found) => {
                    for target in found {
                        let qualified = format!("{}.{}", entry.form_map.name(), target);
                        if !targets.contains(&qualified) {
                            targets.push(qualified);
                        }
                    }
                }
                HeaderResolution::Unmapped => {}
            }
        }
        if targets.is_empty() {
            HeaderResolution::Unmapped
        } else {
            HeaderResolution::Resolved(targets)
        }
    }

    /// 归类文件全部表头（空白表头不计入）
    pub fn classify_headers(&self, headers: &[String]) -> HeaderReport {
        let mut report = HeaderReport::default();
        for header in headers.iter().filter(|h| !h.trim().is_empty()) {
            report.total += 1;
            match self.resolve_header(header) {
                HeaderResolution::Unmapped => report.unmapped.push(header.clone()),
                HeaderResolution::Ambiguous(_) => report.ambiguous.push(header.clone()),
                HeaderResolution::Resolved(_) => {}
            }
        }
        report
    }
}
