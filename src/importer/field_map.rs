// ==========================================
// NRQZ 记录管理系统 - Field Map（字段映射）
// ==========================================
// 职责: 声明 一个或多个逻辑源键（各带表头别名列表）→ 一个或多个目标字段
//       的转换规则,并绑定转换器
// 基数: 由声明推导,不重复声明
//   - 1 源 + 1 目标 + 无转换器 → PassThrough
//   - 1 源 + 1 目标 + 转换器   → OneToOne
//   - N 源 + 1 目标           → ManyToOne（必须有转换器）
//   - 1 源 + N 目标           → OneToMany（必须有转换器）
//   - N 源 + N 目标           → ManyToMany（必须有转换器）
// ==========================================

use crate::domain::import::RawRow;
use crate::domain::record::FieldValues;
use crate::domain::value::FieldValue;
use crate::importer::converters::ConvertFn;
use crate::importer::error::{ConversionError, MappingConfigError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// 逻辑源键 → 原始值（转换器输入）
pub type SourceValues = BTreeMap<String, String>;

/// 表头规范化: TRIM + 合并空白 + 小写
pub fn normalize_header(header: &str) -> String {
    header
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ==========================================
// Converted - 转换器输出
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum Converted {
    Single(FieldValue),
    Many(FieldValues),
}

// ==========================================
// Converter - 可共享的转换函数
// ==========================================
pub type ConverterFn = dyn Fn(&SourceValues) -> Result<Converted, ConversionError> + Send + Sync;

#[derive(Clone)]
pub struct Converter {
    name: String,
    func: Arc<ConverterFn>,
}

impl Converter {
    /// 单值转换器: 取唯一输入,输出单值
    pub fn unary(name: &str, convert: ConvertFn) -> Self {
        let func = move |values: &SourceValues| {
            let raw = values.values().next().map(String::as_str).unwrap_or("");
            convert(raw).map(Converted::Single)
        };
        Self {
            name: name.to_string(),
            func: Arc::new(func),
        }
    }

    /// 组合转换器: 接收全部命名输入
    pub fn composite<F>(name: &str, func: F) -> Self
    where
        F: Fn(&SourceValues) -> Result<Converted, ConversionError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, values: &SourceValues) -> Result<Converted, ConversionError> {
        (self.func)(values)
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter").field("name", &self.name).finish()
    }
}

// ==========================================
// SourceKey - 逻辑源键 + 表头别名
// ==========================================
// 别名按声明顺序匹配; 匹配时 TRIM + 忽略大小写
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceKey {
    pub name: String,
    pub aliases: Vec<String>,
}

impl SourceKey {
    /// 别名为空时以逻辑键名本身作为唯一别名
    pub fn new(name: &str, aliases: &[&str]) -> Self {
        let aliases = if aliases.is_empty() {
            vec![name.to_string()]
        } else {
            aliases.iter().map(|a| a.to_string()).collect()
        };
        Self {
            name: name.to_string(),
            aliases,
        }
    }

    /// 别名在声明中的位置（未匹配 → None）
    pub fn alias_rank(&self, header: &str) -> Option<usize> {
        let normalized = normalize_header(header);
        self.aliases
            .iter()
            .position(|alias| normalize_header(alias) == normalized)
    }

    pub fn matches(&self, header: &str) -> bool {
        self.alias_rank(header).is_some()
    }
}

// ==========================================
// KeyResolution - 单个源键在某行上的解析结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResolution {
    /// 命中; header 为取值表头,matched 为全部命中表头（均视为已消费）
    Found {
        header: String,
        value: String,
        matched: Vec<String>,
    },
    /// 无任何别名出现
    Missing,
    /// 多个别名出现且非空值不一致
    Ambiguous(Vec<String>),
}

// ==========================================
// MapCardinality - 推导出的映射基数
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MapCardinality {
    PassThrough,
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

// ==========================================
// FieldMap
// ==========================================
#[derive(Debug, Clone)]
pub struct FieldMap {
    from_keys: Vec<SourceKey>,
    to_keys: Vec<String>,
    converter: Option<Converter>,
}

impl FieldMap {
    /// 构造并校验
    ///
    /// # 错误
    /// - 源键或目标键为空 → EmptyKeys
    /// - 多源/多目标但无转换器 → ConverterRequired
    pub fn new(
        from_keys: Vec<SourceKey>,
        to_keys: Vec<&str>,
        converter: Option<Converter>,
    ) -> Result<Self, MappingConfigError> {
        let to_keys: Vec<String> = to_keys.into_iter().map(str::to_string).collect();
        let describe = || {
            format!(
                "{:?} -> {:?}",
                from_keys.iter().map(|k| k.name.as_str()).collect::<Vec<_>>(),
                to_keys
            )
        };

        if from_keys.is_empty() || to_keys.is_empty() {
            return Err(MappingConfigError::EmptyKeys(describe()));
        }
        if from_keys.iter().any(|k| k.aliases.is_empty()) {
            return Err(MappingConfigError::EmptyKeys(describe()));
        }
        if converter.is_none() && (from_keys.len() > 1 || to_keys.len() > 1) {
            return Err(MappingConfigError::ConverterRequired {
                name: describe(),
                sources: from_keys.len(),
                targets: to_keys.len(),
            });
        }

        Ok(Self {
            from_keys,
            to_keys,
            converter,
        })
    }

    /// 直通映射: 单源单目标,无转换器
    pub fn pass_through(source: SourceKey, target: &str) -> Result<Self, MappingConfigError> {
        Self::new(vec![source], vec![target], None)
    }

    /// 单源单目标 + 单值转换器
    pub fn one_to_one(
        source: SourceKey,
        target: &str,
        name: &str,
        convert: ConvertFn,
    ) -> Result<Self, MappingConfigError> {
        Self::new(vec![source], vec![target], Some(Converter::unary(name, convert)))
    }

    pub fn from_keys(&self) -> &[SourceKey] {
        &self.from_keys
    }

    pub fn to_keys(&self) -> &[String] {
        &self.to_keys
    }

    pub fn converter(&self) -> Option<&Converter> {
        self.converter.as_ref()
    }

    pub fn cardinality(&self) -> MapCardinality {
        match (self.from_keys.len(), self.to_keys.len(), &self.converter) {
            (1, 1, None) => MapCardinality::PassThrough,
            (1, 1, Some(_)) => MapCardinality::OneToOne,
            (_, 1, _) => MapCardinality::ManyToOne,
            (1, _, _) => MapCardinality::OneToMany,
            _ => MapCardinality::ManyToMany,
        }
    }

    /// 可读名称（日志用）
    pub fn describe(&self) -> String {
        let sources: Vec<&str> = self.from_keys.iter().map(|k| k.name.as_str()).collect();
        format!("{} -> {}", sources.join("+"), self.to_keys.join("+"))
    }

    /// 某表头是否为该映射任一源键的别名
    pub fn claims_header(&self, header: &str) -> bool {
        self.from_keys.iter().any(|k| k.matches(header))
    }

    /// 在一行上解析某源键
    ///
    /// # 规则
    /// - 命中表头按别名声明顺序排列
    /// - 多个命中: 非空值一致（或全部为空）→ 取第一个非空值的表头
    /// - 多个命中且非空值冲突 → Ambiguous
    pub fn resolve_key(key: &SourceKey, row: &RawRow) -> KeyResolution {
        let mut hits: Vec<(usize, &String, &String)> = row
            .iter()
            .filter_map(|(header, value)| key.alias_rank(header).map(|rank| (rank, header, value)))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        if hits.is_empty() {
            return KeyResolution::Missing;
        }

        let matched: Vec<String> = hits.iter().map(|(_, h, _)| (*h).clone()).collect();
        let non_blank: Vec<&(usize, &String, &String)> =
            hits.iter().filter(|(_, _, v)| !v.trim().is_empty()).collect();

        let mut distinct: Vec<&str> = non_blank.iter().map(|(_, _, v)| v.trim()).collect();
        distinct.dedup();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() > 1 {
            return KeyResolution::Ambiguous(matched);
        }

        let (_, header, value) = non_blank.first().copied().unwrap_or(&hits[0]);
        KeyResolution::Found {
            header: (*header).clone(),
            value: (*value).clone(),
            matched,
        }
    }

    /// 执行转换,输出恰好覆盖 to_keys 的字段值
    ///
    /// # 参数
    /// - `values`: 逻辑源键 → 原始值
    /// - `pass_through`: 直通映射使用的转换函数（由 FormMap 按目标字段类型提供）
    ///
    /// # 返回
    /// - Ok: 目标字段 → 值
    /// - Err: 转换失败,或转换器输出缺少某个目标字段
    pub fn convert(
        &self,
        values: &SourceValues,
        pass_through: ConvertFn,
    ) -> Result<FieldValues, ConversionError> {
        let converted = match &self.converter {
            Some(converter) => converter.apply(values)?,
            None => {
                let raw = values.values().next().map(String::as_str).unwrap_or("");
                Converted::Single(pass_through(raw)?)
            }
        };

        let mut out = FieldValues::new();
        match converted {
            Converted::Single(value) => {
                if self.to_keys.len() != 1 {
                    return Err(ConversionError::new(
                        raw_summary(values),
                        format!("转换器返回单值,但声明了 {} 个目标字段", self.to_keys.len()),
                    ));
                }
                out.insert(self.to_keys[0].clone(), value);
            }
            Converted::Many(mut produced) => {
                for key in &self.to_keys {
                    let value = produced.remove(key).ok_or_else(|| {
                        ConversionError::new(raw_summary(values), format!("转换器未输出目标字段 {}", key))
                    })?;
                    out.insert(key.clone(), value);
                }
            }
        }
        Ok(out)
    }
}

fn raw_summary(values: &SourceValues) -> String {
    values
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}
