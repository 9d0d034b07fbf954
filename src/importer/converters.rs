// ==========================================
// NRQZ 记录管理系统 - 转换器库
// ==========================================
// 职责: 将单个原始单元格（或少量命名单元格）转换为类型化值
// 约束:
// - 每个转换器都识别空值哨兵（"", "N/A", "none" ...）并返回 Null
// - 对自身的规范输出再次转换必须成功且得到相等的值
// - 组合转换器接收命名输入,返回单值或 目标键→值 映射
// ==========================================

use crate::domain::record::FieldValues;
use crate::domain::schema::FieldKind;
use crate::domain::value::FieldValue;
use crate::importer::error::ConversionError;
use crate::importer::field_map::{Converted, SourceValues};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::OnceLock;

/// 单值转换器签名
pub type ConvertFn = fn(&str) -> Result<FieldValue, ConversionError>;

/// 空值哨兵（比较前 trim + 小写）
pub const NULL_SENTINELS: &[&str] = &[
    "", "n/a", "na", "n.a.", "none", "null", "nil", "-", "--", "?", "unknown", "tbd",
];

/// 是否为空值哨兵
pub fn is_null_sentinel(raw: &str) -> bool {
    let normalized = raw.trim().to_lowercase();
    NULL_SENTINELS.contains(&normalized.as_str())
}

// ==========================================
// 文本类
// ==========================================

/// 文本: TRIM + 合并内部空白
pub fn coerce_text(raw: &str) -> Result<FieldValue, ConversionError> {
    if is_null_sentinel(raw) {
        return Ok(FieldValue::Null);
    }
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(FieldValue::Text(collapsed))
}

/// 文本: TRIM + UPPER
pub fn coerce_upper(raw: &str) -> Result<FieldValue, ConversionError> {
    match coerce_text(raw)? {
        FieldValue::Text(s) => Ok(FieldValue::Text(s.to_uppercase())),
        other => Ok(other),
    }
}

/// 邮箱: 小写,去掉 mailto: 前缀
pub fn coerce_email(raw: &str) -> Result<FieldValue, ConversionError> {
    if is_null_sentinel(raw) {
        return Ok(FieldValue::Null);
    }
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .strip_prefix("mailto:")
        .or_else(|| trimmed.strip_prefix("MAILTO:"))
        .unwrap_or(trimmed);
    let email = without_scheme.trim().to_lowercase();

    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(l), Some(d), None) => (l, d),
        _ => return Err(ConversionError::new(raw, "邮箱必须且只能包含一个 @")),
    };
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || email.contains(' ') {
        return Err(ConversionError::new(raw, "邮箱格式无效"));
    }
    Ok(FieldValue::Text(email))
}

/// 电话: 只保留数字,10 位号码格式化为 ddd-ddd-dddd,保留分机号
pub fn coerce_phone(raw: &str) -> Result<FieldValue, ConversionError> {
    if is_null_sentinel(raw) {
        return Ok(FieldValue::Null);
    }
    let lower = raw.to_lowercase();
    let (main, extension) = match lower.find(['x', 'e']) {
        Some(idx) => (&lower[..idx], Some(&lower[idx..])),
        None => (lower.as_str(), None),
    };

    let mut digits: String = main.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits.remove(0);
    }
    if digits.len() < 7 || digits.len() > 15 {
        return Err(ConversionError::new(raw, "电话号码位数无效"));
    }

    let mut formatted = if digits.len() == 10 {
        format!("{}-{}-{}", &digits[0..3], &digits[3..6], &digits[6..])
    } else {
        digits
    };

    if let Some(ext) = extension {
        let ext_digits: String = ext.chars().filter(|c| c.is_ascii_digit()).collect();
        if !ext_digits.is_empty() {
            formatted.push_str(" x");
            formatted.push_str(&ext_digits);
        }
    }
    Ok(FieldValue::Text(formatted))
}

// ==========================================
// 数值类
// ==========================================

fn strip_number(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect()
}

/// 整数: 支持千分位 / "12.0"
pub fn coerce_int(raw: &str) -> Result<FieldValue, ConversionError> {
    if is_null_sentinel(raw) {
        return Ok(FieldValue::Null);
    }
    let cleaned = strip_number(raw);
    if let Ok(i) = cleaned.parse::<i64>() {
        return Ok(FieldValue::Integer(i));
    }
    match cleaned.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            Ok(FieldValue::Integer(f as i64))
        }
        _ => Err(ConversionError::new(raw, "无法解析为整数")),
    }
}

/// 正整数（> 0）
pub fn coerce_positive_int(raw: &str) -> Result<FieldValue, ConversionError> {
    match coerce_int(raw)? {
        FieldValue::Integer(i) if i <= 0 => Err(ConversionError::new(raw, "必须为正整数")),
        other => Ok(other),
    }
}

/// 浮点数
pub fn coerce_float(raw: &str) -> Result<FieldValue, ConversionError> {
    if is_null_sentinel(raw) {
        return Ok(FieldValue::Null);
    }
    match strip_number(raw).parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(FieldValue::Float(f)),
        _ => Err(ConversionError::new(raw, "无法解析为浮点数")),
    }
}

/// 频率（统一为 MHz）: "1.5 GHz" / "100kHz" / "915" / "915 MHz"
pub fn coerce_frequency_mhz(raw: &str) -> Result<FieldValue, ConversionError> {
    if is_null_sentinel(raw) {
        return Ok(FieldValue::Null);
    }
    static FREQ: OnceLock<Regex> = OnceLock::new();
    let re = FREQ.get_or_init(|| {
        Regex::new(r"(?i)^\s*([0-9][0-9,]*(?:\.[0-9]+)?|\.[0-9]+)\s*(ghz|mhz|khz|hz)?\s*$")
            .expect("频率正则无效")
    });

    let caps = re
        .captures(raw)
        .ok_or_else(|| ConversionError::new(raw, "无法解析频率"))?;
    let number: f64 = strip_number(&caps[1])
        .parse()
        .map_err(|_| ConversionError::new(raw, "无法解析频率数值"))?;
    let unit = caps.get(2).map(|m| m.as_str().to_lowercase());
    let mhz = match unit.as_deref() {
        Some("ghz") => number * 1_000.0,
        Some("khz") => number / 1_000.0,
        Some("hz") => number / 1_000_000.0,
        _ => number,
    };
    Ok(FieldValue::Float(mhz))
}

// ==========================================
// 布尔类
// ==========================================

/// 布尔: y/yes/true/t/1/x/checked ↔ n/no/false/f/0/unchecked
pub fn coerce_bool(raw: &str) -> Result<FieldValue, ConversionError> {
    if is_null_sentinel(raw) {
        return Ok(FieldValue::Null);
    }
    match raw.trim().to_lowercase().as_str() {
        "y" | "yes" | "true" | "t" | "1" | "x" | "checked" | "on" => Ok(FieldValue::Bool(true)),
        "n" | "no" | "false" | "f" | "0" | "unchecked" | "off" => Ok(FieldValue::Bool(false)),
        _ => Err(ConversionError::new(raw, "无法解析为布尔值")),
    }
}

// ==========================================
// 日期时间类
// ==========================================

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%Y%m%d", "%d-%b-%Y", "%d-%b-%y", "%b %d, %Y", "%B %d, %Y",
    "%Y/%m/%d",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %H:%M",
    "%Y%m%d%H%M%S",
];

/// chrono 的 %Y 也接受 1~3 位年份; 四位年份格式只认 ≥ 1000 的结果,两位年份交给 %y
fn plausible_year(format: &str, year: i32) -> bool {
    !format.contains("%Y") || year >= 1000
}

fn parse_date(trimmed: &str, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(trimmed, format)
        .ok()
        .filter(|d| plausible_year(format, d.year()))
}

fn parse_datetime(trimmed: &str, format: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(trimmed, format)
        .ok()
        .filter(|dt| plausible_year(format, dt.year()))
}

/// Excel 序列日期（1899-12-30 起算）
fn excel_serial_date(raw: &str) -> Option<NaiveDate> {
    let serial: f64 = raw.trim().parse().ok()?;
    if !(20_000.0..=80_000.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// 日期: ISO / 美式 / YYYYMMDD / 12-Mar-2019 / Excel 序列日期
pub fn coerce_date(raw: &str) -> Result<FieldValue, ConversionError> {
    if is_null_sentinel(raw) {
        return Ok(FieldValue::Null);
    }
    let trimmed = raw.trim();
    for format in DATE_FORMATS {
        if let Some(date) = parse_date(trimmed, format) {
            return Ok(FieldValue::Date(date));
        }
    }
    for format in DATETIME_FORMATS {
        if let Some(dt) = parse_datetime(trimmed, format) {
            return Ok(FieldValue::Date(dt.date()));
        }
    }
    if let Some(date) = excel_serial_date(trimmed) {
        return Ok(FieldValue::Date(date));
    }
    Err(ConversionError::new(raw, "无法解析为日期"))
}

/// 日期时间（仅有日期时取午夜）
pub fn coerce_datetime(raw: &str) -> Result<FieldValue, ConversionError> {
    if is_null_sentinel(raw) {
        return Ok(FieldValue::Null);
    }
    let trimmed = raw.trim();
    for format in DATETIME_FORMATS {
        if let Some(dt) = parse_datetime(trimmed, format) {
            return Ok(FieldValue::DateTime(dt));
        }
    }
    match coerce_date(trimmed) {
        Ok(FieldValue::Date(date)) => date
            .and_hms_opt(0, 0, 0)
            .map(FieldValue::DateTime)
            .ok_or_else(|| ConversionError::new(raw, "无法构造日期时间")),
        _ => Err(ConversionError::new(raw, "无法解析为日期时间")),
    }
}

// ==========================================
// 案件号类
// ==========================================

/// NRQZ 案件号: "NRQZ#1234" / "NRQZ ID 1234" / "1234" / "1234.0"
pub fn coerce_case_num(raw: &str) -> Result<FieldValue, ConversionError> {
    if is_null_sentinel(raw) {
        return Ok(FieldValue::Null);
    }
    static CASE_NUM: OnceLock<Regex> = OnceLock::new();
    let re = CASE_NUM.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:nrqz)?\s*(?:id)?\s*#?\s*(\d+)(?:\.0+)?\s*$").expect("案件号正则无效")
    });
    let caps = re
        .captures(raw)
        .ok_or_else(|| ConversionError::new(raw, "无法解析 NRQZ 案件号"))?;
    let num: i64 = caps[1]
        .parse()
        .map_err(|_| ConversionError::new(raw, "案件号超出范围"))?;
    if num <= 0 {
        return Err(ConversionError::new(raw, "案件号必须为正数"));
    }
    Ok(FieldValue::Integer(num))
}

/// 预备案件号: "P1234" / "NRQZ#P-1234" / "1234"
pub fn coerce_prelim_case_num(raw: &str) -> Result<FieldValue, ConversionError> {
    if is_null_sentinel(raw) {
        return Ok(FieldValue::Null);
    }
    static PRELIM_NUM: OnceLock<Regex> = OnceLock::new();
    let re = PRELIM_NUM.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:nrqz)?\s*(?:id)?\s*#?\s*(?:p-?\s*)?(\d+)(?:\.0+)?\s*$")
            .expect("预备案件号正则无效")
    });
    let caps = re
        .captures(raw)
        .ok_or_else(|| ConversionError::new(raw, "无法解析预备案件号"))?;
    let num: i64 = caps[1]
        .parse()
        .map_err(|_| ConversionError::new(raw, "预备案件号超出范围"))?;
    if num <= 0 {
        return Err(ConversionError::new(raw, "预备案件号必须为正数"));
    }
    Ok(FieldValue::Integer(num))
}

// ==========================================
// 坐标类
// ==========================================

/// 解析十进制度或度分秒（带半球标记）
///
/// 例: "38.4333" / "-79.8" / "38 25 59.9" / "38°25'59.9\"N" / "79-50-12 W"
fn parse_coordinate(raw: &str) -> Result<f64, ConversionError> {
    static NUMBERS: OnceLock<Regex> = OnceLock::new();
    let numbers_re =
        NUMBERS.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").expect("坐标正则无效"));

    let trimmed = raw.trim();
    let upper = trimmed.to_uppercase();
    let hemisphere_negative = upper.starts_with('S')
        || upper.starts_with('W')
        || upper.ends_with('S')
        || upper.ends_with('W');
    let has_hemisphere = hemisphere_negative
        || upper.starts_with('N')
        || upper.starts_with('E')
        || upper.ends_with('N')
        || upper.ends_with('E');
    let sign_negative = trimmed.starts_with('-');

    let letters_ok = upper
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .all(|c| matches!(c, 'N' | 'S' | 'E' | 'W'));
    if !letters_ok {
        return Err(ConversionError::new(raw, "坐标包含非法字符"));
    }

    let parts: Vec<f64> = numbers_re
        .find_iter(trimmed)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();

    let magnitude = match parts.as_slice() {
        [deg] => *deg,
        [deg, min] => {
            if *min >= 60.0 {
                return Err(ConversionError::new(raw, "分必须小于 60"));
            }
            deg + min / 60.0
        }
        [deg, min, sec] => {
            if *min >= 60.0 || *sec >= 60.0 {
                return Err(ConversionError::new(raw, "分/秒必须小于 60"));
            }
            deg + min / 60.0 + sec / 3600.0
        }
        _ => return Err(ConversionError::new(raw, "无法解析坐标")),
    };

    if has_hemisphere && sign_negative {
        return Err(ConversionError::new(raw, "坐标同时包含负号和半球标记"));
    }

    let value = if hemisphere_negative || sign_negative {
        -magnitude
    } else {
        magnitude
    };
    Ok(value)
}

/// 坐标（±180 以内）
pub fn coerce_coordinate(raw: &str) -> Result<FieldValue, ConversionError> {
    if is_null_sentinel(raw) {
        return Ok(FieldValue::Null);
    }
    let value = parse_coordinate(raw)?;
    if value.abs() > 180.0 {
        return Err(ConversionError::new(raw, "坐标超出 ±180 范围"));
    }
    Ok(FieldValue::Float(value))
}

/// 纬度（±90 以内）
pub fn coerce_latitude(raw: &str) -> Result<FieldValue, ConversionError> {
    match coerce_coordinate(raw)? {
        FieldValue::Float(v) if v.abs() > 90.0 => {
            Err(ConversionError::new(raw, "纬度超出 ±90 范围"))
        }
        other => Ok(other),
    }
}

/// 经度（±180 以内）
pub fn coerce_longitude(raw: &str) -> Result<FieldValue, ConversionError> {
    coerce_coordinate(raw)
}

/// 按字段类型选择默认转换器（直通映射使用）
pub fn for_kind(kind: FieldKind) -> ConvertFn {
    match kind {
        FieldKind::Text => coerce_text,
        FieldKind::Integer => coerce_int,
        FieldKind::Float => coerce_float,
        FieldKind::Bool => coerce_bool,
        FieldKind::Date => coerce_date,
        FieldKind::DateTime => coerce_datetime,
    }
}

// ==========================================
// 组合转换器
// ==========================================

fn source<'a>(values: &'a SourceValues, key: &str) -> Result<&'a str, ConversionError> {
    values
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ConversionError::new("", format!("缺少输入 {}", key)))
}

/// 经纬度组合: {latitude, longitude} → {latitude, longitude}
pub fn lat_long(values: &SourceValues) -> Result<Converted, ConversionError> {
    let lat = coerce_latitude(source(values, "latitude")?)?;
    let lon = coerce_longitude(source(values, "longitude")?)?;

    if lat.is_blank() != lon.is_blank() {
        let raw = format!("{:?}/{:?}", values.get("latitude"), values.get("longitude"));
        return Err(ConversionError::new(raw, "经纬度必须同时提供"));
    }

    let mut out = FieldValues::new();
    out.insert("latitude".to_string(), lat);
    out.insert("longitude".to_string(), lon);
    Ok(Converted::Many(out))
}

/// 频率范围: {freq_low, bandwidth} → {freq_low, bandwidth, freq_high}
pub fn frequency_range(values: &SourceValues) -> Result<Converted, ConversionError> {
    let low = coerce_frequency_mhz(source(values, "freq_low")?)?;
    let bandwidth = coerce_frequency_mhz(source(values, "bandwidth")?)?;

    if let FieldValue::Float(bw) = bandwidth {
        if bw < 0.0 {
            return Err(ConversionError::new(
                source(values, "bandwidth")?,
                "带宽不能为负",
            ));
        }
    }

    let high = match (&low, &bandwidth) {
        (FieldValue::Float(l), FieldValue::Float(bw)) => FieldValue::Float(l + bw),
        _ => FieldValue::Null,
    };

    let mut out = FieldValues::new();
    out.insert("freq_low".to_string(), low);
    out.insert("bandwidth".to_string(), bandwidth);
    out.insert("freq_high".to_string(), high);
    Ok(Converted::Many(out))
}

/// 姓名拼接: {first_name, last_name} → "First Last"
pub fn full_name(values: &SourceValues) -> Result<Converted, ConversionError> {
    let first = coerce_text(source(values, "first_name")?)?;
    let last = coerce_text(source(values, "last_name")?)?;
    let parts: Vec<String> = [first, last]
        .iter()
        .filter(|v| !v.is_blank())
        .map(|v| v.to_raw_string())
        .collect();
    if parts.is_empty() {
        Ok(Converted::Single(FieldValue::Null))
    } else {
        Ok(Converted::Single(FieldValue::Text(parts.join(" "))))
    }
}

/// 姓名拆分: "Smith, John" / "John Q. Smith" → {first_name, last_name}
pub fn split_name(values: &SourceValues) -> Result<Converted, ConversionError> {
    let raw = source(values, "name")?;
    let mut out = FieldValues::new();

    let (first, last) = match coerce_text(raw)? {
        FieldValue::Text(name) => {
            if let Some((last, first)) = name.split_once(',') {
                (first.trim().to_string(), last.trim().to_string())
            } else {
                let tokens: Vec<&str> = name.split(' ').collect();
                match tokens.as_slice() {
                    [single] => (String::new(), single.to_string()),
                    [first, .., last] => (first.to_string(), last.to_string()),
                    [] => (String::new(), String::new()),
                }
            }
        }
        _ => (String::new(), String::new()),
    };

    let to_value = |s: String| {
        if s.is_empty() {
            FieldValue::Null
        } else {
            FieldValue::Text(s)
        }
    };
    out.insert("first_name".to_string(), to_value(first));
    out.insert("last_name".to_string(), to_value(last));
    Ok(Converted::Many(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> SourceValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// 对自身规范输出再次转换,结果不变
    fn assert_idempotent(convert: ConvertFn, raw: &str) {
        let first = convert(raw).unwrap();
        let second = convert(&first.to_raw_string()).unwrap();
        assert_eq!(first, second, "转换器对 {:?} 不幂等", raw);
    }

    #[test]
    fn test_null_sentinels_return_null() {
        let converters: &[ConvertFn] = &[
            coerce_text,
            coerce_upper,
            coerce_int,
            coerce_float,
            coerce_bool,
            coerce_date,
            coerce_datetime,
            coerce_case_num,
            coerce_prelim_case_num,
            coerce_coordinate,
            coerce_frequency_mhz,
            coerce_email,
            coerce_phone,
        ];
        for convert in converters {
            for sentinel in ["", "  ", "N/A", "none", "NULL", "-", "Unknown"] {
                assert_eq!(convert(sentinel).unwrap(), FieldValue::Null, "{:?}", sentinel);
            }
        }
    }

    #[test]
    fn test_idempotence_on_clean_output() {
        assert_idempotent(coerce_text, "  Green   Bank  Observatory ");
        assert_idempotent(coerce_int, "1,234");
        assert_idempotent(coerce_float, "12.50");
        assert_idempotent(coerce_bool, "Yes");
        assert_idempotent(coerce_date, "3/14/2019");
        assert_idempotent(coerce_datetime, "2019-03-14T08:30:00");
        assert_idempotent(coerce_case_num, "NRQZ#1234");
        assert_idempotent(coerce_prelim_case_num, "P-77");
        assert_idempotent(coerce_coordinate, "38 25 59.9 N");
        assert_idempotent(coerce_frequency_mhz, "1.5 GHz");
        assert_idempotent(coerce_email, "mailto:Someone@Example.ORG");
        assert_idempotent(coerce_phone, "(304) 456-2011 ext 12");
    }

    #[test]
    fn test_coerce_int_variants() {
        assert_eq!(coerce_int("1,234").unwrap(), FieldValue::Integer(1234));
        assert_eq!(coerce_int("12.0").unwrap(), FieldValue::Integer(12));
        assert!(coerce_int("12.5").is_err());
        assert!(coerce_int("abc").is_err());
        assert!(coerce_positive_int("0").is_err());
    }

    #[test]
    fn test_coerce_date_formats() {
        let expected = FieldValue::Date(NaiveDate::from_ymd_opt(2019, 3, 14).unwrap());
        for raw in ["2019-03-14", "3/14/2019", "03/14/19", "20190314", "14-Mar-2019", "Mar 14, 2019", "43538"] {
            assert_eq!(coerce_date(raw).unwrap(), expected, "{}", raw);
        }
        assert!(coerce_date("yesterday").is_err());
    }

    #[test]
    fn test_two_digit_years_are_not_first_century() {
        let expected = NaiveDate::from_ymd_opt(2019, 3, 14).unwrap();
        assert_eq!(coerce_date("03/14/19").unwrap(), FieldValue::Date(expected));
        assert_eq!(coerce_date("3/14/19").unwrap(), FieldValue::Date(expected));
        assert_eq!(coerce_date("14-Mar-19").unwrap(), FieldValue::Date(expected));
        assert_eq!(
            coerce_date("03/14/98").unwrap(),
            FieldValue::Date(NaiveDate::from_ymd_opt(1998, 3, 14).unwrap())
        );
        assert_eq!(
            coerce_datetime("03/14/19 10:30").unwrap(),
            FieldValue::DateTime(expected.and_hms_opt(10, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_coerce_case_num() {
        assert_eq!(coerce_case_num("NRQZ#5678").unwrap(), FieldValue::Integer(5678));
        assert_eq!(coerce_case_num("nrqz id 42").unwrap(), FieldValue::Integer(42));
        assert_eq!(coerce_case_num("1234.0").unwrap(), FieldValue::Integer(1234));
        assert!(coerce_case_num("NRQZ#P12").is_err());
        assert!(coerce_case_num("0").is_err());
    }

    #[test]
    fn test_coerce_coordinate_dms() {
        let value = coerce_coordinate("38 30 00 N").unwrap().as_f64().unwrap();
        assert!((value - 38.5).abs() < 1e-9);

        let value = coerce_coordinate("79°50'24\"W").unwrap().as_f64().unwrap();
        assert!((value + 79.84).abs() < 1e-9);

        let value = coerce_coordinate("-79.84").unwrap().as_f64().unwrap();
        assert!((value + 79.84).abs() < 1e-9);

        assert!(coerce_coordinate("38 75 00").is_err());
        assert!(coerce_latitude("95.0").is_err());
        assert!(coerce_coordinate("-38 30 00 N").is_err());
        assert!(coerce_coordinate("north-ish").is_err());
    }

    #[test]
    fn test_coerce_frequency_units() {
        assert_eq!(coerce_frequency_mhz("1.5 GHz").unwrap(), FieldValue::Float(1500.0));
        assert_eq!(coerce_frequency_mhz("100kHz").unwrap(), FieldValue::Float(0.1));
        assert_eq!(coerce_frequency_mhz("915").unwrap(), FieldValue::Float(915.0));
        assert!(coerce_frequency_mhz("fast").is_err());
    }

    #[test]
    fn test_coerce_email_and_phone() {
        assert_eq!(
            coerce_email(" JS@Example.org ").unwrap(),
            FieldValue::text("js@example.org")
        );
        assert!(coerce_email("not-an-email").is_err());
        assert!(coerce_email("a@b@c.org").is_err());

        assert_eq!(
            coerce_phone("1 (304) 456-2011").unwrap(),
            FieldValue::text("304-456-2011")
        );
        assert!(coerce_phone("12345").is_err());
    }

    #[test]
    fn test_lat_long_composite() {
        let converted = lat_long(&values(&[("latitude", "38 30 00 N"), ("longitude", "-79.5")])).unwrap();
        match converted {
            Converted::Many(out) => {
                assert_eq!(out["latitude"], FieldValue::Float(38.5));
                assert_eq!(out["longitude"], FieldValue::Float(-79.5));
            }
            Converted::Single(_) => panic!("应返回多值"),
        }
        assert!(lat_long(&values(&[("latitude", "38.5"), ("longitude", "")])).is_err());
    }

    #[test]
    fn test_frequency_range_computes_high() {
        let converted =
            frequency_range(&values(&[("freq_low", "900 MHz"), ("bandwidth", "26")])).unwrap();
        match converted {
            Converted::Many(out) => {
                assert_eq!(out["freq_high"], FieldValue::Float(926.0));
                assert_eq!(out["freq_low"], FieldValue::Float(900.0));
            }
            Converted::Single(_) => panic!("应返回多值"),
        }

        let converted = frequency_range(&values(&[("freq_low", "900"), ("bandwidth", "n/a")])).unwrap();
        match converted {
            Converted::Many(out) => assert_eq!(out["freq_high"], FieldValue::Null),
            Converted::Single(_) => panic!("应返回多值"),
        }
    }

    #[test]
    fn test_name_converters() {
        let joined = full_name(&values(&[("first_name", "John"), ("last_name", "Smith")])).unwrap();
        assert_eq!(joined, Converted::Single(FieldValue::text("John Smith")));

        let split = split_name(&values(&[("name", "Smith, John")])).unwrap();
        match split {
            Converted::Many(out) => {
                assert_eq!(out["first_name"], FieldValue::text("John"));
                assert_eq!(out["last_name"], FieldValue::text("Smith"));
            }
            Converted::Single(_) => panic!("应返回多值"),
        }
    }
}
