// ==========================================
// NRQZ 记录管理系统 - 内置导入 Profile
// ==========================================
// 职责: NRQZ 历史数据源（Access 导出 / Excel 台账 / 申请文本）的表头别名与映射声明
// 说明: 别名按声明顺序匹配,越靠前越优先
// ==========================================

use crate::domain::schema::SchemaRegistry;
use crate::domain::types::RecordType;
use crate::importer::converters;
use crate::importer::error::MappingConfigError;
use crate::importer::field_map::{Converter, FieldMap, SourceKey, SourceValues};
use crate::importer::form_map::{FormMap, ImportProfile};

pub const PROFILE_CASE: &str = "case";
pub const PROFILE_PRELIM: &str = "prelim";
pub const PROFILE_FACILITY: &str = "facility";

/// 全部内置 Profile 名称
pub const PROFILE_NAMES: [&str; 3] = [PROFILE_CASE, PROFILE_PRELIM, PROFILE_FACILITY];

// ==========================================
// 表头别名
// ==========================================
const CASE_NUM_ALIASES: &[&str] = &[
    "NRQZ_NO", "NRQZ ID", "NRQZ_ID", "NRQZ #", "NRQZ#", "CASE_NUM", "Case Number", "Case #", "case_num",
];
const PRELIM_NUM_ALIASES: &[&str] = &[
    "PRELIM_NO", "PRELIM #", "Prelim Number", "Prelim Case Number", "NRQZ_NO", "NRQZ ID", "case_num",
];
const CASE_NAME_ALIASES: &[&str] = &["CASE_NAME", "Project Name", "PROJECT", "Name", "name"];
const COMMENTS_ALIASES: &[&str] = &["COMMENTS", "Comments", "REMARKS", "Remarks", "Notes", "comments"];
const DATE_RECEIVED_ALIASES: &[&str] =
    &["DATE_RECEIVED", "DATE RECD", "DATEREC", "Date Received", "Received", "date_recd"];
const DATE_COMPLETED_ALIASES: &[&str] =
    &["DATE_COMPLETED", "DATECOMP", "Completed Date", "Date Completed", "date_completed"];
const LAT_ALIASES: &[&str] = &["LAT", "LATITUDE", "Lat (dd mm ss)", "LAT_DMS", "Latitude", "lat"];
const LON_ALIASES: &[&str] = &["LON", "LONG", "LONGITUDE", "Lon (dd mm ss)", "LON_DMS", "Longitude", "lon"];
const FREQ_LOW_ALIASES: &[&str] =
    &["FREQ_LOW", "FREQLOW", "FREQ", "Frequency", "Freq Low (MHz)", "Frequency (MHz)", "freq_low"];
const FREQ_HIGH_ALIASES: &[&str] = &["FREQ_HIGH", "FREQHIGH", "Freq High (MHz)", "freq_high"];
const BANDWIDTH_ALIASES: &[&str] = &["BANDWIDTH", "BW", "Bandwidth (MHz)", "Bandwidth", "bandwidth"];
const APPLICANT_ALIASES: &[&str] =
    &["APPLICANT", "Applicant", "Applicant Name", "APPLICANT_NAME", "applicant_name"];
const APPLICANT_FIRST_ALIASES: &[&str] = &["APPLICANT_FIRST", "Applicant First Name", "FIRST_NAME"];
const APPLICANT_LAST_ALIASES: &[&str] = &["APPLICANT_LAST", "Applicant Last Name", "LAST_NAME"];
const EMAIL_ALIASES: &[&str] = &["APPLICANT_EMAIL", "EMAIL", "E-mail", "Email Address", "email"];
const PHONE_ALIASES: &[&str] = &["APPLICANT_PHONE", "PHONE", "Phone", "Telephone", "phone"];
const FAX_ALIASES: &[&str] = &["FAX", "Fax", "Fax Number"];
const STREET_ALIASES: &[&str] = &["ADDRESS", "STREET", "Street Address", "Address"];
const CITY_ALIASES: &[&str] = &["CITY", "City"];
const STATE_ALIASES: &[&str] = &["STATE", "State"];
const ZIP_ALIASES: &[&str] = &["ZIP", "ZIPCODE", "Zip Code", "ZIP_CODE"];
const SITE_NAME_ALIASES: &[&str] = &["SITE_NAME", "SITE", "Site Name", "Facility", "FACILITY_NAME"];

/// 按名称构造内置 Profile
pub fn builtin(name: &str, schema: &SchemaRegistry) -> Result<ImportProfile, MappingConfigError> {
    match name {
        PROFILE_CASE => case_profile(schema),
        PROFILE_PRELIM => prelim_profile(schema),
        PROFILE_FACILITY => facility_profile(schema),
        other => Err(MappingConfigError::UnknownFormMap(other.to_string())),
    }
}

fn key(name: &str, aliases: &[&str]) -> SourceKey {
    SourceKey::new(name, aliases)
}

fn lat_long_map() -> Result<FieldMap, MappingConfigError> {
    FieldMap::new(
        vec![key("latitude", LAT_ALIASES), key("longitude", LON_ALIASES)],
        vec!["latitude", "longitude"],
        Some(Converter::composite("lat_long", converters::lat_long)),
    )
}

/// 频率: 先声明组合映射（低频 + 带宽 → 高频）,再声明单列回退
fn frequency_maps() -> Result<Vec<FieldMap>, MappingConfigError> {
    Ok(vec![
        FieldMap::new(
            vec![key("freq_low", FREQ_LOW_ALIASES), key("bandwidth", BANDWIDTH_ALIASES)],
            vec!["freq_low", "bandwidth", "freq_high"],
            Some(Converter::composite("frequency_range", converters::frequency_range)),
        )?,
        FieldMap::one_to_one(
            key("freq_low", FREQ_LOW_ALIASES),
            "freq_low",
            "frequency_mhz",
            converters::coerce_frequency_mhz,
        )?,
        FieldMap::one_to_one(
            key("freq_high", FREQ_HIGH_ALIASES),
            "freq_high",
            "frequency_mhz",
            converters::coerce_frequency_mhz,
        )?,
        FieldMap::one_to_one(
            key("bandwidth", BANDWIDTH_ALIASES),
            "bandwidth",
            "frequency_mhz",
            converters::coerce_frequency_mhz,
        )?,
    ])
}

/// 申请人（Person）: 姓名可来自整列或 名+姓 两列
fn applicant_form(schema: &SchemaRegistry, source: &str) -> Result<FormMap, MappingConfigError> {
    FormMap::new(
        "applicant",
        RecordType::Person,
        vec![
            FieldMap::pass_through(key("applicant", APPLICANT_ALIASES), "name")?,
            FieldMap::new(
                vec![
                    key("first_name", APPLICANT_FIRST_ALIASES),
                    key("last_name", APPLICANT_LAST_ALIASES),
                ],
                vec!["name"],
                Some(Converter::composite("full_name", converters::full_name)),
            )?,
            FieldMap::new(
                vec![key("applicant", APPLICANT_ALIASES)],
                vec!["first_name", "last_name"],
                Some(Converter::composite("split_name", |values: &SourceValues| {
                    let mut input = SourceValues::new();
                    if let Some(raw) = values.get("applicant") {
                        input.insert("name".to_string(), raw.clone());
                    }
                    converters::split_name(&input)
                })),
            )?,
            FieldMap::pass_through(key("first_name", APPLICANT_FIRST_ALIASES), "first_name")?,
            FieldMap::pass_through(key("last_name", APPLICANT_LAST_ALIASES), "last_name")?,
            FieldMap::one_to_one(key("email", EMAIL_ALIASES), "email", "email", converters::coerce_email)?,
            FieldMap::one_to_one(key("phone", PHONE_ALIASES), "phone", "phone", converters::coerce_phone)?,
            FieldMap::one_to_one(key("fax", FAX_ALIASES), "fax", "phone", converters::coerce_phone)?,
            FieldMap::pass_through(key("street", STREET_ALIASES), "street")?,
            FieldMap::pass_through(key("city", CITY_ALIASES), "city")?,
            FieldMap::one_to_one(key("state", STATE_ALIASES), "state", "upper", converters::coerce_upper)?,
            FieldMap::pass_through(key("zipcode", ZIP_ALIASES), "zipcode")?,
        ],
        schema,
    )?
    .with_default("data_source", source)
}

fn case_profile(schema: &SchemaRegistry) -> Result<ImportProfile, MappingConfigError> {
    let mut maps = vec![
        FieldMap::one_to_one(
            key("case_num", CASE_NUM_ALIASES),
            "case_num",
            "case_num",
            converters::coerce_case_num,
        )?,
        FieldMap::pass_through(key("name", CASE_NAME_ALIASES), "name")?,
        FieldMap::pass_through(key("comments", COMMENTS_ALIASES), "comments")?,
        FieldMap::pass_through(key("status", &["STATUS", "Status"]), "status")?,
        FieldMap::one_to_one(
            key("date_received", DATE_RECEIVED_ALIASES),
            "date_received",
            "date",
            converters::coerce_date,
        )?,
        FieldMap::one_to_one(
            key("date_completed", DATE_COMPLETED_ALIASES),
            "date_completed",
            "date",
            converters::coerce_date,
        )?,
        FieldMap::one_to_one(
            key("completed", &["COMPLETED", "Completed", "DONE"]),
            "completed",
            "bool",
            converters::coerce_bool,
        )?,
        FieldMap::one_to_one(
            key("is_federal", &["FEDERAL", "IS_FEDERAL", "Fed", "Federal"]),
            "is_federal",
            "bool",
            converters::coerce_bool,
        )?,
        FieldMap::pass_through(
            key("agency_num", &["AGENCY_NO", "AGENCY NUM", "Agency Number", "agency_num"]),
            "agency_num",
        )?,
        lat_long_map()?,
    ];
    maps.extend(frequency_maps()?);
    maps.push(FieldMap::pass_through(key("applicant", APPLICANT_ALIASES), "applicant_name")?);

    let case = FormMap::new("case", RecordType::Case, maps, schema)?.with_default("data_source", "case_import")?;

    ImportProfile::new(PROFILE_CASE)
        .with_form(case)?
        .with_optional_form(applicant_form(schema, "case_import")?)?
        .with_link("case.applicant", "case", "applicant", schema)
}

fn prelim_profile(schema: &SchemaRegistry) -> Result<ImportProfile, MappingConfigError> {
    let prelim = FormMap::new(
        "prelim",
        RecordType::PreliminaryCase,
        vec![
            FieldMap::one_to_one(
                key("case_num", PRELIM_NUM_ALIASES),
                "case_num",
                "prelim_case_num",
                converters::coerce_prelim_case_num,
            )?,
            FieldMap::pass_through(key("name", CASE_NAME_ALIASES), "name")?,
            FieldMap::pass_through(key("comments", COMMENTS_ALIASES), "comments")?,
            FieldMap::one_to_one(
                key("date_received", DATE_RECEIVED_ALIASES),
                "date_received",
                "date",
                converters::coerce_date,
            )?,
            lat_long_map()?,
            FieldMap::pass_through(key("applicant", APPLICANT_ALIASES), "applicant_name")?,
        ],
        schema,
    )?
    .with_default("data_source", "prelim_import")?;

    ImportProfile::new(PROFILE_PRELIM)
        .with_form(prelim)?
        .with_optional_form(applicant_form(schema, "prelim_import")?)
}

/// 设施: 同一行同时产出设施与所属案件（案件仅含案件号,更新时不覆盖其他字段）
fn facility_profile(schema: &SchemaRegistry) -> Result<ImportProfile, MappingConfigError> {
    let mut maps = vec![
        FieldMap::one_to_one(
            key("case_num", CASE_NUM_ALIASES),
            "case_num",
            "case_num",
            converters::coerce_case_num,
        )?,
        FieldMap::pass_through(key("site_name", SITE_NAME_ALIASES), "site_name")?,
        lat_long_map()?,
        FieldMap::one_to_one(
            key("amsl", &["AMSL", "AMSL (m)", "Elevation", "Ground Elevation"]),
            "amsl",
            "float",
            converters::coerce_float,
        )?,
        FieldMap::one_to_one(
            key("agl", &["AGL", "AGL (m)", "Antenna Height", "Structure Height"]),
            "agl",
            "float",
            converters::coerce_float,
        )?,
        FieldMap::pass_through(key("comments", COMMENTS_ALIASES), "comments")?,
    ];
    maps.extend(frequency_maps()?);

    let facility =
        FormMap::new("facility", RecordType::Facility, maps, schema)?.with_default("data_source", "facility_import")?;

    let case_stub = FormMap::new(
        "facility_case",
        RecordType::Case,
        vec![FieldMap::one_to_one(
            key("case_num", CASE_NUM_ALIASES),
            "case_num",
            "case_num",
            converters::coerce_case_num,
        )?],
        schema,
    )?;

    ImportProfile::new(PROFILE_FACILITY)
        .with_form(facility)?
        .with_form(case_stub)?
        .with_link("facility.case", "facility", "facility_case", schema)
}
