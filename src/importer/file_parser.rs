// ==========================================
// NRQZ 记录管理系统 - 原始行数据源（文件解析器）
// ==========================================
// 支持: CSV (.csv) / TSV (.tsv) / Excel (.xlsx/.xls/.xlsm/.ods) / 键值文本 (.txt/.kv)
// 约束:
// - 保持文件中的行顺序（FieldMap 占有规则依赖声明顺序,行序影响审计行号）
// - 跳过完全空白的行,行号仍按文件中的位置计数
// - 表头完全重复（TRIM 后相同）→ DuplicateHeader
// ==========================================

use crate::domain::import::RawRow;
use crate::importer::error::{ImportError, ImportResult};
use calamine::{open_workbook_auto, Reader};
use csv::ReaderBuilder;
use std::collections::BTreeSet;
use std::fs;
use std::fs::File;
use std::path::Path;

// ==========================================
// ParsedFile - 解析结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFile {
    /// 文件中出现的表头（按出现顺序）
    pub headers: Vec<String>,
    /// (行号, 原始行); 行号从 1 起,为数据行序号
    pub rows: Vec<(usize, RawRow)>,
}

impl ParsedFile {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ==========================================
// RawRowSource Trait
// ==========================================
// 每种外部格式一个实现; 重复调用得到相同结果
pub trait RawRowSource {
    fn read_rows(&self, path: &Path) -> ImportResult<ParsedFile>;
}

fn ensure_exists(path: &Path) -> ImportResult<()> {
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.display().to_string()));
    }
    Ok(())
}

/// 规范化表头: 去 BOM + TRIM; 检测重复
fn normalize_headers<I, S>(raw: I) -> ImportResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let headers: Vec<String> = raw
        .into_iter()
        .map(|h| h.as_ref().trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut seen = BTreeSet::new();
    for header in headers.iter().filter(|h| !h.is_empty()) {
        if !seen.insert(header.as_str()) {
            return Err(ImportError::DuplicateHeader(header.clone()));
        }
    }
    Ok(headers)
}

/// 按表头组装一行; 空白表头列丢弃
fn assemble_row<I>(headers: &[String], cells: I) -> RawRow
where
    I: IntoIterator<Item = String>,
{
    let mut row = RawRow::new();
    for (idx, value) in cells.into_iter().enumerate() {
        if let Some(header) = headers.get(idx).filter(|h| !h.is_empty()) {
            row.insert(header.clone(), value.trim().to_string());
        }
    }
    row
}

fn is_blank_row(row: &RawRow) -> bool {
    row.values().all(|v| v.is_empty())
}

// ==========================================
// DelimitedParser - CSV / TSV
// ==========================================
pub struct DelimitedParser {
    delimiter: u8,
}

impl DelimitedParser {
    pub fn csv() -> Self {
        Self { delimiter: b',' }
    }

    pub fn tsv() -> Self {
        Self { delimiter: b'\t' }
    }
}

impl RawRowSource for DelimitedParser {
    fn read_rows(&self, path: &Path) -> ImportResult<ParsedFile> {
        ensure_exists(path)?;

        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .flexible(true) // 允许行长度不一致
            .from_reader(file);

        let headers = normalize_headers(reader.headers()?.iter())?;

        let mut rows = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let record = result?;
            let row = assemble_row(&headers, record.iter().map(str::to_string));
            if is_blank_row(&row) {
                continue;
            }
            rows.push((idx + 1, row));
        }

        Ok(ParsedFile {
            headers: headers.into_iter().filter(|h| !h.is_empty()).collect(),
            rows,
        })
    }
}

// ==========================================
// ExcelParser - 读取第一个工作表
// ==========================================
pub struct ExcelParser;

impl RawRowSource for ExcelParser {
    fn read_rows(&self, path: &Path) -> ImportResult<ParsedFile> {
        ensure_exists(path)?;

        let mut workbook = open_workbook_auto(path)?;
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无工作表".to_string()))?;
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| ImportError::ExcelParseError(e.to_string()))?;

        let mut sheet_rows = range.rows();
        let header_row = match sheet_rows.next() {
            Some(row) => row,
            None => return Ok(ParsedFile::default()),
        };
        let headers = normalize_headers(header_row.iter().map(|cell| cell.to_string()))?;

        let mut rows = Vec::new();
        for (idx, data_row) in sheet_rows.enumerate() {
            let row = assemble_row(&headers, data_row.iter().map(|cell| cell.to_string()));
            if is_blank_row(&row) {
                continue;
            }
            rows.push((idx + 1, row));
        }

        Ok(ParsedFile {
            headers: headers.into_iter().filter(|h| !h.is_empty()).collect(),
            rows,
        })
    }
}

// ==========================================
// KeyValueParser - 申请文本（键: 值）
// ==========================================
// 格式:
//   NRQZ ID: 1234
//   Applicant: John Smith
//   Comments: first line
//     continuation line
//   ---
// 记录以 "---" / "===" 行分隔; "#" 开头为注释; 缩进行续接上一个值
pub struct KeyValueParser;

impl KeyValueParser {
    pub fn parse_text(text: &str) -> ImportResult<ParsedFile> {
        let mut headers: Vec<String> = Vec::new();
        let mut rows: Vec<(usize, RawRow)> = Vec::new();
        let mut current = RawRow::new();
        let mut last_key: Option<String> = None;

        fn flush(current: &mut RawRow, rows: &mut Vec<(usize, RawRow)>) {
            if !is_blank_row(current) {
                let row_number = rows.len() + 1;
                rows.push((row_number, std::mem::take(current)));
            } else {
                current.clear();
            }
        }

        for (line_no, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with('#') {
                continue;
            }
            if trimmed.chars().count() >= 3 && trimmed.chars().all(|c| c == '-' || c == '=') {
                flush(&mut current, &mut rows);
                last_key = None;
                continue;
            }
            if trimmed.is_empty() {
                continue;
            }

            let is_continuation = line.starts_with(char::is_whitespace);
            if is_continuation {
                if let Some(key) = &last_key {
                    if let Some(value) = current.get_mut(key) {
                        if !value.is_empty() {
                            value.push(' ');
                        }
                        value.push_str(trimmed);
                        continue;
                    }
                }
            }

            let (key, value) = trimmed
                .split_once(':')
                .or_else(|| trimmed.split_once('='))
                .ok_or_else(|| {
                    ImportError::FileReadError(format!("第 {} 行不是 键: 值 格式: {}", line_no + 1, trimmed))
                })?;
            let key = key.trim().to_string();
            if key.is_empty() {
                return Err(ImportError::FileReadError(format!("第 {} 行缺少键名", line_no + 1)));
            }
            if current.contains_key(&key) {
                return Err(ImportError::DuplicateHeader(key));
            }
            if !headers.contains(&key) {
                headers.push(key.clone());
            }
            current.insert(key.clone(), value.trim().to_string());
            last_key = Some(key);
        }
        flush(&mut current, &mut rows);

        Ok(ParsedFile { headers, rows })
    }
}

impl RawRowSource for KeyValueParser {
    fn read_rows(&self, path: &Path) -> ImportResult<ParsedFile> {
        ensure_exists(path)?;
        let text = fs::read_to_string(path)?;
        Self::parse_text(&text)
    }
}

// ==========================================
// 通用文件解析器（根据扩展名自动选择）
// ==========================================
pub struct UniversalFileParser;

impl UniversalFileParser {
    pub fn parse<P: AsRef<Path>>(&self, file_path: P) -> ImportResult<ParsedFile> {
        let path = file_path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "csv" => DelimitedParser::csv().read_rows(path),
            "tsv" => DelimitedParser::tsv().read_rows(path),
            "xlsx" | "xls" | "xlsm" | "ods" => ExcelParser.read_rows(path),
            "txt" | "kv" => KeyValueParser.read_rows(path),
            _ => Err(ImportError::UnsupportedFormat(ext)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn temp_with(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_csv_parser_valid_file() {
        let file = temp_with(".csv", "NRQZ_NO,COMMENTS\n1234,see NRQZ#5678\n5678,\n");
        let parsed = UniversalFileParser.parse(file.path()).unwrap();

        assert_eq!(parsed.headers, vec!["NRQZ_NO".to_string(), "COMMENTS".to_string()]);
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].0, 1);
        assert_eq!(parsed.rows[0].1.get("COMMENTS"), Some(&"see NRQZ#5678".to_string()));
    }

    #[test]
    fn test_csv_parser_skips_blank_rows_and_keeps_numbers() {
        let file = temp_with(".csv", "\u{feff}NRQZ_NO,NAME\n1,a\n,\n3,c\n");
        let parsed = UniversalFileParser.parse(file.path()).unwrap();
        assert_eq!(parsed.headers[0], "NRQZ_NO");
        let numbers: Vec<usize> = parsed.rows.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn test_csv_duplicate_header_rejected() {
        let file = temp_with(".csv", "LAT,LON,LAT\n1,2,3\n");
        let err = UniversalFileParser.parse(file.path()).unwrap_err();
        assert!(matches!(err, ImportError::DuplicateHeader(h) if h == "LAT"));
    }

    #[test]
    fn test_tsv_parser() {
        let file = temp_with(".tsv", "NRQZ_NO\tNAME\n7\tGreen Bank\n");
        let parsed = UniversalFileParser.parse(file.path()).unwrap();
        assert_eq!(parsed.rows[0].1.get("NAME"), Some(&"Green Bank".to_string()));
    }

    #[test]
    fn test_file_not_found_and_unsupported() {
        assert!(matches!(
            UniversalFileParser.parse("non_existent.csv"),
            Err(ImportError::FileNotFound(_))
        ));
        assert!(matches!(
            UniversalFileParser.parse("data.pdf"),
            Err(ImportError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_key_value_blocks() {
        let text = "# application export\nNRQZ ID: 1234\nApplicant: John Smith\nComments: first\n  second\n---\nNRQZ ID = 5678\n";
        let parsed = KeyValueParser::parse_text(text).unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].1.get("Comments"), Some(&"first second".to_string()));
        assert_eq!(parsed.rows[1].1.get("NRQZ ID"), Some(&"5678".to_string()));
        assert_eq!(parsed.headers, vec!["NRQZ ID", "Applicant", "Comments"]);
    }

    #[test]
    fn test_key_value_rejects_garbage_line() {
        assert!(KeyValueParser::parse_text("just some prose").is_err());
    }
}
