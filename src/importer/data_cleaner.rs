// ==========================================
// 调度导出导入系统 - 数据清洗器实现
// ==========================================
// 职责: TRIM / NULL 标准化 / 宽松数值解析 / 日期时间解析
//       送货单号归一化 / 泵送标记归一化
// ==========================================

use crate::importer::file_parser::Cell;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

/// Excel 序列号纪元（1899-12-30，兼容 1900 闰年问题）
const EXCEL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

/// Excel 可表示的最大序列号（9999-12-31）
const EXCEL_MAX_SERIAL: f64 = 2_958_465.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

static NUMERIC_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").expect("numeric prefix regex compiles")
});

static TRAILING_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{3,})\s*$").expect("trailing digits regex compiles"));

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d", "%Y%m%d"];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M", "%I:%M:%S %p", "%I:%M %p"];

/// 单元格宽松解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCell<T> {
    Parsed(T),
    /// 非空但无法解析，保留原文
    Unparsable(String),
    Missing,
}

impl<T> ParsedCell<T> {
    pub fn parsed(self) -> Option<T> {
        match self {
            ParsedCell::Parsed(v) => Some(v),
            _ => None,
        }
    }
}

pub struct DataCleaner;

impl DataCleaner {
    pub fn clean_text(&self, value: &str, uppercase: bool) -> String {
        let trimmed = value.trim();
        if uppercase {
            trimmed.to_uppercase()
        } else {
            trimmed.to_string()
        }
    }

    pub fn normalize_null(&self, value: Option<String>) -> Option<String> {
        value.and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    /// 折叠内部空白（表头单元格使用）
    pub fn collapse_whitespace(&self, value: &str) -> String {
        value.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// 宽松数值解析
    ///
    /// 规则:
    /// - 同时含 ',' 与 '.': ',' 视为千分位 → 删除
    /// - 只含 ',': '.' 视为千分位删除，',' 视为小数点
    /// - 取前导数值部分（"12.5 m3" → 12.5）
    pub fn parse_number(&self, value: &str) -> Option<f64> {
        let mut s = value.trim().to_string();
        if s.is_empty() {
            return None;
        }

        if s.contains(',') && s.contains('.') {
            s = s.replace(',', "");
        } else if s.contains(',') {
            s = s.replace('.', "").replace(',', ".");
        }

        NUMERIC_PREFIX
            .find(&s)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|n| n.is_finite())
    }

    pub fn parse_number_cell(&self, cell: &Cell) -> ParsedCell<f64> {
        match cell {
            Cell::Number(n) => ParsedCell::Parsed(*n),
            _ if cell.is_empty() => ParsedCell::Missing,
            _ => {
                let text = cell.as_text();
                match self.parse_number(&text) {
                    Some(n) => ParsedCell::Parsed(n),
                    None => ParsedCell::Unparsable(text),
                }
            }
        }
    }

    /// Excel 序列号 → 日期时间
    pub fn excel_serial_to_datetime(&self, serial: f64) -> Option<NaiveDateTime> {
        if !serial.is_finite() || serial < 0.0 || serial > EXCEL_MAX_SERIAL {
            return None;
        }

        let (y, m, d) = EXCEL_EPOCH;
        let epoch = NaiveDate::from_ymd_opt(y, m, d)?.and_hms_opt(0, 0, 0)?;
        let whole_days = serial.floor();
        let seconds = ((serial - whole_days) * SECONDS_PER_DAY).round() as i64;

        epoch
            .checked_add_signed(Duration::days(whole_days as i64))?
            .checked_add_signed(Duration::seconds(seconds))
    }

    fn parse_datetime_text(&self, text: &str) -> Option<NaiveDateTime> {
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
            return Some(dt.naive_local());
        }
        for fmt in DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
                return Some(dt);
            }
        }
        for fmt in DATE_FORMATS {
            if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
                return d.and_hms_opt(0, 0, 0);
            }
        }
        None
    }

    /// 日期时间单元格解析（序列号 / ISO / dd/mm/yyyy / 数字文本序列号）
    pub fn parse_datetime_cell(&self, cell: &Cell) -> ParsedCell<NaiveDateTime> {
        if cell.is_empty() {
            return ParsedCell::Missing;
        }

        let parsed = match cell {
            Cell::Number(n) if *n > 0.0 => self.excel_serial_to_datetime(*n),
            Cell::Text(s) => {
                let text = s.trim();
                self.parse_datetime_text(text).or_else(|| {
                    text.parse::<f64>()
                        .ok()
                        .filter(|n| *n > 0.0)
                        .and_then(|n| self.excel_serial_to_datetime(n))
                })
            }
            _ => None,
        };

        match parsed {
            Some(dt) => ParsedCell::Parsed(dt),
            None => ParsedCell::Unparsable(cell.as_text()),
        }
    }

    /// 时间单元格解析（序列号小数部分 / HH:MM[:SS] / 含日期的文本）
    pub fn parse_time_cell(&self, cell: &Cell) -> ParsedCell<NaiveTime> {
        if cell.is_empty() {
            return ParsedCell::Missing;
        }

        if let Cell::Text(s) = cell {
            let text = s.trim();
            for fmt in TIME_FORMATS {
                if let Ok(t) = NaiveTime::parse_from_str(text, fmt) {
                    return ParsedCell::Parsed(t);
                }
            }
        }

        // 纯时间的序列号 (0 <= n < 1) 落在纪元当天，取时间部分即可
        if let Cell::Number(n) = cell {
            if *n >= 0.0 {
                if let Some(dt) = self.excel_serial_to_datetime(*n) {
                    return ParsedCell::Parsed(dt.time());
                }
            }
        }

        match self.parse_datetime_cell(cell) {
            ParsedCell::Parsed(dt) => ParsedCell::Parsed(dt.time()),
            _ => ParsedCell::Unparsable(cell.as_text()),
        }
    }

    /// 送货单号归一化
    ///
    /// - 末尾 ≥3 位数字串 → 去前导零（P002-007789 → 7789）
    /// - 否则取全部数字
    /// - 无数字 → 原文（TRIM）
    pub fn normalize_delivery_number(&self, value: &str) -> String {
        let trimmed = value.trim();
        let digits = match TRAILING_DIGITS.captures(trimmed).and_then(|c| c.get(1)) {
            Some(m) => m.as_str().to_string(),
            None => trimmed.chars().filter(|c| c.is_ascii_digit()).collect(),
        };

        if digits.is_empty() {
            return trimmed.to_string();
        }

        let stripped = digits.trim_start_matches('0');
        if stripped.is_empty() {
            "0".to_string()
        } else {
            stripped.to_string()
        }
    }

    /// 泵送标记归一化（B/NB 列）
    pub fn clean_pumpable_flag(&self, value: &str) -> Option<bool> {
        let upper = self.collapse_whitespace(value).to_uppercase();
        match upper.as_str() {
            "B" | "BOMBEABLE" | "SI" | "SÍ" | "1" | "TRUE" => Some(true),
            "NB" | "NO BOMBEABLE" | "NO" | "0" | "FALSE" => Some(false),
            _ => None,
        }
    }
}
