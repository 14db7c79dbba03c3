// ==========================================
// 调度导出导入系统 - 材料列块探测
// ==========================================
// 职责: 表头行 → Vec<MaterialColumnBlock>（每文件构建一次，所有行复用）
// 规则:
// - 单元格命中度量别名 → 去掉别名后剩余文本的首个词（大写）为材料编码
// - 只有度量词的单元格 → 从表头上一行取编码（两行表头布局）
// - 同时具备理论与实际两列的编码才成为材料块，缺列的块静默丢弃
// - 命中固定字段模式的列不参与材料探测
// ==========================================

use crate::domain::types::MeasureKey;
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::Cell;
use crate::importer::header_detector::HeaderField;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// 上一行材料编码的形态（如 "ARENA 1"、"CEM-TIPO I"）
static PRE_HEADER_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[A-Z0-9][A-Z0-9\s-]*$").expect("material code regex compiles"));

const MAX_PRE_HEADER_CODE_LEN: usize = 10;

// ==========================================
// MeasureAliases - 度量别名（可覆盖/扩展）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureAliases {
    aliases: BTreeMap<MeasureKey, Vec<String>>,
}

impl Default for MeasureAliases {
    fn default() -> Self {
        let mut aliases = BTreeMap::new();
        aliases.insert(
            MeasureKey::Planned,
            vec!["teórica".to_string(), "teorica".to_string(), "teo".to_string()],
        );
        aliases.insert(MeasureKey::Actual, vec!["real".to_string()]);
        aliases.insert(MeasureKey::Rework, vec!["retrabajo".to_string(), "ret".to_string()]);
        aliases.insert(MeasureKey::Manual, vec!["manual".to_string(), "man".to_string()]);
        Self { aliases }
    }
}

impl MeasureAliases {
    /// 替换某度量的别名列表
    pub fn with_override(mut self, key: MeasureKey, aliases: Vec<String>) -> Self {
        self.aliases.insert(key, aliases);
        self
    }

    /// 追加别名（保留默认值）
    pub fn with_extra(mut self, key: MeasureKey, extra: Vec<String>) -> Self {
        let entry = self.aliases.entry(key).or_default();
        for alias in extra {
            if !entry.iter().any(|a| a.eq_ignore_ascii_case(&alias)) {
                entry.push(alias);
            }
        }
        self
    }

    pub fn get(&self, key: MeasureKey) -> &[String] {
        self.aliases.get(&key).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

// ==========================================
// MaterialColumnBlock
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialColumnBlock {
    pub material_code: String,
    pub planned: usize,
    pub actual: usize,
    pub rework: Option<usize>,
    pub manual: Option<usize>,
}

#[derive(Debug, Default)]
struct PartialBlock {
    columns: BTreeMap<MeasureKey, usize>,
}

// ==========================================
// MaterialBlockDetector
// ==========================================
pub struct MaterialBlockDetector {
    patterns: Vec<(MeasureKey, Regex)>,
    cleaner: DataCleaner,
}

impl MaterialBlockDetector {
    pub fn new(aliases: &MeasureAliases) -> ImportResult<Self> {
        let mut patterns = Vec::with_capacity(MeasureKey::ALL.len());

        for key in MeasureKey::ALL {
            let mut words: Vec<&String> = aliases
                .get(key)
                .iter()
                .filter(|a| !a.trim().is_empty())
                .collect();
            if words.is_empty() {
                continue;
            }
            // 长别名优先，避免 "teo" 截断 "teórica"
            words.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));

            let alternation = words
                .iter()
                .map(|w| regex::escape(w.trim()))
                .collect::<Vec<_>>()
                .join("|");
            let source = format!(r"(?i)\b(?:{})\b", alternation);
            let regex = Regex::new(&source).map_err(|e| ImportError::ConfigValueError {
                key: format!("measure_aliases.{}", key.as_str()),
                value: alternation.clone(),
                message: e.to_string(),
            })?;
            patterns.push((key, regex));
        }

        Ok(Self {
            patterns,
            cleaner: DataCleaner,
        })
    }

    /// 单元格 → (度量, 编码候选)；编码为空表示仅有度量词
    fn classify(&self, text: &str) -> Option<(MeasureKey, String)> {
        let (key, regex) = self.patterns.iter().find(|(_, re)| re.is_match(text))?;
        let remainder = regex.replace_all(text, " ");
        let code = remainder
            .split_whitespace()
            .next()
            .map(|token| token.to_uppercase())
            .unwrap_or_default();
        Some((*key, code))
    }

    /// 上一行中位于 col 或其左侧的最近编码单元格
    fn pre_header_code(&self, pre_header: &[Cell], col: usize) -> Option<String> {
        let upper = col.min(pre_header.len().checked_sub(1)?);
        (0..=upper).rev().find_map(|i| {
            let text = self.cleaner.collapse_whitespace(&pre_header[i].as_text());
            let is_code = !text.is_empty()
                && text.chars().count() <= MAX_PRE_HEADER_CODE_LEN
                && PRE_HEADER_CODE.is_match(&text)
                && !text.chars().all(|c| c == '-' || c.is_whitespace());
            if is_code {
                Some(text.to_uppercase())
            } else {
                None
            }
        })
    }

    /// 探测材料列块（按首次出现顺序）
    pub fn detect(&self, header: &[Cell], pre_header: Option<&[Cell]>) -> Vec<MaterialColumnBlock> {
        let mut order: Vec<String> = Vec::new();
        let mut partials: BTreeMap<String, PartialBlock> = BTreeMap::new();

        for (col, cell) in header.iter().enumerate() {
            let text = self.cleaner.collapse_whitespace(&cell.as_text());
            if text.is_empty() || HeaderField::matches_any(&text) {
                continue;
            }

            let (key, mut code) = match self.classify(&text) {
                Some(found) => found,
                None => continue,
            };

            if code.is_empty() {
                match pre_header.and_then(|row| self.pre_header_code(row, col)) {
                    Some(found) => code = found,
                    None => {
                        debug!(column = col, header = %text, "度量列缺少材料编码，忽略");
                        continue;
                    }
                }
            }

            if !partials.contains_key(&code) {
                order.push(code.clone());
            }
            // 同一编码同一度量重复出现时保留首列
            partials
                .entry(code)
                .or_default()
                .columns
                .entry(key)
                .or_insert(col);
        }

        let mut blocks = Vec::new();
        for code in order {
            let Some(partial) = partials.remove(&code) else {
                continue;
            };
            let planned = partial.columns.get(&MeasureKey::Planned).copied();
            let actual = partial.columns.get(&MeasureKey::Actual).copied();

            match (planned, actual) {
                (Some(planned), Some(actual)) => blocks.push(MaterialColumnBlock {
                    rework: partial.columns.get(&MeasureKey::Rework).copied(),
                    manual: partial.columns.get(&MeasureKey::Manual).copied(),
                    material_code: code,
                    planned,
                    actual,
                }),
                _ => {
                    debug!(
                        material_code = %code,
                        has_planned = planned.is_some(),
                        has_actual = actual.is_some(),
                        "材料块不完整，丢弃"
                    );
                }
            }
        }

        blocks
    }
}
