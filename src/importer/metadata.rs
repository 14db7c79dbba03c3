// ==========================================
// 调度导出导入系统 - 导出元信息抽取
// ==========================================
// 说明: 元信息位于固定坐标（按版本区分），缺失时取宽松默认值
// ==========================================

use crate::importer::data_cleaner::{DataCleaner, ParsedCell};
use crate::importer::file_parser::SheetGrid;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const UNKNOWN_PLANT: &str = "Unknown";

/// 元信息坐标布局
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataLayout {
    pub version: String,
    pub row: usize,
    pub plant_code_col: usize,
    pub plant_name_col: usize,
    pub date_start_col: usize,
    pub date_end_col: usize,
}

impl Default for MetadataLayout {
    fn default() -> Self {
        Self::v1()
    }
}

impl MetadataLayout {
    pub fn v1() -> Self {
        Self {
            version: "v1".to_string(),
            row: 3,
            plant_code_col: 6,
            plant_name_col: 9,
            date_start_col: 37,
            date_end_col: 43,
        }
    }
}

/// 抽取结果
#[derive(Debug, Clone, PartialEq)]
pub struct PlantMetadata {
    pub plant_identifier: String,
    pub date_range_start: NaiveDateTime,
    pub date_range_end: NaiveDateTime,
}

pub fn extract_metadata(grid: &SheetGrid, layout: &MetadataLayout, now: NaiveDateTime) -> PlantMetadata {
    let cleaner = DataCleaner;
    let text_or_unknown = |col: usize| {
        cleaner
            .normalize_null(Some(grid.cell(layout.row, col).as_text()))
            .unwrap_or_else(|| UNKNOWN_PLANT.to_string())
    };
    let date_or_now = |col: usize| match cleaner.parse_datetime_cell(grid.cell(layout.row, col)) {
        ParsedCell::Parsed(dt) => dt,
        _ => now,
    };

    PlantMetadata {
        plant_identifier: format!(
            "{} - {}",
            text_or_unknown(layout.plant_code_col),
            text_or_unknown(layout.plant_name_col)
        ),
        date_range_start: date_or_now(layout.date_start_col),
        date_range_end: date_or_now(layout.date_end_col),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::file_parser::Cell;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(10, 0, 0).unwrap()
    }

    #[test]
    fn test_missing_metadata_defaults() {
        let meta = extract_metadata(&SheetGrid::default(), &MetadataLayout::v1(), now());
        assert_eq!(meta.plant_identifier, "Unknown - Unknown");
        assert_eq!(meta.date_range_start, now());
        assert_eq!(meta.date_range_end, now());
    }

    #[test]
    fn test_v1_coordinates() {
        let mut row = vec![Cell::Empty; 44];
        row[6] = Cell::Text("P001".to_string());
        row[9] = Cell::Text("Planta Norte".to_string());
        row[37] = Cell::Number(45_658.0);
        row[43] = Cell::Text("31/01/2025".to_string());
        let grid = SheetGrid::new(vec![vec![], vec![], vec![], row]);

        let meta = extract_metadata(&grid, &MetadataLayout::v1(), now());
        assert_eq!(meta.plant_identifier, "P001 - Planta Norte");
        assert_eq!(meta.date_range_start.date(), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(meta.date_range_end.date(), NaiveDate::from_ymd_opt(2025, 1, 31).unwrap());
    }
}
