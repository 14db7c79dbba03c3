// ==========================================
// 调度导出导入系统 - 原始导出解析器
// ==========================================
// 流程:
//   阶段 0: 字节 → SheetGrid
//   阶段 1: 表头探测 + 固定字段列 + 材料列块（每文件一次）
//   阶段 2: 逐行映射（单行失败不影响其他行）
//   阶段 3: 行级校验（阻断错误 → 行被拒）
//   阶段 4: 元信息与统计
// 红线: 只有文件级问题返回 Err，行级问题全部收集到 errors
// ==========================================

use crate::domain::delivery::{ExportMetadata, ParseResult, StatusSummary, ValidationError};
use crate::domain::types::ValidationErrorKind;
use crate::importer::dq_validator::DqValidator;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::FieldMapper;
use crate::importer::file_parser::{SheetGrid, SheetParser, UniversalSheetParser};
use crate::importer::header_detector::{find_header_row, FieldColumns, HeaderField, DEFAULT_HEADER_SCAN_ROWS};
use crate::importer::material_blocks::{MaterialBlockDetector, MeasureAliases};
use crate::importer::metadata::{extract_metadata, MetadataLayout};
use chrono::{Local, NaiveDateTime};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

/// 解析参数
#[derive(Debug, Clone, PartialEq)]
pub struct ParserOptions {
    pub header_scan_rows: usize,
    pub measure_aliases: MeasureAliases,
    pub metadata_layout: MetadataLayout,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            header_scan_rows: DEFAULT_HEADER_SCAN_ROWS,
            measure_aliases: MeasureAliases::default(),
            metadata_layout: MetadataLayout::v1(),
        }
    }
}

pub struct RawExportParser {
    options: ParserOptions,
    detector: MaterialBlockDetector,
    validator: DqValidator,
    sheet_parser: UniversalSheetParser,
}

impl RawExportParser {
    pub fn new(options: ParserOptions) -> ImportResult<Self> {
        let detector = MaterialBlockDetector::new(&options.measure_aliases)?;
        Ok(Self {
            options,
            detector,
            validator: DqValidator,
            sheet_parser: UniversalSheetParser::default(),
        })
    }

    /// 显式指定文件格式（默认按魔数嗅探）
    pub fn with_sheet_parser(mut self, sheet_parser: UniversalSheetParser) -> Self {
        self.sheet_parser = sheet_parser;
        self
    }

    /// 解析导出文件
    ///
    /// # 返回
    /// - Ok(ParseResult): 有效行 + 全部行级错误 + 元信息
    /// - Err: 文件无法识别/读取，或工作表为空
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub fn parse(&self, bytes: &[u8]) -> ImportResult<ParseResult> {
        let grid = self.sheet_parser.parse_grid(bytes)?;
        Ok(self.parse_grid_at(&grid, Local::now().naive_local()))
    }

    /// 解析已读入的表格；now 为日期回退值
    pub fn parse_grid_at(&self, grid: &SheetGrid, now: NaiveDateTime) -> ParseResult {
        // === 阶段 1: 表头 ===
        let header_index = find_header_row(grid, self.options.header_scan_rows);
        let header = grid.row(header_index);
        let pre_header = header_index.checked_sub(1).map(|i| grid.row(i));

        let columns = FieldColumns::resolve(header);
        let blocks = self.detector.detect(header, pre_header);
        let material_codes: Vec<String> = blocks.iter().map(|b| b.material_code.clone()).collect();

        if columns.get(HeaderField::DeliveryNumber).is_none() {
            warn!(header_row = header_index, "表头未找到送货单号列，所有数据行将被跳过");
        }
        debug!(
            header_row = header_index,
            material_blocks = blocks.len(),
            "表头解析完成"
        );

        let mapper = FieldMapper::new(columns, blocks);

        // === 阶段 2/3: 逐行 ===
        let mut rows = Vec::new();
        let mut errors: Vec<ValidationError> = Vec::new();

        for index in (header_index + 1)..grid.row_count() {
            let cells = grid.row(index);
            if !mapper.has_delivery_number(cells) {
                continue;
            }
            let row_number = index + 1;

            match mapper.map_row(row_number, cells) {
                Ok(extracted) => {
                    let row_errors = self.validator.validate_row(&extracted);
                    if row_errors.iter().all(|e| e.recoverable) {
                        rows.push(extracted.into_raw_row(now));
                    }
                    errors.extend(row_errors);
                }
                Err(err) => {
                    let field_name = match &err {
                        ImportError::TypeConversionError { field, .. } => field.clone(),
                        _ => "row".to_string(),
                    };
                    warn!(row = row_number, error = %err, "数据行解析失败");
                    errors.push(ValidationError::fatal(
                        row_number,
                        ValidationErrorKind::DataTypeError,
                        &field_name,
                        Value::Null,
                        format!("行解析失败: {}", err),
                    ));
                }
            }
        }

        // === 阶段 4: 元信息 ===
        let plant = extract_metadata(grid, &self.options.metadata_layout, now);
        let metadata = ExportMetadata {
            plant_identifier: plant.plant_identifier,
            date_range_start: plant.date_range_start,
            date_range_end: plant.date_range_end,
            total_rows: grid.row_count().saturating_sub(header_index + 1),
            valid_rows: rows.len(),
            header_row_index: header_index,
            material_codes,
            status_summary: StatusSummary::from_rows(&rows),
        };

        info!(
            plant = %metadata.plant_identifier,
            total_rows = metadata.total_rows,
            valid_rows = metadata.valid_rows,
            errors = errors.len(),
            "导出文件解析完成"
        );

        ParseResult {
            rows,
            errors,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn test_rows_without_delivery_number_are_skipped() {
        let grid = SheetGrid::from_strings(vec![
            vec!["Remisión", "Volumen", "Cliente", "Obra", "Fecha", "Prod. Técnico"],
            vec!["100", "7", "A", "Obra 1", "2025-03-04", "P1"],
            vec!["", "7", "B", "Obra 2", "2025-03-04", "P1"],
            vec!["101", "8", "C", "Obra 3", "2025-03-04", "P1"],
        ]);
        let parser = RawExportParser::new(ParserOptions::default()).unwrap();
        let result = parser.parse_grid_at(&grid, now());

        assert_eq!(result.rows.len(), 2);
        assert!(result.errors.is_empty());
        assert_eq!(result.metadata.total_rows, 3);
        assert_eq!(result.metadata.valid_rows, 2);
        assert_eq!(result.rows[1].row_number, 4);
    }

    #[test]
    fn test_type_error_is_row_scoped() {
        let grid = SheetGrid::from_strings(vec![
            vec!["Remisión", "Volumen", "Cliente", "Obra", "Fecha", "Prod. Técnico"],
            vec!["100", "x", "A", "Obra 1", "2025-03-04", "P1"],
            vec!["101", "8", "C", "Obra 3", "2025-03-04", "P1"],
        ]);
        let parser = RawExportParser::new(ParserOptions::default()).unwrap();
        let result = parser.parse_grid_at(&grid, now());

        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].error_kind, ValidationErrorKind::DataTypeError);
        assert_eq!(result.errors[0].row_number, 2);
        assert_eq!(result.errors[0].field_name, "volumen");
    }

    #[test]
    fn test_invalid_date_keeps_row() {
        let grid = SheetGrid::from_strings(vec![
            vec!["Remisión", "Volumen", "Cliente", "Obra", "Fecha", "Prod. Técnico"],
            vec!["100", "7", "A", "Obra 1", "sin fecha", "P1"],
        ]);
        let parser = RawExportParser::new(ParserOptions::default()).unwrap();
        let result = parser.parse_grid_at(&grid, now());

        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].date, now().date());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].recoverable);
        assert_eq!(result.errors[0].error_kind, ValidationErrorKind::InvalidDate);
    }
}
