// ==========================================
// 调度导出导入系统 - 导入层
// ==========================================
// 职责: 调度系统导出文件 → 强类型送货单行 + 行级错误 + 元信息
// 支持: Excel (.xlsx/.xls), CSV
// 红线: 纯计算，字节读入后不做任何 I/O
// ==========================================

// 模块声明
pub mod data_cleaner;
pub mod dq_validator;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod header_detector;
pub mod material_blocks;
pub mod metadata;
pub mod raw_export_parser;

// 重导出核心类型
pub use data_cleaner::{DataCleaner, ParsedCell};
pub use dq_validator::DqValidator;
pub use error::{ImportError, ImportResult};
pub use field_mapper::{ExtractedRow, FieldMapper};
pub use file_parser::{
    Cell, CsvSheetParser, ExcelSheetParser, SheetGrid, SheetParser, SourceFormat,
    UniversalSheetParser,
};
pub use header_detector::{find_header_row, FieldColumns, HeaderField, DEFAULT_HEADER_SCAN_ROWS};
pub use material_blocks::{MaterialBlockDetector, MaterialColumnBlock, MeasureAliases};
pub use metadata::{extract_metadata, MetadataLayout, PlantMetadata};
pub use raw_export_parser::{ParserOptions, RawExportParser};
