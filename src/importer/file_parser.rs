// ==========================================
// 调度导出导入系统 - 文件解析器实现
// ==========================================
// 阶段 0: 字节 → 二维单元格表格（SheetGrid）
// 支持: Excel (.xlsx/.xls) / CSV (.csv)
// 说明: Excel 只读取第一个工作表，保留单元格绝对位置
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use calamine::{open_workbook_from_rs, Data, Range, Reader, Xls, Xlsx};
use csv::ReaderBuilder;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

// ==========================================
// Cell / SheetGrid
// ==========================================

/// 单元格值（与具体文件格式无关）
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

static EMPTY_CELL: Cell = Cell::Empty;

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// 文本表示（整数不带小数点）
    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Cell::Bool(b) => b.to_string(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&Data> for Cell {
    fn from(value: &Data) -> Self {
        match value {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Bool(*b),
            // 日期单元格保留为 Excel 序列号，由字段映射层统一换算
            Data::DateTime(dt) => Cell::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        }
    }
}

/// 二维单元格表格，行列均为 0 起
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetGrid {
    rows: Vec<Vec<Cell>>,
}

impl SheetGrid {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    /// 由字符串二维数组构造（空串视为空单元格）
    pub fn from_strings<R, S>(rows: impl IntoIterator<Item = R>) -> Self
    where
        R: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|s| {
                        let s = s.as_ref();
                        if s.is_empty() {
                            Cell::Empty
                        } else {
                            Cell::Text(s.to_string())
                        }
                    })
                    .collect()
            })
            .collect();
        Self { rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, index: usize) -> &[Cell] {
        self.rows.get(index).map(|r| r.as_slice()).unwrap_or(&[])
    }

    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    pub fn is_blank(&self) -> bool {
        self.rows.iter().all(|r| r.iter().all(Cell::is_empty))
    }
}

// ==========================================
// SheetParser Trait
// ==========================================
pub trait SheetParser: Send + Sync {
    /// 将文件字节解析为单元格表格
    fn parse_grid(&self, bytes: &[u8]) -> ImportResult<SheetGrid>;
}

/// 源文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Xlsx,
    Xls,
    Csv,
}

impl SourceFormat {
    /// 按魔数嗅探格式
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
        const CFB_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];

        if bytes.starts_with(ZIP_MAGIC) {
            Some(SourceFormat::Xlsx)
        } else if bytes.starts_with(CFB_MAGIC) {
            Some(SourceFormat::Xls)
        } else if !bytes.is_empty() && !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok() {
            Some(SourceFormat::Csv)
        } else {
            None
        }
    }

    pub fn from_extension(path: &Path) -> ImportResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "xlsx" | "xlsm" => Ok(SourceFormat::Xlsx),
            "xls" => Ok(SourceFormat::Xls),
            "csv" | "txt" => Ok(SourceFormat::Csv),
            _ => Err(ImportError::UnsupportedFormat(ext)),
        }
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
pub struct ExcelSheetParser {
    format: SourceFormat,
}

impl ExcelSheetParser {
    pub fn xlsx() -> Self {
        Self { format: SourceFormat::Xlsx }
    }

    pub fn xls() -> Self {
        Self { format: SourceFormat::Xls }
    }
}

/// 读取第一个工作表
fn first_sheet_range<R>(workbook: &mut R) -> ImportResult<Range<Data>>
where
    R: Reader<Cursor<Vec<u8>>>,
    ImportError: From<R::Error>,
{
    let sheet_names = workbook.sheet_names();
    let sheet_name = sheet_names
        .first()
        .cloned()
        .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无工作表".to_string()))?;

    let range = workbook.worksheet_range(&sheet_name)?;
    debug!(sheet = %sheet_name, "读取工作表");
    Ok(range)
}

/// Range → SheetGrid（按 range.start() 补齐前导空行/空列）
fn range_to_grid(range: &Range<Data>) -> SheetGrid {
    let (start_row, start_col) = match range.start() {
        Some((r, c)) => (r as usize, c as usize),
        None => return SheetGrid::default(),
    };

    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); start_row];
    for data_row in range.rows() {
        let mut row = vec![Cell::Empty; start_col];
        row.extend(data_row.iter().map(Cell::from));
        rows.push(row);
    }
    SheetGrid::new(rows)
}

impl SheetParser for ExcelSheetParser {
    fn parse_grid(&self, bytes: &[u8]) -> ImportResult<SheetGrid> {
        let cursor = Cursor::new(bytes.to_vec());
        let range = match self.format {
            SourceFormat::Xls => {
                let mut workbook: Xls<_> = open_workbook_from_rs(cursor)?;
                first_sheet_range(&mut workbook)?
            }
            _ => {
                let mut workbook: Xlsx<_> = open_workbook_from_rs(cursor)?;
                first_sheet_range(&mut workbook)?
            }
        };
        Ok(range_to_grid(&range))
    }
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvSheetParser;

impl CsvSheetParser {
    /// 按前几行出现次数选择分隔符（, ; \t）
    fn detect_delimiter(text: &str) -> u8 {
        let sample: Vec<&str> = text.lines().take(10).collect();
        // 计数相同时取靠后的候选，即优先逗号
        [b'\t', b';', b',']
            .into_iter()
            .max_by_key(|d| {
                sample
                    .iter()
                    .map(|line| line.bytes().filter(|b| *b == *d).count())
                    .sum::<usize>()
            })
            .unwrap_or(b',')
    }
}

impl SheetParser for CsvSheetParser {
    fn parse_grid(&self, bytes: &[u8]) -> ImportResult<SheetGrid> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ImportError::CsvParseError(format!("非 UTF-8 文本: {}", e)))?;
        let text = text.trim_start_matches('\u{feff}');

        let mut reader = ReaderBuilder::new()
            .has_headers(false) // 表头位置需自行探测
            .flexible(true) // 允许行长度不一致
            .delimiter(Self::detect_delimiter(text))
            .from_reader(text.as_bytes());

        let mut rows: Vec<Vec<Cell>> = Vec::new();
        // 下一条记录若紧接上一条，应出现的物理行号（1 起）
        let mut expected_line: u64 = 1;
        for result in reader.records() {
            let record = result?;
            // csv 会跳过空行：只按记录之间的空行数补齐，
            // 引号内换行占用的物理行不计入表格行
            if let Some(position) = record.position() {
                let start_line = position.line();
                for _ in expected_line..start_line {
                    rows.push(Vec::new());
                }
                let embedded_newlines = record
                    .iter()
                    .map(|value| value.matches('\n').count() as u64)
                    .sum::<u64>();
                expected_line = start_line + embedded_newlines + 1;
            }
            let row = record
                .iter()
                .map(|value| {
                    let value = value.trim();
                    if value.is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(value.to_string())
                    }
                })
                .collect();
            rows.push(row);
        }

        Ok(SheetGrid::new(rows))
    }
}

// ==========================================
// 通用解析器（魔数嗅探或显式指定格式）
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct UniversalSheetParser {
    format: Option<SourceFormat>,
}

impl UniversalSheetParser {
    pub fn with_format(format: SourceFormat) -> Self {
        Self { format: Some(format) }
    }

    pub fn for_path(path: &Path) -> ImportResult<Self> {
        Ok(Self::with_format(SourceFormat::from_extension(path)?))
    }
}

impl SheetParser for UniversalSheetParser {
    fn parse_grid(&self, bytes: &[u8]) -> ImportResult<SheetGrid> {
        let format = match self.format {
            Some(format) => format,
            None => SourceFormat::sniff(bytes)
                .ok_or_else(|| ImportError::UnsupportedFormat("无法识别的文件内容".to_string()))?,
        };
        debug!(format = ?format, size = bytes.len(), "解析文件");

        let grid = match format {
            SourceFormat::Xlsx => ExcelSheetParser::xlsx().parse_grid(bytes)?,
            SourceFormat::Xls => ExcelSheetParser::xls().parse_grid(bytes)?,
            SourceFormat::Csv => CsvSheetParser.parse_grid(bytes)?,
        };

        if grid.is_blank() {
            return Err(ImportError::EmptySheet("未找到任何数据".to_string()));
        }
        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_formats() {
        assert_eq!(SourceFormat::sniff(b"PK\x03\x04rest"), Some(SourceFormat::Xlsx));
        assert_eq!(
            SourceFormat::sniff(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1]),
            Some(SourceFormat::Xls)
        );
        assert_eq!(SourceFormat::sniff("Remisión,Volumen\n1,2".as_bytes()), Some(SourceFormat::Csv));
        assert_eq!(SourceFormat::sniff(&[0x00, 0xFF, 0xFE]), None);
        assert_eq!(SourceFormat::sniff(b""), None);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            SourceFormat::from_extension(Path::new("export.XLSX")).unwrap(),
            SourceFormat::Xlsx
        );
        assert!(matches!(
            SourceFormat::from_extension(Path::new("export.pdf")),
            Err(ImportError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_csv_semicolon_grid() {
        let csv = "\u{feff}Planta;;X\n\nRemisión;Volumen\n 001 ;7,5\n";
        let grid = UniversalSheetParser::default().parse_grid(csv.as_bytes()).unwrap();

        assert_eq!(grid.cell(0, 0), &Cell::Text("Planta".to_string()));
        assert!(grid.cell(0, 1).is_empty());
        assert_eq!(grid.cell(3, 0).as_text(), "001");
        assert_eq!(grid.cell(3, 1).as_text(), "7,5");
        // 越界访问返回空单元格
        assert!(grid.cell(99, 99).is_empty());
    }

    #[test]
    fn test_csv_multiline_cell_keeps_row_numbers() {
        let csv = "Remisión,Comentarios externos\n100,\"linea1\nlinea2\"\n101,ok\n\n102,fin\n";
        let grid = UniversalSheetParser::with_format(SourceFormat::Csv)
            .parse_grid(csv.as_bytes())
            .unwrap();

        assert_eq!(grid.row_count(), 5);
        assert_eq!(grid.cell(1, 1).as_text(), "linea1\nlinea2");
        assert_eq!(grid.cell(2, 0).as_text(), "101");
        assert_eq!(grid.cell(2, 1).as_text(), "ok");
        // 真实空行仍保留
        assert!(grid.row(3).is_empty());
        assert_eq!(grid.cell(4, 0).as_text(), "102");
    }

    #[test]
    fn test_blank_input_is_empty_sheet() {
        let result = UniversalSheetParser::with_format(SourceFormat::Csv).parse_grid(b" , ,\n");
        assert!(matches!(result, Err(ImportError::EmptySheet(_))));
    }

    #[test]
    fn test_garbage_xlsx_is_excel_error() {
        let result = UniversalSheetParser::default().parse_grid(b"PK\x03\x04not a zip");
        assert!(matches!(result, Err(ImportError::ExcelParseError(_))));
    }

    #[test]
    fn test_number_cell_text() {
        assert_eq!(Cell::Number(7789.0).as_text(), "7789");
        assert_eq!(Cell::Number(7.5).as_text(), "7.5");
    }
}
