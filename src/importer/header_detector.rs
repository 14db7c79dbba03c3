// ==========================================
// 调度导出导入系统 - 表头探测器
// ==========================================
// 职责: 在前若干行中定位表头行，解析固定字段列索引
// 说明: 导出文件表头位置不固定（前置标题/元信息块），按字段模式命中数评分
// ==========================================

use crate::importer::file_parser::{Cell, SheetGrid};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// 默认最多扫描的行数
pub const DEFAULT_HEADER_SCAN_ROWS: usize = 10;

// ==========================================
// HeaderField - 固定字段
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HeaderField {
    Order,
    DeliveryNumber,
    Status,
    Volume,
    ClientCode,
    ClientName,
    TaxId,
    Site,
    DeliveryPoint,
    CommercialProduct,
    TechnicalProduct,
    Description,
    InternalComments,
    ExternalComments,
    Elements,
    Truck,
    Plates,
    Driver,
    Pumpable,
    Date,
    LoadTime,
}

static FIELD_PATTERNS: Lazy<Vec<(HeaderField, Regex)>> = Lazy::new(|| {
    HeaderField::ALL
        .iter()
        .map(|field| {
            let regex = Regex::new(field.pattern_source()).expect("header field pattern compiles");
            (*field, regex)
        })
        .collect()
});

impl HeaderField {
    pub const ALL: [HeaderField; 21] = [
        HeaderField::Order,
        HeaderField::DeliveryNumber,
        HeaderField::Status,
        HeaderField::Volume,
        HeaderField::ClientCode,
        HeaderField::ClientName,
        HeaderField::TaxId,
        HeaderField::Site,
        HeaderField::DeliveryPoint,
        HeaderField::CommercialProduct,
        HeaderField::TechnicalProduct,
        HeaderField::Description,
        HeaderField::InternalComments,
        HeaderField::ExternalComments,
        HeaderField::Elements,
        HeaderField::Truck,
        HeaderField::Plates,
        HeaderField::Driver,
        HeaderField::Pumpable,
        HeaderField::Date,
        HeaderField::LoadTime,
    ];

    fn pattern_source(&self) -> &'static str {
        match self {
            HeaderField::Order => r"(?i)\borden\b",
            HeaderField::DeliveryNumber => r"(?i)remisi[oó]n",
            HeaderField::Status => r"(?i)estatus",
            HeaderField::Volume => r"(?i)volumen",
            HeaderField::ClientCode => r"(?i)^\s*#\s*cliente\b",
            HeaderField::ClientName => r"(?i)^\s*cliente\b",
            HeaderField::TaxId => r"(?i)\brfc\b",
            HeaderField::Site => r"(?i)\bobra\b",
            HeaderField::DeliveryPoint => r"(?i)punto.*entrega",
            HeaderField::CommercialProduct => r"(?i)prod.*comercial",
            HeaderField::TechnicalProduct => r"(?i)prod.*t[eé]cnico",
            HeaderField::Description => r"(?i)descrip",
            HeaderField::InternalComments => r"(?i)comentarios.*internos",
            HeaderField::ExternalComments => r"(?i)comentarios.*externos",
            HeaderField::Elements => r"(?i)elementos",
            HeaderField::Truck => r"(?i)cam[ií]on",
            HeaderField::Plates => r"(?i)placas",
            HeaderField::Driver => r"(?i)chofer",
            HeaderField::Pumpable => r"(?i)(b/nb|bombeable)",
            HeaderField::Date => r"(?i)\bfecha\b",
            HeaderField::LoadTime => r"(?i)hora.*carga",
        }
    }

    /// 校验错误中使用的字段名
    pub fn key(&self) -> &'static str {
        match self {
            HeaderField::Order => "orden",
            HeaderField::DeliveryNumber => "remision",
            HeaderField::Status => "estatus",
            HeaderField::Volume => "volumen",
            HeaderField::ClientCode => "cliente_codigo",
            HeaderField::ClientName => "cliente_nombre",
            HeaderField::TaxId => "rfc",
            HeaderField::Site => "obra",
            HeaderField::DeliveryPoint => "punto_entrega",
            HeaderField::CommercialProduct => "prod_comercial",
            HeaderField::TechnicalProduct => "prod_tecnico",
            HeaderField::Description => "product_description",
            HeaderField::InternalComments => "comentarios_internos",
            HeaderField::ExternalComments => "comentarios_externos",
            HeaderField::Elements => "elementos",
            HeaderField::Truck => "camion",
            HeaderField::Plates => "placas",
            HeaderField::Driver => "chofer",
            HeaderField::Pumpable => "bombeable",
            HeaderField::Date => "fecha",
            HeaderField::LoadTime => "hora_carga",
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        FIELD_PATTERNS
            .iter()
            .find(|(field, _)| field == self)
            .map(|(_, regex)| regex.is_match(text))
            .unwrap_or(false)
    }

    /// 文本是否命中任一固定字段模式
    pub fn matches_any(text: &str) -> bool {
        FIELD_PATTERNS.iter().any(|(_, regex)| regex.is_match(text))
    }
}

fn row_texts(cells: &[Cell]) -> Vec<String> {
    cells.iter().map(Cell::as_text).collect()
}

/// 表头行得分 = 至少命中一个单元格的字段数
pub fn score_row(cells: &[Cell]) -> usize {
    let texts = row_texts(cells);
    FIELD_PATTERNS
        .iter()
        .filter(|(_, regex)| texts.iter().any(|t| regex.is_match(t)))
        .count()
}

/// 定位表头行
///
/// 扫描前 max_scan 行，最高分者胜；并列取靠前的行。空表返回 0。
pub fn find_header_row(grid: &SheetGrid, max_scan: usize) -> usize {
    let limit = max_scan.min(grid.row_count());
    let mut best_index = 0;
    let mut best_score: Option<usize> = None;

    for index in 0..limit {
        let score = score_row(grid.row(index));
        if best_score.map_or(true, |best| score > best) {
            best_score = Some(score);
            best_index = index;
        }
    }

    best_index
}

// ==========================================
// FieldColumns - 固定字段列索引（每文件解析一次）
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldColumns {
    columns: HashMap<HeaderField, usize>,
}

impl FieldColumns {
    /// 每个字段取第一个命中的列
    pub fn resolve(header: &[Cell]) -> Self {
        let texts = row_texts(header);
        let mut columns = HashMap::new();

        for (field, regex) in FIELD_PATTERNS.iter() {
            if let Some(index) = texts.iter().position(|t| regex.is_match(t)) {
                columns.insert(*field, index);
            }
        }

        Self { columns }
    }

    pub fn get(&self, field: HeaderField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    /// 被固定字段占用的列
    pub fn is_field_column(&self, index: usize) -> bool {
        self.columns.values().any(|c| *c == index)
    }
}
