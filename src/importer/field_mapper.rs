// ==========================================
// 调度导出导入系统 - 字段映射器实现
// ==========================================
// 职责: 数据行单元格 → ExtractedRow（固定字段 + 材料度量）
// 说明: 列索引在构造时解析一次，逐行复用
// ==========================================

use crate::domain::delivery::{MaterialMeasures, RawDeliveryRow};
use crate::importer::data_cleaner::{DataCleaner, ParsedCell};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::Cell;
use crate::importer::header_detector::{FieldColumns, HeaderField};
use crate::importer::material_blocks::MaterialColumnBlock;
use chrono::{NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;

/// 字段映射后、校验前的行
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRow {
    pub row_number: usize,
    pub order_reference: Option<String>,
    pub delivery_number: String,
    pub status_text: String,
    pub volume: Option<f64>,
    pub client_code: String,
    pub client_name: String,
    pub tax_id: String,
    pub site_name: String,
    pub delivery_point: String,
    pub commercial_product_code: String,
    pub technical_product_code: String,
    pub product_description: String,
    pub elements_text: String,
    pub truck_id: String,
    pub plate_number: String,
    pub driver_name: String,
    pub pumpable_flag: String,
    pub date: ParsedCell<NaiveDateTime>,
    pub load_time: ParsedCell<NaiveTime>,
    pub internal_comments: String,
    pub external_comments: String,
    pub materials: BTreeMap<String, MaterialMeasures>,
}

impl ExtractedRow {
    /// 转为不可变的 RawDeliveryRow
    ///
    /// 无法解析的日期/时间回退为 now；缺失的装车时间取日期单元格的时间部分
    pub fn into_raw_row(self, now: NaiveDateTime) -> RawDeliveryRow {
        let date_time = match &self.date {
            ParsedCell::Parsed(dt) => *dt,
            _ => now,
        };
        let load_time = match self.load_time {
            ParsedCell::Parsed(t) => t,
            ParsedCell::Unparsable(_) => now.time(),
            ParsedCell::Missing => date_time.time(),
        };

        RawDeliveryRow {
            row_number: self.row_number,
            order_reference: self.order_reference,
            delivery_number: self.delivery_number,
            status_text: self.status_text,
            volume: self.volume.unwrap_or(0.0),
            client_code: self.client_code,
            client_name: self.client_name,
            tax_id: self.tax_id,
            site_name: self.site_name,
            delivery_point: self.delivery_point,
            commercial_product_code: self.commercial_product_code,
            technical_product_code: self.technical_product_code,
            product_description: self.product_description,
            elements_text: self.elements_text,
            truck_id: self.truck_id,
            plate_number: self.plate_number,
            driver_name: self.driver_name,
            pumpable_flag: self.pumpable_flag,
            date: date_time.date(),
            load_time,
            internal_comments: self.internal_comments,
            external_comments: self.external_comments,
            materials: self.materials,
        }
    }
}

pub struct FieldMapper {
    columns: FieldColumns,
    blocks: Vec<MaterialColumnBlock>,
    cleaner: DataCleaner,
}

impl FieldMapper {
    pub fn new(columns: FieldColumns, blocks: Vec<MaterialColumnBlock>) -> Self {
        Self {
            columns,
            blocks,
            cleaner: DataCleaner,
        }
    }

    pub fn columns(&self) -> &FieldColumns {
        &self.columns
    }

    pub fn blocks(&self) -> &[MaterialColumnBlock] {
        &self.blocks
    }

    fn cell<'a>(&self, cells: &'a [Cell], field: HeaderField) -> Option<&'a Cell> {
        self.columns.get(field).and_then(|idx| cells.get(idx))
    }

    /// 提取文本字段（缺列/空单元格 → 空串）
    fn text(&self, cells: &[Cell], field: HeaderField) -> String {
        self.cell(cells, field)
            .map(|c| self.cleaner.clean_text(&c.as_text(), false))
            .unwrap_or_default()
    }

    fn measure(&self, cells: &[Cell], col: Option<usize>) -> f64 {
        col.and_then(|idx| cells.get(idx))
            .and_then(|c| self.cleaner.parse_number_cell(c).parsed())
            .unwrap_or(0.0)
    }

    /// 送货单号单元格是否为空（空则整行跳过）
    pub fn has_delivery_number(&self, cells: &[Cell]) -> bool {
        self.cell(cells, HeaderField::DeliveryNumber)
            .map(|c| !c.is_empty())
            .unwrap_or(false)
    }

    /// 映射一行
    ///
    /// # 错误
    /// - 体积单元格非空但无法解析 → TypeConversionError
    pub fn map_row(&self, row_number: usize, cells: &[Cell]) -> ImportResult<ExtractedRow> {
        let volume = match self.cell(cells, HeaderField::Volume) {
            None => None,
            Some(cell) => match self.cleaner.parse_number_cell(cell) {
                ParsedCell::Parsed(v) => Some(v),
                ParsedCell::Missing => None,
                ParsedCell::Unparsable(raw) => {
                    return Err(ImportError::TypeConversionError {
                        row: row_number,
                        field: HeaderField::Volume.key().to_string(),
                        message: format!("无法解析为数值: {}", raw),
                    })
                }
            },
        };

        let date = self
            .cell(cells, HeaderField::Date)
            .map(|c| self.cleaner.parse_datetime_cell(c))
            .unwrap_or(ParsedCell::Missing);
        let load_time = self
            .cell(cells, HeaderField::LoadTime)
            .map(|c| self.cleaner.parse_time_cell(c))
            .unwrap_or(ParsedCell::Missing);

        let mut materials = BTreeMap::new();
        for block in &self.blocks {
            // 全零材料同样保留，是否落库由创建器判断
            materials.insert(
                block.material_code.clone(),
                MaterialMeasures {
                    planned: self.measure(cells, Some(block.planned)),
                    actual: self.measure(cells, Some(block.actual)),
                    rework: self.measure(cells, block.rework),
                    manual: self.measure(cells, block.manual),
                },
            );
        }

        Ok(ExtractedRow {
            row_number,
            order_reference: self
                .cleaner
                .normalize_null(Some(self.text(cells, HeaderField::Order))),
            delivery_number: self
                .cleaner
                .normalize_delivery_number(&self.text(cells, HeaderField::DeliveryNumber)),
            status_text: self.text(cells, HeaderField::Status),
            volume,
            client_code: self.text(cells, HeaderField::ClientCode),
            client_name: self.text(cells, HeaderField::ClientName),
            tax_id: self.text(cells, HeaderField::TaxId),
            site_name: self.text(cells, HeaderField::Site),
            delivery_point: self.text(cells, HeaderField::DeliveryPoint),
            commercial_product_code: self.text(cells, HeaderField::CommercialProduct),
            technical_product_code: self.text(cells, HeaderField::TechnicalProduct),
            product_description: self.text(cells, HeaderField::Description),
            elements_text: self.text(cells, HeaderField::Elements),
            truck_id: self.text(cells, HeaderField::Truck),
            plate_number: self.text(cells, HeaderField::Plates),
            driver_name: self.text(cells, HeaderField::Driver),
            pumpable_flag: self.text(cells, HeaderField::Pumpable),
            date,
            load_time,
            internal_comments: self.text(cells, HeaderField::InternalComments),
            external_comments: self.text(cells, HeaderField::ExternalComments),
            materials,
        })
    }
}
