// ==========================================
// 调度导出导入系统 - 行级数据质量校验器
// ==========================================
// 职责: 必填字段 / 体积正数 / 产品映射 / 日期可解析
// 说明: 纯函数，不做 I/O；阻断错误使行被拒，可恢复错误仅提示
// ==========================================

use crate::domain::delivery::ValidationError;
use crate::domain::types::ValidationErrorKind;
use crate::importer::data_cleaner::ParsedCell;
use crate::importer::field_mapper::ExtractedRow;
use crate::importer::header_detector::HeaderField;
use serde_json::{json, Value};

pub struct DqValidator;

impl DqValidator {
    fn missing(row: &ExtractedRow, field: HeaderField, value: Value) -> ValidationError {
        ValidationError::fatal(
            row.row_number,
            ValidationErrorKind::MissingRequiredField,
            field.key(),
            value,
            format!("必填字段 '{}' 为空", field.key()),
        )
    }

    /// 校验必填字段（remision / volumen / cliente_nombre / obra / fecha）
    pub fn validate_required_fields(&self, row: &ExtractedRow) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let text_fields = [
            (HeaderField::DeliveryNumber, &row.delivery_number),
            (HeaderField::ClientName, &row.client_name),
            (HeaderField::Site, &row.site_name),
        ];
        for (field, value) in text_fields {
            if value.trim().is_empty() {
                errors.push(Self::missing(row, field, json!(value)));
            }
        }

        if row.volume.is_none() {
            errors.push(Self::missing(row, HeaderField::Volume, Value::Null));
        }

        if row.date == ParsedCell::Missing {
            errors.push(Self::missing(row, HeaderField::Date, Value::Null));
        }

        errors
    }

    /// 体积必须 > 0
    pub fn validate_volume(&self, row: &ExtractedRow) -> Option<ValidationError> {
        match row.volume {
            Some(volume) if volume <= 0.0 => Some(ValidationError::fatal(
                row.row_number,
                ValidationErrorKind::InvalidVolume,
                HeaderField::Volume.key(),
                json!(volume),
                "体积必须大于 0",
            )),
            _ => None,
        }
    }

    /// 技术产品编码缺失 → 需人工映射（可恢复）
    pub fn validate_product(&self, row: &ExtractedRow) -> Option<ValidationError> {
        if row.technical_product_code.trim().is_empty() {
            Some(ValidationError::recoverable(
                row.row_number,
                ValidationErrorKind::ProductNotResolved,
                HeaderField::TechnicalProduct.key(),
                json!(row.technical_product_code),
                "技术产品编码缺失，需人工映射",
            ))
        } else {
            None
        }
    }

    /// 日期/时间无法解析 → 已回退为导入时间（可恢复）
    pub fn validate_dates(&self, row: &ExtractedRow) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let ParsedCell::Unparsable(raw) = &row.date {
            errors.push(ValidationError::recoverable(
                row.row_number,
                ValidationErrorKind::InvalidDate,
                HeaderField::Date.key(),
                json!(raw),
                "日期无法解析，已回退为导入时间",
            ));
        }
        if let ParsedCell::Unparsable(raw) = &row.load_time {
            errors.push(ValidationError::recoverable(
                row.row_number,
                ValidationErrorKind::InvalidDate,
                HeaderField::LoadTime.key(),
                json!(raw),
                "装车时间无法解析，已回退为导入时间",
            ));
        }

        errors
    }

    /// 执行全部校验
    pub fn validate_row(&self, row: &ExtractedRow) -> Vec<ValidationError> {
        let mut errors = self.validate_required_fields(row);
        errors.extend(self.validate_volume(row));
        errors.extend(self.validate_product(row));
        errors.extend(self.validate_dates(row));
        errors
    }
}
