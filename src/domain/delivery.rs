// ==========================================
// 调度导出导入系统 - 送货单领域模型
// ==========================================
// 职责: 解析行 / 暂存行 / 落库送货单 / 材料消耗记录
// 生命周期: RawDeliveryRow 由解析器生成 → 人工映射为 StagingDelivery → 创建器落库
// ==========================================

use crate::domain::types::{DeliveryStatus, MeasureKey, ValidationErrorKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 材料编码（表头中发现，已大写）
pub type MaterialCode = String;

// ==========================================
// MaterialMeasures - 单个材料的度量值
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialMeasures {
    pub planned: f64, // 理论用量
    pub actual: f64,  // 实际用量
    pub rework: f64,  // 返工量（无此列时为 0）
    pub manual: f64,  // 人工调整量（无此列时为 0）
}

impl MaterialMeasures {
    pub fn get(&self, key: MeasureKey) -> f64 {
        match key {
            MeasureKey::Planned => self.planned,
            MeasureKey::Actual => self.actual,
            MeasureKey::Rework => self.rework,
            MeasureKey::Manual => self.manual,
        }
    }
}

// ==========================================
// RawDeliveryRow - 解析后的导出行
// ==========================================
// 用途: 解析器输出，构造后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDeliveryRow {
    pub row_number: usize, // 原始表格行号（1 起）

    // ===== 标识 =====
    pub order_reference: Option<String>,
    pub delivery_number: String,
    pub status_text: String,

    // ===== 送货事实 =====
    pub volume: f64,
    pub client_code: String,
    pub client_name: String,
    pub tax_id: String,
    pub site_name: String,
    pub delivery_point: String,

    // ===== 产品 =====
    pub commercial_product_code: String,
    pub technical_product_code: String,
    pub product_description: String,
    pub elements_text: String,

    // ===== 物流 =====
    pub truck_id: String,
    pub plate_number: String,
    pub driver_name: String,
    pub pumpable_flag: String,

    // ===== 时间 =====
    pub date: NaiveDate,
    pub load_time: NaiveTime,

    // ===== 备注 =====
    pub internal_comments: String,
    pub external_comments: String,

    pub materials: BTreeMap<MaterialCode, MaterialMeasures>,
}

impl RawDeliveryRow {
    pub fn status(&self) -> DeliveryStatus {
        DeliveryStatus::from_status_text(&self.status_text)
    }
}

// ==========================================
// ValidationError - 行级校验错误
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub row_number: usize,
    pub error_kind: ValidationErrorKind,
    pub field_name: String,
    pub field_value: serde_json::Value,
    pub message: String,
    pub recoverable: bool,
}

impl ValidationError {
    /// 阻断级错误
    pub fn fatal(
        row_number: usize,
        error_kind: ValidationErrorKind,
        field_name: &str,
        field_value: serde_json::Value,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row_number,
            error_kind,
            field_name: field_name.to_string(),
            field_value,
            message: message.into(),
            recoverable: false,
        }
    }

    /// 可恢复错误（行仍保留）
    pub fn recoverable(
        row_number: usize,
        error_kind: ValidationErrorKind,
        field_name: &str,
        field_value: serde_json::Value,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recoverable: true,
            ..Self::fatal(row_number, error_kind, field_name, field_value, message)
        }
    }
}

// ==========================================
// StatusSummary - 有效行的状态分布
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub completed: usize,
    pub completed_incomplete: usize,
    pub cancelled: usize,
    pub pending: usize,
    pub unrecognized: usize,
}

impl StatusSummary {
    pub fn from_rows(rows: &[RawDeliveryRow]) -> Self {
        let mut summary = Self::default();
        for row in rows {
            match row.status() {
                DeliveryStatus::Completed => summary.completed += 1,
                DeliveryStatus::CompletedIncomplete => summary.completed_incomplete += 1,
                DeliveryStatus::Cancelled => summary.cancelled += 1,
                DeliveryStatus::Pending => summary.pending += 1,
                DeliveryStatus::Unrecognized => summary.unrecognized += 1,
            }
        }
        summary
    }
}

// ==========================================
// ExportMetadata - 导出文件元信息
// ==========================================
// 说明: 元信息仅作参考，缺失时宽松取默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub plant_identifier: String,
    pub date_range_start: NaiveDateTime,
    pub date_range_end: NaiveDateTime,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub header_row_index: usize,
    pub material_codes: Vec<MaterialCode>,
    pub status_summary: StatusSummary,
}

// ==========================================
// ParseResult - 解析器输出
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    pub rows: Vec<RawDeliveryRow>,
    pub errors: Vec<ValidationError>,
    pub metadata: ExportMetadata,
}

impl ParseResult {
    pub fn blocking_errors(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(|e| !e.recoverable)
    }

    pub fn rejected_row_count(&self) -> usize {
        let mut rows: Vec<usize> = self.blocking_errors().map(|e| e.row_number).collect();
        rows.sort_unstable();
        rows.dedup();
        rows.len()
    }
}

// ==========================================
// StagingDelivery - 待落库送货单
// ==========================================
// 用途: 已完成产品映射，作为创建器只读输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingDelivery {
    pub source_batch_id: String,
    pub row_number: usize,
    pub order_reference: Option<String>,
    pub delivery_number: String,
    pub status_text: String,
    pub date: NaiveDate,
    pub load_time: NaiveTime,
    pub volume: f64,
    pub client_code: String,
    pub client_name: String,
    pub tax_id: Option<String>,
    pub site_name: String,
    pub delivery_point: Option<String>,
    pub commercial_product_code: Option<String>,
    pub technical_product_code: String,
    pub product_description: Option<String>,
    pub resolved_product_id: String,
    pub elements_text: Option<String>,
    pub truck_id: Option<String>,
    pub plate_number: Option<String>,
    pub driver_name: Option<String>,
    pub pumpable: Option<bool>,
    pub internal_comments: Option<String>,
    pub external_comments: Option<String>,
    #[serde(default)]
    pub plant_identifier: Option<String>,
    #[serde(default)]
    pub materials_planned: BTreeMap<MaterialCode, f64>,
    #[serde(default)]
    pub materials_actual: BTreeMap<MaterialCode, f64>,
    #[serde(default)]
    pub materials_rework: BTreeMap<MaterialCode, f64>,
    #[serde(default)]
    pub materials_manual: BTreeMap<MaterialCode, f64>,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl StagingDelivery {
    /// 将解析行提升为暂存行
    ///
    /// # 参数
    /// - row: 解析器输出行
    /// - source_batch_id: 导入批次 ID
    /// - resolved_product_id: 人工/自动映射后的内部产品（配方）ID
    /// - pumpable: 已归一化的泵送标记
    pub fn from_raw_row(
        row: &RawDeliveryRow,
        source_batch_id: &str,
        resolved_product_id: &str,
        pumpable: Option<bool>,
    ) -> Self {
        let mut materials_planned = BTreeMap::new();
        let mut materials_actual = BTreeMap::new();
        let mut materials_rework = BTreeMap::new();
        let mut materials_manual = BTreeMap::new();

        for (code, measures) in &row.materials {
            materials_planned.insert(code.clone(), measures.planned);
            materials_actual.insert(code.clone(), measures.actual);
            if measures.rework != 0.0 {
                materials_rework.insert(code.clone(), measures.rework);
            }
            if measures.manual != 0.0 {
                materials_manual.insert(code.clone(), measures.manual);
            }
        }

        Self {
            source_batch_id: source_batch_id.to_string(),
            row_number: row.row_number,
            order_reference: row.order_reference.clone(),
            delivery_number: row.delivery_number.clone(),
            status_text: row.status_text.clone(),
            date: row.date,
            load_time: row.load_time,
            volume: row.volume,
            client_code: row.client_code.clone(),
            client_name: row.client_name.clone(),
            tax_id: non_empty(&row.tax_id),
            site_name: row.site_name.clone(),
            delivery_point: non_empty(&row.delivery_point),
            commercial_product_code: non_empty(&row.commercial_product_code),
            technical_product_code: row.technical_product_code.clone(),
            product_description: non_empty(&row.product_description),
            resolved_product_id: resolved_product_id.to_string(),
            elements_text: non_empty(&row.elements_text),
            truck_id: non_empty(&row.truck_id),
            plate_number: non_empty(&row.plate_number),
            driver_name: non_empty(&row.driver_name),
            pumpable,
            internal_comments: non_empty(&row.internal_comments),
            external_comments: non_empty(&row.external_comments),
            plant_identifier: None,
            materials_planned,
            materials_actual,
            materials_rework,
            materials_manual,
        }
    }

    /// 附加来源工厂（取自 ExportMetadata.plant_identifier）
    pub fn with_plant(mut self, plant_identifier: &str) -> Self {
        self.plant_identifier = non_empty(plant_identifier);
        self
    }

    /// 四个材料表中出现过的所有材料编码（有序、去重）
    pub fn material_codes(&self) -> Vec<MaterialCode> {
        let mut codes: Vec<MaterialCode> = self
            .materials_planned
            .keys()
            .chain(self.materials_actual.keys())
            .chain(self.materials_rework.keys())
            .chain(self.materials_manual.keys())
            .cloned()
            .collect();
        codes.sort();
        codes.dedup();
        codes
    }

    /// 审计用原始载荷（不参与业务字段）
    pub fn raw_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "row_number": self.row_number,
            "order_reference": self.order_reference,
            "client_code": self.client_code,
            "client_name": self.client_name,
            "tax_id": self.tax_id,
            "site_name": self.site_name,
            "commercial_product_code": self.commercial_product_code,
            "technical_product_code": self.technical_product_code,
            "elements": self.elements_text,
            "pumpable": self.pumpable,
            "materials_planned": self.materials_planned,
            "materials_actual": self.materials_actual,
            "materials_rework": self.materials_rework,
            "materials_manual": self.materials_manual,
        })
    }
}

// ==========================================
// DeliveryRecord - 落库送货单
// ==========================================
// 红线: delivery_number 全局唯一，落库后不可覆盖
// 对齐: deliveries 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: String,
    pub order_id: String,
    pub delivery_number: String,
    pub date: NaiveDate,
    pub load_time: NaiveTime,
    pub volume: f64,
    pub driver: Option<String>,
    pub plate_number: Option<String>,
    pub truck_id: Option<String>,
    pub delivery_point: Option<String>,
    pub comments: Option<String>,          // 外部备注
    pub internal_comments: Option<String>, // 内部备注
    pub product_description: Option<String>,
    pub resolved_product_id: String,
    pub status: String,
    pub source_batch_id: String,
    pub plant_id: Option<String>,
    pub raw_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ==========================================
// MaterialConsumptionRecord - 材料消耗记录
// ==========================================
// 红线: actual_final = base + rework + manual；创建后不做原地修改
// 对齐: delivery_materials 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialConsumptionRecord {
    pub delivery_id: String,
    pub material_code: MaterialCode,
    pub planned_quantity: f64,
    pub actual_base_quantity: f64,
    pub rework_quantity: f64,
    pub manual_adjustment_quantity: f64,
    pub actual_final_quantity: f64,
    pub absolute_variance: f64,
    pub percent_variance: f64,
}

impl MaterialConsumptionRecord {
    /// 由四个原始量计算派生量（仅在创建时计算一次）
    pub fn from_quantities(
        delivery_id: &str,
        material_code: &str,
        planned: f64,
        actual_base: f64,
        rework: f64,
        manual: f64,
    ) -> Self {
        let actual_final = actual_base + rework + manual;
        let absolute_variance = actual_final - planned;
        let percent_variance = if planned != 0.0 {
            absolute_variance / planned * 100.0
        } else {
            0.0
        };

        Self {
            delivery_id: delivery_id.to_string(),
            material_code: material_code.to_string(),
            planned_quantity: planned,
            actual_base_quantity: actual_base,
            rework_quantity: rework,
            manual_adjustment_quantity: manual,
            actual_final_quantity: actual_final,
            absolute_variance,
            percent_variance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> RawDeliveryRow {
        let mut materials = BTreeMap::new();
        materials.insert(
            "CEMENTO".to_string(),
            MaterialMeasures { planned: 300.0, actual: 298.0, rework: 0.0, manual: 2.5 },
        );
        materials.insert(
            "AGUA".to_string(),
            MaterialMeasures { planned: 180.0, actual: 181.0, rework: 0.0, manual: 0.0 },
        );
        RawDeliveryRow {
            row_number: 5,
            order_reference: Some("ORD-9".to_string()),
            delivery_number: "7789".to_string(),
            status_text: "Terminado".to_string(),
            volume: 7.5,
            client_code: "C01".to_string(),
            client_name: "Constructora Norte".to_string(),
            tax_id: "".to_string(),
            site_name: "Torre A".to_string(),
            delivery_point: " ".to_string(),
            commercial_product_code: "".to_string(),
            technical_product_code: "250-10-B".to_string(),
            product_description: "Concreto 250".to_string(),
            elements_text: "".to_string(),
            truck_id: "CR-12".to_string(),
            plate_number: "ABC123".to_string(),
            driver_name: "J. Perez".to_string(),
            pumpable_flag: "B".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            load_time: NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
            internal_comments: "".to_string(),
            external_comments: "Losa nivel 3".to_string(),
            materials,
        }
    }

    #[test]
    fn test_from_raw_row_splits_materials() {
        let staging = StagingDelivery::from_raw_row(&sample_row(), "batch-1", "recipe-1", Some(true));

        assert_eq!(staging.materials_planned.get("CEMENTO"), Some(&300.0));
        assert_eq!(staging.materials_actual.get("AGUA"), Some(&181.0));
        assert_eq!(staging.materials_manual.get("CEMENTO"), Some(&2.5));
        // 为 0 的返工/人工量不进入映射
        assert!(staging.materials_rework.is_empty());
        assert!(!staging.materials_manual.contains_key("AGUA"));
        assert_eq!(staging.tax_id, None);
        assert_eq!(staging.delivery_point, None);
        assert_eq!(staging.material_codes(), vec!["AGUA".to_string(), "CEMENTO".to_string()]);
    }

    #[test]
    fn test_material_record_variance_identity() {
        let record = MaterialConsumptionRecord::from_quantities("d1", "CEMENTO", 300.0, 290.0, 4.0, 3.0);
        assert_eq!(record.actual_final_quantity, 297.0);
        assert_eq!(record.absolute_variance, -3.0);
        assert!((record.percent_variance - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_material_record_zero_planned() {
        let record = MaterialConsumptionRecord::from_quantities("d1", "ADITIVO", 0.0, 1.5, 0.0, 0.0);
        assert_eq!(record.absolute_variance, 1.5);
        assert_eq!(record.percent_variance, 0.0);
    }

    #[test]
    fn test_status_summary_counts() {
        let mut cancelled = sample_row();
        cancelled.status_text = "Cancelado".to_string();
        let summary = StatusSummary::from_rows(&[sample_row(), cancelled]);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.unrecognized, 0);
    }
}
