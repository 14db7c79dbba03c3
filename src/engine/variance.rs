// ==========================================
// 调度导出导入系统 - 材料消耗/偏差计算
// ==========================================
// 红线: 四个量全为 0 的材料不生成记录
// 公式: final = base + rework + manual; abs = final - planned;
//       pct = planned == 0 ? 0 : abs / planned * 100
// ==========================================

use crate::domain::delivery::{MaterialConsumptionRecord, StagingDelivery};

/// 为一条暂存送货单生成材料消耗记录（按材料编码排序）
pub fn build_material_records(delivery_id: &str, staging: &StagingDelivery) -> Vec<MaterialConsumptionRecord> {
    let quantity = |map: &std::collections::BTreeMap<String, f64>, code: &str| {
        map.get(code).copied().unwrap_or(0.0)
    };

    staging
        .material_codes()
        .into_iter()
        .filter_map(|code| {
            let planned = quantity(&staging.materials_planned, &code);
            let actual = quantity(&staging.materials_actual, &code);
            let rework = quantity(&staging.materials_rework, &code);
            let manual = quantity(&staging.materials_manual, &code);

            if planned == 0.0 && actual == 0.0 && rework == 0.0 && manual == 0.0 {
                return None;
            }

            Some(MaterialConsumptionRecord::from_quantities(
                delivery_id,
                &code,
                planned,
                actual,
                rework,
                manual,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use std::collections::BTreeMap;

    fn staging() -> StagingDelivery {
        StagingDelivery {
            source_batch_id: "b1".to_string(),
            row_number: 5,
            order_reference: None,
            delivery_number: "100".to_string(),
            status_text: "Terminado".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            load_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            volume: 7.0,
            client_code: "C1".to_string(),
            client_name: "Cliente".to_string(),
            tax_id: None,
            site_name: "Obra".to_string(),
            delivery_point: None,
            commercial_product_code: None,
            technical_product_code: "T-250".to_string(),
            product_description: None,
            resolved_product_id: "P-250".to_string(),
            elements_text: None,
            truck_id: None,
            plate_number: None,
            driver_name: None,
            pumpable: None,
            internal_comments: None,
            external_comments: None,
            plant_identifier: None,
            materials_planned: BTreeMap::new(),
            materials_actual: BTreeMap::new(),
            materials_rework: BTreeMap::new(),
            materials_manual: BTreeMap::new(),
        }
    }

    #[test]
    fn test_all_zero_materials_are_skipped() {
        let mut row = staging();
        row.materials_planned.insert("ADITIVO".to_string(), 0.0);
        row.materials_actual.insert("ADITIVO".to_string(), 0.0);
        row.materials_planned.insert("CEMENTO".to_string(), 300.0);
        row.materials_actual.insert("CEMENTO".to_string(), 305.0);

        let records = build_material_records("d1", &row);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].material_code, "CEMENTO");
        assert_eq!(records[0].absolute_variance, 5.0);
    }

    #[test]
    fn test_code_only_in_manual_map_is_recorded() {
        let mut row = staging();
        row.materials_manual.insert("AGUA".to_string(), 4.0);

        let records = build_material_records("d1", &row);
        assert_eq!(records.len(), 1);
        let agua = &records[0];
        assert_eq!(agua.planned_quantity, 0.0);
        assert_eq!(agua.actual_final_quantity, 4.0);
        assert_eq!(agua.percent_variance, 0.0);
    }

    #[test]
    fn test_final_quantity_identity_holds() {
        let mut row = staging();
        row.materials_planned.insert("ARENA".to_string(), 800.0);
        row.materials_actual.insert("ARENA".to_string(), 790.0);
        row.materials_rework.insert("ARENA".to_string(), 6.0);
        row.materials_manual.insert("ARENA".to_string(), -2.0);

        for record in build_material_records("d1", &row) {
            let sum = record.actual_base_quantity + record.rework_quantity + record.manual_adjustment_quantity;
            assert!((record.actual_final_quantity - sum).abs() < 1e-9);
            assert!((record.absolute_variance - (sum - record.planned_quantity)).abs() < 1e-9);
        }
    }
}
