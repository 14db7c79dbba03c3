// ==========================================
// 调度导出导入系统 - 订单快照
// ==========================================
// 说明: 订单为外部实体，本系统只读取生命周期/信用状态并回写汇总
// ==========================================

use crate::domain::types::{CreditState, OrderLifecycleState};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 订单快照（校验所需的最小字段）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: String,
    pub lifecycle_state: OrderLifecycleState,
    pub credit_state: CreditState,
    pub declared_delivery_date: Option<NaiveDate>,
}

impl OrderSnapshot {
    pub fn is_open(&self, open_states: &[OrderLifecycleState]) -> bool {
        open_states.contains(&self.lifecycle_state)
    }
}

/// 订单汇总（每次全量重算后整体覆盖）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub total_volume: f64,
    pub total_amount: f64,
}

/// 汇总计算的输入行: 一张送货单的体积与单价
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricedVolume {
    pub volume: f64,
    pub unit_price: f64,
}

impl OrderTotals {
    pub fn from_lines(lines: &[PricedVolume]) -> Self {
        lines.iter().fold(Self::default(), |acc, line| Self {
            total_volume: acc.total_volume + line.volume,
            total_amount: acc.total_amount + line.volume * line.unit_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_from_lines() {
        let totals = OrderTotals::from_lines(&[
            PricedVolume { volume: 7.0, unit_price: 100.0 },
            PricedVolume { volume: 3.5, unit_price: 0.0 },
        ]);
        assert_eq!(totals.total_volume, 10.5);
        assert_eq!(totals.total_amount, 700.0);
    }

    #[test]
    fn test_is_open() {
        let order = OrderSnapshot {
            id: "o1".to_string(),
            lifecycle_state: OrderLifecycleState::Closed,
            credit_state: CreditState::Approved,
            declared_delivery_date: None,
        };
        assert!(!order.is_open(&OrderLifecycleState::default_open_states()));
    }
}
