// ==========================================
// 调度导出导入系统 - 领域枚举类型
// ==========================================
// 职责: 度量角色 / 校验错误类型 / 送货单状态 / 订单生命周期
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// MeasureKey - 材料度量角色
// ==========================================
// 导出文件中每种材料最多四列: 理论(teórica) / 实际(real) / 返工(retrabajo) / 人工(manual)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureKey {
    Planned,
    Actual,
    Rework,
    Manual,
}

impl MeasureKey {
    pub const ALL: [MeasureKey; 4] = [
        MeasureKey::Planned,
        MeasureKey::Actual,
        MeasureKey::Rework,
        MeasureKey::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MeasureKey::Planned => "planned",
            MeasureKey::Actual => "actual",
            MeasureKey::Rework => "rework",
            MeasureKey::Manual => "manual",
        }
    }
}

// ==========================================
// ValidationErrorKind - 行级校验错误类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationErrorKind {
    MissingRequiredField, // 必填字段缺失（阻断）
    InvalidVolume,        // 体积 <= 0（阻断）
    DataTypeError,        // 行无法解析（阻断）
    ProductNotResolved,   // 技术产品编码缺失（可恢复，需人工映射）
    InvalidDate,          // 日期无法解析，已回退为导入时间（可恢复）
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationErrorKind::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            ValidationErrorKind::InvalidVolume => "INVALID_VOLUME",
            ValidationErrorKind::DataTypeError => "DATA_TYPE_ERROR",
            ValidationErrorKind::ProductNotResolved => "PRODUCT_NOT_RESOLVED",
            ValidationErrorKind::InvalidDate => "INVALID_DATE",
        };
        write!(f, "{}", s)
    }
}

// ==========================================
// DeliveryStatus - 送货单状态（由 status_text 归类）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Completed,           // terminado
    CompletedIncomplete, // terminado incompleto
    Cancelled,           // cancelado
    Pending,             // pendiente
    Unrecognized,
}

impl DeliveryStatus {
    /// 按导出文件中的状态文本归类（大小写与多余空白不敏感）
    pub fn from_status_text(text: &str) -> Self {
        let normalized = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        match normalized.as_str() {
            "terminado" => DeliveryStatus::Completed,
            "terminado incompleto" => DeliveryStatus::CompletedIncomplete,
            "cancelado" => DeliveryStatus::Cancelled,
            "pendiente" => DeliveryStatus::Pending,
            _ => DeliveryStatus::Unrecognized,
        }
    }
}

// ==========================================
// OrderLifecycleState - 订单生命周期
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderLifecycleState {
    Created,
    Validated,
    Scheduled,
    Closed,
    Cancelled,
    Other(String),
}

impl OrderLifecycleState {
    pub fn from_db_str(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "created" => OrderLifecycleState::Created,
            "validated" => OrderLifecycleState::Validated,
            "scheduled" => OrderLifecycleState::Scheduled,
            "closed" => OrderLifecycleState::Closed,
            "cancelled" => OrderLifecycleState::Cancelled,
            other => OrderLifecycleState::Other(other.to_string()),
        }
    }

    pub fn to_db_str(&self) -> &str {
        match self {
            OrderLifecycleState::Created => "created",
            OrderLifecycleState::Validated => "validated",
            OrderLifecycleState::Scheduled => "scheduled",
            OrderLifecycleState::Closed => "closed",
            OrderLifecycleState::Cancelled => "cancelled",
            OrderLifecycleState::Other(s) => s.as_str(),
        }
    }

    /// 默认可接收新送货单的状态集合
    pub fn default_open_states() -> Vec<OrderLifecycleState> {
        vec![
            OrderLifecycleState::Created,
            OrderLifecycleState::Validated,
            OrderLifecycleState::Scheduled,
        ]
    }
}

impl fmt::Display for OrderLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// CreditState - 订单信用审批状态
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditState {
    Approved,
    Pending,
    Rejected,
    Other(String),
}

impl CreditState {
    pub fn from_db_str(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "approved" => CreditState::Approved,
            "pending" => CreditState::Pending,
            "rejected" => CreditState::Rejected,
            other => CreditState::Other(other.to_string()),
        }
    }

    pub fn to_db_str(&self) -> &str {
        match self {
            CreditState::Approved => "approved",
            CreditState::Pending => "pending",
            CreditState::Rejected => "rejected",
            CreditState::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for CreditState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_status_from_text() {
        assert_eq!(DeliveryStatus::from_status_text("Terminado"), DeliveryStatus::Completed);
        assert_eq!(
            DeliveryStatus::from_status_text("  TERMINADO   incompleto "),
            DeliveryStatus::CompletedIncomplete
        );
        assert_eq!(DeliveryStatus::from_status_text("cancelado"), DeliveryStatus::Cancelled);
        assert_eq!(DeliveryStatus::from_status_text("Pendiente"), DeliveryStatus::Pending);
        assert_eq!(DeliveryStatus::from_status_text("???"), DeliveryStatus::Unrecognized);
    }

    #[test]
    fn test_lifecycle_state_roundtrip_unknown() {
        let state = OrderLifecycleState::from_db_str("On_Hold");
        assert_eq!(state, OrderLifecycleState::Other("on_hold".to_string()));
        assert_eq!(state.to_db_str(), "on_hold");
    }

    #[test]
    fn test_default_open_states() {
        let open = OrderLifecycleState::default_open_states();
        assert!(open.contains(&OrderLifecycleState::Scheduled));
        assert!(!open.contains(&OrderLifecycleState::Closed));
    }
}
