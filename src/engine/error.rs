// ==========================================
// 调度导出导入系统 - 创建器错误类型
// ==========================================
// 职责: 区分调用级失败（CreatorError）与行级问题（CreationIssue）
// ==========================================

use crate::repository::error::RepositoryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 调用级失败：校验/重算阶段无法读取存储，整次调用中止
#[derive(Error, Debug)]
pub enum CreatorError {
    #[error("存储访问失败: {0}")]
    Storage(#[from] RepositoryError),

    #[error("订单锁获取失败: {0}")]
    LockError(String),
}

pub type CreatorResult<T> = Result<T, CreatorError>;

// ==========================================
// CreationIssueKind - 创建器问题类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreationIssueKind {
    // 阻断（校验）
    OrderNotFound,
    OrderNotOpen,
    DuplicateDeliveryNumber,
    // 警告（校验）
    CreditNotApproved,
    DateMismatch,
    // 行级（创建）
    InvalidVolume,
    DeliveryPersistenceFailure,
    MaterialPersistenceFailure,
    // 订单级（创建后）
    TotalsRecomputeFailure,
}

impl fmt::Display for CreationIssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CreationIssueKind::OrderNotFound => "ORDER_NOT_FOUND",
            CreationIssueKind::OrderNotOpen => "ORDER_NOT_OPEN",
            CreationIssueKind::DuplicateDeliveryNumber => "DUPLICATE_DELIVERY_NUMBER",
            CreationIssueKind::CreditNotApproved => "CREDIT_NOT_APPROVED",
            CreationIssueKind::DateMismatch => "DATE_MISMATCH",
            CreationIssueKind::InvalidVolume => "INVALID_VOLUME",
            CreationIssueKind::DeliveryPersistenceFailure => "DELIVERY_PERSISTENCE_FAILURE",
            CreationIssueKind::MaterialPersistenceFailure => "MATERIAL_PERSISTENCE_FAILURE",
            CreationIssueKind::TotalsRecomputeFailure => "TOTALS_RECOMPUTE_FAILURE",
        };
        write!(f, "{}", s)
    }
}

// ==========================================
// CreationIssue - 校验/创建过程中的单条问题
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationIssue {
    pub kind: CreationIssueKind,
    pub row_number: Option<usize>,
    pub delivery_numbers: Vec<String>,
    pub message: String,
}

impl CreationIssue {
    /// 订单级问题（不指向具体行）
    pub fn order_level(kind: CreationIssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            row_number: None,
            delivery_numbers: Vec::new(),
            message: message.into(),
        }
    }

    /// 行级问题
    pub fn for_row(
        kind: CreationIssueKind,
        row_number: usize,
        delivery_number: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            row_number: Some(row_number),
            delivery_numbers: vec![delivery_number.to_string()],
            message: message.into(),
        }
    }
}
