// ==========================================
// 调度导出导入系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型与纯计算规则
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod delivery;
pub mod order;
pub mod types;

// 重导出核心类型
pub use delivery::{
    DeliveryRecord, ExportMetadata, MaterialCode, MaterialConsumptionRecord, MaterialMeasures,
    ParseResult, RawDeliveryRow, StagingDelivery, StatusSummary, ValidationError,
};
pub use order::{OrderSnapshot, OrderTotals, PricedVolume};
pub use types::{
    CreditState, DeliveryStatus, MeasureKey, OrderLifecycleState, ValidationErrorKind,
};
