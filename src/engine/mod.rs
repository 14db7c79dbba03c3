// ==========================================
// 调度导出导入系统 - 引擎层
// ==========================================
// 职责: 送货单创建规则（预检 / 材料偏差 / 汇总重算），不拼 SQL
// ==========================================

pub mod delivery_creator;
pub mod error;
pub mod variance;

// 重导出核心引擎
pub use delivery_creator::{CreationResult, CreatorOptions, DeliveryCreator, OrderValidation};
pub use error::{CreationIssue, CreationIssueKind, CreatorError, CreatorResult};
pub use variance::build_material_records;
