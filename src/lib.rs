// ==========================================
// 调度导出导入系统 - 核心库
// ==========================================
// 流程: 调度系统导出文件 → 解析器（送货单行 + 行级错误 + 元信息）
//       → 暂存行 → 创建器（送货单 + 材料消耗 + 订单汇总）
// 技术栈: Rust + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 送货单创建规则
pub mod engine;

// 导入层 - 导出文件解析
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建库）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{CreditState, DeliveryStatus, MeasureKey, OrderLifecycleState, ValidationErrorKind};

// 领域实体
pub use domain::{
    DeliveryRecord, ExportMetadata, MaterialConsumptionRecord, ParseResult, RawDeliveryRow,
    StagingDelivery, ValidationError,
};

// 解析器 / 创建器
pub use engine::{CreationResult, CreatorOptions, DeliveryCreator, OrderValidation};
pub use importer::{ParserOptions, RawExportParser};

// API
pub use api::{ApiError, ImportApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "调度导出导入系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
