// ==========================================
// 调度导出导入系统 - 配置层
// ==========================================
// 职责: 系统配置管理（解析参数 / 订单状态 / 日期容差）
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod import_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager, DEFAULT_DATE_TOLERANCE_DAYS};
pub use import_config_trait::ImportConfigReader;
