// ==========================================
// 调度导出导入系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod delivery_repo;
pub mod delivery_repo_impl;
pub mod error;
pub mod order_repo;
pub mod order_repo_impl;

// 重导出核心仓储
pub use delivery_repo::{BundleInsertError, DeliveryLine, DeliveryRepository, InsertStage};
pub use delivery_repo_impl::SqliteDeliveryRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use order_repo::{OrderRepository, PricingProvider};
pub use order_repo_impl::{SqliteOrderRepository, SqlitePricingProvider};
