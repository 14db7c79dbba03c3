// ==========================================
// 调度导出导入系统 - 订单 Repository Trait
// ==========================================
// 说明: 订单为外部实体，只读取状态并回写汇总
// ==========================================

use crate::domain::order::{OrderSnapshot, OrderTotals};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;

// ==========================================
// OrderRepository Trait
// ==========================================
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// 查询订单快照（不存在返回 None）
    async fn find_order(&self, order_id: &str) -> RepositoryResult<Option<OrderSnapshot>>;

    /// 覆盖写入订单汇总
    async fn update_totals(&self, order_id: &str, totals: OrderTotals) -> RepositoryResult<()>;
}

// ==========================================
// PricingProvider Trait
// ==========================================
// 用途: 订单金额重算时提供单价（分级均价等定价策略不在本系统范围）
#[async_trait]
pub trait PricingProvider: Send + Sync {
    /// 订单下某产品的单价（无价格返回 None）
    async fn unit_price(&self, order_id: &str, product_id: &str) -> RepositoryResult<Option<f64>>;
}
