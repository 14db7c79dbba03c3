// ==========================================
// 调度导出导入系统 - 送货单 Repository Trait
// ==========================================
// 职责: 定义送货单/材料消耗数据访问接口（不包含业务逻辑）
// 红线: 送货单与其材料记录作为一个整体写入（单事务）
// ==========================================

use crate::domain::delivery::{DeliveryRecord, MaterialConsumptionRecord};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use thiserror::Error;

/// 送货单写入失败的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStage {
    Delivery,
    Materials,
    Commit,
}

/// 送货单整体写入失败（事务已回滚）
#[derive(Error, Debug)]
#[error("送货单写入失败 (阶段 {stage:?}): {source}")]
pub struct BundleInsertError {
    pub stage: InsertStage,
    #[source]
    pub source: RepositoryError,
}

impl BundleInsertError {
    pub fn new(stage: InsertStage, source: impl Into<RepositoryError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// 订单汇总重算所需的送货单行
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryLine {
    pub delivery_id: String,
    pub volume: f64,
    pub resolved_product_id: Option<String>,
}

// ==========================================
// DeliveryRepository Trait
// ==========================================
// 实现者: SqliteDeliveryRepository（使用 rusqlite）
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// 查询已存在的送货单号
    ///
    /// # 返回
    /// - 入参中已落库的送货单号（全局范围，不限订单）
    async fn find_existing_delivery_numbers(
        &self,
        delivery_numbers: &[String],
    ) -> RepositoryResult<Vec<String>>;

    /// 写入送货单及其材料消耗记录（单事务，失败整体回滚）
    async fn insert_delivery_bundle(
        &self,
        delivery: &DeliveryRecord,
        materials: &[MaterialConsumptionRecord],
    ) -> Result<(), BundleInsertError>;

    /// 订单下全部送货单（体积 + 产品）
    async fn list_order_delivery_lines(&self, order_id: &str) -> RepositoryResult<Vec<DeliveryLine>>;

    /// 按送货单号查询
    async fn find_by_delivery_number(
        &self,
        delivery_number: &str,
    ) -> RepositoryResult<Option<DeliveryRecord>>;

    /// 查询送货单的材料消耗记录
    async fn list_materials(&self, delivery_id: &str) -> RepositoryResult<Vec<MaterialConsumptionRecord>>;
}
