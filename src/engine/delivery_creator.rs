// ==========================================
// 调度导出导入系统 - 送货单创建器
// ==========================================
// 职责: 订单预检 → 逐行落库（送货单 + 材料消耗）→ 订单汇总全量重算
// 红线: 任一阻断错误时不创建任何记录
// 红线: 行间相互独立，单行失败不影响后续行
// 并发: 同一订单的校验/创建/重算串行执行（订单级锁）
// ==========================================

use crate::domain::delivery::{DeliveryRecord, StagingDelivery};
use crate::domain::order::{OrderTotals, PricedVolume};
use crate::domain::types::{CreditState, OrderLifecycleState};
use crate::engine::error::{CreationIssue, CreationIssueKind, CreatorError, CreatorResult};
use crate::engine::variance::build_material_records;
use crate::repository::delivery_repo::{DeliveryRepository, InsertStage};
use crate::repository::order_repo::{OrderRepository, PricingProvider};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// ==========================================
// CreatorOptions - 创建器参数
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct CreatorOptions {
    /// 可接收送货单的订单状态
    pub open_states: Vec<OrderLifecycleState>,
    /// 送货日期与订单交付日期的容差（天）
    pub date_tolerance_days: i64,
}

impl Default for CreatorOptions {
    fn default() -> Self {
        Self {
            open_states: OrderLifecycleState::default_open_states(),
            date_tolerance_days: 1,
        }
    }
}

/// 订单预检结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderValidation {
    pub valid: bool,
    pub warnings: Vec<CreationIssue>,
    pub errors: Vec<CreationIssue>,
}

/// 创建结果（部分成功语义: 调用方需对照 created_ids 与 errors）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreationResult {
    pub success: bool,
    pub created_ids: Vec<String>,
    pub errors: Vec<CreationIssue>,
    pub warnings: Vec<CreationIssue>,
    pub totals: Option<OrderTotals>,
}

// ==========================================
// DeliveryCreator
// ==========================================
pub struct DeliveryCreator<D, O, P>
where
    D: DeliveryRepository,
    O: OrderRepository,
    P: PricingProvider,
{
    deliveries: Arc<D>,
    orders: Arc<O>,
    pricing: Arc<P>,
    options: CreatorOptions,
    order_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl<D, O, P> DeliveryCreator<D, O, P>
where
    D: DeliveryRepository,
    O: OrderRepository,
    P: PricingProvider,
{
    pub fn new(deliveries: Arc<D>, orders: Arc<O>, pricing: Arc<P>, options: CreatorOptions) -> Self {
        Self {
            deliveries,
            orders,
            pricing,
            options,
            order_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &CreatorOptions {
        &self.options
    }

    fn order_lock(&self, order_id: &str) -> CreatorResult<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .order_locks
            .lock()
            .map_err(|e| CreatorError::LockError(e.to_string()))?;
        Ok(locks
            .entry(order_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    /// 调用结束后释放订单锁；无其他持有者时从表中移除
    fn release_order_lock(&self, order_id: &str, lock: Arc<AsyncMutex<()>>) {
        let Ok(mut locks) = self.order_locks.lock() else {
            return;
        };
        drop(lock);
        if locks
            .get(order_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(order_id);
        }
    }

    /// 当前登记的订单锁数量
    pub fn tracked_order_locks(&self) -> usize {
        self.order_locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    // ==========================================
    // 预检
    // ==========================================

    /// 订单预检（不写入任何数据）
    ///
    /// # 阻断错误
    /// - OrderNotFound / OrderNotOpen
    /// - DuplicateDeliveryNumber（库内已存在或批内重复，合并为一条）
    ///
    /// # 警告
    /// - CreditNotApproved
    /// - DateMismatch（逐行）
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn validate_for_order(
        &self,
        order_id: &str,
        rows: &[StagingDelivery],
    ) -> CreatorResult<OrderValidation> {
        let lock = self.order_lock(order_id)?;
        let result = {
            let _guard = lock.lock().await;
            self.validate_locked(order_id, rows).await
        };
        self.release_order_lock(order_id, lock);
        result
    }

    async fn validate_locked(&self, order_id: &str, rows: &[StagingDelivery]) -> CreatorResult<OrderValidation> {
        let mut validation = OrderValidation::default();

        let order = match self.orders.find_order(order_id).await? {
            Some(order) => order,
            None => {
                validation.errors.push(CreationIssue::order_level(
                    CreationIssueKind::OrderNotFound,
                    format!("订单不存在: {}", order_id),
                ));
                return Ok(validation);
            }
        };

        if !order.is_open(&self.options.open_states) {
            validation.errors.push(CreationIssue::order_level(
                CreationIssueKind::OrderNotOpen,
                format!("订单状态不允许新增送货单: {}", order.lifecycle_state),
            ));
        }

        if order.credit_state != CreditState::Approved {
            validation.warnings.push(CreationIssue::order_level(
                CreationIssueKind::CreditNotApproved,
                format!("订单信用未审批: {}", order.credit_state.to_db_str()),
            ));
        }

        // 重复单号: 批内重复 + 库内已存在
        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for row in rows {
            if !seen.insert(row.delivery_number.as_str()) {
                duplicates.insert(row.delivery_number.clone());
            }
        }

        let unique_numbers: Vec<String> = seen.into_iter().map(str::to_string).collect();
        if !unique_numbers.is_empty() {
            let existing = self.deliveries.find_existing_delivery_numbers(&unique_numbers).await?;
            duplicates.extend(existing);
        }

        if !duplicates.is_empty() {
            let numbers: Vec<String> = duplicates.into_iter().collect();
            validation.errors.push(CreationIssue {
                kind: CreationIssueKind::DuplicateDeliveryNumber,
                row_number: None,
                message: format!("送货单号重复: {}", numbers.join(", ")),
                delivery_numbers: numbers,
            });
        }

        if let Some(declared) = order.declared_delivery_date {
            for row in rows {
                let diff_days = (row.date - declared).num_days().abs();
                if diff_days > self.options.date_tolerance_days {
                    validation.warnings.push(CreationIssue::for_row(
                        CreationIssueKind::DateMismatch,
                        row.row_number,
                        &row.delivery_number,
                        format!("送货日期 {} 与订单交付日期 {} 相差 {} 天", row.date, declared, diff_days),
                    ));
                }
            }
        }

        validation.valid = validation.errors.is_empty();
        Ok(validation)
    }

    // ==========================================
    // 创建
    // ==========================================

    /// 为订单创建送货单及材料消耗记录
    ///
    /// # 说明
    /// - 预检失败时不写入任何数据，errors 为预检错误
    /// - 单行失败记录到 errors，继续处理后续行
    /// - 至少创建一条时重算订单汇总；重算失败记为 TotalsRecomputeFailure，totals 为 None
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn create_for_order(
        &self,
        order_id: &str,
        rows: &[StagingDelivery],
    ) -> CreatorResult<CreationResult> {
        let lock = self.order_lock(order_id)?;
        let result = {
            let _guard = lock.lock().await;
            self.create_locked(order_id, rows).await
        };
        self.release_order_lock(order_id, lock);
        result
    }

    async fn create_locked(&self, order_id: &str, rows: &[StagingDelivery]) -> CreatorResult<CreationResult> {
        let validation = self.validate_locked(order_id, rows).await?;
        if !validation.valid {
            warn!(errors = validation.errors.len(), "订单预检未通过，跳过创建");
            return Ok(CreationResult {
                success: false,
                created_ids: Vec::new(),
                errors: validation.errors,
                warnings: validation.warnings,
                totals: None,
            });
        }

        let mut created_ids = Vec::with_capacity(rows.len());
        let mut errors = Vec::new();

        for row in rows {
            if !row.volume.is_finite() || row.volume <= 0.0 {
                errors.push(CreationIssue::for_row(
                    CreationIssueKind::InvalidVolume,
                    row.row_number,
                    &row.delivery_number,
                    format!("体积必须大于 0: {}", row.volume),
                ));
                continue;
            }

            let record = build_delivery_record(order_id, row);
            let materials = build_material_records(&record.id, row);

            match self.deliveries.insert_delivery_bundle(&record, &materials).await {
                Ok(()) => {
                    debug!(
                        delivery_id = %record.id,
                        delivery_number = %record.delivery_number,
                        materials = materials.len(),
                        "送货单已创建"
                    );
                    created_ids.push(record.id);
                }
                Err(e) => {
                    let kind = match e.stage {
                        InsertStage::Materials => CreationIssueKind::MaterialPersistenceFailure,
                        InsertStage::Delivery | InsertStage::Commit => {
                            CreationIssueKind::DeliveryPersistenceFailure
                        }
                    };
                    warn!(
                        row_number = row.row_number,
                        delivery_number = %row.delivery_number,
                        error = %e,
                        "送货单写入失败"
                    );
                    errors.push(CreationIssue::for_row(kind, row.row_number, &row.delivery_number, e.to_string()));
                }
            }
        }

        // 送货单已逐条提交，重算失败只记为订单级问题，created_ids 照常返回
        let totals = if created_ids.is_empty() {
            None
        } else {
            match self.recompute_locked(order_id).await {
                Ok(totals) => Some(totals),
                Err(e) => {
                    warn!(error = %e, created = created_ids.len(), "订单汇总重算失败，需手动执行 recompute");
                    errors.push(CreationIssue::order_level(
                        CreationIssueKind::TotalsRecomputeFailure,
                        format!("订单汇总重算失败: {}", e),
                    ));
                    None
                }
            }
        };

        info!(
            created = created_ids.len(),
            failed = errors.len(),
            warnings = validation.warnings.len(),
            "送货单创建完成"
        );

        Ok(CreationResult {
            success: errors.is_empty(),
            created_ids,
            errors,
            warnings: validation.warnings,
            totals,
        })
    }

    // ==========================================
    // 汇总重算
    // ==========================================

    /// 全量重算订单体积与金额并覆盖写入
    #[instrument(skip(self))]
    pub async fn recompute_order_totals(&self, order_id: &str) -> CreatorResult<OrderTotals> {
        let lock = self.order_lock(order_id)?;
        let result = {
            let _guard = lock.lock().await;
            self.recompute_locked(order_id).await
        };
        self.release_order_lock(order_id, lock);
        result
    }

    async fn recompute_locked(&self, order_id: &str) -> CreatorResult<OrderTotals> {
        let lines = self.deliveries.list_order_delivery_lines(order_id).await?;

        let mut prices: HashMap<String, Option<f64>> = HashMap::new();
        let mut priced = Vec::with_capacity(lines.len());

        for line in &lines {
            let unit_price = match &line.resolved_product_id {
                Some(product_id) => {
                    if !prices.contains_key(product_id) {
                        let price = self.pricing.unit_price(order_id, product_id).await?;
                        if price.is_none() {
                            warn!(product_id = %product_id, "订单缺少产品单价，按 0 计算金额");
                        }
                        prices.insert(product_id.clone(), price);
                    }
                    prices.get(product_id).copied().flatten().unwrap_or(0.0)
                }
                None => {
                    warn!(delivery_id = %line.delivery_id, "送货单未关联产品，按 0 计算金额");
                    0.0
                }
            };
            priced.push(PricedVolume {
                volume: line.volume,
                unit_price,
            });
        }

        let totals = OrderTotals::from_lines(&priced);
        self.orders.update_totals(order_id, totals).await?;

        info!(
            deliveries = lines.len(),
            total_volume = totals.total_volume,
            total_amount = totals.total_amount,
            "订单汇总已重算"
        );
        Ok(totals)
    }
}

/// 暂存行 → 送货单记录（分配 ID 与创建时间）
fn build_delivery_record(order_id: &str, row: &StagingDelivery) -> DeliveryRecord {
    DeliveryRecord {
        id: Uuid::new_v4().to_string(),
        order_id: order_id.to_string(),
        delivery_number: row.delivery_number.clone(),
        date: row.date,
        load_time: row.load_time,
        volume: row.volume,
        driver: row.driver_name.clone(),
        plate_number: row.plate_number.clone(),
        truck_id: row.truck_id.clone(),
        delivery_point: row.delivery_point.clone(),
        comments: row.external_comments.clone(),
        internal_comments: row.internal_comments.clone(),
        product_description: row.product_description.clone(),
        resolved_product_id: row.resolved_product_id.clone(),
        status: row.status_text.trim().to_string(),
        source_batch_id: row.source_batch_id.clone(),
        plant_id: row.plant_identifier.clone(),
        raw_payload: row.raw_payload(),
        created_at: Utc::now(),
    }
}
