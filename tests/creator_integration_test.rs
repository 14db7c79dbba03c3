// ==========================================
// DeliveryCreator 集成测试
// ==========================================
// 测试目标: 订单预检、逐行落库、部分失败语义、汇总重算、订单级串行
// ==========================================


use async_trait::async_trait;
use dispatch_ingest::db::open_shared_connection;
use dispatch_ingest::domain::{
    CreditState, DeliveryRecord, MaterialConsumptionRecord, OrderLifecycleState, OrderSnapshot,
    OrderTotals,
};
use dispatch_ingest::engine::{CreationIssueKind, CreatorOptions, DeliveryCreator};
use dispatch_ingest::repository::{
    BundleInsertError, DeliveryLine, DeliveryRepository, InsertStage, OrderRepository, PricingProvider,
    RepositoryError, RepositoryResult, SqliteDeliveryRepository, SqliteOrderRepository,
    SqlitePricingProvider,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use test_helpers::{create_test_db, march, seed_order, seed_order_item, staging_row};

type SqliteCreator = DeliveryCreator<SqliteDeliveryRepository, SqliteOrderRepository, SqlitePricingProvider>;

struct SqliteFixture {
    creator: SqliteCreator,
    deliveries: Arc<SqliteDeliveryRepository>,
    orders: Arc<SqliteOrderRepository>,
}

fn sqlite_fixture(db_path: &str) -> SqliteFixture {
    let conn = open_shared_connection(db_path).expect("打开数据库");
    let deliveries = Arc::new(SqliteDeliveryRepository::from_connection(conn.clone()));
    let orders = Arc::new(SqliteOrderRepository::from_connection(conn.clone()));
    let pricing = Arc::new(SqlitePricingProvider::from_connection(conn));
    SqliteFixture {
        creator: DeliveryCreator::new(deliveries.clone(), orders.clone(), pricing, CreatorOptions::default()),
        deliveries,
        orders,
    }
}

// ==========================================
// SQLite 端到端
// ==========================================

#[tokio::test]
async fn test_create_persists_deliveries_materials_and_totals() {
    let (_tmp, db_path) = create_test_db().unwrap();
    seed_order(&db_path, "o1", "created", "approved", Some("2025-03-04")).unwrap();
    seed_order_item(&db_path, "o1", "P-250", 100.0).unwrap();
    let fx = sqlite_fixture(&db_path);

    let rows = vec![
        staging_row(7, "1001", 7.0, march(4)),
        staging_row(8, "1002", 3.0, march(4)),
    ];
    let result = fx.creator.create_for_order("o1", &rows).await.unwrap();

    assert!(result.success);
    assert_eq!(result.created_ids.len(), 2);
    assert!(result.errors.is_empty());
    assert!(result.warnings.is_empty());
    assert_eq!(
        result.totals,
        Some(OrderTotals {
            total_volume: 10.0,
            total_amount: 1000.0
        })
    );

    let stored = fx.deliveries.find_by_delivery_number("1001").await.unwrap().unwrap();
    assert_eq!(stored.order_id, "o1");
    assert_eq!(stored.source_batch_id, "batch-test");
    assert_eq!(stored.plant_id.as_deref(), Some("P01 - Planta Norte"));
    assert_eq!(stored.raw_payload["technical_product_code"], "250-10-B");

    // ADITIVO 四个量全为 0，不落库
    let materials = fx.deliveries.list_materials(&stored.id).await.unwrap();
    let codes: Vec<&str> = materials.iter().map(|m| m.material_code.as_str()).collect();
    assert_eq!(codes.len(), 2);
    assert!(codes.contains(&"CEMENTO") && codes.contains(&"AGUA"));

    for record in &materials {
        let sum = record.actual_base_quantity + record.rework_quantity + record.manual_adjustment_quantity;
        assert!((record.actual_final_quantity - sum).abs() < 1e-9);
        assert!((record.absolute_variance - (record.actual_final_quantity - record.planned_quantity)).abs() < 1e-9);
    }
    let cemento = materials.iter().find(|m| m.material_code == "CEMENTO").unwrap();
    assert_eq!(cemento.actual_final_quantity, 298.0);
    assert_eq!(cemento.absolute_variance, -2.0);

    let persisted_totals = fx.orders.get_totals("o1").unwrap().unwrap();
    assert_eq!(persisted_totals.total_volume, 10.0);
}

#[tokio::test]
async fn test_duplicate_against_storage_creates_nothing() {
    let (_tmp, db_path) = create_test_db().unwrap();
    seed_order(&db_path, "o1", "created", "approved", None).unwrap();
    seed_order(&db_path, "o2", "created", "approved", None).unwrap();
    let fx = sqlite_fixture(&db_path);

    let first = fx
        .creator
        .create_for_order("o1", &[staging_row(1, "2001", 7.0, march(4))])
        .await
        .unwrap();
    assert!(first.success);

    // 单号全局唯一，跨订单同样拒绝
    let rows = vec![
        staging_row(1, "2002", 7.0, march(4)),
        staging_row(2, "2001", 7.0, march(4)),
    ];
    let result = fx.creator.create_for_order("o2", &rows).await.unwrap();

    assert!(!result.success);
    assert!(result.created_ids.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, CreationIssueKind::DuplicateDeliveryNumber);
    assert_eq!(result.errors[0].delivery_numbers, vec!["2001".to_string()]);
    assert!(fx.deliveries.find_by_delivery_number("2002").await.unwrap().is_none());
}

#[tokio::test]
async fn test_in_batch_and_stored_duplicates_reported_once() {
    let (_tmp, db_path) = create_test_db().unwrap();
    seed_order(&db_path, "o1", "validated", "approved", None).unwrap();
    let fx = sqlite_fixture(&db_path);

    fx.creator
        .create_for_order("o1", &[staging_row(1, "3000", 7.0, march(4))])
        .await
        .unwrap();

    let rows = vec![
        staging_row(1, "3001", 7.0, march(4)),
        staging_row(2, "3001", 7.0, march(4)),
        staging_row(3, "3000", 7.0, march(4)),
    ];
    let validation = fx.creator.validate_for_order("o1", &rows).await.unwrap();

    assert!(!validation.valid);
    let duplicates: Vec<_> = validation
        .errors
        .iter()
        .filter(|e| e.kind == CreationIssueKind::DuplicateDeliveryNumber)
        .collect();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].delivery_numbers, vec!["3000".to_string(), "3001".to_string()]);
}

#[tokio::test]
async fn test_missing_or_closed_order_blocks_creation() {
    let (_tmp, db_path) = create_test_db().unwrap();
    seed_order(&db_path, "closed", "closed", "approved", None).unwrap();
    let fx = sqlite_fixture(&db_path);
    let rows = vec![staging_row(1, "4001", 7.0, march(4))];

    let missing = fx.creator.create_for_order("nope", &rows).await.unwrap();
    assert!(missing.created_ids.is_empty());
    assert_eq!(missing.errors[0].kind, CreationIssueKind::OrderNotFound);

    let closed = fx.creator.create_for_order("closed", &rows).await.unwrap();
    assert!(closed.created_ids.is_empty());
    assert_eq!(closed.errors[0].kind, CreationIssueKind::OrderNotOpen);
    assert!(fx.deliveries.find_by_delivery_number("4001").await.unwrap().is_none());
}

#[tokio::test]
async fn test_credit_and_date_warnings_do_not_block() {
    let (_tmp, db_path) = create_test_db().unwrap();
    seed_order(&db_path, "o1", "scheduled", "pending", Some("2025-03-04")).unwrap();
    let fx = sqlite_fixture(&db_path);

    let rows = vec![
        staging_row(1, "5001", 7.0, march(5)),
        staging_row(2, "5002", 7.0, march(7)),
    ];
    let validation = fx.creator.validate_for_order("o1", &rows).await.unwrap();

    assert!(validation.valid);
    assert!(validation.errors.is_empty());
    let kinds: Vec<CreationIssueKind> = validation.warnings.iter().map(|w| w.kind).collect();
    assert_eq!(
        kinds,
        vec![CreationIssueKind::CreditNotApproved, CreationIssueKind::DateMismatch]
    );
    assert_eq!(validation.warnings[1].row_number, Some(2));

    let result = fx.creator.create_for_order("o1", &rows).await.unwrap();
    assert!(result.success);
    assert_eq!(result.created_ids.len(), 2);
    assert_eq!(result.warnings.len(), 2);
}

#[tokio::test]
async fn test_recompute_overwrites_stale_totals() {
    let (_tmp, db_path) = create_test_db().unwrap();
    seed_order(&db_path, "o1", "created", "approved", None).unwrap();
    seed_order_item(&db_path, "o1", "P-250", 50.0).unwrap();
    let fx = sqlite_fixture(&db_path);

    fx.creator
        .create_for_order("o1", &[staging_row(1, "6001", 4.0, march(4)), staging_row(2, "6002", 6.0, march(4))])
        .await
        .unwrap();

    fx.orders
        .update_totals(
            "o1",
            OrderTotals {
                total_volume: 999.0,
                total_amount: 1.0,
            },
        )
        .await
        .unwrap();

    let totals = fx.creator.recompute_order_totals("o1").await.unwrap();
    assert_eq!(totals.total_volume, 10.0);
    assert_eq!(totals.total_amount, 500.0);
    assert_eq!(fx.orders.get_totals("o1").unwrap(), Some(totals));
}

// ==========================================
// Mock 仓储（故障注入）
// ==========================================

#[derive(Default)]
struct MockDeliveryRepository {
    failures: HashMap<String, InsertStage>,
    inserted: Mutex<Vec<(DeliveryRecord, Vec<MaterialConsumptionRecord>)>>,
}

impl MockDeliveryRepository {
    fn failing(delivery_number: &str, stage: InsertStage) -> Self {
        let mut failures = HashMap::new();
        failures.insert(delivery_number.to_string(), stage);
        Self {
            failures,
            ..Default::default()
        }
    }

    fn inserted_numbers(&self) -> Vec<String> {
        self.inserted
            .lock()
            .unwrap()
            .iter()
            .map(|(d, _)| d.delivery_number.clone())
            .collect()
    }
}

#[async_trait]
impl DeliveryRepository for MockDeliveryRepository {
    async fn find_existing_delivery_numbers(&self, delivery_numbers: &[String]) -> RepositoryResult<Vec<String>> {
        let inserted = self.inserted_numbers();
        Ok(delivery_numbers
            .iter()
            .filter(|n| inserted.contains(n))
            .cloned()
            .collect())
    }

    async fn insert_delivery_bundle(
        &self,
        delivery: &DeliveryRecord,
        materials: &[MaterialConsumptionRecord],
    ) -> Result<(), BundleInsertError> {
        if let Some(stage) = self.failures.get(&delivery.delivery_number) {
            return Err(BundleInsertError::new(
                *stage,
                RepositoryError::DatabaseQueryError("injected failure".to_string()),
            ));
        }
        self.inserted
            .lock()
            .unwrap()
            .push((delivery.clone(), materials.to_vec()));
        Ok(())
    }

    async fn list_order_delivery_lines(&self, order_id: &str) -> RepositoryResult<Vec<DeliveryLine>> {
        Ok(self
            .inserted
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d.order_id == order_id)
            .map(|(d, _)| DeliveryLine {
                delivery_id: d.id.clone(),
                volume: d.volume,
                resolved_product_id: Some(d.resolved_product_id.clone()),
            })
            .collect())
    }

    async fn find_by_delivery_number(&self, delivery_number: &str) -> RepositoryResult<Option<DeliveryRecord>> {
        Ok(self
            .inserted
            .lock()
            .unwrap()
            .iter()
            .find(|(d, _)| d.delivery_number == delivery_number)
            .map(|(d, _)| d.clone()))
    }

    async fn list_materials(&self, delivery_id: &str) -> RepositoryResult<Vec<MaterialConsumptionRecord>> {
        Ok(self
            .inserted
            .lock()
            .unwrap()
            .iter()
            .find(|(d, _)| d.id == delivery_id)
            .map(|(_, m)| m.clone())
            .unwrap_or_default())
    }
}

struct MockOrderRepository {
    order: OrderSnapshot,
    totals: Mutex<Option<OrderTotals>>,
}

impl MockOrderRepository {
    fn open(order_id: &str) -> Self {
        Self {
            order: OrderSnapshot {
                id: order_id.to_string(),
                lifecycle_state: OrderLifecycleState::Created,
                credit_state: CreditState::Approved,
                declared_delivery_date: None,
            },
            totals: Mutex::new(None),
        }
    }
}

#[async_trait]
impl OrderRepository for MockOrderRepository {
    async fn find_order(&self, order_id: &str) -> RepositoryResult<Option<OrderSnapshot>> {
        Ok((self.order.id == order_id).then(|| self.order.clone()))
    }

    async fn update_totals(&self, _order_id: &str, totals: OrderTotals) -> RepositoryResult<()> {
        *self.totals.lock().unwrap() = Some(totals);
        Ok(())
    }
}

struct FixedPrice(Option<f64>);

#[async_trait]
impl PricingProvider for FixedPrice {
    async fn unit_price(&self, _order_id: &str, _product_id: &str) -> RepositoryResult<Option<f64>> {
        Ok(self.0)
    }
}

fn mock_creator(
    deliveries: MockDeliveryRepository,
    price: Option<f64>,
) -> (
    DeliveryCreator<MockDeliveryRepository, MockOrderRepository, FixedPrice>,
    Arc<MockDeliveryRepository>,
    Arc<MockOrderRepository>,
) {
    let deliveries = Arc::new(deliveries);
    let orders = Arc::new(MockOrderRepository::open("o1"));
    let creator = DeliveryCreator::new(
        deliveries.clone(),
        orders.clone(),
        Arc::new(FixedPrice(price)),
        CreatorOptions::default(),
    );
    (creator, deliveries, orders)
}

#[tokio::test]
async fn test_partial_batch_when_row_two_fails() {
    let (creator, deliveries, orders) =
        mock_creator(MockDeliveryRepository::failing("7002", InsertStage::Delivery), Some(10.0));

    let rows = vec![
        staging_row(1, "7001", 5.0, march(4)),
        staging_row(2, "7002", 6.0, march(4)),
        staging_row(3, "7003", 7.0, march(4)),
    ];
    let result = creator.create_for_order("o1", &rows).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.created_ids.len(), 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].row_number, Some(2));
    assert_eq!(result.errors[0].kind, CreationIssueKind::DeliveryPersistenceFailure);
    assert_eq!(deliveries.inserted_numbers(), vec!["7001".to_string(), "7003".to_string()]);

    let totals = orders.totals.lock().unwrap().unwrap();
    assert_eq!(totals.total_volume, 12.0);
    assert_eq!(totals.total_amount, 120.0);
}

#[tokio::test]
async fn test_material_stage_failure_is_reported_per_row() {
    let (creator, deliveries, _orders) =
        mock_creator(MockDeliveryRepository::failing("8001", InsertStage::Materials), None);

    let rows = vec![
        staging_row(1, "8001", 5.0, march(4)),
        staging_row(2, "8002", 5.0, march(4)),
    ];
    let result = creator.create_for_order("o1", &rows).await.unwrap();

    assert_eq!(result.created_ids.len(), 1);
    assert_eq!(result.errors[0].kind, CreationIssueKind::MaterialPersistenceFailure);
    assert_eq!(result.errors[0].delivery_numbers, vec!["8001".to_string()]);
    assert!(deliveries.find_by_delivery_number("8001").await.unwrap().is_none());
    // 无单价时金额按 0 计
    assert_eq!(result.totals.map(|t| t.total_amount), Some(0.0));
}

#[tokio::test]
async fn test_non_positive_volume_row_is_skipped() {
    let (creator, deliveries, _orders) = mock_creator(MockDeliveryRepository::default(), Some(1.0));

    let rows = vec![
        staging_row(1, "8101", 0.0, march(4)),
        staging_row(2, "8102", 4.0, march(4)),
    ];
    let result = creator.create_for_order("o1", &rows).await.unwrap();

    assert_eq!(result.created_ids.len(), 1);
    assert_eq!(result.errors[0].kind, CreationIssueKind::InvalidVolume);
    assert_eq!(deliveries.inserted_numbers(), vec!["8102".to_string()]);
}

#[tokio::test]
async fn test_concurrent_calls_for_same_order_are_serialized() {
    let (creator, deliveries, _orders) = mock_creator(MockDeliveryRepository::default(), Some(1.0));

    let batch_a = vec![staging_row(1, "9001", 5.0, march(4))];
    let batch_b = vec![staging_row(1, "9001", 5.0, march(4))];

    let (a, b) = tokio::join!(
        creator.create_for_order("o1", &batch_a),
        creator.create_for_order("o1", &batch_b)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // 第二个调用在第一个完成后预检，必然看到重复单号
    assert_eq!(a.created_ids.len() + b.created_ids.len(), 1);
    let rejected = if a.created_ids.is_empty() { &a } else { &b };
    assert_eq!(rejected.errors[0].kind, CreationIssueKind::DuplicateDeliveryNumber);
    assert_eq!(deliveries.inserted_numbers(), vec!["9001".to_string()]);
    assert_eq!(creator.tracked_order_locks(), 0);
}

struct FailingPrice;

#[async_trait]
impl PricingProvider for FailingPrice {
    async fn unit_price(&self, _order_id: &str, _product_id: &str) -> RepositoryResult<Option<f64>> {
        Err(RepositoryError::DatabaseQueryError("pricing unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_recompute_failure_keeps_created_ids() {
    let deliveries = Arc::new(MockDeliveryRepository::default());
    let orders = Arc::new(MockOrderRepository::open("o1"));
    let creator = DeliveryCreator::new(
        deliveries.clone(),
        orders.clone(),
        Arc::new(FailingPrice),
        CreatorOptions::default(),
    );

    let rows = vec![staging_row(1, "7101", 5.0, march(4))];
    let result = creator.create_for_order("o1", &rows).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.created_ids.len(), 1);
    assert_eq!(result.totals, None);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, CreationIssueKind::TotalsRecomputeFailure);
    assert_eq!(result.errors[0].row_number, None);
    assert_eq!(deliveries.inserted_numbers(), vec!["7101".to_string()]);
    assert!(orders.totals.lock().unwrap().is_none());
    assert_eq!(creator.tracked_order_locks(), 0);
}

#[tokio::test]
async fn test_order_locks_are_released_after_each_call() {
    let (creator, _deliveries, _orders) = mock_creator(MockDeliveryRepository::default(), Some(1.0));

    for (i, order_id) in ["o1", "o2", "o3"].iter().enumerate() {
        let rows = vec![staging_row(1, &format!("95{:02}", i), 5.0, march(4))];
        creator.validate_for_order(order_id, &rows).await.unwrap();
        creator.create_for_order(order_id, &rows).await.unwrap();
        creator.recompute_order_totals(order_id).await.unwrap();
    }

    assert_eq!(creator.tracked_order_locks(), 0);
}
