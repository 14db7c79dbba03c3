// ==========================================
// 调度导出导入系统 - 订单 Repository 实现
// ==========================================
// 职责: orders / order_items 表访问（使用 rusqlite）
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::order::{OrderSnapshot, OrderTotals};
use crate::domain::types::{CreditState, OrderLifecycleState};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::order_repo::{OrderRepository, PricingProvider};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock_conn(conn: &Mutex<Connection>) -> RepositoryResult<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| RepositoryError::LockError(e.to_string()))
}

/// 兼容 "YYYY-MM-DD" 与带时间的写法
fn parse_order_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| trimmed.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

// ==========================================
// SqliteOrderRepository
// ==========================================
pub struct SqliteOrderRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteOrderRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 读取订单汇总（CLI 报告使用）
    pub fn get_totals(&self, order_id: &str) -> RepositoryResult<Option<OrderTotals>> {
        let conn = lock_conn(&self.conn)?;
        let totals = conn
            .query_row(
                "SELECT total_volume, total_amount FROM orders WHERE id = ?1",
                params![order_id],
                |row| {
                    Ok(OrderTotals {
                        total_volume: row.get(0)?,
                        total_amount: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(totals)
    }
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn find_order(&self, order_id: &str) -> RepositoryResult<Option<OrderSnapshot>> {
        let conn = lock_conn(&self.conn)?;
        let order = conn
            .query_row(
                r#"
                SELECT id, lifecycle_state, credit_state, delivery_date
                FROM orders
                WHERE id = ?1
                "#,
                params![order_id],
                |row| {
                    let lifecycle: String = row.get(1)?;
                    let credit: String = row.get(2)?;
                    let delivery_date: Option<String> = row.get(3)?;
                    Ok(OrderSnapshot {
                        id: row.get(0)?,
                        lifecycle_state: OrderLifecycleState::from_db_str(&lifecycle),
                        credit_state: CreditState::from_db_str(&credit),
                        declared_delivery_date: delivery_date.as_deref().and_then(parse_order_date),
                    })
                },
            )
            .optional()?;
        Ok(order)
    }

    async fn update_totals(&self, order_id: &str, totals: OrderTotals) -> RepositoryResult<()> {
        let conn = lock_conn(&self.conn)?;
        let updated = conn.execute(
            r#"
            UPDATE orders
            SET total_volume = ?1, total_amount = ?2, updated_at = ?3
            WHERE id = ?4
            "#,
            params![
                totals.total_volume,
                totals.total_amount,
                Utc::now().to_rfc3339(),
                order_id
            ],
        )?;

        if updated == 0 {
            return Err(RepositoryError::NotFound {
                entity: "orders".to_string(),
                id: order_id.to_string(),
            });
        }
        Ok(())
    }
}

// ==========================================
// SqlitePricingProvider - 按 order_items 取单价
// ==========================================
pub struct SqlitePricingProvider {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePricingProvider {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl PricingProvider for SqlitePricingProvider {
    async fn unit_price(&self, order_id: &str, product_id: &str) -> RepositoryResult<Option<f64>> {
        let conn = lock_conn(&self.conn)?;
        let price = conn
            .query_row(
                r#"
                SELECT unit_price
                FROM order_items
                WHERE order_id = ?1 AND product_id = ?2
                ORDER BY rowid
                LIMIT 1
                "#,
                params![order_id, product_id],
                |row| row.get::<_, f64>(0),
            )
            .optional()?;
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_order_date_forms() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 4);
        assert_eq!(parse_order_date("2025-03-04"), expected);
        assert_eq!(parse_order_date("2025-03-04T10:00:00Z"), expected);
        assert_eq!(parse_order_date("n/a"), None);
    }
}
