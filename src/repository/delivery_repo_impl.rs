// ==========================================
// 调度导出导入系统 - 送货单 Repository 实现
// ==========================================
// 职责: 实现送货单相关数据访问（使用 rusqlite）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::delivery::{DeliveryRecord, MaterialConsumptionRecord};
use crate::repository::delivery_repo::{BundleInsertError, DeliveryLine, DeliveryRepository, InsertStage};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite 单条语句参数上限内的分批大小
const LOOKUP_CHUNK_SIZE: usize = 500;

// ==========================================
// SqliteDeliveryRepository
// ==========================================
pub struct SqliteDeliveryRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDeliveryRepository {
    /// 创建新的 Repository 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn insert_delivery_tx(tx: &Transaction, delivery: &DeliveryRecord) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT INTO deliveries (
                id, order_id, delivery_number, delivery_date, load_time, volume,
                driver, plate_number, truck_id, delivery_point, comments,
                internal_comments, product_description, resolved_product_id,
                status, source_batch_id, plant_id, raw_payload, created_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19
            )
            "#,
            params![
                delivery.id,
                delivery.order_id,
                delivery.delivery_number,
                delivery.date.format("%Y-%m-%d").to_string(),
                delivery.load_time.format("%H:%M:%S").to_string(),
                delivery.volume,
                delivery.driver,
                delivery.plate_number,
                delivery.truck_id,
                delivery.delivery_point,
                delivery.comments,
                delivery.internal_comments,
                delivery.product_description,
                delivery.resolved_product_id,
                delivery.status,
                delivery.source_batch_id,
                delivery.plant_id,
                delivery.raw_payload.to_string(),
                delivery.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn insert_materials_tx(
        tx: &Transaction,
        materials: &[MaterialConsumptionRecord],
    ) -> RepositoryResult<usize> {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO delivery_materials (
                delivery_id, material_code, planned_quantity, actual_base_quantity,
                rework_quantity, manual_adjustment_quantity, actual_final_quantity,
                absolute_variance, percent_variance
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )?;

        let mut count = 0;
        for material in materials {
            stmt.execute(params![
                material.delivery_id,
                material.material_code,
                material.planned_quantity,
                material.actual_base_quantity,
                material.rework_quantity,
                material.manual_adjustment_quantity,
                material.actual_final_quantity,
                material.absolute_variance,
                material.percent_variance,
            ])?;
            count += 1;
        }
        Ok(count)
    }

    fn map_delivery_row(row: &Row) -> rusqlite::Result<(DeliveryRecord, String)> {
        let date_raw: String = row.get(3)?;
        let time_raw: String = row.get(4)?;
        let created_raw: String = row.get(18)?;
        let payload_raw: String = row.get(17)?;

        let record = DeliveryRecord {
            id: row.get(0)?,
            order_id: row.get(1)?,
            delivery_number: row.get(2)?,
            date: NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
            })?,
            load_time: NaiveTime::parse_from_str(&time_raw, "%H:%M:%S").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?,
            volume: row.get(5)?,
            driver: row.get(6)?,
            plate_number: row.get(7)?,
            truck_id: row.get(8)?,
            delivery_point: row.get(9)?,
            comments: row.get(10)?,
            internal_comments: row.get(11)?,
            product_description: row.get(12)?,
            resolved_product_id: row.get(13)?,
            status: row.get(14)?,
            source_batch_id: row.get(15)?,
            plant_id: row.get(16)?,
            raw_payload: serde_json::Value::Null,
            created_at: DateTime::parse_from_rfc3339(&created_raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(18, rusqlite::types::Type::Text, Box::new(e))
                })?,
        };
        Ok((record, payload_raw))
    }
}

#[async_trait]
impl DeliveryRepository for SqliteDeliveryRepository {
    async fn find_existing_delivery_numbers(
        &self,
        delivery_numbers: &[String],
    ) -> RepositoryResult<Vec<String>> {
        if delivery_numbers.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let mut existing = Vec::new();

        for chunk in delivery_numbers.chunks(LOOKUP_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT delivery_number FROM deliveries WHERE delivery_number IN ({}) ORDER BY delivery_number",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get::<_, String>(0))?;
            for row in rows {
                existing.push(row?);
            }
        }

        existing.sort();
        existing.dedup();
        Ok(existing)
    }

    /// 单事务写入；任一阶段失败，Transaction drop 时自动回滚
    async fn insert_delivery_bundle(
        &self,
        delivery: &DeliveryRecord,
        materials: &[MaterialConsumptionRecord],
    ) -> Result<(), BundleInsertError> {
        let conn = self
            .get_conn()
            .map_err(|e| BundleInsertError::new(InsertStage::Delivery, e))?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| BundleInsertError::new(InsertStage::Delivery, e))?;

        Self::insert_delivery_tx(&tx, delivery)
            .map_err(|e| BundleInsertError::new(InsertStage::Delivery, e))?;
        Self::insert_materials_tx(&tx, materials)
            .map_err(|e| BundleInsertError::new(InsertStage::Materials, e))?;

        tx.commit()
            .map_err(|e| BundleInsertError::new(InsertStage::Commit, e))?;
        Ok(())
    }

    async fn list_order_delivery_lines(&self, order_id: &str) -> RepositoryResult<Vec<DeliveryLine>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, volume, resolved_product_id
            FROM deliveries
            WHERE order_id = ?1
            ORDER BY delivery_date, load_time, delivery_number
            "#,
        )?;

        let lines = stmt
            .query_map(params![order_id], |row| {
                Ok(DeliveryLine {
                    delivery_id: row.get(0)?,
                    volume: row.get(1)?,
                    resolved_product_id: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    async fn find_by_delivery_number(
        &self,
        delivery_number: &str,
    ) -> RepositoryResult<Option<DeliveryRecord>> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row(
                r#"
                SELECT
                    id, order_id, delivery_number, delivery_date, load_time, volume,
                    driver, plate_number, truck_id, delivery_point, comments,
                    internal_comments, product_description, resolved_product_id,
                    status, source_batch_id, plant_id, raw_payload, created_at
                FROM deliveries
                WHERE delivery_number = ?1
                "#,
                params![delivery_number],
                Self::map_delivery_row,
            )
            .optional()?;

        match found {
            None => Ok(None),
            Some((mut record, payload_raw)) => {
                record.raw_payload = serde_json::from_str(&payload_raw)?;
                Ok(Some(record))
            }
        }
    }

    async fn list_materials(&self, delivery_id: &str) -> RepositoryResult<Vec<MaterialConsumptionRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                delivery_id, material_code, planned_quantity, actual_base_quantity,
                rework_quantity, manual_adjustment_quantity, actual_final_quantity,
                absolute_variance, percent_variance
            FROM delivery_materials
            WHERE delivery_id = ?1
            ORDER BY material_code
            "#,
        )?;

        let records = stmt
            .query_map(params![delivery_id], |row| {
                Ok(MaterialConsumptionRecord {
                    delivery_id: row.get(0)?,
                    material_code: row.get(1)?,
                    planned_quantity: row.get(2)?,
                    actual_base_quantity: row.get(3)?,
                    rework_quantity: row.get(4)?,
                    manual_adjustment_quantity: row.get(5)?,
                    actual_final_quantity: row.get(6)?,
                    absolute_variance: row.get(7)?,
                    percent_variance: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
