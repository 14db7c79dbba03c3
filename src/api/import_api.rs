// ==========================================
// 调度导出导入系统 - 导入 API
// ==========================================
// 职责: 串联 文件解析 → 暂存行构建 → 订单创建/重算
// 说明: 解析在阻塞线程池执行；多文件并发解析
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, ImportConfigReader};
use crate::db::{init_schema, open_shared_connection};
use crate::domain::delivery::{ParseResult, StagingDelivery};
use crate::domain::order::OrderTotals;
use crate::engine::delivery_creator::{CreationResult, CreatorOptions, DeliveryCreator, OrderValidation};
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::file_parser::UniversalSheetParser;
use crate::importer::raw_export_parser::RawExportParser;
use crate::repository::{SqliteDeliveryRepository, SqliteOrderRepository, SqlitePricingProvider};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};
use uuid::Uuid;

type SqliteDeliveryCreator = DeliveryCreator<SqliteDeliveryRepository, SqliteOrderRepository, SqlitePricingProvider>;

/// 暂存批次（CLI import 命令的输入文件格式）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingBatch {
    pub batch_id: String,
    pub rows: Vec<StagingDelivery>,
    /// 技术产品编码为空、无法映射的行号
    #[serde(default)]
    pub unresolved_rows: Vec<usize>,
}

/// 由解析结果构建暂存批次
///
/// # 参数
/// - product_map: 技术产品编码 → 内部产品 ID；未命中时沿用技术编码
pub fn build_staging_batch(result: &ParseResult, product_map: &HashMap<String, String>) -> StagingBatch {
    let cleaner = DataCleaner;
    let batch_id = Uuid::new_v4().to_string();
    let mut rows = Vec::with_capacity(result.rows.len());
    let mut unresolved_rows = Vec::new();

    for row in &result.rows {
        let technical = row.technical_product_code.trim();
        if technical.is_empty() {
            unresolved_rows.push(row.row_number);
            continue;
        }

        let product_id = product_map
            .get(technical)
            .map(String::as_str)
            .unwrap_or(technical);
        let pumpable = cleaner.clean_pumpable_flag(&row.pumpable_flag);

        rows.push(
            StagingDelivery::from_raw_row(row, &batch_id, product_id, pumpable)
                .with_plant(&result.metadata.plant_identifier),
        );
    }

    if !unresolved_rows.is_empty() {
        warn!(batch_id = %batch_id, unresolved = unresolved_rows.len(), "部分行缺少技术产品编码，未进入暂存批次");
    }

    StagingBatch {
        batch_id,
        rows,
        unresolved_rows,
    }
}

// ==========================================
// ImportApi
// ==========================================
pub struct ImportApi {
    config: Arc<ConfigManager>,
    creator: SqliteDeliveryCreator,
    order_repo: Arc<SqliteOrderRepository>,
}

impl ImportApi {
    /// 打开数据库（不存在时建表）并装配全部组件
    pub async fn open(db_path: &str) -> ApiResult<Self> {
        let conn = open_shared_connection(db_path)?;
        Self::from_connection(conn).await
    }

    pub async fn from_connection(conn: Arc<Mutex<Connection>>) -> ApiResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", e)))?;
            init_schema(&guard)?;
        }

        let config = Arc::new(ConfigManager::from_connection(conn.clone())?);
        let options = CreatorOptions {
            open_states: config.get_open_order_states().await?,
            date_tolerance_days: config.get_date_tolerance_days().await?,
        };

        let order_repo = Arc::new(SqliteOrderRepository::from_connection(conn.clone()));
        let creator = DeliveryCreator::new(
            Arc::new(SqliteDeliveryRepository::from_connection(conn.clone())),
            order_repo.clone(),
            Arc::new(SqlitePricingProvider::from_connection(conn)),
            options,
        );

        Ok(Self {
            config,
            creator,
            order_repo,
        })
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    // ==========================================
    // 解析
    // ==========================================

    /// 解析单个导出文件（扩展名可识别时按扩展名，否则按魔数嗅探）
    #[instrument(skip(self))]
    pub async fn parse_file(&self, path: &Path) -> ApiResult<ParseResult> {
        let parser = self.build_parser(path).await?;
        parse_on_blocking_pool(parser, path.to_path_buf()).await
    }

    /// 并发解析多个文件；单个文件失败不影响其他文件
    #[instrument(skip(self, paths), fields(files = paths.len()))]
    pub async fn parse_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, ApiResult<ParseResult>)> {
        let tasks = paths.iter().map(|path| async move {
            let result = match self.build_parser(path).await {
                Ok(parser) => parse_on_blocking_pool(parser, path.clone()).await,
                Err(e) => Err(e),
            };
            (path.clone(), result)
        });

        futures::future::join_all(tasks).await
    }

    async fn build_parser(&self, path: &Path) -> ApiResult<RawExportParser> {
        let options = self.config.get_parser_options().await?;
        let sheet_parser = UniversalSheetParser::for_path(path).unwrap_or_default();
        Ok(RawExportParser::new(options)?.with_sheet_parser(sheet_parser))
    }

    // ==========================================
    // 创建 / 重算
    // ==========================================

    pub async fn validate_for_order(&self, order_id: &str, rows: &[StagingDelivery]) -> ApiResult<OrderValidation> {
        Ok(self.creator.validate_for_order(order_id, rows).await?)
    }

    /// 为订单导入暂存行
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn import_for_order(&self, order_id: &str, rows: &[StagingDelivery]) -> ApiResult<CreationResult> {
        let result = self.creator.create_for_order(order_id, rows).await?;
        info!(
            order_id = %order_id,
            created = result.created_ids.len(),
            failed = result.errors.len(),
            "导入完成"
        );
        Ok(result)
    }

    pub async fn recompute(&self, order_id: &str) -> ApiResult<OrderTotals> {
        Ok(self.creator.recompute_order_totals(order_id).await?)
    }

    /// 读取订单当前汇总
    pub fn order_totals(&self, order_id: &str) -> ApiResult<OrderTotals> {
        self.order_repo
            .get_totals(order_id)?
            .ok_or_else(|| ApiError::NotFound(format!("orders(id={})不存在", order_id)))
    }
}

async fn parse_on_blocking_pool(parser: RawExportParser, path: PathBuf) -> ApiResult<ParseResult> {
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::ImportError(crate::importer::ImportError::FileNotFound(path.display().to_string()))
        } else {
            ApiError::ImportError(e.into())
        }
    })?;

    let result = tokio::task::spawn_blocking(move || parser.parse(&bytes)).await??;
    info!(
        file = %path.display(),
        rows = result.rows.len(),
        errors = result.errors.len(),
        "文件解析完成"
    );
    Ok(result)
}
