// ==========================================
// 调度导出导入系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 说明: 值缺失或格式错误时回退默认值并告警，不中断导入
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::db::{configure_sqlite_connection, open_sqlite_connection, GLOBAL_SCOPE_ID};
use crate::domain::types::{MeasureKey, OrderLifecycleState};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::header_detector::DEFAULT_HEADER_SCAN_ROWS;
use crate::importer::material_blocks::MeasureAliases;
use crate::importer::metadata::MetadataLayout;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// 默认日期容差（天）
pub const DEFAULT_DATE_TOLERANCE_DAYS: i64 = 1;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ImportResult<Self> {
        let conn = open_sqlite_connection(db_path).map_err(|e| ImportError::ConfigReadError {
            key: "*".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：会对传入连接再次应用统一 PRAGMA（幂等）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ImportResult<Self> {
        {
            let guard = Self::lock(&conn)?;
            configure_sqlite_connection(&guard).map_err(|e| ImportError::ConfigReadError {
                key: "*".to_string(),
                message: e.to_string(),
            })?;
        }

        Ok(Self { conn })
    }

    fn lock(conn: &Mutex<Connection>) -> ImportResult<MutexGuard<'_, Connection>> {
        conn.lock().map_err(|e| ImportError::ConfigReadError {
            key: "*".to_string(),
            message: format!("锁获取失败: {}", e),
        })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> ImportResult<Option<String>> {
        let conn = Self::lock(&self.conn)?;
        conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
            params![GLOBAL_SCOPE_ID, key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ImportResult<()> {
        let conn = Self::lock(&self.conn)?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?3, updated_at = datetime('now')",
            params![GLOBAL_SCOPE_ID, key, value],
        )
        .map_err(|e| ImportError::ConfigValueError {
            key: key.to_string(),
            value: value.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// 获取所有 global 配置
    pub fn get_config_snapshot(&self) -> ImportResult<BTreeMap<String, String>> {
        let conn = Self::lock(&self.conn)?;
        let to_err = |e: rusqlite::Error| ImportError::ConfigReadError {
            key: "*".to_string(),
            message: e.to_string(),
        };

        let mut stmt = conn
            .prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")
            .map_err(to_err)?;
        let rows = stmt
            .query_map(params![GLOBAL_SCOPE_ID], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(to_err)?;

        let mut snapshot = BTreeMap::new();
        for row in rows {
            let (key, value) = row.map_err(to_err)?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> ImportResult<String> {
        Ok(self
            .get_global_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// 读取 JSON 配置；格式错误时告警并返回 None
    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> ImportResult<Option<T>> {
        let raw = match self.get_global_config_value(key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(config_key = key, value = %raw, error = %e, "配置 JSON 格式错误，使用默认值");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_header_scan_rows(&self) -> ImportResult<usize> {
        let default = DEFAULT_HEADER_SCAN_ROWS.to_string();
        let value = self.get_config_or_default(config_keys::HEADER_SCAN_ROWS, &default)?;
        match value.trim().parse::<usize>() {
            Ok(rows) if rows > 0 => Ok(rows),
            _ => {
                warn!(config_key = config_keys::HEADER_SCAN_ROWS, value = %value, "配置值无效，使用默认值");
                Ok(DEFAULT_HEADER_SCAN_ROWS)
            }
        }
    }

    async fn get_measure_aliases(&self) -> ImportResult<MeasureAliases> {
        let mut aliases = MeasureAliases::default();

        for key in MeasureKey::ALL {
            let override_key = config_keys::measure_aliases(key);
            if let Some(list) = self.get_json::<Vec<String>>(&override_key)? {
                if !list.is_empty() {
                    aliases = aliases.with_override(key, list);
                }
            }

            let extra_key = config_keys::measure_aliases_extra(key);
            if let Some(extra) = self.get_json::<Vec<String>>(&extra_key)? {
                aliases = aliases.with_extra(key, extra);
            }
        }

        Ok(aliases)
    }

    async fn get_metadata_layout(&self) -> ImportResult<MetadataLayout> {
        Ok(self
            .get_json::<MetadataLayout>(config_keys::METADATA_LAYOUT)?
            .unwrap_or_else(MetadataLayout::v1))
    }

    async fn get_open_order_states(&self) -> ImportResult<Vec<OrderLifecycleState>> {
        let value = self.get_config_or_default(config_keys::OPEN_ORDER_STATES, "created,validated,scheduled")?;
        let states: Vec<OrderLifecycleState> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(OrderLifecycleState::from_db_str)
            .collect();

        if states.is_empty() {
            Ok(OrderLifecycleState::default_open_states())
        } else {
            Ok(states)
        }
    }

    async fn get_date_tolerance_days(&self) -> ImportResult<i64> {
        let default = DEFAULT_DATE_TOLERANCE_DAYS.to_string();
        let value = self.get_config_or_default(config_keys::DATE_TOLERANCE_DAYS, &default)?;
        match value.trim().parse::<i64>() {
            Ok(days) if days >= 0 => Ok(days),
            _ => {
                warn!(config_key = config_keys::DATE_TOLERANCE_DAYS, value = %value, "配置值无效，使用默认值");
                Ok(DEFAULT_DATE_TOLERANCE_DAYS)
            }
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    use crate::domain::types::MeasureKey;

    // 解析器
    pub const HEADER_SCAN_ROWS: &str = "header_scan_rows";
    pub const METADATA_LAYOUT: &str = "metadata_layout"; // JSON 对象

    // 创建器
    pub const OPEN_ORDER_STATES: &str = "open_order_states"; // 逗号分隔
    pub const DATE_TOLERANCE_DAYS: &str = "date_tolerance_days";

    /// 度量别名（JSON 数组，替换默认值）
    pub fn measure_aliases(key: MeasureKey) -> String {
        format!("measure_aliases/{}", key.as_str())
    }

    /// 度量别名（JSON 数组，追加到默认值）
    pub fn measure_aliases_extra(key: MeasureKey) -> String {
        format!("measure_aliases_extra/{}", key.as_str())
    }
}
