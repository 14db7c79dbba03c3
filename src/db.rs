// ==========================================
// 调度导出导入系统 - SQLite 连接初始化与建库
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键 / busy_timeout）
// - 提供幂等建库（init_schema）与 schema_version 检查
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 全局配置作用域
pub const GLOBAL_SCOPE_ID: &str = "global";

/// 默认数据库路径: <用户数据目录>/dispatch-ingest/dispatch_ingest.db
///
/// 取不到用户数据目录时回退到当前目录
pub fn default_db_path() -> PathBuf {
    match dirs::data_dir() {
        Some(data_dir) => data_dir.join("dispatch-ingest").join("dispatch_ingest.db"),
        None => PathBuf::from("./dispatch_ingest.db"),
    }
}

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：foreign_keys 与 busy_timeout 都需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开供多个仓储共享的连接
pub fn open_shared_connection(db_path: &str) -> rusqlite::Result<Arc<Mutex<Connection>>> {
    Ok(Arc::new(Mutex::new(open_sqlite_connection(db_path)?)))
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ===== 配置 =====
CREATE TABLE IF NOT EXISTS config_scope (
    scope_id    TEXT PRIMARY KEY,
    scope_type  TEXT NOT NULL,
    scope_key   TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id    TEXT NOT NULL REFERENCES config_scope(scope_id),
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
VALUES ('global', 'GLOBAL', 'global');

-- ===== 订单（外部实体，本系统只回写汇总） =====
CREATE TABLE IF NOT EXISTS orders (
    id               TEXT PRIMARY KEY,
    order_number     TEXT,
    lifecycle_state  TEXT NOT NULL DEFAULT 'created',
    credit_state     TEXT NOT NULL DEFAULT 'pending',
    delivery_date    TEXT,
    total_volume     REAL NOT NULL DEFAULT 0,
    total_amount     REAL NOT NULL DEFAULT 0,
    updated_at       TEXT
);

CREATE TABLE IF NOT EXISTS order_items (
    id          TEXT PRIMARY KEY,
    order_id    TEXT NOT NULL REFERENCES orders(id),
    product_id  TEXT NOT NULL,
    unit_price  REAL NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_order_items_order_product
    ON order_items(order_id, product_id);

-- ===== 送货单 =====
CREATE TABLE IF NOT EXISTS deliveries (
    id                   TEXT PRIMARY KEY,
    order_id             TEXT NOT NULL REFERENCES orders(id),
    delivery_number      TEXT NOT NULL UNIQUE,
    delivery_date        TEXT NOT NULL,
    load_time            TEXT NOT NULL,
    volume               REAL NOT NULL CHECK (volume > 0),
    driver               TEXT,
    plate_number         TEXT,
    truck_id             TEXT,
    delivery_point       TEXT,
    comments             TEXT,
    internal_comments    TEXT,
    product_description  TEXT,
    resolved_product_id  TEXT NOT NULL,
    status               TEXT NOT NULL,
    source_batch_id      TEXT NOT NULL,
    plant_id             TEXT,
    raw_payload          TEXT NOT NULL,
    created_at           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_deliveries_order ON deliveries(order_id);

CREATE TABLE IF NOT EXISTS delivery_materials (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    delivery_id                 TEXT NOT NULL REFERENCES deliveries(id) ON DELETE CASCADE,
    material_code               TEXT NOT NULL,
    planned_quantity            REAL NOT NULL DEFAULT 0,
    actual_base_quantity        REAL NOT NULL DEFAULT 0,
    rework_quantity             REAL NOT NULL DEFAULT 0,
    manual_adjustment_quantity  REAL NOT NULL DEFAULT 0,
    actual_final_quantity       REAL NOT NULL DEFAULT 0,
    absolute_variance           REAL NOT NULL DEFAULT 0,
    percent_variance            REAL NOT NULL DEFAULT 0,
    UNIQUE (delivery_id, material_code),
    CHECK (abs(actual_final_quantity
               - (actual_base_quantity + rework_quantity + manual_adjustment_quantity)) < 1e-6)
);

INSERT OR IGNORE INTO schema_version (version) VALUES (1);
"#;

/// 幂等建库
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
