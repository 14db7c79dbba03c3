// ==========================================
// 调度导出导入系统 - 命令行入口
// ==========================================
// 子命令: init-db / parse / import / recompute / config
// 输出: JSON（stdout 或 --out 指定文件）
// ==========================================

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dispatch_ingest::api::{build_staging_batch, ImportApi, StagingBatch};
use dispatch_ingest::db::{default_db_path, init_schema, open_sqlite_connection, read_schema_version};
use dispatch_ingest::logging;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "dispatch-ingest", version, about = "调度系统导出文件解析与送货单落库")]
struct Cli {
    /// SQLite 数据库路径（默认: 用户数据目录）
    #[arg(long, global = true, env = "DISPATCH_INGEST_DB_PATH")]
    db: Option<PathBuf>,

    /// 以 JSON 格式输出日志
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 初始化数据库（幂等）
    InitDb,

    /// 解析导出文件
    Parse {
        file: PathBuf,

        /// 解析结果输出文件
        #[arg(long)]
        out: Option<PathBuf>,

        /// 暂存批次输出文件（供 import 使用）
        #[arg(long)]
        staging: Option<PathBuf>,

        /// 技术产品编码 → 产品 ID 映射（JSON 对象）
        #[arg(long, requires = "staging")]
        product_map: Option<PathBuf>,
    },

    /// 将暂存批次导入到订单
    Import {
        #[arg(long)]
        order: String,

        staging: PathBuf,

        /// 仅执行订单预检
        #[arg(long)]
        dry_run: bool,
    },

    /// 全量重算订单汇总
    Recompute {
        #[arg(long)]
        order: String,
    },

    /// 查看/修改全局配置
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.json_logs {
        logging::init_json();
    } else {
        logging::init();
    }

    let db_path = resolve_db_path(cli.db)?;
    tracing::info!(db_path = %db_path, version = dispatch_ingest::VERSION, "{}", dispatch_ingest::APP_NAME);

    match cli.command {
        Command::InitDb => {
            let conn = open_sqlite_connection(&db_path)?;
            init_schema(&conn)?;
            let version = read_schema_version(&conn)?;
            println!("数据库已就绪: {} (schema_version={:?})", db_path, version);
        }
        Command::Parse {
            file,
            out,
            staging,
            product_map,
        } => {
            let api = ImportApi::open(&db_path).await?;
            let result = api.parse_file(&file).await?;

            eprintln!(
                "有效行 {} / 数据行 {}，行级错误 {}，被拒绝行 {}",
                result.metadata.valid_rows,
                result.metadata.total_rows,
                result.errors.len(),
                result.rejected_row_count()
            );

            if let Some(staging_path) = staging {
                let map = match product_map {
                    Some(path) => read_json::<HashMap<String, String>>(&path)?,
                    None => HashMap::new(),
                };
                let batch = build_staging_batch(&result, &map);
                write_json(Some(&staging_path), &batch)?;
                eprintln!("暂存批次 {} 已写入 {}", batch.batch_id, staging_path.display());
            }

            write_json(out.as_deref(), &result)?;
        }
        Command::Import {
            order,
            staging,
            dry_run,
        } => {
            let api = ImportApi::open(&db_path).await?;
            let batch: StagingBatch = read_json(&staging)?;

            if dry_run {
                let validation = api.validate_for_order(&order, &batch.rows).await?;
                write_json(None, &validation)?;
            } else {
                let result = api.import_for_order(&order, &batch.rows).await?;
                write_json(None, &result)?;
                if !result.success && result.created_ids.is_empty() {
                    bail!("未创建任何送货单（错误 {} 条）", result.errors.len());
                }
            }
        }
        Command::Recompute { order } => {
            let api = ImportApi::open(&db_path).await?;
            let totals = api.recompute(&order).await?;
            write_json(None, &totals)?;
        }
        Command::Config { action } => {
            let api = ImportApi::open(&db_path).await?;
            match action {
                ConfigAction::Show => write_json(None, &api.config().get_config_snapshot()?)?,
                ConfigAction::Set { key, value } => {
                    api.config().set_global_config_value(&key, &value)?;
                    println!("{} = {}", key, value);
                }
            }
        }
    }

    Ok(())
}

fn resolve_db_path(explicit: Option<PathBuf>) -> Result<String> {
    let path = explicit.unwrap_or_else(default_db_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("无法创建数据库目录: {}", parent.display()))?;
        }
    }
    Ok(path.to_string_lossy().into_owned())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("读取失败: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("JSON 格式错误: {}", path.display()))
}

fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match path {
        Some(path) => std::fs::write(path, text).with_context(|| format!("写入失败: {}", path.display()))?,
        None => println!("{}", text),
    }
    Ok(())
}
