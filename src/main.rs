// ==========================================
// 商品目录库存后端 - 命令行入口
// ==========================================
// 子命令: import / export / category / config / audits
// ==========================================

use anyhow::{anyhow, bail, Context, Result};
use catalog_inventory::api::{ImportResponse, ImportUpload, JobState};
use catalog_inventory::app::{get_default_db_path, AppState, DB_PATH_ENV};
use catalog_inventory::config::config_keys;
use catalog_inventory::domain::types::{ItemColor, SortField, SortOrder};
use catalog_inventory::domain::ItemQuery;
use catalog_inventory::repository::CatalogRepository;
use catalog_inventory::{logging, ImportReport, APP_NAME, VERSION};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// 轮询后台任务的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "catalog-inventory")]
#[command(author, version, about = "商品目录批量导入/导出", long_about = None)]
struct Cli {
    /// 数据库文件路径
    #[arg(long, global = true, env = DB_PATH_ENV)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 导入一个或多个 CSV / Excel 文件
    Import {
        /// 输入文件（多个文件并发导入）
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// 导出商品目录为 CSV
    Export {
        /// 输出路径（默认自动生成文件名，`-` 表示标准输出）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 按分类名过滤
        #[arg(long)]
        category: Option<String>,

        /// 按颜色过滤
        #[arg(long)]
        color: Option<String>,

        /// 棉含量下限
        #[arg(long)]
        cotton_min: Option<i32>,

        /// 棉含量上限
        #[arg(long)]
        cotton_max: Option<i32>,

        /// 排序字段 (sku|name|price|cotton_part|quantity)
        #[arg(long, default_value = "sku")]
        sort_by: String,

        /// 排序方向 (asc|desc)
        #[arg(long, default_value = "asc")]
        order: String,
    },

    /// 分类管理
    Category {
        #[command(subcommand)]
        action: CategoryAction,
    },

    /// 导入配置
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// 最近的导入记录
    Audits {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum CategoryAction {
    /// 创建分类（已存在时不变）
    Add { name: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// 显示全部导入配置（含默认值）
    Show,
    /// 写入一个配置项
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    logging::init();
    let cli = Cli::parse();

    let db_path = cli.db.unwrap_or_else(get_default_db_path);
    tracing::info!(version = VERSION, db_path = %db_path, "{} 启动", APP_NAME);

    let state = AppState::new(db_path).map_err(|e| anyhow!("初始化失败: {}", e))?;

    match cli.command {
        Commands::Import { files } => import(&state, files).await,
        Commands::Export {
            output,
            category,
            color,
            cotton_min,
            cotton_max,
            sort_by,
            order,
        } => {
            let color = color
                .map(|c| ItemColor::parse(&c).ok_or_else(|| anyhow!("未知颜色: {}", c)))
                .transpose()?;
            let sort_by = SortField::parse(&sort_by).ok_or_else(|| anyhow!("未知排序字段: {}", sort_by))?;
            let query = ItemQuery {
                category,
                color,
                cotton_part_min: cotton_min,
                cotton_part_max: cotton_max,
                sort_by,
                sort_order: SortOrder::parse(&order),
            };
            export(&state, &query, output).await
        }
        Commands::Category {
            action: CategoryAction::Add { name },
        } => {
            let category = state.catalog_repo.create_category(&name).await?;
            println!("{}", serde_json::to_string_pretty(&category)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { action } => config(&state, action).await,
        Commands::Audits { limit } => {
            let audits = state
                .import_api
                .recent_audits(limit)
                .await
                .map_err(|e| anyhow!("{}", e))?;
            println!("{}", serde_json::to_string_pretty(&audits)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn read_upload(path: &Path) -> Result<ImportUpload> {
    let bytes = std::fs::read(path).with_context(|| format!("无法读取文件: {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(ImportUpload::new(file_name, bytes))
}

/// 报告状态码 → 进程退出码（200 → 0，207 → 2）
fn exit_code_for(report: &ImportReport) -> ExitCode {
    if report.has_failures() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

async fn import(state: &AppState, files: Vec<PathBuf>) -> Result<ExitCode> {
    let uploads = files
        .iter()
        .map(|path| read_upload(path))
        .collect::<Result<Vec<_>>>()?;

    if uploads.len() > 1 {
        let mut code = ExitCode::SUCCESS;
        for (path, result) in files.iter().zip(state.import_api.import_many(uploads).await) {
            match result {
                Ok(report) => {
                    if report.has_failures() {
                        code = ExitCode::from(2);
                    }
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                Err(e) => {
                    eprintln!("{}: 导入失败 ({}): {}", path.display(), e.status_code(), e);
                    code = ExitCode::FAILURE;
                }
            }
        }
        return Ok(code);
    }

    let Some(upload) = uploads.into_iter().next() else {
        bail!("未指定输入文件");
    };
    let response = state
        .import_api
        .submit(upload)
        .await
        .map_err(|e| anyhow!("导入失败 ({}): {}", e.status_code(), e))?;

    let report = match response {
        ImportResponse::Completed(report) => report,
        ImportResponse::Accepted(ticket) => {
            eprintln!("已转后台任务: {}", ticket.job_id);
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                let status = state
                    .import_api
                    .poll(&ticket.job_id)
                    .map_err(|e| anyhow!("{}", e))?;
                match status.state {
                    JobState::Running => {
                        if let Some(progress) = status.progress {
                            eprintln!(
                                "已处理 {}/{} 行",
                                progress.rows_processed,
                                progress.total_rows.unwrap_or(0)
                            );
                        }
                    }
                    JobState::Failed => {
                        bail!(
                            "导入失败 ({}): {}",
                            status.error_status.unwrap_or(500),
                            status.error.unwrap_or_default()
                        );
                    }
                    JobState::Completed | JobState::Cancelled => {
                        break status.report.ok_or_else(|| anyhow!("任务结束但缺少报告"))?;
                    }
                }
            }
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(exit_code_for(&report))
}

async fn export(state: &AppState, query: &ItemQuery, output: Option<PathBuf>) -> Result<ExitCode> {
    let api = &state.import_api;
    let exported = match output {
        Some(path) if path.as_os_str() == "-" => api
            .export(query, std::io::stdout())
            .await
            .map_err(|e| anyhow!("{}", e))?,
        other => {
            let path = other.unwrap_or_else(|| PathBuf::from(api.export_file_name()));
            let file = std::fs::File::create(&path)
                .with_context(|| format!("无法创建文件: {}", path.display()))?;
            let exported = api.export(query, file).await.map_err(|e| anyhow!("{}", e))?;
            eprintln!("已导出 {} 行到 {}", exported, path.display());
            exported
        }
    };
    tracing::info!(exported, "导出命令完成");
    Ok(ExitCode::SUCCESS)
}

async fn config(state: &AppState, action: ConfigAction) -> Result<ExitCode> {
    match action {
        ConfigAction::Show => {
            let config = state
                .import_api
                .import_config()
                .await
                .map_err(|e| anyhow!("{}", e))?;
            println!("{}", serde_json::to_string_pretty(&config)?);

            let stored = state.config_manager.get_config_snapshot()?;
            if !stored.is_empty() {
                eprintln!("已覆写的键:");
                for (key, value) in stored {
                    eprintln!("  {} = {}", key, value);
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let key = if key.contains('/') {
                key
            } else {
                format!("import/{}", key)
            };
            if !config_keys::ALL.contains(&key.as_str()) {
                bail!("未知配置键: {}，可选: {}", key, config_keys::ALL.join(", "));
            }
            state.config_manager.set_value(&key, &value)?;
            eprintln!("已写入 {} = {}", key, value);
        }
    }
    Ok(ExitCode::SUCCESS)
}
