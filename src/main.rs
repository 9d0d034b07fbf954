// ==========================================
// NRQZ 记录管理系统 - 命令行入口
// ==========================================
// 子命令: import / group / duplicates / merge / acknowledge
// 退出码: 0 created_clean|created_dirty, 2 rejected, 3 empty, 1 任意错误
// ==========================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use nrqz_reconcile::app::{get_default_db_path, AppState};
use nrqz_reconcile::domain::{ConflictResolution, FileImportReport, ImportStatus, RecordType};
use nrqz_reconcile::i18n::{set_locale, status_label, t, t_with_args};
use nrqz_reconcile::importer::ImportOptions;
use nrqz_reconcile::logging;

#[derive(Parser)]
#[command(name = "nrqz-import", version, about = "NRQZ 记录导入与对账")]
struct Cli {
    /// SQLite 数据库路径（默认: NRQZ_DB_PATH 或用户数据目录）
    #[arg(long, env = "NRQZ_DB_PATH", global = true)]
    db: Option<String>,

    /// 以 JSON 输出结果（日志同时切换为 JSON）
    #[arg(long, global = true)]
    json: bool,

    /// 输出语言（zh-CN / en）
    #[arg(long, default_value = "zh-CN", global = true)]
    locale: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 导入一个或多个数据文件
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// 导入 Profile
        #[arg(long, default_value = "case")]
        profile: String,
        /// 持久模式: 逐行提交,被拒绝的行不影响其他行
        #[arg(long)]
        durable: bool,
        /// 演练: 完整执行后回滚（包括审计记录）
        #[arg(long)]
        dry_run: bool,
        /// 抽样比例 (0, 1]
        #[arg(long)]
        limit: Option<f64>,
        /// 抽样随机种子
        #[arg(long)]
        seed: Option<u64>,
    },
    /// 重建交叉引用分组
    Group,
    /// 查找疑似重复记录
    Duplicates {
        #[arg(long = "type", value_enum, default_value = "person")]
        record_type: DedupType,
        /// 相似度阈值（默认读取配置）
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// 合并别名记录到 primary
    Merge {
        primary_id: i64,
        #[arg(required = true)]
        alias_ids: Vec<i64>,
        /// 字段冲突策略（默认读取配置,通常为 escalate）
        #[arg(long, value_enum)]
        prefer: Option<Prefer>,
        /// 只预览 diff,不提交
        #[arg(long)]
        dry_run: bool,
    },
    /// 确认一条行级或文件级导入尝试
    Acknowledge { attempt_id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum DedupType {
    Person,
    Facility,
}

impl From<DedupType> for RecordType {
    fn from(value: DedupType) -> Self {
        match value {
            DedupType::Person => RecordType::Person,
            DedupType::Facility => RecordType::Facility,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Prefer {
    Escalate,
    Primary,
    Longest,
    Recent,
}

impl From<Prefer> for ConflictResolution {
    fn from(value: Prefer) -> Self {
        match value {
            Prefer::Escalate => ConflictResolution::Escalate,
            Prefer::Primary => ConflictResolution::PreferPrimary,
            Prefer::Longest => ConflictResolution::PreferLongest,
            Prefer::Recent => ConflictResolution::PreferMostRecent,
        }
    }
}

/// 文件级状态 → 退出码
fn exit_code(status: ImportStatus) -> i32 {
    match status {
        ImportStatus::CreatedClean | ImportStatus::CreatedDirty => 0,
        ImportStatus::Rejected => 2,
        ImportStatus::Empty => 3,
    }
}

fn emit_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(report: &FileImportReport) {
    let file = &report.file_attempt;
    let summary = &report.summary;
    println!(
        "{}",
        t_with_args("import.summary", &[
            ("path", &file.source_path),
            ("status", &status_label(file.status)),
            ("total", &summary.total_rows.to_string()),
            ("rows", &summary.sampled_rows.to_string()),
            ("clean", &summary.created_clean.to_string()),
            ("dirty", &summary.created_dirty.to_string()),
            ("rejected", &summary.rejected.to_string()),
        ])
    );
    if file.dry_run {
        println!("  {}", t("import.dry_run"));
    }
    if !file.unmapped_headers.is_empty() {
        println!("  {}", t_with_args("import.unmapped_headers", &[("headers", &file.unmapped_headers.join(", "))]));
    }
    if !file.ambiguous_headers.is_empty() {
        println!("  {}", t_with_args("import.ambiguous_headers", &[("headers", &file.ambiguous_headers.join(", "))]));
    }
    for err in &file.file_errors {
        println!("  {}", t_with_args("import.file_error", &[("message", &err.message)]));
    }
    for row in &report.row_errors {
        for (field, messages) in &row.errors {
            for message in messages {
                println!(
                    "  {}",
                    t_with_args("import.row_error", &[
                        ("row", &row.row_number.to_string()),
                        ("form", &row.form_map),
                        ("field", field),
                        ("message", message),
                    ])
                );
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let db_path = cli.db.clone().unwrap_or_else(get_default_db_path);
    tracing::info!(db = %db_path, "使用数据库");
    let state = AppState::new(db_path).map_err(anyhow::Error::msg)?;

    match cli.command {
        Command::Import {
            paths,
            profile,
            durable,
            dry_run,
            limit,
            seed,
        } => {
            let cancel = Arc::new(AtomicBool::new(false));
            let watcher = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("收到中断信号,当前行处理完后停止");
                        cancel.store(true, Ordering::Relaxed);
                    }
                })
            };

            let mut options = ImportOptions::new(&profile).dry_run(dry_run).cancel_flag(cancel);
            if durable {
                options = options.durable(true);
            }
            if let Some(fraction) = limit {
                options = options.limit(fraction, seed);
            }

            let items = state.import_api.batch_import(paths, options).await;
            watcher.abort();

            if cli.json {
                emit_json(&items)?;
            }
            let mut worst: Option<ImportStatus> = None;
            let mut failed = false;
            for item in &items {
                match (&item.report, &item.error) {
                    (Some(report), _) => {
                        if !cli.json {
                            print_report(report);
                        }
                        worst = Some(worst.map_or(report.status(), |w| w.min(report.status())));
                    }
                    (None, Some(error)) => {
                        failed = true;
                        eprintln!("{}: {}", item.path, error);
                    }
                    (None, None) => failed = true,
                }
            }
            if failed {
                return Ok(1);
            }
            Ok(worst.map_or(3, exit_code))
        }

        Command::Group => {
            let report = state.reconcile_api.rebuild_groups()?;
            if cli.json {
                emit_json(&report)?;
            } else {
                println!(
                    "{}",
                    t_with_args("group.summary", &[
                        ("records", &report.records_scanned.to_string()),
                        ("references", &report.references_found.to_string()),
                        ("created", &report.groups_created.to_string()),
                        ("merged", &report.groups_merged.to_string()),
                        ("added", &report.members_added.to_string()),
                    ])
                );
                for group in &report.groups {
                    println!(
                        "  {}",
                        t_with_args("group.line", &[
                            ("id", &group.group_id.to_string()),
                            ("members", &format!("{:?}", group.member_ids)),
                        ])
                    );
                }
            }
            Ok(0)
        }

        Command::Duplicates { record_type, threshold } => {
            let clusters = state
                .reconcile_api
                .find_duplicates(record_type.into(), threshold)?;
            if cli.json {
                emit_json(&clusters)?;
            } else if clusters.is_empty() {
                println!("{}", t("dedup.none"));
            } else {
                for cluster in &clusters {
                    println!(
                        "{}",
                        t_with_args("dedup.cluster", &[
                            ("ids", &format!("{:?}", cluster.record_ids)),
                            ("score", &format!("{:.3}", cluster.best_score)),
                        ])
                    );
                }
            }
            Ok(0)
        }

        Command::Merge {
            primary_id,
            alias_ids,
            prefer,
            dry_run,
        } => {
            let prefer = prefer.map(ConflictResolution::from);
            let result = if dry_run {
                state.reconcile_api.preview_merge(primary_id, &alias_ids, prefer)?
            } else {
                state.reconcile_api.merge(primary_id, &alias_ids, prefer)?
            };
            if cli.json {
                emit_json(&result)?;
            } else {
                let key = if dry_run { "merge.preview" } else { "merge.done" };
                println!(
                    "{}",
                    t_with_args(key, &[
                        ("primary", &result.primary_id.to_string()),
                        ("aliases", &format!("{:?}", result.consumed_ids)),
                    ])
                );
                for line in result.summary_lines() {
                    println!("  {}", line);
                }
            }
            Ok(0)
        }

        Command::Acknowledge { attempt_id } => {
            let count = state
                .import_api
                .acknowledge(&attempt_id)
                .with_context(|| format!("确认 {} 失败", attempt_id))?;
            if cli.json {
                emit_json(&serde_json::json!({ "attempt_id": attempt_id, "acknowledged": count }))?;
            } else {
                println!("{}", t_with_args("ack.done", &[("count", &count.to_string())]));
            }
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.json {
        logging::init_json();
    } else {
        logging::init();
    }
    set_locale(&cli.locale);

    tracing::info!("NRQZ 导入与对账 {}", nrqz_reconcile::VERSION);
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "执行失败");
            eprintln!("{}: {:#}", t("common.failed"), err);
            1
        }
    };
    std::process::exit(code);
}
