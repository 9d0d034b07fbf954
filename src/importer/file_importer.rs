// ==========================================
// NRQZ 记录管理系统 - 文件级导入器
// ==========================================
// 流程: 解析 → 表头归类 → (抽样) → 逐行: 快照 → 各 FormMap 尝试 → 行内关联 → 审计
// 事务模式:
// - 非持久模式: 整个文件一个事务,首个被拒绝的行终止并回滚全部,
//   之后仅提交文件级尝试（携带全部行错误）
// - 持久模式: 每行一个事务,被拒绝的行照常提交快照与尝试记录
// - dry-run: 完整执行后回滚全部（含审计）,仍返回报告
// - 数据库错误: 停止后续行,文件级尝试记为 rejected（STORAGE）后返回错误
// 写入闸门: 同进程内共享同一数据库的导入器串行化写事务
// ==========================================

use crate::config::ImportConfigReader;
use crate::db::with_savepoint;
use crate::domain::import::{
    FieldError, FieldErrorKind, FileError, FileErrorKind, FileImportAttempt, FileImportReport,
    ImportAttempt, ImportSummary, RawRow, RowErrorSummary, RowSnapshot,
};
use crate::domain::schema::SchemaRegistry;
use crate::domain::types::ImportStatus;
use crate::importer::error::{ImportError, ImportResult, MappingConfigError};
use crate::importer::file_parser::{ParsedFile, UniversalFileParser};
use crate::importer::form_map::{HeaderReport, ImportProfile};
use crate::importer::import_attempt::{
    attempt_rendered, constraint_message, derive_status, rejection_reason, summarize, ModelAttempt,
};
use crate::importer::profiles;
use crate::repository::error::RepositoryError;
use crate::repository::import_audit_repo::ImportAuditRepository;
use crate::repository::record_repo::SqliteRecordStore;
use crate::repository::record_store::RecordStore;
use crate::repository::snapshot_repo::SnapshotRepository;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

// ==========================================
// ImportOptions - 单个文件的导入选项
// ==========================================
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// 内置 Profile 名称（case / prelim / facility）
    pub profile: String,
    /// None → 读取配置 import.default_durable
    pub durable: Option<bool>,
    pub dry_run: bool,
    /// 抽样比例 (0, 1]
    pub limit: Option<f64>,
    /// 抽样随机种子（固定后可复现）
    pub seed: Option<u64>,
    /// 行间检查的中断标志
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::new(profiles::PROFILE_CASE)
    }
}

impl ImportOptions {
    pub fn new(profile: &str) -> Self {
        Self {
            profile: profile.to_string(),
            durable: None,
            dry_run: false,
            limit: None,
            seed: None,
            cancel: None,
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn limit(mut self, fraction: f64, seed: Option<u64>) -> Self {
        self.limit = Some(fraction);
        self.seed = seed;
        self
    }

    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// 一次逐行处理的结果
#[derive(Default)]
struct RowRun {
    summary: ImportSummary,
    row_errors: Vec<RowErrorSummary>,
    row_attempts: Vec<ImportAttempt>,
    /// 非持久模式下首个被拒绝行
    rejected: Option<FileError>,
    interrupted: Option<FileError>,
    /// 数据库错误（导入中止）
    failed: Option<(FileError, ImportError)>,
}

impl RowRun {
    fn absorb(&mut self, attempts: Vec<ImportAttempt>) {
        for attempt in attempts {
            self.summary.record(attempt.status);
            if let Some(summary) = summarize(&attempt) {
                self.row_errors.push(summary);
            }
            self.row_attempts.push(attempt);
        }
    }

    fn status(&self) -> ImportStatus {
        ImportStatus::aggregate(self.row_attempts.iter().map(|a| a.status))
    }
}

// ==========================================
// FileImporter - 文件级导入器
// ==========================================
pub struct FileImporter<C>
where
    C: ImportConfigReader,
{
    conn: Arc<Mutex<Connection>>,
    schema: Arc<SchemaRegistry>,
    store: Box<dyn RecordStore>,
    config: C,
    parser: UniversalFileParser,
    write_gate: Option<Arc<Mutex<()>>>,
}

impl<C> FileImporter<C>
where
    C: ImportConfigReader,
{
    /// 创建新的 FileImporter 实例
    ///
    /// # 参数
    /// - conn: 共享数据库连接（导入期间独占）
    /// - schema: Schema 注册表
    /// - config: 配置读取器（未识别表头阈值 / 默认持久模式）
    pub fn new(conn: Arc<Mutex<Connection>>, schema: Arc<SchemaRegistry>, config: C) -> Self {
        let store = Box::new(SqliteRecordStore::new(schema.clone()));
        Self {
            conn,
            schema,
            store,
            config,
            parser: UniversalFileParser,
            write_gate: None,
        }
    }

    /// 替换持久化协作者
    pub fn with_store(mut self, store: Box<dyn RecordStore>) -> Self {
        self.store = store;
        self
    }

    /// 共享写入闸门
    ///
    /// 持有期间才开启写事务; 多个独立连接写同一个库时避免 busy_timeout 超时
    pub fn with_write_gate(mut self, gate: Arc<Mutex<()>>) -> Self {
        self.write_gate = Some(gate);
        self
    }

    fn write_permit(&self) -> ImportResult<Option<MutexGuard<'_, ()>>> {
        self.write_gate
            .as_ref()
            .map(|gate| {
                gate.lock()
                    .map_err(|e| ImportError::Repository(RepositoryError::LockError(e.to_string())))
            })
            .transpose()
    }

    fn get_conn(&self) -> ImportResult<MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| ImportError::Repository(RepositoryError::LockError(e.to_string())))
    }

    /// 导入单个文件
    ///
    /// # 返回
    /// - Ok(FileImportReport): 文件级结果（含被拒绝 / 空文件）
    /// - Err: 文件不存在、格式不支持、Profile 未知、数据库错误
    ///
    /// # 说明
    /// 文件内容无法解析（CSV/Excel 损坏、表头重复）记为被拒绝的文件级尝试
    #[instrument(skip(self, file_path, options), fields(profile = %options.profile))]
    pub fn import_file<P: AsRef<Path>>(&self, file_path: P, options: &ImportOptions) -> ImportResult<FileImportReport> {
        let path = file_path.as_ref();
        let source = path.display().to_string();
        validate_limit(options.limit)?;

        match self.parser.parse(path) {
            Ok(parsed) => self.import_parsed(&source, parsed, options),
            Err(
                err @ (ImportError::CsvParseError(_)
                | ImportError::ExcelParseError(_)
                | ImportError::DuplicateHeader(_)),
            ) => {
                warn!(file = %source, error = %err, "文件解析失败");
                self.record_parse_failure(&source, options, &err)
            }
            Err(err) => Err(err),
        }
    }

    /// 导入已解析的行（文件解析之后的全部流程）
    ///
    /// # 参数
    /// - source_path: 审计记录中的来源路径
    /// - parsed: 表头 + (行号, 原始行)
    pub fn import_parsed(
        &self,
        source_path: &str,
        parsed: ParsedFile,
        options: &ImportOptions,
    ) -> ImportResult<FileImportReport> {
        let started = Instant::now();
        validate_limit(options.limit)?;

        let profile = profiles::builtin(&options.profile, &self.schema)?;
        let durable = match options.durable {
            Some(durable) => durable,
            None => self.config.get_default_durable()?,
        };
        let threshold = self.config.get_unmapped_header_threshold()?;

        let headers = profile.classify_headers(&parsed.headers);
        let total_rows = parsed.rows.len();
        let rows = sample_rows(parsed.rows, options.limit, options.seed);

        let mut file_attempt = FileImportAttempt {
            file_attempt_id: uuid::Uuid::new_v4().to_string(),
            source_path: source_path.to_string(),
            profile: profile.name().to_string(),
            durable,
            dry_run: options.dry_run,
            status: ImportStatus::Empty,
            row_count: rows.len(),
            unmapped_headers: headers.unmapped.clone(),
            ambiguous_headers: headers.ambiguous.clone(),
            file_errors: Vec::new(),
            acknowledged: false,
            created_at: Utc::now(),
            elapsed_ms: 0,
        };

        info!(
            file_attempt_id = %file_attempt.file_attempt_id,
            file = %source_path,
            total_rows,
            sampled_rows = rows.len(),
            durable,
            dry_run = options.dry_run,
            "开始导入文件"
        );

        let structural = unmapped_ratio_error(&headers, threshold);
        if let Some(file_error) = &structural {
            warn!(
                file_attempt_id = %file_attempt.file_attempt_id,
                ratio = headers.unmapped_ratio(),
                threshold,
                "未识别表头比例超限"
            );
            file_attempt.file_errors.push(file_error.clone());
        }

        let mut run = if structural.is_some() && !durable {
            // 结构性错误: 非持久模式不尝试任何行
            RowRun::default()
        } else if durable && !options.dry_run {
            self.run_per_row(&profile, &file_attempt, rows, options)?
        } else {
            self.run_in_one_transaction(&profile, &file_attempt, rows, options, durable)?
        };
        run.summary.total_rows = total_rows;
        run.summary.sampled_rows = file_attempt.row_count;

        file_attempt.status = run.status();
        if structural.is_some() {
            file_attempt.status = ImportStatus::Rejected;
        }
        if let Some(file_error) = run.rejected.take() {
            file_attempt.status = ImportStatus::Rejected;
            file_attempt.file_errors.push(file_error);
        }
        if let Some(file_error) = run.interrupted.take() {
            if !durable {
                file_attempt.status = ImportStatus::Rejected;
            }
            file_attempt.file_errors.push(file_error);
        }
        let failed = run.failed.take();
        if let Some((file_error, _)) = &failed {
            file_attempt.status = ImportStatus::Rejected;
            file_attempt.file_errors.push(file_error.clone());
        }
        file_attempt.elapsed_ms = started.elapsed().as_millis() as i64;

        if !options.dry_run {
            let persisted = self.persist_file_attempt(&file_attempt, &run.row_errors, durable && structural.is_none());
            match (persisted, &failed) {
                (Err(err), None) => return Err(err),
                (Err(err), Some(_)) => {
                    error!(file_attempt_id = %file_attempt.file_attempt_id, error = %err, "文件级尝试写入失败");
                }
                (Ok(()), _) => {}
            }
        }
        if let Some((_, err)) = failed {
            warn!(
                file_attempt_id = %file_attempt.file_attempt_id,
                committed = run.row_attempts.len(),
                "导入因数据库错误中止"
            );
            return Err(err);
        }

        info!(
            file_attempt_id = %file_attempt.file_attempt_id,
            status = %file_attempt.status,
            attempts = run.summary.attempts,
            created_clean = run.summary.created_clean,
            created_dirty = run.summary.created_dirty,
            rejected = run.summary.rejected,
            elapsed_ms = file_attempt.elapsed_ms,
            "文件导入完成"
        );

        Ok(FileImportReport {
            file_attempt,
            summary: run.summary,
            row_errors: run.row_errors,
            row_attempts: run.row_attempts,
        })
    }

    /// 单事务执行（非持久模式 / dry-run）
    ///
    /// 非持久模式: 首个被拒绝行终止; 被拒绝 / 中断 / 数据库错误 / dry-run 时整体回滚
    fn run_in_one_transaction(
        &self,
        profile: &ImportProfile,
        file_attempt: &FileImportAttempt,
        rows: Vec<(usize, RawRow)>,
        options: &ImportOptions,
        durable: bool,
    ) -> ImportResult<RowRun> {
        let _permit = self.write_permit()?;
        let conn = self.get_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;
        ImportAuditRepository::insert_file_attempt_tx(&tx, file_attempt, &[])?;

        let mut run = RowRun::default();
        for (row_number, data) in rows {
            if options.is_cancelled() {
                run.interrupted = Some(interrupted_at(row_number));
                break;
            }

            let snapshot = RowSnapshot::new(Some(file_attempt.file_attempt_id.clone()), row_number, data);
            let attempts = match self.process_row(&tx, profile, &snapshot) {
                Ok(attempts) => attempts,
                Err(err) => {
                    error!(row_number, error = %err, "行处理失败,回滚整个文件");
                    run.failed = Some((storage_failure(&err, row_number), err));
                    break;
                }
            };
            let first_rejected = attempts
                .iter()
                .find(|a| a.status == ImportStatus::Rejected)
                .map(|a| FileError::new(FileErrorKind::RowRejected, rejection_reason(a)).at_row(row_number));
            run.absorb(attempts);

            if !durable {
                if let Some(file_error) = first_rejected {
                    warn!(row_number, reason = %file_error.message, "行被拒绝,回滚整个文件");
                    run.rejected = Some(file_error);
                    break;
                }
            }
        }

        if options.dry_run || run.rejected.is_some() || run.interrupted.is_some() || run.failed.is_some() {
            tx.rollback()?;
            debug!(file_attempt_id = %file_attempt.file_attempt_id, "文件事务已回滚");
        } else {
            tx.commit()?;
        }
        Ok(run)
    }

    /// 逐行事务执行（持久模式）
    fn run_per_row(
        &self,
        profile: &ImportProfile,
        file_attempt: &FileImportAttempt,
        rows: Vec<(usize, RawRow)>,
        options: &ImportOptions,
    ) -> ImportResult<RowRun> {
        {
            let _permit = self.write_permit()?;
            let conn = self.get_conn()?;
            ImportAuditRepository::insert_file_attempt_tx(&conn, file_attempt, &[])?;
        }

        let mut run = RowRun::default();
        for (row_number, data) in rows {
            if options.is_cancelled() {
                info!(row_number, "导入被中断,已提交的行保持不变");
                run.interrupted = Some(interrupted_at(row_number));
                break;
            }

            let snapshot = RowSnapshot::new(Some(file_attempt.file_attempt_id.clone()), row_number, data);
            match self.commit_row(profile, &snapshot) {
                Ok(attempts) => run.absorb(attempts),
                Err(err) => {
                    error!(row_number, error = %err, "行处理失败,停止后续行");
                    run.failed = Some((storage_failure(&err, row_number), err));
                    break;
                }
            }
        }
        Ok(run)
    }

    /// 持久模式的单行事务; 闸门与连接只在本行内持有
    fn commit_row(&self, profile: &ImportProfile, snapshot: &RowSnapshot) -> ImportResult<Vec<ImportAttempt>> {
        let _permit = self.write_permit()?;
        let conn = self.get_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;
        let attempts = self.process_row(&tx, profile, snapshot)?;
        tx.commit()?;
        Ok(attempts)
    }

    /// 单行: 写快照 → 按声明顺序尝试各 FormMap → 行内关联 → 写尝试记录
    fn process_row(
        &self,
        conn: &Connection,
        profile: &ImportProfile,
        snapshot: &RowSnapshot,
    ) -> ImportResult<Vec<ImportAttempt>> {
        SnapshotRepository::insert_snapshot_tx(conn, snapshot)?;

        let mut outcomes: Vec<ModelAttempt> = Vec::new();
        for entry in profile.entries() {
            let rendered = entry.form_map.render(&snapshot.data);
            if entry.optional && rendered.is_blank() {
                continue;
            }
            outcomes.push(attempt_rendered(conn, self.store.as_ref(), snapshot, &entry.form_map, rendered)?);
        }

        self.apply_links(conn, profile, &mut outcomes)?;

        let mut attempts = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            ImportAuditRepository::insert_attempt_tx(conn, &outcome.attempt)?;
            attempts.push(outcome.attempt);
        }
        Ok(attempts)
    }

    /// 连接同一行产出的记录
    ///
    /// 单值关系 → set_single,多值关系 → add_to_set;
    /// 约束失败记为 from 端尝试上的非致命校验错误
    fn apply_links(&self, conn: &Connection, profile: &ImportProfile, outcomes: &mut [ModelAttempt]) -> ImportResult<()> {
        for link in profile.links() {
            let record_of = |form: &str| {
                outcomes
                    .iter()
                    .find(|o| o.attempt.form_map == form)
                    .and_then(|o| o.record.as_ref())
                    .map(|r| r.record_id)
            };
            let (Some(from_id), Some(to_id)) = (record_of(&link.from_form), record_of(&link.to_form)) else {
                continue;
            };

            let spec = self
                .schema
                .relation(&link.relation)
                .ok_or_else(|| MappingConfigError::UnknownRelation(link.relation.clone()))?;
            let single = spec.cardinality.is_single_valued();

            let linked = with_savepoint(conn, "row_link", |c| -> Result<(), RepositoryError> {
                if single {
                    self.store.set_single(c, &link.relation, from_id, to_id)
                } else {
                    self.store.add_to_set(c, &link.relation, from_id, to_id).map(|_| ())
                }
            });

            if let Err(err) = linked {
                let message = constraint_message(&err).ok_or(ImportError::Repository(err))?;
                debug!(relation = %link.relation, from_id, to_id, %message, "行内关联失败");
                if let Some(outcome) = outcomes.iter_mut().find(|o| o.attempt.form_map == link.from_form) {
                    outcome
                        .attempt
                        .errors
                        .push(FieldError::new(&link.relation, FieldErrorKind::Validation, message));
                    outcome.attempt.status = derive_status(outcome.record.is_some(), &outcome.attempt.errors);
                }
            }
        }
        Ok(())
    }

    /// 写入文件级最终状态
    ///
    /// # 参数
    /// - already_inserted: 持久模式下文件级尝试已在逐行处理前提交
    fn persist_file_attempt(
        &self,
        file_attempt: &FileImportAttempt,
        row_errors: &[RowErrorSummary],
        already_inserted: bool,
    ) -> ImportResult<()> {
        let _permit = self.write_permit()?;
        let conn = self.get_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;
        let exists = already_inserted
            || ImportAuditRepository::get_file_attempt_tx(&tx, &file_attempt.file_attempt_id)?.is_some();
        if exists {
            ImportAuditRepository::update_file_attempt_tx(&tx, file_attempt, row_errors)?;
        } else {
            ImportAuditRepository::insert_file_attempt_tx(&tx, file_attempt, row_errors)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn record_parse_failure(
        &self,
        source_path: &str,
        options: &ImportOptions,
        err: &ImportError,
    ) -> ImportResult<FileImportReport> {
        let file_attempt = FileImportAttempt {
            file_attempt_id: uuid::Uuid::new_v4().to_string(),
            source_path: source_path.to_string(),
            profile: options.profile.clone(),
            durable: options.durable.unwrap_or(false),
            dry_run: options.dry_run,
            status: ImportStatus::Rejected,
            row_count: 0,
            unmapped_headers: Vec::new(),
            ambiguous_headers: Vec::new(),
            file_errors: vec![FileError::new(FileErrorKind::Parse, err.to_string())],
            acknowledged: false,
            created_at: Utc::now(),
            elapsed_ms: 0,
        };
        if !options.dry_run {
            self.persist_file_attempt(&file_attempt, &[], false)?;
        }
        Ok(FileImportReport {
            file_attempt,
            summary: ImportSummary::default(),
            row_errors: Vec::new(),
            row_attempts: Vec::new(),
        })
    }
}

fn validate_limit(limit: Option<f64>) -> ImportResult<()> {
    match limit {
        Some(fraction) if !(fraction > 0.0 && fraction <= 1.0) => Err(ImportError::InvalidLimit(fraction)),
        _ => Ok(()),
    }
}

fn interrupted_at(row_number: usize) -> FileError {
    FileError::new(FileErrorKind::Interrupted, "导入在行间被中断").at_row(row_number)
}

fn storage_failure(err: &ImportError, row_number: usize) -> FileError {
    FileError::new(FileErrorKind::Storage, err.to_string()).at_row(row_number)
}

fn unmapped_ratio_error(headers: &HeaderReport, threshold: f64) -> Option<FileError> {
    let ratio = headers.unmapped_ratio();
    if ratio <= threshold {
        return None;
    }
    let err = ImportError::UnmappedHeaderRatio {
        ratio,
        threshold,
        unmapped: headers.unmapped.clone(),
    };
    Some(FileError::new(FileErrorKind::UnmappedHeaderRatio, err.to_string()))
}

/// 按比例抽样 ceil(n·f) 行,保持原始行序
///
/// # 参数
/// - seed: 固定种子 → 结果可复现; None → 系统熵
pub fn sample_rows(rows: Vec<(usize, RawRow)>, limit: Option<f64>, seed: Option<u64>) -> Vec<(usize, RawRow)> {
    let Some(fraction) = limit else {
        return rows;
    };
    let total = rows.len();
    let take = ((total as f64) * fraction).ceil() as usize;
    if take >= total {
        return rows;
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut picked = rand::seq::index::sample(&mut rng, total, take).into_vec();
    picked.sort_unstable();

    let mut slots: Vec<Option<(usize, RawRow)>> = rows.into_iter().map(Some).collect();
    picked.into_iter().filter_map(|idx| slots[idx].take()).collect()
}
