// ==========================================
// NRQZ 记录管理系统 - 导入 API
// ==========================================
// 职责: 封装单文件导入 / 批量导入 / 导入审计查询与确认
// 批量导入: 一个文件一个阻塞 worker,各自持有独立 SQLite 连接,
// 写事务经同一个写入闸门串行化（解析与表头归类仍并发）
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::ConfigManager;
use crate::db::open_and_init;
use crate::domain::import::{FileImportAttempt, FileImportReport, ImportAttempt, RowErrorSummary};
use crate::domain::schema::SchemaRegistry;
use crate::importer::{FileImporter, ImportOptions};
use crate::repository::import_audit_repo::ImportAuditRepository;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

/// 批量导入中单个文件的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchImportItem {
    pub path: String,
    /// 成功时的文件级报告
    pub report: Option<FileImportReport>,
    /// 失败原因（文件不存在 / 数据库错误等）
    pub error: Option<String>,
}

/// 文件级尝试详情
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttemptDetail {
    pub file_attempt: FileImportAttempt,
    pub row_errors: Vec<RowErrorSummary>,
    pub row_attempts: Vec<ImportAttempt>,
}

/// 导入 API
pub struct ImportApi {
    db_path: String,
    schema: Arc<SchemaRegistry>,
    write_gate: Arc<Mutex<()>>,
}

impl ImportApi {
    /// 创建新的 ImportApi 实例
    pub fn new(db_path: String, schema: Arc<SchemaRegistry>) -> Self {
        Self {
            db_path,
            schema,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    fn open(db_path: &str) -> ApiResult<Arc<Mutex<Connection>>> {
        let conn = open_and_init(db_path)
            .map_err(|e| ApiError::DatabaseConnectionError(format!("{}: {}", db_path, e)))?;
        Ok(Arc::new(Mutex::new(conn)))
    }

    fn audit(&self) -> ApiResult<ImportAuditRepository> {
        Ok(ImportAuditRepository::from_connection(Self::open(&self.db_path)?))
    }

    fn import_with(
        db_path: &str,
        schema: Arc<SchemaRegistry>,
        write_gate: Arc<Mutex<()>>,
        path: &Path,
        options: &ImportOptions,
    ) -> ApiResult<FileImportReport> {
        // 建表与 PRAGMA 也会写库
        let (conn, config) = {
            let _permit = write_gate
                .lock()
                .map_err(|e| ApiError::InternalError(format!("写入闸门锁失败: {}", e)))?;
            let conn = Self::open(db_path)?;
            let config = ConfigManager::from_connection(conn.clone())?;
            (conn, config)
        };
        let importer = FileImporter::new(conn, schema, config).with_write_gate(write_gate);
        Ok(importer.import_file(path, options)?)
    }

    /// 导入单个文件
    ///
    /// # 返回
    /// - Ok(FileImportReport): 含被拒绝 / 空文件在内的文件级结果
    /// - Err(ApiError): 文件无法读取、Profile 未知、数据库错误
    pub fn import_file(&self, path: &Path, options: &ImportOptions) -> ApiResult<FileImportReport> {
        Self::import_with(&self.db_path, self.schema.clone(), self.write_gate.clone(), path, options)
    }

    /// 批量导入
    ///
    /// # 说明
    /// - 每个文件在独立的阻塞 worker 中完整处理
    /// - 单个文件失败不影响其他文件; 结果顺序与输入一致
    #[instrument(skip(self, paths, options), fields(files = paths.len()))]
    pub async fn batch_import(&self, paths: Vec<PathBuf>, options: ImportOptions) -> Vec<BatchImportItem> {
        let tasks = paths.into_iter().map(|path| {
            let db_path = self.db_path.clone();
            let schema = self.schema.clone();
            let write_gate = self.write_gate.clone();
            let options = options.clone();
            async move {
                let path_label = path.display().to_string();
                let joined = tokio::task::spawn_blocking(move || {
                    Self::import_with(&db_path, schema, write_gate, &path, &options)
                })
                .await;
                match joined {
                    Ok(Ok(report)) => BatchImportItem {
                        path: path_label,
                        report: Some(report),
                        error: None,
                    },
                    Ok(Err(err)) => {
                        warn!(file = %path_label, error = %err, "文件导入失败");
                        BatchImportItem {
                            path: path_label,
                            report: None,
                            error: Some(err.to_string()),
                        }
                    }
                    Err(join_err) => BatchImportItem {
                        path: path_label,
                        report: None,
                        error: Some(format!("导入 worker 异常退出: {}", join_err)),
                    },
                }
            }
        });

        let items = futures::future::join_all(tasks).await;
        info!(
            files = items.len(),
            failed = items.iter().filter(|i| i.error.is_some()).count(),
            "批量导入完成"
        );
        items
    }

    /// 最近的文件级尝试
    pub fn list_file_attempts(&self, limit: usize) -> ApiResult<Vec<FileImportAttempt>> {
        Ok(self.audit()?.list_file_attempts(limit)?)
    }

    /// 文件级尝试详情（行错误 + 行级尝试）
    pub fn file_attempt_detail(&self, file_attempt_id: &str) -> ApiResult<FileAttemptDetail> {
        let audit = self.audit()?;
        let file_attempt = audit
            .get_file_attempt(file_attempt_id)?
            .ok_or_else(|| ApiError::NotFound(format!("文件级尝试 {}", file_attempt_id)))?;
        Ok(FileAttemptDetail {
            file_attempt,
            row_errors: audit.get_row_errors(file_attempt_id)?,
            row_attempts: audit.list_attempts_for_file(file_attempt_id)?,
        })
    }

    /// 尚未确认的 dirty / rejected 行级尝试
    pub fn list_unacknowledged(&self) -> ApiResult<Vec<ImportAttempt>> {
        Ok(self.audit()?.list_unacknowledged()?)
    }

    /// 某条记录的导入历史
    pub fn attempts_for_record(&self, record_id: i64) -> ApiResult<Vec<ImportAttempt>> {
        Ok(self.audit()?.list_attempts_for_record(record_id)?)
    }

    /// 确认一条尝试; 先按文件级尝试查找,找不到再按行级尝试确认
    ///
    /// # 返回
    /// - Ok(n): 新确认的行级尝试数
    pub fn acknowledge(&self, attempt_id: &str) -> ApiResult<usize> {
        let audit = self.audit()?;
        if audit.get_file_attempt(attempt_id)?.is_some() {
            let rows = audit.acknowledge_file_attempt(attempt_id)?;
            info!(file_attempt_id = attempt_id, rows, "文件级尝试已确认");
            return Ok(rows);
        }
        let newly = audit.acknowledge_attempt(attempt_id)?;
        info!(attempt_id, newly, "行级尝试已确认");
        Ok(usize::from(newly))
    }
}
