// ==========================================
// NRQZ 记录管理系统 - 模型级导入尝试
// ==========================================
// 流程: 渲染 → 致命错误则拒绝 → validate_and_save（SAVEPOINT 内）→ 派生状态
// 红线: 状态只由结果派生（rejected / created_dirty / created_clean）
// ==========================================

use crate::db::with_savepoint;
use crate::domain::import::{FieldError, FieldErrorKind, ImportAttempt, RowErrorSummary, RowSnapshot};
use crate::domain::record::StoredRecord;
use crate::domain::types::ImportStatus;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::form_map::{FormMap, RenderedRow};
use crate::repository::error::RepositoryError;
use crate::repository::import_audit_repo::ImportAuditRepository;
use crate::repository::record_store::RecordStore;
use crate::repository::snapshot_repo::SnapshotRepository;
use chrono::Utc;
use rusqlite::Connection;
use tracing::debug;

// ==========================================
// ModelAttempt - 单个 FormMap 在单行上的尝试结果
// ==========================================
#[derive(Debug, Clone)]
pub struct ModelAttempt {
    pub attempt: ImportAttempt,
    /// 已创建/更新的记录（被拒绝时为 None）
    pub record: Option<StoredRecord>,
}

/// 由结果派生状态
///
/// # 规则
/// - 未创建记录 → rejected
/// - 创建且存在字段错误 → created_dirty
/// - 创建且零错误 → created_clean
pub fn derive_status(created: bool, errors: &[FieldError]) -> ImportStatus {
    match (created, errors.is_empty()) {
        (false, _) => ImportStatus::Rejected,
        (true, false) => ImportStatus::CreatedDirty,
        (true, true) => ImportStatus::CreatedClean,
    }
}

/// 约束类仓储错误的消息; 其他错误（连接/锁/查询）返回 None,由调用方向上传播
pub(crate) fn constraint_message(err: &RepositoryError) -> Option<String> {
    match err {
        RepositoryError::UniqueConstraintViolation(m)
        | RepositoryError::ForeignKeyViolation(m)
        | RepositoryError::ValidationError(m) => Some(m.clone()),
        RepositoryError::CardinalityViolation { relation, message } => Some(format!("{}: {}", relation, message)),
        _ => None,
    }
}

/// 约束类仓储错误视为校验拒绝
fn rejection_from(err: &RepositoryError) -> Option<FieldError> {
    constraint_message(err).map(|message| FieldError::new("__record__", FieldErrorKind::Validation, message).fatal())
}

/// 对已渲染的行执行模型级尝试（不写审计记录）
///
/// # 参数
/// - `conn`: 调用方事务内的连接
/// - `rendered`: FormMap 渲染结果
///
/// # 说明
/// - 致命字段错误 → 不调用持久化
/// - 保存与快照关联在同一 SAVEPOINT 内,失败时一并回滚
pub fn attempt_rendered(
    conn: &Connection,
    store: &dyn RecordStore,
    snapshot: &RowSnapshot,
    form_map: &FormMap,
    rendered: RenderedRow,
) -> ImportResult<ModelAttempt> {
    let mut errors = rendered.errors;
    let mut record = None;

    if !errors.iter().any(|e| e.fatal) {
        let saved = with_savepoint(conn, "model_attempt", |c| -> Result<_, RepositoryError> {
            let outcome = store.validate_and_save(c, &rendered.draft)?;
            if let Some(stored) = &outcome.record {
                SnapshotRepository::link_record_tx(c, stored.record_id, &snapshot.snapshot_id)?;
            }
            Ok(outcome)
        });

        match saved {
            Ok(outcome) => {
                errors.extend(outcome.errors);
                record = outcome.record;
            }
            Err(err) => match rejection_from(&err) {
                Some(field_error) => errors.push(field_error),
                None => return Err(ImportError::Repository(err)),
            },
        }
    }

    let status = derive_status(record.is_some(), &errors);
    debug!(
        form_map = form_map.name(),
        row_number = snapshot.row_number,
        status = %status,
        errors = errors.len(),
        "模型级尝试完成"
    );

    Ok(ModelAttempt {
        attempt: ImportAttempt {
            attempt_id: uuid::Uuid::new_v4().to_string(),
            file_attempt_id: snapshot.file_attempt_id.clone(),
            snapshot_id: snapshot.snapshot_id.clone(),
            row_number: snapshot.row_number,
            form_map: form_map.name().to_string(),
            record_type: form_map.record_type(),
            status,
            errors,
            created_record_id: record.as_ref().map(|r| r.record_id),
            acknowledged: false,
            created_at: Utc::now(),
        },
        record,
    })
}

/// 渲染并尝试（不写审计记录）
pub fn attempt_model(
    conn: &Connection,
    store: &dyn RecordStore,
    snapshot: &RowSnapshot,
    form_map: &FormMap,
) -> ImportResult<ModelAttempt> {
    let rendered = form_map.render(&snapshot.data);
    attempt_rendered(conn, store, snapshot, form_map, rendered)
}

/// 单个快照 + 单个 FormMap 的完整导入尝试
///
/// # 参数
/// - `durable`: false 时被拒绝的尝试以 `ImportError::RowRejected` 返回,
///   调用方回滚所在事务（审计记录随之回滚）
///
/// # 说明
/// - 快照不存在时先写入快照
/// - 审计记录在返回前写入调用方事务
pub fn attempt_import(
    conn: &Connection,
    store: &dyn RecordStore,
    snapshot: &RowSnapshot,
    form_map: &FormMap,
    durable: bool,
) -> ImportResult<ImportAttempt> {
    if SnapshotRepository::get_snapshot_tx(conn, &snapshot.snapshot_id)?.is_none() {
        SnapshotRepository::insert_snapshot_tx(conn, snapshot)?;
    }

    let outcome = attempt_model(conn, store, snapshot, form_map)?;
    ImportAuditRepository::insert_attempt_tx(conn, &outcome.attempt)?;

    if !durable && outcome.attempt.status == ImportStatus::Rejected {
        return Err(ImportError::RowRejected {
            row: snapshot.row_number,
            reason: rejection_reason(&outcome.attempt),
        });
    }
    Ok(outcome.attempt)
}

/// 拒绝原因（逐字段拼接）
pub fn rejection_reason(attempt: &ImportAttempt) -> String {
    attempt
        .errors_by_field()
        .iter()
        .map(|(field, messages)| format!("{}: {}", field, messages.join("; ")))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// 有错误的尝试 → 行错误汇总
pub fn summarize(attempt: &ImportAttempt) -> Option<RowErrorSummary> {
    if attempt.errors.is_empty() {
        return None;
    }
    Some(RowErrorSummary {
        row_number: attempt.row_number,
        form_map: attempt.form_map.clone(),
        status: attempt.status,
        errors: attempt.errors_by_field(),
    })
}
