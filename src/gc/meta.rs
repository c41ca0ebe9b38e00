use chrono::{Duration, Utc};
use network::{Task, TaskKind};
use tracing::info;

use crate::context::ExecutorContext;
use crate::error::{ExecutorError, Result};

/// Trims bucket traffic and read records past their retention window.
pub(crate) async fn handle_gc_meta_task(ctx: &ExecutorContext, task: &mut Task) -> Result<()> {
    if !matches!(task.kind, TaskKind::GcMeta(_)) {
        return Err(ExecutorError::DanglingPointer(format!("task {} is not a meta gc task", task.key)));
    }

    let now = Utc::now();
    let traffic_cutoff = now - Duration::days(ctx.config.bucket_traffic_keep_latest_day as i64);
    let year_month = traffic_cutoff.format("%Y-%m").to_string();
    let read_record_cutoff_us =
        (now - Duration::days(ctx.config.read_record_keep_latest_day as i64)).timestamp_micros();

    let sp_db = &ctx.deps.sp_db;
    let (traffic, records) = tokio::join!(
        sp_db.delete_expired_bucket_traffic(&year_month),
        sp_db.delete_expired_read_record(read_record_cutoff_us, ctx.config.read_record_delete_limit),
    );
    let deleted_traffic = traffic?;
    let deleted_records = records?;

    if let TaskKind::GcMeta(gc) = &mut task.kind {
        gc.deleted_bucket_traffic += deleted_traffic;
        gc.deleted_read_records += deleted_records;
    }
    info!(
        "Meta gc removed {} bucket traffic rows before {} and {} read records",
        deleted_traffic, year_month, deleted_records
    );
    Ok(())
}
