use chain::MsgSealObject;
use network::{Task, TaskKind};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::context::ExecutorContext;
use crate::error::{ExecutorError, Result};

pub(crate) async fn handle_seal_object_task(ctx: &ExecutorContext, task: &mut Task) -> Result<()> {
    let TaskKind::Seal(seal) = &task.kind else {
        return Err(ExecutorError::DanglingPointer(format!("task {} is not a seal task", task.key)));
    };
    if seal.secondary_signatures.is_empty() {
        return Err(ExecutorError::DanglingPointer(format!(
            "seal task {} carries no secondary signatures",
            task.key
        )));
    }

    let aggregate = ctx.deps.signer.aggregate_bls_signatures(&seal.secondary_signatures)?;
    let msg = MsgSealObject {
        operator: ctx.config.operator_address.clone(),
        bucket_name: seal.object_info.bucket_name.clone(),
        object_name: seal.object_info.object_name.clone(),
        global_virtual_group_id: seal.global_virtual_group_id,
        secondary_sp_bls_agg_signatures: aggregate,
    };
    let object_id = seal.object_info.id;
    seal_object(ctx, &msg, object_id, task.max_retry, task.timeout).await
}

/// Submits the seal transaction, then waits for the chain to show the object sealed.
///
/// Submission stops at the first accepted transaction. Listening happens even
/// when every submission failed, since another SP may have sealed the object.
pub(crate) async fn seal_object(
    ctx: &ExecutorContext,
    msg: &MsgSealObject,
    object_id: u64,
    max_retry: u32,
    retry_interval_secs: i64,
) -> Result<()> {
    let start = Instant::now();
    let mut submitted = false;
    for attempt in 0..=max_retry {
        match ctx.deps.chain.seal_object(msg).await {
            Ok(tx_hash) => {
                ctx.metrics.seal_counter.with_label_values(&["submit", "success"]).inc();
                info!("Submitted seal for object {} in tx {}", object_id, tx_hash);
                submitted = true;
                break;
            }
            Err(e) => {
                ctx.metrics.seal_counter.with_label_values(&["submit", "failure"]).inc();
                warn!(
                    "Failed to submit seal for object {} (attempt {}/{}): {}",
                    object_id,
                    attempt + 1,
                    max_retry + 1,
                    e
                );
                if attempt < max_retry && retry_interval_secs > 0 {
                    tokio::time::sleep(Duration::from_secs(retry_interval_secs as u64)).await;
                }
            }
        }
    }
    if !submitted {
        error!("Every seal submission for object {} failed, listening anyway", object_id);
    }

    let result = listen_seal(ctx, object_id).await;
    ctx.metrics.seal_time.observe(start.elapsed().as_secs_f64());
    result
}

pub(crate) async fn listen_seal(ctx: &ExecutorContext, object_id: u64) -> Result<()> {
    let retries = ctx.config.max_listen_seal_retry;
    for attempt in 0..retries {
        match ctx
            .deps
            .chain
            .listen_object_seal(object_id, ctx.config.listen_seal_timeout_height)
            .await
        {
            Ok(true) => {
                ctx.metrics.seal_counter.with_label_values(&["listen", "sealed"]).inc();
                info!("Object {} is sealed", object_id);
                return Ok(());
            }
            Ok(false) => {
                ctx.metrics.seal_counter.with_label_values(&["listen", "unsealed"]).inc();
                debug!("Object {} not sealed yet (listen {}/{})", object_id, attempt + 1, retries);
            }
            Err(e) => {
                ctx.metrics.seal_counter.with_label_values(&["listen", "failure"]).inc();
                warn!("Failed to listen seal of object {} (listen {}/{}): {}", object_id, attempt + 1, retries, e);
            }
        }
        if attempt + 1 < retries {
            tokio::time::sleep(ctx.config.listen_seal_retry_timeout()).await;
        }
    }
    Err(ExecutorError::Unsealed(object_id))
}
