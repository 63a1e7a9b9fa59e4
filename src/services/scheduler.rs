//! Lifecycle scheduler.
//!
//! One periodic loop drives the three maintenance duties: expiring overdue
//! invoices, garbage-collecting short-lived rows (nonces, paid cache,
//! stray claims), and pumping one webhook batch. The tick body runs to
//! completion before the next tick is considered, and missed ticks are
//! skipped rather than queued, so ticks never overlap.

use chrono::Utc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::db::queries;
use crate::services::{invoice, webhook};
use crate::AppState;

/// Invoices expired per tick.
const EXPIRE_SCAN_LIMIT: i64 = 200;

pub async fn run(state: AppState) {
    let mut ticker = tokio::time::interval(Duration::from_millis(state.config.scheduler_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        interval_ms = state.config.scheduler_interval_ms,
        "lifecycle scheduler started"
    );

    loop {
        ticker.tick().await;
        if let Err(err) = tick(&state, Utc::now().timestamp()).await {
            error!("scheduler tick failed: {}", err);
        }
    }
}

/// One tick: expiry scan, cache GC, one delivery batch. Exposed with an
/// explicit clock so tests drive time directly.
pub async fn tick(state: &AppState, now: i64) -> anyhow::Result<()> {
    let expired = invoice::expire_due(state, now, EXPIRE_SCAN_LIMIT)
        .await
        .map_err(|err| anyhow::anyhow!("expiry scan: {}", err))?;
    if expired > 0 {
        debug!(expired, "expired overdue invoices");
    }

    queries::gc_expired(&state.db, now).await?;

    webhook::run_batch(state, now).await?;
    Ok(())
}
