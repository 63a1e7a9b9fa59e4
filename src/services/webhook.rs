//! Webhook delivery worker.
//!
//! At-least-once: a delivery stays `queued` with an increasing attempt
//! count until it lands in [200, 299] or exhausts its attempts. Payload
//! bytes are frozen at enqueue time, so retries are byte-identical. A
//! permanently failed delivery raises an operator alert; disabled or
//! credential-less targets fail immediately without one.

use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::auth::signature;
use crate::db::models::{alert_type, Alert, Env, WebhookDelivery};
use crate::db::queries;
use crate::AppState;

pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Deliveries claimed per batch.
pub const BATCH_SIZE: i64 = 20;
/// Backoff doubles per attempt; the exponent is capped to bound the gap.
const MAX_BACKOFF_EXPONENT: u32 = 10;
/// Stored response bodies are clipped to this many bytes.
const SNIPPET_BYTES: usize = 500;

const REASON_DISABLED: &str = "WebhookDisabled";
const REASON_NO_CREDENTIALS: &str = "MissingCredentials";

/// Outbound HTTP with the configured hard timeout.
#[derive(Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// POST the frozen payload. Returns `(status, body)`; transport errors
    /// and timeouts come back as the error string.
    pub async fn send(
        &self,
        url: &str,
        event_type: &str,
        payload: &str,
        timestamp: i64,
        signature_hex: &str,
    ) -> Result<(u16, String), String> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(EVENT_TYPE_HEADER, event_type)
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .header(SIGNATURE_HEADER, signature_hex)
            .body(payload.to_string())
            .send()
            .await
            .map_err(|err| err.to_string())?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }
}

/// Claim one due batch and work it sequentially. Returns how many
/// deliveries were attempted.
pub async fn run_batch(state: &AppState, now: i64) -> anyhow::Result<usize> {
    let due = queries::list_due_deliveries(&state.db, now, BATCH_SIZE).await?;
    if due.is_empty() {
        return Ok(0);
    }
    debug!("processing {} due webhook delivery(ies)", due.len());

    let count = due.len();
    for delivery in due {
        let id = delivery.id.clone();
        if let Err(err) = process_delivery(state, delivery, now).await {
            error!(delivery_id = %id, "delivery processing error: {}", err);
        }
    }
    Ok(count)
}

async fn process_delivery(
    state: &AppState,
    delivery: WebhookDelivery,
    now: i64,
) -> anyhow::Result<()> {
    let env = Env::parse(&delivery.env);
    let merchant = queries::get_merchant(&state.db, &delivery.merchant_id).await?;

    // Current config decides the target; a merchant who disabled webhooks
    // after enqueue gets a terminal failure, not retries.
    let url = match (env, merchant.as_ref()) {
        (Some(env), Some(merchant)) => merchant.webhook_target(env).map(str::to_string),
        _ => None,
    };
    let Some(url) = url else {
        queries::mark_delivery_failed(
            &state.db,
            &delivery.id,
            delivery.attempt_count,
            None,
            REASON_DISABLED,
            now,
        )
        .await?;
        debug!(delivery_id = %delivery.id, "webhook disabled, delivery dropped");
        return Ok(());
    };

    let secret = match env {
        Some(env) => queries::get_credentials(&state.db, &delivery.merchant_id)
            .await?
            .and_then(|c| c.webhook_secret(env).map(str::to_string)),
        None => None,
    };
    let Some(secret) = secret else {
        queries::mark_delivery_failed(
            &state.db,
            &delivery.id,
            delivery.attempt_count,
            None,
            REASON_NO_CREDENTIALS,
            now,
        )
        .await?;
        warn!(delivery_id = %delivery.id, "no webhook secret, delivery dropped");
        return Ok(());
    };

    let signature_hex = signature::sign(&secret, &signature::canonical_webhook(now, &delivery.payload));
    let attempt = delivery.attempt_count + 1;

    let outcome = state
        .webhook_sender
        .send(&url, &delivery.event_type, &delivery.payload, now, &signature_hex)
        .await;

    match outcome {
        Ok((status, body)) if (200..300).contains(&status) => {
            queries::mark_delivery_delivered(
                &state.db,
                &delivery.id,
                attempt,
                status as i64,
                &snippet(&body),
                now,
            )
            .await?;
            info!(delivery_id = %delivery.id, attempt, status, "webhook delivered");
        }
        Ok((status, _)) => {
            record_failure(state, &delivery, attempt, Some(status as i64),
                &format!("HTTP {}", status), now)
                .await?;
        }
        Err(transport) => {
            record_failure(state, &delivery, attempt, None, &transport, now).await?;
        }
    }

    Ok(())
}

async fn record_failure(
    state: &AppState,
    delivery: &WebhookDelivery,
    attempt: i64,
    last_status: Option<i64>,
    reason: &str,
    now: i64,
) -> anyhow::Result<()> {
    if attempt >= state.config.webhook_max_attempts {
        queries::mark_delivery_failed(&state.db, &delivery.id, attempt, last_status, reason, now)
            .await?;
        let alert = Alert::new(
            Some(&delivery.merchant_id),
            alert_type::WEBHOOK_FAILED,
            &format!(
                "delivery of {} event exhausted {} attempts, last failure: {}",
                delivery.event_type, attempt, reason
            ),
            now,
        );
        queries::insert_alert(&state.db, &alert).await?;
        warn!(
            delivery_id = %delivery.id,
            attempt,
            "webhook permanently failed: {}", reason
        );
    } else {
        let next_retry_at = now + backoff_secs(state.config.webhook_backoff_base_secs, attempt);
        queries::mark_delivery_retry(
            &state.db,
            &delivery.id,
            attempt,
            next_retry_at,
            last_status,
            reason,
            now,
        )
        .await?;
        debug!(
            delivery_id = %delivery.id,
            attempt,
            next_retry_at,
            "webhook attempt failed, retry scheduled: {}", reason
        );
    }
    Ok(())
}

/// `base * 2^(attempt - 1)`, exponent capped.
fn backoff_secs(base: i64, attempt: i64) -> i64 {
    let exponent = (attempt.max(1) - 1).min(MAX_BACKOFF_EXPONENT as i64) as u32;
    base.saturating_mul(1_i64 << exponent)
}

fn snippet(body: &str) -> String {
    if body.len() <= SNIPPET_BYTES {
        return body.to_string();
    }
    let mut end = SNIPPET_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        assert_eq!(backoff_secs(60, 1), 60);
        assert_eq!(backoff_secs(60, 2), 120);
        assert_eq!(backoff_secs(60, 3), 240);
        assert_eq!(backoff_secs(60, 4), 480);
        assert_eq!(backoff_secs(60, 5), 960);
    }

    #[test]
    fn backoff_exponent_is_capped() {
        assert_eq!(backoff_secs(60, 11), 60 * 1024);
        assert_eq!(backoff_secs(60, 50), 60 * 1024);
    }

    #[test]
    fn snippet_clips_at_a_char_boundary() {
        let body = "x".repeat(499) + "é";
        let clipped = snippet(&body);
        assert!(clipped.len() <= SNIPPET_BYTES);
        assert_eq!(clipped, "x".repeat(499));

        let short = "ok";
        assert_eq!(snippet(short), "ok");
    }
}
