//! Invoice lifecycle: suffix allocation, creation, upstream polling,
//! expiry and refunds.
//!
//! Every transition is atomic with its event append and webhook enqueue.
//! Suffix ties between concurrent creators are broken by the unique index
//! on `(principal, unique_suffix)`; a losing insert re-allocates.

use serde_json::json;

use crate::db::models::{
    event_type, Env, Invoice, InvoiceEvent, InvoiceStatus, Merchant, PendingTransaction, Refund,
    WebhookDelivery,
};
use crate::db::queries;
use crate::error::ApiError;
use crate::qris;
use crate::AppState;

/// Holes below this bound are filled before the overflow range is touched.
const SUFFIX_LOW_MAX: i64 = 500;
const SUFFIX_MAX: i64 = 999;
/// Re-allocation attempts after losing a suffix race.
const MAX_ALLOCATION_RETRIES: usize = 3;

pub struct NewInvoice<'a> {
    pub principal: &'a str,
    pub base_amount: i64,
    pub qris_static: &'a str,
    pub reference_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Paid { paid_at: i64 },
    Expired,
    Pending { expires_in: i64 },
}

/// Create an invoice: release this principal's expired claims, allocate the
/// smallest free suffix, derive the dynamic payload, and persist invoice +
/// claim + event (+ webhook when enabled) in one transaction.
pub async fn create(
    state: &AppState,
    merchant: &Merchant,
    env: Env,
    input: NewInvoice<'_>,
    now: i64,
) -> Result<Invoice, ApiError> {
    if input.base_amount <= 0 {
        return Err(ApiError::InvalidAmount);
    }
    qris::validate(input.qris_static)?;

    release_expired_claims(state, input.principal, now).await?;

    for _ in 0..MAX_ALLOCATION_RETRIES {
        let claimed = queries::list_claimed_suffixes(&state.db, input.principal).await?;
        let suffix = allocate_suffix(&claimed).ok_or(ApiError::NoSuffixAvailable)?;
        let final_amount = input.base_amount + suffix;
        let qris_string = qris::inject_amount(input.qris_static, final_amount)?;

        let invoice = Invoice {
            id: uuid::Uuid::new_v4().to_string(),
            merchant_id: merchant.id.clone(),
            env: env.as_str().to_string(),
            principal: input.principal.to_string(),
            reference_id: input.reference_id.clone(),
            base_amount: input.base_amount,
            unique_suffix: suffix,
            final_amount,
            status: InvoiceStatus::Pending.as_str().to_string(),
            qris_string,
            metadata: input.metadata.as_ref().map(|m| m.to_string()),
            created_at: now,
            expires_at: now + state.config.invoice_ttl_secs,
            paid_at: None,
        };
        let pending = PendingTransaction {
            invoice_id: invoice.id.clone(),
            merchant_id: merchant.id.clone(),
            principal: input.principal.to_string(),
            unique_suffix: suffix,
            final_amount,
            created_at: now,
            expires_at: invoice.expires_at,
        };

        let payload = payment_payload(&invoice, event_type::PAYMENT_CREATED);
        let event = InvoiceEvent::new(&invoice.id, event_type::PAYMENT_CREATED, payload.clone(), now);
        let delivery = merchant.webhook_enabled(env).then(|| {
            WebhookDelivery::new(
                &merchant.id,
                env,
                Some(&invoice.id),
                event_type::PAYMENT_CREATED,
                &payload,
                now,
            )
        });

        match queries::create_invoice(&state.db, &invoice, &pending, &event, delivery.as_ref())
            .await
        {
            Ok(()) => {
                tracing::info!(
                    invoice_id = %invoice.id,
                    principal = %invoice.principal,
                    suffix,
                    "invoice created"
                );
                return Ok(invoice);
            }
            Err(err) if queries::is_unique_violation(&err) => {
                tracing::debug!(principal = %input.principal, suffix, "suffix race lost, retrying");
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ApiError::Conflict)
}

/// Poll an invoice: consult the paid cache, then the pending claim's TTL,
/// then the upstream mutation feed for a credit matching the final amount.
pub async fn check(
    state: &AppState,
    merchant: &Merchant,
    env: Env,
    invoice_id: &str,
    username: &str,
    token: &str,
    now: i64,
) -> Result<CheckOutcome, ApiError> {
    let invoice = queries::get_invoice_for_merchant(&state.db, invoice_id, &merchant.id, env)
        .await?
        .ok_or(ApiError::NotFound)?;

    // A recent success short-circuits repeated checks without re-polling.
    if let Some(cache) = queries::get_paid_cache(&state.db, &invoice.id, now).await? {
        if invoice.status == InvoiceStatus::Pending.as_str() {
            mark_paid(state, merchant, env, &invoice, cache.paid_at, now).await?;
        }
        return Ok(CheckOutcome::Paid { paid_at: cache.paid_at });
    }

    let Some(pending) = queries::get_pending(&state.db, &invoice.id).await? else {
        if invoice.status == InvoiceStatus::Expired.as_str() {
            return Ok(CheckOutcome::Expired);
        }
        return Err(ApiError::NotFound);
    };

    if now > pending.expires_at {
        expire_invoice(state, &invoice, now).await?;
        return Ok(CheckOutcome::Expired);
    }

    let credits = state
        .upstream
        .fetch_credits(username, token)
        .await
        .map_err(|err| {
            tracing::warn!(invoice_id = %invoice.id, "upstream fetch failed: {}", err);
            ApiError::UpstreamUnavailable
        })?;

    let matched = credits
        .iter()
        .any(|credit| credit.is_credit_in() && credit.amount == invoice.final_amount);

    if matched {
        mark_paid(state, merchant, env, &invoice, now, now).await?;
        return Ok(CheckOutcome::Paid { paid_at: now });
    }

    Ok(CheckOutcome::Pending {
        expires_in: pending.expires_at - now,
    })
}

async fn mark_paid(
    state: &AppState,
    merchant: &Merchant,
    env: Env,
    invoice: &Invoice,
    paid_at: i64,
    now: i64,
) -> Result<(), ApiError> {
    let mut paid = invoice.clone();
    paid.status = InvoiceStatus::Paid.as_str().to_string();
    paid.paid_at = Some(paid_at);

    let payload = payment_payload(&paid, event_type::PAYMENT_PAID);
    let event = InvoiceEvent::new(&invoice.id, event_type::PAYMENT_PAID, payload.clone(), now);
    let delivery = merchant.webhook_enabled(env).then(|| {
        WebhookDelivery::new(
            &merchant.id,
            env,
            Some(&invoice.id),
            event_type::PAYMENT_PAID,
            &payload,
            now,
        )
    });

    let transitioned = queries::transition_to_paid(
        &state.db,
        &invoice.id,
        paid_at,
        now + state.config.paid_cache_ttl_secs,
        &event,
        delivery.as_ref(),
    )
    .await?;

    if transitioned {
        tracing::info!(invoice_id = %invoice.id, paid_at, "invoice paid");
        return Ok(());
    }

    // Another checker won; accept their result as long as it agrees.
    let current = queries::get_invoice(&state.db, &invoice.id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if current.status == InvoiceStatus::Paid.as_str() {
        Ok(())
    } else {
        Err(ApiError::Conflict)
    }
}

/// `pending → expired` for one invoice, with event and webhook. Returns
/// false when another writer finished the invoice first.
pub async fn expire_invoice(
    state: &AppState,
    invoice: &Invoice,
    now: i64,
) -> Result<bool, ApiError> {
    let env = Env::parse(&invoice.env).ok_or(ApiError::Internal)?;
    let merchant = queries::get_merchant(&state.db, &invoice.merchant_id)
        .await?
        .ok_or(ApiError::Internal)?;

    let mut expired = invoice.clone();
    expired.status = InvoiceStatus::Expired.as_str().to_string();

    let payload = payment_payload(&expired, event_type::PAYMENT_EXPIRED);
    let event = InvoiceEvent::new(&invoice.id, event_type::PAYMENT_EXPIRED, payload.clone(), now);
    let delivery = merchant.webhook_enabled(env).then(|| {
        WebhookDelivery::new(
            &merchant.id,
            env,
            Some(&invoice.id),
            event_type::PAYMENT_EXPIRED,
            &payload,
            now,
        )
    });

    let transitioned =
        queries::transition_to_expired(&state.db, &invoice.id, &event, delivery.as_ref()).await?;
    if transitioned {
        tracing::info!(invoice_id = %invoice.id, "invoice expired");
    }
    Ok(transitioned)
}

/// Expire every overdue pending invoice, up to `limit`. Called from the
/// scheduler tick.
pub async fn expire_due(state: &AppState, now: i64, limit: i64) -> Result<usize, ApiError> {
    let due = queries::list_expired_pending_invoices(&state.db, now, limit).await?;
    let mut expired = 0;
    for invoice in &due {
        if expire_invoice(state, invoice, now).await? {
            expired += 1;
        }
    }
    Ok(expired)
}

/// Release expired claims for one principal before allocating, so freed
/// suffixes are immediately reusable.
async fn release_expired_claims(
    state: &AppState,
    principal: &str,
    now: i64,
) -> Result<(), ApiError> {
    for invoice_id in
        queries::list_expired_pending_for_principal(&state.db, principal, now).await?
    {
        if let Some(invoice) = queries::get_invoice(&state.db, &invoice_id).await? {
            expire_invoice(state, &invoice, now).await?;
        } else {
            queries::gc_expired(&state.db, now).await?;
        }
    }
    Ok(())
}

/// Record a refund request against a paid invoice.
pub async fn request_refund(
    state: &AppState,
    merchant: &Merchant,
    env: Env,
    invoice_id: &str,
    amount: Option<i64>,
    reason: Option<String>,
    now: i64,
) -> Result<Refund, ApiError> {
    let invoice = queries::get_invoice_for_merchant(&state.db, invoice_id, &merchant.id, env)
        .await?
        .ok_or(ApiError::NotFound)?;
    if invoice.status != InvoiceStatus::Paid.as_str() {
        return Err(ApiError::Conflict);
    }

    let amount = amount.unwrap_or(invoice.final_amount);
    if amount <= 0 || amount > invoice.final_amount {
        return Err(ApiError::InvalidAmount);
    }

    let refund = Refund::new(&invoice.id, amount, reason, now);
    let payload = refund_payload(&invoice, &refund, event_type::REFUND_REQUESTED);
    let event = InvoiceEvent::new(&invoice.id, event_type::REFUND_REQUESTED, payload, now);
    queries::create_refund(&state.db, &refund, &event).await?;

    tracing::info!(invoice_id = %invoice.id, refund_id = %refund.id, amount, "refund requested");
    Ok(refund)
}

/// `paid → refunded` once an operator processes the refund.
pub async fn process_refund(state: &AppState, refund_id: &str, now: i64) -> Result<(), ApiError> {
    let refund = queries::get_refund(&state.db, refund_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let invoice = queries::get_invoice(&state.db, &refund.invoice_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let env = Env::parse(&invoice.env).ok_or(ApiError::Internal)?;
    let merchant = queries::get_merchant(&state.db, &invoice.merchant_id)
        .await?
        .ok_or(ApiError::Internal)?;

    let mut refunded = refund.clone();
    refunded.status = "processed".to_string();
    refunded.processed_at = Some(now);

    let payload = refund_payload(&invoice, &refunded, event_type::REFUND_PROCESSED);
    let event = InvoiceEvent::new(&invoice.id, event_type::REFUND_PROCESSED, payload.clone(), now);
    let delivery = merchant.webhook_enabled(env).then(|| {
        WebhookDelivery::new(
            &merchant.id,
            env,
            Some(&invoice.id),
            event_type::REFUND_PROCESSED,
            &payload,
            now,
        )
    });

    let transitioned = queries::transition_to_refunded(
        &state.db,
        &invoice.id,
        &refund.id,
        now,
        &event,
        delivery.as_ref(),
    )
    .await?;
    if !transitioned {
        return Err(ApiError::Conflict);
    }

    tracing::info!(invoice_id = %invoice.id, refund_id = %refund.id, "refund processed");
    Ok(())
}

/// Smallest unclaimed suffix: holes in [1, 500] first, then [501, 999].
fn allocate_suffix(claimed: &[i64]) -> Option<i64> {
    let taken: std::collections::HashSet<i64> = claimed.iter().copied().collect();
    (1..=SUFFIX_LOW_MAX)
        .find(|s| !taken.contains(s))
        .or_else(|| ((SUFFIX_LOW_MAX + 1)..=SUFFIX_MAX).find(|s| !taken.contains(s)))
}

/// The closed payload shape shared by the event log and outbound webhooks.
fn payment_payload(invoice: &Invoice, event: &str) -> serde_json::Value {
    json!({
        "event_type": event,
        "invoice_id": invoice.id,
        "reference_id": invoice.reference_id,
        "principal": invoice.principal,
        "env": invoice.env,
        "base_amount": invoice.base_amount,
        "unique_suffix": invoice.unique_suffix,
        "final_amount": invoice.final_amount,
        "status": invoice.status,
        "created_at": invoice.created_at,
        "expires_at": invoice.expires_at,
        "paid_at": invoice.paid_at,
        "metadata": invoice
            .metadata
            .as_deref()
            .and_then(|m| serde_json::from_str::<serde_json::Value>(m).ok()),
    })
}

fn refund_payload(invoice: &Invoice, refund: &Refund, event: &str) -> serde_json::Value {
    json!({
        "event_type": event,
        "invoice_id": invoice.id,
        "reference_id": invoice.reference_id,
        "refund_id": refund.id,
        "amount": refund.amount,
        "reason": refund.reason,
        "status": refund.status,
        "processed_at": refund.processed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_allocation_is_one() {
        assert_eq!(allocate_suffix(&[]), Some(1));
    }

    #[test]
    fn holes_below_500_fill_first() {
        let claimed: Vec<i64> = (1..=10).filter(|s| *s != 4).collect();
        assert_eq!(allocate_suffix(&claimed), Some(4));
    }

    #[test]
    fn overflow_range_opens_after_low_range_exhausts() {
        let claimed: Vec<i64> = (1..=SUFFIX_LOW_MAX).collect();
        assert_eq!(allocate_suffix(&claimed), Some(501));
    }

    #[test]
    fn full_range_is_exhaustible() {
        let claimed: Vec<i64> = (1..=SUFFIX_MAX).collect();
        assert_eq!(allocate_suffix(&claimed), None);
    }
}
