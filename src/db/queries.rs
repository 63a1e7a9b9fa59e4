//! Store operations.
//!
//! Multi-row writes that must be atomic (invoice creation, lifecycle
//! transitions) run inside a single transaction here; callers never hold a
//! transaction handle across module boundaries. Status transitions are
//! guarded (`WHERE status = <expected>`): zero rows affected means another
//! writer won the race and the whole transaction rolls back.

use sqlx::{Result, Sqlite, SqlitePool, Transaction};

use crate::db::models::{
    Alert, Env, Invoice, InvoiceEvent, MerchantStatus, Merchant, MerchantCredentials,
    PaidTransaction, PendingTransaction, Refund, WebhookDelivery,
};

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Merchants

pub async fn insert_merchant(pool: &SqlitePool, m: &Merchant) -> Result<()> {
    sqlx::query(
        "INSERT INTO merchants (id, email, phone, status,
            production_webhook_url, production_webhook_enabled,
            sandbox_webhook_url, sandbox_webhook_enabled,
            ip_whitelist_enabled, ip_whitelist, fee_bps, fee_fixed, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )
    .bind(&m.id)
    .bind(&m.email)
    .bind(&m.phone)
    .bind(&m.status)
    .bind(&m.production_webhook_url)
    .bind(m.production_webhook_enabled)
    .bind(&m.sandbox_webhook_url)
    .bind(m.sandbox_webhook_enabled)
    .bind(m.ip_whitelist_enabled)
    .bind(&m.ip_whitelist)
    .bind(m.fee_bps)
    .bind(m.fee_fixed)
    .bind(m.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_merchant(pool: &SqlitePool, id: &str) -> Result<Option<Merchant>> {
    sqlx::query_as::<_, Merchant>("SELECT * FROM merchants WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_merchant_by_email(pool: &SqlitePool, email: &str) -> Result<Option<Merchant>> {
    sqlx::query_as::<_, Merchant>("SELECT * FROM merchants WHERE email = ?1")
        .bind(email.trim().to_lowercase())
        .fetch_optional(pool)
        .await
}

pub async fn set_merchant_status(
    pool: &SqlitePool,
    id: &str,
    status: MerchantStatus,
) -> Result<bool> {
    let result = sqlx::query("UPDATE merchants SET status = ?1 WHERE id = ?2")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_webhook_config(
    pool: &SqlitePool,
    id: &str,
    env: Env,
    url: Option<&str>,
    enabled: bool,
) -> Result<bool> {
    let sql = match env {
        Env::Production => {
            "UPDATE merchants SET production_webhook_url = ?1, production_webhook_enabled = ?2
             WHERE id = ?3"
        }
        Env::Sandbox => {
            "UPDATE merchants SET sandbox_webhook_url = ?1, sandbox_webhook_enabled = ?2
             WHERE id = ?3"
        }
    };
    let result = sqlx::query(sql)
        .bind(url)
        .bind(enabled)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_ip_whitelist(
    pool: &SqlitePool,
    id: &str,
    enabled: bool,
    entries_json: Option<&str>,
) -> Result<bool> {
    let result =
        sqlx::query("UPDATE merchants SET ip_whitelist_enabled = ?1, ip_whitelist = ?2 WHERE id = ?3")
            .bind(enabled)
            .bind(entries_json)
            .bind(id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Credentials

/// Write one env's key material, leaving the other env untouched. `rotated`
/// distinguishes first mint (sets created_at) from rotation (sets
/// rotated_at, keeps created_at).
pub async fn store_credentials(
    pool: &SqlitePool,
    merchant_id: &str,
    env: Env,
    api_key_hash: &str,
    api_key_prefix: &str,
    api_secret: &str,
    webhook_secret: &str,
    rotated: bool,
    now: i64,
) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO merchant_credentials (merchant_id) VALUES (?1)")
        .bind(merchant_id)
        .execute(pool)
        .await?;

    let sql = match (env, rotated) {
        (Env::Production, false) => {
            "UPDATE merchant_credentials SET
                production_api_key_hash = ?1, production_api_key_prefix = ?2,
                production_api_secret = ?3, production_webhook_secret = ?4,
                production_created_at = ?5, production_rotated_at = NULL
             WHERE merchant_id = ?6"
        }
        (Env::Production, true) => {
            "UPDATE merchant_credentials SET
                production_api_key_hash = ?1, production_api_key_prefix = ?2,
                production_api_secret = ?3, production_webhook_secret = ?4,
                production_rotated_at = ?5
             WHERE merchant_id = ?6"
        }
        (Env::Sandbox, false) => {
            "UPDATE merchant_credentials SET
                sandbox_api_key_hash = ?1, sandbox_api_key_prefix = ?2,
                sandbox_api_secret = ?3, sandbox_webhook_secret = ?4,
                sandbox_created_at = ?5, sandbox_rotated_at = NULL
             WHERE merchant_id = ?6"
        }
        (Env::Sandbox, true) => {
            "UPDATE merchant_credentials SET
                sandbox_api_key_hash = ?1, sandbox_api_key_prefix = ?2,
                sandbox_api_secret = ?3, sandbox_webhook_secret = ?4,
                sandbox_rotated_at = ?5
             WHERE merchant_id = ?6"
        }
    };

    sqlx::query(sql)
        .bind(api_key_hash)
        .bind(api_key_prefix)
        .bind(api_secret)
        .bind(webhook_secret)
        .bind(now)
        .bind(merchant_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Resolve a key fingerprint to `(merchant_id, env)` across both envs in
/// one query. Hash uniqueness across envs is a lookup policy: the first
/// match wins and production is checked first.
pub async fn lookup_by_key_hash(pool: &SqlitePool, hash: &str) -> Result<Option<(String, Env)>> {
    let row: Option<(String, String)> = sqlx::query_as(
        "SELECT merchant_id,
                CASE WHEN production_api_key_hash = ?1 THEN 'production' ELSE 'sandbox' END
         FROM merchant_credentials
         WHERE production_api_key_hash = ?1 OR sandbox_api_key_hash = ?1
         LIMIT 1",
    )
    .bind(hash)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(merchant_id, env)| Env::parse(&env).map(|e| (merchant_id, e))))
}

pub async fn get_credentials(
    pool: &SqlitePool,
    merchant_id: &str,
) -> Result<Option<MerchantCredentials>> {
    sqlx::query_as::<_, MerchantCredentials>(
        "SELECT * FROM merchant_credentials WHERE merchant_id = ?1",
    )
    .bind(merchant_id)
    .fetch_optional(pool)
    .await
}

// ---------------------------------------------------------------------------
// Invoices

/// Insert pending claim, invoice, creation event and (optionally) the
/// creation webhook in one transaction. A unique violation on
/// `(principal, unique_suffix)` aborts the whole batch; the caller
/// re-allocates and retries.
pub async fn create_invoice(
    pool: &SqlitePool,
    invoice: &Invoice,
    pending: &PendingTransaction,
    event: &InvoiceEvent,
    delivery: Option<&WebhookDelivery>,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO invoices (id, merchant_id, env, principal, reference_id,
            base_amount, unique_suffix, final_amount, status, qris_string,
            metadata, created_at, expires_at, paid_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
    )
    .bind(&invoice.id)
    .bind(&invoice.merchant_id)
    .bind(&invoice.env)
    .bind(&invoice.principal)
    .bind(&invoice.reference_id)
    .bind(invoice.base_amount)
    .bind(invoice.unique_suffix)
    .bind(invoice.final_amount)
    .bind(&invoice.status)
    .bind(&invoice.qris_string)
    .bind(&invoice.metadata)
    .bind(invoice.created_at)
    .bind(invoice.expires_at)
    .bind(invoice.paid_at)
    .execute(&mut *tx)
    .await?;

    // The invoice row must exist before the claim row, and the claim's
    // unique index is what loses the race: a violation rolls back both.
    sqlx::query(
        "INSERT INTO pending_transactions
            (invoice_id, merchant_id, principal, unique_suffix, final_amount, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&pending.invoice_id)
    .bind(&pending.merchant_id)
    .bind(&pending.principal)
    .bind(pending.unique_suffix)
    .bind(pending.final_amount)
    .bind(pending.created_at)
    .bind(pending.expires_at)
    .execute(&mut *tx)
    .await?;

    insert_event_tx(&mut tx, event).await?;
    if let Some(d) = delivery {
        insert_delivery_tx(&mut tx, d).await?;
    }

    tx.commit().await
}

pub async fn get_invoice(pool: &SqlitePool, id: &str) -> Result<Option<Invoice>> {
    sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_invoice_for_merchant(
    pool: &SqlitePool,
    id: &str,
    merchant_id: &str,
    env: Env,
) -> Result<Option<Invoice>> {
    sqlx::query_as::<_, Invoice>(
        "SELECT * FROM invoices WHERE id = ?1 AND merchant_id = ?2 AND env = ?3",
    )
    .bind(id)
    .bind(merchant_id)
    .bind(env.as_str())
    .fetch_optional(pool)
    .await
}

pub async fn list_invoices(
    pool: &SqlitePool,
    merchant_id: &str,
    env: Env,
    limit: i64,
    offset: i64,
) -> Result<Vec<Invoice>> {
    sqlx::query_as::<_, Invoice>(
        "SELECT * FROM invoices WHERE merchant_id = ?1 AND env = ?2
         ORDER BY created_at DESC, id DESC LIMIT ?3 OFFSET ?4",
    )
    .bind(merchant_id)
    .bind(env.as_str())
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Pending invoices whose TTL has elapsed, oldest first.
pub async fn list_expired_pending_invoices(
    pool: &SqlitePool,
    now: i64,
    limit: i64,
) -> Result<Vec<Invoice>> {
    sqlx::query_as::<_, Invoice>(
        "SELECT * FROM invoices WHERE status = 'pending' AND expires_at <= ?1
         ORDER BY expires_at ASC LIMIT ?2",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// `pending → paid`. Deletes the pending claim, seeds the paid cache,
/// appends the event and (optionally) enqueues the webhook atomically.
/// Returns false when the invoice was no longer pending.
pub async fn transition_to_paid(
    pool: &SqlitePool,
    invoice_id: &str,
    paid_at: i64,
    cache_expires_at: i64,
    event: &InvoiceEvent,
    delivery: Option<&WebhookDelivery>,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        "UPDATE invoices SET status = 'paid', paid_at = ?1 WHERE id = ?2 AND status = 'pending'",
    )
    .bind(paid_at)
    .bind(invoice_id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query("DELETE FROM pending_transactions WHERE invoice_id = ?1")
        .bind(invoice_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT OR REPLACE INTO paid_transactions (invoice_id, paid_at, expires_at)
         VALUES (?1, ?2, ?3)",
    )
    .bind(invoice_id)
    .bind(paid_at)
    .bind(cache_expires_at)
    .execute(&mut *tx)
    .await?;

    insert_event_tx(&mut tx, event).await?;
    if let Some(d) = delivery {
        insert_delivery_tx(&mut tx, d).await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// `pending → expired`. Same atomicity contract as `transition_to_paid`.
pub async fn transition_to_expired(
    pool: &SqlitePool,
    invoice_id: &str,
    event: &InvoiceEvent,
    delivery: Option<&WebhookDelivery>,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let updated =
        sqlx::query("UPDATE invoices SET status = 'expired' WHERE id = ?1 AND status = 'pending'")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await?;
    if updated.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query("DELETE FROM pending_transactions WHERE invoice_id = ?1")
        .bind(invoice_id)
        .execute(&mut *tx)
        .await?;

    insert_event_tx(&mut tx, event).await?;
    if let Some(d) = delivery {
        insert_delivery_tx(&mut tx, d).await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// `paid → refunded`, marking the refund row processed in the same
/// transaction.
pub async fn transition_to_refunded(
    pool: &SqlitePool,
    invoice_id: &str,
    refund_id: &str,
    now: i64,
    event: &InvoiceEvent,
    delivery: Option<&WebhookDelivery>,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let updated =
        sqlx::query("UPDATE invoices SET status = 'refunded' WHERE id = ?1 AND status = 'paid'")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await?;
    if updated.rows_affected() == 0 {
        return Ok(false);
    }

    let refund_updated = sqlx::query(
        "UPDATE refunds SET status = 'processed', processed_at = ?1
         WHERE id = ?2 AND status = 'requested'",
    )
    .bind(now)
    .bind(refund_id)
    .execute(&mut *tx)
    .await?;
    if refund_updated.rows_affected() == 0 {
        return Ok(false);
    }

    insert_event_tx(&mut tx, event).await?;
    if let Some(d) = delivery {
        insert_delivery_tx(&mut tx, d).await?;
    }

    tx.commit().await?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Events

async fn insert_event_tx(tx: &mut Transaction<'_, Sqlite>, e: &InvoiceEvent) -> Result<()> {
    sqlx::query(
        "INSERT INTO invoice_events (id, invoice_id, event_type, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&e.id)
    .bind(&e.invoice_id)
    .bind(&e.event_type)
    .bind(&e.payload)
    .bind(e.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn list_events(
    pool: &SqlitePool,
    invoice_id: &str,
    limit: i64,
) -> Result<Vec<InvoiceEvent>> {
    sqlx::query_as::<_, InvoiceEvent>(
        "SELECT * FROM invoice_events WHERE invoice_id = ?1
         ORDER BY created_at ASC, id ASC LIMIT ?2",
    )
    .bind(invoice_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

// ---------------------------------------------------------------------------
// Pending / paid transactions

pub async fn get_pending(pool: &SqlitePool, invoice_id: &str) -> Result<Option<PendingTransaction>> {
    sqlx::query_as::<_, PendingTransaction>(
        "SELECT * FROM pending_transactions WHERE invoice_id = ?1",
    )
    .bind(invoice_id)
    .fetch_optional(pool)
    .await
}

/// Suffixes currently claimed by in-flight invoices for a principal.
pub async fn list_claimed_suffixes(pool: &SqlitePool, principal: &str) -> Result<Vec<i64>> {
    sqlx::query_scalar("SELECT unique_suffix FROM pending_transactions WHERE principal = ?1")
        .bind(principal)
        .fetch_all(pool)
        .await
}

/// Invoice ids of this principal's pending claims whose TTL has elapsed.
pub async fn list_expired_pending_for_principal(
    pool: &SqlitePool,
    principal: &str,
    now: i64,
) -> Result<Vec<String>> {
    sqlx::query_scalar(
        "SELECT invoice_id FROM pending_transactions WHERE principal = ?1 AND expires_at <= ?2",
    )
    .bind(principal)
    .bind(now)
    .fetch_all(pool)
    .await
}

pub async fn get_paid_cache(
    pool: &SqlitePool,
    invoice_id: &str,
    now: i64,
) -> Result<Option<PaidTransaction>> {
    sqlx::query_as::<_, PaidTransaction>(
        "SELECT * FROM paid_transactions WHERE invoice_id = ?1 AND expires_at > ?2",
    )
    .bind(invoice_id)
    .bind(now)
    .fetch_optional(pool)
    .await
}

// ---------------------------------------------------------------------------
// Nonces

/// Record a nonce, returning false when it was already used inside its
/// window. Expired rows for the merchant are dropped opportunistically
/// first, so the insert's primary key is the linearization point.
pub async fn try_mark_nonce(
    pool: &SqlitePool,
    merchant_id: &str,
    nonce: &str,
    now: i64,
    ttl_secs: i64,
) -> Result<bool> {
    sqlx::query("DELETE FROM used_nonces WHERE merchant_id = ?1 AND expires_at <= ?2")
        .bind(merchant_id)
        .bind(now)
        .execute(pool)
        .await?;

    let inserted = sqlx::query(
        "INSERT INTO used_nonces (merchant_id, nonce, expires_at) VALUES (?1, ?2, ?3)",
    )
    .bind(merchant_id)
    .bind(nonce)
    .bind(now + ttl_secs)
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => Ok(true),
        Err(err) if is_unique_violation(&err) => Ok(false),
        Err(err) => Err(err),
    }
}

// ---------------------------------------------------------------------------
// Webhook deliveries

pub async fn enqueue_delivery(pool: &SqlitePool, d: &WebhookDelivery) -> Result<()> {
    let mut tx = pool.begin().await?;
    insert_delivery_tx(&mut tx, d).await?;
    tx.commit().await
}

async fn insert_delivery_tx(tx: &mut Transaction<'_, Sqlite>, d: &WebhookDelivery) -> Result<()> {
    sqlx::query(
        "INSERT INTO webhook_deliveries (id, merchant_id, env, invoice_id, event_type,
            payload, status, attempt_count, next_retry_at, last_status, last_error,
            response_snippet, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
    )
    .bind(&d.id)
    .bind(&d.merchant_id)
    .bind(&d.env)
    .bind(&d.invoice_id)
    .bind(&d.event_type)
    .bind(&d.payload)
    .bind(&d.status)
    .bind(d.attempt_count)
    .bind(d.next_retry_at)
    .bind(d.last_status)
    .bind(&d.last_error)
    .bind(&d.response_snippet)
    .bind(d.created_at)
    .bind(d.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn get_delivery(pool: &SqlitePool, id: &str) -> Result<Option<WebhookDelivery>> {
    sqlx::query_as::<_, WebhookDelivery>("SELECT * FROM webhook_deliveries WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Queued deliveries that are due, oldest deadline first.
pub async fn list_due_deliveries(
    pool: &SqlitePool,
    now: i64,
    batch: i64,
) -> Result<Vec<WebhookDelivery>> {
    sqlx::query_as::<_, WebhookDelivery>(
        "SELECT * FROM webhook_deliveries
         WHERE status = 'queued' AND next_retry_at <= ?1
         ORDER BY next_retry_at ASC LIMIT ?2",
    )
    .bind(now)
    .bind(batch)
    .fetch_all(pool)
    .await
}

pub async fn mark_delivery_delivered(
    pool: &SqlitePool,
    id: &str,
    attempt_count: i64,
    http_status: i64,
    response_snippet: &str,
    now: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE webhook_deliveries SET status = 'delivered', attempt_count = ?1,
            last_status = ?2, last_error = NULL, response_snippet = ?3, updated_at = ?4
         WHERE id = ?5",
    )
    .bind(attempt_count)
    .bind(http_status)
    .bind(response_snippet)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_delivery_retry(
    pool: &SqlitePool,
    id: &str,
    attempt_count: i64,
    next_retry_at: i64,
    last_status: Option<i64>,
    last_error: &str,
    now: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE webhook_deliveries SET attempt_count = ?1, next_retry_at = ?2,
            last_status = ?3, last_error = ?4, updated_at = ?5
         WHERE id = ?6",
    )
    .bind(attempt_count)
    .bind(next_retry_at)
    .bind(last_status)
    .bind(last_error)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_delivery_failed(
    pool: &SqlitePool,
    id: &str,
    attempt_count: i64,
    last_status: Option<i64>,
    last_error: &str,
    now: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE webhook_deliveries SET status = 'failed', attempt_count = ?1,
            last_status = ?2, last_error = ?3, updated_at = ?4
         WHERE id = ?5",
    )
    .bind(attempt_count)
    .bind(last_status)
    .bind(last_error)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Alerts

pub async fn insert_alert(pool: &SqlitePool, a: &Alert) -> Result<()> {
    sqlx::query(
        "INSERT INTO alerts (id, merchant_id, alert_type, message, created_at, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(&a.id)
    .bind(&a.merchant_id)
    .bind(&a.alert_type)
    .bind(&a.message)
    .bind(a.created_at)
    .bind(a.resolved_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_alerts(pool: &SqlitePool, unresolved_only: bool) -> Result<Vec<Alert>> {
    let sql = if unresolved_only {
        "SELECT * FROM alerts WHERE resolved_at IS NULL ORDER BY created_at DESC"
    } else {
        "SELECT * FROM alerts ORDER BY created_at DESC"
    };
    sqlx::query_as::<_, Alert>(sql).fetch_all(pool).await
}

pub async fn resolve_alert(pool: &SqlitePool, id: &str, now: i64) -> Result<bool> {
    let result =
        sqlx::query("UPDATE alerts SET resolved_at = ?1 WHERE id = ?2 AND resolved_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Refunds

/// Insert a refund request together with its audit event.
pub async fn create_refund(pool: &SqlitePool, r: &Refund, event: &InvoiceEvent) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO refunds (id, invoice_id, amount, reason, status, created_at, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&r.id)
    .bind(&r.invoice_id)
    .bind(r.amount)
    .bind(&r.reason)
    .bind(&r.status)
    .bind(r.created_at)
    .bind(r.processed_at)
    .execute(&mut *tx)
    .await?;
    insert_event_tx(&mut tx, event).await?;
    tx.commit().await
}

pub async fn get_refund(pool: &SqlitePool, id: &str) -> Result<Option<Refund>> {
    sqlx::query_as::<_, Refund>("SELECT * FROM refunds WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

// ---------------------------------------------------------------------------
// Cache GC

/// Drop expired nonces, stale paid-cache entries and stray pending claims.
/// Stray claims are those whose invoice already left `pending`; claims of
/// live invoices are released by the expiry scan instead.
pub async fn gc_expired(pool: &SqlitePool, now: i64) -> Result<()> {
    sqlx::query("DELETE FROM used_nonces WHERE expires_at <= ?1")
        .bind(now)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM paid_transactions WHERE expires_at <= ?1")
        .bind(now)
        .execute(pool)
        .await?;
    sqlx::query(
        "DELETE FROM pending_transactions WHERE expires_at <= ?1 AND invoice_id NOT IN
            (SELECT id FROM invoices WHERE status = 'pending')",
    )
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}
