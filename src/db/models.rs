//! Store entities and their status vocabularies.
//!
//! Rows keep statuses as TEXT; the enums here are the closed sets the
//! service layer reasons with. All instants are unix seconds.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    Production,
    Sandbox,
}

impl Env {
    pub fn as_str(self) -> &'static str {
        match self {
            Env::Production => "production",
            Env::Sandbox => "sandbox",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "production" => Some(Env::Production),
            "sandbox" => Some(Env::Sandbox),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MerchantStatus {
    Unverified,
    Submitted,
    Active,
    Rejected,
    Suspended,
}

impl MerchantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MerchantStatus::Unverified => "unverified",
            MerchantStatus::Submitted => "submitted",
            MerchantStatus::Active => "active",
            MerchantStatus::Rejected => "rejected",
            MerchantStatus::Suspended => "suspended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unverified" => Some(MerchantStatus::Unverified),
            "submitted" => Some(MerchantStatus::Submitted),
            "active" => Some(MerchantStatus::Active),
            "rejected" => Some(MerchantStatus::Rejected),
            "suspended" => Some(MerchantStatus::Suspended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Created,
    Pending,
    Paid,
    Expired,
    Refunded,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Created => "created",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Expired => "expired",
            InvoiceStatus::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Queued,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// Event types appended to the per-invoice audit log and mirrored on
/// outbound webhooks.
pub mod event_type {
    pub const PAYMENT_CREATED: &str = "payment.created";
    pub const PAYMENT_PAID: &str = "payment.paid";
    pub const PAYMENT_EXPIRED: &str = "payment.expired";
    pub const REFUND_REQUESTED: &str = "refund.requested";
    pub const REFUND_PROCESSED: &str = "refund.processed";
}

pub mod alert_type {
    pub const WEBHOOK_FAILED: &str = "webhook_failed";
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Merchant {
    pub id: String,
    pub email: String,
    pub phone: Option<String>,
    pub status: String,
    pub production_webhook_url: Option<String>,
    pub production_webhook_enabled: bool,
    pub sandbox_webhook_url: Option<String>,
    pub sandbox_webhook_enabled: bool,
    pub ip_whitelist_enabled: bool,
    /// JSON array of address / CIDR strings.
    pub ip_whitelist: Option<String>,
    pub fee_bps: i64,
    pub fee_fixed: i64,
    pub created_at: i64,
}

impl Merchant {
    pub fn new(email: &str, phone: Option<String>, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.trim().to_lowercase(),
            phone,
            status: MerchantStatus::Unverified.as_str().to_string(),
            production_webhook_url: None,
            production_webhook_enabled: false,
            sandbox_webhook_url: None,
            sandbox_webhook_enabled: false,
            ip_whitelist_enabled: false,
            ip_whitelist: None,
            fee_bps: 0,
            fee_fixed: 0,
            created_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MerchantStatus::Active.as_str()
    }

    /// Env-scoped webhook target; `None` when disabled or unset.
    pub fn webhook_target(&self, env: Env) -> Option<&str> {
        let (enabled, url) = match env {
            Env::Production => (
                self.production_webhook_enabled,
                self.production_webhook_url.as_deref(),
            ),
            Env::Sandbox => (
                self.sandbox_webhook_enabled,
                self.sandbox_webhook_url.as_deref(),
            ),
        };
        match url {
            Some(u) if enabled && !u.trim().is_empty() => Some(u),
            _ => None,
        }
    }

    pub fn webhook_enabled(&self, env: Env) -> bool {
        self.webhook_target(env).is_some()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MerchantCredentials {
    pub merchant_id: String,
    pub production_api_key_hash: Option<String>,
    pub production_api_key_prefix: Option<String>,
    pub production_api_secret: Option<String>,
    pub production_webhook_secret: Option<String>,
    pub production_created_at: Option<i64>,
    pub production_rotated_at: Option<i64>,
    pub sandbox_api_key_hash: Option<String>,
    pub sandbox_api_key_prefix: Option<String>,
    pub sandbox_api_secret: Option<String>,
    pub sandbox_webhook_secret: Option<String>,
    pub sandbox_created_at: Option<i64>,
    pub sandbox_rotated_at: Option<i64>,
}

impl MerchantCredentials {
    pub fn api_secret(&self, env: Env) -> Option<&str> {
        match env {
            Env::Production => self.production_api_secret.as_deref(),
            Env::Sandbox => self.sandbox_api_secret.as_deref(),
        }
    }

    pub fn webhook_secret(&self, env: Env) -> Option<&str> {
        match env {
            Env::Production => self.production_webhook_secret.as_deref(),
            Env::Sandbox => self.sandbox_webhook_secret.as_deref(),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Invoice {
    pub id: String,
    pub merchant_id: String,
    pub env: String,
    pub principal: String,
    pub reference_id: Option<String>,
    pub base_amount: i64,
    pub unique_suffix: i64,
    pub final_amount: i64,
    pub status: String,
    pub qris_string: String,
    /// Opaque caller-supplied JSON.
    pub metadata: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub paid_at: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PendingTransaction {
    pub invoice_id: String,
    pub merchant_id: String,
    pub principal: String,
    pub unique_suffix: i64,
    pub final_amount: i64,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct PaidTransaction {
    pub invoice_id: String,
    pub paid_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InvoiceEvent {
    pub id: String,
    pub invoice_id: String,
    pub event_type: String,
    pub payload: String,
    pub created_at: i64,
}

impl InvoiceEvent {
    pub fn new(invoice_id: &str, event_type: &str, payload: serde_json::Value, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            invoice_id: invoice_id.to_string(),
            event_type: event_type.to_string(),
            payload: payload.to_string(),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WebhookDelivery {
    pub id: String,
    pub merchant_id: String,
    pub env: String,
    pub invoice_id: Option<String>,
    pub event_type: String,
    pub payload: String,
    pub status: String,
    pub attempt_count: i64,
    pub next_retry_at: i64,
    pub last_status: Option<i64>,
    pub last_error: Option<String>,
    pub response_snippet: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WebhookDelivery {
    /// A queued delivery, due immediately. The payload is serialized once
    /// here so retries send identical bytes.
    pub fn new(
        merchant_id: &str,
        env: Env,
        invoice_id: Option<&str>,
        event_type: &str,
        payload: &serde_json::Value,
        now: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            merchant_id: merchant_id.to_string(),
            env: env.as_str().to_string(),
            invoice_id: invoice_id.map(str::to_string),
            event_type: event_type.to_string(),
            payload: payload.to_string(),
            status: DeliveryStatus::Queued.as_str().to_string(),
            attempt_count: 0,
            next_retry_at: now,
            last_status: None,
            last_error: None,
            response_snippet: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Alert {
    pub id: String,
    pub merchant_id: Option<String>,
    pub alert_type: String,
    pub message: String,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

impl Alert {
    pub fn new(merchant_id: Option<&str>, alert_type: &str, message: &str, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            merchant_id: merchant_id.map(str::to_string),
            alert_type: alert_type.to_string(),
            message: message.to_string(),
            created_at: now,
            resolved_at: None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Refund {
    pub id: String,
    pub invoice_id: String,
    pub amount: i64,
    pub reason: Option<String>,
    pub status: String,
    pub created_at: i64,
    pub processed_at: Option<i64>,
}

impl Refund {
    pub fn new(invoice_id: &str, amount: i64, reason: Option<String>, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            invoice_id: invoice_id.to_string(),
            amount,
            reason,
            status: "requested".to_string(),
            created_at: now,
            processed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merchant_email_is_lowercased() {
        let merchant = Merchant::new("  Shop@Example.COM ", None, 0);
        assert_eq!(merchant.email, "shop@example.com");
    }

    #[test]
    fn webhook_target_requires_enabled_and_nonempty_url() {
        let mut merchant = Merchant::new("a@b.c", None, 0);
        assert_eq!(merchant.webhook_target(Env::Production), None);

        merchant.production_webhook_url = Some("https://example.com/hook".to_string());
        assert_eq!(merchant.webhook_target(Env::Production), None);

        merchant.production_webhook_enabled = true;
        assert_eq!(
            merchant.webhook_target(Env::Production),
            Some("https://example.com/hook")
        );

        merchant.production_webhook_url = Some("   ".to_string());
        assert_eq!(merchant.webhook_target(Env::Production), None);

        // Env scoping: sandbox config does not leak into production.
        merchant.sandbox_webhook_url = Some("https://example.com/sbx".to_string());
        merchant.sandbox_webhook_enabled = true;
        assert_eq!(merchant.webhook_target(Env::Production), None);
        assert_eq!(
            merchant.webhook_target(Env::Sandbox),
            Some("https://example.com/sbx")
        );
    }

    #[test]
    fn env_round_trips() {
        assert_eq!(Env::parse("production"), Some(Env::Production));
        assert_eq!(Env::parse("sandbox"), Some(Env::Sandbox));
        assert_eq!(Env::parse("staging"), None);
        assert_eq!(Env::Production.as_str(), "production");
    }

    #[test]
    fn delivery_payload_is_serialized_once() {
        let payload = serde_json::json!({"invoice_id": "inv-1", "amount": 10001});
        let delivery =
            WebhookDelivery::new("m-1", Env::Sandbox, Some("inv-1"), "payment.paid", &payload, 5);
        assert_eq!(delivery.payload, payload.to_string());
        assert_eq!(delivery.attempt_count, 0);
        assert_eq!(delivery.next_retry_at, 5);
        assert_eq!(delivery.status, "queued");
    }
}
