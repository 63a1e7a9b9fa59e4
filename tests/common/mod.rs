//! Shared fixtures: an in-memory gateway with a scriptable upstream and a
//! merchant holding freshly minted sandbox credentials.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use qrisgate_core::auth::keys;
use qrisgate_core::auth::signature;
use qrisgate_core::config::Config;
use qrisgate_core::db;
use qrisgate_core::db::models::{Env, Merchant, MerchantStatus};
use qrisgate_core::db::queries;
use qrisgate_core::upstream::{CreditProvider, CreditRecord, UpstreamError};
use qrisgate_core::AppState;

/// Upstream double: hand it credits, or flip `fail` to simulate outage.
pub struct StubUpstream {
    pub credits: Mutex<Vec<CreditRecord>>,
    pub fail: AtomicBool,
}

impl StubUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            credits: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn push_credit(&self, amount: i64, direction: &str) {
        self.credits.lock().unwrap().push(CreditRecord {
            amount,
            direction: direction.to_string(),
        });
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl CreditProvider for StubUpstream {
    async fn fetch_credits(
        &self,
        _principal: &str,
        _token: &str,
    ) -> Result<Vec<CreditRecord>, UpstreamError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(UpstreamError::InvalidResponse("stubbed outage".to_string()));
        }
        Ok(self.credits.lock().unwrap().clone())
    }
}

pub struct TestGateway {
    pub state: AppState,
    pub merchant: Merchant,
    pub env: Env,
    pub api_key: String,
    pub api_secret: String,
    pub webhook_secret: String,
    pub upstream: Arc<StubUpstream>,
}

pub async fn gateway() -> TestGateway {
    gateway_with(|_| {}).await
}

/// Build a gateway on an in-memory store with an approved merchant and
/// sandbox credentials. `configure` tweaks knobs before state construction.
pub async fn gateway_with(configure: impl FnOnce(&mut Config)) -> TestGateway {
    let mut config = Config::from_lookup(|_| None).expect("defaults parse").config;
    configure(&mut config);

    let pool = db::create_memory_pool().await.expect("memory pool");
    db::migrations::run(&pool).await.expect("migrations");

    let now = chrono::Utc::now().timestamp();
    let merchant = Merchant::new("shop@example.com", None, now);
    queries::insert_merchant(&pool, &merchant).await.expect("merchant");
    queries::set_merchant_status(&pool, &merchant.id, MerchantStatus::Active)
        .await
        .expect("activate");

    let env = Env::Sandbox;
    let minted = keys::mint_credentials(env);
    queries::store_credentials(
        &pool,
        &merchant.id,
        env,
        &keys::fingerprint(&minted.api_key),
        &keys::display_prefix(&minted.api_key),
        &minted.api_secret,
        &minted.webhook_secret,
        false,
        now,
    )
    .await
    .expect("credentials");

    let upstream = StubUpstream::new();
    let state = AppState::new(pool, config, upstream.clone());

    let merchant = queries::get_merchant(&state.db, &merchant.id)
        .await
        .expect("reload")
        .expect("merchant exists");

    TestGateway {
        state,
        merchant,
        env,
        api_key: minted.api_key,
        api_secret: minted.api_secret,
        webhook_secret: minted.webhook_secret,
        upstream,
    }
}

impl TestGateway {
    pub async fn reload_merchant(&mut self) {
        self.merchant = queries::get_merchant(&self.state.db, &self.merchant.id)
            .await
            .expect("reload")
            .expect("merchant exists");
    }

    pub async fn enable_webhook(&mut self, url: &str) {
        queries::set_webhook_config(&self.state.db, &self.merchant.id, self.env, Some(url), true)
            .await
            .expect("webhook config");
        self.reload_merchant().await;
    }

    /// Signature headers for a request, signed with this merchant's secret.
    pub fn signed_headers(
        &self,
        method: &str,
        path_and_query: &str,
        body: &[u8],
        timestamp: i64,
        nonce: &str,
    ) -> Vec<(String, String)> {
        let canonical =
            signature::canonical_request(method, path_and_query, timestamp, nonce, body);
        let sig = signature::sign(&self.api_secret, &canonical);
        vec![
            ("x-api-key".to_string(), self.api_key.clone()),
            ("x-timestamp".to_string(), timestamp.to_string()),
            ("x-nonce".to_string(), nonce.to_string()),
            ("x-signature".to_string(), sig),
        ]
    }
}

/// A structurally valid static QRIS payload. The trailer is computed here,
/// independently of the codec under test.
pub fn static_qris() -> String {
    fn field(tag: &str, value: &str) -> String {
        format!("{}{:02}{}", tag, value.chars().count(), value)
    }

    let body = [
        field("00", "01"),
        field("01", "11"),
        field(
            "26",
            &format!(
                "{}{}",
                field("00", "ID.CO.QRIS.WWW"),
                field("01", "936000140000000001")
            ),
        ),
        field("52", "5499"),
        field("53", "360"),
        field("58", "ID"),
        field("59", "WARUNG MAKMUR"),
        field("60", "JAKARTA"),
    ]
    .concat();

    const CRC16_X25: crc::Algorithm<u16> = crc::Algorithm {
        width: 16,
        poly: 0x1021,
        init: 0xFFFF,
        refin: true,
        refout: true,
        xorout: 0xFFFF,
        check: 0x906E,
        residue: 0xF0B8,
    };
    let with_header = format!("{}6304", body);
    let crc = crc::Crc::<u16>::new(&CRC16_X25).checksum(with_header.as_bytes());
    format!("{}{:04X}", with_header, crc)
}
