//! Upstream credit-history provider.
//!
//! The gateway never learns how a payment cleared; it only asks the
//! upstream for a principal's recent credits and matches amounts. This
//! module is the narrow seam: a trait the invoice service polls through,
//! plus the HTTP implementation in `client`.

pub mod client;

pub use client::HttpCreditProvider;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid response from upstream: {0}")]
    InvalidResponse(String),
}

/// One mutation-history entry. `direction` is the upstream's own vocabulary:
/// "IN" for inbound credits, "OUT" for debits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditRecord {
    pub amount: i64,
    pub direction: String,
}

impl CreditRecord {
    pub fn is_credit_in(&self) -> bool {
        self.direction == "IN"
    }
}

#[async_trait]
pub trait CreditProvider: Send + Sync {
    /// Fetch recent mutations for `principal`, authenticated with the
    /// caller-supplied upstream token. Deterministic for a given response.
    async fn fetch_credits(
        &self,
        principal: &str,
        token: &str,
    ) -> Result<Vec<CreditRecord>, UpstreamError>;
}
