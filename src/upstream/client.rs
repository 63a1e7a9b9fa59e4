use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{CreditProvider, CreditRecord, UpstreamError};

/// Wire shape of the upstream mutation feed.
#[derive(Debug, Deserialize)]
struct MutationResponse {
    status: String,
    #[serde(default)]
    data: Vec<MutationRecord>,
}

#[derive(Debug, Deserialize)]
struct MutationRecord {
    amount: serde_json::Value,
    status: String,
}

/// HTTP client for the upstream provider's QRIS mutation endpoint.
#[derive(Clone)]
pub struct HttpCreditProvider {
    client: Client,
    base_url: String,
}

impl HttpCreditProvider {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }
}

#[async_trait]
impl CreditProvider for HttpCreditProvider {
    async fn fetch_credits(
        &self,
        principal: &str,
        token: &str,
    ) -> Result<Vec<CreditRecord>, UpstreamError> {
        let url = format!(
            "{}/api/mutasi/qris/{}/{}",
            self.base_url.trim_end_matches('/'),
            principal,
            token
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(UpstreamError::InvalidResponse(format!(
                "upstream returned HTTP {}",
                response.status()
            )));
        }

        let body = response.json::<MutationResponse>().await?;
        if body.status != "success" {
            return Err(UpstreamError::InvalidResponse(format!(
                "upstream status {:?}",
                body.status
            )));
        }

        body.data
            .into_iter()
            .map(|record| {
                Ok(CreditRecord {
                    amount: parse_amount(&record.amount)?,
                    direction: record.status,
                })
            })
            .collect()
    }
}

/// The feed reports amounts as either bare integers or strings with
/// thousand separators ("10.001"). Both normalize to whole currency units.
fn parse_amount(raw: &serde_json::Value) -> Result<i64, UpstreamError> {
    match raw {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| UpstreamError::InvalidResponse(format!("non-integer amount {}", n))),
        serde_json::Value::String(s) => {
            let digits: String = s.chars().filter(|c| *c != '.' && *c != ',').collect();
            digits
                .parse()
                .map_err(|_| UpstreamError::InvalidResponse(format!("unparseable amount {:?}", s)))
        }
        other => Err(UpstreamError::InvalidResponse(format!(
            "unexpected amount {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_normalize_separators() {
        assert_eq!(parse_amount(&serde_json::json!(10001)).unwrap(), 10001);
        assert_eq!(parse_amount(&serde_json::json!("10.001")).unwrap(), 10001);
        assert_eq!(parse_amount(&serde_json::json!("1,250,000")).unwrap(), 1250000);
        assert!(parse_amount(&serde_json::json!("12x")).is_err());
        assert!(parse_amount(&serde_json::json!(null)).is_err());
    }

    #[tokio::test]
    async fn fetch_parses_mutation_feed() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("GET", "/api/mutasi/qris/merchantA/tok-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "status": "success",
                    "data": [
                        {"amount": "10.001", "status": "IN"},
                        {"amount": 5000, "status": "OUT"}
                    ]
                }"#,
            )
            .create_async()
            .await;

        let provider = HttpCreditProvider::new(server.url());
        let credits = provider.fetch_credits("merchantA", "tok-1").await.unwrap();

        assert_eq!(
            credits,
            vec![
                CreditRecord { amount: 10001, direction: "IN".to_string() },
                CreditRecord { amount: 5000, direction: "OUT".to_string() },
            ]
        );
        assert!(credits[0].is_credit_in());
        assert!(!credits[1].is_credit_in());
    }

    #[tokio::test]
    async fn non_success_feed_status_is_invalid() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r"/api/mutasi/qris/.*".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "error", "data": []}"#)
            .create_async()
            .await;

        let provider = HttpCreditProvider::new(server.url());
        let result = provider.fetch_credits("merchantA", "bad-token").await;
        assert!(matches!(result, Err(UpstreamError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn http_error_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r"/api/mutasi/qris/.*".into()))
            .with_status(503)
            .create_async()
            .await;

        let provider = HttpCreditProvider::new(server.url());
        let result = provider.fetch_credits("merchantA", "tok").await;
        assert!(result.is_err());
    }
}
