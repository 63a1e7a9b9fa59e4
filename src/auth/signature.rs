//! Request signing: canonical string construction and HMAC-SHA256.
//!
//! Inbound gateway requests and outbound webhooks share the same primitive;
//! only the canonical form differs. Verification is constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Canonical form of an inbound request:
/// `METHOD \n PATH_WITH_QUERY \n TIMESTAMP \n NONCE \n BODY`.
///
/// `method` is uppercased; `path_and_query` is the server-seen path plus the
/// raw query string; `body` is the exact request body bytes (empty when the
/// request has none).
pub fn canonical_request(
    method: &str,
    path_and_query: &str,
    timestamp: i64,
    nonce: &str,
    body: &[u8],
) -> Vec<u8> {
    let mut canonical = Vec::with_capacity(body.len() + 64);
    canonical.extend_from_slice(method.to_uppercase().as_bytes());
    canonical.push(b'\n');
    canonical.extend_from_slice(path_and_query.as_bytes());
    canonical.push(b'\n');
    canonical.extend_from_slice(timestamp.to_string().as_bytes());
    canonical.push(b'\n');
    canonical.extend_from_slice(nonce.as_bytes());
    canonical.push(b'\n');
    canonical.extend_from_slice(body);
    canonical
}

/// Canonical form of an outbound webhook: `"<timestamp>.<payload>"`.
pub fn canonical_webhook(timestamp: i64, payload: &str) -> Vec<u8> {
    format!("{}.{}", timestamp, payload).into_bytes()
}

/// Hex HMAC-SHA256 of `message` under `secret`.
pub fn sign(secret: &str, message: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature against `message`. The comparison runs in
/// constant time; undecodable hex is a plain mismatch.
pub fn verify(secret: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message);
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let canonical = canonical_request("post", "/invoices?x=1", 1700000000, "n-1", b"{}");
        let sig = sign("sksec_abc", &canonical);
        assert!(verify("sksec_abc", &canonical, &sig));
    }

    #[test]
    fn verify_rejects_any_other_message() {
        let canonical = canonical_request("POST", "/invoices", 1700000000, "n-1", b"{}");
        let sig = sign("sksec_abc", &canonical);
        let tampered = canonical_request("POST", "/invoices", 1700000000, "n-2", b"{}");
        assert!(!verify("sksec_abc", &tampered, &sig));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let canonical = canonical_request("GET", "/health", 1700000000, "n-1", b"");
        let sig = sign("sksec_abc", &canonical);
        assert!(!verify("sksec_other", &canonical, &sig));
    }

    #[test]
    fn verify_rejects_malformed_hex() {
        let canonical = canonical_request("GET", "/health", 1700000000, "n-1", b"");
        assert!(!verify("sksec_abc", &canonical, "not-hex"));
    }

    #[test]
    fn method_is_uppercased_in_canonical_form() {
        let lower = canonical_request("get", "/health", 1, "n", b"");
        let upper = canonical_request("GET", "/health", 1, "n", b"");
        assert_eq!(lower, upper);
    }

    #[test]
    fn webhook_canonical_form_is_ts_dot_body() {
        assert_eq!(
            canonical_webhook(1700000000, r#"{"a":1}"#),
            br#"1700000000.{"a":1}"#.to_vec()
        );
    }
}
