//! API key and secret minting.
//!
//! Keys are 24 bytes of CSPRNG output, base64url-encoded without padding,
//! behind a role/env prefix. The prefix carries no authority: verification
//! depends solely on the stored SHA-256 fingerprint, and raw keys are never
//! persisted.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::db::models::Env;

/// Characters of the raw key kept for display in admin listings.
pub const DISPLAY_PREFIX_LEN: usize = 12;

const KEY_BYTES: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Api,
    Signing,
    Webhook,
}

impl KeyRole {
    fn prefix(self, env: Env) -> &'static str {
        match (self, env) {
            (KeyRole::Api, Env::Production) => "sk_live_",
            (KeyRole::Api, Env::Sandbox) => "sk_test_",
            (KeyRole::Signing, Env::Production) => "sksec_",
            (KeyRole::Signing, Env::Sandbox) => "sksec_test_",
            (KeyRole::Webhook, Env::Production) => "whsec_",
            (KeyRole::Webhook, Env::Sandbox) => "whsec_test_",
        }
    }
}

/// Freshly minted key material for one env. The raw values exist only in
/// this struct; callers hash what they need and discard the rest.
#[derive(Debug)]
pub struct MintedCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub webhook_secret: String,
}

pub fn mint_key(role: KeyRole, env: Env) -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", role.prefix(env), URL_SAFE_NO_PAD.encode(bytes))
}

pub fn mint_credentials(env: Env) -> MintedCredentials {
    MintedCredentials {
        api_key: mint_key(KeyRole::Api, env),
        api_secret: mint_key(KeyRole::Signing, env),
        webhook_secret: mint_key(KeyRole::Webhook, env),
    }
}

/// Lowercase hex SHA-256 of the raw key. This is the only persisted form.
pub fn fingerprint(raw_key: &str) -> String {
    let digest = Sha256::digest(raw_key.as_bytes());
    hex::encode(digest)
}

/// Short display prefix stored alongside the hash so operators can tell
/// keys apart without ever seeing the full value again.
pub fn display_prefix(raw_key: &str) -> String {
    raw_key.chars().take(DISPLAY_PREFIX_LEN).collect()
}
