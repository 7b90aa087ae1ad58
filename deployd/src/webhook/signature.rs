//! Webhook signature validation

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw request body
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Validate `signature_header` against the HMAC-SHA256 of `raw_body`.
///
/// The header is lowercase or uppercase hex, optionally prefixed with
/// `sha256=`. Any malformed header yields `false`. The digest comparison is
/// constant time (`Mac::verify_slice`).
pub fn validate(raw_body: &[u8], signature_header: &str, shared_secret: &[u8]) -> bool {
    let signature = signature_header.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    if signature.is_empty() {
        return false;
    }

    let Ok(expected) = hex::decode(signature) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(shared_secret) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the hex signature of `raw_body`
pub fn sign(raw_body: &[u8], shared_secret: &[u8]) -> String {
    HmacSha256::new_from_slice(shared_secret)
        .map(|mut mac| {
            mac.update(raw_body);
            hex::encode(mac.finalize().into_bytes())
        })
        .unwrap_or_default()
}

/// Validator bound to one shared secret
pub struct SignatureValidator {
    secret: SecretString,
}

impl SignatureValidator {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    pub fn validate(&self, raw_body: &[u8], signature_header: Option<&str>) -> bool {
        let secret = self.secret.expose_secret();
        if secret.is_empty() {
            // An unset secret must never authenticate anything
            return false;
        }
        match signature_header {
            Some(header) => validate(raw_body, header, secret.as_bytes()),
            None => false,
        }
    }
}
