//! Meta webhook signature validation and the subscribe challenge.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use omnihub_channels::adapter::WebhookHeaders;

type HmacSha256 = Hmac<Sha256>;

/// Verify `X-Hub-Signature-256: sha256=<hex>` over the raw body.
///
/// Constant-time comparison via `Mac::verify_slice`. A missing or
/// malformed header is a rejection.
pub fn validate_signature(headers: &WebhookHeaders, body: &[u8], app_secret: &str) -> bool {
    let sig_header = match headers.get("x-hub-signature-256") {
        Some(v) => v.as_str(),
        None => return false,
    };

    let sig_hex = match sig_header.strip_prefix("sha256=") {
        Some(v) => v,
        None => return false,
    };

    let expected = match hex::decode(sig_hex) {
        Ok(v) => v,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(app_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Resolve the GET subscribe handshake.
///
/// Returns the challenge to echo with 200 iff `hub.mode=subscribe` and
/// the verify token matches; `None` means 403.
pub fn verify_challenge<'a>(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&'a str>,
    configured_token: &str,
) -> Option<&'a str> {
    match (mode, token, challenge) {
        (Some("subscribe"), Some(t), Some(c)) if t == configured_token => Some(c),
        _ => None,
    }
}

/// Compute the signature header value for a body — used by tests and by
/// outbound webhook replay tooling.
pub fn sign(body: &[u8], app_secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes()).expect("any key length works");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
