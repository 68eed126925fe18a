//! RS256 JWTs for the Vonage Voice API.
//!
//! Outbound API calls mint a fresh short-lived token per call (15 min
//! exp, unique jti). Inbound webhooks carry a JWT signed with the same
//! application key; `verify` checks the signature against the
//! configured public key plus exp and jti freshness.

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use ring::signature::{self, RsaKeyPair};
use serde::Deserialize;

use omnihub_channels::error::{ChannelError, Result};

/// Maximum token lifetime we mint and accept.
pub const MAX_TTL_SECS: i64 = 15 * 60;

/// Strip PEM armor and decode the base64 body to DER.
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let body: String = pem
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .map(|l| l.trim())
        .collect();
    BASE64
        .decode(body.as_bytes())
        .map_err(|e| ChannelError::Validation(format!("invalid PEM: {e}")))
}

fn key_pair_from_pem(pem: &str) -> Result<RsaKeyPair> {
    let der = pem_to_der(pem)?;
    let result = if pem.contains("RSA PRIVATE KEY") {
        RsaKeyPair::from_der(&der)
    } else {
        RsaKeyPair::from_pkcs8(&der)
    };
    result.map_err(|e| ChannelError::Validation(format!("invalid RSA private key: {e}")))
}

/// Mint a signed application JWT.
pub fn mint(application_id: &str, private_key_pem: &str, now: DateTime<Utc>) -> Result<String> {
    let header = serde_json::json!({ "alg": "RS256", "typ": "JWT" });
    let claims = serde_json::json!({
        "application_id": application_id,
        "iat": now.timestamp(),
        "exp": now.timestamp() + MAX_TTL_SECS,
        "jti": uuid::Uuid::new_v4().to_string(),
    });

    let header_b64 = URL_SAFE_NO_PAD.encode(header.to_string().as_bytes());
    let claims_b64 = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    let message = format!("{header_b64}.{claims_b64}");

    let key_pair = key_pair_from_pem(private_key_pem)?;
    let mut sig = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &signature::RSA_PKCS1_SHA256,
            &ring::rand::SystemRandom::new(),
            message.as_bytes(),
            &mut sig,
        )
        .map_err(|e| ChannelError::Validation(format!("RSA signing failed: {e}")))?;

    Ok(format!("{message}.{}", URL_SAFE_NO_PAD.encode(&sig)))
}

/// Claims we check on inbound webhook tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub application_id: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    /// exp within bounds and not overlong (exp − iat ≤ 15 min).
    pub fn time_valid(&self, now: DateTime<Utc>) -> bool {
        let now = now.timestamp();
        self.exp > now && self.exp - self.iat <= MAX_TTL_SECS
    }
}

/// Verify an inbound token: RS256 signature over `header.payload`
/// against the application public key, then claim checks.
pub fn verify(token: &str, public_key_pem: &str, now: DateTime<Utc>) -> Result<Claims> {
    let mut parts = token.split('.');
    let (header_b64, claims_b64, sig_b64) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(c), Some(s)) if parts.next().is_none() => (h, c, s),
        _ => return Err(ChannelError::Validation("malformed JWT".to_string())),
    };

    let header: serde_json::Value = serde_json::from_slice(
        &URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| ChannelError::Validation("bad JWT header encoding".to_string()))?,
    )
    .map_err(|_| ChannelError::Validation("bad JWT header".to_string()))?;
    if header.get("alg").and_then(|a| a.as_str()) != Some("RS256") {
        return Err(ChannelError::Validation("JWT alg must be RS256".to_string()));
    }

    let sig = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| ChannelError::Validation("bad JWT signature encoding".to_string()))?;

    let spki = pem_to_der(public_key_pem)?;
    let rsa_der = rsa_public_key_from_spki(&spki)?;
    let message = format!("{header_b64}.{claims_b64}");
    signature::UnparsedPublicKey::new(&signature::RSA_PKCS1_2048_8192_SHA256, &rsa_der)
        .verify(message.as_bytes(), &sig)
        .map_err(|_| ChannelError::Validation("JWT signature mismatch".to_string()))?;

    let claims: Claims = serde_json::from_slice(
        &URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| ChannelError::Validation("bad JWT claims encoding".to_string()))?,
    )
    .map_err(|e| ChannelError::Validation(format!("bad JWT claims: {e}")))?;

    if !claims.time_valid(now) {
        return Err(ChannelError::Validation(
            "JWT expired or lifetime exceeds 15 minutes".to_string(),
        ));
    }
    Ok(claims)
}

/// Unwrap a SubjectPublicKeyInfo into the inner PKCS#1 RSAPublicKey DER
/// that ring's verifier expects. Accepts already-unwrapped keys.
fn rsa_public_key_from_spki(der: &[u8]) -> Result<Vec<u8>> {
    // SPKI: SEQUENCE { SEQUENCE { alg oids }, BIT STRING { RSAPublicKey } }
    let (tag, _, content) = read_tlv(der)?;
    if tag != 0x30 {
        return Err(bad_key("outer tag"));
    }
    let (first_tag, first_len, rest) = read_tlv(content)?;
    if first_tag == 0x02 {
        // Already an RSAPublicKey (starts with INTEGER modulus).
        return Ok(der.to_vec());
    }
    if first_tag != 0x30 {
        return Err(bad_key("algorithm identifier"));
    }
    let after_alg = &rest[first_len..];
    let (bit_tag, bit_len, bits) = read_tlv(after_alg)?;
    if bit_tag != 0x03 || bit_len < 2 {
        return Err(bad_key("bit string"));
    }
    // First bit-string byte is the unused-bits count.
    Ok(bits[1..bit_len].to_vec())
}

/// Read one DER TLV; returns (tag, content_len, content_and_rest) where
/// the slice starts at the content.
fn read_tlv(der: &[u8]) -> Result<(u8, usize, &[u8])> {
    if der.len() < 2 {
        return Err(bad_key("truncated"));
    }
    let tag = der[0];
    let first = der[1] as usize;
    let (len, header) = if first < 0x80 {
        (first, 2)
    } else {
        let n = first & 0x7f;
        if n == 0 || n > 4 || der.len() < 2 + n {
            return Err(bad_key("length"));
        }
        let mut len = 0usize;
        for b in &der[2..2 + n] {
            len = (len << 8) | *b as usize;
        }
        (len, 2 + n)
    };
    if der.len() < header + len {
        return Err(bad_key("content length"));
    }
    Ok((tag, len, &der[header..]))
}

fn bad_key(what: &str) -> ChannelError {
    ChannelError::Validation(format!("invalid RSA public key DER ({what})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn pem_armor_is_stripped() {
        let pem = "-----BEGIN PUBLIC KEY-----\nAAEC\nAwQ=\n-----END PUBLIC KEY-----\n";
        assert_eq!(pem_to_der(pem).unwrap(), vec![0x00, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let pem = "-----BEGIN PUBLIC KEY-----\nAAEC\n-----END PUBLIC KEY-----";
        assert!(verify("only.two", pem, Utc::now()).is_err());
        assert!(verify("a.b.c.d", pem, Utc::now()).is_err());
        assert!(verify("!!!.???.///", pem, Utc::now()).is_err());
    }

    #[test]
    fn hs256_header_is_rejected() {
        // {"alg":"HS256","typ":"JWT"}
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let claims = URL_SAFE_NO_PAD.encode(br#"{"iat":0,"exp":0,"jti":"x"}"#);
        let token = format!("{header}.{claims}.AAAA");
        let pem = "-----BEGIN PUBLIC KEY-----\nAAEC\n-----END PUBLIC KEY-----";
        let err = verify(&token, pem, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("RS256"));
    }

    #[test]
    fn claim_time_bounds() {
        let now = Utc::now();
        let ok = Claims {
            application_id: None,
            iat: now.timestamp(),
            exp: now.timestamp() + 600,
            jti: "a".to_string(),
        };
        assert!(ok.time_valid(now));

        let expired = Claims {
            exp: (now - Duration::seconds(1)).timestamp(),
            ..ok.clone()
        };
        assert!(!expired.time_valid(now));

        let overlong = Claims {
            iat: now.timestamp(),
            exp: now.timestamp() + MAX_TTL_SECS + 60,
            ..ok.clone()
        };
        assert!(!overlong.time_valid(now));
    }
}
