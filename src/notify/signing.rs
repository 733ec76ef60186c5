//! Request signatures for outbound gateway calls.
//!
//! Gateways recompute
//! `HMAC-SHA256(secret, "v1\n{sender}\n{timestamp}\n{nonce}\n{METHOD}\n{path}\n{sha256(body)}")`
//! and compare it with the `x-aqi-signature` header (`v1=<lowercase hex>`).

use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue};
use sha2::{Digest, Sha256};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub(crate) const SENDER_ID: &str = "aqi-alert-service";

pub(crate) const SENDER_HEADER: &str = "x-aqi-sender";
pub(crate) const TIMESTAMP_HEADER: &str = "x-aqi-timestamp";
pub(crate) const NONCE_HEADER: &str = "x-aqi-nonce";
pub(crate) const SIGNATURE_HEADER: &str = "x-aqi-signature";

const VERSION: &str = "v1";

/// One signed request: what goes on the wire besides the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WebhookSignature {
    /// Unix time in milliseconds.
    pub timestamp: i64,
    pub nonce: String,
    /// `v1=<hex>`
    pub signature: String,
}

impl WebhookSignature {
    /// Sign with the current time and a fresh nonce.
    pub fn sign(secret: &str, method: &str, path: &str, body: &[u8]) -> Self {
        Self::sign_at(
            secret,
            method,
            path,
            body,
            chrono::Utc::now().timestamp_millis(),
            Uuid::new_v4().simple().to_string(),
        )
    }

    pub fn sign_at(
        secret: &str,
        method: &str,
        path: &str,
        body: &[u8],
        timestamp: i64,
        nonce: String,
    ) -> Self {
        let mac = mac_for(secret, method, path, body, timestamp, &nonce);
        Self {
            timestamp,
            signature: format!("{VERSION}={}", hex::encode(mac.finalize().into_bytes())),
            nonce,
        }
    }

    /// Constant-time check of `signature` against the request it claims to cover.
    pub fn verify(&self, secret: &str, method: &str, path: &str, body: &[u8]) -> bool {
        let Some(hex_sig) = self.signature.strip_prefix("v1=") else {
            return false;
        };
        let Ok(raw) = hex::decode(hex_sig) else {
            return false;
        };
        mac_for(secret, method, path, body, self.timestamp, &self.nonce)
            .verify_slice(&raw)
            .is_ok()
    }

    pub fn headers(&self) -> Result<HeaderMap, InvalidHeaderValue> {
        let mut headers = HeaderMap::new();
        headers.insert(SENDER_HEADER, HeaderValue::from_static(SENDER_ID));
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from(self.timestamp));
        headers.insert(NONCE_HEADER, HeaderValue::from_str(&self.nonce)?);
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&self.signature)?);
        Ok(headers)
    }
}

fn mac_for(
    secret: &str,
    method: &str,
    path: &str,
    body: &[u8],
    timestamp: i64,
    nonce: &str,
) -> HmacSha256 {
    let body_sha256 = hex::encode(Sha256::digest(body));
    let canonical = format!(
        "{VERSION}\n{SENDER_ID}\n{timestamp}\n{nonce}\n{}\n{path}\n{body_sha256}",
        method.to_ascii_uppercase()
    );
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "gateway-shared-secret";
    const TS: i64 = 1_767_225_600_000;

    fn fixed(body: &[u8]) -> WebhookSignature {
        WebhookSignature::sign_at(SECRET, "POST", "/v1/push", body, TS, "n-1".to_owned())
    }

    #[test]
    fn signature_matches_manual_hmac() {
        let body = br#"{"recipient":"tok-1"}"#;
        let canonical = format!(
            "v1\naqi-alert-service\n{TS}\nn-1\nPOST\n/v1/push\n{}",
            hex::encode(Sha256::digest(body))
        );
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(canonical.as_bytes());
        let expected = format!("v1={}", hex::encode(mac.finalize().into_bytes()));

        assert_eq!(fixed(body).signature, expected);
    }

    #[test]
    fn verify_accepts_own_signature_and_rejects_tampering() {
        let sig = fixed(b"{}");
        assert!(sig.verify(SECRET, "post", "/v1/push", b"{}"));
        assert!(!sig.verify(SECRET, "POST", "/v1/push", b"{ }"));
        assert!(!sig.verify(SECRET, "POST", "/v1/sms", b"{}"));
        assert!(!sig.verify("other-secret", "POST", "/v1/push", b"{}"));

        let replayed = WebhookSignature {
            timestamp: TS + 1,
            ..sig.clone()
        };
        assert!(!replayed.verify(SECRET, "POST", "/v1/push", b"{}"));

        let garbled = WebhookSignature {
            signature: "v1=zz".to_owned(),
            ..sig
        };
        assert!(!garbled.verify(SECRET, "POST", "/v1/push", b"{}"));
    }

    #[test]
    fn fresh_signatures_use_new_nonce() {
        let a = WebhookSignature::sign(SECRET, "POST", "/v1/push", b"{}");
        let b = WebhookSignature::sign(SECRET, "POST", "/v1/push", b"{}");
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn headers_carry_everything_but_the_secret() {
        let headers = fixed(b"{}").headers().unwrap();
        assert_eq!(headers[SENDER_HEADER], SENDER_ID);
        assert_eq!(headers[TIMESTAMP_HEADER], TS.to_string().as_str());
        assert_eq!(headers[NONCE_HEADER], "n-1");
        assert!(headers[SIGNATURE_HEADER].to_str().unwrap().starts_with("v1="));
        assert!(headers.values().all(|v| v.to_str().unwrap() != SECRET));
    }
}
