//! `Stripe-Signature` header verification.
//!
//! The header looks like `t=1718000000,v1=<hex>,v1=<hex>,v0=<hex>`. Each `v1` is an
//! HMAC-SHA256 of `"<t>.<raw body>"` under the endpoint's webhook secret; any one matching is
//! enough. Only `v1` is honoured.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing Stripe-Signature header")]
    MissingHeader,
    #[error("malformed Stripe-Signature header")]
    MalformedHeader,
    #[error("no v1 signature matches the payload")]
    Mismatch,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("invalid webhook secret")]
    InvalidKey,
}

#[derive(Clone)]
pub struct WebhookVerifier {
    key: HmacSha256,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<SignatureHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for item in header.split(',') {
        let Some((key, value)) = item.trim().split_once('=') else {
            return Err(SignatureError::MalformedHeader);
        };
        match key {
            "t" => {
                timestamp = Some(value.parse().map_err(|_| SignatureError::MalformedHeader)?);
            }
            // Undecodable entries cannot match, so they are dropped rather than failing the lot.
            "v1" => signatures.extend(hex::decode(value).ok()),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }
    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

impl WebhookVerifier {
    pub fn new(secret: &[u8], tolerance_secs: i64) -> Result<Self, SignatureError> {
        let key = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self {
            key,
            tolerance_secs,
        })
    }

    fn mac(&self, timestamp: i64, body: &[u8]) -> HmacSha256 {
        let mut mac = self.key.clone();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        mac
    }

    /// Header value for `body` signed at `at`. Used to build test fixtures and local replays.
    pub fn sign(&self, body: &[u8], at: DateTime<Utc>) -> String {
        let timestamp = at.timestamp();
        let signature = hex::encode(self.mac(timestamp, body).finalize().into_bytes());
        format!("t={timestamp},v1={signature}")
    }

    pub fn verify(&self, header: Option<&str>, body: &[u8], now: DateTime<Utc>) -> Result<(), SignatureError> {
        let header = parse_header(header.ok_or(SignatureError::MissingHeader)?)?;

        let matched = header
            .signatures
            .iter()
            .any(|candidate| self.mac(header.timestamp, body).verify_slice(candidate).is_ok());
        if !matched {
            return Err(SignatureError::Mismatch);
        }
        if (now.timestamp() - header.timestamp).abs() > self.tolerance_secs {
            return Err(SignatureError::Expired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rstest::rstest;

    use super::*;

    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(b"whsec_test", 300).expect("valid key")
    }

    #[test]
    fn freshly_signed_body_verifies() {
        let now = Utc::now();
        let header = verifier().sign(BODY, now);
        assert_eq!(verifier().verify(Some(&header), BODY, now), Ok(()));
    }

    #[test]
    fn any_matching_v1_is_accepted() {
        let now = Utc::now();
        let good = verifier().sign(BODY, now);
        let (_, good_sig) = good.split_once(",v1=").expect("has v1");
        let header = format!("t={},v1={},v1={good_sig},v0=abc", now.timestamp(), "00".repeat(32));
        assert_eq!(verifier().verify(Some(&header), BODY, now), Ok(()));
    }

    #[test]
    fn tampered_body_is_a_mismatch() {
        let now = Utc::now();
        let header = verifier().sign(BODY, now);
        assert_eq!(
            verifier().verify(Some(&header), b"{\"id\":\"evt_2\"}", now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn other_secret_is_a_mismatch() {
        let now = Utc::now();
        let header = WebhookVerifier::new(b"whsec_other", 300)
            .expect("valid key")
            .sign(BODY, now);
        assert_eq!(verifier().verify(Some(&header), BODY, now), Err(SignatureError::Mismatch));
    }

    #[test]
    fn stale_signature_is_rejected() {
        let now = Utc::now();
        let header = verifier().sign(BODY, now - Duration::seconds(301));
        assert_eq!(verifier().verify(Some(&header), BODY, now), Err(SignatureError::Expired));
    }

    #[rstest]
    #[case("")]
    #[case("v1=abcd")]
    #[case("t=abc,v1=abcd")]
    #[case("t=1718000000")]
    #[case("t=1718000000,v1=not-hex")]
    fn malformed_headers(#[case] header: &str) {
        assert_eq!(
            verifier().verify(Some(header), BODY, Utc::now()),
            Err(SignatureError::MalformedHeader)
        );
    }

    #[test]
    fn missing_header() {
        assert_eq!(verifier().verify(None, BODY, Utc::now()), Err(SignatureError::MissingHeader));
    }
}
