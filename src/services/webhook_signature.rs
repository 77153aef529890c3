//! Webhook payload signing and verification.
//!
//! Signatures are HMAC-SHA256 over `"<t>.<body>"` where `t` is the unix
//! timestamp embedded in the header. Header format:
//! `t=<unix-seconds>,v1=<hex-digest>`. Verification recomputes the digest
//! and compares in constant time; timestamps outside the tolerance are
//! rejected as stale before any comparison.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::errors::{CoreError, CoreResult};

type HmacSha256 = Hmac<Sha256>;

/// Header name carrying the signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Default staleness tolerance.
pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

/// Sign a body at the given unix timestamp.
pub fn sign(body: &str, secret: &str, timestamp: i64) -> String {
    let digest = compute_digest(body, secret, timestamp);
    format!("t={timestamp},v1={digest}")
}

/// Verify a signature header against a body.
///
/// Fails when the header is malformed, the timestamp is older than
/// `tolerance_seconds` relative to `now`, or the digest does not match.
pub fn verify(
    body: &str,
    header: &str,
    secret: &str,
    now: i64,
    tolerance_seconds: i64,
) -> CoreResult<()> {
    let (timestamp, provided) = parse_header(header)?;

    if (now - timestamp).abs() > tolerance_seconds {
        return Err(CoreError::Validation(format!(
            "signature timestamp {timestamp} outside tolerance of {tolerance_seconds}s"
        )));
    }

    let expected = compute_digest(body, secret, timestamp);
    let matches: bool = expected.as_bytes().ct_eq(provided.as_bytes()).into();
    if !matches {
        return Err(CoreError::Validation("signature mismatch".into()));
    }
    Ok(())
}

fn compute_digest(body: &str, secret: &str, timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn parse_header(header: &str) -> CoreResult<(i64, String)> {
    let mut timestamp = None;
    let mut digest = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    CoreError::Validation(format!("bad signature timestamp '{value}'"))
                })?);
            }
            Some(("v1", value)) => digest = Some(value.to_string()),
            _ => {}
        }
    }

    match (timestamp, digest) {
        (Some(t), Some(d)) => Ok((t, d)),
        _ => Err(CoreError::Validation(format!(
            "malformed signature header '{header}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    #[test]
    fn sign_then_verify_round_trips() {
        let body = r#"{"type":"mission.completed","data":{"id":"m1"}}"#;
        let now = 1_700_000_000;
        let header = sign(body, SECRET, now);
        assert!(header.starts_with(&format!("t={now},v1=")));
        verify(body, &header, SECRET, now, DEFAULT_TOLERANCE_SECONDS).unwrap();
    }

    #[test]
    fn any_body_mutation_fails_verification() {
        let body = r#"{"amount": 100}"#;
        let now = 1_700_000_000;
        let header = sign(body, SECRET, now);

        let tampered = r#"{"amount": 900}"#;
        assert!(verify(tampered, &header, SECRET, now, 300).is_err());
    }

    #[test]
    fn one_byte_header_mutation_fails_verification() {
        let body = "payload";
        let now = 1_700_000_000;
        let header = sign(body, SECRET, now);

        let mut bytes = header.into_bytes();
        let last = bytes.len() - 1;
        bytes[last] = if bytes[last] == b'0' { b'1' } else { b'0' };
        let mutated = String::from_utf8(bytes).unwrap();
        assert!(verify(body, &mutated, SECRET, now, 300).is_err());
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let body = "payload";
        let now = 1_700_000_000;
        let header = sign(body, SECRET, now);
        assert!(verify(body, &header, "whsec_other", now, 300).is_err());
    }

    #[test]
    fn stale_timestamp_rejected() {
        let body = "payload";
        let signed_at = 1_700_000_000;
        let header = sign(body, SECRET, signed_at);

        // Five minutes and one second later.
        assert!(verify(body, &header, SECRET, signed_at + 301, 300).is_err());
        // Still within tolerance.
        verify(body, &header, SECRET, signed_at + 299, 300).unwrap();
    }

    #[test]
    fn malformed_headers_rejected() {
        for bad in ["", "t=123", "v1=abc", "t=abc,v1=def", "nonsense"] {
            assert!(verify("body", bad, SECRET, 0, 300).is_err(), "accepted {bad:?}");
        }
    }
}
