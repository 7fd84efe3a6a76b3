//! `X-Hub-Signature-256` verification for inbound webhook deliveries.
//!
//! The digest is an HMAC-SHA256 over the raw request bytes, keyed with the
//! app secret, sent as `sha256=<hex>`. Verification runs before the body is
//! decoded so unauthenticated payloads are never parsed.

use crate::error::AuthFailure;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

/// Preferred signature header.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
/// Legacy header name still sent by some provider configurations.
pub const LEGACY_SIGNATURE_HEADER: &str = "X-Hub-Signature";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify a webhook signature header against the raw body.
/// Returns true if the signature is valid, false otherwise.
pub fn verify_signature(app_secret: &str, body: &[u8], signature_header: &str) -> bool {
    // Signature format: "sha256=<hex_signature>"
    let Some(hex_sig) = signature_header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    // Constant-time comparison
    mac.verify_slice(&expected).is_ok()
}

/// Compute the header value a provider would send for `body`.
pub fn sign_body(app_secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts any key length"));
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Pull the signature out of the request headers, preferring the SHA-256 header.
pub fn signature_from_headers(headers: &HeaderMap) -> Option<&str> {
    [SIGNATURE_HEADER, LEGACY_SIGNATURE_HEADER]
        .into_iter()
        .find_map(|name| headers.get(name).and_then(|v| v.to_str().ok()))
        .filter(|value| !value.trim().is_empty())
}

/// How a delivery passed authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Verified,
    /// Unsigned deliveries are allowed by configuration.
    Bypassed,
}

/// Authenticates delivery bodies with the configured app secret.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    app_secret: Option<Arc<str>>,
    allow_unsigned: bool,
}

impl SignatureVerifier {
    pub fn new(app_secret: Option<&str>, allow_unsigned: bool) -> Self {
        let app_secret = app_secret
            .filter(|secret| !secret.trim().is_empty())
            .map(Arc::from);
        Self {
            app_secret,
            allow_unsigned,
        }
    }

    /// Check `body` against `signature`. Fails closed when no secret is configured.
    pub fn check(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<SignatureCheck, AuthFailure> {
        if self.allow_unsigned {
            return Ok(SignatureCheck::Bypassed);
        }

        let Some(signature) = signature else {
            return Err(AuthFailure::Missing);
        };
        let Some(ref secret) = self.app_secret else {
            return Err(AuthFailure::Invalid);
        };

        if verify_signature(secret, body, signature) {
            Ok(SignatureCheck::Verified)
        } else {
            Err(AuthFailure::Invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn compute_signature_hex(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn signature_matches_known_vector() {
        let header = sign_body("key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            header,
            "sha256=f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn signature_valid() {
        let secret = "test_secret_key_12345";
        let body = b"test body content";
        assert!(verify_signature(secret, body, &sign_body(secret, body)));
    }

    #[test]
    fn signature_invalid_wrong_secret() {
        let body = b"test body content";
        let header = sign_body("wrong_secret_key_xyz", body);
        assert!(!verify_signature("correct_secret_key_abc", body, &header));
    }

    #[test]
    fn signature_invalid_tampered_body() {
        let secret = "test_secret_key_12345";
        let header = sign_body(secret, b"original body");
        assert!(!verify_signature(secret, b"tampered body", &header));
    }

    #[test]
    fn signature_requires_prefix() {
        let secret = "test_secret_key_12345";
        let body = b"test body";
        let hex_sig = compute_signature_hex(secret, body);

        assert!(!verify_signature(secret, body, &hex_sig));
        assert!(!verify_signature(secret, body, &format!("SHA256={hex_sig}")));
        assert!(verify_signature(secret, body, &format!("sha256={hex_sig}")));
    }

    #[test]
    fn signature_accepts_uppercase_hex() {
        let secret = "s";
        let body = b"{}";
        let hex_sig = compute_signature_hex(secret, body).to_uppercase();
        assert!(verify_signature(secret, body, &format!("sha256={hex_sig}")));
    }

    #[test]
    fn signature_rejects_malformed_hex() {
        let secret = "test_secret_key_12345";
        assert!(!verify_signature(secret, b"x", ""));
        assert!(!verify_signature(secret, b"x", "sha256=not_valid_hex_zzz"));

        let hex_sig = compute_signature_hex(secret, b"x");
        assert!(!verify_signature(secret, b"x", &format!("sha256={}", &hex_sig[..32])));
        assert!(!verify_signature(
            secret,
            b"x",
            &format!("sha256={hex_sig}deadbeef")
        ));
    }

    #[test]
    fn signature_covers_empty_and_unicode_bodies() {
        let secret = "test_secret_key_12345";
        assert!(verify_signature(secret, b"", &sign_body(secret, b"")));
        let body = "Muraho 🦀 Rwanda".as_bytes();
        assert!(verify_signature(secret, body, &sign_body(secret, body)));
    }

    #[test]
    fn headers_prefer_sha256_variant() {
        let mut headers = HeaderMap::new();
        headers.insert("x-hub-signature", HeaderValue::from_static("sha256=legacy"));
        assert_eq!(signature_from_headers(&headers), Some("sha256=legacy"));

        headers.insert("x-hub-signature-256", HeaderValue::from_static("sha256=new"));
        assert_eq!(signature_from_headers(&headers), Some("sha256=new"));
    }

    #[test]
    fn headers_ignore_blank_signature() {
        let mut headers = HeaderMap::new();
        headers.insert("x-hub-signature-256", HeaderValue::from_static("  "));
        assert_eq!(signature_from_headers(&headers), None);
    }

    #[test]
    fn verifier_distinguishes_missing_and_invalid() {
        let verifier = SignatureVerifier::new(Some("secret"), false);
        let body = br#"{"entry":[]}"#;

        assert_eq!(verifier.check(body, None), Err(AuthFailure::Missing));
        assert_eq!(
            verifier.check(body, Some("sha256=00")),
            Err(AuthFailure::Invalid)
        );
        assert_eq!(
            verifier.check(body, Some(&sign_body("secret", body))),
            Ok(SignatureCheck::Verified)
        );
    }

    #[test]
    fn verifier_without_secret_fails_closed() {
        let verifier = SignatureVerifier::new(Some("   "), false);
        let body = b"{}";
        assert_eq!(
            verifier.check(body, Some(&sign_body("", body))),
            Err(AuthFailure::Invalid)
        );
    }

    #[test]
    fn verifier_keys_with_secret_bytes_as_configured() {
        let verifier = SignatureVerifier::new(Some(" padded-secret "), false);
        let body = b"{\"object\":\"whatsapp_business_account\"}";
        assert_eq!(
            verifier.check(body, Some(&sign_body(" padded-secret ", body))),
            Ok(SignatureCheck::Verified)
        );
        assert_eq!(
            verifier.check(body, Some(&sign_body("padded-secret", body))),
            Err(AuthFailure::Invalid)
        );
    }

    #[test]
    fn verifier_bypass_when_unsigned_allowed() {
        let verifier = SignatureVerifier::new(None, true);
        assert_eq!(verifier.check(b"{}", None), Ok(SignatureCheck::Bypassed));
    }
}
