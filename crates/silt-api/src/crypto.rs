//! Cryptographic utilities for webhook signature verification.
//!
//! This module provides HMAC-SHA256 verification of crawl webhook
//! deliveries. Verification runs over the exact raw request bytes before
//! any JSON parsing, so unauthenticated payloads never reach the decoder.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "x-crawl-signature";

/// Signature verification failures.
///
/// Each failure condition is its own variant so responses can carry a
/// precise machine-readable code. All variants map to HTTP 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// No signature header on the request.
    Missing,
    /// Header present but not in `<algorithm>=<hex>` form.
    Malformed,
    /// Algorithm token other than `sha256`.
    UnsupportedAlgorithm(String),
    /// Digest did not match the computed HMAC.
    Mismatch,
}

impl SignatureError {
    /// Machine-readable code used in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing => "missing_signature",
            Self::Malformed => "malformed_signature",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::Mismatch => "signature_mismatch",
        }
    }
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "signature header missing"),
            Self::Malformed => {
                write!(f, "signature header is not in '<algorithm>=<hex>' form")
            }
            Self::UnsupportedAlgorithm(algorithm) => {
                write!(f, "unsupported signature algorithm: {algorithm}")
            }
            Self::Mismatch => write!(f, "signature mismatch"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Verifies a delivery signature against the raw request body.
///
/// The expected header value is `sha256=<hex>` where the digest is
/// HMAC-SHA256 of the body under the shared secret. The algorithm token is
/// matched case-insensitively and the digest comparison is constant time.
///
/// # Example
///
/// ```
/// use silt_api::crypto::{generate_signature, verify_signature};
///
/// let body = b"webhook payload";
/// let header = format!("sha256={}", generate_signature("my_secret", body));
///
/// assert!(verify_signature("my_secret", Some(&header), body).is_ok());
/// ```
///
/// # Errors
///
/// Returns the [`SignatureError`] for the first failed check: missing
/// header, malformed header, unsupported algorithm, or digest mismatch.
pub fn verify_signature(
    secret: &str,
    header: Option<&str>,
    body: &[u8],
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let provided = parse_signature_header(header)?;
    let expected = generate_signature(secret, body);

    if timing_safe_eq(provided, &expected) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Generates the HMAC-SHA256 hex digest a valid delivery must carry.
///
/// Senders put this in the signature header as `sha256=<digest>`. Exposed
/// so clients and tests sign payloads exactly the way the verifier checks
/// them.
pub fn generate_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts any key length");

    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Parses `<algorithm>=<hex>` and returns the hex digest part.
///
/// Only the `sha256` algorithm token is accepted, ignoring ASCII case.
fn parse_signature_header(header: &str) -> Result<&str, SignatureError> {
    let (algorithm, digest) = header.split_once('=').ok_or(SignatureError::Malformed)?;

    if !algorithm.eq_ignore_ascii_case("sha256") {
        return Err(SignatureError::UnsupportedAlgorithm(algorithm.to_string()));
    }

    Ok(digest)
}

/// Timing-safe string comparison to prevent timing attacks.
///
/// Uses constant-time comparison to avoid leaking information
/// about the expected digest through timing analysis.
fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    let mut result = 0u8;
    for (a_byte, b_byte) in a_bytes.iter().zip(b_bytes.iter()) {
        result |= a_byte ^ b_byte;
    }

    result == 0
}
