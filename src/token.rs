//! Capability token codec
//!
//! Invite tokens are the only authorization artifact: there is no
//! server-side record for a token, so the freshness window is the sole
//! replay defense. Wire format (bit-exact, six colon-delimited fields):
//!
//! ```text
//! profile:ttl:issuedAt:recipientDigest:notesDigest:signature
//! ```
//!
//! The signature is a lowercase hex HMAC-SHA256 over the first five
//! fields joined by `:`. The recipient/notes digests bind the token to
//! an out-of-band context without revealing it.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{GatewayError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Profiles a token may carry. Anything else fails verification.
pub const ALLOWED_PROFILES: &[&str] = &["dev", "debug", "secure-shell", "privileged"];

/// Maximum age of a token in seconds (replay defense).
pub const FRESHNESS_WINDOW_SECS: i64 = 300;

/// Sentinel digest for an absent recipient/notes field.
const DIGEST_ABSENT: &str = "none";

/// Truncated digest length in hex chars (6 bytes).
const DIGEST_LEN: usize = 12;

/// Parsed fields of a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFields {
    pub profile: String,
    pub ttl_seconds: i64,
    pub issued_at: i64,
    pub recipient_digest: String,
    pub notes_digest: String,
}

/// Why a token was rejected. Logged for observability; callers only
/// ever see accepted/rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Not exactly six colon-delimited fields.
    Malformed,
    /// TTL field is not a positive integer.
    BadTtl,
    /// Timestamp field is not an integer.
    BadTimestamp,
    /// Profile is not on the allow-list.
    UnknownProfile,
    /// Issued more than the freshness window ago.
    Expired,
    /// Signature mismatch.
    BadSignature,
}

impl TokenRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenRejection::Malformed => "malformed",
            TokenRejection::BadTtl => "bad_ttl",
            TokenRejection::BadTimestamp => "bad_timestamp",
            TokenRejection::UnknownProfile => "unknown_profile",
            TokenRejection::Expired => "expired",
            TokenRejection::BadSignature => "bad_signature",
        }
    }
}

/// Truncated one-way digest of an optional binding field.
fn short_digest(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => {
            let mut hasher = Sha256::new();
            hasher.update(v.as_bytes());
            hex::encode(hasher.finalize())[..DIGEST_LEN].to_string()
        }
        _ => DIGEST_ABSENT.to_string(),
    }
}

fn sign(secret: &str, payload: &str) -> String {
    // HMAC accepts keys of any length; new_from_slice only fails for
    // variable-output MACs, which Hmac<Sha256> is not.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Issue a signed invite token.
pub fn issue(
    secret: &str,
    profile: &str,
    ttl_seconds: i64,
    recipient: Option<&str>,
    notes: Option<&str>,
) -> Result<String> {
    if secret.is_empty() {
        return Err(GatewayError::Config("gateway secret is empty".to_string()));
    }
    if !ALLOWED_PROFILES.contains(&profile) {
        return Err(GatewayError::Config(format!("unknown profile: {profile}")));
    }
    if ttl_seconds <= 0 {
        return Err(GatewayError::Config(format!("ttl must be positive, got {ttl_seconds}")));
    }

    let issued_at = Utc::now().timestamp();
    let payload = format!(
        "{profile}:{ttl_seconds}:{issued_at}:{}:{}",
        short_digest(recipient),
        short_digest(notes),
    );
    let signature = sign(secret, &payload);
    Ok(format!("{payload}:{signature}"))
}

/// Verify a token against the current clock.
pub fn verify(secret: &str, token: &str) -> std::result::Result<TokenFields, TokenRejection> {
    verify_at(secret, token, Utc::now().timestamp())
}

/// Verify a token at an explicit point in time.
///
/// Fails closed on any defect and never panics, whatever the input.
pub fn verify_at(
    secret: &str,
    token: &str,
    now: i64,
) -> std::result::Result<TokenFields, TokenRejection> {
    let parts: Vec<&str> = token.split(':').collect();
    if parts.len() != 6 {
        return Err(TokenRejection::Malformed);
    }
    let (profile, ttl_str, ts_str, recipient_digest, notes_digest, signature) =
        (parts[0], parts[1], parts[2], parts[3], parts[4], parts[5]);

    let ttl_seconds: i64 = ttl_str.parse().map_err(|_| TokenRejection::BadTtl)?;
    if ttl_seconds <= 0 {
        return Err(TokenRejection::BadTtl);
    }
    let issued_at: i64 = ts_str.parse().map_err(|_| TokenRejection::BadTimestamp)?;

    if !ALLOWED_PROFILES.contains(&profile) {
        return Err(TokenRejection::UnknownProfile);
    }
    if now - issued_at > FRESHNESS_WINDOW_SECS {
        return Err(TokenRejection::Expired);
    }

    // Re-sign the original substrings, not re-serialized values, so the
    // check is over exactly the bytes the issuer signed.
    let payload = format!("{profile}:{ttl_str}:{ts_str}:{recipient_digest}:{notes_digest}");
    let expected = sign(secret, &payload);
    if expected.as_bytes().ct_eq(signature.as_bytes()).into() {
        Ok(TokenFields {
            profile: profile.to_string(),
            ttl_seconds,
            issued_at,
            recipient_digest: recipient_digest.to_string(),
            notes_digest: notes_digest.to_string(),
        })
    } else {
        Err(TokenRejection::BadSignature)
    }
}
