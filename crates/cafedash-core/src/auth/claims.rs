//! Unverified bearer token decoding.
//!
//! Tokens are three dot-delimited segments (`header.payload.signature`).
//! Only the payload is read here, and only to decide when a refresh is due.
//! Nothing in this module verifies a signature: the server stays the
//! authority on whether a token is actually valid.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default skew buffer applied by [`is_expired`], in seconds.
pub const DEFAULT_SKEW_SECS: i64 = 60;

/// Accepts base64url payloads with or without trailing `=` padding.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Token is empty")]
    Empty,

    #[error("Token has no payload segment")]
    MissingPayload,

    #[error("Token payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Token payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Token payload has no expiry claim")]
    MissingExpiry,
}

/// Claims read from a token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DecodedClaims {
    pub subject_id: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub token_type: Option<String>,
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub issued_at: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub expires_at: DateTime<Utc>,
}

impl DecodedClaims {
    /// Time left before the token expires, ignoring any skew buffer.
    /// Negative once the token has expired.
    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }
}

// Raw payload as issued by the server. `user_id` is numeric for the
// backend's default user model but may be a string for others.
#[derive(Debug, Deserialize)]
struct RawPayload {
    exp: Option<i64>,
    iat: Option<i64>,
    user_id: Option<serde_json::Value>,
    sub: Option<serde_json::Value>,
    username: Option<String>,
    email: Option<String>,
    token_type: Option<String>,
}

fn value_to_id(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Decode the payload segment of a bearer token.
pub fn decode(token: &str) -> Result<DecodedClaims, DecodeError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut segments = token.split('.');
    let _header = segments.next();
    let payload = segments.next().ok_or(DecodeError::MissingPayload)?;

    let bytes = PAYLOAD_ENGINE.decode(payload)?;
    let raw: RawPayload = serde_json::from_slice(&bytes)?;

    let expires_at = raw
        .exp
        .and_then(timestamp)
        .ok_or(DecodeError::MissingExpiry)?;

    Ok(DecodedClaims {
        subject_id: raw.user_id.or(raw.sub).and_then(value_to_id),
        username: raw.username,
        email: raw.email,
        token_type: raw.token_type,
        issued_at: raw.iat.and_then(timestamp),
        expires_at,
    })
}

/// True if the token cannot be decoded or expires within `skew_secs` of `now`.
pub fn is_expired_at(token: &str, now: DateTime<Utc>, skew_secs: i64) -> bool {
    match decode(token) {
        Ok(claims) => match Duration::try_seconds(skew_secs)
            .and_then(|skew| now.checked_add_signed(skew))
        {
            Some(deadline) => claims.expires_at <= deadline,
            // A skew past the representable range covers every token.
            None => true,
        },
        Err(e) => {
            tracing::debug!(error = %e, "Treating undecodable token as expired");
            true
        }
    }
}

/// True if the token cannot be decoded or expires within `skew_secs` from now.
pub fn is_expired(token: &str, skew_secs: i64) -> bool {
    is_expired_at(token, Utc::now(), skew_secs)
}

/// True if a decodable token expires within `window` from now.
/// Undecodable tokens report false; they are handled by [`is_expired`].
pub fn expires_within(token: &str, window: Duration) -> bool {
    decode(token)
        .map(|claims| match Utc::now().checked_add_signed(window) {
            Some(deadline) => claims.expires_at <= deadline,
            None => true,
        })
        .unwrap_or(false)
}
