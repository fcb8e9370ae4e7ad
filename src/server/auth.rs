//! Identity assertions for the ingestion API.
//!
//! Requests reach this service through an authenticating gateway that names
//! the acting user in the `X-User-Id` header. When an identity secret is
//! configured, the gateway must also sign that assertion:
//!
//! ```text
//! X-Identity-Sig = hex(HMAC-SHA256(secret, "{user_id}?exp={exp}"))
//! X-Identity-Exp = {exp}   (Unix epoch seconds)
//! ```
//!
//! # Security Properties
//!
//! - **User binding**: the signature covers the user id, so a signed header
//!   cannot be replayed for another user
//! - **Time-limited**: assertions expire at `exp`
//! - **Constant-time comparison**: signatures are compared with `subtle`
//!
//! # Example
//!
//! ```rust
//! use dicom_ingest::server::auth::IdentityVerifier;
//! use std::time::Duration;
//!
//! let verifier = IdentityVerifier::new("gateway-secret");
//! let (signature, expiry) = verifier.sign("dr-who", Duration::from_secs(300));
//! assert!(verifier.verify("dr-who", &signature, expiry).is_ok());
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::handlers::ErrorResponse;
use crate::lineage::UserId;

/// Header naming the acting user.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the assertion expiry.
pub const IDENTITY_EXP_HEADER: &str = "x-identity-exp";

/// Header carrying the hex-encoded assertion signature.
pub const IDENTITY_SIG_HEADER: &str = "x-identity-sig";

// =============================================================================
// Types
// =============================================================================

type HmacSha256 = Hmac<Sha256>;

/// Authentication error types.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// No `X-User-Id` header
    MissingIdentity,

    /// Signature header is missing
    MissingSignature,

    /// Expiry header is missing
    MissingExpiry,

    /// The assertion has expired
    Expired { expired_at: u64, current_time: u64 },

    /// Signature does not match
    InvalidSignature,

    /// Signature is not valid hex
    InvalidSignatureFormat,

    /// Expiry is not a valid integer
    InvalidExpiryFormat,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingIdentity => write!(f, "Missing {} header", USER_ID_HEADER),
            AuthError::MissingSignature => write!(f, "Missing identity signature"),
            AuthError::MissingExpiry => write!(f, "Missing identity expiry"),
            AuthError::Expired {
                expired_at,
                current_time,
            } => write!(
                f,
                "Identity assertion expired at {} (current time: {})",
                expired_at, current_time
            ),
            AuthError::InvalidSignature => write!(f, "Invalid identity signature"),
            AuthError::InvalidSignatureFormat => write!(f, "Invalid signature format"),
            AuthError::InvalidExpiryFormat => write!(f, "Invalid expiry format"),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            AuthError::MissingIdentity => (StatusCode::UNAUTHORIZED, "missing_identity"),
            AuthError::MissingSignature => (StatusCode::UNAUTHORIZED, "missing_signature"),
            AuthError::MissingExpiry => (StatusCode::UNAUTHORIZED, "missing_expiry"),
            AuthError::Expired { .. } => (StatusCode::UNAUTHORIZED, "identity_expired"),
            AuthError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            AuthError::InvalidSignatureFormat => {
                (StatusCode::BAD_REQUEST, "invalid_signature_format")
            }
            AuthError::InvalidExpiryFormat => (StatusCode::BAD_REQUEST, "invalid_expiry_format"),
        };
        let message = self.to_string();

        // A bad signature may be forged; everything else is routine
        if matches!(self, AuthError::InvalidSignature) {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Authentication failed: {}",
                message
            );
        } else {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Authentication failed: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Identity Verifier
// =============================================================================

/// Verifies gateway-signed identity assertions using HMAC-SHA256.
#[derive(Clone)]
pub struct IdentityVerifier {
    secret_key: Vec<u8>,
}

impl IdentityVerifier {
    pub fn new(secret_key: impl AsRef<[u8]>) -> Self {
        Self {
            secret_key: secret_key.as_ref().to_vec(),
        }
    }

    /// Sign an assertion for `user_id` valid for `ttl`.
    ///
    /// Returns the hex-encoded signature and the expiry timestamp.
    pub fn sign(&self, user_id: &str, ttl: Duration) -> (String, u64) {
        let expiry = now() + ttl.as_secs();
        (self.sign_with_expiry(user_id, expiry), expiry)
    }

    /// Sign an assertion for `user_id` expiring at `expiry`.
    pub fn sign_with_expiry(&self, user_id: &str, expiry: u64) -> String {
        hex::encode(self.mac(user_id, expiry).finalize().into_bytes())
    }

    /// Verify an assertion.
    pub fn verify(&self, user_id: &str, signature: &str, expiry: u64) -> Result<(), AuthError> {
        let current_time = now();
        if current_time > expiry {
            return Err(AuthError::Expired {
                expired_at: expiry,
                current_time,
            });
        }

        let provided = hex::decode(signature).map_err(|_| AuthError::InvalidSignatureFormat)?;
        let expected = self.mac(user_id, expiry).finalize().into_bytes();

        if provided.ct_eq(expected.as_slice()).into() {
            Ok(())
        } else {
            Err(AuthError::InvalidSignature)
        }
    }

    fn mac(&self, user_id: &str, expiry: u64) -> HmacSha256 {
        let mut mac = match HmacSha256::new_from_slice(&self.secret_key) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
        };
        mac.update(signature_base(user_id, expiry).as_bytes());
        mac
    }
}

fn signature_base(user_id: &str, expiry: u64) -> String {
    format!("{}?exp={}", user_id, expiry)
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

// =============================================================================
// Axum Integration
// =============================================================================

/// Axum middleware verifying signed identity assertions.
///
/// Applied only when an identity secret is configured.
pub async fn identity_middleware(
    State(verifier): State<IdentityVerifier>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let headers = request.headers();
    let user_id = header(headers, USER_ID_HEADER).ok_or(AuthError::MissingIdentity)?;
    let signature = header(headers, IDENTITY_SIG_HEADER).ok_or(AuthError::MissingSignature)?;
    let expiry = header(headers, IDENTITY_EXP_HEADER)
        .ok_or(AuthError::MissingExpiry)?
        .parse::<u64>()
        .map_err(|_| AuthError::InvalidExpiryFormat)?;

    verifier.verify(user_id, signature, expiry)?;

    Ok(next.run(request).await)
}

/// The acting user, taken from `X-User-Id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub UserId);

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header(&parts.headers, USER_ID_HEADER)
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(|user| Identity(UserId::new(user)))
            .ok_or(AuthError::MissingIdentity)
    }
}

// =============================================================================
// Tests
// =============================================================================
