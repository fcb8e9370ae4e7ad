//! Identity assertion integration tests.
//!
//! Tests verify:
//! - Signed identity assertions are required when a secret is configured
//! - Valid, expired, forged and malformed assertions
//! - Unsigned identity is trusted when no secret is configured

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use dicom_ingest::format::dicom::TransferSyntax;
use dicom_ingest::server::auth::IdentityVerifier;
use dicom_ingest::{create_router, RouterConfig};

use super::test_utils::{gray_object, tracking_service, TrackingBlobStore};

const SECRET: &str = "gateway-secret";

fn signed_router() -> Router {
    create_router(
        tracking_service(TrackingBlobStore::new()),
        RouterConfig::new()
            .with_identity_secret(SECRET)
            .with_tracing(false),
    )
}

fn upload(headers: &[(&str, String)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/images?patient_id=patient-7");
    for (name, value) in headers {
        builder = builder.header(*name, value.as_str());
    }
    builder
        .body(Body::from(gray_object(
            TransferSyntax::ExplicitVrLittleEndian,
            2,
            2,
            1,
        )))
        .unwrap()
}

fn signed_headers(user: &str, signer: &str, ttl: Duration) -> Vec<(&'static str, String)> {
    let (signature, expiry) = IdentityVerifier::new(SECRET).sign(signer, ttl);
    vec![
        ("x-user-id", user.to_string()),
        ("x-identity-sig", signature),
        ("x-identity-exp", expiry.to_string()),
    ]
}

async fn error_type(response: axum::response::Response) -> String {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    json["error"].as_str().unwrap_or_default().to_string()
}

// =============================================================================
// Signed Assertions
// =============================================================================

#[tokio::test]
async fn test_valid_signature_is_accepted() {
    let headers = signed_headers("dr-who", "dr-who", Duration::from_secs(300));
    let response = signed_router().oneshot(upload(&headers)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_missing_signature_is_unauthorized() {
    let headers = vec![("x-user-id", "dr-who".to_string())];
    let response = signed_router().oneshot(upload(&headers)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_type(response).await, "missing_signature");
}

#[tokio::test]
async fn test_signature_for_other_user_is_rejected() {
    let headers = signed_headers("mallory", "dr-who", Duration::from_secs(300));
    let response = signed_router().oneshot(upload(&headers)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_type(response).await, "invalid_signature");
}

#[tokio::test]
async fn test_expired_assertion_is_rejected() {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let expiry = now - 60;
    let signature = IdentityVerifier::new(SECRET).sign_with_expiry("dr-who", expiry);
    let headers = vec![
        ("x-user-id", "dr-who".to_string()),
        ("x-identity-sig", signature),
        ("x-identity-exp", expiry.to_string()),
    ];

    let response = signed_router().oneshot(upload(&headers)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_type(response).await, "identity_expired");
}

#[tokio::test]
async fn test_signature_from_other_secret_is_rejected() {
    let (signature, expiry) =
        IdentityVerifier::new("other-secret").sign("dr-who", Duration::from_secs(300));
    let headers = vec![
        ("x-user-id", "dr-who".to_string()),
        ("x-identity-sig", signature),
        ("x-identity-exp", expiry.to_string()),
    ];

    let response = signed_router().oneshot(upload(&headers)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_headers_are_bad_requests() {
    let mut headers = signed_headers("dr-who", "dr-who", Duration::from_secs(300));
    headers[2].1 = "tomorrow".to_string();
    let response = signed_router().oneshot(upload(&headers)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_type(response).await, "invalid_expiry_format");

    let mut headers = signed_headers("dr-who", "dr-who", Duration::from_secs(300));
    headers[1].1 = "zz-not-hex".to_string();
    let response = signed_router().oneshot(upload(&headers)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_type(response).await, "invalid_signature_format");
}

// =============================================================================
// Unsigned Mode
// =============================================================================

#[tokio::test]
async fn test_unsigned_identity_trusted_without_secret() {
    let router = create_router(
        tracking_service(TrackingBlobStore::new()),
        RouterConfig::new().with_tracing(false),
    );
    let headers = vec![("x-user-id", "dr-who".to_string())];

    let response = router.oneshot(upload(&headers)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}
