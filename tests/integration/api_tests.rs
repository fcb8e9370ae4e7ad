//! API integration tests for uploads, retrieval and error handling.
//!
//! Tests verify:
//! - Upload responses (201 complete, 207 partial, 422 unprocessable)
//! - Fetching PNG artifacts and stored source objects
//! - Metadata and derived-image listings
//! - HTTP response codes, headers and error bodies

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;

use dicom_ingest::format::dicom::TransferSyntax;
use dicom_ingest::ingest::{AccessDecision, AuthorizationPolicy, IngestService, Role};
use dicom_ingest::lineage::{PatientId, UserId};
use dicom_ingest::{create_router, RouterConfig};

use super::test_utils::{
    decode_png, gray_object, is_valid_png, rle_object, tracking_service, TrackingBlobStore,
    PATIENT_NAME,
};

fn router() -> Router {
    create_router(
        tracking_service(TrackingBlobStore::new()),
        RouterConfig::new().with_tracing(false),
    )
}

fn upload(patient: &str, body: Bytes) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/images?patient_id={}", patient))
        .header("x-user-id", "dr-who")
        .header("content-type", "application/dicom")
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", "dr-who")
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// Upload `data` and return the JSON outcome.
async fn ingest(router: &Router, data: Bytes) -> serde_json::Value {
    let response = router
        .clone()
        .oneshot(upload("patient-7", data))
        .await
        .unwrap();
    assert!(response.status().is_success());
    json_body(response).await
}

// =============================================================================
// Uploads
// =============================================================================

#[tokio::test]
async fn test_upload_complete_returns_created() {
    let router = router();
    let data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 8, 8, 2);

    let response = router.oneshot(upload("patient-7", data)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = json_body(response).await;
    assert_eq!(json["source"]["patient_id"], "patient-7");
    assert_eq!(json["source"]["uploaded_by"], "dr-who");
    assert_eq!(json["source"]["status"]["state"], "complete");
    assert_eq!(json["derived"].as_array().unwrap().len(), 2);
    assert_eq!(json["succeeded_frames"], serde_json::json!([1, 2]));
    assert!(json["failure"].is_null());
}

#[tokio::test]
async fn test_upload_partial_returns_multi_status() {
    let router = router();

    let response = router
        .oneshot(upload("patient-7", rle_object(4, 4, 5, &[3])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);

    let json = json_body(response).await;
    assert_eq!(json["derived"].as_array().unwrap().len(), 2);
    assert_eq!(json["failure"]["frame_number"], 3);
    assert_eq!(json["source"]["status"]["state"], "partially_complete");
    assert_eq!(json["source"]["status"]["failed_frame"], 3);
}

#[tokio::test]
async fn test_upload_not_dicom_is_unprocessable() {
    let router = router();

    let response = router
        .oneshot(upload("patient-7", Bytes::from_static(b"GIF89a")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let json = json_body(response).await;
    assert_eq!(json["error"], "unprocessable_object");
    assert_eq!(json["stage"], "decode");
    assert!(json.get("frame").is_none());
    assert!(json["source_image_id"].is_string());
}

#[tokio::test]
async fn test_upload_without_patient_is_bad_request() {
    let router = router();
    let request = Request::builder()
        .method("POST")
        .uri("/images")
        .header("x-user-id", "dr-who")
        .body(Body::from(gray_object(
            TransferSyntax::ExplicitVrLittleEndian,
            2,
            2,
            1,
        )))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "missing_parameter");
}

#[tokio::test]
async fn test_upload_without_identity_is_unauthorized() {
    let router = router();
    let request = Request::builder()
        .method("POST")
        .uri("/images?patient_id=patient-7")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "missing_identity");
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let router = create_router(
        tracking_service(TrackingBlobStore::new()),
        RouterConfig::new().with_max_upload_bytes(64).with_tracing(false),
    );
    let data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 16, 16, 1);

    let response = router.oneshot(upload("patient-7", data)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

// =============================================================================
// Authorization
// =============================================================================

/// Policy that admits clinicians of one patient only.
struct CareTeam {
    patient: PatientId,
}

#[async_trait]
impl AuthorizationPolicy for CareTeam {
    async fn check(&self, _user: &UserId, roles: &[Role], patient: &PatientId) -> AccessDecision {
        if patient == &self.patient && roles.contains(&Role::Clinician) {
            AccessDecision::Allow
        } else {
            AccessDecision::Deny(format!("not on the care team of {}", patient))
        }
    }
}

#[tokio::test]
async fn test_denied_upload_is_forbidden_and_stores_nothing() {
    let store = TrackingBlobStore::new();
    let service = IngestService::new(
        store.clone(),
        Arc::new(CareTeam {
            patient: PatientId::new("patient-7"),
        }),
    );
    let router = create_router(service, RouterConfig::new().with_tracing(false));

    let data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 2, 2, 1);
    let response = router.oneshot(upload("patient-8", data)).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = json_body(response).await;
    assert_eq!(json["error"], "access_denied");
    assert!(json.get("source_image_id").is_none());
    assert!(store.put_keys().await.is_empty());
}

// =============================================================================
// Retrieval
// =============================================================================

#[tokio::test]
async fn test_fetch_derived_png_uses_cache() {
    let router = router();
    let outcome = ingest(
        &router,
        gray_object(TransferSyntax::ExplicitVrLittleEndian, 8, 8, 1),
    )
    .await;
    let derived_id = outcome["derived"][0]["id"].as_str().unwrap().to_string();
    let uri = format!("/images/{}", derived_id);

    let first = router.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers().get("content-type").unwrap(), "image/png");
    assert_eq!(
        first.headers().get("cache-control").unwrap(),
        "private, max-age=3600"
    );
    assert_eq!(first.headers().get("x-artifact-cache-hit").unwrap(), "false");

    let body = first.into_body().collect().await.unwrap().to_bytes();
    assert!(is_valid_png(&body));
    assert_eq!(decode_png(&body).width(), 8);

    let second = router.oneshot(get(&uri)).await.unwrap();
    assert_eq!(second.headers().get("x-artifact-cache-hit").unwrap(), "true");
    let cached = second.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(cached, body);
}

#[tokio::test]
async fn test_fetch_source_returns_dicom() {
    let router = router();
    let data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 1);
    let outcome = ingest(&router, data.clone()).await;
    let source_id = outcome["source"]["id"].as_str().unwrap();

    let response = router
        .oneshot(get(&format!("/images/{}", source_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/dicom"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, data);
}

#[tokio::test]
async fn test_fetch_unknown_and_invalid_ids() {
    let router = router();

    let response = router
        .clone()
        .oneshot(get("/images/6f1c1c9e-7f5c-4d0a-9a55-6a3b8a5b2c11"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "not_found");

    let response = router.oneshot(get("/images/not-a-uuid")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_parameter");
}

#[tokio::test]
async fn test_metadata_filtered_and_unfiltered() {
    let router = router();
    let outcome = ingest(
        &router,
        gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 1),
    )
    .await;
    let source_id = outcome["source"]["id"].as_str().unwrap();

    let response = router
        .clone()
        .oneshot(get(&format!(
            "/images/{}/metadata?tags=(0010,0010)",
            source_id
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let filtered = json_body(response).await;
    let filtered = filtered.as_array().unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0]["tag"], "(0010,0010)");
    assert_eq!(filtered[0]["value"][0], PATIENT_NAME);

    let response = router
        .clone()
        .oneshot(get(&format!("/images/{}/metadata", source_id)))
        .await
        .unwrap();
    let all = json_body(response).await;
    let all = all.as_array().unwrap();
    assert!(all.len() > 1);
    assert!(all.iter().all(|record| record["tag"] != "(7FE0,0010)"));

    let response = router
        .oneshot(get(&format!("/images/{}/metadata?tags=bogus", source_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_derived_listing_in_frame_order() {
    let router = router();
    let outcome = ingest(
        &router,
        gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 3),
    )
    .await;
    let source_id = outcome["source"]["id"].as_str().unwrap();

    let response = router
        .oneshot(get(&format!("/images/{}/derived", source_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["source_image_id"], source_id);
    assert_eq!(json["derived"], outcome["derived"]);
}

#[tokio::test]
async fn test_health_is_public() {
    let router = create_router(
        tracking_service(TrackingBlobStore::new()),
        RouterConfig::new()
            .with_identity_secret("secret")
            .with_tracing(false),
    );

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "healthy");
}
