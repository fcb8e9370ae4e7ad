//! Ingestion pipeline integration tests.
//!
//! Tests verify:
//! - Conversion of native, RLE and JPEG objects into PNG artifacts
//! - Frame order and lineage integrity of derived images
//! - Partial-success reporting when a frame fails
//! - Terminal failures and the outcome recorded on the source

use bytes::Bytes;

use dicom_ingest::error::{DecodeError, IngestError, RegistryError, StorageError};
use dicom_ingest::format::dicom::{Tag, TransferSyntax};
use dicom_ingest::ingest::{IngestRequest, IngestStep};
use dicom_ingest::lineage::{ImageId, IngestStatus, PatientId, StorageLocationPrefix, UserId};

use super::test_utils::{
    decode_png, gradient_value, gray16_object, gray_object, is_valid_png, jpeg_object,
    rle_object, tracking_service, DicomBuilder, TrackingBlobStore, PATIENT_NAME,
};

fn request(data: Bytes) -> IngestRequest {
    IngestRequest::new(data, UserId::new("dr-who"), PatientId::new("patient-7"))
}

// =============================================================================
// Successful Conversion
// =============================================================================

#[tokio::test]
async fn test_single_frame_128x128_produces_matching_png() {
    let store = TrackingBlobStore::new();
    let service = tracking_service(store.clone());

    let data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 128, 128, 1);
    let outcome = service.ingest(request(data)).await.unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.derived.len(), 1);

    let png = store.object(&outcome.derived[0].storage_location).await;
    assert!(is_valid_png(&png));

    let image = decode_png(&png).into_luma8();
    assert_eq!(image.width(), 128);
    assert_eq!(image.height(), 128);
    assert_eq!(image.get_pixel(5, 0).0[0], gradient_value(0, 5));
}

#[tokio::test]
async fn test_source_object_is_stored_verbatim() {
    let store = TrackingBlobStore::new();
    let service = tracking_service(store.clone());

    let data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 1);
    let outcome = service.ingest(request(data.clone())).await.unwrap();

    let key = format!("images/{}.dcm", outcome.source.id);
    assert_eq!(outcome.source.storage_location, key);

    assert_eq!(store.object(&key).await, data);
    assert_eq!(store.put_keys().await[0], key);
}

#[tokio::test]
async fn test_implicit_and_big_endian_objects_convert() {
    for syntax in [
        TransferSyntax::ImplicitVrLittleEndian,
        TransferSyntax::ExplicitVrBigEndian,
    ] {
        let service = tracking_service(TrackingBlobStore::new());
        let outcome = service
            .ingest(request(gray_object(syntax.clone(), 8, 8, 2)))
            .await
            .unwrap();
        assert!(outcome.is_complete(), "{:?} should convert", syntax);
        assert_eq!(outcome.derived.len(), 2);
    }
}

#[tokio::test]
async fn test_big_endian_16_bit_samples_are_preserved() {
    let store = TrackingBlobStore::new();
    let service = tracking_service(store.clone());

    let data = gray16_object(TransferSyntax::ExplicitVrBigEndian, 4, 4);
    let outcome = service.ingest(request(data)).await.unwrap();

    let png = store.object(&outcome.derived[0].storage_location).await;
    let image = decode_png(&png).into_luma16();
    assert_eq!(image.get_pixel(0, 0).0[0], 0);
    assert_eq!(image.get_pixel(1, 0).0[0], 300);
    assert_eq!(image.get_pixel(3, 3).0[0], 15 * 300);
}

#[tokio::test]
async fn test_rle_object_converts_every_frame() {
    let store = TrackingBlobStore::new();
    let service = tracking_service(store.clone());

    let outcome = service
        .ingest(request(rle_object(16, 16, 3, &[])))
        .await
        .unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.succeeded_frames, vec![1, 2, 3]);
    for (index, derived) in outcome.derived.iter().enumerate() {
        let png = store.object(&derived.storage_location).await;
        let image = decode_png(&png).into_luma8();
        assert!(image.pixels().all(|p| p.0[0] == index as u8 + 1));
    }
}

#[tokio::test]
async fn test_jpeg_object_with_offset_table() {
    let store = TrackingBlobStore::new();
    let service = tracking_service(store.clone());

    let outcome = service
        .ingest(request(jpeg_object(16, &[40, 200])))
        .await
        .unwrap();

    assert_eq!(outcome.derived.len(), 2);
    let first = decode_png(&store.object(&outcome.derived[0].storage_location).await).into_luma8();
    let second =
        decode_png(&store.object(&outcome.derived[1].storage_location).await).into_luma8();
    assert!(first.pixels().all(|p| (30..=50).contains(&p.0[0])));
    assert!(second.pixels().all(|p| (190..=210).contains(&p.0[0])));
}

#[tokio::test]
async fn test_custom_prefix_names_every_object() {
    let store = TrackingBlobStore::new();
    let service = tracking_service(store.clone());

    let data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 2);
    let outcome = service
        .ingest(request(data).with_prefix(StorageLocationPrefix::new("studies/ct")))
        .await
        .unwrap();

    let keys = store.put_keys().await;
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|key| key.starts_with("studies/ct/")));
    assert_eq!(
        outcome.derived[1].storage_location,
        format!("studies/ct/{}.png", outcome.derived[1].id)
    );
}

// =============================================================================
// Ordering and Lineage
// =============================================================================

#[tokio::test]
async fn test_derived_order_matches_frame_order() {
    let store = TrackingBlobStore::new();
    let service = tracking_service(store.clone());

    let data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 6);
    let outcome = service.ingest(request(data)).await.unwrap();

    assert_eq!(outcome.succeeded_frames, vec![1, 2, 3, 4, 5, 6]);

    // Artifacts were written in frame order, after the source object
    let keys = store.put_keys().await;
    let artifact_keys: Vec<_> = outcome
        .derived
        .iter()
        .map(|d| d.storage_location.clone())
        .collect();
    assert_eq!(keys[1..], artifact_keys[..]);

    // Each artifact holds the pixels of its own frame
    for (frame, derived) in outcome.derived.iter().enumerate() {
        let image = decode_png(&store.object(&derived.storage_location).await).into_luma8();
        assert_eq!(image.get_pixel(0, 0).0[0], gradient_value(frame, 0));
    }

    let listed = service
        .registry()
        .derived_for(outcome.source.id)
        .await
        .unwrap();
    let listed_ids: Vec<ImageId> = listed.iter().map(|d| d.id).collect();
    let outcome_ids: Vec<ImageId> = outcome.derived.iter().map(|d| d.id).collect();
    assert_eq!(listed_ids, outcome_ids);
}

#[tokio::test]
async fn test_lineage_integrity() {
    let service = tracking_service(TrackingBlobStore::new());
    let data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 4);
    let outcome = service.ingest(request(data)).await.unwrap();
    let registry = service.registry();

    let mut ids = vec![outcome.source.id];
    for derived in &outcome.derived {
        assert_ne!(derived.id, outcome.source.id);
        assert_eq!(
            registry.lookup_patient_for(derived.id).await.unwrap(),
            registry
                .lookup_patient_for(derived.source_image_id)
                .await
                .unwrap()
        );
        ids.push(derived.id);
    }

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5, "identifiers must be independent and unique");
}

#[tokio::test]
async fn test_concurrent_ingestions_do_not_share_ids() {
    let service = std::sync::Arc::new(tracking_service(TrackingBlobStore::new()));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 3);
            service.ingest(request(data)).await.unwrap()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap();
        ids.push(outcome.source.id);
        ids.extend(outcome.derived.iter().map(|d| d.id));
    }

    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total);
    assert_eq!(service.registry().source_count().await, 4);
    assert_eq!(service.registry().derived_count().await, 12);
}

#[tokio::test]
async fn test_register_derived_for_unknown_source() {
    let service = tracking_service(TrackingBlobStore::new());
    let registry = service.registry();

    let unknown = ImageId::new();
    let result = registry
        .register_derived(unknown, PatientId::new("patient-7"), &StorageLocationPrefix::default())
        .await;

    assert!(matches!(result, Err(RegistryError::UnknownSource(id)) if id == unknown));
    assert_eq!(registry.derived_count().await, 0);
}

#[tokio::test]
async fn test_header_attributes_are_attached() {
    let service = tracking_service(TrackingBlobStore::new());
    let data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 1);
    let outcome = service.ingest(request(data)).await.unwrap();

    let source = service
        .registry()
        .get_source(outcome.source.id)
        .await
        .unwrap();
    let header = source.header_attributes.unwrap();
    assert_eq!(header.string(Tag::PATIENT_NAME), Some(PATIENT_NAME));
    assert_eq!(header.u32(Tag::ROWS), Some(4));
    assert!(header.pixel_data().is_none());
}

// =============================================================================
// Partial Failure
// =============================================================================

#[tokio::test]
async fn test_frame_3_of_5_fails() {
    let store = TrackingBlobStore::new();
    let service = tracking_service(store.clone());

    let outcome = service
        .ingest(request(rle_object(8, 8, 5, &[3])))
        .await
        .unwrap();

    assert!(!outcome.is_complete());
    assert_eq!(outcome.derived.len(), 2);
    assert_eq!(outcome.succeeded_frames, vec![1, 2]);

    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.frame_number, 3);
    assert!(matches!(
        failure.error,
        IngestError::Decode(DecodeError::CorruptFrame { frame: 3, .. })
    ));

    // Frames 4 and 5 were never attempted: only the source and two artifacts exist
    assert_eq!(store.stored_keys().await.len(), 3);
    assert_eq!(service.registry().derived_count().await, 2);

    let source = service
        .registry()
        .get_source(outcome.source.id)
        .await
        .unwrap();
    assert!(matches!(
        source.status,
        IngestStatus::PartiallyComplete { failed_frame: 3, .. }
    ));
}

#[tokio::test]
async fn test_storage_outage_mid_ingestion_keeps_earlier_frames() {
    let store = TrackingBlobStore::new().failing_artifacts_after(2);
    let service = tracking_service(store.clone());

    let data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 4);
    let outcome = service.ingest(request(data)).await.unwrap();

    assert_eq!(outcome.derived.len(), 2);
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.frame_number, 3);
    assert!(failure.error.is_retryable());
    assert!(matches!(
        failure.error,
        IngestError::Storage(StorageError::Unavailable(_))
    ));

    // The record for the unstored frame was retracted
    assert_eq!(service.registry().derived_count().await, 2);
}

// =============================================================================
// Terminal Failures
// =============================================================================

#[tokio::test]
async fn test_first_frame_failure_fails_ingestion() {
    let service = tracking_service(TrackingBlobStore::new());

    let failure = service
        .ingest(request(rle_object(8, 8, 3, &[1])))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, IngestStep::Extract);
    assert_eq!(failure.frame, Some(1));
    let id = failure.source_image_id.unwrap();
    let source = service.registry().get_source(id).await.unwrap();
    assert!(matches!(
        source.status,
        IngestStatus::Failed {
            stage: IngestStep::Extract,
            frame: Some(1),
            ..
        }
    ));
}

#[tokio::test]
async fn test_first_frame_storage_failure_names_frame() {
    let store = TrackingBlobStore::new().failing_artifacts_after(0);
    let service = tracking_service(store.clone());

    let data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 3);
    let failure = service.ingest(request(data)).await.unwrap_err();

    assert_eq!(failure.stage, IngestStep::Persist);
    assert_eq!(failure.frame, Some(1));
    assert!(failure.cause.is_retryable());
    assert!(matches!(
        failure.cause,
        IngestError::Storage(StorageError::Unavailable(_))
    ));

    // Only the source object was stored, and the frame's record was retracted
    assert_eq!(store.stored_keys().await.len(), 1);
    assert_eq!(service.registry().derived_count().await, 0);

    let source = service
        .registry()
        .get_source(failure.source_image_id.unwrap())
        .await
        .unwrap();
    assert!(matches!(
        source.status,
        IngestStatus::Failed {
            stage: IngestStep::Persist,
            frame: Some(1),
            ..
        }
    ));
}

#[tokio::test]
async fn test_truncated_object_fails_decode() {
    let service = tracking_service(TrackingBlobStore::new());

    let mut data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 8, 8, 1).to_vec();
    data.truncate(data.len() - 10);

    let failure = service
        .ingest(request(Bytes::from(data)))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, IngestStep::Decode);
    assert_eq!(failure.frame, None);
    assert!(matches!(
        failure.cause,
        IngestError::Decode(DecodeError::TruncatedStream { .. })
    ));

    // The source record exists and carries the failure reason
    let source = service
        .registry()
        .get_source(failure.source_image_id.unwrap())
        .await
        .unwrap();
    assert!(matches!(source.status, IngestStatus::Failed { .. }));
    assert!(source.header_attributes.is_none());
}

#[tokio::test]
async fn test_missing_pixel_data_is_terminal() {
    let service = tracking_service(TrackingBlobStore::new());

    let data = DicomBuilder::new(TransferSyntax::ExplicitVrLittleEndian)
        .text(Tag::PATIENT_NAME, b"PN", PATIENT_NAME)
        .build_bytes();
    let failure = service.ingest(request(data)).await.unwrap_err();

    assert_eq!(failure.stage, IngestStep::Extract);
    assert_eq!(failure.cause, IngestError::MissingPixelData);
    assert!(!failure.cause.is_retryable());

    // Metadata was attached before the failure
    let source = service
        .registry()
        .get_source(failure.source_image_id.unwrap())
        .await
        .unwrap();
    assert!(source.header_attributes.is_some());
}

#[tokio::test]
async fn test_geometry_mismatch_is_terminal() {
    let service = tracking_service(TrackingBlobStore::new());

    let data = DicomBuilder::new(TransferSyntax::ExplicitVrLittleEndian)
        .grayscale(4, 4, 8, 2)
        .native_pixels(vec![0u8; 20])
        .build_bytes();
    let failure = service.ingest(request(data)).await.unwrap_err();

    assert_eq!(failure.stage, IngestStep::Extract);
    assert!(matches!(
        failure.cause,
        IngestError::Decode(DecodeError::GeometryMismatch {
            expected: 32,
            actual: 20
        })
    ));
}

#[tokio::test]
async fn test_unaddressable_geometry_is_rejected() {
    let store = TrackingBlobStore::new();
    let service = tracking_service(store.clone());

    // 8 GiB frames, 2^31 of them, over an empty pixel element
    let data = DicomBuilder::new(TransferSyntax::ExplicitVrLittleEndian)
        .us(Tag::SAMPLES_PER_PIXEL, 1)
        .text(Tag::PHOTOMETRIC_INTERPRETATION, b"CS", "MONOCHROME2")
        .text(Tag::NUMBER_OF_FRAMES, b"IS", "2147483648")
        .ul(Tag::ROWS, 65536)
        .ul(Tag::COLUMNS, 65536)
        .us(Tag::BITS_ALLOCATED, 16)
        .native_pixels(Vec::new())
        .build_bytes();
    let failure = service.ingest(request(data)).await.unwrap_err();

    assert_eq!(failure.stage, IngestStep::Extract);
    assert!(matches!(
        failure.cause,
        IngestError::Decode(DecodeError::MalformedElement { .. })
    ));
    assert_eq!(store.stored_keys().await.len(), 1);
    assert_eq!(service.registry().derived_count().await, 0);
}

#[tokio::test]
async fn test_large_geometry_without_pixels_is_mismatch() {
    let service = tracking_service(TrackingBlobStore::new());

    let data = DicomBuilder::new(TransferSyntax::ExplicitVrLittleEndian)
        .grayscale(65535, 65535, 16, 64)
        .native_pixels(Vec::new())
        .build_bytes();
    let failure = service.ingest(request(data)).await.unwrap_err();

    assert_eq!(failure.stage, IngestStep::Extract);
    assert!(matches!(
        failure.cause,
        IngestError::Decode(DecodeError::GeometryMismatch { actual: 0, .. })
    ));
}

#[tokio::test]
async fn test_unsupported_codec_is_terminal() {
    let service = tracking_service(TrackingBlobStore::new());

    let data = DicomBuilder::new(TransferSyntax::from_uid("1.2.840.10008.1.2.4.90"))
        .grayscale(4, 4, 8, 1)
        .fragments(Vec::new(), vec![vec![0xFF, 0x4F, 0xFF, 0x51]])
        .build_bytes();
    let failure = service.ingest(request(data)).await.unwrap_err();

    assert!(matches!(
        failure.cause,
        IngestError::Decode(DecodeError::UnsupportedEncoding(_))
    ));
}
