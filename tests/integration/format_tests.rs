//! Decoder and metadata integration tests.
//!
//! Tests verify:
//! - Element stream decoding across transfer syntaxes
//! - Precise classification of truncated and non-DICOM input
//! - Filtered metadata retrieval and the metadata document

use bytes::Bytes;

use dicom_ingest::error::DecodeError;
use dicom_ingest::format::dicom::{decode, Tag, TransferSyntax, Vr};
use dicom_ingest::format::{ImageGeometry, PixelFrameExtractor};
use dicom_ingest::metadata::{document, parse_tag_list, MetadataIndex, TagSet};

use super::test_utils::{gray_object, jpeg_object, rle_object, DicomBuilder, PATIENT_NAME};

// =============================================================================
// Decoding
// =============================================================================

#[test]
fn test_decode_across_transfer_syntaxes() {
    for syntax in [
        TransferSyntax::ExplicitVrLittleEndian,
        TransferSyntax::ImplicitVrLittleEndian,
        TransferSyntax::ExplicitVrBigEndian,
    ] {
        let stream = decode(gray_object(syntax.clone(), 4, 6, 1)).unwrap();

        assert_eq!(stream.transfer_syntax(), Some(syntax.clone()));
        assert_eq!(stream.string(Tag::PATIENT_NAME), Some(PATIENT_NAME));
        assert_eq!(stream.u32(Tag::ROWS), Some(4));
        assert_eq!(stream.u32(Tag::COLUMNS), Some(6));
        assert!(stream.pixel_data().is_some(), "{:?}", syntax);
    }
}

#[test]
fn test_implicit_vr_uses_dictionary() {
    let stream = decode(gray_object(TransferSyntax::ImplicitVrLittleEndian, 2, 2, 1)).unwrap();

    let rows = stream.first(Tag::ROWS).unwrap();
    assert_eq!(rows.vr(), Vr::US);
    let name = stream.first(Tag::PATIENT_NAME).unwrap();
    assert_eq!(name.vr(), Vr::PN);
}

#[test]
fn test_truncated_buffer_is_never_short_element() {
    let full = gray_object(TransferSyntax::ExplicitVrLittleEndian, 8, 8, 1);

    // Cut inside the pixel data value
    let cut = full.slice(..full.len() - 1);
    let result = decode(cut);
    assert!(matches!(
        result,
        Err(DecodeError::TruncatedStream {
            needed: 64,
            available: 63,
            ..
        })
    ));

    // Cut inside an element header
    let header_cut = full.slice(..134);
    assert!(matches!(
        decode(header_cut),
        Err(DecodeError::TruncatedStream { .. })
    ));
}

#[test]
fn test_not_a_dicom_object() {
    assert!(matches!(
        decode(Bytes::from_static(b"plain text, not an image")),
        Err(DecodeError::NotADicomObject { .. })
    ));

    let mut data = gray_object(TransferSyntax::ExplicitVrLittleEndian, 2, 2, 1).to_vec();
    data[128..132].copy_from_slice(b"XXXX");
    assert!(matches!(
        decode(Bytes::from(data)),
        Err(DecodeError::NotADicomObject { .. })
    ));
}

#[test]
fn test_deflated_transfer_syntax_is_unsupported() {
    let data = DicomBuilder::new(TransferSyntax::DeflatedExplicitVrLittleEndian).build_bytes();
    assert!(matches!(
        decode(data),
        Err(DecodeError::UnsupportedEncoding(_))
    ));
}

// =============================================================================
// Frame Extraction
// =============================================================================

#[test]
fn test_extract_encapsulated_frames() {
    let stream = decode(rle_object(4, 4, 3, &[])).unwrap();
    let geometry = ImageGeometry::from_stream(&stream).unwrap();
    let frames = PixelFrameExtractor::for_stream(&stream)
        .extract(stream.pixel_data().unwrap(), &geometry)
        .unwrap();

    assert_eq!(frames.len(), 3);
    for (index, frame) in frames.iter().enumerate() {
        assert_eq!((frame.width, frame.height), (4, 4));
        assert!(frame.pixels.iter().all(|&p| p == index as u8 + 1));
    }
}

#[test]
fn test_offset_table_drives_jpeg_frames() {
    let stream = decode(jpeg_object(8, &[10, 120, 240])).unwrap();
    let geometry = ImageGeometry::from_stream(&stream).unwrap();
    let sequence = PixelFrameExtractor::for_stream(&stream)
        .frames(stream.pixel_data().unwrap(), &geometry)
        .unwrap();

    assert_eq!(sequence.len(), 3);
    let last = sequence.decode_frame(2).unwrap();
    assert!(last.pixels.iter().all(|&p| p >= 220));
}

// =============================================================================
// Metadata
// =============================================================================

#[test]
fn test_filter_single_tag_returns_one_element() {
    let stream = decode(gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 1)).unwrap();
    let index = MetadataIndex::new(&stream);

    let requested = parse_tag_list("(0010,0010)").unwrap();
    let filtered = index.filter(&requested);

    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered.string(Tag::PATIENT_NAME), Some(PATIENT_NAME));
}

#[test]
fn test_filter_empty_set_returns_full_stream() {
    let stream = decode(gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 1)).unwrap();
    let filtered = MetadataIndex::new(&stream).filter(&TagSet::new());

    assert_eq!(filtered.len(), stream.len());
    let original: Vec<Tag> = stream.iter().map(|e| e.tag()).collect();
    let returned: Vec<Tag> = filtered.iter().map(|e| e.tag()).collect();
    assert_eq!(original, returned);
}

#[test]
fn test_filter_preserves_stream_order_and_skips_absent() {
    let stream = decode(gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 1)).unwrap();
    let index = MetadataIndex::new(&stream);

    // Requested out of order, with one tag the stream does not carry
    let requested = parse_tag_list("(0028,0010) (0010,0010) (0008,0020) (0018,0050)").unwrap();
    let filtered = index.filter(&requested);

    let tags: Vec<Tag> = filtered.iter().map(|e| e.tag()).collect();
    assert_eq!(tags, vec![Tag::STUDY_DATE, Tag::PATIENT_NAME, Tag::ROWS]);
}

#[test]
fn test_first_occurrence_wins() {
    let data = DicomBuilder::new(TransferSyntax::ExplicitVrLittleEndian)
        .text(Tag::PATIENT_NAME, b"PN", "First^Name")
        .text(Tag::PATIENT_NAME, b"PN", "Second^Name")
        .build_bytes();
    let stream = decode(data).unwrap();
    let index = MetadataIndex::new(&stream);

    let filtered = index.filter(&TagSet::from([Tag::PATIENT_NAME]));
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered.string(Tag::PATIENT_NAME), Some("First^Name"));

    // The unfiltered stream keeps both
    assert_eq!(index.filter(&TagSet::new()).len(), stream.len());
}

#[test]
fn test_metadata_document_is_json() {
    let stream = decode(gray_object(TransferSyntax::ExplicitVrLittleEndian, 4, 4, 1)).unwrap();
    let filtered = MetadataIndex::new(&stream).filter(&parse_tag_list("(0010,0010),(0028,0010)").unwrap());

    let json = serde_json::to_value(document(&filtered)).unwrap();
    assert_eq!(json[0]["tag"], "(0010,0010)");
    assert_eq!(json[0]["valueRepresentation"], "PN");
    assert_eq!(json[0]["value"][0], PATIENT_NAME);
    assert_eq!(json[1]["tag"], "(0028,0010)");
    assert_eq!(json[1]["value"][0], 4);
}
