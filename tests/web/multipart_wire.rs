//! Wire-exactness of the multipart/related response encoding: viewers
//! parse these byte sequences directly, so the leading `\r\n--`, header
//! separators and the closing delimiter are asserted literally.

use axum::body::to_bytes;
use spax::web::multipart::{epilogue, part_header, related_content_type, RelatedWriter};

#[test]
fn part_header_bytes_are_exact() {
    let header = part_header("B42", "application/octet-stream");
    assert_eq!(
        header.as_ref(),
        b"\r\n--B42\r\nContent-Type: application/octet-stream\r\n\r\n"
    );
}

#[test]
fn part_header_carries_transfer_syntax_parameter() {
    let header = part_header(
        "B42",
        "application/octet-stream; transfer-syntax=1.2.840.10008.1.2.4.50",
    );
    let text = std::str::from_utf8(header.as_ref()).unwrap();
    assert!(text.ends_with("\r\n\r\n"));
    assert!(text.contains("transfer-syntax=1.2.840.10008.1.2.4.50"));
}

#[test]
fn epilogue_closes_the_body() {
    assert_eq!(epilogue("B42").as_ref(), b"\r\n--B42--\r\n");
}

#[test]
fn content_type_header_shape() {
    assert_eq!(
        related_content_type("B42", "application/dicom"),
        "multipart/related; type=\"application/dicom\"; boundary=B42"
    );
}

#[tokio::test]
async fn writer_produces_a_complete_body() {
    let (writer, body) = RelatedWriter::channel("B42".to_string());

    let producer = tokio::spawn(async move {
        writer.begin_part("application/octet-stream").await.unwrap();
        writer.write(bytes::Bytes::from_static(b"AAAA")).await.unwrap();
        writer.begin_part("application/octet-stream").await.unwrap();
        writer.write(bytes::Bytes::from_static(b"BBBB")).await.unwrap();
        writer.finish().await.unwrap();
    });

    let collected = to_bytes(body, usize::MAX).await.unwrap();
    producer.await.unwrap();

    let expected = b"\r\n--B42\r\nContent-Type: application/octet-stream\r\n\r\nAAAA\
                     \r\n--B42\r\nContent-Type: application/octet-stream\r\n\r\nBBBB\
                     \r\n--B42--\r\n";
    assert_eq!(collected.as_ref(), &expected[..]);
}

#[tokio::test]
async fn two_part_body_matches_fixed_frame_sizes() {
    // Mirrors the frame-retrieval shape: every part is a raw frame body
    // of a known length.
    let frame = vec![0u8; 131_072];
    let (writer, body) = RelatedWriter::channel("F".to_string());
    let frame_clone = frame.clone();
    let producer = tokio::spawn(async move {
        for _ in 0..2 {
            writer.begin_part("application/octet-stream").await.unwrap();
            writer
                .write(bytes::Bytes::from(frame_clone.clone()))
                .await
                .unwrap();
        }
        writer.finish().await.unwrap();
    });

    let collected = to_bytes(body, usize::MAX).await.unwrap();
    producer.await.unwrap();

    let header_len = part_header("F", "application/octet-stream").len();
    let expected_len = 2 * (header_len + frame.len()) + epilogue("F").len();
    assert_eq!(collected.len(), expected_len);
}
