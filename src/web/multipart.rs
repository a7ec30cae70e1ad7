//! Byte-exact `multipart/related` response bodies.
//!
//! The boundary sequences are part of the wire contract consumed by
//! viewers, so parts are written as raw bytes to the response stream:
//! `\r\n--{boundary}\r\n`, the part headers, `\r\n\r\n`-terminated, and a
//! final `\r\n--{boundary}--\r\n`. No multipart library sits in between.

use axum::body::Body;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub fn new_boundary() -> String {
    format!("spax_{}", uuid::Uuid::new_v4().simple())
}

/// `multipart/related` content-type header value.
pub fn related_content_type(boundary: &str, part_type: &str) -> String {
    format!(
        "multipart/related; type=\"{}\"; boundary={}",
        part_type, boundary
    )
}

/// Opening sequence of one part, through the blank line before its body.
pub fn part_header(boundary: &str, content_type: &str) -> Bytes {
    Bytes::from(format!(
        "\r\n--{}\r\nContent-Type: {}\r\n\r\n",
        boundary, content_type
    ))
}

/// Closing boundary of the whole body.
pub fn epilogue(boundary: &str) -> Bytes {
    Bytes::from(format!("\r\n--{}--\r\n", boundary))
}

/// Streaming writer feeding a response [`Body`]; the producer side runs
/// in a spawned task so the encoder suspends while the client drains.
pub struct RelatedWriter {
    boundary: String,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
}

impl RelatedWriter {
    pub fn channel(boundary: String) -> (RelatedWriter, Body) {
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
        let body = Body::from_stream(ReceiverStream::new(rx));
        (RelatedWriter { boundary, tx }, body)
    }

    /// Begin a part. Fails when the client hung up.
    pub async fn begin_part(&self, content_type: &str) -> std::io::Result<()> {
        self.send(part_header(&self.boundary, content_type)).await
    }

    pub async fn write(&self, chunk: Bytes) -> std::io::Result<()> {
        self.send(chunk).await
    }

    /// Write the closing boundary and hang up.
    pub async fn finish(self) -> std::io::Result<()> {
        self.send(epilogue(&self.boundary)).await
    }

    async fn send(&self, chunk: Bytes) -> std::io::Result<()> {
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "client disconnected"))
    }
}
