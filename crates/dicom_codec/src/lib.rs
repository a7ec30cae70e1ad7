//! DICOM byte-level services for the archive.
//!
//! Three concerns live here, all operating on raw byte streams:
//! header parsing with pixel data excluded ([`meta::parse_header`]),
//! single-pass pixel frame extraction ([`frames::FrameExtractor`]),
//! and DICOM JSON (PS3.18) conversion helpers ([`json`]).

use thiserror::Error;

pub mod frames;
pub mod json;
pub mod meta;

pub use frames::{classify_frames, FrameExtractor, FrameKind};
pub use meta::{parse_header, ParsedInstance};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("not a DICOM stream: {0}")]
    InvalidDicom(String),
    #[error("mandatory attribute {0} is missing")]
    MissingUid(&'static str),
    #[error("frame {requested} out of range (instance has {available})")]
    FrameOutOfRange { requested: u32, available: u32 },
    #[error("pixel data element not found in stream")]
    MissingPixelData,
    #[error("stream ended prematurely")]
    Truncated,
    #[error("DICOM JSON conversion error: {0}")]
    Json(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
