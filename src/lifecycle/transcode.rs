//! Pixel-data transcoding for COMPRESS tasks, via the dicom-pixeldata
//! encoder stack. This is the only place the archive re-encodes pixels;
//! the retrieve path always serves native bytes.

use crate::error::{ArchiveError, Result};
use dicom_encoding::TransferSyntaxIndex;
use dicom_pixeldata::Transcode;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use std::io::Cursor;

/// Targets the encoder stack supports (the `rle` and `jpeg` features).
const SUPPORTED_TARGETS: [&str; 3] = [
    "1.2.840.10008.1.2.5",    // RLE Lossless
    "1.2.840.10008.1.2.4.50", // JPEG Baseline
    "1.2.840.10008.1.2.4.70", // JPEG Lossless SV1
];

pub fn validate_target(ts_uid: &str) -> Result<()> {
    if SUPPORTED_TARGETS.contains(&ts_uid) {
        Ok(())
    } else {
        Err(ArchiveError::Config(format!(
            "unsupported compression transfer syntax '{}'",
            ts_uid
        )))
    }
}

/// Re-encode one complete DICOM file to the target transfer syntax.
/// CPU-bound; callers run it on the blocking pool.
pub fn transcode_file(bytes: &[u8], target_ts: &str) -> Result<Vec<u8>> {
    let ts = TransferSyntaxRegistry
        .get(target_ts)
        .ok_or_else(|| ArchiveError::Config(format!("unknown transfer syntax '{}'", target_ts)))?;

    // from_reader expects the stream at the DICM magic.
    let offset = if bytes.len() > 132 && &bytes[128..132] == b"DICM" {
        128
    } else {
        0
    };
    let mut object = dicom_object::from_reader(Cursor::new(&bytes[offset..]))
        .map_err(|e| ArchiveError::InvalidDicom(dicom_codec::CodecError::InvalidDicom(e.to_string())))?;

    object
        .transcode(ts)
        .map_err(|e| ArchiveError::Config(format!("transcode failed: {}", e)))?;

    let mut out = Vec::with_capacity(bytes.len());
    object
        .write_all(&mut out)
        .map_err(|e| ArchiveError::Config(format!("re-encode failed: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_encoder_backed_targets_validate() {
        assert!(validate_target("1.2.840.10008.1.2.5").is_ok());
        assert!(validate_target("1.2.840.10008.1.2.4.50").is_ok());
        assert!(validate_target("1.2.840.10008.1.2.4.90").is_err());
        assert!(validate_target("bogus").is_err());
    }
}
