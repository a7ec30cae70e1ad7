//! Single-pass pixel frame extraction.
//!
//! The extractor walks a part-10 stream from the top, skips every element
//! before `(7FE0,0010)` (descending into sequences of any length form),
//! and then copies exactly the bytes of the requested frame. No pixel
//! decoding happens here: frames come out at their native transfer syntax.

use crate::{CodecError, Result};
use std::io::{Read, Write};

/// Transfer syntax UIDs with native (non-encapsulated) pixel data.
const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
const EXPLICIT_VR_BE: &str = "1.2.840.10008.1.2.2";

/// MPEG-2, MPEG-4 AVC and HEVC families (PS3.5 A.4.5 ff).
const VIDEO_TS: [&str; 9] = [
    "1.2.840.10008.1.2.4.100",
    "1.2.840.10008.1.2.4.101",
    "1.2.840.10008.1.2.4.102",
    "1.2.840.10008.1.2.4.103",
    "1.2.840.10008.1.2.4.104",
    "1.2.840.10008.1.2.4.105",
    "1.2.840.10008.1.2.4.106",
    "1.2.840.10008.1.2.4.107",
    "1.2.840.10008.1.2.4.108",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    UncompressedSingle,
    CompressedSingle,
    UncompressedMulti,
    CompressedMulti,
    Video,
}

/// Decide the extraction strategy from transfer syntax and frame count.
pub fn classify_frames(ts_uid: &str, number_of_frames: i32) -> FrameKind {
    let multi = number_of_frames > 1;
    match ts_uid {
        IMPLICIT_VR_LE | EXPLICIT_VR_LE | EXPLICIT_VR_BE => {
            if multi {
                FrameKind::UncompressedMulti
            } else {
                FrameKind::UncompressedSingle
            }
        }
        ts if VIDEO_TS.contains(&ts) => FrameKind::Video,
        _ => {
            if multi {
                FrameKind::CompressedMulti
            } else {
                FrameKind::CompressedSingle
            }
        }
    }
}

/// True when frames of this syntax are served with a `transfer-syntax`
/// parameter on the multipart part content type.
pub fn is_encapsulated(ts_uid: &str) -> bool {
    !matches!(ts_uid, IMPLICIT_VR_LE | EXPLICIT_VR_LE | EXPLICIT_VR_BE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    ImplicitLe,
    ExplicitLe,
    ExplicitBe,
}

impl Encoding {
    fn of(ts_uid: &str) -> Encoding {
        match ts_uid {
            IMPLICIT_VR_LE => Encoding::ImplicitLe,
            // Encapsulated syntaxes always encode the dataset explicit LE.
            EXPLICIT_VR_BE => Encoding::ExplicitBe,
            _ => Encoding::ExplicitLe,
        }
    }
}

const UNDEFINED_LEN: u32 = 0xFFFF_FFFF;
const ITEM: (u16, u16) = (0xFFFE, 0xE000);
const ITEM_DELIM: (u16, u16) = (0xFFFE, 0xE00D);
const SEQ_DELIM: (u16, u16) = (0xFFFE, 0xE0DD);
const PIXEL_DATA: (u16, u16) = (0x7FE0, 0x0010);

/// Pixel geometry gathered from group 0028 while walking to the pixel data.
#[derive(Debug, Default, Clone, Copy)]
struct Geometry {
    rows: u32,
    columns: u32,
    bits_allocated: u32,
    samples_per_pixel: u32,
}

impl Geometry {
    /// Bytes of one native frame. Planar configuration reorders samples
    /// within the frame but does not change its length.
    fn frame_len(&self) -> Option<u64> {
        if self.rows == 0 || self.columns == 0 || self.bits_allocated == 0 {
            return None;
        }
        let samples = self.samples_per_pixel.max(1) as u64;
        Some(self.rows as u64 * self.columns as u64 * (self.bits_allocated as u64 / 8) * samples)
    }
}

/// Extracts one frame per call from a freshly opened stream.
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    kind: FrameKind,
    encoding: Encoding,
    total_frames: u32,
}

impl FrameExtractor {
    pub fn new(ts_uid: &str, number_of_frames: i32) -> Self {
        FrameExtractor {
            kind: classify_frames(ts_uid, number_of_frames),
            encoding: Encoding::of(ts_uid),
            total_frames: number_of_frames.max(1) as u32,
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Copy the bytes of 1-based `frame_number` into `out`.
    ///
    /// `src` must be positioned at the start of the file (preamble or DICM
    /// magic). Returns the number of bytes written.
    pub fn extract<R: Read, W: Write>(
        &self,
        src: R,
        frame_number: u32,
        out: &mut W,
    ) -> Result<u64> {
        if frame_number < 1 || frame_number > self.total_frames {
            return Err(CodecError::FrameOutOfRange {
                requested: frame_number,
                available: self.total_frames,
            });
        }
        let mut walker = Walker::new(src, self.encoding);
        walker.skip_to_dataset()?;
        let geometry = walker.skip_to_pixel_data()?;

        match self.kind {
            FrameKind::UncompressedSingle => {
                let len = walker.pixel_data_len;
                if len == UNDEFINED_LEN {
                    return Err(CodecError::InvalidDicom(
                        "native pixel data with undefined length".into(),
                    ));
                }
                walker.copy_exact(len as u64, out)
            }
            FrameKind::UncompressedMulti => {
                let frame_len = geometry.frame_len().ok_or_else(|| {
                    CodecError::InvalidDicom("missing rows/columns/bits allocated".into())
                })?;
                walker.skip_exact((frame_number as u64 - 1) * frame_len)?;
                walker.copy_exact(frame_len, out)
            }
            FrameKind::CompressedSingle | FrameKind::Video => {
                walker.require_encapsulated()?;
                walker.skip_offset_table()?;
                // Single-frame objects and video concatenate every fragment.
                let mut written = 0;
                while let Some(len) = walker.next_fragment()? {
                    written += walker.copy_exact(len as u64, out)?;
                }
                Ok(written)
            }
            FrameKind::CompressedMulti => {
                walker.require_encapsulated()?;
                walker.skip_offset_table()?;
                // One fragment per frame, the conformant-encoder layout.
                for _ in 1..frame_number {
                    match walker.next_fragment()? {
                        Some(len) => walker.skip_exact(len as u64)?,
                        None => {
                            return Err(CodecError::FrameOutOfRange {
                                requested: frame_number,
                                available: self.total_frames,
                            })
                        }
                    }
                }
                match walker.next_fragment()? {
                    Some(len) => walker.copy_exact(len as u64, out),
                    None => Err(CodecError::FrameOutOfRange {
                        requested: frame_number,
                        available: self.total_frames,
                    }),
                }
            }
        }
    }
}

/// Element-level walker over a part-10 byte stream.
struct Walker<R> {
    src: R,
    encoding: Encoding,
    pixel_data_len: u32,
}

impl<R: Read> Walker<R> {
    fn new(src: R, encoding: Encoding) -> Self {
        Walker {
            src,
            encoding,
            pixel_data_len: 0,
        }
    }

    /// Consume preamble (if present), magic and the file meta group, leaving
    /// the stream at the first dataset element.
    fn skip_to_dataset(&mut self) -> Result<()> {
        let mut magic = [0u8; 4];
        self.read_exact(&mut magic)?;
        if &magic != b"DICM" {
            // Assume the 128-byte preamble: already consumed 4 of it.
            let mut rest = [0u8; 124];
            self.read_exact(&mut rest)?;
            self.read_exact(&mut magic)?;
            if &magic != b"DICM" {
                return Err(CodecError::InvalidDicom("DICM magic not found".into()));
            }
        }
        // File meta group: always explicit VR little endian. Read the group
        // length element, then skip the announced number of bytes.
        let (group, element) = (self.read_u16_le()?, self.read_u16_le()?);
        if (group, element) != (0x0002, 0x0000) {
            return Err(CodecError::InvalidDicom(
                "file meta group length element not first".into(),
            ));
        }
        let mut vr = [0u8; 2];
        self.read_exact(&mut vr)?;
        let len = self.read_u16_le()? as u64; // UL, short form
        if len != 4 {
            return Err(CodecError::InvalidDicom("bad meta group length".into()));
        }
        let group_len = self.read_u32_le()?;
        self.skip_exact(group_len as u64)?;
        Ok(())
    }

    /// Skip dataset elements until `(7FE0,0010)`, recording pixel geometry.
    /// Leaves the stream just past the pixel data length field.
    fn skip_to_pixel_data(&mut self) -> Result<Geometry> {
        let mut geometry = Geometry::default();
        loop {
            let (tag, vr, len) = match self.read_element_header() {
                Ok(h) => h,
                // Clean EOF at an element boundary: no pixel data at all.
                Err(CodecError::Truncated) => return Err(CodecError::MissingPixelData),
                Err(e) => return Err(e),
            };
            if tag == PIXEL_DATA {
                self.pixel_data_len = len;
                return Ok(geometry);
            }
            if tag.0 == 0x0028 {
                match tag.1 {
                    0x0010 | 0x0011 | 0x0100 | 0x0002 => {
                        let v = self.read_ushort_value(len)?;
                        match tag.1 {
                            0x0010 => geometry.rows = v,
                            0x0011 => geometry.columns = v,
                            0x0100 => geometry.bits_allocated = v,
                            _ => geometry.samples_per_pixel = v,
                        }
                        continue;
                    }
                    _ => {}
                }
            }
            self.skip_value(vr, len)?;
        }
    }

    fn require_encapsulated(&self) -> Result<()> {
        if self.pixel_data_len != UNDEFINED_LEN {
            return Err(CodecError::InvalidDicom(
                "expected encapsulated pixel data with undefined length".into(),
            ));
        }
        Ok(())
    }

    /// First encapsulation item is the Basic Offset Table, often empty.
    fn skip_offset_table(&mut self) -> Result<()> {
        let (tag, len) = self.read_item_header()?;
        if tag != ITEM {
            return Err(CodecError::InvalidDicom(
                "encapsulated pixel data does not start with an item".into(),
            ));
        }
        self.skip_exact(len as u64)
    }

    /// Next fragment length, or `None` at the sequence delimitation item.
    fn next_fragment(&mut self) -> Result<Option<u32>> {
        let (tag, len) = self.read_item_header()?;
        match tag {
            ITEM => Ok(Some(len)),
            SEQ_DELIM => Ok(None),
            _ => Err(CodecError::InvalidDicom(format!(
                "unexpected tag ({:04X},{:04X}) inside encapsulated pixel data",
                tag.0, tag.1
            ))),
        }
    }

    // -- element header plumbing ------------------------------------------

    fn read_element_header(&mut self) -> Result<((u16, u16), Option<[u8; 2]>, u32)> {
        let tag = (self.read_u16()?, self.read_u16()?);
        // Item and delimitation tags never carry a VR.
        if tag.0 == 0xFFFE {
            let len = self.read_u32()?;
            return Ok((tag, None, len));
        }
        match self.encoding {
            Encoding::ImplicitLe => {
                let len = self.read_u32()?;
                Ok((tag, None, len))
            }
            Encoding::ExplicitLe | Encoding::ExplicitBe => {
                let mut vr = [0u8; 2];
                self.read_exact(&mut vr)?;
                let len = if has_long_length(&vr) {
                    self.skip_exact(2)?; // reserved
                    self.read_u32()?
                } else {
                    self.read_u16()? as u32
                };
                Ok((tag, Some(vr), len))
            }
        }
    }

    fn read_item_header(&mut self) -> Result<((u16, u16), u32)> {
        let tag = (self.read_u16()?, self.read_u16()?);
        let len = self.read_u32()?;
        Ok((tag, len))
    }

    /// Skip one element value, descending into undefined-length structures.
    fn skip_value(&mut self, _vr: Option<[u8; 2]>, len: u32) -> Result<()> {
        if len != UNDEFINED_LEN {
            // Defined-length sequences are just bytes from here.
            return self.skip_exact(len as u64);
        }
        // Undefined length: a sequence (SQ, or UN in implicit form) of items
        // terminated by the sequence delimitation item.
        loop {
            let (tag, item_len) = self.read_item_header()?;
            match tag {
                SEQ_DELIM => return Ok(()),
                ITEM if item_len != UNDEFINED_LEN => self.skip_exact(item_len as u64)?,
                ITEM => self.skip_item_dataset()?,
                _ => {
                    return Err(CodecError::InvalidDicom(format!(
                        "unexpected tag ({:04X},{:04X}) inside sequence",
                        tag.0, tag.1
                    )))
                }
            }
        }
    }

    /// Skip an undefined-length item: a nested dataset up to the item
    /// delimitation item.
    fn skip_item_dataset(&mut self) -> Result<()> {
        loop {
            let (tag, vr, len) = self.read_element_header()?;
            if tag == ITEM_DELIM {
                return Ok(());
            }
            self.skip_value(vr, len)?;
        }
    }

    fn read_ushort_value(&mut self, len: u32) -> Result<u32> {
        if len < 2 {
            self.skip_exact(len as u64)?;
            return Ok(0);
        }
        let v = self.read_u16()? as u32;
        self.skip_exact(len as u64 - 2)?;
        Ok(v)
    }

    // -- raw reads --------------------------------------------------------

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.src.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                CodecError::Truncated
            } else {
                CodecError::Io(e)
            }
        })
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(match self.encoding {
            Encoding::ExplicitBe => u16::from_be_bytes(b),
            _ => u16::from_le_bytes(b),
        })
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(match self.encoding {
            Encoding::ExplicitBe => u32::from_be_bytes(b),
            _ => u32::from_le_bytes(b),
        })
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn skip_exact(&mut self, mut n: u64) -> Result<()> {
        let mut scratch = [0u8; 8192];
        while n > 0 {
            let take = n.min(scratch.len() as u64) as usize;
            self.read_exact(&mut scratch[..take])?;
            n -= take as u64;
        }
        Ok(())
    }

    fn copy_exact<W: Write>(&mut self, mut n: u64, out: &mut W) -> Result<u64> {
        let mut scratch = [0u8; 8192];
        let total = n;
        while n > 0 {
            let take = n.min(scratch.len() as u64) as usize;
            self.read_exact(&mut scratch[..take])?;
            out.write_all(&scratch[..take])?;
            n -= take as u64;
        }
        Ok(total)
    }
}

/// VRs encoded with a 2-byte reserved field and 4-byte length (PS3.5 7.1.2).
fn has_long_length(vr: &[u8; 2]) -> bool {
    matches!(
        vr,
        b"OB" | b"OW" | b"OF" | b"OD" | b"OL" | b"OV" | b"SQ" | b"UC" | b"UR" | b"UT" | b"UN"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Minimal explicit-VR-LE part-10 stream builder for extractor tests.
    struct FileBuilder {
        bytes: Vec<u8>,
    }

    impl FileBuilder {
        fn new(ts_uid: &str) -> Self {
            let mut bytes = vec![0u8; 128];
            bytes.extend_from_slice(b"DICM");

            // File meta group: group length + transfer syntax only.
            let mut meta = Vec::new();
            push_short(&mut meta, 0x0002, 0x0010, b"UI", ts_uid.as_bytes());
            bytes.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]);
            bytes.extend_from_slice(b"UL");
            bytes.extend_from_slice(&4u16.to_le_bytes());
            bytes.extend_from_slice(&(meta.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&meta);
            FileBuilder { bytes }
        }

        fn element(mut self, group: u16, element: u16, vr: &[u8; 2], value: &[u8]) -> Self {
            push_short(&mut self.bytes, group, element, vr, value);
            self
        }

        fn ushort(self, group: u16, element: u16, v: u16) -> Self {
            self.element(group, element, b"US", &v.to_le_bytes())
        }

        fn native_pixel_data(mut self, data: &[u8]) -> Self {
            self.bytes
                .extend_from_slice(&[0xE0, 0x7F, 0x10, 0x00]);
            self.bytes.extend_from_slice(b"OW");
            self.bytes.extend_from_slice(&[0, 0]);
            self.bytes
                .extend_from_slice(&(data.len() as u32).to_le_bytes());
            self.bytes.extend_from_slice(data);
            self
        }

        fn encapsulated_pixel_data(mut self, fragments: &[&[u8]]) -> Self {
            self.bytes
                .extend_from_slice(&[0xE0, 0x7F, 0x10, 0x00]);
            self.bytes.extend_from_slice(b"OB");
            self.bytes.extend_from_slice(&[0, 0]);
            self.bytes.extend_from_slice(&UNDEFINED_LEN.to_le_bytes());
            // Empty basic offset table.
            self.bytes.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0]);
            self.bytes.extend_from_slice(&0u32.to_le_bytes());
            for frag in fragments {
                self.bytes.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0]);
                self.bytes
                    .extend_from_slice(&(frag.len() as u32).to_le_bytes());
                self.bytes.extend_from_slice(frag);
            }
            self.bytes.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0]);
            self.bytes.extend_from_slice(&0u32.to_le_bytes());
            self
        }

        fn build(self) -> Vec<u8> {
            self.bytes
        }
    }

    fn push_short(bytes: &mut Vec<u8>, group: u16, element: u16, vr: &[u8; 2], value: &[u8]) {
        let mut padded = value.to_vec();
        if padded.len() % 2 == 1 {
            padded.push(0);
        }
        bytes.extend_from_slice(&group.to_le_bytes());
        bytes.extend_from_slice(&element.to_le_bytes());
        bytes.extend_from_slice(vr);
        bytes.extend_from_slice(&(padded.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&padded);
    }

    const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";

    #[test]
    fn classification_table() {
        assert_eq!(
            classify_frames(EXPLICIT_VR_LE, 1),
            FrameKind::UncompressedSingle
        );
        assert_eq!(
            classify_frames(IMPLICIT_VR_LE, 20),
            FrameKind::UncompressedMulti
        );
        assert_eq!(
            classify_frames("1.2.840.10008.1.2.4.102", 1),
            FrameKind::Video
        );
        assert_eq!(
            classify_frames("1.2.840.10008.1.2.4.102", 30),
            FrameKind::Video
        );
        assert_eq!(classify_frames(JPEG_BASELINE, 1), FrameKind::CompressedSingle);
        assert_eq!(classify_frames(JPEG_BASELINE, 4), FrameKind::CompressedMulti);
    }

    #[test]
    fn native_single_frame_copies_whole_element() {
        let pixels: Vec<u8> = (0..64u16).flat_map(|v| v.to_le_bytes()).collect();
        let file = FileBuilder::new(EXPLICIT_VR_LE)
            .element(0x0008, 0x0018, b"UI", b"1.2.3")
            .ushort(0x0028, 0x0010, 8)
            .ushort(0x0028, 0x0011, 8)
            .ushort(0x0028, 0x0100, 16)
            .ushort(0x0028, 0x0002, 1)
            .native_pixel_data(&pixels)
            .build();

        let extractor = FrameExtractor::new(EXPLICIT_VR_LE, 1);
        let mut out = Vec::new();
        let n = extractor
            .extract(Cursor::new(&file), 1, &mut out)
            .expect("extract failed");
        assert_eq!(n, pixels.len() as u64);
        assert_eq!(out, pixels);
    }

    #[test]
    fn native_multi_frame_slices_by_geometry() {
        // 4 frames of 2x2, 8 bits, 1 sample = 4 bytes each.
        let pixels: Vec<u8> = (0u8..16).collect();
        let file = FileBuilder::new(EXPLICIT_VR_LE)
            .ushort(0x0028, 0x0010, 2)
            .ushort(0x0028, 0x0011, 2)
            .ushort(0x0028, 0x0100, 8)
            .ushort(0x0028, 0x0002, 1)
            .native_pixel_data(&pixels)
            .build();

        let extractor = FrameExtractor::new(EXPLICIT_VR_LE, 4);
        let mut out = Vec::new();
        extractor
            .extract(Cursor::new(&file), 3, &mut out)
            .expect("extract failed");
        assert_eq!(out, &pixels[8..12]);
    }

    #[test]
    fn encapsulated_multi_selects_nth_fragment() {
        let file = FileBuilder::new(JPEG_BASELINE)
            .encapsulated_pixel_data(&[b"frag-one", b"frag-two", b"frag-3\0\0"])
            .build();

        let extractor = FrameExtractor::new(JPEG_BASELINE, 3);
        let mut out = Vec::new();
        extractor
            .extract(Cursor::new(&file), 2, &mut out)
            .expect("extract failed");
        assert_eq!(out, b"frag-two");
    }

    #[test]
    fn encapsulated_single_concatenates_fragments() {
        let file = FileBuilder::new(JPEG_BASELINE)
            .encapsulated_pixel_data(&[b"left", b"right\0"])
            .build();

        let extractor = FrameExtractor::new(JPEG_BASELINE, 1);
        let mut out = Vec::new();
        extractor
            .extract(Cursor::new(&file), 1, &mut out)
            .expect("extract failed");
        assert_eq!(out, b"leftright\0");
    }

    #[test]
    fn frame_out_of_range_is_rejected_before_io() {
        let extractor = FrameExtractor::new(EXPLICIT_VR_LE, 20);
        let mut out = Vec::new();
        let err = extractor
            .extract(Cursor::new(Vec::new()), 21, &mut out)
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::FrameOutOfRange {
                requested: 21,
                available: 20
            }
        ));
        let err = extractor
            .extract(Cursor::new(Vec::new()), 0, &mut out)
            .unwrap_err();
        assert!(matches!(err, CodecError::FrameOutOfRange { .. }));
    }

    #[test]
    fn skips_sequences_before_pixel_data() {
        // An undefined-length sequence with one defined-length item must not
        // derail the walk to the pixel data element.
        let mut file = FileBuilder::new(EXPLICIT_VR_LE)
            .ushort(0x0028, 0x0010, 2)
            .ushort(0x0028, 0x0011, 2)
            .ushort(0x0028, 0x0100, 8)
            .ushort(0x0028, 0x0002, 1);
        // (0008,1140) SQ, undefined length
        file.bytes.extend_from_slice(&[0x08, 0x00, 0x40, 0x11]);
        file.bytes.extend_from_slice(b"SQ");
        file.bytes.extend_from_slice(&[0, 0]);
        file.bytes.extend_from_slice(&UNDEFINED_LEN.to_le_bytes());
        // one item, defined length, dummy payload
        let item_body = {
            let mut b = Vec::new();
            push_short(&mut b, 0x0008, 0x1150, b"UI", b"1.2.840.10008.5.1.4.1.1.2");
            b
        };
        file.bytes.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0]);
        file.bytes
            .extend_from_slice(&(item_body.len() as u32).to_le_bytes());
        file.bytes.extend_from_slice(&item_body);
        // sequence delimitation
        file.bytes.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0]);
        file.bytes.extend_from_slice(&0u32.to_le_bytes());

        let pixels = [7u8; 4];
        let file = file.native_pixel_data(&pixels).build();

        let extractor = FrameExtractor::new(EXPLICIT_VR_LE, 1);
        let mut out = Vec::new();
        extractor
            .extract(Cursor::new(&file), 1, &mut out)
            .expect("extract failed");
        assert_eq!(out, pixels);
    }
}
