//! Streaming header parse: everything before the pixel data element.

use crate::{CodecError, Result};
use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::mem::InMemDicomObject;
use dicom_object::{FileDicomObject, OpenFileOptions};
use std::io::{Cursor, Read};

/// Compact projection of one instance's header, plus the full attribute
/// set for path-template resolution.
#[derive(Debug)]
pub struct ParsedInstance {
    pub patient_id: String,
    /// True when the incoming object carried no PatientID and one was
    /// synthesised from the study UID.
    pub patient_id_provisional: bool,
    pub patient_name: Option<String>,
    pub patient_birth_date: Option<String>,
    pub patient_sex: Option<String>,

    pub study_uid: String,
    pub study_date: Option<String>,
    pub study_time: Option<String>,
    pub study_description: Option<String>,
    pub accession_number: Option<String>,
    pub referring_physician: Option<String>,

    pub series_uid: String,
    pub modality: String,
    pub series_number: Option<i32>,
    pub series_description: Option<String>,
    pub body_part: Option<String>,
    pub institution: Option<String>,
    pub station_name: Option<String>,
    pub sending_aet: Option<String>,

    pub sop_uid: String,
    pub sop_class_uid: String,
    pub instance_number: Option<i32>,
    pub number_of_frames: i32,
    pub transfer_syntax_uid: String,

    /// Full header dataset (pixel data excluded), kept for path resolution
    /// and metadata projection.
    pub object: FileDicomObject<InMemDicomObject>,
}

const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

/// Parse a DICOM part-10 stream up to (excluding) the pixel data element.
///
/// Accepts streams with or without the 128-byte preamble. Missing SOP,
/// study or series UIDs are an error; a missing PatientID is synthesised
/// as `NOPID_{study_uid[..16]}` and flagged provisional.
pub fn parse_header<R: Read>(mut reader: R) -> Result<ParsedInstance> {
    let mut head = [0u8; 132];
    let got = read_up_to(&mut reader, &mut head)?;
    if got < 8 {
        return Err(CodecError::InvalidDicom("stream shorter than any header".into()));
    }
    // A part-10 stream carries a 128-byte preamble before the DICM magic;
    // streams from STOW peers sometimes omit it.
    let lead = if got == 132 && &head[128..132] == b"DICM" {
        head[128..got].to_vec()
    } else {
        head[..got].to_vec()
    };
    let chained = Cursor::new(lead).chain(reader);

    let object = OpenFileOptions::new()
        .read_until(PIXEL_DATA)
        .from_reader(chained)
        .map_err(|e| CodecError::InvalidDicom(e.to_string()))?;

    let sop_uid = require_uid(&object, tags::SOP_INSTANCE_UID, "SOPInstanceUID")?;
    let sop_class_uid = require_uid(&object, tags::SOP_CLASS_UID, "SOPClassUID")?;
    let study_uid = require_uid(&object, tags::STUDY_INSTANCE_UID, "StudyInstanceUID")?;
    let series_uid = require_uid(&object, tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?;

    let raw_pid = string_of(&object, tags::PATIENT_ID);
    let (patient_id, provisional) = match raw_pid {
        Some(pid) if !pid.is_empty() => (pid, false),
        _ => {
            let prefix: String = study_uid.chars().take(16).collect();
            (format!("NOPID_{}", prefix), true)
        }
    };

    let transfer_syntax_uid = object
        .meta()
        .transfer_syntax
        .trim_end_matches(['\0', ' '])
        .to_string();

    Ok(ParsedInstance {
        patient_id,
        patient_id_provisional: provisional,
        patient_name: string_of(&object, tags::PATIENT_NAME),
        patient_birth_date: string_of(&object, tags::PATIENT_BIRTH_DATE),
        patient_sex: string_of(&object, tags::PATIENT_SEX),
        study_uid,
        study_date: string_of(&object, tags::STUDY_DATE),
        study_time: string_of(&object, tags::STUDY_TIME),
        study_description: string_of(&object, tags::STUDY_DESCRIPTION),
        accession_number: string_of(&object, tags::ACCESSION_NUMBER),
        referring_physician: string_of(&object, tags::REFERRING_PHYSICIAN_NAME),
        series_uid,
        modality: string_of(&object, tags::MODALITY).unwrap_or_else(|| "OT".to_string()),
        series_number: int_of(&object, tags::SERIES_NUMBER),
        series_description: string_of(&object, tags::SERIES_DESCRIPTION),
        body_part: string_of(&object, tags::BODY_PART_EXAMINED),
        institution: string_of(&object, tags::INSTITUTION_NAME),
        station_name: string_of(&object, tags::STATION_NAME),
        sending_aet: object
            .meta()
            .source_application_entity_title
            .as_ref()
            .map(|s| s.trim_end_matches(['\0', ' ']).to_string()),
        sop_uid,
        sop_class_uid,
        instance_number: int_of(&object, tags::INSTANCE_NUMBER),
        number_of_frames: int_of(&object, tags::NUMBER_OF_FRAMES).unwrap_or(1).max(1),
        transfer_syntax_uid,
        object,
    })
}

fn require_uid(
    obj: &FileDicomObject<InMemDicomObject>,
    tag: Tag,
    name: &'static str,
) -> Result<String> {
    string_of(obj, tag)
        .filter(|s| !s.is_empty())
        .ok_or(CodecError::MissingUid(name))
}

/// Trimmed string value of a tag, `None` when absent or unreadable.
pub fn string_of(obj: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches(['\0', ' ']).trim_start().to_string())
        .filter(|s| !s.is_empty())
}

fn int_of(obj: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<i32> {
    obj.element(tag).ok().and_then(|e| e.to_int::<i32>().ok())
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::{DataElement, PrimitiveValue, VR};
    use dicom_dictionary_std::uids;
    use dicom_object::meta::FileMetaTableBuilder;

    fn sample_object() -> FileDicomObject<InMemDicomObject> {
        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("1.2.3"),
        ));
        obj.put(DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(uids::CT_IMAGE_STORAGE),
        ));
        obj.put(DataElement::new(
            tags::STUDY_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("1.2.1"),
        ));
        obj.put(DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("1.2.2"),
        ));
        obj.put(DataElement::new(
            tags::PATIENT_ID,
            VR::LO,
            PrimitiveValue::from("P1"),
        ));
        obj.put(DataElement::new(
            tags::MODALITY,
            VR::CS,
            PrimitiveValue::from("CT"),
        ));
        obj.with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid("1.2.3"),
        )
        .expect("failed to attach file meta")
    }

    fn to_bytes(obj: &FileDicomObject<InMemDicomObject>) -> Vec<u8> {
        let mut out = Vec::new();
        obj.write_all(&mut out).expect("failed to serialise object");
        out
    }

    #[test]
    fn parses_core_identifiers() {
        let bytes = to_bytes(&sample_object());
        let parsed = parse_header(Cursor::new(bytes)).expect("parse failed");
        assert_eq!(parsed.sop_uid, "1.2.3");
        assert_eq!(parsed.study_uid, "1.2.1");
        assert_eq!(parsed.series_uid, "1.2.2");
        assert_eq!(parsed.patient_id, "P1");
        assert!(!parsed.patient_id_provisional);
        assert_eq!(parsed.modality, "CT");
        assert_eq!(parsed.number_of_frames, 1);
        assert_eq!(parsed.transfer_syntax_uid, uids::EXPLICIT_VR_LITTLE_ENDIAN);
    }

    #[test]
    fn synthesises_patient_id_when_absent() {
        let mut obj = sample_object();
        obj.remove_element(tags::PATIENT_ID);
        obj.put(DataElement::new(
            tags::STUDY_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("1.2.840.113619.2.55.3"),
        ));
        let parsed = parse_header(Cursor::new(to_bytes(&obj))).expect("parse failed");
        assert!(parsed.patient_id_provisional);
        assert_eq!(parsed.patient_id, "NOPID_1.2.840.113619.2");
    }

    #[test]
    fn missing_series_uid_is_invalid() {
        let mut obj = sample_object();
        obj.remove_element(tags::SERIES_INSTANCE_UID);
        let err = parse_header(Cursor::new(to_bytes(&obj))).unwrap_err();
        assert!(matches!(err, CodecError::MissingUid("SeriesInstanceUID")));
    }

    #[test]
    fn modality_defaults_to_ot() {
        let mut obj = sample_object();
        obj.remove_element(tags::MODALITY);
        let parsed = parse_header(Cursor::new(to_bytes(&obj))).expect("parse failed");
        assert_eq!(parsed.modality, "OT");
    }
}
