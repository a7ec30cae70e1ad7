//! DICOM JSON (PS3.18 annex F) helpers.
//!
//! Full datasets are converted through `dicom-json`; query results and
//! store responses are assembled attribute-by-attribute with [`JsonItem`]
//! because they come from database rows, not parsed objects.

use crate::{CodecError, Result};
use dicom_core::Tag;
use dicom_object::mem::InMemDicomObject;
use serde_json::{json, Map, Value};

/// Encode a dataset as a DICOM JSON object.
pub fn dataset_to_json(obj: &InMemDicomObject) -> Result<Value> {
    dicom_json::to_value(obj).map_err(|e| CodecError::Json(e.to_string()))
}

/// Builder for one PS3.18 JSON record (`{"TAGHEX": {"vr": ..., "Value": [...]}}`).
///
/// Attributes with no value are emitted as `{"vr": ...}` with the `Value`
/// array omitted, as the standard requires.
#[derive(Debug, Default)]
pub struct JsonItem {
    map: Map<String, Value>,
}

impl JsonItem {
    pub fn new() -> Self {
        JsonItem { map: Map::new() }
    }

    pub fn str(mut self, tag: Tag, vr: &str, value: Option<&str>) -> Self {
        let key = tag_key(tag);
        match value.filter(|v| !v.is_empty()) {
            Some(v) => {
                self.map.insert(key, json!({ "vr": vr, "Value": [v] }));
            }
            None => {
                self.map.insert(key, json!({ "vr": vr }));
            }
        }
        self
    }

    /// Person name: PS3.18 renders PN values as `{"Alphabetic": ...}`.
    pub fn person(mut self, tag: Tag, value: Option<&str>) -> Self {
        let key = tag_key(tag);
        match value.filter(|v| !v.is_empty()) {
            Some(v) => {
                self.map
                    .insert(key, json!({ "vr": "PN", "Value": [{ "Alphabetic": v }] }));
            }
            None => {
                self.map.insert(key, json!({ "vr": "PN" }));
            }
        }
        self
    }

    pub fn int(mut self, tag: Tag, vr: &str, value: Option<i64>) -> Self {
        let key = tag_key(tag);
        match value {
            Some(v) => {
                self.map.insert(key, json!({ "vr": vr, "Value": [v] }));
            }
            None => {
                self.map.insert(key, json!({ "vr": vr }));
            }
        }
        self
    }

    /// Sequence of already-built items.
    pub fn seq(mut self, tag: Tag, items: Vec<Value>) -> Self {
        self.map
            .insert(tag_key(tag), json!({ "vr": "SQ", "Value": items }));
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.map)
    }
}

/// Uppercase eight-digit attribute key, e.g. `0020000D`.
pub fn tag_key(tag: Tag) -> String {
    format!("{:04X}{:04X}", tag.0, tag.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_dictionary_std::tags;

    #[test]
    fn renders_tag_keys_uppercase() {
        assert_eq!(tag_key(tags::STUDY_INSTANCE_UID), "0020000D");
        assert_eq!(tag_key(tags::SOP_INSTANCE_UID), "00080018");
    }

    #[test]
    fn person_names_use_alphabetic_form() {
        let item = JsonItem::new()
            .person(tags::PATIENT_NAME, Some("Doe^Jane"))
            .build();
        assert_eq!(
            item["00100010"],
            json!({ "vr": "PN", "Value": [{ "Alphabetic": "Doe^Jane" }] })
        );
    }

    #[test]
    fn empty_values_omit_value_array() {
        let item = JsonItem::new()
            .str(tags::ACCESSION_NUMBER, "SH", None)
            .build();
        assert_eq!(item["00080050"], json!({ "vr": "SH" }));
    }

    #[test]
    fn sequences_nest_items() {
        let inner = JsonItem::new()
            .str(tags::REFERENCED_SOP_INSTANCE_UID, "UI", Some("1.2.3"))
            .build();
        let item = JsonItem::new()
            .seq(tags::REFERENCED_SOP_SEQUENCE, vec![inner])
            .build();
        assert_eq!(
            item["00081199"]["Value"][0]["00081155"]["Value"][0],
            json!("1.2.3")
        );
    }
}
