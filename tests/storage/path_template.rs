//! Path template behaviour across the full grammar, as resolved against
//! a parsed attribute set.

use chrono::TimeZone;
use dicom_core::Tag;
use spax::storage::template::{java_hash_hex, md5_base32, PathTemplate};
use std::collections::HashMap;

const SOP: Tag = Tag(0x0008, 0x0018);
const STUDY: Tag = Tag(0x0020, 0x000D);
const SERIES: Tag = Tag(0x0020, 0x000E);
const BODY_PART: Tag = Tag(0x0018, 0x0015);

fn attrs() -> HashMap<Tag, String> {
    let mut map = HashMap::new();
    map.insert(SOP, "1.2.3".to_string());
    map.insert(STUDY, "1.2.1".to_string());
    map.insert(SERIES, "1.2.2".to_string());
    map.insert(BODY_PART, "chest".to_string());
    map
}

fn fixed_now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc.with_ymd_and_hms(2026, 7, 4, 10, 30, 0).unwrap()
}

#[test]
fn default_template_layout() {
    let template = PathTemplate::compile(
        "{now,date,yyyy/MM/dd}/{0020000D,hash}/{0020000E,hash}/{00080018,hash}",
    )
    .unwrap();
    let resolved = template.resolve("h1", &attrs(), fixed_now());
    let expected = format!(
        "h1/2026/07/04/{}/{}/{}",
        java_hash_hex("1.2.1"),
        java_hash_hex("1.2.2"),
        java_hash_hex("1.2.3"),
    );
    assert_eq!(resolved, expected);
}

#[test]
fn resolution_is_deterministic_for_fixed_inputs() {
    let template =
        PathTemplate::compile("{0020000D,md5}/{00080018,md5}").unwrap();
    let first = template.resolve("h1", &attrs(), fixed_now());
    let second = template.resolve("h1", &attrs(), fixed_now());
    assert_eq!(first, second);
}

#[test]
fn md5_segments_use_the_custom_alphabet() {
    let template = PathTemplate::compile("{00080018,md5}").unwrap();
    let resolved = template.resolve("h1", &attrs(), fixed_now());
    let segment = resolved.strip_prefix("h1/").unwrap();
    assert_eq!(segment, md5_base32("1.2.3"));
    assert_eq!(segment.len(), 26);
}

#[test]
fn slice_upper_and_literal_segments() {
    let template =
        PathTemplate::compile("{00180015,upper}/{0020000D,slice,0,3}/{00080018}").unwrap();
    let resolved = template.resolve("h1", &attrs(), fixed_now());
    assert_eq!(resolved, "h1/CHEST/1.2/1.2.3");
}

#[test]
fn missing_optional_tag_leaves_other_segments_intact() {
    let template = PathTemplate::compile("{00081090,hash}/{00080018}").unwrap();
    let mut attributes = attrs();
    attributes.remove(&BODY_PART);
    let resolved = template.resolve("h1", &attributes, fixed_now());
    // The hash substitution for the absent tag is omitted; literal
    // separators survive.
    assert_eq!(resolved, "h1//1.2.3");
}

#[test]
fn number_and_offset_default_to_zero() {
    let template = PathTemplate::compile("{00200011,number}/{00200013,offset,5}/{00080018}")
        .unwrap();
    let resolved = template.resolve("h1", &attrs(), fixed_now());
    assert_eq!(resolved, "h1/0/5/1.2.3");
}

#[test]
fn rnd_uid_is_a_valid_uid_root() {
    let template = PathTemplate::compile("{rnd,uid}/{00080018}").unwrap();
    let resolved = template.resolve("h1", &attrs(), fixed_now());
    let segment = resolved.split('/').nth(1).unwrap();
    assert!(segment.starts_with("2.25."));
    assert!(segment.len() <= 64);
}

#[test]
fn tenant_prefix_is_always_applied() {
    let template = PathTemplate::compile("{00080018}").unwrap();
    assert!(template
        .resolve("mercy_west", &attrs(), fixed_now())
        .starts_with("mercy_west/"));
}
