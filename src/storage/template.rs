//! Tag-based storage path templates.
//!
//! A template such as `{now,date,yyyy/MM/dd}/{0020000D,hash}/{00080018,hash}`
//! is compiled once and resolved per instance. Resolution is deterministic
//! for a given attribute set apart from the explicit `{rnd}` substitutions.

use chrono::{DateTime, Days, Months, NaiveDate, NaiveTime, Utc};
use dicom_core::Tag;
use dicom_object::mem::InMemDicomObject;
use dicom_object::FileDicomObject;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unbalanced braces in template")]
    UnbalancedBraces,
    #[error("bad substitution '{{{0}}}'")]
    BadSubstitution(String),
    #[error("template must reference tag 00080018 (SOP instance UID)")]
    MissingSopUidReference,
}

/// Attribute lookup seam so resolution is testable without parsed files.
pub trait AttributeSource {
    fn value_of(&self, tag: Tag) -> Option<String>;
}

impl AttributeSource for FileDicomObject<InMemDicomObject> {
    fn value_of(&self, tag: Tag) -> Option<String> {
        dicom_codec::meta::string_of(self, tag)
    }
}

impl AttributeSource for HashMap<Tag, String> {
    fn value_of(&self, tag: Tag) -> Option<String> {
        self.get(&tag).cloned()
    }
}

#[derive(Debug, Clone)]
enum TagMod {
    None,
    Hash,
    Md5,
    Upper,
    UrlEncoded,
    Number,
    Offset(i64),
    Slice { start: i64, end: Option<i64> },
    Date(String),
    Time(String),
}

#[derive(Debug, Clone)]
enum NowPart {
    Date,
    Time,
}

#[derive(Debug, Clone)]
enum RndKind {
    Hex,
    Uuid,
    Uid,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Tag { tag: Tag, modifier: TagMod },
    Now {
        part: NowPart,
        minus: Option<Period>,
        format: String,
    },
    Rnd(RndKind),
}

/// Calendar part of an ISO-8601 period (`P1Y2M3W4D`).
#[derive(Debug, Clone, Copy, Default)]
struct Period {
    years: u32,
    months: u32,
    weeks: u32,
    days: u32,
}

impl Period {
    fn parse(s: &str) -> Option<Period> {
        let rest = s.strip_prefix('P')?;
        let mut period = Period::default();
        let mut digits = String::new();
        for c in rest.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let n: u32 = digits.parse().ok()?;
            digits.clear();
            match c {
                'Y' => period.years = n,
                'M' => period.months = n,
                'W' => period.weeks = n,
                'D' => period.days = n,
                _ => return None,
            }
        }
        if digits.is_empty() {
            Some(period)
        } else {
            None
        }
    }

    fn subtract_from(&self, date: NaiveDate) -> NaiveDate {
        date.checked_sub_months(Months::new(self.years * 12 + self.months))
            .and_then(|d| d.checked_sub_days(Days::new((self.weeks * 7 + self.days) as u64)))
            .unwrap_or(date)
    }
}

#[derive(Debug)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Compile a template, validating the grammar and the mandatory
    /// reference to the SOP instance UID.
    pub fn compile(template: &str) -> Result<PathTemplate, TemplateError> {
        let segments = parse(template)?;
        let references_sop = segments.iter().any(
            |s| matches!(s, Segment::Tag { tag, .. } if *tag == Tag(0x0008, 0x0018)),
        );
        if !references_sop {
            return Err(TemplateError::MissingSopUidReference);
        }
        Ok(PathTemplate {
            source: template.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render the relative storage path `{tenant}/{formatted}`.
    pub fn resolve(
        &self,
        tenant_code: &str,
        attributes: &dyn AttributeSource,
        now: DateTime<Utc>,
    ) -> String {
        let mut out = String::with_capacity(64);
        out.push_str(tenant_code);
        out.push('/');
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Tag { tag, modifier } => {
                    out.push_str(&render_tag(attributes.value_of(*tag), modifier, now))
                }
                Segment::Now { part, minus, format } => {
                    let date = match minus {
                        Some(p) => p.subtract_from(now.date_naive()),
                        None => now.date_naive(),
                    };
                    match part {
                        NowPart::Date => out.push_str(&date.format(format).to_string()),
                        NowPart::Time => out.push_str(&now.time().format(format).to_string()),
                    }
                }
                Segment::Rnd(kind) => out.push_str(&render_rnd(kind)),
            }
        }
        out
    }
}

fn parse(template: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '{' {
            if c == '}' {
                return Err(TemplateError::UnbalancedBraces);
            }
            literal.push(c);
            continue;
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        let mut body = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some('{') => return Err(TemplateError::UnbalancedBraces),
                Some(c) => body.push(c),
                None => return Err(TemplateError::UnbalancedBraces),
            }
        }
        segments.push(parse_substitution(&body)?);
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn parse_substitution(body: &str) -> Result<Segment, TemplateError> {
    let args: Vec<&str> = body.split(',').collect();
    let bad = || TemplateError::BadSubstitution(body.to_string());

    match args[0] {
        "now" => {
            if args.len() != 3 {
                return Err(bad());
            }
            let (part, minus) = match args[1] {
                "date" => (NowPart::Date, None),
                "time" => (NowPart::Time, None),
                spec => match spec.strip_prefix("date-") {
                    Some(period) => (
                        NowPart::Date,
                        Some(Period::parse(period).ok_or_else(bad)?),
                    ),
                    None => return Err(bad()),
                },
            };
            Ok(Segment::Now {
                part,
                minus,
                format: java_to_chrono_format(args[2]),
            })
        }
        "rnd" => {
            let kind = match args.get(1) {
                None => RndKind::Hex,
                Some(&"uuid") => RndKind::Uuid,
                Some(&"uid") => RndKind::Uid,
                Some(_) => return Err(bad()),
            };
            Ok(Segment::Rnd(kind))
        }
        tag_hex => {
            if tag_hex.len() != 8 || !tag_hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(bad());
            }
            let value = u32::from_str_radix(tag_hex, 16).map_err(|_| bad())?;
            let tag = Tag((value >> 16) as u16, value as u16);
            let modifier = match args.get(1) {
                None => TagMod::None,
                Some(&"hash") => TagMod::Hash,
                Some(&"md5") => TagMod::Md5,
                Some(&"upper") => TagMod::Upper,
                Some(&"urlencoded") => TagMod::UrlEncoded,
                Some(&"number") => TagMod::Number,
                Some(&"offset") => {
                    let n = args.get(2).and_then(|s| s.parse().ok()).ok_or_else(bad)?;
                    TagMod::Offset(n)
                }
                Some(&"slice") => {
                    let start = args.get(2).and_then(|s| s.parse().ok()).ok_or_else(bad)?;
                    let end = match args.get(3) {
                        Some(s) => Some(s.parse().map_err(|_| bad())?),
                        None => None,
                    };
                    TagMod::Slice { start, end }
                }
                Some(&"date") => TagMod::Date(java_to_chrono_format(args.get(2).ok_or_else(bad)?)),
                Some(&"time") => TagMod::Time(java_to_chrono_format(args.get(2).ok_or_else(bad)?)),
                Some(_) => return Err(bad()),
            };
            Ok(Segment::Tag { tag, modifier })
        }
    }
}

fn render_tag(value: Option<String>, modifier: &TagMod, now: DateTime<Utc>) -> String {
    match modifier {
        // Missing value: none/upper render empty, hash-like substitutions
        // are omitted, numeric ones are zero, date/time fall back to now.
        TagMod::None => value.unwrap_or_default(),
        TagMod::Upper => value.map(|v| v.to_uppercase()).unwrap_or_default(),
        TagMod::Hash => value.map(|v| java_hash_hex(&v)).unwrap_or_default(),
        TagMod::Md5 => value.map(|v| md5_base32(&v)).unwrap_or_default(),
        TagMod::UrlEncoded => value
            .map(|v| urlencoding::encode(&v).into_owned())
            .unwrap_or_default(),
        TagMod::Number => value
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
            .to_string(),
        TagMod::Offset(n) => (value.and_then(|v| v.trim().parse::<i64>().ok()).unwrap_or(0) + n)
            .to_string(),
        TagMod::Slice { start, end } => value
            .map(|v| slice_value(&v, *start, *end))
            .unwrap_or_default(),
        TagMod::Date(format) => {
            let date = value
                .and_then(|v| NaiveDate::parse_from_str(v.trim(), "%Y%m%d").ok())
                .unwrap_or_else(|| now.date_naive());
            date.format(format).to_string()
        }
        TagMod::Time(format) => {
            let time = value
                .and_then(|v| {
                    let digits: String = v.chars().filter(|c| c.is_ascii_digit()).take(6).collect();
                    NaiveTime::parse_from_str(&digits, "%H%M%S").ok()
                })
                .unwrap_or_else(|| now.time());
            time.format(format).to_string()
        }
    }
}

fn render_rnd(kind: &RndKind) -> String {
    match kind {
        RndKind::Hex => format!("{:08x}", rand::random::<u32>()),
        RndKind::Uuid => uuid::Uuid::new_v4().to_string(),
        RndKind::Uid => {
            let n = u128::from_be_bytes(*uuid::Uuid::new_v4().as_bytes());
            format!("2.25.{}", n)
        }
    }
}

/// Java `String.hashCode` over UTF-16 code units, rendered as eight
/// lowercase hex digits. Matches what existing archives computed, so the
/// on-disk layout stays addressable.
pub fn java_hash_hex(value: &str) -> String {
    let mut hash: i32 = 0;
    for unit in value.encode_utf16() {
        hash = hash.wrapping_mul(31).wrapping_add(unit as i32);
    }
    format!("{:08x}", hash as u32)
}

/// MD5 digest in the 26-character base-32 alphabet `0-9a-v`, MSB first.
pub fn md5_base32(value: &str) -> String {
    const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";
    let digest = md5::compute(value.as_bytes());
    let mut out = String::with_capacity(26);
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    for &byte in digest.iter() {
        acc = (acc << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((acc >> bits) & 31) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((acc << (5 - bits)) & 31) as usize] as char);
    }
    out
}

fn slice_value(value: &str, start: i64, end: Option<i64>) -> String {
    let chars: Vec<char> = value.chars().collect();
    let len = chars.len() as i64;
    let clamp = |idx: i64| -> usize {
        let resolved = if idx < 0 { len + idx } else { idx };
        resolved.clamp(0, len) as usize
    };
    let from = clamp(start);
    let to = clamp(end.unwrap_or(len));
    if from >= to {
        return String::new();
    }
    chars[from..to].iter().collect()
}

/// Translate the Java date-format subset used in templates to chrono.
fn java_to_chrono_format(java: &str) -> String {
    let mut out = String::with_capacity(java.len() + 4);
    let mut chars = java.chars().peekable();
    while let Some(c) = chars.next() {
        if !c.is_ascii_alphabetic() {
            out.push(c);
            continue;
        }
        let mut run = 1;
        while chars.peek() == Some(&c) {
            chars.next();
            run += 1;
        }
        match (c, run) {
            ('y', 4) => out.push_str("%Y"),
            ('y', 2) => out.push_str("%y"),
            ('M', 2) => out.push_str("%m"),
            ('d', 2) => out.push_str("%d"),
            ('H', 2) => out.push_str("%H"),
            ('m', 2) => out.push_str("%M"),
            ('s', 2) => out.push_str("%S"),
            _ => {
                for _ in 0..run {
                    out.push(c);
                }
            }
        }
    }
    out
}

/// Compiled templates keyed by source string; shared across volumes and
/// safe for concurrent resolution.
#[derive(Debug, Default)]
pub struct TemplateCache {
    inner: RwLock<HashMap<String, Arc<PathTemplate>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        TemplateCache::default()
    }

    pub fn get_or_compile(&self, template: &str) -> Result<Arc<PathTemplate>, TemplateError> {
        if let Some(found) = self.inner.read().unwrap().get(template) {
            return Ok(found.clone());
        }
        let compiled = Arc::new(PathTemplate::compile(template)?);
        self.inner
            .write()
            .unwrap()
            .entry(template.to_string())
            .or_insert_with(|| compiled.clone());
        Ok(compiled)
    }

    pub fn clear(&self) {
        self.inner.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn attrs(pairs: &[(Tag, &str)]) -> HashMap<Tag, String> {
        pairs
            .iter()
            .map(|(t, v)| (*t, v.to_string()))
            .collect()
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap()
    }

    const SOP: Tag = Tag(0x0008, 0x0018);
    const STUDY: Tag = Tag(0x0020, 0x000D);

    #[test]
    fn default_template_resolves_deterministically() {
        let template = PathTemplate::compile(
            "{now,date,yyyy/MM/dd}/{0020000D,hash}/{0020000E,hash}/{00080018,hash}",
        )
        .unwrap();
        let attributes = attrs(&[
            (STUDY, "1.2.1"),
            (Tag(0x0020, 0x000E), "1.2.2"),
            (SOP, "1.2.3"),
        ]);
        let a = template.resolve("h1", &attributes, fixed_now());
        let b = template.resolve("h1", &attributes, fixed_now());
        assert_eq!(a, b);
        assert!(a.starts_with("h1/2026/03/14/"));
    }

    #[test]
    fn java_hash_matches_reference_values() {
        // Values verified against java.lang.String#hashCode.
        assert_eq!(java_hash_hex("1.2.3"), format!("{:08x}", 46_672_442_u32));
        assert_eq!(java_hash_hex(""), "00000000");
        let negative: i32 = "1.2.840.10008.5.1.4.1.1.2".encode_utf16().fold(0i32, |h, c| {
            h.wrapping_mul(31).wrapping_add(c as i32)
        });
        assert_eq!(
            java_hash_hex("1.2.840.10008.5.1.4.1.1.2"),
            format!("{:08x}", negative as u32)
        );
    }

    #[test]
    fn md5_is_26_chars_of_custom_alphabet() {
        let rendered = md5_base32("1.2.3");
        assert_eq!(rendered.len(), 26);
        assert!(rendered
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='v').contains(&c)));
    }

    #[test]
    fn slice_supports_negative_indices() {
        PathTemplate::compile("{00080018,slice,-5}").unwrap();
        assert_eq!(slice_value("1.2.345", 0, Some(3)), "1.2");
        assert_eq!(slice_value("1.2.345", -3, None), "345");
        assert_eq!(slice_value("abc", -10, Some(2)), "ab");
        assert_eq!(slice_value("abc", 2, Some(1)), "");
    }

    #[test]
    fn missing_tag_policies() {
        let now = fixed_now();
        assert_eq!(render_tag(None, &TagMod::None, now), "");
        assert_eq!(render_tag(None, &TagMod::Upper, now), "");
        assert_eq!(render_tag(None, &TagMod::Hash, now), "");
        assert_eq!(render_tag(None, &TagMod::Md5, now), "");
        assert_eq!(render_tag(None, &TagMod::Number, now), "0");
        assert_eq!(render_tag(None, &TagMod::Offset(7), now), "7");
        assert_eq!(
            render_tag(None, &TagMod::Date("%Y/%m/%d".into()), now),
            "2026/03/14"
        );
    }

    #[test]
    fn date_arithmetic_subtracts_iso_periods() {
        let template =
            PathTemplate::compile("{now,date-P1M,yyyy/MM/dd}/{00080018}").unwrap();
        let resolved = template.resolve("h1", &attrs(&[(SOP, "1.2.3")]), fixed_now());
        assert_eq!(resolved, "h1/2026/02/14/1.2.3");
    }

    #[test]
    fn rejects_template_without_sop_reference() {
        let err = PathTemplate::compile("{now,date,yyyy/MM/dd}/{0020000D,hash}").unwrap_err();
        assert!(matches!(err, TemplateError::MissingSopUidReference));
    }

    #[test]
    fn rejects_malformed_substitutions() {
        assert!(PathTemplate::compile("{00080018,bogus}").is_err());
        assert!(PathTemplate::compile("{00080018").is_err());
        assert!(PathTemplate::compile("{now,date}").is_err());
    }

    #[test]
    fn cache_reuses_compiled_templates() {
        let cache = TemplateCache::new();
        let a = cache.get_or_compile("{00080018,hash}").unwrap();
        let b = cache.get_or_compile("{00080018,hash}").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        cache.clear();
        let c = cache.get_or_compile("{00080018,hash}").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn urlencoded_and_upper_modifiers() {
        let now = fixed_now();
        assert_eq!(
            render_tag(Some("CT scan 1".into()), &TagMod::UrlEncoded, now),
            "CT%20scan%201"
        );
        assert_eq!(
            render_tag(Some("chest".into()), &TagMod::Upper, now),
            "CHEST"
        );
    }
}
