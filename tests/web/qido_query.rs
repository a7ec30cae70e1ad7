//! QIDO query construction from the public surface: predicate shapes,
//! wildcard boundaries and the limit cap.

use spax::db::qido::{build_study_query, translate_wildcards, StudyQuery};

#[test]
fn empty_query_still_orders_and_pages() {
    let sql = build_study_query(&StudyQuery::default()).into_sql();
    assert!(sql.starts_with("SELECT"));
    assert!(sql.contains("JOIN patient pa ON pa.id = st.patient_fk"));
    assert!(sql.contains("ORDER BY st.created_at DESC"));
    assert!(sql.contains("LIMIT"));
}

#[test]
fn all_supported_predicates_appear_together() {
    let sql = build_study_query(&StudyQuery {
        patient_name: Some("DOE*".to_string()),
        patient_id: Some("P1".to_string()),
        study_date: Some("20250101-20251231".to_string()),
        accession_number: Some("ACC?1".to_string()),
        description: Some("CHEST*".to_string()),
        study_uid: Some("1.2.1".to_string()),
        limit: Some(10),
        offset: Some(20),
    })
    .into_sql();

    assert!(sql.contains("pa.name ILIKE"));
    assert!(sql.contains("pa.patient_id = "));
    assert!(sql.contains("st.study_date >= "));
    assert!(sql.contains("st.study_date <= "));
    assert!(sql.contains("st.accession_number LIKE"));
    assert!(sql.contains("st.description ILIKE"));
    assert!(sql.contains("st.study_uid = "));
}

#[test]
fn values_never_appear_in_the_sql_text() {
    // Prepared-statement discipline: user input reaches the database
    // only as bind parameters.
    let sql = build_study_query(&StudyQuery {
        patient_name: Some("Robert'); DROP TABLE study;--".to_string()),
        ..Default::default()
    })
    .into_sql();
    assert!(!sql.contains("DROP TABLE"));
    assert!(!sql.contains("Robert"));
}

#[test]
fn wildcard_translation_matches_dicom_semantics() {
    assert_eq!(translate_wildcards("DOE*"), "DOE%");
    assert_eq!(translate_wildcards("?OE"), "_OE");
    assert_eq!(translate_wildcards("plain"), "plain");
    // SQL pattern characters in the raw value are literal in DICOM.
    assert_eq!(translate_wildcards("50%_done"), "50\\%\\_done");
}

#[test]
fn blank_parameters_add_no_predicates() {
    let sql = build_study_query(&StudyQuery {
        patient_name: Some(String::new()),
        study_date: Some(String::new()),
        ..Default::default()
    })
    .into_sql();
    assert!(!sql.contains("pa.name ILIKE"));
    assert!(!sql.contains("pa.name = "));
    assert!(!sql.contains("study_date >="));
}
