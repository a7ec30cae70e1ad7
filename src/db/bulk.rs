//! Hierarchical batched upsert: patient → study → series → instance, one
//! transaction per batch.
//!
//! Identity rules tolerate colliding field UIDs: patients group on
//! `SHA1(raw_pid)`, studies on `SHA1(raw_pid|study_uid)`, series on
//! `(study, series_uid)`. The series stage returns `created_at::date`,
//! which becomes the partition key of every instance row in its group —
//! never the current date.

use crate::error::Result;
use crate::models::identity;
use crate::tenancy::TenantCtx;
use crate::Db;
use chrono::NaiveDate;
use dicom_codec::ParsedInstance;
use sqlx::{Postgres, Transaction};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One parsed-and-stored file awaiting indexing.
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub meta: Arc<ParsedInstance>,
    pub volume_id: i64,
    pub storage_path: String,
    pub file_size: i64,
}

/// A series touched by a committed batch, with its partition date.
#[derive(Debug, Clone)]
pub struct SeriesRef {
    pub series_id: i64,
    pub created_date: NaiveDate,
    pub series_uid: String,
    pub study_uid: String,
}

#[derive(Debug, Default)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub deduplicated: usize,
    pub series: Vec<SeriesRef>,
    pub study_uids: Vec<String>,
}

// -- batch planning (pure) ------------------------------------------------

#[derive(Debug, Clone)]
struct PatientRow {
    public_id: String,
    raw_id: String,
    name: Option<String>,
    birth_date: Option<String>,
    sex: Option<String>,
    provisional: bool,
}

#[derive(Debug, Clone)]
struct StudyRow {
    public_id: String,
    study_uid: String,
    study_date: Option<String>,
    study_time: Option<String>,
    description: Option<String>,
    accession: Option<String>,
    referring: Option<String>,
    patient_public_id: String,
}

#[derive(Debug, Clone)]
struct SeriesRow {
    study_public_id: String,
    series_uid: String,
    modality: String,
    series_number: Option<i32>,
    description: Option<String>,
    body_part: Option<String>,
    station_name: Option<String>,
    institution: Option<String>,
}

#[derive(Debug)]
struct Plan {
    patients: Vec<PatientRow>,
    studies: Vec<StudyRow>,
    series: Vec<SeriesRow>,
    /// Items grouped by series key `(study_public_id, series_uid)`, with
    /// in-batch SOP duplicates already collapsed.
    instances: HashMap<(String, String), Vec<IngestItem>>,
}

fn build_plan(items: &[IngestItem]) -> Plan {
    let mut patients: HashMap<String, PatientRow> = HashMap::new();
    let mut studies: HashMap<String, StudyRow> = HashMap::new();
    let mut series: HashMap<(String, String), SeriesRow> = HashMap::new();
    let mut instances: HashMap<(String, String), Vec<IngestItem>> = HashMap::new();
    let mut seen_sops: HashSet<(String, String, String)> = HashSet::new();

    for item in items {
        let meta = &item.meta;
        let patient_pub = identity::patient_public_id(&meta.patient_id);
        let study_pub = identity::study_public_id(&meta.patient_id, &meta.study_uid);

        patients
            .entry(patient_pub.clone())
            .and_modify(|p| {
                merge(&mut p.name, &meta.patient_name);
                merge(&mut p.birth_date, &meta.patient_birth_date);
                merge(&mut p.sex, &meta.patient_sex);
            })
            .or_insert_with(|| PatientRow {
                public_id: patient_pub.clone(),
                raw_id: meta.patient_id.clone(),
                name: meta.patient_name.clone(),
                birth_date: meta.patient_birth_date.clone(),
                sex: meta.patient_sex.clone(),
                provisional: meta.patient_id_provisional,
            });

        studies
            .entry(study_pub.clone())
            .and_modify(|s| {
                merge(&mut s.study_date, &meta.study_date);
                merge(&mut s.study_time, &meta.study_time);
                merge(&mut s.description, &meta.study_description);
                merge(&mut s.accession, &meta.accession_number);
                merge(&mut s.referring, &meta.referring_physician);
            })
            .or_insert_with(|| StudyRow {
                public_id: study_pub.clone(),
                study_uid: meta.study_uid.clone(),
                study_date: meta.study_date.clone(),
                study_time: meta.study_time.clone(),
                description: meta.study_description.clone(),
                accession: meta.accession_number.clone(),
                referring: meta.referring_physician.clone(),
                patient_public_id: patient_pub.clone(),
            });

        let series_key = (study_pub.clone(), meta.series_uid.clone());
        series.entry(series_key.clone()).or_insert_with(|| SeriesRow {
            study_public_id: study_pub.clone(),
            series_uid: meta.series_uid.clone(),
            modality: meta.modality.clone(),
            series_number: meta.series_number,
            description: meta.series_description.clone(),
            body_part: meta.body_part.clone(),
            station_name: meta.station_name.clone(),
            institution: meta.institution.clone(),
        });

        let sop_key = (
            study_pub.clone(),
            meta.series_uid.clone(),
            meta.sop_uid.clone(),
        );
        if seen_sops.insert(sop_key) {
            instances.entry(series_key).or_default().push(item.clone());
        }
    }

    Plan {
        patients: patients.into_values().collect(),
        studies: studies.into_values().collect(),
        series: series.into_values().collect(),
        instances,
    }
}

fn merge(slot: &mut Option<String>, incoming: &Option<String>) {
    if slot.is_none() {
        slot.clone_from(incoming);
    }
}

// -- transaction ----------------------------------------------------------

/// Index a batch of stored files. Atomic: a failure leaves every row
/// unchanged (already-written files stay as invisible orphan bytes).
pub async fn upsert_batch(
    db: &Db,
    tenant: &TenantCtx,
    items: &[IngestItem],
) -> Result<UpsertOutcome> {
    if items.is_empty() {
        return Ok(UpsertOutcome::default());
    }
    let plan = build_plan(items);

    let mut conn = db.tenant_conn(tenant).await?;
    let mut tx = sqlx::Connection::begin(&mut *conn).await?;

    let patient_ids = upsert_patients(&mut tx, &plan.patients).await?;
    let study_ids = upsert_studies(&mut tx, &plan.studies, &patient_ids).await?;
    let study_uids: HashMap<String, String> = plan
        .studies
        .iter()
        .map(|s| (s.public_id.clone(), s.study_uid.clone()))
        .collect();
    let series_refs = upsert_series(&mut tx, &plan.series, &study_ids, &study_uids).await?;

    let mut outcome = UpsertOutcome::default();
    for (key, group) in &plan.instances {
        let series_ref = &series_refs[key];
        let (inserted, deduplicated) = insert_instances(&mut tx, series_ref, group).await?;
        outcome.inserted += inserted;
        outcome.deduplicated += deduplicated;
    }

    refresh_counters(&mut tx, &series_refs, &study_ids, &patient_ids).await?;
    tx.commit().await?;

    outcome.series = series_refs.into_values().collect();
    outcome.study_uids = {
        let mut uids: Vec<String> = plan.studies.iter().map(|s| s.study_uid.clone()).collect();
        uids.sort();
        uids.dedup();
        uids
    };
    Ok(outcome)
}

async fn upsert_patients(
    tx: &mut Transaction<'_, Postgres>,
    patients: &[PatientRow],
) -> Result<HashMap<String, i64>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "INSERT INTO patient \
           (public_id, patient_id, name, birth_date, sex, is_provisional, \
            num_studies, version, created_at, updated_at) \
         SELECT u.public_id, u.patient_id, u.name, u.birth_date, u.sex, u.is_provisional, \
                0, 0, now(), now() \
         FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::boolean[]) \
           AS u(public_id, patient_id, name, birth_date, sex, is_provisional) \
         ON CONFLICT (public_id) DO UPDATE SET \
           name = COALESCE(EXCLUDED.name, patient.name), \
           birth_date = COALESCE(EXCLUDED.birth_date, patient.birth_date), \
           sex = COALESCE(EXCLUDED.sex, patient.sex), \
           updated_at = now() \
         RETURNING id, public_id",
    )
    .bind(collect(patients, |p| p.public_id.clone()))
    .bind(collect(patients, |p| p.raw_id.clone()))
    .bind(collect(patients, |p| p.name.clone()))
    .bind(collect(patients, |p| p.birth_date.clone()))
    .bind(collect(patients, |p| p.sex.clone()))
    .bind(collect(patients, |p| p.provisional))
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows.into_iter().map(|(id, pub_id)| (pub_id, id)).collect())
}

async fn upsert_studies(
    tx: &mut Transaction<'_, Postgres>,
    studies: &[StudyRow],
    patient_ids: &HashMap<String, i64>,
) -> Result<HashMap<String, i64>> {
    let patient_fks: Vec<i64> = studies
        .iter()
        .map(|s| patient_ids[&s.patient_public_id])
        .collect();
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "INSERT INTO study \
           (public_id, study_uid, study_date, study_time, description, \
            accession_number, referring_physician, patient_fk, \
            num_series, num_instances, study_size, version, created_at, updated_at) \
         SELECT u.public_id, u.study_uid, u.study_date, u.study_time, u.description, \
                u.accession_number, u.referring_physician, u.patient_fk, \
                0, 0, 0, 0, now(), now() \
         FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::text[], \
                     $6::text[], $7::text[], $8::bigint[]) \
           AS u(public_id, study_uid, study_date, study_time, description, \
                accession_number, referring_physician, patient_fk) \
         ON CONFLICT (public_id) DO UPDATE SET \
           description = COALESCE(EXCLUDED.description, study.description), \
           accession_number = COALESCE(EXCLUDED.accession_number, study.accession_number), \
           referring_physician = COALESCE(EXCLUDED.referring_physician, study.referring_physician), \
           updated_at = now() \
         RETURNING id, public_id",
    )
    .bind(collect(studies, |s| s.public_id.clone()))
    .bind(collect(studies, |s| s.study_uid.clone()))
    .bind(collect(studies, |s| s.study_date.clone()))
    .bind(collect(studies, |s| s.study_time.clone()))
    .bind(collect(studies, |s| s.description.clone()))
    .bind(collect(studies, |s| s.accession.clone()))
    .bind(collect(studies, |s| s.referring.clone()))
    .bind(patient_fks)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows.into_iter().map(|(id, pub_id)| (pub_id, id)).collect())
}

async fn upsert_series(
    tx: &mut Transaction<'_, Postgres>,
    series: &[SeriesRow],
    study_ids: &HashMap<String, i64>,
    study_uids: &HashMap<String, String>,
) -> Result<HashMap<(String, String), SeriesRef>> {
    let study_fks: Vec<i64> = series
        .iter()
        .map(|s| study_ids[&s.study_public_id])
        .collect();
    // The no-op conflict update makes RETURNING yield the existing row,
    // carrying the created_at::date every instance in this group will use
    // as its partition key.
    let rows: Vec<(i64, i64, String, NaiveDate)> = sqlx::query_as(
        "INSERT INTO series \
           (series_uid, modality, series_number, description, body_part, \
            station_name, institution, study_fk, num_instances, series_size, created_at) \
         SELECT u.series_uid, u.modality, u.series_number, u.description, u.body_part, \
                u.station_name, u.institution, u.study_fk, 0, 0, now() \
         FROM UNNEST($1::text[], $2::text[], $3::int[], $4::text[], $5::text[], \
                     $6::text[], $7::text[], $8::bigint[]) \
           AS u(series_uid, modality, series_number, description, body_part, \
                station_name, institution, study_fk) \
         ON CONFLICT (study_fk, series_uid) DO UPDATE SET modality = series.modality \
         RETURNING id, study_fk, series_uid, created_at::date AS created_date",
    )
    .bind(collect(series, |s| s.series_uid.clone()))
    .bind(collect(series, |s| s.modality.clone()))
    .bind(collect(series, |s| s.series_number))
    .bind(collect(series, |s| s.description.clone()))
    .bind(collect(series, |s| s.body_part.clone()))
    .bind(collect(series, |s| s.station_name.clone()))
    .bind(collect(series, |s| s.institution.clone()))
    .bind(study_fks)
    .fetch_all(&mut **tx)
    .await?;

    let study_pub_by_fk: HashMap<i64, &str> = study_ids
        .iter()
        .map(|(pub_id, id)| (*id, pub_id.as_str()))
        .collect();

    let mut refs = HashMap::new();
    for (series_id, study_fk, series_uid, created_date) in rows {
        let study_pub = study_pub_by_fk[&study_fk].to_string();
        let study_uid = study_uids[&study_pub].clone();
        refs.insert(
            (study_pub, series_uid.clone()),
            SeriesRef {
                series_id,
                created_date,
                series_uid,
                study_uid,
            },
        );
    }
    Ok(refs)
}

async fn insert_instances(
    tx: &mut Transaction<'_, Postgres>,
    series_ref: &SeriesRef,
    group: &[IngestItem],
) -> Result<(usize, usize)> {
    // Dedup against the one partition this series lives in; the predicate
    // on created_date prunes the scan to that partition.
    let existing: Vec<(String,)> = sqlx::query_as(
        "SELECT sop_uid FROM instance WHERE series_fk = $1 AND created_date = $2",
    )
    .bind(series_ref.series_id)
    .bind(series_ref.created_date)
    .fetch_all(&mut **tx)
    .await?;
    let existing: HashSet<String> = existing.into_iter().map(|(s,)| s).collect();

    let fresh: Vec<&IngestItem> = group
        .iter()
        .filter(|item| !existing.contains(&item.meta.sop_uid))
        .collect();
    let deduplicated = group.len() - fresh.len();
    if fresh.is_empty() {
        return Ok((0, deduplicated));
    }

    sqlx::query(
        "INSERT INTO instance \
           (sop_uid, sop_class_uid, instance_number, transfer_syntax_uid, \
            number_of_frames, file_size, volume_id, storage_path, \
            series_fk, series_uid, study_uid, created_date) \
         SELECT u.sop_uid, u.sop_class_uid, u.instance_number, u.transfer_syntax_uid, \
                u.number_of_frames, u.file_size, u.volume_id, u.storage_path, \
                $9, $10, $11, $12 \
         FROM UNNEST($1::text[], $2::text[], $3::int[], $4::text[], \
                     $5::int[], $6::bigint[], $7::bigint[], $8::text[]) \
           AS u(sop_uid, sop_class_uid, instance_number, transfer_syntax_uid, \
                number_of_frames, file_size, volume_id, storage_path)",
    )
    .bind(collect(&fresh, |i| i.meta.sop_uid.clone()))
    .bind(collect(&fresh, |i| i.meta.sop_class_uid.clone()))
    .bind(collect(&fresh, |i| i.meta.instance_number))
    .bind(collect(&fresh, |i| i.meta.transfer_syntax_uid.clone()))
    .bind(collect(&fresh, |i| i.meta.number_of_frames))
    .bind(collect(&fresh, |i| i.file_size))
    .bind(collect(&fresh, |i| i.volume_id))
    .bind(collect(&fresh, |i| i.storage_path.clone()))
    .bind(series_ref.series_id)
    .bind(&series_ref.series_uid)
    .bind(&group[0].meta.study_uid)
    .bind(series_ref.created_date)
    .execute(&mut **tx)
    .await?;

    Ok((fresh.len(), deduplicated))
}

async fn refresh_counters(
    tx: &mut Transaction<'_, Postgres>,
    series_refs: &HashMap<(String, String), SeriesRef>,
    study_ids: &HashMap<String, i64>,
    patient_ids: &HashMap<String, i64>,
) -> Result<()> {
    for series_ref in series_refs.values() {
        sqlx::query(
            "UPDATE series SET \
               num_instances = agg.cnt, series_size = agg.sz \
             FROM (SELECT COUNT(*) AS cnt, COALESCE(SUM(file_size), 0) AS sz \
                   FROM instance WHERE series_fk = $1 AND created_date = $2) agg \
             WHERE id = $1",
        )
        .bind(series_ref.series_id)
        .bind(series_ref.created_date)
        .execute(&mut **tx)
        .await?;
    }

    let study_fks: Vec<i64> = study_ids.values().copied().collect();
    sqlx::query(
        "UPDATE study SET \
           num_series = (SELECT COUNT(*) FROM series WHERE study_fk = study.id), \
           num_instances = (SELECT COALESCE(SUM(num_instances), 0) FROM series WHERE study_fk = study.id), \
           study_size = (SELECT COALESCE(SUM(series_size), 0) FROM series WHERE study_fk = study.id), \
           updated_at = now() \
         WHERE id = ANY($1)",
    )
    .bind(&study_fks)
    .execute(&mut **tx)
    .await?;

    let patient_fks: Vec<i64> = patient_ids.values().copied().collect();
    sqlx::query(
        "UPDATE patient SET \
           num_studies = (SELECT COUNT(*) FROM study WHERE patient_fk = patient.id) \
         WHERE id = ANY($1)",
    )
    .bind(&patient_fks)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn collect<T, V, F: Fn(&T) -> V>(items: &[T], f: F) -> Vec<V> {
    items.iter().map(f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::PrimitiveValue;
    use dicom_core::VR;
    use dicom_dictionary_std::{tags, uids};
    use dicom_object::mem::InMemDicomObject;
    use dicom_object::meta::FileMetaTableBuilder;

    fn parsed(patient: &str, study: &str, series: &str, sop: &str) -> Arc<ParsedInstance> {
        let mut obj = InMemDicomObject::new_empty();
        obj.put(dicom_core::DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(sop),
        ));
        let object = obj
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid(sop),
            )
            .unwrap();
        Arc::new(ParsedInstance {
            patient_id: patient.to_string(),
            patient_id_provisional: false,
            patient_name: None,
            patient_birth_date: None,
            patient_sex: None,
            study_uid: study.to_string(),
            study_date: None,
            study_time: None,
            study_description: None,
            accession_number: None,
            referring_physician: None,
            series_uid: series.to_string(),
            modality: "CT".to_string(),
            series_number: None,
            series_description: None,
            body_part: None,
            institution: None,
            station_name: None,
            sending_aet: None,
            sop_uid: sop.to_string(),
            sop_class_uid: uids::CT_IMAGE_STORAGE.to_string(),
            instance_number: None,
            number_of_frames: 1,
            transfer_syntax_uid: uids::EXPLICIT_VR_LITTLE_ENDIAN.to_string(),
            object,
        })
    }

    fn item(patient: &str, study: &str, series: &str, sop: &str) -> IngestItem {
        IngestItem {
            meta: parsed(patient, study, series, sop),
            volume_id: 1,
            storage_path: format!("h1/{}", sop),
            file_size: 100,
        }
    }

    #[test]
    fn study_uid_collision_across_patients_yields_two_studies() {
        let plan = build_plan(&[
            item("P1", "1.2", "1.2.1", "s1"),
            item("P2", "1.2", "1.2.2", "s2"),
        ]);
        assert_eq!(plan.patients.len(), 2);
        assert_eq!(plan.studies.len(), 2);
        let pubs: HashSet<&str> = plan.studies.iter().map(|s| s.public_id.as_str()).collect();
        assert_eq!(pubs.len(), 2);
    }

    #[test]
    fn series_collision_within_study_is_one_series() {
        let plan = build_plan(&[
            item("P1", "1.2", "1.2.1", "s1"),
            item("P1", "1.2", "1.2.1", "s2"),
        ]);
        assert_eq!(plan.series.len(), 1);
        assert_eq!(plan.instances.len(), 1);
        assert_eq!(plan.instances.values().next().unwrap().len(), 2);
    }

    #[test]
    fn in_batch_resend_collapses() {
        let plan = build_plan(&[
            item("P1", "1.2", "1.2.1", "s1"),
            item("P1", "1.2", "1.2.1", "s1"),
        ]);
        assert_eq!(plan.instances.values().next().unwrap().len(), 1);
    }

    #[test]
    fn same_series_uid_under_different_studies_stays_separate() {
        let plan = build_plan(&[
            item("P1", "1.2.A", "9.9", "s1"),
            item("P1", "1.2.B", "9.9", "s2"),
        ]);
        assert_eq!(plan.series.len(), 2);
        assert_eq!(plan.instances.len(), 2);
    }
}
