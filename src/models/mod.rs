//! Entity types shared across the archive: the shared scope (tenants,
//! volumes, lifecycle rules, migration tasks) and the per-tenant scope
//! (patient, study, series, instance, correction and compression tasks).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeTier {
    Hot,
    Warm,
    Cold,
}

impl std::fmt::Display for VolumeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            VolumeTier::Hot => "HOT",
            VolumeTier::Warm => "WARM",
            VolumeTier::Cold => "COLD",
        })
    }
}

impl std::str::FromStr for VolumeTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HOT" => Ok(VolumeTier::Hot),
            "WARM" => Ok(VolumeTier::Warm),
            "COLD" => Ok(VolumeTier::Cold),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeStatus {
    Active,
    ReadOnly,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Local,
    S3,
    Gcs,
    Azure,
}

impl ProviderKind {
    pub fn is_object_store(&self) -> bool {
        !matches!(self, ProviderKind::Local)
    }
}

/// A storage volume: shared infrastructure holding instance files.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StorageVolume {
    pub id: i64,
    pub code: String,
    pub provider_kind: ProviderKind,
    /// Root directory (local) or key prefix (object store).
    pub base_path: String,
    pub tier: VolumeTier,
    pub status: VolumeStatus,
    pub priority: i32,
    /// Per-volume override of the configured default path template.
    pub path_template: Option<String>,
    pub bucket: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleAction {
    Migrate,
    Compress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleCondition {
    StudyAgeDays,
    LastAccessDays,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LifecycleRule {
    pub id: i64,
    pub enabled: bool,
    pub action: LifecycleAction,
    pub source_tier: VolumeTier,
    /// Required for MIGRATE, ignored for COMPRESS.
    pub target_tier: Option<VolumeTier>,
    pub condition: LifecycleCondition,
    pub condition_days: i32,
    pub delete_source: bool,
    pub compression_type: Option<String>,
    /// Null applies the rule to every active tenant.
    pub tenant_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MigrationTask {
    pub id: i64,
    pub tenant_code: String,
    pub rule_id: Option<i64>,
    pub instance_id: i64,
    pub instance_created_date: NaiveDate,
    pub source_volume_id: i64,
    pub target_volume_id: i64,
    pub delete_source: bool,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CompressionTask {
    pub id: i64,
    pub rule_id: Option<i64>,
    pub study_id: i64,
    pub compression_type: String,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CorrectionTask {
    pub id: i64,
    pub patient_id: i64,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Patient {
    pub id: i64,
    /// SHA-1 of the raw patient id; unique within a tenant.
    pub public_id: String,
    pub patient_id: String,
    pub name: Option<String>,
    pub birth_date: Option<String>,
    pub sex: Option<String>,
    pub is_provisional: bool,
    pub num_studies: i32,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Study {
    pub id: i64,
    /// SHA-1 of `raw_patient_id|study_uid`; unique within a tenant.
    /// The raw study UID itself is not unique.
    pub public_id: String,
    pub study_uid: String,
    pub study_date: Option<String>,
    pub study_time: Option<String>,
    pub description: Option<String>,
    pub accession_number: Option<String>,
    pub referring_physician: Option<String>,
    pub patient_fk: i64,
    pub num_series: i32,
    pub num_instances: i32,
    pub study_size: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Series {
    pub id: i64,
    pub series_uid: String,
    pub modality: String,
    pub series_number: Option<i32>,
    pub description: Option<String>,
    pub body_part: Option<String>,
    pub station_name: Option<String>,
    pub institution: Option<String>,
    pub study_fk: i64,
    pub num_instances: i32,
    pub series_size: i64,
    pub compress_tsuid: Option<String>,
    pub compress_time: Option<DateTime<Utc>>,
    pub metadata_volume_id: Option<i64>,
    pub metadata_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Instance rows carry a composite key `(id, created_date)`; `created_date`
/// is the monthly range-partition key and always equals the owning series'
/// `created_at::date`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Instance {
    pub id: i64,
    pub sop_uid: String,
    pub sop_class_uid: String,
    pub instance_number: Option<i32>,
    pub transfer_syntax_uid: String,
    pub number_of_frames: i32,
    pub file_size: i64,
    pub volume_id: i64,
    pub storage_path: String,
    pub series_fk: i64,
    pub series_uid: String,
    pub study_uid: String,
    pub created_date: NaiveDate,
}

/// Hash identities used for dedup grouping (§ public_id rules).
pub mod identity {
    use sha1::{Digest, Sha1};

    /// `public_id` of a patient: SHA-1 over the raw patient id.
    pub fn patient_public_id(raw_patient_id: &str) -> String {
        hex::encode(Sha1::digest(raw_patient_id.as_bytes()))
    }

    /// `public_id` of a study: SHA-1 over `raw_patient_id|study_uid`, so
    /// the same field-collected study UID under two patients yields two
    /// distinct studies.
    pub fn study_public_id(raw_patient_id: &str, study_uid: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(raw_patient_id.as_bytes());
        hasher.update(b"|");
        hasher.update(study_uid.as_bytes());
        hex::encode(hasher.finalize())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn same_study_uid_under_two_patients_differs() {
            let a = study_public_id("P1", "1.2");
            let b = study_public_id("P2", "1.2");
            assert_ne!(a, b);
            assert_eq!(a.len(), 40);
        }

        #[test]
        fn patient_public_id_is_stable() {
            assert_eq!(
                patient_public_id("P1"),
                patient_public_id(&"P1".to_string())
            );
        }
    }
}
