use thiserror::Error;

/// Operation-level error kinds of the archive core.
///
/// Handler code maps these onto HTTP statuses in `web::error`; the ingest
/// consumer and lifecycle workers decide per-kind whether a failure is
/// localised (quarantine, next task) or fatal for the batch.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid DICOM stream: {0}")]
    InvalidDicom(#[source] dicom_codec::CodecError),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] crate::storage::StorageError),

    #[error("no ACTIVE write volume in tier {tier}")]
    NoWriteVolume { tier: crate::models::VolumeTier },

    #[error("unknown volume {0}")]
    UnknownVolume(i64),

    #[error("ingest blocked: disk space below threshold")]
    DiskLow,

    #[error("tenant '{0}' not found or inactive")]
    TenantNotFound(String),

    #[error("invalid tenant code '{0}'")]
    InvalidTenantCode(String),

    #[error("version conflict on {entity} {id}")]
    Conflict { entity: &'static str, id: i64 },

    #[error("frame {requested} out of range (instance has {available})")]
    FrameOutOfRange { requested: u32, available: u32 },

    #[error("malformed frame list '{0}'")]
    BadFrameList(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<dicom_codec::CodecError> for ArchiveError {
    fn from(e: dicom_codec::CodecError) -> Self {
        match e {
            dicom_codec::CodecError::FrameOutOfRange {
                requested,
                available,
            } => ArchiveError::FrameOutOfRange {
                requested,
                available,
            },
            other => ArchiveError::InvalidDicom(other),
        }
    }
}

impl From<crate::storage::StorageError> for ArchiveError {
    fn from(e: crate::storage::StorageError) -> Self {
        ArchiveError::StorageUnavailable(e)
    }
}

impl From<redis::RedisError> for ArchiveError {
    fn from(e: redis::RedisError) -> Self {
        ArchiveError::Queue(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
