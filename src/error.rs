use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Integrity,
    Io,
    External,
}

#[derive(Debug, Error, Diagnostic)]
pub enum RepoError {
    #[error("An OTU with the name '{0}' already exists")]
    DuplicateName(String),

    #[error("An OTU with the legacy ID '{0}' already exists")]
    DuplicateLegacyId(String),

    #[error("Taxonomy ID {0} has already been added to this reference")]
    TaxidExists(u32),

    #[error("invalid accession: {0}")]
    InvalidAccession(String),

    #[error("invalid isolate name type: {0}")]
    InvalidIsolateType(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("OTU not found: {0}")]
    OtuNotFound(Uuid),

    #[error("no OTU with taxonomy ID {0}")]
    TaxidNotFound(u32),

    #[error("isolate {isolate_id} not found in OTU {otu_id}")]
    IsolateNotFound { otu_id: Uuid, isolate_id: Uuid },

    #[error("taxonomy ID {0} not found in NCBI Taxonomy")]
    TaxonomyNotFound(u32),

    #[error("NCBI returned no record for: {0}")]
    AccessionsNotFound(String),

    #[error("a repository already exists at {0}")]
    RepoExists(Utf8PathBuf),

    #[error("no repository found at {0}")]
    NotARepository(Utf8PathBuf),

    #[error("event log is missing event {expected} (found {found} at {path})")]
    EventGap {
        expected: u64,
        found: u64,
        path: Utf8PathBuf,
    },

    #[error("event id {id} in {path} does not match its file name")]
    EventIdMismatch { id: u64, path: Utf8PathBuf },

    #[error("corrupt event file {path}: {message}")]
    CorruptEvent { path: Utf8PathBuf, message: String },

    #[error("event {event_id} references a missing {entity} {id}")]
    DanglingReference {
        event_id: u64,
        entity: &'static str,
        id: Uuid,
    },

    #[error("event {event_id} creates {entity} {id} which already exists")]
    DuplicateEntity {
        event_id: u64,
        entity: &'static str,
        id: Uuid,
    },

    #[error("event {0} must be the repository metadata record")]
    MisplacedMetadata(u64),

    #[error("event {0} already exists in the log")]
    EventExists(u64),

    #[error("cached record already exists at {0}")]
    CacheConflict(Utf8PathBuf),

    #[error("NCBI request failed: {0}")]
    NcbiHttp(String),

    #[error("NCBI returned status {status}: {message}")]
    NcbiStatus { status: u16, message: String },

    #[error("failed to parse NCBI record: {0}")]
    NcbiParse(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepoError::DuplicateName(_)
            | RepoError::DuplicateLegacyId(_)
            | RepoError::TaxidExists(_)
            | RepoError::InvalidAccession(_)
            | RepoError::InvalidIsolateType(_)
            | RepoError::InvalidSchema(_)
            | RepoError::RepoExists(_)
            | RepoError::ConfigParse(_) => ErrorKind::Validation,
            RepoError::OtuNotFound(_)
            | RepoError::TaxidNotFound(_)
            | RepoError::IsolateNotFound { .. }
            | RepoError::TaxonomyNotFound(_)
            | RepoError::AccessionsNotFound(_)
            | RepoError::NotARepository(_) => ErrorKind::NotFound,
            RepoError::EventGap { .. }
            | RepoError::EventIdMismatch { .. }
            | RepoError::CorruptEvent { .. }
            | RepoError::DanglingReference { .. }
            | RepoError::DuplicateEntity { .. }
            | RepoError::MisplacedMetadata(_) => ErrorKind::Integrity,
            RepoError::EventExists(_) | RepoError::Filesystem(_) | RepoError::ConfigRead(_) => {
                ErrorKind::Io
            }
            RepoError::CacheConflict(_)
            | RepoError::NcbiHttp(_)
            | RepoError::NcbiStatus { .. }
            | RepoError::NcbiParse(_) => ErrorKind::External,
        }
    }
}
