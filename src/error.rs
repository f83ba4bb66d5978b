use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("invalid genome accession: {0}")]
    InvalidGenomeAccession(String),

    #[error("invalid taxonomy id: {0}")]
    InvalidTaxonomyId(String),

    #[error("invalid taxonomic rank: {0}")]
    InvalidRank(String),

    #[error("missing config file catalog.yml in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse YAML in {path}: {message}")]
    ConfigParse { path: Utf8PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("NCBI request failed: {0}")]
    NcbiHttp(String),

    #[error("NCBI returned status {status}: {message}")]
    NcbiStatus { status: u16, message: String },

    #[error("NCBI reported errors for the request: {0}")]
    NcbiReportErrors(String),

    #[error("unexpected NCBI response: {0}")]
    UnexpectedResponse(String),

    #[error("batch {batch} failed after {attempts} attempts at size {size}: {message}")]
    BatchRetriesExhausted {
        batch: usize,
        size: usize,
        attempts: usize,
        message: String,
    },

    #[error(
        "batch {batch} still too large at minimum batch size {min_batch_size} and page size {page_size}"
    )]
    BatchFloorReached {
        batch: usize,
        min_batch_size: usize,
        page_size: usize,
    },

    #[error("UCSC request failed: {0}")]
    UcscHttp(String),

    #[error("UCSC returned status {status}: {message}")]
    UcscStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to serialize output: {0}")]
    Serialization(String),
}

impl CatalogError {
    /// Errors that must abort the run without shrinking or retrying the batch.
    pub fn is_permanent(&self) -> bool {
        matches!(self, CatalogError::NcbiReportErrors(_))
    }
}
