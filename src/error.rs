use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::Provider;

#[derive(Debug, Error, Diagnostic)]
pub enum FastqDlError {
    #[error(
        "{0} is not a Study, Sample, Experiment, or Run accession. See https://ena-docs.readthedocs.io/en/latest/submit/general-guide/accessions.html for valid options"
    )]
    #[diagnostic(code(fastq_dl::invalid_accession))]
    InvalidAccession(String),

    #[error("{provider} request failed: {message}")]
    ProviderHttp { provider: Provider, message: String },

    #[error("{provider} returned status {status}: {message}")]
    ProviderStatus {
        provider: Provider,
        status: u16,
        message: String,
    },

    #[error("{provider} query was successful, but received an empty response")]
    EmptyResponse { provider: Provider, status: Option<u16> },

    #[error("failed to parse {provider} metadata: {message}")]
    MetadataParse { provider: Provider, message: String },

    #[error("there was an issue querying {provider} after {attempts} attempts: {detail}")]
    #[diagnostic(code(fastq_dl::provider_exhausted))]
    ProviderExhausted {
        provider: Provider,
        attempts: u32,
        detail: String,
    },

    #[error(
        "there was an issue querying ENA and SRA (ENA: {ena_detail}; SRA: {sra_detail})"
    )]
    #[diagnostic(code(fastq_dl::providers_exhausted))]
    ProvidersExhausted {
        ena_detail: String,
        sra_detail: String,
    },

    #[error(
        "download of {} failed after {attempts} attempts due to MD5 checksum mismatch",
        path.display()
    )]
    #[diagnostic(
        code(fastq_dl::integrity),
        help("try again later or download the file manually from SRA/ENA")
    )]
    Integrity {
        path: PathBuf,
        accession: String,
        attempts: u32,
    },

    #[error("missing files for merge: {0:?}")]
    MergeInputMissing(Vec<PathBuf>),

    #[error("nothing to merge into {0}")]
    MergeEmpty(PathBuf),

    #[error("failed to launch {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}

impl FastqDlError {
    /// Status and message of the last metadata failure, for exhaustion reports.
    pub fn provider_detail(&self) -> String {
        match self {
            FastqDlError::ProviderStatus {
                status, message, ..
            } => format!("STATUS: {status}; TEXT: {message}"),
            FastqDlError::EmptyResponse {
                status: Some(status),
                ..
            } => format!(
                "STATUS: {status}; TEXT: Query was successful, but received an empty response"
            ),
            other => other.to_string(),
        }
    }
}
