use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FastqDlError;

pub const PE_R1_SUFFIX: &str = "_1.fastq.gz";
pub const PE_R2_SUFFIX: &str = "_2.fastq.gz";
pub const SE_SUFFIX: &str = ".fastq.gz";
pub const MERGED_R1_SUFFIX: &str = "_R1.fastq.gz";
pub const MERGED_R2_SUFFIX: &str = "_R2.fastq.gz";

static STUDY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^PRJ[EDN][A-Z][0-9]+$|^[EDS]RP[0-9]{6,}$").expect("valid study pattern")
});
static SAMPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^SAM[EDN][A-Z]?[0-9]+$|^[EDS]RS[0-9]{6,}$").expect("valid sample pattern")
});
static EXPERIMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[EDS]RX[0-9]{6,}$").expect("valid experiment pattern"));
static RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[EDS]RR[0-9]{6,}$").expect("valid run pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ena,
    Sra,
}

impl Provider {
    pub fn other(self) -> Provider {
        match self {
            Provider::Ena => Provider::Sra,
            Provider::Sra => Provider::Ena,
        }
    }

    /// Error tag recorded on a run when this provider does not have its files.
    pub fn not_found_tag(self) -> &'static str {
        match self {
            Provider::Ena => "ENA_NOT_FOUND",
            Provider::Sra => "SRA_NOT_FOUND",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Ena => write!(f, "ENA"),
            Provider::Sra => write!(f, "SRA"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ftp,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ftp => write!(f, "ftp"),
            Protocol::Https => write!(f, "https"),
        }
    }
}

/// Quality score representation requested from the SRA toolkit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreference {
    Normalized,
    Lite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Experiment,
    Sample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessionKind {
    Study,
    Sample,
    Experiment,
    Run,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Accession {
    value: String,
    kind: AccessionKind,
}

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> AccessionKind {
        self.kind
    }

    /// Search filter understood by the ENA portal API.
    pub fn ena_query(&self) -> String {
        let acc = &self.value;
        match self.kind {
            AccessionKind::Study => {
                format!("(study_accession={acc} OR secondary_study_accession={acc})")
            }
            AccessionKind::Sample => {
                format!("(sample_accession={acc} OR secondary_sample_accession={acc})")
            }
            AccessionKind::Experiment => format!("experiment_accession={acc}"),
            AccessionKind::Run => format!("run_accession={acc}"),
        }
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for Accession {
    type Err = FastqDlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let kind = if STUDY_RE.is_match(trimmed) {
            AccessionKind::Study
        } else if SAMPLE_RE.is_match(trimmed) {
            AccessionKind::Sample
        } else if EXPERIMENT_RE.is_match(trimmed) {
            AccessionKind::Experiment
        } else if RUN_RE.is_match(trimmed) {
            AccessionKind::Run
        } else {
            return Err(FastqDlError::InvalidAccession(value.to_string()));
        };
        Ok(Self {
            value: trimmed.to_string(),
            kind,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryLayout {
    Paired,
    Single,
}

impl LibraryLayout {
    fn parse_lossy(value: &str) -> LibraryLayout {
        if value.trim().eq_ignore_ascii_case("PAIRED") {
            LibraryLayout::Paired
        } else {
            LibraryLayout::Single
        }
    }
}

/// One row of archive metadata for a single sequencing run.
///
/// Every column the provider returned is kept, in provider order, so the
/// run-info file can be written back out verbatim. The well-known columns are
/// exposed through typed accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    fields: Vec<(String, String)>,
    error: Option<String>,
}

impl RunRecord {
    pub fn new<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
            error: None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn run_accession(&self) -> &str {
        self.get("run_accession").unwrap_or("")
    }

    pub fn experiment_accession(&self) -> &str {
        self.get("experiment_accession").unwrap_or("")
    }

    pub fn sample_accession(&self) -> &str {
        self.get("sample_accession").unwrap_or("")
    }

    pub fn study_accession(&self) -> &str {
        self.get("study_accession").unwrap_or("")
    }

    pub fn library_layout(&self) -> LibraryLayout {
        LibraryLayout::parse_lossy(self.get("library_layout").unwrap_or(""))
    }

    pub fn fastq_urls(&self) -> Vec<&str> {
        split_transport_list(self.get("fastq_ftp"))
    }

    /// Declared checksums, positionally paired with [`RunRecord::fastq_urls`].
    pub fn fastq_checksums(&self) -> Vec<&str> {
        split_transport_list(self.get("fastq_md5"))
    }

    pub fn group_key(&self, group_by: GroupBy) -> &str {
        match group_by {
            GroupBy::Experiment => self.experiment_accession(),
            GroupBy::Sample => self.sample_accession(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }
}

fn split_transport_list(value: Option<&str>) -> Vec<&str> {
    match value {
        Some(value) if !value.trim().is_empty() => value.split(';').map(str::trim).collect(),
        _ => Vec::new(),
    }
}

/// Files produced for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    pub r1: PathBuf,
    pub r2: Option<PathBuf>,
    pub single_end: bool,
    pub orphan: Option<PathBuf>,
}

impl FetchResult {
    pub fn single(r1: impl Into<PathBuf>) -> Self {
        Self {
            r1: r1.into(),
            r2: None,
            single_end: true,
            orphan: None,
        }
    }

    pub fn paired(r1: impl Into<PathBuf>, r2: impl Into<PathBuf>) -> Self {
        Self {
            r1: r1.into(),
            r2: Some(r2.into()),
            single_end: false,
            orphan: None,
        }
    }

    pub fn with_orphan(mut self, orphan: impl Into<PathBuf>) -> Self {
        self.orphan = Some(orphan.into());
        self
    }

    pub fn r2(&self) -> Option<&Path> {
        self.r2.as_deref()
    }
}

/// Outcome of asking one provider for one run's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched(FetchResult),
    /// The provider does not have the run's files.
    NotFound { detail: String },
    /// Every transfer attempt failed; the provider could not deliver the run.
    Exhausted { detail: String },
}
