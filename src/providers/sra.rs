use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{
    Accession, FetchOutcome, FetchResult, Provider, QualityPreference, RunRecord,
};
use crate::error::FastqDlError;
use crate::executor::{
    CommandRunner, ExecOutcome, Executor, ToolCommand, find_in_path, tool_version,
};
use crate::fs_util;
use crate::layout::OutputLayout;
use crate::providers::{FileFetcher, MetadataProvider, build_query_url, http_client};

pub const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const RUNINFO_PAGE_SIZE: usize = 10_000;

/// RunInfo column names and the names ENA uses for the same fields.
const RUNINFO_COLUMNS: &[(&str, &str)] = &[
    ("Run", "run_accession"),
    ("Experiment", "experiment_accession"),
    ("Sample", "sample_accession"),
    ("SRAStudy", "study_accession"),
    ("BioProject", "bioproject"),
    ("BioSample", "biosample"),
    ("LibraryLayout", "library_layout"),
];

#[derive(Clone)]
pub struct SraHttpClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl SraHttpClient {
    pub fn new() -> Result<Self, FastqDlError> {
        Ok(Self {
            client: http_client(Provider::Sra, Duration::from_secs(60))?,
            base_url: EUTILS_BASE.to_string(),
            api_key: std::env::var("NCBI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
        })
    }

    fn get_text(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String, FastqDlError> {
        let mut params = params.to_vec();
        if let Some(key) = self.api_key.as_deref() {
            params.push(("api_key", key));
        }
        let url = build_query_url(&format!("{}/{endpoint}", self.base_url), &params);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| FastqDlError::ProviderHttp {
                provider: Provider::Sra,
                message: err.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(endpoint, status.as_u16(), response.text().ok()));
        }
        response.text().map_err(|err| FastqDlError::ProviderHttp {
            provider: Provider::Sra,
            message: err.to_string(),
        })
    }

    /// Leaves the hits on the history server; efetch pages through them by
    /// `WebEnv` and `query_key`.
    fn esearch(&self, term: &str) -> Result<Option<SearchHistory>, FastqDlError> {
        let text = self.get_text(
            "esearch.fcgi",
            &[
                ("db", "sra"),
                ("term", term),
                ("retmode", "json"),
                ("retmax", "0"),
                ("usehistory", "y"),
            ],
        )?;
        let payload: Value =
            serde_json::from_str(&text).map_err(|err| FastqDlError::MetadataParse {
                provider: Provider::Sra,
                message: err.to_string(),
            })?;
        Ok(parse_esearch_history(&payload))
    }
}

impl MetadataProvider for SraHttpClient {
    fn provider(&self) -> Provider {
        Provider::Sra
    }

    fn search(&self, accession: &Accession) -> Result<Vec<RunRecord>, FastqDlError> {
        let Some(history) = self.esearch(accession.as_str())? else {
            return Err(FastqDlError::EmptyResponse {
                provider: Provider::Sra,
                status: None,
            });
        };
        debug!("esearch found {} SRA entries for {accession}", history.count);
        let mut records = Vec::new();
        for start in (0..history.count).step_by(RUNINFO_PAGE_SIZE) {
            let params = history.efetch_params(start);
            let params: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
            let text = self.get_text("efetch.fcgi", &params)?;
            records.extend(parse_runinfo_csv(&text)?);
        }
        if records.is_empty() {
            return Err(FastqDlError::EmptyResponse {
                provider: Provider::Sra,
                status: None,
            });
        }
        Ok(records)
    }
}

fn status_error(endpoint: &str, status: u16, body: Option<String>) -> FastqDlError {
    let message = body
        .map(|body| body.trim().to_string())
        .filter(|body| !body.is_empty())
        .unwrap_or_else(|| format!("{endpoint} request failed"));
    FastqDlError::ProviderStatus {
        provider: Provider::Sra,
        status,
        message,
    }
}

/// A result set parked on the E-utilities history server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHistory {
    pub count: usize,
    pub web_env: String,
    pub query_key: String,
}

impl SearchHistory {
    /// efetch parameters for one RunInfo page starting at `start`.
    pub fn efetch_params(&self, start: usize) -> Vec<(&'static str, String)> {
        vec![
            ("db", "sra".to_string()),
            ("WebEnv", self.web_env.clone()),
            ("query_key", self.query_key.clone()),
            ("retstart", start.to_string()),
            ("retmax", RUNINFO_PAGE_SIZE.to_string()),
            ("rettype", "runinfo".to_string()),
            ("retmode", "csv".to_string()),
        ]
    }
}

/// Reads `count`, `webenv` and `querykey` from an esearch JSON payload.
/// `None` when nothing matched or the history keys are missing.
pub fn parse_esearch_history(payload: &Value) -> Option<SearchHistory> {
    let result = &payload["esearchresult"];
    let count = result["count"].as_str()?.trim().parse::<usize>().ok()?;
    if count == 0 {
        return None;
    }
    Some(SearchHistory {
        count,
        web_env: result["webenv"].as_str()?.to_string(),
        query_key: result["querykey"].as_str()?.to_string(),
    })
}

/// Parses an efetch RunInfo CSV into run records with ENA-style field names.
///
/// Large result sets arrive in batches, each with its own header line; those
/// repeated headers are dropped along with rows that carry no run accession.
pub fn parse_runinfo_csv(text: &str) -> Result<Vec<RunRecord>, FastqDlError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| FastqDlError::MetadataParse {
            provider: Provider::Sra,
            message: err.to_string(),
        })?
        .iter()
        .map(|name| canonical_column(name.trim()).to_string())
        .collect::<Vec<_>>();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|err| FastqDlError::MetadataParse {
            provider: Provider::Sra,
            message: err.to_string(),
        })?;
        let run = row.get(0).unwrap_or("").trim();
        if run.is_empty() || run == "Run" {
            continue;
        }
        let fields = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), row.get(idx).unwrap_or("").trim().to_string()));
        records.push(RunRecord::new(fields));
    }
    Ok(records)
}

fn canonical_column(name: &str) -> &str {
    RUNINFO_COLUMNS
        .iter()
        .find(|(runinfo, _)| *runinfo == name)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(name)
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub sra_toolkit: Option<String>,
    pub pigz: Option<String>,
}

/// Versions of the external programs the SRA fetcher shells out to.
pub fn tool_info() -> ToolInfo {
    ToolInfo {
        sra_toolkit: find_in_path("fasterq-dump")
            .and_then(|path| tool_version(&path, &["--version"])),
        pigz: find_in_path("pigz").and_then(|path| tool_version(&path, &["--version"])),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compressor {
    Pigz(PathBuf),
    /// In-process gzip, used when pigz is not installed.
    Builtin,
}

impl Compressor {
    pub fn detect() -> Self {
        match find_in_path("pigz") {
            Some(path) => Compressor::Pigz(path),
            None => Compressor::Builtin,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SraFetchOptions {
    pub force: bool,
    pub ignore_checksum: bool,
    pub cpus: u32,
    pub quality: QualityPreference,
}

/// Fetches a run with the SRA toolkit: `prefetch` stages the archive,
/// `fasterq-dump` splits it into FASTQ, and the result is gzipped.
pub struct SraFetcher<R: CommandRunner> {
    executor: Executor<R>,
    options: SraFetchOptions,
    compressor: Compressor,
}

impl<R: CommandRunner> SraFetcher<R> {
    pub fn new(executor: Executor<R>, options: SraFetchOptions, compressor: Compressor) -> Self {
        Self {
            executor,
            options,
            compressor,
        }
    }

    pub fn executor(&self) -> &Executor<R> {
        &self.executor
    }

    fn configure_quality(&self, cwd: &Path) -> Result<(), FastqDlError> {
        let lite = self.options.quality == QualityPreference::Lite;
        if lite {
            debug!("Setting preference to SRA Lite");
        } else {
            debug!("Setting preference to SRA Normalized");
        }
        let command = ToolCommand::new("vdb-config")
            .arg("--simplified-quality-scores")
            .arg(if lite { "yes" } else { "no" });
        if let ExecOutcome::Failed { message, .. } =
            self.executor.execute_once(&command, cwd, Provider::Sra)?
        {
            warn!("Unable to set the quality score preference: {message}");
        }
        Ok(())
    }

    fn prefetch_command(&self, accession: &str) -> ToolCommand {
        ToolCommand::new("prefetch").args([
            accession.to_string(),
            "--max-size".to_string(),
            "10T".to_string(),
            "-o".to_string(),
            format!("{accession}.sra"),
            "-f".to_string(),
            yes_no(self.options.force).to_string(),
            "--verify".to_string(),
            yes_no(!self.options.ignore_checksum).to_string(),
        ])
    }

    fn fasterq_dump_command(&self, accession: &str) -> ToolCommand {
        let command = ToolCommand::new("fasterq-dump").args([
            accession.to_string(),
            "--split-3".to_string(),
            "--mem".to_string(),
            "1G".to_string(),
            "--threads".to_string(),
            self.options.cpus.max(1).to_string(),
        ]);
        if self.options.force {
            command.arg("-f")
        } else {
            command
        }
    }

    fn compress(&self, accession: &str, cwd: &Path) -> Result<Option<String>, FastqDlError> {
        let extracted = extracted_fastqs(cwd, accession);
        if extracted.is_empty() {
            return Ok(Some(format!("fasterq-dump produced no FASTQ for {accession}")));
        }
        match &self.compressor {
            Compressor::Pigz(path) => {
                let names = extracted
                    .iter()
                    .filter_map(|path| path.file_name())
                    .map(|name| name.to_string_lossy().to_string());
                let command = ToolCommand::new(path.to_string_lossy())
                    .args(["--force", "-p"])
                    .arg(self.options.cpus.max(1).to_string())
                    .arg("-n")
                    .args(names);
                match self.executor.execute(&command, cwd, Provider::Sra)? {
                    ExecOutcome::Success { .. } => Ok(None),
                    ExecOutcome::NotFound { message, .. }
                    | ExecOutcome::Failed { message, .. } => Ok(Some(message)),
                }
            }
            Compressor::Builtin => {
                for path in &extracted {
                    debug!("Compressing {}", path.display());
                    fs_util::gzip_in_place(path)?;
                }
                Ok(None)
            }
        }
    }
}

/// `{acc}.fastq`, `{acc}_1.fastq` and `{acc}_2.fastq`, whichever exist.
fn extracted_fastqs(cwd: &Path, accession: &str) -> Vec<PathBuf> {
    ["", "_1", "_2"]
        .iter()
        .map(|suffix| cwd.join(format!("{accession}{suffix}.fastq")))
        .filter(|path| path.is_file())
        .collect()
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn exec_failure(outcome: ExecOutcome) -> Option<FetchOutcome> {
    match outcome {
        ExecOutcome::Success { .. } => None,
        ExecOutcome::NotFound { message, .. } => Some(FetchOutcome::NotFound { detail: message }),
        ExecOutcome::Failed {
            attempts, message, ..
        } => Some(FetchOutcome::Exhausted {
            detail: format!("{message} (after {attempts} attempts)"),
        }),
    }
}

impl<R: CommandRunner> FileFetcher for SraFetcher<R> {
    fn provider(&self) -> Provider {
        Provider::Sra
    }

    fn fetch(
        &self,
        run: &RunRecord,
        layout: &OutputLayout,
    ) -> Result<FetchOutcome, FastqDlError> {
        let accession = run.run_accession();
        let se = layout.single_end(accession).into_std_path_buf();
        let pe1 = layout.paired_r1(accession).into_std_path_buf();
        let pe2 = layout.paired_r2(accession).into_std_path_buf();

        if self.options.force {
            for path in [&se, &pe1, &pe2] {
                if fs_util::remove_if_exists(path)? {
                    warn!("Overwriting existing file: {}", path.display());
                }
            }
        }

        if se.exists() || (pe1.exists() && pe2.exists()) {
            for path in [&se, &pe1, &pe2] {
                if path.exists() {
                    debug!("Skipping re-download of existing file: {}", path.display());
                }
            }
        } else {
            layout.ensure_root()?;
            let cwd = layout.root().as_std_path();
            self.configure_quality(cwd)?;

            let prefetch = self.executor.execute(
                &self.prefetch_command(accession),
                cwd,
                Provider::Sra,
            )?;
            if let Some(outcome) = exec_failure(prefetch) {
                return Ok(outcome);
            }

            let dump = self.executor.execute(
                &self.fasterq_dump_command(accession),
                cwd,
                Provider::Sra,
            )?;
            if let Some(outcome) = exec_failure(dump) {
                return Ok(outcome);
            }

            if let Some(detail) = self.compress(accession, cwd)? {
                return Ok(FetchOutcome::Exhausted { detail });
            }
            fs_util::remove_if_exists(layout.staged_archive(accession).as_std_path())?;
            info!("Downloaded FASTQs for {accession}");
        }

        if pe2.exists() {
            let result = FetchResult::paired(pe1, pe2);
            return Ok(FetchOutcome::Fetched(if se.exists() {
                result.with_orphan(se)
            } else {
                result
            }));
        }
        if se.exists() {
            return Ok(FetchOutcome::Fetched(FetchResult::single(se)));
        }
        Ok(FetchOutcome::Exhausted {
            detail: format!("no FASTQ output found for {accession}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn runinfo_columns_are_renamed() {
        let text = "Run,ReleaseDate,LibraryLayout,Experiment,Sample,SRAStudy\n\
                    SRR1,2020-01-01,PAIRED,SRX1,SRS1,SRP1\n\
                    Run,ReleaseDate,LibraryLayout,Experiment,Sample,SRAStudy\n\
                    SRR2,2020-01-02,SINGLE,SRX1,SRS2,SRP1\n\
                    \n";
        let records = parse_runinfo_csv(text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].run_accession(), "SRR1");
        assert_eq!(records[0].experiment_accession(), "SRX1");
        assert_eq!(records[1].sample_accession(), "SRS2");
        assert_eq!(records[1].get("ReleaseDate"), Some("2020-01-02"));
    }

    #[test]
    fn esearch_history_keys() {
        let payload = json!({"esearchresult": {
            "count": "25000",
            "retmax": "0",
            "idlist": [],
            "webenv": "MCID_abc",
            "querykey": "1"
        }});
        let history = parse_esearch_history(&payload).unwrap();
        assert_eq!(history.count, 25_000);
        assert_eq!(history.web_env, "MCID_abc");
        assert_eq!(history.query_key, "1");

        let zero = json!({"esearchresult": {"count": "0", "webenv": "MCID_abc", "querykey": "1"}});
        assert!(parse_esearch_history(&zero).is_none());
        assert!(parse_esearch_history(&json!({})).is_none());
    }

    #[test]
    fn error_status_keeps_the_body() {
        let err = status_error("efetch.fcgi", 414, Some("Request-URI Too Long\n".to_string()));
        assert_eq!(err.provider_detail(), "STATUS: 414; TEXT: Request-URI Too Long");

        let err = status_error("esearch.fcgi", 500, Some("  ".to_string()));
        assert_eq!(err.provider_detail(), "STATUS: 500; TEXT: esearch.fcgi request failed");
    }

    #[test]
    fn efetch_pages_by_history_reference() {
        let history = SearchHistory {
            count: 25_000,
            web_env: "MCID_abc".to_string(),
            query_key: "1".to_string(),
        };
        let starts: Vec<usize> = (0..history.count).step_by(RUNINFO_PAGE_SIZE).collect();
        assert_eq!(starts, vec![0, 10_000, 20_000]);

        let params = history.efetch_params(10_000);
        assert!(params.contains(&("WebEnv", "MCID_abc".to_string())));
        assert!(params.contains(&("query_key", "1".to_string())));
        assert!(params.contains(&("retstart", "10000".to_string())));
        assert!(params.iter().all(|(key, _)| *key != "id"));
    }
}
