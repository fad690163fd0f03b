use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, info, warn};

use crate::checksum;
use crate::domain::{
    Accession, FetchOutcome, FetchResult, LibraryLayout, PE_R1_SUFFIX, PE_R2_SUFFIX, Protocol,
    Provider, RunRecord,
};
use crate::error::FastqDlError;
use crate::executor::{CommandRunner, ExecOutcome, Executor, ToolCommand};
use crate::fs_util;
use crate::layout::OutputLayout;
use crate::providers::{FileFetcher, MetadataProvider, build_query_url, http_client};
use crate::retry::{Attempt, RetryError};

pub const ENA_SEARCH_URL: &str = "https://www.ebi.ac.uk/ena/portal/api/search";

#[derive(Clone)]
pub struct EnaHttpClient {
    client: Client,
    base_url: String,
}

impl EnaHttpClient {
    pub fn new() -> Result<Self, FastqDlError> {
        Ok(Self {
            client: http_client(Provider::Ena, Duration::from_secs(30))?,
            base_url: ENA_SEARCH_URL.to_string(),
        })
    }

    pub fn search_url(&self, accession: &Accession) -> String {
        let query = format!("\"{}\"", accession.ena_query());
        build_query_url(
            &self.base_url,
            &[
                ("result", "read_run"),
                ("format", "tsv"),
                ("query", query.as_str()),
                ("fields", "all"),
            ],
        )
    }
}

impl MetadataProvider for EnaHttpClient {
    fn provider(&self) -> Provider {
        Provider::Ena
    }

    fn search(&self, accession: &Accession) -> Result<Vec<RunRecord>, FastqDlError> {
        let response = self
            .client
            .get(self.search_url(accession))
            .send()
            .map_err(|err| FastqDlError::ProviderHttp {
                provider: Provider::Ena,
                message: err.to_string(),
            })?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "ENA request failed".to_string());
            return Err(FastqDlError::ProviderStatus {
                provider: Provider::Ena,
                status,
                message,
            });
        }
        let text = response.text().map_err(|err| FastqDlError::ProviderHttp {
            provider: Provider::Ena,
            message: err.to_string(),
        })?;
        let records = parse_search_tsv(&text)?;
        if records.is_empty() {
            return Err(FastqDlError::EmptyResponse {
                provider: Provider::Ena,
                status: Some(status),
            });
        }
        Ok(records)
    }
}

/// Parses the portal's TSV answer: a header row, then one row per run.
pub fn parse_search_tsv(text: &str) -> Result<Vec<RunRecord>, FastqDlError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());
    let headers = match reader.headers() {
        Ok(headers) => headers
            .iter()
            .map(|name| name.trim().to_string())
            .collect::<Vec<_>>(),
        Err(err) => {
            return Err(FastqDlError::MetadataParse {
                provider: Provider::Ena,
                message: err.to_string(),
            });
        }
    };

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|err| FastqDlError::MetadataParse {
            provider: Provider::Ena,
            message: err.to_string(),
        })?;
        let fields = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), row.get(idx).unwrap_or("").trim_end().to_string()));
        records.push(RunRecord::new(fields));
    }
    Ok(records)
}

#[derive(Debug, Clone, Copy)]
pub struct EnaFetchOptions {
    pub force: bool,
    pub ignore_checksum: bool,
    pub protocol: Protocol,
}

/// Fetches a run's FASTQs file by file from the URLs ENA lists for it,
/// checking each against its declared MD5.
pub struct EnaFetcher<R: CommandRunner> {
    executor: Executor<R>,
    options: EnaFetchOptions,
}

enum FileOutcome {
    Ready(PathBuf),
    Unavailable(String),
}

enum TransferFailure {
    Mismatch,
    Unavailable(String),
    Hard(FastqDlError),
}

impl<R: CommandRunner> EnaFetcher<R> {
    pub fn new(executor: Executor<R>, options: EnaFetchOptions) -> Self {
        Self { executor, options }
    }

    pub fn executor(&self) -> &Executor<R> {
        &self.executor
    }

    fn transfer_url(&self, url: &str) -> String {
        if url.contains("://") {
            url.to_string()
        } else {
            format!("{}://{url}", self.options.protocol)
        }
    }

    fn download_fastq(
        &self,
        url: &str,
        expected_md5: &str,
        accession: &str,
        layout: &OutputLayout,
    ) -> Result<FileOutcome, FastqDlError> {
        let fastq = layout.for_url(url).into_std_path_buf();

        if fastq.exists() {
            if self.options.force {
                warn!("Overwriting existing file: {}", fastq.display());
                fs_util::remove_if_exists(&fastq)?;
            } else if self.options.ignore_checksum {
                warn!("Skipping re-download of existing file: {}", fastq.display());
                return Ok(FileOutcome::Ready(fastq));
            } else {
                debug!("Checking the MD5 of the existing file {}...", fastq.display());
                if checksum::matches(&fastq, expected_md5)? {
                    info!("MD5s match, skipping re-download of {}", fastq.display());
                    return Ok(FileOutcome::Ready(fastq));
                }
                warn!("MD5s do not match, re-downloading {}", fastq.display());
                fs_util::remove_if_exists(&fastq)?;
            }
        }

        layout.ensure_root()?;
        let command = ToolCommand::new("wget").args([
            "--quiet".to_string(),
            "-O".to_string(),
            fastq.to_string_lossy().to_string(),
            self.transfer_url(url),
        ]);
        let protocol = self.options.protocol.to_string().to_uppercase();
        let label = format!("{} download", fastq.display());
        let result = self.executor.policy().run(&label, |attempt| {
            info!("{} {protocol} download attempt {attempt}", fastq.display());
            match self.executor.execute(&command, layout.root().as_std_path(), Provider::Ena) {
                Ok(ExecOutcome::Success { .. }) => {}
                Ok(ExecOutcome::NotFound { message, .. })
                | Ok(ExecOutcome::Failed { message, .. }) => {
                    return Attempt::Abort(TransferFailure::Unavailable(message));
                }
                Err(err) => return Attempt::Abort(TransferFailure::Hard(err)),
            }

            if self.options.ignore_checksum {
                debug!("--ignore used, skipping MD5 check for {}", fastq.display());
                return Attempt::Done(());
            }
            match checksum::matches(&fastq, expected_md5) {
                Ok(true) => {
                    info!("Successfully downloaded {}", fastq.display());
                    Attempt::Done(())
                }
                Ok(false) => {
                    warn!(
                        "MD5 checksums do not match, attempting re-download of {}",
                        fastq.display()
                    );
                    match fs_util::remove_if_exists(&fastq) {
                        Ok(_) => Attempt::Retry(TransferFailure::Mismatch),
                        Err(err) => Attempt::Abort(TransferFailure::Hard(err)),
                    }
                }
                Err(err) => Attempt::Abort(TransferFailure::Hard(err)),
            }
        });

        match result {
            Ok(()) => Ok(FileOutcome::Ready(fastq)),
            Err(RetryError::Exhausted {
                attempts,
                last: TransferFailure::Mismatch,
            }) => Err(FastqDlError::Integrity {
                path: fastq,
                accession: accession.to_string(),
                attempts,
            }),
            Err(err) => match err.into_inner() {
                TransferFailure::Unavailable(message) => Ok(FileOutcome::Unavailable(message)),
                TransferFailure::Hard(err) => Err(err),
                TransferFailure::Mismatch => Err(FastqDlError::Integrity {
                    path: fastq,
                    accession: accession.to_string(),
                    attempts: self.executor.policy().max_attempts(),
                }),
            },
        }
    }
}

impl<R: CommandRunner> FileFetcher for EnaFetcher<R> {
    fn provider(&self) -> Provider {
        Provider::Ena
    }

    fn fetch(
        &self,
        run: &RunRecord,
        layout: &OutputLayout,
    ) -> Result<FetchOutcome, FastqDlError> {
        let accession = run.run_accession();
        let urls = run.fastq_urls();
        if urls.is_empty() {
            return Ok(FetchOutcome::NotFound {
                detail: format!("no FASTQ files listed for {accession}"),
            });
        }
        let checksums = run.fastq_checksums();
        let paired = run.library_layout() == LibraryLayout::Paired;

        let mut r1 = None;
        let mut r2 = None;
        for (idx, url) in urls.iter().copied().enumerate() {
            let mut is_r2 = false;
            // Paired runs occasionally list a third, unpaired file.
            if paired {
                if url.ends_with(PE_R2_SUFFIX) {
                    is_r2 = true;
                } else if !url.ends_with(PE_R1_SUFFIX) && urls.len() != 1 {
                    debug!("Skipping {url}, not part of the read pair");
                    continue;
                }
            }

            let md5 = checksums.get(idx).copied().unwrap_or("");
            if md5.is_empty() {
                debug!("Skipping {url}, no MD5 declared");
                continue;
            }

            match self.download_fastq(url, md5, accession, layout)? {
                FileOutcome::Ready(path) if is_r2 => r2 = Some(path),
                FileOutcome::Ready(path) => r1 = Some(path),
                FileOutcome::Unavailable(message) => {
                    return Ok(FetchOutcome::Exhausted {
                        detail: format!("{url}: {message}"),
                    });
                }
            }
        }

        Ok(match (r1, r2) {
            (Some(r1), Some(r2)) => FetchOutcome::Fetched(FetchResult::paired(r1, r2)),
            (Some(r1), None) => FetchOutcome::Fetched(FetchResult::single(r1)),
            (None, _) => FetchOutcome::NotFound {
                detail: format!("no usable read 1 file listed for {accession}"),
            },
        })
    }
}
