use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::domain::{Accession, FetchOutcome, FetchResult, GroupBy, Provider, RunRecord};
use crate::error::FastqDlError;
use crate::layout::OutputLayout;
use crate::merge::{self, MergedGroup, RunGroup, RunGroups};
use crate::output;
use crate::providers::{FileFetcher, MetadataProvider};
use crate::resolver::MetadataResolver;

/// Error tag for a run whose download stopped the invocation.
pub const DOWNLOAD_FAILED_TAG: &str = "DOWNLOAD_FAILED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub level: ProgressLevel,
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: ProgressLevel::Info,
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            level: ProgressLevel::Warn,
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self {
            level: ProgressLevel::Debug,
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: ProgressLevel::Error,
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub accession: Accession,
    pub provider: Provider,
    pub only_provider: bool,
    pub group_by: Option<GroupBy>,
    pub only_metadata: bool,
    pub layout: OutputLayout,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_accession: String,
    pub provider: Option<Provider>,
    pub files: Option<FetchResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    pub query: String,
    pub metadata_source: Provider,
    pub total_runs: usize,
    pub fetched: usize,
    pub failed: usize,
    pub duplicates: usize,
    pub runs: Vec<RunSummary>,
    pub merged: Vec<MergedGroup>,
    pub run_info: PathBuf,
    pub run_mergers: Option<PathBuf>,
    pub finished_at: String,
}

/// Drives one invocation: metadata, per-run fetch with fallback, merging
/// and the run-info/run-mergers reports.
pub struct App<E, S, FE, FS>
where
    E: MetadataProvider,
    S: MetadataProvider,
    FE: FileFetcher,
    FS: FileFetcher,
{
    resolver: MetadataResolver<E, S>,
    ena: FE,
    sra: FS,
}

struct RunFetch {
    fetched: Option<(Provider, FetchResult)>,
    error: Option<String>,
}

impl<E, S, FE, FS> App<E, S, FE, FS>
where
    E: MetadataProvider,
    S: MetadataProvider,
    FE: FileFetcher,
    FS: FileFetcher,
{
    pub fn new(resolver: MetadataResolver<E, S>, ena: FE, sra: FS) -> Self {
        Self { resolver, ena, sra }
    }

    pub fn resolver(&self) -> &MetadataResolver<E, S> {
        &self.resolver
    }

    pub fn ena_fetcher(&self) -> &FE {
        &self.ena
    }

    pub fn sra_fetcher(&self) -> &FS {
        &self.sra
    }

    fn fetcher(&self, provider: Provider) -> &dyn FileFetcher {
        match provider {
            Provider::Ena => &self.ena,
            Provider::Sra => &self.sra,
        }
    }

    pub fn run(
        &self,
        request: &DownloadRequest,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadSummary, FastqDlError> {
        let metadata = self.resolver.resolve(
            &request.accession,
            request.provider,
            request.only_provider,
        )?;
        let mut records = metadata.records;
        let layout = &request.layout;
        let run_info = layout.run_info().into_std_path_buf();

        sink.event(ProgressEvent::info(format!("Query: {}", request.accession)));
        sink.event(ProgressEvent::info(format!("Archive: {}", request.provider)));

        let mut summary = DownloadSummary {
            query: request.accession.to_string(),
            metadata_source: metadata.source,
            total_runs: records.len(),
            fetched: 0,
            failed: 0,
            duplicates: 0,
            runs: Vec::new(),
            merged: Vec::new(),
            run_info: run_info.clone(),
            run_mergers: None,
            finished_at: String::new(),
        };

        if request.only_metadata {
            sink.event(ProgressEvent::info(format!(
                "Total Runs Found: {}",
                records.len()
            )));
            sink.event(ProgressEvent::debug(
                "--only-download-metadata used, skipping FASTQ downloads",
            ));
            layout.ensure_root()?;
            sink.event(ProgressEvent::info(format!(
                "Writing metadata to {}",
                run_info.display()
            )));
            output::write_run_info(&records, &run_info)?;
            summary.finished_at = timestamp();
            return Ok(summary);
        }

        sink.event(ProgressEvent::info(format!(
            "Total Runs To Download: {}",
            records.len()
        )));

        // ENA metadata is only trusted to drive an ENA download when ENA was
        // asked for; SRA metadata has no file URLs, so it never falls back.
        let (primary, no_fallback) =
            if request.provider == Provider::Ena && metadata.source == Provider::Ena {
                (Provider::Ena, request.only_provider)
            } else {
                (
                    Provider::Sra,
                    request.only_provider || metadata.source == Provider::Sra,
                )
            };

        let mut seen = HashSet::new();
        let mut groups = RunGroups::default();
        for idx in 0..records.len() {
            let run_acc = records[idx].run_accession().to_string();
            if !seen.insert(run_acc.clone()) {
                sink.event(ProgressEvent::warn(format!(
                    "Duplicate run {run_acc} found, skipping re-download..."
                )));
                summary.duplicates += 1;
                continue;
            }
            sink.event(ProgressEvent::info(format!("Working on run {run_acc}...")));
            let started = Instant::now();

            let fetch = match self.fetch_with_fallback(
                &records[idx],
                primary,
                no_fallback,
                layout,
                sink,
            ) {
                Ok(fetch) => fetch,
                Err(err) => {
                    records[idx].set_error(DOWNLOAD_FAILED_TAG);
                    sink.event(ProgressEvent::error(format!(
                        "Download of {run_acc} failed: {err}"
                    )));
                    sink.event(ProgressEvent::info(format!(
                        "Writing metadata to {}",
                        run_info.display()
                    )));
                    layout.ensure_root()?;
                    output::write_run_info(&records, &run_info)?;
                    return Err(err);
                }
            };

            if let Some(error) = &fetch.error {
                records[idx].set_error(error.clone());
                summary.failed += 1;
            }
            if let Some((provider, result)) = &fetch.fetched {
                summary.fetched += 1;
                sink.event(
                    ProgressEvent::info(format!("Fetched {run_acc} from {provider}"))
                        .with_elapsed(started.elapsed()),
                );
                if let Some(group_by) = request.group_by {
                    groups.add(records[idx].group_key(group_by), result);
                }
            }
            summary.runs.push(RunSummary {
                run_accession: run_acc,
                provider: fetch.fetched.as_ref().map(|(provider, _)| *provider),
                files: fetch.fetched.map(|(_, result)| result),
                error: fetch.error,
            });
        }

        layout.ensure_root()?;
        if request.group_by.is_some() && !groups.is_empty() {
            for group in groups.iter() {
                summary.merged.push(self.merge_group(group, layout, sink)?);
            }
            let run_mergers = layout.run_mergers().into_std_path_buf();
            sink.event(ProgressEvent::info(format!(
                "Writing merged run info to {}",
                run_mergers.display()
            )));
            output::write_run_mergers(groups.iter(), &run_mergers)?;
            summary.run_mergers = Some(run_mergers);
        }

        sink.event(ProgressEvent::info(format!(
            "Writing metadata to {}",
            run_info.display()
        )));
        output::write_run_info(&records, &run_info)?;
        summary.finished_at = timestamp();
        Ok(summary)
    }

    fn merge_group(
        &self,
        group: &RunGroup,
        layout: &OutputLayout,
        sink: &dyn ProgressSink,
    ) -> Result<MergedGroup, FastqDlError> {
        let mode = if group.is_paired() { "paired" } else { "single" };
        sink.event(ProgressEvent::info(format!(
            "Merging {mode} end runs to {}...",
            group.name
        )));
        let started = Instant::now();
        let merged = merge::merge_group(group, layout)?;
        sink.event(
            ProgressEvent::debug(format!("Merged {}", group.name)).with_elapsed(started.elapsed()),
        );
        Ok(merged)
    }

    fn fetch_with_fallback(
        &self,
        run: &RunRecord,
        primary: Provider,
        no_fallback: bool,
        layout: &OutputLayout,
        sink: &dyn ProgressSink,
    ) -> Result<RunFetch, FastqDlError> {
        let run_acc = run.run_accession();
        let primary_detail = match self.fetcher(primary).fetch(run, layout)? {
            FetchOutcome::Fetched(result) => {
                return Ok(RunFetch {
                    fetched: Some((primary, result)),
                    error: None,
                });
            }
            FetchOutcome::NotFound { detail } | FetchOutcome::Exhausted { detail } => detail,
        };

        if no_fallback {
            sink.event(ProgressEvent::error(format!(
                "No files for {run_acc} on {primary} ({primary_detail}), and fallback is disabled"
            )));
            return Ok(RunFetch {
                fetched: None,
                error: Some(primary.not_found_tag().to_string()),
            });
        }

        let secondary = primary.other();
        sink.event(ProgressEvent::warn(format!(
            "No files for {run_acc} on {primary} ({primary_detail}), trying {secondary}..."
        )));
        match self.fetcher(secondary).fetch(run, layout)? {
            FetchOutcome::Fetched(result) => Ok(RunFetch {
                fetched: Some((secondary, result)),
                error: None,
            }),
            FetchOutcome::NotFound { detail } | FetchOutcome::Exhausted { detail } => {
                sink.event(ProgressEvent::error(format!(
                    "No files for {run_acc} on {secondary} either ({detail})"
                )));
                Ok(RunFetch {
                    fetched: None,
                    error: Some(format!(
                        "{}&{}",
                        primary.not_found_tag(),
                        secondary.not_found_tag()
                    )),
                })
            }
        }
    }
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
