use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::app::{DownloadSummary, ProgressEvent, ProgressLevel, ProgressSink};
use crate::domain::RunRecord;
use crate::error::FastqDlError;
use crate::merge::RunGroup;

/// Writes one row per record, failed runs included.
///
/// The header is every field name in first-seen order, plus `error` when any
/// record carries one. No records gives an empty file.
pub fn write_run_info(records: &[RunRecord], path: &Path) -> Result<(), FastqDlError> {
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for (name, _) in record.fields() {
            if !columns.contains(&name.as_str()) {
                columns.push(name);
            }
        }
    }
    let with_error = records.iter().any(|record| record.error().is_some());

    let mut writer = tsv_writer(path)?;
    if !records.is_empty() {
        let mut header = columns.clone();
        if with_error {
            header.push("error");
        }
        writer.write_record(&header).map_err(|err| tsv_error(path, err))?;
        for record in records {
            let mut row: Vec<&str> = columns
                .iter()
                .map(|name| record.get(name).unwrap_or(""))
                .collect();
            if with_error {
                row.push(record.error().unwrap_or(""));
            }
            writer.write_record(&row).map_err(|err| tsv_error(path, err))?;
        }
    }
    writer
        .flush()
        .map_err(|err| FastqDlError::Filesystem(format!("write {}: {err}", path.display())))
}

pub fn write_run_mergers<'a>(
    groups: impl Iterator<Item = &'a RunGroup>,
    path: &Path,
) -> Result<(), FastqDlError> {
    let mut writer = tsv_writer(path)?;
    writer
        .write_record(["accession", "r1", "r2"])
        .map_err(|err| tsv_error(path, err))?;
    for group in groups {
        let r1 = join_paths(&group.r1);
        let r2 = join_paths(&group.r2);
        writer
            .write_record([group.name.as_str(), r1.as_str(), r2.as_str()])
            .map_err(|err| tsv_error(path, err))?;
    }
    writer
        .flush()
        .map_err(|err| FastqDlError::Filesystem(format!("write {}: {err}", path.display())))
}

fn join_paths(paths: &[std::path::PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(";")
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, FastqDlError> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_path(path)
        .map_err(|err| tsv_error(path, err))
}

fn tsv_error(path: &Path, err: csv::Error) -> FastqDlError {
    FastqDlError::Filesystem(format!("write {}: {err}", path.display()))
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &DownloadSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards progress events to the installed `tracing` subscriber.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        let message = match event.elapsed {
            Some(elapsed) => format!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => event.message,
        };
        match event.level {
            ProgressLevel::Debug => tracing::debug!("{message}"),
            ProgressLevel::Info => tracing::info!("{message}"),
            ProgressLevel::Warn => tracing::warn!("{message}"),
            ProgressLevel::Error => tracing::error!("{message}"),
        }
    }
}
