use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use fastq_dl::app::{
    App, DOWNLOAD_FAILED_TAG, DownloadRequest, ProgressEvent, ProgressLevel, ProgressSink,
};
use fastq_dl::domain::{Accession, FetchOutcome, FetchResult, GroupBy, Provider, RunRecord};
use fastq_dl::error::FastqDlError;
use fastq_dl::layout::OutputLayout;
use fastq_dl::providers::{FileFetcher, MetadataProvider};
use fastq_dl::resolver::MetadataResolver;
use fastq_dl::retry::RetryPolicy;

struct MockMetadata {
    provider: Provider,
    records: Vec<RunRecord>,
    calls: Mutex<usize>,
}

impl MockMetadata {
    fn new(provider: Provider, records: Vec<RunRecord>) -> Self {
        Self {
            provider,
            records,
            calls: Mutex::new(0),
        }
    }
}

impl MetadataProvider for MockMetadata {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn search(&self, _accession: &Accession) -> Result<Vec<RunRecord>, FastqDlError> {
        *self.calls.lock().unwrap() += 1;
        if self.records.is_empty() {
            return Err(FastqDlError::ProviderStatus {
                provider: self.provider,
                status: 500,
                message: "unavailable".to_string(),
            });
        }
        Ok(self.records.clone())
    }
}

#[derive(Clone, Copy)]
enum Behaviour {
    NotFound,
    Exhausted,
    WritePaired,
    WriteSingle,
    Corrupt,
}

struct MockFetcher {
    provider: Provider,
    behaviour: Behaviour,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    fn new(provider: Provider, behaviour: Behaviour) -> Self {
        Self {
            provider,
            behaviour,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl FileFetcher for MockFetcher {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn fetch(
        &self,
        run: &RunRecord,
        layout: &OutputLayout,
    ) -> Result<FetchOutcome, FastqDlError> {
        let acc = run.run_accession();
        self.calls.lock().unwrap().push(acc.to_string());
        match self.behaviour {
            Behaviour::NotFound => Ok(FetchOutcome::NotFound {
                detail: "missing".to_string(),
            }),
            Behaviour::Exhausted => Ok(FetchOutcome::Exhausted {
                detail: "wget failed".to_string(),
            }),
            Behaviour::WritePaired => {
                let r1 = layout.paired_r1(acc).into_std_path_buf();
                let r2 = layout.paired_r2(acc).into_std_path_buf();
                fs::write(&r1, format!("{acc}/1\n")).unwrap();
                fs::write(&r2, format!("{acc}/2\n")).unwrap();
                Ok(FetchOutcome::Fetched(FetchResult::paired(r1, r2)))
            }
            Behaviour::WriteSingle => {
                let se = layout.single_end(acc).into_std_path_buf();
                fs::write(&se, format!("{acc}\n")).unwrap();
                Ok(FetchOutcome::Fetched(FetchResult::single(se)))
            }
            Behaviour::Corrupt => Err(FastqDlError::Integrity {
                path: layout.single_end(acc).into_std_path_buf(),
                accession: acc.to_string(),
                attempts: 2,
            }),
        }
    }
}

#[derive(Default)]
struct CapturingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CapturingSink {
    fn messages(&self, level: ProgressLevel) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.level == level)
            .map(|event| event.message.clone())
            .collect()
    }
}

impl ProgressSink for CapturingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

type TestApp = App<MockMetadata, MockMetadata, MockFetcher, MockFetcher>;

fn run_record(run: &str, experiment: &str, sample: &str, layout: &str) -> RunRecord {
    RunRecord::new([
        ("run_accession", run),
        ("experiment_accession", experiment),
        ("sample_accession", sample),
        ("study_accession", "PRJNA1"),
        ("library_layout", layout),
    ])
}

fn build_app(
    ena_records: Vec<RunRecord>,
    sra_records: Vec<RunRecord>,
    ena: Behaviour,
    sra: Behaviour,
) -> TestApp {
    let resolver = MetadataResolver::new(
        MockMetadata::new(Provider::Ena, ena_records),
        MockMetadata::new(Provider::Sra, sra_records),
        RetryPolicy::new(2, Duration::ZERO),
    );
    App::new(
        resolver,
        MockFetcher::new(Provider::Ena, ena),
        MockFetcher::new(Provider::Sra, sra),
    )
}

fn request(dir: &tempfile::TempDir, accession: &str) -> DownloadRequest {
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    DownloadRequest {
        accession: accession.parse().unwrap(),
        provider: Provider::Ena,
        only_provider: false,
        group_by: None,
        only_metadata: false,
        layout: OutputLayout::new(root, "fastq"),
    }
}

fn run_info_lines(dir: &tempfile::TempDir) -> Vec<String> {
    fs::read_to_string(dir.path().join("fastq-run-info.tsv"))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn falls_back_to_sra_when_ena_has_no_files() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(
        vec![run_record("SRR1000001", "SRX1", "SAMN1", "SINGLE")],
        Vec::new(),
        Behaviour::NotFound,
        Behaviour::WriteSingle,
    );
    let sink = CapturingSink::default();

    let summary = app.run(&request(&temp, "SRR1000001"), &sink).unwrap();

    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.failed, 0);
    let run = &summary.runs[0];
    assert_eq!(run.provider, Some(Provider::Sra));
    assert!(run.error.is_none());
    let files = run.files.as_ref().unwrap();
    assert!(files.single_end);
    assert!(files.r2.is_none());
    assert_eq!(app.ena_fetcher().calls(), vec!["SRR1000001"]);
    assert_eq!(app.sra_fetcher().calls(), vec!["SRR1000001"]);
    assert_eq!(sink.messages(ProgressLevel::Warn).len(), 1);

    let lines = run_info_lines(&temp);
    assert!(!lines[0].contains("error"));
    assert!(lines[1].starts_with("SRR1000001\t"));
}

#[test]
fn both_providers_missing_tags_the_run() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(
        vec![run_record("SRR1000001", "SRX1", "SAMN1", "PAIRED")],
        Vec::new(),
        Behaviour::Exhausted,
        Behaviour::NotFound,
    );

    let summary = app
        .run(&request(&temp, "SRR1000001"), &CapturingSink::default())
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(
        summary.runs[0].error.as_deref(),
        Some("ENA_NOT_FOUND&SRA_NOT_FOUND")
    );
    assert!(summary.runs[0].files.is_none());

    let lines = run_info_lines(&temp);
    assert!(lines[0].ends_with("\terror"));
    assert!(lines[1].ends_with("\tENA_NOT_FOUND&SRA_NOT_FOUND"));
    let fastqs = fs::read_dir(temp.path())
        .unwrap()
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".fastq.gz"))
        .count();
    assert_eq!(fastqs, 0);
}

#[test]
fn only_provider_disables_fallback() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(
        vec![run_record("SRR1000001", "SRX1", "SAMN1", "SINGLE")],
        Vec::new(),
        Behaviour::NotFound,
        Behaviour::WriteSingle,
    );
    let mut req = request(&temp, "SRR1000001");
    req.only_provider = true;

    let summary = app.run(&req, &CapturingSink::default()).unwrap();

    assert_eq!(summary.runs[0].error.as_deref(), Some("ENA_NOT_FOUND"));
    assert!(app.sra_fetcher().calls().is_empty());
}

#[test]
fn sra_metadata_downloads_from_sra_without_fallback() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(
        Vec::new(),
        vec![run_record("SRR1000001", "SRX1", "SAMN1", "PAIRED")],
        Behaviour::WritePaired,
        Behaviour::NotFound,
    );

    let summary = app
        .run(&request(&temp, "SRR1000001"), &CapturingSink::default())
        .unwrap();

    assert_eq!(summary.metadata_source, Provider::Sra);
    assert_eq!(*app.resolver().ena().calls.lock().unwrap(), 2);
    assert_eq!(*app.resolver().sra().calls.lock().unwrap(), 1);
    assert!(app.ena_fetcher().calls().is_empty());
    assert_eq!(summary.runs[0].error.as_deref(), Some("SRA_NOT_FOUND"));
}

#[test]
fn duplicate_runs_are_fetched_once() {
    let temp = tempfile::tempdir().unwrap();
    let record = run_record("SRR1000001", "SRX1", "SAMN1", "SINGLE");
    let app = build_app(
        vec![record.clone(), record],
        Vec::new(),
        Behaviour::WriteSingle,
        Behaviour::NotFound,
    );
    let sink = CapturingSink::default();

    let summary = app.run(&request(&temp, "SRX1000001"), &sink).unwrap();

    assert_eq!(app.ena_fetcher().calls(), vec!["SRR1000001"]);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.total_runs, 2);
    assert!(sink.messages(ProgressLevel::Warn)[0].contains("Duplicate run SRR1000001"));
    assert_eq!(run_info_lines(&temp).len(), 3);
}

#[test]
fn grouped_paired_runs_merge_in_input_order() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(
        vec![
            run_record("SRR1000001", "SRX1", "SAMN9", "PAIRED"),
            run_record("SRR1000002", "SRX2", "SAMN9", "PAIRED"),
        ],
        Vec::new(),
        Behaviour::WritePaired,
        Behaviour::NotFound,
    );
    let mut req = request(&temp, "SAMN9");
    req.group_by = Some(GroupBy::Sample);

    let summary = app.run(&req, &CapturingSink::default()).unwrap();

    assert_eq!(summary.merged.len(), 1);
    let merged = &summary.merged[0];
    assert!(!merged.single_end);
    assert_eq!(
        fs::read_to_string(temp.path().join("SAMN9_R1.fastq.gz")).unwrap(),
        "SRR1000001/1\nSRR1000002/1\n"
    );
    assert_eq!(
        fs::read_to_string(temp.path().join("SAMN9_R2.fastq.gz")).unwrap(),
        "SRR1000001/2\nSRR1000002/2\n"
    );
    assert!(!temp.path().join("SRR1000001_1.fastq.gz").exists());
    assert!(!temp.path().join("SRR1000002_2.fastq.gz").exists());

    let mergers = fs::read_to_string(temp.path().join("fastq-run-mergers.tsv")).unwrap();
    let lines: Vec<&str> = mergers.lines().collect();
    assert_eq!(lines[0], "accession\tr1\tr2");
    let r1a = temp.path().join("SRR1000001_1.fastq.gz");
    let r1b = temp.path().join("SRR1000002_1.fastq.gz");
    let r2a = temp.path().join("SRR1000001_2.fastq.gz");
    let r2b = temp.path().join("SRR1000002_2.fastq.gz");
    assert_eq!(
        lines[1],
        format!(
            "SAMN9\t{};{}\t{};{}",
            r1a.display(),
            r1b.display(),
            r2a.display(),
            r2b.display()
        )
    );
}

#[test]
fn grouping_by_experiment_keeps_groups_apart() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(
        vec![
            run_record("SRR1000001", "SRX1", "SAMN9", "SINGLE"),
            run_record("SRR1000002", "SRX2", "SAMN9", "SINGLE"),
        ],
        Vec::new(),
        Behaviour::WriteSingle,
        Behaviour::NotFound,
    );
    let mut req = request(&temp, "SAMN9");
    req.group_by = Some(GroupBy::Experiment);

    let summary = app.run(&req, &CapturingSink::default()).unwrap();

    let names: Vec<&str> = summary.merged.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["SRX1", "SRX2"]);
    assert_eq!(
        fs::read_to_string(temp.path().join("SRX2.fastq.gz")).unwrap(),
        "SRR1000002\n"
    );
    assert!(!temp.path().join("SRR1000002.fastq.gz").exists());
}

#[test]
fn integrity_failure_stops_and_still_writes_run_info() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(
        vec![
            run_record("SRR1000001", "SRX1", "SAMN1", "SINGLE"),
            run_record("SRR1000002", "SRX1", "SAMN1", "SINGLE"),
        ],
        Vec::new(),
        Behaviour::Corrupt,
        Behaviour::WriteSingle,
    );

    let err = app
        .run(&request(&temp, "SRX1000001"), &CapturingSink::default())
        .unwrap_err();

    assert_matches!(err, FastqDlError::Integrity { attempts: 2, .. });
    assert_eq!(app.ena_fetcher().calls(), vec!["SRR1000001"]);
    assert!(app.sra_fetcher().calls().is_empty());
    let lines = run_info_lines(&temp);
    assert_eq!(lines.len(), 3);
    assert!(lines[1].ends_with(&format!("\t{DOWNLOAD_FAILED_TAG}")));
}

#[test]
fn metadata_only_writes_run_info_and_skips_downloads() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(
        vec![run_record("SRR1000001", "SRX1", "SAMN1", "SINGLE")],
        Vec::new(),
        Behaviour::WriteSingle,
        Behaviour::WriteSingle,
    );
    let mut req = request(&temp, "SRR1000001");
    req.only_metadata = true;
    let nested: PathBuf = temp.path().join("nested");
    req.layout = OutputLayout::new(Utf8PathBuf::from_path_buf(nested.clone()).unwrap(), "meta");

    let summary = app.run(&req, &CapturingSink::default()).unwrap();

    assert!(app.ena_fetcher().calls().is_empty());
    assert!(app.sra_fetcher().calls().is_empty());
    assert!(summary.runs.is_empty());
    let text = fs::read_to_string(nested.join("meta-run-info.tsv")).unwrap();
    assert!(text.starts_with("run_accession\texperiment_accession"));
}

#[test]
fn metadata_exhaustion_is_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(
        Vec::new(),
        Vec::new(),
        Behaviour::WriteSingle,
        Behaviour::WriteSingle,
    );

    let err = app
        .run(&request(&temp, "SRR1000001"), &CapturingSink::default())
        .unwrap_err();

    assert_matches!(err, FastqDlError::ProvidersExhausted { .. });
    assert!(!temp.path().join("fastq-run-info.tsv").exists());
}
