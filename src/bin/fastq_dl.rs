use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use fastq_dl::app::{App, DownloadRequest};
use fastq_dl::config::{ConfigLoader, Settings};
use fastq_dl::domain::{Accession, GroupBy, Protocol, Provider};
use fastq_dl::error::FastqDlError;
use fastq_dl::executor::{Executor, SystemRunner};
use fastq_dl::layout::OutputLayout;
use fastq_dl::output::{JsonOutput, TracingSink};
use fastq_dl::providers::ena::{EnaFetchOptions, EnaFetcher, EnaHttpClient};
use fastq_dl::providers::sra::{
    Compressor, SraFetchOptions, SraFetcher, SraHttpClient, tool_info,
};
use fastq_dl::resolver::MetadataResolver;

#[derive(Parser)]
#[command(name = "fastq-dl")]
#[command(about = "Download FASTQ files from ENA or SRA")]
#[command(version, author)]
struct Cli {
    /// ENA/SRA accession to query (Study, Sample, Experiment, Run accession)
    #[arg(short, long)]
    accession: String,

    /// Specify which provider (ENA or SRA) to use
    #[arg(long, value_enum)]
    provider: Option<Provider>,

    /// Group Runs by experiment accession
    #[arg(long, conflicts_with = "group_by_sample")]
    group_by_experiment: bool,

    /// Group Runs by sample accession
    #[arg(long)]
    group_by_sample: bool,

    /// Directory to output downloads to
    #[arg(short, long)]
    outdir: Option<PathBuf>,

    /// Prefix to use for naming log files
    #[arg(long)]
    prefix: Option<String>,

    /// Maximum number of download attempts
    #[arg(short, long)]
    max_attempts: Option<u32>,

    /// Minimum amount of time to sleep between retries, in seconds
    #[arg(short, long)]
    sleep: Option<u64>,

    /// Overwrite existing files
    #[arg(short = 'F', long)]
    force: bool,

    /// Ignore MD5 checksums for downloaded files
    #[arg(short = 'I', long = "ignore")]
    ignore_checksum: bool,

    /// Protocol to use for ENA downloads
    #[arg(long, value_enum)]
    protocol: Option<Protocol>,

    /// Set preference to SRA Lite
    #[arg(long)]
    sra_lite: bool,

    /// Only attempt download from the specified provider
    #[arg(long)]
    only_provider: bool,

    /// Skip FASTQ downloads, and retrieve only the metadata
    #[arg(long)]
    only_download_metadata: bool,

    /// Total cpus used for downloading from SRA
    #[arg(long)]
    cpus: Option<u32>,

    /// JSON settings file (default: ./fastq-dl.json when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print a JSON summary to stdout
    #[arg(long)]
    json: bool,

    /// Only critical errors will be printed
    #[arg(long, conflicts_with = "verbose")]
    silent: bool,

    /// Print debug related text
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(provider) = self.provider {
            settings.provider = provider;
        }
        if let Some(protocol) = self.protocol {
            settings.protocol = protocol;
        }
        if let Some(outdir) = &self.outdir {
            settings.outdir = outdir.clone();
        }
        if let Some(prefix) = &self.prefix {
            settings.prefix = prefix.clone();
        }
        if let Some(max_attempts) = self.max_attempts {
            settings.max_attempts = max_attempts;
        }
        if let Some(sleep) = self.sleep {
            settings.sleep = sleep;
        }
        if let Some(cpus) = self.cpus {
            settings.cpus = cpus;
        }
        if self.group_by_experiment {
            settings.group_by = Some(GroupBy::Experiment);
        } else if self.group_by_sample {
            settings.group_by = Some(GroupBy::Sample);
        }
        settings.force |= self.force;
        settings.ignore_checksum |= self.ignore_checksum;
        settings.sra_lite |= self.sra_lite;
        settings.only_provider |= self.only_provider;
        settings.only_download_metadata |= self.only_download_metadata;
        settings.normalized()
    }

    fn log_level(&self) -> &'static str {
        if self.silent {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<FastqDlError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FastqDlError) -> u8 {
    match error {
        FastqDlError::InvalidAccession(_)
        | FastqDlError::ConfigRead(_)
        | FastqDlError::ConfigParse(_) => 1,
        FastqDlError::ProviderHttp { .. }
        | FastqDlError::ProviderStatus { .. }
        | FastqDlError::EmptyResponse { .. }
        | FastqDlError::MetadataParse { .. }
        | FastqDlError::ProviderExhausted { .. }
        | FastqDlError::ProvidersExhausted { .. } => 2,
        FastqDlError::Integrity { .. }
        | FastqDlError::MergeInputMissing(_)
        | FastqDlError::MergeEmpty(_)
        | FastqDlError::Spawn { .. }
        | FastqDlError::Filesystem(_) => 3,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let accession: Accession = cli.accession.parse()?;
    let settings = cli.apply(ConfigLoader::resolve(cli.config.as_deref())?);
    debug!("Settings: {settings:?}");

    let tools = tool_info();
    debug!(
        "sra-tools: {}, pigz: {}",
        tools.sra_toolkit.as_deref().unwrap_or("not found"),
        tools.pigz.as_deref().unwrap_or("not found")
    );

    let policy = settings.retry_policy();
    let resolver = MetadataResolver::new(EnaHttpClient::new()?, SraHttpClient::new()?, policy);
    let ena = EnaFetcher::new(
        Executor::new(SystemRunner, policy),
        EnaFetchOptions {
            force: settings.force,
            ignore_checksum: settings.ignore_checksum,
            protocol: settings.protocol,
        },
    );
    let sra = SraFetcher::new(
        Executor::new(SystemRunner, policy),
        SraFetchOptions {
            force: settings.force,
            ignore_checksum: settings.ignore_checksum,
            cpus: settings.cpus,
            quality: settings.quality(),
        },
        Compressor::detect(),
    );
    let app = App::new(resolver, ena, sra);

    let request = DownloadRequest {
        accession,
        provider: settings.provider,
        only_provider: settings.only_provider,
        group_by: settings.group_by,
        only_metadata: settings.only_download_metadata,
        layout: OutputLayout::from_path(&settings.outdir, settings.prefix.clone())?,
    };
    let summary = app.run(&request, &TracingSink)?;

    if cli.json {
        JsonOutput::print_summary(&summary).into_diagnostic()?;
    }
    Ok(())
}
