pub mod ena;
pub mod sra;

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::{Accession, FetchOutcome, Provider, RunRecord};
use crate::error::FastqDlError;
use crate::layout::OutputLayout;

/// Resolves an accession into run records. One call, no retries.
pub trait MetadataProvider: Send + Sync {
    fn provider(&self) -> Provider;
    fn search(&self, accession: &Accession) -> Result<Vec<RunRecord>, FastqDlError>;
}

/// Downloads the read files of one run into the output directory.
///
/// A provider that does not have the run answers with a non-`Fetched`
/// [`FetchOutcome`]; `Err` is reserved for conditions that must stop the
/// whole invocation.
pub trait FileFetcher: Send + Sync {
    fn provider(&self) -> Provider;
    fn fetch(&self, run: &RunRecord, layout: &OutputLayout)
    -> Result<FetchOutcome, FastqDlError>;
}

pub(crate) fn http_client(provider: Provider, timeout: Duration) -> Result<Client, FastqDlError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("fastq-dl/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| FastqDlError::ProviderHttp {
                provider,
                message: err.to_string(),
            })?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| FastqDlError::ProviderHttp {
            provider,
            message: err.to_string(),
        })
}

fn encode_url_component(value: &str) -> String {
    let mut out = String::new();
    for byte in value.as_bytes() {
        let ch = *byte as char;
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' || ch == '~' {
            out.push(ch);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

pub(crate) fn build_query_url(base: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return base.to_string();
    }
    let mut out = String::from(base);
    out.push('?');
    for (idx, (key, value)) in params.iter().enumerate() {
        if idx > 0 {
            out.push('&');
        }
        out.push_str(&encode_url_component(key));
        out.push('=');
        out.push_str(&encode_url_component(value));
    }
    out
}
