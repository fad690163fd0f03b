use tracing::{error, info, warn};

use crate::domain::{Accession, Provider, RunRecord};
use crate::error::FastqDlError;
use crate::providers::MetadataProvider;
use crate::retry::{Attempt, RetryError, RetryPolicy};

#[derive(Debug, Clone)]
pub struct ResolvedMetadata {
    /// Provider whose answer was used.
    pub source: Provider,
    pub records: Vec<RunRecord>,
}

pub struct MetadataResolver<E, S>
where
    E: MetadataProvider,
    S: MetadataProvider,
{
    ena: E,
    sra: S,
    policy: RetryPolicy,
}

impl<E, S> MetadataResolver<E, S>
where
    E: MetadataProvider,
    S: MetadataProvider,
{
    pub fn new(ena: E, sra: S, policy: RetryPolicy) -> Self {
        Self { ena, sra, policy }
    }

    pub fn ena(&self) -> &E {
        &self.ena
    }

    pub fn sra(&self) -> &S {
        &self.sra
    }

    /// Queries for `accession`.
    ///
    /// With `only_provider`, only `provider` is asked. Otherwise ENA is always
    /// asked first and SRA only once ENA has used up its attempts, whatever
    /// `provider` says.
    pub fn resolve(
        &self,
        accession: &Accession,
        provider: Provider,
        only_provider: bool,
    ) -> Result<ResolvedMetadata, FastqDlError> {
        if only_provider {
            let source: &dyn MetadataProvider = match provider {
                Provider::Ena => &self.ena,
                Provider::Sra => &self.sra,
            };
            info!("Querying {provider} for metadata (only-provider)");
            return self
                .query(source, accession)
                .map_err(|err| FastqDlError::ProviderExhausted {
                    provider,
                    attempts: err.attempts(),
                    detail: err.into_inner().provider_detail(),
                });
        }

        info!("Querying ENA for metadata...");
        let ena_err = match self.query(&self.ena, accession) {
            Ok(metadata) => return Ok(metadata),
            Err(err) => err.into_inner(),
        };
        error!("There was an issue querying ENA, falling back to SRA");
        info!("Querying SRA for metadata...");
        self.query(&self.sra, accession)
            .map_err(|err| FastqDlError::ProvidersExhausted {
                ena_detail: ena_err.provider_detail(),
                sra_detail: err.into_inner().provider_detail(),
            })
    }

    fn query(
        &self,
        source: &dyn MetadataProvider,
        accession: &Accession,
    ) -> Result<ResolvedMetadata, RetryError<FastqDlError>> {
        let provider = source.provider();
        let label = format!("{provider} metadata query for {accession}");
        self.policy.run(&label, |_| match source.search(accession) {
            Ok(records) if records.is_empty() => Attempt::Retry(FastqDlError::EmptyResponse {
                provider,
                status: None,
            }),
            Ok(records) => Attempt::Done(ResolvedMetadata {
                source: provider,
                records,
            }),
            Err(err) => {
                warn!("{provider} query failed: {err}");
                Attempt::Retry(err)
            }
        })
    }
}
