//! Error taxonomy for a ranking pass.
//!
//! - A metric that cannot be parsed or derived is `None` on the record.
//! - A per-instrument enrichment failure is an entry in `BatchOutcome::failed`.
//! - Provider outages after every cache tier missed and integrity
//!   violations are `FlowError`. Storage failures are logged where they
//!   happen and never end a pass.

use thiserror::Error;

use crate::data::{FlowPeriod, ProviderError};

/// Errors that end a ranking pass.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Provider could not serve the universe and no cache tier had it
    #[error("Provider unavailable for {period}: {source}")]
    ProviderUnavailable {
        period: FlowPeriod,
        #[source]
        source: ProviderError,
    },

    /// A derived metric requires enrichment data and none exists
    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),
}

impl FlowError {
    /// Short label for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::DataIntegrity(_) => "data_integrity",
        }
    }
}
