use courier_statsd::metric;
use serde::Deserialize;

use crate::policy::{PolicyCapacity, PolicyEvent, PolicyState, TransmissionPolicy};
use crate::statsd::TransmissionCounters;
use crate::status::ResponseStatus;
use crate::transmission::{TransmissionError, TransmissionOutcome};
use crate::transmitter::Transmitter;

/// An error processing a partial success response.
#[derive(Debug, thiserror::Error)]
pub enum PartialSuccessError {
    /// The response has no body.
    #[error("partial success response has no content")]
    MissingContent,
    /// The response body is not a valid backend response.
    #[error("failed to parse partial success response")]
    Parse(#[from] serde_json::Error),
    /// The rejected items could not be extracted from the transmission.
    #[error("failed to slice transmission")]
    Slice(#[from] TransmissionError),
}

/// The body of a partial success response.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendResponse {
    /// The number of items the backend received.
    pub items_received: usize,
    /// The number of items the backend accepted.
    pub items_accepted: usize,
    /// The rejected items.
    #[serde(default)]
    pub errors: Vec<ItemError>,
}

/// A single item rejected by the backend.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    /// Zero-based position of the item in the transmission payload.
    pub index: usize,
    /// The status code describing why the item was rejected.
    pub status_code: u16,
    /// A message describing the rejection.
    #[serde(default)]
    pub message: String,
}

/// Sends items again that the backend rejected with a retryable status in a `206` response.
///
/// The retried items are cut out of the original payload by their line index and sent in a new
/// transmission after the backoff delay. Items rejected with any other status are lost.
#[derive(Debug, Default)]
pub struct PartialSuccessPolicy {
    state: PolicyState,
}

impl PartialSuccessPolicy {
    /// Creates the policy without constraints.
    pub fn new() -> Self {
        Self::default()
    }

    fn retry_rejected(
        &self,
        outcome: &TransmissionOutcome,
        transmitter: &Transmitter,
    ) -> Result<(), PartialSuccessError> {
        let content = outcome
            .response()
            .and_then(|response| response.content.as_deref())
            .ok_or(PartialSuccessError::MissingContent)?;
        let response: BackendResponse = serde_json::from_str(content)?;

        let (retryable, rejected): (Vec<_>, Vec<_>) = response
            .errors
            .iter()
            .partition(|error| ResponseStatus::new(error.status_code).is_retryable_item());

        if !rejected.is_empty() {
            courier_log::warn!(
                count = rejected.len(),
                received = response.items_received,
                accepted = response.items_accepted,
                "dropping items rejected by the backend"
            );
            metric!(
                counter(TransmissionCounters::Dropped) += rejected.len() as i64,
                reason = "rejected_item"
            );
        }

        let indexes: Vec<usize> = retryable.iter().map(|error| error.index).collect();
        let Some(transmission) = outcome.transmission.slice(&indexes)? else {
            return Ok(());
        };

        let delay = transmitter
            .backoff()
            .backoff_delay(outcome.retry_after());
        courier_log::debug!(
            count = indexes.len(),
            ?delay,
            "retrying items of partially accepted transmission"
        );

        self.state
            .pause(self.name(), PolicyCapacity::PAUSED, delay, transmitter);
        transmitter.retry(transmission, self.name());

        Ok(())
    }
}

impl TransmissionPolicy for PartialSuccessPolicy {
    fn name(&self) -> &'static str {
        "partial_success"
    }

    fn capacity(&self) -> PolicyCapacity {
        self.state.capacity()
    }

    fn handle(&self, event: &PolicyEvent<'_>, transmitter: &Transmitter) {
        let PolicyEvent::TransmissionSent(outcome) = event else {
            return;
        };

        if outcome.status() != Some(ResponseStatus::PARTIAL_SUCCESS) {
            return;
        }

        if let Err(error) = self.retry_rejected(outcome, transmitter) {
            courier_log::error!(
                error = &error as &dyn std::error::Error,
                transmission = outcome.transmission.id(),
                "failed to retry partially accepted transmission"
            );
        }
    }
}
