use thiserror::Error;

/// Failure of a storage adapter operation. The concrete backend error is
/// preserved as the source so callers can log or retry around it.
#[derive(Debug, Error)]
#[error("storage operation failed: {context}")]
pub struct StoreError {
    pub context: String,
    #[source]
    pub source: anyhow::Error,
}

impl StoreError {
    pub fn new(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        StoreError {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Errors a risk engine run can surface. Insufficient data and insufficient
/// history are deliberately not here; they are ordinary `RunOutcome`s.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The summary was computed but could not be persisted. The sink must be
    /// assumed to still hold its prior contents.
    #[error("failed to write risk summary back to storage")]
    SinkWrite(#[source] StoreError),
}
