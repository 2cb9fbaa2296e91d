//! The seam between the digest engine and a concrete generative model.

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::diagnostics::BackendError;

/// Raw readiness as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Available,
    Unavailable(UnavailableReason),
}

/// Backend-specific unavailability. New backends may report reasons the gate does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UnavailableReason {
    DeviceNotEligible,
    NotEnabled,
    ModelNotReady,
    Other(String),
}

/// Successive JSON snapshots of a structured value, each at least as complete as the last.
pub type SnapshotStream = BoxStream<'static, std::result::Result<serde_json::Value, BackendError>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Current readiness. Not cached; a model download may finish between calls.
    async fn readiness(&self) -> Readiness;

    /// Opens a fresh conversation context.
    fn open_session(&self) -> Box<dyn ModelSession>;
}

#[async_trait]
pub trait ModelSession: Send {
    async fn respond(&mut self, prompt: &str) -> std::result::Result<String, BackendError>;

    async fn stream_structured(
        &mut self,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> std::result::Result<SnapshotStream, BackendError>;
}
