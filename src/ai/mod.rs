mod availability;
mod backend;
mod claude;
mod diagnostics;
pub mod partial_json;
pub mod prompt;
mod session;
mod summarizer;

#[cfg(test)]
pub(crate) mod testing;

pub use availability::{check_model, check_readiness, AvailabilityGate, AvailabilityReason};
pub use backend::{LanguageModel, ModelSession, Readiness, SnapshotStream, UnavailableReason};
pub use claude::ClaudeBackend;
pub use diagnostics::{diagnose, BackendError, Diagnosis, DiagnosisOrigin};
pub use prompt::PromptBuilder;
pub use session::{
    fold_last, fold_last_abortable, regressed_fields, Generable, GenerationError,
    GenerationSession, GenerationState, LastValue, PartialStream, Snapshot,
};
pub use summarizer::{finalize, SummarizationError, SummarizationService};
