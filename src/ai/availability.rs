use std::sync::Arc;

use thiserror::Error;

use super::backend::{LanguageModel, Readiness, UnavailableReason};

/// Why generation cannot run right now. Always recoverable; the caller may retry later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AvailabilityReason {
    #[error("Device not eligible")]
    DeviceIneligible,
    #[error("Generative features not enabled")]
    FeatureDisabled,
    #[error("Model not ready (downloading or preparing)")]
    ModelNotReady,
    #[error("Unavailable (unknown reason)")]
    Unknown,
}

impl From<&UnavailableReason> for AvailabilityReason {
    fn from(reason: &UnavailableReason) -> Self {
        match reason {
            UnavailableReason::DeviceNotEligible => AvailabilityReason::DeviceIneligible,
            UnavailableReason::NotEnabled => AvailabilityReason::FeatureDisabled,
            UnavailableReason::ModelNotReady => AvailabilityReason::ModelNotReady,
            UnavailableReason::Other(_) => AvailabilityReason::Unknown,
        }
    }
}

pub fn check_readiness(readiness: &Readiness) -> Result<(), AvailabilityReason> {
    match readiness {
        Readiness::Available => Ok(()),
        Readiness::Unavailable(reason) => Err(reason.into()),
    }
}

/// Queries the backend once and maps the answer onto [`AvailabilityReason`].
pub async fn check_model(model: &dyn LanguageModel) -> Result<(), AvailabilityReason> {
    let readiness = model.readiness().await;
    check_readiness(&readiness).inspect_err(|reason| {
        tracing::warn!(?readiness, %reason, "Generative model unavailable");
    })
}

#[derive(Clone)]
pub struct AvailabilityGate {
    model: Arc<dyn LanguageModel>,
}

impl AvailabilityGate {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn check_availability(&self) -> Result<(), AvailabilityReason> {
        check_model(self.model.as_ref()).await
    }
}
