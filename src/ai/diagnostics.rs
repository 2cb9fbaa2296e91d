//! Flattening of nested backend failures into one actionable message.
//!
//! Backends report failures as a [`BackendError`] that may wrap a single underlying
//! cause, a set of underlying causes, or both. [`diagnose`] picks the most specific
//! cause with a fixed precedence so the same error always yields the same message.

use std::fmt;

const UNKNOWN_ERROR: &str = "unknown error";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendError {
    pub domain: Option<String>,
    pub code: Option<i64>,
    pub description: Option<String>,
    pub underlying: Option<Box<BackendError>>,
    pub underlying_errors: Vec<BackendError>,
}

impl BackendError {
    pub fn new(domain: impl Into<String>, code: i64, description: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            code: Some(code),
            description: Some(description.into()),
            ..Self::default()
        }
    }

    pub fn with_cause(mut self, cause: BackendError) -> Self {
        self.underlying = Some(Box::new(cause));
        self
    }

    pub fn with_causes(mut self, causes: Vec<BackendError>) -> Self {
        self.underlying_errors = causes;
        self
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.domain, self.code) {
            (Some(domain), Some(code)) => write!(f, "{} (Code {}): ", domain, code)?,
            (Some(domain), None) => write!(f, "{}: ", domain)?,
            (None, Some(code)) => write!(f, "Code {}: ", code)?,
            (None, None) => {}
        }
        f.write_str(self.description.as_deref().unwrap_or(UNKNOWN_ERROR))
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.underlying
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Which part of the error the diagnosis was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosisOrigin {
    FirstOfCauses,
    UnderlyingCause,
    TopLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub origin: DiagnosisOrigin,
    pub category: Option<String>,
    pub code: Option<i64>,
    pub message: String,
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "?".to_string());
        match self.origin {
            DiagnosisOrigin::FirstOfCauses | DiagnosisOrigin::UnderlyingCause => write!(
                f,
                "Core Error: {} (Code {})\n{}",
                self.category.as_deref().unwrap_or("unknown"),
                code,
                self.message
            ),
            DiagnosisOrigin::TopLevel if self.code.is_some() => {
                write!(f, "System Error (Code {}): {}", code, self.message)
            }
            DiagnosisOrigin::TopLevel => f.write_str(&self.message),
        }
    }
}

/// Reduces a backend error to one diagnosis.
///
/// Precedence: first element of the cause set, then the single underlying cause,
/// then the error itself. Never fails; an error with no fields reports "unknown error".
pub fn diagnose(error: &BackendError) -> Diagnosis {
    if let Some(first) = error.underlying_errors.first() {
        return from_cause(first, DiagnosisOrigin::FirstOfCauses);
    }
    if let Some(cause) = error.underlying.as_deref() {
        return from_cause(cause, DiagnosisOrigin::UnderlyingCause);
    }
    Diagnosis {
        origin: DiagnosisOrigin::TopLevel,
        category: error.domain.clone(),
        code: error.code,
        message: error
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
    }
}

fn from_cause(cause: &BackendError, origin: DiagnosisOrigin) -> Diagnosis {
    Diagnosis {
        origin,
        category: cause.domain.clone(),
        code: cause.code,
        message: cause
            .description
            .clone()
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
    }
}
