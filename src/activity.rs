//! Usage events recorded by the application layer. The digest engine itself never logs
//! activity; callers decide what to record from the results they get back.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    SummaryGenerated,
    ArticleViewed,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::SummaryGenerated => "summary",
            ActivityKind::ArticleViewed => "articleView",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub kind: ActivityKind,
    pub metadata: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Activity {
    pub fn new(kind: ActivityKind, metadata: Option<String>) -> Self {
        Self {
            kind,
            metadata,
            timestamp: Utc::now(),
        }
    }
}

pub trait ActivitySink: Send + Sync {
    fn record(&self, activity: Activity);
}

/// Records activity as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActivitySink;

impl ActivitySink for TracingActivitySink {
    fn record(&self, activity: Activity) {
        tracing::info!(
            kind = activity.kind.as_str(),
            metadata = activity.metadata.as_deref().unwrap_or(""),
            timestamp = %activity.timestamp.to_rfc3339(),
            "Activity"
        );
    }
}
