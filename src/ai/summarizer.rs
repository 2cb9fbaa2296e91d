use std::sync::Arc;

use futures::future::AbortRegistration;
use futures::StreamExt;
use thiserror::Error;

use super::availability::{AvailabilityGate, AvailabilityReason};
use super::backend::LanguageModel;
use super::prompt::PromptBuilder;
use super::session::{fold_last, fold_last_abortable, GenerationError, GenerationSession};
use crate::models::{Article, PartialSummary, Summary, HIGHLIGHTS_MAX, HIGHLIGHTS_MIN};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummarizationError {
    #[error("No articles to summarize")]
    NoArticles,

    #[error("AI unavailable: {0}")]
    Unavailable(#[from] AvailabilityReason),

    #[error("Failed to generate summary: {0}")]
    Generation(#[from] GenerationError),

    #[error("Summary has {} highlights, expected {} to {}", .count, HIGHLIGHTS_MIN, HIGHLIGHTS_MAX)]
    SchemaViolation { count: usize },

    #[error("Summary is missing required fields: {}", .missing.join(", "))]
    Incomplete { missing: Vec<&'static str> },
}

/// Turns article batches into digests. Holds no state between calls; every call opens
/// a fresh generation session.
pub struct SummarizationService {
    model: Arc<dyn LanguageModel>,
    gate: AvailabilityGate,
    prompts: PromptBuilder,
}

impl SummarizationService {
    pub fn new(model: Arc<dyn LanguageModel>, prompts: PromptBuilder) -> Self {
        let gate = AvailabilityGate::new(Arc::clone(&model));
        Self {
            model,
            gate,
            prompts,
        }
    }

    pub fn gate(&self) -> &AvailabilityGate {
        &self.gate
    }

    pub async fn summarize_text(&self, articles: &[Article]) -> Result<String, SummarizationError> {
        self.text(articles, None).await
    }

    pub async fn summarize_text_abortable(
        &self,
        articles: &[Article],
        registration: AbortRegistration,
    ) -> Result<String, SummarizationError> {
        self.text(articles, Some(registration)).await
    }

    pub async fn summarize_structured(
        &self,
        articles: &[Article],
    ) -> Result<Summary, SummarizationError> {
        self.structured(articles, None, &mut |_| {}).await
    }

    /// Structured summary that reports every snapshot as it arrives, for progressive display.
    pub async fn summarize_structured_streaming(
        &self,
        articles: &[Article],
        registration: AbortRegistration,
        on_snapshot: &mut (dyn FnMut(&PartialSummary) + Send),
    ) -> Result<Summary, SummarizationError> {
        self.structured(articles, Some(registration), on_snapshot).await
    }

    async fn session_for(
        &self,
        articles: &[Article],
    ) -> Result<GenerationSession, SummarizationError> {
        if articles.is_empty() {
            return Err(SummarizationError::NoArticles);
        }
        self.gate.check_availability().await?;
        Ok(GenerationSession::from_backend(self.model.open_session()))
    }

    async fn text(
        &self,
        articles: &[Article],
        registration: Option<AbortRegistration>,
    ) -> Result<String, SummarizationError> {
        let mut session = self.session_for(articles).await?;
        let prompt = self.prompts.text_summary(articles);
        tracing::debug!(
            articles = articles.len(),
            prompt_length = prompt.len(),
            "Requesting text summary"
        );

        let text = match registration {
            Some(registration) => session.respond_abortable(&prompt, registration).await?,
            None => session.respond(&prompt).await?,
        };
        Ok(text)
    }

    async fn structured(
        &self,
        articles: &[Article],
        registration: Option<AbortRegistration>,
        on_snapshot: &mut (dyn FnMut(&PartialSummary) + Send),
    ) -> Result<Summary, SummarizationError> {
        let mut session = self.session_for(articles).await?;
        let prompt = self.prompts.structured_summary(articles);
        tracing::debug!(
            articles = articles.len(),
            prompt_length = prompt.len(),
            "Requesting structured summary"
        );

        let stream = session
            .stream_structured::<Summary>(&prompt)
            .await?
            .inspect(|item| {
                if let Ok(partial) = item {
                    on_snapshot(partial);
                }
            });

        let last = match registration {
            Some(registration) => fold_last_abortable(stream, registration).await?,
            None => fold_last(stream).await?,
        };
        finalize(last)
    }
}

/// Checks the folded snapshot against the [`Summary`] contract.
pub fn finalize(partial: PartialSummary) -> Result<Summary, SummarizationError> {
    let summary_text = partial.summary_text.filter(|s| !s.trim().is_empty());
    let headline = partial.headline.filter(|s| !s.trim().is_empty());

    match (summary_text, headline, partial.highlights) {
        (Some(summary_text), Some(headline), Some(highlights)) => {
            let count = highlights.len();
            if !(HIGHLIGHTS_MIN..=HIGHLIGHTS_MAX).contains(&count) {
                tracing::warn!(count, "Structured summary violates highlight bounds");
                return Err(SummarizationError::SchemaViolation { count });
            }
            Ok(Summary {
                summary_text,
                highlights,
                headline,
                icon: partial.icon,
                call_to_action: partial.call_to_action,
            })
        }
        (summary_text, headline, highlights) => {
            let mut missing = Vec::new();
            if summary_text.is_none() {
                missing.push("summaryText");
            }
            if highlights.is_none() {
                missing.push("highlights");
            }
            if headline.is_none() {
                missing.push("headline");
            }
            tracing::warn!(?missing, "Structured summary incomplete");
            Err(SummarizationError::Incomplete { missing })
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::future::AbortHandle;
    use serde_json::json;

    use super::*;
    use crate::ai::prompt::tests::article;
    use crate::ai::testing::ScriptedModel;
    use crate::ai::{Readiness, Snapshot, UnavailableReason};

    fn service(model: &ScriptedModel) -> SummarizationService {
        SummarizationService::new(Arc::new(model.clone()), PromptBuilder::new(10, 10_000))
    }

    fn batch(n: usize) -> Vec<Article> {
        (0..n).map(article).collect()
    }

    #[tokio::test]
    async fn text_summary_issues_one_gated_request() {
        let model = ScriptedModel::new().reply("Markets were calm.");

        let text = service(&model).summarize_text(&batch(12)).await.unwrap();

        assert_eq!(text, "Markets were calm.");
        assert_eq!(model.readiness_checks(), 1);
        assert_eq!(model.requests(), 1);
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("Title 9"));
        assert!(!prompt.contains("Title 10"));
    }

    #[tokio::test]
    async fn model_not_ready_fails_without_request() {
        let model = ScriptedModel::new().unavailable(UnavailableReason::ModelNotReady);

        let err = service(&model).summarize_text(&batch(3)).await.unwrap_err();

        assert_eq!(
            err,
            SummarizationError::Unavailable(AvailabilityReason::ModelNotReady)
        );
        assert_eq!(model.requests(), 0);
    }

    #[tokio::test]
    async fn availability_is_rechecked_on_every_call() {
        let model = ScriptedModel::new()
            .unavailable(UnavailableReason::ModelNotReady)
            .reply("ready now");
        let service = service(&model);

        assert!(service.summarize_text(&batch(1)).await.is_err());
        model.set_readiness(Readiness::Available);
        assert_eq!(service.summarize_text(&batch(1)).await.unwrap(), "ready now");
        assert_eq!(model.readiness_checks(), 2);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected_before_any_backend_call() {
        let model = ScriptedModel::new();

        assert_eq!(
            service(&model).summarize_structured(&[]).await,
            Err(SummarizationError::NoArticles)
        );
        assert_eq!(model.readiness_checks(), 0);
    }

    #[tokio::test]
    async fn structured_stream_folds_to_last_snapshot() {
        let model = ScriptedModel::new().stream(vec![
            json!({"headline": "A"}),
            json!({"headline": "A", "summaryText": "B"}),
            json!({"headline": "A", "summaryText": "B", "highlights": ["x", "y"]}),
        ]);

        let summary = service(&model).summarize_structured(&batch(3)).await.unwrap();

        assert_eq!(
            summary,
            Summary {
                summary_text: "B".into(),
                highlights: vec!["x".into(), "y".into()],
                headline: "A".into(),
                icon: None,
                call_to_action: None,
            }
        );
        assert_eq!(model.readiness_checks(), 1);
        assert_eq!(model.requests(), 1);
    }

    #[tokio::test]
    async fn streaming_reports_monotonic_snapshots() {
        let model = ScriptedModel::new().stream(vec![
            json!({"headline": "A"}),
            json!({"headline": "A", "summaryText": "B"}),
            json!({"headline": "A", "summaryText": "B", "highlights": ["x", "y", "z"], "icon": "📈"}),
        ]);
        let (_handle, registration) = AbortHandle::new_pair();
        let mut seen: Vec<Vec<&'static str>> = Vec::new();

        let summary = service(&model)
            .summarize_structured_streaming(&batch(3), registration, &mut |p| {
                seen.push(p.populated())
            })
            .await
            .unwrap();

        assert_eq!(seen.len(), 3);
        for pair in seen.windows(2) {
            assert!(pair[0].iter().all(|f| pair[1].contains(f)));
        }
        assert_eq!(summary.icon.as_deref(), Some("📈"));
    }

    #[tokio::test]
    async fn too_many_highlights_is_schema_violation() {
        let model = ScriptedModel::new().stream(vec![json!({
            "headline": "A",
            "summaryText": "B",
            "highlights": ["1", "2", "3", "4", "5"]
        })]);

        assert_eq!(
            service(&model).summarize_structured(&batch(2)).await,
            Err(SummarizationError::SchemaViolation { count: 5 })
        );
    }

    #[tokio::test]
    async fn missing_required_fields_is_incomplete() {
        let model = ScriptedModel::new().stream(vec![json!({"headline": "A"})]);

        assert_eq!(
            service(&model).summarize_structured(&batch(2)).await,
            Err(SummarizationError::Incomplete {
                missing: vec!["summaryText", "highlights"]
            })
        );
    }

    #[tokio::test]
    async fn empty_stream_is_generation_empty() {
        let model = ScriptedModel::new().stream(vec![]);

        assert_eq!(
            service(&model).summarize_structured(&batch(2)).await,
            Err(SummarizationError::Generation(GenerationError::Empty))
        );
    }

    #[test]
    fn single_highlight_is_schema_violation() {
        let partial = PartialSummary {
            summary_text: Some("B".into()),
            headline: Some("A".into()),
            highlights: Some(vec!["only".into()]),
            ..Default::default()
        };
        assert_eq!(
            finalize(partial),
            Err(SummarizationError::SchemaViolation { count: 1 })
        );
    }

    #[test]
    fn blank_required_text_counts_as_missing() {
        let partial = PartialSummary {
            summary_text: Some("  ".into()),
            headline: Some("A".into()),
            highlights: Some(vec!["x".into(), "y".into()]),
            ..Default::default()
        };
        assert_eq!(
            finalize(partial),
            Err(SummarizationError::Incomplete {
                missing: vec!["summaryText"]
            })
        );
    }
}
