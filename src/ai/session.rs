//! One conversation with a generative model.
//!
//! A [`GenerationSession`] wraps a backend session and offers plain completion plus
//! streaming structured generation. Structured output arrives as a finite stream of
//! snapshots; each snapshot replaces the previous one, so consumers keep only the
//! latest (see [`LastValue`] and [`fold_last`]).

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{AbortRegistration, Abortable};
use futures::stream::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::availability::{check_model, AvailabilityReason};
use super::backend::{LanguageModel, ModelSession, SnapshotStream};
use super::diagnostics::{diagnose, BackendError, Diagnosis};

/// A partially generated value that can report which of its fields are set.
pub trait Snapshot {
    fn populated(&self) -> Vec<&'static str>;
}

/// A type the model can generate in structured form.
pub trait Generable {
    type Partial: Snapshot + DeserializeOwned + Clone + Send + 'static;

    /// JSON schema sent to the backend alongside the prompt.
    fn schema() -> serde_json::Value;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("{0}")]
    Backend(Diagnosis),
    #[error("No content generated")]
    Empty,
    #[error("Malformed partial result: {0}")]
    Malformed(String),
    #[error("Generation cancelled")]
    Cancelled,
}

impl From<&BackendError> for GenerationError {
    fn from(error: &BackendError) -> Self {
        GenerationError::Backend(diagnose(error))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationState {
    #[default]
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
}

pub struct GenerationSession {
    inner: Box<dyn ModelSession>,
    state: GenerationState,
}

impl GenerationSession {
    /// Opens a session after confirming the model is ready. Readiness may have changed
    /// since the caller last checked, so this can fail with the same reasons as the gate.
    pub async fn open(model: &dyn LanguageModel) -> Result<Self, AvailabilityReason> {
        check_model(model).await?;
        Ok(Self::from_backend(model.open_session()))
    }

    pub fn from_backend(inner: Box<dyn ModelSession>) -> Self {
        Self {
            inner,
            state: GenerationState::Idle,
        }
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    pub async fn respond(&mut self, prompt: &str) -> Result<String, GenerationError> {
        self.state = GenerationState::Requesting;
        tracing::debug!(prompt_length = prompt.len(), "Sending prompt");

        match self.inner.respond(prompt).await {
            Ok(text) if text.trim().is_empty() => {
                self.state = GenerationState::Failed;
                Err(GenerationError::Empty)
            }
            Ok(text) => {
                self.state = GenerationState::Completed;
                tracing::info!(response_length = text.len(), "Response received");
                Ok(text)
            }
            Err(e) => {
                self.state = GenerationState::Failed;
                let error = GenerationError::from(&e);
                tracing::error!(error = %error, "Generation failed");
                Err(error)
            }
        }
    }

    /// Like [`respond`](Self::respond), but gives up with [`GenerationError::Cancelled`]
    /// once the paired `AbortHandle` fires.
    pub async fn respond_abortable(
        &mut self,
        prompt: &str,
        registration: AbortRegistration,
    ) -> Result<String, GenerationError> {
        match Abortable::new(self.respond(prompt), registration).await {
            Ok(result) => result,
            Err(_aborted) => {
                self.state = GenerationState::Failed;
                tracing::debug!("Response abandoned");
                Err(GenerationError::Cancelled)
            }
        }
    }

    /// Issues one structured request and returns the snapshot stream for it.
    pub async fn stream_structured<T: Generable>(
        &mut self,
        prompt: &str,
    ) -> Result<PartialStream<'_, T>, GenerationError> {
        self.state = GenerationState::Requesting;
        tracing::debug!(prompt_length = prompt.len(), "Starting structured stream");

        let schema = T::schema();
        match self.inner.stream_structured(prompt, &schema).await {
            Ok(inner) => Ok(PartialStream {
                inner,
                state: &mut self.state,
                received: 0,
                done: false,
                _marker: PhantomData,
            }),
            Err(e) => {
                self.state = GenerationState::Failed;
                let error = GenerationError::from(&e);
                tracing::error!(error = %error, "Structured generation failed to start");
                Err(error)
            }
        }
    }
}

/// Decoded snapshots from one structured request. Finite and not restartable: after the
/// first `None` or error it yields nothing more.
pub struct PartialStream<'a, T: Generable> {
    inner: SnapshotStream,
    state: &'a mut GenerationState,
    received: usize,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Generable> PartialStream<'_, T> {
    fn fail(&mut self, error: GenerationError) -> Poll<Option<Result<T::Partial, GenerationError>>> {
        self.done = true;
        *self.state = GenerationState::Failed;
        tracing::error!(error = %error, received = self.received, "Structured stream failed");
        Poll::Ready(Some(Err(error)))
    }
}

impl<T: Generable> Stream for PartialStream<'_, T> {
    type Item = Result<T::Partial, GenerationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(value))) => match serde_json::from_value::<T::Partial>(value) {
                Ok(partial) => {
                    this.received += 1;
                    *this.state = GenerationState::Streaming;
                    Poll::Ready(Some(Ok(partial)))
                }
                Err(e) => this.fail(GenerationError::Malformed(e.to_string())),
            },
            Poll::Ready(Some(Err(e))) => this.fail(GenerationError::from(&e)),
            Poll::Ready(None) => {
                this.done = true;
                *this.state = if this.received > 0 {
                    GenerationState::Completed
                } else {
                    GenerationState::Failed
                };
                tracing::debug!(received = this.received, "Structured stream finished");
                Poll::Ready(None)
            }
        }
    }
}

/// Last-one-wins accumulator for snapshot streams.
#[derive(Debug)]
pub struct LastValue<P> {
    last: Option<P>,
    count: usize,
}

impl<P> Default for LastValue<P> {
    fn default() -> Self {
        Self {
            last: None,
            count: 0,
        }
    }
}

impl<P: Snapshot> LastValue<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the held snapshot. Fields that disappear between snapshots are logged;
    /// the newer snapshot still wins.
    pub fn push(&mut self, next: P) {
        if let Some(prev) = &self.last {
            let lost = regressed_fields(prev, &next);
            if !lost.is_empty() {
                tracing::warn!(?lost, "Snapshot dropped previously populated fields");
            }
        }
        self.last = Some(next);
        self.count += 1;
    }

    pub fn latest(&self) -> Option<&P> {
        self.last.as_ref()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn finish(self) -> Result<P, GenerationError> {
        self.last.ok_or(GenerationError::Empty)
    }
}

/// Fields populated in `prev` but not in `next`.
pub fn regressed_fields<P: Snapshot>(prev: &P, next: &P) -> Vec<&'static str> {
    let now = next.populated();
    prev.populated()
        .into_iter()
        .filter(|field| !now.contains(field))
        .collect()
}

/// Drains a snapshot stream, keeping only the latest snapshot. Zero snapshots is
/// [`GenerationError::Empty`].
pub async fn fold_last<S, P>(stream: S) -> Result<P, GenerationError>
where
    S: Stream<Item = Result<P, GenerationError>>,
    P: Snapshot,
{
    futures::pin_mut!(stream);
    let mut acc = LastValue::new();
    while let Some(item) = stream.next().await {
        acc.push(item?);
    }
    acc.finish()
}

/// [`fold_last`] that stops folding as soon as the paired `AbortHandle` fires.
pub async fn fold_last_abortable<S, P>(
    stream: S,
    registration: AbortRegistration,
) -> Result<P, GenerationError>
where
    S: Stream<Item = Result<P, GenerationError>>,
    P: Snapshot,
{
    let stream = Abortable::new(stream, registration);
    futures::pin_mut!(stream);
    let mut acc = LastValue::new();
    while let Some(item) = stream.next().await {
        acc.push(item?);
    }
    if stream.is_aborted() {
        tracing::debug!(folded = acc.count(), "Structured stream abandoned");
        return Err(GenerationError::Cancelled);
    }
    acc.finish()
}

#[cfg(test)]
mod tests {
    use futures::future::AbortHandle;
    use serde_json::json;

    use super::*;
    use crate::ai::testing::ScriptedModel;
    use crate::ai::UnavailableReason;
    use crate::models::{PartialSummary, Summary};

    #[tokio::test]
    async fn respond_returns_text_and_completes() {
        let model = ScriptedModel::new().reply("hello");
        let mut session = GenerationSession::open(&model).await.unwrap();

        assert_eq!(session.state(), GenerationState::Idle);
        assert_eq!(session.respond("hi").await.unwrap(), "hello");
        assert_eq!(session.state(), GenerationState::Completed);
        assert_eq!(model.prompts(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn respond_failure_is_diagnosed() {
        let model = ScriptedModel::new().fail(
            BackendError::new("http", 500, "server error")
                .with_cause(BackendError::new("overloaded_error", 529, "Overloaded")),
        );
        let mut session = GenerationSession::open(&model).await.unwrap();

        let err = session.respond("hi").await.unwrap_err();

        match err {
            GenerationError::Backend(d) => assert_eq!(d.message, "Overloaded"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.state(), GenerationState::Failed);
    }

    #[tokio::test]
    async fn blank_response_is_empty() {
        let model = ScriptedModel::new().reply("  \n");
        let mut session = GenerationSession::open(&model).await.unwrap();
        assert_eq!(session.respond("hi").await, Err(GenerationError::Empty));
    }

    #[tokio::test]
    async fn open_fails_when_model_not_ready() {
        let model = ScriptedModel::new().unavailable(UnavailableReason::ModelNotReady);
        let result = GenerationSession::open(&model).await;
        assert!(matches!(result, Err(AvailabilityReason::ModelNotReady)));
    }

    #[tokio::test]
    async fn stream_yields_decoded_snapshots_and_fold_keeps_last() {
        let model = ScriptedModel::new().stream(vec![
            json!({"headline": "A"}),
            json!({"headline": "A", "summaryText": "B"}),
        ]);
        let mut session = GenerationSession::open(&model).await.unwrap();

        let stream = session.stream_structured::<Summary>("go").await.unwrap();
        let last = fold_last(stream).await.unwrap();

        assert_eq!(last.headline.as_deref(), Some("A"));
        assert_eq!(last.summary_text.as_deref(), Some("B"));
        assert_eq!(session.state(), GenerationState::Completed);
    }

    #[tokio::test]
    async fn empty_stream_folds_to_empty_error() {
        let model = ScriptedModel::new().stream(vec![]);
        let mut session = GenerationSession::open(&model).await.unwrap();

        let stream = session.stream_structured::<Summary>("go").await.unwrap();
        assert_eq!(
            fold_last(stream).await.unwrap_err(),
            GenerationError::Empty
        );
        assert_eq!(session.state(), GenerationState::Failed);
    }

    #[tokio::test]
    async fn stream_is_not_restartable_after_error() {
        let model = ScriptedModel::new().stream_with(vec![
            Ok(json!({"headline": "A"})),
            Err(BackendError::new("sse", 1, "connection reset")),
            Ok(json!({"headline": "A", "summaryText": "never seen"})),
        ]);
        let mut session = GenerationSession::open(&model).await.unwrap();
        let mut stream = session.stream_structured::<Summary>("go").await.unwrap();

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
        drop(stream);
        assert_eq!(session.state(), GenerationState::Failed);
    }

    #[tokio::test]
    async fn undecodable_snapshot_is_malformed() {
        let model = ScriptedModel::new().stream(vec![json!({"highlights": "not a list"})]);
        let mut session = GenerationSession::open(&model).await.unwrap();

        let stream = session.stream_structured::<Summary>("go").await.unwrap();
        assert!(matches!(
            fold_last(stream).await,
            Err(GenerationError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn aborted_fold_is_cancelled() {
        let (handle, registration) = AbortHandle::new_pair();
        handle.abort();
        let stream = futures::stream::iter(vec![Ok(PartialSummary::default())]);

        assert_eq!(
            fold_last_abortable(stream, registration).await.unwrap_err(),
            GenerationError::Cancelled
        );
    }

    #[tokio::test]
    async fn aborted_respond_is_cancelled() {
        let model = ScriptedModel::new().hang();
        let mut session = GenerationSession::open(&model).await.unwrap();
        let (handle, registration) = AbortHandle::new_pair();
        handle.abort();

        assert_eq!(
            session.respond_abortable("hi", registration).await,
            Err(GenerationError::Cancelled)
        );
        assert_eq!(session.state(), GenerationState::Failed);
    }

    #[test]
    fn regression_detection() {
        let prev = PartialSummary {
            headline: Some("A".into()),
            summary_text: Some("B".into()),
            ..Default::default()
        };
        let next = PartialSummary {
            headline: Some("A!".into()),
            ..Default::default()
        };
        assert_eq!(regressed_fields(&prev, &next), vec!["summaryText"]);
        assert!(regressed_fields(&next, &prev).is_empty());
    }
}
