//! Follow-up conversation about a batch of articles.
//!
//! A [`ChatOrchestrator`] owns the transcript for one conversation. It is seeded with the
//! digest already shown to the reader, folds the article batch into the first question it
//! forwards, and after that forwards the reader's text verbatim. At most one turn is in
//! flight; [`ChatHandle`] runs an orchestrator on its own task for callers that need to
//! share it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{AbortHandle, AbortRegistration};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::ai::{GenerationError, GenerationSession, LanguageModel, PromptBuilder};
use crate::models::{Article, ChatMessage, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input; nothing happened.
    Ignored,
    /// Another turn is in flight.
    Busy,
    Replied,
    Failed,
    Cancelled,
}

/// Read-only view of whether a turn is in flight.
#[derive(Debug, Clone)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Holds the busy flag for one turn and clears it on drop, including when the turn's
/// future is dropped mid-flight.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub messages: Vec<ChatMessage>,
    pub busy: bool,
    pub last_error: Option<String>,
}

pub struct ChatOrchestrator {
    model: Arc<dyn LanguageModel>,
    prompts: PromptBuilder,
    articles: Vec<Article>,
    initial_summary: String,
    messages: Vec<ChatMessage>,
    pending_input: String,
    busy: Arc<AtomicBool>,
    last_error: Option<String>,
    session: Option<GenerationSession>,
}

impl ChatOrchestrator {
    /// The batch and summary are captured here and never refreshed.
    pub fn new(
        model: Arc<dyn LanguageModel>,
        prompts: PromptBuilder,
        articles: Vec<Article>,
        initial_summary: impl Into<String>,
    ) -> Self {
        let initial_summary = initial_summary.into();
        Self {
            model,
            prompts,
            articles,
            messages: vec![ChatMessage::assistant(initial_summary.clone())],
            initial_summary,
            pending_input: String::new(),
            busy: Arc::new(AtomicBool::new(false)),
            last_error: None,
            session: None,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn articles(&self) -> &[Article] {
        &self.articles
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn busy_flag(&self) -> BusyFlag {
        BusyFlag(Arc::clone(&self.busy))
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn pending_input(&self) -> &str {
        &self.pending_input
    }

    pub fn set_pending_input(&mut self, text: impl Into<String>) {
        self.pending_input = text.into();
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            messages: self.messages.clone(),
            busy: self.is_busy(),
            last_error: self.last_error.clone(),
        }
    }

    /// Sends the pending input. The input is only cleared once the turn is accepted.
    pub async fn submit(&mut self) -> SendOutcome {
        if self.pending_input.trim().is_empty() {
            return SendOutcome::Ignored;
        }
        let Some(guard) = BusyGuard::claim(&self.busy) else {
            return SendOutcome::Busy;
        };
        let text = std::mem::take(&mut self.pending_input);
        self.turn(text.trim(), None, guard).await
    }

    pub async fn send_user_message(&mut self, text: &str) -> SendOutcome {
        self.send(text, None).await
    }

    /// Like [`send_user_message`](Self::send_user_message); firing the paired
    /// `AbortHandle` abandons the turn without an assistant reply or error.
    pub async fn send_user_message_abortable(
        &mut self,
        text: &str,
        registration: AbortRegistration,
    ) -> SendOutcome {
        self.send(text, Some(registration)).await
    }

    async fn send(&mut self, text: &str, registration: Option<AbortRegistration>) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Ignored;
        }
        let Some(guard) = BusyGuard::claim(&self.busy) else {
            tracing::warn!("Rejected message while a turn is in flight");
            return SendOutcome::Busy;
        };
        self.turn(text, registration, guard).await
    }

    async fn turn(
        &mut self,
        text: &str,
        registration: Option<AbortRegistration>,
        guard: BusyGuard,
    ) -> SendOutcome {
        self.begin_turn(text);
        let outcome = self.complete_turn(text, registration).await;
        drop(guard);
        outcome
    }

    fn begin_turn(&mut self, text: &str) {
        self.messages.push(ChatMessage::user(text));
        self.last_error = None;
    }

    async fn complete_turn(
        &mut self,
        text: &str,
        registration: Option<AbortRegistration>,
    ) -> SendOutcome {
        if self.session.is_none() {
            match GenerationSession::open(self.model.as_ref()).await {
                Ok(session) => self.session = Some(session),
                Err(reason) => {
                    self.last_error = Some(reason.to_string());
                    return SendOutcome::Failed;
                }
            }
        }

        // Only the first user message carries the articles and the seed summary.
        let prompt = if self.user_turns() == 1 {
            self.prompts
                .chat_opening(&self.articles, &self.initial_summary, text)
        } else {
            text.to_string()
        };

        let Some(session) = self.session.as_mut() else {
            return SendOutcome::Failed;
        };
        let result = match registration {
            Some(registration) => session.respond_abortable(&prompt, registration).await,
            None => session.respond(&prompt).await,
        };

        match result {
            Ok(reply) => {
                self.messages.push(ChatMessage::assistant(reply));
                tracing::debug!(messages = self.messages.len(), "Chat turn completed");
                SendOutcome::Replied
            }
            Err(GenerationError::Cancelled) => SendOutcome::Cancelled,
            Err(e) => {
                tracing::warn!(error = %e, "Chat turn failed");
                self.last_error = Some(e.to_string());
                SendOutcome::Failed
            }
        }
    }

    fn user_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role() == Role::User)
            .count()
    }
}

struct Turn {
    text: String,
    registration: AbortRegistration,
    guard: BusyGuard,
}

#[derive(Debug)]
pub enum Submission {
    Accepted(AbortHandle),
    Ignored,
    Busy,
    /// The conversation task has stopped.
    Closed,
}

/// Shareable front for an orchestrator running on its own task. Sends are accepted or
/// rejected immediately; results are published as [`ChatSnapshot`]s.
#[derive(Clone)]
pub struct ChatHandle {
    tx: mpsc::Sender<Turn>,
    busy: Arc<AtomicBool>,
    state: watch::Receiver<ChatSnapshot>,
}

impl ChatHandle {
    pub fn spawn(orchestrator: ChatOrchestrator) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);
        let (state_tx, state) = watch::channel(orchestrator.snapshot());
        let busy = Arc::clone(&orchestrator.busy);
        let task = tokio::spawn(run(orchestrator, rx, state_tx));
        (Self { tx, busy, state }, task)
    }

    pub fn send(&self, text: &str) -> Submission {
        let text = text.trim();
        if text.is_empty() {
            return Submission::Ignored;
        }
        let Some(guard) = BusyGuard::claim(&self.busy) else {
            return Submission::Busy;
        };
        let (abort, registration) = AbortHandle::new_pair();
        let turn = Turn {
            text: text.to_string(),
            registration,
            guard,
        };
        match self.tx.try_send(turn) {
            Ok(()) => Submission::Accepted(abort),
            Err(_) => Submission::Closed,
        }
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.state.clone()
    }
}

async fn run(
    mut orchestrator: ChatOrchestrator,
    mut rx: mpsc::Receiver<Turn>,
    state: watch::Sender<ChatSnapshot>,
) {
    while let Some(Turn {
        text,
        registration,
        guard,
    }) = rx.recv().await
    {
        orchestrator.begin_turn(&text);
        state.send_replace(orchestrator.snapshot());

        let outcome = orchestrator.complete_turn(&text, Some(registration)).await;
        drop(guard);
        tracing::debug!(?outcome, turns = orchestrator.user_turns(), "Turn finished");
        state.send_replace(orchestrator.snapshot());
    }
}
