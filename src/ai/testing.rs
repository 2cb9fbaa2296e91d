//! Scripted in-memory model for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use super::backend::{LanguageModel, ModelSession, Readiness, SnapshotStream, UnavailableReason};
use super::diagnostics::BackendError;

enum Step {
    Reply(Result<String, BackendError>),
    Stream(Vec<Result<Value, BackendError>>),
    Hang,
}

struct Script {
    readiness: Readiness,
    steps: VecDeque<Step>,
    prompts: Vec<String>,
    readiness_checks: usize,
    sessions_opened: usize,
}

#[derive(Clone)]
pub struct ScriptedModel {
    script: Arc<Mutex<Script>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                readiness: Readiness::Available,
                steps: VecDeque::new(),
                prompts: Vec::new(),
                readiness_checks: 0,
                sessions_opened: 0,
            })),
        }
    }

    fn push(self, step: Step) -> Self {
        self.script.lock().unwrap().steps.push_back(step);
        self
    }

    pub fn reply(self, text: &str) -> Self {
        self.push(Step::Reply(Ok(text.to_string())))
    }

    pub fn fail(self, error: BackendError) -> Self {
        self.push(Step::Reply(Err(error)))
    }

    pub fn stream(self, snapshots: Vec<Value>) -> Self {
        self.push(Step::Stream(snapshots.into_iter().map(Ok).collect()))
    }

    pub fn stream_with(self, items: Vec<Result<Value, BackendError>>) -> Self {
        self.push(Step::Stream(items))
    }

    /// The next request never completes.
    pub fn hang(self) -> Self {
        self.push(Step::Hang)
    }

    pub fn unavailable(self, reason: UnavailableReason) -> Self {
        self.set_readiness(Readiness::Unavailable(reason));
        self
    }

    pub fn set_readiness(&self, readiness: Readiness) {
        self.script.lock().unwrap().readiness = readiness;
    }

    pub fn prompts(&self) -> Vec<String> {
        self.script.lock().unwrap().prompts.clone()
    }

    pub fn requests(&self) -> usize {
        self.script.lock().unwrap().prompts.len()
    }

    pub fn readiness_checks(&self) -> usize {
        self.script.lock().unwrap().readiness_checks
    }

    pub fn sessions_opened(&self) -> usize {
        self.script.lock().unwrap().sessions_opened
    }

    fn next_step(&self, prompt: &str) -> Step {
        let mut script = self.script.lock().unwrap();
        script.prompts.push(prompt.to_string());
        script
            .steps
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected request: {prompt}"))
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn readiness(&self) -> Readiness {
        let mut script = self.script.lock().unwrap();
        script.readiness_checks += 1;
        script.readiness.clone()
    }

    fn open_session(&self) -> Box<dyn ModelSession> {
        self.script.lock().unwrap().sessions_opened += 1;
        Box::new(self.clone())
    }
}

#[async_trait]
impl ModelSession for ScriptedModel {
    async fn respond(&mut self, prompt: &str) -> Result<String, BackendError> {
        match self.next_step(prompt) {
            Step::Reply(result) => result,
            Step::Hang => futures::future::pending::<Result<String, BackendError>>().await,
            Step::Stream(_) => panic!("scripted a stream but got a respond call"),
        }
    }

    async fn stream_structured(
        &mut self,
        prompt: &str,
        _schema: &Value,
    ) -> Result<SnapshotStream, BackendError> {
        match self.next_step(prompt) {
            Step::Stream(items) => Ok(Box::pin(futures::stream::iter(items))),
            Step::Reply(Err(e)) => Err(e),
            Step::Hang => futures::future::pending::<Result<SnapshotStream, BackendError>>().await,
            Step::Reply(Ok(_)) => panic!("scripted a reply but got a stream call"),
        }
    }
}
