use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::generation::{
    Completion, GenerationBackend, GenerationBudget,
    error::{GenerationError, fatal},
};

type Responder = Arc<dyn Fn(&str) -> Result<String, GenerationError> + Send + Sync>;
type Latency = Arc<dyn Fn(&str) -> Duration + Send + Sync>;

/// Deterministic backend for tests and dry runs. Queued replies are served
/// first, in order; afterwards the responder (if any) answers every prompt.
#[derive(Clone)]
pub struct ScriptedBackend {
    queue: Arc<Mutex<VecDeque<Result<String, GenerationError>>>>,
    responder: Option<Responder>,
    latency: Option<Latency>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            responder: None,
            latency: None,
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_responder(
        mut self,
        responder: impl Fn(&str) -> Result<String, GenerationError> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Arc::new(responder));
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.with_latency_by(move |_| latency)
    }

    /// Delays each call by a duration chosen from its prompt.
    pub fn with_latency_by(
        mut self,
        latency: impl Fn(&str) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.latency = Some(Arc::new(latency));
        self
    }

    pub async fn push_text(&self, text: impl Into<String>) {
        self.queue.lock().await.push_back(Ok(text.into()));
    }

    pub async fn push_error(&self, err: GenerationError) {
        self.queue.lock().await.push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn backend_id(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        prompt: &str,
        _budget: &GenerationBudget,
    ) -> Result<Completion, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().await.push(prompt.to_string());
        if let Some(latency) = &self.latency {
            let delay = latency(prompt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let queued = self.queue.lock().await.pop_front();
        let reply = match (queued, &self.responder) {
            (Some(reply), _) => reply,
            (None, Some(responder)) => responder(prompt),
            (None, None) => Err(fatal("scripted backend has no reply queued")),
        };
        reply.map(Completion::text)
    }
}

/// Ids of the transcript lines (`[id] role @ ts: content`) in a prompt.
pub fn transcript_ids(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix('[')?;
            let (id, tail) = rest.split_once("] ")?;
            tail.contains(" @ ").then(|| id.to_string())
        })
        .collect()
}
