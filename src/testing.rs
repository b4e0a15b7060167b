//! In-process fakes for the model service.
//!
//! Compiled for unit tests and behind the `test-support` feature, which the
//! integration tests under `tests/` enable.

use crate::error::{LlmError, VoiceError};
use crate::llm::{LanguageModel, LlmResponse, ModelRequest};
use crate::voice::TextToSpeech;
use async_trait::async_trait;
use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

type Responder = dyn Fn(&ModelRequest) -> Result<String, LlmError> + Send + Sync;

/// A scripted `LanguageModel`.
///
/// Each call records the request, optionally waits for a permit on the gate
/// (so tests can hold responses back and race runs deterministically), then
/// answers with the responder's output.
pub struct FakeModel {
    responder: Box<Responder>,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<ModelRequest>>,
    started: AtomicUsize,
}

impl FakeModel {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ModelRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            gate: None,
            calls: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
        }
    }

    /// Answers batch prompts with `Explained <name>` for every function in the prompt.
    pub fn explaining() -> Self {
        Self::new(|request| {
            let prompt = request.last_user_prompt().unwrap_or_default();
            let entries: Vec<serde_json::Value> = batch_unit_names(prompt)
                .into_iter()
                .map(|name| {
                    serde_json::json!({
                        "unitName": name,
                        "explanation": format!("Explained {}", name),
                    })
                })
                .collect();
            Ok(format!("```json\n{}\n```", serde_json::Value::Array(entries)))
        })
    }

    /// Always replies with the same text.
    pub fn replying(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Always fails with the error the factory builds.
    pub fn failing<F>(make_err: F) -> Self
    where
        F: Fn() -> LlmError + Send + Sync + 'static,
    {
        Self::new(move |_| Err(make_err()))
    }

    /// Hold every response until a permit is added to the returned gate.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    /// Number of calls that have started (including ones still gated).
    pub fn call_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<ModelRequest> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn complete(&self, request: ModelRequest) -> Result<LlmResponse, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        self.started.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.map_err(|_| LlmError::Cancelled)?;
            permit.forget();
        }

        let content = (self.responder)(&request)?;
        Ok(LlmResponse {
            content,
            usage: None,
            model: "fake".to_string(),
        })
    }
}

/// A `TextToSpeech` that records what it was asked to say.
///
/// A holding speaker never finishes on its own: playback only ends when
/// `cancel` is called, which is how tests interrupt a reply mid-speech.
#[derive(Default)]
pub struct FakeSpeaker {
    hold: bool,
    spoken: Mutex<Vec<String>>,
    started: AtomicUsize,
    cancelled: CancellationToken,
}

impl FakeSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holding() -> Self {
        Self {
            hold: true,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }
}

#[async_trait]
impl TextToSpeech for FakeSpeaker {
    async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        self.spoken
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(text.to_string());
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.hold {
            self.cancelled.cancelled().await;
            return Err(VoiceError::Playback("interrupted".to_string()));
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.cancel();
    }
}

/// Function names embedded in a rendered batch prompt, in order.
pub fn batch_unit_names(prompt: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?m)^Function \d+: (\S+)$").expect("batch name regex is valid")
    });
    re.captures_iter(prompt)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Yield until the model has seen at least `n` calls.
pub async fn wait_for_calls(model: &FakeModel, n: usize) {
    while model.call_count() < n {
        tokio::task::yield_now().await;
    }
}
