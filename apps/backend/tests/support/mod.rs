#![allow(dead_code)]

//! Shared doubles and polling helpers for the integration suite.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use backend::config::ExperimentConfig;
use backend::llm::{
    CompletionBackend, CompletionError, DecisionAgent, PromptMessage, RateLimiter,
};
use backend::services::game_flow::{FlowPacing, GameFlowService};
use backend::services::matchmaking::Matchmaker;
use backend::services::storage::MemoryResultSink;
use backend::session::SessionRegistry;
use backend::ws::hub::SessionHub;

/// One scripted completion response.
pub enum Scripted {
    Reply(&'static str),
    Transport,
}

/// Completion backend that replays a fixed script and counts calls.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicU32,
    /// Returned once the script runs out; None makes further calls fail.
    fallback: Option<&'static str>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            fallback: None,
        }
    }

    pub fn always(reply: &'static str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            fallback: Some(reply),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(
        &self,
        _messages: &[PromptMessage],
        _max_tokens: u32,
    ) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(Scripted::Reply(text)) => Ok(text.to_string()),
            Some(Scripted::Transport) => Err(CompletionError::Transport(
                "scripted transport failure".to_string(),
            )),
            None => match self.fallback {
                Some(text) => Ok(text.to_string()),
                None => Err(CompletionError::Transport(
                    "script exhausted".to_string(),
                )),
            },
        }
    }

    fn model(&self) -> &str {
        "scripted-model"
    }
}

/// Flow service wired to in-memory collaborators and zero pacing delays.
pub fn make_flow(
    defaults: ExperimentConfig,
    backend: Arc<ScriptedBackend>,
) -> (Arc<GameFlowService>, Arc<MemoryResultSink>) {
    let sink = Arc::new(MemoryResultSink::new());
    let agent = Arc::new(DecisionAgent::new(
        backend,
        // No spacing or quota so tests never sit in the limiter.
        Arc::new(RateLimiter::new(
            Duration::ZERO,
            Duration::from_secs(60),
            u32::MAX,
        )),
    ));
    let flow = Arc::new(GameFlowService::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(Matchmaker::new()),
        Arc::new(SessionHub::new()),
        agent,
        sink.clone(),
        defaults,
        FlowPacing::immediate(),
    ));
    (flow, sink)
}

/// Poll an async condition until it holds, failing the test after 5s.
pub async fn wait_until<F, Fut>(label: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {label}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
