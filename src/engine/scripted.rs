//! Replays a fixed sequence of replies. Used to exercise the agent loop.

use super::{CompletionRequest, EngineError, EngineReply, ReasoningEngine, Transcript};
use crate::agent::AgentRole;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub struct ScriptedEngine {
    replies: Mutex<VecDeque<EngineReply>>,
    seen: Mutex<Vec<(AgentRole, Transcript)>>,
    delay: Option<Duration>,
}

impl ScriptedEngine {
    pub fn new(replies: Vec<EngineReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Wait this long before every reply, like a slow model would.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Role and transcript of every request, in order.
    pub fn requests(&self) -> Vec<(AgentRole, Transcript)> {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<EngineReply, EngineError> {
        self.seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((request.role, request.transcript.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .ok_or(EngineError::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_replays_then_exhausts() {
        let engine = ScriptedEngine::new(vec![EngineReply::Final(json!("done"))]);
        let t = Transcript::new("sys");
        let request = CompletionRequest {
            role: AgentRole::Metrics,
            transcript: &t,
            tools: &[],
            schema: AgentRole::Metrics.output_schema(),
        };
        let first = tokio_test::block_on(engine.complete(request)).unwrap();
        assert_eq!(first, EngineReply::Final(json!("done")));
        let second = tokio_test::block_on(engine.complete(request));
        assert!(matches!(second, Err(EngineError::Exhausted)));
        assert_eq!(engine.remaining(), 0);
        assert_eq!(engine.requests().len(), 2);
    }
}
