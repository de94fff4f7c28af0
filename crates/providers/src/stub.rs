//! A deterministic, in-memory provider used to drive the agent loop and
//! PDA executor in tests without any network access.
//!
//! A [`StubProvider`] is configured with a fixed script of turns. Each call
//! to [`LlmProvider::chat`] or [`LlmProvider::chat_stream`] consumes the next
//! scripted turn; calling it more times than the script provides is a logic
//! error in the test and panics rather than looping silently.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use ag_domain::capability::{LlmCapabilities, ToolSupport};
use ag_domain::error::{Error, Result};
use ag_domain::stream::{BoxStream, StreamEvent, Usage};
use ag_domain::tool::ToolCall;

use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};

/// One scripted model turn.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    /// Content deltas emitted in order before the turn finishes.
    pub content_deltas: Vec<String>,
    /// Tool calls the model decides to make this turn (complete, not streamed
    /// incrementally — the stub emits started/delta/finished for each).
    pub tool_calls: Vec<ToolCall>,
    /// `"stop"` | `"tool_calls"` | `"length"`.
    pub finish_reason: String,
}

impl ScriptedTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content_deltas: vec![content.into()],
            tool_calls: vec![],
            finish_reason: "stop".into(),
        }
    }

    pub fn tool_call(call_id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            content_deltas: vec![],
            tool_calls: vec![ToolCall {
                call_id: call_id.into(),
                tool_name: name.into(),
                arguments: args,
            }],
            finish_reason: "tool_calls".into(),
        }
    }

    pub fn truncated(content: impl Into<String>) -> Self {
        Self {
            content_deltas: vec![content.into()],
            tool_calls: vec![],
            finish_reason: "length".into(),
        }
    }
}

pub struct StubProvider {
    id: String,
    script: Mutex<Vec<ScriptedTurn>>,
    cursor: AtomicUsize,
    capabilities: LlmCapabilities,
    /// When set, `next_turn` wraps back to the start of the script instead
    /// of erroring once exhausted — used by the CLI's offline demo mode,
    /// which has no fixed number of turns the way a test case does.
    looping: bool,
}

impl StubProvider {
    pub fn new(id: impl Into<String>, script: Vec<ScriptedTurn>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(script),
            cursor: AtomicUsize::new(0),
            capabilities: LlmCapabilities {
                supports_tools: ToolSupport::Basic,
                supports_streaming: true,
                supports_json_mode: true,
                supports_vision: false,
                context_window_tokens: Some(8192),
                max_output_tokens: Some(4096),
            },
            looping: false,
        }
    }

    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.capabilities.context_window_tokens = Some(tokens);
        self
    }

    /// Repeat the script indefinitely instead of erroring once exhausted.
    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    fn next_turn(&self) -> Result<ScriptedTurn> {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock();
        if self.looping && !script.is_empty() {
            return Ok(script[idx % script.len()].clone());
        }
        script.get(idx).cloned().ok_or_else(|| {
            Error::Other(format!(
                "stub provider '{}' script exhausted at turn {idx}",
                self.id
            ))
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
        let turn = self.next_turn()?;
        Ok(ChatResponse {
            content: turn.content_deltas.concat(),
            tool_calls: turn.tool_calls,
            usage: Some(Usage {
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
            }),
            model: self.id.clone(),
            finish_reason: Some(turn.finish_reason),
        })
    }

    async fn chat_stream(
        &self,
        _req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let turn = self.next_turn()?;
        let mut events = Vec::new();
        for delta in turn.content_deltas {
            events.push(Ok(StreamEvent::Token { text: delta }));
        }
        for call in turn.tool_calls {
            events.push(Ok(StreamEvent::ToolCallStarted {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
            }));
            events.push(Ok(StreamEvent::ToolCallDelta {
                call_id: call.call_id.clone(),
                delta: call.arguments.to_string(),
            }));
            events.push(Ok(StreamEvent::ToolCallFinished {
                call_id: call.call_id,
                tool_name: call.tool_name,
                arguments: call.arguments,
            }));
        }
        events.push(Ok(StreamEvent::Done {
            usage: Some(Usage {
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
            }),
            finish_reason: Some(turn.finish_reason),
        }));
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        Ok(EmbeddingsResponse {
            embeddings: req.input.iter().map(|_| vec![0.0_f32; 8]).collect(),
        })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_chat_returns_turns_in_order() {
        let provider = StubProvider::new(
            "stub",
            vec![ScriptedTurn::text("hello"), ScriptedTurn::text("world")],
        );
        let resp1 = provider.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(resp1.content, "hello");
        let resp2 = provider.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(resp2.content, "world");
    }

    #[tokio::test]
    async fn exhausted_script_errors() {
        let provider = StubProvider::new("stub", vec![ScriptedTurn::text("only")]);
        provider.chat(ChatRequest::default()).await.unwrap();
        let err = provider.chat(ChatRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }

    #[tokio::test]
    async fn stream_emits_tool_call_then_done() {
        use futures_util::StreamExt;
        let provider = StubProvider::new(
            "stub",
            vec![ScriptedTurn::tool_call("c1", "echo", serde_json::json!({"x": 1}))],
        );
        let mut stream = provider.chat_stream(ChatRequest::default()).await.unwrap();
        let mut saw_finished = false;
        let mut saw_done = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                StreamEvent::ToolCallFinished { call_id, .. } => {
                    assert_eq!(call_id, "c1");
                    saw_finished = true;
                }
                StreamEvent::Done { .. } => saw_done = true,
                _ => {}
            }
        }
        assert!(saw_finished && saw_done);
    }
}
