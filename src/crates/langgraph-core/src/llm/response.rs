//! Response types returned by [`ChatModel`](crate::llm::ChatModel) implementations.

use crate::llm_stream::MessageChunkStream;
use crate::Message;
use std::collections::HashMap;

/// Token accounting for a single chat completion.
///
/// Providers that don't report reasoning tokens separately (most do not) leave
/// `reasoning_tokens` as `None`; `total_tokens` is always `input_tokens + output_tokens`,
/// independent of whether any of those tokens were spent on reasoning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageMetadata {
    /// Tokens consumed by the prompt (messages, system prompt, tool definitions).
    pub input_tokens: usize,
    /// Tokens generated in the completion, including any reasoning tokens.
    pub output_tokens: usize,
    /// Tokens spent on hidden reasoning/thinking, when the provider reports it separately.
    pub reasoning_tokens: Option<usize>,
    /// `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

impl UsageMetadata {
    /// Build usage from prompt/completion token counts with no reasoning breakdown.
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            reasoning_tokens: None,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Build usage for a thinking model that reports reasoning tokens separately.
    pub fn with_reasoning(input_tokens: usize, output_tokens: usize, reasoning_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            reasoning_tokens: Some(reasoning_tokens),
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// The hidden "thinking" content a reasoning model produced alongside its answer.
///
/// Only populated when the request's [`ReasoningMode`](crate::llm::ReasoningMode) asked the
/// provider to capture it and the provider actually separated it from the answer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningContent {
    /// The raw reasoning/thinking text.
    pub content: String,
}

impl ReasoningContent {
    /// Wrap raw reasoning text.
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into() }
    }
}

/// A completed chat response from a [`ChatModel`](crate::llm::ChatModel).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// The assistant message produced by the model.
    pub message: Message,
    /// Token usage, when the provider reports it.
    pub usage: Option<UsageMetadata>,
    /// Separated reasoning content, for thinking models in a capturing reasoning mode.
    pub reasoning: Option<ReasoningContent>,
    /// Provider-specific extras (model name, finish reason, stop reason, ...).
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A streaming chat response: the live token stream plus whatever summary data the
/// provider attaches once streaming completes.
pub struct ChatStreamResponse {
    /// The stream of incremental message chunks.
    pub chunks: MessageChunkStream,
    /// Usage totals, when known ahead of the stream completing (most providers only know
    /// this after the last chunk, so implementations typically leave this `None`).
    pub usage: Option<UsageMetadata>,
}
