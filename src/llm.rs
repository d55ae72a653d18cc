//! Chat-completion abstraction used by the built-in analyzer.

pub mod error;
pub mod openai;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

pub use error::LlmError;
pub use openai::{OpenAiCompatibleProvider, OpenAiSettings};

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Instructions for the model.
    System,
    /// Caller input.
    User,
    /// Model output, possibly with tool calls.
    Assistant,
    /// Result of a tool invocation.
    Tool,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back with the result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Raw JSON arguments.
    pub arguments: String,
}

impl ToolCall {
    /// Decodes the JSON arguments.
    pub fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.arguments)
            .with_context(|| format!("Invalid arguments for tool '{}'", self.name))
    }
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Text content; `None` for assistant turns that only call tools.
    pub content: Option<String>,
    /// Tool calls made by an assistant turn.
    pub tool_calls: Vec<ToolCall>,
    /// Call this tool result answers.
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// System message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Assistant message.
    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Result for the tool call `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    /// Function name.
    pub name: String,
    /// What the function does.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// Input to [`CompletionProvider::complete`].
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Ordered conversation.
    pub messages: Vec<ChatMessage>,
    /// Tools offered for this turn.
    pub tools: Vec<ToolDefinition>,
}

/// Token counters reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Generated tokens.
    pub output_tokens: u64,
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A model turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Generated text, if any.
    pub text: Option<String>,
    /// Requested tool invocations.
    pub tool_calls: Vec<ToolCall>,
    /// Token counters.
    pub usage: TokenUsage,
}

impl Completion {
    /// The assistant message to append to the conversation.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::assistant(self.text.clone(), self.tool_calls.clone())
    }
}

/// Chat-completion backend.
pub trait CompletionProvider: Send + Sync {
    /// Model identifier used for requests.
    fn model(&self) -> &str;

    /// Runs one completion turn.
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> BoxFuture<'a, Result<Completion>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_arguments_decode() {
        #[derive(Debug, serde::Deserialize)]
        struct Args {
            path: String,
        }
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "read_file".to_string(),
            arguments: r#"{"path":"src/main.rs"}"#.to_string(),
        };
        assert_eq!(call.parse_arguments::<Args>().unwrap().path, "src/main.rs");

        let broken = ToolCall {
            arguments: "{".to_string(),
            ..call
        };
        let err = broken.parse_arguments::<Args>().unwrap_err();
        assert!(err.to_string().contains("read_file"));
    }

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage {
            input_tokens: 10,
            output_tokens: 2,
        };
        total += TokenUsage {
            input_tokens: 5,
            output_tokens: 1,
        };
        assert_eq!(
            total,
            TokenUsage {
                input_tokens: 15,
                output_tokens: 3
            }
        );
    }
}
