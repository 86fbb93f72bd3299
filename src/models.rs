use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{DispatchError, ErrorKind};

// Message roles understood by chat-style models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A prompt is either raw text or an explicit role-tagged message sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    Text(String),
    Messages(Vec<Message>),
}

impl Prompt {
    /// Normalize to a message sequence; raw text becomes a single
    /// user-role message.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Prompt::Text(text) => vec![Message::new(Role::User, text)],
            Prompt::Messages(messages) => messages,
        }
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

impl From<Vec<Message>> for Prompt {
    fn from(messages: Vec<Message>) -> Self {
        Prompt::Messages(messages)
    }
}

/// Sampling parameters shared by every request in a batch. Provider knobs
/// without a typed field go in `extra`; the sorted map keeps them
/// deterministic for fingerprinting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RequestParameters {
    // Sorted key=value items, consumed by the fingerprint.
    pub(crate) fn canonical_items(&self) -> Vec<String> {
        let mut items = Vec::new();
        if let Some(temperature) = self.temperature {
            items.push(format!("temperature={temperature}"));
        }
        if let Some(max_tokens) = self.max_tokens {
            items.push(format!("max_tokens={max_tokens}"));
        }
        if let Some(top_p) = self.top_p {
            items.push(format!("top_p={top_p}"));
        }
        for (key, value) in &self.extra {
            items.push(format!("{key}={value}"));
        }
        items.sort();
        items
    }
}

/// One unit of work: a normalized prompt bound to a model identifier and a
/// parameter bag. Serializes to the canonical wire shape adapters post.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub parameters: RequestParameters,
}

impl Request {
    pub fn new(model: impl Into<String>, prompt: Prompt, parameters: RequestParameters) -> Self {
        Self {
            model: model.into(),
            messages: prompt.into_messages(),
            parameters,
        }
    }

    /// Reject obviously bad input before any admission or network work.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.model.trim().is_empty() {
            return Err(DispatchError::Validation("model identifier is empty".to_string()));
        }
        if self.messages.is_empty() {
            return Err(DispatchError::Validation("prompt has no messages".to_string()));
        }
        if self.messages.iter().all(|m| m.content.trim().is_empty()) {
            return Err(DispatchError::Validation("prompt content is empty".to_string()));
        }
        Ok(())
    }

    // Truncated prompt text stored next to cached responses.
    pub(crate) fn prompt_summary(&self) -> String {
        let joined = self
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        joined.chars().take(120).collect()
    }
}

/// Parsed successful provider output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub model: String,
    pub content: String,
}

/// Outcome of one batch item, tagged with how it resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Response {
    Completed {
        model: String,
        content: String,
        #[serde(default)]
        cached: bool,
    },
    Failed {
        kind: ErrorKind,
        error: String,
    },
}

impl Response {
    pub(crate) fn completed(completion: Completion) -> Self {
        Response::Completed {
            model: completion.model,
            content: completion.content,
            cached: false,
        }
    }

    pub(crate) fn from_cache(completion: Completion) -> Self {
        Response::Completed {
            model: completion.model,
            content: completion.content,
            cached: true,
        }
    }

    pub(crate) fn from_error(err: &DispatchError) -> Self {
        Response::Failed {
            kind: err.kind(),
            error: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Completed { .. })
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Response::Completed { cached: true, .. })
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Response::Completed { content, .. } => Some(content),
            Response::Failed { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Response::Completed { .. } => None,
            Response::Failed { kind, .. } => Some(*kind),
        }
    }
}
