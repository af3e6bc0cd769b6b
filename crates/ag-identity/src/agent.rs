// agent.rs — Agent kinds and the detected identity.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of agent (or integration surface) issuing requests.
///
/// Serialized as a plain snake_case string; unrecognized names round-trip
/// through [`AgentKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentKind {
    ClaudeCode,
    Cursor,
    VsCode,
    Copilot,
    Continue,
    Cline,
    Aider,
    OpenCode,
    Hyper,
    OpenAiAgent,
    AnthropicAgent,
    OpenRouterAgent,
    Unknown,
    Other(String),
}

impl AgentKind {
    pub fn as_str(&self) -> &str {
        match self {
            AgentKind::ClaudeCode => "claude_code",
            AgentKind::Cursor => "cursor",
            AgentKind::VsCode => "vscode",
            AgentKind::Copilot => "copilot",
            AgentKind::Continue => "continue",
            AgentKind::Cline => "cline",
            AgentKind::Aider => "aider",
            AgentKind::OpenCode => "opencode",
            AgentKind::Hyper => "hyper",
            AgentKind::OpenAiAgent => "openai_agent",
            AgentKind::AnthropicAgent => "anthropic_agent",
            AgentKind::OpenRouterAgent => "openrouter_agent",
            AgentKind::Unknown => "unknown",
            AgentKind::Other(name) => name,
        }
    }

    /// Parse a kind from a user- or environment-supplied name.
    ///
    /// Matching is case-insensitive and accepts `-` in place of `_`.
    pub fn parse(name: &str) -> Self {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "claude_code" | "claude" => AgentKind::ClaudeCode,
            "cursor" => AgentKind::Cursor,
            "vscode" | "vs_code" | "code" => AgentKind::VsCode,
            "copilot" => AgentKind::Copilot,
            "continue" => AgentKind::Continue,
            "cline" => AgentKind::Cline,
            "aider" => AgentKind::Aider,
            "opencode" => AgentKind::OpenCode,
            "hyper" => AgentKind::Hyper,
            "openai_agent" => AgentKind::OpenAiAgent,
            "anthropic_agent" => AgentKind::AnthropicAgent,
            "openrouter_agent" => AgentKind::OpenRouterAgent,
            "" | "unknown" | "unknown_agent" => AgentKind::Unknown,
            _ => AgentKind::Other(normalized),
        }
    }

    /// Capabilities advertised by this kind of agent.
    pub fn capabilities(&self) -> BTreeSet<String> {
        let caps: &[&str] = match self {
            AgentKind::OpenCode => &["code_analysis", "file_operations", "documentation"],
            AgentKind::Cursor => &["ai_coding", "code_generation", "file_operations"],
            AgentKind::ClaudeCode => &["conversation", "code_assistance", "analysis"],
            AgentKind::VsCode => &["code_editing", "file_operations", "terminal_access"],
            AgentKind::Unknown => &[],
            _ => &["general_assistance"],
        };
        caps.iter().map(|c| c.to_string()).collect()
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for AgentKind {
    fn from(s: String) -> Self {
        AgentKind::parse(&s)
    }
}

impl From<AgentKind> for String {
    fn from(kind: AgentKind) -> Self {
        kind.as_str().to_string()
    }
}

/// The identity of the agent issuing requests in this session.
///
/// Built once by the detector and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Display name (explicit override name, or the kind's name).
    pub name: String,
    pub detected_type: AgentKind,
    /// Confidence in `[0, 1]` reported by the winning provider.
    pub confidence: f32,
    pub capabilities: BTreeSet<String>,
    /// Which signal provider produced this identity.
    pub detected_by: String,
}

impl AgentIdentity {
    pub fn new(kind: AgentKind, confidence: f32, detected_by: impl Into<String>) -> Self {
        Self {
            name: kind.as_str().to_string(),
            capabilities: kind.capabilities(),
            detected_type: kind,
            confidence: clamp_confidence(confidence),
            detected_by: detected_by.into(),
        }
    }

    /// The identity used when no provider has anything to say.
    pub fn unknown() -> Self {
        Self::new(AgentKind::Unknown, 0.0, "fallback")
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.detected_type == AgentKind::Unknown
    }
}

/// Clamp into `[0, 1]`; NaN counts as no confidence.
pub(crate) fn clamp_confidence(c: f32) -> f32 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}
