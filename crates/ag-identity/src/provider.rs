// provider.rs — Signal providers for agent identity detection.
//
// Each provider looks at one class of evidence and proposes at most one
// Candidate. Confidence levels encode how much the evidence is worth:
// an explicit override is certain, an integration-specific environment
// variable is strong, a parent process name is decent, a marker directory
// only says the tool is installed.

use crate::agent::{clamp_confidence, AgentKind};
use crate::context::DetectionContext;

/// A proposed identity from one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub kind: AgentKind,
    pub confidence: f32,
    /// Display name, when the evidence carries one (explicit overrides).
    pub name: Option<String>,
}

impl Candidate {
    pub fn new(kind: AgentKind, confidence: f32) -> Self {
        Self {
            kind,
            confidence: clamp_confidence(confidence),
            name: None,
        }
    }
}

/// One source of evidence about the agent's identity.
pub trait SignalProvider: Send + Sync {
    /// Stable provider name, recorded as `AgentIdentity::detected_by`.
    fn name(&self) -> &str;

    /// Inspect the context and propose a candidate, if any.
    fn probe(&self, ctx: &DetectionContext) -> Option<Candidate>;
}

/// Pick the best of several candidates: highest confidence, earliest on ties.
fn strongest(candidates: impl IntoIterator<Item = Candidate>) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    for candidate in candidates {
        if best
            .as_ref()
            .map_or(true, |b| candidate.confidence > b.confidence)
        {
            best = Some(candidate);
        }
    }
    best
}

// ── 1. Explicit override ──

/// Caller-supplied agent name (`--agent`, `AG_AGENT`, API parameter).
pub struct ExplicitOverride;

impl SignalProvider for ExplicitOverride {
    fn name(&self) -> &str {
        "explicit_override"
    }

    fn probe(&self, ctx: &DetectionContext) -> Option<Candidate> {
        let raw = ctx.explicit_agent.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        let mut candidate = Candidate::new(AgentKind::parse(raw), 1.0);
        candidate.name = Some(raw.to_string());
        Some(candidate)
    }
}

// ── 2. Environment signals ──

/// Variables whose mere presence identifies an integration surface.
const PRESENCE_SIGNALS: &[(&str, AgentKind, f32)] = &[
    ("CLAUDECODE", AgentKind::ClaudeCode, 0.9),
    ("CLAUDE_CODE_ENTRYPOINT", AgentKind::ClaudeCode, 0.9),
    ("CURSOR_TRACE_ID", AgentKind::Cursor, 0.9),
    ("AIDER_MODEL", AgentKind::Aider, 0.8),
    ("OPENAI_API_KEY", AgentKind::OpenAiAgent, 0.2),
    ("ANTHROPIC_API_KEY", AgentKind::AnthropicAgent, 0.2),
    ("OPENROUTER_API_KEY", AgentKind::OpenRouterAgent, 0.2),
];

/// Variables whose value contains an indicator substring.
const VALUE_SIGNALS: &[(&str, &str, AgentKind, f32)] = &[
    ("TERM_PROGRAM", "vscode", AgentKind::VsCode, 0.7),
    ("TERM_PROGRAM", "cursor", AgentKind::Cursor, 0.7),
    ("TERM_PROGRAM", "hyper", AgentKind::Hyper, 0.7),
    ("EDITOR", "cursor", AgentKind::Cursor, 0.5),
    ("EDITOR", "code", AgentKind::VsCode, 0.5),
];

/// Environment variables set by known integration surfaces.
pub struct EnvironmentSignals;

impl SignalProvider for EnvironmentSignals {
    fn name(&self) -> &str {
        "environment"
    }

    fn probe(&self, ctx: &DetectionContext) -> Option<Candidate> {
        let presence = PRESENCE_SIGNALS
            .iter()
            .filter(|(var, _, _)| ctx.var(var).is_some())
            .map(|(_, kind, conf)| Candidate::new(kind.clone(), *conf));

        let by_value = VALUE_SIGNALS.iter().filter_map(|(var, needle, kind, conf)| {
            let value = ctx.var(var)?.to_ascii_lowercase();
            value
                .contains(needle)
                .then(|| Candidate::new(kind.clone(), *conf))
        });

        strongest(presence.chain(by_value))
    }
}

// ── 3. Process ancestry ──

/// Substrings looked for in ancestor process names, in priority order.
const PROCESS_PATTERNS: &[(&str, AgentKind)] = &[
    ("opencode", AgentKind::OpenCode),
    ("cursor", AgentKind::Cursor),
    ("claude", AgentKind::ClaudeCode),
    ("copilot", AgentKind::Copilot),
    ("continue", AgentKind::Continue),
    ("cline", AgentKind::Cline),
    ("aider", AgentKind::Aider),
];

/// Names of the invoking parent processes.
///
/// The direct parent is worth more than a distant ancestor.
pub struct ProcessAncestry;

impl SignalProvider for ProcessAncestry {
    fn name(&self) -> &str {
        "process_ancestry"
    }

    fn probe(&self, ctx: &DetectionContext) -> Option<Candidate> {
        ctx.process_ancestry
            .iter()
            .enumerate()
            .find_map(|(depth, process)| {
                let lower = process.to_ascii_lowercase();
                PROCESS_PATTERNS
                    .iter()
                    .find(|(needle, _)| lower.contains(needle))
                    .map(|(_, kind)| {
                        let confidence = if depth == 0 { 0.6 } else { 0.5 };
                        Candidate::new(kind.clone(), confidence)
                    })
            })
    }
}

// ── 4. Marker directories ──

const MARKERS: &[(&str, AgentKind)] = &[
    (".claude", AgentKind::ClaudeCode),
    (".cursor", AgentKind::Cursor),
    (".continue", AgentKind::Continue),
    (".aider.conf.yml", AgentKind::Aider),
    (".opencode", AgentKind::OpenCode),
    (".vscode", AgentKind::VsCode),
];

/// Per-tool directories in the home or project directory.
pub struct MarkerDirectories;

impl SignalProvider for MarkerDirectories {
    fn name(&self) -> &str {
        "marker_directories"
    }

    fn probe(&self, ctx: &DetectionContext) -> Option<Candidate> {
        ctx.marker_roots.iter().find_map(|root| {
            MARKERS
                .iter()
                .find(|(marker, _)| root.join(marker).exists())
                .map(|(_, kind)| Candidate::new(kind.clone(), 0.3))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_override_is_certain() {
        let ctx = DetectionContext::default().with_explicit_agent("release-bot");
        let candidate = ExplicitOverride.probe(&ctx).unwrap();
        assert_eq!(candidate.confidence, 1.0);
        assert_eq!(candidate.kind, AgentKind::Other("release_bot".to_string()));
        assert_eq!(candidate.name.as_deref(), Some("release-bot"));
    }

    #[test]
    fn blank_override_is_ignored() {
        let ctx = DetectionContext::default().with_explicit_agent("   ");
        assert!(ExplicitOverride.probe(&ctx).is_none());
    }

    #[test]
    fn environment_prefers_strongest_signal() {
        let ctx = DetectionContext::default()
            .with_env("OPENAI_API_KEY", "sk-xxx")
            .with_env("TERM_PROGRAM", "vscode")
            .with_env("CLAUDECODE", "1");
        let candidate = EnvironmentSignals.probe(&ctx).unwrap();
        assert_eq!(candidate.kind, AgentKind::ClaudeCode);
        assert_eq!(candidate.confidence, 0.9);
    }

    #[test]
    fn environment_term_program_beats_editor() {
        let ctx = DetectionContext::default()
            .with_env("EDITOR", "code --wait")
            .with_env("TERM_PROGRAM", "Hyper");
        let candidate = EnvironmentSignals.probe(&ctx).unwrap();
        assert_eq!(candidate.kind, AgentKind::Hyper);
    }

    #[test]
    fn environment_without_signals_is_silent() {
        let ctx = DetectionContext::default().with_env("HOME", "/home/u");
        assert!(EnvironmentSignals.probe(&ctx).is_none());
    }

    #[test]
    fn ancestry_matches_nearest_process() {
        let ctx = DetectionContext::default()
            .with_ancestor("bash")
            .with_ancestor("aider")
            .with_ancestor("Cursor Helper");
        let candidate = ProcessAncestry.probe(&ctx).unwrap();
        assert_eq!(candidate.kind, AgentKind::Aider);
        assert_eq!(candidate.confidence, 0.5);

        let direct = DetectionContext::default().with_ancestor("claude");
        assert_eq!(ProcessAncestry.probe(&direct).unwrap().confidence, 0.6);
    }

    #[test]
    fn marker_directory_detected() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".continue")).unwrap();
        let ctx = DetectionContext::default().with_marker_root(dir.path());
        let candidate = MarkerDirectories.probe(&ctx).unwrap();
        assert_eq!(candidate.kind, AgentKind::Continue);
        assert_eq!(candidate.confidence, 0.3);
    }

    #[test]
    fn no_markers_no_candidate() {
        let dir = tempdir().unwrap();
        let ctx = DetectionContext::default().with_marker_root(dir.path());
        assert!(MarkerDirectories.probe(&ctx).is_none());
    }
}
