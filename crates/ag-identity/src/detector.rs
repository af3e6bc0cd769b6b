// detector.rs — Resolves the session's agent identity from signal providers.

use std::sync::OnceLock;

use crate::agent::AgentIdentity;
use crate::context::DetectionContext;
use crate::provider::{
    EnvironmentSignals, ExplicitOverride, MarkerDirectories, ProcessAncestry, SignalProvider,
};

/// Runs the providers over a captured context and caches the result.
///
/// Detection is stable for the lifetime of the detector: the first call to
/// [`detect`](Self::detect) resolves the identity and every later call
/// returns the same value.
pub struct IdentityDetector {
    providers: Vec<Box<dyn SignalProvider>>,
    context: DetectionContext,
    resolved: OnceLock<AgentIdentity>,
}

impl IdentityDetector {
    /// Detector with the standard provider chain.
    pub fn new(context: DetectionContext) -> Self {
        Self::with_providers(context, Self::standard_providers())
    }

    /// Detector with a caller-chosen provider chain, in priority order.
    pub fn with_providers(
        context: DetectionContext,
        providers: Vec<Box<dyn SignalProvider>>,
    ) -> Self {
        Self {
            providers,
            context,
            resolved: OnceLock::new(),
        }
    }

    pub fn standard_providers() -> Vec<Box<dyn SignalProvider>> {
        vec![
            Box::new(ExplicitOverride),
            Box::new(EnvironmentSignals),
            Box::new(ProcessAncestry),
            Box::new(MarkerDirectories),
        ]
    }

    /// The identity of the agent in this session.
    pub fn detect(&self) -> AgentIdentity {
        self.resolved.get_or_init(|| self.resolve()).clone()
    }

    fn resolve(&self) -> AgentIdentity {
        let mut best: Option<(AgentIdentity, f32)> = None;

        for provider in &self.providers {
            let Some(candidate) = provider.probe(&self.context) else {
                continue;
            };
            tracing::debug!(
                provider = provider.name(),
                kind = %candidate.kind,
                confidence = candidate.confidence,
                "identity candidate"
            );
            if candidate.confidence <= 0.0 {
                continue;
            }
            // Strictly greater: on ties the earlier provider keeps the lead.
            if best
                .as_ref()
                .map_or(true, |(_, conf)| candidate.confidence > *conf)
            {
                let confidence = candidate.confidence;
                let mut identity =
                    AgentIdentity::new(candidate.kind, confidence, provider.name());
                if let Some(name) = candidate.name {
                    identity = identity.with_name(name);
                }
                best = Some((identity, confidence));
            }
        }

        let identity = best
            .map(|(identity, _)| identity)
            .unwrap_or_else(AgentIdentity::unknown);
        tracing::info!(
            agent = %identity.name,
            kind = %identity.detected_type,
            confidence = identity.confidence,
            detected_by = %identity.detected_by,
            "agent identity resolved"
        );
        identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentKind;
    use crate::provider::Candidate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fixed {
        name: &'static str,
        kind: AgentKind,
        confidence: f32,
        calls: Arc<AtomicUsize>,
    }

    impl SignalProvider for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn probe(&self, _ctx: &DetectionContext) -> Option<Candidate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(Candidate::new(self.kind.clone(), self.confidence))
        }
    }

    fn fixed(name: &'static str, kind: AgentKind, confidence: f32) -> Box<dyn SignalProvider> {
        Box::new(Fixed {
            name,
            kind,
            confidence,
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    #[test]
    fn explicit_override_wins() {
        let ctx = DetectionContext::default()
            .with_explicit_agent("cursor")
            .with_env("CLAUDECODE", "1");
        let id = IdentityDetector::new(ctx).detect();
        assert_eq!(id.detected_type, AgentKind::Cursor);
        assert_eq!(id.confidence, 1.0);
        assert_eq!(id.detected_by, "explicit_override");
    }

    #[test]
    fn environment_beats_markers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".vscode")).unwrap();
        let ctx = DetectionContext::default()
            .with_env("CURSOR_TRACE_ID", "abc")
            .with_marker_root(dir.path());
        let id = IdentityDetector::new(ctx).detect();
        assert_eq!(id.detected_type, AgentKind::Cursor);
        assert_eq!(id.detected_by, "environment");
    }

    #[test]
    fn no_signals_falls_back_to_unknown() {
        let id = IdentityDetector::new(DetectionContext::default()).detect();
        assert!(id.is_unknown());
        assert_eq!(id.confidence, 0.0);
    }

    #[test]
    fn ties_keep_earlier_provider() {
        let providers = vec![
            fixed("first", AgentKind::Aider, 0.5),
            fixed("second", AgentKind::Cline, 0.5),
        ];
        let id = IdentityDetector::with_providers(DetectionContext::default(), providers).detect();
        assert_eq!(id.detected_type, AgentKind::Aider);
        assert_eq!(id.detected_by, "first");
    }

    #[test]
    fn zero_confidence_candidates_are_ignored() {
        let providers = vec![fixed("noise", AgentKind::Copilot, 0.0)];
        let id = IdentityDetector::with_providers(DetectionContext::default(), providers).detect();
        assert!(id.is_unknown());
    }

    #[test]
    fn detection_is_resolved_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Box::new(Fixed {
            name: "counting",
            kind: AgentKind::OpenCode,
            confidence: 0.4,
            calls: calls.clone(),
        });
        let detector =
            IdentityDetector::with_providers(DetectionContext::default(), vec![provider]);
        let first = detector.detect();
        let second = detector.detect();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
