// context.rs — The inputs identity detection is allowed to look at.
//
// Providers never read the process environment themselves; the caller
// captures a DetectionContext once (usually via `from_process`) and hands it
// to the detector. Tests build contexts by hand.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sysinfo::System;

/// How many ancestor processes to record.
const MAX_ANCESTRY_DEPTH: usize = 5;

/// A snapshot of everything identity detection may inspect.
#[derive(Debug, Clone, Default)]
pub struct DetectionContext {
    /// Caller-supplied agent name that overrides all other signals.
    pub explicit_agent: Option<String>,
    /// Environment variables at capture time.
    pub env: BTreeMap<String, String>,
    /// Names of the parent, grandparent, ... processes (nearest first).
    pub process_ancestry: Vec<String>,
    /// Directories searched for agent marker directories.
    pub marker_roots: Vec<PathBuf>,
}

impl DetectionContext {
    /// Capture the context of the current process.
    ///
    /// Marker roots are the user's home directory and, when given, the
    /// project root. Ancestry lookup failures leave the list empty.
    pub fn from_process(project_root: Option<&Path>) -> Self {
        let mut marker_roots = Vec::new();
        if let Some(home) = dirs::home_dir() {
            marker_roots.push(home);
        }
        if let Some(root) = project_root {
            marker_roots.push(root.to_path_buf());
        }

        Self {
            explicit_agent: None,
            env: std::env::vars().collect(),
            process_ancestry: current_ancestry(),
            marker_roots,
        }
    }

    pub fn with_explicit_agent(mut self, agent: impl Into<String>) -> Self {
        self.explicit_agent = Some(agent.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_ancestor(mut self, name: impl Into<String>) -> Self {
        self.process_ancestry.push(name.into());
        self
    }

    pub fn with_marker_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.marker_roots.push(root.into());
        self
    }

    /// Look up an environment variable, treating empty values as unset.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.env
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

fn current_ancestry() -> Vec<String> {
    let Ok(pid) = sysinfo::get_current_pid() else {
        tracing::debug!("could not determine current pid; skipping ancestry");
        return Vec::new();
    };

    let mut system = System::new();
    system.refresh_processes();

    let mut names = Vec::new();
    let mut cursor = system.process(pid).and_then(|p| p.parent());
    while let Some(parent_pid) = cursor {
        if names.len() >= MAX_ANCESTRY_DEPTH {
            break;
        }
        let Some(process) = system.process(parent_pid) else {
            break;
        };
        names.push(process.name().to_string());
        cursor = process.parent();
    }
    names
}
