// defaults.rs — Built-in rule artifact and protected namespaces.
//
// `ag init` writes DEFAULT_RULES to `.ag/rules.yaml` when no artifact
// exists. DEFAULT_PROTECTED_NAMESPACES is what the default policy denies
// when no rule matches.

/// Rule id recorded when no rule matches and the target is protected (or
/// the fallback is deny).
pub const DEFAULT_DENY: &str = "default-deny";

/// Rule id recorded when no rule matches and the fallback allows.
pub const DEFAULT_ALLOW: &str = "default-allow";

/// Credential stores and system configuration areas.
pub const DEFAULT_PROTECTED_NAMESPACES: &[&str] = &[
    "/etc/*",
    "/usr/*",
    "/boot/*",
    "/sys/*",
    "/proc/*",
    "*/.ssh/*",
    "*/.gnupg/*",
    "*/.aws/credentials",
    "*/.docker/config.json",
    "*/.kube/config",
    "*/.netrc",
];

pub const DEFAULT_RULES: &str = r#"version: "1"
rules:
  - id: block-system-modification
    category: critical
    operation_pattern: 're:^(rm|mv|chmod|chown|edit|modify|write|delete)$'
    target_pattern: 're:^/(etc|usr|boot|sys|proc)(/|$)'
    action: deny
    priority: 100
    rationale: System directories are managed by the OS package manager, not by agents.

  - id: block-root-removal
    category: critical
    operation_pattern: 're:^rm$'
    target_pattern: 're:^/\*?$'
    action: deny
    priority: 100
    rationale: Removing the filesystem root is never a legitimate agent action.

  - id: protect-ssh-keys
    category: critical
    operation_pattern: 're:^(ssh|scp|sftp|read|write|edit|modify|rm|mv|cp|chmod)$'
    target_pattern: 're:(known_hosts|id_rsa|id_ed25519|id_ecdsa|authorized_keys|\.ssh/config)'
    action: deny
    priority: 90
    rationale: SSH keys and host configuration must not be read or modified by agents.

  - id: protect-credential-stores
    category: high
    operation_pattern: '*'
    target_pattern: 're:(\.aws/credentials|\.netrc|\.docker/config\.json|\.kube/config|\.gnupg/)'
    action: deny
    priority: 80
    rationale: Credential stores are off limits to agents.

  - id: block-force-push
    category: high
    operation_pattern: 'exact:git-push-force'
    target_pattern: '*'
    action: deny
    priority: 50
    rationale: Force pushes rewrite shared history and require a human.

  - id: allow-reads
    category: medium
    operation_pattern: 're:^(read|list|stat)$'
    target_pattern: '*'
    action: allow
    priority: 0
    rationale: Reading outside protected areas is permitted.
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruleset::{RuleArtifact, RuleSet};

    #[test]
    fn default_rules_compile() {
        let artifact = RuleArtifact::from_yaml_str(DEFAULT_RULES).unwrap();
        let set = RuleSet::compile(artifact).unwrap();
        assert_eq!(set.len(), 6);
        assert!(set.get("protect-ssh-keys").is_some());
        assert!(set.lint().iter().all(|f| !f.is_error()));
    }
}
