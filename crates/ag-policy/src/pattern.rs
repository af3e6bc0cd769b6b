// pattern.rs — Compiled operation/target matchers.
//
// Pattern syntax:
//   re:<regex>    unanchored regex search (anchor with ^...$ when needed)
//   glob:<pat>    shell glob over the whole string; `*` also crosses `/`
//   exact:<s>     literal comparison
//   <other>       glob if it contains any of `*?[`, otherwise exact

use std::fmt;

use glob::Pattern;
use regex::Regex;

/// A pattern compiled once at load time.
#[derive(Debug, Clone)]
pub enum Matcher {
    Exact(String),
    Glob(Pattern),
    Regex(Regex),
}

impl Matcher {
    /// Compile a pattern, returning a human-readable reason on failure.
    pub fn compile(raw: &str) -> Result<Self, String> {
        let (kind, body) = if let Some(rest) = raw.strip_prefix("re:") {
            ("re", rest)
        } else if let Some(rest) = raw.strip_prefix("glob:") {
            ("glob", rest)
        } else if let Some(rest) = raw.strip_prefix("exact:") {
            ("exact", rest)
        } else if raw.contains(['*', '?', '[']) {
            ("glob", raw)
        } else {
            ("exact", raw)
        };

        if body.is_empty() {
            return Err("pattern is empty".to_string());
        }

        match kind {
            "re" => Regex::new(body)
                .map(Matcher::Regex)
                .map_err(|e| e.to_string()),
            "glob" => Pattern::new(body)
                .map(Matcher::Glob)
                .map_err(|e| e.msg.to_string()),
            _ => Ok(Matcher::Exact(body.to_string())),
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Exact(s) => s == value,
            Matcher::Glob(p) => p.matches(value),
            Matcher::Regex(r) => r.is_match(value),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Matcher::Exact(_) => "exact",
            Matcher::Glob(_) => "glob",
            Matcher::Regex(_) => "regex",
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Exact(s) => write!(f, "exact:{}", s),
            Matcher::Glob(p) => write!(f, "glob:{}", p.as_str()),
            Matcher::Regex(r) => write!(f, "re:{}", r.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprefixed_patterns_infer_kind() {
        assert_eq!(Matcher::compile("write").unwrap().kind(), "exact");
        assert_eq!(Matcher::compile("/etc/*").unwrap().kind(), "glob");
        assert_eq!(Matcher::compile("file?.txt").unwrap().kind(), "glob");
    }

    #[test]
    fn prefixes_select_kind() {
        assert_eq!(Matcher::compile("re:^rm$").unwrap().kind(), "regex");
        assert_eq!(Matcher::compile("glob:write").unwrap().kind(), "glob");
        assert_eq!(Matcher::compile("exact:a*b").unwrap().kind(), "exact");
    }

    #[test]
    fn glob_star_crosses_separators() {
        let m = Matcher::compile("/etc/*").unwrap();
        assert!(m.matches("/etc/ssh/sshd_config"));
        assert!(!m.matches("/home/user/etc"));
    }

    #[test]
    fn exact_requires_full_equality() {
        let m = Matcher::compile("exact:a*b").unwrap();
        assert!(m.matches("a*b"));
        assert!(!m.matches("aXb"));
    }

    #[test]
    fn regex_is_unanchored_search() {
        let m = Matcher::compile("re:id_(rsa|ed25519)").unwrap();
        assert!(m.matches("/home/u/.ssh/id_ed25519"));
        assert!(!m.matches("/home/u/.ssh/config"));
    }

    #[test]
    fn invalid_patterns_fail() {
        assert!(Matcher::compile("re:([unclosed").is_err());
        assert!(Matcher::compile("glob:[abc").is_err());
        assert!(Matcher::compile("").is_err());
        assert!(Matcher::compile("re:").is_err());
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!(Matcher::compile("/etc/*").unwrap().to_string(), "glob:/etc/*");
        assert_eq!(Matcher::compile("rm").unwrap().to_string(), "exact:rm");
    }
}
