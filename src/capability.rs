//! Capability tokens and the per-plugin grant set.
//!
//! A capability is an opaque string naming one gated action class. Plugins
//! declare the tokens they need in their manifest; the set granted at
//! registration time is fixed for the plugin's lifetime. Built-in plugins are
//! registered without a grant set and bypass every check.

use std::collections::HashSet;

/// Write bytes to a PTY session.
pub const CAP_PTY_WRITE: &str = "pty:write";
/// Open a markdown panel in the UI.
pub const CAP_UI_MARKDOWN: &str = "ui:markdown";
/// Play a notification sound.
pub const CAP_UI_SOUND: &str = "ui:sound";
/// Perform an outbound HTTP fetch (scoped by the plugin's URL allow-list).
pub const CAP_NET_HTTP: &str = "net:http";

/// Prefix for capabilities gating individual backend commands.
pub const INVOKE_CAP_PREFIX: &str = "invoke:";

/// Capability strings a manifest may declare. Anything outside this set is
/// rejected at the loader boundary.
pub const KNOWN_CAPABILITIES: &[&str] = &[
    CAP_PTY_WRITE,
    CAP_UI_MARKDOWN,
    CAP_UI_SOUND,
    CAP_NET_HTTP,
    "invoke:read_file",
    "invoke:list_markdown_files",
    "invoke:plugin_read_credential",
];

/// The `invoke:<command>` token gating a backend command.
pub fn invoke_capability(command: &str) -> String {
    format!("{INVOKE_CAP_PREFIX}{command}")
}

/// A plugin's granted capability set, fixed at registration time.
#[derive(Debug, Clone)]
pub enum CapabilitySet {
    /// No set was supplied at registration: built-in trust, all checks pass.
    Builtin,
    /// Explicit grant set; gated operations require the exact token.
    Granted(HashSet<String>),
}

impl CapabilitySet {
    pub fn builtin() -> Self {
        Self::Builtin
    }

    pub fn granted<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Granted(tokens.into_iter().map(Into::into).collect())
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::Builtin)
    }

    /// Whether a gated operation guarded by `token` may proceed.
    pub fn holds(&self, token: &str) -> bool {
        match self {
            Self::Builtin => true,
            Self::Granted(set) => set.contains(token),
        }
    }

    /// The declared tokens, for the plugin-state store. `None` for built-ins.
    pub fn declared(&self) -> Option<Vec<String>> {
        match self {
            Self::Builtin => None,
            Self::Granted(set) => {
                let mut tokens: Vec<String> = set.iter().cloned().collect();
                tokens.sort();
                Some(tokens)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_holds_everything() {
        let caps = CapabilitySet::builtin();
        assert!(caps.holds(CAP_PTY_WRITE));
        assert!(caps.holds(CAP_NET_HTTP));
        assert!(caps.holds("invoke:read_file"));
        assert!(caps.holds("made:up"));
        assert!(caps.declared().is_none());
    }

    #[test]
    fn granted_requires_exact_token() {
        let caps = CapabilitySet::granted([CAP_PTY_WRITE]);
        assert!(caps.holds(CAP_PTY_WRITE));
        assert!(!caps.holds(CAP_UI_SOUND));
        assert!(!caps.holds("pty:"));
        assert!(!caps.holds(""));
    }

    #[test]
    fn empty_grant_set_holds_nothing() {
        let caps = CapabilitySet::granted(Vec::<String>::new());
        assert!(!caps.is_builtin());
        assert!(!caps.holds(CAP_PTY_WRITE));
        assert_eq!(caps.declared(), Some(vec![]));
    }

    #[test]
    fn declared_tokens_are_sorted() {
        let caps = CapabilitySet::granted(["ui:sound", "net:http", "pty:write"]);
        assert_eq!(
            caps.declared(),
            Some(vec![
                "net:http".to_string(),
                "pty:write".to_string(),
                "ui:sound".to_string()
            ])
        );
    }

    #[test]
    fn invoke_capability_format() {
        assert_eq!(invoke_capability("read_file"), "invoke:read_file");
    }
}
