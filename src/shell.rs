//! Collaborator seams: the backend RPC boundary, UI actions, and read-only
//! application state.
//!
//! The runtime never talks to the native backend, the terminal, or the UI
//! directly; every outward call goes through one of the three traits below.
//! The embedding application wires real implementations; tests and headless
//! use get [`NoopShell`].

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// The single generic RPC entry point to the native backend.
///
/// Commands are plain names; the facade always attaches the calling plugin's
/// id (and, for HTTP fetches, its URL allow-list) to the args before the call
/// crosses this boundary.
pub trait Backend: Send + Sync {
    fn invoke(&self, command: &str, args: Value) -> BoxFuture<'static, Result<Value, String>>;
}

/// UI-side actions the runtime triggers on behalf of a plugin.
pub trait UiBridge: Send + Sync {
    /// Open a markdown panel for a content URI (resolved through the
    /// markdown provider registry).
    fn open_markdown(&self, uri: &str);
    /// Play a named notification sound.
    fn play_sound(&self, sound: &str);
}

/// Read-only application state queries (Tier 2 of the host facade).
///
/// Every method is total: absence of data is an empty collection or `None`,
/// never an error.
pub trait AppStateView: Send + Sync {
    fn active_repository(&self) -> Option<RepoInfo>;
    fn repositories(&self) -> Vec<RepoInfo>;
    fn active_session_id(&self) -> Option<String>;
    fn pending_pr_notifications(&self) -> Vec<PrNotification>;
    fn repo_settings(&self, repo_path: &str) -> Option<Value>;
}

/// A repository known to the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoInfo {
    pub path: String,
    pub name: String,
    pub branch: String,
    pub is_git_repo: bool,
}

/// A pull request awaiting the user's attention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrNotification {
    pub repo_path: String,
    pub number: u32,
    pub title: String,
    pub url: String,
}

/// The three collaborator seams bundled for runtime construction.
#[derive(Clone)]
pub struct Services {
    pub backend: Arc<dyn Backend>,
    pub ui: Arc<dyn UiBridge>,
    pub app: Arc<dyn AppStateView>,
}

impl Services {
    /// Inert services for tests and headless embedding.
    pub fn noop() -> Self {
        let shell = Arc::new(NoopShell);
        Self {
            backend: shell.clone(),
            ui: shell.clone(),
            app: shell,
        }
    }
}

/// Implements every seam with empty answers and no-op actions.
pub struct NoopShell;

impl Backend for NoopShell {
    fn invoke(&self, _command: &str, _args: Value) -> BoxFuture<'static, Result<Value, String>> {
        Box::pin(futures_util::future::ready(Ok(Value::Null)))
    }
}

impl UiBridge for NoopShell {
    fn open_markdown(&self, _uri: &str) {}
    fn play_sound(&self, _sound: &str) {}
}

impl AppStateView for NoopShell {
    fn active_repository(&self) -> Option<RepoInfo> {
        None
    }

    fn repositories(&self) -> Vec<RepoInfo> {
        Vec::new()
    }

    fn active_session_id(&self) -> Option<String> {
        None
    }

    fn pending_pr_notifications(&self) -> Vec<PrNotification> {
        Vec::new()
    }

    fn repo_settings(&self, _repo_path: &str) -> Option<Value> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_backend_answers_null() {
        let shell = NoopShell;
        let result = shell.invoke("anything", Value::Null).await;
        assert_eq!(result, Ok(Value::Null));
    }

    #[test]
    fn noop_queries_answer_empty() {
        let shell = NoopShell;
        assert!(shell.active_repository().is_none());
        assert!(shell.repositories().is_empty());
        assert!(shell.active_session_id().is_none());
        assert!(shell.pending_pr_notifications().is_empty());
        assert!(shell.repo_settings("/any/path").is_none());
    }

    #[test]
    fn repo_info_serialises_camel_case() {
        let info = RepoInfo {
            path: "/work/app".into(),
            name: "app".into(),
            branch: "main".into(),
            is_git_repo: true,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["isGitRepo"], true);
    }
}
