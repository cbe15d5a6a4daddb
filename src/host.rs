//! The scoped host facade: the only surface plugin code touches.
//!
//! Every facade is bound to one plugin id and its grant set. Tier 1
//! registrations and Tier 2 queries are always available; Tier 3 actions and
//! Tier 4 backend passthrough check capabilities synchronously before any
//! side effect. The facade holds only a weak reference to the runtime, so a
//! plugin stashing it cannot keep a torn-down runtime alive.

use crate::activity::{ActivityItem, ActivitySection};
use crate::capability::{
    CAP_NET_HTTP, CAP_PTY_WRITE, CAP_UI_MARKDOWN, CAP_UI_SOUND, CapabilitySet, invoke_capability,
};
use crate::logger::{LogLevel, PluginLogger};
use crate::markdown::MarkdownProvider;
use crate::registration::Registration;
use crate::runtime::{OutputMatch, RuntimeInner, StructuredEvent};
use crate::shell::{PrNotification, RepoInfo};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Backend commands every plugin may call: sandboxed per-plugin storage.
const PLUGIN_DATA_COMMANDS: &[&str] =
    &["read_plugin_data", "write_plugin_data", "delete_plugin_data"];

/// Backend commands callable with a matching `invoke:<command>` capability.
const GATED_COMMANDS: &[&str] = &["read_file", "list_markdown_files", "plugin_read_credential"];

/// Errors raised by gated facade operations, back to the calling plugin.
///
/// This is the one error type that propagates to its direct caller; a
/// capability violation is the plugin's programming error to handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("capability \"{capability}\" is required to {action}")]
    MissingCapability { capability: String, action: String },
    #[error("command \"{command}\" is not available to plugins")]
    CommandNotAllowed { command: String },
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("backend call failed: {0}")]
    Backend(String),
    #[error("plugin runtime has shut down")]
    RuntimeShutdown,
}

impl From<HostError> for String {
    fn from(err: HostError) -> Self {
        err.to_string()
    }
}

/// Outbound HTTP request forwarded to the backend on a plugin's behalf.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Capability-mediated handle a plugin receives in `on_load`.
///
/// Cloneable so plugins may stash it and call back from watcher or event
/// callbacks later.
#[derive(Clone)]
pub struct HostApi {
    runtime: Weak<RuntimeInner>,
    plugin_id: Arc<str>,
    capabilities: Arc<CapabilitySet>,
    allowed_http_urls: Arc<Vec<String>>,
    logger: Arc<PluginLogger>,
}

impl HostApi {
    pub(crate) fn new(
        runtime: Weak<RuntimeInner>,
        plugin_id: &str,
        capabilities: CapabilitySet,
        allowed_http_urls: Vec<String>,
        logger: Arc<PluginLogger>,
    ) -> Self {
        Self {
            runtime,
            plugin_id: Arc::from(plugin_id),
            capabilities: Arc::new(capabilities),
            allowed_http_urls: Arc::new(allowed_http_urls),
            logger,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn runtime(&self) -> Result<Arc<RuntimeInner>, HostError> {
        self.runtime.upgrade().ok_or(HostError::RuntimeShutdown)
    }

    /// Gate check for Tier 3/4 operations; runs before any side effect.
    fn check(&self, capability: &str, action: &str) -> Result<(), HostError> {
        if self.capabilities.holds(capability) {
            Ok(())
        } else {
            Err(HostError::MissingCapability {
                capability: capability.to_string(),
                action: action.to_string(),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Tier 1: lifecycle-scoped registrations (always allowed)
    // -----------------------------------------------------------------------

    /// Register an activity section. Same-id registrations stack; the most
    /// recent wins until disposed.
    pub fn register_section(&self, section: ActivitySection) -> Registration {
        let Ok(rt) = self.runtime() else {
            return Registration::inert();
        };
        let registration_id = rt.next_registration_id();
        let section_id = section.id.clone();
        rt.activity
            .register_section(registration_id, &self.plugin_id, section);

        let weak = self.runtime.clone();
        Registration::new(move || {
            if let Some(rt) = weak.upgrade() {
                rt.activity.dispose_section(&section_id, registration_id);
            }
        })
    }

    /// Add or replace an activity item. The item is always attributed to this
    /// plugin regardless of the `plugin_id` it carries.
    pub fn add_item(&self, mut item: ActivityItem) {
        let Ok(rt) = self.runtime() else { return };
        item.plugin_id = self.plugin_id.to_string();
        rt.activity.upsert_item(item);
    }

    /// Update an existing item; false when this plugin has no item with that
    /// id.
    pub fn update_item(&self, mut item: ActivityItem) -> bool {
        let Ok(rt) = self.runtime() else { return false };
        item.plugin_id = self.plugin_id.to_string();
        rt.activity.update_item(item)
    }

    pub fn remove_item(&self, item_id: &str) -> bool {
        let Ok(rt) = self.runtime() else { return false };
        rt.activity.remove_item(&self.plugin_id, item_id)
    }

    /// Register a markdown content provider for a URI scheme.
    pub fn register_markdown_provider(
        &self,
        scheme: &str,
        provider: MarkdownProvider,
    ) -> Registration {
        let Ok(rt) = self.runtime() else {
            return Registration::inert();
        };
        rt.markdown
            .register_for(Some(&self.plugin_id), scheme, provider)
    }

    /// Watch every logical output line of every session for a pattern.
    pub fn on_output<F>(&self, pattern: regex::Regex, callback: F) -> Registration
    where
        F: Fn(&OutputMatch) -> Result<(), String> + Send + Sync + 'static,
    {
        let Ok(rt) = self.runtime() else {
            return Registration::inert();
        };
        let id = rt.add_watcher(&self.plugin_id, pattern, Arc::new(callback));

        let weak = self.runtime.clone();
        Registration::new(move || {
            if let Some(rt) = weak.upgrade() {
                rt.remove_watcher(id);
            }
        })
    }

    /// Handle structured application events of one type.
    pub fn on_event<F>(&self, event_type: &str, callback: F) -> Registration
    where
        F: Fn(&StructuredEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        let Ok(rt) = self.runtime() else {
            return Registration::inert();
        };
        let id = rt.add_handler(&self.plugin_id, event_type, Arc::new(callback));

        let weak = self.runtime.clone();
        Registration::new(move || {
            if let Some(rt) = weak.upgrade() {
                rt.remove_handler(id);
            }
        })
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        self.logger.log(level, message, data);
    }

    pub fn log_debug(&self, message: impl Into<String>) {
        self.logger.debug(message);
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.logger.info(message);
    }

    pub fn log_warn(&self, message: impl Into<String>) {
        self.logger.warn(message);
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.logger.error(message);
    }

    /// This plugin's log buffer (as shown in the diagnostics view).
    pub fn logger(&self) -> Arc<PluginLogger> {
        Arc::clone(&self.logger)
    }

    // -----------------------------------------------------------------------
    // Tier 2: read-only application state (always allowed)
    // -----------------------------------------------------------------------

    pub fn active_repository(&self) -> Option<RepoInfo> {
        self.runtime().ok()?.services.app.active_repository()
    }

    pub fn repositories(&self) -> Vec<RepoInfo> {
        self.runtime()
            .map(|rt| rt.services.app.repositories())
            .unwrap_or_default()
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.runtime().ok()?.services.app.active_session_id()
    }

    pub fn pending_pr_notifications(&self) -> Vec<PrNotification> {
        self.runtime()
            .map(|rt| rt.services.app.pending_pr_notifications())
            .unwrap_or_default()
    }

    pub fn repo_settings(&self, repo_path: &str) -> Option<Value> {
        self.runtime().ok()?.services.app.repo_settings(repo_path)
    }

    // -----------------------------------------------------------------------
    // Tier 3: gated write/action surface
    // -----------------------------------------------------------------------

    /// Write bytes to a PTY session. Requires `pty:write`.
    pub async fn write_pty(&self, session_id: &str, data: &str) -> Result<(), HostError> {
        self.check(CAP_PTY_WRITE, "write to a PTY session")?;
        let rt = self.runtime()?;
        rt.services
            .backend
            .invoke(
                "write_pty",
                json!({
                    "sessionId": session_id,
                    "data": data,
                    "pluginId": &*self.plugin_id,
                }),
            )
            .await
            .map_err(HostError::Backend)?;
        Ok(())
    }

    /// Open a markdown panel in the UI. Requires `ui:markdown`.
    pub fn open_markdown(&self, uri: &str) -> Result<(), HostError> {
        self.check(CAP_UI_MARKDOWN, "open a markdown panel")?;
        let rt = self.runtime()?;
        rt.services.ui.open_markdown(uri);
        Ok(())
    }

    /// Play a named notification sound. Requires `ui:sound`.
    pub fn play_sound(&self, sound: &str) -> Result<(), HostError> {
        self.check(CAP_UI_SOUND, "play a notification sound")?;
        let rt = self.runtime()?;
        rt.services.ui.play_sound(sound);
        Ok(())
    }

    /// Outbound HTTP fetch through the backend. Requires `net:http`.
    ///
    /// The plugin's id and URL allow-list always travel with the call, so
    /// enforcement also happens beyond this crate's boundary.
    pub async fn http_fetch(&self, request: HttpRequest) -> Result<Value, HostError> {
        self.check(CAP_NET_HTTP, "perform an HTTP fetch")?;
        let rt = self.runtime()?;

        let mut args = match serde_json::to_value(&request) {
            Ok(Value::Object(map)) => map,
            _ => return Err(HostError::InvalidArgs("unserialisable request".into())),
        };
        args.insert("allowedUrls".into(), json!(&*self.allowed_http_urls));
        args.insert("pluginId".into(), json!(&*self.plugin_id));

        rt.services
            .backend
            .invoke("plugin_http_fetch", Value::Object(args))
            .await
            .map_err(HostError::Backend)
    }

    // -----------------------------------------------------------------------
    // Tier 4: scoped backend invoke passthrough
    // -----------------------------------------------------------------------

    /// Call a whitelisted backend command. The per-plugin data commands are
    /// always available; other whitelisted commands need the matching
    /// `invoke:<command>` capability; everything else is rejected outright.
    pub async fn invoke(&self, command: &str, args: Value) -> Result<Value, HostError> {
        if !PLUGIN_DATA_COMMANDS.contains(&command) {
            if !GATED_COMMANDS.contains(&command) {
                return Err(HostError::CommandNotAllowed {
                    command: command.to_string(),
                });
            }
            self.check(
                &invoke_capability(command),
                &format!("invoke \"{command}\""),
            )?;
        }

        let mut args = match args {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(HostError::InvalidArgs(format!(
                    "args must be a JSON object, got {other}"
                )));
            }
        };
        args.insert("pluginId".into(), json!(&*self.plugin_id));

        let rt = self.runtime()?;
        rt.services
            .backend
            .invoke(command, Value::Object(args))
            .await
            .map_err(HostError::Backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CallbackPlugin, PluginRuntime};
    use crate::shell::{Backend, NoopShell, Services};
    use futures_util::future::BoxFuture;
    use parking_lot::Mutex;

    /// Backend double that records every invoke it receives.
    struct RecordingBackend {
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().clone()
        }
    }

    impl Backend for RecordingBackend {
        fn invoke(&self, command: &str, args: Value) -> BoxFuture<'static, Result<Value, String>> {
            self.calls.lock().push((command.to_string(), args));
            Box::pin(futures_util::future::ready(Ok(Value::Null)))
        }
    }

    fn runtime_with_backend(backend: Arc<RecordingBackend>) -> PluginRuntime {
        let shell = Arc::new(NoopShell);
        PluginRuntime::new(Services {
            backend,
            ui: shell.clone(),
            app: shell,
        })
    }

    /// Register a plugin that stashes its facade and hand it back.
    fn capture_host(
        runtime: &PluginRuntime,
        id: &str,
        capabilities: Option<Vec<String>>,
    ) -> HostApi {
        let slot: Arc<Mutex<Option<HostApi>>> = Arc::new(Mutex::new(None));
        let stash = slot.clone();
        let plugin = Arc::new(CallbackPlugin::new(id, move |host| {
            *stash.lock() = Some(host);
            Ok(())
        }));
        match capabilities {
            Some(caps) => runtime.register_sandboxed(plugin, caps, Vec::new()),
            None => runtime.register(plugin),
        }
        let host = slot.lock().take().expect("plugin should have loaded");
        host
    }

    #[tokio::test]
    async fn write_pty_rejected_without_capability() {
        let backend = RecordingBackend::new();
        let runtime = runtime_with_backend(backend.clone());
        let host = capture_host(&runtime, "ext", Some(vec![]));

        let err = host.write_pty("s1", "ls\n").await.unwrap_err();
        assert_eq!(
            err,
            HostError::MissingCapability {
                capability: "pty:write".into(),
                action: "write to a PTY session".into(),
            }
        );
        // Zero observable effect: no backend call was made.
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn write_pty_succeeds_with_capability() {
        let backend = RecordingBackend::new();
        let runtime = runtime_with_backend(backend.clone());
        let host = capture_host(&runtime, "ext", Some(vec!["pty:write".into()]));

        host.write_pty("s1", "ls\n").await.unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "write_pty");
        assert_eq!(calls[0].1["sessionId"], "s1");
        assert_eq!(calls[0].1["pluginId"], "ext");
    }

    #[tokio::test]
    async fn builtin_bypasses_tier3_checks() {
        let backend = RecordingBackend::new();
        let runtime = runtime_with_backend(backend.clone());
        let host = capture_host(&runtime, "builtin", None);

        host.write_pty("s1", "x").await.unwrap();
        host.open_markdown("plan:x").unwrap();
        host.play_sound("ping").unwrap();
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn ui_actions_gated_individually() {
        let runtime = PluginRuntime::new(Services::noop());
        let host = capture_host(&runtime, "ext", Some(vec!["ui:sound".into()]));

        assert!(host.play_sound("ping").is_ok());
        let err = host.open_markdown("plan:x").unwrap_err();
        assert!(matches!(err, HostError::MissingCapability { capability, .. }
            if capability == "ui:markdown"));
    }

    #[tokio::test]
    async fn http_fetch_forwards_allow_list_and_plugin_id() {
        let backend = RecordingBackend::new();
        let runtime = runtime_with_backend(backend.clone());

        let slot: Arc<Mutex<Option<HostApi>>> = Arc::new(Mutex::new(None));
        let stash = slot.clone();
        let plugin = Arc::new(CallbackPlugin::new("fetcher", move |host| {
            *stash.lock() = Some(host);
            Ok(())
        }));
        runtime.register_sandboxed(
            plugin,
            vec!["net:http".into()],
            vec!["https://api.example.com/*".into()],
        );
        let host = slot.lock().take().unwrap();

        host.http_fetch(HttpRequest::get("https://api.example.com/data"))
            .await
            .unwrap();

        let calls = backend.calls();
        assert_eq!(calls[0].0, "plugin_http_fetch");
        assert_eq!(calls[0].1["url"], "https://api.example.com/data");
        assert_eq!(
            calls[0].1["allowedUrls"],
            serde_json::json!(["https://api.example.com/*"])
        );
        assert_eq!(calls[0].1["pluginId"], "fetcher");
    }

    #[tokio::test]
    async fn plugin_data_commands_always_available() {
        let backend = RecordingBackend::new();
        let runtime = runtime_with_backend(backend.clone());
        let host = capture_host(&runtime, "ext", Some(vec![]));

        host.invoke("read_plugin_data", serde_json::json!({"path": "cache.json"}))
            .await
            .unwrap();

        let calls = backend.calls();
        assert_eq!(calls[0].0, "read_plugin_data");
        assert_eq!(calls[0].1["path"], "cache.json");
        assert_eq!(calls[0].1["pluginId"], "ext");
    }

    #[tokio::test]
    async fn gated_command_requires_invoke_capability() {
        let backend = RecordingBackend::new();
        let runtime = runtime_with_backend(backend.clone());
        let host = capture_host(&runtime, "ext", Some(vec![]));

        let err = host.invoke("read_file", Value::Null).await.unwrap_err();
        assert!(matches!(err, HostError::MissingCapability { capability, .. }
            if capability == "invoke:read_file"));
        assert!(backend.calls().is_empty());

        let host = capture_host(&runtime, "ext2", Some(vec!["invoke:read_file".into()]));
        host.invoke("read_file", Value::Null).await.unwrap();
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn unlisted_command_rejected_even_for_builtin() {
        let backend = RecordingBackend::new();
        let runtime = runtime_with_backend(backend.clone());
        let host = capture_host(&runtime, "builtin", None);

        let err = host.invoke("close_pty", Value::Null).await.unwrap_err();
        assert_eq!(
            err,
            HostError::CommandNotAllowed {
                command: "close_pty".into()
            }
        );
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn invoke_rejects_non_object_args() {
        let runtime = PluginRuntime::new(Services::noop());
        let host = capture_host(&runtime, "builtin", None);

        let err = host
            .invoke("read_plugin_data", serde_json::json!([1, 2]))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::InvalidArgs(_)));
    }

    #[test]
    fn tier2_queries_answer_empty_on_noop_shell() {
        let runtime = PluginRuntime::new(Services::noop());
        let host = capture_host(&runtime, "ext", Some(vec![]));

        assert!(host.active_repository().is_none());
        assert!(host.repositories().is_empty());
        assert!(host.active_session_id().is_none());
        assert!(host.pending_pr_notifications().is_empty());
        assert!(host.repo_settings("/x").is_none());
    }

    #[tokio::test]
    async fn stashed_host_after_runtime_drop_is_inert() {
        let runtime = PluginRuntime::new(Services::noop());
        let host = capture_host(&runtime, "ext", None);
        drop(runtime);

        assert!(matches!(
            host.write_pty("s1", "x").await,
            Err(HostError::RuntimeShutdown)
        ));
        assert!(host.repositories().is_empty());
        let reg = host.on_output(regex::Regex::new("x").unwrap(), |_| Ok(()));
        assert!(reg.is_disposed());
    }

    #[test]
    fn capability_error_message_names_token_and_action() {
        let err = HostError::MissingCapability {
            capability: "pty:write".into(),
            action: "write to a PTY session".into(),
        };
        let msg: String = err.into();
        assert!(msg.contains("pty:write"));
        assert!(msg.contains("write to a PTY session"));
    }
}
