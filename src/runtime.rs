//! Plugin registry and dispatch core.
//!
//! Owns the live plugin table, every resource plugins register through their
//! facades, the per-session line buffers, and the deferred dispatch queue.
//! The containment contract: nothing a plugin does (in load, unload, a
//! watcher, or an event handler) escapes the public API here or affects
//! another plugin. Every failure path is catch, log to that plugin's logger,
//! continue.

use crate::activity::ActivityStore;
use crate::capability::CapabilitySet;
use crate::host::HostApi;
use crate::line_buffer::LineBuffer;
use crate::logger::{PluginLogger, PluginLogEntry};
use crate::markdown::MarkdownRegistry;
use crate::plugin_state::{PluginState, PluginStateStore};
use crate::shell::Services;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An extension unit: anything exposing an id and load/unload callbacks.
///
/// `on_load` receives the plugin's scoped [`HostApi`]; the facade is
/// cloneable, so a plugin may stash it for later use from its callbacks.
/// Structural validation (manifest fields, id matching) happens at the loader
/// boundary, not here.
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;
    fn on_load(&self, host: HostApi) -> Result<(), String>;
    fn on_unload(&self) -> Result<(), String>;
}

/// Plugin built from closures, convenient for built-ins registered straight
/// from application code.
pub struct CallbackPlugin {
    id: String,
    on_load: Box<dyn Fn(HostApi) -> Result<(), String> + Send + Sync>,
    on_unload: Box<dyn Fn() -> Result<(), String> + Send + Sync>,
}

impl CallbackPlugin {
    pub fn new(
        id: impl Into<String>,
        on_load: impl Fn(HostApi) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            on_load: Box::new(on_load),
            on_unload: Box::new(|| Ok(())),
        }
    }

    pub fn with_unload(
        mut self,
        on_unload: impl Fn() -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.on_unload = Box::new(on_unload);
        self
    }
}

impl Plugin for CallbackPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_load(&self, host: HostApi) -> Result<(), String> {
        (self.on_load)(host)
    }

    fn on_unload(&self) -> Result<(), String> {
        (self.on_unload)()
    }
}

/// A matched output line handed to a watcher callback.
#[derive(Debug, Clone)]
pub struct OutputMatch {
    /// The full logical line (ANSI-stripped).
    pub line: String,
    pub session_id: String,
    /// Text of the overall match.
    pub matched: String,
    /// Capture groups, group 0 included.
    pub captures: Vec<Option<String>>,
}

/// A structured application event handed to an event handler.
#[derive(Debug, Clone)]
pub struct StructuredEvent {
    pub event_type: String,
    pub payload: Value,
    pub session_id: String,
}

pub(crate) type WatcherCallback = dyn Fn(&OutputMatch) -> Result<(), String> + Send + Sync;
pub(crate) type EventCallback = dyn Fn(&StructuredEvent) -> Result<(), String> + Send + Sync;

struct WatcherEntry {
    id: u64,
    plugin_id: Arc<str>,
    pattern: regex::Regex,
    callback: Arc<WatcherCallback>,
}

struct HandlerEntry {
    id: u64,
    plugin_id: Arc<str>,
    event_type: String,
    callback: Arc<EventCallback>,
}

struct LivePlugin {
    id: String,
    plugin: Arc<dyn Plugin>,
}

/// A deferred plugin-callback invocation.
struct Job {
    plugin_id: Arc<str>,
    label: String,
    run: Box<dyn FnOnce() -> Result<(), String> + Send>,
}

pub(crate) struct RuntimeInner {
    pub(crate) services: Services,
    pub(crate) activity: ActivityStore,
    pub(crate) markdown: MarkdownRegistry,
    states: PluginStateStore,
    loggers: DashMap<String, Arc<PluginLogger>>,
    plugins: Mutex<Vec<LivePlugin>>,
    watchers: Mutex<Vec<WatcherEntry>>,
    handlers: Mutex<Vec<HandlerEntry>>,
    line_buffers: Mutex<HashMap<String, LineBuffer>>,
    queue: Mutex<VecDeque<Job>>,
    next_registration_id: AtomicU64,
}

impl RuntimeInner {
    pub(crate) fn next_registration_id(&self) -> u64 {
        self.next_registration_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn add_watcher(
        &self,
        plugin_id: &str,
        pattern: regex::Regex,
        callback: Arc<WatcherCallback>,
    ) -> u64 {
        let id = self.next_registration_id();
        self.watchers.lock().push(WatcherEntry {
            id,
            plugin_id: Arc::from(plugin_id),
            pattern,
            callback,
        });
        id
    }

    pub(crate) fn remove_watcher(&self, id: u64) {
        self.watchers.lock().retain(|w| w.id != id);
    }

    pub(crate) fn add_handler(
        &self,
        plugin_id: &str,
        event_type: &str,
        callback: Arc<EventCallback>,
    ) -> u64 {
        let id = self.next_registration_id();
        self.handlers.lock().push(HandlerEntry {
            id,
            plugin_id: Arc::from(plugin_id),
            event_type: event_type.to_string(),
            callback,
        });
        id
    }

    pub(crate) fn remove_handler(&self, id: u64) {
        self.handlers.lock().retain(|h| h.id != id);
    }

    /// Transitively remove every resource a plugin registered through its
    /// facade. Used on unregister and to roll back a failed load.
    fn dispose_plugin_resources(&self, plugin_id: &str) {
        self.watchers.lock().retain(|w| &*w.plugin_id != plugin_id);
        self.handlers.lock().retain(|h| &*h.plugin_id != plugin_id);
        self.activity.remove_plugin(plugin_id);
        self.markdown.remove_plugin(plugin_id);
    }
}

/// The plugin runtime: lifecycle, dispatch, and resource ownership.
pub struct PluginRuntime {
    inner: Arc<RuntimeInner>,
}

impl PluginRuntime {
    pub fn new(services: Services) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                services,
                activity: ActivityStore::new(),
                markdown: MarkdownRegistry::new(),
                states: PluginStateStore::new(),
                loggers: DashMap::new(),
                plugins: Mutex::new(Vec::new()),
                watchers: Mutex::new(Vec::new()),
                handlers: Mutex::new(Vec::new()),
                line_buffers: Mutex::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                next_registration_id: AtomicU64::new(1),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Register a built-in plugin: no capability set, all checks bypassed.
    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        self.register_inner(plugin, CapabilitySet::builtin(), Vec::new());
    }

    /// Register an external plugin with an explicit grant set and HTTP URL
    /// allow-list.
    pub fn register_sandboxed(
        &self,
        plugin: Arc<dyn Plugin>,
        capabilities: Vec<String>,
        allowed_http_urls: Vec<String>,
    ) {
        self.register_inner(
            plugin,
            CapabilitySet::granted(capabilities),
            allowed_http_urls,
        );
    }

    fn register_inner(
        &self,
        plugin: Arc<dyn Plugin>,
        capabilities: CapabilitySet,
        allowed_http_urls: Vec<String>,
    ) {
        let id = plugin.id().to_string();

        // Hot-reload / replace: the previous registration is fully torn down
        // (unload + resource disposal) before the new load begins.
        self.unregister(&id);

        let logger = Arc::new(PluginLogger::with_default_capacity());
        self.inner.loggers.insert(id.clone(), logger.clone());

        let host = HostApi::new(
            Arc::downgrade(&self.inner),
            &id,
            capabilities.clone(),
            allowed_http_urls,
            logger.clone(),
        );
        let declared = capabilities.declared();

        match contain(|| plugin.on_load(host)) {
            Ok(()) => {
                self.inner.plugins.lock().push(LivePlugin {
                    id: id.clone(),
                    plugin,
                });
                self.inner.states.set_loaded(&id, declared);
                tracing::debug!(plugin_id = %id, "plugin loaded");
            }
            Err(message) => {
                // A partially-initialised plugin leaves no trace: everything
                // the load callback registered before failing is rolled back.
                logger.error(format!("onload failed: {message}"));
                self.inner.dispose_plugin_resources(&id);
                self.inner.states.set_failed(&id, declared, message.clone());
                tracing::warn!(plugin_id = %id, error = %message, "plugin failed to load");
            }
        }
    }

    /// Unload a plugin and dispose everything it registered. No-op on an
    /// unknown id. An unload error is logged and swallowed.
    pub fn unregister(&self, id: &str) {
        let live = {
            let mut plugins = self.inner.plugins.lock();
            match plugins.iter().position(|p| p.id == id) {
                Some(pos) => plugins.remove(pos),
                None => return,
            }
        };

        if let Err(message) = contain(|| live.plugin.on_unload()) {
            if let Some(logger) = self.inner.loggers.get(id) {
                logger.error(format!("onunload failed: {message}"));
            }
            tracing::warn!(plugin_id = %id, error = %message, "plugin unload failed");
        }

        self.inner.dispose_plugin_resources(id);
        self.inner.states.set_unloaded(id);
        tracing::debug!(plugin_id = %id, "plugin unregistered");
    }

    /// Unregister every plugin, most recent first.
    pub fn unregister_all(&self) {
        loop {
            let id = self.inner.plugins.lock().last().map(|p| p.id.clone());
            match id {
                Some(id) => self.unregister(&id),
                None => break,
            }
        }
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.inner.plugins.lock().iter().any(|p| p.id == id)
    }

    pub fn registered_ids(&self) -> Vec<String> {
        self.inner.plugins.lock().iter().map(|p| p.id.clone()).collect()
    }

    // -----------------------------------------------------------------------
    // Output dispatch
    // -----------------------------------------------------------------------

    /// Feed a raw PTY output chunk for a session. Completed logical lines are
    /// dispatched to output watchers. Contract-level no-op when no watcher is
    /// registered at all.
    pub fn process_raw_output(&self, chunk: &str, session_id: &str) {
        if self.inner.watchers.lock().is_empty() {
            return;
        }
        let lines = {
            let mut buffers = self.inner.line_buffers.lock();
            buffers
                .entry(session_id.to_string())
                .or_default()
                .push(chunk)
        };
        for line in lines {
            self.dispatch_line(&line, session_id);
        }
    }

    /// Discard a session's buffer state. Later chunks for the same id start
    /// fresh, with no memory of prior partial content.
    pub fn remove_session(&self, session_id: &str) {
        self.inner.line_buffers.lock().remove(session_id);
    }

    /// Test one logical line against every registered watcher. Matching
    /// callbacks are enqueued (registration order) and run by
    /// [`run_pending`](Self::run_pending), each inside its own containment
    /// boundary.
    pub fn dispatch_line(&self, line: &str, session_id: &str) {
        let snapshot: Vec<(Arc<str>, regex::Regex, Arc<WatcherCallback>)> = {
            let watchers = self.inner.watchers.lock();
            watchers
                .iter()
                .map(|w| (w.plugin_id.clone(), w.pattern.clone(), w.callback.clone()))
                .collect()
        };

        let mut jobs = Vec::new();
        for (plugin_id, pattern, callback) in snapshot {
            let Some(caps) = pattern.captures(line) else {
                continue;
            };
            let output_match = OutputMatch {
                line: line.to_string(),
                session_id: session_id.to_string(),
                matched: caps
                    .get(0)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
                captures: caps
                    .iter()
                    .map(|g| g.map(|m| m.as_str().to_string()))
                    .collect(),
            };
            jobs.push(Job {
                plugin_id,
                label: "output watcher".to_string(),
                run: Box::new(move || callback(&output_match)),
            });
        }

        if !jobs.is_empty() {
            self.inner.queue.lock().extend(jobs);
        }
    }

    /// Route a structured application event to every handler registered for
    /// its type, with the same deferral and containment as line dispatch.
    pub fn dispatch_structured_event(&self, event_type: &str, payload: Value, session_id: &str) {
        let snapshot: Vec<(Arc<str>, Arc<EventCallback>)> = {
            let handlers = self.inner.handlers.lock();
            handlers
                .iter()
                .filter(|h| h.event_type == event_type)
                .map(|h| (h.plugin_id.clone(), h.callback.clone()))
                .collect()
        };
        if snapshot.is_empty() {
            return;
        }

        let event = Arc::new(StructuredEvent {
            event_type: event_type.to_string(),
            payload,
            session_id: session_id.to_string(),
        });

        let mut jobs = Vec::new();
        for (plugin_id, callback) in snapshot {
            let event = Arc::clone(&event);
            jobs.push(Job {
                plugin_id,
                label: format!("event handler for \"{event_type}\""),
                run: Box::new(move || callback(&event)),
            });
        }
        self.inner.queue.lock().extend(jobs);
    }

    /// Drain the deferred dispatch queue, running each job inside its own
    /// containment boundary. Jobs enqueued while draining run in the same
    /// pass. Returns the number of jobs executed.
    pub fn run_pending(&self) -> usize {
        let mut executed = 0;
        loop {
            let job = self.inner.queue.lock().pop_front();
            let Some(job) = job else { break };
            if let Err(message) = contain(job.run) {
                if let Some(logger) = self.inner.loggers.get(&*job.plugin_id) {
                    logger.error(format!("{} failed: {message}", job.label));
                }
                tracing::warn!(
                    plugin_id = %job.plugin_id,
                    error = %message,
                    "plugin callback failed"
                );
            }
            executed += 1;
        }
        executed
    }

    /// Jobs currently waiting for [`run_pending`](Self::run_pending).
    pub fn pending_jobs(&self) -> usize {
        self.inner.queue.lock().len()
    }

    // -----------------------------------------------------------------------
    // Stores
    // -----------------------------------------------------------------------

    pub fn activity(&self) -> &ActivityStore {
        &self.inner.activity
    }

    pub fn markdown(&self) -> &MarkdownRegistry {
        &self.inner.markdown
    }

    /// Resolve a markdown content URI through the provider registry.
    pub async fn resolve_markdown(&self, uri: &str) -> Option<String> {
        self.inner.markdown.resolve(uri).await
    }

    pub fn plugin_state(&self, id: &str) -> Option<PluginState> {
        self.inner.states.get(id)
    }

    pub fn plugin_states(&self) -> Vec<PluginState> {
        self.inner.states.all()
    }

    /// A plugin's log buffer; present for any plugin that has been registered
    /// (even one whose load failed).
    pub fn plugin_logger(&self, id: &str) -> Option<Arc<PluginLogger>> {
        self.inner.loggers.get(id).map(|l| Arc::clone(&l))
    }

    /// Convenience for diagnostics views: a plugin's resident log entries.
    pub fn plugin_log_entries(&self, id: &str) -> Vec<PluginLogEntry> {
        self.plugin_logger(id)
            .map(|l| l.entries())
            .unwrap_or_default()
    }
}

/// Run plugin code behind the containment boundary: an `Err` flows through,
/// a panic is converted to one.
fn contain(f: impl FnOnce() -> Result<(), String>) -> Result<(), String> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
