//! Plugin runtime for the terminal commander desktop app.
//!
//! Loads, sandboxes, and dispatches events to third-party and built-in
//! extensions:
//!
//! - [`PluginRuntime`]: lifecycle (register/unregister), output-watcher and
//!   structured-event dispatch through a deferred queue, error containment.
//! - [`HostApi`]: the capability-gated facade a plugin's `on_load` receives;
//!   its only way to affect or query the rest of the system.
//! - [`LineBuffer`]: per-session reassembly of raw PTY chunks into clean,
//!   ANSI-stripped logical lines.
//! - [`MarkdownRegistry`]: `scheme:path?query` content URIs routed to
//!   plugin-supplied providers.
//! - [`PluginLogger`]: bounded per-plugin diagnostics ring.
//!
//! The surrounding application (terminal transport, git, dialogs, UI) stays
//! behind the seams in [`shell`]: raw PTY chunks flow into
//! [`PluginRuntime::process_raw_output`], structured events into
//! [`PluginRuntime::dispatch_structured_event`], and every privileged
//! plugin action leaves through [`shell::Backend`] / [`shell::UiBridge`].
//! Plugin failures never escape the runtime's public API; they land in the
//! failing plugin's own logger.

pub mod activity;
pub mod capability;
pub mod event_scan;
pub mod host;
pub mod line_buffer;
pub mod logger;
pub mod manifest;
pub mod markdown;
pub mod plugin_state;
pub mod registration;
pub mod runtime;
pub mod shell;

pub use activity::{ActivityItem, ActivitySection, ActivityStore};
pub use capability::CapabilitySet;
pub use host::{HostApi, HostError, HttpRequest};
pub use line_buffer::LineBuffer;
pub use logger::{LogLevel, PluginLogEntry, PluginLogger};
pub use manifest::PluginManifest;
pub use markdown::{ContentRequest, MarkdownProvider, MarkdownRegistry};
pub use plugin_state::PluginState;
pub use registration::Registration;
pub use runtime::{CallbackPlugin, OutputMatch, Plugin, PluginRuntime, StructuredEvent};
pub use shell::{AppStateView, Backend, NoopShell, PrNotification, RepoInfo, Services, UiBridge};
