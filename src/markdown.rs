//! Markdown content providers resolved through custom `scheme:path?query`
//! URIs.
//!
//! Plugins register a provider for a URI scheme; the UI resolves content URIs
//! (e.g. from activity items) through the registry. Registrations under the
//! same scheme form a last-registered-wins stack. Resolution never fails:
//! an unparseable URI, an unknown scheme, or a provider answering "nothing"
//! all come back as `None`.

use crate::registration::Registration;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Parsed content URI handed to a provider.
#[derive(Debug, Clone)]
pub struct ContentRequest {
    pub scheme: String,
    pub path: String,
    query: HashMap<String, String>,
}

impl ContentRequest {
    /// Parse `scheme:path?key=value`. `None` when there is no scheme
    /// separator or the URI is otherwise malformed.
    pub fn parse(uri: &str) -> Option<Self> {
        let parsed = url::Url::parse(uri).ok()?;
        let query = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Some(Self {
            scheme: parsed.scheme().to_string(),
            path: parsed.path().to_string(),
            query,
        })
    }

    /// Query parameter by key.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

type ProviderFn = dyn Fn(ContentRequest) -> BoxFuture<'static, Option<String>> + Send + Sync;

/// Supplies markdown text for parsed content URIs of one scheme.
pub struct MarkdownProvider {
    provide: Box<ProviderFn>,
}

impl MarkdownProvider {
    /// Provider answering synchronously.
    pub fn new<F>(provide: F) -> Self
    where
        F: Fn(&ContentRequest) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            provide: Box::new(move |req| {
                let content = provide(&req);
                Box::pin(futures_util::future::ready(content))
            }),
        }
    }

    /// Provider answering with a future, e.g. one that reads through the
    /// backend.
    pub fn deferred<F>(provide: F) -> Self
    where
        F: Fn(ContentRequest) -> BoxFuture<'static, Option<String>> + Send + Sync + 'static,
    {
        Self {
            provide: Box::new(provide),
        }
    }

    async fn content_for(&self, request: ContentRequest) -> Option<String> {
        (self.provide)(request).await
    }
}

struct ProviderEntry {
    registration_id: u64,
    plugin_id: Option<String>,
    provider: Arc<MarkdownProvider>,
}

#[derive(Default)]
struct RegistryInner {
    /// Registration stack per scheme; the most recent entry resolves.
    schemes: Mutex<HashMap<String, Vec<ProviderEntry>>>,
    next_id: AtomicU64,
}

/// Scheme-keyed registry of markdown providers.
#[derive(Clone, Default)]
pub struct MarkdownRegistry {
    inner: Arc<RegistryInner>,
}

impl MarkdownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for `scheme`, shadowing any existing registration
    /// until the returned handle is disposed.
    pub fn register(&self, scheme: &str, provider: MarkdownProvider) -> Registration {
        self.register_for(None, scheme, provider)
    }

    pub(crate) fn register_for(
        &self,
        plugin_id: Option<&str>,
        scheme: &str,
        provider: MarkdownProvider,
    ) -> Registration {
        let scheme = scheme.to_ascii_lowercase();
        let registration_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .schemes
            .lock()
            .entry(scheme.clone())
            .or_default()
            .push(ProviderEntry {
                registration_id,
                plugin_id: plugin_id.map(str::to_string),
                provider: Arc::new(provider),
            });

        let inner = Arc::clone(&self.inner);
        Registration::new(move || {
            let mut schemes = inner.schemes.lock();
            if let Some(stack) = schemes.get_mut(&scheme) {
                stack.retain(|e| e.registration_id != registration_id);
                if stack.is_empty() {
                    schemes.remove(&scheme);
                }
            }
        })
    }

    /// Resolve a content URI to markdown text. `None` for a malformed URI,
    /// an unknown scheme, or a provider with nothing to say.
    pub async fn resolve(&self, uri: &str) -> Option<String> {
        let request = ContentRequest::parse(uri)?;
        let provider = {
            let schemes = self.inner.schemes.lock();
            schemes
                .get(&request.scheme)
                .and_then(|stack| stack.last())
                .map(|e| Arc::clone(&e.provider))
        };
        provider?.content_for(request).await
    }

    pub fn has_scheme(&self, scheme: &str) -> bool {
        self.inner
            .schemes
            .lock()
            .contains_key(&scheme.to_ascii_lowercase())
    }

    /// Sweep every registration a plugin owns.
    pub(crate) fn remove_plugin(&self, plugin_id: &str) {
        self.inner.schemes.lock().retain(|_, stack| {
            stack.retain(|e| e.plugin_id.as_deref() != Some(plugin_id));
            !stack.is_empty()
        });
    }

    /// Remove every registration (full teardown / test isolation).
    pub fn clear(&self) {
        self.inner.schemes.lock().clear();
    }
}
