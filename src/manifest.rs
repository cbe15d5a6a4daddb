//! Plugin manifest validation: the loader boundary in front of the runtime.
//!
//! A plugin ships as a directory containing `manifest.json` and a module
//! entry point. The loader validates the manifest (and that the loaded module
//! matches it) before the runtime's `register` is ever attempted; the runtime
//! itself assumes it is handed a well-formed plugin. Failures are descriptive
//! string reasons, surfaced by the loader and never fatal to the host.

use crate::capability::KNOWN_CAPABILITIES;
use crate::runtime::Plugin;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Component, Path};

/// Plugin manifest as declared in `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "minAppVersion")]
    pub min_app_version: String,
    pub main: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// URL patterns the plugin may fetch with `net:http`.
    #[serde(default, rename = "allowedUrls")]
    pub allowed_urls: Vec<String>,
}

/// Parse a `manifest.json` document.
pub fn parse_manifest(json: &str) -> Result<PluginManifest, String> {
    serde_json::from_str(json).map_err(|e| format!("invalid manifest.json: {e}"))
}

/// Validate a parsed manifest for required fields and sanity.
///
/// `dir_name` is the plugin's directory name (the id must match it);
/// `app_version` is the running application version the manifest's
/// `minAppVersion` is checked against.
pub fn validate_manifest(
    manifest: &PluginManifest,
    dir_name: &str,
    app_version: &str,
) -> Result<(), String> {
    if manifest.id.is_empty() {
        return Err("id is empty".into());
    }
    if manifest.id != dir_name {
        return Err(format!(
            "id \"{}\" does not match directory name \"{}\"",
            manifest.id, dir_name
        ));
    }
    if manifest.name.is_empty() {
        return Err("name is empty".into());
    }
    if manifest.version.is_empty() {
        return Err("version is empty".into());
    }
    if manifest.min_app_version.is_empty() {
        return Err("minAppVersion is empty".into());
    }
    if manifest.main.is_empty() {
        return Err("main is empty".into());
    }
    // main must not escape the plugin directory
    if is_path_escape(&manifest.main) {
        return Err(format!("main \"{}\" attempts path traversal", manifest.main));
    }
    for cap in &manifest.capabilities {
        if !KNOWN_CAPABILITIES.contains(&cap.as_str()) {
            return Err(format!("unknown capability: \"{cap}\""));
        }
    }
    if compare_versions(&manifest.min_app_version, app_version) == Ordering::Greater {
        return Err(format!(
            "requires app version {} (running {})",
            manifest.min_app_version, app_version
        ));
    }
    Ok(())
}

/// Check that a loaded plugin module matches its manifest.
pub fn validate_loaded_plugin(manifest: &PluginManifest, plugin: &dyn Plugin) -> Result<(), String> {
    if plugin.id() != manifest.id {
        return Err(format!(
            "module id \"{}\" does not match manifest id \"{}\"",
            plugin.id(),
            manifest.id
        ));
    }
    Ok(())
}

/// Returns true if a relative path attempts to escape its root via `..` or
/// absolute components.
fn is_path_escape(relative: &str) -> bool {
    let path = Path::new(relative);
    if path.is_absolute() {
        return true;
    }
    path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Compare dotted version strings numerically; non-numeric trailing text in a
/// segment is ignored (`"1.0.0-beta"` compares as `1.0.0`).
pub(crate) fn compare_versions(a: &str, b: &str) -> Ordering {
    let pa = version_components(a);
    let pb = version_components(b);
    for i in 0..pa.len().max(pb.len()) {
        let ca = pa.get(i).copied().unwrap_or(0);
        let cb = pb.get(i).copied().unwrap_or(0);
        match ca.cmp(&cb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn version_components(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|segment| {
            let digits: String = segment.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}
