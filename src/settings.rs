//! Versioned JSON settings store with a migration chain.
//!
//! Each module registers a `(name, default)` pair once at startup; callers
//! fetch a deep clone so no module can mutate another's state through a
//! shared reference. Persisted under `<share>/.fileshare/settings.json`.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const CURRENT_SETTINGS_VERSION: u64 = 2;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct SettingsFile {
    #[serde(rename = "settingsVersion")]
    settings_version: u64,
    modules: Map<String, Value>,
}

pub struct Settings {
    path: PathBuf,
    inner: RwLock<SettingsFile>,
    defaults: Map<String, Value>,
}

impl Settings {
    /// Loads `<share>/.fileshare/settings.json`, normalizing legacy shapes and
    /// running the migration chain up to `CURRENT_SETTINGS_VERSION`, then
    /// overlays `defaults` for any module key that's still missing.
    pub async fn init(fileshare_dir: &Path, defaults: Map<String, Value>) -> Self {
        let path = fileshare_dir.join("settings.json");
        let raw = tokio::fs::read(&path).await.ok();
        let parsed: Value = raw
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_else(|| Value::Object(Map::new()));

        let mut file = normalize_legacy(parsed);
        apply_migrations(&mut file);
        overlay_defaults(&mut file, &defaults);

        let settings = Settings {
            path,
            inner: RwLock::new(file),
            defaults,
        };
        settings.persist().await;
        settings
    }

    /// Returns a deep clone of the named module's current value, or its
    /// registered default if the module was never registered.
    pub async fn get(&self, module: &str) -> Value {
        let inner = self.inner.read().await;
        inner
            .modules
            .get(module)
            .cloned()
            .unwrap_or_else(|| self.defaults.get(module).cloned().unwrap_or(Value::Null))
    }

    /// Replaces a module's value and persists the whole file.
    pub async fn set(&self, module: &str, value: Value) {
        {
            let mut inner = self.inner.write().await;
            inner.modules.insert(module.to_string(), value);
        }
        self.persist().await;
    }

    async fn persist(&self) {
        let inner = self.inner.read().await;
        match serde_json::to_vec_pretty(&*inner) {
            Ok(bytes) => {
                if let Some(parent) = self.path.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                if let Err(e) = tokio::fs::write(&self.path, bytes).await {
                    warn!(error = %e, "failed to persist settings.json");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize settings"),
        }
    }
}

/// Bare module-map files (no version at all) are treated as v0.
fn normalize_legacy(value: Value) -> SettingsFile {
    match value {
        Value::Object(mut obj) => {
            if let Some(Value::Number(v)) = obj.get("settingsVersion") {
                let version = v.as_u64().unwrap_or(0);
                let modules = match obj.remove("modules") {
                    Some(Value::Object(m)) => m,
                    _ => Map::new(),
                };
                SettingsFile {
                    settings_version: version,
                    modules,
                }
            } else {
                // Legacy shape: the object itself is the module map.
                SettingsFile {
                    settings_version: 0,
                    modules: obj,
                }
            }
        }
        _ => SettingsFile {
            settings_version: 0,
            modules: Map::new(),
        },
    }
}

fn apply_migrations(file: &mut SettingsFile) {
    while file.settings_version < CURRENT_SETTINGS_VERSION {
        match file.settings_version {
            0 => {
                // v0 -> v1: no structural change, just stamps the version; the
                // bare module map becomes the wrapped shape on next persist.
                file.settings_version = 1;
            }
            1 => {
                // v1 -> v2: compact the haproxy module down to {proxyProtocolV2: bool}.
                if let Some(haproxy) = file.modules.get("haproxy").cloned() {
                    let enabled = haproxy
                        .get("enabled")
                        .and_then(Value::as_bool)
                        .or_else(|| haproxy.as_bool())
                        .unwrap_or(false);
                    let mut compact = Map::new();
                    compact.insert("proxyProtocolV2".to_string(), Value::Bool(enabled));
                    file.modules.insert("haproxy".to_string(), Value::Object(compact));
                }
                file.settings_version = 2;
            }
            other => {
                warn!(version = other, "no migration registered past this version, stopping");
                break;
            }
        }
    }
    info!(version = file.settings_version, "settings normalized");
}

fn overlay_defaults(file: &mut SettingsFile, defaults: &Map<String, Value>) {
    for (name, default_value) in defaults {
        file.modules.entry(name.clone()).or_insert_with(|| default_value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_is_idempotent() {
        let legacy = json!({"haproxy": {"enabled": true}, "misc": {"a": 1}});
        let mut first = normalize_legacy(legacy);
        apply_migrations(&mut first);
        let roundtrip = serde_json::to_value(&first).unwrap();

        let mut second = normalize_legacy(roundtrip);
        apply_migrations(&mut second);

        assert_eq!(first.settings_version, CURRENT_SETTINGS_VERSION);
        assert_eq!(second.settings_version, CURRENT_SETTINGS_VERSION);
        assert_eq!(first.modules, second.modules);
    }

    #[test]
    fn haproxy_compaction_extracts_bool() {
        let legacy = json!({"haproxy": {"enabled": true, "otherJunk": 1}});
        let mut file = normalize_legacy(legacy);
        apply_migrations(&mut file);
        assert_eq!(file.modules.get("haproxy").unwrap(), &json!({"proxyProtocolV2": true}));
    }

    #[test]
    fn overlay_fills_missing_modules_only() {
        let mut file = SettingsFile {
            settings_version: CURRENT_SETTINGS_VERSION,
            modules: Map::new(),
        };
        file.modules.insert("stats".to_string(), json!({"x": 1}));
        let mut defaults = Map::new();
        defaults.insert("stats".to_string(), json!({"x": 999}));
        defaults.insert("uploads".to_string(), json!({"maxFileSizeBytes": 100}));
        overlay_defaults(&mut file, &defaults);
        assert_eq!(file.modules.get("stats").unwrap(), &json!({"x": 1}));
        assert_eq!(file.modules.get("uploads").unwrap(), &json!({"maxFileSizeBytes": 100}));
    }
}
