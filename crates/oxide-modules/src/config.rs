//! Application and module configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::GraphNode;
use crate::module::Phase;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for the expected shape.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The values are inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Block cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether cacheable blocks are cached at all.
    pub enabled: bool,
    /// Lifetime of a cached block in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 300,
        }
    }
}

/// Per-module override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSettings {
    /// Whether the module is enabled.
    pub enabled: bool,
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Whether the installer has run. Until then every page redirects to
    /// `install_path`.
    pub installed: bool,
    /// Path of the installer.
    pub install_path: String,
    /// Block cache settings.
    pub cache: CacheConfig,
    /// Deadline for one module's route step, in milliseconds.
    pub route_timeout_ms: u64,
    /// Deadline for one module's init step, in milliseconds.
    pub init_timeout_ms: u64,
    /// Module overrides by name.
    pub modules: BTreeMap<String, ModuleSettings>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            installed: true,
            install_path: "/admin/install".to_string(),
            cache: CacheConfig::default(),
            route_timeout_ms: 30_000,
            init_timeout_ms: 30_000,
            modules: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Loads and validates a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.route_timeout_ms == 0 || self.init_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        if !self.install_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "install_path `{}` must start with `/`",
                self.install_path
            )));
        }
        Ok(())
    }

    /// Returns whether `module` is enabled, falling back to `default`.
    pub fn module_enabled(&self, module: &str, default: bool) -> bool {
        self.modules.get(module).map_or(default, |m| m.enabled)
    }

    /// Deadline of a module route step.
    pub fn route_timeout(&self) -> Duration {
        Duration::from_millis(self.route_timeout_ms)
    }

    /// Deadline of a module init step.
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Lifetime of cached blocks.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

/// Declared shape of one installed module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Module name.
    pub name: String,
    /// Whether the module is enabled.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Modules that must finish first.
    #[serde(default)]
    pub depends: Vec<String>,
    /// Execution phase.
    #[serde(default)]
    pub phase: Phase,
}

fn enabled_by_default() -> bool {
    true
}

/// The installed module set, as declared on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Modules in declaration order.
    pub modules: Vec<ManifestEntry>,
}

impl ModuleManifest {
    /// Loads a JSON manifest.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Converts the manifest to graph nodes, applying `config` overrides.
    pub fn nodes(&self, config: &AppConfig) -> Vec<GraphNode> {
        self.modules
            .iter()
            .map(|entry| GraphNode {
                name: entry.name.clone(),
                enabled: config.module_enabled(&entry.name, entry.enabled),
                depends: entry.depends.clone(),
                phase: entry.phase,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_json_str("{}").unwrap();
        assert!(config.installed);
        assert_eq!(config.install_path, "/admin/install");
        assert!(!config.cache.enabled);
        assert_eq!(config.route_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_module_overrides() {
        let config =
            AppConfig::from_json_str(r#"{"modules": {"feeds": {"enabled": false}}}"#).unwrap();
        assert!(!config.module_enabled("feeds", true));
        assert!(config.module_enabled("content", true));
        assert!(!config.module_enabled("content", false));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            AppConfig::from_json_str(r#"{"route_timeout_ms": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_json_str(r#"{"install_path": "install"}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"installed": false, "cache": {{"enabled": true}}}}"#).unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert!(!config.installed);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl_secs, 300);

        let missing = AppConfig::load(Path::new("/nonexistent/oxide.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_manifest_nodes() {
        let manifest: ModuleManifest = serde_json::from_str(
            r#"{"modules": [
                {"name": "user", "phase": "first"},
                {"name": "content", "depends": ["user"]},
                {"name": "feeds", "enabled": false}
            ]}"#,
        )
        .unwrap();
        let config =
            AppConfig::from_json_str(r#"{"modules": {"feeds": {"enabled": true}}}"#).unwrap();
        let nodes = manifest.nodes(&config);
        assert_eq!(nodes[0].phase, Phase::First);
        assert_eq!(nodes[1].depends, vec!["user".to_string()]);
        assert!(nodes[2].enabled);
    }
}
