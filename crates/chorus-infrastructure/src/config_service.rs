//! Configuration loading.
//!
//! Reads `config.toml` once, applies environment overrides on top and
//! caches the result for the life of the service.

use anyhow::{Context, Result, anyhow};
use chorus_core::config::ChorusConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::paths::ChorusPaths;

/// Overrides `ChorusConfig::endpoint`.
pub const ENV_ENDPOINT: &str = "CHORUS_ENDPOINT";
/// Overrides `ChorusConfig::poll_interval_secs`.
pub const ENV_POLL_INTERVAL_SECS: &str = "CHORUS_POLL_INTERVAL_SECS";

/// Service for loading the chorus configuration.
///
/// A missing file is not an error: defaults are used. A file that exists
/// but does not parse is.
#[derive(Clone)]
pub struct ConfigService {
    path: PathBuf,
    /// Cached config, loaded on first access.
    cache: Arc<RwLock<Option<ChorusConfig>>>,
}

impl ConfigService {
    /// Creates a service for the `config.toml` under `paths`.
    pub fn new(paths: &ChorusPaths) -> Self {
        Self::with_path(paths.config_file())
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Arc::new(RwLock::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the effective config, loading it on first call.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if an environment override holds an invalid value.
    pub fn load(&self) -> Result<ChorusConfig> {
        {
            let cached = self
                .cache
                .read()
                .map_err(|_| anyhow!("Config cache lock poisoned"))?;
            if let Some(config) = cached.as_ref() {
                return Ok(config.clone());
            }
        }

        let mut config = self.read_file()?;
        apply_overrides(&mut config, |key| std::env::var(key).ok())?;

        tracing::info!(
            "[ConfigService] Endpoint {}, poll interval {}s",
            config.endpoint,
            config.poll_interval_secs
        );

        let mut cached = self
            .cache
            .write()
            .map_err(|_| anyhow!("Config cache lock poisoned"))?;
        *cached = Some(config.clone());
        Ok(config)
    }

    fn read_file(&self) -> Result<ChorusConfig> {
        if !self.path.exists() {
            tracing::debug!(
                "[ConfigService] {} not found; using defaults",
                self.path.display()
            );
            return Ok(ChorusConfig::default());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(ChorusConfig::default());
        }
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", self.path.display()))
    }
}

/// Applies environment overrides through `lookup`.
fn apply_overrides(
    config: &mut ChorusConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|value| !value.trim().is_empty()) {
        config.endpoint = endpoint.trim().to_string();
    }
    if let Some(raw) = lookup(ENV_POLL_INTERVAL_SECS) {
        config.poll_interval_secs = raw
            .trim()
            .parse()
            .with_context(|| format!("{ENV_POLL_INTERVAL_SECS} must be a whole number of seconds, got '{raw}'"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::config::{DEFAULT_ENDPOINT, DEFAULT_POLL_INTERVAL_SECS};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let service = ConfigService::with_path(temp_dir.path().join("config.toml"));

        let config = service.read_file().unwrap();
        assert_eq!(config, ChorusConfig::default());
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            "endpoint = \"https://dispatch.example.com/stream\"\ndefault_models = [\"m1\", \"m2\"]\n",
        )
        .unwrap();

        let config = ConfigService::with_path(path).read_file().unwrap();
        assert_eq!(config.endpoint, "https://dispatch.example.com/stream");
        assert_eq!(config.default_models, vec!["m1".to_string(), "m2".to_string()]);
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert!(config.persist_sessions);
    }

    #[test]
    fn test_unparseable_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "poll_interval_secs = \"soon\"").unwrap();

        assert!(ConfigService::with_path(path).load().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ChorusConfig::default();
        apply_overrides(
            &mut config,
            env(&[
                (ENV_ENDPOINT, " http://10.0.0.2:9000/stream "),
                (ENV_POLL_INTERVAL_SECS, "2"),
            ]),
        )
        .unwrap();

        assert_eq!(config.endpoint, "http://10.0.0.2:9000/stream");
        assert_eq!(config.poll_interval_secs, 2);
    }

    #[test]
    fn test_invalid_poll_interval_override_is_rejected() {
        let mut config = ChorusConfig::default();
        let err = apply_overrides(&mut config, env(&[(ENV_POLL_INTERVAL_SECS, "fast")])).unwrap_err();
        assert!(err.to_string().contains(ENV_POLL_INTERVAL_SECS));
    }

    #[test]
    fn test_load_is_cached() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "connect_timeout_secs = 3\n").unwrap();

        let service = ConfigService::with_path(path.clone());
        let first = service.load().unwrap();
        assert_eq!(first.connect_timeout_secs, 3);

        fs::write(&path, "connect_timeout_secs = 30\n").unwrap();
        assert_eq!(service.load().unwrap().connect_timeout_secs, 3);
    }
}
