/// Configuration management for the stack's .env file and compose descriptor
///
/// Handles generating, reading, writing, and validating Atlas Edge
/// configuration, plus pinning image tags in docker-compose.yml.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::{generate_hex_string, is_valid_hex};

/// Keys that must be present for the stack to boot.
const REQUIRED_KEYS: &[&str] = &["ATLAS_NODE_ID", "ATLAS_BUNDLE_VERSION"];

/// Keys holding generated 32-char hex secrets.
const SECRET_KEYS: &[&str] = &["ATLAS_GATEWAY_TOKEN", "ATLAS_METRICS_TOKEN", "TSDB_ADMIN_PASSWORD"];

#[derive(Debug, Clone)]
pub struct ConfigValue {
    pub key: String,
    pub value: String,
    pub comment: Option<String>,
}

pub struct EnvConfig {
    env_file: PathBuf,
    config: HashMap<String, ConfigValue>,
}

impl EnvConfig {
    /// Load configuration from an existing .env file
    pub fn load<P: AsRef<Path>>(env_file: P) -> Result<Self> {
        let env_file = env_file.as_ref().to_path_buf();

        if !env_file.exists() {
            return Err(anyhow!(".env file not found at {}", env_file.display()));
        }

        let content = fs::read_to_string(&env_file).context("Failed to read .env file")?;

        let mut config = HashMap::new();
        let mut current_comment = None;

        for line in content.lines() {
            let line = line.trim();

            if line.starts_with('#') {
                current_comment = Some(line.trim_start_matches('#').trim().to_string());
                continue;
            }

            if line.is_empty() {
                current_comment = None;
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_string();
                let value = value.trim().to_string();

                config.insert(
                    key.clone(),
                    ConfigValue {
                        key: key.clone(),
                        value,
                        comment: current_comment.take(),
                    },
                );
            }
        }

        Ok(Self { env_file, config })
    }

    /// Build a fresh configuration for a new install.
    ///
    /// Secrets are generated; nothing touches disk until [`Self::save`].
    pub fn generate<P: AsRef<Path>>(env_file: P, node_id: &str, bundle_version: &str) -> Self {
        let mut cfg = Self {
            env_file: env_file.as_ref().to_path_buf(),
            config: HashMap::new(),
        };

        cfg.set("ATLAS_NODE_ID", node_id);
        cfg.set("ATLAS_BUNDLE_VERSION", bundle_version);
        for key in SECRET_KEYS {
            cfg.set(*key, generate_hex_string(32));
        }

        cfg
    }

    /// Write the configuration out, preserving layout of an existing file.
    pub fn save(&self) -> Result<()> {
        let mut lines = Vec::new();
        let mut written: Vec<&str> = Vec::new();

        // Preserve order by reading the original file when one exists
        if self.env_file.exists() {
            let original = fs::read_to_string(&self.env_file)?;
            for line in original.lines() {
                let line_trimmed = line.trim();

                if line_trimmed.starts_with('#') || line_trimmed.is_empty() {
                    lines.push(line.to_string());
                } else if let Some((key, _)) = line_trimmed.split_once('=') {
                    let key = key.trim();
                    if let Some(value) = self.config.get(key) {
                        lines.push(format!("{}={}", key, value.value));
                        written.push(&value.key);
                    } else {
                        lines.push(line.to_string());
                    }
                }
            }
        } else {
            lines.push("# Atlas Edge configuration (generated)".to_string());
        }

        // Append keys the original file did not carry
        let mut remaining: Vec<&ConfigValue> = self
            .config
            .values()
            .filter(|v| !written.contains(&v.key.as_str()))
            .collect();
        remaining.sort_by(|a, b| a.key.cmp(&b.key));
        for value in remaining {
            lines.push(format!("{}={}", value.key, value.value));
        }

        fs::write(&self.env_file, lines.join("\n") + "\n").context("Failed to write .env file")?;

        Ok(())
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(|v| v.value.as_str())
    }

    /// Set a configuration value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();

        if let Some(existing) = self.config.get_mut(&key) {
            existing.value = value;
        } else {
            self.config.insert(
                key.clone(),
                ConfigValue {
                    key: key.clone(),
                    value,
                    comment: None,
                },
            );
        }
    }

    /// Fill in any required or secret key that is missing, without touching
    /// values that already exist. Returns the keys that were added.
    pub fn fill_missing(&mut self, node_id: &str, bundle_version: &str) -> Vec<String> {
        let mut added = Vec::new();

        let defaults: Vec<(&str, String)> = vec![
            ("ATLAS_NODE_ID", node_id.to_string()),
            ("ATLAS_BUNDLE_VERSION", bundle_version.to_string()),
        ];
        for (key, value) in defaults {
            if self.get(key).is_none() {
                self.set(key, value);
                added.push(key.to_string());
            }
        }

        for key in SECRET_KEYS {
            if self.get(key).is_none() {
                self.set(*key, generate_hex_string(32));
                added.push(key.to_string());
            }
        }

        // The version is always pinned to the bundle being installed
        self.set("ATLAS_BUNDLE_VERSION", bundle_version);

        added
    }

    /// Validate configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for key in REQUIRED_KEYS {
            if self.get(key).is_none() {
                errors.push(format!("{} is not set", key));
            }
        }

        for key in SECRET_KEYS {
            match self.get(key) {
                None => errors.push(format!("{} is not set", key)),
                Some(v) if !is_valid_hex(v) || v.len() != 32 => {
                    errors.push(format!("{} must be 32 hex characters", key));
                }
                Some(_) => {}
            }
        }

        errors
    }

    /// Get all configuration keys
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.config.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn path(&self) -> &Path {
        &self.env_file
    }
}

/// Pin every Atlas image tag in a compose file to the given bundle version.
///
/// Walks `services.*.image` and rewrites the tag of images in the
/// `atlas-edge` namespace. Returns how many images were rewritten.
pub fn pin_compose_images(compose_file: &Path, version: &str) -> Result<usize> {
    use serde_yaml::Value;

    let content = fs::read_to_string(compose_file)
        .with_context(|| format!("Failed to read {}", compose_file.display()))?;

    let mut yaml: Value =
        serde_yaml::from_str(&content).context("Failed to parse docker-compose.yml")?;

    let mut patched = 0;

    if let Some(services) = yaml.get_mut("services").and_then(|s| s.as_mapping_mut()) {
        for (_, service) in services.iter_mut() {
            let Some(image) = service.get_mut("image") else {
                continue;
            };
            let Some(current) = image.as_str() else {
                continue;
            };

            let repo = current.split(':').next().unwrap_or(current);
            if !repo.contains("atlas-edge/") {
                continue;
            }

            let pinned = format!("{}:v{}", repo, version);
            if pinned != current {
                *image = Value::String(pinned);
                patched += 1;
            }
        }
    }

    if patched > 0 {
        let out = serde_yaml::to_string(&yaml).context("Failed to serialize compose file")?;
        fs::write(compose_file, out)
            .with_context(|| format!("Failed to write {}", compose_file.display()))?;
    }

    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_load_and_get() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# Test configuration").unwrap();
        writeln!(file, "ATLAS_NODE_ID=edge-01").unwrap();
        writeln!(file, "ATLAS_BUNDLE_VERSION=1.7.3").unwrap();

        let config = EnvConfig::load(file.path()).unwrap();

        assert_eq!(config.get("ATLAS_NODE_ID"), Some("edge-01"));
        assert_eq!(config.get("ATLAS_BUNDLE_VERSION"), Some("1.7.3"));
    }

    #[test]
    fn test_generate_produces_valid_config() {
        let dir = TempDir::new().unwrap();
        let config = EnvConfig::generate(dir.path().join(".env"), "edge-01", "1.7.3");

        assert!(config.validate().is_empty());
        let token = config.get("ATLAS_GATEWAY_TOKEN").unwrap();
        assert_eq!(token.len(), 32);
        assert!(is_valid_hex(token));
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        let config = EnvConfig::generate(&path, "edge-01", "1.7.3");
        config.save().unwrap();

        let reloaded = EnvConfig::load(&path).unwrap();
        assert_eq!(reloaded.get("ATLAS_NODE_ID"), Some("edge-01"));
        assert!(reloaded.validate().is_empty());
    }

    #[test]
    fn test_fill_missing_keeps_existing_secrets() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ATLAS_NODE_ID=edge-01").unwrap();
        writeln!(file, "ATLAS_GATEWAY_TOKEN=deadbeefdeadbeefdeadbeefdeadbeef").unwrap();

        let mut config = EnvConfig::load(file.path()).unwrap();
        let added = config.fill_missing("ignored", "2.0.0");

        assert_eq!(
            config.get("ATLAS_GATEWAY_TOKEN"),
            Some("deadbeefdeadbeefdeadbeefdeadbeef")
        );
        assert_eq!(config.get("ATLAS_NODE_ID"), Some("edge-01"));
        assert_eq!(config.get("ATLAS_BUNDLE_VERSION"), Some("2.0.0"));
        assert!(added.contains(&"ATLAS_BUNDLE_VERSION".to_string()));
        assert!(!added.contains(&"ATLAS_GATEWAY_TOKEN".to_string()));
    }

    #[test]
    fn test_validate_flags_bad_secret() {
        let dir = TempDir::new().unwrap();
        let mut config = EnvConfig::generate(dir.path().join(".env"), "edge-01", "1.7.3");
        config.set("ATLAS_METRICS_TOKEN", "not-hex");

        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("ATLAS_METRICS_TOKEN")));
    }

    #[test]
    fn test_pin_compose_images() {
        let dir = TempDir::new().unwrap();
        let compose = dir.path().join("docker-compose.yml");
        fs::write(
            &compose,
            "services:\n  gateway:\n    image: ghcr.io/atlas-edge/gateway:latest\n  timeseries-db:\n    image: influxdb:2.7\n",
        )
        .unwrap();

        let patched = pin_compose_images(&compose, "1.7.3").unwrap();
        assert_eq!(patched, 1);

        let content = fs::read_to_string(&compose).unwrap();
        assert!(content.contains("ghcr.io/atlas-edge/gateway:v1.7.3"));
        // third-party images stay untouched
        assert!(content.contains("influxdb:2.7"));
    }
}
