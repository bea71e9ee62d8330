//! JSON Configuration Management
//!
//! Handles reading and writing the application configuration file and
//! resolving provider credentials from the environment.

use std::fs;
use std::path::{Path, PathBuf};

use query_cascade_llm::ProviderConfig;
use tracing::{debug, warn};

use crate::models::settings::AppConfig;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{config_path, ensure_app_dir};

/// Configuration service for managing app settings
#[derive(Debug)]
pub struct ConfigService {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigService {
    /// Load ~/.query-cascade/config.json, writing defaults on first run
    pub fn new() -> AppResult<Self> {
        ensure_app_dir()?;

        let config_path = config_path()?;
        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            let default_config = AppConfig::default();
            Self::save_to_file(&config_path, &default_config)?;
            default_config
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load an explicit config file. A missing file yields defaults and is
    /// not created.
    pub fn from_path(path: impl Into<PathBuf>) -> AppResult<Self> {
        let config_path = path.into();
        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            debug!("Config file {} not found, using defaults", config_path.display());
            AppConfig::default()
        };
        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> AppResult<AppConfig> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate().map_err(AppError::invalid_config)?;
        Ok(config)
    }

    /// Save configuration to a file with pretty formatting
    fn save_to_file(path: &Path, config: &AppConfig) -> AppResult<()> {
        config.validate().map_err(AppError::invalid_config)?;
        let content = serde_json::to_string_pretty(config)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Get a clone of the current configuration
    pub fn get_config_clone(&self) -> AppConfig {
        self.config.clone()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> AppResult<()> {
        Self::save_to_file(&self.config_path, &self.config)
    }

    /// Reload configuration from disk
    pub fn reload(&mut self) -> AppResult<()> {
        self.config = Self::load_from_file(&self.config_path)?;
        Ok(())
    }

    /// Reset configuration to defaults
    pub fn reset(&mut self) -> AppResult<()> {
        self.config = AppConfig::default();
        self.save()?;
        Ok(())
    }

    /// Provider chain with credentials from `api_key_env` appended to the
    /// inline `api_keys`. An env var may hold several comma-separated keys.
    pub fn resolved_providers(&self) -> Vec<ProviderConfig> {
        resolve_provider_keys(&self.config.providers, |name| std::env::var(name).ok())
    }
}

/// Append env-sourced keys to each provider, using `lookup` to read variables.
pub fn resolve_provider_keys<F>(providers: &[ProviderConfig], lookup: F) -> Vec<ProviderConfig>
where
    F: Fn(&str) -> Option<String>,
{
    providers
        .iter()
        .map(|provider| {
            let mut resolved = provider.clone();
            for var in &provider.api_key_env {
                match lookup(var) {
                    Some(value) => {
                        for key in value.split(',').map(str::trim).filter(|k| !k.is_empty()) {
                            if !resolved.api_keys.iter().any(|existing| existing == key) {
                                resolved.api_keys.push(key.to_string());
                            }
                        }
                    }
                    None => warn!(
                        "Environment variable {} for provider {} is not set",
                        var,
                        provider.label()
                    ),
                }
            }
            if resolved.provider.requires_api_key() && resolved.api_keys.is_empty() {
                warn!("Provider {} has no API keys configured", resolved.label());
            }
            resolved
        })
        .collect()
}
