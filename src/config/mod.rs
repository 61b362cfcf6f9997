//! Configuration management for the control plane
//!
//! This module handles loading and validation of control-plane configuration.

use crate::utils::error::{ControlPlaneError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

fn default_check_delay_ms() -> u64 {
    300_000
}

fn default_check_period_ms() -> u64 {
    300_000
}

fn default_check_size() -> usize {
    256
}

fn default_controller_timeout_ms() -> u64 {
    240_000
}

fn default_public_bucket() -> String {
    "public".to_string()
}

fn default_review_bucket_prefix() -> String {
    "review-".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

/// Main configuration struct for the control plane
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Application lifecycle configuration
    #[serde(default)]
    pub applications: ApplicationsConfig,
    /// Storage bucket configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {:?}", path);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ControlPlaneError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ControlPlaneError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.applications
            .validate()
            .map_err(|e| ControlPlaneError::Config(format!("Applications config error: {}", e)))?;
        self.storage
            .validate()
            .map_err(|e| ControlPlaneError::Config(format!("Storage config error: {}", e)))?;
        Ok(())
    }
}

/// Application lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationsConfig {
    /// Deployment controller base URL
    pub controller_url: String,
    /// Controller round-trip timeout in milliseconds
    #[serde(default = "default_controller_timeout_ms")]
    pub controller_timeout_ms: u64,
    /// Delay before an in-flight deploy/undeploy is considered stuck, in milliseconds
    #[serde(default = "default_check_delay_ms")]
    pub check_delay_ms: u64,
    /// Reconciliation sweep period in milliseconds
    #[serde(default = "default_check_period_ms")]
    pub check_period_ms: u64,
    /// Maximum number of stuck entries handled per sweep pass
    #[serde(default = "default_check_size")]
    pub check_size: usize,
}

impl Default for ApplicationsConfig {
    fn default() -> Self {
        Self {
            controller_url: "http://localhost:8041".to_string(),
            controller_timeout_ms: default_controller_timeout_ms(),
            check_delay_ms: default_check_delay_ms(),
            check_period_ms: default_check_period_ms(),
            check_size: default_check_size(),
        }
    }
}

impl ApplicationsConfig {
    /// Validate application lifecycle settings
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.controller_url.is_empty() {
            return Err("Controller URL cannot be empty".to_string());
        }
        if self.controller_timeout_ms == 0 {
            return Err("Controller timeout cannot be 0".to_string());
        }
        if self.check_period_ms == 0 {
            return Err("Check period cannot be 0".to_string());
        }
        if self.check_size == 0 {
            return Err("Check size cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Storage bucket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Name of the shared public bucket
    #[serde(default = "default_public_bucket")]
    pub public_bucket: String,
    /// Prefix identifying per-publication review buckets
    #[serde(default = "default_review_bucket_prefix")]
    pub review_bucket_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            public_bucket: default_public_bucket(),
            review_bucket_prefix: default_review_bucket_prefix(),
        }
    }
}

impl StorageConfig {
    /// Validate storage bucket settings
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.public_bucket.is_empty() {
            return Err("Public bucket name cannot be empty".to_string());
        }
        if self.review_bucket_prefix.is_empty() {
            return Err("Review bucket prefix cannot be empty".to_string());
        }
        Ok(())
    }

    /// True when source and target folders coincide (no copy step on deploy)
    pub fn is_public_or_review(&self, bucket: &str) -> bool {
        bucket == self.public_bucket || bucket.starts_with(&self.review_bucket_prefix)
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Whether Redis is enabled (false falls back to no-op mode)
    #[serde(default)]
    pub enabled: bool,
    /// Lock lease TTL in milliseconds
    #[serde(default = "default_check_delay_ms")]
    pub lock_ttl_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            enabled: false,
            lock_ttl_ms: default_check_delay_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.applications.check_size, 256);
        assert_eq!(config.storage.public_bucket, "public");
    }

    #[test]
    fn rejects_zero_check_size() {
        let mut config = Config::default();
        config.applications.check_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn public_and_review_buckets_are_detected() {
        let storage = StorageConfig::default();
        assert!(storage.is_public_or_review("public"));
        assert!(storage.is_public_or_review("review-4f2a"));
        assert!(!storage.is_public_or_review("4f2a"));
    }

    #[test]
    fn parses_partial_yaml() {
        let yaml = "applications:\n  controller_url: http://controller:8041\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.applications.controller_url, "http://controller:8041");
        assert_eq!(config.applications.check_delay_ms, 300_000);
        assert!(!config.redis.enabled);
    }
}
