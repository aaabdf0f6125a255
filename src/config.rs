use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "marginalia")]
#[command(about = "Inspects and maintains the marginalia sync ledger", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show synced record counts per source and item
    Status,
    /// List the synced records of one item
    Records {
        #[arg(long)]
        source: String,
        #[arg(long)]
        item: String,
    },
    /// Forget synced records so the next sync rescans the remote page
    Clear {
        #[arg(long)]
        source: String,
        #[arg(long)]
        item: Option<String>,
    },
    /// Forget the cached remote container of a source
    Unbind {
        #[arg(long)]
        source: String,
    },
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".marginalia")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    #[serde(default = "default_database")]
    database: String,
    #[serde(default)]
    pub turso_url: Option<String>,
    #[serde(default)]
    pub turso_auth_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
}

impl Default for App {
    fn default() -> Self {
        Self {
            database: default_database(),
            turso_url: None,
            turso_auth_token: None,
            sync_interval_seconds: default_sync_interval(),
        }
    }
}

fn default_database() -> String {
    "marginalia.db".to_string()
}

fn default_sync_interval() -> u64 {
    60
}

impl App {
    pub fn get_db(&self) -> &str {
        &self.database
    }
}

/// Credentials and target of the remote store. Both are checked at sync time,
/// not at load time, so the ledger tooling works without them.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Remote {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub parent_page_id: Option<String>,
}

impl Remote {
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.trim().is_empty())
    }

    pub fn parent_page_id(&self) -> Option<&str> {
        self.parent_page_id.as_deref().filter(|p| !p.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SyncSettings {
    /// Upper bound of blocks per append call.
    #[serde(default = "default_append_batch_size")]
    pub append_batch_size: usize,
    #[serde(default = "default_per_item_page_size")]
    pub per_item_page_size: usize,
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            append_batch_size: default_append_batch_size(),
            per_item_page_size: default_per_item_page_size(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

fn default_append_batch_size() -> usize {
    50
}

fn default_per_item_page_size() -> usize {
    100
}

fn default_batch_concurrency() -> usize {
    3
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub remote: Remote,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let cfg = Config::load_config(path)?;
        Ok(cfg)
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path).with_context(|| format!("failed to read config {path}"))?;
        Config::from_yaml(&yaml_str)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Config> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            if let Some(end) = result[actual_start..].find('}') {
                let var_name = &result[actual_start + 2..actual_start + end];

                // Handle default values like ${VAR:-default}
                let env_value = if let Some(default_start) = var_name.find(":-") {
                    let actual_var = &var_name[..default_start];
                    let default_val = &var_name[default_start + 2..];
                    env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
                } else {
                    env::var(var_name).unwrap_or_else(|_| {
                        tracing::warn!("environment variable '{}' not found", var_name);
                        String::new()
                    })
                };

                result.replace_range(actual_start..actual_start + end + 1, &env_value);
                offset = actual_start + env_value.len();
            } else {
                break;
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let cfg = Config::from_yaml("remote:\n  token: secret\n").unwrap();
        assert_eq!(cfg.app.get_db(), "marginalia.db");
        assert_eq!(cfg.remote.token(), Some("secret"));
        assert_eq!(cfg.remote.parent_page_id(), None);
        assert_eq!(cfg.sync.append_batch_size, 50);
        assert_eq!(cfg.sync.batch_concurrency, 3);
    }

    #[test]
    fn test_env_default_substitution() {
        let yaml = "remote:\n  parent_page_id: ${MARGINALIA_TEST_SURELY_UNSET:-page-42}\nsync:\n  batch_concurrency: 5\n";
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.remote.parent_page_id(), Some("page-42"));
        assert_eq!(cfg.sync.batch_concurrency, 5);
    }

    #[test]
    fn test_blank_token_counts_as_missing() {
        let cfg = Config::from_yaml("remote:\n  token: ${MARGINALIA_TEST_SURELY_UNSET}\n").unwrap();
        assert_eq!(cfg.remote.token(), None);
    }
}
