//! CLI configuration and data directory resolution
//!
//! Data dir precedence: `--data-dir` flag > `ETSY_SHOPKIT_DIR` env var >
//! `~/.etsy-shopkit`. The directory holds the encrypted credential store
//! and an optional `config.toml` for non-secret settings. The API key and
//! tokens never live in the TOML; they go through the credential store.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use etsy_auth::constants::DEFAULT_REDIRECT_URI;

pub const DATA_DIR_ENV: &str = "ETSY_SHOPKIT_DIR";
pub const CONFIG_FILE: &str = "config.toml";

/// Non-secret settings, loaded from `config.toml` when present.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

impl Config {
    /// Load `config.toml` from the data dir, or defaults when absent.
    pub fn load(data_dir: &Path) -> common::Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        let mut config: Config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            toml::from_str(&contents)?
        } else {
            Config {
                redirect_uri: default_redirect_uri(),
                data_dir: PathBuf::new(),
            }
        };

        if !config.redirect_uri.starts_with("http://")
            && !config.redirect_uri.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "redirect_uri must start with http:// or https://, got: {}",
                config.redirect_uri
            )));
        }

        config.data_dir = data_dir.to_path_buf();
        Ok(config)
    }

    /// Resolve the data directory from the CLI flag, env var, or home dir.
    pub fn resolve_data_dir(cli_dir: Option<&str>) -> PathBuf {
        if let Some(dir) = cli_dir {
            return PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var(DATA_DIR_ENV)
            && !dir.is_empty()
        {
            return PathBuf::from(dir);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".etsy-shopkit")
    }
}
