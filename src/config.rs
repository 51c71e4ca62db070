//! Account and run configuration
//!
//! Configuration comes from a TOML file:
//!
//! ```toml
//! chunk_size = 200
//!
//! [accounts.default]
//! host = "imap.gmail.com"
//! username = "me@gmail.com"
//! password = "app-password"
//! ```
//!
//! The file is looked up at the explicit path, then `./gmailfilters.toml`,
//! then `<config dir>/gmailfilters/config.toml`. Without a file the
//! `default` account is read from the environment.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Messages processed per request unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 200;

/// Name of the account used when none is requested.
pub const DEFAULT_ACCOUNT: &str = "default";

const LOCAL_CONFIG: &str = "gmailfilters.toml";

/// How the connection to the IMAP server is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte (port 993).
    Tls,
    /// Plain connection upgraded with STARTTLS.
    StartTls,
    /// No encryption.
    Plain,
}

/// IMAP connection settings for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub ssl: bool,
    #[serde(default)]
    pub starttls: bool,
    /// Skip certificate verification (local proxies with self-signed certs).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

const fn default_true() -> bool {
    true
}

const fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl AccountConfig {
    #[must_use]
    pub const fn security(&self) -> Security {
        if self.ssl {
            Security::Tls
        } else if self.starttls {
            Security::StartTls
        } else {
            Security::Plain
        }
    }

    /// Configured port, or the IMAP default for the security mode.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.security() {
            Security::Tls => 993,
            Security::StartTls | Security::Plain => 143,
        })
    }

    /// Load the account from environment variables.
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional:
    /// - `IMAP_HOST` (default: `imap.gmail.com`)
    /// - `IMAP_PORT` (default: depends on security mode)
    /// - `IMAP_SSL` (default: `true`)
    /// - `IMAP_STARTTLS` (default: `false`)
    /// - `IMAP_ACCEPT_INVALID_CERTS` (default: `false`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let port = match env::var("IMAP_PORT") {
            Ok(p) => Some(
                p.parse()
                    .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            host: env::var("IMAP_HOST").unwrap_or_else(|_| "imap.gmail.com".to_string()),
            port,
            username: env::var("IMAP_USERNAME")
                .map_err(|_| Error::Config("IMAP_USERNAME not set".into()))?,
            password: env::var("IMAP_PASSWORD")
                .map_err(|_| Error::Config("IMAP_PASSWORD not set".into()))?,
            ssl: env_flag("IMAP_SSL")?.unwrap_or(true),
            starttls: env_flag("IMAP_STARTTLS")?.unwrap_or(false),
            accept_invalid_certs: env_flag("IMAP_ACCEPT_INVALID_CERTS")?.unwrap_or(false),
        })
    }
}

fn env_flag(name: &str) -> Result<Option<bool>> {
    let Ok(raw) = env::var(name) else {
        return Ok(None);
    };
    parse_bool(&raw)
        .map(Some)
        .ok_or_else(|| Error::Config(format!("Invalid {name}: {raw}")))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// The complete configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountConfig>,
    /// File the configuration was read from.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            accounts: BTreeMap::new(),
            source: None,
        }
    }
}

impl Config {
    /// Discover and load the configuration.
    ///
    /// An explicit path must exist. Otherwise the first existing file
    /// of [`Config::search_paths`] is used, falling back to
    /// [`AccountConfig::from_env`] as the `default` account.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no usable configuration is found
    /// or a file cannot be parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        for path in Self::search_paths() {
            debug!("looking for config in {}", path.display());
            if path.is_file() {
                return Self::from_file(&path);
            }
        }

        debug!("no configuration file found, using environment");
        let account = AccountConfig::from_env()?;
        let mut config = Self::default();
        config.accounts.insert(DEFAULT_ACCOUNT.to_string(), account);
        Ok(config)
    }

    /// Candidate configuration files, in lookup order.
    #[must_use]
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("gmailfilters").join("config.toml"));
        }
        paths
    }

    /// Read a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("reading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let mut config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not valid configuration.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Look up an account by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no such account exists.
    pub fn account(&self, name: &str) -> Result<&AccountConfig> {
        self.accounts
            .get(name)
            .ok_or_else(|| Error::Config(format!("Unable to find account named \"{name}\"")))
    }

    /// A copy safe to print: passwords replaced.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for account in config.accounts.values_mut() {
            account.password = "********".to_string();
        }
        config
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialisation fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}
