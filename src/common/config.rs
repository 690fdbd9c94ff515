//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{self, config_path};
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Message bus settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Test definition search paths
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// External commands usable by templates and `~xc:` comparisons
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// NATS bus settings
#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    /// Server address (nats://ip:port)
    #[serde(default = "default_address")]
    pub address: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Client name announced in CONNECT
    #[serde(default = "default_client_name")]
    pub name: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            timeout_ms: default_timeout_ms(),
            name: default_client_name(),
        }
    }
}

impl BusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_address() -> String {
    "nats://127.0.0.1:4222".to_string()
}
fn default_timeout_ms() -> u64 {
    1000
}
fn default_client_name() -> String {
    "natstest".to_string()
}

/// Test catalog settings
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Directories searched for `test_<name>.json`, highest priority first
    #[serde(default = "paths::default_test_dirs")]
    pub paths: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            paths: paths::default_test_dirs(),
        }
    }
}

/// Command allowlist settings
#[derive(Debug, Deserialize, Clone)]
pub struct CommandsConfig {
    /// Executable paths, matched exactly
    #[serde(default = "default_allowed_commands")]
    pub allowed: Vec<String>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            allowed: default_allowed_commands(),
        }
    }
}

fn default_allowed_commands() -> Vec<String> {
    vec!["/bin/cat".to_string(), "/bin/echo".to_string()]
}

/// Logging settings
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// Level applied to natstest when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `path`, or from the default config file
    ///
    /// Returns default configuration if no file exists. An explicit path
    /// that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(explicit) => Some(explicit.to_path_buf()),
            None => config_path().filter(|p| p.exists()),
        };

        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Put an extra test directory on top of the search list
    pub fn with_test_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(dir) = dir {
            self.catalog.paths.insert(0, dir.display().to_string());
        }
        self
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.bus.address.trim().is_empty() {
            return Err(Error::Config("bus address is empty".to_string()));
        }
        if self.bus.timeout_ms == 0 {
            return Err(Error::Config("bus timeout must be greater than zero".to_string()));
        }
        if self.catalog.paths.is_empty() {
            return Err(Error::Config("no test definition paths configured".to_string()));
        }
        Ok(())
    }

    /// Catalog search directories with `~/` expanded
    pub fn test_dirs(&self) -> Vec<PathBuf> {
        self.catalog.paths.iter().map(|p| paths::expand_home(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.bus.address, "nats://127.0.0.1:4222");
        assert_eq!(config.bus.timeout(), Duration::from_secs(1));
        assert_eq!(config.commands.allowed, vec!["/bin/cat", "/bin/echo"]);
        assert_eq!(config.catalog.paths.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
[bus]
timeout_ms = 250

[commands]
allowed = ["/usr/bin/jq"]
"#,
        )
        .unwrap();
        assert_eq!(config.bus.timeout_ms, 250);
        assert_eq!(config.bus.address, "nats://127.0.0.1:4222");
        assert_eq!(config.commands.allowed, vec!["/usr/bin/jq"]);
    }

    #[test]
    fn test_test_dir_goes_first() {
        let config = Config::default().with_test_dir(Some(PathBuf::from("/tmp/extra")));
        assert_eq!(config.catalog.paths[0], "/tmp/extra");
        assert_eq!(config.catalog.paths.len(), 6);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = Config::parse("[bus]\ntimeout_ms = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(Config::parse("[bus"), Err(Error::ConfigParse(_))));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/natstest.toml"))).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }
}
