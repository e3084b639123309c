//! Configuration management

use anyhow::{Context, Result};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable overriding the configuration file location
pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";

/// Prefix for per-key environment overrides, e.g. `DB4S_STATS_PG__PASSWORD`
pub const ENV_PREFIX: &str = "DB4S_STATS";

const DEFAULT_CONFIG_DIR: &str = ".db4s";
const DEFAULT_CONFIG_NAME: &str = "db4s_country_stats_generator.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub pg: PgConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection parameters for the PostgreSQL download log
#[derive(Clone, Deserialize)]
pub struct PgConfig {
    pub database: String,
    pub num_connections: u32,
    pub port: u16,
    pub password: String,
    pub server: String,
    /// TLS without certificate verification
    pub ssl: bool,
    pub username: String,
}

// Keep the password out of logs
impl std::fmt::Debug for PgConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConfig")
            .field("database", &self.database)
            .field("num_connections", &self.num_connections)
            .field("port", &self.port)
            .field("server", &self.server)
            .field("ssl", &self.ssl)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// SQLite file holding the active_users table (default: db4s_country_stats.sqlite)
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("db4s_country_stats.sqlite")
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit per-day progress lines
    #[serde(default = "default_debug")]
    pub debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            debug: default_debug(),
        }
    }
}

fn default_debug() -> bool {
    true
}

impl Config {
    /// Load from `CONFIG_FILE`, or the default file under the user's home directory
    pub fn load() -> Result<Self> {
        let path = config_path(
            std::env::var_os(CONFIG_FILE_ENV),
            std::env::var_os("HOME").map(PathBuf::from),
        )?;
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = config::File::from(path).format(config::FileFormat::Toml);
        Self::build(source)
            .with_context(|| format!("failed to load configuration from {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Self::build(config::File::from_str(contents, config::FileFormat::Toml))
    }

    fn build<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder()
            .add_source(source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.pg.server.is_empty() {
            anyhow::bail!("PostgreSQL server cannot be empty");
        }
        if self.pg.port == 0 {
            anyhow::bail!("Invalid PostgreSQL port: 0 is not allowed");
        }
        if self.pg.database.is_empty() {
            anyhow::bail!("PostgreSQL database name cannot be empty");
        }
        if self.pg.num_connections == 0 {
            anyhow::bail!("num_connections must be at least 1");
        }
        if self.output.path.as_os_str().is_empty() {
            anyhow::bail!("Output path cannot be empty");
        }

        Ok(())
    }
}

/// An empty override counts as unset.
fn config_path(override_path: Option<OsString>, home: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = override_path.filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    let home = home
        .filter(|h| !h.as_os_str().is_empty())
        .context("User home directory couldn't be determined")?;
    Ok(home.join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_NAME))
}
