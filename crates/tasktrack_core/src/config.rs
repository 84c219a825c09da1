//! Connection parameters sourced from the process environment.
//!
//! # Responsibility
//! - Read `DB_HOST`, `DB_PORT`, `DB_USERNAME`, `DB_PASSWORD`, `DB_NAME`.
//! - Load a local `.env` file into the environment once per process.
//!
//! # Invariants
//! - Values are opaque strings; only the driver validates them.
//! - The password never appears in `Debug` output or log lines.

use log::info;
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::PathBuf;

pub const DB_HOST_ENV: &str = "DB_HOST";
pub const DB_PORT_ENV: &str = "DB_PORT";
pub const DB_USERNAME_ENV: &str = "DB_USERNAME";
pub const DB_PASSWORD_ENV: &str = "DB_PASSWORD";
pub const DB_NAME_ENV: &str = "DB_NAME";

static DOTENV_PATH: OnceCell<Option<PathBuf>> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingVar(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingVar(name) => {
                write!(f, "environment variable `{name}` is not set or not valid UTF-8")
            }
        }
    }
}

impl Error for ConfigError {}

/// Loads `.env` from the current directory (or a parent) into the process
/// environment. Only the first call touches the file system.
///
/// Returns the loaded file path, or `None` when no file was found.
/// Variables already present in the environment are never overridden.
pub fn load_dotenv() -> Option<PathBuf> {
    DOTENV_PATH
        .get_or_init(|| {
            let loaded = dotenvy::dotenv().ok();
            if let Some(path) = &loaded {
                info!(
                    "event=config_load module=config status=ok source=dotenv path={}",
                    path.display()
                );
            }
            loaded
        })
        .clone()
}

/// Parameters used by `PgBackend` to establish connections.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl ConnectionParams {
    /// Reads all parameters from the environment after loading `.env`.
    ///
    /// # Errors
    /// - Returns `ConfigError::MissingVar` naming the first absent variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds parameters from an arbitrary variable source.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&'static str) -> Option<String>,
    {
        let mut require = |name: &'static str| lookup(name).ok_or(ConfigError::MissingVar(name));

        Ok(Self {
            host: require(DB_HOST_ENV)?,
            port: require(DB_PORT_ENV)?,
            username: require(DB_USERNAME_ENV)?,
            password: require(DB_PASSWORD_ENV)?,
            database: require(DB_NAME_ENV)?,
        })
    }

    /// Renders a libpq-style `key=value` connection string.
    pub fn to_pg_config(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            quote_pg_value(&self.host),
            quote_pg_value(&self.port),
            quote_pg_value(&self.username),
            quote_pg_value(&self.password),
            quote_pg_value(&self.database),
        )
    }
}

impl Debug for ConnectionParams {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

fn quote_pg_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('\'');
    quoted
}
