//! Session configuration: pool settings plus source launch options.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::pool::PoolConfig;

/// Arguments used when the caller supplies none.
#[cfg(target_os = "linux")]
pub const DEFAULT_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
];

/// Arguments used when the caller supplies none.
#[cfg(not(target_os = "linux"))]
pub const DEFAULT_ARGS: &[&str] = &[];

/// Options handed to [`Launcher::launch`](crate::Launcher::launch).
///
/// `args` and `headless` are understood by the session; every other key is
/// kept in `extra` and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchOptions {
    /// Command-line arguments for the source process.
    pub args: Vec<String>,
    /// Run without a visible window.
    pub headless: bool,
    /// Launcher-specific options.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            headless: true,
            extra: Map::new(),
        }
    }
}

impl LaunchOptions {
    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set a launcher-specific option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Look up a launcher-specific option.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// The options actually used at launch: [`DEFAULT_ARGS`] fill in for an
    /// empty argument list.
    #[must_use]
    pub fn resolved(&self) -> Self {
        let mut options = self.clone();
        if options.args.is_empty() {
            options.args = DEFAULT_ARGS.iter().map(|arg| (*arg).to_string()).collect();
        }
        options
    }
}

/// Everything a [`Session`](crate::Session) needs besides its launcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Pool engine settings.
    pub pool: PoolConfig,
    /// Source launch options.
    pub launch: LaunchOptions,
}

impl SessionConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the document is malformed or the
    /// pool settings are invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::configuration(format!("invalid session config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pool settings.
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()
    }
}
