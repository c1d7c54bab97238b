//! Layered configuration loading.

use std::env;
use std::fs;
use std::path::Path;

use formwork_telemetry::LogFormat;

use crate::{ConfigError, FormworkConfig};

/// Default environment prefix.
pub const ENV_PREFIX: &str = "FORMWORK";

/// Loads [`FormworkConfig`] in layers, later layers winning:
///
/// 1. built-in defaults
/// 2. a TOML or JSON file
/// 3. `PREFIX__SECTION__KEY` environment variables (optionally seeded from `.env`)
///
/// A file replaces the defaults wholesale; sections it omits keep their
/// default values because every section is `#[serde(default)]`.
///
/// ```no_run
/// use formwork_config::ConfigLoader;
///
/// # fn main() -> Result<(), formwork_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("formwork.toml")?
///     .with_dotenv()
///     .with_env_prefix("FORMWORK")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: FormworkConfig,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Starts from [`FormworkConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from [`FormworkConfig::development`].
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = FormworkConfig::development();
        self
    }

    /// Replaces the current layer with the contents of `path`.
    ///
    /// The format follows the extension (`.toml` or `.json`).
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, unreadable, malformed, or has unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        self.config = parse(&content, format)?;
        Ok(self)
    }

    /// Like [`with_file`](Self::with_file) but a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be used.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Replaces the current layer with `content` in the named format.
    ///
    /// # Errors
    ///
    /// Fails on an unsupported format or malformed content.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = parse(content, format)?;
        Ok(self)
    }

    /// Seeds the process environment from a `.env` file, if there is one.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        let _ = dotenvy::dotenv();
        self
    }

    /// Enables `PREFIX__SECTION__KEY` overrides.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Fails on an unparseable override or a validation error.
    pub fn load(mut self) -> Result<FormworkConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: Vec<(String, String)> = env::vars()
                .filter(|(key, _)| key.starts_with(&prefix))
                .collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the current layer without overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> FormworkConfig {
        self.config
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(path) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            return Ok(());
        };
        let parts: Vec<&str> = path.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["SERVER", "HTTP_ADDR"] => config.server.http_addr = value.to_string(),
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.server.shutdown_timeout_secs = parse_int(key, value)?;
            }
            ["SERVER", "MAX_CONNECTIONS"] => config.server.max_connections = parse_int(key, value)?,
            ["SERVER", "REQUEST_TIMEOUT_MS"] => {
                config.server.request_timeout_ms = parse_int(key, value)?;
            }

            ["PIPELINE", "ENABLED"] => config.pipeline.enabled = parse_flag(key, value)?,
            ["PIPELINE", "BINDINGS", name] => {
                let name = name.to_lowercase();
                if value.is_empty() {
                    config.pipeline.bindings.shift_remove(&name);
                } else {
                    config.pipeline.bindings.insert(name, value.to_string());
                }
            }

            ["ASSERTION", "SHARED_SECRET"] => config.assertion.shared_secret = value.to_string(),
            ["ASSERTION", "TIMESTAMP_SKEW_SECS"] => {
                config.assertion.timestamp_skew_secs = parse_int(key, value)?;
            }

            ["LOGGING", "ENABLED"] => config.logging.enabled = parse_flag(key, value)?,
            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    "compact" => LogFormat::Compact,
                    _ => {
                        return Err(ConfigError::env_parse(
                            key,
                            "expected 'json', 'pretty' or 'compact'",
                        ))
                    }
                };
            }

            ["METRICS", "ENABLED"] => config.metrics.enabled = parse_flag(key, value)?,
            ["METRICS", "ADDR"] => config.metrics.addr = value.to_string(),

            _ => {}
        }

        Ok(())
    }
}

fn parse(content: &str, format: &str) -> Result<FormworkConfig, ConfigError> {
    match format.to_lowercase().as_str() {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_parse(key, "expected integer"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse(key, "expected boolean"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
