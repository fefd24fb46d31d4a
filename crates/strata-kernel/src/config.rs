//! Rhai-driven server configuration.
//!
//! Evaluates a `strata.rhai` script and reads top-level `let` bindings from
//! its scope. Every binding is optional; unknown bindings are ignored.
//!
//! ```rhai
//! let scheme = "mem";
//! let confirmation_timeout_secs = 30;
//! let copy_steps = 5;
//! let copy_step_delay_ms = 250;
//! let max_output_tokens = 500;
//! let temperature = 0.7;
//! let backup_location = "/backups/";
//! let seed = #{
//!     "/etc/": "",
//!     "/etc/config": "max_users=100",
//! };
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::NodePath;
use crate::tools::ToolSettings;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("strata.rhai parse error: {0}")]
    Parse(String),

    #[error("strata.rhai eval error: {0}")]
    Eval(String),

    /// A binding has the wrong type or an out-of-range value.
    #[error("invalid config value for `{key}`: {reason}")]
    Invalid { key: String, reason: String },

    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Longest accepted `confirmation_timeout_secs`: one day.
pub const MAX_CONFIRMATION_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// Address scheme, as in `mem://docs/readme.md`.
    pub scheme: String,
    pub confirmation_timeout_secs: u64,
    pub copy_steps: u32,
    pub copy_step_delay_ms: u64,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub backup_location: String,
    /// Initial store contents. Keys ending in `/` are directories.
    pub seed: BTreeMap<String, String>,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            scheme: "mem".to_string(),
            confirmation_timeout_secs: 60,
            copy_steps: 5,
            copy_step_delay_ms: 1000,
            max_output_tokens: 500,
            temperature: 0.7,
            backup_location: "/backups/".to_string(),
            seed: BTreeMap::new(),
        }
    }
}

impl StrataConfig {
    /// Check ranges and shapes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheme.is_empty()
            || !self
                .scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(ConfigError::invalid("scheme", format!("'{}' is not a URI scheme", self.scheme)));
        }
        if self.confirmation_timeout_secs > MAX_CONFIRMATION_TIMEOUT_SECS {
            return Err(ConfigError::invalid(
                "confirmation_timeout_secs",
                format!("must be at most {MAX_CONFIRMATION_TIMEOUT_SECS}"),
            ));
        }
        if self.copy_steps == 0 {
            return Err(ConfigError::invalid("copy_steps", "must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::invalid("temperature", "must be within 0.0..=2.0"));
        }
        NodePath::parse(&self.backup_location)
            .map_err(|e| ConfigError::invalid("backup_location", e.to_string()))?;
        for key in self.seed.keys() {
            NodePath::parse(key).map_err(|e| ConfigError::invalid("seed", e.to_string()))?;
        }
        Ok(())
    }

    /// Settings for the tool engine.
    pub fn tool_settings(&self) -> Result<ToolSettings, ConfigError> {
        let backup_location = NodePath::parse(&self.backup_location)
            .map_err(|e| ConfigError::invalid("backup_location", e.to_string()))?
            .as_dir();
        Ok(ToolSettings {
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            copy_steps: self.copy_steps,
            copy_step_delay: Duration::from_millis(self.copy_step_delay_ms),
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
            backup_location,
        })
    }
}

/// Parse a `strata.rhai` script into a `StrataConfig`.
pub fn load_config(script: &str) -> Result<StrataConfig, ConfigError> {
    let engine = rhai::Engine::new();
    let ast = engine
        .compile(script)
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut scope = rhai::Scope::new();
    engine
        .run_ast_with_scope(&mut scope, &ast)
        .map_err(|e| ConfigError::Eval(e.to_string()))?;

    let config = extract_config(&scope)?;
    config.validate()?;
    Ok(config)
}

/// Read and parse a config script from disk.
pub fn load_config_file(path: &Path) -> Result<StrataConfig, ConfigError> {
    let script = std::fs::read_to_string(path)?;
    load_config(&script)
}

fn get_string(scope: &rhai::Scope, key: &str) -> Result<Option<String>, ConfigError> {
    match scope.get(key) {
        None => Ok(None),
        Some(value) => value
            .clone()
            .into_string()
            .map(Some)
            .map_err(|ty| ConfigError::invalid(key, format!("expected string, got {ty}"))),
    }
}

fn get_unsigned(scope: &rhai::Scope, key: &str) -> Result<Option<u64>, ConfigError> {
    match scope.get(key) {
        None => Ok(None),
        Some(value) => {
            let n = value
                .as_int()
                .map_err(|ty| ConfigError::invalid(key, format!("expected integer, got {ty}")))?;
            u64::try_from(n)
                .map(Some)
                .map_err(|_| ConfigError::invalid(key, format!("{n} is negative")))
        }
    }
}

fn get_u32(scope: &rhai::Scope, key: &str) -> Result<Option<u32>, ConfigError> {
    match get_unsigned(scope, key)? {
        None => Ok(None),
        Some(n) => u32::try_from(n)
            .map(Some)
            .map_err(|_| ConfigError::invalid(key, format!("{n} is too large"))),
    }
}

fn get_float(scope: &rhai::Scope, key: &str) -> Result<Option<f64>, ConfigError> {
    match scope.get(key) {
        None => Ok(None),
        Some(value) => {
            if let Ok(f) = value.as_float() {
                Ok(Some(f))
            } else if let Ok(n) = value.as_int() {
                Ok(Some(n as f64))
            } else {
                Err(ConfigError::invalid(
                    key,
                    format!("expected number, got {}", value.type_name()),
                ))
            }
        }
    }
}

fn extract_config(scope: &rhai::Scope) -> Result<StrataConfig, ConfigError> {
    let mut config = StrataConfig::default();

    if let Some(scheme) = get_string(scope, "scheme")? {
        config.scheme = scheme;
    }
    if let Some(secs) = get_unsigned(scope, "confirmation_timeout_secs")? {
        config.confirmation_timeout_secs = secs;
    }
    if let Some(steps) = get_u32(scope, "copy_steps")? {
        config.copy_steps = steps;
    }
    if let Some(ms) = get_unsigned(scope, "copy_step_delay_ms")? {
        config.copy_step_delay_ms = ms;
    }
    if let Some(tokens) = get_u32(scope, "max_output_tokens")? {
        config.max_output_tokens = tokens;
    }
    if let Some(temperature) = get_float(scope, "temperature")? {
        config.temperature = temperature as f32;
    }
    if let Some(location) = get_string(scope, "backup_location")? {
        config.backup_location = location;
    }

    if let Some(value) = scope.get("seed") {
        let map = value
            .clone()
            .try_cast::<rhai::Map>()
            .ok_or_else(|| ConfigError::invalid("seed", "expected an object map"))?;
        for (path, content) in map {
            let content = content.into_string().map_err(|ty| {
                ConfigError::invalid("seed", format!("content of '{path}' is {ty}, not a string"))
            })?;
            config.seed.insert(path.to_string(), content);
        }
    }

    Ok(config)
}
