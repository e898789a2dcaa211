//! Session configuration for Mintrules.
//!
//! Loads the values to preload into a session from `mintrules.toml` (or the
//! file named by `MINTRULES_CONFIG`).  Validates every binding before any of
//! them is written.
//!
//! ```toml
//! [[bindings]]
//! name = "threshold"
//! value = 50
//! type = "int"
//!
//! [[bindings]]
//! value = "anonymous"
//! ```

use mintrules_core::{DefaultSession, Primitive, Session, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "MINTRULES_CONFIG";

/// Config file looked up in the working directory when the env var is unset.
pub const DEFAULT_CONFIG_FILE: &str = "mintrules.toml";

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Values stored into every new session, in order.
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

/// One preloaded value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Key to store the value under.  Without one the value is keyed by
    /// its type name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub value: ScalarValue,

    /// Primitive kind to store the value as.  Inferred from the TOML type
    /// when omitted.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<Primitive>,
}

/// A scalar as written in TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Integer(n) => write!(f, "{n}"),
            ScalarValue::Float(x) => write!(f, "{x}"),
            ScalarValue::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl BindingConfig {
    /// Convert to a session value.
    pub fn to_value(&self) -> Result<Value, String> {
        if let ScalarValue::Float(x) = self.value
            && !x.is_finite()
        {
            return Err(format!("{} is not a finite number", self.value));
        }

        let Some(kind) = self.kind else {
            return Ok(match &self.value {
                ScalarValue::Bool(b) => Value::new(*b),
                ScalarValue::Integer(n) => Value::new(*n),
                ScalarValue::Float(x) => Value::new(*x),
                ScalarValue::String(s) => Value::new(s.clone()),
            });
        };

        let out_of_range = || format!("{} is out of range for {kind}", self.value);
        let value = match (kind, &self.value) {
            (Primitive::Boolean, ScalarValue::Bool(b)) => Value::new(*b),
            (Primitive::Byte, ScalarValue::Integer(n)) => {
                Value::new(i8::try_from(*n).map_err(|_| out_of_range())?)
            }
            (Primitive::Short, ScalarValue::Integer(n)) => {
                Value::new(i16::try_from(*n).map_err(|_| out_of_range())?)
            }
            (Primitive::Int, ScalarValue::Integer(n)) => {
                Value::new(i32::try_from(*n).map_err(|_| out_of_range())?)
            }
            (Primitive::Long, ScalarValue::Integer(n)) => Value::new(*n),
            (Primitive::Float, ScalarValue::Integer(n)) => Value::new(*n as f32),
            (Primitive::Float, ScalarValue::Float(x)) => {
                let narrowed = *x as f32;
                if !narrowed.is_finite() {
                    return Err(out_of_range());
                }
                Value::new(narrowed)
            }
            (Primitive::Double, ScalarValue::Integer(n)) => Value::new(*n as f64),
            (Primitive::Double, ScalarValue::Float(x)) => Value::new(*x),
            (Primitive::Char, ScalarValue::String(s)) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Value::new(c),
                    _ => return Err(format!("{} is not a single character", self.value)),
                }
            }
            (kind, value) => return Err(format!("{value} cannot be stored as {kind}")),
        };
        Ok(value)
    }

    fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) => format!("binding '{name}'"),
            None => format!("binding #{index}"),
        }
    }
}

impl SessionConfig {
    /// Load configuration from `MINTRULES_CONFIG`, falling back to
    /// `./mintrules.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    /// Load configuration from a specific file path.  A missing file gives
    /// the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.prepare().map(|_| ())
    }

    /// Store every binding into `session`.  Nothing is written if any
    /// binding is invalid.  Returns the number of bindings written.
    pub fn seed<S: Session + ?Sized>(&self, session: &S) -> Result<usize, ConfigError> {
        let prepared = self.prepare()?;
        let count = prepared.len();
        for (name, value) in prepared {
            tracing::debug!(
                key = name.unwrap_or("<type>"),
                value_type = value.type_name(),
                "Seeding binding"
            );
            match name {
                Some(name) => session.put_named(name, value)?,
                None => session.put(value)?,
            }
        }
        Ok(count)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    fn prepare(&self) -> Result<Vec<(Option<&str>, Value)>, ConfigError> {
        self.bindings
            .iter()
            .enumerate()
            .map(|(index, binding)| {
                if binding.name.as_deref() == Some("") {
                    return Err(ConfigError::ValidationError(format!(
                        "{}: name cannot be empty",
                        binding.label(index)
                    )));
                }
                if binding.name.as_deref() == Some(DefaultSession::self_key()) {
                    return Err(ConfigError::ValidationError(format!(
                        "{}: name is reserved for the session itself",
                        binding.label(index)
                    )));
                }
                let value = binding.to_value().map_err(|reason| {
                    ConfigError::ValidationError(format!("{}: {reason}", binding.label(index)))
                })?;
                Ok((binding.name.as_deref(), value))
            })
            .collect()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Session rejected binding: {0}")]
    Session(#[from] mintrules_core::Error),
}
