use std::error::Error;
use std::fmt;

use crate::filter::{FilterError, FilterPattern};

/// Environment variable holding tracer parameters, e.g.
/// `RESIDUE_TRACER="filters=Buffer,Element+;fatal-leaks=true"`.
pub const TRACER_ENV: &str = "RESIDUE_TRACER";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracerConfig {
    /// Types to track, in order. Empty tracks every type.
    pub filters: Vec<FilterPattern>,
    /// Exit with a non-zero status when the teardown report finds leaks.
    pub fatal_leaks: bool,
    /// Report still-alive objects when the tracer is finished.
    pub log_leaks_on_detach: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            fatal_leaks: false,
            log_leaks_on_detach: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingValue(String),
    UnknownKey(String),
    InvalidBool { key: String, value: String },
    Filter(FilterError),
    NotUnicode(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingValue(key) => write!(f, "tracer parameter {key:?} needs a value (key=value)"),
            Self::UnknownKey(key) => write!(f, "unknown tracer parameter {key:?}"),
            Self::InvalidBool { key, value } => {
                write!(f, "tracer parameter {key:?} expects a boolean, got {value:?}")
            }
            Self::Filter(err) => write!(f, "invalid filters: {err}"),
            Self::NotUnicode(var) => write!(f, "{var} is not valid UTF-8"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Filter(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FilterError> for ConfigError {
    fn from(err: FilterError) -> Self {
        Self::Filter(err)
    }
}

impl TracerConfig {
    /// Parse `key=value` pairs separated by `;`.
    ///
    /// Recognized keys: `filters` (comma-separated patterns), `fatal-leaks`,
    /// `log-leaks-on-detach`.
    pub fn from_params(params: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for pair in params.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((key, value)) = pair.split_once('=') else {
                return Err(ConfigError::MissingValue(pair.to_string()));
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "filters" => config.filters = FilterPattern::parse_list(value)?,
                "fatal-leaks" => config.fatal_leaks = parse_bool(key, value)?,
                "log-leaks-on-detach" => config.log_leaks_on_detach = parse_bool(key, value)?,
                _ => return Err(ConfigError::UnknownKey(key.to_string())),
            }
        }
        Ok(config)
    }

    /// Read [`TRACER_ENV`]; defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(TRACER_ENV) {
            Ok(params) => Self::from_params(&params),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode(TRACER_ENV)),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
