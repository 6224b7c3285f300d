use thiserror::Error;

/// Errors raised while loading or validating a run configuration.
///
/// Every variant is fatal: a run never starts with an invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read from disk.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML/JSON or does not match the schema.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A required field is missing.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    /// A duration string could not be parsed or was negative.
    #[error("invalid duration '{value}' for `{field}`")]
    InvalidDuration { field: String, value: String },

    /// The stage list is empty or otherwise unusable.
    #[error("invalid stages: {0}")]
    InvalidStages(String),

    /// A threshold expression could not be parsed.
    #[error("invalid threshold '{expression}' on `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    /// A threshold references a metric the scenario never records.
    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    /// Any other semantically invalid value.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid_duration(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidDuration {
            field: field.into(),
            value: value.into(),
        }
    }
}
