//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. Examples of
//! configuration files can be found in the `configs/` directory located in the repository root.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    pub api: ApiSettings,
    #[validate]
    pub round: RoundSettings,
    #[validate]
    pub evaluation: EvaluationSettings,
    #[validate]
    pub context: ContextSettings,
    #[serde(default)]
    pub model: ModelSettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("hefl")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

/// The REST API settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    /// The address to which the REST API should be bound.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [api]
    /// bind_address = "0.0.0.0:8081"
    /// # or
    /// bind_address = "127.0.0.1:8081"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// HEFL_API__BIND_ADDRESS=127.0.0.1:8081
    /// ```
    pub bind_address: std::net::SocketAddr,
}

/// The minimal and maximal number of accepted requests of a phase.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct CountSettings {
    pub min: u64,
    pub max: u64,
}

/// The minimal and maximal duration of a phase in seconds.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TimeSettings {
    pub min: u64,
    pub max: u64,
}

/// The round settings.
#[derive(Debug, Validate, Deserialize, Clone, Copy)]
#[validate(schema(function = "validate_round"))]
pub struct RoundSettings {
    /// The number of rounds after which the deployment terminates. Must be at least `1`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// limit = 2
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// HEFL_ROUND__LIMIT=2
    /// ```
    pub limit: u64,

    /// The quorum of a round, counted in distinct contributors.
    ///
    /// The minimal value must be at least `1` and must not exceed the maximal value. The round is
    /// aggregated as soon as `quorum.min` contributors submitted after `time.min` elapsed. No more
    /// than `quorum.max` submissions are accepted.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round.quorum]
    /// min = 3
    /// max = 10
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// HEFL_ROUND__QUORUM__MIN=3
    /// HEFL_ROUND__QUORUM__MAX=10
    /// ```
    pub quorum: CountSettings,

    /// The time window of a round in seconds.
    ///
    /// Submissions are collected for at least `time.min` seconds. If the quorum is still not met
    /// after `time.max` seconds, the round fails and the deployment terminates.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round.time]
    /// min = 0
    /// max = 3600
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// HEFL_ROUND__TIME__MIN=0
    /// HEFL_ROUND__TIME__MAX=3600
    /// ```
    pub time: TimeSettings,
}

impl RoundSettings {
    fn validate_round(&self) -> Result<(), ValidationError> {
        if self.limit == 0 {
            return Err(ValidationError::new("the round limit must be at least 1"));
        }
        validate_window(&self.quorum, &self.time)
    }
}

fn validate_round(s: &RoundSettings) -> Result<(), ValidationError> {
    s.validate_round()
}

/// The settings of the evaluation phase that follows every round.
#[derive(Debug, Validate, Deserialize, Clone, Copy)]
#[validate(schema(function = "validate_evaluation"))]
pub struct EvaluationSettings {
    /// Whether contributors evaluate the new global model after each round.
    ///
    /// The evaluation only reports loss and metrics. A failed evaluation quorum is logged and
    /// does not stop the deployment.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [evaluation]
    /// enabled = true
    ///
    /// [evaluation.quorum]
    /// min = 3
    /// max = 10
    ///
    /// [evaluation.time]
    /// min = 0
    /// max = 600
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// HEFL_EVALUATION__ENABLED=false
    /// ```
    pub enabled: bool,
    pub quorum: CountSettings,
    pub time: TimeSettings,
}

impl EvaluationSettings {
    fn validate_evaluation(&self) -> Result<(), ValidationError> {
        if self.enabled {
            validate_window(&self.quorum, &self.time)
        } else {
            Ok(())
        }
    }
}

fn validate_evaluation(s: &EvaluationSettings) -> Result<(), ValidationError> {
    s.validate_evaluation()
}

fn validate_window(quorum: &CountSettings, time: &TimeSettings) -> Result<(), ValidationError> {
    // the validate attribute only accepts literals, therefore we check the invariants here
    if 1 <= quorum.min && quorum.min <= quorum.max && time.min <= time.max {
        Ok(())
    } else {
        Err(ValidationError::new("invalid quorum or time range"))
    }
}

/// The encryption context settings.
#[derive(Debug, Validate, Deserialize, Clone)]
pub struct ContextSettings {
    /// The path of the public context file. The coordinator refuses to load a full context.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [context]
    /// public_context = "public_context.bin"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// HEFL_CONTEXT__PUBLIC_CONTEXT=public_context.bin
    /// ```
    pub public_context: PathBuf,

    /// The maximal number of values per block. It must not exceed the slot count of the context,
    /// which is checked once the context is loaded.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [context]
    /// block_capacity = 4096
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// HEFL_CONTEXT__BLOCK_CAPACITY=4096
    /// ```
    #[validate(range(min = 1))]
    pub block_capacity: usize,
}

/// The global model settings.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct ModelSettings {
    /// The optional path of a bincode encoded parameter set that seeds the first round.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [model]
    /// initial = "initial_model.bin"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// HEFL_MODEL__INITIAL=initial_model.bin
    /// ```
    #[serde(default)]
    pub initial: Option<PathBuf>,
}

/// The logging settings.
#[derive(Debug, Deserialize)]
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// HEFL_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.3.17/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.3.17/tracing_subscriber/filter/struct.EnvFilter.html#directives")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}
