//! Configuration for the Parley QA service
//!
//! Settings are layered: environment variables > `config/{env}.toml` >
//! `config/default.toml` > compiled defaults. Every recognized option is a
//! typed field on [`Settings`]; nothing is read by string key at runtime.
//! Invalid combinations are rejected at load time, never at the hot path.

mod authority;
mod settings;

pub use authority::AuthorityConfig;
pub use settings::{
    ChatConfig, HybridConfig, LimitsConfig, LlmSettings, RetrievalMethod, RoutingStrategy,
    ServerConfig, SessionConfig, Settings, StorageConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl From<ConfigError> for parley_core::Error {
    fn from(err: ConfigError) -> Self {
        parley_core::Error::ConfigurationInvalid(err.to_string())
    }
}

/// Load settings from files and the environment.
///
/// `env` selects an overlay file (`config/{env}.toml`); `PARLEY_`-prefixed
/// environment variables override individual fields with `__` as the
/// separator (e.g. `PARLEY_SERVER__PORT=9000`).
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name("config/default").required(false));

    if let Some(env) = env {
        builder = builder
            .add_source(config::File::with_name(&format!("config/{env}")).required(false));
    }

    let loaded = builder
        .add_source(config::Environment::with_prefix("PARLEY").separator("__"))
        .build()?;

    let settings: Settings = loaded.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}
