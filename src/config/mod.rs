pub mod settings;

pub use settings::*;

use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

const DEFAULT_FILE: &str = "trendcast";
const ENV_PREFIX: &str = "TRENDCAST";

/// Layer serde defaults, an optional TOML file and `TRENDCAST__*` variables.
/// An explicit `path` must exist; the default `trendcast.toml` may not.
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    if let Ok(env_file) = dotenvy::dotenv() {
        debug!("Loaded environment from {}", env_file.display());
    }

    let file = match path {
        Some(p) => ::config::File::from(p).required(true),
        None => ::config::File::with_name(DEFAULT_FILE).required(false),
    };

    let settings = ::config::Config::builder()
        .add_source(file)
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("data.tickers"),
        )
        .build()
        .context("failed to read configuration")?;

    settings
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")
}

/// The default configuration as TOML.
pub fn render_default() -> Result<String> {
    render(&AppConfig::default())
}

pub fn render(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).context("failed to render configuration")
}
