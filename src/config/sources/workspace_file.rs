//! Workspace config files: config/graft.toml and config/{env}.toml

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use std::path::Path;

/// Environment selecting the env-specific file when GRAFT_ENV is unset
pub const DEFAULT_ENV: &str = "development";

/// Add workspace config files to builder.
/// Precedence: config/graft.toml (base) then config/{GRAFT_ENV}.toml (env-specific).
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let config_dir = workspace_root.join("config");
    let env_name = std::env::var("GRAFT_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = builder;

    let base_config_path = config_dir.join("graft.toml");
    if base_config_path.exists() {
        builder = builder.add_source(File::from(base_config_path).required(false));
    }

    let env_config_path = config_dir.join(format!("{}.toml", env_name));
    if env_config_path.exists() {
        builder = builder.add_source(File::from(env_config_path).required(false));
    }

    Ok(builder)
}
