//! User-level config file: $XDG_CONFIG_HOME/graft/config.toml on Linux, the
//! platform's configuration directory elsewhere

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use directories::ProjectDirs;
use std::path::PathBuf;
use tracing::debug;

/// Path to the user-level config file.
pub fn global_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "graft").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Add the user-level config file to the builder if it exists.
pub fn add_to_builder(
    mut builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    if let Some(path) = global_config_path() {
        if path.exists() {
            let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
            builder = builder.add_source(File::from(canonical).required(false));
        } else {
            debug!(config_path = %path.display(), "No user-level configuration file");
        }
    }
    Ok(builder)
}
