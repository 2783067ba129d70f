//! Layered loading of `GraftConfig`

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::GraftConfig;
use crate::error::ConfigError;
use config::Environment;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of environment overrides, e.g. `GRAFT__FEDERATION__NAME`
pub const ENV_PREFIX: &str = "GRAFT";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace
    ///
    /// Precedence, lowest first: defaults, the user-level file, the workspace
    /// files, then environment variables.
    pub fn load(workspace_root: &Path) -> Result<GraftConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = builder.add_source(env_source());
        let config: GraftConfig = builder.build()?.try_deserialize()?;
        debug!(
            workspace_root = %workspace_root.display(),
            federation = %config.federation.name,
            projections = config.federation.projections.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Load one file on top of the defaults, ignoring every other layer
    pub fn load_from_file(path: &Path) -> Result<GraftConfig, ConfigError> {
        let config = merge_policy::builder_with_defaults()?
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Parse TOML text on top of the defaults
    pub fn load_from_str(text: &str) -> Result<GraftConfig, ConfigError> {
        let config = merge_policy::builder_with_defaults()?
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn user_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    /// Render a configuration as TOML
    pub fn to_toml(config: &GraftConfig) -> Result<String, ConfigError> {
        toml::to_string_pretty(config).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
