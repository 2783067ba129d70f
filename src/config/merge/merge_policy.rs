//! Defaults every layer overrides

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with the built-in defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("federation.name", "graft")?
        .set_default("federation.default_workspace", crate::request::DEFAULT_WORKSPACE)?
        .set_default("federation.fan_out_failure", "omit")?
        .set_default("federation.identity_property", crate::graph::lexicon::IDENTITY)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")
}
