//! Reading `orchestrator.toml`.
//!
//! Parsing and validation run back to back, so callers only ever see an
//! [`OrchestratorConfig`] that the controller can be built from. Every error
//! names the file (or the `source_name` given to [`load_from_str`]); a file
//! that breaks several rules reports all of them in one
//! [`ConfigError::Validation`].

use std::path::Path;

use tracing::debug;

use super::validation::{self, ConfigError};
use super::OrchestratorConfig;

/// Read, parse and validate the config at `path`.
///
/// # Errors
/// - [`ConfigError::Io`] if the file cannot be read
/// - [`ConfigError::Parse`] for malformed TOML, unknown environments, or a
///   missing `[environments]` / `[metrics_source]` section
/// - [`ConfigError::Validation`] listing every violated rule
///
/// # Panics
/// This function never panics.
pub fn load_from_file(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let name = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        file: name.clone(),
        source,
    })?;
    load_from_str(&content, &name)
}

/// Parse and validate TOML already in memory.
///
/// # Errors
/// Same as [`load_from_file`], minus `Io`.
///
/// # Panics
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<OrchestratorConfig, ConfigError> {
    let config: OrchestratorConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
        file: source_name.to_string(),
        source,
    })?;

    if let Err(violations) = validation::validate(&config) {
        let mut report = format!("{source_name}: {} problem(s)", violations.len());
        for v in &violations {
            report.push_str("\n  - ");
            report.push_str(&v.to_string());
        }
        return Err(ConfigError::Validation(report));
    }

    debug!(
        source = source_name,
        environment = %config.deployment.initial_environment,
        version = %config.deployment.initial_version,
        "configuration loaded"
    );
    Ok(config)
}
