//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`OrchestratorConfig`] that
//! cannot be expressed through the type system alone (range checks,
//! cross-field invariants).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::OrchestratorConfig;
use crate::deploy::{Environment, MetricName};

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "canary.success_threshold").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn check_fraction(errors: &mut Vec<ConfigError>, field: &str, value: f64) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(invalid(field, value, "must be between 0.0 and 1.0"));
    }
}

fn check_url(errors: &mut Vec<ConfigError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(invalid(field, "\"\"", "must not be empty"));
    } else if !(value.starts_with("http://") || value.starts_with("https://")) {
        errors.push(invalid(field, value, "must start with http:// or https://"));
    }
}

/// Validate all semantic constraints on an [`OrchestratorConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &OrchestratorConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Deployment ───────────────────────────────────────────────────
    let d = &config.deployment;
    if d.initial_environment == Environment::Canary {
        errors.push(invalid(
            "deployment.initial_environment",
            d.initial_environment,
            "must be blue or green",
        ));
    }
    if d.initial_version.trim().is_empty() {
        errors.push(invalid("deployment.initial_version", "\"\"", "must not be empty"));
    }
    if !d.health_check_path.starts_with('/') {
        errors.push(invalid(
            "deployment.health_check_path",
            &d.health_check_path,
            "must start with '/'",
        ));
    }
    check_fraction(
        &mut errors,
        "deployment.rollback_error_threshold",
        d.rollback_error_threshold,
    );

    // ── Canary ───────────────────────────────────────────────────────
    let c = &config.canary;
    if c.traffic_percentage == 0 || c.traffic_percentage > 100 {
        errors.push(invalid(
            "canary.traffic_percentage",
            c.traffic_percentage,
            "must be between 1 and 100",
        ));
    }
    check_fraction(&mut errors, "canary.success_threshold", c.success_threshold);
    for required in [MetricName::ErrorRate, MetricName::SuccessRate] {
        if !c.tracked_metrics.contains(&required) {
            errors.push(invalid(
                "canary.tracked_metrics",
                required.as_str(),
                "is required by the canary evaluator",
            ));
        }
    }

    // ── Environments ─────────────────────────────────────────────────
    check_url(&mut errors, "environments.blue", &config.environments.blue);
    check_url(&mut errors, "environments.green", &config.environments.green);
    check_url(&mut errors, "environments.canary", &config.environments.canary);

    // ── Probe ────────────────────────────────────────────────────────
    if !(1..=30_000).contains(&config.probe.timeout_ms) {
        errors.push(invalid(
            "probe.timeout_ms",
            config.probe.timeout_ms,
            "must be between 1 and 30000",
        ));
    }
    if config.probe.connect_timeout_ms == 0 {
        errors.push(invalid("probe.connect_timeout_ms", 0, "must be at least 1"));
    }

    // ── Monitor ──────────────────────────────────────────────────────
    let m = &config.monitor;
    if m.interval_s == 0 {
        errors.push(invalid("monitor.interval_s", 0, "must be at least 1"));
    }
    if m.metrics_timeout_ms == 0 {
        errors.push(invalid("monitor.metrics_timeout_ms", 0, "must be at least 1"));
    } else if m.interval_s > 0 && m.metrics_timeout_ms >= m.interval_s.saturating_mul(1000) {
        errors.push(invalid(
            "monitor.metrics_timeout_ms",
            m.metrics_timeout_ms,
            "must be shorter than monitor.interval_s",
        ));
    }
    if m.stale_threshold == 0 {
        errors.push(invalid("monitor.stale_threshold", 0, "must be at least 1"));
    }

    // ── Metrics source ───────────────────────────────────────────────
    check_url(
        &mut errors,
        "metrics_source.base_url",
        &config.metrics_source.base_url,
    );
    if config.metrics_source.timeout_ms == 0 {
        errors.push(invalid("metrics_source.timeout_ms", 0, "must be at least 1"));
    }

    // ── Server ───────────────────────────────────────────────────────
    if config.server.host.trim().is_empty() {
        errors.push(invalid("server.host", "\"\"", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn valid_config() -> OrchestratorConfig {
        toml::from_str(
            r#"
[environments]
blue = "http://blue:8080"
green = "http://green:8080"
canary = "https://canary:8443"

[metrics_source]
base_url = "http://metrics:9000"
"#,
        )
        .expect("test: valid config")
    }

    fn fields(config: &OrchestratorConfig) -> Vec<String> {
        match validate(config) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .into_iter()
                .filter_map(|e| match e {
                    ConfigError::InvalidField { field, .. } => Some(field),
                    _ => None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_canary_initial_environment_rejected() {
        let mut c = valid_config();
        c.deployment.initial_environment = Environment::Canary;
        assert_eq!(fields(&c), vec!["deployment.initial_environment"]);
    }

    #[test]
    fn test_empty_initial_version_rejected() {
        let mut c = valid_config();
        c.deployment.initial_version = " ".into();
        assert_eq!(fields(&c), vec!["deployment.initial_version"]);
    }

    #[test]
    fn test_health_path_without_slash_rejected() {
        let mut c = valid_config();
        c.deployment.health_check_path = "health".into();
        assert_eq!(fields(&c), vec!["deployment.health_check_path"]);
    }

    #[test]
    fn test_thresholds_out_of_range_rejected() {
        let mut c = valid_config();
        c.deployment.rollback_error_threshold = 1.5;
        c.canary.success_threshold = -0.1;
        assert_eq!(
            fields(&c),
            vec!["deployment.rollback_error_threshold", "canary.success_threshold"]
        );
    }

    #[test]
    fn test_canary_traffic_bounds() {
        let mut c = valid_config();
        c.canary.traffic_percentage = 0;
        assert_eq!(fields(&c), vec!["canary.traffic_percentage"]);
        c.canary.traffic_percentage = 101;
        assert_eq!(fields(&c), vec!["canary.traffic_percentage"]);
        c.canary.traffic_percentage = 100;
        assert!(fields(&c).is_empty());
    }

    #[test]
    fn test_tracked_metrics_must_include_rates() {
        let mut c = valid_config();
        c.canary.tracked_metrics = BTreeSet::from([MetricName::ResponseTime]);
        assert_eq!(
            fields(&c),
            vec!["canary.tracked_metrics", "canary.tracked_metrics"]
        );
    }

    #[test]
    fn test_environment_urls_checked() {
        let mut c = valid_config();
        c.environments.blue = String::new();
        c.environments.green = "green:8080".into();
        assert_eq!(fields(&c), vec!["environments.blue", "environments.green"]);
    }

    #[test]
    fn test_probe_timeout_bounds() {
        let mut c = valid_config();
        c.probe.timeout_ms = 0;
        assert_eq!(fields(&c), vec!["probe.timeout_ms"]);
        c.probe.timeout_ms = 30_001;
        assert_eq!(fields(&c), vec!["probe.timeout_ms"]);
        c.probe.timeout_ms = 30_000;
        c.probe.connect_timeout_ms = 0;
        assert_eq!(fields(&c), vec!["probe.connect_timeout_ms"]);
    }

    #[test]
    fn test_monitor_interval_and_timeout() {
        let mut c = valid_config();
        c.monitor.interval_s = 0;
        assert_eq!(fields(&c), vec!["monitor.interval_s"]);

        let mut c = valid_config();
        c.monitor.interval_s = 5;
        c.monitor.metrics_timeout_ms = 5000;
        assert_eq!(fields(&c), vec!["monitor.metrics_timeout_ms"]);

        c.monitor.metrics_timeout_ms = 0;
        assert_eq!(fields(&c), vec!["monitor.metrics_timeout_ms"]);
    }

    #[test]
    fn test_monitor_stale_threshold_must_be_positive() {
        let mut c = valid_config();
        c.monitor.stale_threshold = 0;
        assert_eq!(fields(&c), vec!["monitor.stale_threshold"]);
        c.monitor.stale_threshold = 1;
        assert!(validate(&c).is_ok());
    }

    #[test]
    fn test_metrics_source_checked() {
        let mut c = valid_config();
        c.metrics_source.base_url = "ftp://metrics".into();
        c.metrics_source.timeout_ms = 0;
        assert_eq!(
            fields(&c),
            vec!["metrics_source.base_url", "metrics_source.timeout_ms"]
        );
    }

    #[test]
    fn test_empty_server_host_rejected() {
        let mut c = valid_config();
        c.server.host = String::new();
        assert_eq!(fields(&c), vec!["server.host"]);
    }

    #[test]
    fn test_all_violations_collected() {
        let mut c = valid_config();
        c.deployment.health_check_path = "x".into();
        c.canary.traffic_percentage = 0;
        c.monitor.interval_s = 0;
        c.server.host = String::new();
        assert_eq!(validate(&c).unwrap_err().len(), 4);
    }
}
