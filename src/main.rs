//! `traffic-orchestrator`: run the deployment controller as a service.
//!
//! Loads the TOML config, wires the HTTP health probe and metrics adapter,
//! starts the canary monitor, and serves the operator API until Ctrl-C.
//!
//! ## Usage
//!
//! ```text
//! traffic-orchestrator --config orchestrator.toml
//! traffic-orchestrator --print-schema
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json`: structured JSON output (defaults to the config file's
//!   `observability.log_format`)
//! - `RUST_LOG=info`: log level filter

use std::path::PathBuf;
use std::sync::Arc;

use tokio_traffic_orchestrator::config::{self, loader};
use tokio_traffic_orchestrator::deploy::{
    spawn_canary_monitor, DeploymentController, HttpHealthProbe, HttpMetricsSource,
};
use tokio_traffic_orchestrator::{init_tracing, metrics, OrchestratorError};
use tracing::{info, warn};

struct Args {
    config: PathBuf,
    print_schema: bool,
}

fn usage() -> String {
    "usage: traffic-orchestrator [--config <path>] [--print-schema]\n\
     \n  -c, --config <path>   orchestrator TOML file (default: orchestrator.toml)\
     \n      --print-schema    print the config JSON Schema and exit"
        .to_string()
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut config = PathBuf::from("orchestrator.toml");
    let mut print_schema = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a value".to_string());
                }
                config = PathBuf::from(&args[i]);
            }
            "--print-schema" => {
                print_schema = true;
            }
            "--help" | "-h" => {
                return Err(usage());
            }
            other => {
                return Err(format!("unknown argument: {other}\n\n{}", usage()));
            }
        }
        i += 1;
    }

    Ok(Args {
        config,
        print_schema,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let argv: Vec<String> = std::env::args().collect();
    let args = match parse_args(&argv) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    if args.print_schema {
        println!("{}", config::json_schema()?);
        return Ok(());
    }

    let cfg = loader::load_from_file(&args.config).map_err(OrchestratorError::from)?;

    if std::env::var_os("LOG_FORMAT").is_none() {
        std::env::set_var("LOG_FORMAT", cfg.observability.log_format.as_env_value());
    }
    let _ = init_tracing();
    metrics::init_metrics()?;

    let settings = cfg.controller_settings();
    info!(
        config = %args.config.display(),
        environment = %settings.initial.environment,
        version = %settings.initial.version,
        "starting traffic orchestrator"
    );

    let probe = Arc::new(HttpHealthProbe::new(cfg.probe_connect_timeout()));
    let source = Arc::new(HttpMetricsSource::new(cfg.metrics_source_config()));
    let controller = Arc::new(DeploymentController::new(settings, probe, source));

    let monitor = spawn_canary_monitor(controller.clone(), cfg.monitor_config());

    #[cfg(feature = "web-api")]
    {
        use tokio_traffic_orchestrator::web_api::{start_server, ServerConfig};

        let server = ServerConfig {
            host: cfg.server.host.clone(),
            port: cfg.server.port,
            ..ServerConfig::default()
        };
        start_server(server, controller.clone(), shutdown_signal()).await?;
    }

    #[cfg(not(feature = "web-api"))]
    shutdown_signal().await;

    monitor.abort();
    info!("traffic orchestrator stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C, shutting down");
    }
    info!("shutdown signal received");
}
