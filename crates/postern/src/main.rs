//! Postern request-forwarding gateway.
//!
//! Runs the gateway behind a plain HTTP listener, inside the AWS Lambda
//! runtime, or once over an event file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use postern_aws::{AwsConfig, AwsError, Credentials};
use postern_lib::runtime::LambdaRuntime;
use postern_lib::server::{self, ServeOptions};
use postern_lib::{Gateway, GatewayArgs, GatewayConfig, ProxyEvent};
use postern_telemetry::{log_startup, LogFormat, TelemetryConfig};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "postern", about = "Postern request-forwarding gateway", version)]
struct Cli {
    #[command(flatten)]
    gateway: GatewayArgs,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty).
    #[arg(long, default_value = "json")]
    log_format: String,

    /// AWS region, overriding AWS_REGION.
    #[arg(long)]
    aws_region: Option<String>,

    /// Endpoint used for every AWS service, overriding AWS_ENDPOINT_URL.
    #[arg(long)]
    aws_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve HTTP, turning each request into a gateway event.
    Serve {
        /// Listen address.
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: String,

        /// API id attached to every event.
        #[arg(long, default_value = "local")]
        api_id: String,

        /// Stage name attached to every event.
        #[arg(long, default_value = "dev")]
        stage: String,

        /// YAML file with the stage variables.
        #[arg(long)]
        stage_variables: Option<PathBuf>,
    },

    /// Run one event from a JSON file and print the response.
    Invoke {
        /// Path to the event JSON.
        event: PathBuf,
    },

    /// Answer invocations from the AWS Lambda runtime API.
    Lambda,
}

fn aws_config(region: Option<&str>, endpoint: Option<&str>) -> Result<AwsConfig, AwsError> {
    let mut config = match region {
        Some(region) => AwsConfig::new(region, Credentials::from_env()?),
        None => AwsConfig::from_env()?,
    };
    if let Some(endpoint) = endpoint {
        config = config.with_endpoint(endpoint);
    }
    Ok(config)
}

fn build_gateway(cli: &Cli, config: GatewayConfig) -> anyhow::Result<Arc<Gateway>> {
    let mut builder = Gateway::builder(config);
    match aws_config(cli.aws_region.as_deref(), cli.aws_endpoint.as_deref()) {
        Ok(aws) => {
            builder = builder
                .with_aws(Arc::new(aws))
                .context("failed to create AWS clients")?;
        }
        Err(e) => {
            warn!(error = %e, "AWS configuration unavailable; route tables, secrets and functions cannot be used");
        }
    }
    Ok(Arc::new(builder.build().context("failed to create HTTP client")?))
}

/// Run the serve command.
async fn run_serve(
    gateway: Arc<Gateway>,
    listen: &str,
    options: ServeOptions,
    stage_variables: Option<&Path>,
) -> ExitCode {
    let addr: SocketAddr = match listen.parse() {
        Ok(a) => a,
        Err(_) => {
            eprintln!("error: invalid listen address: {}", listen);
            return ExitCode::from(1);
        }
    };

    let options = match stage_variables.map(server::load_stage_variables).transpose() {
        Ok(Some(vars)) => options.with_stage_variables(vars),
        Ok(None) => options,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(1);
        }
    };

    match server::serve(gateway, options, addr).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(1)
        }
    }
}

/// Run the invoke command.
async fn run_invoke(gateway: Arc<Gateway>, event_path: &Path) -> ExitCode {
    let event = match read_event(event_path) {
        Ok(event) => event,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let response = gateway.handle(event).await;
    match serde_json::to_string_pretty(&response) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: failed to serialize response: {}", e);
            ExitCode::from(1)
        }
    }
}

fn read_event(path: &Path) -> anyhow::Result<ProxyEvent> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read event {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid event in {}", path.display()))
}

/// Run the lambda command.
async fn run_lambda(gateway: Arc<Gateway>) -> ExitCode {
    let runtime = match LambdaRuntime::from_env() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(1);
        }
    };
    match runtime.run(&gateway).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(log_format) = LogFormat::parse(&cli.log_format) else {
        eprintln!("error: invalid log format: {}", cli.log_format);
        return ExitCode::from(1);
    };
    let config = GatewayConfig::from(&cli.gateway);
    let telemetry = TelemetryConfig::new()
        .with_log_level(cli.log_level.as_str())
        .with_log_format(log_format)
        .with_dump_mode(config.dump_mode)
        .with_stderr(matches!(cli.command, Commands::Invoke { .. }));
    if let Err(e) = postern_telemetry::init(&telemetry) {
        eprintln!("error: {}", e);
        return ExitCode::from(1);
    }

    log_startup!(
        service = %telemetry.service_name,
        version = env!("CARGO_PKG_VERSION"),
        proxy_mode = config.proxy_mode,
        parameter_prefix = ?config.parameter_prefix,
        "starting"
    );

    let gateway = match build_gateway(&cli, config) {
        Ok(gateway) => gateway,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    match &cli.command {
        Commands::Serve {
            listen,
            api_id,
            stage,
            stage_variables,
        } => {
            let options = ServeOptions::new(api_id.as_str(), stage.as_str());
            run_serve(gateway, listen, options, stage_variables.as_deref()).await
        }
        Commands::Invoke { event } => run_invoke(gateway, event).await,
        Commands::Lambda => run_lambda(gateway).await,
    }
}
