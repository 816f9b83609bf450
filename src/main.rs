use app_gatewayd::telemetry::TelemetryFormat;
use app_gatewayd::{run, Settings, DEFAULT_LISTEN, DEFAULT_RESOLUTION_CONFIG};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Loopback application gateway daemon", long_about = None)]
struct Cli {
    #[arg(
        long,
        default_value = DEFAULT_LISTEN,
        help = "Loopback listen address for the WebSocket gateway"
    )]
    listen: SocketAddr,

    #[arg(
        long,
        default_value = DEFAULT_RESOLUTION_CONFIG,
        help = "Path to the base method resolution config"
    )]
    resolution_config: PathBuf,

    #[arg(
        long = "resolution-overlay",
        value_name = "PATH",
        help = "Additional resolution config merged over the base (repeatable, last wins)"
    )]
    resolution_overlays: Vec<PathBuf>,

    #[arg(
        long,
        value_name = "PATH",
        help = "JSON session map ({\"<session>\": \"<appId>\"}) used to authenticate connections"
    )]
    session_map: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = app_gatewayd::telemetry::DEFAULT_REPORTING_INTERVAL_SECS,
        help = "Telemetry reporting interval in seconds"
    )]
    telemetry_interval_secs: u64,

    #[arg(
        long,
        default_value_t = app_gatewayd::telemetry::DEFAULT_CACHE_THRESHOLD,
        help = "Number of cached telemetry records before a forced flush"
    )]
    telemetry_cache_threshold: u32,

    #[arg(
        long,
        default_value = "json",
        value_parser = parse_telemetry_format,
        help = "Telemetry payload encoding (json|compact)"
    )]
    telemetry_format: TelemetryFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let settings = Settings {
        listen: cli.listen,
        resolution_config: cli.resolution_config,
        resolution_overlays: cli.resolution_overlays,
        session_map: cli.session_map,
        telemetry_reporting_interval_secs: cli.telemetry_interval_secs,
        telemetry_cache_threshold: cli.telemetry_cache_threshold,
        telemetry_format: cli.telemetry_format,
    };

    run(settings).await
}

fn parse_telemetry_format(value: &str) -> Result<TelemetryFormat, String> {
    value.parse()
}
