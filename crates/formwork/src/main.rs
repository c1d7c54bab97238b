//! formwork-api - entry point
//!
//! Loads configuration, installs telemetry, wires the middleware chains and
//! serves until SIGTERM or SIGINT.

use std::path::PathBuf;

use anyhow::Context;
use tracing::{error, info};

use formwork::app::build_server;
use formwork::config::{ConfigLoader, ENV_PREFIX};
use formwork::telemetry::init_telemetry;

/// Command-line arguments.
struct Args {
    /// Configuration file.
    config: Option<PathBuf>,
    /// Start from development defaults.
    dev: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut dev = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--dev" => dev = true,
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("formwork-api {}", formwork::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config, dev }
    }
}

fn print_help() {
    println!(
        r"formwork-api - Formwork API service

USAGE:
    formwork-api [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Configuration file (TOML or JSON)
        --dev              Start from development defaults (pretty logs, no metrics)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    FORMWORK__SERVER__HTTP_ADDR             Bind address (default: 0.0.0.0:8080)
    FORMWORK__SERVER__REQUEST_TIMEOUT_MS    Per-request deadline, 0 disables (default: 30000)
    FORMWORK__PIPELINE__ENABLED             Use middleware chains (default: true)
    FORMWORK__ASSERTION__SHARED_SECRET      Shared HMAC key, at least 32 characters
    FORMWORK__ASSERTION__TIMESTAMP_SKEW_SECS  Accepted clock skew (default: 60)
    FORMWORK__LOGGING__LEVEL                Log level (default: info)
    FORMWORK__METRICS__ADDR                 Prometheus listener (default: 0.0.0.0:9090)

A .env file in the working directory is read before the environment.
"
    );
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut loader = ConfigLoader::new().with_dotenv();
    if args.dev {
        loader = loader.with_development();
    }
    if let Some(path) = &args.config {
        loader = loader
            .with_file(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
    }
    let config = loader
        .with_env_prefix(ENV_PREFIX)
        .load()
        .context("invalid configuration")?;

    init_telemetry(&config.logging, &config.metrics).context("failed to initialise telemetry")?;

    info!(
        version = formwork::VERSION,
        http_addr = %config.server.http_addr,
        "starting formwork-api"
    );

    let server = build_server(&config).context("failed to wire middleware")?;
    server.run().await.context("server error")?;

    info!("formwork-api stopped");
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = run(args).await {
        // Telemetry may not be installed yet.
        eprintln!("formwork-api: {err:#}");
        error!("fatal: {err:#}");
        std::process::exit(1);
    }
}
