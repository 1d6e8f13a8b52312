use clap::Parser;
use fixpay_server::config::{AppConfig, Validate};
use fixpay_server::logging::LogConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

/// fixpay payment server
#[derive(Parser, Debug)]
#[command(name = "fixpay-server")]
#[command(version)]
#[command(about = "Payment lifecycle server: payment API, gateway webhook and reconciliation")]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, env = "FIXPAY_CONFIG")]
    config: Option<PathBuf>,

    /// Environment file to load instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Listen port, overriding configuration
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match &cli.env_file {
        Some(path) => dotenvy::from_path(path),
        None => dotenvy::dotenv().map(|_| ()),
    };
    if let Err(err) = loaded {
        if cli.env_file.is_some() || !err.not_found() {
            eprintln!("fixpay-server: could not read environment file: {err}");
            return ExitCode::FAILURE;
        }
    }

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fixpay-server: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = cli.port {
        config.server.port = port;
        if let Err(err) = config.validate() {
            eprintln!("fixpay-server: {err}");
            return ExitCode::FAILURE;
        }
    }

    let _guard = match LogConfig::from_settings(&config.logging).try_init() {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("fixpay-server: {err}");
            return ExitCode::FAILURE;
        }
    };

    match fixpay_server::serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Server exited with error");
            ExitCode::FAILURE
        }
    }
}
