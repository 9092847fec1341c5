//! alert-fetcher - polls data sources and forwards alerts to sinks

use clap::Parser;
use std::path::PathBuf;
use std::process;

use alert_fetcher::{app, logging, AppConfig};

#[derive(Parser)]
#[command(name = "alert-fetcher")]
#[command(version, about = "Poll data sources and forward extracted alerts to sinks", long_about = None)]
struct Cli {
    /// Path to the JSON (or YAML) configuration file
    #[arg(short, long, default_value = "config.json", env = "ALERT_FETCHER_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match AppConfig::load_from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = logging::init(&config.log) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
    tracing::info!(path = %cli.config.display(), "config load success");

    if let Err(e) = app::run(config).await {
        tracing::error!(error = %e, "startup failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
