use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use siorelay::{Config, Gateway};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "📡 siorelay";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let config = match setup().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{APP_NAME}: {e}");
            return ExitCode::FAILURE;
        }
    };

    run_forever(config).await
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

async fn setup() -> Result<Config, siorelay::errors::ConfigError> {
    // This has to be the first thing we do, because it initializes the config
    Config::init().await?;

    let config = Config::snapshot()?;
    init_tracing(&config);

    Ok(config)
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(config.log_level.as_str())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run_forever(config: Config) -> ExitCode {
    // Binding is the only fatal error; everything after it is logged and survived
    let gateway = match Gateway::bind(config) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("{APP_NAME} failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("{} starting as {}", APP_NAME, gateway.self_channel());
    gateway.run().await;
    info!("{} stopped", APP_NAME);

    ExitCode::SUCCESS
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
