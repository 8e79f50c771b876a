mod controller;
mod dispatcher;
mod driver;

use std::path::PathBuf;
use std::time::Duration;

use binbot_common::config::Config;
use binbot_common::link::{Connector, Endpoint};
use tracing::{error, info};

use dispatcher::Dispatcher;
use driver::LoggingDriver;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let endpoint = match Endpoint::parse(&config.motor.link) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "bad motor link");
            std::process::exit(1);
        }
    };

    info!(
        link = %endpoint,
        move_duration_ms = config.motor.move_duration_ms,
        speed = config.motor.speed,
        "starting binbot motor controller"
    );

    let dispatcher = Dispatcher::new(
        LoggingDriver::default(),
        Duration::from_millis(config.motor.move_duration_ms),
        config.motor.speed,
    );
    let tick = Duration::from_millis(config.motor.tick_ms.max(1));

    if let Err(e) = controller::run(dispatcher, Connector::new(endpoint), tick).await {
        error!(error = %e, "motor controller stopped");
        std::process::exit(1);
    }
}
