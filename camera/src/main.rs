mod device;
mod source;

use std::path::PathBuf;

use binbot_common::config::Config;
use binbot_common::link::{Connector, Endpoint};
use tracing::{error, info};

use device::CameraDevice;
use source::mjpeg::MjpegSource;
use source::polling::{still_url, PollingSource};
use source::synthetic::SyntheticSource;

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

    let endpoint = match Endpoint::parse(&config.camera.link) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "bad camera link");
            std::process::exit(1);
        }
    };

    info!(
        link = %endpoint,
        mode = config.camera.mode,
        fps = config.camera.fps,
        detect = config.camera.detect,
        "starting binbot camera"
    );

    let connector = Connector::new(endpoint);
    let period = device::frame_period(config.camera.fps);
    let max_frames = config.camera.max_frames;

    match config.camera.mode.as_str() {
        "synthetic" => {
            let source = SyntheticSource::new(
                config.camera.width,
                config.camera.height,
                config.camera.synthetic_speed,
            );
            device::run(CameraDevice::new(source, &config), connector, period, max_frames).await;
        }
        "mjpeg" => {
            let source = MjpegSource::new(&config.camera.url).unwrap_or_else(|e| {
                error!(error = %e, "failed to build HTTP client");
                std::process::exit(1);
            });
            device::run(CameraDevice::new(source, &config), connector, period, max_frames).await;
        }
        "polling" => {
            let source = PollingSource::new(&still_url(&config.camera.url)).unwrap_or_else(|e| {
                error!(error = %e, "failed to build HTTP client");
                std::process::exit(1);
            });
            device::run(CameraDevice::new(source, &config), connector, period, max_frames).await;
        }
        other => {
            error!(mode = other, "unknown camera mode, expected 'synthetic', 'mjpeg' or 'polling'");
            std::process::exit(1);
        }
    }
}
