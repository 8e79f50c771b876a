mod db;
mod motor_link;
mod session;
mod snapshot;
mod throttle;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use binbot_common::config::Config;
use binbot_common::link::{Connector, Endpoint};
use tokio::sync::mpsc;
use tracing::{error, info};

use db::DetectionLog;
use session::HostSession;
use snapshot::SnapshotWriter;

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

    let camera_endpoint = parse_endpoint(&config.host.camera_link, "camera");
    info!(
        camera_link = %camera_endpoint,
        motor_link = config.host.motor_link.as_deref().unwrap_or("none"),
        frame_width = config.host.frame_width,
        mirror = config.host.mirror,
        "starting binbot host"
    );

    let mut session = HostSession::new(&config.host);

    if let Some(link) = &config.host.motor_link {
        let endpoint = parse_endpoint(link, "motor");
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(motor_link::run(Connector::new(endpoint), rx));
        session = session.with_commands(tx);
    }

    if let Some(dir) = &config.host.snapshot_dir {
        info!(dir, "saving snapshots");
        session = session.with_snapshots(SnapshotWriter::new(dir));
    }

    if let Some(path) = &config.database.path {
        match DetectionLog::open(Path::new(path)) {
            Ok(log) => {
                if let Ok(rows) = log.count() {
                    info!(rows, "detection log has existing rows");
                }
                session = session.with_log(Arc::new(log));
            }
            Err(e) => {
                error!(error = %e, path, "failed to open detection log");
                std::process::exit(1);
            }
        }
    }

    session::run(session, Connector::new(camera_endpoint)).await;
}

fn parse_endpoint(link: &str, which: &str) -> Endpoint {
    match Endpoint::parse(link) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, which, "bad link endpoint");
            std::process::exit(1);
        }
    }
}
