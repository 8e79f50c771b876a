use std::sync::Arc;
use std::time::Duration;

use binbot_common::command::Command;
use binbot_common::config::HostConfig;
use binbot_common::detect::DetectionResult;
use binbot_common::frame::Frame;
use binbot_common::link::Connector;
use binbot_common::protocol::{Decoder, ImagePayload, Message};
use binbot_common::zone::{classify, mirror_x, Zone};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::db::DetectionLog;
use crate::snapshot::SnapshotWriter;
use crate::throttle::CommandThrottle;

/// Host side of the camera link: decodes camera output, turns detections
/// into motor commands, and records what it saw.
pub struct HostSession {
    decoder: Decoder,
    max_frame_bytes: usize,
    chunk_timeout: Duration,
    frame_width: u32,
    mirror: bool,
    throttle: CommandThrottle,
    commands: Option<mpsc::Sender<Command>>,
    snapshots: Option<SnapshotWriter>,
    log: Option<Arc<DetectionLog>>,
    images: u64,
    /// Snapshot and log writes running off the read loop.
    writes: JoinSet<()>,
}

impl HostSession {
    pub fn new(config: &HostConfig) -> Self {
        Self {
            decoder: Decoder::new(config.max_frame_bytes),
            max_frame_bytes: config.max_frame_bytes,
            chunk_timeout: Duration::from_millis(config.chunk_timeout_ms),
            frame_width: config.frame_width,
            mirror: config.mirror,
            throttle: CommandThrottle::new(config.resend_every),
            commands: None,
            snapshots: None,
            log: None,
            images: 0,
            writes: JoinSet::new(),
        }
    }

    pub fn with_commands(mut self, commands: mpsc::Sender<Command>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotWriter) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn with_log(mut self, log: Arc<DetectionLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn frame_width(&self) -> u32 {
        self.frame_width
    }

    /// Zone and command for one detection. No object means stay put.
    pub fn decide(&self, result: &DetectionResult) -> (Option<Zone>, Command) {
        match result {
            DetectionResult::NoObject => (None, Command::Stop),
            DetectionResult::Object(region) => {
                let x = if self.mirror {
                    mirror_x(region.x, self.frame_width)
                } else {
                    region.x
                };
                let zone = classify(x, self.frame_width);
                (Some(zone), zone.command())
            }
        }
    }

    /// Decode `reader` until it closes. While an image is half received, a
    /// read that stalls past the chunk timeout abandons the image.
    pub async fn serve<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> std::io::Result<()> {
        let mut buf = vec![0u8; 8192];
        loop {
            let n = if self.decoder.is_mid_payload() {
                match tokio::time::timeout(self.chunk_timeout, reader.read(&mut buf)).await {
                    Ok(read) => read?,
                    Err(_) => {
                        if let Some(e) = self.decoder.expire() {
                            warn!(error = %e, "framing error, resynchronising");
                        }
                        continue;
                    }
                }
            } else {
                reader.read(&mut buf).await?
            };
            if n == 0 {
                self.flush_writes().await;
                return Ok(());
            }

            self.decoder.push(&buf[..n]);
            while let Some(item) = self.decoder.next_message() {
                match item {
                    Ok(msg) => self.handle(msg),
                    Err(e) => warn!(error = %e, "framing error, resynchronising"),
                }
            }
            self.reap_writes();
        }
    }

    /// Writes still in flight.
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Wait for every queued snapshot and log write.
    pub async fn flush_writes(&mut self) {
        while let Some(joined) = self.writes.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "background write panicked");
            }
        }
    }

    fn reap_writes(&mut self) {
        while let Some(joined) = self.writes.try_join_next() {
            if let Err(e) = joined {
                warn!(error = %e, "background write panicked");
            }
        }
    }

    /// Forget per-link state before reading from a fresh connection.
    pub fn reset_link(&mut self) {
        self.decoder = Decoder::new(self.max_frame_bytes);
        self.throttle.reset();
    }

    fn handle(&mut self, msg: Message) {
        match msg {
            Message::CameraReady => {
                info!("camera ready");
                self.throttle.reset();
            }
            Message::Detection(result) => self.handle_detection(result),
            Message::Error(text) => warn!(message = text, "camera reported error"),
            Message::Image(image) => self.handle_image(image),
            Message::Ack(command) => debug!(command = command.as_str(), "unexpected ack on camera link"),
        }
    }

    fn handle_detection(&mut self, result: DetectionResult) {
        let (zone, command) = self.decide(&result);
        if let Some(region) = result.object() {
            debug!(
                x = region.x,
                y = region.y,
                changed = region.changed_pixels,
                zone = zone.map(Zone::as_str),
                command = command.as_str(),
                "object detected"
            );
        }

        if let Some(log) = &self.log {
            let log = Arc::clone(log);
            let now_ms = chrono::Utc::now().timestamp_millis();
            self.writes.spawn_blocking(move || {
                if let Err(e) = log.insert(now_ms, &result, zone, command) {
                    warn!(error = %e, "failed to log detection");
                }
            });
        }

        if self.throttle.should_send(command) {
            self.send(command);
        }
    }

    fn send(&self, command: Command) {
        let Some(commands) = &self.commands else {
            info!(command = %command, "motor link not configured, command not sent");
            return;
        };
        match commands.try_send(command) {
            Ok(()) => debug!(command = command.as_str(), "command queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(command = command.as_str(), "motor link backed up, dropping command")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(command = command.as_str(), "motor link task gone, dropping command")
            }
        }
    }

    fn handle_image(&mut self, image: ImagePayload) {
        let ImagePayload {
            data,
            width,
            height,
        } = image;
        if width > 0 && width != self.frame_width {
            info!(old = self.frame_width, new = width, "frame width changed");
            self.frame_width = width;
        }

        let seq = self.images;
        self.images += 1;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let frame = Frame::from_wire(data, width, height, now_ms, seq);
        debug!(seq, bytes = frame.payload_size(), width, height, "image received");

        if let Some(snapshots) = &self.snapshots {
            let snapshots = snapshots.clone();
            self.writes.spawn_blocking(move || {
                if let Err(e) = snapshots.save(&frame) {
                    warn!(error = %e, "failed to save snapshot");
                }
            });
        }
    }
}

/// Read the camera link forever, reconnecting when it drops.
pub async fn run(mut session: HostSession, mut connector: Connector) {
    loop {
        let mut link = connector.connect_with_backoff().await;
        match session.serve(&mut link.reader).await {
            Ok(()) => info!(peer = link.peer, "camera link closed"),
            Err(e) => warn!(error = %e, peer = link.peer, "camera link failed"),
        }
        session.reset_link();
    }
}
