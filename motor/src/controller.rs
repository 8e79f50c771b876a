use std::time::Duration;

use binbot_common::link::Connector;
use binbot_common::protocol::{encode, Message};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::driver::MotorDriver;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("link I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("motor driver failed: {0}")]
    Driver(String),
}

/// Serve one link until the peer closes it: execute command bytes as they
/// arrive, acknowledge each one, and auto-stop expired moves every `tick`.
pub async fn serve<D, R, W>(
    dispatcher: &mut Dispatcher<D>,
    reader: &mut R,
    writer: &mut W,
    tick: Duration,
) -> Result<(), ControllerError>
where
    D: MotorDriver,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = [0u8; 64];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Ok(());
                }
                let now = Instant::now();
                let mut acks = Vec::new();
                for &byte in &buf[..n] {
                    if let Some(command) = dispatcher.handle_byte(byte, now).map_err(driver_err)? {
                        acks.extend(encode(&Message::Ack(command)));
                    }
                }
                if !acks.is_empty() {
                    writer.write_all(&acks).await?;
                    writer.flush().await?;
                }
            }
            _ = ticker.tick() => {
                dispatcher.tick(Instant::now()).map_err(driver_err)?;
            }
        }
    }
}

/// Accept links forever. Motors are stopped whenever a link ends.
pub async fn run<D: MotorDriver>(
    mut dispatcher: Dispatcher<D>,
    mut connector: Connector,
    tick: Duration,
) -> Result<(), ControllerError> {
    loop {
        let mut link = connector.connect_with_backoff().await;
        let result = serve(&mut dispatcher, &mut link.reader, &mut link.writer, tick).await;
        dispatcher.halt().map_err(driver_err)?;
        match result {
            Ok(()) => info!(peer = link.peer, "command link closed"),
            Err(ControllerError::Io(e)) => warn!(error = %e, peer = link.peer, "command link failed"),
            Err(e) => return Err(e),
        }
    }
}

fn driver_err<E: std::fmt::Display>(e: E) -> ControllerError {
    ControllerError::Driver(e.to_string())
}
