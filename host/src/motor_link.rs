use binbot_common::command::Command;
use binbot_common::link::Connector;
use binbot_common::protocol::{Decoder, Message};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Acks are single short lines; no image payload is ever accepted.
const ACK_MAX_FRAME_BYTES: usize = 0;

/// Forward queued commands to the motor controller and log its acks,
/// reconnecting when the link drops. Returns once the command queue closes.
pub async fn run(mut connector: Connector, mut commands: mpsc::Receiver<Command>) {
    loop {
        let mut link = connector.connect_with_backoff().await;
        // commands decided while disconnected are stale
        while commands.try_recv().is_ok() {}

        match forward(&mut commands, &mut link.reader, &mut link.writer).await {
            Ok(true) => info!(peer = link.peer, "motor link closed"),
            Ok(false) => return,
            Err(e) => warn!(error = %e, peer = link.peer, "motor link failed"),
        }
    }
}

/// Returns `Ok(true)` when the peer closed the link and `Ok(false)` when the
/// command queue closed.
pub async fn forward<R, W>(
    commands: &mut mpsc::Receiver<Command>,
    reader: &mut R,
    writer: &mut W,
) -> std::io::Result<bool>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut decoder = Decoder::new(ACK_MAX_FRAME_BYTES);
    let mut buf = [0u8; 256];

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    return Ok(false);
                };
                writer.write_all(&[command.wire_byte()]).await?;
                writer.flush().await?;
                info!(command = %command, "sent to motor controller");
            }
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Ok(true);
                }
                decoder.push(&buf[..n]);
                while let Some(item) = decoder.next_message() {
                    match item {
                        Ok(Message::Ack(command)) => info!(command = %command, "motor executing"),
                        Ok(other) => debug!(?other, "ignoring message on motor link"),
                        Err(e) => debug!(error = %e, "unreadable motor output"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_wire_bytes_and_reads_acks() {
        let (host, motor) = tokio::io::duplex(256);
        let (mut host_rx, mut host_tx) = tokio::io::split(host);
        let (mut motor_rx, mut motor_tx) = tokio::io::split(motor);
        let (tx, mut rx) = mpsc::channel(8);

        let task = tokio::spawn(async move { forward(&mut rx, &mut host_rx, &mut host_tx).await });

        tx.send(Command::MoveLeft).await.unwrap();
        tx.send(Command::Stop).await.unwrap();
        let mut sent = [0u8; 2];
        motor_rx.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent, b"LS");

        motor_tx.write_all(b"Executing: Move Left\nExecuting: Stop\n").await.unwrap();
        drop(tx);
        assert!(!task.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn peer_close_is_reported() {
        let (host, motor) = tokio::io::duplex(256);
        let (mut host_rx, mut host_tx) = tokio::io::split(host);
        let (_tx, mut rx) = mpsc::channel::<Command>(8);

        drop(motor);
        assert!(forward(&mut rx, &mut host_rx, &mut host_tx).await.unwrap());
    }
}
