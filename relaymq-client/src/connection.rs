//! Transport link shared by the publisher and subscriber clients.
//!
//! A [`Connection`] owns two tasks: a writer that drains encoded frames onto
//! the socket and a reader that feeds the client's frame assembler and
//! forwards decoded messages. The reader reports an unexpected close with a
//! single [`ConnEvent::Closed`]; an intentional [`Connection::close`] stops
//! the reader silently so the owner can tell the two apart.

use crate::config::{ClientConfig, Transport};
use crate::error::RelaymqClientError;
use crate::Result;
use bytes::Bytes;
use parking_lot::Mutex;
use relaymq::protocol::{FrameAssembler, Message};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Inbound notifications from a connection's reader task.
#[derive(Debug)]
pub(crate) enum ConnEvent {
    /// A whole frame arrived and decoded.
    Message(Message),
    /// The transport closed or failed outside the client's control.
    Closed,
}

/// An established link to the broker over either transport.
pub(crate) struct Connection {
    write_tx: mpsc::UnboundedSender<Bytes>,
    closer: Arc<Notify>,
}

impl Connection {
    /// Connect using the transport the configuration selects and spawn the
    /// reader/writer tasks.
    pub(crate) async fn open(
        config: &ClientConfig,
        assembler: Arc<Mutex<FrameAssembler>>,
        events: mpsc::UnboundedSender<ConnEvent>,
    ) -> Result<Self> {
        let timeout_ms = config.connect_timeout.as_millis() as u64;
        match config.transport() {
            Transport::Tcp { host, port } => {
                let stream = timeout(
                    config.connect_timeout,
                    TcpStream::connect((host.as_str(), port)),
                )
                .await
                .map_err(|_| RelaymqClientError::timeout(timeout_ms))?
                .map_err(|e| {
                    RelaymqClientError::connection(format!(
                        "failed to connect to {}:{}: {}",
                        host, port, e
                    ))
                })?;
                Ok(Self::spawn(stream, assembler, events))
            }
            Transport::Local { name } => {
                let path = relaymq::config::local_socket_path(&name);
                let stream = timeout(config.connect_timeout, UnixStream::connect(&path))
                    .await
                    .map_err(|_| RelaymqClientError::timeout(timeout_ms))?
                    .map_err(|e| {
                        RelaymqClientError::connection(format!(
                            "failed to connect to local endpoint {}: {}",
                            name, e
                        ))
                    })?;
                Ok(Self::spawn(stream, assembler, events))
            }
        }
    }

    fn spawn<S>(
        stream: S,
        assembler: Arc<Mutex<FrameAssembler>>,
        events: mpsc::UnboundedSender<ConnEvent>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Bytes>();
        let closer = Arc::new(Notify::new());

        tokio::spawn(async move {
            while let Some(frame) = write_rx.recv().await {
                if let Err(e) = write_half.write_all(&frame).await {
                    debug!("Write to broker failed: {}", e);
                    break;
                }
            }
        });

        let reader_closer = Arc::clone(&closer);
        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                tokio::select! {
                    read = read_half.read(&mut buf) => match read {
                        Ok(0) => break,
                        Ok(n) => {
                            let messages = match assembler.lock().feed(&buf[..n]) {
                                Ok(messages) => messages,
                                Err(e) => {
                                    warn!("Broker stream damaged: {}", e);
                                    break;
                                }
                            };
                            for message in messages {
                                if events.send(ConnEvent::Message(message)).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            debug!("Read from broker failed: {}", e);
                            break;
                        }
                    },
                    // Intentional close: stop without reporting a disconnect.
                    _ = reader_closer.notified() => return,
                }
            }
            let _ = events.send(ConnEvent::Closed);
        });

        Self { write_tx, closer }
    }

    /// Serialize, frame, and hand the message to the writer task. Fails only
    /// when the link is already gone.
    pub(crate) fn send(&self, message: &Message) -> Result<()> {
        self.write_tx
            .send(message.to_frame())
            .map_err(|_| RelaymqClientError::NotConnected)
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.write_tx.is_closed()
    }

    /// Tear the link down without generating a `Closed` event.
    pub(crate) fn close(&self) {
        self.closer.notify_one();
    }
}
