//! Dual-transport broker server.
//!
//! Accepts TCP and Unix-socket clients concurrently and drives each
//! connection with two tasks: a reader that reassembles frames and hands
//! decoded messages to the router, and a writer that drains the client's
//! outbound channel onto the socket. A single router task consumes frames
//! from all readers in arrival order, which fixes the delivery order every
//! subscriber of a topic observes.

use crate::broker::events::BrokerEvent;
use crate::broker::handler::{ClientHandle, MessageHandler, TransportKind};
use crate::config::BrokerConfig;
use crate::protocol::{FrameAssembler, Message, MessageCodec};
use crate::Result;
use futures::SinkExt;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// The broker process: two listeners, a router, and a liveness sweeper.
///
/// Lifecycle is explicit: construct, [`start`](Self::start), serve,
/// [`stop`](Self::stop).
pub struct BrokerServer {
    config: BrokerConfig,
    handler: Arc<MessageHandler>,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
    tcp_addr: Mutex<Option<SocketAddr>>,
}

impl BrokerServer {
    pub fn new(config: BrokerConfig) -> Self {
        let handler = Arc::new(MessageHandler::new(config.cache_size));
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            config,
            handler,
            shutdown_tx,
            running: AtomicBool::new(false),
            tcp_addr: Mutex::new(None),
        }
    }

    /// The routing engine, exposed for counters, cache control, and event
    /// subscription.
    pub fn handler(&self) -> Arc<MessageHandler> {
        Arc::clone(&self.handler)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.handler.subscribe_events()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the TCP listener actually bound, available once started.
    /// Useful with port 0 in tests.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        *self.tcp_addr.lock()
    }

    /// Bind both listeners and spawn the accept loop, router, and sweeper.
    /// Returns once the broker is serving; either bind failure is fatal.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Starting broker...");

        let tcp_listener =
            match TcpListener::bind((self.config.host.as_str(), self.config.port)).await {
                Ok(listener) => listener,
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(e.into());
                }
            };

        // A stale endpoint file from a dead broker would make the bind fail.
        let local_path = self.config.local_socket_path();
        if local_path.exists() {
            let _ = std::fs::remove_file(&local_path);
        }
        let local_listener = match UnixListener::bind(&local_path) {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        *self.tcp_addr.lock() = tcp_listener.local_addr().ok();

        let (route_tx, mut route_rx) = mpsc::unbounded_channel::<(String, Message)>();

        // Router: a single consumer gives per-publisher FIFO and one total
        // order per topic across all subscribers.
        let router_handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            while let Some((client_id, message)) = route_rx.recv().await {
                router_handler.process_message(&client_id, message);
            }
        });

        let sweeper_handler = Arc::clone(&self.handler);
        let sweep_interval = self.config.sweep_interval;
        let max_idle = self.config.max_idle;
        let sweeper_shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            Self::run_sweeper(sweeper_handler, sweep_interval, max_idle, sweeper_shutdown).await;
        });

        let accept_handler = Arc::clone(&self.handler);
        let accept_shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            Self::run_accept_loop(
                tcp_listener,
                local_listener,
                accept_handler,
                route_tx,
                accept_shutdown,
            )
            .await;
        });

        info!(
            "Broker started. TCP port: {}, local endpoint: {}",
            self.tcp_addr().map(|a| a.port()).unwrap_or(self.config.port),
            self.config.local_name
        );
        Ok(())
    }

    /// Halt the acceptor and sweeper, unregister every client (closing its
    /// transport), and clear the message cache.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping broker...");

        let _ = self.shutdown_tx.send(());
        self.handler.shutdown();
        let _ = std::fs::remove_file(self.config.local_socket_path());
        *self.tcp_addr.lock() = None;

        info!("Broker stopped");
    }

    async fn run_accept_loop(
        tcp_listener: TcpListener,
        local_listener: UnixListener,
        handler: Arc<MessageHandler>,
        route_tx: mpsc::UnboundedSender<(String, Message)>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                accepted = tcp_listener.accept() => match accepted {
                    Ok((stream, _peer)) => {
                        Self::spawn_connection(stream, TransportKind::Tcp, &handler, &route_tx);
                    }
                    Err(e) => warn!("TCP accept failed: {}", e),
                },
                accepted = local_listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        Self::spawn_connection(stream, TransportKind::Local, &handler, &route_tx);
                    }
                    Err(e) => warn!("Local accept failed: {}", e),
                },
                _ = shutdown_rx.recv() => break,
            }
        }
        // Listeners drop here, releasing the port and the socket file.
    }

    fn spawn_connection<S>(
        stream: S,
        transport: TransportKind,
        handler: &Arc<MessageHandler>,
        route_tx: &mpsc::UnboundedSender<(String, Message)>,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let ClientHandle {
            id,
            mut outbound,
            closed,
        } = handler.register_client(transport);
        info!("New {} client connected: {}", transport, id);

        let (mut read_half, write_half) = tokio::io::split(stream);

        let writer_id = id.clone();
        tokio::spawn(async move {
            let mut sink = FramedWrite::new(write_half, MessageCodec::new());
            while let Some(message) = outbound.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!("Write to client {} failed: {}", writer_id, e);
                    break;
                }
            }
        });

        let handler = Arc::clone(handler);
        let route_tx = route_tx.clone();
        tokio::spawn(async move {
            let mut assembler = FrameAssembler::new();
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                tokio::select! {
                    read = read_half.read(&mut buf) => match read {
                        Ok(0) => break,
                        Ok(n) => {
                            handler.touch(&id);
                            match assembler.feed(&buf[..n]) {
                                Ok(messages) => {
                                    for message in messages {
                                        let _ = route_tx.send((id.clone(), message));
                                    }
                                }
                                Err(e) => {
                                    // Damaged frame: the stream cannot be
                                    // resynchronized, so the connection goes.
                                    warn!("Client {}: {}", id, e);
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            debug!("Read error from client {}: {}", id, e);
                            break;
                        }
                    },
                    _ = closed.notified() => return,
                }
            }
            if handler.unregister_client(&id) {
                info!("Client disconnected: {}", id);
            }
        });
    }

    async fn run_sweeper(
        handler: Arc<MessageHandler>,
        sweep_interval: Duration,
        max_idle: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick of an interval completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = handler.evict_idle(max_idle);
                    if !evicted.is_empty() {
                        debug!("Sweeper evicted {} idle client(s)", evicted.len());
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }
}
