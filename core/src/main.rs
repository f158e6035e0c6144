use clap::Parser;
use relaymq::logging::{self, LogLevel};
use relaymq::{BrokerConfig, BrokerEvent, BrokerServer};
use std::process::ExitCode;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "relaymq", version, about = "RelayMQ message broker")]
struct Args {
    /// TCP port to listen on.
    #[arg(short, long, default_value_t = 5555)]
    port: u16,

    /// Local server name.
    #[arg(short, long, default_value = "MyMQLocalServer")]
    server: String,

    /// Log file path.
    #[arg(short, long, default_value = "broker.log")]
    log: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = logging::init(&args.log, LogLevel::Debug) {
        eprintln!("Failed to initialize logger: {}", e);
        return ExitCode::from(1);
    }

    let config = BrokerConfig {
        port: args.port,
        local_name: args.server.clone(),
        ..Default::default()
    };

    let server = BrokerServer::new(config);
    if let Err(e) = server.start().await {
        error!("Failed to start broker: {}", e);
        return ExitCode::from(1);
    }

    // Mirror broker activity into the log, the way operators expect to
    // follow a broker: connects, disconnects, and routed topics.
    let mut events = server.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                BrokerEvent::ClientConnected(id) => info!("Client connected: {}", id),
                BrokerEvent::ClientDisconnected(id) => info!("Client disconnected: {}", id),
                BrokerEvent::MessageReceived(message) => {
                    info!("Message received: {}", message.topic())
                }
                BrokerEvent::MessagePublished(message) => {
                    info!("Message published: {}", message.topic())
                }
            }
        }
    });

    info!(
        "Broker started. TCP port: {}, Local server: {}",
        args.port, args.server
    );
    println!("Press Ctrl+C to quit");

    if signal::ctrl_c().await.is_err() {
        error!("Failed to listen for shutdown signal");
    }

    server.stop().await;
    ExitCode::SUCCESS
}
