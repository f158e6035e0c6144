use clap::Parser;
use relaymq::logging::{self, LogLevel};
use relaymq_client::{ClientConfig, Subscriber, SubscriberEvent};
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "subscriber", version, about = "RelayMQ subscriber example")]
struct Args {
    /// Broker host.
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Broker TCP port.
    #[arg(short, long, default_value_t = 5555)]
    port: u16,

    /// Use the local server endpoint instead of TCP.
    #[arg(short, long)]
    server: Option<String>,

    /// Topic to subscribe to.
    #[arg(short, long, default_value = "test/topic")]
    topic: String,

    /// Log file path.
    #[arg(short, long, default_value = "subscriber.log")]
    log: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = logging::init(&args.log, LogLevel::Debug) {
        eprintln!("Failed to initialize logger: {}", e);
        return ExitCode::from(1);
    }

    let mut builder = ClientConfig::builder()
        .host(args.host.clone())
        .port(args.port)
        .auto_reconnect(true)
        .reconnect_interval(Duration::from_millis(5000));
    if let Some(name) = &args.server {
        builder = builder.local_name(name.clone());
    }

    let mut subscriber = Subscriber::new(builder.build());
    let mut events = subscriber.events().expect("event stream already taken");

    match &args.server {
        Some(name) => info!("Connecting to local broker: {}", name),
        None => info!("Connecting to broker: {}:{}", args.host, args.port),
    }
    if subscriber.connect().await.is_err() {
        warn!("Failed to connect to broker, will try to reconnect...");
    } else if subscriber.subscribe(args.topic.clone()).await.is_err() {
        warn!("Failed to subscribe to topic: {}", args.topic);
    }

    println!("Subscriber started. Press Ctrl+C to quit");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SubscriberEvent::Message(message)) => {
                    let text = String::from_utf8_lossy(message.payload()).to_string();
                    info!("Received message on topic {}: {}", message.topic(), text);
                    println!("Received: {}", text);
                }
                Some(SubscriberEvent::Connected) => {
                    info!("Connected to broker");
                    // Restore the command-line topic after a reconnect when
                    // the very first subscribe never went through.
                    if subscriber.subscribed_topics().is_empty() {
                        let _ = subscriber.subscribe(args.topic.clone()).await;
                    }
                }
                Some(SubscriberEvent::Disconnected) => info!("Disconnected from broker"),
                Some(SubscriberEvent::Subscribed(topic)) => info!("Subscribed to topic: {}", topic),
                Some(SubscriberEvent::Unsubscribed(topic)) => {
                    info!("Unsubscribed from topic: {}", topic)
                }
                Some(SubscriberEvent::Error(e)) => error!("Error: {}", e),
                None => break,
            },
            _ = signal::ctrl_c() => break,
        }
    }

    subscriber.disconnect().await;
    ExitCode::SUCCESS
}
