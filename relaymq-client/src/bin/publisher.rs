use clap::Parser;
use relaymq::logging::{self, LogLevel};
use relaymq_client::{ClientConfig, Publisher, PublisherEvent};
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "publisher", version, about = "RelayMQ publisher example")]
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

    /// Topic to publish to.
    #[arg(short, long, default_value = "test/topic")]
    topic: String,

    /// Publish interval in milliseconds.
    #[arg(short, long, default_value_t = 1000)]
    interval: u64,

    /// Log file path.
    #[arg(short, long, default_value = "publisher.log")]
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

    let mut publisher = Publisher::new(builder.build());

    let mut events = publisher.events().expect("event stream already taken");
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PublisherEvent::Connected => info!("Connected to broker"),
                PublisherEvent::Disconnected => info!("Disconnected from broker"),
                PublisherEvent::Published(id) => info!("Message published: {}", id),
                PublisherEvent::Error(e) => error!("Error: {}", e),
            }
        }
    });

    match &args.server {
        Some(name) => info!("Connecting to local broker: {}", name),
        None => info!("Connecting to broker: {}:{}", args.host, args.port),
    }
    if publisher.connect().await.is_err() {
        warn!("Failed to connect to broker, will try to reconnect...");
    }

    println!("Publisher started. Press Ctrl+C to quit");

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let text = format!(
                    "Hello from publisher! Time: {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f")
                );
                match publisher.publish(args.topic.clone(), text.clone()).await {
                    Ok(outcome) if !outcome.was_queued() => println!("Published message: {}", text),
                    Ok(_) => println!("Queued message: {}", text),
                    Err(e) => println!("Failed to publish message: {}", e),
                }
            }
            _ = signal::ctrl_c() => break,
        }
    }

    publisher.disconnect().await;
    ExitCode::SUCCESS
}
