//! CLI for Topicast
//!
//! Subcommands:
//! - `broker`: run the broker
//! - `publish`: line-based chat publisher
//! - `consume`: subscribe to topics and log what arrives

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use topicast::broker::Broker;
use topicast::client::{PubSubClient, stream_end_result};
use topicast::config::load_config;
use topicast::transport::{ServerMessage, Server};

#[derive(Parser)]
#[command(name = "topicast")]
enum Command {
    /// Start the broker
    Broker {
        /// Overrides `server.host`
        #[arg(long)]
        host: Option<String>,
        /// Overrides `server.port`
        #[arg(long)]
        port: Option<u16>,
    },
    /// Publish each line typed on stdin as "<username>: <line>"; `quit` exits
    Publish {
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        #[arg(long, default_value = "group:chat")]
        topic: String,
    },
    /// Subscribe to topics until Ctrl-C, then unsubscribe and disconnect
    Consume {
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// May be repeated
        #[arg(long = "topic", default_value = "kubernetes")]
        topics: Vec<String>,
        /// Subscriber id; a random UUID if omitted
        #[arg(long)]
        id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();
    let _ = dotenvy::dotenv();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    topicast::utils::logging::init(&config.log.level);

    let result = match cmd {
        Command::Broker { host, port } => {
            let mut server = config.server.clone();
            server.host = host.unwrap_or(server.host);
            server.port = port.unwrap_or(server.port);

            let shutdown = CancellationToken::new();
            let broker = Arc::new(Broker::with_settings(&config.broker, shutdown));
            run_broker(&server.addr(), broker).await
        }
        Command::Publish { url, topic } => run_publisher(&url, &topic).await,
        Command::Consume { url, topics, id } => {
            let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
            run_consumer(&url, &topics, &id).await
        }
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_broker(addr: &str, broker: Arc<Broker>) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(addr, broker.clone()).await?;
    let shutdown = broker.shutdown_token().clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        shutdown.cancel();
    });

    server.run().await?;
    info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn run_publisher(url: &str, topic: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = PubSubClient::connect(url).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt("Enter your username: ")?;
    let Some(username) = lines.next_line().await? else {
        client.close().await;
        return Ok(());
    };

    loop {
        prompt("Type messages (press Enter to send, 'quit' to exit): ")?;
        let Some(text) = lines.next_line().await? else {
            break;
        };
        if text == "quit" {
            break;
        }

        let message = format!("{username}: {text}");
        match client.publish(topic, message.as_bytes()).await {
            Ok(()) => info!(topic, "published successfully"),
            Err(e) => warn!(topic, error = %e, "failed to publish"),
        }
    }

    client.close().await;
    Ok(())
}

async fn run_consumer(
    url: &str,
    topics: &[String],
    id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = PubSubClient::connect(url).await?;
    let mut events = client
        .take_events()
        .ok_or("event stream already taken")?;

    for topic in topics {
        client.subscribe(topic, id)?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(ServerMessage::Payload(frame)) => info!(
                    topic = %frame.topic,
                    payload = %String::from_utf8_lossy(&frame.payload),
                    subscriber_id = id,
                    "message received"
                ),
                Some(msg @ ServerMessage::StreamEnd { .. }) => {
                    if let Some(Err(e)) = stream_end_result(&msg) {
                        warn!(subscriber_id = id, error = %e, "subscription ended");
                    }
                }
                Some(ServerMessage::Error { message }) => warn!(%message, "broker reported an error"),
                Some(ServerMessage::Response { .. }) => {}
                None => {
                    info!(subscriber_id = id, "stream closed by server");
                    break;
                }
            },
        }
    }

    for topic in topics {
        match client.unsubscribe(topic, id).await {
            Ok(()) => info!(topic = %topic, subscriber_id = id, "unsubscribed successfully"),
            Err(e) => warn!(topic = %topic, subscriber_id = id, error = %e, "failed to unsubscribe"),
        }
    }

    client.close().await;
    Ok(())
}

fn prompt(text: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{text}")?;
    stdout.flush()
}
