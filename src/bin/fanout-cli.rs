//! One-shot command-line client for a running fanout relay.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use fanout::core::command::{encode_announce, PING};
use fanout::logging::init_logging_with;
use fanout::net::frame::DEFAULT_MAX_FRAME_BYTES;
use fanout::net::{Requester, SubscriberClient};

/// Command-line interface for fanout.
#[derive(Debug, Parser)]
#[command(name = "fanout-cli", version, about = "fanout CLI: ping, announce, subscribe")]
pub struct Cli {
    /// Control endpoint of the relay
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    pub addr: String,

    /// Broadcast endpoint of the relay
    #[arg(short, long, default_value = "127.0.0.1:5556")]
    pub broadcast_addr: String,

    /// Largest frame to send or accept; match the relay's `server.max_frame_bytes`
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Give up waiting for a reply after this many milliseconds
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ask the relay for its clock (unix seconds)
    Ping,

    /// Announce `content` on `topic`
    Announce {
        topic: String,
        /// Message text (enclose in quotes for spaces)
        content: String,
    },

    /// Send a raw control message verbatim
    Request { raw: String },

    /// Print broadcasts for the given topic prefixes until interrupted
    Subscribe {
        #[arg(required = true)]
        topics: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging_with("warn");
    let cli = Cli::parse();

    let request = match &cli.command {
        Command::Ping => PING.to_string(),
        Command::Announce { topic, content } => encode_announce(topic, content),
        Command::Request { raw } => raw.clone(),
        Command::Subscribe { topics } => {
            return subscribe(&cli.broadcast_addr, topics, cli.max_frame_bytes).await
        }
    };

    let mut requester = Requester::connect(&cli.addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", cli.addr, e))?
        .with_max_frame_bytes(cli.max_frame_bytes);
    info!("sending request: {}", request);

    let reply = tokio::time::timeout(
        Duration::from_millis(cli.timeout_ms),
        requester.request(&request),
    )
    .await
    .map_err(|_| anyhow::anyhow!("no reply within {} ms", cli.timeout_ms))??;

    println!("{reply}");
    Ok(())
}

async fn subscribe(addr: &str, topics: &[String], max_frame_bytes: usize) -> anyhow::Result<()> {
    let mut subscriber = SubscriberClient::connect(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", addr, e))?
        .with_max_frame_bytes(max_frame_bytes);
    for topic in topics {
        subscriber.subscribe(topic).await?;
    }
    info!("subscribed to {:?}", topics);

    while let Some(announcement) = subscriber.recv().await? {
        println!("{} {}", announcement.topic, announcement.content);
    }

    info!("relay closed the broadcast stream");
    Ok(())
}
