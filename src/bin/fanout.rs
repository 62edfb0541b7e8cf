//! fanout – one binary that can start the relay *or* act as an interactive
//! client shell.
//
//  $ fanout start --config fanout.toml
//  $ fanout connect --subscribe kittens
//  > announce kittens!hello
//  < OK
//  [kittens] hello
use fanout::config::Config;
use fanout::logging::init_logging;
use fanout::net::frame::DEFAULT_MAX_FRAME_BYTES;
use fanout::net::{Requester, SubscriberClient};
use fanout::RelayServer;

use clap::{Parser, Subcommand};
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "fanout", version, about = "Fanout relay & interactive client")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the relay and serve until Ctrl-C.
    Start {
        /// Path to config TOML (falls back to $FANOUT_CONFIG, then fanout.toml)
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Connect to a running relay in interactive mode.
    Connect {
        /// Control endpoint (host:port)
        #[arg(long, default_value = "127.0.0.1:5555")]
        addr: String,
        /// Broadcast endpoint (host:port)
        #[arg(long, default_value = "127.0.0.1:5556")]
        broadcast_addr: String,
        /// Topic prefixes to print broadcasts for; repeatable
        #[arg(short, long = "subscribe")]
        subscribe: Vec<String>,
        /// Largest frame to send or accept; match the relay's `server.max_frame_bytes`
        #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
        max_frame_bytes: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.cmd {
        Command::Start { config } => start(config.as_deref()).await?,
        Command::Connect {
            addr,
            broadcast_addr,
            subscribe,
            max_frame_bytes,
        } => repl(&addr, &broadcast_addr, subscribe, max_frame_bytes).await?,
    }
    Ok(())
}

async fn start(config_path: Option<&str>) -> anyhow::Result<()> {
    let cfg = Config::load(config_path)?;
    let mut server = RelayServer::bind(&cfg).await?;
    info!(
        control = %server.control_addr(),
        broadcast = %server.broadcast_addr(),
        "fanout relay listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {}", e);
            return;
        }
        let _ = shutdown_tx.send(true);
    });

    server.run_until(shutdown_rx).await?;
    info!("fanout relay stopped");
    Ok(())
}

// ───────────────────────────────────────────────────────────
// Interactive REPL shell
// ───────────────────────────────────────────────────────────
async fn repl(
    addr: &str,
    broadcast_addr: &str,
    topics: Vec<String>,
    max_frame_bytes: usize,
) -> anyhow::Result<()> {
    let mut rl: Editor<(), DefaultHistory> = DefaultEditor::new()?;
    let mut requester = Requester::connect(addr)
        .await?
        .with_max_frame_bytes(max_frame_bytes);
    println!("Connected to {addr}. Type `help` for commands.");

    // Background task printing broadcasts for the requested prefixes
    let printer: Option<JoinHandle<()>> = if topics.is_empty() {
        None
    } else {
        let mut subscriber = SubscriberClient::connect(broadcast_addr)
            .await?
            .with_max_frame_bytes(max_frame_bytes);
        for topic in &topics {
            subscriber.subscribe(topic).await?;
        }
        println!("Subscribed on {broadcast_addr} to {}", topics.join(", "));

        Some(tokio::spawn(async move {
            loop {
                match subscriber.recv().await {
                    Ok(Some(a)) => println!("[{}] {}", a.topic, a.content),
                    Ok(None) => break,
                    Err(e) => {
                        println!("broadcast stream failed: {e}");
                        break;
                    }
                }
            }
        }))
    };

    loop {
        let Ok(line) = rl.readline("> ") else { break };
        let _ = rl.add_history_entry(line.as_str());

        match line.trim() {
            "" => continue,
            "help" => println!("ping | announce <topic>!<content> | <anything else> | exit"),
            "exit" | "quit" => break,
            _ => {
                // Sent untrimmed; the relay matches requests byte for byte.
                let reply = requester.request(&line).await?;
                println!("< {reply}");
            }
        }
    }

    if let Some(printer) = printer {
        printer.abort();
    }
    println!("Goodbye.");
    Ok(())
}
