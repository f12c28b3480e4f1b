//! Canopy node - tree overlay peer
//!
//! ## Usage
//!
//! ```bash
//! # Start the root of a new overlay
//! canopy root --listen 0.0.0.0:5000
//!
//! # Join an overlay through its root
//! canopy join 192.168.1.1:5000 --listen 0.0.0.0:5001
//! ```
//!
//! Once running, the node reads commands from stdin (`send <text>`,
//! `Register`, `Advertise`, `quit`) and prints incoming messages as
//! `<address>: <text>` lines.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use canopy_peer::{Command, DisplayEvent, Peer, PeerConfig, parse_line};
use canopy_transport::TcpTransport;
use canopy_wire::Address;

/// Canopy - a tree-shaped overlay network
#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Tree overlay peer with root-coordinated membership")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as the overlay's root
    Root {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:5000")]
        listen: Address,
    },
    /// Join an overlay through its root
    Join {
        /// The root's address
        root: Address,
        /// Address to listen on (port 0 picks an ephemeral port)
        #[arg(short, long, default_value = "127.0.0.1:0")]
        listen: Address,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("canopy=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = PeerConfig::default();

    let (peer, events) = match cli.command {
        Commands::Root { listen } => {
            let transport = TcpTransport::bind(listen)
                .await
                .context("Failed to bind listener")?;
            Peer::root(transport, config)
        }
        Commands::Join { root, listen } => {
            let transport = TcpTransport::bind(listen)
                .await
                .context("Failed to bind listener")?;
            Peer::leaf(transport, root, config)
        }
    };
    println!("listening on {}", peer.local_addr());

    let (command_tx, command_rx) = mpsc::channel(64);
    tokio::spawn(read_commands(command_tx));
    tokio::spawn(print_events(events));

    peer.run(command_rx).await.context("Peer stopped")?;
    Ok(())
}

/// Forward stdin lines to the peer until EOF or quit.
async fn read_commands(commands: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Some(command) => {
                let quitting = command == Command::Quit;
                if commands.send(command).await.is_err() || quitting {
                    return;
                }
            }
            None => warn!(line = %line, "unrecognized command"),
        }
    }
    // EOF: dropping the sender shuts the peer down.
}

async fn print_events(mut events: mpsc::Receiver<DisplayEvent>) {
    while let Some(event) = events.recv().await {
        println!("{event}");
    }
}
