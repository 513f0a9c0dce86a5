//! Echo over DRIFT: an announcing responder and a link client.
//!
//! Server: registers an encrypted single destination
//! `example_utilities.echo.request` with `ProveAll`, announces on an
//! interval, and echoes link data back over the same link.
//!
//! Client: waits for the server's announce (or an existing path), opens a
//! link, sends one query, prints the reply and the link round trip, then
//! tears down.

mod client;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drift-echo", about = "DRIFT echo responder and link client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the echo responder.
    Server {
        /// UDP address to bind.
        #[arg(long, default_value = "0.0.0.0:42671")]
        bind: SocketAddr,
        /// Known peer addresses to reach the mesh through.
        #[arg(long)]
        peer: Vec<SocketAddr>,
        /// Directory holding the persisted server identity.
        #[arg(long, default_value = ".drift-echo")]
        identity_dir: PathBuf,
        /// Seconds between announces.
        #[arg(long, default_value_t = 15)]
        announce_interval: u64,
    },
    /// Query an echo responder over a link.
    Client {
        /// Hex address of the responder destination.
        destination: String,
        /// UDP address to bind.
        #[arg(long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Known peer addresses to reach the mesh through.
        #[arg(long)]
        peer: Vec<SocketAddr>,
        /// The query to send.
        #[arg(long, default_value = "GET weather.node")]
        query: String,
        /// Seconds to wait for discovery and for the reply.
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Server {
            bind,
            peer,
            identity_dir,
            announce_interval,
        } => server::run(bind, &peer, &identity_dir, announce_interval),
        Command::Client {
            destination,
            bind,
            peer,
            query,
            timeout,
        } => client::run(&destination, bind, &peer, &query, timeout),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
