//! kvbridge: send one command to a Redis-compatible server.
//!
//! Connects through the cooperative client, issues the command given on the
//! command line (PING by default) and prints the reply the way redis-cli
//! does.
//!
//! Configuration via CLI arguments or TOML file.

mod config;

use config::Config;
use kvbridge::{Command, Connection, IoManager};
use std::rc::Rc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        addr = %config.addr,
        events_capacity = config.events_capacity,
        "Starting kvbridge client"
    );

    let command =
        Command::from_words(config.command.iter().cloned()).unwrap_or_else(|| Command::new("PING"));

    let scheduler = Rc::new(IoManager::new(config.events_capacity)?);
    let mut conn = Connection::new(config.addr.clone(), scheduler);
    conn.connect()?;

    let reply = conn.issue(&command)?;
    println!("{reply}");

    conn.close();
    Ok(())
}
