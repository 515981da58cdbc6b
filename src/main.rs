//! rookd - Rook IRC Daemon
//!
//! A single-node IRC server speaking RFC 1459 plus the IRCv3.2
//! capability-negotiation family.

mod caps;
mod config;
mod error;
mod events;
mod handlers;
mod network;
mod security;
mod state;
mod store;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use crate::config::Config;
use crate::events::{CommandRegistry, EventBus};
use crate::state::ServerContext;
use crate::store::AccountStore;

#[derive(Parser)]
#[command(name = "rookd", version, about = "Rook IRC Daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "rookd.toml")]
    config: PathBuf,

    /// Raise the log filter to debug.
    #[arg(long)]
    debug: bool,

    /// Stay in the foreground. rookd never daemonizes, so this is the only
    /// behavior; the flag is accepted for init-script compatibility.
    #[arg(long)]
    nofork: bool,

    /// Print the supported password hash schemes and exit.
    #[arg(long)]
    list_hashes: bool,

    /// Hash a passphrase for an oper block and exit.
    #[arg(long, value_name = "PASSPHRASE")]
    mkpasswd: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.list_hashes {
        for scheme in crate::security::password::SCHEMES {
            println!("{scheme}");
        }
        return Ok(());
    }
    if let Some(passphrase) = cli.mkpasswd {
        match crate::security::password::hash_blocking("argon2", &passphrase) {
            Ok(hash) => {
                println!("{hash}");
                return Ok(());
            }
            Err(e) => {
                eprintln!("rookd: mkpasswd failed: {e}");
                std::process::exit(1);
            }
        }
    }

    let conf = Config::load(&cli.config).map_err(|e| {
        eprintln!("rookd: cannot load config {}: {e}", cli.config.display());
        e
    })?;

    let filter = if cli.debug {
        "debug".to_string()
    } else {
        conf.log.level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(true)
        .init();

    if let Err(errors) = config::validate(&conf) {
        for err in &errors {
            error!(error = %err, "configuration validation failed");
        }
        anyhow::bail!("configuration validation failed with {} error(s)", errors.len());
    }

    info!(
        server = %conf.server.name,
        network = %conf.server.network,
        "starting rookd"
    );

    let store = AccountStore::open(&PathBuf::from(&conf.store.filename))
        .map_err(|e| anyhow::anyhow!("cannot open account store: {e}"))?;

    let mut commands = CommandRegistry::new();
    let mut events = EventBus::new();
    handlers::register_all(&mut commands, &mut events, &conf);

    let listeners = conf.listener.clone();
    let ctx = ServerContext::new(conf, store, commands, events);

    // One-second wall-clock ticker; handlers read this instead of the clock.
    {
        let current_ts = ctx.current_ts.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                ticker.tick().await;
                current_ts.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
            }
        });
    }

    for listener in listeners {
        network::listener::spawn_listener(Arc::clone(&ctx), listener).await?;
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
