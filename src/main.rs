//! ircraft - IRC and Minecraft relay bot
//!
//! Connects to any number of IRC networks and Minecraft servers (RCON for
//! commands, UDP for log events) and relays messages between them on a
//! single-threaded event loop.

mod bridge;
mod common;
mod config;
mod irc;
mod minecraft;
mod protocol;
mod reactor;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bridge::FilterRegistry;
use common::error::AppError;
use config::{env::get_config_path, load_and_validate, Config};
use irc::IrcClient;
use minecraft::MinecraftClient;
use reactor::Reactor;

const DEFAULT_LOG_LEVEL: &str = "info";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config_path = get_config_path();
    let config = match load_and_validate(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_logging(None);
            error!("Failed to load configuration from {}:\n{}", config_path, e);
            return Err(e.into());
        }
    };

    init_logging(config.logging.level.as_deref());
    info!("ircraft v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        irc = config.irc.len(),
        minecraft = config.minecraft.len(),
        "Configuration loaded from {}",
        config_path
    );

    let reactor = build_reactor(config)?;
    let result = reactor.run(shutdown_signal()).await;
    if let Err(e) = &result {
        error!("Relay stopped: {:#}", e);
    }

    info!("Exiting...");
    result
}

/// `RUST_LOG` wins, then the configured level (which `IRCRAFT_LOG` overrides).
fn init_logging(level: Option<&str>) {
    let directive = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .or_else(|| level.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("Invalid log filter '{}': {}", directive, e);
        EnvFilter::new(DEFAULT_LOG_LEVEL)
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_reactor(config: Config) -> Result<Reactor, AppError> {
    let filters = FilterRegistry::from_config(&config.filters)?;
    let mut reactor = Reactor::new();

    if config.irc.is_empty() && config.minecraft.is_empty() {
        warn!("No clients configured, nothing to relay");
    }
    for irc in config.irc {
        reactor.add_endpoint(Box::new(IrcClient::new(irc, &filters)?));
    }
    for mc in config.minecraft {
        reactor.add_endpoint(Box::new(MinecraftClient::new(mc, &filters)?));
    }
    Ok(reactor)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
