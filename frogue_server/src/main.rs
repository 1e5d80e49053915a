//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p frogue_server -- [--config server.json] [--port 7777]
//!       [--mode deathmatch] [--max-players 8] [--name "My Server"] [--password secret]
//!
//! Command-line flags override values loaded from `--config`. Ctrl-C
//! disconnects every client and exits.

use std::env;

use anyhow::Context;
use frogue_server::GameServer;
use frogue_shared::config::NetworkConfig;
use tracing::{info, warn};

fn parse_args() -> anyhow::Result<NetworkConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = &args[i + 1];
            let text = std::fs::read_to_string(path).with_context(|| format!("read config {path}"))?;
            NetworkConfig::from_json_str(&text).with_context(|| format!("parse config {path}"))?
        }
        _ => NetworkConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                cfg.server_port = args[i + 1].parse().context("--port")?;
                i += 2;
            }
            "--mode" if i + 1 < args.len() => {
                cfg.game_mode = args[i + 1].parse().context("--mode")?;
                i += 2;
            }
            "--max-players" if i + 1 < args.len() => {
                cfg.max_players = args[i + 1].parse().context("--max-players")?;
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.server_name = args[i + 1].clone();
                i += 2;
            }
            "--password" if i + 1 < args.len() => {
                cfg.server_password = Some(args[i + 1].clone());
                i += 2;
            }
            "--config" => i += 2,
            other => {
                warn!(arg = other, "Ignoring unknown argument");
                i += 1;
            }
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(
        port = cfg.server_port,
        mode = cfg.game_mode.name(),
        max_players = cfg.max_players,
        name = %cfg.server_name,
        "Starting server"
    );

    let mut server = GameServer::new(cfg).await.context("create server")?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Ctrl-C handler failed, running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Server stopped");
    Ok(())
}
