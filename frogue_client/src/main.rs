//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p frogue_client -- [--addr 127.0.0.1:7777] [--name Frog] [--password secret]
//!   cargo run -p frogue_client -- --discover
//!
//! Without a renderer the client walks forward in a slow circle and logs
//! what it sees, which is enough to exercise a server end to end.

use std::{env, net::SocketAddr, time::Duration};

use anyhow::Context;
use frogue_client::{client::GameClient, discovery, input::InputIntent, ConnectParams, SessionState};
use frogue_shared::config::NetworkConfig;
use tracing::{info, warn};

/// Render-loop period.
const FRAME: Duration = Duration::from_millis(16);

struct Args {
    addr: String,
    name: String,
    password: Option<String>,
    discover: bool,
}

fn parse_args() -> Args {
    let mut out = Args {
        addr: "127.0.0.1:7777".to_string(),
        name: "Player".to_string(),
        password: None,
        discover: false,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                out.addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                out.name = args[i + 1].clone();
                i += 2;
            }
            "--password" if i + 1 < args.len() => {
                out.password = Some(args[i + 1].clone());
                i += 2;
            }
            "--discover" => {
                out.discover = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let config = NetworkConfig::default();

    if args.discover {
        let servers = discovery::discover_lan(config.query_port, Duration::from_secs(2)).await?;
        if servers.is_empty() {
            info!("No servers found");
        }
        for s in servers {
            info!(
                addr = %s.game_addr(config.server_port),
                name = %s.info.server_name,
                players = s.info.current_players,
                max = s.info.max_players,
                mode = %s.info.game_mode,
                ping = s.info.ping,
                "Server"
            );
        }
        return Ok(());
    }

    let addr: SocketAddr = args.addr.parse().context("parse --addr")?;
    info!(server = %addr, name = %args.name, "Starting client");
    let params = ConnectParams {
        addr,
        player_name: args.name,
        password: args.password,
    };
    let mut client = GameClient::connect(config, params).await.context("connect")?;

    let mut ticker = tokio::time::interval(FRAME);
    let mut yaw = 0.0f32;
    let mut frames = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }
        let dt = FRAME.as_secs_f32();
        yaw += 0.3 * dt;
        client.step(
            dt,
            InputIntent {
                forward: 1.0,
                yaw,
                ..Default::default()
            },
        );

        match client.state() {
            SessionState::Failed(reason) => {
                warn!(%reason, "Session failed");
                return Ok(());
            }
            SessionState::Disconnected => {
                info!("Disconnected");
                return Ok(());
            }
            _ => {}
        }

        frames += 1;
        if frames % 120 == 0 {
            let p = client.local_position();
            info!(
                x = p.x,
                z = p.z,
                remotes = client.remote_players().count(),
                entities = client.entities().count(),
                ping = client.ping_ms(),
                "Status"
            );
        }
    }

    client.disconnect().await;
    Ok(())
}
