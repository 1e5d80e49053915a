//! Shared helpers for the socket-level tests.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use frogue_client::{input::InputIntent, GameClient, NetworkManager};
use frogue_server::{bind_ephemeral, GameServer};
use frogue_shared::{
    config::{NetworkConfig, PROTOCOL_VERSION},
    message::{ConnectRequest, ConnectResponse, NetMsg},
    net::ReliableConn,
};
use tokio::{sync::oneshot, task::JoinHandle, time};

/// Installs a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Config tuned for tests: short timeouts, frequent keep-alives.
pub fn test_config() -> NetworkConfig {
    NetworkConfig {
        connection_timeout_ms: 2000,
        keep_alive_interval_ms: 100,
        seed: Some(7),
        ..NetworkConfig::default()
    }
}

/// A server running its real-time loop on a background task.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub query_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<GameServer>>,
}

impl RunningServer {
    pub async fn start(config: NetworkConfig) -> anyhow::Result<Self> {
        let mut server = bind_ephemeral(config).await?;
        let addr = server.local_addr();
        let query_addr = server.query_addr();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .run_until(async {
                    let _ = rx.await;
                })
                .await?;
            Ok(server)
        });
        Ok(Self {
            addr,
            query_addr,
            shutdown: Some(tx),
            task,
        })
    }

    /// Stops the loop and hands back the stopped server for inspection.
    pub async fn stop(mut self) -> anyhow::Result<GameServer> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.task).await.context("server task panicked")?
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Handshakes over a raw stream, leaving every later message to the caller.
pub async fn raw_connect(
    addr: SocketAddr,
    name: &str,
    version: &str,
    udp_port: u16,
) -> anyhow::Result<(ReliableConn, ConnectResponse)> {
    let mut conn = ReliableConn::connect(addr).await?;
    conn.send(&NetMsg::ConnectRequest(ConnectRequest {
        player_name: name.to_string(),
        protocol_version: version.to_string(),
        password: None,
        udp_port,
    }))
    .await?;
    let envelope = conn
        .recv_timeout(Duration::from_secs(2))
        .await?
        .context("no ConnectResponse")?;
    match envelope.msg {
        NetMsg::ConnectResponse(response) => Ok((conn, response)),
        other => anyhow::bail!("expected ConnectResponse, got {other:?}"),
    }
}

/// [`raw_connect`] with the current protocol version.
pub async fn raw_join(addr: SocketAddr, name: &str, udp_port: u16) -> anyhow::Result<(ReliableConn, ConnectResponse)> {
    raw_connect(addr, name, PROTOCOL_VERSION, udp_port).await
}

/// Frame length used when stepping clients.
pub const FRAME: Duration = Duration::from_millis(16);

/// Steps `client` at frame rate until `done` holds or `within` elapses.
pub async fn drive_until<F>(client: &mut GameClient, intent: InputIntent, within: Duration, mut done: F) -> bool
where
    F: FnMut(&GameClient) -> bool,
{
    let deadline = time::Instant::now() + within;
    while time::Instant::now() < deadline {
        client.step(FRAME.as_secs_f32(), intent);
        if done(client) {
            return true;
        }
        time::sleep(FRAME).await;
    }
    false
}

/// Everything `session` receives during `window`.
pub async fn collect_for(session: &NetworkManager, window: Duration) -> Vec<NetMsg> {
    let deadline = time::Instant::now() + window;
    let mut seen = Vec::new();
    while time::Instant::now() < deadline {
        seen.extend(session.poll());
        time::sleep(Duration::from_millis(10)).await;
    }
    seen.extend(session.poll());
    seen
}
