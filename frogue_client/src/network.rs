//! Client network session.
//!
//! One [`NetworkManager`] per connection attempt. Background tasks own the
//! sockets; the simulation thread only touches the two message queues
//! through [`NetworkManager::send`] and [`NetworkManager::poll`], neither of
//! which ever awaits I/O.
//!
//! Unexpected loss of the stream triggers up to [`MAX_RECONNECT_ATTEMPTS`]
//! fresh handshakes before the session settles in [`SessionState::Failed`].

use std::{
    collections::VecDeque,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use anyhow::Context;
use frogue_shared::{
    config::{NetworkConfig, PROTOCOL_VERSION},
    message::{now_millis, Channel, ConnectRequest, ConnectResponse, Envelope, KeepAlive, NetMsg, PlayerId},
    net::{ReliableConn, ReliableReader, ReliableWriter, UnreliableConn},
};
use tokio::{sync::Notify, task::JoinHandle, time};
use tracing::{debug, info, warn};

pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// How long `disconnect` waits for the farewell to be flushed.
pub const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Terminal; carries the reason shown to the user.
    Failed(String),
}

/// Who to connect to and as whom; kept for reconnects.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub addr: SocketAddr,
    pub player_name: String,
    pub password: Option<String>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the simulation thread and the network tasks.
#[derive(Debug)]
struct Shared {
    state: Mutex<SessionState>,
    incoming: Mutex<VecDeque<NetMsg>>,
    outgoing: Mutex<VecDeque<NetMsg>>,
    wake: Notify,
    player_id: Mutex<Option<PlayerId>>,
    server: Mutex<Option<ConnectResponse>>,
    ping_ms: AtomicU32,
    closing: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Connecting),
            incoming: Mutex::new(VecDeque::new()),
            outgoing: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            player_id: Mutex::new(None),
            server: Mutex::new(None),
            ping_ms: AtomicU32::new(0),
            closing: AtomicBool::new(false),
        }
    }

    fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }

    fn enqueue_out(&self, msg: NetMsg) {
        lock(&self.outgoing).push_back(msg);
        self.wake.notify_one();
    }

    fn deliver(&self, msg: NetMsg) {
        lock(&self.incoming).push_back(msg);
    }

    fn on_connected(&self, response: &ConnectResponse) {
        *lock(&self.player_id) = response.assigned_player_id;
        *lock(&self.server) = Some(response.clone());
        lock(&self.outgoing).clear();
        self.set_state(SessionState::Connected);
        // The game layer learns its (possibly new) id from this.
        self.deliver(NetMsg::ConnectResponse(response.clone()));
    }
}

/// Sockets of one successful handshake.
struct Link {
    reader: ReliableReader,
    writer: ReliableWriter,
    udp: UnreliableConn,
    response: ConnectResponse,
}

/// Why a link ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkEnd {
    /// Either side said goodbye.
    Closed,
    Lost,
}

pub struct NetworkManager {
    shared: Arc<Shared>,
    supervisor: Option<JoinHandle<()>>,
}

impl NetworkManager {
    /// Performs the handshake and starts the session tasks.
    ///
    /// A rejected handshake is returned as an error carrying the server's
    /// reason; there is no retry.
    pub async fn connect(config: NetworkConfig, params: ConnectParams) -> anyhow::Result<Self> {
        let shared = Arc::new(Shared::new());
        info!(server = %params.addr, name = %params.player_name, "Connecting");

        let link = match handshake(&config, &params).await {
            Ok(link) => link,
            Err(e) => {
                shared.set_state(SessionState::Failed(e.to_string()));
                return Err(e);
            }
        };
        shared.on_connected(&link.response);
        info!(
            player_id = ?link.response.assigned_player_id,
            server = %link.response.server_name,
            "Connected"
        );

        let supervisor = tokio::spawn(supervise(shared.clone(), config, params, link));
        Ok(Self {
            shared,
            supervisor: Some(supervisor),
        })
    }

    pub fn state(&self) -> SessionState {
        lock(&self.shared.state).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        *lock(&self.shared.player_id)
    }

    /// The last accepted `ConnectResponse`.
    pub fn server_info(&self) -> Option<ConnectResponse> {
        lock(&self.shared.server).clone()
    }

    /// Round-trip estimate from the latest keep-alive.
    pub fn ping_ms(&self) -> u32 {
        self.shared.ping_ms.load(Ordering::Relaxed)
    }

    /// Queues a message for the send loop. Dropped unless connected.
    pub fn send(&self, msg: NetMsg) {
        if !self.is_connected() {
            debug!(?msg, "Not connected, message dropped");
            return;
        }
        self.shared.enqueue_out(msg);
    }

    /// Drains every message received since the last poll. Keep-alive
    /// replies are consumed here to update the ping.
    pub fn poll(&self) -> Vec<NetMsg> {
        let drained: Vec<NetMsg> = lock(&self.shared.incoming).drain(..).collect();
        let mut out = Vec::with_capacity(drained.len());
        for msg in drained {
            match msg {
                NetMsg::KeepAlive(ka) if ka.is_response => {
                    let rtt = (now_millis() - ka.send_time).max(0) as u32;
                    self.shared.ping_ms.store(rtt, Ordering::Relaxed);
                }
                other => out.push(other),
            }
        }
        out
    }

    /// Says goodbye and stops the session. Safe to call twice.
    pub async fn disconnect(&mut self) {
        let Some(mut supervisor) = self.supervisor.take() else {
            return;
        };
        self.shared.closing.store(true, Ordering::SeqCst);
        if self.is_connected() {
            self.shared.enqueue_out(NetMsg::Disconnect {
                player_id: self.player_id(),
                reason: "Client disconnected".to_string(),
            });
            if time::timeout(DISCONNECT_FLUSH, &mut supervisor).await.is_err() {
                debug!("Disconnect flush timed out");
            }
        }
        supervisor.abort();
        self.shared.set_state(SessionState::Disconnected);
        info!("Disconnected");
    }
}

impl Drop for NetworkManager {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
    }
}

fn local_bind_for(server: SocketAddr) -> SocketAddr {
    let ip = match server.ip() {
        IpAddr::V4(ip) if ip.is_loopback() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(ip) if ip.is_loopback() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

async fn handshake(config: &NetworkConfig, params: &ConnectParams) -> anyhow::Result<Link> {
    // Bind UDP first so the request can announce its port.
    let udp = UnreliableConn::connect(local_bind_for(params.addr), params.addr).await?;
    let udp_port = udp.local_addr().context("udp local_addr")?.port();

    let mut conn = ReliableConn::connect(params.addr).await?;
    conn.send(&NetMsg::ConnectRequest(ConnectRequest {
        player_name: params.player_name.clone(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        password: params.password.clone(),
        udp_port,
    }))
    .await?;

    let envelope = conn
        .recv_timeout(config.connection_timeout())
        .await?
        .context("no ConnectResponse before timeout")?;
    let response = match envelope.msg {
        NetMsg::ConnectResponse(response) => response,
        other => anyhow::bail!("expected ConnectResponse, got {other:?}"),
    };
    if !response.success {
        let reason = response.reject_reason.unwrap_or_else(|| "Connection rejected".to_string());
        warn!(%reason, "Connection rejected");
        anyhow::bail!("connection rejected: {reason}");
    }

    let (reader, writer) = conn.into_split();
    Ok(Link {
        reader,
        writer,
        udp,
        response,
    })
}

async fn supervise(shared: Arc<Shared>, config: NetworkConfig, params: ConnectParams, mut link: Link) {
    loop {
        let end = run_link(&shared, link, config.keep_alive_interval()).await;
        if end == LinkEnd::Closed || shared.closing.load(Ordering::SeqCst) {
            shared.set_state(SessionState::Disconnected);
            return;
        }

        warn!("Connection lost, reconnecting");
        let mut next = None;
        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            shared.set_state(SessionState::Reconnecting { attempt });
            time::sleep(RECONNECT_DELAY).await;
            match handshake(&config, &params).await {
                Ok(l) => {
                    next = Some(l);
                    break;
                }
                Err(e) => warn!(attempt, error = %e, "Reconnect failed"),
            }
        }

        match next {
            Some(l) => {
                info!(player_id = ?l.response.assigned_player_id, "Reconnected");
                shared.on_connected(&l.response);
                link = l;
            }
            None => {
                warn!("Giving up, connection lost");
                shared.set_state(SessionState::Failed("Connection lost".to_string()));
                return;
            }
        }
    }
}

/// Runs the reader, datagram, sender and keep-alive loops of one link until
/// the first of them ends.
async fn run_link(shared: &Shared, link: Link, keep_alive: Duration) -> LinkEnd {
    let Link {
        mut reader,
        mut writer,
        udp,
        ..
    } = link;

    let reliable_rx = async {
        loop {
            match reader.recv().await {
                Ok(envelope) => {
                    let bye = matches!(envelope.msg, NetMsg::Disconnect { .. });
                    shared.deliver(envelope.msg);
                    if bye {
                        info!("Server closed the session");
                        return LinkEnd::Closed;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Reliable receive ended");
                    return LinkEnd::Lost;
                }
            }
        }
    };

    let datagram_rx = async {
        loop {
            match udp.recv().await {
                Ok(envelope) => shared.deliver(envelope.msg),
                Err(e) => {
                    debug!(error = %e, "Datagram dropped");
                    time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    };

    let sender = async {
        loop {
            shared.wake.notified().await;
            let batch: Vec<NetMsg> = lock(&shared.outgoing).drain(..).collect();
            for msg in batch {
                let bye = matches!(msg, NetMsg::Disconnect { .. });
                match msg.channel() {
                    Channel::Reliable => {
                        if let Err(e) = writer.send(&Envelope::new(msg)).await {
                            debug!(error = %e, "Reliable send failed");
                            return LinkEnd::Lost;
                        }
                    }
                    Channel::Unreliable => {
                        if let Err(e) = udp.send(&msg).await {
                            debug!(error = %e, "Datagram not sent");
                        }
                    }
                }
                if bye {
                    let _ = writer.shutdown().await;
                    return LinkEnd::Closed;
                }
            }
        }
    };

    let keep_alive_loop = async {
        let mut interval = time::interval(keep_alive);
        loop {
            interval.tick().await;
            shared.enqueue_out(NetMsg::KeepAlive(KeepAlive::request(now_millis())));
        }
    };

    tokio::select! {
        end = reliable_rx => end,
        end = sender => end,
        // Neither of these loops returns.
        _ = datagram_rx => LinkEnd::Lost,
        _ = keep_alive_loop => LinkEnd::Lost,
    }
}
