//! LAN server discovery.
//!
//! Sends one `ServerQueryRequest` to the query port, either as a broadcast
//! or to a single host, and collects every answer until the deadline.

use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use frogue_shared::{
    message::{now_millis, NetMsg, ServerQueryResponse},
    net::{decode_from_bytes, encode_datagram},
};
use tokio::{net::UdpSocket, time};
use tracing::{debug, info};

/// A server that answered a query.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredServer {
    /// Where the answer came from: the server's host and its query port.
    pub addr: SocketAddr,
    /// `ping` is filled from the measured round trip.
    pub info: ServerQueryResponse,
}

impl DiscoveredServer {
    /// Game address on this host. The response does not carry the game port,
    /// so callers pass the one they are configured with.
    pub fn game_addr(&self, server_port: u16) -> SocketAddr {
        SocketAddr::new(self.addr.ip(), server_port)
    }
}

/// Broadcasts a query on `query_port` and waits `timeout` for answers.
pub async fn discover_lan(query_port: u16, timeout: Duration) -> anyhow::Result<Vec<DiscoveredServer>> {
    query(SocketAddr::from((Ipv4Addr::BROADCAST, query_port)), timeout).await
}

/// Queries one address (a host or a broadcast address).
pub async fn query(target: SocketAddr, timeout: Duration) -> anyhow::Result<Vec<DiscoveredServer>> {
    let bind = if target.ip().is_loopback() {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
    } else {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    };
    let socket = UdpSocket::bind(bind).await.context("udp bind")?;
    socket.set_broadcast(true).context("enable broadcast")?;

    let sent_at = now_millis();
    let payload = encode_datagram(&NetMsg::ServerQueryRequest, 1400)?;
    socket.send_to(&payload, target).await.context("udp send query")?;

    let deadline = time::Instant::now() + timeout;
    let mut found: Vec<DiscoveredServer> = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let (n, from) = match time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                debug!(error = %e, "Discovery receive failed");
                time::sleep(Duration::from_millis(10)).await;
                continue;
            }
            Err(_) => break,
        };
        match decode_from_bytes(&buf[..n]).map(|e| e.msg) {
            Ok(NetMsg::ServerQueryResponse(mut info)) => {
                info.ping = (now_millis() - sent_at).max(0) as u32;
                if !found.iter().any(|s| s.addr == from) {
                    info!(%from, name = %info.server_name, ping = info.ping, "Server found");
                    found.push(DiscoveredServer { addr: from, info });
                }
            }
            Ok(other) => debug!(%from, msg = ?other, "Unexpected discovery reply"),
            Err(e) => debug!(%from, error = %e, "Malformed discovery reply"),
        }
    }
    Ok(found)
}
