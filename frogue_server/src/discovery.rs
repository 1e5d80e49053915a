//! LAN discovery responder.
//!
//! Answers every `ServerQueryRequest` datagram on the query port with the
//! latest status published by the tick thread.

use frogue_shared::{
    message::{now_millis, NetMsg, ServerQueryResponse},
    net::{decode_from_bytes, DatagramSocket},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::debug;

pub fn spawn_query_responder(
    socket: DatagramSocket,
    status: watch::Receiver<ServerQueryResponse>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        loop {
            let (n, from) = match socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    debug!(error = %e, "Query socket recv failed");
                    continue;
                }
            };
            match decode_from_bytes(&buf[..n]) {
                Ok(envelope) if matches!(envelope.msg, NetMsg::ServerQueryRequest) => {
                    let mut response = status.borrow().clone();
                    response.timestamp = now_millis();
                    if let Err(e) = socket.send_to(&NetMsg::ServerQueryResponse(response), from).await {
                        debug!(%from, error = %e, "Query response not sent");
                    }
                }
                Ok(envelope) => debug!(%from, msg = ?envelope.msg, "Ignoring non-query datagram"),
                Err(e) => debug!(%from, error = %e, "Malformed query datagram"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use frogue_shared::net::UnreliableConn;
    use std::time::Duration;

    fn status() -> ServerQueryResponse {
        ServerQueryResponse {
            server_name: "test".into(),
            current_players: 2,
            max_players: 8,
            current_level: 1,
            game_mode: "Deathmatch".into(),
            ping: 0,
            version: "1.0.0".into(),
            password_protected: true,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn answers_query_with_published_status() -> anyhow::Result<()> {
        let socket = DatagramSocket::bind("127.0.0.1:0".parse()?, 1400).await?;
        let addr = socket.local_addr()?;
        let (tx, rx) = watch::channel(status());
        let responder = spawn_query_responder(socket, rx);

        let mut updated = status();
        updated.current_players = 3;
        tx.send_replace(updated);

        let client = UnreliableConn::connect("127.0.0.1:0".parse()?, addr).await?;
        client.send(&NetMsg::ServerQueryRequest).await?;
        let reply = client
            .recv_timeout(Duration::from_secs(2))
            .await?
            .expect("query reply");
        match reply.msg {
            NetMsg::ServerQueryResponse(r) => {
                assert_eq!(r.current_players, 3);
                assert!(r.password_protected);
                assert!(r.timestamp > 0);
            }
            other => panic!("unexpected {other:?}"),
        }

        responder.abort();
        Ok(())
    }
}
