//! Networking primitives.
//!
//! Goals:
//! - Provide a reliable (TCP) and unreliable (UDP) channel.
//! - Route each message by its priority: CRITICAL on the stream, the rest as datagrams.
//! - Keep serialization explicit (length-prefixed JSON frames, one JSON datagram per packet).
//!
//! A connection's stream has exactly one writer: [`spawn_writer`] owns the
//! write half and drains a bounded queue, so senders never interleave frames.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream, UdpSocket,
    },
    sync::mpsc,
    task::JoinHandle,
    time,
};
use tracing::debug;

use crate::message::{Envelope, NetMsg};

/// Upper bound on a single reliable frame.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Receive buffer for datagrams; larger than any packet we send.
const DATAGRAM_BUF: usize = 64 * 1024;

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, &Envelope::new(msg.clone())).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<Envelope> {
        read_frame(&mut self.stream).await
    }

    /// Receives one frame within the given timeout.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> anyhow::Result<Option<Envelope>> {
        match time::timeout(timeout, self.recv()).await {
            Ok(res) => res.map(Some),
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned read and write halves.
    pub fn into_split(self) -> (ReliableReader, ReliableWriter) {
        let (read, write) = self.stream.into_split();
        (ReliableReader { read }, ReliableWriter { write })
    }
}

/// Read half of a reliable connection.
#[derive(Debug)]
pub struct ReliableReader {
    read: OwnedReadHalf,
}

impl ReliableReader {
    pub async fn recv(&mut self) -> anyhow::Result<Envelope> {
        read_frame(&mut self.read).await
    }
}

/// Write half of a reliable connection.
#[derive(Debug)]
pub struct ReliableWriter {
    write: OwnedWriteHalf,
}

impl ReliableWriter {
    pub async fn send(&mut self, envelope: &Envelope) -> anyhow::Result<()> {
        write_frame(&mut self.write, envelope).await
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.write.shutdown().await.context("tcp shutdown")
    }
}

async fn write_frame<W>(w: &mut W, envelope: &Envelope) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(envelope).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

async fn read_frame<R>(r: &mut R) -> anyhow::Result<Envelope>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {len} bytes exceeds limit");
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    let envelope = serde_json::from_slice(&payload).context("deserialize msg")?;
    Ok(envelope)
}

/// Spawns the single writer task for a stream.
///
/// Frames are written in queue order. The task ends when every sender is
/// dropped or a write fails; a final shutdown is attempted either way.
pub fn spawn_writer(
    mut writer: ReliableWriter,
    capacity: usize,
) -> (mpsc::Sender<Envelope>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Envelope>(capacity);
    let handle = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if let Err(e) = writer.send(&envelope).await {
                debug!(error = %e, "Reliable writer stopped");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });
    (tx, handle)
}

/// Unreliable channel over UDP, connected to one peer (client side).
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UnreliableConn {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket, peer })
    }

    pub async fn send(&self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = encode_to_bytes(&Envelope::new(msg.clone()))?;
        self.socket.send(&payload).await.context("udp send")?;
        Ok(())
    }

    pub async fn recv(&self) -> anyhow::Result<Envelope> {
        let mut buf = vec![0u8; DATAGRAM_BUF];
        let n = self.socket.recv(&mut buf).await.context("udp recv")?;
        decode_from_bytes(&buf[..n])
    }

    /// Receives a datagram within the given timeout.
    pub async fn recv_timeout(&self, timeout: Duration) -> anyhow::Result<Option<Envelope>> {
        let mut buf = vec![0u8; DATAGRAM_BUF];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => Ok(Some(decode_from_bytes(&buf[..n])?)),
            Ok(Err(e)) => Err(e).context("udp recv")?,
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// Shared, unconnected datagram socket (server side).
///
/// Cheap to clone; every clone refers to the same socket.
#[derive(Debug, Clone)]
pub struct DatagramSocket {
    socket: Arc<UdpSocket>,
    max_packet_size: usize,
}

impl DatagramSocket {
    pub async fn bind(addr: SocketAddr, max_packet_size: usize) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await.context("udp bind")?;
        Ok(Self {
            socket: Arc::new(socket),
            max_packet_size,
        })
    }

    /// Non-blocking send. A full socket buffer drops the datagram; an
    /// oversized payload is refused with an error.
    pub fn try_send_to(&self, msg: &NetMsg, to: SocketAddr) -> anyhow::Result<()> {
        let payload = encode_datagram(msg, self.max_packet_size)?;
        match self.socket.try_send_to(&payload, to) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!(%to, "udp send would block, dropped");
                Ok(())
            }
            Err(e) => Err(e).context("udp send"),
        }
    }

    pub async fn send_to(&self, msg: &NetMsg, to: SocketAddr) -> anyhow::Result<()> {
        let payload = encode_datagram(msg, self.max_packet_size)?;
        self.socket.send_to(&payload, to).await.context("udp send")?;
        Ok(())
    }

    /// Receives one raw datagram. Decoding is left to the caller so a bad
    /// packet never ends a receive loop.
    pub async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await.context("udp recv")
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(envelope: &Envelope) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(envelope).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<Envelope> {
    serde_json::from_slice(b).context("deserialize")
}

/// Encodes a datagram, refusing payloads above `max_packet_size`.
pub fn encode_datagram(msg: &NetMsg, max_packet_size: usize) -> anyhow::Result<Bytes> {
    let payload = encode_to_bytes(&Envelope::new(msg.clone()))?;
    if payload.len() > max_packet_size {
        anyhow::bail!(
            "datagram of {} bytes exceeds max packet size {}",
            payload.len(),
            max_packet_size
        );
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PROTOCOL_VERSION,
        message::{ConnectRequest, EntityId, EntityUpdate},
        math::Vec3,
    };
    use std::net::{IpAddr, Ipv4Addr};

    fn connect_request() -> NetMsg {
        NetMsg::ConnectRequest(ConnectRequest {
            player_name: "frog".into(),
            protocol_version: PROTOCOL_VERSION.into(),
            password: None,
            udp_port: 4000,
        })
    }

    #[test]
    fn envelope_roundtrip_bytes() {
        let envelope = Envelope::new(connect_request());
        let bytes = encode_to_bytes(&envelope).unwrap();
        let back = decode_from_bytes(&bytes).unwrap();
        assert_eq!(envelope, back);
    }

    #[test]
    fn oversized_datagram_is_refused() {
        let update = EntityUpdate {
            entity_id: EntityId(1),
            server_tick: 1,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            forward_x: 1.0,
            forward_z: 0.0,
            animation_state: 0,
            animation_time: 0.0,
        };
        let msg = NetMsg::EntityUpdateBatch {
            updates: vec![update; 200],
        };
        assert!(encode_datagram(&msg, 1400).is_err());
        assert!(encode_datagram(&NetMsg::ServerQueryRequest, 1400).is_ok());
    }

    #[tokio::test]
    async fn frames_arrive_in_order_through_writer_task() {
        let localhost = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = ReliableListener::bind(localhost).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move { ReliableConn::connect(addr).await.unwrap() });
        let (server_side, _) = listener.accept().await.unwrap();
        let mut client = client.await.unwrap();

        let (_reader, writer) = server_side.into_split();
        let (tx, _task) = spawn_writer(writer, 8);
        for i in 0..5 {
            tx.send(Envelope::new(NetMsg::PlayerLeft {
                player_id: crate::message::PlayerId(i),
                reason: String::new(),
            }))
            .await
            .unwrap();
        }

        for i in 0..5 {
            match client.recv().await.unwrap().msg {
                NetMsg::PlayerLeft { player_id, .. } => assert_eq!(player_id.0, i),
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
