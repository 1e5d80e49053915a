//! Per-client session state owned by the tick thread.

use std::{collections::VecDeque, net::SocketAddr, time::Duration};

use frogue_shared::{
    chat::ChatLimiter,
    input::InputSnapshot,
    message::{Channel, Envelope, NetMsg, PlayerId},
    net::DatagramSocket,
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, trace};

/// Inputs buffered per connection before the oldest are dropped.
pub const INPUT_QUEUE_CAPACITY: usize = 32;
/// Frames buffered for the writer task before the connection is considered stalled.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Why a send could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The writer fell behind; the connection should be dropped.
    Stalled,
    /// The writer task has ended.
    Closed,
}

pub struct PlayerConnection {
    player_id: PlayerId,
    udp_peer: SocketAddr,
    outbound: mpsc::Sender<Envelope>,
    reader: Option<JoinHandle<()>>,

    inputs: VecDeque<InputSnapshot>,
    last_processed_input: u32,
    last_activity: Instant,
    ping_ms: u32,
    chat: ChatLimiter,
    speed_flagged: bool,
}

impl PlayerConnection {
    pub fn new(player_id: PlayerId, udp_peer: SocketAddr, outbound: mpsc::Sender<Envelope>) -> Self {
        Self {
            player_id,
            udp_peer,
            outbound,
            reader: None,
            inputs: VecDeque::with_capacity(INPUT_QUEUE_CAPACITY),
            last_processed_input: 0,
            last_activity: Instant::now(),
            ping_ms: 0,
            chat: ChatLimiter::default(),
            speed_flagged: false,
        }
    }

    pub fn attach_reader(&mut self, reader: JoinHandle<()>) {
        self.reader = Some(reader);
    }

    /// Queues an input, dropping the oldest when full. Inputs at or below
    /// the processed sequence are stale and ignored.
    pub fn queue_input(&mut self, input: InputSnapshot) {
        if input.sequence <= self.last_processed_input {
            trace!(player_id = %self.player_id, seq = input.sequence, "Stale input ignored");
            return;
        }
        if self.inputs.len() >= INPUT_QUEUE_CAPACITY {
            self.inputs.pop_front();
            debug!(player_id = %self.player_id, "Input queue full, dropped oldest");
        }
        self.inputs.push_back(input);
    }

    /// Takes every queued input in arrival order.
    pub fn drain_inputs(&mut self) -> Vec<InputSnapshot> {
        self.inputs.drain(..).collect()
    }

    pub fn queued_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Records a processed input. The acknowledged sequence never decreases.
    pub fn mark_processed(&mut self, sequence: u32) {
        self.last_processed_input = self.last_processed_input.max(sequence);
    }

    pub fn last_processed_input(&self) -> u32 {
        self.last_processed_input
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) >= timeout
    }

    /// Queues a frame on the reliable stream without waiting.
    pub fn send_reliable(&self, msg: &NetMsg) -> Result<(), SendError> {
        match self.outbound.try_send(Envelope::new(msg.clone())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SendError::Stalled),
            Err(TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Routes by priority: critical traffic on the stream, the rest as a datagram.
    ///
    /// Datagram failures are logged and swallowed.
    pub fn send(&self, msg: &NetMsg, udp: &DatagramSocket) -> Result<(), SendError> {
        match msg.channel() {
            Channel::Reliable => self.send_reliable(msg),
            Channel::Unreliable => {
                if let Err(e) = udp.try_send_to(msg, self.udp_peer) {
                    debug!(player_id = %self.player_id, error = %e, "Datagram not sent");
                }
                Ok(())
            }
        }
    }

    /// Records a chat message; false when rate limited.
    pub fn allow_chat(&mut self) -> bool {
        self.chat.try_send(Instant::now().into_std())
    }

    /// Returns true the first time the flag turns on, so crossings log once.
    pub fn set_speed_flag(&mut self, flagged: bool) -> bool {
        let crossed = flagged && !self.speed_flagged;
        self.speed_flagged = flagged;
        crossed
    }

    pub fn set_ping(&mut self, ping_ms: u32) {
        self.ping_ms = ping_ms;
    }

    pub fn ping_ms(&self) -> u32 {
        self.ping_ms
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn udp_peer(&self) -> SocketAddr {
        self.udp_peer
    }

    /// Drops queued state and stops the reader. The writer drains what is
    /// already queued and then shuts the stream down.
    pub fn close(mut self) {
        self.inputs.clear();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(capacity: usize) -> (PlayerConnection, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        (PlayerConnection::new(PlayerId(1), peer, tx), rx)
    }

    fn input(seq: u32) -> InputSnapshot {
        InputSnapshot::new(PlayerId(1), seq)
    }

    #[tokio::test]
    async fn queue_drops_oldest_when_full() {
        let (mut c, _rx) = conn(4);
        for seq in 1..=(INPUT_QUEUE_CAPACITY as u32 + 5) {
            c.queue_input(input(seq));
        }
        let drained = c.drain_inputs();
        assert_eq!(drained.len(), INPUT_QUEUE_CAPACITY);
        assert_eq!(drained[0].sequence, 6);
        assert_eq!(c.queued_inputs(), 0);
    }

    #[tokio::test]
    async fn processed_sequence_is_monotonic() {
        let (mut c, _rx) = conn(4);
        c.mark_processed(7);
        c.mark_processed(3);
        assert_eq!(c.last_processed_input(), 7);

        c.queue_input(input(5));
        assert_eq!(c.queued_inputs(), 0);
        c.queue_input(input(8));
        assert_eq!(c.queued_inputs(), 1);
    }

    #[tokio::test]
    async fn full_outbound_reports_stall() {
        let (c, mut rx) = conn(1);
        let msg = NetMsg::PlayerLeft {
            player_id: PlayerId(2),
            reason: "bye".into(),
        };
        assert_eq!(c.send_reliable(&msg), Ok(()));
        assert_eq!(c.send_reliable(&msg), Err(SendError::Stalled));
        assert!(rx.recv().await.is_some());

        drop(rx);
        assert_eq!(c.send_reliable(&msg), Err(SendError::Closed));
    }

    #[tokio::test]
    async fn timeout_tracks_last_activity() {
        let (mut c, _rx) = conn(1);
        let timeout = Duration::from_millis(5000);
        assert!(!c.is_timed_out(Instant::now(), timeout));
        assert!(c.is_timed_out(Instant::now() + timeout, timeout));
        c.touch();
        assert!(!c.is_timed_out(Instant::now() + Duration::from_millis(100), timeout));
    }

    #[tokio::test]
    async fn speed_flag_reports_crossings_once() {
        let (mut c, _rx) = conn(1);
        assert!(c.set_speed_flag(true));
        assert!(!c.set_speed_flag(true));
        assert!(!c.set_speed_flag(false));
        assert!(c.set_speed_flag(true));
    }
}
