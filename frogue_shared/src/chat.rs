//! Chat relay helpers.
//!
//! The server stamps sender identity, limits how fast each connection may
//! talk and truncates overlong text before relaying.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Longest relayed message, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 256;

/// Messages allowed per [`CHAT_WINDOW`].
pub const CHAT_BURST: usize = 5;
pub const CHAT_WINDOW: Duration = Duration::from_secs(10);

/// Sliding-window limiter over the send times of recent messages.
#[derive(Debug, Clone)]
pub struct ChatLimiter {
    sent: VecDeque<Instant>,
    burst: usize,
    window: Duration,
}

impl ChatLimiter {
    pub fn new(burst: usize, window: Duration) -> Self {
        Self {
            sent: VecDeque::with_capacity(burst),
            burst,
            window,
        }
    }

    /// Spends one slot at `now`. False when the window is already full.
    pub fn try_send(&mut self, now: Instant) -> bool {
        self.expire(now);
        if self.sent.len() >= self.burst {
            return false;
        }
        self.sent.push_back(now);
        true
    }

    /// Slots left at `now`.
    pub fn remaining(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.burst - self.sent.len()
    }

    fn expire(&mut self, now: Instant) {
        while self
            .sent
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= self.window)
        {
            self.sent.pop_front();
        }
    }
}

impl Default for ChatLimiter {
    fn default() -> Self {
        Self::new(CHAT_BURST, CHAT_WINDOW)
    }
}

/// Trims whitespace and truncates to [`MAX_MESSAGE_LENGTH`] characters.
/// Blank messages are dropped.
pub fn sanitize(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_MESSAGE_LENGTH).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlong_text_is_cut_on_char_boundaries() {
        let clean = sanitize(&"é".repeat(MAX_MESSAGE_LENGTH + 3)).unwrap();
        assert_eq!(clean.chars().count(), MAX_MESSAGE_LENGTH);
    }

    #[test]
    fn blank_text_is_dropped() {
        assert_eq!(sanitize("   \n"), None);
        assert_eq!(sanitize("  gg  ").as_deref(), Some("gg"));
    }

    #[test]
    fn burst_then_refill() {
        let start = Instant::now();
        let mut limiter = ChatLimiter::new(2, Duration::from_secs(1));
        assert!(limiter.try_send(start));
        assert!(limiter.try_send(start + Duration::from_millis(100)));
        assert!(!limiter.try_send(start + Duration::from_millis(200)));
        assert_eq!(limiter.remaining(start + Duration::from_millis(200)), 0);

        // The first slot frees exactly one window after it was spent.
        assert!(limiter.try_send(start + Duration::from_secs(1)));
        assert!(!limiter.try_send(start + Duration::from_millis(1050)));
        assert_eq!(limiter.remaining(start + Duration::from_millis(1100)), 1);
    }

    #[test]
    fn default_allows_a_full_burst() {
        let now = Instant::now();
        let mut limiter = ChatLimiter::default();
        assert!((0..CHAT_BURST).all(|_| limiter.try_send(now)));
        assert!(!limiter.try_send(now));
    }
}
