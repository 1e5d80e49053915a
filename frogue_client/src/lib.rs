//! `frogue_client`
//!
//! Client-side systems:
//! - Session management (reliable + unreliable channels, reconnects)
//! - Input sampling at the fixed client input rate
//! - Prediction and reconciliation for the local player
//! - Interpolation for remote players
//! - LAN discovery

pub mod client;
pub mod discovery;
pub mod input;
pub mod network;
pub mod prediction;
pub mod remote;

pub use client::GameClient;
pub use network::{ConnectParams, NetworkManager, SessionState};
