//! `frogue_server`
//!
//! Server-side systems:
//! - Fixed timestep simulation loop
//! - Players, AI entities and the terrain they stand on
//! - Hitscan and projectile combat
//! - Pluggable game modes (cooperative, deathmatch, team deathmatch)
//! - LAN discovery responder
//!
//! Networking model:
//! - TCP: handshake, disconnect and critical state
//! - UDP: inputs, keep-alives and frequent state

pub mod combat;
pub mod connection;
pub mod discovery;
pub mod entity;
pub mod mode;
pub mod player;
pub mod server;
pub mod world;

pub use server::{bind_ephemeral, GameServer};
