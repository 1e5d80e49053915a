//! `frogue_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic where practical: the same inputs and seed give the same movement.
//! - One message contract ([`message::NetMsg`]) with priority-based channel routing.
//! - Movement rules live here once, so server physics and client replay cannot drift.
//! - No `unsafe`.

pub mod chat;
pub mod cheats;
pub mod config;
pub mod input;
pub mod math;
pub mod message;
pub mod movement;
pub mod net;
pub mod terrain;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::input::*;
    pub use crate::math::*;
    pub use crate::message::*;
    pub use crate::net::*;
    pub use crate::terrain::*;
}
