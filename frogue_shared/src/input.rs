//! Input snapshots.
//!
//! One [`InputSnapshot`] is captured per client simulation step while
//! connected. The client keeps it until the server acknowledges its sequence
//! number; the server applies it exactly once.

use serde::{Deserialize, Serialize};

use crate::{
    math::{Vec2, Vec3},
    message::PlayerId,
};

bitflags::bitflags! {
    /// Discrete actions held during one input step.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct InputActions: u8 {
        const JUMP = 1 << 0;
        const FIRE1 = 1 << 1;
        const FIRE2 = 1 << 2;
        const RELOAD = 1 << 3;
        const SWITCH_WEAPON = 1 << 4;
        const USE = 1 << 5;
    }
}

/// User input for one simulation step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct InputSnapshot {
    /// Owner, used to route datagrams on the shared socket.
    pub player_id: PlayerId,
    pub sequence: u32,
    pub timestamp: i64,
    /// `x` = forward axis, `y` = strafe axis, each in `[-1, 1]`.
    pub movement: Vec2,
    /// Degrees.
    pub pitch: f32,
    /// Radians around +Y.
    pub yaw: f32,
    pub forward: Vec3,
    pub actions: InputActions,
    pub selected_weapon: u32,
    /// Seconds covered by this step.
    pub delta_time: f32,

    /// Locally predicted state when the input was captured. Never sent.
    #[serde(skip)]
    pub predicted_position: Vec3,
    #[serde(skip)]
    pub predicted_velocity: Vec3,
}

impl InputSnapshot {
    pub fn new(player_id: PlayerId, sequence: u32) -> Self {
        Self {
            player_id,
            sequence,
            ..Default::default()
        }
    }

    pub fn jumping(&self) -> bool {
        self.actions.contains(InputActions::JUMP)
    }

    pub fn firing1(&self) -> bool {
        self.actions.contains(InputActions::FIRE1)
    }

    pub fn firing2(&self) -> bool {
        self.actions.contains(InputActions::FIRE2)
    }

    pub fn reloading(&self) -> bool {
        self.actions.contains(InputActions::RELOAD)
    }

    pub fn switching_weapon(&self) -> bool {
        self.actions.contains(InputActions::SWITCH_WEAPON)
    }

    pub fn using(&self) -> bool {
        self.actions.contains(InputActions::USE)
    }
}
