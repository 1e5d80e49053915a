//! Input sampling.
//!
//! Device polling lives outside this crate. The game hands over an
//! [`InputIntent`] each frame and the sampler turns it into numbered
//! [`InputSnapshot`]s at the fixed client input rate.

use frogue_shared::{
    input::{InputActions, InputSnapshot},
    math::Vec2,
    message::{now_millis, PlayerId},
    movement::{clamp_pitch, forward_from_yaw},
};

/// What the player wants this frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputIntent {
    /// Forward axis in `[-1, 1]`.
    pub forward: f32,
    /// Strafe axis in `[-1, 1]`.
    pub right: f32,
    /// Radians around +Y.
    pub yaw: f32,
    /// Degrees.
    pub pitch: f32,
    pub actions: InputActions,
    pub selected_weapon: u32,
}

impl InputIntent {
    /// Movement axes with diagonal input scaled back to unit length.
    pub fn movement(self) -> Vec2 {
        let m = Vec2::new(self.forward.clamp(-1.0, 1.0), self.right.clamp(-1.0, 1.0));
        let len_sq = m.len_sq();
        if len_sq > 1.0 {
            let len = len_sq.sqrt();
            Vec2::new(m.x / len, m.y / len)
        } else {
            m
        }
    }
}

/// Assigns sequence numbers to sampled input.
#[derive(Debug, Clone, Default)]
pub struct InputSampler {
    next_sequence: u32,
}

impl InputSampler {
    pub fn new() -> Self {
        Self { next_sequence: 1 }
    }

    /// Builds the next snapshot covering `delta_time` seconds.
    pub fn sample(&mut self, player_id: PlayerId, intent: InputIntent, delta_time: f32) -> InputSnapshot {
        let sequence = self.next_sequence.max(1);
        self.next_sequence = sequence + 1;

        let mut input = InputSnapshot::new(player_id, sequence);
        input.timestamp = now_millis();
        input.movement = intent.movement();
        input.yaw = intent.yaw;
        input.pitch = clamp_pitch(intent.pitch);
        input.forward = forward_from_yaw(intent.yaw);
        input.actions = intent.actions;
        input.selected_weapon = intent.selected_weapon;
        input.delta_time = delta_time;
        input
    }

    /// Sequence the next sample will carry.
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence.max(1)
    }

    /// Restarts numbering, for a fresh session after a reconnect.
    pub fn reset(&mut self) {
        self.next_sequence = 1;
    }
}
