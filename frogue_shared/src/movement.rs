//! Player movement rules.
//!
//! The server applies these to authoritative players and the client replays
//! them during reconciliation. Any change here changes both sides at once.

use crate::{
    input::InputSnapshot,
    math::{Vec2, Vec3},
    terrain::TerrainHeight,
};

pub const MOVEMENT_SPEED: f32 = 4.0;
pub const JUMP_VELOCITY: f32 = 6.0;
pub const GRAVITY: f32 = -20.0;
pub const PLAYER_RADIUS: f32 = 0.375;
/// Multiple of nominal speed tolerated before a move is clamped and flagged.
pub const SPEED_TOLERANCE: f32 = 1.5;
pub const MIN_INPUT_DELTA: f32 = 0.001;
pub const MAX_INPUT_DELTA: f32 = 0.1;
pub const MAX_PITCH: f32 = 90.0;

/// Physics state touched by movement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub on_ground: bool,
}

impl MoveState {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            on_ground: true,
        }
    }
}

/// What one input did to the move state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveOutcome {
    /// Clamped delta actually simulated.
    pub delta: f32,
    /// The requested horizontal speed exceeded the tolerance.
    pub speed_violation: bool,
}

pub fn clamp_delta(dt: f32) -> f32 {
    dt.clamp(MIN_INPUT_DELTA, MAX_INPUT_DELTA)
}

pub fn clamp_pitch(pitch: f32) -> f32 {
    pitch.clamp(-MAX_PITCH, MAX_PITCH)
}

/// Unit forward vector on the ground plane for a yaw in radians.
pub fn forward_from_yaw(yaw: f32) -> Vec3 {
    Vec3::new(yaw.cos(), 0.0, yaw.sin()).normalized()
}

/// Horizontal velocity requested by `movement` relative to `forward`.
///
/// Returns the velocity and whether it had to be clamped. Honest clients
/// send intents of length at most 1, which never trips the clamp.
pub fn wish_velocity(forward: Vec3, movement: Vec2) -> (Vec3, bool) {
    let right = forward.cross(Vec3::Y);
    let wish = Vec3::new(
        movement.x * forward.x + movement.y * right.x,
        0.0,
        movement.x * forward.z + movement.y * right.z,
    ) * MOVEMENT_SPEED;

    let max_speed = MOVEMENT_SPEED * SPEED_TOLERANCE;
    if wish.len() > max_speed {
        (wish.normalized() * max_speed, true)
    } else {
        (wish, false)
    }
}

/// Integrates one input: horizontal move, gravity when airborne, then jump.
///
/// Jump sets vertical velocity that takes effect from the next step.
pub fn integrate_input(state: &mut MoveState, input: &InputSnapshot, can_air_jump: bool) -> MoveOutcome {
    let delta = clamp_delta(input.delta_time);
    let forward = forward_from_yaw(input.yaw);
    let (wish, speed_violation) = wish_velocity(forward, input.movement);

    state.position = state.position.mul_add(wish, delta);
    if !state.on_ground {
        state.velocity.y += GRAVITY * delta;
    }
    state.position = state.position.mul_add(state.velocity, delta);

    if input.jumping() && (state.on_ground || can_air_jump) {
        state.velocity.y = JUMP_VELOCITY;
        state.on_ground = false;
    }

    MoveOutcome {
        delta,
        speed_violation,
    }
}

/// Re-derives ground contact and clamps to world bounds.
///
/// A body moving upwards is never grounded, so a jump survives the settle
/// that follows it in the same tick.
pub fn settle(state: &mut MoveState, terrain: &dyn TerrainHeight) {
    let ground_y = terrain.height_at(state.position.x, state.position.z) + PLAYER_RADIUS;
    if state.position.y <= ground_y {
        state.position.y = ground_y;
        if state.velocity.y <= 0.0 {
            state.velocity.y = 0.0;
            state.on_ground = true;
        } else {
            state.on_ground = false;
        }
    } else {
        state.on_ground = false;
    }
    state.position.x = terrain.clamp_x(state.position.x, PLAYER_RADIUS);
    state.position.z = terrain.clamp_z(state.position.z, PLAYER_RADIUS);
}

/// One full client-side replay step.
pub fn simulate(state: &mut MoveState, input: &InputSnapshot, terrain: &dyn TerrainHeight, can_air_jump: bool) {
    integrate_input(state, input, can_air_jump);
    settle(state, terrain);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{input::InputActions, terrain::HeightMap};

    fn walk(yaw: f32, movement: Vec2, dt: f32) -> InputSnapshot {
        InputSnapshot {
            yaw,
            movement,
            delta_time: dt,
            ..Default::default()
        }
    }

    #[test]
    fn forward_walk_covers_speed_times_delta() {
        let mut state = MoveState::new(Vec3::new(50.0, PLAYER_RADIUS, 50.0));
        let out = integrate_input(&mut state, &walk(0.0, Vec2::new(1.0, 0.0), 0.1), false);
        assert!(!out.speed_violation);
        assert!((state.position.x - 50.4).abs() < 1e-5);
        assert!((state.position.z - 50.0).abs() < 1e-5);
    }

    #[test]
    fn oversized_intent_is_clamped_and_flagged() {
        let (wish, violation) = wish_velocity(Vec3::new(1.0, 0.0, 0.0), Vec2::new(5.0, 0.0));
        assert!(violation);
        assert!((wish.len() - MOVEMENT_SPEED * SPEED_TOLERANCE).abs() < 1e-4);
    }

    #[test]
    fn delta_is_clamped() {
        assert_eq!(clamp_delta(5.0), MAX_INPUT_DELTA);
        assert_eq!(clamp_delta(0.0), MIN_INPUT_DELTA);
        assert_eq!(clamp_pitch(120.0), 90.0);
    }

    #[test]
    fn jump_leaves_ground_and_lands_again() {
        let terrain = HeightMap::flat(100.0, 100.0, 0.0);
        let mut state = MoveState::new(Vec3::new(10.0, PLAYER_RADIUS, 10.0));
        let mut jump = walk(0.0, Vec2::ZERO, 0.05);
        jump.actions = InputActions::JUMP;
        simulate(&mut state, &jump, &terrain, false);
        assert_eq!(state.velocity.y, JUMP_VELOCITY);

        let idle = walk(0.0, Vec2::ZERO, 0.05);
        simulate(&mut state, &idle, &terrain, false);
        assert!(!state.on_ground);
        for _ in 0..40 {
            simulate(&mut state, &idle, &terrain, false);
        }
        assert!(state.on_ground);
        assert!((state.position.y - PLAYER_RADIUS).abs() < 1e-5);
    }

    #[test]
    fn settle_clamps_to_world_edge() {
        let terrain = HeightMap::flat(100.0, 100.0, 0.0);
        let mut state = MoveState::new(Vec3::new(-3.0, 0.0, 120.0));
        settle(&mut state, &terrain);
        assert_eq!(state.position.x, PLAYER_RADIUS);
        assert_eq!(state.position.z, 100.0 - PLAYER_RADIUS);
    }
}
