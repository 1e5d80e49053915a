//! Remote players.
//!
//! Other players are never simulated locally. Their position updates are
//! buffered with receipt times and rendered a fixed delay behind now,
//! interpolating between the two samples that bracket the render time.

use std::collections::VecDeque;

use frogue_shared::{
    math::{lerp, Vec3},
    message::{HealthUpdate, PlayerId, PositionUpdate, ScoreUpdate, TeamId, WeaponState, WeaponUpdate},
};

/// Samples kept per remote player.
pub const BUFFER_SIZE: usize = 20;
/// Longest time a stale sample is projected along its velocity.
pub const MAX_EXTRAPOLATION: f32 = 0.2;

/// One received position sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSnapshot {
    pub server_tick: u32,
    /// Client clock in seconds when the update arrived.
    pub received_at: f64,
    pub position: Vec3,
    pub velocity: Vec3,
    pub forward: Vec3,
    pub pitch: f32,
    pub on_ground: bool,
}

impl PositionSnapshot {
    fn from_update(update: &PositionUpdate, received_at: f64) -> Self {
        Self {
            server_tick: update.server_tick,
            received_at,
            position: update.position,
            velocity: update.velocity,
            forward: Vec3::new(update.forward_x, 0.0, update.forward_z).normalized(),
            pitch: update.pitch,
            on_ground: update.on_ground,
        }
    }
}

/// Where to draw a remote player this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub position: Vec3,
    pub forward: Vec3,
    pub pitch: f32,
}

#[derive(Debug, Clone)]
pub struct RemotePlayer {
    pub player_id: PlayerId,
    pub name: String,
    pub team: TeamId,
    pub kills: u32,
    pub deaths: u32,
    pub score: i32,
    pub health: f32,
    pub max_health: f32,
    pub armor: f32,
    pub is_dead: bool,
    pub active_weapon_index: u32,
    pub weapon_state: WeaponState,

    buffer: VecDeque<PositionSnapshot>,
}

impl RemotePlayer {
    pub fn new(player_id: PlayerId, name: impl Into<String>, team: TeamId, position: Vec3, now: f64) -> Self {
        let mut player = Self {
            player_id,
            name: name.into(),
            team,
            kills: 0,
            deaths: 0,
            score: 0,
            health: 100.0,
            max_health: 100.0,
            armor: 0.0,
            is_dead: false,
            active_weapon_index: 0,
            weapon_state: WeaponState::Idle,
            buffer: VecDeque::with_capacity(BUFFER_SIZE),
        };
        player.push(PositionSnapshot {
            server_tick: 0,
            received_at: now,
            position,
            velocity: Vec3::ZERO,
            forward: Vec3::new(1.0, 0.0, 0.0),
            pitch: 0.0,
            on_ground: true,
        });
        player
    }

    fn push(&mut self, snapshot: PositionSnapshot) {
        if self.buffer.len() >= BUFFER_SIZE {
            self.buffer.pop_front();
        }
        self.buffer.push_back(snapshot);
    }

    /// Buffers an update. Updates older than the newest buffered tick
    /// arrived out of order and are dropped.
    pub fn receive_position_update(&mut self, update: &PositionUpdate, received_at: f64) {
        if let Some(newest) = self.buffer.back() {
            if newest.server_tick > update.server_tick {
                return;
            }
        }
        self.push(PositionSnapshot::from_update(update, received_at));
    }

    /// Render state at `now - delay`.
    pub fn sample(&self, now: f64, delay: f32) -> Option<RenderState> {
        let render_time = now - f64::from(delay);
        let oldest = self.buffer.front()?;
        let newest = self.buffer.back()?;

        if render_time <= oldest.received_at {
            return Some(Self::at(oldest));
        }

        if render_time > newest.received_at {
            let ahead = ((render_time - newest.received_at) as f32).min(MAX_EXTRAPOLATION);
            return Some(RenderState {
                position: newest.position.mul_add(newest.velocity, ahead),
                forward: newest.forward,
                pitch: newest.pitch,
            });
        }

        let (from, to) = self
            .buffer
            .iter()
            .zip(self.buffer.iter().skip(1))
            .find(|(a, b)| a.received_at <= render_time && render_time <= b.received_at)?;
        let span = to.received_at - from.received_at;
        let t = if span > 0.0 {
            ((render_time - from.received_at) / span) as f32
        } else {
            1.0
        };
        Some(RenderState {
            position: from.position.lerp(to.position, t),
            forward: from.forward.lerp(to.forward, t).normalized(),
            pitch: lerp(from.pitch, to.pitch, t.clamp(0.0, 1.0)),
        })
    }

    fn at(snapshot: &PositionSnapshot) -> RenderState {
        RenderState {
            position: snapshot.position,
            forward: snapshot.forward,
            pitch: snapshot.pitch,
        }
    }

    pub fn apply_health(&mut self, update: &HealthUpdate) {
        if update.is_dead && !self.is_dead {
            self.deaths += 1;
        }
        self.health = update.health;
        self.max_health = update.max_health;
        self.armor = update.armor;
        self.is_dead = update.is_dead;
    }

    pub fn apply_score(&mut self, update: &ScoreUpdate) {
        self.kills = update.kills;
        self.deaths = update.deaths;
        self.score = update.score;
    }

    pub fn apply_weapon(&mut self, update: &WeaponUpdate) {
        self.active_weapon_index = update.active_weapon_index;
        self.weapon_state = update.weapon_state;
    }

    /// Clears history so the next frame does not slide from the death spot.
    pub fn respawn(&mut self, position: Vec3, now: f64) {
        self.is_dead = false;
        self.health = self.max_health;
        let tick = self.buffer.back().map_or(0, |s| s.server_tick);
        self.buffer.clear();
        self.push(PositionSnapshot {
            server_tick: tick,
            received_at: now,
            position,
            velocity: Vec3::ZERO,
            forward: Vec3::new(1.0, 0.0, 0.0),
            pitch: 0.0,
            on_ground: true,
        });
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(tick: u32, x: f32, vx: f32) -> PositionUpdate {
        PositionUpdate {
            player_id: PlayerId(2),
            server_tick: tick,
            last_processed_input: 0,
            position: Vec3::new(x, 0.0, 0.0),
            velocity: Vec3::new(vx, 0.0, 0.0),
            forward_x: 1.0,
            forward_z: 0.0,
            pitch: 0.0,
            on_ground: true,
        }
    }

    fn player() -> RemotePlayer {
        let mut p = RemotePlayer::new(PlayerId(2), "remote", 0, Vec3::ZERO, 0.0);
        p.receive_position_update(&update(1, 0.0, 100.0), 0.0);
        p.receive_position_update(&update(2, 10.0, 100.0), 0.1);
        p
    }

    #[test]
    fn renders_midpoint_between_bracketing_samples() {
        let p = player();
        let r = p.sample(0.15, 0.1).unwrap();
        assert!((r.position.x - 5.0).abs() < 1e-4);
    }

    #[test]
    fn extrapolates_only_past_newest_sample() {
        let p = player();
        let at_newest = p.sample(0.2, 0.1).unwrap();
        assert!((at_newest.position.x - 10.0).abs() < 1e-4);

        let ahead = p.sample(0.25, 0.1).unwrap();
        assert!((ahead.position.x - 15.0).abs() < 1e-3);
    }

    #[test]
    fn extrapolation_is_capped() {
        let p = player();
        let far = p.sample(10.0, 0.1).unwrap();
        assert!((far.position.x - (10.0 + 100.0 * MAX_EXTRAPOLATION)).abs() < 1e-3);
    }

    #[test]
    fn buffer_is_bounded_and_ignores_stale_ticks() {
        let mut p = player();
        for tick in 3..40 {
            p.receive_position_update(&update(tick, tick as f32, 0.0), f64::from(tick) * 0.05);
        }
        assert_eq!(p.buffered(), BUFFER_SIZE);

        p.receive_position_update(&update(5, -100.0, 0.0), 100.0);
        let r = p.sample(100.0, 0.0).unwrap();
        assert!((r.position.x - 39.0).abs() < 1e-4);
    }

    #[test]
    fn respawn_resets_history() {
        let mut p = player();
        p.apply_health(&HealthUpdate {
            player_id: PlayerId(2),
            health: 0.0,
            max_health: 100.0,
            armor: 0.0,
            is_dead: true,
        });
        assert_eq!(p.deaths, 1);
        p.respawn(Vec3::new(20.0, 1.0, 20.0), 1.0);
        assert!(!p.is_dead);
        assert_eq!(p.buffered(), 1);
        assert_eq!(p.sample(1.5, 0.1).unwrap().position, Vec3::new(20.0, 1.0, 20.0));
    }
}
