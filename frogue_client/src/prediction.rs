//! Client-side prediction and server reconciliation.
//!
//! Every input is applied locally the moment it is captured and kept until
//! the server acknowledges its sequence. An authoritative `PositionUpdate`
//! is replayed forward through the unacknowledged inputs with the same
//! movement rules the server runs; the gap to the local position is then
//! blended away, or snapped when it is too large to be jitter.

use std::collections::VecDeque;

use frogue_shared::{
    input::InputSnapshot,
    math::Vec3,
    message::PositionUpdate,
    movement::{simulate, MoveState},
    terrain::TerrainHeight,
};
use tracing::{debug, trace};

/// Unacknowledged inputs kept before the oldest is discarded.
pub const HISTORY_CAPACITY: usize = 128;
/// Errors at or below this are left alone.
pub const CORRECTION_THRESHOLD: f32 = 0.5;
/// Errors above this are a desync and snap immediately.
pub const SNAP_THRESHOLD: f32 = 3.0;
/// Fraction of the remaining correction applied per second.
pub const CORRECTION_SPEED: f32 = 10.0;
const CORRECTION_DONE_SQ: f32 = 0.0001;

/// What a reconciliation decided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciliation {
    InSync,
    /// Blending towards the corrected position over the next frames.
    Correcting { error: f32 },
    Snapped { error: f32 },
    /// Prediction is off; the server state was mirrored.
    Mirrored,
}

#[derive(Debug)]
pub struct PredictionManager {
    enabled: bool,
    can_air_jump: bool,
    state: MoveState,
    history: VecDeque<InputSnapshot>,
    last_acknowledged: u32,
    correction: Vec3,
}

impl PredictionManager {
    pub fn new(position: Vec3, enabled: bool) -> Self {
        Self {
            enabled,
            can_air_jump: false,
            state: MoveState::new(position),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            last_acknowledged: 0,
            correction: Vec3::ZERO,
        }
    }

    /// Applies `input` locally (when enabled), stamps the predicted state on
    /// it and records it. Returns the stamped snapshot for sending.
    pub fn predict(&mut self, mut input: InputSnapshot, terrain: &dyn TerrainHeight) -> InputSnapshot {
        if self.enabled {
            simulate(&mut self.state, &input, terrain, self.can_air_jump);
        }
        input.predicted_position = self.state.position;
        input.predicted_velocity = self.state.velocity;

        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(input);
        input
    }

    /// Rebuilds the predicted position from an authoritative update.
    pub fn reconcile(&mut self, update: &PositionUpdate, terrain: &dyn TerrainHeight) -> Reconciliation {
        self.last_acknowledged = self.last_acknowledged.max(update.last_processed_input);
        let acked = self.last_acknowledged;
        while self.history.front().is_some_and(|i| i.sequence <= acked) {
            self.history.pop_front();
        }

        let server = MoveState {
            position: update.position,
            velocity: update.velocity,
            on_ground: update.on_ground,
        };
        if !self.enabled {
            self.state = server;
            self.correction = Vec3::ZERO;
            return Reconciliation::Mirrored;
        }

        let mut replayed = server;
        for input in &self.history {
            simulate(&mut replayed, input, terrain, self.can_air_jump);
        }

        let offset = replayed.position - self.state.position;
        let error = offset.len();
        self.state.velocity = replayed.velocity;
        self.state.on_ground = replayed.on_ground;

        trace!(acked, pending = self.history.len(), error, "Reconciled");
        if error > SNAP_THRESHOLD {
            debug!(error, "Prediction desync, snapping");
            self.state.position = replayed.position;
            self.correction = Vec3::ZERO;
            Reconciliation::Snapped { error }
        } else if error > CORRECTION_THRESHOLD {
            self.correction = offset;
            Reconciliation::Correcting { error }
        } else {
            Reconciliation::InSync
        }
    }

    /// Blends the outstanding correction into the local position.
    pub fn update(&mut self, dt: f32) {
        if self.correction.len_sq() <= CORRECTION_DONE_SQ {
            return;
        }
        let step = self.correction * (CORRECTION_SPEED * dt).min(1.0);
        self.state.position += step;
        self.correction -= step;
        if self.correction.len_sq() < CORRECTION_DONE_SQ {
            self.state.position += self.correction;
            self.correction = Vec3::ZERO;
        }
    }

    /// Forgets history and jumps to `position`, e.g. after a respawn or a
    /// new session, whose input sequences start over.
    pub fn reset(&mut self, position: Vec3) {
        self.state = MoveState::new(position);
        self.history.clear();
        self.last_acknowledged = 0;
        self.correction = Vec3::ZERO;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_air_jump(&mut self, allowed: bool) {
        self.can_air_jump = allowed;
    }

    pub fn can_air_jump(&self) -> bool {
        self.can_air_jump
    }

    pub fn position(&self) -> Vec3 {
        self.state.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.state.velocity
    }

    pub fn on_ground(&self) -> bool {
        self.state.on_ground
    }

    pub fn is_correcting(&self) -> bool {
        self.correction.len_sq() > CORRECTION_DONE_SQ
    }

    pub fn pending_inputs(&self) -> usize {
        self.history.len()
    }

    pub fn last_acknowledged(&self) -> u32 {
        self.last_acknowledged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frogue_shared::{input::InputActions, math::Vec2, message::PlayerId, terrain::HeightMap};

    fn terrain() -> HeightMap {
        HeightMap::flat(100.0, 100.0, 0.0)
    }

    fn walk(seq: u32) -> InputSnapshot {
        let mut input = InputSnapshot::new(PlayerId(1), seq);
        input.movement = Vec2::new(1.0, 0.0);
        input.delta_time = 1.0 / 30.0;
        input
    }

    fn jump(seq: u32) -> InputSnapshot {
        let mut input = walk(seq);
        input.actions = InputActions::JUMP;
        input
    }

    /// Runs inputs the way the server does and reports the result.
    fn authoritative(start: Vec3, inputs: &[InputSnapshot], terrain: &HeightMap) -> PositionUpdate {
        authoritative_with(start, inputs, terrain, false)
    }

    fn authoritative_with(start: Vec3, inputs: &[InputSnapshot], terrain: &HeightMap, air_jump: bool) -> PositionUpdate {
        let mut state = MoveState::new(start);
        for input in inputs {
            simulate(&mut state, input, terrain, air_jump);
        }
        PositionUpdate {
            player_id: PlayerId(1),
            server_tick: 10,
            last_processed_input: inputs.last().map_or(0, |i| i.sequence),
            position: state.position,
            velocity: state.velocity,
            forward_x: 1.0,
            forward_z: 0.0,
            pitch: 0.0,
            on_ground: state.on_ground,
        }
    }

    fn start() -> Vec3 {
        Vec3::new(50.0, 0.375, 50.0)
    }

    #[test]
    fn fully_acknowledged_replay_matches_server() {
        let terrain = terrain();
        let mut p = PredictionManager::new(start(), true);
        let inputs: Vec<InputSnapshot> = (1..=10).map(walk).collect();
        for input in &inputs {
            p.predict(*input, &terrain);
        }

        let update = authoritative(start(), &inputs, &terrain);
        assert_eq!(p.reconcile(&update, &terrain), Reconciliation::InSync);
        assert_eq!(p.pending_inputs(), 0);
        assert_eq!(p.position(), update.position);
        assert!(!p.is_correcting());
    }

    #[test]
    fn unacknowledged_inputs_are_replayed() {
        let terrain = terrain();
        let mut p = PredictionManager::new(start(), true);
        let inputs: Vec<InputSnapshot> = (1..=6).map(walk).collect();
        for input in &inputs {
            p.predict(*input, &terrain);
        }
        let before = p.position();

        let update = authoritative(start(), &inputs[..3], &terrain);
        assert_eq!(p.reconcile(&update, &terrain), Reconciliation::InSync);
        assert_eq!(p.pending_inputs(), 3);
        assert!(p.position().distance(before) < 1e-4);
    }

    #[test]
    fn moderate_error_blends_in() {
        let terrain = terrain();
        let mut p = PredictionManager::new(start(), true);
        p.predict(walk(1), &terrain);

        let mut update = authoritative(start(), &[walk(1)], &terrain);
        update.position.x += 1.0;
        assert!(matches!(p.reconcile(&update, &terrain), Reconciliation::Correcting { .. }));
        assert!(p.is_correcting());

        for _ in 0..200 {
            p.update(1.0 / 60.0);
        }
        assert!(!p.is_correcting());
        assert!(p.position().distance(update.position) < 0.02);
    }

    #[test]
    fn large_error_snaps() {
        let terrain = terrain();
        let mut p = PredictionManager::new(start(), true);
        p.predict(walk(1), &terrain);

        let mut update = authoritative(start(), &[walk(1)], &terrain);
        update.position.z += 10.0;
        assert!(matches!(p.reconcile(&update, &terrain), Reconciliation::Snapped { .. }));
        assert_eq!(p.position(), update.position);
    }

    #[test]
    fn disabled_prediction_mirrors_server() {
        let terrain = terrain();
        let mut p = PredictionManager::new(start(), false);
        let stamped = p.predict(walk(1), &terrain);
        assert_eq!(stamped.predicted_position, start());

        let update = authoritative(start(), &[walk(1)], &terrain);
        assert_eq!(p.reconcile(&update, &terrain), Reconciliation::Mirrored);
        assert_eq!(p.position(), update.position);
    }

    #[test]
    fn acknowledgements_restart_after_reset() {
        let terrain = terrain();
        let mut p = PredictionManager::new(start(), true);
        let old = authoritative(start(), &(1..=300).map(walk).collect::<Vec<_>>(), &terrain);
        p.reconcile(&old, &terrain);
        assert_eq!(p.last_acknowledged(), 300);

        p.reset(start());
        assert_eq!(p.last_acknowledged(), 0);
        let inputs: Vec<InputSnapshot> = (1..=6).map(walk).collect();
        for input in &inputs {
            p.predict(*input, &terrain);
        }
        let update = authoritative(start(), &inputs[..2], &terrain);
        assert_eq!(p.reconcile(&update, &terrain), Reconciliation::InSync);
        assert_eq!(p.pending_inputs(), 4);
        assert_eq!(p.last_acknowledged(), 2);
    }

    #[test]
    fn granted_air_jump_replays_in_sync() {
        let terrain = terrain();
        // Jump, then jump again while still airborne.
        let inputs: Vec<InputSnapshot> = (1..=15)
            .map(|seq| if seq == 1 || seq == 4 { jump(seq) } else { walk(seq) })
            .collect();
        let server = authoritative_with(start(), &inputs[..5], &terrain, true);

        let mut p = PredictionManager::new(start(), true);
        p.set_air_jump(true);
        for input in &inputs {
            p.predict(*input, &terrain);
        }
        assert_eq!(p.reconcile(&server, &terrain), Reconciliation::InSync);
        assert_eq!(p.pending_inputs(), 10);

        let mut stale = PredictionManager::new(start(), true);
        for input in &inputs {
            stale.predict(*input, &terrain);
        }
        assert_ne!(stale.reconcile(&server, &terrain), Reconciliation::InSync);
    }

    #[test]
    fn history_is_bounded() {
        let terrain = terrain();
        let mut p = PredictionManager::new(start(), true);
        for seq in 1..=(HISTORY_CAPACITY as u32 + 10) {
            p.predict(walk(seq), &terrain);
        }
        assert_eq!(p.pending_inputs(), HISTORY_CAPACITY);
    }
}
