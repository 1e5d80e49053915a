//! Authoritative player state.
//!
//! Pure data plus per-tick update methods; no I/O. Mutated only by the tick
//! thread through [`ServerPlayer::apply_input`], [`ServerPlayer::update`] and
//! [`ServerPlayer::take_damage`].

use std::collections::BTreeMap;

use frogue_shared::{
    cheats::{Cheat, PlayerModifiers},
    input::InputSnapshot,
    math::Vec3,
    message::{
        HealthUpdate, PlayerId, PlayerJoined, PlayerSnapshot, PositionUpdate, ScoreUpdate, TeamId,
        WeaponState, WeaponUpdate, TEAM_NONE,
    },
    movement::{self, MoveState},
    terrain::TerrainHeight,
};

pub const DEFAULT_MAX_HEALTH: f32 = 100.0;
pub const MAX_ARMOR: f32 = 100.0;
pub const CLIP_SIZE: u32 = 30;
pub const DEFAULT_TOTAL_AMMO: u32 = 90;
pub const RELOAD_TIME: f32 = 1.5;
pub const EYE_HEIGHT: f32 = 1.5;
pub const KILL_SCORE: i32 = 100;
/// Accumulated seconds of speed violation before a player is flagged.
pub const SPEED_VIOLATION_LIMIT: f32 = 2.0;

/// Every connected player, iterated in id order.
pub type Players = BTreeMap<PlayerId, ServerPlayer>;

/// Side effects of one applied input that the server must act on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputEffects {
    pub fired_primary: bool,
    pub fired_secondary: bool,
    pub weapon_changed: bool,
}

#[derive(Debug, Clone)]
pub struct ServerPlayer {
    id: PlayerId,
    name: String,

    motion: MoveState,
    forward: Vec3,
    pitch: f32,

    health: f32,
    max_health: f32,
    armor: f32,
    dead: bool,

    active_weapon: u32,
    ammo_in_clip: u32,
    total_ammo: u32,
    weapon_state: WeaponState,
    reload_timer: f32,

    team: TeamId,
    kills: u32,
    deaths: u32,
    score: i32,

    speed_violation: f32,
    modifiers: PlayerModifiers,
}

impl ServerPlayer {
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            motion: MoveState::new(Vec3::ZERO),
            forward: Vec3::new(1.0, 0.0, 0.0),
            pitch: 0.0,
            health: DEFAULT_MAX_HEALTH,
            max_health: DEFAULT_MAX_HEALTH,
            armor: 0.0,
            dead: false,
            active_weapon: 0,
            ammo_in_clip: CLIP_SIZE,
            total_ammo: DEFAULT_TOTAL_AMMO,
            weapon_state: WeaponState::Idle,
            reload_timer: 0.0,
            team: TEAM_NONE,
            kills: 0,
            deaths: 0,
            score: 0,
            speed_violation: 0.0,
            modifiers: PlayerModifiers::default(),
        }
    }

    /// Applies one client input. Dead players ignore input.
    pub fn apply_input(&mut self, input: &InputSnapshot) -> InputEffects {
        let mut effects = InputEffects::default();
        if self.dead {
            return effects;
        }

        self.forward = movement::forward_from_yaw(input.yaw);
        self.pitch = movement::clamp_pitch(input.pitch);

        let outcome = movement::integrate_input(&mut self.motion, input, self.modifiers.infinite_jump());
        if outcome.speed_violation {
            self.speed_violation += outcome.delta;
        } else {
            self.speed_violation = (self.speed_violation - outcome.delta).max(0.0);
        }

        if input.switching_weapon() && input.selected_weapon != self.active_weapon {
            self.active_weapon = input.selected_weapon;
            effects.weapon_changed = true;
        }

        // A shot holds the firing phase until fire is released.
        if self.weapon_state == WeaponState::Firing && !input.firing1() && !input.firing2() {
            self.weapon_state = WeaponState::Idle;
            effects.weapon_changed = true;
        }

        let wants_fire = input.firing1() || input.firing2();
        if wants_fire && self.weapon_state == WeaponState::Idle && self.has_ammo() {
            self.weapon_state = WeaponState::Firing;
            if !self.modifiers.infinite_ammo() {
                self.ammo_in_clip -= 1;
            }
            effects.fired_primary = input.firing1();
            effects.fired_secondary = !input.firing1();
            effects.weapon_changed = true;
        }

        if input.reloading()
            && self.weapon_state == WeaponState::Idle
            && self.ammo_in_clip < CLIP_SIZE
            && (self.total_ammo > 0 || self.modifiers.infinite_ammo())
        {
            self.weapon_state = WeaponState::Reloading;
            self.reload_timer = RELOAD_TIME;
            effects.weapon_changed = true;
        }

        effects
    }

    /// Post-input physics: ground contact, world bounds, reload progress.
    ///
    /// Returns true when the weapon state changed.
    pub fn update(&mut self, dt: f32, terrain: &dyn TerrainHeight) -> bool {
        if self.dead {
            return false;
        }
        movement::settle(&mut self.motion, terrain);

        if self.weapon_state == WeaponState::Reloading {
            self.reload_timer -= dt;
            if self.reload_timer <= 0.0 {
                let needed = CLIP_SIZE - self.ammo_in_clip;
                let taken = if self.modifiers.infinite_ammo() {
                    needed
                } else {
                    needed.min(self.total_ammo)
                };
                if !self.modifiers.infinite_ammo() {
                    self.total_ammo -= taken;
                }
                self.ammo_in_clip += taken;
                self.weapon_state = WeaponState::Idle;
                return true;
            }
        }
        false
    }

    /// Applies damage after armour. Returns true if this hit killed the player.
    pub fn take_damage(&mut self, damage: f32) -> bool {
        if self.dead || self.modifiers.god_mode() {
            return false;
        }

        let mut damage = damage;
        if self.armor > 0.0 {
            let absorbed = self.armor.min(damage * 0.5);
            self.armor -= absorbed;
            damage -= absorbed;
        }

        self.health -= damage;
        if self.health <= 0.0 {
            self.health = 0.0;
            self.die();
            return true;
        }
        false
    }

    pub fn die(&mut self) {
        self.dead = true;
        self.deaths += 1;
        self.motion.velocity = Vec3::ZERO;
    }

    pub fn respawn(&mut self, position: Vec3) {
        self.motion = MoveState::new(position);
        self.health = self.modifiers.forced_health().unwrap_or(self.max_health);
        self.armor = 0.0;
        self.dead = false;
        self.weapon_state = WeaponState::Idle;
        self.reload_timer = 0.0;
        self.ammo_in_clip = CLIP_SIZE;
    }

    pub fn add_armor(&mut self, amount: f32) {
        self.armor = (self.armor + amount).min(MAX_ARMOR);
    }

    pub fn add_kill(&mut self) {
        self.kills += 1;
        self.score += KILL_SCORE;
    }

    pub fn apply_cheat(&mut self, cheat: Cheat) {
        self.modifiers.apply(cheat);
        if let Some(health) = self.modifiers.forced_health() {
            self.health = health;
        }
    }

    pub fn has_speed_violations(&self) -> bool {
        self.speed_violation > SPEED_VIOLATION_LIMIT
    }

    fn has_ammo(&self) -> bool {
        self.ammo_in_clip > 0 || self.modifiers.infinite_ammo()
    }

    /// Muzzle position for hitscan and projectiles.
    pub fn eye_position(&self) -> Vec3 {
        self.motion.position + Vec3::new(0.0, EYE_HEIGHT, 0.0)
    }

    /// View direction: forward tilted up or down by pitch.
    pub fn aim_direction(&self) -> Vec3 {
        let pitch = self.pitch.to_radians();
        (self.forward * pitch.cos() + Vec3::Y * pitch.sin()).normalized()
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> Vec3 {
        self.motion.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.motion.position = position;
    }

    pub fn velocity(&self) -> Vec3 {
        self.motion.velocity
    }

    pub fn forward(&self) -> Vec3 {
        self.forward
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn on_ground(&self) -> bool {
        self.motion.on_ground
    }

    pub fn health(&self) -> f32 {
        self.health
    }

    pub fn max_health(&self) -> f32 {
        self.max_health
    }

    pub fn armor(&self) -> f32 {
        self.armor
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn team(&self) -> TeamId {
        self.team
    }

    pub fn set_team(&mut self, team: TeamId) {
        self.team = team;
    }

    pub fn kills(&self) -> u32 {
        self.kills
    }

    pub fn deaths(&self) -> u32 {
        self.deaths
    }

    pub fn score(&self) -> i32 {
        self.score
    }

    pub fn weapon_state(&self) -> WeaponState {
        self.weapon_state
    }

    pub fn ammo_in_clip(&self) -> u32 {
        self.ammo_in_clip
    }

    pub fn modifiers(&self) -> &PlayerModifiers {
        &self.modifiers
    }

    pub fn position_update(&self, server_tick: u32, last_processed_input: u32) -> PositionUpdate {
        PositionUpdate {
            player_id: self.id,
            server_tick,
            last_processed_input,
            position: self.motion.position,
            velocity: self.motion.velocity,
            forward_x: self.forward.x,
            forward_z: self.forward.z,
            pitch: self.pitch,
            on_ground: self.motion.on_ground,
        }
    }

    pub fn health_update(&self) -> HealthUpdate {
        HealthUpdate {
            player_id: self.id,
            health: self.health,
            max_health: self.max_health,
            armor: self.armor,
            is_dead: self.dead,
        }
    }

    pub fn weapon_update(&self) -> WeaponUpdate {
        WeaponUpdate {
            player_id: self.id,
            active_weapon_index: self.active_weapon,
            ammo_in_clip: self.ammo_in_clip,
            total_ammo: self.total_ammo,
            weapon_state: self.weapon_state,
        }
    }

    pub fn score_update(&self) -> ScoreUpdate {
        ScoreUpdate {
            player_id: self.id,
            kills: self.kills,
            deaths: self.deaths,
            assists: 0,
            score: self.score,
        }
    }

    pub fn joined(&self) -> PlayerJoined {
        PlayerJoined {
            player_id: self.id,
            player_name: self.name.clone(),
            position: self.motion.position,
            team: self.team,
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            player_id: self.id,
            player_name: self.name.clone(),
            position: self.motion.position,
            health: self.health,
            team: self.team,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frogue_shared::{input::InputActions, math::Vec2, terrain::HeightMap};

    fn input(actions: InputActions) -> InputSnapshot {
        InputSnapshot {
            actions,
            delta_time: 1.0 / 60.0,
            ..Default::default()
        }
    }

    #[test]
    fn armor_absorbs_half_up_to_its_value() {
        let mut p = ServerPlayer::new(PlayerId(1), "a");
        p.add_armor(10.0);
        assert!(!p.take_damage(40.0));
        // 10 absorbed, 30 taken.
        assert_eq!(p.armor(), 0.0);
        assert_eq!(p.health(), 70.0);
    }

    #[test]
    fn lethal_damage_clamps_and_kills_once() {
        let mut p = ServerPlayer::new(PlayerId(1), "a");
        assert!(p.take_damage(150.0));
        assert_eq!(p.health(), 0.0);
        assert!(p.is_dead());
        assert_eq!(p.deaths(), 1);
        assert!(!p.take_damage(10.0));
        assert_eq!(p.deaths(), 1);
    }

    #[test]
    fn dead_player_ignores_input_until_respawn() {
        let mut p = ServerPlayer::new(PlayerId(1), "a");
        p.set_position(Vec3::new(50.0, 0.375, 50.0));
        p.take_damage(500.0);

        let mut walk = input(InputActions::empty());
        walk.movement = Vec2::new(1.0, 0.0);
        p.apply_input(&walk);
        assert_eq!(p.position(), Vec3::new(50.0, 0.375, 50.0));

        p.respawn(Vec3::new(10.0, 1.0, 10.0));
        assert!(!p.is_dead());
        assert_eq!(p.health(), DEFAULT_MAX_HEALTH);
        p.apply_input(&walk);
        assert!(p.position().x > 10.0);
    }

    #[test]
    fn god_mode_ignores_damage() {
        let mut p = ServerPlayer::new(PlayerId(1), "a");
        p.apply_cheat(Cheat::GodMode(true));
        assert!(!p.take_damage(1000.0));
        assert_eq!(p.health(), DEFAULT_MAX_HEALTH);
    }

    #[test]
    fn forced_health_applies_on_respawn() {
        let mut p = ServerPlayer::new(PlayerId(1), "a");
        p.apply_cheat(Cheat::ForcedHealth(250.0));
        assert_eq!(p.health(), 250.0);
        p.take_damage(1000.0);
        p.respawn(Vec3::ZERO);
        assert_eq!(p.health(), 250.0);
    }

    #[test]
    fn firing_consumes_ammo_and_returns_to_idle_on_release() {
        let mut p = ServerPlayer::new(PlayerId(1), "a");
        let fx = p.apply_input(&input(InputActions::FIRE1));
        assert!(fx.fired_primary);
        assert_eq!(p.ammo_in_clip(), CLIP_SIZE - 1);
        assert_eq!(p.weapon_state(), WeaponState::Firing);

        // Holding fire does not fire again.
        let fx = p.apply_input(&input(InputActions::FIRE1));
        assert!(!fx.fired_primary);

        p.apply_input(&input(InputActions::empty()));
        assert_eq!(p.weapon_state(), WeaponState::Idle);
    }

    #[test]
    fn reload_refills_clip_after_reload_time() {
        let terrain = HeightMap::flat(100.0, 100.0, 0.0);
        let mut p = ServerPlayer::new(PlayerId(1), "a");
        p.apply_input(&input(InputActions::FIRE1));
        p.apply_input(&input(InputActions::RELOAD));
        assert_eq!(p.weapon_state(), WeaponState::Reloading);

        assert!(!p.update(1.0, &terrain));
        assert!(p.update(0.6, &terrain));
        assert_eq!(p.ammo_in_clip(), CLIP_SIZE);
        assert_eq!(p.weapon_update().total_ammo, DEFAULT_TOTAL_AMMO - 1);
        assert_eq!(p.weapon_state(), WeaponState::Idle);
    }

    #[test]
    fn sustained_speed_hack_is_flagged_then_decays() {
        let mut p = ServerPlayer::new(PlayerId(1), "a");
        let mut hack = input(InputActions::empty());
        hack.movement = Vec2::new(10.0, 0.0);
        hack.delta_time = 0.1;
        for _ in 0..25 {
            p.apply_input(&hack);
        }
        assert!(p.has_speed_violations());

        let mut honest = hack;
        honest.movement = Vec2::new(1.0, 0.0);
        for _ in 0..10 {
            p.apply_input(&honest);
        }
        assert!(!p.has_speed_violations());
    }

    #[test]
    fn add_kill_scores_hundred() {
        let mut p = ServerPlayer::new(PlayerId(1), "a");
        p.add_kill();
        p.add_kill();
        assert_eq!(p.kills(), 2);
        assert_eq!(p.score(), 200);
    }
}
