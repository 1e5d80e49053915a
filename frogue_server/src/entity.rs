//! Authoritative non-player entities: enemies, NPCs, pickups.

use frogue_shared::{
    math::Vec3,
    message::{
        EntityCreate, EntityId, EntityKind, EntitySnapshot, EntityUpdate, PlayerId, TeamId,
        TEAM_NONE,
    },
    terrain::TerrainHeight,
};

pub const ENTITY_GRAVITY: f32 = 20.0;
/// Height of an entity's origin above the terrain.
pub const ENTITY_GROUND_OFFSET: f32 = 0.5;
pub const ENTITY_EDGE_MARGIN: f32 = 1.0;

pub const AGGRO_RANGE: f32 = 50.0;
pub const CHASE_SPEED: f32 = 2.0;
pub const ATTACK_RANGE: f32 = 1.5;
pub const MELEE_DAMAGE: f32 = 10.0;
pub const ATTACK_COOLDOWN: f32 = 1.0;
/// Distance at which `move_towards` considers the target reached.
pub const ARRIVE_DISTANCE: f32 = 0.1;

/// Chase AI phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AiState {
    #[default]
    Idle,
    Chase,
    Attack,
}

impl AiState {
    pub fn wire_id(self) -> u32 {
        match self {
            AiState::Idle => 0,
            AiState::Chase => 1,
            AiState::Attack => 2,
        }
    }
}

/// A melee hit an entity landed this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeleeAttack {
    pub entity_id: EntityId,
    pub target: PlayerId,
    pub damage: f32,
}

/// Base health per kind.
pub fn base_health(kind: EntityKind) -> f32 {
    match kind {
        EntityKind::Zombie => 50.0,
        EntityKind::Frog1 => 30.0,
        EntityKind::Frog2 => 80.0,
        EntityKind::Npc => 100.0,
        EntityKind::Pickup | EntityKind::Projectile => 1.0,
    }
}

#[derive(Debug, Clone)]
pub struct ServerEntity {
    id: EntityId,
    kind: EntityKind,
    position: Vec3,
    velocity: Vec3,
    forward: Vec3,
    health: f32,
    team: TeamId,
    owner: Option<PlayerId>,

    ai_state: AiState,
    target: Option<PlayerId>,
    attack_cooldown: f32,
    animation_time: f32,

    pending_removal: bool,
}

impl ServerEntity {
    pub fn new(id: EntityId, kind: EntityKind, position: Vec3) -> Self {
        Self {
            id,
            kind,
            position,
            velocity: Vec3::ZERO,
            forward: Vec3::new(1.0, 0.0, 0.0),
            health: base_health(kind),
            team: TEAM_NONE,
            owner: None,
            ai_state: AiState::Idle,
            target: None,
            attack_cooldown: 0.0,
            animation_time: 0.0,
            pending_removal: false,
        }
    }

    pub fn with_owner(mut self, owner: Option<PlayerId>) -> Self {
        self.owner = owner;
        self
    }

    /// Integrates velocity and gravity, then rests on the terrain.
    pub fn update(&mut self, dt: f32, terrain: &dyn TerrainHeight) {
        self.animation_time += dt;
        self.attack_cooldown = (self.attack_cooldown - dt).max(0.0);

        self.position = self.position.mul_add(self.velocity, dt);
        self.velocity.y -= ENTITY_GRAVITY * dt;

        let ground = terrain.height_at(self.position.x, self.position.z) + ENTITY_GROUND_OFFSET;
        if self.position.y <= ground {
            self.position.y = ground;
            self.velocity.y = 0.0;
        }
        self.position.x = terrain.clamp_x(self.position.x, ENTITY_EDGE_MARGIN);
        self.position.z = terrain.clamp_z(self.position.z, ENTITY_EDGE_MARGIN);
    }

    /// Chase AI: pick the nearest living player in range, close in, and
    /// strike when adjacent.
    ///
    /// `players` holds `(id, position)` for living players only.
    pub fn think(&mut self, players: &[(PlayerId, Vec3)], dt: f32) -> Option<MeleeAttack> {
        if !self.kind.is_enemy() || !self.is_alive() {
            return None;
        }

        let nearest = players
            .iter()
            .map(|&(id, pos)| (id, pos, self.position.distance_sq(pos)))
            .filter(|&(_, _, d2)| d2 <= AGGRO_RANGE * AGGRO_RANGE)
            .min_by(|a, b| a.2.total_cmp(&b.2));

        let Some((target, target_pos, d2)) = nearest else {
            self.ai_state = AiState::Idle;
            self.target = None;
            self.velocity.x = 0.0;
            self.velocity.z = 0.0;
            return None;
        };
        self.target = Some(target);

        if d2 <= ATTACK_RANGE * ATTACK_RANGE {
            self.ai_state = AiState::Attack;
            self.velocity.x = 0.0;
            self.velocity.z = 0.0;
            if self.attack_cooldown <= 0.0 {
                self.attack_cooldown = ATTACK_COOLDOWN;
                return Some(MeleeAttack {
                    entity_id: self.id,
                    target,
                    damage: MELEE_DAMAGE,
                });
            }
            return None;
        }

        self.ai_state = AiState::Chase;
        self.move_towards(target_pos, CHASE_SPEED);
        None
    }

    /// Sets horizontal velocity towards `target`; stops once within
    /// [`ARRIVE_DISTANCE`].
    pub fn move_towards(&mut self, target: Vec3, speed: f32) {
        let mut to = target - self.position;
        to.y = 0.0;
        if to.len() <= ARRIVE_DISTANCE {
            self.velocity.x = 0.0;
            self.velocity.z = 0.0;
            return;
        }
        let dir = to.normalized();
        self.forward = dir;
        self.velocity.x = dir.x * speed;
        self.velocity.z = dir.z * speed;
    }

    /// Returns true when this hit killed the entity.
    pub fn take_damage(&mut self, damage: f32) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.health -= damage;
        if self.health <= 0.0 {
            self.health = 0.0;
            self.pending_removal = true;
            return true;
        }
        false
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0 && !self.pending_removal
    }

    pub fn pending_removal(&self) -> bool {
        self.pending_removal
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn health(&self) -> f32 {
        self.health
    }

    pub fn team(&self) -> TeamId {
        self.team
    }

    pub fn ai_state(&self) -> AiState {
        self.ai_state
    }

    pub fn target(&self) -> Option<PlayerId> {
        self.target
    }

    pub fn create_msg(&self) -> EntityCreate {
        EntityCreate {
            entity_id: self.id,
            entity_type: self.kind,
            owner_player_id: self.owner,
            position: self.position,
            rotation_y: self.forward.z.atan2(self.forward.x),
            health: self.health,
            team: self.team,
            sub_type: 0,
        }
    }

    pub fn update_msg(&self, server_tick: u32) -> EntityUpdate {
        EntityUpdate {
            entity_id: self.id,
            server_tick,
            position: self.position,
            velocity: self.velocity,
            forward_x: self.forward.x,
            forward_z: self.forward.z,
            animation_state: self.ai_state.wire_id(),
            animation_time: self.animation_time,
        }
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            entity_id: self.id,
            entity_type: self.kind,
            position: self.position,
            health: self.health,
        }
    }
}
