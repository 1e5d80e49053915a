//! Authoritative world: terrain, entities, spawn points.

use std::collections::BTreeMap;

use frogue_shared::{
    math::Vec3,
    message::{EntityId, EntityKind, EntityUpdate, GameModeKind, PlayerId, WorldSnapshot},
    terrain::{HeightMap, TerrainHeight},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use crate::{
    entity::{MeleeAttack, ServerEntity},
    player::Players,
};

/// Distance kept between spawn points and the world edge.
pub const SPAWN_MARGIN: f32 = 10.0;
/// Spawn height above terrain.
pub const SPAWN_HEIGHT: f32 = 1.0;
/// Interest radius for entity batches.
pub const INTEREST_RADIUS: f32 = 50.0;
/// Upper bound on entities per batch, keeping datagrams under the packet limit.
pub const MAX_BATCH_ENTITIES: usize = 32;
/// Entities per `EntityUpdateBatch` datagram; five updates stay under 1400 bytes of JSON.
pub const BATCH_CHUNK: usize = 5;

/// Result of one world advance.
#[derive(Debug, Default)]
pub struct WorldTick {
    pub attacks: Vec<MeleeAttack>,
    /// Entities swept because they were flagged for removal.
    pub removed: Vec<ServerEntity>,
}

pub struct ServerWorld {
    terrain: Box<dyn TerrainHeight>,
    entities: BTreeMap<EntityId, ServerEntity>,
    next_entity_id: u32,

    spawn_points: Vec<Vec3>,
    next_spawn: usize,
    rng: StdRng,

    game_time: f32,
    level: u32,
    easiness: f32,
    seed: u64,
}

impl ServerWorld {
    /// World with terrain generated from `seed`.
    pub fn new(level: u32, easiness: f32, seed: u64) -> Self {
        Self::with_terrain(Box::new(HeightMap::generate(seed)), level, easiness, seed)
    }

    pub fn with_terrain(terrain: Box<dyn TerrainHeight>, level: u32, easiness: f32, seed: u64) -> Self {
        let (sx, sz) = terrain.size();
        let (lo_x, hi_x, mid_x) = (SPAWN_MARGIN, sx - SPAWN_MARGIN, sx * 0.5);
        let (lo_z, hi_z, mid_z) = (SPAWN_MARGIN, sz - SPAWN_MARGIN, sz * 0.5);
        let corners_and_edges = [
            (lo_x, lo_z),
            (hi_x, lo_z),
            (lo_x, hi_z),
            (hi_x, hi_z),
            (mid_x, lo_z),
            (mid_x, hi_z),
            (lo_x, mid_z),
            (hi_x, mid_z),
        ];
        let spawn_points = corners_and_edges
            .iter()
            .map(|&(x, z)| Vec3::new(x, terrain.height_at(x, z) + SPAWN_HEIGHT, z))
            .collect();

        Self {
            terrain,
            entities: BTreeMap::new(),
            next_entity_id: 1,
            spawn_points,
            next_spawn: 0,
            rng: StdRng::seed_from_u64(seed),
            game_time: 0.0,
            level,
            easiness,
            seed,
        }
    }

    /// Advances every entity: chase AI against living players, then physics.
    pub fn update(&mut self, dt: f32, players: &Players) -> WorldTick {
        self.game_time += dt;

        let targets: Vec<(PlayerId, Vec3)> = players
            .values()
            .filter(|p| !p.is_dead())
            .map(|p| (p.id(), p.position()))
            .collect();

        let mut tick = WorldTick::default();
        for entity in self.entities.values_mut() {
            if let Some(attack) = entity.think(&targets, dt) {
                tick.attacks.push(attack);
            }
            entity.update(dt, self.terrain.as_ref());
        }

        let doomed: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(_, e)| e.pending_removal())
            .map(|(&id, _)| id)
            .collect();
        for id in doomed {
            if let Some(entity) = self.entities.remove(&id) {
                tick.removed.push(entity);
            }
        }
        tick
    }

    pub fn spawn_entity(&mut self, kind: EntityKind, position: Vec3, owner: Option<PlayerId>) -> &ServerEntity {
        let id = EntityId(self.next_entity_id);
        self.next_entity_id += 1;
        debug!(entity_id = id.0, ?kind, "Entity spawned");
        self.entities
            .entry(id)
            .or_insert_with(|| ServerEntity::new(id, kind, position).with_owner(owner))
    }

    /// Removes an entity. `None` if it was already gone, so callers announce
    /// each removal once.
    pub fn remove_entity(&mut self, id: EntityId) -> Option<ServerEntity> {
        self.entities.remove(&id)
    }

    /// Next spawn point in rotation.
    pub fn spawn_point(&mut self) -> Vec3 {
        let point = self.spawn_points[self.next_spawn % self.spawn_points.len()];
        self.next_spawn = (self.next_spawn + 1) % self.spawn_points.len();
        point
    }

    pub fn random_spawn_point(&mut self) -> Vec3 {
        let idx = self.rng.gen_range(0..self.spawn_points.len());
        self.spawn_points[idx]
    }

    /// Nearby live entities for one receiver, closest first.
    pub fn create_entity_update_batch(&self, center: Vec3, server_tick: u32) -> Vec<EntityUpdate> {
        let mut nearby: Vec<(f32, &ServerEntity)> = self
            .entities
            .values()
            .filter(|e| e.is_alive())
            .map(|e| (e.position().distance_sq(center), e))
            .filter(|&(d2, _)| d2 <= INTEREST_RADIUS * INTEREST_RADIUS)
            .collect();
        nearby.sort_by(|a, b| a.0.total_cmp(&b.0));
        nearby
            .into_iter()
            .take(MAX_BATCH_ENTITIES)
            .map(|(_, e)| e.update_msg(server_tick))
            .collect()
    }

    pub fn create_world_snapshot(&self, server_tick: u32, game_mode: GameModeKind, players: &Players) -> WorldSnapshot {
        WorldSnapshot {
            server_tick,
            level_id: self.level,
            easiness: self.easiness,
            game_mode,
            game_time: self.game_time,
            players: players.values().map(|p| p.snapshot()).collect(),
            entities: self.entities.values().map(|e| e.snapshot()).collect(),
        }
    }

    pub fn live_enemy_count(&self) -> usize {
        self.entities
            .values()
            .filter(|e| e.kind().is_enemy() && e.is_alive())
            .count()
    }

    pub fn terrain(&self) -> &dyn TerrainHeight {
        self.terrain.as_ref()
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut ServerEntity> {
        self.entities.get_mut(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &ServerEntity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn game_time(&self) -> f32 {
        self.game_time
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn easiness(&self) -> f32 {
        self.easiness
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::ServerPlayer;

    fn flat_world() -> ServerWorld {
        ServerWorld::with_terrain(Box::new(HeightMap::flat(100.0, 100.0, 0.0)), 1, 1.0, 7)
    }

    #[test]
    fn spawn_points_rotate_through_eight() {
        let mut world = flat_world();
        let first = world.spawn_point();
        assert_eq!(first, Vec3::new(10.0, 1.0, 10.0));
        for _ in 0..7 {
            world.spawn_point();
        }
        assert_eq!(world.spawn_point(), first);
    }

    #[test]
    fn random_spawn_point_is_a_spawn_point() {
        let mut world = flat_world();
        let all: Vec<Vec3> = (0..8).map(|_| world.spawn_point()).collect();
        for _ in 0..20 {
            assert!(all.contains(&world.random_spawn_point()));
        }
    }

    #[test]
    fn entity_ids_are_unique_and_removal_is_once() {
        let mut world = flat_world();
        let a = world.spawn_entity(EntityKind::Zombie, Vec3::new(5.0, 0.5, 5.0), None).id();
        let b = world.spawn_entity(EntityKind::Zombie, Vec3::new(6.0, 0.5, 5.0), None).id();
        assert_ne!(a, b);
        assert!(world.remove_entity(a).is_some());
        assert!(world.remove_entity(a).is_none());
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn killed_entities_are_swept_on_update() {
        let mut world = flat_world();
        let id = world.spawn_entity(EntityKind::Frog1, Vec3::new(5.0, 0.5, 5.0), None).id();
        if let Some(e) = world.entity_mut(id) {
            e.take_damage(1000.0);
        }
        let tick = world.update(1.0 / 60.0, &Players::new());
        assert_eq!(tick.removed.len(), 1);
        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.live_enemy_count(), 0);
    }

    #[test]
    fn batch_is_filtered_by_radius_and_capped() {
        let mut world = flat_world();
        for i in 0..40 {
            world.spawn_entity(EntityKind::Npc, Vec3::new(20.0 + i as f32 * 0.1, 0.5, 20.0), None);
        }
        world.spawn_entity(EntityKind::Npc, Vec3::new(95.0, 0.5, 95.0), None);

        let batch = world.create_entity_update_batch(Vec3::new(20.0, 0.5, 20.0), 3);
        assert_eq!(batch.len(), MAX_BATCH_ENTITIES);
        assert!(batch.iter().all(|u| u.position.x < 30.0));
        assert!(batch.iter().all(|u| u.server_tick == 3));
    }

    #[test]
    fn enemies_attack_nearby_players() {
        let mut world = flat_world();
        world.spawn_entity(EntityKind::Zombie, Vec3::new(10.0, 0.5, 10.0), None);
        let mut players = Players::new();
        let mut p = ServerPlayer::new(PlayerId(1), "a");
        p.set_position(Vec3::new(11.0, 0.375, 10.0));
        players.insert(p.id(), p);

        let tick = world.update(0.1, &players);
        assert_eq!(tick.attacks.len(), 1);
        assert_eq!(tick.attacks[0].target, PlayerId(1));
    }

    #[test]
    fn snapshot_lists_everything() {
        let mut world = flat_world();
        world.spawn_entity(EntityKind::Pickup, Vec3::new(5.0, 0.5, 5.0), None);
        let mut players = Players::new();
        players.insert(PlayerId(1), ServerPlayer::new(PlayerId(1), "a"));
        let snap = world.create_world_snapshot(9, GameModeKind::Deathmatch, &players);
        assert_eq!(snap.server_tick, 9);
        assert_eq!(snap.players.len(), 1);
        assert_eq!(snap.entities.len(), 1);
        assert_eq!(snap.game_mode, GameModeKind::Deathmatch);
    }
}
