//! Hit resolution.
//!
//! Hitscan rays and simulated projectiles are traced against players
//! (sphere pair per body), live entities (one sphere) and terrain (ray
//! march). The closest positive-distance hit wins. Results come back as
//! [`CombatEvent`]s; kill bookkeeping is left to the caller and the game
//! mode.

use std::collections::BTreeMap;

use frogue_shared::{
    math::Vec3,
    message::{DamageType, EntityId, HitTarget, PlayerId, ProjectileHit, ProjectileSpawn, TeamId},
};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{player::Players, world::ServerWorld};

pub const HITSCAN_RANGE: f32 = 100.0;
pub const PRIMARY_DAMAGE: f32 = 25.0;
pub const PRIMARY_SPREAD: f32 = 0.05;

pub const PROJECTILE_SPEED: f32 = 20.0;
pub const PROJECTILE_DAMAGE: f32 = 50.0;
pub const PROJECTILE_LIFETIME: f32 = 5.0;
pub const PROJECTILE_GRAVITY: f32 = 9.8;
pub const EXPLOSIVE_PROJECTILE: u32 = 1;

pub const HIT_RADIUS: f32 = 0.5;
/// Heights of the two hit spheres above a player's origin.
pub const PLAYER_HIT_OFFSETS: [f32; 2] = [0.5, 1.5];
pub const TERRAIN_STEP: f32 = 0.5;

/// Closest thing a ray touched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitResult {
    pub target: HitTarget,
    pub point: Vec3,
    pub distance: f32,
}

impl HitResult {
    fn miss(origin: Vec3, direction: Vec3, max_distance: f32) -> Self {
        Self {
            target: HitTarget::None,
            point: origin.mul_add(direction, max_distance),
            distance: max_distance,
        }
    }
}

/// Who is shooting, for exclusion and friendly-fire checks.
#[derive(Debug, Clone, Copy)]
pub struct Shooter {
    pub player_id: Option<PlayerId>,
    pub team: TeamId,
    pub friendly_fire: bool,
}

impl Shooter {
    fn can_hit(&self, id: PlayerId, team: TeamId) -> bool {
        if self.player_id == Some(id) {
            return false;
        }
        self.friendly_fire || team != self.team
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CombatEvent {
    PlayerDamaged {
        victim: PlayerId,
        attacker: Option<PlayerId>,
        damage: f32,
        damage_type: DamageType,
        killed: bool,
    },
    EntityDamaged {
        entity: EntityId,
        attacker: Option<PlayerId>,
        damage: f32,
        damage_type: DamageType,
        hit_point: Vec3,
        killed: bool,
    },
    ProjectileSpawned(ProjectileSpawn),
    /// A projectile hit something or expired. Emitted once per projectile.
    ProjectileResolved(ProjectileHit),
}

/// Ray/sphere distance, preferring the entry point.
fn ray_sphere(origin: Vec3, direction: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let oc = origin - center;
    let b = oc.dot(direction);
    let c = oc.len_sq() - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    let near = -b - sq;
    if near > 0.0 {
        return Some(near);
    }
    let far = -b + sq;
    (far > 0.0).then_some(far)
}

fn terrain_march(origin: Vec3, direction: Vec3, max_distance: f32, world: &ServerWorld) -> Option<f32> {
    let terrain = world.terrain();
    let mut t = TERRAIN_STEP;
    while t <= max_distance {
        let p = origin.mul_add(direction, t);
        if p.y <= terrain.height_at(p.x, p.z) {
            return Some(t);
        }
        t += TERRAIN_STEP;
    }
    None
}

/// Traces a ray and returns the closest hit within `max_distance`.
///
/// `direction` must be normalised.
pub fn ray_trace(
    origin: Vec3,
    direction: Vec3,
    max_distance: f32,
    shooter: &Shooter,
    players: &Players,
    world: &ServerWorld,
) -> HitResult {
    let mut best: Option<(f32, HitTarget)> = None;
    let mut consider = |t: f32, target: HitTarget| {
        if t > 0.0 && t <= max_distance && best.map_or(true, |(bt, _)| t < bt) {
            best = Some((t, target));
        }
    };

    for p in players.values() {
        if p.is_dead() || !shooter.can_hit(p.id(), p.team()) {
            continue;
        }
        for offset in PLAYER_HIT_OFFSETS {
            let center = p.position() + Vec3::new(0.0, offset, 0.0);
            if let Some(t) = ray_sphere(origin, direction, center, HIT_RADIUS) {
                consider(t, HitTarget::Player(p.id()));
            }
        }
    }

    for e in world.entities().filter(|e| e.is_alive()) {
        if let Some(t) = ray_sphere(origin, direction, e.position(), HIT_RADIUS) {
            consider(t, HitTarget::Entity(e.id()));
        }
    }

    if let Some(t) = terrain_march(origin, direction, max_distance, world) {
        consider(t, HitTarget::Terrain);
    }

    match best {
        Some((distance, target)) => HitResult {
            target,
            point: origin.mul_add(direction, distance),
            distance,
        },
        None => HitResult::miss(origin, direction, max_distance),
    }
}

/// Applies damage to whatever `hit` names and reports it.
fn apply_hit(
    hit: &HitResult,
    attacker: Option<PlayerId>,
    damage: f32,
    damage_type: DamageType,
    players: &mut Players,
    world: &mut ServerWorld,
) -> Option<CombatEvent> {
    match hit.target {
        HitTarget::Player(victim) => {
            let player = players.get_mut(&victim)?;
            let killed = player.take_damage(damage);
            Some(CombatEvent::PlayerDamaged {
                victim,
                attacker,
                damage,
                damage_type,
                killed,
            })
        }
        HitTarget::Entity(entity) => {
            let target = world.entity_mut(entity)?;
            let killed = target.take_damage(damage);
            Some(CombatEvent::EntityDamaged {
                entity,
                attacker,
                damage,
                damage_type,
                hit_point: hit.point,
                killed,
            })
        }
        HitTarget::Terrain | HitTarget::None => None,
    }
}

#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: u32,
    pub owner: PlayerId,
    pub shooter: Shooter,
    pub position: Vec3,
    pub velocity: Vec3,
    pub damage: f32,
    pub projectile_type: u32,
    pub age: f32,
}

pub struct CombatHandler {
    projectiles: BTreeMap<u32, Projectile>,
    next_projectile_id: u32,
    rng: StdRng,
}

impl CombatHandler {
    pub fn new(seed: u64) -> Self {
        Self {
            projectiles: BTreeMap::new(),
            next_projectile_id: 1,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn apply_spread(&mut self, direction: Vec3, spread: f32) -> Vec3 {
        if spread <= 0.0 {
            return direction.normalized();
        }
        let jitter = Vec3::new(
            self.rng.gen_range(-0.5..=0.5) * spread,
            self.rng.gen_range(-0.25..=0.25) * spread,
            self.rng.gen_range(-0.5..=0.5) * spread,
        );
        (direction + jitter).normalized()
    }

    /// Fires one hitscan ray and applies its damage.
    #[allow(clippy::too_many_arguments)]
    pub fn fire_hitscan(
        &mut self,
        shooter: Shooter,
        origin: Vec3,
        direction: Vec3,
        spread: f32,
        damage: f32,
        range: f32,
        players: &mut Players,
        world: &mut ServerWorld,
    ) -> (HitResult, Option<CombatEvent>) {
        let direction = self.apply_spread(direction, spread);
        let hit = ray_trace(origin, direction, range, &shooter, players, world);
        let event = apply_hit(&hit, shooter.player_id, damage, DamageType::Bullet, players, world);
        (hit, event)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn spawn_projectile(
        &mut self,
        owner: PlayerId,
        shooter: Shooter,
        start: Vec3,
        direction: Vec3,
        speed: f32,
        damage: f32,
        projectile_type: u32,
    ) -> CombatEvent {
        let id = self.next_projectile_id;
        self.next_projectile_id += 1;
        let direction = direction.normalized();
        self.projectiles.insert(
            id,
            Projectile {
                id,
                owner,
                shooter,
                position: start,
                velocity: direction * speed,
                damage,
                projectile_type,
                age: 0.0,
            },
        );
        CombatEvent::ProjectileSpawned(ProjectileSpawn {
            projectile_id: id,
            owner_player_id: owner,
            start,
            direction,
            speed,
            damage,
            projectile_type,
        })
    }

    /// Advances every projectile one tick and resolves the ones that hit
    /// or outlived [`PROJECTILE_LIFETIME`].
    pub fn update(&mut self, dt: f32, players: &mut Players, world: &mut ServerWorld) -> Vec<CombatEvent> {
        let mut events = Vec::new();
        let mut finished = Vec::new();

        for p in self.projectiles.values_mut() {
            let last = p.position;
            p.position = p.position.mul_add(p.velocity, dt);
            p.velocity.y -= PROJECTILE_GRAVITY * dt;
            p.age += dt;

            let step = p.position - last;
            let step_len = step.len();
            let hit = if step_len > 0.0 {
                let hit = ray_trace(last, step * (1.0 / step_len), step_len, &p.shooter, players, world);
                (hit.target != HitTarget::None).then_some(hit)
            } else {
                None
            };

            match hit {
                Some(hit) => {
                    let damage_type = if p.projectile_type == EXPLOSIVE_PROJECTILE {
                        DamageType::Explosion
                    } else {
                        DamageType::Bullet
                    };
                    if let Some(ev) = apply_hit(&hit, p.shooter.player_id, p.damage, damage_type, players, world) {
                        events.push(ev);
                    }
                    events.push(CombatEvent::ProjectileResolved(ProjectileHit {
                        projectile_id: p.id,
                        hit_point: hit.point,
                        target: hit.target,
                    }));
                    finished.push(p.id);
                }
                None if p.age >= PROJECTILE_LIFETIME => {
                    events.push(CombatEvent::ProjectileResolved(ProjectileHit {
                        projectile_id: p.id,
                        hit_point: p.position,
                        target: HitTarget::None,
                    }));
                    finished.push(p.id);
                }
                None => {}
            }
        }

        for id in finished {
            self.projectiles.remove(&id);
        }
        events
    }

    pub fn projectile_count(&self) -> usize {
        self.projectiles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::ServerPlayer;
    use frogue_shared::{
        message::{EntityKind, TEAM_NONE},
        terrain::TerrainHeight,
    };

    /// Flat ground at 0 that rises to a wall from `wall_x` onwards.
    struct Wall {
        wall_x: f32,
    }

    impl TerrainHeight for Wall {
        fn height_at(&self, x: f32, _z: f32) -> f32 {
            if x >= self.wall_x {
                20.0
            } else {
                0.0
            }
        }

        fn size(&self) -> (f32, f32) {
            (200.0, 200.0)
        }
    }

    fn world_with_wall(wall_x: f32) -> ServerWorld {
        ServerWorld::with_terrain(Box::new(Wall { wall_x }), 1, 1.0, 1)
    }

    fn shooter(id: u32, team: TeamId, friendly_fire: bool) -> Shooter {
        Shooter {
            player_id: Some(PlayerId(id)),
            team,
            friendly_fire,
        }
    }

    fn add_player(players: &mut Players, id: u32, pos: Vec3, team: TeamId) {
        let mut p = ServerPlayer::new(PlayerId(id), format!("p{id}"));
        p.set_position(pos);
        p.set_team(team);
        players.insert(p.id(), p);
    }

    const ORIGIN: Vec3 = Vec3::new(10.0, 1.0, 10.0);
    const EAST: Vec3 = Vec3::new(1.0, 0.0, 0.0);

    // =============================================================================
    // Ray tracing
    // =============================================================================

    #[test]
    fn closest_hit_wins_player_entity_terrain() {
        let mut world = world_with_wall(ORIGIN.x + 50.0);
        world.spawn_entity(EntityKind::Zombie, Vec3::new(ORIGIN.x + 10.0, 1.0, 10.0), None);
        let mut players = Players::new();
        add_player(&mut players, 1, Vec3::new(ORIGIN.x - 1.0, 0.5, 10.0), TEAM_NONE);
        add_player(&mut players, 2, Vec3::new(ORIGIN.x + 5.0, 0.5, 10.0), TEAM_NONE);

        let hit = ray_trace(ORIGIN, EAST, HITSCAN_RANGE, &shooter(1, TEAM_NONE, true), &players, &world);
        assert_eq!(hit.target, HitTarget::Player(PlayerId(2)));
        assert!((hit.distance - 4.5).abs() < 1e-4);
    }

    #[test]
    fn entity_then_terrain_when_nearer_targets_are_absent() {
        let mut world = world_with_wall(ORIGIN.x + 50.0);
        let zombie = world
            .spawn_entity(EntityKind::Zombie, Vec3::new(ORIGIN.x + 10.0, 1.0, 10.0), None)
            .id();
        let players = Players::new();
        let s = shooter(1, TEAM_NONE, true);

        let hit = ray_trace(ORIGIN, EAST, HITSCAN_RANGE, &s, &players, &world);
        assert_eq!(hit.target, HitTarget::Entity(zombie));

        world.remove_entity(zombie);
        let hit = ray_trace(ORIGIN, EAST, HITSCAN_RANGE, &s, &players, &world);
        assert_eq!(hit.target, HitTarget::Terrain);
        assert!((hit.distance - 50.0).abs() < TERRAIN_STEP + 1e-4);
    }

    #[test]
    fn miss_reports_none_at_max_range() {
        let world = world_with_wall(1000.0);
        let hit = ray_trace(ORIGIN, EAST, 30.0, &shooter(1, TEAM_NONE, true), &Players::new(), &world);
        assert_eq!(hit.target, HitTarget::None);
        assert_eq!(hit.distance, 30.0);
    }

    #[test]
    fn teammates_are_transparent_without_friendly_fire() {
        let world = world_with_wall(1000.0);
        let mut players = Players::new();
        add_player(&mut players, 2, Vec3::new(ORIGIN.x + 5.0, 0.5, 10.0), 1);
        add_player(&mut players, 3, Vec3::new(ORIGIN.x + 8.0, 0.5, 10.0), 2);

        let hit = ray_trace(ORIGIN, EAST, HITSCAN_RANGE, &shooter(1, 1, false), &players, &world);
        assert_eq!(hit.target, HitTarget::Player(PlayerId(3)));

        let hit = ray_trace(ORIGIN, EAST, HITSCAN_RANGE, &shooter(1, 1, true), &players, &world);
        assert_eq!(hit.target, HitTarget::Player(PlayerId(2)));
    }

    #[test]
    fn dead_players_are_skipped() {
        let world = world_with_wall(1000.0);
        let mut players = Players::new();
        add_player(&mut players, 2, Vec3::new(ORIGIN.x + 5.0, 0.5, 10.0), TEAM_NONE);
        if let Some(p) = players.get_mut(&PlayerId(2)) {
            p.take_damage(1000.0);
        }
        let hit = ray_trace(ORIGIN, EAST, HITSCAN_RANGE, &shooter(1, TEAM_NONE, true), &players, &world);
        assert_eq!(hit.target, HitTarget::None);
    }

    // =============================================================================
    // Hitscan and projectiles
    // =============================================================================

    #[test]
    fn hitscan_without_spread_damages_target() {
        let mut world = world_with_wall(1000.0);
        let mut players = Players::new();
        add_player(&mut players, 2, Vec3::new(ORIGIN.x + 5.0, 0.5, 10.0), TEAM_NONE);
        let mut combat = CombatHandler::new(3);

        let (hit, event) = combat.fire_hitscan(
            shooter(1, TEAM_NONE, true),
            ORIGIN,
            EAST,
            0.0,
            PRIMARY_DAMAGE,
            HITSCAN_RANGE,
            &mut players,
            &mut world,
        );
        assert_eq!(hit.target, HitTarget::Player(PlayerId(2)));
        assert_eq!(
            event,
            Some(CombatEvent::PlayerDamaged {
                victim: PlayerId(2),
                attacker: Some(PlayerId(1)),
                damage: PRIMARY_DAMAGE,
                damage_type: DamageType::Bullet,
                killed: false,
            })
        );
        assert_eq!(players[&PlayerId(2)].health(), 75.0);
    }

    #[test]
    fn spread_stays_near_aim() {
        let mut combat = CombatHandler::new(11);
        for _ in 0..100 {
            let dir = combat.apply_spread(EAST, PRIMARY_SPREAD);
            assert!((dir.len() - 1.0).abs() < 1e-5);
            assert!(dir.dot(EAST) > 0.99);
        }
    }

    #[test]
    fn projectile_hits_entity_once() {
        let mut world = world_with_wall(1000.0);
        let zombie = world
            .spawn_entity(EntityKind::Zombie, Vec3::new(ORIGIN.x + 3.0, 1.0, 10.0), None)
            .id();
        let mut players = Players::new();
        let mut combat = CombatHandler::new(1);
        combat.spawn_projectile(
            PlayerId(1),
            shooter(1, TEAM_NONE, true),
            ORIGIN,
            EAST,
            PROJECTILE_SPEED,
            PROJECTILE_DAMAGE,
            EXPLOSIVE_PROJECTILE,
        );

        let mut resolved = 0;
        let mut killed = false;
        for _ in 0..60 {
            for ev in combat.update(1.0 / 60.0, &mut players, &mut world) {
                match ev {
                    CombatEvent::ProjectileResolved(hit) => {
                        resolved += 1;
                        assert_eq!(hit.target, HitTarget::Entity(zombie));
                    }
                    CombatEvent::EntityDamaged {
                        damage_type,
                        killed: k,
                        ..
                    } => {
                        assert_eq!(damage_type, DamageType::Explosion);
                        killed = k;
                    }
                    other => panic!("unexpected {other:?}"),
                }
            }
        }
        assert_eq!(resolved, 1);
        assert!(killed);
        assert_eq!(combat.projectile_count(), 0);
    }

    #[test]
    fn projectile_expires_once_after_lifetime() {
        let mut world = world_with_wall(1000.0);
        let mut players = Players::new();
        let mut combat = CombatHandler::new(1);
        // Straight up: nothing to hit until gravity brings it back below
        // the lifetime horizon.
        combat.spawn_projectile(
            PlayerId(1),
            shooter(1, TEAM_NONE, true),
            Vec3::new(50.0, 5.0, 50.0),
            Vec3::Y,
            30.0,
            PROJECTILE_DAMAGE,
            EXPLOSIVE_PROJECTILE,
        );

        let mut expired = Vec::new();
        for _ in 0..(PROJECTILE_LIFETIME * 60.0) as usize + 10 {
            for ev in combat.update(1.0 / 60.0, &mut players, &mut world) {
                if let CombatEvent::ProjectileResolved(hit) = ev {
                    expired.push(hit);
                }
            }
        }
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].target, HitTarget::None);
    }
}
