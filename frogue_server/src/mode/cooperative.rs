//! Cooperative waves against AI enemies.

use frogue_shared::message::{EntityId, EntityKind, GameModeKind, ObjectiveUpdate, PlayerId, Winner};
use tracing::info;

use super::{creditable_killer, GameMode, ModeCore, ModeEvent, ModeSettings};
use crate::player::Players;

pub const COOP_TEAM: u32 = 1;
pub const FIRST_WAVE_DELAY: f32 = 10.0;
pub const WAVE_BREAK: f32 = 15.0;
const WAVE_OBJECTIVE: u32 = 1;

pub struct CooperativeMode {
    core: ModeCore,
    wave: u32,
    wave_active: bool,
    wave_size: u32,
    next_wave_in: f32,
}

impl CooperativeMode {
    pub fn new(settings: ModeSettings) -> Self {
        Self {
            core: ModeCore::new(settings),
            wave: 0,
            wave_active: false,
            wave_size: 0,
            next_wave_in: FIRST_WAVE_DELAY,
        }
    }

    pub fn wave(&self) -> u32 {
        self.wave
    }

    /// Enemies spawned for `wave` with `players` present.
    pub fn enemies_for_wave(&self, wave: u32, players: usize) -> u32 {
        let base = (5 + wave * 2) as f32 * players.max(1) as f32 * self.core.settings.difficulty;
        (base.round() as u32).max(1)
    }

    fn objective(&self, remaining: usize, completed: bool) -> ModeEvent {
        let total = self.wave_size.max(1) as f32;
        ModeEvent::Objective(ObjectiveUpdate {
            objective_id: WAVE_OBJECTIVE,
            objective_type: 0,
            progress: total - remaining as f32,
            max_progress: total,
            description: format!("Wave {} of {}", self.wave, self.core.settings.max_waves),
            completed,
        })
    }
}

impl GameMode for CooperativeMode {
    fn kind(&self) -> GameModeKind {
        GameModeKind::Cooperative
    }

    fn settings(&self) -> &ModeSettings {
        &self.core.settings
    }

    fn initialize(&mut self, settings: ModeSettings) {
        *self = Self::new(settings);
    }

    fn update(&mut self, dt: f32, players: &Players, live_enemies: usize) -> Vec<ModeEvent> {
        let mut events = self.core.tick(dt);
        if self.core.is_over() {
            return events;
        }

        if !players.is_empty() && players.values().all(|p| p.is_dead()) {
            self.core.end_game(Winner::Nobody, "All players died");
            events.extend(self.core.tick(0.0));
            return events;
        }

        if self.wave_active {
            if live_enemies == 0 {
                self.wave_active = false;
                events.push(self.objective(0, true));
                if self.wave >= self.core.settings.max_waves {
                    self.core.end_game(Winner::Players, "All waves cleared");
                    events.extend(self.core.tick(0.0));
                } else {
                    self.next_wave_in = WAVE_BREAK;
                }
            }
            return events;
        }

        if players.is_empty() {
            return events;
        }
        self.next_wave_in -= dt;
        if self.next_wave_in <= 0.0 {
            self.wave += 1;
            self.wave_size = self.enemies_for_wave(self.wave, players.len());
            self.wave_active = true;
            let entity_type = if self.wave > 5 {
                EntityKind::Frog2
            } else {
                EntityKind::Zombie
            };
            info!(wave = self.wave, count = self.wave_size, "Wave starting");
            events.push(ModeEvent::SpawnWave {
                wave: self.wave,
                count: self.wave_size,
                entity_type,
            });
            events.push(self.objective(self.wave_size as usize, false));
        }
        events
    }

    fn on_player_join(&mut self, players: &mut Players, id: PlayerId) {
        if let Some(p) = players.get_mut(&id) {
            p.set_team(COOP_TEAM);
        }
    }

    fn on_player_leave(&mut self, _players: &mut Players, id: PlayerId) {
        self.core.cancel_respawn(id);
    }

    fn on_entity_killed(&mut self, players: &mut Players, _entity: EntityId, killer: Option<PlayerId>) {
        if let Some(killer) = creditable_killer(players, None, killer) {
            if let Some(p) = players.get_mut(&killer) {
                p.add_kill();
            }
        }
    }

    fn on_player_killed(&mut self, _players: &mut Players, victim: PlayerId, _killer: Option<PlayerId>) {
        self.core.schedule_respawn(victim);
    }

    fn end_game(&mut self, winner: Winner, reason: &str) {
        self.core.end_game(winner, reason);
    }

    fn is_game_over(&self) -> bool {
        self.core.is_over()
    }

    fn winner(&self) -> Option<Winner> {
        self.core.winner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::ServerPlayer;

    fn coop() -> CooperativeMode {
        CooperativeMode::new(ModeSettings::for_kind(GameModeKind::Cooperative))
    }

    fn one_player() -> Players {
        let mut players = Players::new();
        players.insert(PlayerId(1), ServerPlayer::new(PlayerId(1), "a"));
        players
    }

    fn spawned_wave(events: &[ModeEvent]) -> Option<(u32, u32, EntityKind)> {
        events.iter().find_map(|e| match e {
            ModeEvent::SpawnWave {
                wave,
                count,
                entity_type,
            } => Some((*wave, *count, *entity_type)),
            _ => None,
        })
    }

    #[test]
    fn first_wave_after_delay() {
        let mut mode = coop();
        let players = one_player();
        assert!(spawned_wave(&mode.update(9.0, &players, 0)).is_none());
        let events = mode.update(1.5, &players, 0);
        assert_eq!(spawned_wave(&events), Some((1, 7, EntityKind::Zombie)));
    }

    #[test]
    fn wave_size_scales_with_players_and_difficulty() {
        let mut mode = coop();
        assert_eq!(mode.enemies_for_wave(1, 0), 7);
        assert_eq!(mode.enemies_for_wave(3, 2), 22);
        mode.core.settings.difficulty = 0.5;
        assert_eq!(mode.enemies_for_wave(1, 1), 4);
    }

    #[test]
    fn clearing_last_wave_is_victory() {
        let mut settings = ModeSettings::for_kind(GameModeKind::Cooperative);
        settings.max_waves = 1;
        let mut mode = CooperativeMode::new(settings);
        let players = one_player();

        mode.update(FIRST_WAVE_DELAY, &players, 0);
        assert!(mode.update(1.0, &players, 3).is_empty());
        let events = mode.update(1.0, &players, 0);
        assert!(events.contains(&ModeEvent::GameOver {
            winner: Winner::Players,
            reason: "All waves cleared".into(),
        }));
        assert!(mode.is_game_over());
    }

    #[test]
    fn all_dead_is_defeat() {
        let mut mode = coop();
        let mut players = one_player();
        if let Some(p) = players.get_mut(&PlayerId(1)) {
            p.take_damage(1000.0);
        }
        mode.on_player_killed(&mut players, PlayerId(1), None);
        let events = mode.update(0.1, &players, 0);
        assert!(events.iter().any(|e| matches!(
            e,
            ModeEvent::GameOver {
                winner: Winner::Nobody,
                ..
            }
        )));
    }

    #[test]
    fn dead_player_respawns_after_delay() {
        let mut mode = coop();
        let mut players = one_player();
        players.insert(PlayerId(2), ServerPlayer::new(PlayerId(2), "b"));
        if let Some(p) = players.get_mut(&PlayerId(2)) {
            p.take_damage(1000.0);
        }
        mode.on_player_killed(&mut players, PlayerId(2), None);
        assert!(!mode.update(4.0, &players, 0).contains(&ModeEvent::Respawn(PlayerId(2))));
        assert!(mode.update(1.0, &players, 0).contains(&ModeEvent::Respawn(PlayerId(2))));
    }

    #[test]
    fn entity_kill_credits_player() {
        let mut mode = coop();
        let mut players = one_player();
        mode.on_entity_killed(&mut players, EntityId(3), Some(PlayerId(1)));
        mode.on_entity_killed(&mut players, EntityId(4), None);
        assert_eq!(players[&PlayerId(1)].kills(), 1);
    }
}
