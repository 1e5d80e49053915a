//! Free-for-all: first to the kill limit wins.

use frogue_shared::message::{EntityId, GameModeKind, PlayerId, Winner};

use super::{creditable_killer, GameMode, ModeCore, ModeEvent, ModeSettings};
use crate::player::Players;

pub struct DeathmatchMode {
    core: ModeCore,
}

impl DeathmatchMode {
    pub fn new(settings: ModeSettings) -> Self {
        Self {
            core: ModeCore::new(settings),
        }
    }

    /// Highest kill count; ties go to the lowest id.
    fn leader(players: &Players) -> Option<PlayerId> {
        players
            .values()
            .max_by(|a, b| a.kills().cmp(&b.kills()).then(b.id().cmp(&a.id())))
            .map(|p| p.id())
    }
}

impl GameMode for DeathmatchMode {
    fn kind(&self) -> GameModeKind {
        GameModeKind::Deathmatch
    }

    fn settings(&self) -> &ModeSettings {
        &self.core.settings
    }

    fn initialize(&mut self, settings: ModeSettings) {
        self.core = ModeCore::new(settings);
    }

    fn update(&mut self, dt: f32, players: &Players, _live_enemies: usize) -> Vec<ModeEvent> {
        let mut events = self.core.tick(dt);
        if !self.core.is_over() && self.core.time_expired() {
            let winner = Self::leader(players).map_or(Winner::Nobody, Winner::Player);
            self.core.end_game(winner, "Time limit reached");
            events.extend(self.core.tick(0.0));
        }
        events
    }

    fn on_player_join(&mut self, players: &mut Players, id: PlayerId) {
        if let Some(p) = players.get_mut(&id) {
            p.set_team(id.0);
        }
    }

    fn on_player_leave(&mut self, _players: &mut Players, id: PlayerId) {
        self.core.cancel_respawn(id);
    }

    fn on_entity_killed(&mut self, _players: &mut Players, _entity: EntityId, _killer: Option<PlayerId>) {}

    fn on_player_killed(&mut self, players: &mut Players, victim: PlayerId, killer: Option<PlayerId>) {
        self.core.schedule_respawn(victim);
        if self.core.is_over() {
            return;
        }

        let Some(killer) = creditable_killer(players, Some(victim), killer) else {
            return;
        };
        let Some(p) = players.get_mut(&killer) else {
            return;
        };
        p.add_kill();

        let limit = self.core.settings.score_limit;
        if limit > 0 && p.kills() >= limit {
            self.core.end_game(Winner::Player(killer), "Score limit reached");
        }
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
