//! Two auto-balanced teams racing to a team score limit.

use frogue_shared::message::{EntityId, GameModeKind, PlayerId, TeamId, Winner, TEAM_NONE};
use tracing::debug;

use super::{creditable_killer, GameMode, ModeCore, ModeEvent, ModeSettings, ScoreBoard};
use crate::player::Players;

pub const TEAM_RED: TeamId = 1;
pub const TEAM_BLUE: TeamId = 2;

pub struct TeamDeathmatchMode {
    core: ModeCore,
    red_score: i32,
    blue_score: i32,
}

impl TeamDeathmatchMode {
    pub fn new(settings: ModeSettings) -> Self {
        Self {
            core: ModeCore::new(settings),
            red_score: 0,
            blue_score: 0,
        }
    }

    pub fn team_score(&self, team: TeamId) -> i32 {
        match team {
            TEAM_RED => self.red_score,
            TEAM_BLUE => self.blue_score,
            _ => 0,
        }
    }

    fn team_score_mut(&mut self, team: TeamId) -> Option<&mut i32> {
        match team {
            TEAM_RED => Some(&mut self.red_score),
            TEAM_BLUE => Some(&mut self.blue_score),
            _ => None,
        }
    }

    fn team_sizes(players: &Players, except: Option<PlayerId>) -> (usize, usize) {
        players
            .values()
            .filter(|p| Some(p.id()) != except)
            .fold((0, 0), |(red, blue), p| match p.team() {
                TEAM_RED => (red + 1, blue),
                TEAM_BLUE => (red, blue + 1),
                _ => (red, blue),
            })
    }
}

impl GameMode for TeamDeathmatchMode {
    fn kind(&self) -> GameModeKind {
        GameModeKind::TeamDeathmatch
    }

    fn settings(&self) -> &ModeSettings {
        &self.core.settings
    }

    fn initialize(&mut self, settings: ModeSettings) {
        *self = Self::new(settings);
    }

    fn update(&mut self, dt: f32, _players: &Players, _live_enemies: usize) -> Vec<ModeEvent> {
        let mut events = self.core.tick(dt);
        if !self.core.is_over() && self.core.time_expired() {
            let winner = match self.red_score.cmp(&self.blue_score) {
                std::cmp::Ordering::Greater => TEAM_RED,
                std::cmp::Ordering::Less => TEAM_BLUE,
                std::cmp::Ordering::Equal => TEAM_NONE,
            };
            self.core.end_game(Winner::Team(winner), "Time limit reached");
            events.extend(self.core.tick(0.0));
        }
        events
    }

    fn on_player_join(&mut self, players: &mut Players, id: PlayerId) {
        let (red, blue) = Self::team_sizes(players, Some(id));
        let team = if blue < red { TEAM_BLUE } else { TEAM_RED };
        if let Some(p) = players.get_mut(&id) {
            p.set_team(team);
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
        let victim_team = self.team_for_player(players, victim);
        let killer_team = self.team_for_player(players, killer);

        if killer_team == victim_team {
            debug!(killer = %killer, victim = %victim, "Team kill");
            if self.core.settings.friendly_fire {
                if let Some(score) = self.team_score_mut(killer_team) {
                    *score = (*score - 1).max(0);
                }
            }
            return;
        }

        if let Some(p) = players.get_mut(&killer) {
            p.add_kill();
        }
        let Some(score) = self.team_score_mut(killer_team) else {
            return;
        };
        *score += 1;
        let reached = *score;

        let limit = self.core.settings.score_limit;
        if limit > 0 && reached >= limit as i32 {
            self.core.end_game(Winner::Team(killer_team), "Score limit reached");
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

    fn score_board(&self, players: &Players) -> ScoreBoard {
        let mut board = ScoreBoard::from_players(players);
        board
            .entries
            .sort_by(|a, b| a.team.cmp(&b.team).then(b.kills.cmp(&a.kills)));
        board.team_scores = vec![(TEAM_RED, self.red_score), (TEAM_BLUE, self.blue_score)];
        board
    }

    /// Honoured only if the teams stay within one player of each other.
    fn request_team_change(&mut self, players: &mut Players, id: PlayerId, team: TeamId) -> bool {
        if team != TEAM_RED && team != TEAM_BLUE {
            return false;
        }
        let Some(current) = players.get(&id).map(|p| p.team()) else {
            return false;
        };
        if current == team {
            return false;
        }

        let (mut red, mut blue) = Self::team_sizes(players, Some(id));
        if team == TEAM_RED {
            red += 1;
        } else {
            blue += 1;
        }
        if red.abs_diff(blue) > 1 {
            return false;
        }

        if let Some(p) = players.get_mut(&id) {
            p.set_team(team);
        }
        true
    }
}
