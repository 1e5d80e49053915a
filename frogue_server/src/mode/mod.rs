//! Game rule state machines.
//!
//! Every rule set implements [`GameMode`]. The server owns one boxed mode and
//! feeds it joins, leaves and kills; the mode answers with [`ModeEvent`]s
//! that the server turns into spawns, respawns and broadcasts.
//!
//! The mode is the only place kills are credited. Self-kills and kills with
//! no player attacker are never credited.

mod cooperative;
mod deathmatch;
mod team_deathmatch;

use std::collections::BTreeMap;

use frogue_shared::message::{
    EntityId, EntityKind, GameModeKind, ObjectiveUpdate, PlayerId, ScoreEntry, TeamId, Winner,
};
use tracing::info;

use crate::player::Players;

pub use cooperative::CooperativeMode;
pub use deathmatch::DeathmatchMode;
pub use team_deathmatch::{TeamDeathmatchMode, TEAM_BLUE, TEAM_RED};

/// Tunables shared by every mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSettings {
    /// Seconds between death and respawn.
    pub respawn_delay: f32,
    /// `0` disables the score limit.
    pub score_limit: u32,
    /// Seconds; `0` disables the time limit.
    pub time_limit: f32,
    pub friendly_fire: bool,
    pub max_waves: u32,
    pub difficulty: f32,
}

impl ModeSettings {
    /// Canonical settings for a mode kind.
    pub fn for_kind(kind: GameModeKind) -> Self {
        match kind {
            GameModeKind::Cooperative => Self {
                respawn_delay: 5.0,
                score_limit: 0,
                time_limit: 0.0,
                friendly_fire: false,
                max_waves: 10,
                difficulty: 1.0,
            },
            GameModeKind::Deathmatch => Self {
                respawn_delay: 3.0,
                score_limit: 20,
                time_limit: 600.0,
                friendly_fire: true,
                max_waves: 0,
                difficulty: 1.0,
            },
            GameModeKind::TeamDeathmatch => Self {
                respawn_delay: 5.0,
                score_limit: 50,
                time_limit: 600.0,
                friendly_fire: false,
                max_waves: 0,
                difficulty: 1.0,
            },
        }
    }
}

/// Something the server must act on.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeEvent {
    Respawn(PlayerId),
    SpawnWave {
        wave: u32,
        count: u32,
        entity_type: EntityKind,
    },
    Objective(ObjectiveUpdate),
    GameOver {
        winner: Winner,
        reason: String,
    },
}

/// Scores derived from live player state; built fresh per query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreBoard {
    pub entries: Vec<ScoreEntry>,
    pub team_scores: Vec<(TeamId, i32)>,
}

impl ScoreBoard {
    /// Rows for every player, sorted by kills descending.
    pub fn from_players(players: &Players) -> Self {
        let mut entries: Vec<ScoreEntry> = players
            .values()
            .map(|p| ScoreEntry {
                player_id: p.id(),
                player_name: p.name().to_string(),
                kills: p.kills(),
                deaths: p.deaths(),
                score: p.score(),
                team: p.team(),
                ping: 0,
            })
            .collect();
        entries.sort_by(|a, b| b.kills.cmp(&a.kills).then(a.player_id.cmp(&b.player_id)));
        Self {
            entries,
            team_scores: Vec::new(),
        }
    }
}

/// Common rule-set contract.
pub trait GameMode: Send {
    fn kind(&self) -> GameModeKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn settings(&self) -> &ModeSettings;

    /// Resets all bookkeeping and applies new settings.
    fn initialize(&mut self, settings: ModeSettings);

    /// Advances timers. `live_enemies` counts hostile entities still alive.
    fn update(&mut self, dt: f32, players: &Players, live_enemies: usize) -> Vec<ModeEvent>;

    /// Assigns the joiner's team.
    fn on_player_join(&mut self, players: &mut Players, id: PlayerId);

    fn on_player_leave(&mut self, players: &mut Players, id: PlayerId);

    fn on_entity_killed(&mut self, players: &mut Players, entity: EntityId, killer: Option<PlayerId>);

    /// Called once per death, after the victim has died.
    fn on_player_killed(&mut self, players: &mut Players, victim: PlayerId, killer: Option<PlayerId>);

    fn on_objective_complete(&mut self, _objective_id: u32) {}

    /// Ends the game once; later calls are ignored.
    fn end_game(&mut self, winner: Winner, reason: &str);

    fn is_game_over(&self) -> bool;

    fn winner(&self) -> Option<Winner>;

    fn score_board(&self, players: &Players) -> ScoreBoard {
        ScoreBoard::from_players(players)
    }

    fn respawn_delay(&self) -> f32 {
        self.settings().respawn_delay
    }

    fn friendly_fire(&self) -> bool {
        self.settings().friendly_fire
    }

    fn score_limit(&self) -> u32 {
        self.settings().score_limit
    }

    fn time_limit(&self) -> f32 {
        self.settings().time_limit
    }

    fn team_for_player(&self, players: &Players, id: PlayerId) -> TeamId {
        players.get(&id).map(|p| p.team()).unwrap_or_default()
    }

    /// Returns true if the change was honoured.
    fn request_team_change(&mut self, _players: &mut Players, _id: PlayerId, _team: TeamId) -> bool {
        false
    }
}

/// Builds the rule set for `kind` with its canonical settings.
pub fn create_mode(kind: GameModeKind) -> Box<dyn GameMode> {
    let settings = ModeSettings::for_kind(kind);
    match kind {
        GameModeKind::Cooperative => Box::new(CooperativeMode::new(settings)),
        GameModeKind::Deathmatch => Box::new(DeathmatchMode::new(settings)),
        GameModeKind::TeamDeathmatch => Box::new(TeamDeathmatchMode::new(settings)),
    }
}

/// Bookkeeping every mode shares: clock, respawn timers, game-over latch.
#[derive(Debug, Clone)]
pub(crate) struct ModeCore {
    pub settings: ModeSettings,
    pub game_time: f32,
    respawns: BTreeMap<PlayerId, f32>,
    outcome: Option<(Winner, String)>,
    pending: Vec<ModeEvent>,
}

impl ModeCore {
    pub fn new(settings: ModeSettings) -> Self {
        Self {
            settings,
            game_time: 0.0,
            respawns: BTreeMap::new(),
            outcome: None,
            pending: Vec::new(),
        }
    }

    pub fn schedule_respawn(&mut self, id: PlayerId) {
        self.respawns.insert(id, self.settings.respawn_delay);
    }

    pub fn cancel_respawn(&mut self, id: PlayerId) {
        self.respawns.remove(&id);
    }

    /// Advances the clock and due respawns. Pending events come first.
    pub fn tick(&mut self, dt: f32) -> Vec<ModeEvent> {
        self.game_time += dt;
        let mut events = std::mem::take(&mut self.pending);
        if self.outcome.is_some() {
            return events;
        }
        for timer in self.respawns.values_mut() {
            *timer -= dt;
        }
        let due: Vec<PlayerId> = self
            .respawns
            .iter()
            .filter(|(_, &t)| t <= 0.0)
            .map(|(&id, _)| id)
            .collect();
        for id in due {
            self.respawns.remove(&id);
            events.push(ModeEvent::Respawn(id));
        }
        events
    }

    pub fn time_expired(&self) -> bool {
        self.settings.time_limit > 0.0 && self.game_time >= self.settings.time_limit
    }

    pub fn end_game(&mut self, winner: Winner, reason: &str) {
        if self.outcome.is_some() {
            return;
        }
        info!(?winner, reason, "Game over");
        self.outcome = Some((winner, reason.to_string()));
        self.respawns.clear();
        self.pending.push(ModeEvent::GameOver {
            winner,
            reason: reason.to_string(),
        });
    }

    pub fn push(&mut self, event: ModeEvent) {
        self.pending.push(event);
    }

    pub fn is_over(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn winner(&self) -> Option<Winner> {
        self.outcome.as_ref().map(|(w, _)| *w)
    }
}

/// A kill that may be credited: a different, still-connected player.
pub(crate) fn creditable_killer(players: &Players, victim: Option<PlayerId>, killer: Option<PlayerId>) -> Option<PlayerId> {
    let killer = killer?;
    if Some(killer) == victim || !players.contains_key(&killer) {
        return None;
    }
    Some(killer)
}
