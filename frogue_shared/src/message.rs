//! Message model.
//!
//! Every wire message is a variant of [`NetMsg`] wrapped in an [`Envelope`]
//! carrying the sender's millisecond timestamp. Each variant has a static
//! [`Priority`]; the priority alone picks the channel it travels on.
//!
//! Unreliable payloads that represent state carry full position/velocity/
//! forward so they can be applied standalone, in any order.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{input::InputSnapshot, math::Vec3};

/// Team id. `0` means no team; modes define their own ids above that.
pub type TeamId = u32;

pub const TEAM_NONE: TeamId = 0;

/// Identifies a connected player. Assigned by the server, stable for the session.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a server entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery priority. Transport routing metadata only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

/// Physical channel a message travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Ordered, reliable stream (TCP).
    Reliable,
    /// Shared datagram socket (UDP).
    Unreliable,
}

impl Priority {
    pub fn channel(self) -> Channel {
        match self {
            Priority::Critical => Channel::Reliable,
            Priority::High | Priority::Medium | Priority::Low => Channel::Unreliable,
        }
    }
}

/// Game mode selector, shared between config, handshake and discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GameModeKind {
    #[default]
    Cooperative,
    Deathmatch,
    TeamDeathmatch,
}

impl GameModeKind {
    pub fn name(self) -> &'static str {
        match self {
            GameModeKind::Cooperative => "Cooperative",
            GameModeKind::Deathmatch => "Deathmatch",
            GameModeKind::TeamDeathmatch => "Team Deathmatch",
        }
    }

    /// Numeric id used by older tooling.
    pub fn wire_id(self) -> u8 {
        match self {
            GameModeKind::Cooperative => 0,
            GameModeKind::Deathmatch => 1,
            GameModeKind::TeamDeathmatch => 2,
        }
    }
}

impl FromStr for GameModeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coop" | "cooperative" | "0" => Ok(GameModeKind::Cooperative),
            "dm" | "deathmatch" | "1" => Ok(GameModeKind::Deathmatch),
            "tdm" | "teamdeathmatch" | "team_deathmatch" | "2" => Ok(GameModeKind::TeamDeathmatch),
            other => anyhow::bail!("unknown game mode: {other}"),
        }
    }
}

/// Server entity type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Zombie,
    Frog1,
    Frog2,
    Npc,
    Pickup,
    Projectile,
}

impl EntityKind {
    pub fn wire_id(self) -> u8 {
        match self {
            EntityKind::Zombie => 1,
            EntityKind::Frog1 => 2,
            EntityKind::Frog2 => 3,
            EntityKind::Npc => 4,
            EntityKind::Pickup => 10,
            EntityKind::Projectile => 20,
        }
    }

    /// Hostile kinds count towards cooperative wave progress.
    pub fn is_enemy(self) -> bool {
        matches!(
            self,
            EntityKind::Zombie | EntityKind::Frog1 | EntityKind::Frog2
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DamageType {
    Bullet,
    Melee,
    Explosion,
    Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoveReason {
    Despawn,
    Killed,
    Collected,
}

/// What a ray or projectile ended on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HitTarget {
    /// Expired or missed everything.
    None,
    Terrain,
    Player(PlayerId),
    Entity(EntityId),
}

/// Weapon phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WeaponState {
    #[default]
    Idle,
    Firing,
    Reloading,
}

/// Who won a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    Player(PlayerId),
    Team(TeamId),
    /// All players won together (cooperative victory).
    Players,
    /// Nobody won: cooperative defeat or a drawn team game.
    Nobody,
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Sender wall clock, milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub msg: NetMsg,
}

impl Envelope {
    pub fn new(msg: NetMsg) -> Self {
        Self {
            timestamp: now_millis(),
            msg,
        }
    }
}

/// Wall clock in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Every message the game exchanges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    ConnectRequest(ConnectRequest),
    ConnectResponse(ConnectResponse),
    Disconnect {
        player_id: Option<PlayerId>,
        reason: String,
    },
    KeepAlive(KeepAlive),
    ServerQueryRequest,
    ServerQueryResponse(ServerQueryResponse),

    /// Client -> server: one simulation step of input.
    Input(InputSnapshot),
    PositionUpdate(PositionUpdate),
    HealthUpdate(HealthUpdate),
    WeaponUpdate(WeaponUpdate),
    PlayerJoined(PlayerJoined),
    PlayerLeft {
        player_id: PlayerId,
        reason: String,
    },
    PlayerRespawn {
        player_id: PlayerId,
        spawn: Vec3,
    },
    PlayerDamage(PlayerDamage),

    EntityCreate(EntityCreate),
    EntityUpdate(EntityUpdate),
    EntityUpdateBatch {
        updates: Vec<EntityUpdate>,
    },
    EntityRemove {
        entity_id: EntityId,
        reason: RemoveReason,
    },
    EntityDamage(EntityDamage),
    ProjectileSpawn(ProjectileSpawn),
    ProjectileHit(ProjectileHit),

    LevelStart(LevelStart),
    GameOver(GameOver),
    ScoreUpdate(ScoreUpdate),
    ScoreboardUpdate(ScoreboardUpdate),
    Chat(ChatMessage),
    WorldSnapshot(WorldSnapshot),
    ObjectiveUpdate(ObjectiveUpdate),
    TeamChangeRequest {
        player_id: PlayerId,
        requested_team: TeamId,
    },
    GameSettingChange {
        setting_name: String,
        setting_value: String,
    },
}

impl NetMsg {
    pub fn priority(&self) -> Priority {
        match self {
            NetMsg::ConnectRequest(_)
            | NetMsg::ConnectResponse(_)
            | NetMsg::Disconnect { .. }
            | NetMsg::PlayerJoined(_)
            | NetMsg::PlayerLeft { .. }
            | NetMsg::PlayerRespawn { .. }
            | NetMsg::EntityCreate(_)
            | NetMsg::EntityRemove { .. }
            | NetMsg::LevelStart(_)
            | NetMsg::GameOver(_)
            | NetMsg::WorldSnapshot(_)
            | NetMsg::GameSettingChange { .. } => Priority::Critical,

            NetMsg::KeepAlive(_)
            | NetMsg::Input(_)
            | NetMsg::PositionUpdate(_)
            | NetMsg::PlayerDamage(_)
            | NetMsg::EntityDamage(_)
            | NetMsg::ProjectileSpawn(_)
            | NetMsg::ProjectileHit(_) => Priority::High,

            NetMsg::HealthUpdate(_)
            | NetMsg::WeaponUpdate(_)
            | NetMsg::EntityUpdate(_)
            | NetMsg::EntityUpdateBatch { .. }
            | NetMsg::ScoreUpdate(_)
            | NetMsg::ObjectiveUpdate(_)
            | NetMsg::TeamChangeRequest { .. } => Priority::Medium,

            NetMsg::ScoreboardUpdate(_)
            | NetMsg::Chat(_)
            | NetMsg::ServerQueryRequest
            | NetMsg::ServerQueryResponse(_) => Priority::Low,
        }
    }

    pub fn channel(&self) -> Channel {
        self.priority().channel()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectRequest {
    pub player_name: String,
    pub protocol_version: String,
    pub password: Option<String>,
    /// Port of the client's datagram socket; the server pairs it with the stream's IP.
    pub udp_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectResponse {
    pub success: bool,
    pub assigned_player_id: Option<PlayerId>,
    pub server_name: String,
    pub tick_rate: u32,
    pub max_players: usize,
    pub current_players: usize,
    pub current_level: u32,
    pub easiness: f32,
    pub reject_reason: Option<String>,
}

impl ConnectResponse {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            assigned_player_id: None,
            server_name: String::new(),
            tick_rate: 0,
            max_players: 0,
            current_players: 0,
            current_level: 0,
            easiness: 0.0,
            reject_reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct KeepAlive {
    pub send_time: i64,
    pub server_time: i64,
    pub is_response: bool,
}

impl KeepAlive {
    pub fn request(send_time: i64) -> Self {
        Self {
            send_time,
            server_time: 0,
            is_response: false,
        }
    }

    /// Echoes the original send time so the requester can measure the round trip.
    pub fn respond(self, server_time: i64) -> Self {
        Self {
            send_time: self.send_time,
            server_time,
            is_response: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerQueryResponse {
    pub server_name: String,
    pub current_players: usize,
    pub max_players: usize,
    pub current_level: u32,
    pub game_mode: String,
    /// Filled in by the querying client from the round trip.
    pub ping: u32,
    pub version: String,
    pub password_protected: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PositionUpdate {
    pub player_id: PlayerId,
    pub server_tick: u32,
    /// Highest input sequence the server has applied for this player.
    pub last_processed_input: u32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub forward_x: f32,
    pub forward_z: f32,
    pub pitch: f32,
    pub on_ground: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HealthUpdate {
    pub player_id: PlayerId,
    pub health: f32,
    pub max_health: f32,
    pub armor: f32,
    pub is_dead: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WeaponUpdate {
    pub player_id: PlayerId,
    pub active_weapon_index: u32,
    pub ammo_in_clip: u32,
    pub total_ammo: u32,
    pub weapon_state: WeaponState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerJoined {
    pub player_id: PlayerId,
    pub player_name: String,
    pub position: Vec3,
    pub team: TeamId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PlayerDamage {
    pub victim_id: PlayerId,
    /// `None` for environment or AI damage.
    pub attacker_id: Option<PlayerId>,
    pub damage: f32,
    pub damage_type: DamageType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EntityCreate {
    pub entity_id: EntityId,
    pub entity_type: EntityKind,
    pub owner_player_id: Option<PlayerId>,
    pub position: Vec3,
    pub rotation_y: f32,
    pub health: f32,
    pub team: TeamId,
    pub sub_type: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EntityUpdate {
    pub entity_id: EntityId,
    pub server_tick: u32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub forward_x: f32,
    pub forward_z: f32,
    pub animation_state: u32,
    pub animation_time: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EntityDamage {
    pub entity_id: EntityId,
    pub attacker_id: Option<PlayerId>,
    pub damage: f32,
    pub damage_type: DamageType,
    pub hit_point: Vec3,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProjectileSpawn {
    pub projectile_id: u32,
    pub owner_player_id: PlayerId,
    pub start: Vec3,
    pub direction: Vec3,
    pub speed: f32,
    pub damage: f32,
    pub projectile_type: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProjectileHit {
    pub projectile_id: u32,
    pub hit_point: Vec3,
    pub target: HitTarget,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LevelStart {
    pub level_id: u32,
    pub easiness: f32,
    pub seed: u64,
    pub game_mode: GameModeKind,
    /// Seconds; `0` means unlimited.
    pub time_limit: f32,
    pub score_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameOver {
    pub winner: Winner,
    pub reason: String,
    pub player_ids: Vec<PlayerId>,
    pub scores: Vec<i32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreUpdate {
    pub player_id: PlayerId,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub score: i32,
}

/// One scoreboard row, derived from live player state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreEntry {
    pub player_id: PlayerId,
    pub player_name: String,
    pub kills: u32,
    pub deaths: u32,
    pub score: i32,
    pub team: TeamId,
    pub ping: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreboardUpdate {
    pub entries: Vec<ScoreEntry>,
    /// `(team, score)` pairs for team modes; empty otherwise.
    pub team_scores: Vec<(TeamId, i32)>,
    pub game_time: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Stamped by the server; clients may leave it empty.
    pub sender_id: Option<PlayerId>,
    pub sender_name: String,
    pub message: String,
    pub team_only: bool,
    pub message_type: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSnapshot {
    pub player_id: PlayerId,
    pub player_name: String,
    pub position: Vec3,
    pub health: f32,
    pub team: TeamId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EntitySnapshot {
    pub entity_id: EntityId,
    pub entity_type: EntityKind,
    pub position: Vec3,
    pub health: f32,
}

/// Full world state, sent reliably to late joiners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldSnapshot {
    pub server_tick: u32,
    pub level_id: u32,
    pub easiness: f32,
    pub game_mode: GameModeKind,
    pub game_time: f32,
    pub players: Vec<PlayerSnapshot>,
    pub entities: Vec<EntitySnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectiveUpdate {
    pub objective_id: u32,
    pub objective_type: u32,
    pub progress: f32,
    pub max_progress: f32,
    pub description: String,
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_messages_ride_the_reliable_channel() {
        let msg = NetMsg::PlayerLeft {
            player_id: PlayerId(3),
            reason: "bye".into(),
        };
        assert_eq!(msg.priority(), Priority::Critical);
        assert_eq!(msg.channel(), Channel::Reliable);

        let msg = NetMsg::EntityRemove {
            entity_id: EntityId(1),
            reason: RemoveReason::Killed,
        };
        assert_eq!(msg.channel(), Channel::Reliable);
    }

    #[test]
    fn state_updates_ride_the_unreliable_channel() {
        let msg = NetMsg::KeepAlive(KeepAlive::request(1));
        assert_eq!(msg.priority(), Priority::High);
        assert_eq!(msg.channel(), Channel::Unreliable);

        let msg = NetMsg::EntityUpdateBatch { updates: vec![] };
        assert_eq!(msg.priority(), Priority::Medium);

        let msg = NetMsg::ServerQueryRequest;
        assert_eq!(msg.priority(), Priority::Low);
        assert_eq!(msg.channel(), Channel::Unreliable);
    }

    #[test]
    fn keep_alive_response_echoes_send_time() {
        let ka = KeepAlive::request(1234).respond(5000);
        assert!(ka.is_response);
        assert_eq!(ka.send_time, 1234);
        assert_eq!(ka.server_time, 5000);
    }

    #[test]
    fn game_mode_parses_cli_names() {
        assert_eq!("tdm".parse::<GameModeKind>().unwrap(), GameModeKind::TeamDeathmatch);
        assert_eq!("DM".parse::<GameModeKind>().unwrap(), GameModeKind::Deathmatch);
        assert!("ctf".parse::<GameModeKind>().is_err());
    }
}
