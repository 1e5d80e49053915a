//! Client implementation.
//!
//! The client maintains:
//! - A [`NetworkManager`] session (reliable stream + datagram socket)
//! - Local prediction for its own player
//! - Interpolated proxies for every other player
//! - Mirrors of entities, scores and game state for the UI
//!
//! [`GameClient::step`] is the only entry point the frame loop needs; it
//! never awaits network I/O.

use std::collections::BTreeMap;

use frogue_shared::{
    cheats::{Cheat, CheatGrant, PlayerModifiers},
    config::NetworkConfig,
    math::Vec3,
    message::{
        ChatMessage, EntityCreate, EntityId, EntityKind, EntityUpdate, GameOver, LevelStart, NetMsg, PlayerId, RemoveReason,
        ScoreboardUpdate, TeamId, WeaponState, WorldSnapshot,
    },
    terrain::{HeightMap, WORLD_SIZE},
};
use tracing::{debug, info, warn};

use crate::{
    input::{InputIntent, InputSampler},
    network::{ConnectParams, NetworkManager, SessionState},
    prediction::{PredictionManager, Reconciliation},
    remote::{RemotePlayer, RenderState},
};

/// Chat lines kept for display.
pub const CHAT_HISTORY: usize = 100;
/// Most inputs sampled in one frame after a stall.
const MAX_INPUTS_PER_STEP: u32 = 3;

/// The local player's server-reported state.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalStatus {
    pub name: String,
    pub team: TeamId,
    pub health: f32,
    pub max_health: f32,
    pub armor: f32,
    pub is_dead: bool,
    pub kills: u32,
    pub deaths: u32,
    pub score: i32,
    pub active_weapon_index: u32,
    pub ammo_in_clip: u32,
    pub total_ammo: u32,
    pub weapon_state: WeaponState,
    /// Cheats the host granted to this player.
    pub modifiers: PlayerModifiers,
}

impl LocalStatus {
    fn new(name: String) -> Self {
        Self {
            name,
            team: 0,
            health: 100.0,
            max_health: 100.0,
            armor: 0.0,
            is_dead: false,
            kills: 0,
            deaths: 0,
            score: 0,
            active_weapon_index: 0,
            ammo_in_clip: 0,
            total_ammo: 0,
            weapon_state: WeaponState::Idle,
            modifiers: PlayerModifiers::default(),
        }
    }
}

/// Client view of a server entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec3,
    pub velocity: Vec3,
    pub health: f32,
}

impl From<&EntityCreate> for ClientEntity {
    fn from(create: &EntityCreate) -> Self {
        Self {
            id: create.entity_id,
            kind: create.entity_type,
            position: create.position,
            velocity: Vec3::ZERO,
            health: create.health,
        }
    }
}

/// High-level game client.
pub struct GameClient {
    config: NetworkConfig,
    session: NetworkManager,
    local_id: Option<PlayerId>,
    local: LocalStatus,

    prediction: PredictionManager,
    sampler: InputSampler,
    terrain: HeightMap,
    input_clock: f32,
    /// Seconds of simulated client time; receipt times are measured on it.
    time: f64,
    last_reconciliation: Option<Reconciliation>,

    remotes: BTreeMap<PlayerId, RemotePlayer>,
    entities: BTreeMap<EntityId, ClientEntity>,
    level: Option<LevelStart>,
    scoreboard: Option<ScoreboardUpdate>,
    game_over: Option<GameOver>,
    chat: Vec<ChatMessage>,
}

impl GameClient {
    /// Connects and performs the handshake.
    pub async fn connect(config: NetworkConfig, params: ConnectParams) -> anyhow::Result<Self> {
        let name = params.player_name.clone();
        let prediction = PredictionManager::new(Vec3::ZERO, config.client_prediction);
        let session = NetworkManager::connect(config.clone(), params).await?;
        let local_id = session.player_id();

        Ok(Self {
            config,
            session,
            local_id,
            local: LocalStatus::new(name),
            prediction,
            sampler: InputSampler::new(),
            terrain: HeightMap::flat(WORLD_SIZE, WORLD_SIZE, 0.0),
            input_clock: 0.0,
            time: 0.0,
            last_reconciliation: None,
            remotes: BTreeMap::new(),
            entities: BTreeMap::new(),
            level: None,
            scoreboard: None,
            game_over: None,
            chat: Vec::new(),
        })
    }

    /// One client frame: handle received messages, sample and send input at
    /// the fixed input rate, then blend any pending correction.
    pub fn step(&mut self, dt: f32, intent: InputIntent) {
        self.time += f64::from(dt);

        for msg in self.session.poll() {
            self.handle_message(msg);
        }

        let input_delta = self.config.input_delta();
        self.input_clock += dt;
        let mut sampled = 0;
        while self.input_clock >= input_delta {
            self.input_clock -= input_delta;
            if sampled < MAX_INPUTS_PER_STEP {
                self.send_input(intent, input_delta);
                sampled += 1;
            }
        }

        self.prediction.update(dt);
    }

    fn send_input(&mut self, intent: InputIntent, delta: f32) {
        let Some(id) = self.local_id else {
            return;
        };
        if self.local.is_dead || !self.session.is_connected() {
            return;
        }
        let input = self.sampler.sample(id, intent, delta);
        let input = self.prediction.predict(input, &self.terrain);
        self.session.send(NetMsg::Input(input));
    }

    fn is_local(&self, id: PlayerId) -> bool {
        self.local_id == Some(id)
    }

    fn handle_message(&mut self, msg: NetMsg) {
        match msg {
            NetMsg::ConnectResponse(response) => {
                if response.assigned_player_id != self.local_id {
                    info!(player_id = ?response.assigned_player_id, "Session assigned a new id");
                }
                self.local_id = response.assigned_player_id;
                self.sampler.reset();
                // Sequences restart with the new session.
                self.prediction.reset(self.prediction.position());
                self.local.modifiers.reset();
                self.prediction.set_air_jump(false);
                self.remotes.clear();
                self.entities.clear();
                self.game_over = None;
            }
            NetMsg::LevelStart(level) => {
                info!(level = level.level_id, mode = level.game_mode.name(), seed = level.seed, "Level start");
                self.terrain = HeightMap::generate(level.seed);
                self.level = Some(level);
            }
            NetMsg::WorldSnapshot(snapshot) => self.apply_world_snapshot(snapshot),

            NetMsg::PositionUpdate(update) if self.is_local(update.player_id) => {
                let result = self.prediction.reconcile(&update, &self.terrain);
                self.last_reconciliation = Some(result);
            }
            NetMsg::PositionUpdate(update) => {
                if let Some(remote) = self.remotes.get_mut(&update.player_id) {
                    remote.receive_position_update(&update, self.time);
                }
            }
            NetMsg::PlayerJoined(joined) if !self.is_local(joined.player_id) => {
                info!(player_id = %joined.player_id, name = %joined.player_name, "Player joined");
                self.remotes.insert(
                    joined.player_id,
                    RemotePlayer::new(joined.player_id, joined.player_name, joined.team, joined.position, self.time),
                );
            }
            NetMsg::PlayerJoined(_) => {}
            NetMsg::PlayerLeft { player_id, reason } => {
                info!(%player_id, %reason, "Player left");
                self.remotes.remove(&player_id);
            }
            NetMsg::PlayerRespawn { player_id, spawn } => {
                if self.is_local(player_id) {
                    self.prediction.reset(spawn);
                    self.local.is_dead = false;
                    self.local.health = self.local.max_health;
                } else if let Some(remote) = self.remotes.get_mut(&player_id) {
                    remote.respawn(spawn, self.time);
                }
            }
            NetMsg::HealthUpdate(update) => {
                if self.is_local(update.player_id) {
                    if update.is_dead && !self.local.is_dead {
                        info!("Local player died");
                    }
                    self.local.health = update.health;
                    self.local.max_health = update.max_health;
                    self.local.armor = update.armor;
                    self.local.is_dead = update.is_dead;
                } else if let Some(remote) = self.remotes.get_mut(&update.player_id) {
                    remote.apply_health(&update);
                }
            }
            NetMsg::WeaponUpdate(update) => {
                if self.is_local(update.player_id) {
                    self.local.active_weapon_index = update.active_weapon_index;
                    self.local.ammo_in_clip = update.ammo_in_clip;
                    self.local.total_ammo = update.total_ammo;
                    self.local.weapon_state = update.weapon_state;
                } else if let Some(remote) = self.remotes.get_mut(&update.player_id) {
                    remote.apply_weapon(&update);
                }
            }
            NetMsg::ScoreUpdate(update) => {
                if self.is_local(update.player_id) {
                    self.local.kills = update.kills;
                    self.local.deaths = update.deaths;
                    self.local.score = update.score;
                } else if let Some(remote) = self.remotes.get_mut(&update.player_id) {
                    remote.apply_score(&update);
                }
            }

            NetMsg::EntityCreate(create) => {
                self.entities.insert(create.entity_id, ClientEntity::from(&create));
            }
            NetMsg::EntityUpdate(update) => self.apply_entity_update(&update),
            NetMsg::EntityUpdateBatch { updates } => {
                for update in &updates {
                    self.apply_entity_update(update);
                }
            }
            NetMsg::EntityRemove { entity_id, reason } => {
                if self.entities.remove(&entity_id).is_some() && reason == RemoveReason::Killed {
                    debug!(%entity_id, "Entity killed");
                }
            }
            NetMsg::EntityDamage(damage) => {
                if let Some(entity) = self.entities.get_mut(&damage.entity_id) {
                    entity.health = (entity.health - damage.damage).max(0.0);
                }
            }

            NetMsg::GameOver(over) => {
                info!(winner = ?over.winner, reason = %over.reason, "Game over");
                self.game_over = Some(over);
            }
            NetMsg::ScoreboardUpdate(board) => {
                for entry in &board.entries {
                    if self.is_local(entry.player_id) {
                        self.local.team = entry.team;
                    } else if let Some(remote) = self.remotes.get_mut(&entry.player_id) {
                        remote.team = entry.team;
                    }
                }
                self.scoreboard = Some(board);
            }
            NetMsg::Chat(message) => {
                if self.chat.len() >= CHAT_HISTORY {
                    self.chat.remove(0);
                }
                self.chat.push(message);
            }
            NetMsg::GameSettingChange {
                setting_name,
                setting_value,
            } => match CheatGrant::from_setting(&setting_name, &setting_value) {
                Ok(Some(grant)) if self.is_local(grant.target) => {
                    info!(cheat = ?grant.cheat, "Cheat granted");
                    self.local.modifiers.apply(grant.cheat);
                    self.prediction.set_air_jump(self.local.modifiers.infinite_jump());
                }
                Ok(_) => debug!(setting = %setting_name, "Setting ignored"),
                Err(e) => warn!(setting = %setting_name, error = %e, "Malformed setting"),
            },
            NetMsg::Disconnect { reason, .. } => info!(%reason, "Disconnected by server"),
            other => debug!(msg = ?other, "Unhandled message"),
        }
    }

    fn apply_world_snapshot(&mut self, snapshot: WorldSnapshot) {
        self.remotes.clear();
        for p in &snapshot.players {
            if self.is_local(p.player_id) {
                self.prediction.reset(p.position);
                self.local.team = p.team;
                self.local.health = p.health;
                self.local.is_dead = p.health <= 0.0;
            } else {
                let mut remote = RemotePlayer::new(p.player_id, p.player_name.clone(), p.team, p.position, self.time);
                remote.health = p.health;
                remote.is_dead = p.health <= 0.0;
                self.remotes.insert(p.player_id, remote);
            }
        }
        self.entities = snapshot
            .entities
            .iter()
            .map(|e| {
                let entity = ClientEntity {
                    id: e.entity_id,
                    kind: e.entity_type,
                    position: e.position,
                    velocity: Vec3::ZERO,
                    health: e.health,
                };
                (e.entity_id, entity)
            })
            .collect();
        debug!(
            players = snapshot.players.len(),
            entities = snapshot.entities.len(),
            tick = snapshot.server_tick,
            "World snapshot applied"
        );
    }

    fn apply_entity_update(&mut self, update: &EntityUpdate) {
        if let Some(entity) = self.entities.get_mut(&update.entity_id) {
            entity.position = update.position;
            entity.velocity = update.velocity;
        }
    }

    pub fn say(&self, text: impl Into<String>, team_only: bool) {
        self.session.send(NetMsg::Chat(ChatMessage {
            sender_id: self.local_id,
            sender_name: self.local.name.clone(),
            message: text.into(),
            team_only,
            message_type: 0,
        }));
    }

    pub fn request_team(&self, team: TeamId) {
        if let Some(player_id) = self.local_id {
            self.session.send(NetMsg::TeamChangeRequest {
                player_id,
                requested_team: team,
            });
        }
    }

    /// Asks the server to grant `cheat` to `target`. Only honoured when
    /// this client is the host.
    pub fn grant_cheat(&self, target: PlayerId, cheat: Cheat) -> anyhow::Result<()> {
        self.session.send(CheatGrant::new(target, cheat).to_msg()?);
        Ok(())
    }

    pub fn send(&self, msg: NetMsg) {
        self.session.send(msg);
    }

    pub async fn disconnect(&mut self) {
        self.session.disconnect().await;
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn local_id(&self) -> Option<PlayerId> {
        self.local_id
    }

    pub fn local_status(&self) -> &LocalStatus {
        &self.local
    }

    pub fn local_position(&self) -> Vec3 {
        self.prediction.position()
    }

    pub fn prediction(&self) -> &PredictionManager {
        &self.prediction
    }

    pub fn last_reconciliation(&self) -> Option<Reconciliation> {
        self.last_reconciliation
    }

    pub fn remote(&self, id: PlayerId) -> Option<&RemotePlayer> {
        self.remotes.get(&id)
    }

    pub fn remote_players(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.remotes.values()
    }

    /// Interpolated render state of every remote player at the current time.
    pub fn remote_render_states(&self) -> Vec<(PlayerId, RenderState)> {
        let delay = self.config.interpolation_delay();
        self.remotes
            .values()
            .filter_map(|r| r.sample(self.time, delay).map(|s| (r.player_id, s)))
            .collect()
    }

    pub fn entities(&self) -> impl Iterator<Item = &ClientEntity> {
        self.entities.values()
    }

    pub fn level(&self) -> Option<&LevelStart> {
        self.level.as_ref()
    }

    pub fn scoreboard(&self) -> Option<&ScoreboardUpdate> {
        self.scoreboard.as_ref()
    }

    pub fn game_over(&self) -> Option<&GameOver> {
        self.game_over.as_ref()
    }

    pub fn chat_log(&self) -> &[ChatMessage] {
        &self.chat
    }

    pub fn ping_ms(&self) -> u32 {
        self.session.ping_ms()
    }
}
