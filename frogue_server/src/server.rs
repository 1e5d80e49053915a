//! Authoritative game server.
//!
//! Networking model:
//! - TCP: handshake, disconnect and critical state, one stream per player
//! - UDP: one shared socket for inputs, keep-alives and frequent state
//!
//! Threading model:
//! - An accept task reads each new stream's `ConnectRequest`.
//! - A datagram task decodes the shared UDP socket.
//! - One reader task per player forwards its stream.
//! - One writer task per player owns the write half of its stream.
//!
//! All of them feed a single bounded inbound queue. The tick thread
//! (whoever calls [`GameServer::update`]) is the only owner of players,
//! world, combat and mode state; it never awaits network I/O.
//!
//! Determinism notes:
//! - Simulation advances in fixed ticks from an accumulator.
//! - Collections are ordered maps, so iteration order is stable.

use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    net::SocketAddr,
    time::Duration,
};

use anyhow::Context;
use frogue_shared::{
    chat,
    cheats::CheatGrant,
    config::{NetworkConfig, PROTOCOL_VERSION},
    math::Vec3,
    message::{
        now_millis, ChatMessage, ConnectRequest, ConnectResponse, DamageType, EntityDamage, EntityId, GameOver,
        HealthUpdate, LevelStart, NetMsg, PlayerDamage, PlayerId, RemoveReason, ScoreboardUpdate,
        ServerQueryResponse, TeamId,
    },
    net::{decode_from_bytes, spawn_writer, DatagramSocket, ReliableConn, ReliableListener, ReliableReader},
};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, trace, warn};

use crate::{
    combat::{
        CombatEvent, CombatHandler, Shooter, EXPLOSIVE_PROJECTILE, HITSCAN_RANGE, PRIMARY_DAMAGE,
        PRIMARY_SPREAD, PROJECTILE_DAMAGE, PROJECTILE_SPEED,
    },
    connection::{PlayerConnection, SendError, OUTBOUND_CAPACITY},
    discovery,
    entity::ServerEntity,
    mode::{create_mode, GameMode, ModeEvent},
    player::{Players, ServerPlayer},
    world::{ServerWorld, BATCH_CHUNK},
};

/// Bound on messages waiting for the tick thread.
pub const INBOUND_CAPACITY: usize = 4096;
/// Longest wall-clock gap one `update` will simulate.
pub const MAX_FRAME_DELTA: f32 = 0.25;
pub const SCOREBOARD_INTERVAL: f32 = 1.0;
/// Player id allowed to grant cheats.
pub const HOST_PLAYER: PlayerId = PlayerId(1);

/// Work handed to the tick thread.
#[derive(Debug)]
pub enum Inbound {
    Handshake {
        conn: ReliableConn,
        peer: SocketAddr,
        request: ConnectRequest,
    },
    Reliable {
        player_id: PlayerId,
        msg: NetMsg,
    },
    Datagram {
        from: SocketAddr,
        msg: NetMsg,
    },
    Closed {
        player_id: PlayerId,
        reason: String,
    },
}

/// Game server.
pub struct GameServer {
    config: NetworkConfig,

    players: Players,
    connections: BTreeMap<PlayerId, PlayerConnection>,
    next_player_id: u32,
    world: ServerWorld,
    combat: CombatHandler,
    mode: Box<dyn GameMode>,

    udp: DatagramSocket,
    tcp_addr: SocketAddr,
    query_addr: SocketAddr,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,
    status_tx: watch::Sender<ServerQueryResponse>,
    tasks: Vec<JoinHandle<()>>,

    tick: u32,
    tick_accumulator: f32,
    network_accumulator: f32,
    scoreboard_timer: f32,
    game_over_sent: bool,
    running: bool,
}

impl GameServer {
    /// Binds the game and query sockets and starts the background tasks.
    pub async fn new(config: NetworkConfig) -> anyhow::Result<Self> {
        let tcp = ReliableListener::bind(config.server_addr()?).await?;
        let tcp_addr = tcp.local_addr()?;
        // UDP shares the stream's port so clients need one address.
        let udp = DatagramSocket::bind(tcp_addr, config.max_packet_size).await?;
        let query = DatagramSocket::bind(config.query_addr()?, config.max_packet_size).await?;
        let query_addr = query.local_addr()?;

        let seed = config.seed.unwrap_or_else(|| now_millis() as u64);
        let world = ServerWorld::new(config.level, config.easiness, seed);
        let mode = create_mode(config.game_mode);

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (status_tx, status_rx) = watch::channel(Self::status_for(&config, 0));

        let tasks = vec![
            tokio::spawn(accept_loop(tcp, inbound_tx.clone(), config.connection_timeout())),
            tokio::spawn(datagram_loop(udp.clone(), inbound_tx.clone())),
            discovery::spawn_query_responder(query, status_rx),
        ];

        info!(
            %tcp_addr,
            %query_addr,
            mode = mode.name(),
            seed,
            tick_rate = config.server_tick_rate,
            network_rate = config.network_update_rate,
            "Server listening"
        );

        Ok(Self {
            players: Players::new(),
            connections: BTreeMap::new(),
            next_player_id: 1,
            world,
            combat: CombatHandler::new(seed),
            mode,
            udp,
            tcp_addr,
            query_addr,
            inbound_tx,
            inbound_rx,
            status_tx,
            tasks,
            tick: 0,
            tick_accumulator: 0.0,
            network_accumulator: 0.0,
            scoreboard_timer: 0.0,
            game_over_sent: false,
            running: true,
            config,
        })
    }

    fn status_for(config: &NetworkConfig, current_players: usize) -> ServerQueryResponse {
        ServerQueryResponse {
            server_name: config.server_name.clone(),
            current_players,
            max_players: config.max_players,
            current_level: config.level,
            game_mode: config.game_mode.name().to_string(),
            ping: 0,
            version: PROTOCOL_VERSION.to_string(),
            password_protected: config.server_password.is_some(),
            timestamp: now_millis(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn query_addr(&self) -> SocketAddr {
        self.query_addr
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn players(&self) -> &Players {
        &self.players
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn world(&self) -> &ServerWorld {
        &self.world
    }

    pub fn mode(&self) -> &dyn GameMode {
        self.mode.as_ref()
    }

    pub fn last_processed_input(&self, id: PlayerId) -> Option<u32> {
        self.connections.get(&id).map(|c| c.last_processed_input())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Runs fixed-rate updates until `shutdown` resolves, then stops.
    pub async fn run_until<F>(&mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let period = Duration::from_secs_f32(self.config.server_delta());
        let mut last = Instant::now();
        let mut next = last + period;
        tokio::pin!(shutdown);

        while self.running {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep_until(next) => {}
            }
            let now = Instant::now();
            self.update(now.duration_since(last).as_secs_f32());
            last = now;
            next += period;
            if next < now {
                next = now + period;
            }
        }
        self.stop();
        Ok(())
    }

    /// Advances wall-clock `delta` seconds: drains the inbound queue, runs
    /// due ticks, then broadcasts if a network update is due.
    pub fn update(&mut self, delta: f32) {
        if !self.running {
            return;
        }
        let delta = delta.clamp(0.0, MAX_FRAME_DELTA);
        self.process_inbound();

        let tick_len = self.config.server_delta();
        self.tick_accumulator += delta;
        while self.tick_accumulator >= tick_len {
            self.step(tick_len);
            self.tick_accumulator -= tick_len;
        }

        let net_len = self.config.network_delta();
        self.network_accumulator += delta;
        if self.network_accumulator >= net_len {
            self.network_accumulator -= net_len;
            self.broadcast_world_state(net_len);
        }
    }

    /// One authoritative tick.
    fn step(&mut self, dt: f32) {
        self.tick += 1;
        trace!(tick = self.tick, players = self.players.len(), "Tick");

        self.apply_inputs(dt);

        let world_tick = self.world.update(dt, &self.players);
        for attack in world_tick.attacks {
            self.damage_player(attack.target, None, attack.damage, DamageType::Melee);
        }
        for entity in world_tick.removed {
            self.announce_removal(&entity);
        }

        let events = self.combat.update(dt, &mut self.players, &mut self.world);
        self.handle_combat_events(events);

        let live_enemies = self.world.live_enemy_count();
        let events = self.mode.update(dt, &self.players, live_enemies);
        self.handle_mode_events(events);

        self.evict_timed_out();
    }

    /// Applies every queued input, then per-player physics.
    fn apply_inputs(&mut self, dt: f32) {
        let mut weapon_dirty = BTreeSet::new();
        let ids: Vec<PlayerId> = self.connections.keys().copied().collect();

        for id in ids {
            let inputs = match self.connections.get_mut(&id) {
                Some(conn) => conn.drain_inputs(),
                None => continue,
            };
            for input in inputs {
                let Some(player) = self.players.get_mut(&id) else {
                    break;
                };
                let effects = player.apply_input(&input);
                if let Some(conn) = self.connections.get_mut(&id) {
                    conn.mark_processed(input.sequence);
                }
                if effects.weapon_changed {
                    weapon_dirty.insert(id);
                }
                if effects.fired_primary {
                    self.fire_primary(id);
                }
                if effects.fired_secondary {
                    self.fire_secondary(id);
                }
            }
        }

        for player in self.players.values_mut() {
            if player.update(dt, self.world.terrain()) {
                weapon_dirty.insert(player.id());
            }
        }

        for (id, player) in &self.players {
            if let Some(conn) = self.connections.get_mut(id) {
                if conn.set_speed_flag(player.has_speed_violations()) {
                    warn!(player_id = %id, name = %player.name(), "Sustained speed violation");
                }
            }
        }

        for id in weapon_dirty {
            if let Some(update) = self.players.get(&id).map(|p| p.weapon_update()) {
                self.broadcast(&NetMsg::WeaponUpdate(update));
            }
        }
    }

    fn shooter_for(&self, id: PlayerId) -> Option<Shooter> {
        let player = self.players.get(&id)?;
        Some(Shooter {
            player_id: Some(id),
            team: player.team(),
            friendly_fire: self.mode.friendly_fire(),
        })
    }

    fn fire_primary(&mut self, id: PlayerId) {
        let Some(shooter) = self.shooter_for(id) else {
            return;
        };
        let Some((origin, direction, no_spread)) = self
            .players
            .get(&id)
            .map(|p| (p.eye_position(), p.aim_direction(), p.modifiers().no_spread()))
        else {
            return;
        };
        let spread = if no_spread { 0.0 } else { PRIMARY_SPREAD };
        let (hit, event) = self.combat.fire_hitscan(
            shooter,
            origin,
            direction,
            spread,
            PRIMARY_DAMAGE,
            HITSCAN_RANGE,
            &mut self.players,
            &mut self.world,
        );
        debug!(player_id = %id, target = ?hit.target, distance = hit.distance, "Hitscan");
        if let Some(event) = event {
            self.handle_combat_events(vec![event]);
        }
    }

    fn fire_secondary(&mut self, id: PlayerId) {
        let Some(shooter) = self.shooter_for(id) else {
            return;
        };
        let Some((origin, direction)) = self.players.get(&id).map(|p| (p.eye_position(), p.aim_direction())) else {
            return;
        };
        let event = self.combat.spawn_projectile(
            id,
            shooter,
            origin,
            direction,
            PROJECTILE_SPEED,
            PROJECTILE_DAMAGE,
            EXPLOSIVE_PROJECTILE,
        );
        self.handle_combat_events(vec![event]);
    }

    fn damage_player(&mut self, victim: PlayerId, attacker: Option<PlayerId>, damage: f32, damage_type: DamageType) {
        let Some(player) = self.players.get_mut(&victim) else {
            return;
        };
        let killed = player.take_damage(damage);
        self.handle_combat_events(vec![CombatEvent::PlayerDamaged {
            victim,
            attacker,
            damage,
            damage_type,
            killed,
        }]);
    }

    fn handle_combat_events(&mut self, events: Vec<CombatEvent>) {
        for event in events {
            match event {
                CombatEvent::PlayerDamaged {
                    victim,
                    attacker,
                    damage,
                    damage_type,
                    killed,
                } => {
                    self.broadcast(&NetMsg::PlayerDamage(PlayerDamage {
                        victim_id: victim,
                        attacker_id: attacker,
                        damage,
                        damage_type,
                    }));
                    self.broadcast_health(victim);
                    if killed {
                        self.on_player_killed(victim, attacker);
                    }
                }
                CombatEvent::EntityDamaged {
                    entity,
                    attacker,
                    damage,
                    damage_type,
                    hit_point,
                    killed,
                } => {
                    self.broadcast(&NetMsg::EntityDamage(EntityDamage {
                        entity_id: entity,
                        attacker_id: attacker,
                        damage,
                        damage_type,
                        hit_point,
                    }));
                    if killed {
                        self.on_entity_killed(entity, attacker);
                    }
                }
                CombatEvent::ProjectileSpawned(spawn) => {
                    self.broadcast(&NetMsg::ProjectileSpawn(spawn));
                }
                CombatEvent::ProjectileResolved(hit) => {
                    self.broadcast(&NetMsg::ProjectileHit(hit));
                }
            }
        }
    }

    fn on_player_killed(&mut self, victim: PlayerId, killer: Option<PlayerId>) {
        info!(victim = %victim, killer = ?killer, "Player killed");
        self.mode.on_player_killed(&mut self.players, victim, killer);
        self.broadcast_score(victim);
        if let Some(killer) = killer {
            self.broadcast_score(killer);
        }
    }

    fn on_entity_killed(&mut self, entity: EntityId, killer: Option<PlayerId>) {
        if let Some(removed) = self.world.remove_entity(entity) {
            self.announce_removal(&removed);
        }
        self.mode.on_entity_killed(&mut self.players, entity, killer);
        if let Some(killer) = killer {
            self.broadcast_score(killer);
        }
    }

    fn announce_removal(&mut self, entity: &ServerEntity) {
        let reason = if entity.health() <= 0.0 {
            RemoveReason::Killed
        } else {
            RemoveReason::Despawn
        };
        self.broadcast(&NetMsg::EntityRemove {
            entity_id: entity.id(),
            reason,
        });
    }

    fn handle_mode_events(&mut self, events: Vec<ModeEvent>) {
        for event in events {
            match event {
                ModeEvent::Respawn(id) => self.respawn_player(id),
                ModeEvent::SpawnWave {
                    wave,
                    count,
                    entity_type,
                } => {
                    info!(wave, count, ?entity_type, "Spawning wave");
                    for _ in 0..count {
                        let at = self.world.spawn_point();
                        let create = self.world.spawn_entity(entity_type, at, None).create_msg();
                        self.broadcast(&NetMsg::EntityCreate(create));
                    }
                }
                ModeEvent::Objective(update) => {
                    self.broadcast(&NetMsg::ObjectiveUpdate(update));
                }
                ModeEvent::GameOver { winner, reason } => {
                    if self.game_over_sent {
                        continue;
                    }
                    self.game_over_sent = true;
                    let (player_ids, scores): (Vec<PlayerId>, Vec<i32>) = self.players.values().map(|p| (p.id(), p.score())).unzip();
                    self.broadcast(&NetMsg::GameOver(GameOver {
                        winner,
                        reason,
                        player_ids,
                        scores,
                    }));
                }
            }
        }
    }

    fn respawn_player(&mut self, id: PlayerId) {
        let spawn = self.world.random_spawn_point();
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        if !player.is_dead() {
            return;
        }
        player.respawn(spawn);
        let weapon = player.weapon_update();
        debug!(player_id = %id, ?spawn, "Player respawned");
        self.broadcast(&NetMsg::PlayerRespawn { player_id: id, spawn });
        self.broadcast_health(id);
        self.broadcast(&NetMsg::WeaponUpdate(weapon));
    }

    fn evict_timed_out(&mut self) {
        let now = Instant::now();
        let timeout = self.config.connection_timeout();
        let expired: Vec<PlayerId> = self
            .connections
            .values()
            .filter(|c| c.is_timed_out(now, timeout))
            .map(|c| c.player_id())
            .collect();
        for id in expired {
            self.remove_player(id, "Timed out");
        }
    }

    fn process_inbound(&mut self) {
        while let Ok(item) = self.inbound_rx.try_recv() {
            match item {
                Inbound::Handshake { conn, peer, request } => self.handle_handshake(conn, peer, request),
                Inbound::Reliable { player_id, msg } => self.handle_message(player_id, msg),
                Inbound::Datagram { from, msg } => {
                    let owner = self
                        .connections
                        .values()
                        .find(|c| c.udp_peer() == from)
                        .map(|c| c.player_id());
                    match owner {
                        Some(id) => self.handle_message(id, msg),
                        None => debug!(%from, "Datagram from unknown address dropped"),
                    }
                }
                Inbound::Closed { player_id, reason } => {
                    self.remove_player(player_id, &reason);
                }
            }
        }
    }

    fn validate(&self, request: &ConnectRequest) -> Result<(), String> {
        if request.protocol_version != PROTOCOL_VERSION {
            return Err(format!(
                "Protocol version mismatch: server {PROTOCOL_VERSION}, client {}",
                request.protocol_version
            ));
        }
        if let Some(expected) = &self.config.server_password {
            if request.password.as_deref() != Some(expected.as_str()) {
                return Err("Invalid password".to_string());
            }
        }
        if self.players.len() >= self.config.max_players {
            return Err("Server full".to_string());
        }
        Ok(())
    }

    fn handle_handshake(&mut self, conn: ReliableConn, peer: SocketAddr, request: ConnectRequest) {
        if let Err(reason) = self.validate(&request) {
            warn!(%peer, name = %request.player_name, %reason, "Connection rejected");
            tokio::spawn(async move {
                let mut conn = conn;
                if let Err(e) = conn.send(&NetMsg::ConnectResponse(ConnectResponse::failure(reason))).await {
                    debug!(%peer, error = %e, "Rejection not delivered");
                }
            });
            return;
        }

        let id = PlayerId(self.next_player_id);
        self.next_player_id += 1;
        let name = match request.player_name.trim() {
            "" => format!("Player{}", id.0),
            name => name.to_string(),
        };

        let mut player = ServerPlayer::new(id, name.clone());
        player.set_position(self.world.spawn_point());
        self.players.insert(id, player);
        self.mode.on_player_join(&mut self.players, id);

        let udp_peer = SocketAddr::new(peer.ip(), request.udp_port);
        let (reader, writer) = conn.into_split();
        let (outbound, _writer) = spawn_writer(writer, OUTBOUND_CAPACITY);
        let mut connection = PlayerConnection::new(id, udp_peer, outbound);
        connection.attach_reader(spawn_reader(reader, id, self.inbound_tx.clone()));

        let response = ConnectResponse {
            success: true,
            assigned_player_id: Some(id),
            server_name: self.config.server_name.clone(),
            tick_rate: self.config.server_tick_rate,
            max_players: self.config.max_players,
            current_players: self.players.len(),
            current_level: self.world.level(),
            easiness: self.world.easiness(),
            reject_reason: None,
        };
        let level = LevelStart {
            level_id: self.world.level(),
            easiness: self.world.easiness(),
            seed: self.world.seed(),
            game_mode: self.mode.kind(),
            time_limit: self.mode.time_limit(),
            score_limit: self.mode.score_limit(),
        };
        let snapshot = self
            .world
            .create_world_snapshot(self.tick, self.mode.kind(), &self.players);

        let welcome = [
            NetMsg::ConnectResponse(response),
            NetMsg::LevelStart(level),
            NetMsg::WorldSnapshot(snapshot),
        ];
        for msg in &welcome {
            if let Err(e) = connection.send_reliable(msg) {
                warn!(player_id = %id, error = ?e, "Welcome not queued");
            }
        }
        self.connections.insert(id, connection);

        info!(player_id = %id, name = %name, %udp_peer, "Player connected");

        if let Some(joined) = self.players.get(&id).map(|p| p.joined()) {
            self.broadcast_except(id, &NetMsg::PlayerJoined(joined));
        }
        self.publish_status();
    }

    fn handle_message(&mut self, id: PlayerId, msg: NetMsg) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        conn.touch();

        match msg {
            NetMsg::Input(input) => {
                if input.player_id == id {
                    conn.queue_input(input);
                } else {
                    debug!(player_id = %id, claimed = %input.player_id, "Input for another player dropped");
                }
            }
            NetMsg::KeepAlive(keep_alive) if !keep_alive.is_response => {
                let now = now_millis();
                conn.set_ping((now - keep_alive.send_time).max(0) as u32);
                self.send_to(id, &NetMsg::KeepAlive(keep_alive.respond(now)));
            }
            NetMsg::KeepAlive(_) => {}
            NetMsg::Chat(message) => self.relay_chat(id, message),
            NetMsg::Disconnect { reason, .. } => {
                let reason = if reason.is_empty() {
                    "Client disconnected".to_string()
                } else {
                    reason
                };
                self.remove_player(id, &reason);
            }
            NetMsg::TeamChangeRequest { requested_team, .. } => {
                self.change_team(id, requested_team);
            }
            NetMsg::GameSettingChange {
                setting_name,
                setting_value,
            } => self.apply_setting(id, &setting_name, &setting_value),
            other => debug!(player_id = %id, msg = ?other, "Unexpected message"),
        }
    }

    fn relay_chat(&mut self, id: PlayerId, message: ChatMessage) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if !conn.allow_chat() {
            debug!(player_id = %id, "Chat rate limited");
            return;
        }
        let Some(text) = chat::sanitize(&message.message) else {
            return;
        };
        let Some(sender) = self.players.get(&id) else {
            return;
        };
        let team = sender.team();
        let stamped = NetMsg::Chat(ChatMessage {
            sender_id: Some(id),
            sender_name: sender.name().to_string(),
            message: text,
            team_only: message.team_only,
            message_type: message.message_type,
        });

        if message.team_only {
            let mates: Vec<PlayerId> = self
                .players
                .values()
                .filter(|p| p.team() == team)
                .map(|p| p.id())
                .collect();
            for mate in mates {
                self.send_to(mate, &stamped);
            }
        } else {
            self.broadcast(&stamped);
        }
    }

    fn change_team(&mut self, id: PlayerId, team: TeamId) {
        if self.mode.request_team_change(&mut self.players, id, team) {
            info!(player_id = %id, team, "Team changed");
            self.broadcast_scoreboard();
        } else {
            debug!(player_id = %id, team, "Team change refused");
        }
    }

    /// Host-only cheat grants: `cheat.<player_id>` with a JSON `Cheat`.
    fn apply_setting(&mut self, from: PlayerId, name: &str, value: &str) {
        let grant = match CheatGrant::from_setting(name, value) {
            Ok(Some(grant)) => grant,
            Ok(None) => {
                debug!(player_id = %from, setting = name, "Unknown setting");
                return;
            }
            Err(e) => {
                warn!(player_id = %from, setting = name, error = %e, "Malformed cheat grant");
                return;
            }
        };
        if from != HOST_PLAYER {
            warn!(player_id = %from, setting = name, "Cheat request from non-host ignored");
            return;
        }
        let CheatGrant { target, cheat } = grant;
        let Some(player) = self.players.get_mut(&target) else {
            return;
        };
        player.apply_cheat(cheat);
        info!(player_id = %target, ?cheat, "Cheat applied");
        self.broadcast_health(target);
        // The target predicts its own movement and needs the jump rule.
        self.send_to(
            target,
            &NetMsg::GameSettingChange {
                setting_name: name.to_string(),
                setting_value: value.to_string(),
            },
        );
    }

    /// Tears a player down. Returns false if they were already gone, so a
    /// departure is announced once.
    pub fn remove_player(&mut self, id: PlayerId, reason: &str) -> bool {
        let Some(conn) = self.connections.remove(&id) else {
            return false;
        };
        let _ = conn.send_reliable(&NetMsg::Disconnect {
            player_id: Some(id),
            reason: reason.to_string(),
        });
        conn.close();

        self.mode.on_player_leave(&mut self.players, id);
        self.players.remove(&id);
        info!(player_id = %id, reason, "Player left");

        self.broadcast(&NetMsg::PlayerLeft {
            player_id: id,
            reason: reason.to_string(),
        });
        self.publish_status();
        true
    }

    /// Disconnects everyone and stops background tasks.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        info!("Server shutting down");

        let disconnect = NetMsg::Disconnect {
            player_id: None,
            reason: "Server shutting down".to_string(),
        };
        for (_, conn) in std::mem::take(&mut self.connections) {
            let _ = conn.send_reliable(&disconnect);
            conn.close();
        }
        self.players.clear();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn send_to(&mut self, id: PlayerId, msg: &NetMsg) {
        let result = match self.connections.get(&id) {
            Some(conn) => conn.send(msg, &self.udp),
            None => return,
        };
        if let Err(e) = result {
            self.drop_unwritable(vec![(id, e)]);
        }
    }

    pub fn broadcast(&mut self, msg: &NetMsg) {
        self.broadcast_filtered(msg, None);
    }

    pub fn broadcast_except(&mut self, except: PlayerId, msg: &NetMsg) {
        self.broadcast_filtered(msg, Some(except));
    }

    fn broadcast_filtered(&mut self, msg: &NetMsg, except: Option<PlayerId>) {
        let failed: Vec<(PlayerId, SendError)> = self
            .connections
            .values()
            .filter(|c| Some(c.player_id()) != except)
            .filter_map(|c| c.send(msg, &self.udp).err().map(|e| (c.player_id(), e)))
            .collect();
        self.drop_unwritable(failed);
    }

    fn drop_unwritable(&mut self, failed: Vec<(PlayerId, SendError)>) {
        for (id, error) in failed {
            let reason = match error {
                SendError::Stalled => "Connection stalled",
                SendError::Closed => "Connection closed",
            };
            self.remove_player(id, reason);
        }
    }

    fn broadcast_health(&mut self, id: PlayerId) {
        let update: Option<HealthUpdate> = self.players.get(&id).map(|p| p.health_update());
        if let Some(update) = update {
            self.broadcast(&NetMsg::HealthUpdate(update));
        }
    }

    fn broadcast_score(&mut self, id: PlayerId) {
        if let Some(update) = self.players.get(&id).map(|p| p.score_update()) {
            self.broadcast(&NetMsg::ScoreUpdate(update));
        }
    }

    fn broadcast_scoreboard(&mut self) {
        let mut board = self.mode.score_board(&self.players);
        for entry in &mut board.entries {
            entry.ping = self
                .connections
                .get(&entry.player_id)
                .map_or(0, |c| c.ping_ms());
        }
        self.broadcast(&NetMsg::ScoreboardUpdate(ScoreboardUpdate {
            entries: board.entries,
            team_scores: board.team_scores,
            game_time: self.world.game_time(),
        }));
    }

    /// Positions for everyone, interest-filtered entity batches per
    /// receiver, and a periodic scoreboard.
    fn broadcast_world_state(&mut self, elapsed: f32) {
        let positions: Vec<NetMsg> = self
            .players
            .values()
            .map(|p| {
                let ack = self.last_processed_input(p.id()).unwrap_or(0);
                NetMsg::PositionUpdate(p.position_update(self.tick, ack))
            })
            .collect();
        for msg in &positions {
            self.broadcast(msg);
        }

        let receivers: Vec<(PlayerId, Vec3)> =
            self.players.values().map(|p| (p.id(), p.position())).collect();
        for (id, center) in receivers {
            let batch = self.world.create_entity_update_batch(center, self.tick);
            for chunk in batch.chunks(BATCH_CHUNK) {
                self.send_to(
                    id,
                    &NetMsg::EntityUpdateBatch {
                        updates: chunk.to_vec(),
                    },
                );
            }
        }

        self.scoreboard_timer += elapsed;
        if self.scoreboard_timer >= SCOREBOARD_INTERVAL {
            self.scoreboard_timer = 0.0;
            self.broadcast_scoreboard();
        }
    }

    fn publish_status(&self) {
        self.status_tx
            .send_replace(Self::status_for(&self.config, self.players.len()));
    }
}

impl Drop for GameServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Helper for tests: loopback server on ephemeral ports.
pub async fn bind_ephemeral(config: NetworkConfig) -> anyhow::Result<GameServer> {
    let config = NetworkConfig {
        bind_addr: "127.0.0.1".to_string(),
        server_port: 0,
        query_port: 0,
        ..config
    };
    GameServer::new(config).await
}

async fn accept_loop(listener: ReliableListener, inbound: mpsc::Sender<Inbound>, handshake_timeout: Duration) {
    loop {
        match listener.accept().await {
            Ok((conn, peer)) => {
                let inbound = inbound.clone();
                tokio::spawn(async move {
                    if let Err(e) = read_handshake(conn, peer, inbound, handshake_timeout).await {
                        warn!(%peer, error = %e, "Handshake failed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

async fn read_handshake(
    mut conn: ReliableConn,
    peer: SocketAddr,
    inbound: mpsc::Sender<Inbound>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let envelope = conn
        .recv_timeout(timeout)
        .await?
        .context("no ConnectRequest before timeout")?;
    let request = match envelope.msg {
        NetMsg::ConnectRequest(request) => request,
        other => anyhow::bail!("expected ConnectRequest, got {other:?}"),
    };
    debug!(%peer, name = %request.player_name, "Handshake received");
    inbound
        .send(Inbound::Handshake { conn, peer, request })
        .await
        .map_err(|_| anyhow::anyhow!("server stopped"))
}

fn spawn_reader(mut reader: ReliableReader, player_id: PlayerId, inbound: mpsc::Sender<Inbound>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = loop {
            match reader.recv().await {
                Ok(envelope) => {
                    let item = Inbound::Reliable {
                        player_id,
                        msg: envelope.msg,
                    };
                    if inbound.send(item).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(player_id = %player_id, error = %e, "Reliable reader stopped");
                    break "Connection lost".to_string();
                }
            }
        };
        let _ = inbound.send(Inbound::Closed { player_id, reason }).await;
    })
}

async fn datagram_loop(udp: DatagramSocket, inbound: mpsc::Sender<Inbound>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let (n, from) = match udp.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "Datagram recv failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };
        let envelope = match decode_from_bytes(&buf[..n]) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(%from, error = %e, "Malformed datagram dropped");
                continue;
            }
        };
        match inbound.try_send(Inbound::Datagram { from, msg: envelope.msg }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!(%from, "Inbound queue full, datagram dropped"),
            Err(TrySendError::Closed(_)) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frogue_shared::message::GameModeKind;

    async fn server(mode: GameModeKind) -> anyhow::Result<GameServer> {
        bind_ephemeral(NetworkConfig {
            game_mode: mode,
            seed: Some(42),
            ..Default::default()
        })
        .await
    }

    #[tokio::test]
    async fn fixed_ticks_follow_accumulator() -> anyhow::Result<()> {
        let mut s = server(GameModeKind::Deathmatch).await?;
        let tick = s.config().server_delta();
        s.update(tick * 0.5);
        assert_eq!(s.tick(), 0);
        s.update(tick * 0.6);
        assert_eq!(s.tick(), 1);
        s.update(tick * 3.0);
        assert_eq!(s.tick(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn large_gaps_are_clamped() -> anyhow::Result<()> {
        let mut s = server(GameModeKind::Deathmatch).await?;
        s.update(10.0);
        let max_ticks = (MAX_FRAME_DELTA / s.config().server_delta()).ceil() as u32;
        assert!(s.tick() <= max_ticks);
        Ok(())
    }

    #[tokio::test]
    async fn removing_unknown_player_is_a_no_op() -> anyhow::Result<()> {
        let mut s = server(GameModeKind::Cooperative).await?;
        assert!(!s.remove_player(PlayerId(99), "gone"));
        Ok(())
    }

    #[tokio::test]
    async fn stop_is_idempotent() -> anyhow::Result<()> {
        let mut s = server(GameModeKind::TeamDeathmatch).await?;
        s.stop();
        assert!(!s.is_running());
        s.stop();
        s.update(1.0);
        assert_eq!(s.tick(), 0);
        Ok(())
    }
}
