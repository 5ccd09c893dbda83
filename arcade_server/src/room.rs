//! Rooms: one registry, one system pipeline, a set of member sessions.
//!
//! [`Room`] is the synchronous core and is driven one tick at a time, which
//! keeps it testable without sockets. [`spawn_room`] wraps it in a tokio task
//! fed by a command channel.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use arcade_shared::{
    components::{EntityKind, InputIntent, NetworkId, Transform},
    config::EngineConfig,
    ecs::{Entity, Registry, SystemManager},
    error::RoomError,
    math::{Rect, Vec2},
    net::{CreateRoom, InputFrame, JoinStatus, Payload, RoomInfo, SessionHandle, SessionState},
    templates::LevelDefinition,
};
use rand::{rngs::StdRng, SeedableRng};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

use crate::{
    components::{
        Arena, DebugFlag, Difficulty, GameClock, Hitbox, LevelState, NetIds, Outbox, Replicated,
        RoomRng,
    },
    spawn::{self, RoomTag},
    systems::{self, ServerSystem},
};

pub const MAX_ROOM_NAME: usize = 32;
pub const MAX_SPEED: f32 = 4.0;
pub const MAX_DIFFICULTY: f32 = 10.0;
/// Vertical gap between player start positions.
pub const SLOT_SPACING: f32 = 60.0;
/// A room nobody ever joined is closed after this long.
pub const UNCLAIMED_GRACE: Duration = Duration::from_secs(30);

/// Validated, immutable room parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSettings {
    pub id: u32,
    pub name: String,
    pub capacity: u32,
    pub difficulty: f32,
    pub speed: f32,
    pub level_id: u32,
    pub seed: u64,
    /// Minutes until the game ends on its own; 0 means no limit.
    pub duration_min: u32,
}

impl RoomSettings {
    /// Validates a create request against the server limits.
    pub fn from_request(id: u32, req: &CreateRoom, cfg: &EngineConfig) -> Result<Self, RoomError> {
        let name = req.name.trim();
        if name.is_empty() || name.chars().count() > MAX_ROOM_NAME {
            return Err(RoomError::InvalidParameter("name"));
        }
        let capacity = match req.max_players {
            0 => cfg.default_room_capacity,
            n if n > cfg.max_room_capacity => {
                return Err(RoomError::InvalidParameter("max_players"))
            }
            n => n,
        };
        if !req.difficulty.is_finite() || req.difficulty <= 0.0 || req.difficulty > MAX_DIFFICULTY {
            return Err(RoomError::InvalidParameter("difficulty"));
        }
        if !req.speed.is_finite() || req.speed <= 0.0 || req.speed > MAX_SPEED {
            return Err(RoomError::InvalidParameter("speed"));
        }
        Ok(Self {
            id,
            name: name.to_owned(),
            capacity,
            difficulty: req.difficulty,
            speed: req.speed,
            level_id: req.level_id,
            seed: u64::from(req.seed),
            duration_min: req.duration_min,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Waiting,
    InGame,
    Finished,
}

struct Member {
    handle: Arc<SessionHandle>,
    inputs: mpsc::UnboundedReceiver<InputFrame>,
    player: Option<Entity>,
    ready: bool,
    spectator: bool,
}

pub struct Room {
    settings: RoomSettings,
    state: RoomState,
    registry: Registry,
    systems: SystemManager<ServerSystem>,
    members: BTreeMap<u32, Member>,
    banned: HashSet<String>,
    player_start: Vec2,
    tick: u32,
    tick_hz: u32,
    created: Instant,
    claimed: bool,
}

impl Room {
    pub fn new(settings: RoomSettings, level: LevelDefinition, arena: Rect, tick_hz: u32) -> Self {
        let mut registry = Registry::default();
        registry.insert_resource(RoomTag(settings.id));
        registry.insert_resource(Arena(arena));
        registry.insert_resource(Difficulty {
            scale: settings.difficulty,
        });
        registry.insert_resource(RoomRng(StdRng::seed_from_u64(settings.seed)));
        registry.insert_resource(GameClock::default());
        registry.insert_resource(Outbox::default());
        registry.insert_resource(NetIds::default());
        registry.insert_resource(DebugFlag(false));
        let player_start = level.player_start;
        registry.insert_resource(LevelState::new(level));

        Self {
            settings,
            state: RoomState::Waiting,
            registry,
            systems: systems::standard(),
            members: BTreeMap::new(),
            banned: HashSet::new(),
            player_start,
            tick: 0,
            tick_hz: tick_hz.max(1),
            created: Instant::now(),
            claimed: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.settings.id
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn tick_count(&self) -> u32 {
        self.tick
    }

    pub fn player_of(&self, session_id: u32) -> Option<Entity> {
        self.members.get(&session_id).and_then(|m| m.player)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn player_count(&self) -> u32 {
        self.members.values().filter(|m| !m.spectator).count() as u32
    }

    /// Adds a session. On any rejection the registry is left untouched.
    pub fn join(&mut self, handle: Arc<SessionHandle>, spectator: bool) -> Result<(), RoomError> {
        let session_id = handle.id();
        if self.members.contains_key(&session_id) {
            return Err(RoomError::InvalidParameter("already a member"));
        }
        if self.banned.contains(&handle.username()) {
            return Err(RoomError::Banned);
        }
        if self.state == RoomState::Finished {
            return Err(RoomError::AlreadyStarted);
        }
        if !spectator {
            if self.player_count() >= self.settings.capacity {
                return Err(RoomError::RegistryFull);
            }
            if self.state != RoomState::Waiting {
                return Err(RoomError::AlreadyStarted);
            }
        }
        if handle.state() != SessionState::Authenticated {
            return Err(RoomError::NotAuthenticated);
        }
        let weapon = handle.with(|s| s.weapon());
        handle
            .with(|s| s.enter_room(self.settings.id))
            .map_err(|_| RoomError::NotAuthenticated)?;

        let player = if spectator {
            None
        } else {
            let slot = self.player_count() as f32;
            let at = self.player_start + Vec2::new(0.0, slot * SLOT_SPACING);
            match spawn::player(&mut self.registry, session_id, weapon, at) {
                Ok(e) => Some(e),
                Err(error) => {
                    warn!(room_id = self.settings.id, %error, "player spawn failed");
                    handle.with(|s| s.leave_room()).ok();
                    return Err(RoomError::InvalidParameter("spawn"));
                }
            }
        };

        let inputs = handle.attach_input();
        handle.send(Payload::JoinRoomResponse {
            status: JoinStatus::Ok,
            room_id: self.settings.id,
        });
        self.catch_up(&handle);
        self.members.insert(
            session_id,
            Member {
                handle,
                inputs,
                player,
                ready: false,
                spectator,
            },
        );
        self.claimed = true;
        info!(room_id = self.settings.id, session_id, spectator, "joined room");
        self.broadcast(self.room_update());
        Ok(())
    }

    /// Announces already-replicated entities to a late joiner.
    fn catch_up(&self, handle: &SessionHandle) {
        let mut known: Vec<Payload> = self
            .registry
            .view::<(NetworkId, EntityKind, Transform)>()
            .filter(|(e, _)| self.registry.has::<Replicated>(*e))
            .map(|(e, (id, kind, t))| Payload::EntitySpawn {
                net_id: id.0,
                kind: *kind,
                position: t.position,
                size: self
                    .registry
                    .get::<Hitbox>(e)
                    .ok()
                    .flatten()
                    .map_or(Vec2::ZERO, |h| h.size),
            })
            .collect();
        known.sort_by_key(|p| match p {
            Payload::EntitySpawn { net_id, .. } => *net_id,
            _ => 0,
        });
        for payload in known {
            handle.send(payload);
        }
    }

    /// Voluntary leave. The session goes back to the lobby.
    pub fn leave(&mut self, session_id: u32) -> bool {
        let Some(member) = self.members.remove(&session_id) else {
            return false;
        };
        member.handle.detach_input();
        member.handle.with(|s| s.leave_room()).ok();
        if let Some(player) = member.player {
            self.despawn(player);
        }
        info!(room_id = self.settings.id, session_id, "left room");
        self.broadcast(self.room_update());
        true
    }

    /// Removes a player entity, telling remaining members if they knew it.
    fn despawn(&mut self, player: Entity) {
        if self.registry.has::<Replicated>(player) {
            let id = self.registry.get::<NetworkId>(player).ok().flatten().copied();
            let position = self
                .registry
                .get::<Transform>(player)
                .ok()
                .flatten()
                .map_or(Vec2::ZERO, |t| t.position);
            if let Some(id) = id {
                self.broadcast(Payload::EntityDeath {
                    net_id: id.0,
                    kind: EntityKind::Player,
                    position,
                });
            }
        }
        self.registry.destroy(player);
    }

    pub fn set_ready(&mut self, session_id: u32, ready: bool) {
        let Some(member) = self.members.get_mut(&session_id) else {
            return;
        };
        member.ready = ready;
        debug!(room_id = self.settings.id, session_id, ready, "ready state");
        if self.state != RoomState::Waiting {
            return;
        }
        let mut players = self.members.values().filter(|m| !m.spectator).peekable();
        let all_ready = players.peek().is_some() && players.all(|m| m.ready);
        if all_ready {
            self.start();
        }
    }

    fn start(&mut self) {
        self.state = RoomState::InGame;
        info!(room_id = self.settings.id, players = self.player_count(), "game started");
        self.broadcast(Payload::StartGame {
            room_id: self.settings.id,
        });
        self.broadcast(self.room_update());
    }

    pub fn chat(&mut self, session_id: u32, message: String) {
        let Some(member) = self.members.get(&session_id) else {
            return;
        };
        let username = member.handle.username();
        self.broadcast(Payload::RoomChatReceived {
            session_id,
            username,
            message,
        });
    }

    /// Bans the session's username from this room and removes it.
    pub fn kick(&mut self, session_id: u32, reason: &str) -> bool {
        let Some(member) = self.members.get(&session_id) else {
            return false;
        };
        self.banned.insert(member.handle.username());
        member.handle.send(Payload::Kicked {
            reason: reason.to_owned(),
        });
        warn!(room_id = self.settings.id, session_id, %reason, "kicked");
        self.leave(session_id)
    }

    pub fn set_debug(&mut self, enabled: bool) {
        self.registry.insert_resource(DebugFlag(enabled));
        self.broadcast(Payload::DebugMode { enabled });
    }

    /// One fixed step: reap dead sessions, apply input, simulate, publish.
    pub fn tick(&mut self, now: Instant) {
        self.reap(now);
        self.apply_inputs();

        if self.state == RoomState::InGame {
            let dt = self.settings.speed / self.tick_hz as f32;
            if let Some(clock) = self.registry.resource_mut::<GameClock>() {
                clock.tick += 1;
                clock.elapsed += dt;
            }
            self.systems.tick(&mut self.registry, dt);
            if cfg!(debug_assertions) {
                if let Err(error) = self.registry.audit() {
                    error!(room_id = self.settings.id, %error, "registry corrupted, ending game");
                    self.state = RoomState::Finished;
                }
            }
            if self.state == RoomState::InGame {
                self.check_finished();
            }
        }

        let outbox = self
            .registry
            .resource_mut::<Outbox>()
            .map(|o| std::mem::take(&mut o.0))
            .unwrap_or_default();
        for payload in outbox {
            self.broadcast(payload);
        }

        self.tick = self.tick.wrapping_add(1);
        if self.state == RoomState::Finished && !self.members.is_empty() {
            self.broadcast(self.room_update());
            self.evict_all();
            return;
        }
        if self.tick % self.tick_hz == 0 {
            self.broadcast(self.room_update());
        }
    }

    /// Drops members whose session closed or went silent. Runs at the tick
    /// boundary so systems never see a half-removed player.
    fn reap(&mut self, now: Instant) {
        let gone: Vec<u32> = self
            .members
            .iter()
            .filter(|(_, m)| m.handle.is_disconnected() || m.handle.check_liveness(now))
            .map(|(id, _)| *id)
            .collect();
        for session_id in gone {
            if let Some(member) = self.members.remove(&session_id) {
                info!(room_id = self.settings.id, session_id, "reaped disconnected session");
                if let Some(player) = member.player {
                    self.despawn(player);
                }
            }
        }
    }

    /// Takes the newest queued frame per member; older ones are superseded.
    fn apply_inputs(&mut self) {
        for member in self.members.values_mut() {
            let mut newest: Option<InputFrame> = None;
            while let Ok(frame) = member.inputs.try_recv() {
                if newest.map_or(true, |n| frame.sequence > n.sequence) {
                    newest = Some(frame);
                }
            }
            let (Some(frame), Some(player)) = (newest, member.player) else {
                continue;
            };
            if let Ok(Some(intent)) = self.registry.get_mut::<InputIntent>(player) {
                *intent = InputIntent {
                    mask: frame.mask,
                    sequence: frame.sequence,
                };
            }
        }
    }

    fn check_finished(&mut self) {
        let elapsed = self.registry.resource::<GameClock>().map_or(0.0, |c| c.elapsed);
        let out_of_time =
            self.settings.duration_min > 0 && elapsed >= self.settings.duration_min as f32 * 60.0;
        let mut players = self
            .members
            .values()
            .filter(|m| !m.spectator)
            .filter_map(|m| m.player)
            .peekable();
        let wiped = players.peek().is_some() && players.all(|p| !self.registry.is_alive(p));
        if out_of_time || wiped {
            self.state = RoomState::Finished;
            info!(room_id = self.settings.id, out_of_time, wiped, "game finished");
        }
    }

    fn room_update(&self) -> Payload {
        Payload::RoomUpdate {
            room_id: self.settings.id,
            current_players: self.player_count(),
            server_tick: self.tick,
            entity_count: self.registry.len().min(usize::from(u16::MAX)) as u16,
            in_game: self.state == RoomState::InGame,
        }
    }

    fn broadcast(&self, payload: Payload) {
        for member in self.members.values() {
            member.handle.send(payload.clone());
        }
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.settings.id,
            name: self.settings.name.clone(),
            current_players: self.player_count(),
            max_players: self.settings.capacity,
            in_game: self.state == RoomState::InGame,
            level_id: self.settings.level_id,
            difficulty: self.settings.difficulty,
            speed: self.settings.speed,
            duration_min: self.settings.duration_min,
        }
    }

    /// Finished, empty after someone joined, or never claimed within the
    /// grace period.
    pub fn is_abandoned(&self, now: Instant) -> bool {
        self.state == RoomState::Finished
            || self.members.is_empty()
                && (self.claimed || now.duration_since(self.created) >= UNCLAIMED_GRACE)
    }

    /// Returns every member to the lobby. Used when the room closes.
    pub fn evict_all(&mut self) {
        let ids: Vec<u32> = self.members.keys().copied().collect();
        for id in ids {
            self.leave(id);
        }
    }

    pub fn session_ids(&self) -> Vec<u32> {
        self.members.keys().copied().collect()
    }
}

/// Requests accepted by a running room task.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        handle: Arc<SessionHandle>,
        spectator: bool,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Leave {
        session_id: u32,
    },
    Ready {
        session_id: u32,
        ready: bool,
    },
    Chat {
        session_id: u32,
        message: String,
    },
    Kick {
        session_id: u32,
        reason: String,
    },
    Debug {
        enabled: bool,
    },
    Shutdown,
}

/// Server-side handle on a room task.
#[derive(Debug)]
pub struct RoomHandle {
    id: u32,
    tx: mpsc::UnboundedSender<RoomCommand>,
    info: watch::Receiver<RoomInfo>,
    task: JoinHandle<()>,
}

impl RoomHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub async fn join(&self, handle: Arc<SessionHandle>, spectator: bool) -> Result<(), RoomError> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(RoomCommand::Join {
                handle,
                spectator,
                reply,
            })
            .is_err()
        {
            return Err(RoomError::NotFound);
        }
        rx.await.unwrap_or(Err(RoomError::NotFound))
    }

    /// Fire-and-forget command. Returns `false` if the room is gone.
    pub fn send(&self, command: RoomCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn info(&self) -> RoomInfo {
        self.info.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Runs `room` on its own task at `tick_hz`.
pub fn spawn_room(room: Room, tick_hz: u32) -> RoomHandle {
    let id = room.id();
    let (tx, rx) = mpsc::unbounded_channel();
    let (info_tx, info_rx) = watch::channel(room.info());
    let period = Duration::from_secs_f64(1.0 / f64::from(tick_hz.max(1)));
    let task = tokio::spawn(drive(room, rx, info_tx, period));
    RoomHandle {
        id,
        tx,
        info: info_rx,
        task,
    }
}

async fn drive(
    mut room: Room,
    mut rx: mpsc::UnboundedReceiver<RoomCommand>,
    info: watch::Sender<RoomInfo>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(room_id = room.id(), name = %room.settings().name, "room opened");

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    RoomCommand::Join { handle, spectator, reply } => {
                        let result = room.join(handle, spectator);
                        info.send_replace(room.info());
                        reply.send(result).ok();
                    }
                    RoomCommand::Leave { session_id } => {
                        room.leave(session_id);
                    }
                    RoomCommand::Ready { session_id, ready } => room.set_ready(session_id, ready),
                    RoomCommand::Chat { session_id, message } => room.chat(session_id, message),
                    RoomCommand::Kick { session_id, reason } => {
                        room.kick(session_id, &reason);
                    }
                    RoomCommand::Debug { enabled } => room.set_debug(enabled),
                    RoomCommand::Shutdown => break,
                }
                info.send_replace(room.info());
            }
            _ = interval.tick() => {
                let now = Instant::now();
                room.tick(now);
                info.send_replace(room.info());
                if room.is_abandoned(now) {
                    break;
                }
            }
        }
    }

    room.evict_all();
    info!(room_id = room.id(), ticks = room.tick_count(), "room closed");
}
