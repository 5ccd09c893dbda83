//! Server network endpoint.
//!
//! One task per connection does the handshake and then reads frames; a
//! sibling task writes the session's outbound queue, choosing TCP or UDP per
//! op code. Everything that needs server-wide state (accounts, rooms, the
//! session table) is funneled back to [`GameServer::run`] as events, so the
//! lobby logic is single-threaded and lock-free.
//!
//! Console commands: `status`, `rooms`, `kick <session> [reason]`,
//! `debug <room> on|off`, `quit`.

use std::{
    collections::{BTreeMap, HashMap},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use anyhow::Context;
use arcade_shared::{
    components::WeaponKind,
    config::EngineConfig,
    error::{NetError, RoomError},
    net::{
        Channel, CreateRoom, JoinStatus, Packet, Payload, ReliableConn, ReliableListener,
        ReliableReader, ReliableWriter, Routed, SessionHandle, SessionState, UnreliableEndpoint,
    },
    templates::LevelDefinition,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    auth::{AccountStore, InMemoryAccounts},
    room::{spawn_room, Room, RoomCommand, RoomHandle, RoomSettings},
};

/// Cadence of the session/room reaper.
pub const REAP_INTERVAL: Duration = Duration::from_millis(500);
/// Time the writer gets to flush after the reader side closed.
const FLUSH_GRACE: Duration = Duration::from_millis(200);

/// Messages from connection tasks to the server loop.
#[derive(Debug)]
enum ServerEvent {
    Lobby { session_id: u32, packet: Packet },
    Closed { session_id: u32 },
}

/// What every connection task needs from the server.
struct ConnContext {
    udp: Arc<UnreliableEndpoint>,
    events: mpsc::UnboundedSender<ServerEvent>,
    tick_hz: u32,
    liveness: Duration,
}

struct SessionEntry {
    handle: Arc<SessionHandle>,
    peer: SocketAddr,
    task: JoinHandle<()>,
}

pub struct GameServer {
    cfg: EngineConfig,
    tcp: ReliableListener,
    udp: Arc<UnreliableEndpoint>,
    accounts: Arc<dyn AccountStore>,
    sessions: HashMap<u32, SessionEntry>,
    rooms: BTreeMap<u32, RoomHandle>,
    levels: BTreeMap<u32, LevelDefinition>,
    next_session: u32,
    next_room: u32,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
    console_rx: Option<mpsc::Receiver<String>>,
    running: bool,
    started: Instant,
}

impl GameServer {
    /// Binds TCP on `cfg.server_addr` and UDP on the same resolved port.
    pub async fn bind(cfg: EngineConfig, accounts: Arc<dyn AccountStore>) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await.context("tcp bind")?;
        let local = tcp.local_addr()?;
        let udp = UnreliableEndpoint::bind(local).await.context("udp bind")?;

        let level = LevelDefinition::builtin();
        let levels = BTreeMap::from([(level.id, level)]);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut cfg = cfg;
        cfg.server_addr = local.to_string();

        Ok(Self {
            cfg,
            tcp,
            udp: Arc::new(udp),
            accounts,
            sessions: HashMap::new(),
            rooms: BTreeMap::new(),
            levels,
            next_session: 1,
            next_room: 1,
            events_tx,
            events_rx,
            console_rx: None,
            running: true,
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    /// Registers an extra level, replacing any with the same id.
    pub fn add_level(&mut self, level: LevelDefinition) {
        let dangling = level.dangling_spawns().count();
        if dangling > 0 {
            warn!(level_id = level.id, dangling, "level has spawns without templates");
        }
        self.levels.insert(level.id, level);
    }

    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    /// Serves until `quit`.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut reaper = time::interval(REAP_INTERVAL);
        reaper.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let udp = Arc::clone(&self.udp);
        info!(addr = %self.cfg.server_addr, tick_hz = self.cfg.tick_hz, "server running");

        while self.running {
            tokio::select! {
                accepted = self.tcp.accept() => match accepted {
                    Ok((conn, peer)) => self.on_accept(conn, peer),
                    Err(error) => warn!(%error, "accept failed"),
                },
                datagram = udp.recv_from() => match datagram {
                    Ok((Ok(packet), from)) => self.on_datagram(packet, from).await,
                    Ok((Err(error), from)) => debug!(%from, %error, "malformed datagram dropped"),
                    Err(error) => warn!(%error, "udp receive failed"),
                },
                Some(event) = self.events_rx.recv() => self.on_event(event).await,
                line = next_line(&mut self.console_rx) => match line {
                    Some(line) => {
                        for out in self.exec_console(&line) {
                            println!("{out}");
                        }
                    }
                    None => self.console_rx = None,
                },
                _ = reaper.tick() => self.reap(Instant::now()),
            }
        }

        self.shutdown();
        Ok(())
    }

    fn on_accept(&mut self, conn: ReliableConn, peer: SocketAddr) {
        let session_id = self.next_session;
        self.next_session = self.next_session.wrapping_add(1).max(1);

        let (handle, outbound) =
            SessionHandle::new(session_id, Instant::now(), self.cfg.liveness_timeout());
        let ctx = ConnContext {
            udp: Arc::clone(&self.udp),
            events: self.events_tx.clone(),
            tick_hz: self.cfg.tick_hz,
            liveness: self.cfg.liveness_timeout(),
        };
        let task = tokio::spawn(serve_connection(conn, peer, Arc::clone(&handle), outbound, ctx));
        info!(session_id, %peer, "connection accepted");
        self.sessions
            .insert(session_id, SessionEntry { handle, peer, task });
    }

    async fn on_datagram(&mut self, packet: Packet, from: SocketAddr) {
        let Some(entry) = self.sessions.get(&packet.session_id) else {
            debug!(%from, session_id = packet.session_id, "datagram for unknown session");
            return;
        };
        if entry.peer.ip() != from.ip() {
            debug!(%from, session_id = packet.session_id, "datagram from foreign address");
            return;
        }
        let handle = Arc::clone(&entry.handle);
        handle.with(|s| s.set_udp_peer(from));
        if let Routed::Lobby(packet) = handle.receive(packet, Instant::now()) {
            self.handle_lobby(&handle, packet).await;
        }
    }

    async fn on_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Lobby { session_id, packet } => {
                let Some(handle) = self.sessions.get(&session_id).map(|e| Arc::clone(&e.handle))
                else {
                    return;
                };
                self.handle_lobby(&handle, packet).await;
            }
            ServerEvent::Closed { session_id } => self.drop_session(session_id),
        }
    }

    fn drop_session(&mut self, session_id: u32) {
        if let Some(entry) = self.sessions.remove(&session_id) {
            entry.handle.close();
            entry.task.abort();
            info!(session_id, "session closed");
        }
    }

    /// Handshake, control, room and liveness requests.
    async fn handle_lobby(&mut self, handle: &Arc<SessionHandle>, packet: Packet) {
        let session_id = handle.id();
        match packet.payload {
            Payload::LoginRequest {
                username,
                password,
                weapon,
            } => {
                let success = self.login(handle, &username, &password, weapon).await;
                handle.send(Payload::LoginResponse { success, username });
            }
            Payload::RegisterRequest { username, password } => {
                let success = self.register(handle, &username, &password).await;
                handle.send(Payload::RegisterResponse { success, username });
            }
            Payload::ListRooms => {
                if handle.state() == SessionState::Connecting {
                    return;
                }
                let rooms = self
                    .rooms
                    .values()
                    .filter(|r| !r.is_closed())
                    .map(RoomHandle::info)
                    .collect();
                handle.send(Payload::RoomList { rooms });
            }
            Payload::CreateRoom(req) => {
                if let Err(error) = self.create_room(handle, &req).await {
                    debug!(session_id, %error, "create room rejected");
                    handle.send(Payload::JoinRoomResponse {
                        status: JoinStatus::from(error),
                        room_id: 0,
                    });
                }
            }
            Payload::JoinRoom { room_id, spectator } => {
                let result = match self.rooms.get(&room_id) {
                    Some(room) => room.join(Arc::clone(handle), spectator).await,
                    None => Err(RoomError::NotFound),
                };
                if let Err(error) = result {
                    debug!(session_id, room_id, %error, "join rejected");
                    handle.send(Payload::JoinRoomResponse {
                        status: JoinStatus::from(error),
                        room_id,
                    });
                }
            }
            Payload::LeaveRoom => self.to_room(handle, RoomCommand::Leave { session_id }),
            Payload::SetReady { ready } => {
                self.to_room(handle, RoomCommand::Ready { session_id, ready })
            }
            Payload::RoomChatSend { message } => {
                self.to_room(handle, RoomCommand::Chat {
                    session_id,
                    message,
                })
            }
            Payload::Ping { time_ms } => {
                handle.send(Payload::Pong { time_ms });
            }
            Payload::Disconnect { reason } => {
                info!(session_id, %reason, "client disconnected");
                self.drop_session(session_id);
            }
            other => {
                debug!(session_id, op = ?other.op_code(), "unexpected payload from client");
            }
        }
    }

    async fn login(
        &self,
        handle: &SessionHandle,
        username: &str,
        password: &str,
        weapon: WeaponKind,
    ) -> bool {
        let session_id = handle.id();
        if !self.may_authenticate(handle, username) {
            return false;
        }
        if let Err(error) = self.accounts.login(username, password).await {
            debug!(session_id, %username, %error, "login rejected");
            return false;
        }
        Self::authenticate(handle, username, weapon)
    }

    /// A successful register also logs the session in.
    async fn register(&self, handle: &SessionHandle, username: &str, password: &str) -> bool {
        let session_id = handle.id();
        if !self.may_authenticate(handle, username) {
            return false;
        }
        if let Err(error) = self.accounts.register(username, password).await {
            debug!(session_id, %username, %error, "register rejected");
            return false;
        }
        info!(session_id, %username, "account registered");
        Self::authenticate(handle, username, WeaponKind::default())
    }

    fn may_authenticate(&self, handle: &SessionHandle, username: &str) -> bool {
        let session_id = handle.id();
        if handle.state() != SessionState::Connecting {
            debug!(session_id, "authentication outside of handshake");
            return false;
        }
        let taken = self.sessions.values().any(|e| {
            e.handle.id() != session_id
                && !e.handle.is_disconnected()
                && e.handle.username() == username
        });
        if taken {
            warn!(session_id, %username, "user already logged in");
        }
        !taken
    }

    fn authenticate(handle: &SessionHandle, username: &str, weapon: WeaponKind) -> bool {
        let session_id = handle.id();
        match handle.with(|s| s.authenticate(username, weapon)) {
            Ok(()) => {
                info!(session_id, %username, ?weapon, "logged in");
                true
            }
            Err(error) => {
                debug!(session_id, %error, "login transition refused");
                false
            }
        }
    }

    async fn create_room(
        &mut self,
        handle: &Arc<SessionHandle>,
        req: &CreateRoom,
    ) -> Result<(), RoomError> {
        if handle.state() != SessionState::Authenticated {
            return Err(RoomError::NotAuthenticated);
        }
        self.rooms.retain(|_, r| !r.is_closed());
        if self.rooms.len() >= self.cfg.max_rooms {
            return Err(RoomError::RegistryFull);
        }
        let level_id = if req.level_id == 0 { 1 } else { req.level_id };
        let level = self
            .levels
            .get(&level_id)
            .cloned()
            .ok_or(RoomError::InvalidParameter("level_id"))?;

        let room_id = self.next_room;
        let mut settings = RoomSettings::from_request(room_id, req, &self.cfg)?;
        settings.level_id = level_id;
        self.next_room = self.next_room.wrapping_add(1).max(1);

        let room = Room::new(settings, level, self.cfg.arena.bounds(), self.cfg.tick_hz);
        let room = spawn_room(room, self.cfg.tick_hz);
        info!(room_id, session_id = handle.id(), name = %req.name, "room created");
        let joined = room.join(Arc::clone(handle), false).await;
        self.rooms.insert(room_id, room);
        joined
    }

    fn to_room(&self, handle: &SessionHandle, command: RoomCommand) {
        match handle.state() {
            SessionState::InRoom(room_id) => {
                if let Some(room) = self.rooms.get(&room_id) {
                    room.send(command);
                }
            }
            state => debug!(session_id = handle.id(), %state, "room request outside a room"),
        }
    }

    fn reap(&mut self, now: Instant) {
        let dead: Vec<u32> = self
            .sessions
            .values()
            .filter(|e| e.handle.is_disconnected() || e.handle.check_liveness(now))
            .map(|e| e.handle.id())
            .collect();
        for session_id in dead {
            info!(session_id, "session timed out");
            self.drop_session(session_id);
        }

        let before = self.rooms.len();
        self.rooms.retain(|_, r| !r.is_closed());
        if self.rooms.len() != before {
            debug!(closed = before - self.rooms.len(), "rooms closed");
        }
    }

    /// Runs one console command and returns its output lines.
    pub fn exec_console(&mut self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&cmd, args)) = tokens.split_first() else {
            return Vec::new();
        };

        match cmd {
            "status" => vec![
                format!("Address: {}", self.cfg.server_addr),
                format!("Uptime: {}s", self.started.elapsed().as_secs()),
                format!("Sessions: {}", self.sessions.len()),
                format!("Rooms: {}", self.rooms.len()),
            ],
            "rooms" => {
                if self.rooms.is_empty() {
                    return vec!["No rooms".to_string()];
                }
                self.rooms
                    .values()
                    .map(RoomHandle::info)
                    .map(|r| {
                        format!(
                            "  #{} '{}' {}/{} in_game={} level={}",
                            r.room_id,
                            r.name,
                            r.current_players,
                            r.max_players,
                            r.in_game,
                            r.level_id
                        )
                    })
                    .collect()
            }
            "kick" => {
                let Some(session_id) = args.first().and_then(|s| s.parse::<u32>().ok()) else {
                    return vec!["Usage: kick <session_id> [reason]".to_string()];
                };
                let reason = if args.len() > 1 {
                    args[1..].join(" ")
                } else {
                    "kicked by admin".to_string()
                };
                let Some(entry) = self.sessions.get(&session_id) else {
                    return vec![format!("No session {session_id}")];
                };
                match entry.handle.state() {
                    SessionState::InRoom(room_id) => {
                        self.to_room(&entry.handle, RoomCommand::Kick { session_id, reason });
                        vec![format!("Kicked session {session_id} from room {room_id}")]
                    }
                    state => vec![format!("Session {session_id} is not in a room ({state})")],
                }
            }
            "debug" => {
                let (Some(room_id), Some(flag)) = (
                    args.first().and_then(|s| s.parse::<u32>().ok()),
                    args.get(1).copied(),
                ) else {
                    return vec!["Usage: debug <room_id> on|off".to_string()];
                };
                let enabled = match flag {
                    "on" => true,
                    "off" => false,
                    _ => return vec!["Usage: debug <room_id> on|off".to_string()],
                };
                match self.rooms.get(&room_id) {
                    Some(room) if room.send(RoomCommand::Debug { enabled }) => {
                        vec![format!("Room {room_id} debug {flag}")]
                    }
                    _ => vec![format!("No room {room_id}")],
                }
            }
            "quit" | "exit" => {
                info!("server shutting down");
                self.running = false;
                vec!["Shutting down".to_string()]
            }
            "help" => vec![
                "status | rooms | kick <session_id> [reason] | debug <room_id> on|off | quit"
                    .to_string(),
            ],
            other => vec![format!("Unknown command '{other}'")],
        }
    }

    fn shutdown(&mut self) {
        for room in self.rooms.values() {
            room.send(RoomCommand::Shutdown);
        }
        let ids: Vec<u32> = self.sessions.keys().copied().collect();
        for session_id in ids {
            if let Some(entry) = self.sessions.get(&session_id) {
                entry.handle.send(Payload::Disconnect {
                    reason: "server shutting down".to_string(),
                });
            }
            self.drop_session(session_id);
        }
    }
}

async fn next_line(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn serve_connection(
    conn: ReliableConn,
    peer: SocketAddr,
    handle: Arc<SessionHandle>,
    outbound: mpsc::UnboundedReceiver<Packet>,
    ctx: ConnContext,
) {
    let session_id = handle.id();
    let (mut reader, writer) = conn.into_split();

    match time::timeout(ctx.liveness, reader.recv()).await {
        Ok(Ok(Packet {
            payload: Payload::Hello { udp_port },
            ..
        })) => {
            if udp_port != 0 {
                handle.with(|s| s.set_udp_peer(SocketAddr::new(peer.ip(), udp_port)));
            }
            handle.with(|s| s.touch(Instant::now()));
        }
        other => {
            let outcome = other.map(|r| r.map(|p| p.op_code()));
            warn!(session_id, %peer, ?outcome, "handshake failed");
            ctx.events.send(ServerEvent::Closed { session_id }).ok();
            return;
        }
    }

    let mut writer_task = tokio::spawn(write_loop(
        writer,
        outbound,
        ctx.udp,
        Arc::downgrade(&handle),
    ));
    handle.send(Payload::Welcome {
        session_id,
        tick_hz: u16::try_from(ctx.tick_hz).unwrap_or(u16::MAX),
    });
    debug!(session_id, "handshake complete");

    read_loop(&mut reader, &handle, &ctx.events).await;

    if time::timeout(FLUSH_GRACE, &mut writer_task).await.is_err() {
        writer_task.abort();
    }
    ctx.events.send(ServerEvent::Closed { session_id }).ok();
}

async fn read_loop(
    reader: &mut ReliableReader,
    handle: &SessionHandle,
    events: &mpsc::UnboundedSender<ServerEvent>,
) {
    let session_id = handle.id();
    loop {
        match reader.recv().await {
            Ok(packet) => {
                if let Routed::Lobby(packet) = handle.receive(packet, Instant::now()) {
                    if events.send(ServerEvent::Lobby { session_id, packet }).is_err() {
                        break;
                    }
                }
            }
            Err(NetError::InvalidFormat(error)) => {
                debug!(session_id, %error, "malformed packet dropped");
            }
            Err(NetError::Disconnected) => {
                debug!(session_id, "peer closed the stream");
                break;
            }
            Err(error) => {
                warn!(session_id, %error, "reliable channel failed");
                break;
            }
        }
        if handle.is_disconnected() {
            break;
        }
    }
    handle.close();
}

/// Holds the session weakly so the queue closes once the last owner lets go.
async fn write_loop(
    mut writer: ReliableWriter,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
    udp: Arc<UnreliableEndpoint>,
    handle: Weak<SessionHandle>,
) {
    while let Some(packet) = outbound.recv().await {
        let Some(session) = handle.upgrade() else {
            break;
        };
        let session_id = session.id();
        let udp_peer = session.with(|s| s.udp_peer());
        drop(session);

        let result = match (packet.op_code().channel(), udp_peer) {
            (Channel::Unreliable, Some(peer)) => match udp.send_to(&packet, peer).await {
                // Datagram loss is expected on this channel.
                Err(NetError::Io(error)) => {
                    debug!(session_id, %error, "datagram send failed");
                    Ok(())
                }
                other => other,
            },
            _ => writer.send(&packet).await,
        };
        match result {
            Ok(()) => {}
            Err(NetError::InvalidFormat(error)) => {
                warn!(session_id, op = ?packet.op_code(), %error, "unencodable packet dropped");
            }
            Err(error) => {
                debug!(session_id, %error, "writer stopped");
                break;
            }
        }
    }
    writer.shutdown().await.ok();
}

/// Binds a server on an ephemeral localhost port with an in-memory account
/// store. Returns the server and the config with the bound address filled in.
pub async fn bind_ephemeral(cfg: EngineConfig) -> anyhow::Result<(GameServer, EngineConfig)> {
    let cfg = EngineConfig {
        server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
        ..cfg
    };
    let server = GameServer::bind(cfg, Arc::new(InMemoryAccounts::new())).await?;
    let cfg = server.config().clone();
    Ok((server, cfg))
}
