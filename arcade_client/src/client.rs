//! Client implementation.
//!
//! The client maintains:
//! - A reliable control stream, drained by a background task into a queue
//! - An unreliable datagram socket for input, snapshots and pings
//! - A [`Replica`] of the current room's entities
//! - An [`EventBus`] of presentation events (chat, game start, kicks)
//!
//! Requests that expect an answer (login, register, list, create, join) are
//! sent once and awaited over [`RetryPolicy`] backoff windows, bounded by the
//! liveness window. A successful register also logs the session in.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use arcade_shared::{
    components::WeaponKind,
    config::EngineConfig,
    error::NetError,
    event::EventBus,
    net::{
        Channel, CreateRoom, InputMask, JoinStatus, Packet, Payload, ReliableConn,
        ReliableWriter, RoomInfo, SequenceGate, UnreliableConn,
    },
};
use tokio::{
    sync::mpsc::{self, error::TryRecvError},
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, info, trace, warn};

use crate::{
    events::{
        ChatMessage, EntityDestroyed, GameEnded, GameStarted, Kicked, RoomsListed,
        ServerDisconnect,
    },
    replication::Replica,
    retry::RetryPolicy,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Handshake done, not logged in.
    Connected,
    LoggedIn,
    InRoom(u32),
    Disconnected,
}

/// Latest room status broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoomStatus {
    pub room_id: u32,
    pub current_players: u32,
    pub server_tick: u32,
    pub entity_count: u16,
    pub in_game: bool,
}

/// High-level game client.
pub struct GameClient {
    session_id: u32,
    tick_hz: u16,
    state: ClientState,
    username: Option<String>,

    writer: ReliableWriter,
    inbound: mpsc::UnboundedReceiver<Packet>,
    reader_task: JoinHandle<()>,
    unreliable: UnreliableConn,

    sequence: u32,
    gate: SequenceGate,
    retry: RetryPolicy,
    liveness: Duration,

    replica: Replica,
    events: EventBus,
    rooms: Vec<RoomInfo>,
    room_status: Option<RoomStatus>,
    debug_mode: bool,
    rtt: Option<Duration>,
}

impl GameClient {
    /// Connects to a server and performs the Hello/Welcome handshake.
    pub async fn connect(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %server_addr, "Connecting to server");

        // Bind UDP first so Hello can carry the port.
        let bind = SocketAddr::new(
            match server_addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                ip @ IpAddr::V6(_) => ip,
            },
            0,
        );
        let unreliable = UnreliableConn::connect(bind, server_addr)
            .await
            .context("udp connect")?;
        let udp_port = unreliable.local_addr().context("udp local_addr")?.port();

        let mut reliable = ReliableConn::connect(server_addr)
            .await
            .context("tcp connect")?;
        reliable
            .send(&Packet::new(1, 0, Payload::Hello { udp_port }))
            .await
            .context("send hello")?;

        let welcome = time::timeout(cfg.liveness_timeout(), reliable.recv())
            .await
            .context("waiting for welcome")??;
        let (session_id, tick_hz) = match welcome.payload {
            Payload::Welcome {
                session_id,
                tick_hz,
            } => (session_id, tick_hz),
            other => anyhow::bail!("expected Welcome, got {:?}", other.op_code()),
        };
        info!(session_id, tick_hz, "Connected to server");

        let (reader, writer) = reliable.into_split();
        let (tx, inbound) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(async move {
            let mut reader = reader;
            loop {
                match reader.recv().await {
                    Ok(packet) => {
                        if tx.send(packet).is_err() {
                            break;
                        }
                    }
                    Err(NetError::InvalidFormat(error)) => {
                        debug!(%error, "malformed packet from server dropped");
                    }
                    Err(error) => {
                        debug!(%error, "reliable channel closed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            session_id,
            tick_hz,
            state: ClientState::Connected,
            username: None,
            writer,
            inbound,
            reader_task,
            unreliable,
            sequence: 2,
            gate: SequenceGate::default(),
            retry: RetryPolicy::from(cfg.request_retry),
            liveness: cfg.liveness_timeout(),
            replica: Replica::new(),
            events: EventBus::default(),
            rooms: Vec::new(),
            room_status: None,
            debug_mode: false,
            rtt: None,
        })
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn tick_hz(&self) -> u16 {
        self.tick_hz
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn events(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Rooms from the last listing.
    pub fn rooms(&self) -> &[RoomInfo] {
        &self.rooms
    }

    pub fn room_status(&self) -> Option<RoomStatus> {
        self.room_status
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Round trip of the last answered ping.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    fn next_packet(&mut self, payload: Payload) -> Packet {
        let packet = Packet::new(self.sequence, self.session_id, payload);
        self.sequence = self.sequence.wrapping_add(1);
        packet
    }

    /// Sends on the channel the op code prefers.
    pub async fn send(&mut self, payload: Payload) -> Result<(), NetError> {
        if self.state == ClientState::Disconnected {
            return Err(NetError::Disconnected);
        }
        let packet = self.next_packet(payload);
        match packet.op_code().channel() {
            Channel::Unreliable => self.unreliable.send(&packet).await,
            Channel::Reliable => self.writer.send(&packet).await,
        }
    }

    pub async fn login(
        &mut self,
        username: &str,
        password: &str,
        weapon: WeaponKind,
    ) -> Result<bool, NetError> {
        let payload = Payload::LoginRequest {
            username: username.to_owned(),
            password: password.to_owned(),
            weapon,
        };
        let success = self
            .request("login", payload, |p| match p {
                Payload::LoginResponse { success, .. } => Some(*success),
                _ => None,
            })
            .await?;
        info!(%username, success, "login");
        Ok(success)
    }

    pub async fn register(&mut self, username: &str, password: &str) -> Result<bool, NetError> {
        let payload = Payload::RegisterRequest {
            username: username.to_owned(),
            password: password.to_owned(),
        };
        self.request("register", payload, |p| match p {
            Payload::RegisterResponse { success, .. } => Some(*success),
            _ => None,
        })
        .await
    }

    pub async fn list_rooms(&mut self) -> Result<Vec<RoomInfo>, NetError> {
        self.request("list_rooms", Payload::ListRooms, |p| match p {
            Payload::RoomList { rooms } => Some(rooms.clone()),
            _ => None,
        })
        .await
    }

    /// Creates a room and joins it. Returns the join outcome and room id.
    pub async fn create_room(&mut self, req: CreateRoom) -> Result<(JoinStatus, u32), NetError> {
        self.request("create_room", Payload::CreateRoom(req), join_response)
            .await
    }

    pub async fn join_room(
        &mut self,
        room_id: u32,
        spectator: bool,
    ) -> Result<JoinStatus, NetError> {
        let (status, _) = self
            .request(
                "join_room",
                Payload::JoinRoom { room_id, spectator },
                join_response,
            )
            .await?;
        Ok(status)
    }

    pub async fn leave_room(&mut self) -> Result<(), NetError> {
        self.send(Payload::LeaveRoom).await?;
        if let ClientState::InRoom(room_id) = self.state {
            info!(room_id, "left room");
            self.state = ClientState::LoggedIn;
        }
        self.replica.clear();
        self.room_status = None;
        Ok(())
    }

    pub async fn set_ready(&mut self, ready: bool) -> Result<(), NetError> {
        self.send(Payload::SetReady { ready }).await
    }

    pub async fn send_chat(&mut self, message: &str) -> Result<(), NetError> {
        self.send(Payload::RoomChatSend {
            message: message.to_owned(),
        })
        .await
    }

    pub async fn send_input(&mut self, mask: InputMask) -> Result<(), NetError> {
        self.send(Payload::Input { mask }).await
    }

    /// Sends a ping stamped with the wall clock; the pong sets [`Self::rtt`].
    pub async fn ping(&mut self) -> Result<(), NetError> {
        let time_ms = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        self.send(Payload::Ping { time_ms }).await
    }

    pub async fn disconnect(&mut self, reason: &str) -> Result<(), NetError> {
        let result = self
            .send(Payload::Disconnect {
                reason: reason.to_owned(),
            })
            .await;
        self.state = ClientState::Disconnected;
        self.writer.shutdown().await.ok();
        self.reader_task.abort();
        result
    }

    /// Applies everything queued on both channels without waiting.
    ///
    /// Returns the number of packets applied.
    pub fn poll(&mut self) -> Result<usize, NetError> {
        let mut applied = 0;
        loop {
            match self.inbound.try_recv() {
                Ok(packet) => {
                    self.apply(packet);
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.state = ClientState::Disconnected;
                    return Err(NetError::Disconnected);
                }
            }
        }
        loop {
            match self.unreliable.try_recv() {
                Ok(Some(packet)) => {
                    self.apply(packet);
                    applied += 1;
                }
                Ok(None) => break,
                Err(NetError::InvalidFormat(error)) => {
                    debug!(%error, "malformed datagram dropped");
                }
                Err(error) => {
                    trace!(%error, "datagram receive failed");
                    break;
                }
            }
        }
        Ok(applied)
    }

    /// Waits up to `timeout` for a payload matching `pred`, applying
    /// everything that arrives meanwhile.
    pub async fn wait_for(
        &mut self,
        timeout: Duration,
        mut pred: impl FnMut(&Payload) -> bool,
    ) -> Result<Payload, NetError> {
        let deadline = Instant::now() + timeout;
        while let Some(packet) = self.recv_until(deadline).await? {
            let payload = packet.payload.clone();
            let matched = pred(&payload);
            self.apply(packet);
            if matched {
                return Ok(payload);
            }
        }
        Err(NetError::Timeout("wait_for"))
    }

    /// Sends `payload` once and waits for the answer over the backoff
    /// windows. The request is only sent again when the previous send failed.
    async fn request<T>(
        &mut self,
        what: &'static str,
        payload: Payload,
        mut accept: impl FnMut(&Payload) -> Option<T>,
    ) -> Result<T, NetError> {
        // Late answers to an earlier request must not satisfy this one.
        self.poll()?;
        let deadline = Instant::now() + self.liveness;
        let attempts = self.retry.attempts() as usize;
        let windows: Vec<Duration> = self.retry.delays().collect();
        let mut in_flight = false;
        for (attempt, window) in windows.into_iter().enumerate() {
            if in_flight {
                debug!(request = what, attempt, "still waiting for reply");
            } else {
                match self.send(payload.clone()).await {
                    Ok(()) => in_flight = true,
                    Err(NetError::Io(error)) if attempt + 1 < attempts => {
                        debug!(request = what, attempt, %error, "request send failed");
                    }
                    Err(error) => return Err(error),
                }
            }
            let until = (Instant::now() + window).min(deadline);
            while let Some(packet) = self.recv_until(until).await? {
                let answer = accept(&packet.payload);
                self.apply(packet);
                if let Some(answer) = answer {
                    return Ok(answer);
                }
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        warn!(request = what, "request timed out");
        Err(NetError::Timeout(what))
    }

    /// Next packet from either channel, or `None` at the deadline.
    async fn recv_until(&mut self, deadline: Instant) -> Result<Option<Packet>, NetError> {
        loop {
            tokio::select! {
                packet = self.inbound.recv() => match packet {
                    Some(packet) => return Ok(Some(packet)),
                    None => {
                        self.state = ClientState::Disconnected;
                        return Err(NetError::Disconnected);
                    }
                },
                datagram = self.unreliable.recv() => match datagram {
                    Ok(packet) => return Ok(Some(packet)),
                    Err(NetError::InvalidFormat(error)) => {
                        debug!(%error, "malformed datagram dropped");
                    }
                    Err(error) => {
                        trace!(%error, "datagram receive failed");
                    }
                },
                _ = time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    fn apply(&mut self, packet: Packet) {
        if !self.gate.admit(packet.op_code(), packet.sequence) {
            trace!(op = ?packet.op_code(), sequence = packet.sequence, "stale packet dropped");
            return;
        }
        match packet.payload {
            Payload::LoginResponse { success, username }
            | Payload::RegisterResponse { success, username } => {
                if success && self.state == ClientState::Connected {
                    self.state = ClientState::LoggedIn;
                    self.username = Some(username);
                }
            }
            Payload::RoomList { rooms } => {
                self.rooms = rooms.clone();
                self.events.push(RoomsListed(rooms));
            }
            Payload::JoinRoomResponse { status, room_id } => {
                if status == JoinStatus::Ok {
                    info!(room_id, "joined room");
                    self.state = ClientState::InRoom(room_id);
                    self.replica.clear();
                }
            }
            Payload::RoomUpdate {
                room_id,
                current_players,
                server_tick,
                entity_count,
                in_game,
            } => {
                let was_in_game = self.room_status.is_some_and(|s| s.in_game);
                if was_in_game && !in_game && self.state == ClientState::InRoom(room_id) {
                    info!(room_id, "game over");
                    self.state = ClientState::LoggedIn;
                    self.replica.clear();
                    self.room_status = None;
                    self.events.push(GameEnded { room_id });
                    return;
                }
                self.room_status = Some(RoomStatus {
                    room_id,
                    current_players,
                    server_tick,
                    entity_count,
                    in_game,
                });
            }
            Payload::RoomChatReceived {
                session_id,
                username,
                message,
            } => self.events.push(ChatMessage {
                session_id,
                username,
                message,
            }),
            Payload::StartGame { room_id } => {
                info!(room_id, "game started");
                self.events.push(GameStarted { room_id });
            }
            Payload::DebugMode { enabled } => self.debug_mode = enabled,
            Payload::Kicked { reason } => {
                warn!(%reason, "kicked from room");
                self.state = ClientState::LoggedIn;
                self.replica.clear();
                self.room_status = None;
                self.events.push(Kicked { reason });
            }
            Payload::Disconnect { reason } => {
                info!(%reason, "server closed the session");
                self.state = ClientState::Disconnected;
                self.events.push(ServerDisconnect { reason });
            }
            Payload::Pong { time_ms } => {
                let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
                self.rtt = Some(Duration::from_millis(now.saturating_sub(time_ms)));
            }
            Payload::EntityDeath {
                net_id,
                kind,
                position,
            } => {
                self.replica.apply(&Payload::EntityDeath {
                    net_id,
                    kind,
                    position,
                });
                self.events.push(EntityDestroyed {
                    net_id,
                    kind,
                    position,
                });
            }
            payload => {
                if !self.replica.apply(&payload) {
                    debug!(op = ?payload.op_code(), "unhandled payload");
                }
            }
        }
    }

    /// Executes a console command.
    pub async fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&cmd, args)) = tokens.split_first() else {
            return Ok(Vec::new());
        };

        match cmd {
            "status" => {
                let mut out = vec![
                    format!("State: {:?}", self.state),
                    format!("Session: {}", self.session_id),
                    format!("Entities: {}", self.replica.len()),
                ];
                if let Some(rtt) = self.rtt {
                    out.push(format!("RTT: {}ms", rtt.as_millis()));
                }
                if let Some(status) = self.room_status {
                    out.push(format!(
                        "Room #{} players={} tick={} in_game={}",
                        status.room_id, status.current_players, status.server_tick, status.in_game
                    ));
                }
                Ok(out)
            }
            "rooms" => {
                let rooms = self.list_rooms().await?;
                if rooms.is_empty() {
                    return Ok(vec!["No rooms".to_string()]);
                }
                Ok(rooms
                    .iter()
                    .map(|r| {
                        format!(
                            "  #{} '{}' {}/{} in_game={}",
                            r.room_id, r.name, r.current_players, r.max_players, r.in_game
                        )
                    })
                    .collect())
            }
            "create" => {
                let Some(name) = args.first() else {
                    return Ok(vec!["Usage: create <name> [max_players]".to_string()]);
                };
                let max_players = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
                let (status, room_id) = self
                    .create_room(CreateRoom {
                        name: (*name).to_string(),
                        max_players,
                        difficulty: 1.0,
                        speed: 1.0,
                        level_id: 0,
                        seed: 0,
                        duration_min: 0,
                    })
                    .await?;
                Ok(vec![format!("Create: {status:?} room {room_id}")])
            }
            "join" | "spectate" => {
                let Some(room_id) = args.first().and_then(|s| s.parse().ok()) else {
                    return Ok(vec![format!("Usage: {cmd} <room_id>")]);
                };
                let status = self.join_room(room_id, cmd == "spectate").await?;
                Ok(vec![format!("Join: {status:?}")])
            }
            "leave" => {
                self.leave_room().await?;
                Ok(vec!["Left room".to_string()])
            }
            "ready" => {
                let ready = args.first().map_or(true, |s| *s != "off");
                self.set_ready(ready).await?;
                Ok(Vec::new())
            }
            "say" => {
                self.send_chat(&args.join(" ")).await?;
                Ok(Vec::new())
            }
            "ping" => {
                self.ping().await?;
                Ok(Vec::new())
            }
            other => Ok(vec![format!("Unknown command '{other}'")]),
        }
    }

    pub fn server_peer(&self) -> SocketAddr {
        self.unreliable.peer_addr()
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

fn join_response(payload: &Payload) -> Option<(JoinStatus, u32)> {
    match payload {
        Payload::JoinRoomResponse { status, room_id } => Some((*status, *room_id)),
        _ => None,
    }
}
