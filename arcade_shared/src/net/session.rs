//! Per-connection session state.
//!
//! States: `Connecting -> Authenticated -> InRoom -> Disconnected` (terminal).
//!
//! - [`Session`] is the plain state machine: transitions, sequence gating,
//!   liveness bookkeeping. It never touches sockets.
//! - [`SessionHandle`] is the shared, thread-safe wrapper the I/O tasks and a
//!   room both hold. Its queues are the only state crossing that boundary.

use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

use crate::{components::WeaponKind, error::SessionError};

use super::{
    codec::Packet,
    protocol::{InputMask, MessageClass, OpCode, Payload, PROTOCOL_VERSION},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Authenticated,
    InRoom(u32),
    Disconnected,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connecting => "Connecting",
            SessionState::Authenticated => "Authenticated",
            SessionState::InRoom(_) => "InRoom",
            SessionState::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::InRoom(id) => write!(f, "InRoom({id})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Inbound sequence gate.
///
/// State payloads are compared per op code, input per session; every other
/// class passes through.
#[derive(Debug, Default, Clone)]
pub struct SequenceGate {
    last_state: HashMap<OpCode, u32>,
    last_input: Option<u32>,
}

impl SequenceGate {
    /// Returns `true` and records `sequence` when the packet should be applied.
    pub fn admit(&mut self, op: OpCode, sequence: u32) -> bool {
        let class = op.class();
        let last = match class {
            MessageClass::State => self.last_state.get(&op).copied(),
            MessageClass::Input => self.last_input,
            _ => return true,
        };
        if last.is_some_and(|last| sequence <= last) {
            return false;
        }
        if class == MessageClass::Input {
            self.last_input = Some(sequence);
        } else {
            self.last_state.insert(op, sequence);
        }
        true
    }

    /// Forgets all history, e.g. when joining a new room.
    pub fn reset(&mut self) {
        self.last_state.clear();
        self.last_input = None;
    }
}

/// One client connection's protocol state.
#[derive(Debug)]
pub struct Session {
    id: u32,
    state: SessionState,
    version: u8,
    username: Option<String>,
    weapon: WeaponKind,
    gate: SequenceGate,
    next_outbound: u32,
    last_seen: Instant,
    liveness: Duration,
    udp_peer: Option<SocketAddr>,
}

impl Session {
    pub fn new(id: u32, now: Instant, liveness: Duration) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
            version: PROTOCOL_VERSION,
            username: None,
            weapon: WeaponKind::default(),
            gate: SequenceGate::default(),
            next_outbound: 1,
            last_seen: now,
            liveness,
            udp_peer: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn weapon(&self) -> WeaponKind {
        self.weapon
    }

    pub fn room(&self) -> Option<u32> {
        match self.state {
            SessionState::InRoom(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.state == SessionState::Disconnected
    }

    pub fn udp_peer(&self) -> Option<SocketAddr> {
        self.udp_peer
    }

    pub fn set_udp_peer(&mut self, peer: SocketAddr) {
        self.udp_peer = Some(peer);
    }

    fn invalid(&self, event: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            from: self.state.name(),
            event,
        }
    }

    /// `Connecting -> Authenticated` after a successful login.
    pub fn authenticate(&mut self, username: &str, weapon: WeaponKind) -> Result<(), SessionError> {
        if self.state != SessionState::Connecting {
            return Err(self.invalid("authenticate"));
        }
        self.username = Some(username.to_owned());
        self.weapon = weapon;
        self.state = SessionState::Authenticated;
        Ok(())
    }

    /// `Authenticated -> InRoom` after a successful join or create.
    pub fn enter_room(&mut self, room_id: u32) -> Result<(), SessionError> {
        if self.state != SessionState::Authenticated {
            return Err(self.invalid("enter_room"));
        }
        self.gate.reset();
        self.state = SessionState::InRoom(room_id);
        Ok(())
    }

    /// `InRoom -> Authenticated` on explicit leave or when the room ends.
    /// Returns the room that was left.
    pub fn leave_room(&mut self) -> Result<u32, SessionError> {
        match self.state {
            SessionState::InRoom(id) => {
                self.state = SessionState::Authenticated;
                Ok(id)
            }
            _ => Err(self.invalid("leave_room")),
        }
    }

    /// Any state `-> Disconnected`. Returns the room the session was in, if
    /// any, so the caller can start the player-removal path. Idempotent.
    pub fn disconnect(&mut self) -> Option<u32> {
        let room = self.room();
        self.state = SessionState::Disconnected;
        room
    }

    /// Records traffic from the peer.
    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > self.liveness
    }

    /// Disconnects the session if it has been silent past the liveness
    /// window. Returns `true` when this call made the transition.
    pub fn check_liveness(&mut self, now: Instant) -> bool {
        if self.is_disconnected() || !self.is_expired(now) {
            return false;
        }
        debug!(session_id = self.id, "liveness window expired");
        self.disconnect();
        true
    }

    /// Applies inbound sequence gating. Does not change the state machine.
    pub fn admit(&mut self, op: OpCode, sequence: u32) -> bool {
        self.gate.admit(op, sequence)
    }

    /// Next outbound sequence number (starts at 1, monotonically increasing).
    pub fn next_sequence(&mut self) -> u32 {
        let seq = self.next_outbound;
        self.next_outbound = self.next_outbound.wrapping_add(1).max(1);
        seq
    }
}

/// Input frame queued for the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFrame {
    pub sequence: u32,
    pub mask: InputMask,
}

/// Where an inbound packet should go after session-level handling.
#[derive(Debug, PartialEq)]
pub enum Routed {
    /// Queued for the room (input).
    Room,
    /// Handled by the lobby/handshake path.
    Lobby(Packet),
    /// Dropped: stale sequence, wrong state, or session closed.
    Discarded,
}

/// Thread-safe session shared between the I/O tasks and a room.
#[derive(Debug)]
pub struct SessionHandle {
    id: u32,
    session: Mutex<Session>,
    outbound: UnboundedSender<Packet>,
    input: Mutex<Option<UnboundedSender<InputFrame>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionHandle {
    /// Creates the handle and the receiving end of its outbound queue, which
    /// belongs to the connection's writer task.
    pub fn new(
        id: u32,
        now: Instant,
        liveness: Duration,
    ) -> (Arc<Self>, UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(Self {
            id,
            session: Mutex::new(Session::new(id, now, liveness)),
            outbound: tx,
            input: Mutex::new(None),
        });
        (handle, rx)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Runs `f` with the session locked. Keep `f` short; never await inside.
    pub fn with<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut lock(&self.session))
    }

    pub fn state(&self) -> SessionState {
        lock(&self.session).state()
    }

    pub fn username(&self) -> String {
        lock(&self.session).username().unwrap_or_default().to_owned()
    }

    /// Queues a payload for delivery, stamping the next outbound sequence.
    /// Returns `false` if the session is closed.
    ///
    /// The packet is queued while the session lock is held, so the queue is
    /// always in sequence order whichever task sends.
    pub fn send(&self, payload: Payload) -> bool {
        let mut session = lock(&self.session);
        if session.is_disconnected() {
            return false;
        }
        let packet = Packet::new(session.next_sequence(), self.id, payload);
        self.outbound.send(packet).is_ok()
    }

    /// Opens a fresh input queue for the room this session just joined.
    /// Any previous queue is closed.
    pub fn attach_input(&self) -> UnboundedReceiver<InputFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.input) = Some(tx);
        rx
    }

    pub fn detach_input(&self) {
        lock(&self.input).take();
    }

    /// Session-level handling of one inbound packet: liveness, sequence
    /// gating, and input queueing.
    pub fn receive(&self, packet: Packet, now: Instant) -> Routed {
        let op = packet.op_code();
        {
            let mut session = lock(&self.session);
            if session.is_disconnected() {
                return Routed::Discarded;
            }
            session.touch(now);
            if !session.admit(op, packet.sequence) {
                trace!(session_id = self.id, ?op, seq = packet.sequence, "stale packet dropped");
                return Routed::Discarded;
            }
            if op == OpCode::Input && session.room().is_none() {
                return Routed::Discarded;
            }
        }
        match packet.payload {
            Payload::Input { mask } => {
                let frame = InputFrame {
                    sequence: packet.sequence,
                    mask,
                };
                match lock(&self.input).as_ref() {
                    Some(tx) if tx.send(frame).is_ok() => Routed::Room,
                    _ => Routed::Discarded,
                }
            }
            _ => Routed::Lobby(packet),
        }
    }

    /// Forces the session closed and drops its input queue. Returns the room
    /// it was attached to.
    pub fn close(&self) -> Option<u32> {
        self.detach_input();
        lock(&self.session).disconnect()
    }

    pub fn check_liveness(&self, now: Instant) -> bool {
        let expired = lock(&self.session).check_liveness(now);
        if expired {
            self.detach_input();
        }
        expired
    }

    pub fn is_disconnected(&self) -> bool {
        lock(&self.session).is_disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIVENESS: Duration = Duration::from_secs(10);

    #[test]
    fn happy_path_transitions() -> anyhow::Result<()> {
        let now = Instant::now();
        let mut s = Session::new(1, now, LIVENESS);
        s.authenticate("ripley", WeaponKind::Classic)?;
        s.enter_room(3)?;
        assert_eq!(s.state(), SessionState::InRoom(3));
        assert_eq!(s.leave_room()?, 3);
        assert_eq!(s.state(), SessionState::Authenticated);
        assert_eq!(s.disconnect(), None);
        assert!(s.is_disconnected());
        Ok(())
    }

    #[test]
    fn concurrent_sends_queue_in_sequence_order() {
        let (handle, mut rx) = SessionHandle::new(1, Instant::now(), LIVENESS);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let handle = &handle;
                scope.spawn(move || {
                    for time_ms in 0..250 {
                        handle.send(Payload::Pong { time_ms });
                    }
                });
            }
        });
        let mut sequences = Vec::new();
        while let Ok(packet) = rx.try_recv() {
            sequences.push(packet.sequence);
        }
        assert_eq!(sequences.len(), 1000);
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut s = Session::new(1, Instant::now(), LIVENESS);
        assert_eq!(
            s.enter_room(1),
            Err(SessionError::InvalidTransition {
                from: "Connecting",
                event: "enter_room"
            })
        );
        s.disconnect();
        assert!(s.authenticate("x", WeaponKind::Classic).is_err());
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[test]
    fn disconnect_from_room_reports_room() -> anyhow::Result<()> {
        let mut s = Session::new(1, Instant::now(), LIVENESS);
        s.authenticate("a", WeaponKind::Beam)?;
        s.enter_room(9)?;
        assert_eq!(s.disconnect(), Some(9));
        assert_eq!(s.disconnect(), None);
        Ok(())
    }

    #[test]
    fn liveness_expires_after_window() {
        let start = Instant::now();
        let mut s = Session::new(1, start, LIVENESS);
        assert!(!s.check_liveness(start + Duration::from_secs(5)));
        s.touch(start + Duration::from_secs(5));
        assert!(!s.check_liveness(start + Duration::from_secs(14)));
        assert!(s.check_liveness(start + Duration::from_secs(16)));
        assert!(!s.check_liveness(start + Duration::from_secs(30)));
        assert!(s.is_disconnected());
    }

    #[test]
    fn state_payloads_gated_per_kind() {
        let mut gate = SequenceGate::default();
        assert!(gate.admit(OpCode::EntitySnapshot, 5));
        assert!(!gate.admit(OpCode::EntitySnapshot, 5));
        assert!(!gate.admit(OpCode::EntitySnapshot, 3));
        assert!(gate.admit(OpCode::HealthUpdate, 4));
        assert!(gate.admit(OpCode::EntitySnapshot, 6));
    }

    #[test]
    fn events_are_never_gated() {
        let mut gate = SequenceGate::default();
        assert!(gate.admit(OpCode::EntitySnapshot, 10));
        assert!(gate.admit(OpCode::EntityDeath, 2));
        assert!(gate.admit(OpCode::EntityDeath, 2));
        assert!(gate.admit(OpCode::RoomChatReceived, 1));
        assert!(gate.admit(OpCode::Ping, 0));
    }

    #[test]
    fn outbound_sequence_starts_at_one() {
        let mut s = Session::new(1, Instant::now(), LIVENESS);
        assert_eq!(s.next_sequence(), 1);
        assert_eq!(s.next_sequence(), 2);
    }

    #[tokio::test]
    async fn handle_routes_input_to_room_queue() -> anyhow::Result<()> {
        let now = Instant::now();
        let (handle, _out) = SessionHandle::new(7, now, LIVENESS);
        handle.with(|s| s.authenticate("a", WeaponKind::Classic))?;

        let input = Packet::new(1, 7, Payload::Input { mask: InputMask::UP });
        assert_eq!(handle.receive(input.clone(), now), Routed::Discarded);

        handle.with(|s| s.enter_room(1))?;
        let mut rx = handle.attach_input();
        let input = Packet::new(2, 7, Payload::Input { mask: InputMask::UP });
        assert_eq!(handle.receive(input.clone(), now), Routed::Room);
        assert_eq!(handle.receive(input, now), Routed::Discarded);
        assert_eq!(
            rx.try_recv()?,
            InputFrame {
                sequence: 2,
                mask: InputMask::UP
            }
        );

        let chat = Packet::new(3, 7, Payload::RoomChatSend { message: "hi".into() });
        assert!(matches!(handle.receive(chat, now), Routed::Lobby(_)));
        Ok(())
    }

    #[tokio::test]
    async fn closed_handle_stops_sending() {
        let (handle, mut out) = SessionHandle::new(1, Instant::now(), LIVENESS);
        assert!(handle.send(Payload::Ping { time_ms: 1 }));
        assert_eq!(handle.close(), None);
        assert!(!handle.send(Payload::Ping { time_ms: 2 }));
        let first = out.recv().await;
        assert_eq!(first.map(|p| p.sequence), Some(1));
    }
}
