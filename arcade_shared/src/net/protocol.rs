//! Wire header and payload catalog.
//!
//! Frame layout (big-endian, no padding):
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0      | 2    | magic `0xA1B2` |
//! | 2      | 1    | version        |
//! | 3      | 1    | op code        |
//! | 4      | 4    | sequence       |
//! | 8      | 4    | session id     |
//! | 12     | 4    | payload length |
//!
//! The catalog is closed: adding a payload is a [`PROTOCOL_VERSION`] bump.

use crate::{
    components::{EntityKind, WeaponKind},
    error::{DecodeError, RoomError},
    math::Vec2,
};

pub const MAGIC: u16 = 0xA1B2;
/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 16;
pub const MAX_BODY: usize = 64 * 1024;
pub const MAX_STRING: usize = 2048;
/// Element count checked before a vector is allocated on decode. For every
/// payload in the catalog [`MAX_BODY`] is reached first.
pub const MAX_VECTOR: usize = 8192;

/// Payload type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum OpCode {
    Hello = 0x01,
    Welcome = 0x02,
    Disconnect = 0x03,
    ListRooms = 0x04,
    RoomList = 0x05,
    CreateRoom = 0x06,
    JoinRoom = 0x07,
    LeaveRoom = 0x08,
    RoomUpdate = 0x09,
    SetReady = 0x0A,
    RoomChatSend = 0x0B,
    RoomChatReceived = 0x0C,
    StartGame = 0x0D,
    JoinRoomResponse = 0x0E,
    Input = 0x10,
    LoginRequest = 0x1A,
    RegisterRequest = 0x1B,
    EntitySnapshot = 0x20,
    EntitySpawn = 0x21,
    EntityDeath = 0x22,
    AmmoUpdate = 0x23,
    Ping = 0x24,
    Pong = 0x25,
    DebugMode = 0x26,
    Kicked = 0x27,
    HealthUpdate = 0x28,
    ScoreUpdate = 0x29,
    BeamState = 0x2A,
    LoginResponse = 0x9A,
    RegisterResponse = 0x9B,
}

/// How the receiver orders a message kind against earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Handshake,
    Control,
    Room,
    /// State-replacing: dropped unless newer than the last accepted of the same kind.
    State,
    /// Independent events, accepted whenever well-formed.
    Event,
    /// Client input: dropped unless newer than the last accepted input.
    Input,
    Liveness,
}

/// Transport channel a message kind travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Reliable,
    Unreliable,
}

impl OpCode {
    pub const ALL: [OpCode; 30] = [
        Self::Hello,
        Self::Welcome,
        Self::Disconnect,
        Self::ListRooms,
        Self::RoomList,
        Self::CreateRoom,
        Self::JoinRoom,
        Self::LeaveRoom,
        Self::RoomUpdate,
        Self::SetReady,
        Self::RoomChatSend,
        Self::RoomChatReceived,
        Self::StartGame,
        Self::JoinRoomResponse,
        Self::Input,
        Self::LoginRequest,
        Self::RegisterRequest,
        Self::EntitySnapshot,
        Self::EntitySpawn,
        Self::EntityDeath,
        Self::AmmoUpdate,
        Self::Ping,
        Self::Pong,
        Self::DebugMode,
        Self::Kicked,
        Self::HealthUpdate,
        Self::ScoreUpdate,
        Self::BeamState,
        Self::LoginResponse,
        Self::RegisterResponse,
    ];

    pub fn class(self) -> MessageClass {
        use OpCode::*;
        match self {
            Hello | Welcome | LoginRequest | RegisterRequest | LoginResponse | RegisterResponse => {
                MessageClass::Handshake
            }
            Disconnect | Kicked => MessageClass::Control,
            ListRooms | RoomList | CreateRoom | JoinRoom | LeaveRoom | SetReady
            | JoinRoomResponse => MessageClass::Room,
            RoomUpdate | EntitySnapshot | AmmoUpdate | HealthUpdate | ScoreUpdate | BeamState => {
                MessageClass::State
            }
            RoomChatSend | RoomChatReceived | StartGame | EntitySpawn | EntityDeath
            | DebugMode => MessageClass::Event,
            Input => MessageClass::Input,
            Ping | Pong => MessageClass::Liveness,
        }
    }

    /// Preferred channel once the peer's datagram endpoint is known.
    pub fn channel(self) -> Channel {
        match self {
            OpCode::Input | OpCode::EntitySnapshot | OpCode::Ping | OpCode::Pong => {
                Channel::Unreliable
            }
            _ => Channel::Reliable,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| *op as u8 == value)
            .ok_or(DecodeError::UnknownOpCode(value))
    }
}

bitflags::bitflags! {
    /// Logical actions sampled for one input frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputMask: u8 {
        const UP = 1 << 0;
        const DOWN = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const SHOOT = 1 << 4;
        const CHARGE = 1 << 5;
    }
}

impl InputMask {
    /// Unit-less movement direction, `y` grows downward.
    pub fn direction(self) -> Vec2 {
        let axis = |neg: InputMask, pos: InputMask| -> f32 {
            f32::from(u8::from(self.contains(pos))) - f32::from(u8::from(self.contains(neg)))
        };
        Vec2::new(
            axis(InputMask::LEFT, InputMask::RIGHT),
            axis(InputMask::UP, InputMask::DOWN),
        )
    }
}

/// Fixed header preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    /// Raw tag; may be unknown when the peer negotiated skipping.
    pub op: u8,
    pub sequence: u32,
    pub session_id: u32,
    pub payload_len: u32,
}

impl Header {
    pub fn op_code(&self) -> Result<OpCode, DecodeError> {
        OpCode::try_from(self.op)
    }
}

/// Outcome of a join or create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JoinStatus {
    Ok = 0,
    RegistryFull = 1,
    NotFound = 2,
    AlreadyStarted = 3,
    InvalidParameter = 4,
    Banned = 5,
    NotAuthenticated = 6,
}

impl From<RoomError> for JoinStatus {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::RegistryFull => Self::RegistryFull,
            RoomError::NotFound => Self::NotFound,
            RoomError::AlreadyStarted => Self::AlreadyStarted,
            RoomError::InvalidParameter(_) => Self::InvalidParameter,
            RoomError::Banned => Self::Banned,
            RoomError::NotAuthenticated => Self::NotAuthenticated,
        }
    }
}

impl TryFrom<u8> for JoinStatus {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Ok,
            1 => Self::RegistryFull,
            2 => Self::NotFound,
            3 => Self::AlreadyStarted,
            4 => Self::InvalidParameter,
            5 => Self::Banned,
            6 => Self::NotAuthenticated,
            _ => {
                return Err(DecodeError::InvalidEnum {
                    field: "join status",
                    value,
                })
            }
        })
    }
}

/// One row of the room browser.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomInfo {
    pub room_id: u32,
    pub name: String,
    pub current_players: u32,
    pub max_players: u32,
    pub in_game: bool,
    pub level_id: u32,
    pub difficulty: f32,
    pub speed: f32,
    pub duration_min: u32,
}

/// Room creation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRoom {
    pub name: String,
    /// 0 asks for the server default.
    pub max_players: u32,
    pub difficulty: f32,
    pub speed: f32,
    pub level_id: u32,
    pub seed: u32,
    /// 0 means no time limit.
    pub duration_min: u32,
}

/// Replicated kinematic state of one entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityState {
    pub net_id: u32,
    pub position: Vec2,
    pub velocity: Vec2,
    pub rotation: f32,
}

/// Closed payload catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    // ─── Handshake ───
    Hello {
        udp_port: u16,
    },
    Welcome {
        session_id: u32,
        tick_hz: u16,
    },
    LoginRequest {
        username: String,
        password: String,
        weapon: WeaponKind,
    },
    RegisterRequest {
        username: String,
        password: String,
    },
    LoginResponse {
        success: bool,
        username: String,
    },
    RegisterResponse {
        success: bool,
        username: String,
    },

    // ─── Control ───
    Disconnect {
        reason: String,
    },
    Kicked {
        reason: String,
    },

    // ─── Rooms ───
    ListRooms,
    RoomList {
        rooms: Vec<RoomInfo>,
    },
    CreateRoom(CreateRoom),
    JoinRoom {
        room_id: u32,
        spectator: bool,
    },
    LeaveRoom,
    JoinRoomResponse {
        status: JoinStatus,
        room_id: u32,
    },
    RoomUpdate {
        room_id: u32,
        current_players: u32,
        server_tick: u32,
        entity_count: u16,
        in_game: bool,
    },
    SetReady {
        ready: bool,
    },
    RoomChatSend {
        message: String,
    },
    RoomChatReceived {
        session_id: u32,
        username: String,
        message: String,
    },
    StartGame {
        room_id: u32,
    },
    DebugMode {
        enabled: bool,
    },

    // ─── Gameplay ───
    Input {
        mask: InputMask,
    },
    EntitySnapshot {
        server_tick: u32,
        full: bool,
        entities: Vec<EntityState>,
    },
    EntitySpawn {
        net_id: u32,
        kind: EntityKind,
        position: Vec2,
        size: Vec2,
    },
    EntityDeath {
        net_id: u32,
        kind: EntityKind,
        position: Vec2,
    },
    AmmoUpdate {
        net_id: u32,
        current: u16,
        max: u16,
        reloading: bool,
        cooldown: f32,
    },
    HealthUpdate {
        net_id: u32,
        current: i32,
        max: i32,
    },
    ScoreUpdate {
        net_id: u32,
        score: i32,
    },
    BeamState {
        net_id: u32,
        active: bool,
        remaining: f32,
    },

    // ─── Liveness ───
    Ping {
        time_ms: u64,
    },
    Pong {
        time_ms: u64,
    },
}

impl Payload {
    pub fn op_code(&self) -> OpCode {
        match self {
            Payload::Hello { .. } => OpCode::Hello,
            Payload::Welcome { .. } => OpCode::Welcome,
            Payload::LoginRequest { .. } => OpCode::LoginRequest,
            Payload::RegisterRequest { .. } => OpCode::RegisterRequest,
            Payload::LoginResponse { .. } => OpCode::LoginResponse,
            Payload::RegisterResponse { .. } => OpCode::RegisterResponse,
            Payload::Disconnect { .. } => OpCode::Disconnect,
            Payload::Kicked { .. } => OpCode::Kicked,
            Payload::ListRooms => OpCode::ListRooms,
            Payload::RoomList { .. } => OpCode::RoomList,
            Payload::CreateRoom(_) => OpCode::CreateRoom,
            Payload::JoinRoom { .. } => OpCode::JoinRoom,
            Payload::LeaveRoom => OpCode::LeaveRoom,
            Payload::JoinRoomResponse { .. } => OpCode::JoinRoomResponse,
            Payload::RoomUpdate { .. } => OpCode::RoomUpdate,
            Payload::SetReady { .. } => OpCode::SetReady,
            Payload::RoomChatSend { .. } => OpCode::RoomChatSend,
            Payload::RoomChatReceived { .. } => OpCode::RoomChatReceived,
            Payload::StartGame { .. } => OpCode::StartGame,
            Payload::DebugMode { .. } => OpCode::DebugMode,
            Payload::Input { .. } => OpCode::Input,
            Payload::EntitySnapshot { .. } => OpCode::EntitySnapshot,
            Payload::EntitySpawn { .. } => OpCode::EntitySpawn,
            Payload::EntityDeath { .. } => OpCode::EntityDeath,
            Payload::AmmoUpdate { .. } => OpCode::AmmoUpdate,
            Payload::HealthUpdate { .. } => OpCode::HealthUpdate,
            Payload::ScoreUpdate { .. } => OpCode::ScoreUpdate,
            Payload::BeamState { .. } => OpCode::BeamState,
            Payload::Ping { .. } => OpCode::Ping,
            Payload::Pong { .. } => OpCode::Pong,
        }
    }

    pub fn class(&self) -> MessageClass {
        self.op_code().class()
    }
}
