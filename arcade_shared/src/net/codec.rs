//! Binary packet codec.
//!
//! Integers and floats are big-endian, strings and vectors carry a `u32`
//! length prefix, booleans are a single `0`/`1` byte. Decoding is all or
//! nothing: a packet is either returned whole or rejected with a
//! [`DecodeError`], never partially applied.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    components::{EntityKind, WeaponKind},
    error::DecodeError,
    math::Vec2,
};

use super::protocol::{
    CreateRoom, EntityState, Header, InputMask, JoinStatus, OpCode, Payload, RoomInfo, HEADER_LEN,
    MAGIC, MAX_BODY, MAX_STRING, MAX_VECTOR, PROTOCOL_VERSION,
};

/// Header plus one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub sequence: u32,
    pub session_id: u32,
    pub payload: Payload,
}

impl Packet {
    pub fn new(sequence: u32, session_id: u32, payload: Payload) -> Self {
        Self {
            sequence,
            session_id,
            payload,
        }
    }

    pub fn op_code(&self) -> OpCode {
        self.payload.op_code()
    }

    /// Serializes header and payload into one frame.
    ///
    /// Fails when a string, vector or the whole body exceeds the limits a
    /// peer would enforce on decode.
    pub fn encode(&self) -> Result<Bytes, DecodeError> {
        let mut w = WireWriter::with_capacity(HEADER_LEN + 64);
        w.buf.put_u16(MAGIC);
        w.buf.put_u8(PROTOCOL_VERSION);
        w.buf.put_u8(self.op_code() as u8);
        w.buf.put_u32(self.sequence);
        w.buf.put_u32(self.session_id);
        w.buf.put_u32(0);
        write_payload(&mut w, &self.payload)?;

        let body = w.buf.len() - HEADER_LEN;
        if body > MAX_BODY {
            return Err(DecodeError::BodyTooLarge(body));
        }
        w.buf[12..HEADER_LEN].copy_from_slice(&(body as u32).to_be_bytes());
        Ok(w.buf.freeze())
    }

    /// Decodes one complete frame. Unknown op codes are rejected.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let header = peek_header(buf)?;
        let op = header.op_code()?;
        Self::decode_body(header, op, &buf[HEADER_LEN..])
    }

    /// Like [`Packet::decode`], but when `skip_unknown` is set a well-formed
    /// frame with an unknown op code yields `Ok(None)` instead of an error.
    pub fn decode_negotiated(buf: &[u8], skip_unknown: bool) -> Result<Option<Self>, DecodeError> {
        let header = peek_header(buf)?;
        match header.op_code() {
            Ok(op) => Self::decode_body(header, op, &buf[HEADER_LEN..]).map(Some),
            Err(DecodeError::UnknownOpCode(_)) if skip_unknown => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn decode_body(header: Header, op: OpCode, body: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(body);
        let payload = read_payload(&mut r, op)?;
        r.finish()?;
        Ok(Self {
            sequence: header.sequence,
            session_id: header.session_id,
            payload,
        })
    }
}

/// Validates the fixed header and that `buf` holds exactly one frame.
pub fn peek_header(buf: &[u8]) -> Result<Header, DecodeError> {
    let header = parse_header(buf)?;
    let remaining = buf.len() - HEADER_LEN;
    if remaining != header.payload_len as usize {
        return Err(DecodeError::LengthMismatch {
            declared: header.payload_len as usize,
            remaining,
        });
    }
    Ok(header)
}

/// Parses and validates the fixed header without looking at the body.
/// Stream transports use this to learn how many body bytes to read.
pub fn parse_header(buf: &[u8]) -> Result<Header, DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::TooShort {
            needed: HEADER_LEN,
            available: buf.len(),
        });
    }
    let mut cur = &buf[..HEADER_LEN];
    let magic = cur.get_u16();
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    let version = cur.get_u8();
    if version != PROTOCOL_VERSION {
        return Err(DecodeError::VersionMismatch {
            got: version,
            expected: PROTOCOL_VERSION,
        });
    }
    let header = Header {
        version,
        op: cur.get_u8(),
        sequence: cur.get_u32(),
        session_id: cur.get_u32(),
        payload_len: cur.get_u32(),
    };
    if header.payload_len as usize > MAX_BODY {
        return Err(DecodeError::BodyTooLarge(header.payload_len as usize));
    }
    Ok(header)
}

struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    fn with_capacity(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(cap),
        }
    }

    fn u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    fn u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    fn u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    fn i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    fn f32(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    fn bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    fn vec2(&mut self, v: Vec2) {
        self.f32(v.x);
        self.f32(v.y);
    }

    fn str(&mut self, s: &str) -> Result<(), DecodeError> {
        if s.len() > MAX_STRING {
            return Err(DecodeError::StringTooLong(s.len()));
        }
        self.u32(s.len() as u32);
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    fn count(&mut self, n: usize) -> Result<(), DecodeError> {
        if n > MAX_VECTOR {
            return Err(DecodeError::VectorTooLong(n));
        }
        self.u32(n as u32);
        Ok(())
    }
}

struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            Err(DecodeError::TooShort {
                needed: n,
                available: self.buf.remaining(),
            })
        } else {
            Ok(())
        }
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    fn f32(&mut self) -> Result<f32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_f32())
    }

    fn bool(&mut self, field: &'static str) -> Result<bool, DecodeError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(DecodeError::InvalidEnum { field, value }),
        }
    }

    fn vec2(&mut self) -> Result<Vec2, DecodeError> {
        Ok(Vec2::new(self.f32()?, self.f32()?))
    }

    fn str(&mut self) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        if len > MAX_STRING {
            return Err(DecodeError::StringTooLong(len));
        }
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        String::from_utf8(head.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    fn count(&mut self) -> Result<usize, DecodeError> {
        let n = self.u32()? as usize;
        if n > MAX_VECTOR {
            return Err(DecodeError::VectorTooLong(n));
        }
        Ok(n)
    }

    fn finish(&self) -> Result<(), DecodeError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

fn write_payload(w: &mut WireWriter, payload: &Payload) -> Result<(), DecodeError> {
    match payload {
        Payload::Hello { udp_port } => w.u16(*udp_port),
        Payload::Welcome {
            session_id,
            tick_hz,
        } => {
            w.u32(*session_id);
            w.u16(*tick_hz);
        }
        Payload::LoginRequest {
            username,
            password,
            weapon,
        } => {
            w.str(username)?;
            w.str(password)?;
            w.u8(*weapon as u8);
        }
        Payload::RegisterRequest { username, password } => {
            w.str(username)?;
            w.str(password)?;
        }
        Payload::LoginResponse { success, username }
        | Payload::RegisterResponse { success, username } => {
            w.bool(*success);
            w.str(username)?;
        }
        Payload::Disconnect { reason } | Payload::Kicked { reason } => w.str(reason)?,
        Payload::ListRooms | Payload::LeaveRoom => {}
        Payload::RoomList { rooms } => {
            w.count(rooms.len())?;
            for room in rooms {
                w.u32(room.room_id);
                w.str(&room.name)?;
                w.u32(room.current_players);
                w.u32(room.max_players);
                w.bool(room.in_game);
                w.u32(room.level_id);
                w.f32(room.difficulty);
                w.f32(room.speed);
                w.u32(room.duration_min);
            }
        }
        Payload::CreateRoom(req) => {
            w.str(&req.name)?;
            w.u32(req.max_players);
            w.f32(req.difficulty);
            w.f32(req.speed);
            w.u32(req.level_id);
            w.u32(req.seed);
            w.u32(req.duration_min);
        }
        Payload::JoinRoom { room_id, spectator } => {
            w.u32(*room_id);
            w.bool(*spectator);
        }
        Payload::JoinRoomResponse { status, room_id } => {
            w.u8(*status as u8);
            w.u32(*room_id);
        }
        Payload::RoomUpdate {
            room_id,
            current_players,
            server_tick,
            entity_count,
            in_game,
        } => {
            w.u32(*room_id);
            w.u32(*current_players);
            w.u32(*server_tick);
            w.u16(*entity_count);
            w.bool(*in_game);
        }
        Payload::SetReady { ready } => w.bool(*ready),
        Payload::RoomChatSend { message } => w.str(message)?,
        Payload::RoomChatReceived {
            session_id,
            username,
            message,
        } => {
            w.u32(*session_id);
            w.str(username)?;
            w.str(message)?;
        }
        Payload::StartGame { room_id } => w.u32(*room_id),
        Payload::DebugMode { enabled } => w.bool(*enabled),
        Payload::Input { mask } => w.u8(mask.bits()),
        Payload::EntitySnapshot {
            server_tick,
            full,
            entities,
        } => {
            w.u32(*server_tick);
            w.bool(*full);
            w.count(entities.len())?;
            for e in entities {
                w.u32(e.net_id);
                w.vec2(e.position);
                w.vec2(e.velocity);
                w.f32(e.rotation);
            }
        }
        Payload::EntitySpawn {
            net_id,
            kind,
            position,
            size,
        } => {
            w.u32(*net_id);
            w.u8(*kind as u8);
            w.vec2(*position);
            w.vec2(*size);
        }
        Payload::EntityDeath {
            net_id,
            kind,
            position,
        } => {
            w.u32(*net_id);
            w.u8(*kind as u8);
            w.vec2(*position);
        }
        Payload::AmmoUpdate {
            net_id,
            current,
            max,
            reloading,
            cooldown,
        } => {
            w.u32(*net_id);
            w.u16(*current);
            w.u16(*max);
            w.bool(*reloading);
            w.f32(*cooldown);
        }
        Payload::HealthUpdate {
            net_id,
            current,
            max,
        } => {
            w.u32(*net_id);
            w.i32(*current);
            w.i32(*max);
        }
        Payload::ScoreUpdate { net_id, score } => {
            w.u32(*net_id);
            w.i32(*score);
        }
        Payload::BeamState {
            net_id,
            active,
            remaining,
        } => {
            w.u32(*net_id);
            w.bool(*active);
            w.f32(*remaining);
        }
        Payload::Ping { time_ms } | Payload::Pong { time_ms } => w.u64(*time_ms),
    }
    Ok(())
}

fn read_payload(r: &mut WireReader<'_>, op: OpCode) -> Result<Payload, DecodeError> {
    Ok(match op {
        OpCode::Hello => Payload::Hello { udp_port: r.u16()? },
        OpCode::Welcome => Payload::Welcome {
            session_id: r.u32()?,
            tick_hz: r.u16()?,
        },
        OpCode::LoginRequest => Payload::LoginRequest {
            username: r.str()?,
            password: r.str()?,
            weapon: WeaponKind::try_from(r.u8()?)?,
        },
        OpCode::RegisterRequest => Payload::RegisterRequest {
            username: r.str()?,
            password: r.str()?,
        },
        OpCode::LoginResponse => Payload::LoginResponse {
            success: r.bool("success")?,
            username: r.str()?,
        },
        OpCode::RegisterResponse => Payload::RegisterResponse {
            success: r.bool("success")?,
            username: r.str()?,
        },
        OpCode::Disconnect => Payload::Disconnect { reason: r.str()? },
        OpCode::Kicked => Payload::Kicked { reason: r.str()? },
        OpCode::ListRooms => Payload::ListRooms,
        OpCode::LeaveRoom => Payload::LeaveRoom,
        OpCode::RoomList => {
            let n = r.count()?;
            let mut rooms = Vec::with_capacity(n);
            for _ in 0..n {
                rooms.push(RoomInfo {
                    room_id: r.u32()?,
                    name: r.str()?,
                    current_players: r.u32()?,
                    max_players: r.u32()?,
                    in_game: r.bool("in_game")?,
                    level_id: r.u32()?,
                    difficulty: r.f32()?,
                    speed: r.f32()?,
                    duration_min: r.u32()?,
                });
            }
            Payload::RoomList { rooms }
        }
        OpCode::CreateRoom => Payload::CreateRoom(CreateRoom {
            name: r.str()?,
            max_players: r.u32()?,
            difficulty: r.f32()?,
            speed: r.f32()?,
            level_id: r.u32()?,
            seed: r.u32()?,
            duration_min: r.u32()?,
        }),
        OpCode::JoinRoom => Payload::JoinRoom {
            room_id: r.u32()?,
            spectator: r.bool("spectator")?,
        },
        OpCode::JoinRoomResponse => Payload::JoinRoomResponse {
            status: JoinStatus::try_from(r.u8()?)?,
            room_id: r.u32()?,
        },
        OpCode::RoomUpdate => Payload::RoomUpdate {
            room_id: r.u32()?,
            current_players: r.u32()?,
            server_tick: r.u32()?,
            entity_count: r.u16()?,
            in_game: r.bool("in_game")?,
        },
        OpCode::SetReady => Payload::SetReady {
            ready: r.bool("ready")?,
        },
        OpCode::RoomChatSend => Payload::RoomChatSend { message: r.str()? },
        OpCode::RoomChatReceived => Payload::RoomChatReceived {
            session_id: r.u32()?,
            username: r.str()?,
            message: r.str()?,
        },
        OpCode::StartGame => Payload::StartGame { room_id: r.u32()? },
        OpCode::DebugMode => Payload::DebugMode {
            enabled: r.bool("enabled")?,
        },
        OpCode::Input => {
            let bits = r.u8()?;
            let mask = InputMask::from_bits(bits).ok_or(DecodeError::InvalidEnum {
                field: "input mask",
                value: bits,
            })?;
            Payload::Input { mask }
        }
        OpCode::EntitySnapshot => {
            let server_tick = r.u32()?;
            let full = r.bool("full")?;
            let n = r.count()?;
            let mut entities = Vec::with_capacity(n);
            for _ in 0..n {
                entities.push(EntityState {
                    net_id: r.u32()?,
                    position: r.vec2()?,
                    velocity: r.vec2()?,
                    rotation: r.f32()?,
                });
            }
            Payload::EntitySnapshot {
                server_tick,
                full,
                entities,
            }
        }
        OpCode::EntitySpawn => Payload::EntitySpawn {
            net_id: r.u32()?,
            kind: EntityKind::try_from(r.u8()?)?,
            position: r.vec2()?,
            size: r.vec2()?,
        },
        OpCode::EntityDeath => Payload::EntityDeath {
            net_id: r.u32()?,
            kind: EntityKind::try_from(r.u8()?)?,
            position: r.vec2()?,
        },
        OpCode::AmmoUpdate => Payload::AmmoUpdate {
            net_id: r.u32()?,
            current: r.u16()?,
            max: r.u16()?,
            reloading: r.bool("reloading")?,
            cooldown: r.f32()?,
        },
        OpCode::HealthUpdate => Payload::HealthUpdate {
            net_id: r.u32()?,
            current: r.i32()?,
            max: r.i32()?,
        },
        OpCode::ScoreUpdate => Payload::ScoreUpdate {
            net_id: r.u32()?,
            score: r.i32()?,
        },
        OpCode::BeamState => Payload::BeamState {
            net_id: r.u32()?,
            active: r.bool("active")?,
            remaining: r.f32()?,
        },
        OpCode::Ping => Payload::Ping { time_ms: r.u64()? },
        OpCode::Pong => Payload::Pong { time_ms: r.u64()? },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(payload: Payload) -> anyhow::Result<()> {
        let packet = Packet::new(42, 7, payload);
        let bytes = packet.encode()?;
        assert_eq!(Packet::decode(&bytes)?, packet);
        Ok(())
    }

    fn sample_payloads() -> Vec<Payload> {
        vec![
            Payload::Hello { udp_port: 50123 },
            Payload::Welcome {
                session_id: 9,
                tick_hz: 60,
            },
            Payload::LoginRequest {
                username: "ripley".into(),
                password: "nostromo".into(),
                weapon: WeaponKind::Beam,
            },
            Payload::RegisterRequest {
                username: String::new(),
                password: String::new(),
            },
            Payload::LoginResponse {
                success: true,
                username: "ripley".into(),
            },
            Payload::RegisterResponse {
                success: false,
                username: "x".into(),
            },
            Payload::Disconnect {
                reason: "bye".into(),
            },
            Payload::Kicked {
                reason: String::new(),
            },
            Payload::ListRooms,
            Payload::RoomList {
                rooms: vec![RoomInfo {
                    room_id: 3,
                    name: "sector 7".into(),
                    current_players: 2,
                    max_players: 4,
                    in_game: true,
                    level_id: 1,
                    difficulty: 1.5,
                    speed: 1.0,
                    duration_min: 10,
                }],
            },
            Payload::CreateRoom(CreateRoom {
                name: "alpha".into(),
                max_players: 0,
                difficulty: 0.5,
                speed: 2.0,
                level_id: 2,
                seed: 0xDEAD_BEEF,
                duration_min: 0,
            }),
            Payload::JoinRoom {
                room_id: 1,
                spectator: true,
            },
            Payload::LeaveRoom,
            Payload::JoinRoomResponse {
                status: JoinStatus::RegistryFull,
                room_id: 1,
            },
            Payload::RoomUpdate {
                room_id: 1,
                current_players: 4,
                server_tick: u32::MAX,
                entity_count: u16::MAX,
                in_game: false,
            },
            Payload::SetReady { ready: true },
            Payload::RoomChatSend {
                message: "gg \u{1F680}".into(),
            },
            Payload::RoomChatReceived {
                session_id: 2,
                username: "bishop".into(),
                message: "hi".into(),
            },
            Payload::StartGame { room_id: 5 },
            Payload::DebugMode { enabled: true },
            Payload::Input {
                mask: InputMask::UP | InputMask::SHOOT,
            },
            Payload::EntitySnapshot {
                server_tick: 100,
                full: true,
                entities: vec![EntityState {
                    net_id: 1,
                    position: Vec2::new(10.5, -3.0),
                    velocity: Vec2::new(200.0, 0.0),
                    rotation: 0.25,
                }],
            },
            Payload::EntitySpawn {
                net_id: 4,
                kind: EntityKind::Tank,
                position: Vec2::new(1280.0, 360.0),
                size: Vec2::new(64.0, 48.0),
            },
            Payload::EntityDeath {
                net_id: 4,
                kind: EntityKind::Tank,
                position: Vec2::ZERO,
            },
            Payload::AmmoUpdate {
                net_id: 1,
                current: 0,
                max: 100,
                reloading: true,
                cooldown: 2.0,
            },
            Payload::HealthUpdate {
                net_id: 1,
                current: -5,
                max: 100,
            },
            Payload::ScoreUpdate {
                net_id: 1,
                score: 1500,
            },
            Payload::BeamState {
                net_id: 1,
                active: true,
                remaining: 0.75,
            },
            Payload::Ping { time_ms: u64::MAX },
            Payload::Pong { time_ms: 0 },
        ]
    }

    #[test]
    fn every_payload_survives_the_wire() -> anyhow::Result<()> {
        let samples = sample_payloads();
        assert_eq!(samples.len(), OpCode::ALL.len());
        for payload in samples {
            roundtrip(payload)?;
        }
        Ok(())
    }

    #[test]
    fn boundary_sizes_roundtrip() -> anyhow::Result<()> {
        roundtrip(Payload::RoomChatSend {
            message: "a".repeat(MAX_STRING),
        })?;
        let entity = EntityState {
            net_id: 0,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            rotation: 0.0,
        };
        let snapshot = |n| Payload::EntitySnapshot {
            server_tick: 0,
            full: false,
            entities: vec![entity; n],
        };
        // 9 fixed bytes plus 24 per entity: 2730 is the largest that fits.
        roundtrip(snapshot(2730))?;
        assert_eq!(
            Packet::new(1, 0, snapshot(2731)).encode().err(),
            Some(DecodeError::BodyTooLarge(9 + 24 * 2731))
        );
        Ok(())
    }

    #[test]
    fn oversized_vector_count_is_rejected_before_allocation() -> anyhow::Result<()> {
        let mut bytes = Packet::new(
            1,
            0,
            Payload::EntitySnapshot {
                server_tick: 0,
                full: true,
                entities: Vec::new(),
            },
        )
        .encode()?
        .to_vec();
        let count_at = HEADER_LEN + 5;
        bytes[count_at..count_at + 4].copy_from_slice(&(MAX_VECTOR as u32 + 1).to_be_bytes());
        assert_eq!(
            Packet::decode(&bytes),
            Err(DecodeError::VectorTooLong(MAX_VECTOR + 1))
        );
        Ok(())
    }

    #[test]
    fn header_layout_is_big_endian() -> anyhow::Result<()> {
        let bytes = Packet::new(0x0102_0304, 0x0A0B_0C0D, Payload::Ping { time_ms: 1 }).encode()?;
        assert_eq!(&bytes[..4], &[0xA1, 0xB2, PROTOCOL_VERSION, OpCode::Ping as u8]);
        assert_eq!(&bytes[4..8], &[1, 2, 3, 4]);
        assert_eq!(&bytes[8..12], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 8]);
        assert_eq!(bytes.len(), HEADER_LEN + 8);
        Ok(())
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert_eq!(
            Packet::decode(&[0xA1, 0xB2, 1]),
            Err(DecodeError::TooShort {
                needed: HEADER_LEN,
                available: 3
            })
        );
    }

    #[test]
    fn length_mismatch_is_rejected() -> anyhow::Result<()> {
        let bytes = Packet::new(1, 0, Payload::Ping { time_ms: 5 }).encode()?;
        let truncated = &bytes[..bytes.len() - 1];
        assert_eq!(
            Packet::decode(truncated),
            Err(DecodeError::LengthMismatch {
                declared: 8,
                remaining: 7
            })
        );
        let mut padded = bytes.to_vec();
        padded.push(0);
        assert!(matches!(
            Packet::decode(&padded),
            Err(DecodeError::LengthMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn bad_magic_and_version_are_rejected() -> anyhow::Result<()> {
        let mut bytes = Packet::new(1, 0, Payload::ListRooms).encode()?.to_vec();
        bytes[2] = PROTOCOL_VERSION + 1;
        assert!(matches!(
            Packet::decode(&bytes),
            Err(DecodeError::VersionMismatch { .. })
        ));
        bytes[0] = 0;
        assert!(matches!(Packet::decode(&bytes), Err(DecodeError::BadMagic(_))));
        Ok(())
    }

    #[test]
    fn unknown_op_is_rejected_unless_negotiated() -> anyhow::Result<()> {
        let mut bytes = Packet::new(1, 0, Payload::Ping { time_ms: 5 }).encode()?.to_vec();
        bytes[3] = 0x77;
        assert_eq!(Packet::decode(&bytes), Err(DecodeError::UnknownOpCode(0x77)));
        assert_eq!(
            Packet::decode_negotiated(&bytes, false),
            Err(DecodeError::UnknownOpCode(0x77))
        );
        assert_eq!(Packet::decode_negotiated(&bytes, true)?, None);
        Ok(())
    }

    #[test]
    fn trailing_bytes_inside_body_are_rejected() -> anyhow::Result<()> {
        let mut bytes = Packet::new(1, 0, Payload::SetReady { ready: true })
            .encode()?
            .to_vec();
        bytes.push(0);
        bytes[15] += 1;
        assert_eq!(Packet::decode(&bytes), Err(DecodeError::TrailingBytes(1)));
        Ok(())
    }

    #[test]
    fn invalid_bool_and_utf8_are_rejected() -> anyhow::Result<()> {
        let mut bytes = Packet::new(1, 0, Payload::SetReady { ready: true })
            .encode()?
            .to_vec();
        bytes[HEADER_LEN] = 2;
        assert_eq!(
            Packet::decode(&bytes),
            Err(DecodeError::InvalidEnum {
                field: "ready",
                value: 2
            })
        );

        let mut bytes = Packet::new(1, 0, Payload::RoomChatSend { message: "ab".into() })
            .encode()?
            .to_vec();
        bytes[HEADER_LEN + 4] = 0xFF;
        assert_eq!(Packet::decode(&bytes), Err(DecodeError::InvalidUtf8));
        Ok(())
    }

    #[test]
    fn oversized_string_fails_to_encode() {
        let packet = Packet::new(
            1,
            0,
            Payload::RoomChatSend {
                message: "a".repeat(MAX_STRING + 1),
            },
        );
        assert_eq!(packet.encode(), Err(DecodeError::StringTooLong(MAX_STRING + 1)));
    }
}
