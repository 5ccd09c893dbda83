//! Events the client pushes on its [`EventBus`](arcade_shared::event::EventBus)
//! for the presentation layer.

use arcade_shared::{components::EntityKind, math::Vec2, net::RoomInfo};

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub session_id: u32,
    pub username: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameStarted {
    pub room_id: u32,
}

/// The game finished and the server returned everyone to the lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameEnded {
    pub room_id: u32,
}

/// Removed from the room by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kicked {
    pub reason: String,
}

/// The server ended the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDisconnect {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomsListed(pub Vec<RoomInfo>);

/// An entity died; drives explosion effects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityDestroyed {
    pub net_id: u32,
    pub kind: EntityKind,
    pub position: Vec2,
}
