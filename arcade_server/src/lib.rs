//! `arcade_server`
//!
//! Authoritative side of the arcade shooter:
//! - Network endpoint: TCP control plane plus UDP gameplay plane on one port
//! - Lobby: accounts, room creation and membership
//! - Rooms: one task per room running the fixed-order gameplay systems
//!
//! Rooms never share state; the only cross-room data is the session table
//! owned by [`GameServer`].

pub mod auth;
pub mod components;
pub mod room;
pub mod server;
pub mod spawn;
pub mod systems;

pub use server::GameServer;
