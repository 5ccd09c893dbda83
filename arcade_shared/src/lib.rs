//! `arcade_shared`
//!
//! Runtime core used by both client and server.
//!
//! Design goals:
//! - Cache-friendly component storage with generational handles.
//! - Deterministic, sequential system ordering within one simulation.
//! - A compact, versioned, big-endian wire format with a closed payload catalog.
//! - No `unsafe`.

pub mod components;
pub mod config;
pub mod ecs;
pub mod error;
pub mod event;
pub mod math;
pub mod net;
pub mod templates;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::components::*;
    pub use crate::config::*;
    pub use crate::ecs::*;
    pub use crate::error::*;
    pub use crate::event::*;
    pub use crate::math::*;
    pub use crate::net::*;
}
