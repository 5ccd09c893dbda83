//! `arcade_client`
//!
//! Client-side systems:
//! - Connection management (reliable + unreliable channels)
//! - Request retry with exponential backoff
//! - Replication of server entities into a local registry
//! - Input sampling into per-tick masks

pub mod client;
pub mod events;
pub mod input;
pub mod replication;
pub mod retry;

pub use client::GameClient;
