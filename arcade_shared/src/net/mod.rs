//! Networking.
//!
//! - [`protocol`]: wire header constants, op codes and the payload catalog.
//! - [`codec`]: binary encode/decode of whole packets.
//! - [`session`]: per-connection state machine, sequence gating and queues.
//! - [`transport`]: TCP and UDP channels carrying codec frames.

pub mod codec;
pub mod protocol;
pub mod session;
pub mod transport;

pub use codec::{parse_header, peek_header, Packet};
pub use protocol::{
    Channel, CreateRoom, EntityState, Header, InputMask, JoinStatus, MessageClass, OpCode,
    Payload, RoomInfo, HEADER_LEN, MAGIC, MAX_BODY, MAX_STRING, MAX_VECTOR, PROTOCOL_VERSION,
};
pub use session::{InputFrame, Routed, SequenceGate, Session, SessionHandle, SessionState};
pub use transport::{
    ReliableConn, ReliableListener, ReliableReader, ReliableWriter, UnreliableConn,
    UnreliableEndpoint,
};
