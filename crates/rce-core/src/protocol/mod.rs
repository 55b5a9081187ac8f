//! Wire protocol for the rce service.
//!
//! The protocol stack is organized in layers:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Application messages            │  Protobuf (messages)
//! ├─────────────────────────────────────────┤
//! │              Handshake                  │  Hello/HelloAck
//! ├─────────────────────────────────────────┤
//! │               Framing                   │  Length-prefixed
//! ├─────────────────────────────────────────┤
//! │             TCP transport               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Every connection carries exactly one call. The client opens with a
//! [`Hello`] frame naming the method it wants; the server answers with a
//! [`HelloAck`]. An accepted `Spawn` connection then streams
//! [`SpawnRequest`] frames inbound and [`SpawnResponse`] frames outbound
//! until the session ends. An accepted `Kill` connection exchanges a single
//! [`Pid`] / [`KillResponse`] pair.
//!
//! # Wire format
//!
//! ```text
//! +----------------------------+------------------+
//! | Length (4 bytes, BE)       | Payload          |
//! +----------------------------+------------------+
//! ```
//!
//! The payload is a protobuf-encoded message. Frame length is validated
//! before allocation; oversized frames terminate the connection.

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, MAX_FRAME_SIZE, PROTOCOL_VERSION};
pub use framing::FrameCodec;
pub use messages::{
    spawn_request, spawn_response, EnvVar, FileChunk, Head, Hello, HelloAck, KillResponse, Method,
    Pid, SpawnRequest, SpawnResponse, Start, StdinChunk, WindowSize,
};
