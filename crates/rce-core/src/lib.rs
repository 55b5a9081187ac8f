//! rce-core - building blocks of the rce remote execution service.
//!
//! The daemon and the CLI client share this crate. It contains:
//!
//! - [`protocol`]: the framed wire protocol (length-prefixed protobuf
//!   messages plus the Hello/HelloAck handshake types)
//! - [`session`]: the per-session state machine (Init → Preparing →
//!   Running) that turns inbound frames into child process activity
//! - [`supervisor`]: ownership of one spawned child, on pipes or a PTY, and
//!   the worker tasks that stream its output
//!
//! The session driver, the process registry, and the kill endpoint live in
//! the daemon crate; the client only uses [`protocol`].

pub mod protocol;
pub mod session;
pub mod supervisor;
