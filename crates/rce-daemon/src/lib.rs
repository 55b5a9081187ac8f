//! rce-daemon - the remote code execution daemon.
//!
//! Accepts framed TCP connections carrying one call each: either a
//! bidirectional spawn session or a unary out-of-band kill. Sessions drive
//! the state machine from `rce-core`, supervise one child process, and
//! publish its identifier in a process-wide registry so a concurrent kill
//! connection can find it.
//!
//! # Modules
//!
//! - [`server`]: listener, handshake, and per-connection dispatch
//! - [`session`]: the session driver loop for spawn connections
//! - [`registry`]: identifier → kill-handle map shared across sessions
//! - [`kill`]: the unary kill endpoint

pub mod kill;
pub mod registry;
pub mod server;
pub mod session;
