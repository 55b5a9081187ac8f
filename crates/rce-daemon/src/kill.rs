//! Unary kill endpoint.
//!
//! Looks the requested identifier up in the registry and invokes its kill
//! handle. Failures are reported in the response body, not as transport
//! errors; an unknown identifier yields `"process not found"`. The entry is
//! never removed here; the owning session unregisters at teardown.

use std::sync::Arc;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use prost::Message;
use rce_core::protocol::{messages, FrameCodec, KillResponse, Pid, ProtocolError};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{info, warn};

use crate::registry::Registry;

/// Serve one kill call on an accepted connection.
///
/// # Errors
///
/// Returns an error only for transport-level failures (missing or
/// undecodable request frame, failed response write).
pub async fn handle(
    mut framed: Framed<TcpStream, FrameCodec>,
    registry: Arc<Registry>,
) -> Result<()> {
    let frame = match framed.next().await {
        None => return Err(ProtocolError::UnexpectedEof("kill request").into()),
        Some(frame) => frame?,
    };
    let pid = Pid::decode(frame).map_err(|err| ProtocolError::decode("kill request", err))?;
    info!(id = %pid.id, "kill requested");

    let error = match registry.lookup(&pid.id) {
        None => "process not found".to_string(),
        Some(handle) => match handle.kill() {
            Ok(()) => String::new(),
            Err(err) => err.to_string(),
        },
    };
    if !error.is_empty() {
        warn!(id = %pid.id, error = %error, "kill did not succeed");
    }

    framed.send(messages::encode(&KillResponse { error })).await?;
    Ok(())
}
