//! Session driver for spawn connections.
//!
//! One cooperative loop per accepted `Spawn` call. The loop waits on two
//! sources at a time: the next inbound frame (relayed by a reader task) and
//! the next outbound item from the current state's output stream. Inbound
//! frames feed the state machine; outbound items are forwarded on the wire.
//!
//! Termination paths all converge on the same teardown: drop the output
//! stream, close the current state (killing the child and removing an
//! allocated working directory), unregister the subprocess, and stop the
//! reader. A client disconnect or stream error is a clean termination;
//! state-machine and supervisor failures surface to the client as a single
//! terminal `Error` frame before the connection closes.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use prost::Message;
use rce_core::protocol::{messages, FrameCodec, SpawnRequest, SpawnResponse};
use rce_core::session::{SessionError, SessionState, StateOutput};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::registry::{Registration, Registry};

type FrameSink = SplitSink<Framed<TcpStream, FrameCodec>, bytes::Bytes>;
type FrameStream = SplitStream<Framed<TcpStream, FrameCodec>>;

/// Environment variable naming a command to run before every spawn session.
pub const PRE_SPAWN_CMD_ENV: &str = "RCE_PRE_SPAWN_CMD";

/// Drive one spawn session to completion.
///
/// # Errors
///
/// Returns the session's first fatal error, if any. The error has already
/// been reported to the client as a terminal `Error` frame; the caller only
/// logs it.
pub async fn run(framed: Framed<TcpStream, FrameCodec>, registry: Arc<Registry>) -> Result<()> {
    let (mut sink, stream) = framed.split();

    if let Err(err) = run_pre_spawn_hook().await {
        send_error(&mut sink, &err).await;
        return Err(err);
    }

    let (frame_tx, frames) = mpsc::channel::<SpawnRequest>(1);
    let reader = tokio::spawn(relay_frames(stream, frame_tx));

    let mut session = Session {
        state: SessionState::new(),
        output: None,
        registration: Registration::new(registry),
        sink,
        fatal: None,
    };
    session.drive(frames).await;

    // Unblock any supervisor worker before joining it in close().
    drop(session.output.take());
    if let Err(err) = session.state.close().await {
        warn!(error = %err, "session teardown failed");
        session
            .fatal
            .get_or_insert_with(|| anyhow::Error::new(err));
    }
    session.registration.unset();
    reader.abort();
    let _ = reader.await;
    let _ = session.sink.close().await;

    match session.fatal {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

struct Session {
    state: SessionState,
    output: Option<mpsc::Receiver<StateOutput>>,
    registration: Registration,
    sink: FrameSink,
    fatal: Option<anyhow::Error>,
}

impl Session {
    async fn drive(&mut self, mut frames: mpsc::Receiver<SpawnRequest>) {
        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        debug!("client stream ended");
                        break;
                    };
                    if !self.handle_frame(frame).await {
                        break;
                    }
                }
                item = next_output(&mut self.output) => {
                    match item {
                        None => {
                            // The state has no further output, but inbound
                            // frames may still arrive.
                            self.output = None;
                        }
                        Some(item) => {
                            if !self.handle_output(item).await {
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Feed one inbound frame to the state machine. Returns `false` when
    /// the session must end.
    async fn handle_frame(&mut self, frame: SpawnRequest) -> bool {
        trace!(payload = frame.payload_name(), state = self.state.name(), "inbound frame");
        match self.state.process_event(frame).await {
            Ok(None) => true,
            Ok(Some(next)) => self.switch_state(next).await,
            Err(err) => {
                self.fail(err).await;
                false
            }
        }
    }

    /// Install a new state: forward whatever the old one still has queued,
    /// close it, then take over the new output stream.
    async fn switch_state(&mut self, mut next: SessionState) -> bool {
        if let Some(mut rest) = self.output.take() {
            rest.close();
            while let Some(item) = rest.recv().await {
                if !self.handle_output(item).await {
                    return false;
                }
            }
        }
        if let Err(err) = self.state.close().await {
            self.fail(err).await;
            return false;
        }
        self.output = next.take_output();
        self.state = next;
        debug!(state = self.state.name(), "state transition");
        true
    }

    /// Forward one outbound item. Returns `false` when the session must
    /// end.
    async fn handle_output(&mut self, item: StateOutput) -> bool {
        match item {
            StateOutput::Response(rsp) => {
                // Register before the frame hits the wire, so a client that
                // reacts to the Pid with an immediate kill finds the entry.
                self.registration.try_set(&self.state);
                if self.forward(&rsp).await.is_err() {
                    // The client is gone; treat like a disconnect.
                    debug!("client sink closed");
                    return false;
                }
                true
            }
            StateOutput::Error(err) => {
                self.fail(err).await;
                false
            }
            StateOutput::Complete => false,
        }
    }

    async fn forward(&mut self, rsp: &SpawnResponse) -> Result<(), rce_core::protocol::ProtocolError> {
        self.sink.send(messages::encode(rsp)).await
    }

    async fn fail(&mut self, err: SessionError) {
        let err = anyhow::Error::new(err);
        send_error(&mut self.sink, &err).await;
        self.fatal = Some(err);
    }
}

/// Report a fatal session error to the client as a terminal `Error` frame.
async fn send_error(sink: &mut FrameSink, err: &anyhow::Error) {
    warn!(error = format!("{err:#}"), "session failed");
    let rsp = SpawnResponse::error(format!("{err:#}"));
    if let Err(send_err) = sink.send(messages::encode(&rsp)).await {
        debug!(error = %send_err, "could not deliver error frame");
    }
}

/// Relay inbound frames to the driver until the client disconnects, the
/// stream errors, or a frame fails to decode.
async fn relay_frames(mut stream: FrameStream, frames: mpsc::Sender<SpawnRequest>) {
    loop {
        match stream.next().await {
            None => break,
            Some(Err(err)) => {
                debug!(error = %err, "inbound stream error");
                break;
            }
            Some(Ok(bytes)) => match SpawnRequest::decode(bytes) {
                Ok(frame) => {
                    if frames.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "undecodable spawn frame");
                    break;
                }
            },
        }
    }
}

async fn next_output(output: &mut Option<mpsc::Receiver<StateOutput>>) -> Option<StateOutput> {
    match output {
        Some(rx) => rx.recv().await,
        // No output stream: park this branch so the select only fires on
        // inbound frames.
        None => std::future::pending().await,
    }
}

/// Run the operator-configured pre-spawn command, if any.
///
/// The command is read from [`PRE_SPAWN_CMD_ENV`], split on whitespace, and
/// must exit successfully before the session may proceed.
async fn run_pre_spawn_hook() -> Result<()> {
    let raw = match std::env::var(PRE_SPAWN_CMD_ENV) {
        Ok(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(()),
    };
    let mut parts = raw.split_whitespace();
    let Some(program) = parts.next() else {
        return Ok(());
    };
    let output = tokio::process::Command::new(program)
        .args(parts)
        .output()
        .await
        .with_context(|| format!("failed to run pre-spawn command '{raw}'"))?;
    if !output.status.success() {
        bail!("pre-spawn command '{raw}' exited with {}", output.status);
    }
    if !output.stdout.is_empty() {
        debug!(
            output = %String::from_utf8_lossy(&output.stdout),
            "pre-spawn command finished"
        );
    }
    Ok(())
}
