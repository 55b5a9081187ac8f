//! Per-session state machine.
//!
//! A spawn session moves through three states:
//!
//! ```text
//!   Init ──Head──▶ Preparing ──Start──▶ Running
//! ```
//!
//! Each state consumes inbound frames via [`SessionState::process_event`],
//! may hand out a stream of outbound [`StateOutput`] items, and is closed
//! exactly once. A frame the current state does not accept is a fatal
//! protocol error.
//!
//! Ownership of a server-allocated working directory travels with the
//! session: Preparing creates it, Running inherits it at start, and
//! whichever state is current at teardown removes it. This keeps uploaded
//! files alive for the child while guaranteeing the directory is gone once
//! the session returns.

mod preparing;
mod running;

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::sync::mpsc;

pub use preparing::PreparingState;
pub use running::RunningState;

use crate::protocol::{spawn_request, SpawnRequest, SpawnResponse};
use crate::supervisor::{KillError, KillHandle, SpawnError};

/// Errors that terminate a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A frame arrived that the current state does not accept.
    #[error("unexpected event: {0}")]
    UnexpectedEvent(&'static str),

    /// The temporary working directory could not be created.
    #[error("failed to create working directory")]
    CreateWorkdir(#[source] io::Error),

    /// The temporary working directory could not be removed.
    #[error("failed to remove working directory")]
    RemoveWorkdir(#[source] io::Error),

    /// An uploaded file could not be written.
    #[error("failed to write {filename}")]
    WriteFile {
        /// Target path of the upload.
        filename: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// The child could not be launched.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// A stdin frame arrived but the child has no stdin.
    #[error("stdin not available")]
    StdinUnavailable,

    /// Writing to (or closing) the child's stdin failed.
    #[error("failed to write to stdin")]
    StdinWrite(#[source] io::Error),

    /// Reading a child output stream failed.
    #[error("failed to read child output")]
    OutputRead(#[source] io::Error),

    /// Waiting for the child failed.
    #[error("failed to wait for child")]
    Wait(#[source] io::Error),

    /// Killing the child during teardown failed.
    #[error(transparent)]
    Kill(#[from] KillError),

    /// A supervisor worker panicked.
    #[error("session worker panicked")]
    WorkerPanicked,
}

/// One item of a state's outbound stream.
#[derive(Debug)]
pub enum StateOutput {
    /// A response frame to forward to the client.
    Response(SpawnResponse),
    /// A fatal session error.
    Error(SessionError),
    /// The state has no further output.
    Complete,
}

/// The session's working directory, either client-provided or allocated
/// under the system temp root with an `rce` prefix.
#[derive(Debug)]
pub struct Workdir {
    path: PathBuf,
    temp: Option<TempDir>,
}

impl Workdir {
    /// Resolve the head's path: empty means allocate a fresh directory.
    ///
    /// # Errors
    ///
    /// [`SessionError::CreateWorkdir`] when allocation fails.
    pub fn from_head_path(path: &str) -> Result<Self, SessionError> {
        if path.is_empty() {
            let temp = tempfile::Builder::new()
                .prefix("rce")
                .tempdir()
                .map_err(SessionError::CreateWorkdir)?;
            Ok(Self {
                path: temp.path().to_path_buf(),
                temp: Some(temp),
            })
        } else {
            Ok(Self {
                path: PathBuf::from(path),
                temp: None,
            })
        }
    }

    /// Absolute path of the working directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this session allocated the directory (and must remove it).
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.temp.is_some()
    }

    /// Remove an allocated directory. Idempotent; a client-provided path is
    /// left untouched.
    ///
    /// # Errors
    ///
    /// [`SessionError::RemoveWorkdir`] when removal fails.
    pub fn cleanup(&mut self) -> Result<(), SessionError> {
        match self.temp.take() {
            Some(temp) => temp.close().map_err(SessionError::RemoveWorkdir),
            None => Ok(()),
        }
    }
}

/// The initial state: waits for the head frame.
#[derive(Debug, Default)]
pub struct InitState;

/// Current state of one spawn session.
#[derive(Debug)]
pub enum SessionState {
    /// Waiting for the head frame.
    Init(InitState),
    /// Receiving uploads.
    Preparing(PreparingState),
    /// Child is running.
    Running(RunningState),
}

impl SessionState {
    /// A fresh session in its initial state.
    #[must_use]
    pub fn new() -> Self {
        Self::Init(InitState)
    }

    /// State name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Preparing(_) => "preparing",
            Self::Running(_) => "running",
        }
    }

    /// Feed one inbound frame to the current state.
    ///
    /// Returns the next state when the frame causes a transition. The
    /// caller owns draining the old state's output and closing it before
    /// installing the returned one.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the session, including
    /// [`SessionError::UnexpectedEvent`] for frames the current state does
    /// not accept.
    pub async fn process_event(
        &mut self,
        event: SpawnRequest,
    ) -> Result<Option<SessionState>, SessionError> {
        let name = event.payload_name();
        let payload = event
            .payload
            .ok_or(SessionError::UnexpectedEvent("empty"))?;

        match (&mut *self, payload) {
            (Self::Init(_), spawn_request::Payload::Head(head)) => Ok(Some(Self::Preparing(
                PreparingState::new(head)?,
            ))),
            (Self::Preparing(preparing), spawn_request::Payload::File(file)) => {
                preparing.apply_file(&file).await?;
                Ok(None)
            }
            (Self::Preparing(preparing), spawn_request::Payload::Start(_)) => {
                Ok(Some(Self::Running(preparing.start()?)))
            }
            (Self::Running(running), spawn_request::Payload::Stdin(chunk)) => {
                running.process_stdin(chunk).await?;
                Ok(None)
            }
            _ => Err(SessionError::UnexpectedEvent(name)),
        }
    }

    /// Take the state's outbound stream, if it has one. Only the Running
    /// state produces output.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<StateOutput>> {
        match self {
            Self::Running(running) => running.take_output(),
            Self::Init(_) | Self::Preparing(_) => None,
        }
    }

    /// The published subprocess identifier, if the current state has one.
    #[must_use]
    pub fn pid(&self) -> Option<&str> {
        match self {
            Self::Running(running) => Some(running.pid()),
            Self::Init(_) | Self::Preparing(_) => None,
        }
    }

    /// A kill handle for the child, if the current state has one.
    #[must_use]
    pub fn kill_handle(&self) -> Option<KillHandle> {
        match self {
            Self::Running(running) => Some(running.kill_handle()),
            Self::Init(_) | Self::Preparing(_) => None,
        }
    }

    /// The session's working directory, once known.
    #[must_use]
    pub fn workdir_path(&self) -> Option<&Path> {
        match self {
            Self::Preparing(preparing) => Some(preparing.workdir_path()),
            Self::Running(running) => Some(running.workdir_path()),
            Self::Init(_) => None,
        }
    }

    /// Release everything the current state owns.
    ///
    /// For Running this kills the child if needed, joins the workers, and
    /// removes an allocated working directory. Callers must drop the output
    /// receiver first so no worker stays blocked on the bounded channel.
    ///
    /// # Errors
    ///
    /// Returns the first teardown failure; teardown still runs to the end.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        match self {
            Self::Init(_) => Ok(()),
            Self::Preparing(preparing) => preparing.close(),
            Self::Running(running) => running.close().await,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
