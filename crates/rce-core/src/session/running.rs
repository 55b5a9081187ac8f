//! The Running state: a live child and its output stream.

use std::path::Path;

use tokio::sync::mpsc;

use crate::protocol::StdinChunk;
use crate::supervisor::{KillHandle, Supervisor};

use super::{SessionError, StateOutput, Workdir};

/// Owns the process supervisor and, from `Start` onwards, the session's
/// working directory.
#[derive(Debug)]
pub struct RunningState {
    supervisor: Supervisor,
    output: Option<mpsc::Receiver<StateOutput>>,
    workdir: Workdir,
}

impl RunningState {
    pub(crate) fn new(
        supervisor: Supervisor,
        output: mpsc::Receiver<StateOutput>,
        workdir: Workdir,
    ) -> Self {
        Self {
            supervisor,
            output: Some(output),
            workdir,
        }
    }

    /// The published subprocess identifier.
    #[must_use]
    pub fn pid(&self) -> &str {
        self.supervisor.id()
    }

    /// A kill handle for the child; this is what the registry stores.
    #[must_use]
    pub fn kill_handle(&self) -> KillHandle {
        self.supervisor.kill_handle()
    }

    /// The session's working directory.
    #[must_use]
    pub fn workdir_path(&self) -> &Path {
        self.workdir.path()
    }

    /// Take the outbound stream. Yields `Some` exactly once.
    pub(crate) fn take_output(&mut self) -> Option<mpsc::Receiver<StateOutput>> {
        self.output.take()
    }

    /// Handle a stdin frame: write the payload, or close stdin on eof.
    ///
    /// # Errors
    ///
    /// [`SessionError::StdinUnavailable`] when the child has no stdin,
    /// [`SessionError::StdinWrite`] when the write or close fails. Both are
    /// fatal for the session.
    pub(crate) async fn process_stdin(&mut self, chunk: StdinChunk) -> Result<(), SessionError> {
        if !self.supervisor.stdin_available() {
            return Err(SessionError::StdinUnavailable);
        }
        if chunk.eof {
            self.supervisor.close_stdin().await
        } else {
            self.supervisor.write_stdin(chunk.stdin).await
        }
    }

    /// Tear down: kill the child if still running, join the workers, and
    /// remove the working directory if this session allocated it.
    ///
    /// # Errors
    ///
    /// Returns the first failure; teardown still runs to completion.
    pub(crate) async fn close(&mut self) -> Result<(), SessionError> {
        // If the receiver was never taken, drop it now so no worker stays
        // blocked on the bounded channel while being joined.
        drop(self.output.take());

        let shutdown = self.supervisor.shutdown().await;
        let cleanup = self.workdir.cleanup();
        shutdown.and(cleanup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Head, SpawnRequest};
    use crate::session::SessionState;

    async fn running(head: Head) -> SessionState {
        let mut state = SessionState::new();
        let next = state
            .process_event(SpawnRequest::head(head))
            .await
            .unwrap()
            .unwrap();
        state = next;
        let next = state
            .process_event(SpawnRequest::start())
            .await
            .unwrap()
            .unwrap();
        next
    }

    #[tokio::test]
    async fn eof_without_stdin_pipe_is_an_error() {
        let mut state = running(Head {
            command: "sleep".into(),
            args: vec!["5".into()],
            ..Default::default()
        })
        .await;

        let err = state
            .process_event(SpawnRequest::stdin_eof())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "stdin not available");

        drop(state.take_output());
        state.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_kills_a_running_child() {
        let mut state = running(Head {
            command: "sleep".into(),
            args: vec!["30".into()],
            has_stdin: true,
            ..Default::default()
        })
        .await;

        drop(state.take_output());
        state.close().await.unwrap();
    }

    #[tokio::test]
    async fn stdin_frames_after_eof_are_refused() {
        let mut state = running(Head {
            command: "cat".into(),
            has_stdin: true,
            ..Default::default()
        })
        .await;

        state
            .process_event(SpawnRequest::stdin(b"x".to_vec()))
            .await
            .unwrap();
        state.process_event(SpawnRequest::stdin_eof()).await.unwrap();

        // After eof the sink is gone, so another stdin frame is refused.
        let err = state
            .process_event(SpawnRequest::stdin_eof())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "stdin not available");

        drop(state.take_output());
        state.close().await.unwrap();
    }
}
