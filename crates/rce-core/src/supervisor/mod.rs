//! Child process supervision.
//!
//! A [`Supervisor`] owns exactly one spawned child and its I/O. It launches
//! the child either on pipes or attached to a fresh pseudo-terminal, fans
//! stdout/stderr into the session output channel as [`StateOutput`] items,
//! accepts stdin writes, and reports the exit code.
//!
//! # Worker layout
//!
//! ```text
//!              ┌──────────────┐  chunks   ┌──────────────────┐
//!  child ──────│ reader tasks │──────────▶│  output channel  │──▶ driver
//!              └──────────────┘           │  (bounded)       │
//!              ┌──────────────┐  Exit/    │                  │
//!  child ──────│  wait task   │──────────▶│                  │
//!              └──────────────┘  Complete └──────────────────┘
//! ```
//!
//! The wait task joins the readers before it emits `Exit`, so output bytes
//! produced before the child died are already queued when the exit code goes
//! out. The channel is bounded: a slow consumer blocks the readers, which is
//! the intended backpressure.
//!
//! The subprocess identifier handed out as `Pid` is a random UUID, not the
//! OS pid; it names the child in the process registry for out-of-band kill.

use std::io;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as OsPid;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::{Head, SpawnResponse};
use crate::session::{SessionError, StateOutput};

/// Read buffer size for the output readers. Each chunk on the wire carries
/// at most this many bytes.
pub const READ_BUF_SIZE: usize = 4096;

/// Capacity of the supervisor output channel. The identifier frame is
/// queued at construction; everything after it is paced by the consumer.
const OUTPUT_CHANNEL_CAPACITY: usize = 1;

/// Capacity of the stdin relay channel used in terminal mode.
const STDIN_CHANNEL_CAPACITY: usize = 16;

const DEFAULT_PTY_ROWS: u16 = 24;
const DEFAULT_PTY_COLS: u16 = 80;

/// Everything needed to launch a child.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Command to execute.
    pub command: String,
    /// Command arguments.
    pub args: Vec<String>,
    /// Environment overrides applied on top of the inherited environment.
    pub envs: Vec<(String, String)>,
    /// Working directory of the child.
    pub cwd: PathBuf,
    /// Whether a stdin pipe should be opened (ignored in terminal mode,
    /// where the pty master is always writable).
    pub has_stdin: bool,
    /// Terminal dimensions; `Some` selects PTY mode.
    pub pty: Option<(u16, u16)>,
}

impl SpawnSpec {
    /// Build a spec from a session head and its resolved working directory.
    ///
    /// Zero window dimensions fall back to 24 rows × 80 columns.
    #[must_use]
    pub fn from_head(head: &Head, cwd: &Path) -> Self {
        let pty = head.allocate_pty.then(|| {
            let size = head.window_size.unwrap_or_default();
            (
                pty_dimension(size.row, DEFAULT_PTY_ROWS),
                pty_dimension(size.col, DEFAULT_PTY_COLS),
            )
        });
        Self {
            command: head.command.clone(),
            args: head.args.clone(),
            envs: head
                .envs
                .iter()
                .map(|env| (env.key.clone(), env.value.clone()))
                .collect(),
            cwd: cwd.to_path_buf(),
            has_stdin: head.has_stdin,
            pty,
        }
    }
}

fn pty_dimension(value: u32, default: u16) -> u16 {
    if value == 0 {
        default
    } else {
        u16::try_from(value).unwrap_or(u16::MAX)
    }
}

/// Errors that can occur while launching a child.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    /// The command could not be started.
    #[error("failed to start {command}")]
    Start {
        /// Command that failed.
        command: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// The pseudo-terminal could not be allocated or wired up.
    #[error("failed to allocate pty: {0}")]
    Pty(String),

    /// A requested pipe was not captured on the child handle.
    #[error("child {0} stream was not captured")]
    MissingStream(&'static str),

    /// The OS pid of the child was unavailable right after spawn.
    #[error("child process id unavailable")]
    MissingId,
}

/// Errors from delivering a kill.
#[derive(Debug, thiserror::Error)]
pub enum KillError {
    /// Signal delivery failed.
    #[error("failed to signal process")]
    Signal(#[source] Errno),

    /// The terminal child killer failed.
    #[error("failed to kill terminal child")]
    Terminal(#[source] io::Error),
}

#[derive(Clone)]
enum KillTarget {
    /// Plain child: deliver SIGKILL to the OS pid.
    Pipes { pid: i32 },
    /// Terminal child: go through the pty child killer.
    Pty {
        killer: Arc<StdMutex<Box<dyn ChildKiller + Send + Sync>>>,
    },
}

/// Cloneable handle that terminates the supervised child.
///
/// This is the value stored in the process registry. Killing a child that
/// has already exited is success.
#[derive(Clone)]
pub struct KillHandle {
    exited: Arc<AtomicBool>,
    target: KillTarget,
}

impl std::fmt::Debug for KillHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KillHandle")
            .field("exited", &self.exited.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl KillHandle {
    /// Deliver SIGKILL to the child, best-effort.
    ///
    /// # Errors
    ///
    /// Returns [`KillError`] when signal delivery fails for a reason other
    /// than the child having already exited.
    pub fn kill(&self) -> Result<(), KillError> {
        if self.exited.load(Ordering::SeqCst) {
            return Ok(());
        }
        match &self.target {
            KillTarget::Pipes { pid } => {
                match signal::kill(OsPid::from_raw(*pid), Signal::SIGKILL) {
                    Ok(()) | Err(Errno::ESRCH) => Ok(()),
                    Err(errno) => Err(KillError::Signal(errno)),
                }
            }
            KillTarget::Pty { killer } => {
                let mut killer = killer.lock().unwrap_or_else(PoisonError::into_inner);
                match killer.kill() {
                    Ok(()) => Ok(()),
                    Err(err) if err.raw_os_error() == Some(Errno::ESRCH as i32) => Ok(()),
                    Err(err) => Err(KillError::Terminal(err)),
                }
            }
        }
    }
}

enum StdinSink {
    /// Pipe straight into the child.
    Pipe(tokio::process::ChildStdin),
    /// Relay to the blocking pty writer task.
    Pty(mpsc::Sender<Vec<u8>>),
}

/// Owns one spawned child and the tasks pumping its I/O.
pub struct Supervisor {
    id: String,
    kill: KillHandle,
    stdin: Option<StdinSink>,
    tasks: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Launch a child according to `spec`.
    ///
    /// On success the returned receiver already holds the `Pid` frame;
    /// everything else arrives as the workers produce it, ending with
    /// `Exit` (or an error item) and then `Complete`.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] when the child or its pty cannot be set up.
    /// Nothing is registered and no output is produced in that case.
    pub fn spawn(spec: SpawnSpec) -> Result<(Self, mpsc::Receiver<StateOutput>), SpawnError> {
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let exited = Arc::new(AtomicBool::new(false));
        let id = Uuid::new_v4().to_string();

        let supervisor = if spec.pty.is_some() {
            Self::spawn_pty(&spec, id, tx, exited)?
        } else {
            Self::spawn_piped(&spec, id, tx, exited)?
        };
        debug!(id = %supervisor.id, command = %spec.command, "child started");
        Ok((supervisor, rx))
    }

    fn spawn_piped(
        spec: &SpawnSpec,
        id: String,
        tx: mpsc::Sender<StateOutput>,
        exited: Arc<AtomicBool>,
    ) -> Result<Self, SpawnError> {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(if spec.has_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        for (key, value) in &spec.envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| SpawnError::Start {
            command: spec.command.clone(),
            source,
        })?;

        let pid = child.id().ok_or(SpawnError::MissingId)?;
        #[allow(clippy::cast_possible_wrap)] // OS pids fit in i32
        let pid = pid as i32;
        let kill = KillHandle {
            exited: Arc::clone(&exited),
            target: KillTarget::Pipes { pid },
        };

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                kill_startup_failure(&kill);
                return Err(SpawnError::MissingStream("stdout"));
            }
        };
        let stderr = match child.stderr.take() {
            Some(stderr) => stderr,
            None => {
                kill_startup_failure(&kill);
                return Err(SpawnError::MissingStream("stderr"));
            }
        };
        let stdin = child.stdin.take().map(StdinSink::Pipe);

        // The identifier goes out before any worker can produce output.
        queue_pid(&tx, &id, &kill)?;

        let stdout_task = tokio::spawn(read_stream(stdout, tx.clone(), SpawnResponse::stdout));
        let stderr_task = tokio::spawn(read_stream(stderr, tx.clone(), SpawnResponse::stderr));
        let wait_task = tokio::spawn(wait_piped(
            child,
            stdout_task,
            stderr_task,
            tx,
            Arc::clone(&exited),
        ));

        Ok(Self {
            id,
            kill,
            stdin,
            tasks: vec![wait_task],
        })
    }

    fn spawn_pty(
        spec: &SpawnSpec,
        id: String,
        tx: mpsc::Sender<StateOutput>,
        exited: Arc<AtomicBool>,
    ) -> Result<Self, SpawnError> {
        let (rows, cols) = spec.pty.unwrap_or((DEFAULT_PTY_ROWS, DEFAULT_PTY_COLS));
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| SpawnError::Pty(err.to_string()))?;

        let mut builder = CommandBuilder::new(&spec.command);
        builder.args(&spec.args);
        builder.cwd(&spec.cwd);
        for (key, value) in &spec.envs {
            builder.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|err| SpawnError::Start {
                command: spec.command.clone(),
                source: io::Error::other(err.to_string()),
            })?;
        drop(pair.slave);

        let killer = child.clone_killer();
        let kill = KillHandle {
            exited: Arc::clone(&exited),
            target: KillTarget::Pty {
                killer: Arc::new(StdMutex::new(killer)),
            },
        };

        let reader = match pair.master.try_clone_reader() {
            Ok(reader) => reader,
            Err(err) => {
                kill_startup_failure(&kill);
                return Err(SpawnError::Pty(err.to_string()));
            }
        };
        let writer = match pair.master.take_writer() {
            Ok(writer) => writer,
            Err(err) => {
                kill_startup_failure(&kill);
                return Err(SpawnError::Pty(err.to_string()));
            }
        };
        // Reader and writer hold their own descriptors; the master handle
        // itself is no longer needed.
        drop(pair.master);

        queue_pid(&tx, &id, &kill)?;

        let reader_task = {
            let tx = tx.clone();
            tokio::task::spawn_blocking(move || pump_pty_output(reader, &tx))
        };

        let (stdin_tx, stdin_rx) = mpsc::channel::<Vec<u8>>(STDIN_CHANNEL_CAPACITY);
        let writer_task = tokio::task::spawn_blocking(move || pump_pty_stdin(writer, stdin_rx));

        let wait_task = tokio::spawn(wait_pty(child, reader_task, tx, Arc::clone(&exited)));

        Ok(Self {
            id,
            kill,
            stdin: Some(StdinSink::Pty(stdin_tx)),
            tasks: vec![wait_task, writer_task],
        })
    }

    /// The session identifier surfaced in the `Pid` frame.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A cloneable kill handle for this child.
    #[must_use]
    pub fn kill_handle(&self) -> KillHandle {
        self.kill.clone()
    }

    /// Whether a stdin sink is attached.
    #[must_use]
    pub fn stdin_available(&self) -> bool {
        self.stdin.is_some()
    }

    /// Write a chunk to the child's stdin.
    ///
    /// # Errors
    ///
    /// [`SessionError::StdinUnavailable`] when no stdin sink exists,
    /// [`SessionError::StdinWrite`] when the write fails.
    pub async fn write_stdin(&mut self, bytes: Vec<u8>) -> Result<(), SessionError> {
        match self.stdin.as_mut() {
            None => Err(SessionError::StdinUnavailable),
            Some(StdinSink::Pipe(pipe)) => pipe
                .write_all(&bytes)
                .await
                .map_err(SessionError::StdinWrite),
            Some(StdinSink::Pty(relay)) => relay.send(bytes).await.map_err(|_| {
                SessionError::StdinWrite(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "terminal writer is gone",
                ))
            }),
        }
    }

    /// Close the child's stdin. A no-op when it is already closed.
    ///
    /// # Errors
    ///
    /// [`SessionError::StdinWrite`] when the pipe cannot be shut down.
    pub async fn close_stdin(&mut self) -> Result<(), SessionError> {
        match self.stdin.take() {
            None | Some(StdinSink::Pty(_)) => Ok(()),
            Some(StdinSink::Pipe(mut pipe)) => {
                pipe.shutdown().await.map_err(SessionError::StdinWrite)
            }
        }
    }

    /// Tear the supervisor down: kill the child if it is still running,
    /// close stdin, and join all workers.
    ///
    /// The output receiver must have been dropped (or be actively drained)
    /// before calling this, otherwise workers blocked on the bounded
    /// channel would never finish.
    ///
    /// # Errors
    ///
    /// Returns the first failure encountered; teardown still runs to
    /// completion.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        let mut first_error: Option<SessionError> = None;

        if let Err(err) = self.kill.kill() {
            first_error = Some(err.into());
        }
        if let Err(err) = self.close_stdin().await {
            first_error.get_or_insert(err);
        }
        for task in self.tasks.drain(..) {
            if task.await.is_err() {
                first_error.get_or_insert(SessionError::WorkerPanicked);
            }
        }

        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("id", &self.id)
            .field("stdin", &self.stdin.is_some())
            .finish_non_exhaustive()
    }
}

fn queue_pid(
    tx: &mpsc::Sender<StateOutput>,
    id: &str,
    kill: &KillHandle,
) -> Result<(), SpawnError> {
    if tx
        .try_send(StateOutput::Response(SpawnResponse::pid(id.to_string())))
        .is_ok()
    {
        return Ok(());
    }
    // The channel was created alongside this call, so this cannot happen;
    // if it ever does, do not leak the child.
    kill_startup_failure(kill);
    Err(SpawnError::MissingStream("output"))
}

fn kill_startup_failure(kill: &KillHandle) {
    if let Err(err) = kill.kill() {
        debug!(error = %err, "failed to kill child after setup failure");
    }
}

/// Copy one output stream into the session channel in bounded chunks.
///
/// Every chunk is a private copy; the read buffer is reused across reads.
async fn read_stream<R>(
    mut stream: R,
    tx: mpsc::Sender<StateOutput>,
    wrap: fn(Vec<u8>) -> SpawnResponse,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx
                    .send(StateOutput::Response(wrap(buf[..n].to_vec())))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(err) => {
                let _ = tx.send(StateOutput::Error(SessionError::OutputRead(err))).await;
                break;
            }
        }
    }
}

async fn wait_piped(
    mut child: Child,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    tx: mpsc::Sender<StateOutput>,
    exited: Arc<AtomicBool>,
) {
    let status = child.wait().await;
    exited.store(true, Ordering::SeqCst);

    // Let the readers drain whatever the child wrote before it died, so
    // Exit trails the output it refers to.
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    match status {
        Ok(status) => {
            // Signal-terminated children carry no code; report -1.
            let code = status.code().unwrap_or(-1);
            let _ = tx
                .send(StateOutput::Response(SpawnResponse::exit(code)))
                .await;
        }
        Err(err) => {
            let _ = tx.send(StateOutput::Error(SessionError::Wait(err))).await;
        }
    }
    let _ = tx.send(StateOutput::Complete).await;
}

async fn wait_pty(
    mut child: Box<dyn portable_pty::Child + Send + Sync>,
    reader_task: JoinHandle<()>,
    tx: mpsc::Sender<StateOutput>,
    exited: Arc<AtomicBool>,
) {
    let status = tokio::task::spawn_blocking(move || child.wait()).await;
    exited.store(true, Ordering::SeqCst);
    let _ = reader_task.await;

    match status {
        Ok(Ok(status)) => {
            #[allow(clippy::cast_possible_wrap)]
            let code = status.exit_code() as i32;
            let _ = tx
                .send(StateOutput::Response(SpawnResponse::exit(code)))
                .await;
        }
        Ok(Err(err)) => {
            let _ = tx.send(StateOutput::Error(SessionError::Wait(err))).await;
        }
        Err(_) => {
            let _ = tx
                .send(StateOutput::Error(SessionError::Wait(io::Error::other(
                    "wait task failed",
                ))))
                .await;
        }
    }
    let _ = tx.send(StateOutput::Complete).await;
}

/// Blocking pump from the pty master to the session channel.
///
/// A pty master read fails with EIO once the child side is gone; any read
/// error therefore counts as end of stream rather than a session failure.
fn pump_pty_output(mut reader: Box<dyn Read + Send>, tx: &mpsc::Sender<StateOutput>) {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx
                    .blocking_send(StateOutput::Response(SpawnResponse::stdout(
                        buf[..n].to_vec(),
                    )))
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}

/// Blocking pump from the stdin relay into the pty master.
fn pump_pty_stdin(mut writer: Box<dyn Write + Send>, mut relay: mpsc::Receiver<Vec<u8>>) {
    while let Some(bytes) = relay.blocking_recv() {
        if writer.write_all(&bytes).and_then(|()| writer.flush()).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::spawn_response::Payload;

    fn spec(command: &str, args: &[&str]) -> SpawnSpec {
        SpawnSpec {
            command: command.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            envs: Vec::new(),
            cwd: std::env::temp_dir(),
            has_stdin: false,
            pty: None,
        }
    }

    struct Collected {
        pid: Option<String>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        exit: Option<i32>,
        errors: Vec<String>,
    }

    async fn collect(rx: &mut mpsc::Receiver<StateOutput>) -> Collected {
        let mut collected = Collected {
            pid: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit: None,
            errors: Vec::new(),
        };
        while let Some(item) = rx.recv().await {
            match item {
                StateOutput::Response(rsp) => match rsp.payload {
                    Some(Payload::Pid(pid)) => {
                        assert!(collected.pid.is_none(), "pid emitted twice");
                        assert!(collected.stdout.is_empty() && collected.exit.is_none());
                        collected.pid = Some(pid.id);
                    }
                    Some(Payload::Stdout(bytes)) => collected.stdout.extend(bytes),
                    Some(Payload::Stderr(bytes)) => collected.stderr.extend(bytes),
                    Some(Payload::Exit(exit)) => {
                        assert!(collected.exit.is_none(), "exit emitted twice");
                        collected.exit = Some(exit.code);
                    }
                    other => panic!("unexpected response: {other:?}"),
                },
                StateOutput::Error(err) => collected.errors.push(err.to_string()),
                StateOutput::Complete => break,
            }
        }
        collected
    }

    #[tokio::test]
    async fn echo_produces_pid_stdout_and_exit() {
        let (mut supervisor, mut rx) = Supervisor::spawn(spec("echo", &["hello"])).unwrap();
        let out = collect(&mut rx).await;
        assert!(out.pid.is_some());
        assert_eq!(out.stdout, b"hello\n");
        assert_eq!(out.exit, Some(0));
        assert!(out.errors.is_empty());
        drop(rx);
        supervisor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_reported() {
        let (mut supervisor, mut rx) = Supervisor::spawn(spec("sh", &["-c", "exit 7"])).unwrap();
        let out = collect(&mut rx).await;
        assert_eq!(out.exit, Some(7));
        drop(rx);
        supervisor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stderr_is_kept_separate_from_stdout() {
        let (mut supervisor, mut rx) =
            Supervisor::spawn(spec("sh", &["-c", "echo out; echo err >&2"])).unwrap();
        let out = collect(&mut rx).await;
        assert_eq!(out.stdout, b"out\n");
        assert_eq!(out.stderr, b"err\n");
        assert_eq!(out.exit, Some(0));
        drop(rx);
        supervisor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stdin_roundtrips_through_cat() {
        let mut cat = spec("cat", &[]);
        cat.has_stdin = true;
        let (mut supervisor, mut rx) = Supervisor::spawn(cat).unwrap();
        assert!(supervisor.stdin_available());
        supervisor.write_stdin(b"abc".to_vec()).await.unwrap();
        supervisor.close_stdin().await.unwrap();

        let out = collect(&mut rx).await;
        assert_eq!(out.stdout, b"abc");
        assert_eq!(out.exit, Some(0));
        drop(rx);
        supervisor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stdin_is_unavailable_without_the_flag() {
        let (mut supervisor, mut rx) = Supervisor::spawn(spec("echo", &[])).unwrap();
        assert!(!supervisor.stdin_available());
        let err = supervisor.write_stdin(b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, SessionError::StdinUnavailable));
        let _ = collect(&mut rx).await;
        drop(rx);
        supervisor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn kill_terminates_a_long_running_child() {
        let (mut supervisor, mut rx) = Supervisor::spawn(spec("sleep", &["30"])).unwrap();
        let handle = supervisor.kill_handle();
        handle.kill().unwrap();

        let out = collect(&mut rx).await;
        // SIGKILL leaves no exit code.
        assert_eq!(out.exit, Some(-1));

        // Killing again after exit stays successful.
        handle.kill().unwrap();
        drop(rx);
        supervisor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn env_overrides_reach_the_child() {
        let mut with_env = spec("sh", &["-c", "printf '%s' \"$RCE_TEST_VALUE\""]);
        with_env.envs = vec![("RCE_TEST_VALUE".to_string(), "from-override".to_string())];
        let (mut supervisor, mut rx) = Supervisor::spawn(with_env).unwrap();
        let out = collect(&mut rx).await;
        assert_eq!(out.stdout, b"from-override");
        drop(rx);
        supervisor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn spawn_failure_reports_the_command() {
        let err = match Supervisor::spawn(spec("rce-test-no-such-binary", &[])) {
            Err(err) => err,
            Ok(_) => panic!("spawn should fail"),
        };
        assert!(err.to_string().contains("rce-test-no-such-binary"));
    }

    #[tokio::test]
    async fn pty_mode_merges_output_onto_the_master() {
        let mut terminal = spec("sh", &["-c", "printf hi"]);
        terminal.pty = Some((24, 80));
        let (mut supervisor, mut rx) = Supervisor::spawn(terminal).unwrap();
        assert!(supervisor.stdin_available());
        let out = collect(&mut rx).await;
        assert!(out.stdout.ends_with(b"hi"), "stdout: {:?}", out.stdout);
        assert_eq!(out.exit, Some(0));
        drop(rx);
        supervisor.shutdown().await.unwrap();
    }
}
