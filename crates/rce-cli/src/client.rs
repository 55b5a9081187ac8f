//! Client-side session: connection, uploads, stdin forwarding, and the
//! response demultiplexer.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use prost::Message;
use rce_core::protocol::{
    messages, spawn_response, FileChunk, FrameCodec, Head, Hello, HelloAck, KillResponse, Method,
    Pid, ProtocolError, SpawnRequest, SpawnResponse, WindowSize,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// Chunk size for uploads and stdin forwarding.
const SEND_BUF_SIZE: usize = 4096;

type FrameSink = SplitSink<Framed<TcpStream, FrameCodec>, bytes::Bytes>;

/// Everything a spawn run needs, parsed off the command line.
#[derive(Debug)]
pub struct SpawnOptions {
    /// Server address.
    pub address: String,
    /// Remote command.
    pub command: String,
    /// Remote command arguments.
    pub args: Vec<String>,
    /// Environment overrides.
    pub envs: Vec<(String, String)>,
    /// Files to upload before starting, as (local, remote) pairs.
    pub uploads: Vec<(PathBuf, String)>,
    /// Remote working directory; `None` lets the server allocate one.
    pub dir: Option<String>,
    /// Forward local stdin.
    pub with_stdin: bool,
    /// Where to record the remote identifier.
    pub pid_file: Option<PathBuf>,
}

/// Open a connection and complete the handshake for `method`.
async fn connect(address: &str, method: Method) -> Result<Framed<TcpStream, FrameCodec>> {
    let address = normalize_dial_addr(address);
    let stream = TcpStream::connect(&address)
        .await
        .with_context(|| format!("failed to connect to {address}"))?;
    let mut framed = Framed::new(stream, FrameCodec::new());

    framed.send(messages::encode(&Hello::new(method))).await?;
    let frame = framed
        .next()
        .await
        .ok_or(ProtocolError::UnexpectedEof("hello ack"))??;
    let ack = HelloAck::decode(frame).map_err(|err| ProtocolError::decode("hello ack", err))?;
    if !ack.accepted {
        return Err(ProtocolError::Refused(ack.error).into());
    }
    Ok(framed)
}

/// Run one spawn session to completion.
///
/// Returns the remote exit code, or -1 when the stream ends without an
/// `Exit` frame. The first `Pid` frame is stored into `pid` as soon as it
/// arrives so the caller can kill the remote process even when this future
/// is cancelled.
///
/// # Errors
///
/// Fails on transport errors, upload failures, or a terminal `Error` frame
/// from the server.
pub async fn run_spawn(
    options: &SpawnOptions,
    interactive: bool,
    pid: &mut Option<String>,
) -> Result<i32> {
    let framed = connect(&options.address, Method::Spawn).await?;
    let (mut sink, mut stream) = framed.split();

    sink.send(messages::encode(&SpawnRequest::head(build_head(
        options,
        interactive,
    )?)))
    .await?;

    for (local, remote) in &options.uploads {
        upload_file(&mut sink, local, remote).await?;
    }

    sink.send(messages::encode(&SpawnRequest::start())).await?;

    if options.with_stdin {
        tokio::spawn(forward_stdin(sink));
    } else {
        drop(sink);
    }

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();

    while let Some(frame) = stream.next().await {
        let rsp = SpawnResponse::decode(frame?)
            .map_err(|err| ProtocolError::decode("spawn response", err))?;
        match rsp.payload {
            Some(spawn_response::Payload::Pid(remote)) => {
                if pid.is_none() {
                    debug!(id = %remote.id, "remote process started");
                    if let Some(path) = &options.pid_file {
                        write_pid_file(path, &remote.id).await?;
                    }
                    *pid = Some(remote.id);
                }
            }
            Some(spawn_response::Payload::Stdout(bytes)) => {
                stdout.write_all(&bytes).await?;
                stdout.flush().await?;
            }
            Some(spawn_response::Payload::Stderr(bytes)) => {
                stderr.write_all(&bytes).await?;
                stderr.flush().await?;
            }
            Some(spawn_response::Payload::Exit(exit)) => return Ok(exit.code),
            Some(spawn_response::Payload::Error(err)) => {
                return Err(anyhow!("remote error: {}", err.error));
            }
            None => {}
        }
    }

    // Stream ended without an exit code.
    Ok(-1)
}

/// Ask the server to kill the process named by `id`.
///
/// # Errors
///
/// Fails on transport errors or a non-empty error in the response.
pub async fn kill(address: &str, id: &str) -> Result<()> {
    let mut framed = connect(address, Method::Kill).await?;
    framed
        .send(messages::encode(&Pid { id: id.to_string() }))
        .await?;
    let frame = framed
        .next()
        .await
        .ok_or(ProtocolError::UnexpectedEof("kill response"))??;
    let rsp =
        KillResponse::decode(frame).map_err(|err| ProtocolError::decode("kill response", err))?;
    if !rsp.error.is_empty() {
        bail!("{}", rsp.error);
    }
    Ok(())
}

fn build_head(options: &SpawnOptions, interactive: bool) -> Result<Head> {
    let mut head = Head {
        command: options.command.clone(),
        args: options.args.clone(),
        envs: options
            .envs
            .iter()
            .map(|(key, value)| rce_core::protocol::EnvVar {
                key: key.clone(),
                value: value.clone(),
            })
            .collect(),
        path: options.dir.clone().unwrap_or_default(),
        has_stdin: options.with_stdin,
        allocate_pty: false,
        window_size: None,
    };
    if interactive {
        let (cols, rows) = crossterm::terminal::size().context("failed to read terminal size")?;
        head.allocate_pty = true;
        head.window_size = Some(WindowSize {
            row: u32::from(rows),
            col: u32::from(cols),
        });
    }
    Ok(head)
}

/// Stream one local file as `File` chunks. The first chunk truncates; the
/// executable bit follows the local mode.
async fn upload_file(sink: &mut FrameSink, local: &Path, remote: &str) -> Result<()> {
    let metadata = tokio::fs::metadata(local)
        .await
        .with_context(|| format!("failed to stat {}", local.display()))?;
    if metadata.is_dir() {
        bail!("directory uploads are not supported: {}", local.display());
    }
    let executable = metadata.permissions().mode() & 0o100 != 0;

    let mut file = tokio::fs::File::open(local)
        .await
        .with_context(|| format!("failed to open {}", local.display()))?;
    let mut buf = [0u8; SEND_BUF_SIZE];
    let mut truncate = true;
    loop {
        let n = file
            .read(&mut buf)
            .await
            .with_context(|| format!("failed to read {}", local.display()))?;
        if n == 0 {
            break;
        }
        sink.send(messages::encode(&SpawnRequest::file(FileChunk {
            filename: remote.to_string(),
            content: buf[..n].to_vec(),
            executable,
            truncate,
        })))
        .await?;
        truncate = false;
    }
    if truncate {
        // Zero-byte upload: still create the remote file.
        sink.send(messages::encode(&SpawnRequest::file(FileChunk {
            filename: remote.to_string(),
            content: Vec::new(),
            executable,
            truncate,
        })))
        .await?;
    }
    Ok(())
}

/// Pump local stdin into `Stdin` frames, ending with an eof marker.
async fn forward_stdin(mut sink: FrameSink) {
    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; SEND_BUF_SIZE];
    loop {
        match stdin.read(&mut buf).await {
            Ok(0) | Err(_) => {
                let _ = sink.send(messages::encode(&SpawnRequest::stdin_eof())).await;
                break;
            }
            Ok(n) => {
                if sink
                    .send(messages::encode(&SpawnRequest::stdin(buf[..n].to_vec())))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}

async fn write_pid_file(path: &Path, id: &str) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true).mode(0o600);
    let mut file = options
        .open(path)
        .await
        .with_context(|| format!("failed to write pid file {}", path.display()))?;
    file.write_all(id.as_bytes())
        .await
        .with_context(|| format!("failed to write pid file {}", path.display()))
}

/// Parse a repeatable `--env key=value` argument.
pub fn parse_env(raw: &str) -> Result<(String, String)> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| anyhow!("invalid --env '{raw}', expected key=value"))
}

/// Parse a repeatable `--upload local:remote` argument.
pub fn parse_upload(raw: &str) -> Result<(PathBuf, String)> {
    raw.split_once(':')
        .filter(|(local, remote)| !local.is_empty() && !remote.is_empty())
        .map(|(local, remote)| (PathBuf::from(local), remote.to_string()))
        .ok_or_else(|| anyhow!("invalid --upload '{raw}', expected local:remote"))
}

/// Expand a bare `:port` into a localhost dial address.
fn normalize_dial_addr(address: &str) -> String {
    match address.strip_prefix(':') {
        Some(port) => format!("127.0.0.1:{port}"),
        None => address.to_string(),
    }
}
