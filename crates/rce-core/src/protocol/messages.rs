//! Protocol buffer message types.
//!
//! Messages are written out by hand with `prost` derives rather than
//! generated from a `.proto` file, so the crate builds without `protoc`.
//! Tag numbers are part of the wire contract; do not renumber.

use prost::Message;

/// Handshake methods a connection may request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Method {
    /// Bidirectional streaming spawn session.
    Spawn = 0,
    /// Unary out-of-band kill.
    Kill = 1,
}

/// First frame on every connection: protocol version plus requested method.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Hello {
    /// Protocol version the client speaks.
    #[prost(uint32, tag = "1")]
    pub version: u32,
    /// Requested method.
    #[prost(enumeration = "Method", tag = "2")]
    pub method: i32,
}

impl Hello {
    /// Build a hello for the given method at the current protocol version.
    #[must_use]
    pub fn new(method: Method) -> Self {
        Self {
            version: super::PROTOCOL_VERSION,
            method: method as i32,
        }
    }
}

/// Server's answer to a [`Hello`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HelloAck {
    /// Whether the connection may proceed.
    #[prost(bool, tag = "1")]
    pub accepted: bool,
    /// Refusal reason when `accepted` is false.
    #[prost(string, tag = "2")]
    pub error: String,
}

/// One environment override carried by a [`Head`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnvVar {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

/// Terminal dimensions requested for a PTY session.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct WindowSize {
    #[prost(uint32, tag = "1")]
    pub row: u32,
    #[prost(uint32, tag = "2")]
    pub col: u32,
}

/// Opening frame of a spawn session: what to run and how.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Head {
    /// Command to execute.
    #[prost(string, tag = "1")]
    pub command: String,
    /// Command arguments, in order.
    #[prost(string, repeated, tag = "2")]
    pub args: Vec<String>,
    /// Environment overrides applied on top of the server environment.
    #[prost(message, repeated, tag = "3")]
    pub envs: Vec<EnvVar>,
    /// Working directory. Empty means the server allocates a temporary one.
    #[prost(string, tag = "4")]
    pub path: String,
    /// Whether the client intends to stream stdin.
    #[prost(bool, tag = "5")]
    pub has_stdin: bool,
    /// Whether to attach the child to a pseudo-terminal.
    #[prost(bool, tag = "6")]
    pub allocate_pty: bool,
    /// Terminal size for PTY mode.
    #[prost(message, optional, tag = "7")]
    pub window_size: Option<WindowSize>,
}

/// One chunk of an uploaded file.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileChunk {
    /// Target path, absolute or relative to the working directory.
    #[prost(string, tag = "1")]
    pub filename: String,
    /// Chunk contents.
    #[prost(bytes = "vec", tag = "2")]
    pub content: Vec<u8>,
    /// Whether the file should be created executable.
    #[prost(bool, tag = "3")]
    pub executable: bool,
    /// Truncate before writing; append otherwise.
    #[prost(bool, tag = "4")]
    pub truncate: bool,
}

/// Signals the end of uploads; the child is spawned on receipt.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Start {}

/// One chunk of the child's stdin, or end-of-input.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StdinChunk {
    #[prost(bytes = "vec", tag = "1")]
    pub stdin: Vec<u8>,
    /// When set, stdin is closed and `stdin` is ignored.
    #[prost(bool, tag = "2")]
    pub eof: bool,
}

/// Identifier naming a live subprocess for out-of-band kill.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Pid {
    #[prost(string, tag = "1")]
    pub id: String,
}

/// Result of a kill request. An empty `error` means success.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KillResponse {
    #[prost(string, tag = "1")]
    pub error: String,
}

/// Client-to-server frame of a spawn session.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpawnRequest {
    #[prost(oneof = "spawn_request::Payload", tags = "1, 2, 3, 4")]
    pub payload: Option<spawn_request::Payload>,
}

/// Payload variants of [`SpawnRequest`].
pub mod spawn_request {
    /// Exactly one payload per frame.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Head(super::Head),
        #[prost(message, tag = "2")]
        File(super::FileChunk),
        #[prost(message, tag = "3")]
        Start(super::Start),
        #[prost(message, tag = "4")]
        Stdin(super::StdinChunk),
    }
}

impl SpawnRequest {
    /// Wrap a [`Head`] payload.
    #[must_use]
    pub fn head(head: Head) -> Self {
        Self {
            payload: Some(spawn_request::Payload::Head(head)),
        }
    }

    /// Wrap a [`FileChunk`] payload.
    #[must_use]
    pub fn file(file: FileChunk) -> Self {
        Self {
            payload: Some(spawn_request::Payload::File(file)),
        }
    }

    /// The start marker.
    #[must_use]
    pub fn start() -> Self {
        Self {
            payload: Some(spawn_request::Payload::Start(Start {})),
        }
    }

    /// A stdin data chunk.
    #[must_use]
    pub fn stdin(bytes: Vec<u8>) -> Self {
        Self {
            payload: Some(spawn_request::Payload::Stdin(StdinChunk {
                stdin: bytes,
                eof: false,
            })),
        }
    }

    /// The stdin end-of-input marker.
    #[must_use]
    pub fn stdin_eof() -> Self {
        Self {
            payload: Some(spawn_request::Payload::Stdin(StdinChunk {
                stdin: Vec::new(),
                eof: true,
            })),
        }
    }

    /// Name of the payload variant, for logs and protocol errors.
    #[must_use]
    pub fn payload_name(&self) -> &'static str {
        match &self.payload {
            Some(spawn_request::Payload::Head(_)) => "head",
            Some(spawn_request::Payload::File(_)) => "file",
            Some(spawn_request::Payload::Start(_)) => "start",
            Some(spawn_request::Payload::Stdin(_)) => "stdin",
            None => "empty",
        }
    }
}

/// Server-to-client frame of a spawn session.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpawnResponse {
    #[prost(oneof = "spawn_response::Payload", tags = "1, 2, 3, 4, 5")]
    pub payload: Option<spawn_response::Payload>,
}

/// Payload variants of [`SpawnResponse`].
pub mod spawn_response {
    /// Exit code of the finished child.
    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Exit {
        #[prost(int32, tag = "1")]
        pub code: i32,
    }

    /// Terminal session failure.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SessionError {
        #[prost(string, tag = "1")]
        pub error: String,
    }

    /// Exactly one payload per frame.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Pid(super::Pid),
        #[prost(bytes, tag = "2")]
        Stdout(Vec<u8>),
        #[prost(bytes, tag = "3")]
        Stderr(Vec<u8>),
        #[prost(message, tag = "4")]
        Exit(Exit),
        #[prost(message, tag = "5")]
        Error(SessionError),
    }
}

impl SpawnResponse {
    /// Wrap a subprocess identifier.
    #[must_use]
    pub fn pid(id: String) -> Self {
        Self {
            payload: Some(spawn_response::Payload::Pid(Pid { id })),
        }
    }

    /// Wrap a stdout chunk.
    #[must_use]
    pub fn stdout(bytes: Vec<u8>) -> Self {
        Self {
            payload: Some(spawn_response::Payload::Stdout(bytes)),
        }
    }

    /// Wrap a stderr chunk.
    #[must_use]
    pub fn stderr(bytes: Vec<u8>) -> Self {
        Self {
            payload: Some(spawn_response::Payload::Stderr(bytes)),
        }
    }

    /// Wrap an exit code.
    #[must_use]
    pub fn exit(code: i32) -> Self {
        Self {
            payload: Some(spawn_response::Payload::Exit(spawn_response::Exit { code })),
        }
    }

    /// Wrap a terminal error.
    #[must_use]
    pub fn error(error: String) -> Self {
        Self {
            payload: Some(spawn_response::Payload::Error(
                spawn_response::SessionError { error },
            )),
        }
    }
}

/// Encode a message into a frame payload.
#[must_use]
pub fn encode<M: Message>(msg: &M) -> bytes::Bytes {
    msg.encode_to_vec().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_request(req: SpawnRequest) -> SpawnRequest {
        SpawnRequest::decode(encode(&req)).unwrap()
    }

    #[test]
    fn head_roundtrip() {
        let head = Head {
            command: "sh".into(),
            args: vec!["-c".into(), "echo hi".into()],
            envs: vec![EnvVar {
                key: "FOO".into(),
                value: "bar".into(),
            }],
            path: "/tmp/work".into(),
            has_stdin: true,
            allocate_pty: true,
            window_size: Some(WindowSize { row: 40, col: 120 }),
        };
        let decoded = roundtrip_request(SpawnRequest::head(head.clone()));
        assert_eq!(decoded, SpawnRequest::head(head));
        assert_eq!(decoded.payload_name(), "head");
    }

    #[test]
    fn file_and_stdin_roundtrip() {
        let file = FileChunk {
            filename: "bin/run.sh".into(),
            content: b"#!/bin/sh\n".to_vec(),
            executable: true,
            truncate: true,
        };
        assert_eq!(
            roundtrip_request(SpawnRequest::file(file.clone())),
            SpawnRequest::file(file)
        );

        let stdin = roundtrip_request(SpawnRequest::stdin(b"abc".to_vec()));
        assert_eq!(stdin.payload_name(), "stdin");

        let eof = roundtrip_request(SpawnRequest::stdin_eof());
        match eof.payload {
            Some(spawn_request::Payload::Stdin(chunk)) => {
                assert!(chunk.eof);
                assert!(chunk.stdin.is_empty());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn empty_request_has_no_payload() {
        let decoded = SpawnRequest::decode(encode(&SpawnRequest::default())).unwrap();
        assert!(decoded.payload.is_none());
        assert_eq!(decoded.payload_name(), "empty");
    }

    #[test]
    fn response_variants_roundtrip() {
        for rsp in [
            SpawnResponse::pid("abc-123".into()),
            SpawnResponse::stdout(b"out".to_vec()),
            SpawnResponse::stderr(b"err".to_vec()),
            SpawnResponse::exit(7),
            SpawnResponse::error("boom".into()),
        ] {
            assert_eq!(SpawnResponse::decode(encode(&rsp)).unwrap(), rsp);
        }
    }

    #[test]
    fn hello_carries_method_and_version() {
        let hello = Hello::new(Method::Kill);
        let decoded = Hello::decode(encode(&hello)).unwrap();
        assert_eq!(decoded.version, crate::protocol::PROTOCOL_VERSION);
        assert_eq!(decoded.method(), Method::Kill);

        let unknown = Hello {
            version: 1,
            method: 42,
        };
        assert_eq!(unknown.method(), Method::Spawn);
    }
}
