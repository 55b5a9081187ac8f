//! Shared harness for daemon integration tests: an in-process server plus
//! a raw protocol client built directly on the core wire types.

// Each integration test binary compiles its own copy and uses a subset.
#![allow(dead_code)]

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use prost::Message;
use rce_core::protocol::{
    messages, spawn_response, FrameCodec, Hello, HelloAck, KillResponse, Method, Pid,
    SpawnRequest, SpawnResponse,
};
use rce_daemon::server::Server;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// Bind a server on an ephemeral port and serve it in the background.
pub async fn start_server() -> SocketAddr {
    let server = Server::bind("127.0.0.1:0").await.expect("bind server");
    let addr = server.local_addr().expect("server address");
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

/// A protocol-level client for one connection.
pub struct TestClient {
    framed: Framed<TcpStream, FrameCodec>,
}

impl TestClient {
    /// Connect and complete the handshake for `method`.
    pub async fn connect(addr: SocketAddr, method: Method) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let mut framed = Framed::new(stream, FrameCodec::new());
        framed
            .send(messages::encode(&Hello::new(method)))
            .await
            .expect("send hello");
        let frame = framed
            .next()
            .await
            .expect("hello ack frame")
            .expect("hello ack read");
        let ack = HelloAck::decode(frame).expect("hello ack decode");
        assert!(ack.accepted, "handshake refused: {}", ack.error);
        Self { framed }
    }

    /// Raw access for tests that speak the handshake themselves.
    pub async fn connect_raw(addr: SocketAddr) -> Framed<TcpStream, FrameCodec> {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Framed::new(stream, FrameCodec::new())
    }

    pub async fn send(&mut self, request: &SpawnRequest) {
        self.framed
            .send(messages::encode(request))
            .await
            .expect("send request");
    }

    pub async fn recv(&mut self) -> Option<SpawnResponse> {
        let frame = self.framed.next().await?.expect("read response frame");
        Some(SpawnResponse::decode(frame).expect("decode response"))
    }

    /// Read until the server closes the stream, checking the response
    /// grammar on the way: `Pid?` then `(Stdout|Stderr)*` then
    /// `(Exit|Error)?` then EOF.
    pub async fn collect(mut self) -> Transcript {
        let mut transcript = Transcript::default();
        while let Some(rsp) = self.recv().await {
            let terminal = transcript.exit.is_some() || transcript.error.is_some();
            match rsp.payload {
                Some(spawn_response::Payload::Pid(pid)) => {
                    assert!(
                        transcript.pid.is_none(),
                        "pid must be emitted at most once"
                    );
                    assert!(
                        transcript.stdout.is_empty()
                            && transcript.stderr.is_empty()
                            && !terminal,
                        "pid must precede all other responses"
                    );
                    transcript.pid = Some(pid.id);
                }
                Some(spawn_response::Payload::Stdout(bytes)) => {
                    assert!(!terminal, "stdout after exit/error");
                    transcript.stdout.extend(bytes);
                }
                Some(spawn_response::Payload::Stderr(bytes)) => {
                    assert!(!terminal, "stderr after exit/error");
                    transcript.stderr.extend(bytes);
                }
                Some(spawn_response::Payload::Exit(exit)) => {
                    assert!(!terminal, "exit must be the last response");
                    transcript.exit = Some(exit.code);
                }
                Some(spawn_response::Payload::Error(err)) => {
                    assert!(!terminal, "error must be the last response");
                    transcript.error = Some(err.error);
                }
                None => panic!("response frame without payload"),
            }
        }
        transcript
    }
}

/// Accumulated responses of one session.
#[derive(Debug, Default)]
pub struct Transcript {
    pub pid: Option<String>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit: Option<i32>,
    pub error: Option<String>,
}

/// Issue a kill for `id` on a fresh connection; returns the response error
/// field (empty on success).
pub async fn kill(addr: SocketAddr, id: &str) -> String {
    let mut client = TestClient::connect(addr, Method::Kill).await;
    client
        .framed
        .send(messages::encode(&Pid { id: id.to_string() }))
        .await
        .expect("send kill request");
    let frame = client
        .framed
        .next()
        .await
        .expect("kill response frame")
        .expect("kill response read");
    KillResponse::decode(frame)
        .expect("decode kill response")
        .error
}
