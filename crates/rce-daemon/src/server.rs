//! TCP listener, handshake, and per-connection dispatch.
//!
//! Every connection carries exactly one call. The first frame must be a
//! [`Hello`] naming the method; the server validates the protocol version,
//! acknowledges with a [`HelloAck`], and hands the framed stream to the
//! session driver or the kill endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use prost::Message;
use rce_core::protocol::{
    messages, FrameCodec, Hello, HelloAck, Method, ProtocolError, PROTOCOL_VERSION,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::registry::Registry;
use crate::{kill, session};

/// How long a fresh connection may take to complete the handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// The rce daemon: a listener plus the shared process registry.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl Server {
    /// Bind the listen socket. A bare `:port` address binds all
    /// interfaces.
    ///
    /// # Errors
    ///
    /// Returns an error when the address cannot be bound.
    pub async fn bind(address: &str) -> Result<Self> {
        let address = normalize_listen_addr(address);
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("failed to listen on {address}"))?;
        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
        })
    }

    /// The bound socket address.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket address cannot be read back.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to read listener address")
    }

    /// The shared process registry.
    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accept and serve connections until the task is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error when accepting fails; individual connection
    /// failures are logged and do not stop the server.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .context("failed to accept connection")?;
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, peer, registry).await {
                    warn!(%peer, error = format!("{err:#}"), "connection ended with error");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
) -> Result<()> {
    debug!(%peer, "connection accepted");
    let mut framed = Framed::new(stream, FrameCodec::new());

    let hello = match tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
        Err(_) => {
            warn!(%peer, "handshake timed out");
            return Ok(());
        }
        // Closed before saying hello; nothing to do.
        Ok(None) => return Ok(()),
        Ok(Some(frame)) => {
            Hello::decode(frame?).map_err(|err| ProtocolError::decode("hello", err))?
        }
    };

    if hello.version != PROTOCOL_VERSION {
        warn!(%peer, version = hello.version, "unsupported protocol version");
        let ack = HelloAck {
            accepted: false,
            error: format!(
                "unsupported protocol version {} (this server speaks {PROTOCOL_VERSION})",
                hello.version
            ),
        };
        let _ = framed.send(messages::encode(&ack)).await;
        return Ok(());
    }

    framed
        .send(messages::encode(&HelloAck {
            accepted: true,
            error: String::new(),
        }))
        .await?;

    match hello.method() {
        Method::Spawn => {
            info!(%peer, "spawn session opened");
            let result = session::run(framed, registry).await;
            info!(%peer, ok = result.is_ok(), "spawn session closed");
            result
        }
        Method::Kill => kill::handle(framed, registry).await,
    }
}

/// Expand a bare `:port` into an all-interfaces listen address.
fn normalize_listen_addr(address: &str) -> String {
    match address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_binds_all_interfaces() {
        assert_eq!(normalize_listen_addr(":8999"), "0.0.0.0:8999");
        assert_eq!(normalize_listen_addr("127.0.0.1:8999"), "127.0.0.1:8999");
        assert_eq!(normalize_listen_addr("[::1]:8999"), "[::1]:8999");
    }
}
