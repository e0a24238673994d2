//! TCP server and inbound connection handling
//!
//! Accepts SHARP connections and drives one [`Session`] per connection. A peer that
//! stays silent between frames for longer than the idle timeout is disconnected.

use crate::network::codec::{CodecError, JsonLineCodec};
use crate::network::message::Message;
use crate::network::session::{Outcome, ProtocolError, Session};
use crate::storage::MailStore;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

/// How long a connection may wait for its next frame
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP server for accepting SHARP connections
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    idle_timeout: Duration,
}

impl Server {
    /// Bind to `host:port`; port 0 picks a free port
    pub async fn bind(host: &str, port: u16) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        log::info!("SHARP server listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept incoming connections
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), std::io::Error> {
        self.listener.accept().await
    }

    /// Accept forever, serving each connection on its own task
    pub async fn run(self, local_domain: String, store: Arc<dyn MailStore>) {
        loop {
            match self.accept().await {
                Ok((stream, addr)) => {
                    log::debug!("Incoming connection from {}", addr);

                    let domain = local_domain.clone();
                    let store = store.clone();
                    let idle_timeout = self.idle_timeout;
                    tokio::spawn(async move {
                        let result =
                            handle_connection(stream, addr, &domain, store, idle_timeout).await;
                        if let Err(e) = result {
                            log::warn!("Connection error with {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Drive one inbound handshake to completion or first error.
///
/// Protocol errors are answered with an ERROR frame and end the connection without
/// committing anything; they are not reported as `Err`. Waiting longer than
/// `idle_timeout` for a frame drops the connection without a reply.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    local_domain: &str,
    store: Arc<dyn MailStore>,
    idle_timeout: Duration,
) -> Result<(), CodecError> {
    let mut framed = Framed::new(stream, JsonLineCodec::new());
    let mut session = Session::new(local_domain, store);

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, framed.next()).await else {
            log::info!(
                "Dropping {} after {:?} idle in state {:?}",
                addr,
                idle_timeout,
                session.state()
            );
            return Ok(());
        };

        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(CodecError::Io(e))) => return Err(CodecError::Io(e)),
            Some(Err(e)) => {
                log::warn!("Bad frame from {}: {}", addr, e);
                let err = ProtocolError::MalformedMessage(e.to_string());
                framed.send(Message::error(err.wire_message())).await?;
                return Ok(());
            }
            None => {
                log::debug!("Peer {} disconnected in state {:?}", addr, session.state());
                return Ok(());
            }
        };

        log::debug!("Received {} from {}", msg.type_name(), addr);

        match session.handle(msg) {
            Ok(Outcome::Reply(reply)) => framed.send(reply).await?,
            Ok(Outcome::Silent) => {}
            Ok(Outcome::Complete { reply, id }) => {
                log::debug!("Committed {} from {}", id, addr);
                framed.send(reply).await?;
                return Ok(());
            }
            Err(e) => {
                match &e {
                    ProtocolError::Storage(_) => log::error!("Session with {} failed: {}", addr, e),
                    _ => log::info!("Rejecting {}: {}", addr, e),
                }
                framed.send(Message::error(e.wire_message())).await?;
                return Ok(());
            }
        }
    }
}
