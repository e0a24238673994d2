//! Outbound delivery client
//!
//! Replays the SHARP handshake as initiator against a discovered or explicit peer.
//! Discovery, connecting and the full exchange share one deadline; when it passes,
//! the in-flight future is dropped, which closes the socket.

use crate::core::Envelope;
use crate::network::codec::{CodecError, JsonLineCodec};
use crate::network::discovery::{DiscoveryError, PeerDiscovery};
use crate::network::message::{EmailContent, Message, COMPLETION_MARKER};
use crate::network::peer::Peer;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// Default bound on discovery, connect and handshake together
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery errors
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Peer discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),
    #[error("Rejected by peer: {0}")]
    Rejected(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Malformed reply: {0}")]
    Malformed(String),
}

impl From<CodecError> for DeliveryError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) => DeliveryError::Connection(e.to_string()),
            other => DeliveryError::Malformed(other.to_string()),
        }
    }
}

/// Successful delivery
#[derive(Debug, Clone)]
pub struct Ack {
    pub peer: Peer,
    /// `message` of the final OK
    pub message: String,
}

/// Reply the client is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outbound {
    AwaitHello,
    AwaitMailTo,
    AwaitData,
    AwaitCompletion,
}

/// Delivers envelopes to remote SHARP hosts
#[derive(Clone)]
pub struct DeliveryClient {
    discovery: PeerDiscovery,
    timeout: Duration,
}

impl DeliveryClient {
    pub fn new(discovery: PeerDiscovery, timeout: Duration) -> Self {
        Self { discovery, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve the recipient's peer and hand the envelope over
    pub async fn deliver(&self, envelope: &Envelope) -> Result<Ack, DeliveryError> {
        let attempt = async {
            let peer = self.discovery.resolve(&envelope.to).await?;
            hand_over(peer, envelope).await
        };
        self.within_deadline(&envelope.to.to_string(), attempt).await
    }

    /// Hand the envelope to an already resolved peer
    pub async fn deliver_to(&self, peer: Peer, envelope: &Envelope) -> Result<Ack, DeliveryError> {
        let target = peer.to_string();
        self.within_deadline(&target, hand_over(peer, envelope)).await
    }

    async fn within_deadline<F>(&self, target: &str, attempt: F) -> Result<Ack, DeliveryError>
    where
        F: Future<Output = Result<Ack, DeliveryError>>,
    {
        tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| {
                log::warn!("Delivery to {} timed out after {:?}", target, self.timeout);
                DeliveryError::Timeout(self.timeout)
            })?
    }
}

async fn hand_over(peer: Peer, envelope: &Envelope) -> Result<Ack, DeliveryError> {
    log::debug!("Delivering {} -> {} via {}", envelope.from, envelope.to, peer);
    let message = exchange(&peer, envelope).await?;
    log::info!("Delivered {} -> {} via {}", envelope.from, envelope.to, peer);
    Ok(Ack { peer, message })
}

/// One lock-step handshake; at most one request is outstanding at any time
async fn exchange(peer: &Peer, envelope: &Envelope) -> Result<String, DeliveryError> {
    let stream = TcpStream::connect(peer.dial_addr())
        .await
        .map_err(|e| DeliveryError::Connection(format!("{}: {}", peer.dial_addr(), e)))?;
    let mut framed = Framed::new(stream, JsonLineCodec::new());

    framed.send(Message::hello(&envelope.from.to_string())).await?;
    let mut state = Outbound::AwaitHello;

    loop {
        let reply = match framed.next().await {
            Some(reply) => reply?,
            None => {
                return Err(DeliveryError::Connection(format!(
                    "{} closed the connection while {:?}",
                    peer, state
                )))
            }
        };

        log::debug!("Received {} from {} while {:?}", reply.type_name(), peer, state);

        state = match (state, reply) {
            (_, Message::Error { message }) => return Err(DeliveryError::Rejected(message)),

            (Outbound::AwaitCompletion, Message::Ok {
                message: Some(message),
                ..
            }) if message == COMPLETION_MARKER => return Ok(message),

            (Outbound::AwaitHello, Message::Ok { .. }) => {
                framed
                    .send(Message::MailTo {
                        address: envelope.to.to_string(),
                    })
                    .await?;
                Outbound::AwaitMailTo
            }

            (Outbound::AwaitMailTo, Message::Ok { .. }) => {
                framed.send(Message::Data).await?;
                Outbound::AwaitData
            }

            (Outbound::AwaitData, Message::Ok { .. }) => {
                // Content is never acknowledged, so END_DATA follows immediately
                framed.feed(Message::EmailContent(content_of(envelope))).await?;
                framed.send(Message::EndData).await?;
                Outbound::AwaitCompletion
            }

            (state, reply) => {
                return Err(DeliveryError::Malformed(format!(
                    "unexpected {} while {:?}",
                    reply.type_name(),
                    state
                )))
            }
        };
    }
}

fn content_of(envelope: &Envelope) -> EmailContent {
    EmailContent {
        subject: Some(envelope.subject.clone()),
        body: Some(envelope.body.clone()),
        content_type: Some(envelope.content_type.clone()),
        html_body: envelope.html_body.clone(),
        attachments: Some(envelope.attachments.clone()),
    }
}
