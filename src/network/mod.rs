//! SHARP networking module
//!
//! Provides the mail transfer protocol over TCP.
//!
//! # Features
//! - Newline-delimited JSON framing
//! - Inbound handshake state machine
//! - Outbound delivery client with a single deadline per attempt
//! - Peer discovery via DNS SRV plus health-check validation
//! - Node orchestration of the listeners and scheduler

pub mod client;
pub mod codec;
pub mod discovery;
pub mod message;
pub mod node;
pub mod peer;
pub mod server;
pub mod session;

pub use client::{Ack, DeliveryClient, DeliveryError, DEFAULT_DELIVERY_TIMEOUT};
pub use codec::{CodecError, JsonLineCodec, MAX_LINE_LENGTH};
pub use discovery::{
    DiscoveryError, DnsResolver, HealthProbe, HttpHealthProbe, PeerDiscovery, SrvTarget,
    SystemDns, HEALTH_PATH, SRV_SERVICE,
};
pub use message::{
    EmailContent, HashcashPolicy, HealthReport, Message, COMPLETION_MARKER, PROTOCOL_VERSION,
};
pub use node::{Node, NodeStatus};
pub use peer::Peer;
pub use server::{handle_connection, Server, DEFAULT_IDLE_TIMEOUT};
pub use session::{Outcome, ProtocolError, Session, SessionState};
