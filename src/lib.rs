//! SHARP: a mail transfer protocol node in Rust
//!
//! This crate provides a complete SHARP host featuring:
//! - `user#domain[:port]` addressing
//! - Newline-delimited JSON handshake over TCP (HELLO, MAIL_TO, DATA, END_DATA)
//! - Peer discovery via DNS SRV records validated by an HTTP health check
//! - Hashcash admission control with pre-mined stamp pooling
//! - Scheduled and retried delivery with stale-attempt recovery
//! - JSON persistence of mail records and users
//!
//! # Example
//!
//! ```rust
//! use sharp_mail::core::Address;
//! use sharp_mail::crypto::{score, Score};
//! use sharp_mail::mining::Minter;
//!
//! let to = Address::parse("bob#mail.example").unwrap();
//!
//! // Pay for the message
//! let now = chrono::Utc::now();
//! let (stamp, stats) = Minter::new(12).unwrap().mint(&to.to_string(), now);
//! println!("Minted in {}ms", stats.time_ms);
//!
//! // A 12-bit stamp is accepted but flagged
//! assert_eq!(score(Some(&stamp), &to.to_string(), now), Score::Weak);
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod context;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod network;
pub mod scheduler;
pub mod storage;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use config::ServerConfig;
pub use context::AppContext;
pub use core::{Address, EmailRecord, EmailStatus, Envelope};
pub use crypto::{Disposition, Score};
pub use mining::{Minter, TokenPool};
pub use network::{DeliveryClient, Node, PeerDiscovery};
pub use scheduler::Scheduler;
pub use storage::{JsonStore, MailStore};
