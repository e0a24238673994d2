//! Core mail data model
//!
//! This module contains:
//! - Addresses (`user#domain[:port]`)
//! - Envelopes assembled during a handshake or submission
//! - Durable email records with forward-only status transitions

pub mod address;
pub mod email;

pub use address::{Address, AddressError, ADDRESS_SEPARATOR};
pub use email::{
    Classification, EmailId, EmailRecord, EmailStatus, Envelope, DEFAULT_CONTENT_TYPE,
    SELF_DESTRUCT_AFTER_SECS,
};
