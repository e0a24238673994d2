//! Storage module for mail persistence

pub mod persistence;

pub use persistence::{
    AttachmentSink, JsonStore, LogAttachmentSink, MailStore, StorageConfig, StorageError, User,
};
