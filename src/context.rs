//! Process-wide services shared by the listeners and the scheduler
//!
//! Everything a handler needs is reachable from one [`AppContext`], built once at
//! startup and dropped at shutdown.

use crate::api::{Authenticator, StaticTokens};
use crate::config::ServerConfig;
use crate::core::AddressError;
use crate::network::message::{HashcashPolicy, HealthReport, PROTOCOL_VERSION};
use crate::network::{DeliveryClient, DiscoveryError, PeerDiscovery};
use crate::storage::{
    AttachmentSink, JsonStore, LogAttachmentSink, MailStore, StorageConfig, StorageError,
};
use std::sync::Arc;
use thiserror::Error;

/// Startup errors
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Resolver setup failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("Invalid token address: {0}")]
    TokenAddress(#[from] AddressError),
}

/// Shared services
pub struct AppContext {
    pub config: ServerConfig,
    pub store: Arc<dyn MailStore>,
    pub delivery: DeliveryClient,
    pub auth: Arc<dyn Authenticator>,
    pub attachments: Arc<dyn AttachmentSink>,
}

impl AppContext {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn MailStore>,
        delivery: DeliveryClient,
        auth: Arc<dyn Authenticator>,
        attachments: Arc<dyn AttachmentSink>,
    ) -> Self {
        Self {
            config,
            store,
            delivery,
            auth,
            attachments,
        }
    }

    /// Open the store under `data_dir`, register configured users and wire up
    /// system DNS discovery
    pub fn from_config(config: ServerConfig) -> Result<Self, ContextError> {
        let store = JsonStore::open(StorageConfig {
            data_dir: config.data_dir.clone(),
            ..Default::default()
        })?;
        for user in &config.users {
            store.add_user(user.clone())?;
        }

        let auth = StaticTokens::from_config(&config.tokens)?;
        let delivery = DeliveryClient::new(PeerDiscovery::system()?, config.delivery_timeout());

        log::info!(
            "Serving {} with {} local user(s)",
            config.domain,
            config.users.len()
        );

        Ok(Self::new(
            config,
            Arc::new(store),
            delivery,
            Arc::new(auth),
            Arc::new(LogAttachmentSink),
        ))
    }

    /// Body of the health check
    pub fn health_report(&self) -> HealthReport {
        HealthReport {
            status: "ok".to_string(),
            protocol: PROTOCOL_VERSION.to_string(),
            domain: self.config.domain.clone(),
            hashcash: HashcashPolicy {
                min_bits: self.config.hashcash.min_bits,
                recommended_bits: self.config.hashcash.recommended_bits,
            },
        }
    }
}
