//! REST API module
//!
//! HTTP companion to the SHARP listener.
//!
//! # Endpoints
//!
//! - `GET /api/server/health` - Protocol and hashcash policy, used by peers to validate this host
//! - `POST /api/send` - Submit a message (bearer token required, hashcash checked)
//! - `GET /api/emails/{id}` - Fetch a record the caller sent or received

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::{AuthError, Authenticator, StaticTokens};
pub use handlers::{ApiError, ApiState, SendRequest, SendResponse};
pub use routes::create_router;
