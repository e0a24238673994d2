//! REST API handlers for mail submission

use crate::api::auth::{self, AuthError};
use crate::context::AppContext;
use crate::core::{Address, EmailId, EmailRecord, EmailStatus, Envelope, DEFAULT_CONTENT_TYPE};
use crate::crypto::{self, Disposition};
use crate::network::message::HealthReport;
use crate::network::DeliveryError;
use crate::storage::{MailStore, StorageError};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state for API handlers
pub type ApiState = Arc<AppContext>;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub content_type: Option<String>,
    pub html_body: Option<String>,
    pub hashcash: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub self_destruct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    pub id: EmailId,
    pub status: EmailStatus,
    pub message: String,
}

/// Error body, shaped like a failed [`SendResponse`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub success: bool,
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError::new(message)))
}

fn internal(e: StorageError) -> (StatusCode, Json<ApiError>) {
    log::error!("Storage failure while handling request: {}", e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn unauthorized(e: AuthError) -> (StatusCode, Json<ApiError>) {
    let status = match e {
        AuthError::Missing | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
        AuthError::IdentityMismatch { .. } => StatusCode::FORBIDDEN,
    };
    api_error(status, e.to_string())
}

fn accepted(
    status: StatusCode,
    id: EmailId,
    state: EmailStatus,
    message: &str,
) -> (StatusCode, Json<SendResponse>) {
    (
        status,
        Json(SendResponse {
            success: true,
            id,
            status: state,
            message: message.to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check, also used by peers to validate this host
pub async fn health_check(State(ctx): State<ApiState>) -> Json<HealthReport> {
    Json(ctx.health_report())
}

/// Submit a message for local delivery, scheduling, or immediate remote delivery
pub async fn send_email(
    State(ctx): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<SendRequest>,
) -> ApiResult<(StatusCode, Json<SendResponse>)> {
    let now = Utc::now();

    let identity = auth::authenticate(ctx.auth.as_ref(), &headers).map_err(unauthorized)?;
    let from = Address::parse(&req.from)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let to = Address::parse(&req.to)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    auth::check_sender(&identity, &from).map_err(unauthorized)?;

    // Stamps are minted against the recipient exactly as the client wrote it
    let score = crypto::score(req.hashcash.as_deref(), &req.to, now);
    let spam = match score.disposition() {
        Disposition::Reject => {
            log::info!("Refusing {} -> {}: insufficient proof of work", from, to);
            return Err(api_error(
                StatusCode::TOO_MANY_REQUESTS,
                "Insufficient proof of work",
            ));
        }
        Disposition::AcceptAsSpam => true,
        Disposition::Accept => false,
    };

    let local = to.is_local_to(&ctx.config.domain);
    if local
        && ctx
            .store
            .lookup_user(&to.username, &ctx.config.domain)
            .map_err(internal)?
            .is_none()
    {
        return Err(api_error(StatusCode::NOT_FOUND, "Recipient user not found"));
    }

    let envelope = Envelope {
        from,
        to,
        subject: req.subject,
        body: req.body,
        content_type: req
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        html_body: req.html_body,
        attachments: req.attachments,
        scheduled_at: req.scheduled_at,
        expires_at: req.expires_at,
        self_destruct: req.self_destruct,
    };

    if spam {
        log::info!(
            "Accepting {} -> {} as spam (hashcash score {})",
            envelope.from,
            envelope.to,
            score.value()
        );
        let id = ctx
            .store
            .insert_email(envelope, EmailStatus::Spam)
            .map_err(internal)?;
        return Ok(accepted(StatusCode::OK, id, EmailStatus::Spam, "Email accepted"));
    }

    if envelope.is_scheduled_after(now) {
        let id = ctx
            .store
            .insert_email(envelope, EmailStatus::Scheduled)
            .map_err(internal)?;
        return Ok(accepted(
            StatusCode::ACCEPTED,
            id,
            EmailStatus::Scheduled,
            "Email scheduled",
        ));
    }

    if local {
        let id = ctx
            .store
            .insert_email(envelope, EmailStatus::Sent)
            .map_err(internal)?;
        return Ok(accepted(StatusCode::OK, id, EmailStatus::Sent, "Email delivered"));
    }

    let id = ctx
        .store
        .insert_email(envelope.clone(), EmailStatus::Sending)
        .map_err(internal)?;
    Ok(deliver_remote(&ctx, id, &envelope).await)
}

/// Synchronous remote delivery; the record is finalized before responding
async fn deliver_remote(
    ctx: &AppContext,
    id: EmailId,
    envelope: &Envelope,
) -> (StatusCode, Json<SendResponse>) {
    let result = ctx.delivery.deliver(envelope).await;

    let (http, status, message) = match &result {
        Ok(_) => (StatusCode::OK, EmailStatus::Sent, "Email delivered".to_string()),
        Err(DeliveryError::Rejected(msg)) => {
            (StatusCode::BAD_GATEWAY, EmailStatus::Rejected, msg.clone())
        }
        Err(e @ DeliveryError::Timeout(_)) => {
            (StatusCode::GATEWAY_TIMEOUT, EmailStatus::Failed, e.to_string())
        }
        Err(e) => (StatusCode::BAD_GATEWAY, EmailStatus::Failed, e.to_string()),
    };

    let error = result.is_err().then_some(message.as_str());
    if let Err(e) = ctx.store.update_status(id, status, error) {
        // The stale sweep may have failed the record first; it stays failed
        log::warn!("Could not record delivery outcome for {}: {}", id, e);
    }

    (
        http,
        Json(SendResponse {
            success: result.is_ok(),
            id,
            status,
            message,
        }),
    )
}

/// Fetch a record the caller sent or received
pub async fn get_email(
    State(ctx): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<EmailId>,
) -> ApiResult<Json<EmailRecord>> {
    let identity = auth::authenticate(ctx.auth.as_ref(), &headers).map_err(unauthorized)?;

    let record = ctx
        .store
        .get_email(id)
        .map_err(internal)?
        .filter(|r| r.envelope.from == identity || r.envelope.to == identity)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Email {} not found", id)))?;

    Ok(Json(record))
}
