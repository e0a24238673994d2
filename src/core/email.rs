//! Envelopes and durable email records
//!
//! An [`Envelope`] is the message assembled during one handshake or one API submission.
//! Once committed it becomes an [`EmailRecord`] owned by the store, whose [`EmailStatus`]
//! only ever moves forward.

use crate::core::address::Address;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Content type used when the sender does not supply one
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Lifetime of a self-destructing message without an explicit expiry (24 hours)
pub const SELF_DESTRUCT_AFTER_SECS: i64 = 24 * 60 * 60;

/// Identifier of a stored email record
pub type EmailId = Uuid;

// =============================================================================
// Envelope
// =============================================================================

/// In-flight message data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: Address,
    pub to: Address,
    pub subject: String,
    pub body: String,
    pub content_type: String,
    pub html_body: Option<String>,
    /// Keys into the external attachment store
    #[serde(default)]
    pub attachments: Vec<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub self_destruct: bool,
}

impl Envelope {
    /// Create a plain-text envelope with no scheduling or expiry
    pub fn new(from: Address, to: Address, subject: &str, body: &str) -> Self {
        Self {
            from,
            to,
            subject: subject.to_string(),
            body: body.to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            html_body: None,
            attachments: Vec::new(),
            scheduled_at: None,
            expires_at: None,
            self_destruct: false,
        }
    }

    /// Expiry to store: the explicit one, or 24h after `now` for self-destructing mail
    pub fn effective_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match (self.expires_at, self.self_destruct) {
            (Some(at), _) => Some(at),
            (None, true) => Some(now + Duration::seconds(SELF_DESTRUCT_AFTER_SECS)),
            (None, false) => None,
        }
    }

    /// Whether delivery should be deferred to the scheduler
    pub fn is_scheduled_after(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map(|at| at > now).unwrap_or(false)
    }
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle status of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    Pending,
    Scheduled,
    Sending,
    Sent,
    Rejected,
    Spam,
    Failed,
}

impl EmailStatus {
    /// Whether a record in this status may move to `next`.
    ///
    /// Transitions are forward-only: `scheduled -> sending -> {sent | failed}` and
    /// `pending/sending -> {sent | rejected | failed}`.
    pub fn can_transition_to(self, next: EmailStatus) -> bool {
        use EmailStatus::*;

        match self {
            Pending => matches!(next, Sending | Sent | Rejected | Failed | Spam),
            Scheduled => matches!(next, Sending | Failed),
            Sending => matches!(next, Sent | Rejected | Failed),
            Spam => matches!(next, Failed),
            Sent | Rejected | Failed => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Scheduled => "scheduled",
            EmailStatus::Sending => "sending",
            EmailStatus::Sent => "sent",
            EmailStatus::Rejected => "rejected",
            EmailStatus::Spam => "spam",
            EmailStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Heuristic topic tag shown in the recipient's inbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    #[default]
    Primary,
    Promotions,
    Social,
    Forums,
    Updates,
}

const PROMOTION_WORDS: &[&str] = &[
    "sale", "discount", "offer", "deal", "coupon", "% off", "limited time", "buy now",
    "unsubscribe",
];
const SOCIAL_WORDS: &[&str] = &[
    "friend request", "followed you", "mentioned you", "tagged you", "invitation",
    "invited you", "birthday",
];
const FORUM_WORDS: &[&str] = &[
    "digest", "thread", "replied to", "new post", "mailing list", "discussion",
];
const UPDATE_WORDS: &[&str] = &[
    "receipt", "invoice", "order", "shipped", "delivery", "password", "verify", "security alert",
    "notification", "statement",
];

impl Classification {
    /// Classify by keyword hits in subject and body; the subject counts double.
    /// Ties and zero hits fall back to `Primary`.
    pub fn classify(subject: &str, body: &str) -> Self {
        let subject = subject.to_lowercase();
        let body = body.to_lowercase();

        let hits = |words: &[&str]| -> usize {
            words
                .iter()
                .map(|w| 2 * subject.matches(w).count() + body.matches(w).count())
                .sum()
        };

        let scored = [
            (Classification::Promotions, hits(PROMOTION_WORDS)),
            (Classification::Social, hits(SOCIAL_WORDS)),
            (Classification::Forums, hits(FORUM_WORDS)),
            (Classification::Updates, hits(UPDATE_WORDS)),
        ];

        let best = scored.iter().map(|(_, n)| *n).max().unwrap_or(0);
        if best == 0 || scored.iter().filter(|(_, n)| *n == best).count() > 1 {
            return Classification::Primary;
        }

        scored
            .iter()
            .find(|(_, n)| *n == best)
            .map(|(c, _)| *c)
            .unwrap_or_default()
    }
}

// =============================================================================
// Record
// =============================================================================

/// Durable email record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: EmailId,
    pub envelope: Envelope,
    pub status: EmailStatus,
    pub classification: Classification,
    pub error_message: Option<String>,
    /// When the current send attempt was initiated
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl EmailRecord {
    /// Build a fresh record from a committed envelope
    pub fn new(envelope: Envelope, status: EmailStatus, now: DateTime<Utc>) -> Self {
        let classification = Classification::classify(&envelope.subject, &envelope.body);
        let expires_at = envelope.effective_expiry(now);

        Self {
            id: Uuid::new_v4(),
            envelope: Envelope {
                expires_at,
                ..envelope
            },
            status,
            classification,
            error_message: None,
            sent_at: now,
            read_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.envelope.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}
