//! Inbound SHARP session state machine
//!
//! One [`Session`] per accepted connection. The session is transport-agnostic: it
//! consumes decoded frames and says what to reply, leaving IO to the server.
//!
//! ```text
//! HELLO -> MAIL_TO -> DATA -> RECEIVING_DATA { EMAIL_CONTENT* -> END_DATA }
//! ```

use crate::core::{Address, AddressError, EmailId, EmailStatus, Envelope, DEFAULT_CONTENT_TYPE};
use crate::network::message::{EmailContent, Message, PROTOCOL_VERSION};
use crate::storage::{MailStore, StorageError};
use std::sync::Arc;
use thiserror::Error;

/// Inbound protocol errors. Every one of them ends the connection.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid SHARP address format: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("Expected {0}")]
    UnexpectedMessage(&'static str),
    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),
    #[error("Domain not served: {0}")]
    DomainNotServed(String),
    #[error("Recipient user not found: {0}")]
    RecipientNotFound(String),
    #[error("Invalid message format: {0}")]
    MalformedMessage(String),
    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl ProtocolError {
    /// Text sent to the peer in the ERROR frame
    pub fn wire_message(&self) -> String {
        match self {
            ProtocolError::InvalidAddress(_) => "Invalid SHARP address format".to_string(),
            ProtocolError::UnexpectedMessage(expected) => format!("Expected {}", expected),
            ProtocolError::UnsupportedProtocolVersion(_) => {
                "Unsupported protocol version".to_string()
            }
            ProtocolError::DomainNotServed(_) => "Domain not served".to_string(),
            ProtocolError::RecipientNotFound(_) => "Recipient user not found".to_string(),
            ProtocolError::MalformedMessage(_) => "Invalid message format".to_string(),
            ProtocolError::Storage(_) => "Internal server error".to_string(),
        }
    }
}

/// Handshake step the session is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Hello,
    MailTo,
    Data,
    ReceivingData,
}

impl SessionState {
    /// What the peer should have sent in this state
    pub fn expected(self) -> &'static str {
        match self {
            SessionState::Hello => "HELLO",
            SessionState::MailTo => "MAIL_TO",
            SessionState::Data => "DATA",
            SessionState::ReceivingData => "EMAIL_CONTENT or END_DATA",
        }
    }
}

/// What the server does after a frame was handled
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Send the reply and keep reading
    Reply(Message),
    /// Keep reading without replying
    Silent,
    /// Send the reply, then close
    Complete { reply: Message, id: EmailId },
}

/// Content accumulated in RECEIVING_DATA; later frames overwrite earlier fields
#[derive(Debug, Clone, Default)]
struct ContentDraft {
    subject: Option<String>,
    body: Option<String>,
    content_type: Option<String>,
    html_body: Option<String>,
    attachments: Option<Vec<String>>,
}

impl ContentDraft {
    fn merge(&mut self, content: EmailContent) {
        if content.subject.is_some() {
            self.subject = content.subject;
        }
        if content.body.is_some() {
            self.body = content.body;
        }
        if content.content_type.is_some() {
            self.content_type = content.content_type;
        }
        if content.html_body.is_some() {
            self.html_body = content.html_body;
        }
        if content.attachments.is_some() {
            self.attachments = content.attachments;
        }
    }
}

/// State of one inbound connection
pub struct Session {
    state: SessionState,
    local_domain: String,
    store: Arc<dyn MailStore>,
    from: Option<Address>,
    to: Option<Address>,
    draft: ContentDraft,
}

impl Session {
    pub fn new(local_domain: &str, store: Arc<dyn MailStore>) -> Self {
        Self {
            state: SessionState::Hello,
            local_domain: local_domain.to_string(),
            store,
            from: None,
            to: None,
            draft: ContentDraft::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Advance the handshake by one frame
    pub fn handle(&mut self, msg: Message) -> Result<Outcome, ProtocolError> {
        match (self.state, msg) {
            (SessionState::Hello, Message::Hello { server_id, protocol }) => {
                let from = Address::parse(&server_id)?;
                if protocol != PROTOCOL_VERSION {
                    return Err(ProtocolError::UnsupportedProtocolVersion(protocol));
                }

                log::debug!("HELLO from {}", from);
                self.from = Some(from);
                self.state = SessionState::MailTo;
                Ok(Outcome::Reply(Message::ok_with_protocol()))
            }

            (SessionState::MailTo, Message::MailTo { address }) => {
                let to = Address::parse(&address)?;
                if !to.is_local_to(&self.local_domain) {
                    return Err(ProtocolError::DomainNotServed(to.host()));
                }
                if self.store.lookup_user(&to.username, &self.local_domain)?.is_none() {
                    return Err(ProtocolError::RecipientNotFound(to.to_string()));
                }

                self.to = Some(to);
                self.state = SessionState::Data;
                Ok(Outcome::Reply(Message::ok()))
            }

            (SessionState::Data, Message::Data) => {
                self.state = SessionState::ReceivingData;
                Ok(Outcome::Reply(Message::ok()))
            }

            (SessionState::ReceivingData, Message::EmailContent(content)) => {
                self.draft.merge(content);
                Ok(Outcome::Silent)
            }

            (SessionState::ReceivingData, Message::EndData) => {
                let id = self.commit()?;
                Ok(Outcome::Complete {
                    reply: Message::completed(),
                    id,
                })
            }

            (state, _) => Err(ProtocolError::UnexpectedMessage(state.expected())),
        }
    }

    fn commit(&mut self) -> Result<EmailId, ProtocolError> {
        let (Some(from), Some(to)) = (self.from.take(), self.to.take()) else {
            return Err(ProtocolError::UnexpectedMessage(SessionState::Hello.expected()));
        };
        let draft = std::mem::take(&mut self.draft);

        let envelope = Envelope {
            subject: draft.subject.unwrap_or_default(),
            body: draft.body.unwrap_or_default(),
            content_type: draft
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            html_body: draft.html_body,
            attachments: draft.attachments.unwrap_or_default(),
            ..Envelope::new(from, to, "", "")
        };

        log::info!(
            "Accepted mail {} -> {} ({:?})",
            envelope.from,
            envelope.to,
            envelope.subject
        );

        Ok(self.store.insert_email(envelope, EmailStatus::Sent)?)
    }
}
