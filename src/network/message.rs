//! SHARP wire messages
//!
//! Every frame is one JSON object with a `type` tag, terminated by a newline.

use serde::{Deserialize, Serialize};

/// Protocol identifier exchanged in HELLO and advertised by the health check
pub const PROTOCOL_VERSION: &str = "SHARP/1.0";

/// `message` of the final OK, marking a committed envelope
pub const COMPLETION_MARKER: &str = "Email processed";

/// Body fields carried by EMAIL_CONTENT.
///
/// Absent fields leave the previously received value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<String>>,
}

/// SHARP protocol frames, both requests and responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Opens the handshake, naming the sending mailbox
    Hello { server_id: String, protocol: String },

    /// Names the recipient mailbox
    MailTo { address: String },

    /// Announces message content
    Data,

    /// Message content; never acknowledged
    EmailContent(EmailContent),

    /// Commits the message
    EndData,

    /// Positive reply
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Negative reply; the sender closes the connection after it
    Error { message: String },
}

impl Message {
    pub fn hello(server_id: &str) -> Self {
        Message::Hello {
            server_id: server_id.to_string(),
            protocol: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn ok() -> Self {
        Message::Ok {
            protocol: None,
            message: None,
        }
    }

    /// OK reply to HELLO, naming the protocol spoken
    pub fn ok_with_protocol() -> Self {
        Message::Ok {
            protocol: Some(PROTOCOL_VERSION.to_string()),
            message: None,
        }
    }

    /// Final OK after END_DATA
    pub fn completed() -> Self {
        Message::Ok {
            protocol: None,
            message: Some(COMPLETION_MARKER.to_string()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Message::Error {
            message: message.into(),
        }
    }

    /// Whether this is the final OK after a committed envelope
    pub fn is_completion(&self) -> bool {
        matches!(self, Message::Ok { message: Some(m), .. } if m == COMPLETION_MARKER)
    }

    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "HELLO",
            Message::MailTo { .. } => "MAIL_TO",
            Message::Data => "DATA",
            Message::EmailContent(_) => "EMAIL_CONTENT",
            Message::EndData => "END_DATA",
            Message::Ok { .. } => "OK",
            Message::Error { .. } => "ERROR",
        }
    }
}

/// Proof-of-work policy advertised by a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashcashPolicy {
    pub min_bits: u32,
    pub recommended_bits: u32,
}

/// Body of the HTTP health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub protocol: String,
    pub domain: String,
    pub hashcash: HashcashPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let hello = serde_json::to_value(Message::hello("alice#a.example")).unwrap();
        assert_eq!(
            hello,
            json!({"type": "HELLO", "server_id": "alice#a.example", "protocol": "SHARP/1.0"})
        );

        let data = serde_json::to_value(Message::Data).unwrap();
        assert_eq!(data, json!({"type": "DATA"}));

        let ok = serde_json::to_value(Message::ok()).unwrap();
        assert_eq!(ok, json!({"type": "OK"}));

        let err = serde_json::to_value(Message::error("Expected HELLO")).unwrap();
        assert_eq!(err, json!({"type": "ERROR", "message": "Expected HELLO"}));
    }

    #[test]
    fn test_parse_email_content() {
        let raw = br#"{"type":"EMAIL_CONTENT","subject":"S","body":"B","content_type":"text/html","html_body":"<p>B</p>","attachments":["k1"]}"#;
        let msg = Message::from_bytes(raw).unwrap();

        match msg {
            Message::EmailContent(content) => {
                assert_eq!(content.subject.as_deref(), Some("S"));
                assert_eq!(content.attachments, Some(vec!["k1".to_string()]));
            }
            other => panic!("Wrong message type: {}", other.type_name()),
        }
    }

    #[test]
    fn test_partial_email_content() {
        let msg = Message::from_bytes(br#"{"type":"EMAIL_CONTENT","subject":"only"}"#).unwrap();
        assert_eq!(
            msg,
            Message::EmailContent(EmailContent {
                subject: Some("only".to_string()),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(Message::from_bytes(br#"{"type":"RSET"}"#).is_err());
        assert!(Message::from_bytes(br#"{"server_id":"x"}"#).is_err());
    }

    #[test]
    fn test_completion_marker() {
        assert!(Message::completed().is_completion());
        assert!(!Message::ok().is_completion());
        assert!(!Message::error(COMPLETION_MARKER).is_completion());
    }

    #[test]
    fn test_health_report_field_names() {
        let report = HealthReport {
            status: "ok".to_string(),
            protocol: PROTOCOL_VERSION.to_string(),
            domain: "a.example".to_string(),
            hashcash: HashcashPolicy {
                min_bits: 5,
                recommended_bits: 18,
            },
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["hashcash"]["minBits"], 5);
        assert_eq!(value["hashcash"]["recommendedBits"], 18);
    }
}
