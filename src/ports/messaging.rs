//! Messaging Port
//!
//! The only write path to the outside world. Trade commands and operator
//! notifications alike go out as plain chat messages.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("failed to send message: {0}")]
    SendFailed(String),
    #[error("chat connection lost: {0}")]
    ConnectionLost(String),
}

/// An incoming chat message, already flattened to what routing needs.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender: i64,
    pub sender_username: Option<String>,
    pub text: String,
    /// URLs carried by message link entities, separate from the body text.
    pub entity_urls: Vec<String>,
}

/// Where to deliver an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageTarget {
    ChatId(i64),
    Username(String),
}

impl fmt::Display for MessageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageTarget::ChatId(id) => write!(f, "{}", id),
            MessageTarget::Username(name) => write!(f, "@{}", name),
        }
    }
}

#[async_trait]
pub trait Messaging: Send + Sync {
    async fn send(&self, target: &MessageTarget, text: &str) -> Result<(), MessagingError>;
}
