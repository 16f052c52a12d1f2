//! Channel Sender Abstraction

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;
use vitals_types::{AlertRecord, Channel};

/// Transport-level failures; the provider could not be asked at all
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Transport error on {channel}: {message}")]
    Transport {
        channel: &'static str,
        message: String,
    },

    #[error("Channel {0} is not configured")]
    Unsupported(&'static str),
}

/// Provider answer for one send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    /// Provider accepted the message
    pub fn accepted(provider_message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            provider_message_id: Some(provider_message_id.into()),
            error: None,
        }
    }

    /// Provider refused the message
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Concrete notification transport (push, SMS, email, voice)
///
/// Implementations must tolerate being called more than once for the same
/// recipient and alert.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(
        &self,
        channel: Channel,
        recipient_user_id: &str,
        alert: &AlertRecord,
    ) -> Result<SendOutcome, SendError>;
}

/// Sender that only writes notifications to the log
#[derive(Debug, Default)]
pub struct LogSender;

#[async_trait]
impl ChannelSender for LogSender {
    async fn send(
        &self,
        channel: Channel,
        recipient_user_id: &str,
        alert: &AlertRecord,
    ) -> Result<SendOutcome, SendError> {
        info!(
            "[{}] -> {}: {} ({}, level {})",
            channel.as_str(),
            recipient_user_id,
            alert.title,
            alert.severity.as_str(),
            alert.escalation_level
        );
        Ok(SendOutcome::accepted(format!("log-{}", Uuid::new_v4())))
    }
}
