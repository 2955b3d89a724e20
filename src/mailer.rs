//! Mailer trait and the Mandrill mailer.
//!
//! # Why `async_trait`?
//!
//! The global mailer (`configure()` / `deliver()`) stores an
//! `Arc<dyn Mailer>`, which needs an object-safe trait. Native async trait
//! methods are not object-safe, so `#[async_trait]` boxes the returned
//! futures. One allocation per send is noise next to a network round trip.
//!
//! Call methods on [`MandrillMailer`] directly to avoid dynamic dispatch.

use async_trait::async_trait;
use serde_json::Value;

use crate::client::MandrillClient;
use crate::diagnostics::Diagnostics;
use crate::error::MandrillError;
use crate::message::Message;

/// Trait for anything that can send a [`Message`].
///
/// # Example
///
/// ```ignore
/// use mandrill_mailer::{Mailer, MandrillMailer, Message};
///
/// let mailer = MandrillMailer::new("md-xxxxx");
///
/// let mut message = Message::new();
/// message
///     .from("sender@example.com")
///     .to("recipient@example.com")
///     .subject("Hello")
///     .text("World");
///
/// let result = mailer.send(&message).await?;
/// println!("{}", result[0]["status"]);
/// ```
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send a single message.
    ///
    /// Returns the provider's parsed response unchanged.
    async fn send(&self, message: &Message) -> Result<Value, MandrillError>;

    /// Diagnostics of the most recent send, if recorded.
    fn diagnostics(&self) -> Option<Diagnostics> {
        None
    }

    /// Get the provider name (for logging/debugging).
    fn provider_name(&self) -> &'static str {
        "unknown"
    }

    /// Validate configuration.
    ///
    /// Called at startup to verify required configuration is present.
    fn validate_config(&self) -> Result<(), MandrillError> {
        Ok(())
    }
}

/// Sends messages through Mandrill's `/messages/send` method.
pub struct MandrillMailer {
    client: MandrillClient,
}

impl MandrillMailer {
    /// API method used by [`Mailer::send`].
    pub const SEND_PATH: &'static str = "/messages/send";

    /// Create a mailer with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_client(MandrillClient::new(api_key))
    }

    /// Wrap an already configured client.
    pub fn with_client(client: MandrillClient) -> Self {
        Self { client }
    }

    /// Build from `MANDRILL_*` environment variables.
    ///
    /// See [`MandrillConfig::from_env`](crate::MandrillConfig::from_env).
    pub fn from_env() -> Result<Self, MandrillError> {
        let config = crate::MandrillConfig::from_env()?;
        Ok(Self::with_client(config.client()))
    }

    /// The underlying API client.
    pub fn client(&self) -> &MandrillClient {
        &self.client
    }
}

#[async_trait]
impl Mailer for MandrillMailer {
    async fn send(&self, message: &Message) -> Result<Value, MandrillError> {
        self.client.call(Self::SEND_PATH, message).await
    }

    fn diagnostics(&self) -> Option<Diagnostics> {
        self.client.diagnostics()
    }

    fn provider_name(&self) -> &'static str {
        "mandrill"
    }

    fn validate_config(&self) -> Result<(), MandrillError> {
        if self.client.api_key().trim().is_empty() {
            return Err(MandrillError::Configuration("Mandrill API key is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_name() {
        assert_eq!(MandrillMailer::new("key").provider_name(), "mandrill");
    }

    #[test]
    fn test_validate_config() {
        assert!(MandrillMailer::new("key").validate_config().is_ok());
        assert!(matches!(
            MandrillMailer::new("  ").validate_config(),
            Err(MandrillError::Configuration(_))
        ));
    }

    #[test]
    fn test_no_diagnostics_by_default() {
        assert!(MandrillMailer::new("key").diagnostics().is_none());
    }
}
