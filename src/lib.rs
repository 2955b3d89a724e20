//! # mandrill-mailer
//!
//! Compose transactional emails and deliver them through the Mandrill HTTP
//! API.
//!
//! ## Quick Start
//!
//! Set environment variables:
//! ```bash
//! MANDRILL_API_KEY=md-xxxxx
//! MANDRILL_LOGGER=true
//! ```
//!
//! Send from anywhere:
//! ```rust,ignore
//! use mandrill_mailer::{deliver, Message};
//!
//! let mut message = Message::new();
//! message
//!     .from("\"My App\" <noreply@example.com>")
//!     .to("user@example.com")
//!     .subject("Welcome!")
//!     .text("Hello")
//!     .html_with_base(rendered_html, "templates/email")?;
//!
//! let result = deliver(&message).await?;
//! ```
//!
//! ## Per-Call Mailer Override
//!
//! ```rust,ignore
//! use mandrill_mailer::{deliver_with, MandrillMailer};
//!
//! let mailer = MandrillMailer::new("different_api_key");
//! deliver_with(&message, &mailer).await?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `MANDRILL_API_KEY` | Mandrill API key (required) |
//! | `MANDRILL_LOGGER` | `1`, `true`, `yes` or `on` records [`Diagnostics`] for each call |
//! | `MANDRILL_BASE_URL` | API root override (default `https://mandrillapp.com/api/1.0`) |
//!
//! ## Feature Flags
//!
//! - `metrics` - Prometheus-style metrics (counters/histograms)
//!
//! ## Metrics
//!
//! Enable `features = ["metrics"]` to emit:
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `mandrill_emails_total` | Counter | provider, status | Total sends |
//! | `mandrill_delivery_duration_seconds` | Histogram | provider | Send duration |

/// The version of the mandrill-mailer crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod address;
mod attachment;
mod client;
mod diagnostics;
mod embed;
mod error;
mod mailer;
mod message;

use parking_lot::RwLock;
use serde_json::Value;
use std::env;
use std::sync::Arc;
use tracing::Instrument;

#[cfg(feature = "metrics")]
use std::time::Instant;

// Re-exports
pub use address::{Address, ToAddress};
pub use attachment::{infer_content_type, Attachment};
pub use client::MandrillClient;
pub use diagnostics::Diagnostics;
pub use error::{ApiErrorKind, ErrorRegistry, MandrillError};
pub use mailer::{MandrillMailer, Mailer};
pub use message::{HeaderInput, HeaderValue, Message, Recipient, RecipientType};

/// Environment variable holding the API key.
pub const API_KEY_VAR: &str = "MANDRILL_API_KEY";
/// Environment variable enabling diagnostics.
pub const LOGGER_VAR: &str = "MANDRILL_LOGGER";
/// Environment variable overriding the API root.
pub const BASE_URL_VAR: &str = "MANDRILL_BASE_URL";

// ============================================================================
// Configuration
// ============================================================================

/// Settings the host application hands to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MandrillConfig {
    /// API key (must be non-empty)
    pub api_key: String,
    /// Record [`Diagnostics`] for each call
    pub logger: bool,
    /// API root override
    pub base_url: Option<String>,
}

impl MandrillConfig {
    /// Config with diagnostics off and the default API root.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            logger: false,
            base_url: None,
        }
    }

    /// Turn diagnostics on or off.
    pub fn logger(mut self, enabled: bool) -> Self {
        self.logger = enabled;
        self
    }

    /// Read `MANDRILL_API_KEY`, `MANDRILL_LOGGER` and `MANDRILL_BASE_URL`.
    pub fn from_env() -> Result<Self, MandrillError> {
        let api_key = env::var(API_KEY_VAR)
            .map_err(|_| MandrillError::Configuration(format!("{} not set", API_KEY_VAR)))?;

        let config = Self {
            api_key,
            logger: env::var(LOGGER_VAR)
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            base_url: env::var(BASE_URL_VAR).ok().filter(|url| !url.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the API key is usable.
    pub fn validate(&self) -> Result<(), MandrillError> {
        if self.api_key.trim().is_empty() {
            return Err(MandrillError::Configuration(format!(
                "{} must be a non-empty string",
                API_KEY_VAR
            )));
        }
        Ok(())
    }

    /// Build a client from this config.
    pub fn client(&self) -> MandrillClient {
        let mut client = MandrillClient::new(&self.api_key).verbose(self.logger);
        if let Some(ref url) = self.base_url {
            client = client.base_url(url);
        }
        client
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ============================================================================
// Global Mailer
// ============================================================================

/// Global mailer - swappable for testing
static MAILER: RwLock<Option<Arc<dyn Mailer>>> = RwLock::new(None);

/// Get or initialize the global mailer.
fn get_mailer() -> Result<Arc<dyn Mailer>, MandrillError> {
    // Fast path: already configured
    if let Some(ref mailer) = *MAILER.read() {
        return Ok(Arc::clone(mailer));
    }

    let mailer: Arc<dyn Mailer> = Arc::new(MandrillMailer::from_env()?);
    tracing::debug!(provider = mailer.provider_name(), "Configured mailer from environment");

    // Another thread may have configured one meanwhile; keep theirs.
    let mut guard = MAILER.write();
    Ok(Arc::clone(guard.get_or_insert(mailer)))
}

/// Check if a mailer is configured or can be built from the environment.
pub fn is_configured() -> bool {
    if MAILER.read().is_some() {
        return true;
    }
    env::var(API_KEY_VAR)
        .map(|key| !key.trim().is_empty())
        .unwrap_or(false)
}

/// Initialize the global mailer from environment variables.
///
/// ```rust,ignore
/// // In main.rs
/// mandrill_mailer::init().ok(); // Ignore error if email not configured
/// ```
pub fn init() -> Result<(), MandrillError> {
    let mailer = get_mailer()?;
    mailer.validate_config()
}

/// Reject messages that cannot be sent, before any network call.
fn validate(message: &Message) -> Result<(), MandrillError> {
    if message.from_email().is_none() {
        return Err(MandrillError::invalid("Missing required field: from_email"));
    }
    if message.recipients().is_empty() {
        return Err(MandrillError::invalid("Missing required field: to"));
    }
    Ok(())
}

async fn deliver_via(mailer: &dyn Mailer, message: &Message) -> Result<Value, MandrillError> {
    let provider = mailer.provider_name();
    let span = tracing::info_span!(
        "mandrill.deliver",
        provider = provider,
        to = ?message.recipients().iter().map(|r| &r.email).collect::<Vec<_>>(),
        subject = message.subject_line().unwrap_or_default(),
    );

    async move {
        tracing::debug!("Delivering message");

        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let result = mailer.send(message).await;

        #[cfg(feature = "metrics")]
        {
            let duration = start.elapsed().as_secs_f64();
            let status = if result.is_ok() { "success" } else { "error" };
            metrics::counter!("mandrill_emails_total", "provider" => provider, "status" => status)
                .increment(1);
            metrics::histogram!("mandrill_delivery_duration_seconds", "provider" => provider)
                .record(duration);
        }

        match &result {
            Ok(_) => tracing::info!("Message delivered"),
            Err(e) => tracing::error!(error = %e, "Message delivery failed"),
        }

        result
    }
    .instrument(span)
    .await
}

/// Deliver a message using the global mailer.
///
/// Auto-configures from environment variables on first call. Fails with
/// [`MandrillError::InvalidInput`] before any network call when the
/// message has no sender or no recipients.
pub async fn deliver(message: &Message) -> Result<Value, MandrillError> {
    validate(message)?;
    let mailer = get_mailer()?;
    deliver_via(mailer.as_ref(), message).await
}

/// Deliver a message using a specific mailer (per-call override).
///
/// Validates the message like [`deliver`].
pub async fn deliver_with<M: Mailer>(message: &Message, mailer: &M) -> Result<Value, MandrillError> {
    validate(message)?;
    deliver_via(mailer, message).await
}

/// Diagnostics of the global mailer's most recent call.
pub fn last_diagnostics() -> Option<Diagnostics> {
    mailer().and_then(|m| m.diagnostics())
}

// ============================================================================
// Manual Configuration (for testing or custom setups)
// ============================================================================

/// Manually configure the global mailer.
///
/// Later calls replace the previous mailer.
pub fn configure<M: Mailer + 'static>(mailer: M) {
    *MAILER.write() = Some(Arc::new(mailer));
}

/// Configure with an Arc'd mailer.
pub fn configure_arc(mailer: Arc<dyn Mailer>) {
    *MAILER.write() = Some(mailer);
}

/// Reset the global mailer (useful for tests).
///
/// After calling this, the next `deliver()` will re-initialize from env vars.
pub fn reset() {
    *MAILER.write() = None;
}

/// Get the configured mailer (if initialized).
pub fn mailer() -> Option<Arc<dyn Mailer>> {
    MAILER.read().as_ref().cloned()
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        deliver, deliver_with, is_configured, Address, Attachment, Diagnostics, Mailer,
        MandrillError, MandrillMailer, Message, RecipientType, ToAddress,
    };
}
