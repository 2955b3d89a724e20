//! Error types for mandrill-mailer.

use std::collections::HashMap;

use thiserror::Error;

/// Errors that can occur when building or sending a message.
#[derive(Debug, Clone, Error)]
pub enum MandrillError {
    /// Configuration error (missing env var, invalid value, etc.)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network-level failure: connection refused, timeout, broken body.
    #[error("API call to {endpoint} failed: {message}")]
    Transport {
        /// Endpoint path the call was made to (e.g. `/messages/send`)
        endpoint: String,
        /// Underlying transport error text
        message: String,
    },

    /// The response body was not a JSON document.
    #[error("Unable to decode the JSON response from the Mandrill API: {body}")]
    Decode {
        /// Raw response body
        body: String,
    },

    /// Mandrill reported an application-level error.
    #[error("Mandrill error ({name}, code {code}): {message}")]
    Api {
        /// Kind resolved through the [`ErrorRegistry`]
        kind: ApiErrorKind,
        /// Provider error name (e.g. `Invalid_Key`), empty if the payload had none
        name: String,
        /// Provider error code
        code: i64,
        /// Provider error message
        message: String,
        /// HTTP status of the response
        status: u16,
    },

    /// Caller passed a malformed header name/value or recipient data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Attachment or embedded file could not be read.
    #[error("Unable to read file '{0}'")]
    FileNotFound(String),

    /// Request document could not be serialized.
    #[error("JSON error: {0}")]
    Json(String),
}

impl MandrillError {
    /// Create an invalid input error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a transport error for the given endpoint.
    pub fn transport(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// The resolved provider error kind, if this is an API error.
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Self::Api { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MandrillError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Specialized kinds of provider errors.
///
/// Every error name Mandrill reports resolves to one of these through an
/// [`ErrorRegistry`]. Unregistered names resolve to [`ApiErrorKind::Generic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// Any error without a more specific registration
    Generic,
    /// The API key is invalid or revoked
    InvalidKey,
    /// The request parameters failed validation
    Validation,
    /// The account needs payment before the call can succeed
    PaymentRequired,
    /// The referenced subaccount does not exist
    UnknownSubaccount,
    /// The referenced template does not exist
    UnknownTemplate,
    /// The provider is temporarily unavailable
    ServiceUnavailable,
}

/// Lookup table from provider error names to [`ApiErrorKind`].
///
/// Empty by default; extend it with [`ErrorRegistry::register`].
///
/// ```
/// use mandrill_mailer::{ApiErrorKind, ErrorRegistry};
///
/// let mut registry = ErrorRegistry::new();
/// registry.register("Invalid_Key", ApiErrorKind::InvalidKey);
///
/// assert_eq!(registry.resolve("Invalid_Key"), ApiErrorKind::InvalidKey);
/// assert_eq!(registry.resolve("Something_Else"), ApiErrorKind::Generic);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ErrorRegistry {
    kinds: HashMap<String, ApiErrorKind>,
}

impl ErrorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a provider error name to a kind, replacing any earlier mapping.
    pub fn register(&mut self, name: impl Into<String>, kind: ApiErrorKind) -> &mut Self {
        self.kinds.insert(name.into(), kind);
        self
    }

    /// Resolve a provider error name.
    pub fn resolve(&self, name: &str) -> ApiErrorKind {
        self.kinds
            .get(name)
            .copied()
            .unwrap_or(ApiErrorKind::Generic)
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
