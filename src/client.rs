//! Mandrill HTTP API client.
//!
//! # Example
//!
//! ```rust,ignore
//! use mandrill_mailer::{MandrillClient, Message};
//!
//! let client = MandrillClient::new("md-xxxxx").verbose(true);
//!
//! let mut message = Message::new();
//! message.from("shop@example.com").to("customer@example.com").subject("Hi");
//!
//! let result = client.call("/messages/send", &message).await?;
//! println!("{}", client.diagnostics().unwrap().elapsed_millis());
//! ```
//!
//! Every call is a single POST to `{base}{path}.json` with the body
//! `{"message": {...}, "key": "<api key>"}`. There are no retries.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};

use crate::diagnostics::{Diagnostics, TransportTrace};
use crate::error::{ApiErrorKind, ErrorRegistry, MandrillError};
use crate::message::Message;

const MANDRILL_API_URL: &str = "https://mandrillapp.com/api/1.0";
const API_FORMAT: &str = "json";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
// Some provider calls are slow.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

fn default_http_client() -> Client {
    match Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .user_agent(format!("mandrill-mailer/{}", crate::VERSION))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Falling back to default HTTP client without timeouts");
            Client::new()
        }
    }
}

/// Client for the Mandrill HTTP API.
pub struct MandrillClient {
    api_key: String,
    client: Client,
    base_url: String,
    verbose: bool,
    errors: ErrorRegistry,
    last_call: Mutex<Option<Diagnostics>>,
}

impl MandrillClient {
    /// Create a client with the given API key.
    ///
    /// The underlying HTTP client uses a 30 second connect timeout and a
    /// 600 second overall timeout.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_client(api_key, default_http_client())
    }

    /// Create with a custom reqwest client.
    ///
    /// The client's own timeouts and user agent apply.
    pub fn with_client(api_key: impl Into<String>, client: Client) -> Self {
        Self {
            api_key: api_key.into(),
            client,
            base_url: MANDRILL_API_URL.to_string(),
            verbose: false,
            errors: ErrorRegistry::new(),
            last_call: Mutex::new(None),
        }
    }

    /// Set a custom API root (for testing).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Record [`Diagnostics`] for every call.
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Toggle diagnostics on an existing client.
    pub fn set_verbose(&mut self, enabled: bool) {
        self.verbose = enabled;
    }

    /// Whether diagnostics are recorded.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Map a provider error name to a specialized kind.
    pub fn register_error(mut self, name: impl Into<String>, kind: ApiErrorKind) -> Self {
        self.errors.register(name, kind);
        self
    }

    /// The error-name registry, for registering several kinds at once.
    pub fn errors_mut(&mut self) -> &mut ErrorRegistry {
        &mut self.errors
    }

    /// The API key sent with every call.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Diagnostics of the most recent call.
    ///
    /// `None` if verbose mode was never on or no call has been made yet.
    pub fn diagnostics(&self) -> Option<Diagnostics> {
        self.last_call.lock().clone()
    }

    /// Call an API method with a message as the `message` parameter.
    pub async fn call(&self, path: &str, message: &Message) -> Result<Value, MandrillError> {
        let document = message.document()?;
        self.call_document(path, document).await
    }

    /// Call an API method with a pre-built `message` document.
    ///
    /// Returns the parsed JSON response unchanged on success.
    pub async fn call_document(
        &self,
        path: &str,
        document: Map<String, Value>,
    ) -> Result<Value, MandrillError> {
        let url = format!("{}{}.{}", self.base_url, path, API_FORMAT);
        let body = serde_json::to_string(&json!({
            "message": document,
            "key": self.api_key,
        }))?;

        tracing::debug!(endpoint = %path, verbose = self.verbose, "Calling Mandrill API");

        let mut record = self.verbose.then(|| Diagnostics::begin(&url, &body));
        let mut trace = self.verbose.then(TransportTrace::default);

        let request = self
            .client
            .post(&url)
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .body(body)
            .build()
            .map_err(|e| MandrillError::transport(path, e))?;

        if let Some(trace) = trace.as_mut() {
            trace.request(request.method().as_str(), &url, request.headers());
        }

        let start = Instant::now();
        let outcome = self.exchange(request, trace.as_mut()).await;
        let elapsed = start.elapsed();

        if let Some(record) = record.as_mut() {
            record.elapsed = elapsed;
            if let Ok((_, raw)) = &outcome {
                record.response_body = Some(raw.clone());
                record.transport_log = trace.map(TransportTrace::finish);
            }
        }
        if record.is_some() {
            *self.last_call.lock() = record;
        }

        let (status, raw) = outcome.map_err(|e| {
            tracing::debug!(endpoint = %path, error = %e, "Mandrill API call failed");
            MandrillError::transport(path, e)
        })?;

        tracing::debug!(
            endpoint = %path,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Mandrill API responded"
        );

        let result = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Null) | Err(_) => return Err(MandrillError::Decode { body: raw }),
            Ok(value) => value,
        };

        if status.as_u16() / 100 >= 4 {
            return Err(self.cast_error(status, &result));
        }

        Ok(result)
    }

    async fn exchange(
        &self,
        request: reqwest::Request,
        trace: Option<&mut TransportTrace>,
    ) -> Result<(StatusCode, String), reqwest::Error> {
        let response = self.client.execute(request).await?;
        if let Some(trace) = trace {
            trace.response(&response);
        }
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Turn an error payload into a typed error.
    fn cast_error(&self, status: StatusCode, result: &Value) -> MandrillError {
        let name = match result.get("status").and_then(Value::as_str) {
            Some("error") => result
                .get("name")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty()),
            _ => None,
        };

        let Some(name) = name else {
            tracing::warn!(status = status.as_u16(), "Unexpected error payload from Mandrill");
            return MandrillError::Api {
                kind: ApiErrorKind::Generic,
                name: String::new(),
                code: 0,
                message: format!("We received an unexpected error: {}", result),
                status: status.as_u16(),
            };
        };

        let kind = self.errors.resolve(name);
        let message = result
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let code = result.get("code").and_then(Value::as_i64).unwrap_or(0);

        tracing::warn!(
            status = status.as_u16(),
            error_name = %name,
            code = code,
            kind = ?kind,
            "Mandrill API error"
        );

        MandrillError::Api {
            kind,
            name: name.to_string(),
            code,
            message,
            status: status.as_u16(),
        }
    }
}
