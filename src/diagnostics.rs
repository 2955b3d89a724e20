//! Diagnostic record of the most recent API call.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Request, response and timing captured for one API call.
///
/// Only recorded when the client runs with verbose logging enabled. Each
/// call replaces the previous record, so with overlapping calls on one
/// client the record may belong to any of them.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    /// Full URL the request was posted to
    pub target_url: String,
    /// Serialized JSON request body (includes the API key)
    pub request_body: String,
    /// Raw response body, if one was received
    pub response_body: Option<String>,
    /// Wall-clock time from sending to the end of the body read
    pub elapsed: Duration,
    /// Textual trace of the HTTP exchange, if a response arrived
    pub transport_log: Option<String>,
    /// When the call started
    pub recorded_at: DateTime<Utc>,
}

impl Diagnostics {
    pub(crate) fn begin(target_url: impl Into<String>, request_body: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            request_body: request_body.into(),
            response_body: None,
            elapsed: Duration::ZERO,
            transport_log: None,
            recorded_at: Utc::now(),
        }
    }

    /// Elapsed time as milliseconds with two decimals, e.g. `"12.34ms"`.
    pub fn elapsed_millis(&self) -> String {
        format!("{:.2}ms", self.elapsed.as_secs_f64() * 1000.0)
    }
}

/// Incremental builder for the `transport_log` trace.
#[derive(Debug, Default)]
pub(crate) struct TransportTrace {
    lines: Vec<String>,
}

impl TransportTrace {
    pub(crate) fn request(&mut self, method: &str, url: &str, headers: &reqwest::header::HeaderMap) {
        self.lines.push(format!("> {} {}", method, url));
        push_headers(&mut self.lines, '>', headers);
    }

    pub(crate) fn response(&mut self, response: &reqwest::Response) {
        self.lines
            .push(format!("< {:?} {}", response.version(), response.status()));
        push_headers(&mut self.lines, '<', response.headers());
    }

    pub(crate) fn finish(self) -> String {
        self.lines.join("\n")
    }
}

fn push_headers(lines: &mut Vec<String>, marker: char, headers: &reqwest::header::HeaderMap) {
    for (name, value) in headers {
        lines.push(format!(
            "{} {}: {}",
            marker,
            name,
            value.to_str().unwrap_or("<binary>")
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_millis_two_decimals() {
        let mut record = Diagnostics::begin("https://x/messages/send.json", "{}");
        record.elapsed = Duration::from_micros(1_500);
        assert_eq!(record.elapsed_millis(), "1.50ms");

        record.elapsed = Duration::ZERO;
        assert_eq!(record.elapsed_millis(), "0.00ms");
    }

    #[test]
    fn test_trace_request_lines() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let mut trace = TransportTrace::default();
        trace.request("POST", "https://x/y.json", &headers);
        assert_eq!(
            trace.finish(),
            "> POST https://x/y.json\n> content-type: application/json"
        );
    }
}
