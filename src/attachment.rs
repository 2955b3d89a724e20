//! Message attachments and embedded images.

use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::MandrillError;

/// Magic-number prefixes checked before falling back to the file name.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
];

/// An attachment as Mandrill expects it: `{type, name, content}`.
///
/// `content` holds the base64 encoding of exactly the bytes supplied.
/// The same shape is used for embedded images, where `name` is the
/// content-id referenced from the HTML as `cid:<name>`.
///
/// # Examples
///
/// ```
/// use mandrill_mailer::Attachment;
///
/// let attachment = Attachment::from_bytes("report.pdf", b"PDF content");
/// assert_eq!(attachment.name, "report.pdf");
/// assert_eq!(attachment.content_type, "application/pdf");
/// assert_eq!(attachment.decoded().unwrap(), b"PDF content");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// MIME content type (e.g., "application/pdf", "image/png")
    #[serde(rename = "type")]
    pub content_type: String,
    /// Display name, or the content-id for embedded images
    pub name: String,
    /// Base64-encoded data
    pub content: String,
}

impl Attachment {
    /// Create an attachment from raw bytes.
    ///
    /// `name` may be a path; only its base name is kept. The content type
    /// is inferred from the data, then from the name.
    pub fn from_bytes(name: impl AsRef<Path>, data: impl AsRef<[u8]>) -> Self {
        let name = base_name(name.as_ref());
        let data = data.as_ref();
        Self {
            content_type: infer_content_type(&name, data),
            name,
            content: base64::engine::general_purpose::STANDARD.encode(data),
        }
    }

    /// Create an attachment by reading a local file.
    ///
    /// Any read failure (missing file, permissions, directory) is reported
    /// as [`MandrillError::FileNotFound`]. The file is closed before this
    /// returns.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MandrillError> {
        let path = path.as_ref();
        let data = read_file(path)?;
        Ok(Self::from_bytes(path, data))
    }

    /// Set the content type explicitly.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Rename the attachment (used for content-ids of embedded images).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Decode the base64 content back into bytes.
    pub fn decoded(&self) -> Result<Vec<u8>, MandrillError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.content)
            .map_err(|e| MandrillError::invalid(format!("attachment '{}': {}", self.name, e)))
    }
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, MandrillError> {
    std::fs::read(path).map_err(|e| {
        tracing::debug!(path = %path.display(), error = %e, "Unable to read file");
        MandrillError::FileNotFound(path.display().to_string())
    })
}

/// The final path component, lossily converted to UTF-8.
fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Guess a MIME type: content signature, then file extension, then
/// `text/plain` for UTF-8 text, else `application/octet-stream`.
pub fn infer_content_type(name: &str, data: &[u8]) -> String {
    if let Some((_, mime)) = SIGNATURES.iter().find(|(magic, _)| data.starts_with(magic)) {
        return (*mime).to_string();
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return "image/webp".to_string();
    }

    if let Some(mime) = mime_guess::from_path(name).first() {
        return mime.to_string();
    }

    if !data.is_empty() && std::str::from_utf8(data).is_ok() {
        "text/plain".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}
