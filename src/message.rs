//! Outbound message document with a mutating builder.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::address::{Address, ToAddress};
use crate::attachment::Attachment;
use crate::embed::embed_local_images;
use crate::error::MandrillError;

fn line_breaks() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[\r\n]+").expect("valid line break pattern"))
}

/// Top-level keys backed by typed fields of [`Message`].
const MODELED_FIELDS: &[&str] = &[
    "html",
    "text",
    "subject",
    "from_email",
    "from_name",
    "to",
    "bcc_address",
    "headers",
    "important",
    "track_opens",
    "track_clicks",
    "preserve_recipients",
    "async",
    "tags",
    "attachments",
    "images",
];

/// How a recipient receives the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientType {
    #[default]
    To,
    Cc,
    Bcc,
}

/// One entry of the `to` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    /// Display name; the email itself when none was given
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: RecipientType,
}

/// A stored header value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    /// Single-line text
    Text(String),
    /// email → display name pairs
    Mailboxes(BTreeMap<String, Option<String>>),
}

/// Input accepted by [`Message::header`].
///
/// Empty strings, `None` and empty mailbox lists all become
/// [`HeaderInput::Clear`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderInput {
    Clear,
    Text(String),
    Mailboxes(Vec<(String, Option<String>)>),
}

impl HeaderInput {
    /// Build a mailbox list from `(email, name)` pairs.
    pub fn mailboxes<I, E, N>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (E, Option<N>)>,
        E: Into<String>,
        N: Into<String>,
    {
        let pairs: Vec<_> = pairs
            .into_iter()
            .map(|(email, name)| (email.into(), name.map(Into::into)))
            .collect();
        if pairs.is_empty() {
            Self::Clear
        } else {
            Self::Mailboxes(pairs)
        }
    }
}

impl From<&str> for HeaderInput {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Self::Clear
        } else {
            Self::Text(value.to_string())
        }
    }
}

impl From<String> for HeaderInput {
    fn from(value: String) -> Self {
        if value.is_empty() {
            Self::Clear
        } else {
            Self::Text(value)
        }
    }
}

impl<T: Into<HeaderInput>> From<Option<T>> for HeaderInput {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Clear, Into::into)
    }
}

impl<E: Into<String>, N: Into<String>> From<Vec<(E, N)>> for HeaderInput {
    fn from(pairs: Vec<(E, N)>) -> Self {
        Self::mailboxes(pairs.into_iter().map(|(email, name)| (email, Some(name))))
    }
}

impl From<BTreeMap<String, String>> for HeaderInput {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self::mailboxes(map.into_iter().map(|(email, name)| (email, Some(name))))
    }
}

/// One outbound email, accumulated field by field.
///
/// Scalar fields are overwritten by repeated calls; recipients,
/// attachments, embedded images and tags append; headers merge only when
/// appended as mailbox lists. Fallible operations leave the message
/// untouched when they fail.
///
/// ```
/// use mandrill_mailer::Message;
///
/// let mut message = Message::new();
/// message
///     .from("\"Shop\" <shop@example.com>")
///     .to("customer@example.com")
///     .cc(("Support", "support@example.com"))
///     .subject("Your order")
///     .text("Thanks for ordering!")
///     .tag("orders")
///     .track_opens(true);
///
/// let doc = message.document().unwrap();
/// assert_eq!(doc["from_name"], "Shop");
/// assert_eq!(doc["to"][1]["type"], "cc");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    to: Vec<Recipient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bcc_address: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, HeaderValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    important: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    track_opens: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    track_clicks: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preserve_recipients: Option<bool>,
    #[serde(rename = "async", skip_serializing_if = "Option::is_none")]
    send_async: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<Attachment>,
    /// Unmodeled keys, plus modeled keys whose value did not fit the typed field.
    #[serde(skip)]
    params: Map<String, Value>,
}

impl Message {
    /// Create a new empty message.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    /// Set the plain text body.
    pub fn text(&mut self, body: impl Into<String>) -> &mut Self {
        self.text = Some(body.into());
        self.claim("text");
        self
    }

    /// Set the HTML body, embedding local images relative to the current
    /// directory.
    ///
    /// See [`Message::html_with_base`].
    pub fn html(&mut self, html: impl Into<String>) -> Result<&mut Self, MandrillError> {
        self.html_with_base(html, ".")
    }

    /// Set the HTML body, embedding local images relative to `base_path`.
    ///
    /// Every quoted `src=`, `background=` or `url(` reference that is not
    /// absolute, not a URL and not an anchor is read from disk, added as an
    /// embedded image and rewritten to `cid:<content-id>`. A file referenced
    /// several times is embedded once.
    ///
    /// Fails with [`MandrillError::FileNotFound`] if a referenced file cannot
    /// be read.
    pub fn html_with_base(
        &mut self,
        html: impl Into<String>,
        base_path: impl AsRef<Path>,
    ) -> Result<&mut Self, MandrillError> {
        let html = html.into();
        let (html, images) = embed_local_images(&html, base_path.as_ref())?;
        self.html = Some(html);
        self.images.extend(images);
        self.claim("html");
        self.claim("images");
        Ok(self)
    }

    /// Set the HTML body as-is, without looking for local images.
    pub fn raw_html(&mut self, html: impl Into<String>) -> &mut Self {
        self.html = Some(html.into());
        self.claim("html");
        self
    }

    /// Set the subject line.
    pub fn subject(&mut self, subject: impl Into<String>) -> &mut Self {
        self.subject = Some(subject.into());
        self.claim("subject");
        self
    }

    // ------------------------------------------------------------------
    // Addresses
    // ------------------------------------------------------------------

    /// Set the sender.
    ///
    /// Accepts `"email"`, `"Name <email>"`, `"\"Name\" <email>"` or a
    /// `(name, email)` tuple. Without a display name the email is used as
    /// `from_name`.
    pub fn from(&mut self, addr: impl ToAddress) -> &mut Self {
        let addr = addr.to_address();
        self.from_name = Some(addr.display_name().to_string());
        self.from_email = Some(addr.email);
        self.claim("from_email");
        self.claim("from_name");
        self
    }

    /// Set the `Reply-To` header.
    ///
    /// Only the email part is stored; a display name is dropped.
    pub fn reply_to(&mut self, addr: impl ToAddress) -> &mut Self {
        let Address { email, .. } = addr.to_address();
        if !email.is_empty() {
            self.store_text_header("Reply-To", &email);
        }
        self
    }

    /// Add a recipient with an explicit type.
    pub fn recipient(&mut self, addr: impl ToAddress, kind: RecipientType) -> &mut Self {
        let addr = addr.to_address();
        self.claim("to");
        self.to.push(Recipient {
            name: addr.display_name().to_string(),
            email: addr.email,
            kind,
        });
        self
    }

    /// Add a `to` recipient.
    pub fn to(&mut self, addr: impl ToAddress) -> &mut Self {
        self.recipient(addr, RecipientType::To)
    }

    /// Add a `cc` recipient.
    pub fn cc(&mut self, addr: impl ToAddress) -> &mut Self {
        self.recipient(addr, RecipientType::Cc)
    }

    /// Add a `bcc` recipient and set `bcc_address` to its email.
    ///
    /// `bcc_address` holds a single address; the last call wins.
    pub fn bcc(&mut self, addr: impl ToAddress) -> &mut Self {
        let addr = addr.to_address();
        self.bcc_address = Some(addr.email.clone());
        self.claim("bcc_address");
        self.recipient(addr, RecipientType::Bcc)
    }

    // ------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------

    /// Attach caller-supplied content.
    ///
    /// `name` may be a path; only its base name is used. The content type
    /// is inferred when not given.
    pub fn attach(
        &mut self,
        name: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
        content_type: Option<&str>,
    ) -> &Attachment {
        let mut attachment = Attachment::from_bytes(name, content);
        if let Some(content_type) = content_type {
            attachment = attachment.content_type(content_type);
        }
        self.push_attachment(attachment)
    }

    /// Attach a local file.
    ///
    /// Fails with [`MandrillError::FileNotFound`] if the file cannot be
    /// read; existing attachments are left as they were.
    pub fn attach_file(
        &mut self,
        path: impl AsRef<Path>,
        content_type: Option<&str>,
    ) -> Result<&Attachment, MandrillError> {
        let mut attachment = Attachment::from_path(path)?;
        if let Some(content_type) = content_type {
            attachment = attachment.content_type(content_type);
        }
        Ok(self.push_attachment(attachment))
    }

    fn push_attachment(&mut self, attachment: Attachment) -> &Attachment {
        self.claim("attachments");
        self.attachments.push(attachment);
        &self.attachments[self.attachments.len() - 1]
    }

    // ------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------

    /// Add a tag.
    pub fn tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.claim("tags");
        self.tags.push(tag.into());
        self
    }

    /// Turn open tracking on or off.
    pub fn track_opens(&mut self, value: bool) -> &mut Self {
        self.track_opens = Some(value);
        self.claim("track_opens");
        self
    }

    /// Turn click tracking on or off.
    pub fn track_clicks(&mut self, value: bool) -> &mut Self {
        self.track_clicks = Some(value);
        self.claim("track_clicks");
        self
    }

    /// Mark the message as important.
    pub fn important(&mut self, value: bool) -> &mut Self {
        self.important = Some(value);
        self.claim("important");
        self
    }

    /// Whether every recipient sees all others in the `To` header.
    pub fn preserve_recipients(&mut self, value: bool) -> &mut Self {
        self.preserve_recipients = Some(value);
        self.claim("preserve_recipients");
        self
    }

    /// Enable background (bulk-optimized) sending.
    ///
    /// In async mode the API returns `queued` for every recipient.
    pub fn send_async(&mut self, value: bool) -> &mut Self {
        self.send_async = Some(value);
        self.claim("async");
        self
    }

    /// Set any top-level API parameter.
    ///
    /// The last write to a key wins, whether it came from `param` or from a
    /// typed setter. A modeled key (`subject`, `to`, `headers`, ...) whose
    /// value fits the typed field updates that field, so later typed calls
    /// overwrite or append to it. A value that does not fit resets the typed
    /// field and is sent as-is until a typed setter for the same key
    /// replaces it.
    ///
    /// ```
    /// use mandrill_mailer::Message;
    /// use serde_json::json;
    ///
    /// let mut message = Message::new();
    /// message
    ///     .param("metadata", json!({"order_id": 42}))
    ///     .param("subaccount", "shop");
    /// assert_eq!(message.document().unwrap()["metadata"]["order_id"], 42);
    /// ```
    pub fn param(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let name = name.into();
        let value = value.into();

        if MODELED_FIELDS.contains(&name.as_str()) {
            match self.with_field(&name, Some(value.clone())) {
                Ok(updated) => {
                    self.replace_fields(updated);
                    self.claim(&name);
                    return self;
                }
                Err(e) => {
                    tracing::debug!(param = %name, error = %e, "Parameter does not fit typed field, sending raw");
                    if let Ok(cleared) = self.with_field(&name, None) {
                        self.replace_fields(cleared);
                    }
                }
            }
        }

        self.params.insert(name, value);
        self
    }

    /// A copy of the typed fields with one top-level key replaced, or reset
    /// to its default when `value` is `None`.
    fn with_field(&self, name: &str, value: Option<Value>) -> Result<Self, serde_json::Error> {
        let mut fields = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        match value {
            Some(value) => fields.insert(name.to_string(), value),
            None => fields.remove(name),
        };
        serde_json::from_value(Value::Object(fields))
    }

    fn replace_fields(&mut self, updated: Self) {
        let params = std::mem::take(&mut self.params);
        *self = Self { params, ..updated };
    }

    /// Drop a raw parameter superseded by a typed write.
    fn claim(&mut self, name: &str) {
        self.params.remove(name);
    }

    // ------------------------------------------------------------------
    // Headers
    // ------------------------------------------------------------------

    /// Set a header, replacing any previous value.
    ///
    /// An empty value removes the header.
    pub fn header(
        &mut self,
        name: &str,
        value: impl Into<HeaderInput>,
    ) -> Result<&mut Self, MandrillError> {
        self.apply_header(name, value.into(), false)
    }

    /// Set a header in append mode.
    ///
    /// Mailbox lists merge into an existing mailbox list. An empty value
    /// leaves the header alone. Text values still replace.
    pub fn header_append(
        &mut self,
        name: &str,
        value: impl Into<HeaderInput>,
    ) -> Result<&mut Self, MandrillError> {
        self.apply_header(name, value.into(), true)
    }

    /// Set a header from raw bytes, which must be valid UTF-8.
    pub fn header_bytes(
        &mut self,
        name: &str,
        value: &[u8],
        append: bool,
    ) -> Result<&mut Self, MandrillError> {
        let value = std::str::from_utf8(value)
            .map_err(|_| MandrillError::invalid("Header is not valid UTF-8 string."))?;
        self.apply_header(name, HeaderInput::from(value), append)
    }

    fn apply_header(
        &mut self,
        name: &str,
        value: HeaderInput,
        append: bool,
    ) -> Result<&mut Self, MandrillError> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(MandrillError::invalid(format!(
                "Header name must be non-empty alphanumeric string, '{}' given.",
                name
            )));
        }

        match value {
            HeaderInput::Clear => {
                if !append {
                    self.headers.remove(name);
                    self.claim("headers");
                }
            }
            HeaderInput::Mailboxes(pairs) => {
                for (email, display) in &pairs {
                    if display
                        .as_deref()
                        .is_some_and(|d| d.contains(['\r', '\n']))
                    {
                        return Err(MandrillError::invalid(
                            "Name must not contain line separator.",
                        ));
                    }
                    Address::validate(email).map_err(|_| {
                        MandrillError::invalid(format!(
                            "Header '{}' expects a valid email, '{}' given.",
                            name, email
                        ))
                    })?;
                }

                let slot = self
                    .headers
                    .entry(name.to_string())
                    .or_insert_with(|| HeaderValue::Mailboxes(BTreeMap::new()));
                match slot {
                    HeaderValue::Mailboxes(existing) if append => existing.extend(pairs),
                    _ => *slot = HeaderValue::Mailboxes(pairs.into_iter().collect()),
                }
                self.claim("headers");
            }
            HeaderInput::Text(text) => self.store_text_header(name, &text),
        }

        Ok(self)
    }

    fn store_text_header(&mut self, name: &str, value: &str) {
        let value = line_breaks().replace_all(value, " ").into_owned();
        self.headers
            .insert(name.to_string(), HeaderValue::Text(value));
        self.claim("headers");
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Snapshot of the request document, with extra parameters applied.
    pub fn document(&self) -> Result<Map<String, Value>, MandrillError> {
        let mut document = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (name, value) in &self.params {
            document.insert(name.clone(), value.clone());
        }
        Ok(document)
    }

    /// Sender address.
    pub fn from_email(&self) -> Option<&str> {
        self.from_email.as_deref()
    }

    /// Sender display name.
    pub fn from_name(&self) -> Option<&str> {
        self.from_name.as_deref()
    }

    /// Subject line, if set.
    pub fn subject_line(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Plain text body, if set.
    pub fn text_body(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// HTML body as it will be sent, with `cid:` references rewritten.
    pub fn html_body(&self) -> Option<&str> {
        self.html.as_deref()
    }

    /// All recipients in call order, whatever their type.
    pub fn recipients(&self) -> &[Recipient] {
        &self.to
    }

    /// The single `bcc_address` value (last `bcc` call wins).
    pub fn bcc_address(&self) -> Option<&str> {
        self.bcc_address.as_deref()
    }

    /// Custom headers by name.
    pub fn headers(&self) -> &BTreeMap<String, HeaderValue> {
        &self.headers
    }

    /// Regular attachments in call order.
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Embedded images, named by content-id.
    pub fn images(&self) -> &[Attachment] {
        &self.images
    }

    /// Tags in call order.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Raw parameters not absorbed by a typed field.
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }
}
