//! Email address type with optional display name.

use std::fmt;
use std::sync::OnceLock;

use email_address::EmailAddress;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MandrillError;

/// `Display Name <email>` with at least one space before the bracket.
fn mailbox_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.+) +<(.*)>$").expect("valid mailbox pattern"))
}

/// An email address with an optional display name.
///
/// # Examples
///
/// ```
/// use mandrill_mailer::Address;
///
/// // Bare email
/// let addr: Address = "user@example.com".into();
/// assert_eq!(addr.email, "user@example.com");
/// assert_eq!(addr.name, None);
///
/// // Combined form
/// let addr: Address = "\"Jane Doe\" <jane@example.com>".into();
/// assert_eq!(addr.email, "jane@example.com");
/// assert_eq!(addr.name.as_deref(), Some("Jane Doe"));
///
/// // From tuple (name, email)
/// let addr: Address = ("Alice", "alice@example.com").into();
/// assert_eq!(addr.name.as_deref(), Some("Alice"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Optional display name (e.g., "Alice Smith")
    pub name: Option<String>,
    /// Email address (e.g., "alice@example.com")
    pub email: String,
}

impl Address {
    /// Create a new address with just an email.
    ///
    /// Logs a warning if the email looks obviously invalid. Nothing is
    /// rejected here; use [`Address::validate`] for strict checking.
    pub fn new(email: impl Into<String>) -> Self {
        let email = email.into();

        if !Self::basic_sanity_check(&email) {
            tracing::warn!(
                email = %email,
                "Creating address with potentially invalid email"
            );
        }

        Self { name: None, email }
    }

    /// Create a new address with a name and email.
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        let name = name.into();
        let mut address = Self::new(email);
        if !name.is_empty() {
            address.name = Some(name);
        }
        address
    }

    /// Parse either a bare email or the combined `Name <email>` form.
    ///
    /// Surrounding double quotes on the display name are removed. The
    /// bracketed part is taken as-is, without validation.
    ///
    /// ```
    /// use mandrill_mailer::Address;
    ///
    /// let addr = Address::parse_mailbox("John Doe <doe@example.com>");
    /// assert_eq!(addr.email, "doe@example.com");
    /// assert_eq!(addr.name.as_deref(), Some("John Doe"));
    ///
    /// // No space before the bracket: not the combined form
    /// let addr = Address::parse_mailbox("John<doe@example.com>");
    /// assert_eq!(addr.email, "John<doe@example.com>");
    /// assert_eq!(addr.name, None);
    /// ```
    pub fn parse_mailbox(input: &str) -> Self {
        match mailbox_pattern().captures(input) {
            Some(caps) => {
                let name = unquote(&caps[1]);
                Self::with_name(name, &caps[2])
            }
            None => Self::new(input),
        }
    }

    /// Validate an email address (RFC 5321/5322 via `email_address`).
    ///
    /// ```
    /// use mandrill_mailer::Address;
    ///
    /// assert!(Address::validate("user@example.com").is_ok());
    /// assert!(Address::validate("not-an-email").is_err());
    /// ```
    pub fn validate(email: &str) -> Result<(), MandrillError> {
        if !EmailAddress::is_valid(email) {
            return Err(MandrillError::invalid(format!(
                "'{}' is not a valid email address",
                email
            )));
        }
        Ok(())
    }

    /// Basic sanity check: non-empty and contains @.
    fn basic_sanity_check(email: &str) -> bool {
        !email.is_empty() && email.contains('@')
    }

    /// The display name, or the email when there is none.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }

    /// Format as "Name <email>" or just "email" if no name.
    pub fn formatted(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

fn unquote(name: &str) -> String {
    let name = name.trim_end();
    match name
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => name.to_string(),
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

impl From<&str> for Address {
    fn from(input: &str) -> Self {
        Address::parse_mailbox(input)
    }
}

impl From<String> for Address {
    fn from(input: String) -> Self {
        Address::parse_mailbox(&input)
    }
}

impl From<(&str, &str)> for Address {
    fn from(pair: (&str, &str)) -> Self {
        pair.to_address()
    }
}

impl From<(String, String)> for Address {
    fn from(pair: (String, String)) -> Self {
        pair.to_address()
    }
}

/// Trait for types that can be converted to an email address.
///
/// Implement this for your own types (users, contacts) to pass them
/// straight to [`Message::to`](crate::Message::to) and friends.
///
/// ```
/// use mandrill_mailer::{Address, Message, ToAddress};
///
/// struct User {
///     name: String,
///     email: String,
/// }
///
/// impl ToAddress for User {
///     fn to_address(&self) -> Address {
///         Address::with_name(&self.name, &self.email)
///     }
/// }
///
/// let user = User { name: "Alice".into(), email: "alice@example.com".into() };
/// let mut message = Message::new();
/// message.to(&user);
/// assert_eq!(message.recipients()[0].name, "Alice");
/// ```
pub trait ToAddress {
    /// Convert to an Address.
    fn to_address(&self) -> Address;
}

impl<T: ToAddress + ?Sized> ToAddress for &T {
    fn to_address(&self) -> Address {
        (*self).to_address()
    }
}

impl ToAddress for Address {
    fn to_address(&self) -> Address {
        self.clone()
    }
}

impl ToAddress for str {
    fn to_address(&self) -> Address {
        Address::parse_mailbox(self)
    }
}

impl ToAddress for String {
    fn to_address(&self) -> Address {
        Address::parse_mailbox(self)
    }
}

// An empty name falls back to parsing the email string.
impl<N: AsRef<str>, E: AsRef<str>> ToAddress for (N, E) {
    fn to_address(&self) -> Address {
        let name = self.0.as_ref();
        if name.is_empty() {
            Address::parse_mailbox(self.1.as_ref())
        } else {
            Address::with_name(name, self.1.as_ref())
        }
    }
}
