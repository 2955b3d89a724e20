//! Embedding of local images referenced from an HTML body.
//!
//! References of the form `src="…"`, `background="…"` and `url('…')` that
//! point at relative local files are replaced by `cid:` URIs, and the files
//! are returned as embedded images named after their content-id.

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::attachment::{read_file, Attachment};
use crate::error::MandrillError;

fn prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)(src\s*=\s*|background\s*=\s*|url\()(["'])"#)
            .expect("valid reference pattern")
    })
}

fn scheme_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^[a-z]+:").expect("valid scheme pattern"))
}

/// A quoted local reference found in HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocalReference {
    /// Byte range of the whole match, prefix through closing quote
    pub span: Range<usize>,
    /// `src=`, `background =`, `url(`… exactly as written
    pub prefix: String,
    pub quote: char,
    /// The referenced relative path
    pub target: String,
}

impl LocalReference {
    fn rewritten(&self, cid: &str) -> String {
        format!("{}{}cid:{}{}", self.prefix, self.quote, cid, self.quote)
    }
}

/// Anything with a scheme, an absolute path or an anchor stays untouched.
fn is_local(target: &str) -> bool {
    !target.is_empty()
        && !target.starts_with(['/', '\\', '#'])
        && !scheme_pattern().is_match(target)
}

/// Find every local reference, in document order.
pub(crate) fn find_local_references(html: &str) -> Vec<LocalReference> {
    let mut references = Vec::new();
    let mut pos = 0;

    while let Some(caps) = prefix_pattern().captures_at(html, pos) {
        let (Some(whole), Some(prefix), Some(quote)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            break;
        };
        let quote_char = if quote.as_str() == "'" { '\'' } else { '"' };
        let value_start = whole.end();
        pos = whole.end();

        let rest = &html[value_start..];
        let Some(close) = rest.find(quote_char) else {
            continue;
        };
        let target = &rest[..close];
        if target.contains('\n') || !is_local(target) {
            continue;
        }

        let end = value_start + close + quote_char.len_utf8();
        references.push(LocalReference {
            span: whole.start()..end,
            prefix: prefix.as_str().to_string(),
            quote: quote_char,
            target: target.to_string(),
        });
        pos = end;
    }

    references
}

fn resolve(base: &Path, target: &str) -> PathBuf {
    let base = base.to_string_lossy();
    let trimmed = base.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() && !base.is_empty() {
        // base was the filesystem root
        return PathBuf::from(format!("/{}", target));
    }
    Path::new(trimmed).join(target)
}

fn content_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Rewrite local references in `html` to `cid:` URIs.
///
/// Each distinct file is read once and returned as one embedded image;
/// every reference to it shares the same content-id. Matches are replaced
/// back to front so earlier offsets stay valid. Nothing is returned if any
/// file cannot be read.
pub(crate) fn embed_local_images(
    html: &str,
    base: &Path,
) -> Result<(String, Vec<Attachment>), MandrillError> {
    let references = find_local_references(html);
    let mut rewritten = html.to_string();
    let mut cids: HashMap<PathBuf, String> = HashMap::new();
    let mut images = Vec::new();

    for reference in references.iter().rev() {
        let file = resolve(base, &reference.target);
        let cid = match cids.get(&file) {
            Some(cid) => cid.clone(),
            None => {
                let data = read_file(&file)?;
                let cid = content_id();
                images.push(Attachment::from_bytes(&file, data).name(cid.clone()));
                cids.insert(file, cid.clone());
                cid
            }
        };
        rewritten.replace_range(reference.span.clone(), &reference.rewritten(&cid));
    }

    images.reverse();
    tracing::debug!(
        references = references.len(),
        embedded = images.len(),
        "Embedded local images"
    );

    Ok((rewritten, images))
}
