//! Input sanitization for untrusted request data.
//!
//! Every sink the transport can reach gets a dedicated entry point here:
//! HTML output, attribute values, URLs, filesystem paths, JSON bodies,
//! numeric fields, and log payloads. Functions are pure validation and
//! transformation; the only failure channel is [`ValidationError`].

use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Replacement written over sensitive values during log redaction.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Marker returned when a payload cannot be cloned for redaction.
pub const REDACTION_FAILURE_MARKER: &str = "[REDACTION FAILED]";

/// Protocols accepted by [`sanitize_url`] when no allow-list is given.
pub const DEFAULT_ALLOWED_PROTOCOLS: &[&str] = &["http", "https"];

/// Field-name fragments treated as sensitive by log redaction.
///
/// Matching is case-insensitive substring, so `password` also covers
/// `userPassword` and `PASSWORD_HASH`. Override via [`RedactionConfig`].
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "apikey",
    "api-key",
    "api_key",
    "authorization",
    "credential",
    "cookie",
    "session",
];

/// Error type for sanitization failures
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no safe transformation exists for the '{0}' sink")]
    DisallowedContext(&'static str),

    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    #[error("URL protocol '{0}' is not in the allow-list")]
    DisallowedProtocol(String),

    #[error("path escapes the configured root directory: {0}")]
    PathEscapesRoot(String),

    #[error("JSON input too large: {size} bytes exceeds limit of {max}")]
    JsonTooLarge { size: usize, max: usize },

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("invalid number: {0}")]
    InvalidNumber(String),
}

/// The output sink a string is being sanitized for.
///
/// Closed set on purpose: call sites must name their sink, and the
/// `Javascript` variant exists only to be rejected. A value can never be
/// made safe for a code-execution sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeContext {
    /// Plain text: markup and control characters are stripped.
    Text,
    /// HTML element content: entity-escaped.
    Html,
    /// HTML attribute value: entity-escaped including quotes.
    Attribute,
    /// URL: validated against the default protocol allow-list.
    Url,
    /// Code-execution sink: always rejected.
    Javascript,
}

/// Sanitize a string for the named sink.
pub fn sanitize_string(input: &str, context: SanitizeContext) -> Result<String, ValidationError> {
    match context {
        SanitizeContext::Text => Ok(strip_control(&strip_markup(input))),
        SanitizeContext::Html => Ok(escape_html(input)),
        SanitizeContext::Attribute => Ok(escape_html(input)),
        SanitizeContext::Url => sanitize_url(input, DEFAULT_ALLOWED_PROTOCOLS),
        SanitizeContext::Javascript => Err(ValidationError::DisallowedContext("javascript")),
    }
}

/// Tag/attribute allow-lists for [`sanitize_html`].
#[derive(Debug, Clone)]
pub struct HtmlSanitizeConfig {
    pub allowed_tags: Vec<String>,
    pub allowed_attributes: Vec<String>,
}

impl Default for HtmlSanitizeConfig {
    fn default() -> Self {
        Self {
            allowed_tags: ["p", "br", "b", "i", "em", "strong", "a", "code", "pre", "ul", "ol", "li"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            allowed_attributes: ["href", "title"].iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Strip disallowed tags and attributes from an HTML fragment.
///
/// Disallowed tags are removed while their text content is kept. Allowed
/// tags are re-emitted with only allow-listed attributes; attribute values
/// carrying a `javascript:` scheme are dropped. Empty input yields an
/// empty string.
pub fn sanitize_html(input: &str, config: &HtmlSanitizeConfig) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('<') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match tail.find('>') {
            Some(end) => {
                if let Some(rendered) = render_tag(&tail[1..end], config) {
                    out.push_str(&rendered);
                }
                rest = &tail[end + 1..];
            }
            None => {
                // Unterminated tag: escape the bracket and keep scanning.
                out.push_str("&lt;");
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Re-emit a single tag if allowed, filtering its attributes.
fn render_tag(raw: &str, config: &HtmlSanitizeConfig) -> Option<String> {
    let trimmed = raw.trim();
    let (closing, body) = match trimmed.strip_prefix('/') {
        Some(rest) => (true, rest.trim()),
        None => (false, trimmed),
    };
    let self_closing = body.ends_with('/');
    let body = body.trim_end_matches('/').trim();

    let mut parts = body.split_whitespace();
    let name = parts.next()?.to_ascii_lowercase();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    if !config.allowed_tags.iter().any(|t| t.eq_ignore_ascii_case(&name)) {
        return None;
    }
    if closing {
        return Some(format!("</{name}>"));
    }

    let mut rendered = format!("<{name}");
    for attr in parts {
        let (attr_name, attr_value) = match attr.split_once('=') {
            Some((n, v)) => (n.to_ascii_lowercase(), Some(v.trim_matches(&['"', '\''][..]))),
            None => (attr.to_ascii_lowercase(), None),
        };
        if !config
            .allowed_attributes
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&attr_name))
        {
            continue;
        }
        match attr_value {
            Some(value) => {
                if value.trim().to_ascii_lowercase().starts_with("javascript:") {
                    continue;
                }
                rendered.push_str(&format!(" {}=\"{}\"", attr_name, escape_html(value)));
            }
            None => {
                rendered.push(' ');
                rendered.push_str(&attr_name);
            }
        }
    }
    if self_closing {
        rendered.push_str(" /");
    }
    rendered.push('>');
    Some(rendered)
}

/// Validate a URL against a protocol allow-list.
///
/// Returns the trimmed, normalized form produced by the `url` crate.
pub fn sanitize_url(input: &str, allowed_protocols: &[&str]) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    let url = Url::parse(trimmed).map_err(|e| ValidationError::MalformedUrl(e.to_string()))?;
    if !allowed_protocols
        .iter()
        .any(|p| url.scheme().eq_ignore_ascii_case(p))
    {
        return Err(ValidationError::DisallowedProtocol(url.scheme().to_string()));
    }
    Ok(url.to_string())
}

/// Options for [`sanitize_path`].
#[derive(Debug, Clone, Default)]
pub struct PathSanitizeOptions {
    /// When set, the sanitized path must resolve inside this directory.
    pub root_dir: Option<PathBuf>,
    /// Emit `/` separators regardless of platform.
    pub to_posix: bool,
    /// Keep absolute inputs absolute instead of coercing them to relative.
    pub allow_absolute: bool,
}

/// Audit record produced by [`sanitize_path`].
#[derive(Debug, Clone)]
pub struct SanitizedPathInfo {
    pub sanitized: String,
    pub original: String,
    pub was_absolute: bool,
    pub coerced_to_relative: bool,
    pub options: PathSanitizeOptions,
}

/// Normalize separators, resolve `..` traversal, and contain the result.
///
/// Absolute inputs are coerced to relative unless `allow_absolute` is set,
/// and the conversion is recorded on the returned audit record. With a
/// `root_dir`, any traversal that would climb out of it fails; without
/// one, leading `..` segments are clamped at the top of the path.
pub fn sanitize_path(
    input: &str,
    options: &PathSanitizeOptions,
) -> Result<SanitizedPathInfo, ValidationError> {
    let normalized = input.replace('\\', "/");
    let (was_absolute, body) = split_absolute_prefix(&normalized);
    let keep_absolute = was_absolute && options.allow_absolute;
    let coerced_to_relative = was_absolute && !options.allow_absolute;

    let mut stack: Vec<&str> = Vec::new();
    for segment in body.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() && (options.root_dir.is_some() || keep_absolute) {
                    return Err(ValidationError::PathEscapesRoot(input.to_string()));
                }
            }
            segment => stack.push(segment),
        }
    }

    let separator = if options.to_posix {
        "/"
    } else {
        std::path::MAIN_SEPARATOR_STR
    };
    let mut sanitized = String::new();
    if keep_absolute {
        sanitized.push_str(separator);
    }
    sanitized.push_str(&stack.join(separator));

    if let Some(root) = &options.root_dir {
        let resolved = if keep_absolute {
            PathBuf::from(&sanitized)
        } else {
            root.join(&sanitized)
        };
        if !resolved.starts_with(root) {
            return Err(ValidationError::PathEscapesRoot(input.to_string()));
        }
    }

    Ok(SanitizedPathInfo {
        sanitized,
        original: input.to_string(),
        was_absolute,
        coerced_to_relative,
        options: options.clone(),
    })
}

/// Split a leading `/` or drive prefix (`C:`) off a normalized path.
fn split_absolute_prefix(path: &str) -> (bool, &str) {
    if let Some(rest) = path.strip_prefix('/') {
        return (true, rest);
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        let rest = &path[2..];
        return (true, rest.strip_prefix('/').unwrap_or(rest));
    }
    (false, path)
}

/// Parse a JSON string with an optional byte-size cap.
pub fn sanitize_json<T: DeserializeOwned>(
    input: &str,
    max_size: Option<usize>,
) -> Result<T, ValidationError> {
    if let Some(max) = max_size {
        let size = input.len();
        if size > max {
            return Err(ValidationError::JsonTooLarge { size, max });
        }
    }
    Ok(serde_json::from_str(input)?)
}

/// Coerce a numeric string, rejecting NaN/infinity and clamping to bounds.
pub fn sanitize_number(
    input: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64, ValidationError> {
    let value: f64 = input
        .trim()
        .parse()
        .map_err(|_| ValidationError::InvalidNumber(input.to_string()))?;
    if !value.is_finite() {
        return Err(ValidationError::InvalidNumber(input.to_string()));
    }
    let value = match min {
        Some(lo) => value.max(lo),
        None => value,
    };
    let value = match max {
        Some(hi) => value.min(hi),
        None => value,
    };
    Ok(value)
}

/// Sensitive-field configuration for log redaction.
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    pub sensitive_fields: Vec<String>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl RedactionConfig {
    fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.sensitive_fields
            .iter()
            .any(|fragment| key.contains(&fragment.to_ascii_lowercase()))
    }
}

/// Clone a payload for logging, redacting sensitive fields at every depth.
///
/// The clone primitive is `serde_json::to_value`: anything with a
/// `Serialize` impl is supported (maps become objects, dates whatever
/// their impl emits), and cyclic structures are unrepresentable in
/// [`Value`]. The source value is never modified. Serialization failure
/// degrades to the fixed [`REDACTION_FAILURE_MARKER`] rather than erroring
/// out of a logging path.
pub fn sanitize_for_logging<T: Serialize>(input: &T) -> Value {
    sanitize_for_logging_with(input, &RedactionConfig::default())
}

/// [`sanitize_for_logging`] with a caller-supplied sensitive-field list.
pub fn sanitize_for_logging_with<T: Serialize>(input: &T, config: &RedactionConfig) -> Value {
    match serde_json::to_value(input) {
        Ok(value) => redact(value, config),
        Err(_) => Value::String(REDACTION_FAILURE_MARKER.to_string()),
    }
}

fn redact(value: Value, config: &RedactionConfig) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if config.is_sensitive(&key) {
                        (key, Value::String(REDACTION_MARKER.to_string()))
                    } else {
                        (key, redact(value, config))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|item| redact(item, config)).collect())
        }
        other => other,
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('<') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match tail.find('>') {
            Some(end) => rest = &tail[end + 1..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn strip_control(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}
