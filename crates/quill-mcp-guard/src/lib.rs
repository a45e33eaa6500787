//! # Quill MCP Guard
//!
//! Request hygiene for the tool-invocation transport: input sanitization
//! and per-key request throttling. Both are applied as pre-conditions by
//! the transport before any untrusted data reaches business logic, logs,
//! or the filesystem.
//!
//! ## Components
//! - [`sanitize`]: context-sensitive string/URL/path/JSON/number cleaning
//!   plus recursive log redaction
//! - [`rate_limit`]: fixed-window counters with a background eviction task

pub mod rate_limit;
pub mod sanitize;

pub use rate_limit::{
    RateLimitConfig, RateLimitError, RateLimitStatus, RateLimitUpdate, RateLimiter,
};
pub use sanitize::{
    HtmlSanitizeConfig, PathSanitizeOptions, RedactionConfig, SanitizeContext, SanitizedPathInfo,
    ValidationError, sanitize_for_logging, sanitize_for_logging_with, sanitize_html,
    sanitize_json, sanitize_number, sanitize_path, sanitize_string, sanitize_url,
};
