//! Host header to tenant slug parsing.
//!
//! A tenant host has exactly the shape `<slug>.<apex>`, where `<apex>` is the
//! configured base domain. The parser is pure: no I/O and no allocation beyond
//! the returned slug.

use crate::error::ParseError;

/// Longest slug accepted (a DNS label).
pub const MAX_SLUG_LEN: usize = 63;

/// Labels that never name a tenant.
pub const DEFAULT_RESERVED_LABELS: &[&str] = &["www", "api"];

/// Parses host headers into tenant slugs.
#[derive(Debug, Clone)]
pub struct HostParser {
    apex: String,
    reserved: Vec<String>,
}

impl HostParser {
    /// Create a parser for the given apex domain with the default reserved labels.
    pub fn new(apex: impl AsRef<str>) -> Self {
        Self::with_reserved(apex, DEFAULT_RESERVED_LABELS.iter().copied())
    }

    /// Create a parser with a custom reserved label set.
    pub fn with_reserved<I, S>(apex: impl AsRef<str>, reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            apex: normalize(apex.as_ref()),
            reserved: reserved
                .into_iter()
                .map(|label| label.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// The apex domain this parser accepts hosts under.
    pub fn apex(&self) -> &str {
        &self.apex
    }

    /// Extract the tenant slug from a host header.
    ///
    /// Case is normalized, and a `:port` suffix and trailing dot are ignored.
    pub fn parse(&self, host_header: &str) -> Result<String, ParseError> {
        let host = normalize(strip_port(host_header.trim()));

        if host.is_empty() {
            return Err(malformed(host_header, "empty host"));
        }
        if host == self.apex {
            return Err(ParseError::Reserved(host));
        }

        let (slug, rest) = host
            .split_once('.')
            .ok_or_else(|| malformed(host_header, "host has no tenant label"))?;

        if rest != self.apex {
            return Err(malformed(host_header, "host is not directly under the apex domain"));
        }
        if self.reserved.iter().any(|label| label == slug) {
            return Err(ParseError::Reserved(slug.to_string()));
        }

        validate_slug(slug).map_err(|reason| malformed(host_header, reason))?;

        Ok(slug.to_string())
    }
}

/// Check that a slug is a lowercase DNS label.
pub fn validate_slug(slug: &str) -> Result<(), &'static str> {
    if slug.is_empty() {
        return Err("empty tenant label");
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err("tenant label too long");
    }
    if !slug
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err("tenant label has characters outside [a-z0-9-]");
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err("tenant label starts or ends with '-'");
    }
    Ok(())
}

fn normalize(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

fn malformed(host: &str, reason: &'static str) -> ParseError {
    ParseError::Malformed {
        host: host.to_string(),
        reason,
    }
}
