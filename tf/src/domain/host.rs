//! Host records parsed from host URLs
//!
//! A host URL has the form `[protocol://][user[:password]@]host[:port][?name=value&...]`.
//! A bare hostname takes the default protocol.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;
use url::Url;

/// Variables carried by a host URL, in query order per name
pub type UrlVars = BTreeMap<String, Vec<String>>;

/// Errors raised while parsing a host URL
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Malformed host '{url}': {reason}")]
    MalformedHost { url: String, reason: String },
}

/// Wire protocol requested by a host URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Protocol {
    Telnet,
    /// SSH with the version negotiated by the client
    Ssh,
    Ssh1,
    Ssh2,
    /// Any scheme no protocol module is registered for
    Unsupported(String),
}

impl Protocol {
    /// Registry tag of this protocol
    pub fn tag(&self) -> &str {
        match self {
            Self::Telnet => "telnet",
            Self::Ssh => "ssh",
            Self::Ssh1 => "ssh1",
            Self::Ssh2 => "ssh2",
            Self::Unsupported(tag) => tag,
        }
    }
}

impl Protocol {
    /// Map a URL scheme to a protocol; unknown schemes are kept as Unsupported
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_lowercase().as_str() {
            "telnet" => Self::Telnet,
            "ssh" => Self::Ssh,
            "ssh1" => Self::Ssh1,
            "ssh2" => Self::Ssh2,
            other => Self::Unsupported(other.to_string()),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Identity, credentials and variables of one target host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    /// The host string as supplied by the caller
    pub raw_url: String,
    pub protocol: Protocol,
    /// Hostname as written, before any domain suffix is applied
    pub hostname: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    pub url_vars: UrlVars,
}

impl HostRecord {
    /// Parse a host URL, using `default_protocol` when the URL has no scheme
    pub fn parse(raw_url: &str, default_protocol: &str) -> Result<Self, HostError> {
        debug!(%raw_url, %default_protocol, "HostRecord::parse: called");
        let trimmed = raw_url.trim();
        let malformed = |reason: &str| HostError::MalformedHost {
            url: raw_url.to_string(),
            reason: reason.to_string(),
        };
        if trimmed.is_empty() {
            return Err(malformed("empty host"));
        }

        let full = if has_scheme(trimmed) {
            trimmed.to_string()
        } else {
            debug!("HostRecord::parse: no scheme, applying default protocol");
            format!("{}://{}", default_protocol, trimmed)
        };

        let url = Url::parse(&full).map_err(|e| malformed(&e.to_string()))?;
        let hostname = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(malformed("missing hostname")),
        };

        let username = match url.username() {
            "" => None,
            user => Some(decode(user, raw_url)?),
        };
        let password = url.password().map(|p| decode(p, raw_url)).transpose()?;

        let mut url_vars = UrlVars::new();
        for (name, value) in url.query_pairs() {
            url_vars.entry(name.into_owned()).or_default().push(value.into_owned());
        }

        let record = Self {
            raw_url: raw_url.to_string(),
            protocol: Protocol::from_tag(url.scheme()),
            hostname,
            username,
            password,
            port: url.port(),
            url_vars,
        };
        debug!(hostname = %record.hostname, protocol = %record.protocol, port = ?record.port, "HostRecord::parse: parsed");
        Ok(record)
    }

    /// Hostname with `domain` appended when it has no dot and a domain is set
    pub fn qualified_hostname(&self, domain: &str) -> String {
        if !self.hostname.contains('.') && !domain.is_empty() {
            format!("{}.{}", self.hostname, domain)
        } else {
            self.hostname.clone()
        }
    }
}

fn has_scheme(url: &str) -> bool {
    match url.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn decode(value: &str, raw_url: &str) -> Result<String, HostError> {
    urlencoding::decode(value)
        .map(|s| s.into_owned())
        .map_err(|e| HostError::MalformedHost {
            url: raw_url.to_string(),
            reason: format!("invalid percent-encoding: {}", e),
        })
}
