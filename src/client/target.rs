//! Publish target parsing
//!
//! `rtmp://host[:port]/app[/inst]/stream_key`. The last path segment is the
//! stream key and everything before it is the application, so
//! `rtmp://a.example/live/sub/key` publishes `key` to app `live/sub`.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;
use crate::protocol::constants::{DEFAULT_PORT, DEFAULT_TLS_PORT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Rtmp,
    Rtmps,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Rtmp => "rtmp",
            Scheme::Rtmps => "rtmps",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Rtmp => DEFAULT_PORT,
            Scheme::Rtmps => DEFAULT_TLS_PORT,
        }
    }
}

/// Where to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    scheme: Scheme,
    host: String,
    port: Option<u16>,
    app: String,
    stream_key: String,
    url: String,
}

impl StreamTarget {
    /// Parse a full publish URL
    pub fn parse(url: &str) -> Result<Self, ProtocolError> {
        let url = url.trim();
        let invalid = |why: &str| ProtocolError::InvalidUrl(format!("{}: {}", why, url));

        let (scheme, rest) = match url.split_once("://") {
            Some((s, rest)) if s.eq_ignore_ascii_case("rtmp") => (Scheme::Rtmp, rest),
            Some((s, rest)) if s.eq_ignore_ascii_case("rtmps") => (Scheme::Rtmps, rest),
            _ => return Err(invalid("scheme must be rtmp:// or rtmps://")),
        };

        let (authority, path) = rest.split_once('/').ok_or_else(|| invalid("missing app"))?;
        let (host, port) = split_authority(authority).ok_or_else(|| invalid("bad host"))?;

        let path = path.trim_end_matches('/');
        let (app, stream_key) = path
            .rsplit_once('/')
            .ok_or_else(|| invalid("missing stream key"))?;
        if app.is_empty() || stream_key.is_empty() {
            return Err(invalid("missing app or stream key"));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            app: app.to_string(),
            stream_key: stream_key.to_string(),
            url: format!("{}://{}/{}", scheme.as_str(), authority, path),
        })
    }

    /// Join a server URL and a stream name, as `{url}/{name}`
    pub fn from_parts(server_url: &str, stream_name: &str) -> Result<Self, ProtocolError> {
        Self::parse(&format!(
            "{}/{}",
            server_url.trim().trim_end_matches('/'),
            stream_name.trim().trim_start_matches('/')
        ))
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, or the scheme default
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// URL sent as `tcUrl` in `connect`: everything but the stream key
    pub fn tc_url(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match self.port {
            Some(port) => format!("{}://{}:{}/{}", self.scheme.as_str(), host, port, self.app),
            None => format!("{}://{}/{}", self.scheme.as_str(), host, self.app),
        }
    }

    /// Publish URL, normalized (lowercase scheme, no trailing slash)
    pub fn publish_url(&self) -> &str {
        &self.url
    }
}

fn split_authority(authority: &str) -> Option<(&str, Option<u16>)> {
    if authority.is_empty() {
        return None;
    }
    // [v6]:port
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        return match after.strip_prefix(':') {
            Some(port) => Some((host, Some(port.parse().ok()?))),
            None if after.is_empty() => Some((host, None)),
            None => None,
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Some((host, Some(port.parse().ok()?))),
        Some(_) => None,
        None => Some((authority, None)),
    }
}

impl FromStr for StreamTarget {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
