//! WebSocket URL parsing.
//!
//! Splits a `ws://` or `wss://` URL into host, port, path, and TLS flag.
//! The grammar is deliberately narrow: scheme, host, optional `:port`,
//! optional path-with-query. No percent decoding, no userinfo, no fragment
//! handling. Anything outside that shape is rejected up front so a bad URL
//! never disturbs an existing session.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default port for `ws://` URLs.
const DEFAULT_PORT: u16 = 80;

/// Default port for `wss://` URLs.
const DEFAULT_TLS_PORT: u16 = 443;

// ============================================================================
// WsUrl
// ============================================================================

/// A parsed WebSocket endpoint.
///
/// Produced by [`WsUrl::parse`]. The `path` always starts with `/` and
/// carries the query string verbatim when one follows the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    /// Hostname or IP literal.
    pub host: String,
    /// TCP port, explicit or scheme default (80/443).
    pub port: u16,
    /// Request path including any query string, `/` when absent.
    pub path: String,
    /// Whether the `wss://` scheme was used.
    pub tls: bool,
}

impl WsUrl {
    /// Parses a WebSocket URL.
    ///
    /// The host ends at the first `:`, `/`, or `?`. An explicit port must
    /// parse as a decimal integer in `u16` range. The path begins at the
    /// first `/` after the authority; when no `/` is present the path
    /// defaults to `/` and any bare query string is discarded.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUrl`] when the scheme is not `ws://`/`wss://`, the
    /// host is empty, or an explicit port does not parse.
    pub fn parse(url: &str) -> Result<Self> {
        let (rest, tls) = if let Some(rest) = url.strip_prefix("wss://") {
            (rest, true)
        } else if let Some(rest) = url.strip_prefix("ws://") {
            (rest, false)
        } else {
            return Err(Error::invalid_url(url, "scheme must be ws:// or wss://"));
        };

        let host_end = rest.find([':', '/', '?']).unwrap_or(rest.len());
        let host = &rest[..host_end];
        if host.is_empty() {
            return Err(Error::invalid_url(url, "host is empty"));
        }

        let after_host = &rest[host_end..];
        let (port, after_port) = if let Some(port_rest) = after_host.strip_prefix(':') {
            let port_end = port_rest.find('/').unwrap_or(port_rest.len());
            let port = port_rest[..port_end]
                .parse::<u16>()
                .map_err(|_| Error::invalid_url(url, "port must be a decimal integer"))?;
            (port, &port_rest[port_end..])
        } else {
            let default = if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT };
            (default, after_host)
        };

        let path = if after_port.starts_with('/') {
            after_port.to_string()
        } else {
            String::from("/")
        };

        Ok(Self {
            host: host.to_string(),
            port,
            path,
            tls,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
