//! CA bundle discovery.
//!
//! TLS sessions verify against an explicitly configured bundle when one
//! is set on the connection. Otherwise this module looks for a usable
//! PEM bundle: an environment override first, then the locations the
//! common distro ca-certificates packages install to. When nothing is
//! found the engine falls back to the built-in webpki roots.

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::ffi::OsStr;
use std::path::PathBuf;

use tracing::debug;

// ============================================================================
// Constants
// ============================================================================

/// Environment variable naming a PEM bundle to prefer.
pub const CA_BUNDLE_ENV: &str = "REALTIME_WS_CA_BUNDLE";

/// Bundle locations installed by ca-certificates packages.
const WELL_KNOWN_BUNDLES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/pki/tls/cacert.pem",
    "/etc/ssl/cert.pem",
];

// ============================================================================
// Lookup
// ============================================================================

/// Returns the first CA bundle present on this system, if any.
///
/// The [`CA_BUNDLE_ENV`] override wins when it names an existing file;
/// an override pointing nowhere is ignored rather than treated as fatal.
#[must_use]
pub fn system_ca_bundle() -> Option<PathBuf> {
    lookup(env::var_os(CA_BUNDLE_ENV).as_deref())
}

fn lookup(env_override: Option<&OsStr>) -> Option<PathBuf> {
    if let Some(value) = env_override {
        let path = PathBuf::from(value);
        if path.is_file() {
            debug!(path = %path.display(), "using CA bundle from environment");
            return Some(path);
        }
        debug!(path = %path.display(), "CA bundle override does not exist, ignoring");
    }

    WELL_KNOWN_BUNDLES
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

// ============================================================================
// Tests
// ============================================================================
