//! Production transport engine over tokio-tungstenite.
//!
//! One session wraps one `WebSocketStream`. tungstenite reassembles
//! fragmented messages internally, so every `Data` event from this engine
//! carries a complete message with `first` and `fin` both set; the
//! connection's own reassembler simply takes its single-frame fast path.
//!
//! TLS uses rustls. Trust comes from, in order: the config's CA bundle,
//! or the built-in webpki roots. Setting `verify_tls: false` swaps in a
//! verifier that accepts anything, for development against self-signed
//! endpoints.

// ============================================================================
// Imports
// ============================================================================

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::result::Result as StdResult;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

use super::{SessionConfig, TransportEngine, TransportEvent, TransportSession};

// ============================================================================
// TungsteniteEngine
// ============================================================================

/// The default production engine.
///
/// Stateless; one instance serves any number of connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteEngine;

#[async_trait]
impl TransportEngine for TungsteniteEngine {
    async fn open(&self, config: SessionConfig) -> Result<Box<dyn TransportSession>> {
        if config.compression {
            debug!("permessage-deflate requested but not supported by this engine");
        }

        let request = build_request(&config)?;
        let connector = if config.tls {
            Some(Connector::Rustls(Arc::new(client_tls_config(&config)?)))
        } else {
            Some(Connector::Plain)
        };

        debug!(uri = %config.uri(), "opening websocket session");
        let (stream, response) = connect_async_tls_with_config(request, None, true, connector)
            .await
            .map_err(|e| Error::transport(categorize(&e)))?;

        if let Some(protocol) = response.headers().get("sec-websocket-protocol") {
            debug!(protocol = ?protocol, "server selected subprotocol");
        }

        Ok(Box::new(TungsteniteSession {
            stream,
            established: false,
            done: false,
        }))
    }
}

// ============================================================================
// TungsteniteSession
// ============================================================================

struct TungsteniteSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// The buffered `Established` event was delivered.
    established: bool,
    /// A terminal event was delivered; the stream is spent.
    done: bool,
}

#[async_trait]
impl TransportSession for TungsteniteSession {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        if !self.established {
            self.established = true;
            return Some(TransportEvent::Established);
        }
        if self.done {
            return None;
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(TransportEvent::Data {
                        binary: false,
                        first: true,
                        fin: true,
                        payload: Bytes::from(text),
                    });
                }
                Some(Ok(Message::Binary(payload))) => {
                    return Some(TransportEvent::Data {
                        binary: true,
                        first: true,
                        fin: true,
                        payload,
                    });
                }
                Some(Ok(Message::Pong(_))) => return Some(TransportEvent::Pong),
                Some(Ok(Message::Ping(_))) => {
                    // tungstenite queues the pong reply itself
                    trace!("ping received");
                }
                Some(Ok(Message::Close(frame))) => {
                    self.done = true;
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                        None => (1000, String::new()),
                    };
                    return Some(TransportEvent::Closed { code, reason });
                }
                Some(Ok(Message::Frame(_))) => {
                    trace!("raw frame ignored");
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(TransportEvent::Error {
                        message: categorize(&e),
                    });
                }
                None => {
                    self.done = true;
                    return None;
                }
            }
        }
    }

    async fn write(&mut self, payload: &[u8], binary: bool) -> Result<usize> {
        let message = if binary {
            Message::Binary(Bytes::copy_from_slice(payload))
        } else {
            let text = std::str::from_utf8(payload)
                .map_err(|_| Error::transport("text payload is not valid UTF-8"))?;
            Message::Text(Utf8Bytes::from(text))
        };

        self.stream
            .send(message)
            .await
            .map_err(|e| Error::transport(categorize(&e)))?;
        // send() flushes, so acceptance is all or nothing here
        Ok(payload.len())
    }

    async fn ping(&mut self) -> Result<()> {
        self.stream
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(|e| Error::transport(categorize(&e)))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Utf8Bytes::from(reason.to_string()),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| Error::transport(categorize(&e)))
    }
}

// ============================================================================
// Request Building
// ============================================================================

fn build_request(config: &SessionConfig) -> Result<Request> {
    let mut request = config
        .uri()
        .into_client_request()
        .map_err(|e| Error::transport(format!("cannot build handshake request: {e}")))?;

    if !config.protocols.is_empty() {
        let joined = config.protocols.join(", ");
        let value = HeaderValue::from_str(&joined)
            .map_err(|_| Error::transport(format!("invalid subprotocol list: {joined}")))?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", value);
    }

    Ok(request)
}

// ============================================================================
// TLS Configuration
// ============================================================================

fn client_tls_config(config: &SessionConfig) -> Result<ClientConfig> {
    install_crypto_provider();

    let mut root_store = RootCertStore::empty();
    if let Some(path) = &config.ca_path {
        let added = add_pem_bundle(&mut root_store, path)?;
        debug!(path = %path.display(), added, "loaded CA bundle");
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let mut tls = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if !config.verify_tls {
        warn!("TLS certificate verification disabled");
        tls.dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    Ok(tls)
}

fn install_crypto_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

fn add_pem_bundle(store: &mut RootCertStore, path: &Path) -> Result<usize> {
    let file = File::open(path)
        .map_err(|e| Error::tls(format!("cannot open CA bundle {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<StdResult<Vec<_>, _>>()
        .map_err(|e| Error::tls(format!("cannot parse CA bundle {}: {e}", path.display())))?;

    let (added, ignored) = store.add_parsable_certificates(certs);
    if added == 0 {
        return Err(Error::tls(format!(
            "no usable certificates in {}",
            path.display()
        )));
    }
    if ignored > 0 {
        warn!(ignored, path = %path.display(), "skipped unparsable certificates in CA bundle");
    }
    Ok(added)
}

/// Accepts any server certificate. Installed only on explicit request.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> StdResult<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> StdResult<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> StdResult<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

// ============================================================================
// Error Categorization
// ============================================================================

/// Maps a tungstenite error to a message with a diagnostic hint appended.
fn categorize(error: &WsError) -> String {
    match error {
        WsError::Io(io) => {
            let text = io.to_string();
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => format!(
                    "{text} (server refused connection, check that the server is running and the port is correct)"
                ),
                std::io::ErrorKind::TimedOut => format!(
                    "{text} (connection timeout, check network connectivity and server availability)"
                ),
                std::io::ErrorKind::HostUnreachable | std::io::ErrorKind::NetworkUnreachable => {
                    format!("{text} (network unreachable, check network connectivity)")
                }
                _ if text.contains("failed to lookup")
                    || text.contains("dns error")
                    || text.contains("Name or service not known") =>
                {
                    format!("{text} (DNS resolution failed, check hostname and network)")
                }
                _ => text,
            }
        }
        WsError::Tls(tls) => {
            format!("{tls} (TLS handshake failed, check certificate validity and CA path)")
        }
        WsError::Protocol(violation) => format!("websocket protocol violation: {violation}"),
        WsError::Capacity(capacity) => format!("message exceeds capacity: {capacity}"),
        WsError::ConnectionClosed => "connection closed".to_string(),
        WsError::AlreadyClosed => "connection already closed".to_string(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn config(tls: bool) -> SessionConfig {
        SessionConfig {
            host: "example.com".into(),
            port: if tls { 443 } else { 80 },
            path: "/live".into(),
            tls,
            protocols: Vec::new(),
            ca_path: None,
            verify_tls: true,
            compression: false,
        }
    }

    #[test]
    fn test_request_carries_subprotocols() {
        let mut cfg = config(false);
        cfg.protocols = vec!["graphql-ws".into(), "json".into()];

        let request = build_request(&cfg).unwrap();
        let header = request.headers().get("Sec-WebSocket-Protocol").unwrap();
        assert_eq!(header.to_str().unwrap(), "graphql-ws, json");
    }

    #[test]
    fn test_request_without_subprotocols_has_no_header() {
        let request = build_request(&config(false)).unwrap();
        assert!(request.headers().get("Sec-WebSocket-Protocol").is_none());
    }

    #[test]
    fn test_tls_config_with_builtin_roots() {
        assert!(client_tls_config(&config(true)).is_ok());
    }

    #[test]
    fn test_tls_config_without_verification() {
        let mut cfg = config(true);
        cfg.verify_tls = false;
        assert!(client_tls_config(&cfg).is_ok());
    }

    #[test]
    fn test_missing_bundle_is_a_tls_error() {
        let mut cfg = config(true);
        cfg.ca_path = Some("/no/such/bundle.pem".into());

        let err = client_tls_config(&cfg).unwrap_err();
        assert!(matches!(err, Error::Tls { .. }));
    }

    #[test]
    fn test_bundle_without_certificates_is_rejected() {
        let mut pem = tempfile::NamedTempFile::new().unwrap();
        pem.write_all(b"this file holds no certificates\n").unwrap();

        let mut cfg = config(true);
        cfg.ca_path = Some(pem.path().to_path_buf());

        let err = client_tls_config(&cfg).unwrap_err();
        match err {
            Error::Tls { message } => assert!(message.contains("no usable certificates")),
            other => panic!("expected Tls error, got {other}"),
        }
    }

    #[test]
    fn test_categorize_refused() {
        let err = WsError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(categorize(&err).contains("server refused connection"));
    }

    #[test]
    fn test_categorize_dns() {
        let err = WsError::Io(std::io::Error::other(
            "failed to lookup address information",
        ));
        assert!(categorize(&err).contains("DNS resolution failed"));
    }

    #[test]
    fn test_categorize_plain_io_passthrough() {
        let err = WsError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        ));
        assert_eq!(categorize(&err), "broken pipe");
    }
}
