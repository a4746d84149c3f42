//! TLS connector used for handshake timing
//!
//! Probes measure reachability and handshake cost, not certificate trust, so
//! the connector accepts any server certificate.

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::probe::error::ProbeError;

struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Build a connector that skips certificate validation
pub fn insecure_connector() -> TlsConnector {
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Parse a DNS name or IP literal into a rustls server name
pub fn server_name(name: &str) -> Result<ServerName, ProbeError> {
    let name = name.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(name).map_err(|_| ProbeError::InvalidServerName(name.to_string()))
}

/// Run a client handshake over an established stream
pub async fn handshake(
    connector: &TlsConnector,
    name: ServerName,
    stream: TcpStream,
) -> Result<TlsStream<TcpStream>, ProbeError> {
    connector
        .connect(name, stream)
        .await
        .map_err(ProbeError::Handshake)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name_accepts_dns_and_ip() {
        assert!(server_name("speed.cloudflare.com").is_ok());
        assert!(server_name("104.16.1.1").is_ok());
        assert!(server_name("[2606:4700::1]").is_ok());
    }

    #[test]
    fn test_server_name_rejects_garbage() {
        let err = server_name("not a host!").unwrap_err();
        assert!(matches!(err, ProbeError::InvalidServerName(_)));
    }

    #[tokio::test]
    async fn test_handshake_fails_against_plain_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hang up without speaking TLS
            if let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let result = handshake(&insecure_connector(), server_name("localhost").unwrap(), stream).await;
        assert!(matches!(result, Err(ProbeError::Handshake(_))));
    }
}
