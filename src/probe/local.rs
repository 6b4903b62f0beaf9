//! In-process probe primitives: TCP dial, TLS handshake, HTTP GET.
//!
//! Certificate verification is disabled throughout. These probes measure
//! reachability, not authenticity, and proxy endpoints routinely present
//! self-signed or fronted certificates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::{Node, Origin, ProbeOptions, ProbeResult};

#[derive(Debug)]
struct AcceptAllVerifier;

impl ServerCertVerifier for AcceptAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

async fn tcp_probe(host: &str, port: u16, timeout: Duration) -> ProbeResult {
    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_conn)) => ProbeResult {
            success: true,
            latency: start.elapsed(),
            method: "tcp".to_string(),
            err: String::new(),
        },
        Ok(Err(e)) => ProbeResult::failed(e.to_string()),
        Err(_) => ProbeResult::failed("connect_timeout"),
    }
}

async fn tls_probe(
    tls_config: Arc<ClientConfig>,
    host: &str,
    port: u16,
    sni: &str,
    timeout: Duration,
) -> ProbeResult {
    let start = Instant::now();
    // rustls requires a server name; fall back to the host when the parser
    // recovered no SNI.
    let name = if sni.is_empty() { host } else { sni };
    let server_name = match ServerName::try_from(name.to_string()) {
        Ok(n) => n,
        Err(e) => return ProbeResult::failed(format!("invalid_server_name: {e}")),
    };
    let sock = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return ProbeResult::failed(e.to_string()),
        Err(_) => return ProbeResult::failed("connect_timeout"),
    };
    let connector = TlsConnector::from(tls_config);
    match tokio::time::timeout(timeout, connector.connect(server_name, sock)).await {
        Ok(Ok(_stream)) => ProbeResult {
            success: true,
            latency: start.elapsed(),
            method: "tls".to_string(),
            err: String::new(),
        },
        Ok(Err(e)) => ProbeResult::failed(e.to_string()),
        Err(_) => ProbeResult::failed("tls_handshake_timeout"),
    }
}

async fn http_probe(
    client: &reqwest::Client,
    host: &str,
    port: u16,
    path: &str,
    tls_on: bool,
    host_header: &str,
    timeout: Duration,
) -> ProbeResult {
    let start = Instant::now();
    let scheme = if tls_on || port == 443 { "https" } else { "http" };
    let path = if path.is_empty() { "/" } else { path };
    let url = format!("{scheme}://{host}:{port}{path}");
    let mut req = client.get(&url).timeout(timeout);
    if !host_header.is_empty() {
        req = req.header(reqwest::header::HOST, host_header);
    }
    match req.send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            if status >= 400 {
                ProbeResult::failed(format!("http_status_{status}"))
            } else {
                ProbeResult {
                    success: true,
                    latency: start.elapsed(),
                    method: "http".to_string(),
                    err: String::new(),
                }
            }
        }
        Err(e) => ProbeResult::failed(e.to_string()),
    }
}

/// Probes executed by this process.
pub struct LocalOrigin {
    http: reqwest::Client,
    tls: Arc<ClientConfig>,
}

impl LocalOrigin {
    pub fn new() -> Result<Self> {
        // idempotent; a second install just errors and is ignored
        let _ = rustls::crypto::ring::default_provider().install_default();
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        let tls = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAllVerifier))
            .with_no_client_auth();
        Ok(Self {
            http,
            tls: Arc::new(tls),
        })
    }
}

#[async_trait]
impl Origin for LocalOrigin {
    fn name(&self) -> &str {
        "local"
    }

    /// Probe ladder: HTTP when a path is advertised, then TLS when the node
    /// wants it, then plain TCP as the floor. The first success wins; the
    /// TCP verdict is returned either way.
    ///
    /// A node with no recovered host or port is untestable and reported as a
    /// success: a parser weakness must not cascade into mass deletions.
    async fn probe_node(&self, n: &Node, opt: ProbeOptions) -> ProbeResult {
        if n.host.is_empty() || n.port == 0 {
            return ProbeResult {
                success: true,
                latency: Duration::ZERO,
                method: "untested".to_string(),
                err: String::new(),
            };
        }
        let timeout = opt.timeout;
        if !n.path.is_empty() {
            let r = http_probe(&self.http, &n.host, n.port, &n.path, n.tls, &n.sni, timeout).await;
            if r.success {
                return r;
            }
        }
        if n.tls {
            let r = tls_probe(self.tls.clone(), &n.host, n.port, &n.sni, timeout).await;
            if r.success {
                return r;
            }
        }
        tcp_probe(&n.host, n.port, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn node(host: &str, port: u16) -> Node {
        Node {
            id: "t".into(),
            raw: "raw".into(),
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_untestable_node_is_reported_safe() {
        let origin = LocalOrigin::new().unwrap();
        let res = origin
            .probe_node(
                &node("", 0),
                ProbeOptions {
                    timeout: Duration::from_millis(300),
                },
            )
            .await;
        assert!(res.success, "untestable must be success=true for safety");
        assert_eq!(res.method, "untested");
        assert_eq!(res.latency, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_tcp_probe_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 16];
                let _ = sock.read(&mut buf).await;
            }
        });

        let origin = LocalOrigin::new().unwrap();
        let res = origin
            .probe_node(
                &node("127.0.0.1", port),
                ProbeOptions {
                    timeout: Duration::from_secs(2),
                },
            )
            .await;
        assert!(res.success, "err: {}", res.err);
        assert_eq!(res.method, "tcp");
    }

    #[tokio::test]
    async fn test_tcp_probe_fails_on_closed_port() {
        // bind-then-drop to find a port with nothing listening
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let origin = LocalOrigin::new().unwrap();
        let res = origin
            .probe_node(
                &node("127.0.0.1", port),
                ProbeOptions {
                    timeout: Duration::from_secs(2),
                },
            )
            .await;
        assert!(!res.success);
        assert!(!res.err.is_empty());
    }

    #[tokio::test]
    async fn test_http_probe_counts_4xx_as_failure() {
        use httptest::{matchers::*, responders::*, Expectation, Server};
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/"))
                .respond_with(status_code(503)),
        );
        let addr = server.addr();

        let origin = LocalOrigin::new().unwrap();
        let mut n = node(&addr.ip().to_string(), addr.port());
        n.path = "/".into();
        let res = origin
            .probe_node(
                &n,
                ProbeOptions {
                    timeout: Duration::from_secs(2),
                },
            )
            .await;
        // HTTP failed with 503, but the TCP fallback still reaches the server
        assert!(res.success);
        assert_eq!(res.method, "tcp");
    }
}
