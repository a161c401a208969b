//! Low-level transport plumbing for [`crate::Builder::open`]: the
//! connect-with-backoff dial loop, the in-process duplex transport used by
//! tests, and the manual TLS connector used for the "skip hostname
//! verification" mutual-TLS branch — a deliberate, documented deviation
//! from `tonic`'s normal verification defaults.
//!
//! Built directly against `tonic`'s own documented low-level connector
//! hooks (`Endpoint::connect_with_connector`) rather than adapting an
//! existing client, since nothing upstream dials its own transport this
//! way.

use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context as TaskContext, Poll},
    time::Duration,
};

use hyper::client::connect::{Connected, Connection};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tonic::transport::{Channel as Transport, ClientTlsConfig, Endpoint, Identity};
use tower::service_fn;
use tracing::debug;

use crate::error::{Error, Result};

pub(crate) const CONNECT_BACKOFF_BASE: Duration = Duration::from_millis(500);
pub(crate) const CONNECT_BACKOFF_MAX: Duration = Duration::from_secs(10);
pub(crate) const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub(crate) const DIAL_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const MAX_RESPONSE_SIZE: usize = 15 * 1024 * 1024;

/// Wraps any `AsyncRead + AsyncWrite` in hyper's `Connection` marker so it
/// can be returned from a `tower::Service<Uri>` connector.
struct IoStream<T>(T);

impl<T: AsyncRead + Unpin> AsyncRead for IoStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for IoStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Connection for IoStream<T> {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

/// An in-process transport: the client half of a `tokio::io::duplex` pair,
/// the server half of which the caller has already handed to a running
/// `tonic` server. Consumed once by [`dial`]; `Builder::open` is only ever
/// called once per builder, so a single-use slot is enough.
pub struct InProcessListener {
    client: Mutex<Option<DuplexStream>>,
}

impl InProcessListener {
    pub fn new(client_half: DuplexStream) -> Self {
        Self {
            client: Mutex::new(Some(client_half)),
        }
    }
}

pub(crate) async fn dial_in_mem(listener: Arc<InProcessListener>) -> Result<Transport> {
    Endpoint::try_from("http://in-memory")
        .expect("static URI is always valid")
        .connect_with_connector(service_fn(move |_: http::Uri| {
            let listener = listener.clone();
            async move {
                let stream = listener
                    .client
                    .lock()
                    .unwrap()
                    .take()
                    .ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::Other,
                            "in-memory transport already consumed",
                        )
                    })?;
                Ok::<_, std::io::Error>(IoStream(stream))
            }
        }))
        .await
        .map_err(Error::Dial)
}

/// Connect-with-backoff loop: doubles from `CONNECT_BACKOFF_BASE`
/// up to `CONNECT_BACKOFF_MAX` between attempts, each bounded by
/// `DIAL_ATTEMPT_TIMEOUT`, for up to `MIN_CONNECT_TIMEOUT` overall before
/// giving up. `tonic::transport::Endpoint` has no built-in equivalent to
/// grpc-go's `ConnectParams`, so this reimplements it directly over
/// `Endpoint::connect`.
pub(crate) async fn dial_with_backoff(endpoint: Endpoint) -> Result<Transport> {
    retry_with_backoff(|| endpoint.connect()).await
}

/// Same backoff/timeout policy as [`dial_with_backoff`], but driving an
/// arbitrary connect future rather than a plain `Endpoint::connect()` — used
/// by the skip-hostname-verification mutual-TLS branch, whose connector
/// lives behind `connect_with_connector` rather than `Endpoint::connect`.
/// All three TLS branches must retry the same way; only the connector
/// differs.
pub(crate) async fn retry_with_backoff<F, Fut>(mut attempt_connect: F) -> Result<Transport>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<Transport, tonic::transport::Error>>,
{
    let deadline = tokio::time::Instant::now() + MIN_CONNECT_TIMEOUT;
    let mut backoff = CONNECT_BACKOFF_BASE;

    loop {
        let attempt = tokio::time::timeout(DIAL_ATTEMPT_TIMEOUT, attempt_connect()).await;

        match attempt {
            Ok(Ok(channel)) => return Ok(channel),
            Ok(Err(err)) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(Error::Dial(err));
                }
            }
            Err(_elapsed) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(Error::Protocol("dial timed out".into()));
                }
            }
        }

        debug!(?backoff, "dial failed, retrying after backoff");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(CONNECT_BACKOFF_MAX);
    }
}

/// The cert-only branch (no CA supplied): present a client identity over
/// TLS, keeping normal server hostname verification. `tonic`'s own
/// `ClientTlsConfig` is sufficient here, unlike the cert+CA branch.
pub(crate) fn endpoint_with_client_identity(address: String, cert: Vec<u8>, key: Vec<u8>) -> Result<Endpoint> {
    let identity = Identity::from_pem(cert, key);
    let tls = ClientTlsConfig::new().identity(identity);
    Endpoint::from_shared(address)
        .map_err(Error::Dial)?
        .tls_config(tls)
        .map_err(Error::Dial)
}

pub(crate) mod tls {
    //! The mutual-TLS connector for the cert+CA branch, which must skip
    //! hostname verification. `tonic::transport::
    //! ClientTlsConfig` has no toggle for that, so this builds a raw
    //! `rustls::ClientConfig` with a verifier that checks the certificate
    //! chain against the trusted CA pool but never the presented name, and
    //! drives it through the same `connect_with_connector` hook used for
    //! the in-process test transport.
    use super::*;
    use rustls::{
        client::{ServerCertVerified, ServerCertVerifier},
        Certificate, ClientConfig, PrivateKey, RootCertStore, ServerName,
    };
    use std::sync::Arc as StdArc;
    use tokio::net::TcpStream;
    use tokio_rustls::TlsConnector;

    /// Verifies the chain against `roots` but accepts any presented
    /// hostname. An explicit, documented deviation for deployments where
    /// the peer's certificate name doesn't match the dial address — it
    /// must not become the default TLS behavior for the cert-only branch,
    /// which keeps normal verification.
    struct AcceptAnyHostname {
        roots: RootCertStore,
    }

    impl ServerCertVerifier for AcceptAnyHostname {
        fn verify_server_cert(
            &self,
            end_entity: &Certificate,
            intermediates: &[Certificate],
            _server_name: &ServerName,
            scts: &mut dyn Iterator<Item = &[u8]>,
            ocsp_response: &[u8],
            now: std::time::SystemTime,
        ) -> std::result::Result<ServerCertVerified, rustls::Error> {
            let verifier = rustls::client::WebPkiVerifier::new(self.roots.clone(), None);
            // Any DNS name satisfies the chain check below; only the chain
            // of trust (against `roots`) is actually enforced.
            let placeholder = ServerName::try_from("in-mem-tls-peer").unwrap();
            verifier.verify_server_cert(
                end_entity,
                intermediates,
                &placeholder,
                scts,
                ocsp_response,
                now,
            )
        }
    }

    pub(crate) fn identity(cert_pem: &[u8], key_pem: &[u8]) -> Result<(Vec<Certificate>, PrivateKey)> {
        let certs = rustls_pemfile::certs(&mut &cert_pem[..])
            .map_err(|_| Error::Protocol("invalid client certificate PEM".into()))?
            .into_iter()
            .map(Certificate)
            .collect();
        let mut keys = rustls_pemfile::pkcs8_private_keys(&mut &key_pem[..])
            .map_err(|_| Error::Protocol("invalid client key PEM".into()))?;
        let key = keys
            .pop()
            .map(PrivateKey)
            .ok_or_else(|| Error::Protocol("no private key found in PEM".into()))?;
        Ok((certs, key))
    }

    fn root_store(ca_pem: &[u8]) -> Result<RootCertStore> {
        let mut roots = RootCertStore::empty();
        let certs = rustls_pemfile::certs(&mut &ca_pem[..])
            .map_err(|_| Error::Protocol("invalid CA certificate PEM".into()))?;
        for cert in certs {
            roots
                .add(&Certificate(cert))
                .map_err(|_| Error::Protocol("invalid CA certificate".into()))?;
        }
        Ok(roots)
    }

    /// Dial `address` (host:port, no scheme) with mutual TLS, trusting `ca`
    /// and presenting `(cert, key)` as the client identity, accepting any
    /// hostname the peer presents.
    pub(crate) async fn dial_skip_hostname_verification(
        address: String,
        cert: Vec<u8>,
        key: Vec<u8>,
        ca: Vec<u8>,
    ) -> Result<Transport> {
        let (client_certs, client_key) = identity(&cert, &key)?;
        let roots = root_store(&ca)?;

        let mut config = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(StdArc::new(AcceptAnyHostname { roots }))
            .with_client_auth_cert(client_certs, client_key)
            .map_err(|_| Error::Protocol("invalid client identity".into()))?;
        config.alpn_protocols = vec![b"h2".to_vec()];

        let connector = TlsConnector::from(StdArc::new(config));
        let address = StdArc::new(address);

        super::retry_with_backoff(|| {
            let connector = connector.clone();
            let address = address.clone();
            async move {
                Endpoint::try_from("https://in-mem-tls-peer")
                    .expect("static URI is always valid")
                    .connect_with_connector(service_fn(move |_: http::Uri| {
                        let connector = connector.clone();
                        let address = address.clone();
                        async move {
                            let tcp = TcpStream::connect(address.as_str()).await?;
                            let domain = ServerName::try_from("in-mem-tls-peer").map_err(|e| {
                                std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
                            })?;
                            let tls = connector.connect(domain, tcp).await?;
                            Ok::<_, std::io::Error>(IoStream(tls))
                        }
                    }))
                    .await
            }
        })
        .await
    }
}
