//! The connection builder: accumulates dial configuration (address, table
//! configuration, TLS material, or an in-process test transport) and
//! produces a [`DatabaseHandle`] from `open()`.

use std::sync::Arc;

use tonic::transport::Endpoint;

use crate::{
    database::DatabaseHandle,
    error::{Error, Result},
    table::{TableConfig, TableConfigFn, DEFAULT_TABLES},
    transport::{
        dial_in_mem, dial_with_backoff, endpoint_with_client_identity, tls, InProcessListener,
        DIAL_ATTEMPT_TIMEOUT,
    },
};

#[derive(Default)]
struct TlsMaterial {
    cert: Option<Vec<u8>>,
    key: Option<Vec<u8>>,
    ca: Option<Vec<u8>>,
}

/// Builds a [`DatabaseHandle`]. Start from [`Builder::new`] (or
/// [`Builder::in_mem`] for tests), configure what's needed, then `open()`.
#[derive(Default)]
pub struct Builder {
    address: Option<String>,
    in_mem: Option<Arc<InProcessListener>>,
    tables_config: Option<TableConfigFn>,
    tls: TlsMaterial,
}

impl Builder {
    /// Dial `address` (a URI such as `http://127.0.0.1:9090`) on `open()`.
    pub fn path(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    /// Use a custom table configuration instead of [`DEFAULT_TABLES`].
    pub fn with_tables_config(mut self, f: TableConfigFn) -> Self {
        self.tables_config = Some(f);
        self
    }

    /// Replace the dialer with one that hands back the client half of an
    /// in-process duplex transport. Only meaningful for tests — see
    /// [`InProcessListener`].
    pub fn in_mem(mut self, listener: Arc<InProcessListener>) -> Self {
        self.in_mem = Some(listener);
        self
    }

    /// No-op kept for interface symmetry with a read/write builder: this
    /// client is read-only regardless, so there is nothing to flip.
    pub fn read_only(self) -> Self {
        self
    }

    /// Present a client certificate and private key over TLS. With no CA
    /// configured, the server's certificate is still verified against the
    /// platform's normal trust store and hostname.
    pub fn with_client_certificate(mut self, cert: Vec<u8>, key: Vec<u8>) -> Self {
        self.tls.cert = Some(cert);
        self.tls.key = Some(key);
        self
    }

    /// Trust only `ca` for the server's certificate chain. When combined
    /// with [`Self::with_client_certificate`], this is mutual TLS with
    /// hostname verification deliberately skipped — the server's
    /// certificate chain must still trace to `ca`, but its Subject/SAN
    /// name is not checked against the dial address.
    pub fn with_ca_certificate(mut self, ca: Vec<u8>) -> Self {
        self.tls.ca = Some(ca);
        self
    }

    fn table_config(&self) -> TableConfig {
        let base = DEFAULT_TABLES.clone();
        match &self.tables_config {
            Some(f) => f(base),
            None => base,
        }
    }

    /// Connect and return a [`DatabaseHandle`]: connect-backoff, a
    /// 5-second per-attempt dial deadline, a 15 MiB maximum response size,
    /// and the three TLS branches below.
    pub async fn open(self) -> Result<DatabaseHandle> {
        let table_config = self.table_config();

        let transport = if let Some(listener) = self.in_mem.clone() {
            dial_in_mem(listener).await?
        } else {
            let address = self
                .address
                .clone()
                .ok_or_else(|| Error::Protocol("no address configured".into()))?;

            match (self.tls.cert.clone(), self.tls.key.clone(), self.tls.ca.clone()) {
                (Some(cert), Some(key), Some(ca)) => {
                    tls::dial_skip_hostname_verification(address, cert, key, ca).await?
                }
                (Some(cert), Some(key), None) => {
                    let endpoint = endpoint_with_client_identity(address, cert, key)?
                        .connect_timeout(DIAL_ATTEMPT_TIMEOUT);
                    dial_with_backoff(endpoint).await?
                }
                (None, _, _) => {
                    let endpoint: Endpoint = Endpoint::from_shared(address)
                        .map_err(Error::Dial)?
                        .connect_timeout(DIAL_ATTEMPT_TIMEOUT);
                    dial_with_backoff(endpoint).await?
                }
                (Some(_), None, _) => {
                    return Err(Error::Protocol(
                        "client certificate configured without a private key".into(),
                    ))
                }
            }
        };

        Ok(DatabaseHandle::new(transport, table_config))
    }

    /// Like [`Self::open`], but panics instead of returning an error. For
    /// call sites where a failed dial is a startup-time fatal condition.
    pub async fn must_open(self) -> DatabaseHandle {
        match self.open().await {
            Ok(handle) => handle,
            Err(err) => panic!("failed to open remote kv connection: {err}"),
        }
    }
}
