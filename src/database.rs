//! The long-lived connection handle: owns the transport, hands
//! out fresh [`Transaction`]s, and tracks no mutable KV state itself — every
//! `begin_ro` opens its own independent `Tx` stream under its own
//! cancellation scope.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tonic::transport::Channel as Transport;
use tracing::{debug, warn};

use crate::{
    error::{unsupported, Error, Result},
    pb,
    table::TableConfig,
    transaction::Transaction,
    transport::MAX_RESPONSE_SIZE,
    version::Version,
};

/// Cancellation scope handed to [`DatabaseHandle::begin_ro`]. A plain
/// [`CancellationToken`]: cancelling it (or any of its ancestors) tears down
/// every transaction derived from it.
pub type Context = CancellationToken;

fn client(transport: Transport) -> pb::KvClient<Transport> {
    pb::KvClient::new(transport).max_decoding_message_size(MAX_RESPONSE_SIZE)
}

/// A connection to one remote key/value server. Built by
/// [`crate::Builder::open`]; cheap to hold onto for the lifetime of a
/// process, since each operation opens its own transaction underneath.
pub struct DatabaseHandle {
    transport: Mutex<Option<Transport>>,
    table_config: TableConfig,
}

impl DatabaseHandle {
    pub(crate) fn new(transport: Transport, table_config: TableConfig) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
            table_config,
        }
    }

    fn transport(&self) -> Result<Transport> {
        self.transport
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Protocol("database handle is closed".into()))
    }

    /// The table configuration this handle was opened with.
    pub fn all_buckets(&self) -> TableConfig {
        self.table_config.clone()
    }

    /// Calls the `Version` RPC and reports whether `compatible(expected,
    /// actual)` holds. The predicate is supplied by the caller rather than
    /// fixed by this crate, so different deployments can pick their own
    /// compatibility rule (e.g. exact match vs. same-major); see
    /// [`crate::version::same_major`] for a reasonable default.
    pub async fn ensure_version_compatibility(
        &self,
        expected: Version,
        compatible: impl Fn(Version, Version) -> bool,
    ) -> bool {
        let transport = match self.transport() {
            Ok(t) => t,
            Err(_) => {
                warn!("cannot check version: handle is closed");
                return false;
            }
        };

        match client(transport).version(pb::VersionRequest {}).await {
            Ok(rsp) => {
                let actual = Version::from(rsp.into_inner());
                let ok = compatible(expected, actual);
                if !ok {
                    warn!(%expected, %actual, "remote kv server version is not compatible");
                }
                ok
            }
            Err(status) => {
                warn!(%status, "version RPC failed");
                false
            }
        }
    }

    /// Open a fresh read-only transaction bound to a child of `ctx`.
    /// Performs a dummy-cursor open/close handshake before returning: a bidi
    /// stream otherwise never reports an immediate dial failure, since the
    /// first message only surfaces an error once the server actually writes
    /// back.
    pub async fn begin_ro(&self, ctx: &Context) -> Result<Transaction> {
        let child = ctx.child_token();
        let transport = self.transport()?;

        match open_channel(transport, child.clone()).await {
            Ok(channel) => Ok(Transaction::new(channel, self.table_config.clone())),
            Err(err) => {
                child.cancel();
                Err(err)
            }
        }
    }

    pub async fn begin_rw(&self, _ctx: &Context) -> Result<Transaction> {
        unsupported("begin_rw")
    }

    pub async fn update<T, F, Fut>(&self, _ctx: &Context, _scope: F) -> Result<T>
    where
        F: FnOnce(Arc<Transaction>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        unsupported("update")
    }

    /// `begin_ro` against a fresh root context, run `scope`, then
    /// unconditionally `rollback` regardless of what `scope` returned.
    ///
    /// `scope` takes an `Arc<Transaction>` rather than `&Transaction`: a
    /// plain borrow would force `F`'s `Fn` sugar to elide the reference's
    /// lifetime as higher-ranked, which no single associated `Fut` type can
    /// depend on. Handing over a clonable `Arc` sidesteps that entirely and
    /// still lets `view` call `rollback` after `scope`'s future completes.
    pub async fn view<T, F, Fut>(&self, scope: F) -> Result<T>
    where
        F: FnOnce(Arc<Transaction>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ctx = Context::new();
        let tx = Arc::new(self.begin_ro(&ctx).await?);
        let result = scope(Arc::clone(&tx)).await;
        tx.rollback().await;
        result
    }

    /// Idempotent. Drops this handle's reference to the transport; any
    /// transaction already in flight keeps working until its own teardown
    /// runs.
    pub fn close(&self) {
        if self.transport.lock().unwrap().take().is_some() {
            debug!("closed database handle");
        }
    }
}

/// The dummy OPEN/CLOSE handshake that turns a bidi `Tx` stream into a
/// usable [`crate::channel::Channel`].
async fn open_channel(
    transport: Transport,
    cancel: CancellationToken,
) -> Result<crate::channel::Channel> {
    let mut client = client(transport);
    let (tx, rx) = tokio::sync::mpsc::channel(1);

    let outbound = async_stream::stream! {
        yield pb::CursorRequest {
            cursor_id: 0,
            op: pb::Op::Open as i32,
            bucket_name: "DUMMY".into(),
            k: None,
            v: None,
        };
        let mut rx = rx;
        while let Some(req) = rx.recv().await {
            yield req;
        }
    };

    let mut inbound = client
        .tx(outbound)
        .await
        .map_err(Error::Transport)?
        .into_inner();

    let cursor_id = inbound
        .message()
        .await?
        .ok_or_else(|| Error::Protocol("no response opening transaction".into()))?
        .cursor_id;

    tx.send(pb::CursorRequest {
        cursor_id,
        op: pb::Op::Close as i32,
        bucket_name: String::new(),
        k: None,
        v: None,
    })
    .await
    .map_err(|_| Error::Protocol("server closed stream during handshake".into()))?;

    let _ = inbound.message().await;

    Ok(crate::channel::Channel::new(tx, inbound, cancel))
}
