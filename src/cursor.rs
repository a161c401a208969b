//! The positioned iterator over one table within one transaction: a
//! server-assigned id paired with the transaction's channel, the full
//! position/seek/dup-sort operation set, and an explicit, awaited `close`
//! rather than one fired from `Drop` and forgotten.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::trace;

use crate::{
    channel::Channel,
    error::{unsupported, Error, Result},
    pb::{CursorRequest, Op},
    table::TableInfo,
};

pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Everything a [`crate::Transaction`] needs to force-close a cursor during
/// teardown without owning the `Cursor` object the caller is holding: the
/// wire id, the shared channel, and a closed flag shared with the `Cursor`
/// so neither side double-sends `CLOSE`.
#[derive(Debug, Clone)]
pub(crate) struct CursorTicket {
    id: u32,
    channel: Channel,
    closed: Arc<AtomicBool>,
}

impl CursorTicket {
    /// Send `CLOSE` for this cursor unless it is already closed. Used by
    /// `Transaction::rollback` to close every cursor it opened, in
    /// insertion order, even ones the caller never explicitly closed.
    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        trace!(cursor_id = self.id, "closing cursor");
        let _ = self
            .channel
            .request(CursorRequest {
                cursor_id: self.id,
                op: Op::Close as i32,
                bucket_name: String::new(),
                k: None,
                v: None,
            })
            .await;
    }
}

/// A cursor opened on a [`crate::Transaction`].
///
/// Write-style methods (`put`, `delete`, `append`, `count`,
/// `delete_current`, ...) are present only for interface symmetry with a
/// read/write store; every one of them panics rather than returning an
/// error a careless caller could ignore.
#[derive(Debug)]
pub struct Cursor {
    channel: Channel,
    id: u32,
    table: String,
    info: TableInfo,
    closed: Arc<AtomicBool>,
}

impl Cursor {
    pub(crate) async fn open(channel: Channel, table: &str, info: TableInfo) -> Result<Self> {
        trace!(table, "sending request to open cursor");
        let rsp = channel
            .request(CursorRequest {
                cursor_id: 0,
                op: Op::Open as i32,
                bucket_name: table.to_string(),
                k: None,
                v: None,
            })
            .await?;
        trace!(cursor_id = rsp.cursor_id, "opened cursor");

        Ok(Self {
            channel,
            id: rsp.cursor_id,
            table: table.to_string(),
            info,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A ticket the owning transaction keeps so it can close this cursor
    /// during teardown even if the caller never does.
    pub(crate) fn ticket(&self) -> CursorTicket {
        CursorTicket {
            id: self.id,
            channel: self.channel.clone(),
            closed: self.closed.clone(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn is_dup_sort(&self) -> bool {
        self.info.dup_sort
    }

    async fn op(&mut self, op: Op, k: Option<Vec<u8>>, v: Option<Vec<u8>>) -> Result<KeyValue> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Protocol("cursor is closed".into()));
        }

        let rsp = self
            .channel
            .request(CursorRequest {
                cursor_id: self.id,
                op: op as i32,
                bucket_name: String::new(),
                k,
                v,
            })
            .await?;

        Ok((rsp.k.unwrap_or_default(), rsp.v.unwrap_or_default()))
    }

    /// A positioning turn whose response key may be nil (end-of-range).
    async fn op_opt(
        &mut self,
        op: Op,
        k: Option<Vec<u8>>,
        v: Option<Vec<u8>>,
    ) -> Result<Option<KeyValue>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Protocol("cursor is closed".into()));
        }

        let rsp = self
            .channel
            .request(CursorRequest {
                cursor_id: self.id,
                op: op as i32,
                bucket_name: String::new(),
                k,
                v,
            })
            .await?;

        match rsp.k {
            None => Ok(None),
            Some(k) => Ok(Some((k, rsp.v.unwrap_or_default()))),
        }
    }

    pub async fn first(&mut self) -> Result<Option<KeyValue>> {
        self.op_opt(Op::First, None, None).await
    }

    pub async fn last(&mut self) -> Result<Option<KeyValue>> {
        self.op_opt(Op::Last, None, None).await
    }

    /// Key/value at the cursor's current position. Unlike the other
    /// positioning operations this one has no end-of-range sentinel: its
    /// response is always a pair.
    pub async fn current(&mut self) -> Result<KeyValue> {
        self.op(Op::Current, None, None).await
    }

    pub async fn next(&mut self) -> Result<Option<KeyValue>> {
        self.op_opt(Op::Next, None, None).await
    }

    pub async fn prev(&mut self) -> Result<Option<KeyValue>> {
        self.op_opt(Op::Prev, None, None).await
    }

    /// Smallest key >= `key`, or `None` if no such key exists.
    pub async fn seek(&mut self, key: impl Into<Vec<u8>>) -> Result<Option<KeyValue>> {
        self.op_opt(Op::Seek, Some(key.into()), None).await
    }

    /// The record with key exactly equal to `key`, or `None`.
    pub async fn seek_exact(&mut self, key: impl Into<Vec<u8>>) -> Result<Option<KeyValue>> {
        self.op_opt(Op::SeekExact, Some(key.into()), None).await
    }

    /// `seek(k)` followed by a byte-equality test.
    pub async fn has(&mut self, key: impl Into<Vec<u8>>) -> Result<bool> {
        let key = key.into();
        Ok(self
            .seek(key.clone())
            .await?
            .map(|(k, _)| k == key)
            .unwrap_or(false))
    }

    /// Next duplicate value at the current key. Valid only on a dup-sort
    /// table; the client does not itself enforce this — it simply relays
    /// whatever the server returns.
    pub async fn next_dup(&mut self) -> Result<Option<KeyValue>> {
        self.op_opt(Op::NextDup, None, None).await
    }

    pub async fn next_no_dup(&mut self) -> Result<Option<KeyValue>> {
        self.op_opt(Op::NextNoDup, None, None).await
    }

    pub async fn prev_dup(&mut self) -> Result<Option<KeyValue>> {
        self.op_opt(Op::PrevDup, None, None).await
    }

    pub async fn prev_no_dup(&mut self) -> Result<Option<KeyValue>> {
        self.op_opt(Op::PrevNoDup, None, None).await
    }

    /// First duplicate value at the current key.
    pub async fn first_dup(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.op_opt(Op::FirstDup, None, None).await?.map(|(_, v)| v))
    }

    /// Last duplicate value at the current key.
    pub async fn last_dup(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.op_opt(Op::LastDup, None, None).await?.map(|(_, v)| v))
    }

    /// Smallest duplicate of `key` that is >= `value`.
    pub async fn seek_both(
        &mut self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self
            .op_opt(Op::SeekBoth, Some(key.into()), Some(value.into()))
            .await?
            .map(|(_, v)| v))
    }

    /// Exact `(key, value)` lookup on a dup-sort table.
    pub async fn seek_both_exact(
        &mut self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Result<Option<KeyValue>> {
        self.op_opt(Op::SeekBothExact, Some(key.into()), Some(value.into()))
            .await
    }

    /// Send `CLOSE` and await (and discard) its acknowledgment. Idempotent:
    /// a second call is a no-op. After this, every other method on this
    /// cursor fails without touching the wire.
    pub async fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        trace!(cursor_id = self.id, "closing cursor");
        let _ = self
            .channel
            .request(CursorRequest {
                cursor_id: self.id,
                op: Op::Close as i32,
                bucket_name: String::new(),
                k: None,
                v: None,
            })
            .await;
    }

    pub async fn put(&mut self, _key: &[u8], _value: &[u8]) -> Result<()> {
        unsupported("put")
    }

    pub async fn append(&mut self, _key: &[u8], _value: &[u8]) -> Result<()> {
        unsupported("append")
    }

    pub async fn append_dup(&mut self, _key: &[u8], _value: &[u8]) -> Result<()> {
        unsupported("append_dup")
    }

    pub async fn delete(&mut self, _key: &[u8], _value: &[u8]) -> Result<()> {
        unsupported("delete")
    }

    pub async fn delete_current(&mut self) -> Result<()> {
        unsupported("delete_current")
    }

    pub async fn delete_current_duplicates(&mut self) -> Result<()> {
        unsupported("delete_current_duplicates")
    }

    pub async fn count(&mut self) -> Result<usize> {
        unsupported("count")
    }
}
