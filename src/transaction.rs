//! The read-only transactional scope: owns exactly one [`Channel`], the
//! list of cursors opened on it, a stateless one-cursor-per-table pool for
//! `get_one`/`has`, and the three-state teardown machine
//! (Active/Closing/Closed) described by the teardown algorithm below.

use std::collections::HashMap;

use tokio::sync::Mutex as AsyncMutex;
use tracing::trace;

use crate::{
    channel::Channel,
    cursor::{Cursor, CursorTicket},
    error::{unsupported, Error, Result},
    table::{TableConfig, TableInfo},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Closing,
    Closed,
}

#[derive(Debug)]
struct Inner {
    channel: Option<Channel>,
    cursors: Vec<CursorTicket>,
    stateless: HashMap<String, Cursor>,
    streaming_requested: bool,
    state: TxState,
}

/// A read-only scope owning exactly one [`Channel`]. Not `Clone`,
/// not meant to be shared across threads of control — all operations
/// serialize over the one channel it owns regardless.
#[derive(Debug)]
pub struct Transaction {
    inner: AsyncMutex<Inner>,
    table_config: TableConfig,
}

impl Transaction {
    pub(crate) fn new(channel: Channel, table_config: TableConfig) -> Self {
        Self {
            inner: AsyncMutex::new(Inner {
                channel: Some(channel),
                cursors: Vec::new(),
                stateless: HashMap::new(),
                streaming_requested: false,
                state: TxState::Active,
            }),
            table_config,
        }
    }

    fn table_info(&self, table: &str) -> Result<TableInfo> {
        self.table_config
            .get(table)
            .copied()
            .ok_or_else(|| Error::UnknownTable(table.to_string()))
    }

    fn ensure_active(inner: &Inner) -> Result<()> {
        match inner.state {
            TxState::Active => Ok(()),
            TxState::Closing | TxState::Closed => {
                Err(Error::Protocol("transaction is closing".into()))
            }
        }
    }

    /// Marked `pub(crate)` deliberately: no public operation in this crate
    /// flips it yet. It's an extension seam for a future server-buffered
    /// streaming `next` that isn't wired up; teardown already consults it.
    #[allow(dead_code)]
    pub(crate) async fn mark_streaming_requested(&self) {
        let mut inner = self.inner.lock().await;
        inner.streaming_requested = true;
    }

    /// Open a new cursor on this transaction's channel.
    pub async fn cursor(&self, table: &str) -> Result<Cursor> {
        let info = self.table_info(table)?;
        let mut inner = self.inner.lock().await;
        Self::ensure_active(&inner)?;

        let channel = inner
            .channel
            .clone()
            .ok_or_else(|| Error::Protocol("transaction has no channel".into()))?;

        let cursor = Cursor::open(channel, table, info).await?;
        inner.cursors.push(cursor.ticket());
        Ok(cursor)
    }

    /// Identical to [`Self::cursor`]; the distinct name exists only so
    /// callers document intent to use the dup-sort operations.
    pub async fn cursor_dup_sort(&self, table: &str) -> Result<Cursor> {
        self.cursor(table).await
    }

    /// Obtain (or open and cache) the one stateless cursor this transaction
    /// keeps for `table`, used by both `get_one` and `has` — at most one
    /// cursor per table.
    async fn stateless_cursor<'a>(
        &self,
        inner: &'a mut Inner,
        table: &str,
    ) -> Result<&'a mut Cursor> {
        Self::ensure_active(inner)?;

        if !inner.stateless.contains_key(table) {
            let info = self.table_info(table)?;
            let channel = inner
                .channel
                .clone()
                .ok_or_else(|| Error::Protocol("transaction has no channel".into()))?;
            let cursor = Cursor::open(channel, table, info).await?;
            inner.stateless.insert(table.to_string(), cursor);
        }

        Ok(inner.stateless.get_mut(table).expect("just inserted"))
    }

    /// Obtain (or reuse) the stateless cursor for `table`, then
    /// `seek_exact(key)`.
    pub async fn get_one(&self, table: &str, key: impl Into<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        let key = key.into();
        let mut inner = self.inner.lock().await;
        let cursor = self.stateless_cursor(&mut inner, table).await?;
        Ok(cursor.seek_exact(key).await?.map(|(_, v)| v))
    }

    /// Obtain (or reuse) the stateless cursor for `table`, then test for
    /// presence of `key`.
    pub async fn has(&self, table: &str, key: impl Into<Vec<u8>>) -> Result<bool> {
        let key = key.into();
        let mut inner = self.inner.lock().await;
        let cursor = self.stateless_cursor(&mut inner, table).await?;
        cursor.has(key).await
    }

    async fn walk(
        cursor: &mut Cursor,
        from: Vec<u8>,
        mut should_continue: impl FnMut(usize, &[u8]) -> bool,
        mut visitor: impl FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut next = cursor.seek(from).await?;
        let mut i = 0usize;
        while let Some((k, v)) = next {
            if !should_continue(i, &k) {
                break;
            }
            visitor(&k, &v)?;
            i += 1;
            next = cursor.next().await?;
        }
        Ok(())
    }

    /// Open a cursor, `seek(from_prefix)`, then walk `next()` to the end of
    /// the table, closing the cursor on every exit path.
    pub async fn for_each(
        &self,
        table: &str,
        from_prefix: impl Into<Vec<u8>>,
        visitor: impl FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut cursor = self.cursor(table).await?;
        let result = Self::walk(&mut cursor, from_prefix.into(), |_, _| true, visitor).await;
        cursor.close().await;
        result
    }

    /// Like [`Self::for_each`], but also stops as soon as the returned key
    /// is no longer prefixed by `prefix`.
    pub async fn for_prefix(
        &self,
        table: &str,
        prefix: impl Into<Vec<u8>>,
        visitor: impl FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        let prefix = prefix.into();
        let mut cursor = self.cursor(table).await?;
        let bound = prefix.clone();
        let result = Self::walk(
            &mut cursor,
            prefix,
            move |_, k| k.starts_with(&bound),
            visitor,
        )
        .await;
        cursor.close().await;
        result
    }

    /// Like [`Self::for_each`], capped at `n` pairs.
    pub async fn for_amount(
        &self,
        table: &str,
        from_prefix: impl Into<Vec<u8>>,
        n: usize,
        visitor: impl FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut cursor = self.cursor(table).await?;
        let result = Self::walk(&mut cursor, from_prefix.into(), move |i, _| i < n, visitor).await;
        cursor.close().await;
        result
    }

    /// Close every cursor in insertion order, then close the channel.
    /// Idempotent — a second call is a silent no-op once the transaction
    /// is `Closed`.
    pub async fn rollback(&self) {
        let mut inner = self.inner.lock().await;

        if inner.state == TxState::Closed {
            return;
        }
        inner.state = TxState::Closing;

        let cursors = std::mem::take(&mut inner.cursors);
        for ticket in cursors {
            ticket.close().await;
        }

        let stateless = std::mem::take(&mut inner.stateless);
        for (_, mut cursor) in stateless {
            cursor.close().await;
        }

        if let Some(channel) = inner.channel.take() {
            // Step 2/3: if the caller ever asked for streaming, the server
            // is presumed mid-stream and can't drain a graceful close
            // promptly — cancel immediately instead of waiting on it.
            if inner.streaming_requested {
                trace!("streaming was requested; hard-cancelling channel");
                channel.hard_cancel();
            } else {
                channel.graceful_close().await;
            }
            // Safety net either way: fires even if graceful close
            // succeeded, and is itself idempotent.
            channel.hard_cancel();
        }

        inner.streaming_requested = false;
        inner.state = TxState::Closed;
    }

    pub async fn commit(&self) -> Result<()> {
        unsupported("commit")
    }

    pub async fn increment_sequence(&self, _table: &str, _amount: u64) -> Result<u64> {
        unsupported("increment_sequence")
    }

    pub async fn append(&self, _table: &str, _key: &[u8], _value: &[u8]) -> Result<()> {
        unsupported("append")
    }

    pub async fn append_dup(&self, _table: &str, _key: &[u8], _value: &[u8]) -> Result<()> {
        unsupported("append_dup")
    }

    pub async fn bucket_size(&self, _table: &str) -> Result<u64> {
        unsupported("bucket_size")
    }

    /// No-op, not a fatal stub: unlike the other write-scope methods,
    /// collecting metrics on a read-only transaction is harmless rather
    /// than meaningless, so it stays a no-op instead of panicking.
    pub fn collect_metrics(&self) {}
}
