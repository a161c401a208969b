//! The wire codec & channel: a full-duplex stream carrying one
//! `CursorRequest` out for every `Pair` back, strictly paired so all cursor
//! operations belonging to a transaction serialize over one conversation.
//!
//! One request is in flight at a time over an `Arc<Mutex<(Sender, Streaming)>>`
//! pair: the sender is droppable in place for graceful half-close, and every
//! turn races a [`CancellationToken`] for hard cancel.

use std::sync::Arc;

use tokio::sync::{mpsc::Sender, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tonic::Streaming;
use tracing::{debug, trace, warn};

use crate::{
    error::{Error, Result},
    pb::{CursorRequest, Pair},
};

fn cancelled() -> Error {
    Error::Transport(tonic::Status::cancelled("transaction cancelled"))
}

#[derive(Debug)]
struct Io {
    // Taken (and dropped) on graceful half-close; `None` means the request
    // side of the stream has already been closed.
    tx: Option<Sender<CursorRequest>>,
    rx: Streaming<Pair>,
}

/// One transaction's RPC stream.
#[derive(Debug, Clone)]
pub(crate) struct Channel {
    io: Arc<AsyncMutex<Io>>,
    cancel: CancellationToken,
}

impl Channel {
    pub(crate) fn new(
        tx: Sender<CursorRequest>,
        rx: Streaming<Pair>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            io: Arc::new(AsyncMutex::new(Io { tx: Some(tx), rx })),
            cancel,
        }
    }

    /// Send one request and await its one response, racing the channel's
    /// cancellation scope. This is the only way any cursor operation talks
    /// to the wire — every caller goes through here, which is what makes
    /// all cursor operations on a transaction totally ordered.
    pub(crate) async fn request(&self, req: CursorRequest) -> Result<Pair> {
        let mut io = self.io.lock().await;

        let Some(tx) = io.tx.clone() else {
            return Err(Error::Protocol("channel already closed".into()));
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(cancelled()),
            sent = tx.send(req) => {
                sent.map_err(|_| Error::Protocol("server closed the stream".into()))?;
            }
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(cancelled()),
            msg = io.rx.message() => {
                msg?.ok_or_else(|| Error::Protocol("no response".into()))
            }
        }
    }

    /// Step 4 of the teardown algorithm: close the request half of the
    /// stream and await whatever the server sends back to acknowledge it,
    /// racing the same cancellation scope every other turn races — a
    /// deadline firing while this is in flight must not hang the caller. An
    /// EOF or cancellation here is normal and silent; any other error is
    /// logged but never propagated, because the caller is already tearing
    /// down.
    pub(crate) async fn graceful_close(&self) {
        let mut io = self.io.lock().await;
        io.tx.take();

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => trace!("graceful close observed cancellation"),
            msg = io.rx.message() => match msg {
                Ok(_) => trace!("graceful close acknowledged"),
                Err(status) if matches!(status.code(), tonic::Code::Cancelled) => {
                    trace!("graceful close observed cancellation");
                }
                Err(status) => warn!(%status, "error while closing transaction channel"),
            },
        }
    }

    /// Step 2/3 of the teardown algorithm: forcibly terminate the channel
    /// regardless of what graceful close would have done. Idempotent.
    pub(crate) fn hard_cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!("cancelling transaction channel");
        }
        self.cancel.cancel();
    }

    pub(crate) fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}
