use thiserror::Error;

/// Errors surfaced by the public API.
///
/// Transport and protocol errors poison the transaction that raised them: the
/// caller's only valid response is to `rollback` and begin a new one. A
/// not-found result (an operation returning `Ok(None)`) is never represented
/// here — absence is a valid result, not a failure.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying RPC channel failed, was cancelled, or never connected.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::Status),

    /// Dialing the remote endpoint failed.
    #[error("dial error: {0}")]
    Dial(#[from] tonic::transport::Error),

    /// The server sent something other than what the protocol at this point
    /// requires (e.g. no response at all where one was required).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A cursor or point operation was issued against a table name the
    /// handle's table configuration does not know about.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A write-style method was called on this read-only client. Never
    /// returned as an `Err` — kept here only so its `Display` text can be
    /// reused as a panic payload: calling one of these must be an abrupt,
    /// unrecoverable failure, not a `Result` a careless caller can ignore.
    #[error("operation not supported by a read-only remote transaction: {0}")]
    UnsupportedOperation(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Panics with [`Error::UnsupportedOperation`]'s message. Called from every
/// write-style trait method this crate exposes for interface symmetry.
#[track_caller]
pub(crate) fn unsupported(op: &'static str) -> ! {
    panic!("{}", Error::UnsupportedOperation(op));
}
