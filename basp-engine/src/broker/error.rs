//! Error types for broker operations.

use std::io;

use thiserror::Error;

/// Errors that can occur while running a broker or talking to it through
/// its handle.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// An I/O operation on a socket or listener failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The broker task is gone; its handle can no longer deliver commands.
    #[error("broker is shut down")]
    Closed,
}
