//! Error types for wavelet tree construction.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Symbol widths other than 1, 2, 4 and 5 bytes are rejected up front.
    #[error("symbol width of {0} not supported")]
    UnsupportedWidth(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A raw symbol that the effective alphabet has no rank for.
    #[error("symbol {0} is not part of the effective alphabet")]
    UnmappedSymbol(u64),

    #[error("invalid tree height {0}, must be at least 1")]
    InvalidHeight(usize),

    /// A merge invariant was violated (bad offsets, too many bits, malformed header).
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("communication error: {0}")]
    Comm(String),

    /// Another worker failed and the cluster was torn down.
    #[error("run aborted by another worker")]
    Aborted,

    #[error("timed out waiting for messages on level {level}")]
    Timeout { level: usize },

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("malformed file: {0}")]
    Format(String),
}

pub type Result<T> = std::result::Result<T, Error>;
