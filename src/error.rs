//! Error types.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A DNS message that could not be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated")]
    Truncated,
    #[error("reply id {got:#06x} does not match query id {expected:#06x}")]
    IdMismatch { expected: u16, got: u16 },
    #[error("message is not a response")]
    NotAResponse,
    #[error("invalid domain name")]
    BadName,
}

/// Failure of a single resolution attempt.
///
/// None of these escape the query handler; they end in an empty answer.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cannot resolve upstream address {0}")]
    BadUpstream(String),
    #[error("i/o error talking to {upstream}: {source}")]
    Io {
        upstream: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} did not answer in time")]
    Timeout(String),
    #[error("malformed reply from {upstream}: {source}")]
    Malformed {
        upstream: String,
        #[source]
        source: WireError,
    },
    #[error("request to {provider} failed: {source}")]
    Http {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} answered with http status {status}")]
    HttpStatus { provider: String, status: u16 },
    #[error("{provider} answered with rcode {rcode}")]
    Rcode { provider: String, rcode: u8 },
    #[error("no DoH provider configured")]
    NoProviders,
    #[error("DoH lookup timed out after {0:?}")]
    DohTimeout(Duration),
}

/// Cache file errors. All of them are fatal.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to open cache file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create cache file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read cache file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write cache file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cache persister stopped: {0}")]
    Persister(String),
}

/// Errors that stop the proxy.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("invalid listen address {0}")]
    ListenAddr(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to build HTTPS client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}
