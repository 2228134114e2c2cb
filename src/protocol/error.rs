use std::io;
use thiserror::Error;

/// Top-level error for one connection: either the inbound request could not
/// be read off the wire, or the outbound response could not be written.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },
}

/// Unrecoverable request-read failures.
///
/// Client-visible protocol violations (bad request line, missing
/// content-length, oversized payload, undecodable body) are *not* errors at
/// this level: the decoder yields them as [`RestRequest`](super::RestRequest)
/// values carrying a failure status, so the session can still write a status
/// line back. Only failures that leave the stream unusable surface here.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("line too long, current: {current_size} exceed the limit {max_size}")]
    TooLongLine { current_size: usize, max_size: usize },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_long_line(current_size: usize, max_size: usize) -> Self {
        Self::TooLongLine { current_size, max_size }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Response-write failures.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("serialize response body failed: {source}")]
    Codec {
        #[from]
        source: serde_json::Error,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
