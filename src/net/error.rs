use thiserror::Error;

use crate::net::frame::{FrameDecodeError, FrameEncodeError};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame decode error: {0}")]
    FrameDecode(#[from] FrameDecodeError),

    #[error("frame encode error: {0}")]
    FrameEncode(#[from] FrameEncodeError),

    #[error("no pending request to reply to")]
    NoPendingRequest,

    #[error("{0} endpoint closed")]
    Closed(&'static str),

    #[error("connection closed by peer")]
    Disconnected,
}
