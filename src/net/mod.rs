//! TCP transport for the relay: a request/reply control channel and a
//! publish/subscribe broadcast channel, both speaking the multipart framing in
//! [`frame`].

pub mod broadcast;
pub mod client;
pub mod control;
mod error;
pub mod frame;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

pub use self::broadcast::{BroadcastChannel, BroadcastEndpoint, Subscriptions};
pub use self::client::{Requester, SubscriberClient};
pub use self::control::{ControlChannel, ControlEndpoint};
pub use self::error::TransportError;
pub use self::frame::{Frame, FrameDecodeError, FrameEncodeError};

/// Per-endpoint transport limits.
#[derive(Debug, Clone, Copy)]
pub struct EndpointOptions {
    /// Largest frame body accepted or produced.
    pub max_frame_bytes: usize,
    /// Control: pending requests across all connections.
    /// Broadcast: queued frames per subscriber before drops begin.
    pub queue_depth: usize,
}

/// Read one complete frame from `reader`, buffering partial input in `buf`.
///
/// Returns `Ok(None)` on a clean EOF between frames.
pub async fn read_frame<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_frame_bytes: usize,
) -> Result<Option<Frame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = frame::try_decode_frame(buf, max_frame_bytes)? {
            return Ok(Some(frame));
        }
        if reader.read_buf(buf).await? == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(TransportError::Disconnected)
            };
        }
    }
}
