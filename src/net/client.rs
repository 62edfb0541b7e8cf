//! Client halves of the two channels, used by the CLI and the integration
//! tests.

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::trace;

use crate::core::command::Announcement;
use crate::net::error::TransportError;
use crate::net::frame::{self, Frame, FrameDecodeError, DEFAULT_MAX_FRAME_BYTES};
use crate::net::read_frame;

const INITIAL_BUFFER_SIZE: usize = 4 * 1024;

/// Request side of the control channel. Strictly one request in flight.
#[derive(Debug)]
pub struct Requester {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    max_frame_bytes: usize,
}

impl Requester {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        })
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Send one request and wait for its reply.
    ///
    /// A rejected announcement may get no reply at all when the relay runs
    /// with `reply_on_rejected = false`; wrap this in a timeout in that case.
    pub async fn request(&mut self, text: &str) -> Result<String, TransportError> {
        self.send(text).await?;
        self.recv_reply().await
    }

    pub async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        self.send_bytes(text.as_bytes()).await
    }

    /// Send one request body as-is, without requiring it to be UTF-8.
    pub async fn request_bytes(&mut self, body: &[u8]) -> Result<String, TransportError> {
        self.send_bytes(body).await?;
        self.recv_reply().await
    }

    async fn send_bytes(&mut self, body: &[u8]) -> Result<(), TransportError> {
        self.write_buf.clear();
        frame::encode_frame(
            &Frame::single(Bytes::copy_from_slice(body)),
            &mut self.write_buf,
            self.max_frame_bytes,
        )?;
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        trace!("request sent: {} bytes", body.len());
        Ok(())
    }

    pub async fn recv_reply(&mut self) -> Result<String, TransportError> {
        let frame = read_frame(&mut self.stream, &mut self.read_buf, self.max_frame_bytes)
            .await?
            .ok_or(TransportError::Disconnected)?;
        Ok(frame.into_text()?)
    }
}

/// Subscribe side of the broadcast channel.
#[derive(Debug)]
pub struct SubscriberClient {
    stream: TcpStream,
    read_buf: BytesMut,
    max_frame_bytes: usize,
}

impl SubscriberClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        })
    }

    /// Match the relay's `server.max_frame_bytes` when it is not the default.
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Receive every topic starting with `prefix`. Takes effect once the
    /// relay has read the request; there is no acknowledgement.
    pub async fn subscribe(&mut self, prefix: &str) -> Result<(), TransportError> {
        self.send_subscription(true, prefix).await
    }

    pub async fn unsubscribe(&mut self, prefix: &str) -> Result<(), TransportError> {
        self.send_subscription(false, prefix).await
    }

    async fn send_subscription(
        &mut self,
        subscribe: bool,
        prefix: &str,
    ) -> Result<(), TransportError> {
        let mut buf = BytesMut::new();
        frame::encode_frame(
            &Frame::subscription(subscribe, prefix),
            &mut buf,
            self.max_frame_bytes,
        )?;
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Wait for the next broadcast. `Ok(None)` once the relay has gone away.
    pub async fn recv(&mut self) -> Result<Option<Announcement>, TransportError> {
        let Some(frame) =
            read_frame(&mut self.stream, &mut self.read_buf, self.max_frame_bytes).await?
        else {
            return Ok(None);
        };

        match frame.parts.as_slice() {
            [topic, content] => Ok(Some(Announcement::new(
                String::from_utf8_lossy(topic),
                String::from_utf8_lossy(content),
            ))),
            parts => Err(FrameDecodeError::UnexpectedParts {
                expected: 2,
                found: parts.len(),
            }
            .into()),
        }
    }
}
