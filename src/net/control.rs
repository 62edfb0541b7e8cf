//! Reply side of the control channel.
//!
//! Each accepted TCP connection is served by its own task which decodes one
//! request frame, forwards it to the relay loop together with a reply slot and
//! waits for that slot before reading the next frame. Requests from all
//! connections are fair-queued into a single bounded channel, so the relay
//! loop sees one request at a time, the way a REP socket does.

use std::future::Future;
use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

use crate::net::error::TransportError;
use crate::net::frame::{self, Frame};
use crate::net::EndpointOptions;

const INITIAL_BUFFER_SIZE: usize = 8 * 1024;

/// Request/reply contract the relay loop is written against.
pub trait ControlChannel: Send {
    /// Wait for the next request. Any previous request that was never
    /// answered is released first.
    fn receive(&mut self) -> impl Future<Output = Result<String, TransportError>> + Send;

    /// Answer the request returned by the last `receive`.
    fn send(&mut self, reply: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Release the last request without answering it.
    fn skip_reply(&mut self);
}

#[derive(Debug)]
struct Request {
    peer: SocketAddr,
    text: String,
    reply: oneshot::Sender<Option<String>>,
}

#[derive(Debug)]
struct PendingReply {
    peer: SocketAddr,
    slot: oneshot::Sender<Option<String>>,
}

/// TCP implementation of [`ControlChannel`].
#[derive(Debug)]
pub struct ControlEndpoint {
    local_addr: SocketAddr,
    requests: mpsc::Receiver<Request>,
    pending: Option<PendingReply>,
    // Dropping the sender stops the accept loop and every connection task.
    _shutdown: watch::Sender<()>,
}

impl ControlEndpoint {
    pub async fn bind(addr: &str, options: EndpointOptions) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("control endpoint listening on {}", local_addr);

        let (tx, rx) = mpsc::channel(options.queue_depth.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        tokio::spawn(accept_loop(listener, tx, options, shutdown_rx));

        Ok(Self {
            local_addr,
            requests: rx,
            pending: None,
            _shutdown: shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl ControlChannel for ControlEndpoint {
    async fn receive(&mut self) -> Result<String, TransportError> {
        self.skip_reply();
        let request = self
            .requests
            .recv()
            .await
            .ok_or(TransportError::Closed("control"))?;
        trace!(peer = %request.peer, "request dequeued");
        self.pending = Some(PendingReply {
            peer: request.peer,
            slot: request.reply,
        });
        Ok(request.text)
    }

    async fn send(&mut self, reply: String) -> Result<(), TransportError> {
        let pending = self.pending.take().ok_or(TransportError::NoPendingRequest)?;
        if pending.slot.send(Some(reply)).is_err() {
            // The requester hung up while we were dispatching; like a REP
            // socket we drop the reply rather than fail the relay.
            warn!(peer = %pending.peer, "requester disconnected before reply");
        }
        Ok(())
    }

    fn skip_reply(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(peer = %pending.peer, "releasing request without reply");
            let _ = pending.slot.send(None);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    requests: mpsc::Sender<Request>,
    options: EndpointOptions,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        debug!("control connection from {}", peer);
                        let _ = stream.set_nodelay(true);
                        let connection = ControlConnection::new(
                            peer,
                            stream,
                            requests.clone(),
                            options.max_frame_bytes,
                            shutdown.clone(),
                        );
                        tokio::spawn(connection.run());
                    }
                    Err(err) => {
                        error!("control accept error: {}", err);
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!("control endpoint dropped; stopping accept loop");
                break;
            }
        }
    }
}

struct ControlConnection {
    peer: SocketAddr,
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    requests: mpsc::Sender<Request>,
    max_frame_bytes: usize,
    shutdown: watch::Receiver<()>,
}

impl ControlConnection {
    fn new(
        peer: SocketAddr,
        stream: TcpStream,
        requests: mpsc::Sender<Request>,
        max_frame_bytes: usize,
        shutdown: watch::Receiver<()>,
    ) -> Self {
        Self {
            peer,
            stream,
            read_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            requests,
            max_frame_bytes,
            shutdown,
        }
    }

    async fn run(mut self) {
        if let Err(err) = self.run_inner().await {
            warn!("control connection {} error: {}", self.peer, err);
        }
        trace!("control connection {} closed", self.peer);
    }

    async fn run_inner(&mut self) -> Result<(), TransportError> {
        loop {
            let Some(frame) = self.read_frame().await? else {
                return Ok(());
            };
            let text = frame.into_text()?;

            let (reply_tx, reply_rx) = oneshot::channel();
            let request = Request {
                peer: self.peer,
                text,
                reply: reply_tx,
            };
            if self.requests.send(request).await.is_err() {
                return Ok(());
            }

            // One request, one reply: the next frame stays buffered until the
            // relay has answered (or released) this one.
            let reply = tokio::select! {
                reply = reply_rx => reply,
                _ = self.shutdown.changed() => return Ok(()),
            };

            if let Ok(Some(text)) = reply {
                self.write_buf.clear();
                frame::encode_frame(
                    &Frame::single(text),
                    &mut self.write_buf,
                    self.max_frame_bytes,
                )?;
                self.stream.write_all(&self.write_buf).await?;
                self.stream.flush().await?;
            }
        }
    }

    /// `Ok(None)` on clean EOF or endpoint shutdown.
    async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            let decoded = frame::try_decode_frame(&mut self.read_buf, self.max_frame_bytes)?;
            if let Some(frame) = decoded {
                return Ok(Some(frame));
            }

            tokio::select! {
                read_result = self.stream.read_buf(&mut self.read_buf) => {
                    if read_result? == 0 {
                        return Ok(None);
                    }
                }
                _ = self.shutdown.changed() => return Ok(None),
            }
        }
    }
}
