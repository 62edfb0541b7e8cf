//! Publish side of the broadcast channel.
//!
//! Subscribers connect over TCP and send subscription frames
//! (`0x01 <prefix>` / `0x00 <prefix>`). A published message is encoded once as
//! a two-part `[topic, content]` frame and queued to every subscriber holding a
//! prefix of the topic. Delivery is fire-and-forget: a subscriber whose queue
//! is full or gone simply misses the message.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::metrics::RelayStats;
use crate::net::error::TransportError;
use crate::net::frame::{self, Frame, SUBSCRIBE, UNSUBSCRIBE};
use crate::net::EndpointOptions;

const INITIAL_BUFFER_SIZE: usize = 4 * 1024;

/// One-way publish contract the relay loop is written against.
pub trait BroadcastChannel: Send {
    /// Publish `content` under `topic`. Returns how many subscribers the
    /// message was queued to.
    fn publish(&self, topic: &str, content: &str) -> Result<usize, TransportError>;

    /// Whether `(topic, content)` can be published at all. Checked before the
    /// requester is told `"OK"`.
    fn fits(&self, _topic: &str, _content: &str) -> bool {
        true
    }
}

/// Prefix filters held by one subscriber.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Subscriptions {
    prefixes: BTreeSet<String>,
}

impl Subscriptions {
    pub fn subscribe(&mut self, prefix: impl Into<String>) -> bool {
        self.prefixes.insert(prefix.into())
    }

    pub fn unsubscribe(&mut self, prefix: &str) -> bool {
        self.prefixes.remove(prefix)
    }

    /// True if any held prefix is a prefix of `topic`. The empty prefix
    /// matches everything.
    pub fn matches(&self, topic: &str) -> bool {
        self.prefixes.iter().any(|p| topic.starts_with(p.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Apply one subscription control payload. Returns `false` if the
    /// payload is not a subscription message.
    pub fn apply(&mut self, payload: &[u8]) -> bool {
        let Some((&op, prefix)) = payload.split_first() else {
            return false;
        };
        let prefix = String::from_utf8_lossy(prefix);
        match op {
            SUBSCRIBE => {
                self.subscribe(prefix.into_owned());
                true
            }
            UNSUBSCRIBE => {
                self.unsubscribe(&prefix);
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
struct SubscriberHandle {
    peer: SocketAddr,
    subscriptions: Subscriptions,
    tx: mpsc::Sender<Bytes>,
}

type SubscriberTable = DashMap<Uuid, SubscriberHandle>;

/// TCP implementation of [`BroadcastChannel`].
#[derive(Debug)]
pub struct BroadcastEndpoint {
    local_addr: SocketAddr,
    subscribers: Arc<SubscriberTable>,
    stats: Arc<RelayStats>,
    max_frame_bytes: usize,
    _shutdown: watch::Sender<()>,
}

impl BroadcastEndpoint {
    pub async fn bind(
        addr: &str,
        options: EndpointOptions,
        stats: Arc<RelayStats>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("broadcast endpoint listening on {}", local_addr);

        let subscribers = Arc::new(SubscriberTable::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&subscribers),
            options,
            shutdown_rx,
        ));

        Ok(Self {
            local_addr,
            subscribers,
            stats,
            max_frame_bytes: options.max_frame_bytes,
            _shutdown: shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Publish an already-ordered list of parts; the first part is the topic
    /// subscribers filter on.
    pub fn publish_parts(&self, parts: &[&str]) -> Result<usize, TransportError> {
        let Some(topic) = parts.first() else {
            return Err(frame::FrameEncodeError::Empty.into());
        };
        let frame = Frame {
            parts: parts
                .iter()
                .map(|p| Bytes::copy_from_slice(p.as_bytes()))
                .collect(),
        };
        let wire = frame::encode_to_bytes(&frame, self.max_frame_bytes)?;

        let mut delivered = 0usize;
        for entry in self.subscribers.iter() {
            let handle = entry.value();
            if !handle.subscriptions.matches(topic) {
                continue;
            }
            match handle.tx.try_send(wire.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    self.stats.inc_dropped(1);
                    debug!(peer = %handle.peer, topic = %topic, "delivery dropped: {}", err);
                }
            }
        }
        self.stats.inc_enqueued(delivered as u64);
        Ok(delivered)
    }
}

impl BroadcastChannel for BroadcastEndpoint {
    fn publish(&self, topic: &str, content: &str) -> Result<usize, TransportError> {
        self.publish_parts(&[topic, content])
    }

    fn fits(&self, topic: &str, content: &str) -> bool {
        frame::body_len_for([topic.len(), content.len()])
            .is_some_and(|len| len <= self.max_frame_bytes)
    }
}

async fn accept_loop(
    listener: TcpListener,
    subscribers: Arc<SubscriberTable>,
    options: EndpointOptions,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        tokio::spawn(serve_subscriber(
                            stream,
                            peer,
                            Arc::clone(&subscribers),
                            options,
                            shutdown.clone(),
                        ));
                    }
                    Err(err) => {
                        error!("broadcast accept error: {}", err);
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!("broadcast endpoint dropped; stopping accept loop");
                break;
            }
        }
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    subscribers: Arc<SubscriberTable>,
    options: EndpointOptions,
    mut shutdown: watch::Receiver<()>,
) {
    let id = Uuid::new_v4();
    let (mut reader, writer) = stream.into_split();
    let tx = spawn_connection_writer(writer, options.queue_depth);
    subscribers.insert(
        id,
        SubscriberHandle {
            peer,
            subscriptions: Subscriptions::default(),
            tx,
        },
    );
    debug!(%id, "subscriber connected from {}", peer);

    let result =
        read_subscriptions(&mut reader, id, peer, &subscribers, &options, &mut shutdown).await;
    if let Err(err) = result {
        warn!(%id, "subscriber {} error: {}", peer, err);
    }
    // Dropping the handle closes the writer's channel, which ends its task.
    subscribers.remove(&id);
    debug!(%id, "subscriber {} disconnected", peer);
}

async fn read_subscriptions<R>(
    reader: &mut R,
    id: Uuid,
    peer: SocketAddr,
    subscribers: &SubscriberTable,
    options: &EndpointOptions,
    shutdown: &mut watch::Receiver<()>,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut read_buf = BytesMut::with_capacity(INITIAL_BUFFER_SIZE);
    loop {
        while let Some(frame) = frame::try_decode_frame(&mut read_buf, options.max_frame_bytes)? {
            for part in &frame.parts {
                let applied = match subscribers.get_mut(&id) {
                    Some(mut handle) => handle.subscriptions.apply(part),
                    None => return Ok(()),
                };
                if applied {
                    trace!(%id, "subscription updated");
                } else {
                    warn!(%id, "ignoring non-subscription frame from {}", peer);
                }
            }
        }

        tokio::select! {
            read_result = reader.read_buf(&mut read_buf) => {
                if read_result? == 0 {
                    return Ok(());
                }
            }
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

/// Spawn a task that owns the write half of a connection and writes every
/// pre-encoded frame it receives, in order. The task ends when all senders
/// are dropped or the peer stops reading.
pub fn spawn_connection_writer<W>(writer: W, capacity: usize) -> mpsc::Sender<Bytes>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Bytes>(capacity.max(1));
    tokio::spawn(async move {
        let mut writer = BufWriter::new(writer);
        while let Some(frame) = rx.recv().await {
            if let Err(err) = writer.write_all(&frame).await {
                trace!("subscriber write failed: {}", err);
                return;
            }
            // Coalesce whatever is already queued into one flush.
            while let Ok(frame) = rx.try_recv() {
                if writer.write_all(&frame).await.is_err() {
                    return;
                }
            }
            if writer.flush().await.is_err() {
                return;
            }
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching() {
        let mut subs = Subscriptions::default();
        assert!(!subs.matches("kittens"));

        subs.subscribe("kittens");
        assert!(subs.matches("kittens"));
        assert!(subs.matches("kittens/small"));
        assert!(!subs.matches("kitten"));
        assert!(!subs.matches("puppies"));

        subs.subscribe("pup");
        assert!(subs.matches("puppies"));

        subs.unsubscribe("kittens");
        assert!(!subs.matches("kittens"));
        assert!(subs.matches("puppies"));
    }

    #[test]
    fn empty_prefix_matches_everything() {
        let mut subs = Subscriptions::default();
        subs.subscribe("");
        assert!(subs.matches("anything"));
        assert!(subs.matches(""));
    }

    #[test]
    fn apply_control_payloads() {
        let mut subs = Subscriptions::default();
        assert!(subs.apply(b"\x01kit"));
        assert!(subs.matches("kittens"));
        assert!(subs.apply(b"\x00kit"));
        assert!(subs.is_empty());
        assert!(!subs.apply(b""));
        assert!(!subs.apply(b"\x07junk"));
    }

    #[tokio::test]
    async fn writer_preserves_order() {
        let (client, mut server) = tokio::io::duplex(1024);
        let tx = spawn_connection_writer(client, 16);

        tx.send(Bytes::from_static(b"\xAA")).await.unwrap();
        tx.send(Bytes::from_static(b"\xBB\xCC")).await.unwrap();

        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0xAA, 0xBB, 0xCC]);
    }
}
