//! The relay loop.
//!
//! One request is handled completely (parse, dispatch, reply, publish) before
//! the next is received. The loop owns both endpoints; nothing else touches
//! them.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::command::{parse, ControlCommand};
use crate::core::dispatch::{dispatch, Outcome, REPLY_REJECTED};
use crate::core::error::RelayError;
use crate::metrics::RelayStats;
use crate::net::{
    BroadcastChannel, BroadcastEndpoint, ControlChannel, ControlEndpoint, TransportError,
};

pub struct RelayServer<C, B> {
    control: C,
    broadcast: B,
    stats: Arc<RelayStats>,
    reply_on_rejected: bool,
}

impl RelayServer<ControlEndpoint, BroadcastEndpoint> {
    /// Bind both TCP endpoints. Either failing is fatal; nothing is retried.
    pub async fn bind(config: &Config) -> Result<Self, RelayError> {
        let stats = Arc::new(RelayStats::new());

        let control =
            ControlEndpoint::bind(&config.server.control_addr(), config.control_options())
                .await
                .map_err(|source| RelayError::Bind {
                    endpoint: "control",
                    source,
                })?;

        let broadcast = BroadcastEndpoint::bind(
            &config.server.broadcast_addr(),
            config.broadcast_options(),
            Arc::clone(&stats),
        )
        .await
        .map_err(|source| RelayError::Bind {
            endpoint: "broadcast",
            source,
        })?;

        Ok(Self::new(
            control,
            broadcast,
            stats,
            config.relay.reply_on_rejected,
        ))
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control.local_addr()
    }

    pub fn broadcast_addr(&self) -> SocketAddr {
        self.broadcast.local_addr()
    }
}

impl<C, B> RelayServer<C, B>
where
    C: ControlChannel,
    B: BroadcastChannel,
{
    pub fn new(
        control: C,
        broadcast: B,
        stats: Arc<RelayStats>,
        reply_on_rejected: bool,
    ) -> Self {
        Self {
            control,
            broadcast,
            stats,
            reply_on_rejected,
        }
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Serve forever. Returns only on a transport failure.
    pub async fn run(&mut self) -> Result<(), RelayError> {
        loop {
            self.handle_next().await?;
        }
    }

    /// Serve until `shutdown` flips (or its sender is dropped). A request
    /// already being handled is finished first.
    pub async fn run_until(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), RelayError> {
        loop {
            let raw = tokio::select! {
                received = self.control.receive() => received.map_err(RelayError::Receive)?,
                _ = shutdown.changed() => {
                    info!("shutdown signal received; stopping relay loop");
                    break;
                }
            };
            self.handle(raw).await?;
        }

        debug!("relay counters at shutdown:\n{}", self.stats.render());
        Ok(())
    }

    /// Receive and fully handle one control message.
    pub async fn handle_next(&mut self) -> Result<(), RelayError> {
        let raw = self.control.receive().await.map_err(RelayError::Receive)?;
        self.handle(raw).await
    }

    async fn handle(&mut self, raw: String) -> Result<(), RelayError> {
        self.stats.inc_requests();

        let command = parse(&raw);
        debug!(kind = command.kind(), len = raw.len(), "request parsed");
        match &command {
            ControlCommand::Ping => {
                self.stats.inc_pings();
                info!("received: {}", raw);
            }
            ControlCommand::Announce { topic, content } => {
                info!(%topic, %content, "received announcement");
            }
            ControlCommand::Unknown { .. } => {
                self.stats.inc_unknown();
                info!("invalid request: {}", raw);
            }
        }

        let mut outcome = dispatch(command);

        // Lossy decoding can grow the content, so an accepted announcement
        // may still not fit in a broadcast frame.
        if let Some(announcement) = &outcome.broadcast {
            if !self.broadcast.fits(&announcement.topic, &announcement.content) {
                warn!(
                    topic = %announcement.topic,
                    content_len = announcement.content.len(),
                    "announcement too large to broadcast"
                );
                outcome = Outcome::default();
            }
        }

        match outcome.reply {
            Some(reply) => {
                self.control
                    .send(reply.clone())
                    .await
                    .map_err(RelayError::Reply)?;
                info!("sent: {}", reply);
            }
            None => {
                self.stats.inc_rejected();
                if self.reply_on_rejected {
                    self.control
                        .send(REPLY_REJECTED.to_string())
                        .await
                        .map_err(RelayError::Reply)?;
                    warn!(len = raw.len(), "rejected announcement, replied {}", REPLY_REJECTED);
                } else {
                    self.control.skip_reply();
                    warn!(len = raw.len(), "rejected announcement silently");
                }
            }
        }

        if let Some(announcement) = outcome.broadcast {
            self.stats.inc_announced();
            match self
                .broadcast
                .publish(&announcement.topic, &announcement.content)
            {
                Ok(delivered) => {
                    self.stats.inc_published();
                    info!(
                        topic = %announcement.topic,
                        content = %announcement.content,
                        subscribers = delivered,
                        "published"
                    );
                }
                // Per-message encoding problems lose this broadcast only.
                Err(TransportError::FrameEncode(err)) => {
                    self.stats.inc_dropped(1);
                    warn!(topic = %announcement.topic, "broadcast dropped: {}", err);
                }
                Err(err) => return Err(RelayError::Publish(err)),
            }
        }

        Ok(())
    }
}
