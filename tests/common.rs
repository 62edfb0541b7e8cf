#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;

use fanout::config::Config;
use fanout::core::{Announcement, RelayError};
use fanout::net::{Requester, SubscriberClient};
use fanout::RelayServer;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Topic used only to detect that a subscriber's prefixes are live.
pub const SYNC_TOPIC: &str = "__sync";

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        fanout::logging::init_logging_with("warn");
    });
}

pub struct TestRelay {
    pub control: SocketAddr,
    pub broadcast: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<(), RelayError>>,
}

impl TestRelay {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        timeout(Duration::from_secs(2), self.handle)
            .await
            .expect("relay did not stop")
            .expect("relay task panicked")
            .expect("relay loop failed");
    }
}

/// Defaults, except for ephemeral loopback ports.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.address = "127.0.0.1".to_string();
    config.server.control_port = 0;
    config.server.broadcast_port = 0;
    config
}

/// Start a relay on ephemeral loopback ports.
pub async fn start_relay(reply_on_rejected: bool) -> TestRelay {
    let mut config = test_config();
    config.relay.reply_on_rejected = reply_on_rejected;
    start_relay_with(&config).await
}

pub async fn start_relay_with(config: &Config) -> TestRelay {
    init_logging();

    let mut server = RelayServer::bind(config).await.expect("bind relay");
    let control = server.control_addr();
    let broadcast = server.broadcast_addr();

    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { server.run_until(rx).await });

    TestRelay {
        control,
        broadcast,
        shutdown,
        handle,
    }
}

/// Connect a subscriber and wait until its subscriptions are in effect.
///
/// Subscriptions carry no acknowledgement, so this keeps announcing on
/// [`SYNC_TOPIC`] until one comes back. Prefixes are applied in order, so a
/// delivered sync message means every earlier prefix is live too.
pub async fn subscribe_synced(relay: &TestRelay, prefixes: &[&str]) -> SubscriberClient {
    let mut subscriber = SubscriberClient::connect(relay.broadcast)
        .await
        .expect("connect subscriber");
    for prefix in prefixes {
        subscriber.subscribe(prefix).await.expect("subscribe");
    }
    subscriber.subscribe(SYNC_TOPIC).await.expect("subscribe sync");

    let mut requester = Requester::connect(relay.control)
        .await
        .expect("connect requester");
    for _ in 0..100 {
        let reply = requester
            .request(&format!("announce {SYNC_TOPIC}!sync"))
            .await
            .expect("sync announce");
        assert_eq!(reply, "OK");

        if let Ok(Ok(Some(a))) = timeout(Duration::from_millis(50), subscriber.recv()).await {
            if a.topic == SYNC_TOPIC {
                return subscriber;
            }
        }
    }
    panic!("subscription never became active");
}

/// Next broadcast that is not a sync message.
pub async fn next_announcement(subscriber: &mut SubscriberClient) -> Announcement {
    loop {
        let received = timeout(Duration::from_secs(2), subscriber.recv())
            .await
            .expect("timed out waiting for broadcast")
            .expect("broadcast stream failed")
            .expect("relay closed the broadcast stream");
        if received.topic != SYNC_TOPIC {
            return received;
        }
    }
}
