use thiserror::Error;

use crate::net::TransportError;

/// Failures that escape the relay loop. Parse and validation problems never
/// get here; they are answered on the control channel.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind {endpoint} endpoint: {source}")]
    Bind {
        endpoint: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("control receive failed: {0}")]
    Receive(#[source] TransportError),

    #[error("control reply failed: {0}")]
    Reply(#[source] TransportError),

    #[error("broadcast publish failed: {0}")]
    Publish(#[source] TransportError),
}
