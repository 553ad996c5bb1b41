//! Timing constants and async timeout helpers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Default timeout for dialing and single operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for a complete handshake exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between heartbeat packets on an idle connection.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// How long shutdown waits for peer tasks to finish.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `future`, mapping elapsed time to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
