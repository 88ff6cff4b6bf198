use std::time::Duration;

use async_trait::async_trait;

use super::ModemError;

/// Command capability consumed from the port I/O layer.
///
/// Implementations own serial framing and per-command write/read plumbing.
/// This core only sees a textual command going out and a response (or typed
/// failure) coming back. Cancellation of an in-flight send is cooperative:
/// dropping the returned future abandons the exchange.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Send a command and wait up to `timeout` for its response.
    ///
    /// Transport-level expiry surfaces as [`ModemError::Timeout`]; a device
    /// rejection or unparseable reply as [`ModemError::ProtocolFailure`].
    ///
    /// # Errors
    /// Returns error if the device rejects the command, the response cannot
    /// be parsed, or the timeout elapses.
    async fn send(&self, command: &str, timeout: Duration) -> Result<String, ModemError>;

    /// Send a command without waiting for, or caring about, its outcome.
    ///
    /// Used for best-effort resets where the device state is already
    /// suspect and a failure carries no information.
    async fn send_ignoring_reply(&self, command: &str);
}
