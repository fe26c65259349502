//! The seam between a relay session and its upstream AI connection.

use super::{error::RelayError, protocol::SessionConfig};
use crate::config::ReconnectSettings;
use async_trait::async_trait;
use gemini_realtime::{LiveConnection, RawFrame, SetupAck};
use std::time::{Duration, Instant};

/// One bidirectional streaming connection to the AI backend.
///
/// All methods take `&self` so the two pumps of a session can share it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Stores the session settings used by every later [`Upstream::connect`].
    fn set_config(&self, config: SessionConfig) -> Result<(), RelayError>;

    /// Opens the transport and completes the setup handshake.
    async fn connect(&self) -> Result<SetupAck, RelayError>;

    fn is_connected(&self) -> bool;

    async fn send_audio(&self, data: &str) -> Result<(), RelayError>;

    async fn send_image(&self, data: &str) -> Result<(), RelayError>;

    /// Waits for the next inbound frame.
    async fn receive(&self) -> Result<RawFrame, RelayError>;

    /// Idempotent.
    async fn close(&self);
}

#[async_trait]
impl Upstream for LiveConnection {
    fn set_config(&self, config: SessionConfig) -> Result<(), RelayError> {
        Ok(self.set_setup(config.into())?)
    }

    async fn connect(&self) -> Result<SetupAck, RelayError> {
        Ok(LiveConnection::connect(self).await?)
    }

    fn is_connected(&self) -> bool {
        LiveConnection::is_connected(self)
    }

    async fn send_audio(&self, data: &str) -> Result<(), RelayError> {
        Ok(LiveConnection::send_audio(self, data).await?)
    }

    async fn send_image(&self, data: &str) -> Result<(), RelayError> {
        Ok(LiveConnection::send_image(self, data).await?)
    }

    async fn receive(&self) -> Result<RawFrame, RelayError> {
        Ok(LiveConnection::receive(self).await?)
    }

    async fn close(&self) {
        LiveConnection::close(self).await
    }
}

const FALLBACK_DELAY: Duration = Duration::from_secs(60 * 60);

/// Exponential backoff gate for lazy reconnects.
///
/// Reconnects are only attempted when audio arrives; this bounds how often
/// and how many times in a row that may fail.
#[derive(Debug)]
pub struct ReconnectPolicy {
    settings: ReconnectSettings,
    failures: u32,
    not_before: Option<Instant>,
}

impl ReconnectPolicy {
    pub fn new(settings: ReconnectSettings) -> Self {
        Self {
            settings,
            failures: 0,
            not_before: None,
        }
    }

    /// Whether a reconnect may be attempted at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|at| now >= at)
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.not_before = None;
    }

    /// Fails once the consecutive failure budget is spent.
    pub fn record_failure(&mut self, now: Instant) -> Result<(), RelayError> {
        self.failures += 1;
        if self.failures >= self.settings.max_attempts {
            return Err(RelayError::ReconnectExhausted(self.failures));
        }
        let delay = self
            .settings
            .base_delay
            .saturating_mul(1u32 << (self.failures - 1).min(16))
            .min(self.settings.max_delay);
        // Settings built outside `Config::from_env` are not bounded.
        self.not_before = now
            .checked_add(delay)
            .or_else(|| now.checked_add(FALLBACK_DELAY));
        Ok(())
    }
}
