use std::time::Duration;

use crossbeam::channel::{RecvError, after};

/// Pause between two completion checks of a background job.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// The error enum for Ticker errors.
#[derive(Debug, thiserror::Error)]
pub enum TickerError {
    /// The timer channel was disconnected before firing.
    #[error("ticker disconnected: `{0}`")]
    Disconnected(#[from] RecvError),
}

/// The Ticker trait paces the polling of background jobs.
pub trait Ticker {
    /// Blocks until the next tick fires. Returns an error if the timer channel is closed.
    fn next(&self) -> Result<(), TickerError>;
}

/// A ticker firing once per interval, backed by a crossbeam timer channel.
#[derive(Debug, Clone)]
pub struct CrossBeamTicker {
    /// The duration between ticks.
    duration: Duration,
}

impl CrossBeamTicker {
    /// Creates a ticker firing every `duration`.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Default for CrossBeamTicker {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Ticker for CrossBeamTicker {
    fn next(&self) -> Result<(), TickerError> {
        after(self.duration).recv()?;
        Ok(())
    }
}
