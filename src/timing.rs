//! Replay pacing based on captured upstream latency

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::exchange::Exchange;
use crate::sink::ResponseSink;

/// Milliseconds since the Unix epoch
#[must_use]
pub fn now_millis() -> i64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

/// Replay speed policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Speed {
    /// Deliver immediately, no timer
    Fastest,
    /// Twice the original latency
    Lower,
    /// Four times the original latency
    Lowest,
    /// Half the original latency
    Fast,
    /// Original latency; any unrecognized setting resolves here
    Original,
}

impl Speed {
    /// Resolve a configured speed name
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "fastest" => Self::Fastest,
            "lower" => Self::Lower,
            "lowest" => Self::Lowest,
            "fast" => Self::Fast,
            _ => Self::Original,
        }
    }

    /// Configuration name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fastest => "fastest",
            Self::Lower => "lower",
            Self::Lowest => "lowest",
            Self::Fast => "fast",
            Self::Original => "original",
        }
    }

    /// Latency multiplier, `None` for immediate delivery
    #[must_use]
    pub fn multiplier(self) -> Option<f64> {
        match self {
            Self::Fastest => None,
            Self::Lower => Some(2.0),
            Self::Lowest => Some(4.0),
            Self::Fast => Some(0.5),
            Self::Original => Some(1.0),
        }
    }
}

impl From<String> for Speed {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for Speed {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<Speed> for String {
    fn from(speed: Speed) -> Self {
        speed.as_str().to_string()
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Original capture window plus the moment the replay began (all ms since epoch)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFrame {
    /// Upstream call issued
    pub original_start: i64,
    /// Upstream response completed
    pub original_end: i64,
    /// Replay of this request began
    pub replay_start: i64,
}

impl TimeFrame {
    /// Frame for replaying `exchange` starting at `replay_start`
    #[must_use]
    pub fn for_exchange(exchange: &Exchange, replay_start: i64) -> Self {
        Self {
            original_start: exchange.start,
            original_end: exchange.end,
            replay_start,
        }
    }

    /// Remaining delay before delivery, evaluated at `now`.
    ///
    /// Returns `None` for [`Speed::Fastest`]. Time already spent since
    /// `replay_start` is subtracted from the original duration before the
    /// speed multiplier applies; negative results clamp to zero.
    #[must_use]
    pub fn delay(&self, speed: Speed, now: i64) -> Option<Duration> {
        let multiplier = speed.multiplier()?;

        let original = self.original_end.saturating_sub(self.original_start);
        let elapsed = now.saturating_sub(self.replay_start);
        let base = original.saturating_sub(elapsed);

        let scaled_ms = base as f64 * multiplier;
        if scaled_ms <= 0.0 {
            return Some(Duration::ZERO);
        }
        Some(Duration::from_secs_f64(scaled_ms / 1000.0))
    }
}

/// How a replayed body was handed to the sink
#[derive(Debug)]
pub enum Delivery {
    /// Body written synchronously
    Immediate,
    /// Body will be written by a timer task
    Scheduled {
        /// Delay the timer was armed with
        delay: Duration,
        /// Timer task
        handle: JoinHandle<()>,
    },
}

impl Delivery {
    /// Whether the body was written without a timer
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate)
    }

    /// Armed delay, zero for immediate delivery
    #[must_use]
    pub fn delay(&self) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Scheduled { delay, .. } => *delay,
        }
    }

    /// Wait until the body has been written
    pub async fn completed(self) {
        if let Self::Scheduled { handle, .. } = self {
            if let Err(e) = handle.await {
                warn!("Delayed delivery task failed: {}", e);
            }
        }
    }
}

/// Delivers replayed bodies with simulated upstream latency
#[derive(Debug, Clone, Default)]
pub struct TimingSimulator {
    runtime: Option<Handle>,
}

impl TimingSimulator {
    /// Create a simulator that schedules on the ambient tokio runtime
    #[must_use]
    pub fn new() -> Self {
        Self {
            runtime: Handle::try_current().ok(),
        }
    }

    /// Create a simulator that falls back to `runtime` when called outside
    /// any runtime
    #[must_use]
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            runtime: Some(runtime),
        }
    }

    /// Write `body` to `sink` after the delay implied by `speed` and `frame`.
    ///
    /// A zero delay writes inline. Timers are spawned on the calling
    /// runtime when there is one. Scheduled deliveries always fire; there
    /// is no cancellation.
    pub fn deliver<S: ResponseSink>(
        &self,
        speed: Speed,
        body: Bytes,
        sink: S,
        frame: TimeFrame,
    ) -> Delivery {
        let Some(delay) = frame.delay(speed, now_millis()) else {
            debug!("Response instant (fastest), {} bytes", body.len());
            sink.end(body);
            return Delivery::Immediate;
        };

        if delay.is_zero() {
            debug!("Response instant (original latency already elapsed)");
            sink.end(body);
            return Delivery::Immediate;
        }

        // The runtime current at construction may have shut down since.
        let Some(runtime) = Handle::try_current().ok().or_else(|| self.runtime.clone()) else {
            warn!(
                "No async runtime for delayed delivery, responding immediately (wanted {:?})",
                delay
            );
            sink.end(body);
            return Delivery::Immediate;
        };

        debug!(
            "Response in {:?} ({} delay), original {} ms",
            delay,
            speed,
            frame.original_end.saturating_sub(frame.original_start)
        );

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            sink.end(body);
        });

        Delivery::Scheduled { delay, handle }
    }
}
