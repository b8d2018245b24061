//! Delivery readiness with simulated propagation latency

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::{debug, error};

use crate::config::LatencyConfig;
use crate::error::SqsError;
use crate::message::MessageRecord;

/// Parsed latency bounds in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatencyRange {
    Zero,
    Fixed(i64),
    Uniform { min: i64, max: i64 },
}

impl LatencyRange {
    fn parse(config: &LatencyConfig) -> Result<Self, SqsError> {
        let (Some(min), Some(max)) = (config.min.as_deref(), config.max.as_deref()) else {
            return Ok(Self::Zero);
        };
        let min = parse_millis("min", min)?;
        let max = parse_millis("max", max)?;
        if min == max {
            Ok(if min == 0 { Self::Zero } else { Self::Fixed(min) })
        } else if min < max {
            Ok(Self::Uniform { min, max })
        } else {
            Err(SqsError::Configuration(format!(
                "latency min {min}ms is greater than max {max}ms"
            )))
        }
    }
}

fn parse_millis(which: &str, raw: &str) -> Result<i64, SqsError> {
    raw.trim()
        .parse::<u32>()
        .map(i64::from)
        .map_err(|_| SqsError::Configuration(format!("Invalid value for latency {which}: {raw}")))
}

/// Decides when a message may be handed to a consumer.
///
/// Each message gets a latency sample when it is enqueued; from then on the
/// message is ready once `now >= sent_time + latency`. The random source is
/// injected so tests can pin it with a seeded generator.
pub struct VisibilityClock {
    range: Result<LatencyRange, SqsError>,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl std::fmt::Debug for VisibilityClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityClock")
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

impl Default for VisibilityClock {
    fn default() -> Self {
        Self::new(&LatencyConfig::default())
    }
}

impl VisibilityClock {
    pub fn new(config: &LatencyConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: &LatencyConfig, rng: impl RngCore + Send + 'static) -> Self {
        let range = LatencyRange::parse(config);
        if let Err(e) = &range {
            error!(error = %e, "Latency bounds are malformed, messages will be ready immediately");
        }
        Self {
            range,
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Draw a latency, failing with a configuration error on bad bounds
    pub fn try_sample(&self) -> Result<Duration, SqsError> {
        let millis = match self.range.as_ref().map_err(Clone::clone)? {
            LatencyRange::Zero => 0,
            LatencyRange::Fixed(ms) => *ms,
            LatencyRange::Uniform { min, max } => self.rng.lock().gen_range(*min..*max),
        };
        Ok(Duration::milliseconds(millis))
    }

    /// Draw a latency; bad configuration fails open to zero
    pub fn sample(&self) -> Duration {
        match self.try_sample() {
            Ok(latency) => {
                debug!(latency_ms = latency.num_milliseconds(), "Sampled message latency");
                latency
            }
            Err(e) => {
                error!(error = %e, "Falling back to zero latency");
                Duration::zero()
            }
        }
    }

    pub fn is_ready(&self, message: &MessageRecord, now: DateTime<Utc>) -> bool {
        is_ready(message, now)
    }
}

/// `now >= sent_time + latency`; never flips back once true
pub fn is_ready(message: &MessageRecord, now: DateTime<Utc>) -> bool {
    now >= message.ready_at()
}
