//! # Watermarks
//!
//! A [`Watermark`] asserts that no element with an earlier event time is still
//! expected. Windows fire once the watermark passes their end plus the
//! allowed lateness.
//!
//! Watermarks never move backwards. A [`WatermarkGenerator`] observes event
//! times and reports a new watermark only when it advances:
//!
//! - [`MonotonicWatermarkGenerator`]: the largest event time seen so far.
//! - [`BoundedOutOfOrdernessGenerator`]: the largest event time seen minus a
//!   fixed bound, recomputed on every element.
//! - [`PeriodicWatermarkGenerator`]: the same bounded computation, published
//!   at most once per processing-time interval of an injected [`Clock`](crate::time::Clock).

use crate::time::{SharedClock, SystemClock};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A lower bound on the event time of future elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark {
  /// The asserted bound.
  pub timestamp: DateTime<Utc>,
}

impl Watermark {
  /// Creates a watermark at `timestamp`.
  pub fn new(timestamp: DateTime<Utc>) -> Self {
    Self { timestamp }
  }

  /// The initial watermark, before any element has been seen.
  pub fn min() -> Self {
    Self::new(DateTime::<Utc>::MIN_UTC)
  }

  /// The watermark that closes every window.
  pub fn max() -> Self {
    Self::new(DateTime::<Utc>::MAX_UTC)
  }

  /// Returns true for [`Watermark::max`].
  pub fn is_end_of_stream(&self) -> bool {
    self.timestamp == DateTime::<Utc>::MAX_UTC
  }

  /// Moves the watermark forward to `timestamp`. Returns false, leaving the
  /// watermark unchanged, when `timestamp` is not later.
  pub fn advance(&mut self, timestamp: DateTime<Utc>) -> bool {
    if timestamp > self.timestamp {
      self.timestamp = timestamp;
      true
    } else {
      false
    }
  }
}

impl fmt::Display for Watermark {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_end_of_stream() {
      write!(f, "Watermark(END)")
    } else {
      write!(f, "Watermark({})", self.timestamp.to_rfc3339())
    }
  }
}

/// Turns observed event times into watermarks.
pub trait WatermarkGenerator: Send {
  /// Observes an element. Returns the new watermark if it advanced.
  fn on_event(&mut self, timestamp: DateTime<Utc>) -> Option<Watermark>;

  /// Gives interval-driven generators a chance to publish. Returns a
  /// watermark to publish, if any.
  fn on_periodic_emit(&mut self) -> Option<Watermark>;

  /// The generator's current estimate. Interval-driven generators may
  /// report an estimate they have not published yet; operators act only on
  /// watermarks returned by `on_event` and `on_periodic_emit`.
  fn current_watermark(&self) -> Watermark;

  /// The final watermark once input is exhausted.
  fn on_end_of_stream(&mut self) -> Watermark {
    Watermark::max()
  }
}

pub(crate) fn saturating_chrono(duration: Duration) -> ChronoDuration {
  ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

fn bounded(max_seen: DateTime<Utc>, bound: ChronoDuration) -> DateTime<Utc> {
  max_seen
    .checked_sub_signed(bound)
    .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Watermark equal to the largest event time seen.
#[derive(Debug, Clone, Default)]
pub struct MonotonicWatermarkGenerator {
  current: Option<Watermark>,
}

impl MonotonicWatermarkGenerator {
  /// Creates a generator at [`Watermark::min`].
  pub fn new() -> Self {
    Self::default()
  }
}

impl WatermarkGenerator for MonotonicWatermarkGenerator {
  fn on_event(&mut self, timestamp: DateTime<Utc>) -> Option<Watermark> {
    let mut watermark = self.current_watermark();
    if watermark.advance(timestamp) {
      self.current = Some(watermark);
      Some(watermark)
    } else {
      None
    }
  }

  fn on_periodic_emit(&mut self) -> Option<Watermark> {
    None
  }

  fn current_watermark(&self) -> Watermark {
    self.current.unwrap_or_else(Watermark::min)
  }
}

/// Watermark trailing the largest event time seen by a fixed bound.
#[derive(Debug, Clone)]
pub struct BoundedOutOfOrdernessGenerator {
  max_out_of_orderness: ChronoDuration,
  max_seen: Option<DateTime<Utc>>,
  current: Watermark,
}

impl BoundedOutOfOrdernessGenerator {
  /// Creates a generator tolerating `max_out_of_orderness` of disorder.
  pub fn new(max_out_of_orderness: Duration) -> Self {
    Self {
      max_out_of_orderness: saturating_chrono(max_out_of_orderness),
      max_seen: None,
      current: Watermark::min(),
    }
  }
}

impl WatermarkGenerator for BoundedOutOfOrdernessGenerator {
  fn on_event(&mut self, timestamp: DateTime<Utc>) -> Option<Watermark> {
    let max_seen = self.max_seen.map_or(timestamp, |seen| seen.max(timestamp));
    self.max_seen = Some(max_seen);
    self
      .current
      .advance(bounded(max_seen, self.max_out_of_orderness))
      .then_some(self.current)
  }

  fn on_periodic_emit(&mut self) -> Option<Watermark> {
    self.max_seen.map(|_| self.current)
  }

  fn current_watermark(&self) -> Watermark {
    self.current
  }
}

/// Bounded out-of-orderness watermarks, published at most once per
/// processing-time `interval`.
///
/// Elements only update the candidate. [`on_periodic_emit`] publishes it when
/// the clock shows that `interval` has elapsed since the last publication.
/// The first publication happens on the first call.
///
/// [`on_periodic_emit`]: WatermarkGenerator::on_periodic_emit
#[derive(Debug, Clone)]
pub struct PeriodicWatermarkGenerator {
  max_out_of_orderness: ChronoDuration,
  interval: ChronoDuration,
  clock: SharedClock,
  max_seen: Option<DateTime<Utc>>,
  last_emit: Option<DateTime<Utc>>,
  current: Watermark,
}

impl PeriodicWatermarkGenerator {
  /// Creates a generator reading processing time from the system clock.
  pub fn new(max_out_of_orderness: Duration, interval: Duration) -> Self {
    Self::with_clock(max_out_of_orderness, interval, Arc::new(SystemClock))
  }

  /// Creates a generator reading processing time from `clock`.
  pub fn with_clock(max_out_of_orderness: Duration, interval: Duration, clock: SharedClock) -> Self {
    Self {
      max_out_of_orderness: saturating_chrono(max_out_of_orderness),
      interval: saturating_chrono(interval),
      clock,
      max_seen: None,
      last_emit: None,
      current: Watermark::min(),
    }
  }

  /// The candidate watermark, published or not.
  pub fn pending_watermark(&self) -> Watermark {
    self
      .max_seen
      .map(|seen| Watermark::new(bounded(seen, self.max_out_of_orderness)))
      .unwrap_or_else(Watermark::min)
  }
}

impl WatermarkGenerator for PeriodicWatermarkGenerator {
  fn on_event(&mut self, timestamp: DateTime<Utc>) -> Option<Watermark> {
    self.max_seen = Some(self.max_seen.map_or(timestamp, |seen| seen.max(timestamp)));
    None
  }

  fn on_periodic_emit(&mut self) -> Option<Watermark> {
    let now = self.clock.now();
    let due = self
      .last_emit
      .is_none_or(|last| now.signed_duration_since(last) >= self.interval);
    if !due {
      return None;
    }
    self.last_emit = Some(now);
    let pending = self.pending_watermark();
    self.current.advance(pending.timestamp).then_some(self.current)
  }

  fn current_watermark(&self) -> Watermark {
    self.pending_watermark()
  }
}

/// Factory for a user-supplied generator.
pub type GeneratorFactory = Arc<dyn Fn() -> Box<dyn WatermarkGenerator> + Send + Sync>;

/// Which [`WatermarkGenerator`] a window operator creates.
#[derive(Clone, Default)]
pub enum WatermarkStrategy {
  /// [`MonotonicWatermarkGenerator`].
  #[default]
  Monotonic,
  /// [`BoundedOutOfOrdernessGenerator`] with the given bound.
  BoundedOutOfOrderness(Duration),
  /// [`PeriodicWatermarkGenerator`] driven by the operator's clock.
  Periodic {
    /// Tolerated disorder.
    max_out_of_orderness: Duration,
    /// Minimum processing time between publications.
    interval: Duration,
  },
  /// A custom generator, created fresh for every operator.
  Custom(GeneratorFactory),
}

impl WatermarkStrategy {
  /// Creates the generator, giving periodic strategies `clock`.
  pub fn create(&self, clock: SharedClock) -> Box<dyn WatermarkGenerator> {
    match self {
      WatermarkStrategy::Monotonic => Box::new(MonotonicWatermarkGenerator::new()),
      WatermarkStrategy::BoundedOutOfOrderness(bound) => {
        Box::new(BoundedOutOfOrdernessGenerator::new(*bound))
      }
      WatermarkStrategy::Periodic {
        max_out_of_orderness,
        interval,
      } => Box::new(PeriodicWatermarkGenerator::with_clock(
        *max_out_of_orderness,
        *interval,
        clock,
      )),
      WatermarkStrategy::Custom(factory) => factory(),
    }
  }
}

impl fmt::Debug for WatermarkStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WatermarkStrategy::Monotonic => f.write_str("Monotonic"),
      WatermarkStrategy::BoundedOutOfOrderness(bound) => {
        f.debug_tuple("BoundedOutOfOrderness").field(bound).finish()
      }
      WatermarkStrategy::Periodic {
        max_out_of_orderness,
        interval,
      } => f
        .debug_struct("Periodic")
        .field("max_out_of_orderness", max_out_of_orderness)
        .field("interval", interval)
        .finish(),
      WatermarkStrategy::Custom(_) => f.write_str("Custom"),
    }
  }
}
