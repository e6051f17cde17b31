//! Event-time windowing for record streams.
//!
//! # Overview
//!
//! [`window`] groups the records of a stream into bounded windows of event
//! time and emits each window as a [`WindowPane`] once the watermark says no
//! more of its records are expected.
//!
//! Per record the operator:
//!
//! 1. extracts the event time, falling back to the configured clock when the
//!    record has none ([`crate::time`]),
//! 2. assigns the record to its windows ([`WindowAssigner`]),
//! 3. checks lateness against the current watermark ([`LateDataHandler`]),
//! 4. feeds the event time to the [`WatermarkGenerator`] and fires every
//!    window whose end plus allowed lateness the watermark has passed.
//!
//! # Window lifecycle
//!
//! A window is [`WindowPhase::Accumulating`] while the watermark has not
//! passed `end + allowed_lateness`, [`WindowPhase::ReadyToFire`] once it has,
//! and [`WindowPhase::Closed`] after it fired. Windows fire in order of their
//! end boundary, not in arrival order. When input ends, all remaining windows
//! fire. A record is late when every window it belongs to is already past
//! accumulating; the [`LateDataPolicy`] decides what happens to it.
//!
//! # Window Types
//!
//! - [`TumblingWindowAssigner`]: fixed-size, non-overlapping windows
//! - [`SlidingWindowAssigner`]: fixed-size windows overlapping by the slide
//! - [`SessionWindowAssigner`]: gap-based windows, merged as records arrive
//!
//! # Example
//!
//! ```rust
//! use eventweave::record::Record;
//! use eventweave::stream::Stream;
//! use eventweave::window::{window, TumblingWindowAssigner, WindowConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> eventweave::error::StreamResult<()> {
//! let clicks = Stream::from_iter(vec![
//!   Record::builder().int("timestamp", 1_000).build(),
//!   Record::builder().int("timestamp", 7_000).build(),
//! ]);
//! let assigner = TumblingWindowAssigner::new(Duration::from_secs(5))?;
//! let mut panes = window(clicks, assigner, WindowConfig::default())?;
//!
//! let panes = panes.collect().await?;
//! assert_eq!(panes.len(), 2);
//! # Ok(())
//! # }
//! ```

use crate::aggregate::{AggregateSpec, aggregates};
use crate::error::{StreamError, StreamResult};
use crate::record::Record;
use crate::stream::{Pull, Stream, lock_state};
use crate::time::{
  Clock, FieldTimestamp, SharedClock, SharedExtractor, SystemClock, TimestampExtractor,
  event_time_or_now,
};
use crate::watermark::{Watermark, WatermarkGenerator, WatermarkStrategy, saturating_chrono};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Field holding the window start in [`WindowPane::aggregate`] results.
pub const WINDOW_START_FIELD: &str = "window_start";
/// Field holding the window end in [`WindowPane::aggregate`] results.
pub const WINDOW_END_FIELD: &str = "window_end";

/// Error type for window configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
  /// Invalid window configuration.
  #[error("invalid window config: {0}")]
  InvalidConfig(String),
}

impl From<WindowError> for StreamError {
  fn from(err: WindowError) -> Self {
    StreamError::configuration(err.to_string())
  }
}

/// Result type for window configuration.
pub type WindowResult<T> = Result<T, WindowError>;

fn positive_millis(duration: Duration, what: &str) -> WindowResult<i64> {
  let millis = i64::try_from(duration.as_millis())
    .map_err(|_| WindowError::InvalidConfig(format!("{what} is too large")))?;
  if millis <= 0 {
    return Err(WindowError::InvalidConfig(format!(
      "{what} must be at least one millisecond"
    )));
  }
  Ok(millis)
}

fn non_negative_millis(duration: Duration, what: &str) -> WindowResult<i64> {
  i64::try_from(duration.as_millis())
    .map_err(|_| WindowError::InvalidConfig(format!("{what} is too large")))
}

/// Floor of `millis` to the grid `offset + k * step`.
fn align(millis: i64, step: i64, offset: i64) -> i64 {
  millis.saturating_sub(millis.saturating_sub(offset).rem_euclid(step))
}

/// A time-based window `[start, end)`.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
  /// Start time of the window (inclusive).
  start: DateTime<Utc>,
  /// End time of the window (exclusive).
  end: DateTime<Utc>,
}

impl TimeWindow {
  /// Creates a new time window with the given start and end.
  pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
    Self { start, end }
  }

  fn from_millis(start: i64, end: i64) -> Option<Self> {
    Some(Self::new(
      DateTime::from_timestamp_millis(start)?,
      DateTime::from_timestamp_millis(end)?,
    ))
  }

  /// Returns the start time of the window.
  pub fn start(&self) -> DateTime<Utc> {
    self.start
  }

  /// Returns the end time of the window.
  pub fn end(&self) -> DateTime<Utc> {
    self.end
  }

  /// Returns the duration of the window.
  pub fn duration(&self) -> ChronoDuration {
    self.end - self.start
  }

  /// Returns true if the given timestamp falls within this window.
  pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
    timestamp >= self.start && timestamp < self.end
  }

  /// Returns true if this window shares an instant with another. Adjacent
  /// windows do not intersect.
  pub fn intersects(&self, other: &TimeWindow) -> bool {
    self.start < other.end && other.start < self.end
  }

  /// The smallest window covering both.
  pub fn span(&self, other: &TimeWindow) -> TimeWindow {
    TimeWindow::new(self.start.min(other.start), self.end.max(other.end))
  }

  /// Merges this window with an intersecting one.
  pub fn merge(&self, other: &TimeWindow) -> Option<TimeWindow> {
    self.intersects(other).then(|| self.span(other))
  }

  fn fire_key(&self) -> (DateTime<Utc>, DateTime<Utc>) {
    (self.end, self.start)
  }
}

impl PartialEq for TimeWindow {
  fn eq(&self, other: &Self) -> bool {
    self.start == other.start && self.end == other.end
  }
}

impl Eq for TimeWindow {}

impl Hash for TimeWindow {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.start.hash(state);
    self.end.hash(state);
  }
}

impl PartialOrd for TimeWindow {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for TimeWindow {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .start
      .cmp(&other.start)
      .then_with(|| self.end.cmp(&other.end))
  }
}

impl fmt::Display for TimeWindow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[{}, {})",
      self.start.format("%H:%M:%S"),
      self.end.format("%H:%M:%S")
    )
  }
}

/// Assigns event times to windows.
pub trait WindowAssigner: Send + Sync + Debug {
  /// The windows an element with `timestamp` belongs to.
  fn assign_windows(&self, timestamp: DateTime<Utc>) -> Vec<TimeWindow>;

  /// Whether assigned windows merge with intersecting open windows.
  fn is_merging(&self) -> bool {
    false
  }

  /// How far past its end a merged window can still be reached by a new
  /// element. `None` for assigners that do not merge.
  fn merge_gap(&self) -> Option<ChronoDuration> {
    None
  }
}

/// Tumbling window assigner that creates non-overlapping windows.
///
/// Each element is assigned to exactly one window,
/// `[floor((t - offset) / size) * size + offset, + size)`.
#[derive(Debug, Clone)]
pub struct TumblingWindowAssigner {
  size: i64,
  offset: i64,
}

impl TumblingWindowAssigner {
  /// Creates a new tumbling window assigner with the given size.
  ///
  /// # Errors
  ///
  /// Fails when `size` is below one millisecond.
  pub fn new(size: Duration) -> WindowResult<Self> {
    Ok(Self {
      size: positive_millis(size, "window size")?,
      offset: 0,
    })
  }

  /// Shifts window boundaries by `offset`.
  ///
  /// # Errors
  ///
  /// Fails when `offset` does not fit in milliseconds.
  pub fn with_offset(mut self, offset: Duration) -> WindowResult<Self> {
    self.offset = non_negative_millis(offset, "window offset")?;
    Ok(self)
  }

  /// Returns the window size.
  pub fn size(&self) -> Duration {
    Duration::from_millis(self.size.unsigned_abs())
  }

  /// Returns the offset.
  pub fn offset(&self) -> Duration {
    Duration::from_millis(self.offset.unsigned_abs())
  }
}

impl WindowAssigner for TumblingWindowAssigner {
  fn assign_windows(&self, timestamp: DateTime<Utc>) -> Vec<TimeWindow> {
    let start = align(timestamp.timestamp_millis(), self.size, self.offset);
    start
      .checked_add(self.size)
      .and_then(|end| TimeWindow::from_millis(start, end))
      .into_iter()
      .collect()
  }
}

/// Sliding window assigner that creates overlapping windows.
///
/// Windows of `size` start every `slide`. Each element belongs to every
/// window whose start is at most its timestamp and whose end is after it.
#[derive(Debug, Clone)]
pub struct SlidingWindowAssigner {
  size: i64,
  slide: i64,
  offset: i64,
}

impl SlidingWindowAssigner {
  /// Creates a new sliding window assigner.
  ///
  /// # Errors
  ///
  /// Fails when either duration is below one millisecond or when `slide`
  /// exceeds `size`, which would leave gaps between windows.
  pub fn new(size: Duration, slide: Duration) -> WindowResult<Self> {
    let size = positive_millis(size, "window size")?;
    let slide = positive_millis(slide, "window slide")?;
    if slide > size {
      return Err(WindowError::InvalidConfig(
        "window slide must not exceed window size".to_string(),
      ));
    }
    Ok(Self {
      size,
      slide,
      offset: 0,
    })
  }

  /// Shifts window boundaries by `offset`.
  ///
  /// # Errors
  ///
  /// Fails when `offset` does not fit in milliseconds.
  pub fn with_offset(mut self, offset: Duration) -> WindowResult<Self> {
    self.offset = non_negative_millis(offset, "window offset")?;
    Ok(self)
  }

  /// Returns the window size.
  pub fn size(&self) -> Duration {
    Duration::from_millis(self.size.unsigned_abs())
  }

  /// Returns the slide interval.
  pub fn slide(&self) -> Duration {
    Duration::from_millis(self.slide.unsigned_abs())
  }
}

impl WindowAssigner for SlidingWindowAssigner {
  fn assign_windows(&self, timestamp: DateTime<Utc>) -> Vec<TimeWindow> {
    let ts = timestamp.timestamp_millis();
    let earliest = ts.saturating_sub(self.size);
    let mut windows = Vec::new();
    let mut start = align(ts, self.slide, self.offset);
    while start > earliest {
      if let Some(end) = start.checked_add(self.size) {
        windows.extend(TimeWindow::from_millis(start, end));
      }
      match start.checked_sub(self.slide) {
        Some(previous) => start = previous,
        None => break,
      }
    }
    windows.reverse();
    windows
  }
}

/// Session window assigner that creates gap-based windows.
///
/// Each element opens a proto-session `[t, t + gap)`. Proto-sessions that
/// intersect an open session merge into it, so successive events closer than
/// `gap` share a session and a gap of `gap` or more starts a new one.
#[derive(Debug, Clone)]
pub struct SessionWindowAssigner {
  gap: i64,
}

impl SessionWindowAssigner {
  /// Creates a new session window assigner with the given gap.
  ///
  /// # Errors
  ///
  /// Fails when `gap` is below one millisecond.
  pub fn new(gap: Duration) -> WindowResult<Self> {
    Ok(Self {
      gap: positive_millis(gap, "session gap")?,
    })
  }

  /// Returns the gap duration.
  pub fn gap(&self) -> Duration {
    Duration::from_millis(self.gap.unsigned_abs())
  }
}

impl WindowAssigner for SessionWindowAssigner {
  fn assign_windows(&self, timestamp: DateTime<Utc>) -> Vec<TimeWindow> {
    let end = timestamp.checked_add_signed(ChronoDuration::milliseconds(self.gap));
    end.map(|end| TimeWindow::new(timestamp, end)).into_iter().collect()
  }

  fn is_merging(&self) -> bool {
    true
  }

  fn merge_gap(&self) -> Option<ChronoDuration> {
    Some(ChronoDuration::milliseconds(self.gap))
  }
}

/// Lifecycle of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
  /// The watermark has not passed the window end plus allowed lateness.
  Accumulating,
  /// The watermark has passed; the window fires on the next check.
  ReadyToFire,
  /// The window has fired.
  Closed,
}

/// The buffered contents of one window.
#[derive(Debug, Clone)]
pub struct WindowState<T> {
  /// The window.
  pub window: TimeWindow,
  /// Elements with their event times, in arrival order.
  pub elements: Vec<(DateTime<Utc>, T)>,
  /// Number of elements added.
  pub count: usize,
  /// Whether the window has fired.
  pub triggered: bool,
}

impl<T> WindowState<T> {
  /// Creates empty state for `window`.
  pub fn new(window: TimeWindow) -> Self {
    Self {
      window,
      elements: Vec::new(),
      count: 0,
      triggered: false,
    }
  }

  /// Adds an element.
  pub fn add(&mut self, timestamp: DateTime<Utc>, element: T) {
    self.elements.push((timestamp, element));
    self.count += 1;
  }

  /// Moves every element of `other` into this state and widens the window to
  /// cover both.
  pub fn absorb(&mut self, other: WindowState<T>) {
    self.window = self.window.span(&other.window);
    self.count += other.count;
    self.elements.extend(other.elements);
  }

  /// Returns the elements with their event times.
  pub fn elements(&self) -> &[(DateTime<Utc>, T)] {
    &self.elements
  }

  /// Marks the window as fired.
  pub fn mark_triggered(&mut self) {
    self.triggered = true;
  }

  /// The window's phase under `watermark`.
  pub fn phase(&self, watermark: &Watermark, allowed_lateness: ChronoDuration) -> WindowPhase {
    if self.triggered {
      WindowPhase::Closed
    } else if is_expired(&self.window, watermark, allowed_lateness) {
      WindowPhase::ReadyToFire
    } else {
      WindowPhase::Accumulating
    }
  }

  /// Consumes the state, keeping the elements.
  pub fn into_values(self) -> Vec<T> {
    self.elements.into_iter().map(|(_, element)| element).collect()
  }
}

impl<T: Clone> WindowState<T> {
  /// Returns copies of the elements without their event times.
  pub fn values(&self) -> Vec<T> {
    self.elements.iter().map(|(_, element)| element.clone()).collect()
  }
}

/// Whether the watermark has passed `window.end + allowed_lateness`. A bound
/// that overflows the calendar is never passed.
pub fn is_expired(window: &TimeWindow, watermark: &Watermark, allowed_lateness: ChronoDuration) -> bool {
  window
    .end
    .checked_add_signed(allowed_lateness)
    .is_some_and(|deadline| watermark.timestamp > deadline)
}

/// What to do with a record that arrives after all its windows fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LateAction {
  /// Discard it.
  Drop,
  /// Route it to the side output.
  SideOutput,
}

/// Decides the fate of a late record from the record, its event time and the
/// current watermark.
pub type LateDataDecider = Arc<dyn Fn(&Record, DateTime<Utc>, &Watermark) -> LateAction + Send + Sync>;

/// Policy for handling late data (elements arriving after their windows
/// fired).
#[derive(Clone, Default)]
pub enum LateDataPolicy {
  /// Drop late elements silently.
  #[default]
  Drop,
  /// Emit late elements to the side output.
  SideOutput,
  /// Decide per record.
  Custom(LateDataDecider),
}

impl LateDataPolicy {
  /// A policy deciding per record.
  pub fn custom<F>(decide: F) -> Self
  where
    F: Fn(&Record, DateTime<Utc>, &Watermark) -> LateAction + Send + Sync + 'static,
  {
    LateDataPolicy::Custom(Arc::new(decide))
  }

  fn may_side_output(&self) -> bool {
    !matches!(self, LateDataPolicy::Drop)
  }

  fn decide(&self, record: &Record, event_time: DateTime<Utc>, watermark: &Watermark) -> LateAction {
    match self {
      LateDataPolicy::Drop => LateAction::Drop,
      LateDataPolicy::SideOutput => LateAction::SideOutput,
      LateDataPolicy::Custom(decide) => decide(record, event_time, watermark),
    }
  }
}

impl PartialEq for LateDataPolicy {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (LateDataPolicy::Drop, LateDataPolicy::Drop) => true,
      (LateDataPolicy::SideOutput, LateDataPolicy::SideOutput) => true,
      (LateDataPolicy::Custom(a), LateDataPolicy::Custom(b)) => Arc::ptr_eq(a, b),
      _ => false,
    }
  }
}

impl Debug for LateDataPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LateDataPolicy::Drop => f.write_str("Drop"),
      LateDataPolicy::SideOutput => f.write_str("SideOutput"),
      LateDataPolicy::Custom(_) => f.write_str("Custom"),
    }
  }
}

/// Outcome of a lateness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LateDataResult<T> {
  /// At or after the watermark.
  OnTime(T),
  /// Behind the watermark, but some window is still open.
  WithinLateness(T),
  /// Late and discarded.
  Drop,
  /// Late and routed to the side output.
  SideOutput(T),
}

impl<T> LateDataResult<T> {
  /// Whether the element goes into windows.
  pub fn should_process(&self) -> bool {
    matches!(self, LateDataResult::OnTime(_) | LateDataResult::WithinLateness(_))
  }

  /// The element, if it goes into windows.
  pub fn into_processable(self) -> Option<T> {
    match self {
      LateDataResult::OnTime(v) | LateDataResult::WithinLateness(v) => Some(v),
      _ => None,
    }
  }

  /// Whether the element goes to the side output.
  pub fn is_side_output(&self) -> bool {
    matches!(self, LateDataResult::SideOutput(_))
  }

  /// The element, if it goes to the side output.
  pub fn into_side_output(self) -> Option<T> {
    match self {
      LateDataResult::SideOutput(v) => Some(v),
      _ => None,
    }
  }
}

/// Counters of lateness decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LateDataStats {
  /// Records at or after the watermark.
  pub on_time: u64,
  /// Records behind the watermark that still had an open window.
  pub within_lateness: u64,
  /// Late records dropped.
  pub dropped: u64,
  /// Late records routed to the side output.
  pub side_output: u64,
}

/// Applies the lateness rule and the [`LateDataPolicy`], keeping
/// [`LateDataStats`].
#[derive(Debug, Clone)]
pub struct LateDataHandler {
  policy: LateDataPolicy,
  allowed_lateness: Duration,
  lateness: ChronoDuration,
  stats: LateDataStats,
}

impl LateDataHandler {
  /// Creates a handler with zero allowed lateness.
  pub fn new(policy: LateDataPolicy) -> Self {
    Self {
      policy,
      allowed_lateness: Duration::ZERO,
      lateness: ChronoDuration::zero(),
      stats: LateDataStats::default(),
    }
  }

  /// Drops late records, with zero allowed lateness.
  pub fn drop_late() -> Self {
    Self::new(LateDataPolicy::Drop)
  }

  /// Routes late records to the side output, with zero allowed lateness.
  pub fn redirect_to_side_output() -> Self {
    Self::new(LateDataPolicy::SideOutput)
  }

  /// Drops late records, keeping windows open for `lateness` past their end.
  pub fn with_allowed_lateness(lateness: Duration) -> Self {
    Self::drop_late().allowing(lateness)
  }

  /// Sets the allowed lateness.
  pub fn allowing(mut self, lateness: Duration) -> Self {
    self.allowed_lateness = lateness;
    self.lateness = saturating_chrono(lateness);
    self
  }

  /// The policy.
  pub fn policy(&self) -> &LateDataPolicy {
    &self.policy
  }

  /// The allowed lateness.
  pub fn allowed_lateness(&self) -> Duration {
    self.allowed_lateness
  }

  /// Whether `window` is past accumulating under `watermark`.
  pub fn is_expired(&self, window: &TimeWindow, watermark: &Watermark) -> bool {
    is_expired(window, watermark, self.lateness)
  }

  /// Classifies an element with `event_time` belonging to `windows`.
  ///
  /// The element is on time at or after the watermark, within lateness when
  /// behind it but some window is still accumulating, and late otherwise.
  pub fn evaluate(
    &mut self,
    record: Record,
    event_time: DateTime<Utc>,
    windows: &[TimeWindow],
    watermark: &Watermark,
  ) -> LateDataResult<Record> {
    if event_time >= watermark.timestamp {
      self.stats.on_time += 1;
      return LateDataResult::OnTime(record);
    }
    if windows.iter().any(|w| !self.is_expired(w, watermark)) {
      self.stats.within_lateness += 1;
      return LateDataResult::WithinLateness(record);
    }
    match self.policy.decide(&record, event_time, watermark) {
      LateAction::Drop => {
        self.stats.dropped += 1;
        LateDataResult::Drop
      }
      LateAction::SideOutput => {
        self.stats.side_output += 1;
        LateDataResult::SideOutput(record)
      }
    }
  }

  /// The counters so far.
  pub fn stats(&self) -> LateDataStats {
    self.stats
  }

  /// Resets the counters.
  pub fn reset_stats(&mut self) {
    self.stats = LateDataStats::default();
  }
}

/// Named options of the window operator.
///
/// | Option | Default |
/// |---|---|
/// | timestamp extractor | [`FieldTimestamp::default`] |
/// | allowed lateness | zero |
/// | late-data policy | [`LateDataPolicy::Drop`] |
/// | watermark strategy | [`WatermarkStrategy::Monotonic`] |
/// | clock | [`SystemClock`] |
#[derive(Clone)]
pub struct WindowConfig {
  /// Reads the event time of each record.
  pub timestamp_extractor: SharedExtractor,
  /// How long windows stay open after their end.
  pub allowed_lateness: Duration,
  /// What happens to records whose windows already fired.
  pub late_data_policy: LateDataPolicy,
  /// How watermarks are generated.
  pub watermark_strategy: WatermarkStrategy,
  /// Processing-time source for timestamp fallback and periodic watermarks.
  pub clock: SharedClock,
}

impl Default for WindowConfig {
  fn default() -> Self {
    Self {
      timestamp_extractor: Arc::new(FieldTimestamp::default()),
      allowed_lateness: Duration::ZERO,
      late_data_policy: LateDataPolicy::Drop,
      watermark_strategy: WatermarkStrategy::Monotonic,
      clock: Arc::new(SystemClock),
    }
  }
}

impl WindowConfig {
  /// Creates the default configuration.
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the late data policy.
  pub fn with_late_data_policy(mut self, policy: LateDataPolicy) -> Self {
    self.late_data_policy = policy;
    self
  }

  /// Sets the allowed lateness.
  pub fn with_allowed_lateness(mut self, lateness: Duration) -> Self {
    self.allowed_lateness = lateness;
    self
  }

  /// Sets the watermark strategy.
  pub fn with_watermark_strategy(mut self, strategy: WatermarkStrategy) -> Self {
    self.watermark_strategy = strategy;
    self
  }

  /// Sets the timestamp extractor.
  pub fn with_timestamp_extractor<E>(mut self, extractor: E) -> Self
  where
    E: TimestampExtractor + 'static,
  {
    self.timestamp_extractor = Arc::new(extractor);
    self
  }

  /// Reads event time from `field`.
  pub fn with_timestamp_field(self, field: impl Into<String>) -> Self {
    self.with_timestamp_extractor(FieldTimestamp::new(field))
  }

  /// Sets the clock.
  pub fn with_clock<C>(mut self, clock: C) -> Self
  where
    C: Clock + 'static,
  {
    self.clock = Arc::new(clock);
    self
  }

  /// Checks the options.
  ///
  /// # Errors
  ///
  /// Fails when the allowed lateness does not fit in milliseconds or a
  /// periodic watermark interval is zero.
  pub fn validate(&self) -> WindowResult<()> {
    non_negative_millis(self.allowed_lateness, "allowed lateness")?;
    if let WatermarkStrategy::Periodic { interval, .. } = &self.watermark_strategy {
      positive_millis(*interval, "watermark interval")?;
    }
    Ok(())
  }
}

impl Debug for WindowConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WindowConfig")
      .field("allowed_lateness", &self.allowed_lateness)
      .field("late_data_policy", &self.late_data_policy)
      .field("watermark_strategy", &self.watermark_strategy)
      .field("clock", &self.clock)
      .finish_non_exhaustive()
  }
}

/// A fired window and its records.
#[derive(Debug)]
pub struct WindowPane {
  /// The window bounds.
  pub window: TimeWindow,
  /// The records, in arrival order.
  pub records: Stream<Record>,
}

impl WindowPane {
  /// The window bounds.
  pub fn window(&self) -> TimeWindow {
    self.window
  }

  /// Discards the bounds and keeps the records.
  pub fn into_records(self) -> Stream<Record> {
    self.records
  }

  /// Runs `specs` over the records. The result starts with
  /// [`WINDOW_START_FIELD`] and [`WINDOW_END_FIELD`], followed by one field
  /// per spec.
  ///
  /// # Errors
  ///
  /// Returns a configuration error for duplicate spec names.
  pub async fn aggregate(self, specs: &[AggregateSpec<Record>]) -> StreamResult<Record> {
    let results = aggregates(self.records, specs).await?;
    Ok(
      Record::builder()
        .time(WINDOW_START_FIELD, self.window.start)
        .time(WINDOW_END_FIELD, self.window.end)
        .build()
        .merge(&results),
    )
  }
}

struct WindowOperator {
  assigner: Arc<dyn WindowAssigner>,
  extractor: SharedExtractor,
  clock: SharedClock,
  generator: Box<dyn WatermarkGenerator>,
  handler: LateDataHandler,
  watermark: Watermark,
  /// Open windows keyed by `(end, start)`, so iteration follows firing order.
  panes: BTreeMap<(DateTime<Utc>, DateTime<Utc>), WindowState<Record>>,
  /// Sessions already fired, kept while a new element could still reach them.
  fired_sessions: Vec<TimeWindow>,
  side_output: Option<mpsc::UnboundedSender<StreamResult<Record>>>,
  stats: Arc<Mutex<LateDataStats>>,
}

impl WindowOperator {
  fn process(&mut self, record: Record) -> Vec<WindowPane> {
    let event_time = event_time_or_now(self.extractor.as_ref(), self.clock.as_ref(), &record);
    let windows = self.target_windows(event_time);
    let watermark = self.watermark;
    match self.handler.evaluate(record, event_time, &windows, &watermark) {
      LateDataResult::OnTime(record) | LateDataResult::WithinLateness(record) => {
        // Windows that already fired stay closed.
        let open: Vec<_> = windows
          .into_iter()
          .filter(|w| !self.handler.is_expired(w, &watermark))
          .collect();
        self.insert(event_time, record, open)
      }
      LateDataResult::SideOutput(record) => {
        debug!(%event_time, %watermark, "late record routed to side output");
        if let Some(sender) = &self.side_output {
          // A dropped receiver only means nobody reads the side output.
          let _ = sender.send(Ok(record));
        }
      }
      LateDataResult::Drop => debug!(%event_time, %watermark, "late record dropped"),
    }
    *lock_state(&self.stats) = self.handler.stats();

    let advanced = [
      self.generator.on_event(event_time),
      self.generator.on_periodic_emit(),
    ];
    for candidate in advanced.into_iter().flatten() {
      if self.watermark.advance(candidate.timestamp) {
        trace!(watermark = %self.watermark, "watermark advanced");
      }
    }
    self.fire_ready()
  }

  /// The windows a record at `event_time` would land in. Merging assigners
  /// report the merged window, or the fired sessions it would reopen.
  fn target_windows(&self, event_time: DateTime<Utc>) -> Vec<TimeWindow> {
    let assigned = self.assigner.assign_windows(event_time);
    if !self.assigner.is_merging() {
      return assigned;
    }
    let reopened: Vec<TimeWindow> = self
      .fired_sessions
      .iter()
      .filter(|fired| assigned.iter().any(|proto| fired.intersects(proto)))
      .copied()
      .collect();
    if !reopened.is_empty() {
      // Fired sessions are expired, so the record is classified as late.
      return reopened;
    }
    assigned
      .into_iter()
      .map(|proto| {
        self
          .panes
          .values()
          .filter(|state| state.window.intersects(&proto))
          .fold(proto, |merged, state| merged.span(&state.window))
      })
      .collect()
  }

  fn insert(&mut self, event_time: DateTime<Utc>, record: Record, windows: Vec<TimeWindow>) {
    if windows.is_empty() {
      debug!(%event_time, "record outside every window; dropped");
      return;
    }
    let merging = self.assigner.is_merging();
    for window in windows {
      let mut state = WindowState::new(window);
      if merging {
        let absorbed: Vec<_> = self
          .panes
          .iter()
          .filter(|(_, open)| open.window.intersects(&window))
          .map(|(key, _)| *key)
          .collect();
        for key in absorbed {
          if let Some(open) = self.panes.remove(&key) {
            state.absorb(open);
          }
        }
      } else if let Some(open) = self.panes.remove(&window.fire_key()) {
        state = open;
      }
      state.add(event_time, record.clone());
      self.panes.insert(state.window.fire_key(), state);
    }
  }

  fn fire_ready(&mut self) -> Vec<WindowPane> {
    let mut fired = Vec::new();
    while let Some(entry) = self.panes.first_entry() {
      if !self.handler.is_expired(&entry.get().window, &self.watermark) {
        break;
      }
      let state = entry.remove();
      if self.assigner.is_merging() {
        self.fired_sessions.push(state.window);
      }
      fired.push(Self::fire(state));
    }
    self.prune_fired_sessions();
    fired
  }

  /// Forgets fired sessions no new element can intersect without being
  /// late on its own.
  fn prune_fired_sessions(&mut self) {
    let Some(gap) = self.assigner.merge_gap() else {
      return;
    };
    let watermark = self.watermark;
    let lateness = self.handler.lateness;
    self.fired_sessions.retain(|fired| {
      let reach = TimeWindow {
        start: fired.start,
        end: fired.end.checked_add_signed(gap).unwrap_or(DateTime::<Utc>::MAX_UTC),
      };
      !is_expired(&reach, &watermark, lateness)
    });
  }

  fn flush(&mut self) -> Vec<WindowPane> {
    let watermark = self.generator.on_end_of_stream();
    self.watermark.advance(watermark.timestamp);
    std::mem::take(&mut self.panes)
      .into_values()
      .map(Self::fire)
      .collect()
  }

  fn fire(mut state: WindowState<Record>) -> WindowPane {
    state.mark_triggered();
    trace!(window = %state.window, records = state.count, "window fired");
    WindowPane {
      window: state.window,
      records: Stream::from_iter(state.into_values()),
    }
  }
}

/// The output of [`window`]: fired panes, plus the late-record side output
/// and lateness counters.
pub struct WindowedStream {
  panes: Stream<WindowPane>,
  side_output: Option<Stream<Record>>,
  stats: Arc<Mutex<LateDataStats>>,
}

impl WindowedStream {
  /// Pulls the next fired window.
  pub async fn next(&mut self) -> Pull<WindowPane> {
    self.panes.next().await
  }

  /// Drains every fired window.
  ///
  /// # Errors
  ///
  /// Returns the first upstream error.
  pub async fn collect(&mut self) -> StreamResult<Vec<WindowPane>> {
    self.panes.collect().await
  }

  /// Takes the stream of late records routed to the side output.
  ///
  /// Late records become available as the panes are pulled; the side output
  /// ends once the pane stream has ended or been dropped. Returns `None`
  /// under [`LateDataPolicy::Drop`] and on every call after the first.
  pub fn take_side_output(&mut self) -> Option<Stream<Record>> {
    self.side_output.take()
  }

  /// Lateness counters so far.
  pub fn stats(&self) -> LateDataStats {
    *lock_state(&self.stats)
  }

  /// The pane stream alone.
  pub fn into_stream(self) -> Stream<WindowPane> {
    self.panes
  }
}

impl Debug for WindowedStream {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WindowedStream")
      .field("stats", &self.stats())
      .finish_non_exhaustive()
  }
}

/// Windows `stream` by event time.
///
/// # Errors
///
/// Returns a configuration error when `config` is invalid. Upstream errors
/// are yielded by the pane stream; windows still open at that point are
/// discarded.
pub fn window<A>(stream: Stream<Record>, assigner: A, config: WindowConfig) -> StreamResult<WindowedStream>
where
  A: WindowAssigner + 'static,
{
  config.validate()?;
  let stats = Arc::new(Mutex::new(LateDataStats::default()));
  let (side_output, side_stream) = if config.late_data_policy.may_side_output() {
    let (tx, rx) = mpsc::unbounded_channel();
    (Some(tx), Some(Stream::from_unbounded_receiver(rx)))
  } else {
    (None, None)
  };

  let mut operator = WindowOperator {
    assigner: Arc::new(assigner),
    generator: config.watermark_strategy.create(Arc::clone(&config.clock)),
    extractor: config.timestamp_extractor,
    clock: config.clock,
    handler: LateDataHandler::new(config.late_data_policy).allowing(config.allowed_lateness),
    watermark: Watermark::min(),
    panes: BTreeMap::new(),
    fired_sessions: Vec::new(),
    side_output,
    stats: Arc::clone(&stats),
  };
  let mut upstream = stream;
  let panes = Stream::from_try_stream(async_stream::stream! {
    loop {
      match upstream.next().await {
        Pull::Value(record) => {
          for pane in operator.process(record) {
            yield Ok(pane);
          }
        }
        Pull::Error(err) => {
          yield Err(err);
          return;
        }
        Pull::End => break,
      }
    }
    for pane in operator.flush() {
      yield Ok(pane);
    }
  });

  Ok(WindowedStream {
    panes,
    side_output: side_stream,
    stats,
  })
}

impl Stream<Record> {
  /// Method form of [`window`].
  ///
  /// # Errors
  ///
  /// See [`window`].
  pub fn window<A>(self, assigner: A, config: WindowConfig) -> StreamResult<WindowedStream>
  where
    A: WindowAssigner + 'static,
  {
    window(self, assigner, config)
  }
}
