//! # Event Time
//!
//! Clocks and timestamp extraction for event-time processing.
//!
//! ## Event time vs processing time
//!
//! - **Event time** is when the event happened, read from the record by a
//!   [`TimestampExtractor`]. Windowing is driven by event time.
//! - **Processing time** is when the pipeline handles the event, read from a
//!   [`Clock`]. It is the fallback for records whose event time is absent or
//!   unparsable, and it drives periodic watermarks.
//!
//! The clock is always passed in explicitly. Tests use [`ManualClock`] so that
//! fallback timestamps and watermark intervals are deterministic.

use crate::record::{Record, Value};
use crate::stream::lock_state;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Field names [`FieldTimestamp::default`] looks for, in order.
pub const DEFAULT_TIMESTAMP_FIELDS: [&str; 2] = ["event_timestamp", "timestamp"];

/// A source of processing time.
pub trait Clock: Send + Sync + fmt::Debug {
  /// The current instant.
  fn now(&self) -> DateTime<Utc>;
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
  /// Creates a clock stopped at `start`.
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Arc::new(Mutex::new(start)),
    }
  }

  /// Moves the clock to `instant`.
  pub fn set(&self, instant: DateTime<Utc>) {
    *lock_state(&self.now) = instant;
  }

  /// Moves the clock forward by `by`, saturating at the representable range.
  pub fn advance(&self, by: ChronoDuration) {
    let mut now = lock_state(&self.now);
    *now = now.checked_add_signed(by).unwrap_or(if by < ChronoDuration::zero() {
      DateTime::<Utc>::MIN_UTC
    } else {
      DateTime::<Utc>::MAX_UTC
    });
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(DateTime::UNIX_EPOCH)
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *lock_state(&self.now)
  }
}

/// Reads the event time of a record.
///
/// Returning `None` is not an error: the windowing operator substitutes the
/// current processing time.
///
/// Closures of type `Fn(&Record) -> Option<DateTime<Utc>>` are extractors.
pub trait TimestampExtractor: Send + Sync {
  /// The record's event time, if it has a usable one.
  fn extract(&self, record: &Record) -> Option<DateTime<Utc>>;
}

impl<F> TimestampExtractor for F
where
  F: Fn(&Record) -> Option<DateTime<Utc>> + Send + Sync,
{
  fn extract(&self, record: &Record) -> Option<DateTime<Utc>> {
    self(record)
  }
}

/// Shared handle to an extractor.
pub type SharedExtractor = Arc<dyn TimestampExtractor>;

/// Reads event time from the first present field among a list of names.
///
/// Accepted encodings:
///
/// - `Time` values as is,
/// - `Int` values as milliseconds since the Unix epoch,
/// - `String` values in RFC 3339, or as integer milliseconds.
///
/// Anything else is unparsable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTimestamp {
  fields: Vec<String>,
}

impl FieldTimestamp {
  /// Reads `field`.
  pub fn new(field: impl Into<String>) -> Self {
    Self {
      fields: vec![field.into()],
    }
  }

  /// Also tries `field` when the earlier ones are absent.
  pub fn or_field(mut self, field: impl Into<String>) -> Self {
    self.fields.push(field.into());
    self
  }

  /// The field names, in lookup order.
  pub fn fields(&self) -> &[String] {
    &self.fields
  }
}

impl Default for FieldTimestamp {
  fn default() -> Self {
    Self {
      fields: DEFAULT_TIMESTAMP_FIELDS.iter().map(|f| f.to_string()).collect(),
    }
  }
}

impl TimestampExtractor for FieldTimestamp {
  fn extract(&self, record: &Record) -> Option<DateTime<Utc>> {
    let value = self.fields.iter().find_map(|field| record.value(field))?;
    parse_timestamp(value)
  }
}

/// Interprets a field value as an instant. See [`FieldTimestamp`] for the
/// accepted encodings.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
  match value {
    Value::Time(t) => Some(*t),
    Value::Int(millis) => DateTime::from_timestamp_millis(*millis),
    Value::String(s) => DateTime::parse_from_rfc3339(s)
      .map(|t| t.with_timezone(&Utc))
      .ok()
      .or_else(|| s.trim().parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)),
    _ => None,
  }
}

/// The record's event time, or the clock's current time when the extractor
/// finds none.
pub fn event_time_or_now(
  extractor: &dyn TimestampExtractor,
  clock: &dyn Clock,
  record: &Record,
) -> DateTime<Utc> {
  match extractor.extract(record) {
    Some(t) => t,
    None => {
      let now = clock.now();
      debug!(%now, "record has no usable event time; using processing time");
      now
    }
  }
}
