//! # Time Test Suite

use crate::record::{Record, Value};
use crate::time::*;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

fn at(millis: i64) -> DateTime<Utc> {
  DateTime::from_timestamp_millis(millis).unwrap()
}

// ============================================================================
// Clock Tests
// ============================================================================

#[test]
fn test_manual_clock_set_and_advance() {
  let clock = ManualClock::new(at(1_000));
  assert_eq!(clock.now(), at(1_000));
  clock.advance(ChronoDuration::milliseconds(250));
  assert_eq!(clock.now(), at(1_250));
  clock.set(at(10));
  assert_eq!(clock.now(), at(10));
}

#[test]
fn test_manual_clock_advance_saturates() {
  let clock = ManualClock::new(at(0));
  clock.advance(ChronoDuration::milliseconds(i64::MAX));
  assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);
  clock.advance(ChronoDuration::seconds(1));
  assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);

  clock.set(at(0));
  clock.advance(ChronoDuration::milliseconds(-i64::MAX));
  assert_eq!(clock.now(), DateTime::<Utc>::MIN_UTC);
}

#[test]
fn test_manual_clock_clones_share_time() {
  let clock = ManualClock::default();
  let other = clock.clone();
  assert_eq!(clock.now(), DateTime::UNIX_EPOCH);
  other.advance(ChronoDuration::seconds(5));
  assert_eq!(clock.now(), at(5_000));
}

#[test]
fn test_system_clock_moves_forward() {
  let before = Utc::now();
  let now = SystemClock.now();
  assert!(now >= before);
}

// ============================================================================
// parse_timestamp Tests
// ============================================================================

#[test]
fn test_parse_timestamp_encodings() {
  let instant = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
  assert_eq!(parse_timestamp(&Value::Time(instant)), Some(instant));
  assert_eq!(parse_timestamp(&Value::Int(1_500)), Some(at(1_500)));
  assert_eq!(
    parse_timestamp(&Value::from("2024-03-01T12:00:00Z")),
    Some(instant)
  );
  assert_eq!(
    parse_timestamp(&Value::from("2024-03-01T14:00:00+02:00")),
    Some(instant)
  );
  assert_eq!(parse_timestamp(&Value::from(" 2500 ")), Some(at(2_500)));
}

#[test]
fn test_parse_timestamp_rejects_other_values() {
  assert_eq!(parse_timestamp(&Value::from("yesterday")), None);
  assert_eq!(parse_timestamp(&Value::Float(1.0)), None);
  assert_eq!(parse_timestamp(&Value::Bool(true)), None);
  assert_eq!(parse_timestamp(&Value::Null), None);
  assert_eq!(parse_timestamp(&Value::Record(Record::new())), None);
}

// ============================================================================
// Extractor Tests
// ============================================================================

#[test]
fn test_field_timestamp_default_fields() {
  let extractor = FieldTimestamp::default();
  assert_eq!(extractor.fields(), &["event_timestamp", "timestamp"]);

  let primary = Record::builder()
    .int("event_timestamp", 1_000)
    .int("timestamp", 2_000)
    .build();
  assert_eq!(extractor.extract(&primary), Some(at(1_000)));

  let fallback = Record::builder().int("timestamp", 2_000).build();
  assert_eq!(extractor.extract(&fallback), Some(at(2_000)));
}

#[test]
fn test_field_timestamp_first_present_field_wins() {
  // A present but unparsable field does not fall through to the next one.
  let extractor = FieldTimestamp::new("ts").or_field("backup");
  let record = Record::builder().string("ts", "garbage").int("backup", 5).build();
  assert_eq!(extractor.extract(&record), None);
  assert_eq!(extractor.fields(), &["ts", "backup"]);
}

#[test]
fn test_closure_extractor() {
  let extractor = |record: &Record| record.get::<i64>("seconds").and_then(|s| DateTime::from_timestamp(s, 0));
  let record = Record::builder().int("seconds", 3).build();
  assert_eq!(extractor.extract(&record), Some(at(3_000)));
}

#[test]
fn test_event_time_or_now_falls_back_to_clock() {
  let clock = ManualClock::new(at(42_000));
  let extractor = FieldTimestamp::default();

  let stamped = Record::builder().int("timestamp", 7).build();
  assert_eq!(event_time_or_now(&extractor, &clock, &stamped), at(7));

  let bare = Record::builder().string("user", "u1").build();
  assert_eq!(event_time_or_now(&extractor, &clock, &bare), at(42_000));
}
