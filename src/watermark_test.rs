//! # Watermark Test Suite
//!
//! Tests for watermark ordering, the built-in generators and strategies.

use crate::time::ManualClock;
use crate::watermark::*;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn at(millis: i64) -> DateTime<Utc> {
  DateTime::from_timestamp_millis(millis).unwrap()
}

fn wm(millis: i64) -> Watermark {
  Watermark::new(at(millis))
}

// ============================================================================
// Watermark Tests
// ============================================================================

#[test]
fn test_watermark_bounds_and_order() {
  assert!(Watermark::min() < wm(0));
  assert!(wm(0) < Watermark::max());
  assert!(Watermark::max().is_end_of_stream());
  assert!(!wm(0).is_end_of_stream());
}

#[test]
fn test_watermark_advance_only_forward() {
  let mut mark = wm(100);
  assert!(mark.advance(at(200)));
  assert_eq!(mark, wm(200));
  assert!(!mark.advance(at(150)));
  assert!(!mark.advance(at(200)));
  assert_eq!(mark, wm(200));
}

#[test]
fn test_watermark_display() {
  assert_eq!(wm(0).to_string(), "Watermark(1970-01-01T00:00:00+00:00)");
  assert_eq!(Watermark::max().to_string(), "Watermark(END)");
}

// ============================================================================
// Monotonic Generator Tests
// ============================================================================

#[test]
fn test_monotonic_tracks_max() {
  let mut generator = MonotonicWatermarkGenerator::new();
  assert_eq!(generator.current_watermark(), Watermark::min());
  assert_eq!(generator.on_event(at(10)), Some(wm(10)));
  assert_eq!(generator.on_event(at(5)), None);
  assert_eq!(generator.on_event(at(10)), None);
  assert_eq!(generator.on_event(at(30)), Some(wm(30)));
  assert_eq!(generator.current_watermark(), wm(30));
  assert_eq!(generator.on_periodic_emit(), None);
  assert_eq!(generator.on_end_of_stream(), Watermark::max());
}

// ============================================================================
// Bounded Out-of-Orderness Generator Tests
// ============================================================================

#[test]
fn test_bounded_trails_by_bound() {
  let mut generator = BoundedOutOfOrdernessGenerator::new(Duration::from_secs(5));
  assert_eq!(generator.on_periodic_emit(), None);
  assert_eq!(generator.on_event(at(10_000)), Some(wm(5_000)));
  assert_eq!(generator.on_event(at(8_000)), None);
  assert_eq!(generator.on_event(at(12_000)), Some(wm(7_000)));
  assert_eq!(generator.current_watermark(), wm(7_000));
  assert_eq!(generator.on_periodic_emit(), Some(wm(7_000)));
}

#[test]
fn test_bounded_huge_bound_saturates() {
  let mut generator = BoundedOutOfOrdernessGenerator::new(Duration::MAX);
  assert_eq!(generator.on_event(at(0)), None);
  assert_eq!(generator.current_watermark(), Watermark::min());
}

// ============================================================================
// Periodic Generator Tests
// ============================================================================

#[test]
fn test_periodic_publishes_on_interval() {
  let clock = ManualClock::new(at(0));
  let mut generator = PeriodicWatermarkGenerator::with_clock(
    Duration::from_secs(1),
    Duration::from_millis(200),
    Arc::new(clock.clone()),
  );

  assert_eq!(generator.on_event(at(5_000)), None);
  assert_eq!(generator.pending_watermark(), wm(4_000));
  // First emission is immediate.
  assert_eq!(generator.on_periodic_emit(), Some(wm(4_000)));

  assert_eq!(generator.on_event(at(9_000)), None);
  assert_eq!(generator.current_watermark(), wm(8_000));
  clock.advance(ChronoDuration::milliseconds(100));
  assert_eq!(generator.on_periodic_emit(), None);

  clock.advance(ChronoDuration::milliseconds(100));
  assert_eq!(generator.on_periodic_emit(), Some(wm(8_000)));

  // Due, but nothing new to publish.
  clock.advance(ChronoDuration::milliseconds(500));
  assert_eq!(generator.on_periodic_emit(), None);
}

#[test]
fn test_periodic_without_events_stays_at_min() {
  let mut generator = PeriodicWatermarkGenerator::with_clock(
    Duration::ZERO,
    Duration::from_millis(10),
    Arc::new(ManualClock::default()),
  );
  assert_eq!(generator.on_periodic_emit(), None);
  assert_eq!(generator.current_watermark(), Watermark::min());
}

// ============================================================================
// Strategy Tests
// ============================================================================

#[test]
fn test_strategy_creates_matching_generator() {
  let clock = Arc::new(ManualClock::new(at(0)));

  let mut monotonic = WatermarkStrategy::default().create(clock.clone());
  assert_eq!(monotonic.on_event(at(3)), Some(wm(3)));

  let mut bounded = WatermarkStrategy::BoundedOutOfOrderness(Duration::from_millis(2)).create(clock.clone());
  assert_eq!(bounded.on_event(at(3)), Some(wm(1)));

  let mut periodic = WatermarkStrategy::Periodic {
    max_out_of_orderness: Duration::ZERO,
    interval: Duration::from_secs(1),
  }
  .create(clock);
  assert_eq!(periodic.on_event(at(3)), None);
  assert_eq!(periodic.on_periodic_emit(), Some(wm(3)));
}

#[test]
fn test_custom_strategy_creates_fresh_generators() {
  let strategy = WatermarkStrategy::Custom(Arc::new(|| {
    Box::new(MonotonicWatermarkGenerator::new()) as Box<dyn WatermarkGenerator>
  }));
  let clock = Arc::new(ManualClock::default());
  let mut first = strategy.create(clock.clone());
  first.on_event(at(100));
  let second = strategy.create(clock);
  assert_eq!(second.current_watermark(), Watermark::min());
  assert_eq!(format!("{:?}", strategy), "Custom");
}

#[test]
fn test_strategy_debug() {
  assert_eq!(format!("{:?}", WatermarkStrategy::Monotonic), "Monotonic");
  assert!(format!(
    "{:?}",
    WatermarkStrategy::BoundedOutOfOrderness(Duration::from_secs(1))
  )
  .starts_with("BoundedOutOfOrderness"));
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
  #[test]
  fn prop_generators_never_regress(times in proptest::collection::vec(0i64..1_000_000, 1..100), bound in 0u64..10_000) {
    let mut monotonic = MonotonicWatermarkGenerator::new();
    let mut bounded = BoundedOutOfOrdernessGenerator::new(Duration::from_millis(bound));
    let mut last_monotonic = Watermark::min();
    let mut last_bounded = Watermark::min();
    for t in &times {
      if let Some(mark) = monotonic.on_event(at(*t)) {
        prop_assert!(mark > last_monotonic);
        last_monotonic = mark;
      }
      if let Some(mark) = bounded.on_event(at(*t)) {
        prop_assert!(mark > last_bounded);
        last_bounded = mark;
      }
      prop_assert!(bounded.current_watermark() <= monotonic.current_watermark());
    }
    prop_assert_eq!(last_monotonic, wm(*times.iter().max().unwrap()));
  }
}
