//! # Record Test Suite
//!
//! Tests for [`Value`], [`Record`], [`RecordBuilder`] and nested streams.

use crate::record::{NestedStream, Record, RecordBuilder, Value, ValueKind};
use crate::stream::{Pull, Stream};
use chrono::{DateTime, Utc};
use serde_json::json;

fn sample() -> Record {
  Record::builder()
    .string("name", "alice")
    .int("age", 31)
    .float("score", 9.5)
    .bool("active", true)
    .build()
}

// ============================================================================
// Value Tests
// ============================================================================

#[test]
fn test_value_default_is_null() {
  assert!(Value::default().is_null());
  assert_eq!(Value::default().kind(), ValueKind::Null);
}

#[test]
fn test_value_kind() {
  assert_eq!(Value::from(true).kind(), ValueKind::Bool);
  assert_eq!(Value::from(1i64).kind(), ValueKind::Int);
  assert_eq!(Value::from(1.5).kind(), ValueKind::Float);
  assert_eq!(Value::from("s").kind(), ValueKind::String);
  assert_eq!(Value::from(Utc::now()).kind(), ValueKind::Time);
  assert_eq!(Value::from(Record::new()).kind(), ValueKind::Record);
  assert_eq!(Value::from(NestedStream::from_values(vec![])).kind(), ValueKind::Stream);
}

#[test]
fn test_value_from_option() {
  assert_eq!(Value::from(Some(3i64)), Value::Int(3));
  assert_eq!(Value::from(None::<i64>), Value::Null);
}

#[test]
fn test_value_as_f64_widens_int() {
  assert_eq!(Value::Int(4).as_f64(), Some(4.0));
  assert_eq!(Value::Float(0.5).as_i64(), None);
  assert_eq!(Value::String("4".into()).as_f64(), None);
}

#[test]
fn test_value_display() {
  assert_eq!(Value::Null.to_string(), "null");
  assert_eq!(Value::Int(7).to_string(), "7");
  assert_eq!(Value::from("hi").to_string(), "\"hi\"");
  assert_eq!(Value::from(NestedStream::from_values(vec![])).to_string(), "<stream>");
}

#[test]
fn test_value_stream_equality_is_identity() {
  let a = NestedStream::from_values(vec![Value::Int(1)]);
  let b = NestedStream::from_values(vec![Value::Int(1)]);
  assert_eq!(Value::Stream(a.clone()), Value::Stream(a.clone()));
  assert_ne!(Value::Stream(a), Value::Stream(b));
}

// ============================================================================
// Record Accessor Tests
// ============================================================================

#[test]
fn test_record_typed_get() {
  let record = sample();
  assert_eq!(record.get::<String>("name"), Some("alice".to_string()));
  assert_eq!(record.get::<i64>("age"), Some(31));
  assert_eq!(record.get::<f64>("score"), Some(9.5));
  assert_eq!(record.get::<bool>("active"), Some(true));
}

#[test]
fn test_record_get_mismatch_is_none_not_panic() {
  let record = sample();
  assert_eq!(record.get::<i64>("name"), None);
  assert_eq!(record.get::<bool>("age"), None);
  assert_eq!(record.get::<String>("missing"), None);
  assert_eq!(record.get::<DateTime<Utc>>("age"), None);
}

#[test]
fn test_record_get_f64_accepts_int() {
  assert_eq!(sample().get::<f64>("age"), Some(31.0));
}

#[test]
fn test_record_get_or() {
  let record = sample();
  assert_eq!(record.get_or("age", 0i64), 31);
  assert_eq!(record.get_or("height", 170i64), 170);
  assert_eq!(record.get_or("name", 0i64), 0);
}

#[test]
fn test_record_get_str_and_value() {
  let record = sample();
  assert_eq!(record.get_str("name"), Some("alice"));
  assert_eq!(record.get_str("age"), None);
  assert_eq!(record.value("age"), Some(&Value::Int(31)));
  assert!(record.contains_key("active"));
  assert!(!record.contains_key("nope"));
}

#[test]
fn test_record_keys_keep_insertion_order() {
  assert_eq!(sample().keys(), vec!["name", "age", "score", "active"]);
  assert_eq!(sample().len(), 4);
  assert!(Record::new().is_empty());
}

#[test]
fn test_record_builder_set_replaces_in_place() {
  let record = RecordBuilder::new()
    .int("a", 1)
    .int("b", 2)
    .int("a", 3)
    .build();
  assert_eq!(record.keys(), vec!["a", "b"]);
  assert_eq!(record.get::<i64>("a"), Some(3));
}

// ============================================================================
// Record Derivation Tests
// ============================================================================

#[test]
fn test_record_with_does_not_mutate_original() {
  let original = sample();
  let updated = original.with("age", 32).with("city", "Oslo");
  assert_eq!(original.get::<i64>("age"), Some(31));
  assert_eq!(updated.get::<i64>("age"), Some(32));
  assert_eq!(updated.keys(), vec!["name", "age", "score", "active", "city"]);
}

#[test]
fn test_record_without() {
  let record = sample().without("score");
  assert_eq!(record.keys(), vec!["name", "age", "active"]);
  assert_eq!(sample().without("missing"), sample());
}

#[test]
fn test_record_project_fills_null() {
  let projected = sample().project(&["age", "zip"]);
  assert_eq!(projected.keys(), vec!["age", "zip"]);
  assert_eq!(projected.value("zip"), Some(&Value::Null));
}

#[test]
fn test_record_merge_overwrites() {
  let left = Record::builder().int("a", 1).int("b", 2).build();
  let right = Record::builder().int("b", 20).int("c", 30).build();
  let merged = left.merge(&right);
  assert_eq!(merged.keys(), vec!["a", "b", "c"]);
  assert_eq!(merged.get::<i64>("b"), Some(20));
}

#[test]
fn test_record_from_iterator() {
  let record: Record = vec![("x", 1i64), ("y", 2i64)].into_iter().collect();
  assert_eq!(record.get::<i64>("y"), Some(2));
}

#[test]
fn test_record_display() {
  let record = Record::builder().string("k", "v").int("n", 1).build();
  assert_eq!(record.to_string(), "{k: \"v\", n: 1}");
}

// ============================================================================
// JSON Tests
// ============================================================================

#[test]
fn test_record_to_json_keeps_order() {
  let json = sample().to_json().unwrap();
  assert_eq!(
    serde_json::to_string(&sample()).unwrap(),
    r#"{"name":"alice","age":31,"score":9.5,"active":true}"#
  );
  assert_eq!(json["age"], json!(31));
}

#[test]
fn test_record_to_json_rejects_nested_stream() {
  let record = Record::builder()
    .stream("items", NestedStream::from_values(vec![Value::Int(1)]))
    .build();
  assert!(record.to_json().unwrap_err().is_element());
}

#[test]
fn test_record_from_json_object() {
  let record = Record::from_json(json!({"id": 7, "ratio": 0.25, "tag": "x", "nested": {"ok": true}})).unwrap();
  assert_eq!(record.get::<i64>("id"), Some(7));
  assert_eq!(record.get::<f64>("ratio"), Some(0.25));
  assert_eq!(record.get_str("tag"), Some("x"));
  let nested = record.get::<Record>("nested").unwrap();
  assert_eq!(nested.get::<bool>("ok"), Some(true));
}

#[test]
fn test_record_from_json_non_object() {
  let err = Record::from_json(json!([1, 2])).unwrap_err();
  assert!(err.is_element());
  assert_eq!(err.component().unwrap().name, "record");
}

#[tokio::test]
async fn test_json_array_becomes_nested_stream() {
  let record = Record::from_json(json!({"items": [1, 2, 3]})).unwrap();
  let items = record.get::<NestedStream>("items").unwrap();
  assert_eq!(
    items.collect().await.unwrap(),
    vec![Value::Int(1), Value::Int(2), Value::Int(3)]
  );
}

// ============================================================================
// NestedStream Tests
// ============================================================================

#[tokio::test]
async fn test_nested_stream_clones_share_cursor() {
  let stream = NestedStream::from_values(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
  let record = Record::builder().stream("s", stream).build();
  let copy = record.clone();

  let first = record.get::<NestedStream>("s").unwrap();
  let second = copy.get::<NestedStream>("s").unwrap();
  assert!(first.ptr_eq(&second));

  assert_eq!(first.next().await.value(), Some(Value::Int(1)));
  assert_eq!(second.next().await.value(), Some(Value::Int(2)));
  assert_eq!(first.collect().await.unwrap(), vec![Value::Int(3)]);
  assert!(matches!(second.next().await, Pull::End));
}

#[tokio::test]
async fn test_nested_stream_from_records_into_stream() {
  let rows = Stream::from_iter(vec![sample(), sample().with("age", 40)]);
  let nested = NestedStream::from_records(rows);
  let mut ages = nested
    .into_stream()
    .filter_map(|v| v.as_record().and_then(|r| r.get::<i64>("age")));
  assert_eq!(ages.collect().await.unwrap(), vec![31, 40]);
}
