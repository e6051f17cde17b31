//! # Consumer Test Suite
//!
//! Tests for the [`Consumer`] trait, the built-in consumers and
//! [`drain_into`].

use crate::consumer::{Consumer, ConsumerConfig, ForEachConsumer, VecConsumer, drain_into};
use crate::error::{StreamError, StreamResult};
use crate::stream::Stream;
use async_trait::async_trait;

/// Records the order of calls it receives.
#[derive(Default)]
struct Journal {
  events: Vec<String>,
  fail_on: Option<i32>,
  config: ConsumerConfig,
}

#[async_trait]
impl Consumer<i32> for Journal {
  async fn consume(&mut self, item: i32) -> StreamResult<()> {
    if self.fail_on == Some(item) {
      return Err(StreamError::element("journal", format!("rejected {}", item)));
    }
    self.events.push(format!("item {}", item));
    Ok(())
  }

  async fn finish(&mut self) -> StreamResult<()> {
    self.events.push("finish".to_string());
    Ok(())
  }

  fn config(&self) -> &ConsumerConfig {
    &self.config
  }
}

// ============================================================================
// ConsumerConfig Tests
// ============================================================================

#[test]
fn test_consumer_config_default() {
  let config = ConsumerConfig::default();
  assert_eq!(config.name(), "");
  assert_eq!(config.with_name("sink").name(), "sink");
}

#[test]
fn test_component_info_uses_name_or_type() {
  let unnamed = VecConsumer::<i32>::new();
  let info = unnamed.component_info();
  assert_eq!(info.name, info.type_name);
  assert!(info.type_name.contains("VecConsumer"));

  let named = VecConsumer::<i32>::new().with_name("results");
  let info = named.component_info();
  assert_eq!(info.name, "results");
  assert!(info.type_name.contains("VecConsumer"));
}

// ============================================================================
// drain_into Tests
// ============================================================================

#[tokio::test]
async fn test_drain_into_vec_consumer() {
  let mut consumer = VecConsumer::with_capacity(3);
  let mut stream = Stream::from_iter(vec![1, 2, 3]);
  assert_eq!(drain_into(&mut stream, &mut consumer).await.unwrap(), 3);
  assert_eq!(consumer.vec, vec![1, 2, 3]);
  assert!(stream.next().await.is_end());
}

#[tokio::test]
async fn test_drain_into_empty_stream_still_finishes() {
  let mut journal = Journal::default();
  let consumed = Stream::<i32>::empty().drain_into(&mut journal).await.unwrap();
  assert_eq!(consumed, 0);
  assert_eq!(journal.events, vec!["finish"]);
}

#[tokio::test]
async fn test_drain_into_calls_finish_after_items() {
  let mut journal = Journal::default();
  Stream::from_iter(vec![1, 2]).drain_into(&mut journal).await.unwrap();
  assert_eq!(journal.events, vec!["item 1", "item 2", "finish"]);
}

#[tokio::test]
async fn test_drain_into_stops_on_upstream_error() {
  let mut journal = Journal::default();
  let mut stream = Stream::from_results(vec![
    Ok(1),
    Err(StreamError::element("source", "disk gone")),
    Ok(2),
  ]);
  let err = stream.drain_into(&mut journal).await.unwrap_err();
  assert_eq!(err.component().unwrap().name, "source");
  assert_eq!(journal.events, vec!["item 1"]);
}

#[tokio::test]
async fn test_drain_into_stops_on_consumer_error() {
  let mut journal = Journal {
    fail_on: Some(2),
    ..Journal::default()
  };
  let mut stream = Stream::from_iter(vec![1, 2, 3]);
  let err = stream.drain_into(&mut journal).await.unwrap_err();
  assert_eq!(err.component().unwrap().name, "journal");
  assert_eq!(journal.events, vec!["item 1"]);

  // The stream is left where the consumer stopped.
  assert_eq!(stream.next().await.value(), Some(3));
}

#[tokio::test]
async fn test_drain_into_trait_object() {
  let mut consumer: Box<dyn Consumer<i32>> = Box::new(VecConsumer::new());
  let consumed = Stream::from_iter(0..10).drain_into(consumer.as_mut()).await.unwrap();
  assert_eq!(consumed, 10);
}

// ============================================================================
// ForEachConsumer Tests
// ============================================================================

#[tokio::test]
async fn test_for_each_consumer() {
  let mut total = 0i64;
  {
    let mut consumer = ForEachConsumer::new(|n: i64| -> StreamResult<()> {
      total += n;
      Ok(())
    })
    .with_name("summer");
    assert_eq!(Consumer::<i64>::component_info(&consumer).name, "summer");
    Stream::from_iter(vec![5i64, 6, 7])
      .drain_into(&mut consumer)
      .await
      .unwrap();
  }
  assert_eq!(total, 18);
}

#[tokio::test]
async fn test_for_each_consumer_error() {
  let mut consumer = ForEachConsumer::new(|n: i32| -> StreamResult<()> {
    if n < 0 {
      Err(StreamError::element("validator", "negative"))
    } else {
      Ok(())
    }
  });
  let err = Stream::from_iter(vec![1, -1])
    .drain_into(&mut consumer)
    .await
    .unwrap_err();
  assert!(err.is_element());
  assert!(format!("{:?}", consumer).starts_with("ForEachConsumer"));
}
