//! # Stream Test Suite
//!
//! Tests for the pull protocol, constructors, combinators and terminal
//! operations of [`Stream`].

use crate::error::{StreamError, StreamResult};
use crate::stream::{Pull, Stream};
use futures::StreamExt;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// An infinite counting stream that records how many times it was pulled.
fn counting(pulls: Arc<AtomicUsize>) -> Stream<usize> {
  Stream::from_fn(move || Some(Ok(pulls.fetch_add(1, Ordering::SeqCst))))
}

fn boom() -> StreamError {
  StreamError::element("test_source", "boom")
}

fn run<F: std::future::Future>(future: F) -> F::Output {
  tokio::runtime::Builder::new_current_thread()
    .build()
    .unwrap()
    .block_on(future)
}

// ============================================================================
// Pull Tests
// ============================================================================

#[test]
fn test_pull_accessors() {
  assert!(Pull::Value(1).is_value());
  assert!(Pull::<i32>::End.is_end());
  assert!(Pull::<i32>::Error(boom()).is_error());
  assert_eq!(Pull::Value(1).value(), Some(1));
  assert_eq!(Pull::<i32>::End.value(), None);
  assert!(Pull::<i32>::End.into_option().is_none());
}

#[test]
fn test_pull_from_option() {
  assert!(Pull::from(Some(Ok::<_, StreamError>(3))).is_value());
  assert!(Pull::<i32>::from(None).is_end());
  assert!(Pull::<i32>::from(Some(Err(boom()))).is_error());
}

// ============================================================================
// Termination Protocol Tests
// ============================================================================

#[tokio::test]
async fn test_end_is_idempotent() {
  let mut stream = Stream::from_iter(vec![1]);
  assert_eq!(stream.next().await.value(), Some(1));
  for _ in 0..3 {
    assert!(stream.next().await.is_end());
  }
}

#[tokio::test]
async fn test_error_reported_once_then_end() {
  let mut stream = Stream::from_results(vec![Ok(1), Err(boom()), Ok(2)]);
  assert_eq!(stream.next().await.value(), Some(1));
  assert!(stream.next().await.is_error());
  assert!(stream.next().await.is_end());
  assert!(stream.next().await.is_end());
}

#[tokio::test]
async fn test_error_passes_through_combinators_unchanged() {
  let mut stream = Stream::from_results(vec![Ok(1), Err(boom()), Ok(3)])
    .map(|n| n * 2)
    .filter(|_| true)
    .take(10);
  assert_eq!(stream.next().await.value(), Some(2));
  match stream.next().await {
    Pull::Error(err) => {
      assert_eq!(err.component().unwrap().name, "test_source");
      assert_eq!(err.cause().unwrap().to_string(), "boom");
    }
    _ => panic!("expected the upstream error"),
  }
  assert!(stream.next().await.is_end());
}

#[tokio::test]
async fn test_failed_stream() {
  let mut stream = Stream::<i32>::failed(boom());
  assert!(stream.collect().await.is_err());
  assert!(stream.next().await.is_end());
}

// ============================================================================
// Constructor Tests
// ============================================================================

#[tokio::test]
async fn test_from_iter_range() {
  let mut stream = Stream::from_iter(1..=4);
  assert_eq!(stream.collect().await.unwrap(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_once_and_empty() {
  assert_eq!(Stream::once("x").collect().await.unwrap(), vec!["x"]);
  assert!(Stream::<u8>::empty().collect().await.unwrap().is_empty());
  assert!(Stream::<u8>::default().next().await.is_end());
}

#[tokio::test]
async fn test_from_fn_generator() {
  let mut n = 0;
  let mut stream = Stream::from_fn(move || {
    n += 1;
    (n <= 3).then_some(Ok(n))
  });
  assert_eq!(stream.collect().await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_unfold_async_generator() {
  let mut stream = Stream::unfold(1u32, |n| async move { (n <= 8).then(|| (Ok(n), n * 2)) });
  assert_eq!(stream.collect().await.unwrap(), vec![1, 2, 4, 8]);
}

#[tokio::test]
async fn test_from_receiver_ends_when_senders_drop() {
  let (tx, rx) = mpsc::channel(4);
  let mut stream = Stream::from_receiver(rx);
  tokio::spawn(async move {
    for n in 0..3 {
      tx.send(Ok(n)).await.unwrap();
    }
  });
  assert_eq!(stream.collect().await.unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_from_unbounded_receiver_carries_errors() {
  let (tx, rx) = mpsc::unbounded_channel();
  tx.send(Ok(1)).unwrap();
  tx.send(Err(boom())).unwrap();
  tx.send(Ok(2)).unwrap();
  let mut stream = Stream::from_unbounded_receiver(rx);
  assert_eq!(stream.next().await.value(), Some(1));
  assert!(stream.next().await.is_error());
  assert!(stream.next().await.is_end());
}

#[tokio::test]
async fn test_futures_interop_round_trip() {
  let inner = futures::stream::iter(vec![Ok(1), Ok(2)]);
  let stream: Stream<i32> = Stream::from_try_stream(inner);
  let items: Vec<StreamResult<i32>> = stream.into_futures().collect().await;
  assert_eq!(items.len(), 2);
  assert!(items.iter().all(Result::is_ok));
}

// ============================================================================
// Combinator Tests
// ============================================================================

#[tokio::test]
async fn test_map_filter_take() {
  let mut stream = Stream::from_iter(1..=10)
    .filter(|n| n % 2 == 1)
    .map(|n| n * n)
    .take(3);
  assert_eq!(stream.collect().await.unwrap(), vec![1, 9, 25]);
}

#[tokio::test]
async fn test_take_never_pulls_past_n() {
  let pulls = Arc::new(AtomicUsize::new(0));
  let mut stream = counting(Arc::clone(&pulls)).take(5);
  assert_eq!(stream.collect().await.unwrap(), vec![0, 1, 2, 3, 4]);
  assert_eq!(pulls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_take_zero_pulls_nothing() {
  let pulls = Arc::new(AtomicUsize::new(0));
  let mut stream = counting(Arc::clone(&pulls)).take(0);
  assert!(stream.next().await.is_end());
  assert_eq!(pulls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_combinators_are_lazy() {
  let pulls = Arc::new(AtomicUsize::new(0));
  let stream = counting(Arc::clone(&pulls)).map(|n| n + 1).filter(|n| n % 2 == 0);
  assert_eq!(pulls.load(Ordering::SeqCst), 0);
  drop(stream);
  assert_eq!(pulls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_try_map_failure_halts() {
  let mut stream = Stream::from_iter(vec!["1", "x", "3"]).try_map(|s| s.parse::<i32>());
  assert_eq!(stream.next().await.value(), Some(1));
  match stream.next().await {
    Pull::Error(err) => assert_eq!(err.component().unwrap().name, "try_map"),
    _ => panic!("expected a parse failure"),
  }
  assert!(stream.next().await.is_end());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_try_map_runs_on_spawned_task() {
  let mut stream = Stream::from_iter(vec!["4", "5"]).try_map(|s| s.parse::<i32>());
  let handle = tokio::spawn(async move { stream.collect().await });
  assert_eq!(handle.await.unwrap().unwrap(), vec![4, 5]);
}

#[tokio::test]
async fn test_filter_map() {
  let mut stream = Stream::from_iter(vec!["1", "x", "3"]).filter_map(|s| s.parse::<i32>().ok());
  assert_eq!(stream.collect().await.unwrap(), vec![1, 3]);
}

#[tokio::test]
async fn test_skip_and_take_while() {
  let mut skipped = Stream::from_iter(1..=5).skip(2);
  assert_eq!(skipped.collect().await.unwrap(), vec![3, 4, 5]);

  let mut prefix = Stream::from_iter(vec![1, 2, 5, 1]).take_while(|n| *n < 3);
  assert_eq!(prefix.collect().await.unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_inspect_and_enumerate() {
  let seen = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&seen);
  let mut stream = Stream::from_iter(vec!['a', 'b'])
    .inspect(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    })
    .enumerate();
  assert_eq!(stream.collect().await.unwrap(), vec![(0, 'a'), (1, 'b')]);
  assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_chain() {
  let mut stream = Stream::from_iter(vec![1, 2]).chain(Stream::from_iter(vec![3]));
  assert_eq!(stream.collect().await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_chain_stops_at_first_error() {
  let mut stream = Stream::failed(boom()).chain(Stream::from_iter(vec![3]));
  assert!(stream.next().await.is_error());
  assert!(stream.next().await.is_end());
}

#[tokio::test]
async fn test_pipe_applies_stage() {
  fn doubled(stream: Stream<i32>) -> Stream<i32> {
    stream.map(|n| n * 2)
  }
  let mut stream = Stream::from_iter(vec![1, 2]).pipe(doubled);
  assert_eq!(stream.collect().await.unwrap(), vec![2, 4]);
}

#[tokio::test]
async fn test_batch() {
  let mut stream = Stream::from_iter(1..=5).batch(2).unwrap();
  assert_eq!(
    stream.collect().await.unwrap(),
    vec![vec![1, 2], vec![3, 4], vec![5]]
  );
  assert!(Stream::from_iter(1..=5).batch(0).unwrap_err().is_configuration());
}

#[tokio::test]
async fn test_zip_ends_with_shorter() {
  let mut stream = Stream::from_iter(vec![1, 2, 3]).zip(Stream::from_iter(vec!["a", "b"]));
  assert_eq!(stream.collect().await.unwrap(), vec![(1, "a"), (2, "b")]);
}

#[tokio::test]
async fn test_flatten() {
  let nested = Stream::from_iter(vec![
    Stream::from_iter(vec![1, 2]),
    Stream::empty(),
    Stream::from_iter(vec![3]),
  ]);
  assert_eq!(nested.flatten().collect().await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_sample_is_reproducible() {
  let first = Stream::from_iter(0..1_000).sample(0.25, 7).unwrap().collect().await.unwrap();
  let second = Stream::from_iter(0..1_000).sample(0.25, 7).unwrap().collect().await.unwrap();
  assert_eq!(first, second);
  assert!(first.len() > 150 && first.len() < 350);
}

#[tokio::test]
async fn test_sample_bounds() {
  assert_eq!(Stream::from_iter(0..10).sample(1.0, 1).unwrap().count().await.unwrap(), 10);
  assert_eq!(Stream::from_iter(0..10).sample(0.0, 1).unwrap().count().await.unwrap(), 0);
  assert!(Stream::from_iter(0..10).sample(1.5, 1).unwrap_err().is_configuration());
}

// ============================================================================
// Terminal Operation Tests
// ============================================================================

#[tokio::test]
async fn test_collect_twice_returns_empty() {
  let mut stream = Stream::from_iter(vec![1, 2]);
  assert_eq!(stream.collect().await.unwrap(), vec![1, 2]);
  assert!(stream.collect().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fold_count_for_each() {
  assert_eq!(Stream::from_iter(1..=4).fold(0, |acc, n| acc + n).await.unwrap(), 10);
  assert_eq!(Stream::from_iter(1..=4).count().await.unwrap(), 4);

  let mut seen = Vec::new();
  Stream::from_iter(vec!['x', 'y']).for_each(|c| seen.push(c)).await.unwrap();
  assert_eq!(seen, vec!['x', 'y']);
}

#[tokio::test]
async fn test_fold_returns_error() {
  let result = Stream::from_results(vec![Ok(1), Err(boom())])
    .fold(0, |acc, n| acc + n)
    .await;
  assert!(result.unwrap_err().is_element());
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
  #[test]
  fn prop_map_filter_take_matches_iterator(
    items in proptest::collection::vec(-1_000i64..1_000, 0..64),
    n in 0usize..80,
  ) {
    let expected: Vec<i64> = items.iter().map(|x| x * 3).filter(|x| x % 2 == 0).take(n).collect();
    let actual = run(async {
      Stream::from_iter(items.clone())
        .map(|x| x * 3)
        .filter(|x| x % 2 == 0)
        .take(n)
        .collect()
        .await
    }).unwrap();
    prop_assert_eq!(actual, expected);
  }

  #[test]
  fn prop_take_pull_count_is_exact(n in 0usize..50) {
    let pulls = Arc::new(AtomicUsize::new(0));
    let collected = run(counting(Arc::clone(&pulls)).take(n).count()).unwrap();
    prop_assert_eq!(collected, n);
    prop_assert_eq!(pulls.load(Ordering::SeqCst), n);
  }

  #[test]
  fn prop_batch_preserves_elements(
    items in proptest::collection::vec(any::<u8>(), 0..64),
    size in 1usize..10,
  ) {
    let batches = run(async {
      Stream::from_iter(items.clone()).batch(size).unwrap().collect().await
    }).unwrap();
    prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
    let flat: Vec<u8> = batches.into_iter().flatten().collect();
    prop_assert_eq!(flat, items);
  }
}
