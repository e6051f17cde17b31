//! # Parallel Map
//!
//! Opt-in concurrency for expensive per-element work. Both operations pull
//! upstream lazily, keep at most `concurrency` elements in flight, and run
//! each on its own tokio task.
//!
//! - [`par_map`] emits results in upstream order. A slow element holds back
//!   the ones after it.
//! - [`par_map_unordered`] emits results as they complete.
//!
//! An error (from upstream, from `f`, or a panicking task) is emitted in the
//! position the failed element would have taken and halts the output. Tasks
//! already in flight at that point run to completion and their results are
//! discarded.

use crate::error::{StreamError, StreamResult};
use crate::stream::Stream;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tracing::trace;

const COMPONENT: &str = "par_map";

fn check_concurrency(concurrency: usize) -> StreamResult<()> {
  if concurrency == 0 {
    return Err(StreamError::configuration(
      "parallel map concurrency must be positive",
    ));
  }
  Ok(())
}

fn spawn_each<T, U, F, Fut>(
  stream: Stream<T>,
  f: F,
) -> impl futures::Stream<Item = impl Future<Output = StreamResult<U>> + Send> + Send
where
  T: Send + 'static,
  U: Send + 'static,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = StreamResult<U>> + Send + 'static,
{
  let f = Arc::new(f);
  stream.into_futures().enumerate().map(move |(index, item)| {
    let f = Arc::clone(&f);
    async move {
      let item = item?;
      trace!(index, "spawning parallel map task");
      tokio::spawn(f(item))
        .await
        .map_err(|err| StreamError::element(COMPONENT, err))?
    }
  })
}

/// Applies the async function `f` to every element with up to `concurrency`
/// calls in flight, emitting results in upstream order.
///
/// # Errors
///
/// Returns a configuration error when `concurrency` is zero.
pub fn par_map<T, U, F, Fut>(stream: Stream<T>, concurrency: usize, f: F) -> StreamResult<Stream<U>>
where
  T: Send + 'static,
  U: Send + 'static,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = StreamResult<U>> + Send + 'static,
{
  check_concurrency(concurrency)?;
  Ok(Stream::from_try_stream(
    spawn_each(stream, f).buffered(concurrency),
  ))
}

/// Applies the async function `f` to every element with up to `concurrency`
/// calls in flight, emitting results in completion order.
///
/// # Errors
///
/// Returns a configuration error when `concurrency` is zero.
pub fn par_map_unordered<T, U, F, Fut>(
  stream: Stream<T>,
  concurrency: usize,
  f: F,
) -> StreamResult<Stream<U>>
where
  T: Send + 'static,
  U: Send + 'static,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = StreamResult<U>> + Send + 'static,
{
  check_concurrency(concurrency)?;
  Ok(Stream::from_try_stream(
    spawn_each(stream, f).buffer_unordered(concurrency),
  ))
}

impl<T: Send + 'static> Stream<T> {
  /// Method form of [`par_map`].
  ///
  /// # Errors
  ///
  /// Returns a configuration error when `concurrency` is zero.
  pub fn par_map<U, F, Fut>(self, concurrency: usize, f: F) -> StreamResult<Stream<U>>
  where
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StreamResult<U>> + Send + 'static,
  {
    par_map(self, concurrency, f)
  }

  /// Method form of [`par_map_unordered`].
  ///
  /// # Errors
  ///
  /// Returns a configuration error when `concurrency` is zero.
  pub fn par_map_unordered<U, F, Fut>(self, concurrency: usize, f: F) -> StreamResult<Stream<U>>
  where
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StreamResult<U>> + Send + 'static,
  {
    par_map_unordered(self, concurrency, f)
  }
}
