//! # Fan-out
//!
//! [`tee`] turns one stream into `k` streams that each observe the full
//! upstream sequence, in order.
//!
//! ## Coordination
//!
//! There is no background task. The consumer that first needs an element
//! nobody has pulled yet locks the upstream, pulls exactly one element, keeps
//! it, and publishes a clone to the queue of every other live consumer. A
//! consumer whose queue is empty suspends only on the upstream lock or on the
//! upstream itself, never on a slower consumer.
//!
//! - No upstream element is pulled more than once.
//! - Each queue is appended in upstream order, so no consumer observes
//!   elements out of order.
//! - End of sequence and errors are recorded once and reported to each
//!   consumer after it has drained its queue. Every consumer sees an upstream
//!   error exactly once and then [`Pull::End`].
//!
//! ## Memory
//!
//! A queue holds the elements its consumer has not reached yet, so memory
//! grows with the gap between the fastest and the slowest live consumer. A
//! consumer that is held but never drained makes that gap unbounded. Dropping
//! a consumer frees its queue and stops publication to it. Queues that cross
//! [`TeeConfig::backlog_warning`] are reported through `tracing`.
//!
//! ```rust
//! use eventweave::stream::Stream;
//! use eventweave::tee::tee;
//!
//! # async fn example() -> eventweave::error::StreamResult<()> {
//! let mut copies = tee(Stream::from_iter(vec![1, 2, 3]), 2)?;
//! let mut second = copies.pop().unwrap();
//! let mut first = copies.pop().unwrap();
//!
//! assert_eq!(second.collect().await?, vec![1, 2, 3]);
//! assert_eq!(first.collect().await?, vec![1, 2, 3]);
//! # Ok(())
//! # }
//! ```

use crate::error::{StreamError, StreamResult};
use crate::stream::{Pull, Stream, Terminal, lock_state};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{trace, warn};

/// Default per-consumer backlog above which a warning is logged.
pub const DEFAULT_BACKLOG_WARNING: usize = 10_000;

/// Configuration for [`tee_with_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeeConfig {
  /// Queue length at which a lagging consumer is reported.
  pub backlog_warning: usize,
}

impl Default for TeeConfig {
  fn default() -> Self {
    Self {
      backlog_warning: DEFAULT_BACKLOG_WARNING,
    }
  }
}

impl TeeConfig {
  /// Creates the default configuration.
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the backlog warning threshold.
  pub fn with_backlog_warning(mut self, backlog_warning: usize) -> Self {
    self.backlog_warning = backlog_warning;
    self
  }
}

struct TeeState<T> {
  /// One queue per consumer; `None` once the consumer is dropped.
  queues: Vec<Option<VecDeque<T>>>,
  terminal: Option<Terminal>,
}

struct Shared<T> {
  state: Mutex<TeeState<T>>,
  upstream: tokio::sync::Mutex<Stream<T>>,
  config: TeeConfig,
}

impl<T: Clone + Send + 'static> Shared<T> {
  /// The consumer's next buffered element, or the recorded terminal once the
  /// queue is drained.
  fn buffered(&self, index: usize) -> Option<Pull<T>> {
    let mut state = lock_state(&self.state);
    if let Some(item) = state.queues[index].as_mut().and_then(VecDeque::pop_front) {
      return Some(Pull::Value(item));
    }
    state.terminal.as_ref().map(Terminal::to_pull)
  }

  async fn pull(&self, index: usize) -> Pull<T> {
    loop {
      if let Some(pull) = self.buffered(index) {
        return pull;
      }
      let mut upstream = self.upstream.lock().await;
      // Another consumer may have pulled while this one waited for the lock.
      if let Some(pull) = self.buffered(index) {
        return pull;
      }
      trace!(consumer = index, "tee pulling upstream");
      match upstream.next().await {
        Pull::Value(item) => {
          self.publish(index, &item);
          return Pull::Value(item);
        }
        Pull::End => {
          lock_state(&self.state).terminal = Some(Terminal::End);
          return Pull::End;
        }
        Pull::Error(err) => {
          lock_state(&self.state).terminal = Some(Terminal::Error(err.clone()));
          return Pull::Error(err);
        }
      }
    }
  }

  fn publish(&self, from: usize, item: &T) {
    let mut state = lock_state(&self.state);
    for (index, queue) in state.queues.iter_mut().enumerate() {
      if index == from {
        continue;
      }
      if let Some(queue) = queue {
        queue.push_back(item.clone());
        if queue.len() == self.config.backlog_warning {
          warn!(
            consumer = index,
            backlog = queue.len(),
            "tee consumer is falling behind; its queue grows until it is drained or dropped"
          );
        }
      }
    }
  }
}

/// One consumer's claim on the shared state. Dropping it releases the queue.
struct Slot<T> {
  shared: Arc<Shared<T>>,
  index: usize,
}

impl<T> Drop for Slot<T> {
  fn drop(&mut self) {
    let mut state = lock_state(&self.shared.state);
    if let Some(queue) = state.queues[self.index].take() {
      trace!(consumer = self.index, discarded = queue.len(), "tee consumer dropped");
    }
  }
}

/// Splits `stream` into `k` independent copies with the default
/// configuration.
///
/// # Errors
///
/// Returns a configuration error when `k` is zero.
pub fn tee<T>(stream: Stream<T>, k: usize) -> StreamResult<Vec<Stream<T>>>
where
  T: Clone + Send + 'static,
{
  tee_with_config(stream, k, TeeConfig::default())
}

/// Splits `stream` into `k` independent copies.
///
/// # Errors
///
/// Returns a configuration error when `k` is zero.
pub fn tee_with_config<T>(
  stream: Stream<T>,
  k: usize,
  config: TeeConfig,
) -> StreamResult<Vec<Stream<T>>>
where
  T: Clone + Send + 'static,
{
  if k == 0 {
    return Err(StreamError::configuration("tee needs at least one consumer"));
  }
  let shared = Arc::new(Shared {
    state: Mutex::new(TeeState {
      queues: (0..k).map(|_| Some(VecDeque::new())).collect(),
      terminal: None,
    }),
    upstream: tokio::sync::Mutex::new(stream),
    config,
  });

  Ok(
    (0..k)
      .map(|index| {
        let slot = Slot {
          shared: Arc::clone(&shared),
          index,
        };
        Stream::from_try_stream(async_stream::stream! {
          loop {
            match slot.shared.pull(slot.index).await {
              Pull::Value(item) => yield Ok(item),
              Pull::Error(err) => {
                yield Err(err);
                break;
              }
              Pull::End => break,
            }
          }
        })
      })
      .collect(),
  )
}

impl<T: Clone + Send + 'static> Stream<T> {
  /// Method form of [`tee`].
  ///
  /// # Errors
  ///
  /// Returns a configuration error when `k` is zero.
  pub fn tee(self, k: usize) -> StreamResult<Vec<Stream<T>>> {
    tee(self, k)
  }
}
