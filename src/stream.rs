//! # Lazy Pull Streams
//!
//! [`Stream<T>`] is the single abstraction everything else in the crate is
//! built on: a source that, when pulled, produces the next `T`, reports end of
//! sequence, or reports an error.
//!
//! ## Termination Protocol
//!
//! - [`Pull::End`] is reported once the sequence is exhausted, and on every
//!   pull after that.
//! - [`Pull::Error`] halts the stream. The error is reported exactly once and
//!   every later pull reports [`Pull::End`].
//! - A stream is single-pass. Pulled positions are never revisited; use
//!   [`tee`](crate::tee::tee) to observe the same sequence more than once.
//!
//! ## Laziness
//!
//! Combinators such as [`Stream::map`], [`Stream::filter`] and
//! [`Stream::take`] wrap their upstream and only pull it when they are pulled
//! themselves. Nothing runs until a consumer pulls.
//!
//! ## Example
//!
//! ```rust
//! use eventweave::stream::Stream;
//!
//! # async fn example() -> eventweave::error::StreamResult<()> {
//! let mut evens = Stream::from_iter(1..=10)
//!   .filter(|n| n % 2 == 0)
//!   .map(|n| n * 10)
//!   .take(3);
//!
//! assert_eq!(evens.collect().await?, vec![20, 40, 60]);
//! assert!(evens.collect().await?.is_empty());
//! # Ok(())
//! # }
//! ```

use crate::error::{StreamError, StreamResult};
use futures::StreamExt;
use pin_project::pin_project;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};

/// Boxed `futures` stream of fallible items, the representation behind
/// [`Stream<T>`].
pub type BoxTryStream<T> = Pin<Box<dyn futures::Stream<Item = StreamResult<T>> + Send>>;

/// Outcome of a single pull.
#[derive(Debug)]
pub enum Pull<T> {
  /// The next element.
  Value(T),
  /// The sequence is exhausted.
  End,
  /// The pull failed; the stream is halted.
  Error(StreamError),
}

impl<T> Pull<T> {
  /// Returns true for [`Pull::Value`].
  pub fn is_value(&self) -> bool {
    matches!(self, Pull::Value(_))
  }

  /// Returns true for [`Pull::End`].
  pub fn is_end(&self) -> bool {
    matches!(self, Pull::End)
  }

  /// Returns true for [`Pull::Error`].
  pub fn is_error(&self) -> bool {
    matches!(self, Pull::Error(_))
  }

  /// Returns the value, if any.
  pub fn value(self) -> Option<T> {
    match self {
      Pull::Value(value) => Some(value),
      _ => None,
    }
  }

  /// Converts into the `Option<Result<_>>` shape used by `futures` streams.
  pub fn into_option(self) -> Option<StreamResult<T>> {
    match self {
      Pull::Value(value) => Some(Ok(value)),
      Pull::Error(err) => Some(Err(err)),
      Pull::End => None,
    }
  }
}

impl<T> From<Option<StreamResult<T>>> for Pull<T> {
  fn from(item: Option<StreamResult<T>>) -> Self {
    match item {
      Some(Ok(value)) => Pull::Value(value),
      Some(Err(err)) => Pull::Error(err),
      None => Pull::End,
    }
  }
}

/// How a shared upstream finished. Stored by fan-out operators so that every
/// consumer observes the same ending after draining its own backlog.
#[derive(Debug, Clone)]
pub(crate) enum Terminal {
  End,
  Error(StreamError),
}

impl Terminal {
  pub(crate) fn to_pull<T>(&self) -> Pull<T> {
    match self {
      Terminal::End => Pull::End,
      Terminal::Error(err) => Pull::Error(err.clone()),
    }
  }
}

/// Locks coordinator state. A panic while holding the lock leaves the queues
/// structurally valid, so poisoning is ignored.
pub(crate) fn lock_state<S>(state: &Mutex<S>) -> MutexGuard<'_, S> {
  state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Enforces the termination protocol on an arbitrary `futures` stream:
/// nothing is polled after the first `None` or the first error.
#[pin_project]
struct Halting<S> {
  #[pin]
  inner: S,
  done: bool,
}

impl<S> Halting<S> {
  fn new(inner: S) -> Self {
    Self { inner, done: false }
  }
}

impl<S, T> futures::Stream for Halting<S>
where
  S: futures::Stream<Item = StreamResult<T>>,
{
  type Item = StreamResult<T>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.project();
    if *this.done {
      return Poll::Ready(None);
    }
    match this.inner.poll_next(cx) {
      Poll::Ready(Some(Ok(value))) => Poll::Ready(Some(Ok(value))),
      Poll::Ready(Some(Err(err))) => {
        *this.done = true;
        Poll::Ready(Some(Err(err)))
      }
      Poll::Ready(None) => {
        *this.done = true;
        Poll::Ready(None)
      }
      Poll::Pending => Poll::Pending,
    }
  }
}

/// A lazy, single-pass, pull-based sequence of `T`.
///
/// See the [module documentation](self) for the termination protocol.
pub struct Stream<T> {
  inner: BoxTryStream<T>,
}

impl<T> std::fmt::Debug for Stream<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Stream").finish_non_exhaustive()
  }
}

impl<T: Send + 'static> Stream<T> {
  /// Wraps a `futures` stream of fallible items.
  pub fn from_try_stream<S>(stream: S) -> Self
  where
    S: futures::Stream<Item = StreamResult<T>> + Send + 'static,
  {
    Self {
      inner: Box::pin(Halting::new(stream)),
    }
  }

  /// Wraps an infallible `futures` stream.
  pub fn from_stream<S>(stream: S) -> Self
  where
    S: futures::Stream<Item = T> + Send + 'static,
  {
    Self::from_try_stream(stream.map(Ok))
  }

  /// Creates a stream over the items of an iterator (a slice, a `Vec`, a
  /// range, ...).
  #[allow(clippy::should_implement_trait)]
  pub fn from_iter<I>(items: I) -> Self
  where
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
  {
    Self::from_try_stream(futures::stream::iter(items.into_iter().map(Ok)))
  }

  /// Creates a stream over already-decoded results, e.g. the output of a
  /// record decoder. The first `Err` halts the stream.
  pub fn from_results<I>(items: I) -> Self
  where
    I: IntoIterator<Item = StreamResult<T>>,
    I::IntoIter: Send + 'static,
  {
    Self::from_try_stream(futures::stream::iter(items))
  }

  /// Creates a stream from a generator function.
  ///
  /// The function is called once per pull; `None` ends the sequence.
  pub fn from_fn<F>(mut generator: F) -> Self
  where
    F: FnMut() -> Option<StreamResult<T>> + Send + 'static,
  {
    Self::from_try_stream(futures::stream::poll_fn(move |_| Poll::Ready(generator())))
  }

  /// Creates a stream from an asynchronous generator over some state.
  pub fn unfold<S, F, Fut>(state: S, generator: F) -> Self
  where
    S: Send + 'static,
    F: FnMut(S) -> Fut + Send + 'static,
    Fut: Future<Output = Option<(StreamResult<T>, S)>> + Send + 'static,
  {
    Self::from_try_stream(futures::stream::unfold(state, generator))
  }

  /// Creates a stream fed by a bounded channel. The sequence ends when every
  /// sender is dropped.
  pub fn from_receiver(receiver: mpsc::Receiver<StreamResult<T>>) -> Self {
    Self::from_try_stream(ReceiverStream::new(receiver))
  }

  /// Creates a stream fed by an unbounded channel.
  pub fn from_unbounded_receiver(receiver: mpsc::UnboundedReceiver<StreamResult<T>>) -> Self {
    Self::from_try_stream(UnboundedReceiverStream::new(receiver))
  }

  /// A stream holding exactly one element.
  pub fn once(value: T) -> Self {
    Self::from_try_stream(futures::stream::once(async move { Ok(value) }))
  }

  /// A stream that is already exhausted.
  pub fn empty() -> Self {
    Self::from_try_stream(futures::stream::empty())
  }

  /// A stream whose first pull fails with `err`.
  pub fn failed(err: StreamError) -> Self {
    Self::from_try_stream(futures::stream::once(async move { Err(err) }))
  }

  /// Pulls the next element.
  ///
  /// Suspends only while the upstream is producing.
  pub async fn next(&mut self) -> Pull<T> {
    self.inner.next().await.into()
  }

  /// Returns the underlying `futures` stream for use with ecosystem
  /// combinators. The termination protocol still holds.
  pub fn into_futures(self) -> BoxTryStream<T> {
    self.inner
  }

  /// Applies `f` to every element.
  pub fn map<U, F>(self, mut f: F) -> Stream<U>
  where
    U: Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
  {
    let mut upstream = self;
    Stream::from_try_stream(async_stream::stream! {
      loop {
        match upstream.next().await {
          Pull::Value(value) => yield Ok(f(value)),
          Pull::Error(err) => {
            yield Err(err);
            break;
          }
          Pull::End => break,
        }
      }
    })
  }

  /// Applies a fallible `f` to every element. The first failure is reported
  /// as an element error attributed to `try_map` and halts the stream.
  pub fn try_map<U, E, F>(self, mut f: F) -> Stream<U>
  where
    U: Send + 'static,
    E: Into<Box<dyn Error + Send + Sync>> + Send,
    F: FnMut(T) -> Result<U, E> + Send + 'static,
  {
    let mut upstream = self;
    Stream::from_try_stream(async_stream::stream! {
      loop {
        match upstream.next().await {
          Pull::Value(value) => match f(value) {
            Ok(mapped) => yield Ok(mapped),
            Err(err) => {
              yield Err(StreamError::element("try_map", err));
              break;
            }
          },
          Pull::Error(err) => {
            yield Err(err);
            break;
          }
          Pull::End => break,
        }
      }
    })
  }

  /// Keeps the elements matching `predicate`.
  ///
  /// A single downstream pull may pull upstream several times, but stops at
  /// the first end of sequence or error.
  pub fn filter<F>(self, mut predicate: F) -> Self
  where
    F: FnMut(&T) -> bool + Send + 'static,
  {
    let mut upstream = self;
    Stream::from_try_stream(async_stream::stream! {
      loop {
        match upstream.next().await {
          Pull::Value(value) => {
            if predicate(&value) {
              yield Ok(value);
            }
          }
          Pull::Error(err) => {
            yield Err(err);
            break;
          }
          Pull::End => break,
        }
      }
    })
  }

  /// Maps and filters in one step.
  pub fn filter_map<U, F>(self, mut f: F) -> Stream<U>
  where
    U: Send + 'static,
    F: FnMut(T) -> Option<U> + Send + 'static,
  {
    let mut upstream = self;
    Stream::from_try_stream(async_stream::stream! {
      loop {
        match upstream.next().await {
          Pull::Value(value) => {
            if let Some(mapped) = f(value) {
              yield Ok(mapped);
            }
          }
          Pull::Error(err) => {
            yield Err(err);
            break;
          }
          Pull::End => break,
        }
      }
    })
  }

  /// Yields at most `n` elements. Upstream is never pulled past the `n`th
  /// element.
  pub fn take(self, n: usize) -> Self {
    let mut upstream = self;
    Stream::from_try_stream(async_stream::stream! {
      let mut remaining = n;
      while remaining > 0 {
        match upstream.next().await {
          Pull::Value(value) => {
            remaining -= 1;
            yield Ok(value);
          }
          Pull::Error(err) => {
            yield Err(err);
            break;
          }
          Pull::End => break,
        }
      }
    })
  }

  /// Discards the first `n` elements.
  pub fn skip(self, n: usize) -> Self {
    let mut upstream = self;
    Stream::from_try_stream(async_stream::stream! {
      let mut skipped = 0;
      loop {
        match upstream.next().await {
          Pull::Value(value) => {
            if skipped < n {
              skipped += 1;
            } else {
              yield Ok(value);
            }
          }
          Pull::Error(err) => {
            yield Err(err);
            break;
          }
          Pull::End => break,
        }
      }
    })
  }

  /// Yields elements while `predicate` holds, then ends.
  pub fn take_while<F>(self, mut predicate: F) -> Self
  where
    F: FnMut(&T) -> bool + Send + 'static,
  {
    let mut upstream = self;
    Stream::from_try_stream(async_stream::stream! {
      loop {
        match upstream.next().await {
          Pull::Value(value) => {
            if !predicate(&value) {
              break;
            }
            yield Ok(value);
          }
          Pull::Error(err) => {
            yield Err(err);
            break;
          }
          Pull::End => break,
        }
      }
    })
  }

  /// Calls `f` on every element as it passes through.
  pub fn inspect<F>(self, mut f: F) -> Self
  where
    F: FnMut(&T) + Send + 'static,
  {
    self.map(move |value| {
      f(&value);
      value
    })
  }

  /// Pairs every element with its zero-based position.
  pub fn enumerate(self) -> Stream<(usize, T)> {
    let mut position = 0;
    self.map(move |value| {
      let indexed = (position, value);
      position += 1;
      indexed
    })
  }

  /// Yields the elements of `self`, then the elements of `next`. `next` is
  /// not pulled until `self` ends; an error in `self` ends the chain.
  pub fn chain(self, next: Stream<T>) -> Self {
    let mut first = self;
    let mut second = next;
    Stream::from_try_stream(async_stream::stream! {
      loop {
        match first.next().await {
          Pull::Value(value) => yield Ok(value),
          Pull::Error(err) => {
            yield Err(err);
            return;
          }
          Pull::End => break,
        }
      }
      loop {
        match second.next().await {
          Pull::Value(value) => yield Ok(value),
          Pull::Error(err) => {
            yield Err(err);
            break;
          }
          Pull::End => break,
        }
      }
    })
  }

  /// Applies a stream-to-stream stage. Lets reusable pipeline fragments be
  /// written as plain functions.
  pub fn pipe<U, F>(self, stage: F) -> Stream<U>
  where
    F: FnOnce(Stream<T>) -> Stream<U>,
  {
    stage(self)
  }

  /// Groups consecutive elements into vectors of `size`. The final batch may
  /// be shorter.
  ///
  /// # Errors
  ///
  /// Returns a configuration error when `size` is zero.
  pub fn batch(self, size: usize) -> StreamResult<Stream<Vec<T>>> {
    if size == 0 {
      return Err(StreamError::configuration("batch size must be positive"));
    }
    let mut upstream = self;
    Ok(Stream::from_try_stream(async_stream::stream! {
      let mut buffer = Vec::with_capacity(size);
      loop {
        match upstream.next().await {
          Pull::Value(value) => {
            buffer.push(value);
            if buffer.len() == size {
              yield Ok(std::mem::replace(&mut buffer, Vec::with_capacity(size)));
            }
          }
          Pull::Error(err) => {
            yield Err(err);
            return;
          }
          Pull::End => break,
        }
      }
      if !buffer.is_empty() {
        yield Ok(buffer);
      }
    }))
  }

  /// Pairs elements of two streams positionally, ending with the shorter.
  pub fn zip<U: Send + 'static>(self, other: Stream<U>) -> Stream<(T, U)> {
    let mut left = self;
    let mut right = other;
    Stream::from_try_stream(async_stream::stream! {
      loop {
        let a = match left.next().await {
          Pull::Value(value) => value,
          Pull::Error(err) => {
            yield Err(err);
            break;
          }
          Pull::End => break,
        };
        match right.next().await {
          Pull::Value(b) => yield Ok((a, b)),
          Pull::Error(err) => {
            yield Err(err);
            break;
          }
          Pull::End => break,
        }
      }
    })
  }

  /// Keeps each element with the given probability.
  ///
  /// The random source is seeded explicitly so runs are reproducible.
  ///
  /// # Errors
  ///
  /// Returns a configuration error when `probability` is outside `[0, 1]`.
  pub fn sample(self, probability: f64, seed: u64) -> StreamResult<Self> {
    if !(0.0..=1.0).contains(&probability) {
      return Err(StreamError::configuration(format!(
        "sample probability must be within [0, 1], got {probability}"
      )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(self.filter(move |_| rng.gen_bool(probability)))
  }

  /// Drains the stream into a vector, in order.
  ///
  /// The stream must be finite; bound infinite streams with
  /// [`Stream::take`] first. Collecting an already drained stream returns an
  /// empty vector.
  ///
  /// # Errors
  ///
  /// Returns the first element error. Elements pulled before the error are
  /// discarded.
  pub async fn collect(&mut self) -> StreamResult<Vec<T>> {
    let mut items = Vec::new();
    loop {
      match self.next().await {
        Pull::Value(value) => items.push(value),
        Pull::End => return Ok(items),
        Pull::Error(err) => return Err(err),
      }
    }
  }

  /// Calls `f` on every element until the stream ends.
  ///
  /// # Errors
  ///
  /// Returns the first element error.
  pub async fn for_each<F>(&mut self, mut f: F) -> StreamResult<()>
  where
    F: FnMut(T),
  {
    loop {
      match self.next().await {
        Pull::Value(value) => f(value),
        Pull::End => return Ok(()),
        Pull::Error(err) => return Err(err),
      }
    }
  }

  /// Folds every element into an accumulator.
  ///
  /// # Errors
  ///
  /// Returns the first element error.
  pub async fn fold<A, F>(&mut self, init: A, mut f: F) -> StreamResult<A>
  where
    F: FnMut(A, T) -> A,
  {
    let mut acc = init;
    loop {
      match self.next().await {
        Pull::Value(value) => acc = f(acc, value),
        Pull::End => return Ok(acc),
        Pull::Error(err) => return Err(err),
      }
    }
  }

  /// Counts the remaining elements.
  ///
  /// # Errors
  ///
  /// Returns the first element error.
  pub async fn count(&mut self) -> StreamResult<usize> {
    self.fold(0, |n, _| n + 1).await
  }
}

impl<T: Send + 'static> Stream<Stream<T>> {
  /// Concatenates the inner streams in order. Each inner stream is drained
  /// before the next outer element is pulled.
  pub fn flatten(self) -> Stream<T> {
    let mut outer = self;
    Stream::from_try_stream(async_stream::stream! {
      loop {
        let mut inner = match outer.next().await {
          Pull::Value(inner) => inner,
          Pull::Error(err) => {
            yield Err(err);
            break;
          }
          Pull::End => break,
        };
        loop {
          match inner.next().await {
            Pull::Value(value) => yield Ok(value),
            Pull::Error(err) => {
              yield Err(err);
              return;
            }
            Pull::End => break,
          }
        }
      }
    })
  }
}

impl<T: Send + 'static> Default for Stream<T> {
  fn default() -> Self {
    Self::empty()
  }
}
