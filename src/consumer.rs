//! # Consumer Trait
//!
//! Consumers are the end point of a pipeline. They receive items one at a
//! time and write them somewhere or fold them into a result.
//!
//! [`drain_into`] pulls a [`Stream`] to its end and hands every value to a
//! consumer. The first upstream or consumer error stops the drain and is
//! returned unchanged.
//!
//! ## Example
//!
//! ```rust
//! use eventweave::consumer::{drain_into, VecConsumer};
//! use eventweave::stream::Stream;
//!
//! # async fn example() -> eventweave::error::StreamResult<()> {
//! let mut consumer = VecConsumer::new();
//! let mut stream = Stream::from_iter(vec![1, 2, 3]);
//!
//! let consumed = drain_into(&mut stream, &mut consumer).await?;
//! assert_eq!(consumed, 3);
//! assert_eq!(consumer.into_vec(), vec![1, 2, 3]);
//! # Ok(())
//! # }
//! ```

use crate::error::{ComponentInfo, StreamResult};
use crate::stream::{Pull, Stream};
use async_trait::async_trait;
use tracing::debug;

/// Configuration for a consumer component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerConfig {
  /// The name of this consumer component.
  pub name: String,
}

impl ConsumerConfig {
  /// Sets the name for this consumer configuration.
  #[must_use]
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Returns the current name.
  pub fn name(&self) -> &str {
    &self.name
  }
}

/// A sink for stream items.
///
/// ```rust
/// use async_trait::async_trait;
/// use eventweave::consumer::{Consumer, ConsumerConfig};
/// use eventweave::error::StreamResult;
///
/// struct Total {
///   sum: i64,
///   config: ConsumerConfig,
/// }
///
/// #[async_trait]
/// impl Consumer<i64> for Total {
///   async fn consume(&mut self, item: i64) -> StreamResult<()> {
///     self.sum += item;
///     Ok(())
///   }
///
///   fn config(&self) -> &ConsumerConfig {
///     &self.config
///   }
/// }
/// ```
#[async_trait]
pub trait Consumer<T: Send + 'static>: Send {
  /// Handles one item.
  async fn consume(&mut self, item: T) -> StreamResult<()>;

  /// Called once after the last item, when the stream ended cleanly.
  async fn finish(&mut self) -> StreamResult<()> {
    Ok(())
  }

  /// The consumer's configuration.
  fn config(&self) -> &ConsumerConfig;

  /// Returns information about this consumer component.
  fn component_info(&self) -> ComponentInfo {
    let type_name = std::any::type_name::<Self>();
    let name = match self.config().name() {
      "" => type_name,
      name => name,
    };
    ComponentInfo::new(name, type_name)
  }
}

/// Pulls `stream` to its end, handing every value to `consumer`, then calls
/// [`Consumer::finish`]. Returns the number of items consumed.
///
/// # Errors
///
/// Returns the first upstream error, or the first consumer error.
pub async fn drain_into<T, C>(stream: &mut Stream<T>, consumer: &mut C) -> StreamResult<usize>
where
  T: Send + 'static,
  C: Consumer<T> + ?Sized,
{
  let mut consumed = 0;
  loop {
    match stream.next().await {
      Pull::Value(item) => {
        if let Err(err) = consumer.consume(item).await {
          debug!(consumer = %consumer.component_info(), consumed, "consumer failed");
          return Err(err);
        }
        consumed += 1;
      }
      Pull::Error(err) => return Err(err),
      Pull::End => break,
    }
  }
  consumer.finish().await?;
  debug!(consumer = %consumer.component_info(), consumed, "stream drained");
  Ok(consumed)
}

impl<T: Send + 'static> Stream<T> {
  /// Method form of [`drain_into`].
  ///
  /// # Errors
  ///
  /// See [`drain_into`].
  pub async fn drain_into<C>(&mut self, consumer: &mut C) -> StreamResult<usize>
  where
    C: Consumer<T> + ?Sized,
  {
    drain_into(self, consumer).await
  }
}

/// A consumer that collects items into a `Vec`, in the order received.
#[derive(Debug, Clone)]
pub struct VecConsumer<T> {
  /// The items consumed so far.
  pub vec: Vec<T>,
  /// Configuration for the consumer.
  pub config: ConsumerConfig,
}

impl<T> Default for VecConsumer<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> VecConsumer<T> {
  /// Creates a new `VecConsumer`.
  pub fn new() -> Self {
    Self {
      vec: Vec::new(),
      config: ConsumerConfig::default(),
    }
  }

  /// Creates a new `VecConsumer` with the specified capacity.
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      vec: Vec::with_capacity(capacity),
      config: ConsumerConfig::default(),
    }
  }

  /// Sets the name for this consumer.
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.config.name = name.into();
    self
  }

  /// Consumes the consumer and returns the collected Vec.
  pub fn into_vec(self) -> Vec<T> {
    self.vec
  }
}

#[async_trait]
impl<T: Send + 'static> Consumer<T> for VecConsumer<T> {
  async fn consume(&mut self, item: T) -> StreamResult<()> {
    self.vec.push(item);
    Ok(())
  }

  fn config(&self) -> &ConsumerConfig {
    &self.config
  }
}

/// A consumer that runs a fallible closure on every item.
pub struct ForEachConsumer<F> {
  f: F,
  config: ConsumerConfig,
}

impl<F> ForEachConsumer<F> {
  /// Wraps `f`.
  pub fn new(f: F) -> Self {
    Self {
      f,
      config: ConsumerConfig::default(),
    }
  }

  /// Sets the name for this consumer.
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.config.name = name.into();
    self
  }
}

impl<F> std::fmt::Debug for ForEachConsumer<F> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ForEachConsumer")
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

#[async_trait]
impl<T, F> Consumer<T> for ForEachConsumer<F>
where
  T: Send + 'static,
  F: FnMut(T) -> StreamResult<()> + Send,
{
  async fn consume(&mut self, item: T) -> StreamResult<()> {
    (self.f)(item)
  }

  fn config(&self) -> &ConsumerConfig {
    &self.config
  }
}
