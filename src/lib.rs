//! # EventWeave
//!
//! Pull-based, async record streams with fan-out, partitioning, aggregation
//! and event-time windowing.
//!
//! A [`Stream`](stream::Stream) is a lazy, single-consumer sequence. Pulling
//! it yields a value, end of sequence, or an error, after which it only yields
//! end of sequence. Combinators wrap streams without pulling anything until
//! the outermost stream is pulled.
//!
//! ## Key Features
//!
//! - **Combinators**: map, filter, take, chain, batch, zip, sample and more
//! - **Records**: ordered, dynamically typed field maps with typed accessors
//! - **Aggregation**: composable aggregators evaluated in a single pass
//! - **Fan-out**: [`tee`](tee::tee) one stream into independent consumers
//! - **Partitioning**: [`split`](partition::split) by key fields, or
//!   [`group_by`](partition::group_by) with aggregates
//! - **Windowing**: tumbling, sliding and session windows over event time,
//!   with watermarks and late-data handling
//!
//! ## Quick Start
//!
//! ```rust
//! use eventweave::aggregate::sum_of;
//! use eventweave::record::Record;
//! use eventweave::stream::Stream;
//!
//! # async fn example() -> eventweave::error::StreamResult<()> {
//! let orders = Stream::from_iter(vec![
//!   Record::builder().string("region", "eu").int("amount", 10).build(),
//!   Record::builder().string("region", "us").int("amount", 5).build(),
//!   Record::builder().string("region", "eu").int("amount", 7).build(),
//! ]);
//!
//! let mut totals = orders.group_by(&["region"], vec![sum_of("total", "amount")])?;
//! let totals = totals.collect().await?;
//! assert_eq!(totals[0].get::<i64>("total"), Some(17));
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

/// Per-record aggregation.
pub mod aggregate;
/// Sinks that drain streams.
pub mod consumer;
/// Error types.
pub mod error;
/// Parallel map transforms.
pub mod parallel;
/// Partitioning by key fields.
pub mod partition;
/// Records and field values.
pub mod record;
/// The stream primitive and its combinators.
pub mod stream;
/// Fan-out of one stream into several.
pub mod tee;
/// Clocks and event-time extraction.
pub mod time;
/// Watermarks and their generators.
pub mod watermark;
/// Event-time windowing.
pub mod window;

pub use aggregate::{AggregateSpec, Aggregator};
pub use consumer::{Consumer, drain_into};
pub use error::{StreamError, StreamResult};
pub use record::{Record, Value};
pub use stream::{Pull, Stream};
pub use watermark::Watermark;
pub use window::{TimeWindow, WindowConfig, WindowPane};

#[cfg(test)]
mod consumer_test;
#[cfg(test)]
mod record_test;
#[cfg(test)]
mod stream_test;
#[cfg(test)]
mod time_test;
#[cfg(test)]
mod watermark_test;
