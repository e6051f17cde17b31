//! # Aggregation
//!
//! Single-pass aggregation over streams.
//!
//! An [`Aggregator`] is the triple *initial / accumulate / finalize*. Several
//! named aggregators wrapped in [`AggregateSpec`]s run as one scope through
//! [`aggregates`]: the stream is pulled exactly once, each spec keeps its own
//! accumulator, and the results come back as a [`Record`] keyed by spec name
//! in the order the specs were given.
//!
//! ## Built-ins
//!
//! | Aggregator | Typed output | Empty input |
//! |---|---|---|
//! | [`Count`] | `usize` | `0` |
//! | [`Sum`] | `T` | `0` |
//! | [`Min`] / [`Max`] | `Option<T>` | `None` |
//! | [`Avg`] | `Option<f64>` | `None` |
//!
//! In a named scope `None` becomes [`Value::Null`]. The `Field*` variants read
//! one field of each [`Record`] and skip records where it is absent or not
//! numeric (or not comparable, for min and max).
//!
//! ## Example
//!
//! ```rust
//! use eventweave::aggregate::{self, aggregates};
//! use eventweave::stream::Stream;
//!
//! # async fn example() -> eventweave::error::StreamResult<()> {
//! let stats = aggregates(
//!   Stream::from_iter(vec![2.0, 4.0, 9.0]),
//!   &[aggregate::count("n"), aggregate::sum("total"), aggregate::avg("mean")],
//! )
//! .await?;
//!
//! assert_eq!(stats.get::<i64>("n"), Some(3));
//! assert_eq!(stats.get::<f64>("total"), Some(15.0));
//! assert_eq!(stats.get::<f64>("mean"), Some(5.0));
//! # Ok(())
//! # }
//! ```

use crate::error::{StreamError, StreamResult};
use crate::record::{Record, RecordBuilder, Value};
use crate::stream::{Pull, Stream};
use num_traits::{Num, ToPrimitive};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

/// An aggregation: an initial accumulator, a step applied once per element,
/// and a final projection applied exactly once per scope.
///
/// `accumulate` may be called any number of times, including zero.
pub trait Aggregator<T>: Send + Sync {
  /// Running state.
  type Acc: Send;
  /// Final result.
  type Output;

  /// Creates a fresh accumulator.
  fn initial(&self) -> Self::Acc;

  /// Folds one element into the accumulator.
  fn accumulate(&self, acc: &mut Self::Acc, item: &T);

  /// Produces the result.
  fn finalize(&self, acc: Self::Acc) -> Self::Output;
}

/// An [`Aggregator`] assembled from three closures.
///
/// ```rust
/// use eventweave::aggregate::{aggregate, FnAggregator};
/// use eventweave::stream::Stream;
///
/// # async fn example() -> eventweave::error::StreamResult<()> {
/// let longest = FnAggregator::new(
///   || 0usize,
///   |acc: &mut usize, word: &String| *acc = (*acc).max(word.len()),
///   |acc| acc,
/// );
/// let words = Stream::from_iter(vec!["a".to_string(), "abc".to_string()]);
/// assert_eq!(aggregate(words, &longest).await?, 3);
/// # Ok(())
/// # }
/// ```
pub struct FnAggregator<T, Acc, Out, I, A, F> {
  initial: I,
  accumulate: A,
  finalize: F,
  _types: PhantomData<fn(&T) -> (Acc, Out)>,
}

impl<T, Acc, Out, I, A, F> FnAggregator<T, Acc, Out, I, A, F>
where
  I: Fn() -> Acc + Send + Sync,
  A: Fn(&mut Acc, &T) + Send + Sync,
  F: Fn(Acc) -> Out + Send + Sync,
{
  /// Creates an aggregator from its three steps.
  pub fn new(initial: I, accumulate: A, finalize: F) -> Self {
    Self {
      initial,
      accumulate,
      finalize,
      _types: PhantomData,
    }
  }
}

impl<T, Acc, Out, I, A, F> Aggregator<T> for FnAggregator<T, Acc, Out, I, A, F>
where
  Acc: Send,
  I: Fn() -> Acc + Send + Sync,
  A: Fn(&mut Acc, &T) + Send + Sync,
  F: Fn(Acc) -> Out + Send + Sync,
{
  type Acc = Acc;
  type Output = Out;

  fn initial(&self) -> Acc {
    (self.initial)()
  }

  fn accumulate(&self, acc: &mut Acc, item: &T) {
    (self.accumulate)(acc, item)
  }

  fn finalize(&self, acc: Acc) -> Out {
    (self.finalize)(acc)
  }
}

/// Counts elements.
#[derive(Debug, Clone, Copy, Default)]
pub struct Count;

impl<T> Aggregator<T> for Count {
  type Acc = usize;
  type Output = usize;

  fn initial(&self) -> usize {
    0
  }

  fn accumulate(&self, acc: &mut usize, _item: &T) {
    *acc += 1;
  }

  fn finalize(&self, acc: usize) -> usize {
    acc
  }
}

/// Sums numeric elements. Empty input sums to zero.
pub struct Sum<T>(PhantomData<fn() -> T>);

impl<T> Sum<T> {
  /// Creates the aggregator.
  pub fn new() -> Self {
    Self(PhantomData)
  }
}

impl<T> Default for Sum<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Aggregator<T> for Sum<T>
where
  T: Num + Copy + Send,
{
  type Acc = T;
  type Output = T;

  fn initial(&self) -> T {
    T::zero()
  }

  fn accumulate(&self, acc: &mut T, item: &T) {
    *acc = *acc + *item;
  }

  fn finalize(&self, acc: T) -> T {
    acc
  }
}

/// Smallest element, or `None` for empty input.
pub struct Min<T>(PhantomData<fn() -> T>);

impl<T> Min<T> {
  /// Creates the aggregator.
  pub fn new() -> Self {
    Self(PhantomData)
  }
}

impl<T> Default for Min<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Aggregator<T> for Min<T>
where
  T: PartialOrd + Clone + Send,
{
  type Acc = Option<T>;
  type Output = Option<T>;

  fn initial(&self) -> Option<T> {
    None
  }

  fn accumulate(&self, acc: &mut Option<T>, item: &T) {
    if acc.as_ref().is_none_or(|current| item < current) {
      *acc = Some(item.clone());
    }
  }

  fn finalize(&self, acc: Option<T>) -> Option<T> {
    acc
  }
}

/// Largest element, or `None` for empty input.
pub struct Max<T>(PhantomData<fn() -> T>);

impl<T> Max<T> {
  /// Creates the aggregator.
  pub fn new() -> Self {
    Self(PhantomData)
  }
}

impl<T> Default for Max<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Aggregator<T> for Max<T>
where
  T: PartialOrd + Clone + Send,
{
  type Acc = Option<T>;
  type Output = Option<T>;

  fn initial(&self) -> Option<T> {
    None
  }

  fn accumulate(&self, acc: &mut Option<T>, item: &T) {
    if acc.as_ref().is_none_or(|current| item > current) {
      *acc = Some(item.clone());
    }
  }

  fn finalize(&self, acc: Option<T>) -> Option<T> {
    acc
  }
}

/// Arithmetic mean, or `None` for empty input.
pub struct Avg<T>(PhantomData<fn() -> T>);

impl<T> Avg<T> {
  /// Creates the aggregator.
  pub fn new() -> Self {
    Self(PhantomData)
  }
}

impl<T> Default for Avg<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Aggregator<T> for Avg<T>
where
  T: ToPrimitive,
{
  type Acc = (f64, usize);
  type Output = Option<f64>;

  fn initial(&self) -> (f64, usize) {
    (0.0, 0)
  }

  fn accumulate(&self, acc: &mut (f64, usize), item: &T) {
    if let Some(v) = item.to_f64() {
      acc.0 += v;
      acc.1 += 1;
    }
  }

  fn finalize(&self, (total, n): (f64, usize)) -> Option<f64> {
    (n > 0).then(|| total / n as f64)
  }
}

/// Running total of a [`FieldSum`]. Stays integral until a float shows up
/// or the integer sum overflows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Total {
  /// Every value so far was an integer.
  Int(i64),
  /// At least one float was seen, or the integer sum overflowed.
  Float(f64),
}

impl Total {
  fn add(self, value: &Value) -> Total {
    match (self, value) {
      (Total::Int(t), Value::Int(v)) => t
        .checked_add(*v)
        .map(Total::Int)
        .unwrap_or(Total::Float(t as f64 + *v as f64)),
      (Total::Int(t), Value::Float(v)) => Total::Float(t as f64 + v),
      (Total::Float(t), other) => other.as_f64().map(|v| Total::Float(t + v)).unwrap_or(self),
      (Total::Int(_), _) => self,
    }
  }

  fn into_value(self) -> Value {
    match self {
      Total::Int(v) => Value::Int(v),
      Total::Float(v) => Value::Float(v),
    }
  }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
  match (a, b) {
    (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
    (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
    (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
    _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
  }
}

fn is_orderable(value: &Value) -> bool {
  matches!(
    value,
    Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) | Value::Time(_)
  )
}

/// Counts records whose field is present and not null.
#[derive(Debug, Clone)]
pub struct FieldCount {
  field: String,
}

impl FieldCount {
  /// Counts non-null values of `field`.
  pub fn new(field: impl Into<String>) -> Self {
    Self {
      field: field.into(),
    }
  }
}

impl Aggregator<Record> for FieldCount {
  type Acc = usize;
  type Output = usize;

  fn initial(&self) -> usize {
    0
  }

  fn accumulate(&self, acc: &mut usize, item: &Record) {
    if item.value(&self.field).is_some_and(|v| !v.is_null()) {
      *acc += 1;
    }
  }

  fn finalize(&self, acc: usize) -> usize {
    acc
  }
}

/// Sums a numeric field. Integers stay integers unless a float is seen or
/// the sum overflows `i64`.
#[derive(Debug, Clone)]
pub struct FieldSum {
  field: String,
}

impl FieldSum {
  /// Sums `field`.
  pub fn new(field: impl Into<String>) -> Self {
    Self {
      field: field.into(),
    }
  }
}

impl Aggregator<Record> for FieldSum {
  type Acc = Total;
  type Output = Value;

  fn initial(&self) -> Total {
    Total::Int(0)
  }

  fn accumulate(&self, acc: &mut Total, item: &Record) {
    if let Some(value) = item.value(&self.field) {
      *acc = acc.add(value);
    }
  }

  fn finalize(&self, acc: Total) -> Value {
    acc.into_value()
  }
}

/// Smallest value of a field. Numbers, strings, timestamps and booleans are
/// comparable within their own kind; ints and floats compare numerically.
#[derive(Debug, Clone)]
pub struct FieldMin {
  field: String,
}

impl FieldMin {
  /// Minimum of `field`.
  pub fn new(field: impl Into<String>) -> Self {
    Self {
      field: field.into(),
    }
  }
}

impl Aggregator<Record> for FieldMin {
  type Acc = Option<Value>;
  type Output = Value;

  fn initial(&self) -> Option<Value> {
    None
  }

  fn accumulate(&self, acc: &mut Option<Value>, item: &Record) {
    let Some(value) = item.value(&self.field).filter(|v| is_orderable(v)) else {
      return;
    };
    let replace = match acc {
      None => true,
      Some(current) => compare_values(value, current) == Some(Ordering::Less),
    };
    if replace {
      *acc = Some(value.clone());
    }
  }

  fn finalize(&self, acc: Option<Value>) -> Value {
    acc.unwrap_or(Value::Null)
  }
}

/// Largest value of a field. See [`FieldMin`] for comparability.
#[derive(Debug, Clone)]
pub struct FieldMax {
  field: String,
}

impl FieldMax {
  /// Maximum of `field`.
  pub fn new(field: impl Into<String>) -> Self {
    Self {
      field: field.into(),
    }
  }
}

impl Aggregator<Record> for FieldMax {
  type Acc = Option<Value>;
  type Output = Value;

  fn initial(&self) -> Option<Value> {
    None
  }

  fn accumulate(&self, acc: &mut Option<Value>, item: &Record) {
    let Some(value) = item.value(&self.field).filter(|v| is_orderable(v)) else {
      return;
    };
    let replace = match acc {
      None => true,
      Some(current) => compare_values(value, current) == Some(Ordering::Greater),
    };
    if replace {
      *acc = Some(value.clone());
    }
  }

  fn finalize(&self, acc: Option<Value>) -> Value {
    acc.unwrap_or(Value::Null)
  }
}

/// Mean of a numeric field.
#[derive(Debug, Clone)]
pub struct FieldAvg {
  field: String,
}

impl FieldAvg {
  /// Mean of `field`.
  pub fn new(field: impl Into<String>) -> Self {
    Self {
      field: field.into(),
    }
  }
}

impl Aggregator<Record> for FieldAvg {
  type Acc = (f64, usize);
  type Output = Option<f64>;

  fn initial(&self) -> (f64, usize) {
    (0.0, 0)
  }

  fn accumulate(&self, acc: &mut (f64, usize), item: &Record) {
    if let Some(v) = item.value(&self.field).and_then(Value::as_f64) {
      acc.0 += v;
      acc.1 += 1;
    }
  }

  fn finalize(&self, (total, n): (f64, usize)) -> Option<f64> {
    (n > 0).then(|| total / n as f64)
  }
}

trait ErasedAggregator<T>: Send + Sync {
  fn start(&self) -> Box<dyn ErasedAccumulator<T> + '_>;
}

trait ErasedAccumulator<T>: Send {
  fn accumulate(&mut self, item: &T);
  fn finalize(self: Box<Self>) -> Value;
}

struct Running<'a, T, G: Aggregator<T>> {
  aggregator: &'a G,
  acc: G::Acc,
  _item: PhantomData<fn(&T)>,
}

impl<T, G> ErasedAccumulator<T> for Running<'_, T, G>
where
  T: 'static,
  G: Aggregator<T>,
  G::Output: Into<Value>,
{
  fn accumulate(&mut self, item: &T) {
    self.aggregator.accumulate(&mut self.acc, item);
  }

  fn finalize(self: Box<Self>) -> Value {
    self.aggregator.finalize(self.acc).into()
  }
}

impl<T, G> ErasedAggregator<T> for G
where
  T: 'static,
  G: Aggregator<T>,
  G::Output: Into<Value>,
{
  fn start(&self) -> Box<dyn ErasedAccumulator<T> + '_> {
    Box::new(Running {
      aggregator: self,
      acc: self.initial(),
      _item: PhantomData,
    })
  }
}

/// A named aggregator whose result is stored as a [`Value`].
pub struct AggregateSpec<T> {
  name: String,
  aggregator: Box<dyn ErasedAggregator<T>>,
}

impl<T: 'static> AggregateSpec<T> {
  /// Names an aggregator.
  pub fn new<G>(name: impl Into<String>, aggregator: G) -> Self
  where
    G: Aggregator<T> + 'static,
    G::Output: Into<Value>,
  {
    Self {
      name: name.into(),
      aggregator: Box::new(aggregator),
    }
  }
}

impl<T> AggregateSpec<T> {
  /// The field name the result is stored under.
  pub fn name(&self) -> &str {
    &self.name
  }
}

impl<T> fmt::Debug for AggregateSpec<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AggregateSpec")
      .field("name", &self.name)
      .finish_non_exhaustive()
  }
}

/// Named [`Count`].
pub fn count<T: 'static>(name: impl Into<String>) -> AggregateSpec<T> {
  AggregateSpec::new(name, Count)
}

/// Named [`Sum`].
pub fn sum<T>(name: impl Into<String>) -> AggregateSpec<T>
where
  T: Num + Copy + Send + Into<Value> + 'static,
{
  AggregateSpec::new(name, Sum::<T>::new())
}

/// Named [`Min`].
pub fn min<T>(name: impl Into<String>) -> AggregateSpec<T>
where
  T: PartialOrd + Clone + Send + Into<Value> + 'static,
{
  AggregateSpec::new(name, Min::<T>::new())
}

/// Named [`Max`].
pub fn max<T>(name: impl Into<String>) -> AggregateSpec<T>
where
  T: PartialOrd + Clone + Send + Into<Value> + 'static,
{
  AggregateSpec::new(name, Max::<T>::new())
}

/// Named [`Avg`].
pub fn avg<T>(name: impl Into<String>) -> AggregateSpec<T>
where
  T: ToPrimitive + 'static,
{
  AggregateSpec::new(name, Avg::<T>::new())
}

/// Named [`FieldCount`].
pub fn count_of(name: impl Into<String>, field: impl Into<String>) -> AggregateSpec<Record> {
  AggregateSpec::new(name, FieldCount::new(field))
}

/// Named [`FieldSum`].
pub fn sum_of(name: impl Into<String>, field: impl Into<String>) -> AggregateSpec<Record> {
  AggregateSpec::new(name, FieldSum::new(field))
}

/// Named [`FieldMin`].
pub fn min_of(name: impl Into<String>, field: impl Into<String>) -> AggregateSpec<Record> {
  AggregateSpec::new(name, FieldMin::new(field))
}

/// Named [`FieldMax`].
pub fn max_of(name: impl Into<String>, field: impl Into<String>) -> AggregateSpec<Record> {
  AggregateSpec::new(name, FieldMax::new(field))
}

/// Named [`FieldAvg`].
pub fn avg_of(name: impl Into<String>, field: impl Into<String>) -> AggregateSpec<Record> {
  AggregateSpec::new(name, FieldAvg::new(field))
}

/// Rejects duplicate spec names, which would collide in the result record.
pub(crate) fn validate_specs<T>(specs: &[AggregateSpec<T>]) -> StreamResult<()> {
  let mut seen = HashSet::new();
  for spec in specs {
    if !seen.insert(spec.name.as_str()) {
      return Err(StreamError::configuration(format!(
        "duplicate aggregate name `{}`",
        spec.name
      )));
    }
  }
  Ok(())
}

/// The running accumulators of one aggregation scope.
///
/// [`aggregates`] drives a scope over a whole stream; grouping and windowing
/// keep one scope per group and feed it element by element.
pub struct AggregateScope<'a, T> {
  specs: &'a [AggregateSpec<T>],
  running: Vec<Box<dyn ErasedAccumulator<T> + 'a>>,
}

impl<'a, T> AggregateScope<'a, T> {
  /// Starts a scope with fresh accumulators for every spec.
  pub fn new(specs: &'a [AggregateSpec<T>]) -> Self {
    Self {
      specs,
      running: specs.iter().map(|spec| spec.aggregator.start()).collect(),
    }
  }

  /// Feeds one element to every accumulator.
  pub fn push(&mut self, item: &T) {
    for acc in &mut self.running {
      acc.accumulate(item);
    }
  }

  /// Finalizes every accumulator into `builder`, in spec order.
  pub fn finish_into(self, builder: RecordBuilder) -> RecordBuilder {
    self
      .specs
      .iter()
      .zip(self.running)
      .fold(builder, |builder, (spec, acc)| {
        builder.set(spec.name.clone(), acc.finalize())
      })
  }

  /// Finalizes every accumulator.
  pub fn finish(self) -> Record {
    self.finish_into(RecordBuilder::new()).build()
  }
}

/// Runs every spec over `stream` in a single pass.
///
/// # Errors
///
/// Returns a configuration error for duplicate spec names, before pulling.
/// Otherwise returns the first element error; accumulation stops there and
/// nothing is finalized.
pub async fn aggregates<T>(stream: Stream<T>, specs: &[AggregateSpec<T>]) -> StreamResult<Record>
where
  T: Send + 'static,
{
  validate_specs(specs)?;
  let mut stream = stream;
  let mut scope = AggregateScope::new(specs);
  loop {
    match stream.next().await {
      Pull::Value(item) => scope.push(&item),
      Pull::End => return Ok(scope.finish()),
      Pull::Error(err) => return Err(err),
    }
  }
}

/// Runs a single typed aggregator over `stream`.
///
/// # Errors
///
/// Returns the first element error.
pub async fn aggregate<T, G>(stream: Stream<T>, aggregator: &G) -> StreamResult<G::Output>
where
  T: Send + 'static,
  G: Aggregator<T>,
{
  let mut stream = stream;
  let mut acc = aggregator.initial();
  loop {
    match stream.next().await {
      Pull::Value(item) => aggregator.accumulate(&mut acc, &item),
      Pull::End => return Ok(aggregator.finalize(acc)),
      Pull::Error(err) => return Err(err),
    }
  }
}

impl<T: Send + 'static> Stream<T> {
  /// Method form of [`aggregates`].
  ///
  /// # Errors
  ///
  /// See [`aggregates`].
  pub async fn aggregates(self, specs: &[AggregateSpec<T>]) -> StreamResult<Record> {
    aggregates(self, specs).await
  }
}
