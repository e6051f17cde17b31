//! # Partitioning
//!
//! Two ways of grouping a record stream by the values of some key fields:
//!
//! - [`split`] is lazy. It yields one [`Partition`] per distinct key, in order
//!   of first appearance, as soon as the key is first seen. Each partition's
//!   `records` stream yields that key's records in their original order,
//!   starting with the record that revealed the key.
//! - [`group_by`] is eager. On its first pull it drains the whole input, then
//!   yields one aggregate [`Record`] per distinct key.
//!
//! ## Shared cursor
//!
//! The outer stream and every partition share one upstream cursor. Pulling
//! a partition whose buffer is empty pulls upstream until one of its own
//! records shows up, buffering the records of other keys along the way.
//! Interleaved draining therefore keeps one buffer per pending key. A
//! partition that is held but never drained buffers without bound. Dropping a
//! partition (or dropping the outer stream before a key is announced) stops
//! buffering for that key.
//!
//! ```rust
//! use eventweave::partition::split;
//! use eventweave::record::Record;
//! use eventweave::stream::{Pull, Stream};
//!
//! # async fn example() -> eventweave::error::StreamResult<()> {
//! let rows = ["a", "b", "a"]
//!   .into_iter()
//!   .enumerate()
//!   .map(|(i, k)| Record::builder().string("k", k).int("i", i as i64).build());
//! let mut partitions = split(Stream::from_iter(rows.collect::<Vec<_>>()), &["k"])?;
//!
//! let Pull::Value(mut a) = partitions.next().await else { unreachable!() };
//! assert_eq!(a.key.get_str("k"), Some("a"));
//! assert_eq!(a.records.count().await?, 2);
//! # Ok(())
//! # }
//! ```

use crate::aggregate::{AggregateScope, AggregateSpec, validate_specs};
use crate::error::{StreamError, StreamResult};
use crate::record::{Record, Value};
use crate::stream::{Pull, Stream, Terminal, lock_state};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{trace, warn};

/// Name of the group-size field [`group_by`] adds to every output record.
pub const GROUP_COUNT_FIELD: &str = "count";

/// Default per-key backlog above which a warning is logged.
pub const DEFAULT_BACKLOG_WARNING: usize = 10_000;

/// A hashable rendering of one key field.
///
/// Integers and floats are distinct parts even when numerically equal.
/// Floats compare by bit pattern after folding `-0.0` into `0.0`. Every nested
/// stream maps to the same part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
  /// Absent field or [`Value::Null`].
  Null,
  /// A boolean.
  Bool(bool),
  /// An integer.
  Int(i64),
  /// A float, by bit pattern.
  Float(u64),
  /// A string.
  String(String),
  /// A timestamp.
  Time(DateTime<Utc>),
  /// A nested record, field by field.
  Record(Vec<(String, KeyPart)>),
  /// A nested stream.
  Stream,
}

impl From<&Value> for KeyPart {
  fn from(value: &Value) -> Self {
    match value {
      Value::Null => KeyPart::Null,
      Value::Bool(v) => KeyPart::Bool(*v),
      Value::Int(v) => KeyPart::Int(*v),
      Value::Float(v) if *v == 0.0 => KeyPart::Float(0f64.to_bits()),
      Value::Float(v) => KeyPart::Float(v.to_bits()),
      Value::String(v) => KeyPart::String(v.clone()),
      Value::Time(v) => KeyPart::Time(*v),
      Value::Record(v) => KeyPart::Record(
        v.iter()
          .map(|(key, value)| (key.to_string(), KeyPart::from(value)))
          .collect(),
      ),
      Value::Stream(_) => KeyPart::Stream,
    }
  }
}

/// The projection of a record onto a list of key fields, usable as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey(Vec<KeyPart>);

impl GroupKey {
  /// Projects `record` onto `fields`. Absent fields become [`KeyPart::Null`].
  pub fn of<S: AsRef<str>>(record: &Record, fields: &[S]) -> Self {
    Self(
      fields
        .iter()
        .map(|field| record.value(field.as_ref()).map_or(KeyPart::Null, KeyPart::from))
        .collect(),
    )
  }

  /// The key parts, in key-field order.
  pub fn parts(&self) -> &[KeyPart] {
    &self.0
  }
}

/// One distinct key discovered by [`split`].
#[derive(Debug)]
pub struct Partition {
  /// The key fields of this partition, as a record.
  pub key: Record,
  /// This key's records, in upstream order.
  pub records: Stream<Record>,
}

impl Partition {
  /// Discards the key and keeps the records.
  pub fn into_stream(self) -> Stream<Record> {
    self.records
  }
}

/// Configuration for [`split_with_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitConfig {
  /// Buffered records per key at which a warning is logged.
  pub backlog_warning: usize,
}

impl Default for SplitConfig {
  fn default() -> Self {
    Self {
      backlog_warning: DEFAULT_BACKLOG_WARNING,
    }
  }
}

impl SplitConfig {
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

enum KeySlot {
  Live(VecDeque<Record>),
  Dropped,
}

struct SplitState {
  slots: HashMap<GroupKey, KeySlot>,
  /// Keys discovered but not yet handed out by the outer stream.
  announced: VecDeque<(GroupKey, Record)>,
  outer_live: bool,
  terminal: Option<Terminal>,
}

struct Shared {
  state: Mutex<SplitState>,
  upstream: tokio::sync::Mutex<Stream<Record>>,
  key_fields: Vec<String>,
  config: SplitConfig,
}

impl Shared {
  fn next_announced(self: &Arc<Self>) -> Option<Pull<Partition>> {
    let mut state = lock_state(&self.state);
    if let Some((key, key_record)) = state.announced.pop_front() {
      return Some(Pull::Value(Partition {
        key: key_record,
        records: partition_stream(Arc::clone(self), key),
      }));
    }
    state.terminal.as_ref().map(Terminal::to_pull)
  }

  fn next_buffered(&self, key: &GroupKey) -> Option<Pull<Record>> {
    let mut state = lock_state(&self.state);
    if let Some(KeySlot::Live(queue)) = state.slots.get_mut(key) {
      if let Some(record) = queue.pop_front() {
        return Some(Pull::Value(record));
      }
    }
    state.terminal.as_ref().map(Terminal::to_pull)
  }

  async fn pull_outer(self: &Arc<Self>) -> Pull<Partition> {
    loop {
      if let Some(pull) = self.next_announced() {
        return pull;
      }
      let mut upstream = self.upstream.lock().await;
      if let Some(pull) = self.next_announced() {
        return pull;
      }
      self.advance(&mut upstream).await;
    }
  }

  async fn pull_partition(&self, key: &GroupKey) -> Pull<Record> {
    loop {
      if let Some(pull) = self.next_buffered(key) {
        return pull;
      }
      let mut upstream = self.upstream.lock().await;
      if let Some(pull) = self.next_buffered(key) {
        return pull;
      }
      self.advance(&mut upstream).await;
    }
  }

  /// Pulls one upstream element and routes it. Called with the upstream
  /// lock held.
  async fn advance(&self, upstream: &mut Stream<Record>) {
    match upstream.next().await {
      Pull::Value(record) => self.route(record),
      Pull::End => lock_state(&self.state).terminal = Some(Terminal::End),
      Pull::Error(err) => lock_state(&self.state).terminal = Some(Terminal::Error(err)),
    }
  }

  fn route(&self, record: Record) {
    let key = GroupKey::of(&record, &self.key_fields);
    let mut state = lock_state(&self.state);
    let outer_live = state.outer_live;
    match state.slots.get_mut(&key) {
      Some(KeySlot::Live(queue)) => {
        queue.push_back(record);
        if queue.len() == self.config.backlog_warning {
          warn!(
            key = ?key.parts(),
            backlog = queue.len(),
            "split partition is falling behind; its buffer grows until it is drained or dropped"
          );
        }
      }
      Some(KeySlot::Dropped) => trace!(key = ?key.parts(), "split discarding record of dropped partition"),
      None if outer_live => {
        trace!(key = ?key.parts(), "split discovered key");
        let key_record = record.project(&self.key_fields);
        state
          .slots
          .insert(key.clone(), KeySlot::Live(VecDeque::from([record])));
        state.announced.push_back((key, key_record));
      }
      None => {
        state.slots.insert(key, KeySlot::Dropped);
      }
    }
  }
}

struct OuterSlot {
  shared: Arc<Shared>,
}

impl Drop for OuterSlot {
  fn drop(&mut self) {
    let mut state = lock_state(&self.shared.state);
    state.outer_live = false;
    let pending: Vec<GroupKey> = state.announced.drain(..).map(|(key, _)| key).collect();
    for key in pending {
      state.slots.insert(key, KeySlot::Dropped);
    }
  }
}

struct PartitionSlot {
  shared: Arc<Shared>,
  key: GroupKey,
}

impl Drop for PartitionSlot {
  fn drop(&mut self) {
    let mut state = lock_state(&self.shared.state);
    state.slots.insert(self.key.clone(), KeySlot::Dropped);
  }
}

fn partition_stream(shared: Arc<Shared>, key: GroupKey) -> Stream<Record> {
  let slot = PartitionSlot { shared, key };
  Stream::from_try_stream(async_stream::stream! {
    loop {
      match slot.shared.pull_partition(&slot.key).await {
        Pull::Value(record) => yield Ok(record),
        Pull::Error(err) => {
          yield Err(err);
          break;
        }
        Pull::End => break,
      }
    }
  })
}

fn owned_fields<S: AsRef<str>>(key_fields: &[S]) -> StreamResult<Vec<String>> {
  if key_fields.is_empty() {
    return Err(StreamError::configuration("at least one key field is required"));
  }
  Ok(key_fields.iter().map(|f| f.as_ref().to_string()).collect())
}

/// Partitions `stream` by `key_fields` with the default configuration.
///
/// # Errors
///
/// Returns a configuration error when `key_fields` is empty.
pub fn split<S: AsRef<str>>(stream: Stream<Record>, key_fields: &[S]) -> StreamResult<Stream<Partition>> {
  split_with_config(stream, key_fields, SplitConfig::default())
}

/// Partitions `stream` by `key_fields`.
///
/// # Errors
///
/// Returns a configuration error when `key_fields` is empty.
pub fn split_with_config<S: AsRef<str>>(
  stream: Stream<Record>,
  key_fields: &[S],
  config: SplitConfig,
) -> StreamResult<Stream<Partition>> {
  let key_fields = owned_fields(key_fields)?;
  let outer = OuterSlot {
    shared: Arc::new(Shared {
      state: Mutex::new(SplitState {
        slots: HashMap::new(),
        announced: VecDeque::new(),
        outer_live: true,
        terminal: None,
      }),
      upstream: tokio::sync::Mutex::new(stream),
      key_fields,
      config,
    }),
  };
  Ok(Stream::from_try_stream(async_stream::stream! {
    loop {
      match outer.shared.pull_outer().await {
        Pull::Value(partition) => yield Ok(partition),
        Pull::Error(err) => {
          yield Err(err);
          break;
        }
        Pull::End => break,
      }
    }
  }))
}

struct Group<'a> {
  key: Record,
  size: usize,
  scope: AggregateScope<'a, Record>,
}

/// Groups `stream` by `key_fields` and aggregates every group.
///
/// Each output record holds the key fields, then one field per spec, then
/// [`GROUP_COUNT_FIELD`] with the number of records in the group. Groups are
/// emitted in order of first appearance once the input is exhausted.
///
/// # Errors
///
/// Returns a configuration error, before anything is pulled, when
/// `key_fields` is empty or when spec names collide with each other, with a
/// key field, or with [`GROUP_COUNT_FIELD`]. An upstream error is yielded by
/// the returned stream in place of any group.
pub fn group_by<S: AsRef<str>>(
  stream: Stream<Record>,
  key_fields: &[S],
  specs: Vec<AggregateSpec<Record>>,
) -> StreamResult<Stream<Record>> {
  let key_fields = owned_fields(key_fields)?;
  validate_specs(&specs)?;
  if let Some(spec) = specs
    .iter()
    .find(|spec| spec.name() == GROUP_COUNT_FIELD || key_fields.iter().any(|f| f == spec.name()))
  {
    return Err(StreamError::configuration(format!(
      "aggregate name `{}` collides with a group_by output field",
      spec.name()
    )));
  }

  let mut upstream = stream;
  Ok(Stream::from_try_stream(async_stream::stream! {
    let specs = specs;
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<Group<'_>> = Vec::new();
    loop {
      match upstream.next().await {
        Pull::Value(record) => {
          let key = GroupKey::of(&record, &key_fields);
          let position = *index.entry(key).or_insert_with(|| {
            groups.push(Group {
              key: record.project(&key_fields),
              size: 0,
              scope: AggregateScope::new(&specs),
            });
            groups.len() - 1
          });
          let group = &mut groups[position];
          group.size += 1;
          group.scope.push(&record);
        }
        Pull::Error(err) => {
          yield Err(err);
          return;
        }
        Pull::End => break,
      }
    }
    trace!(groups = groups.len(), "group_by drained upstream");
    for group in groups {
      yield Ok(
        group
          .scope
          .finish_into(group.key.to_builder())
          .set(GROUP_COUNT_FIELD, group.size)
          .build(),
      );
    }
  }))
}

impl Stream<Record> {
  /// Method form of [`split`].
  ///
  /// # Errors
  ///
  /// See [`split`].
  pub fn split<S: AsRef<str>>(self, key_fields: &[S]) -> StreamResult<Stream<Partition>> {
    split(self, key_fields)
  }

  /// Method form of [`group_by`].
  ///
  /// # Errors
  ///
  /// See [`group_by`].
  pub fn group_by<S: AsRef<str>>(
    self,
    key_fields: &[S],
    specs: Vec<AggregateSpec<Record>>,
  ) -> StreamResult<Stream<Record>> {
    group_by(self, key_fields, specs)
  }
}
