//! # Records
//!
//! [`Record`] is the dynamically typed row flowing through record pipelines:
//! an insertion-ordered mapping from unique string keys to [`Value`]s. Values
//! may be scalars, nested records, or nested streams.
//!
//! ## Accessors
//!
//! - [`Record::get`] checks presence and kind at once and never panics; a
//!   kind mismatch is a `None`, not an error.
//! - [`Record::get_or`] resolves a miss to the caller's default.
//!
//! The conversions performed by the typed accessors are listed on
//! [`FromValue`].
//!
//! ## Building
//!
//! Records are values. Setting a field produces a new record, either through
//! a [`RecordBuilder`] or [`Record::with`]; no caller should rely on aliasing
//! between a record and a modified copy.
//!
//! ```rust
//! use eventweave::record::Record;
//!
//! let order = Record::builder()
//!   .string("customer", "ada")
//!   .int("items", 3)
//!   .float("total", 41.5)
//!   .build();
//!
//! assert_eq!(order.get::<i64>("items"), Some(3));
//! assert_eq!(order.get::<i64>("customer"), None);
//! assert_eq!(order.get_or("discount", 0.0), 0.0);
//! assert_eq!(order.keys(), vec!["customer", "items", "total"]);
//! ```

use crate::error::{StreamError, StreamResult};
use crate::stream::{Pull, Stream};
use chrono::{DateTime, Utc};
use serde::ser::{Error as _, SerializeMap};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A stream stored inside a record field.
///
/// Cloning the handle does not copy the sequence: every clone shares one
/// cursor, so the nested stream stays single-pass no matter how many copies
/// of the enclosing record exist.
#[derive(Clone)]
pub struct NestedStream {
  inner: Arc<Mutex<Stream<Value>>>,
}

impl NestedStream {
  /// Wraps a stream of values.
  pub fn new(stream: Stream<Value>) -> Self {
    Self {
      inner: Arc::new(Mutex::new(stream)),
    }
  }

  /// Wraps a stream of records.
  pub fn from_records(stream: Stream<Record>) -> Self {
    Self::new(stream.map(Value::Record))
  }

  /// Wraps a finite list of values.
  pub fn from_values<I>(values: I) -> Self
  where
    I: IntoIterator<Item = Value>,
    I::IntoIter: Send + 'static,
  {
    Self::new(Stream::from_iter(values))
  }

  /// Pulls the next value from the shared cursor.
  pub async fn next(&self) -> Pull<Value> {
    self.inner.lock().await.next().await
  }

  /// Drains the remaining values.
  ///
  /// # Errors
  ///
  /// Returns the first element error of the nested stream.
  pub async fn collect(&self) -> StreamResult<Vec<Value>> {
    self.inner.lock().await.collect().await
  }

  /// Returns a [`Stream`] reading from this handle's shared cursor.
  pub fn into_stream(self) -> Stream<Value> {
    Stream::unfold(self, |handle| async move {
      match handle.next().await {
        Pull::Value(value) => Some((Ok(value), handle)),
        Pull::Error(err) => Some((Err(err), handle)),
        Pull::End => None,
      }
    })
  }

  /// Returns true when both handles share the same cursor.
  pub fn ptr_eq(&self, other: &NestedStream) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl fmt::Debug for NestedStream {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("NestedStream")
  }
}

/// The dynamic kind of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
  /// [`Value::Null`]
  Null,
  /// [`Value::Bool`]
  Bool,
  /// [`Value::Int`]
  Int,
  /// [`Value::Float`]
  Float,
  /// [`Value::String`]
  String,
  /// [`Value::Time`]
  Time,
  /// [`Value::Record`]
  Record,
  /// [`Value::Stream`]
  Stream,
}

/// A dynamically typed field value.
#[derive(Debug, Clone, Default)]
pub enum Value {
  /// Absent data, e.g. the minimum of an empty input.
  #[default]
  Null,
  /// A boolean.
  Bool(bool),
  /// A signed 64-bit integer.
  Int(i64),
  /// A 64-bit float.
  Float(f64),
  /// A UTF-8 string.
  String(String),
  /// An instant in UTC.
  Time(DateTime<Utc>),
  /// A nested record.
  Record(Record),
  /// A nested single-pass stream.
  Stream(NestedStream),
}

impl Value {
  /// Returns the dynamic kind of this value.
  pub fn kind(&self) -> ValueKind {
    match self {
      Value::Null => ValueKind::Null,
      Value::Bool(_) => ValueKind::Bool,
      Value::Int(_) => ValueKind::Int,
      Value::Float(_) => ValueKind::Float,
      Value::String(_) => ValueKind::String,
      Value::Time(_) => ValueKind::Time,
      Value::Record(_) => ValueKind::Record,
      Value::Stream(_) => ValueKind::Stream,
    }
  }

  /// Returns true for [`Value::Null`].
  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  /// Returns the integer, if this is an `Int`.
  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Value::Int(v) => Some(*v),
      _ => None,
    }
  }

  /// Returns the number as a float, widening `Int`.
  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Value::Float(v) => Some(*v),
      Value::Int(v) => Some(*v as f64),
      _ => None,
    }
  }

  /// Returns the boolean, if this is a `Bool`.
  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(v) => Some(*v),
      _ => None,
    }
  }

  /// Borrows the string, if this is a `String`.
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(v) => Some(v),
      _ => None,
    }
  }

  /// Returns the instant, if this is a `Time`.
  pub fn as_time(&self) -> Option<DateTime<Utc>> {
    match self {
      Value::Time(v) => Some(*v),
      _ => None,
    }
  }

  /// Borrows the nested record, if this is a `Record`.
  pub fn as_record(&self) -> Option<&Record> {
    match self {
      Value::Record(v) => Some(v),
      _ => None,
    }
  }

  /// Borrows the nested stream handle, if this is a `Stream`.
  pub fn as_stream(&self) -> Option<&NestedStream> {
    match self {
      Value::Stream(v) => Some(v),
      _ => None,
    }
  }

  /// Converts decoded JSON into a value.
  ///
  /// Objects become records, arrays become nested streams, integers that fit
  /// `i64` become `Int` and every other number becomes `Float`.
  pub fn from_json(json: serde_json::Value) -> Value {
    match json {
      serde_json::Value::Null => Value::Null,
      serde_json::Value::Bool(b) => Value::Bool(b),
      serde_json::Value::Number(n) => match n.as_i64() {
        Some(i) => Value::Int(i),
        None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
      },
      serde_json::Value::String(s) => Value::String(s),
      serde_json::Value::Array(items) => Value::Stream(NestedStream::from_values(
        items.into_iter().map(Value::from_json).collect::<Vec<_>>(),
      )),
      serde_json::Value::Object(map) => Value::Record(
        map
          .into_iter()
          .fold(RecordBuilder::new(), |builder, (key, value)| {
            builder.set(key, Value::from_json(value))
          })
          .build(),
      ),
    }
  }
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Null, Value::Null) => true,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Int(a), Value::Int(b)) => a == b,
      (Value::Float(a), Value::Float(b)) => a == b,
      (Value::String(a), Value::String(b)) => a == b,
      (Value::Time(a), Value::Time(b)) => a == b,
      (Value::Record(a), Value::Record(b)) => a == b,
      (Value::Stream(a), Value::Stream(b)) => a.ptr_eq(b),
      _ => false,
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => f.write_str("null"),
      Value::Bool(v) => write!(f, "{v}"),
      Value::Int(v) => write!(f, "{v}"),
      Value::Float(v) => write!(f, "{v}"),
      Value::String(v) => write!(f, "{v:?}"),
      Value::Time(v) => write!(f, "{}", v.to_rfc3339()),
      Value::Record(v) => write!(f, "{v}"),
      Value::Stream(_) => f.write_str("<stream>"),
    }
  }
}

impl Serialize for Value {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Value::Null => serializer.serialize_none(),
      Value::Bool(v) => serializer.serialize_bool(*v),
      Value::Int(v) => serializer.serialize_i64(*v),
      Value::Float(v) => serializer.serialize_f64(*v),
      Value::String(v) => serializer.serialize_str(v),
      Value::Time(v) => serializer.serialize_str(&v.to_rfc3339()),
      Value::Record(v) => v.serialize(serializer),
      Value::Stream(_) => Err(S::Error::custom(
        "nested streams must be drained before serialization",
      )),
    }
  }
}

macro_rules! value_from {
  ($($source:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
    $(
      impl From<$source> for Value {
        fn from(v: $source) -> Self {
          Value::$variant(v $(as $cast)?)
        }
      }
    )*
  };
}

value_from! {
  bool => Bool,
  i64 => Int,
  i32 => Int as i64,
  u32 => Int as i64,
  usize => Int as i64,
  f64 => Float,
  f32 => Float as f64,
  String => String,
  DateTime<Utc> => Time,
  Record => Record,
  NestedStream => Stream,
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::String(v.to_string())
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self {
    v.map(Into::into).unwrap_or(Value::Null)
  }
}

/// Typed extraction from a [`Value`].
///
/// Extraction is total: it returns `None` on a kind mismatch and never
/// panics. The accepted kinds are:
///
/// | Target | Accepted kinds |
/// |---|---|
/// | `i64` | `Int` |
/// | `f64` | `Float`, `Int` (widened) |
/// | `bool` | `Bool` |
/// | `String` | `String` |
/// | `DateTime<Utc>` | `Time` |
/// | `Record` | `Record` |
/// | `NestedStream` | `Stream` |
/// | `Value` | any kind |
pub trait FromValue: Sized {
  /// Extracts `Self`, or `None` on a kind mismatch.
  fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for i64 {
  fn from_value(value: &Value) -> Option<Self> {
    value.as_i64()
  }
}

impl FromValue for f64 {
  fn from_value(value: &Value) -> Option<Self> {
    value.as_f64()
  }
}

impl FromValue for bool {
  fn from_value(value: &Value) -> Option<Self> {
    value.as_bool()
  }
}

impl FromValue for String {
  fn from_value(value: &Value) -> Option<Self> {
    value.as_str().map(str::to_string)
  }
}

impl FromValue for DateTime<Utc> {
  fn from_value(value: &Value) -> Option<Self> {
    value.as_time()
  }
}

impl FromValue for Record {
  fn from_value(value: &Value) -> Option<Self> {
    value.as_record().cloned()
  }
}

impl FromValue for NestedStream {
  fn from_value(value: &Value) -> Option<Self> {
    value.as_stream().cloned()
  }
}

impl FromValue for Value {
  fn from_value(value: &Value) -> Option<Self> {
    Some(value.clone())
  }
}

/// An insertion-ordered mapping from unique string keys to values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
  fields: Vec<(String, Value)>,
}

impl Record {
  /// Creates an empty record.
  pub fn new() -> Self {
    Self::default()
  }

  /// Starts building a record.
  pub fn builder() -> RecordBuilder {
    RecordBuilder::new()
  }

  /// Returns a builder seeded with this record's fields.
  pub fn to_builder(&self) -> RecordBuilder {
    RecordBuilder {
      fields: self.fields.clone(),
    }
  }

  /// Returns the field converted to `T`, or `None` when it is absent or of a
  /// different kind.
  pub fn get<T: FromValue>(&self, key: &str) -> Option<T> {
    self.value(key).and_then(T::from_value)
  }

  /// Returns the field converted to `T`, or `default` on a miss.
  pub fn get_or<T: FromValue>(&self, key: &str, default: T) -> T {
    self.get(key).unwrap_or(default)
  }

  /// Borrows a string field without copying it.
  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.value(key).and_then(Value::as_str)
  }

  /// Borrows the raw value of a field.
  pub fn value(&self, key: &str) -> Option<&Value> {
    self
      .fields
      .iter()
      .find(|(name, _)| name == key)
      .map(|(_, value)| value)
  }

  /// Returns true when the key is present.
  pub fn contains_key(&self, key: &str) -> bool {
    self.value(key).is_some()
  }

  /// Returns the keys in insertion order.
  pub fn keys(&self) -> Vec<&str> {
    self.fields.iter().map(|(name, _)| name.as_str()).collect()
  }

  /// Iterates over fields in insertion order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.fields.iter().map(|(name, value)| (name.as_str(), value))
  }

  /// Number of fields.
  pub fn len(&self) -> usize {
    self.fields.len()
  }

  /// Returns true when the record has no fields.
  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  /// Returns a copy with `key` set to `value`. An existing key keeps its
  /// position.
  pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Record {
    self.to_builder().set(key, value).build()
  }

  /// Returns a copy without `key`.
  pub fn without(&self, key: &str) -> Record {
    Record {
      fields: self
        .fields
        .iter()
        .filter(|(name, _)| name != key)
        .cloned()
        .collect(),
    }
  }

  /// Projects the record onto `keys`, in the order given. Absent keys
  /// project to [`Value::Null`].
  pub fn project<S: AsRef<str>>(&self, keys: &[S]) -> Record {
    Record {
      fields: keys
        .iter()
        .map(|key| {
          let key = key.as_ref();
          (key.to_string(), self.value(key).cloned().unwrap_or(Value::Null))
        })
        .collect(),
    }
  }

  /// Copies every field of `other` into a copy of this record, overwriting
  /// duplicates.
  pub fn merge(&self, other: &Record) -> Record {
    other
      .iter()
      .fold(self.to_builder(), |builder, (key, value)| {
        builder.set(key, value.clone())
      })
      .build()
  }

  /// Converts a decoded JSON object into a record.
  ///
  /// # Errors
  ///
  /// Returns an element error when `json` is not an object.
  pub fn from_json(json: serde_json::Value) -> StreamResult<Record> {
    match Value::from_json(json) {
      Value::Record(record) => Ok(record),
      other => Err(StreamError::element(
        "record",
        format!("expected a JSON object, found {:?}", other.kind()),
      )),
    }
  }

  /// Encodes the record as JSON.
  ///
  /// # Errors
  ///
  /// Returns an element error when the record holds an undrained nested
  /// stream.
  pub fn to_json(&self) -> StreamResult<serde_json::Value> {
    serde_json::to_value(self).map_err(|err| StreamError::element("record", err))
  }
}

impl Serialize for Record {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.fields.len()))?;
    for (key, value) in &self.fields {
      map.serialize_entry(key, value)?;
    }
    map.end()
  }
}

impl fmt::Display for Record {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("{")?;
    for (i, (key, value)) in self.fields.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      write!(f, "{key}: {value}")?;
    }
    f.write_str("}")
  }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    iter
      .into_iter()
      .fold(RecordBuilder::new(), |builder, (key, value)| builder.set(key, value))
      .build()
  }
}

/// Accumulates fields for a new [`Record`].
#[derive(Debug, Clone, Default)]
pub struct RecordBuilder {
  fields: Vec<(String, Value)>,
}

impl RecordBuilder {
  /// Creates an empty builder.
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets a field of any kind. Setting an existing key replaces its value
  /// in place.
  #[must_use]
  pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    let key = key.into();
    let value = value.into();
    match self.fields.iter_mut().find(|(name, _)| *name == key) {
      Some(slot) => slot.1 = value,
      None => self.fields.push((key, value)),
    }
    self
  }

  /// Sets an integer field.
  #[must_use]
  pub fn int(self, key: impl Into<String>, value: i64) -> Self {
    self.set(key, Value::Int(value))
  }

  /// Sets a float field.
  #[must_use]
  pub fn float(self, key: impl Into<String>, value: f64) -> Self {
    self.set(key, Value::Float(value))
  }

  /// Sets a string field.
  #[must_use]
  pub fn string(self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.set(key, Value::String(value.into()))
  }

  /// Sets a boolean field.
  #[must_use]
  pub fn bool(self, key: impl Into<String>, value: bool) -> Self {
    self.set(key, Value::Bool(value))
  }

  /// Sets a timestamp field.
  #[must_use]
  pub fn time(self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
    self.set(key, Value::Time(value))
  }

  /// Sets a nested record field.
  #[must_use]
  pub fn record(self, key: impl Into<String>, value: Record) -> Self {
    self.set(key, Value::Record(value))
  }

  /// Sets a nested stream field.
  #[must_use]
  pub fn stream(self, key: impl Into<String>, value: NestedStream) -> Self {
    self.set(key, Value::Stream(value))
  }

  /// Finishes the record.
  pub fn build(self) -> Record {
    Record {
      fields: self.fields,
    }
  }
}
