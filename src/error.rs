//! # Error Handling
//!
//! Error taxonomy shared by every stream, aggregation scope and window
//! operator in the crate.
//!
//! ## Overview
//!
//! Four outcomes can surface while pulling a stream, and only two of them are
//! errors:
//!
//! - **End of sequence** is not an error. It is reported as
//!   [`Pull::End`](crate::stream::Pull::End) and is idempotent.
//! - **Element errors** ([`StreamError::Element`]) mean a pull failed. They
//!   propagate unchanged through every wrapper and halt the stream that
//!   produced them. Nothing in the crate retries.
//! - **Configuration errors** ([`StreamError::Configuration`]) are raised when a
//!   window, aggregator or fan-out is built with invalid parameters, before any
//!   element flows.
//! - **Conversion misses** on typed record accessors are not errors at all;
//!   they resolve through `Option` or a caller supplied default.
//!
//! ## Example
//!
//! ```rust
//! use eventweave::error::StreamError;
//!
//! let err = StreamError::element("csv_source", "unterminated quote");
//! assert!(err.is_element());
//! assert_eq!(err.component().map(|c| c.name.as_str()), Some("csv_source"));
//! ```

use chrono::{DateTime, Utc};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Shared, clonable error cause.
///
/// Causes are reference counted so that a single failure can be observed by
/// every consumer of a teed or split stream.
pub type SharedError = Arc<dyn Error + Send + Sync>;

/// Result alias used throughout the crate.
pub type StreamResult<T> = Result<T, StreamError>;

/// Information about a pipeline component.
///
/// Used to attribute element errors to the stage that raised them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
  /// The name of the component.
  pub name: String,
  /// The type name of the component.
  pub type_name: String,
}

impl Default for ComponentInfo {
  fn default() -> Self {
    Self {
      name: "default".to_string(),
      type_name: "default".to_string(),
    }
  }
}

impl ComponentInfo {
  /// Creates a new `ComponentInfo` with the given name and type name.
  pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      type_name: type_name.into(),
    }
  }
}

impl fmt::Display for ComponentInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.name == self.type_name {
      write!(f, "{}", self.name)
    } else {
      write!(f, "{} ({})", self.name, self.type_name)
    }
  }
}

/// Context information about when and where an element error occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
  /// Wall-clock time at which the error was raised.
  pub timestamp: DateTime<Utc>,
  /// The component that raised the error.
  pub component: ComponentInfo,
}

impl ErrorContext {
  /// Creates a context for `component`, stamped with the current time.
  pub fn new(component: ComponentInfo) -> Self {
    Self {
      timestamp: Utc::now(),
      component,
    }
  }
}

impl Default for ErrorContext {
  fn default() -> Self {
    Self::new(ComponentInfo::default())
  }
}

impl fmt::Display for ErrorContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.component.fmt(f)
  }
}

/// Error raised while building or pulling a stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
  /// A pull failed. The stream that produced it yields end of sequence
  /// afterwards.
  #[error("element error in {context}: {cause}")]
  Element {
    /// Where and when the failure happened.
    context: ErrorContext,
    /// The underlying failure.
    #[source]
    cause: SharedError,
  },
  /// An operator was configured with invalid parameters.
  #[error("invalid configuration: {0}")]
  Configuration(String),
}

impl StreamError {
  /// Creates an element error attributed to `component`.
  ///
  /// `cause` accepts any error type as well as plain strings.
  pub fn element(
    component: impl Into<String>,
    cause: impl Into<Box<dyn Error + Send + Sync>>,
  ) -> Self {
    let name = component.into();
    let cause: Box<dyn Error + Send + Sync> = cause.into();
    Self::Element {
      context: ErrorContext::new(ComponentInfo::new(name.clone(), name)),
      cause: Arc::from(cause),
    }
  }

  /// Creates an element error with full component information.
  pub fn from_component(
    component: ComponentInfo,
    cause: impl Into<Box<dyn Error + Send + Sync>>,
  ) -> Self {
    let cause: Box<dyn Error + Send + Sync> = cause.into();
    Self::Element {
      context: ErrorContext::new(component),
      cause: Arc::from(cause),
    }
  }

  /// Creates a configuration error.
  pub fn configuration(message: impl Into<String>) -> Self {
    Self::Configuration(message.into())
  }

  /// Returns true for [`StreamError::Element`].
  pub fn is_element(&self) -> bool {
    matches!(self, Self::Element { .. })
  }

  /// Returns true for [`StreamError::Configuration`].
  pub fn is_configuration(&self) -> bool {
    matches!(self, Self::Configuration(_))
  }

  /// Returns the component that raised an element error.
  pub fn component(&self) -> Option<&ComponentInfo> {
    match self {
      Self::Element { context, .. } => Some(&context.component),
      Self::Configuration(_) => None,
    }
  }

  /// Returns the underlying cause of an element error.
  pub fn cause(&self) -> Option<&SharedError> {
    match self {
      Self::Element { cause, .. } => Some(cause),
      Self::Configuration(_) => None,
    }
  }
}
