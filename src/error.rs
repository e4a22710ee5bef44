//! Error types for plan compilation and encoding.
//!
//! Every error aborts only the top-level call that produced it. Nothing is
//! retried and nothing is logged from here; callers decide what to do.
//!
//! ## Error Categories
//!
//! - **Unsupported types**: the type cannot be represented as JSON at all. These are
//!   found while compiling a plan and remembered, so repeats fail fast.
//! - **Unsupported values**: a particular value cannot be rendered (NaN, an invalid
//!   number literal, a year outside `0..=9999`).
//! - **Type mismatches**: the data handle does not have the shape the plan expects.
//! - **Extension errors**: a type's own rendering hook failed.
//! - **Invalid options**: the options for a call contradict themselves.
//!
//! ## Partial output
//!
//! On failure the destination may hold a truncated fragment. It must be discarded.
//!
//! ## Examples
//!
//! ```rust
//! use planjson::{marshal, Data, Error, Type};
//!
//! let err = marshal(&Type::f64(), &Data::Float(f64::NAN)).unwrap_err();
//! assert!(matches!(err, Error::UnsupportedValue(_)));
//! ```

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by extension hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which extension hook produced an [`Error::Extension`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookKind {
    AppendContext,
    Append,
    Json,
    Text,
}

impl HookKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            HookKind::AppendContext => "append-with-context",
            HookKind::Append => "append",
            HookKind::Json => "json",
            HookKind::Text => "text",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents all possible errors raised while compiling or executing a plan.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The type has no JSON representation.
    #[error("unsupported type {type_name}: {reason}")]
    UnsupportedType { type_name: String, reason: String },

    /// The value cannot be rendered even though its type can.
    #[error("unsupported value: {0}")]
    UnsupportedValue(String),

    /// The data handle disagrees with the plan's type.
    #[error("type mismatch: plan for {expected} was given {found}")]
    TypeMismatch { expected: String, found: String },

    /// An extension hook returned an error or produced invalid output.
    #[error("{hook} hook of {type_name} failed: {source}")]
    Extension {
        hook: HookKind,
        type_name: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The options for the call are self-contradictory.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Writing to the caller's sink failed.
    #[error("IO error: {0}")]
    Io(String),

    /// Custom error raised through `serde::ser::Error`.
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Creates an unsupported type error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use planjson::Error;
    ///
    /// let err = Error::unsupported_type("chan int", "channels cannot be encoded");
    /// assert!(err.to_string().contains("chan int"));
    /// ```
    #[cold]
    pub fn unsupported_type(type_name: &str, reason: &str) -> Self {
        Error::UnsupportedType {
            type_name: type_name.to_string(),
            reason: reason.to_string(),
        }
    }

    #[cold]
    pub fn unsupported_value<T: fmt::Display>(msg: T) -> Self {
        Error::UnsupportedValue(msg.to_string())
    }

    /// Creates a type mismatch error between a plan's type and the data it received.
    #[cold]
    pub fn type_mismatch(expected: &str, found: &str) -> Self {
        Error::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Wraps an error returned by an extension hook.
    #[cold]
    pub fn extension(hook: HookKind, type_name: &str, source: BoxError) -> Self {
        Error::Extension {
            hook,
            type_name: type_name.to_string(),
            source: Arc::from(source),
        }
    }

    #[cold]
    pub fn invalid_option<T: fmt::Display>(msg: T) -> Self {
        Error::InvalidOption(msg.to_string())
    }

    #[cold]
    pub fn io(msg: &str) -> Self {
        Error::Io(msg.to_string())
    }

    /// Creates a custom error with a display message.
    pub fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Custom(msg.to_string())
    }

    /// Returns `true` for errors discovered while compiling a plan.
    #[must_use]
    pub fn is_compile_error(&self) -> bool {
        matches!(self, Error::UnsupportedType { .. })
    }
}

impl serde::ser::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Custom(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_error_keeps_source() {
        let source: BoxError = "boom".into();
        let err = Error::extension(HookKind::Text, "Color", source);
        let text = err.to_string();
        assert!(text.contains("text hook of Color"));
        assert!(text.contains("boom"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_compile_error_classification() {
        assert!(Error::unsupported_type("func()", "functions").is_compile_error());
        assert!(!Error::unsupported_value("NaN").is_compile_error());
    }
}
