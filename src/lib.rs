//! # planjson
//!
//! A JSON encoder that compiles an encoding plan once per type and reuses it for
//! every value of that type.
//!
//! ## How it works
//!
//! Values are described by a runtime [`Type`] and held in a [`Data`] handle. The
//! first time a type is encoded, its plan (an [`Instruction`]) is compiled and
//! stored in the process-wide [`InstructionCache`]. Later calls skip straight to
//! execution, which appends to a pooled buffer without re-inspecting the type.
//!
//! ## Key Features
//!
//! - **Compile once**: plans are memoized per type; concurrent first use compiles
//!   exactly once, and self-referential types terminate
//! - **Field promotion**: embedded structs promote their fields with the usual
//!   shallowest / tagged / ambiguous-drops rules
//! - **Extension hooks**: types may render themselves through append, JSON or text
//!   hooks, declared on the value or on references to it
//! - **Deterministic maps**: entries are sorted by rendered key unless disabled
//! - **No unsafe code**
//!
//! ## Quick Start
//!
//! ```rust
//! use planjson::{marshal, Data, FieldDecl, Type};
//!
//! let record = Type::structure("Record", vec![
//!     FieldDecl::new("A", Type::string()).tag("a"),
//!     FieldDecl::new("B", Type::i64()).tag("b"),
//!     FieldDecl::new("C", Type::slice(&Type::string())).tag("colors"),
//! ]);
//! let value = Data::Struct(vec![
//!     Data::from("x"),
//!     Data::from(-42i64),
//!     Data::slice(vec![Data::from("p"), Data::from("q")]),
//! ]);
//! assert_eq!(marshal(&record, &value).unwrap(), br#"{"a":"x","b":-42,"colors":["p","q"]}"#);
//! ```
//!
//! ### Options
//!
//! ```rust
//! use planjson::{marshal_with, Data, EncodeOption, Type};
//!
//! let out = marshal_with(&Type::string(), &Data::from("<b>"), &[EncodeOption::DisableHtmlEscape]).unwrap();
//! assert_eq!(out, br#""<b>""#);
//! ```
//!
//! ### Reusing options
//!
//! ```rust
//! use planjson::{Data, EncodeOptions, Encoder, Type};
//!
//! let encoder = Encoder::new(EncodeOptions::new().with_map_sort(false)).unwrap();
//! let mut buf = b"payload=".to_vec();
//! encoder.append(&mut buf, &Type::bool(), &Data::Bool(true)).unwrap();
//! assert_eq!(buf, b"payload=true");
//! ```
//!
//! ## Errors
//!
//! Every error aborts the current call only. Compilation failures are remembered
//! per type. On failure the destination may hold a truncated fragment, which
//! must be discarded.

pub mod bytes;
mod cache;
mod compiler;
mod encode;
pub mod error;
pub mod escape;
pub mod fields;
mod map;
pub mod number;
pub mod options;
mod pool;
pub mod time;
pub mod types;
pub mod value;

pub use cache::InstructionCache;
pub use encode::Instruction;
pub use error::{BoxError, Error, HookKind, Result};
pub use options::{DurationFormat, EncodeConfig, EncodeOption, EncodeOptions};
pub use types::{Context, FieldDecl, Hooks, IntWidth, Kind, Receiver, Type, TypeBuilder, TypeId};
pub use value::{Data, Dynamic};

use once_cell::sync::Lazy;
use pool::{BUFFERS, STATES};
use std::io;

// The defaults always validate, so the plain entry points skip option handling.
static DEFAULT_ENCODER: Lazy<Encoder> = Lazy::new(|| Encoder {
    options: EncodeOptions::default(),
    cache: InstructionCache::global().clone(),
});

/// Encodes values with a fixed, validated set of options.
#[derive(Clone, Debug)]
pub struct Encoder {
    options: EncodeOptions,
    cache: InstructionCache,
}

impl Encoder {
    /// Creates an encoder backed by the global plan cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if the options contradict each other.
    pub fn new(options: EncodeOptions) -> Result<Self> {
        options.validate()?;
        Ok(Encoder {
            options,
            cache: InstructionCache::global().clone(),
        })
    }

    /// Creates an encoder from a list of overrides on the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if the options contradict each other.
    pub fn from_list(list: &[EncodeOption]) -> Result<Self> {
        Self::new(EncodeOptions::from_list(list))
    }

    /// The shared encoder with default options and the global cache.
    pub fn default_ref() -> &'static Encoder {
        &DEFAULT_ENCODER
    }

    /// Uses `cache` instead of the global cache.
    #[must_use]
    pub fn with_cache(mut self, cache: InstructionCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn options(&self) -> &EncodeOptions {
        &self.options
    }

    pub fn cache(&self) -> &InstructionCache {
        &self.cache
    }

    /// Encodes `data` of type `ty` into a new buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unsupported, the data does not match it, a
    /// value cannot be represented, or a hook fails.
    #[must_use = "this returns the result of the operation, errors must be handled"]
    pub fn encode(&self, ty: &Type, data: &Data) -> Result<Vec<u8>> {
        let plan = self.cache.get(ty)?;
        BUFFERS.borrow_mut(|buf| {
            self.run(&plan, data, buf)?;
            Ok(buf.to_vec())
        })
    }

    /// Appends the encoding of `data` to `buf`.
    ///
    /// # Errors
    ///
    /// As for [`Encoder::encode`]. `buf` may hold a partial fragment on failure.
    pub fn append(&self, buf: &mut Vec<u8>, ty: &Type, data: &Data) -> Result<()> {
        let plan = self.cache.get(ty)?;
        self.run(&plan, data, buf)
    }

    /// Writes the encoding of `data` to `writer`. Nothing is written on failure.
    ///
    /// # Errors
    ///
    /// As for [`Encoder::encode`], plus [`Error::Io`] if writing fails.
    pub fn write<W: io::Write>(&self, mut writer: W, ty: &Type, data: &Data) -> Result<()> {
        let plan = self.cache.get(ty)?;
        BUFFERS.borrow_mut(|buf| {
            self.run(&plan, data, buf)?;
            writer.write_all(buf).map_err(|e| Error::io(&e.to_string()))
        })
    }

    fn run(&self, plan: &Instruction, data: &Data, out: &mut Vec<u8>) -> Result<()> {
        STATES.borrow_mut(|state| plan.run(data, out, &self.options, state))
    }
}

/// Encodes `data` of type `ty` with default options.
///
/// # Examples
///
/// ```rust
/// use planjson::{marshal, Data, Type};
///
/// let list = Type::slice(&Type::f64());
/// let out = marshal(&list, &Data::slice(vec![Data::from(1.5), Data::from(-0.0)])).unwrap();
/// assert_eq!(out, b"[1.5,-0]");
/// ```
///
/// # Errors
///
/// Returns an error if the type is unsupported, the data does not match it, a
/// value cannot be represented (NaN, infinities, invalid number literals), or a
/// hook fails.
#[must_use = "this returns the result of the operation, errors must be handled"]
pub fn marshal(ty: &Type, data: &Data) -> Result<Vec<u8>> {
    marshal_with(ty, data, &[])
}

/// Encodes `data` of type `ty` with overrides on the default options.
///
/// # Errors
///
/// As for [`marshal`], plus [`Error::InvalidOption`] for contradictory options.
#[must_use = "this returns the result of the operation, errors must be handled"]
pub fn marshal_with(ty: &Type, data: &Data, options: &[EncodeOption]) -> Result<Vec<u8>> {
    if options.is_empty() {
        return DEFAULT_ENCODER.encode(ty, data);
    }
    Encoder::from_list(options)?.encode(ty, data)
}

/// Appends the encoding of `data` to `buf` with default options.
///
/// # Errors
///
/// As for [`marshal`]. `buf` may hold a partial fragment on failure.
pub fn append(buf: &mut Vec<u8>, ty: &Type, data: &Data) -> Result<()> {
    append_with(buf, ty, data, &[])
}

/// Appends the encoding of `data` to `buf` with overrides on the defaults.
///
/// # Errors
///
/// As for [`marshal_with`].
pub fn append_with(buf: &mut Vec<u8>, ty: &Type, data: &Data, options: &[EncodeOption]) -> Result<()> {
    if options.is_empty() {
        return DEFAULT_ENCODER.append(buf, ty, data);
    }
    Encoder::from_list(options)?.append(buf, ty, data)
}

/// Writes the encoding of `data` to `writer` with default options.
///
/// # Examples
///
/// ```rust
/// use planjson::{to_writer, Data, Type};
///
/// let mut sink = Vec::new();
/// to_writer(&mut sink, &Type::string(), &Data::from("hi")).unwrap();
/// assert_eq!(sink, br#""hi""#);
/// ```
///
/// # Errors
///
/// As for [`marshal`], plus [`Error::Io`] if writing fails.
pub fn to_writer<W: io::Write>(writer: W, ty: &Type, data: &Data) -> Result<()> {
    to_writer_with(writer, ty, data, &[])
}

/// Writes the encoding of `data` to `writer` with overrides on the defaults.
///
/// # Errors
///
/// As for [`to_writer`], plus [`Error::InvalidOption`] for contradictory options.
pub fn to_writer_with<W: io::Write>(writer: W, ty: &Type, data: &Data, options: &[EncodeOption]) -> Result<()> {
    if options.is_empty() {
        return DEFAULT_ENCODER.write(writer, ty, data);
    }
    Encoder::from_list(options)?.write(writer, ty, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Type {
        Type::structure(
            "Record",
            vec![
                FieldDecl::new("A", Type::string()).tag("a"),
                FieldDecl::new("B", Type::i64()).tag("b"),
                FieldDecl::new("C", Type::slice(&Type::string())).tag("colors"),
            ],
        )
    }

    fn record_data() -> Data {
        Data::Struct(vec![
            Data::from("x"),
            Data::Int(-42),
            Data::slice(vec![Data::from("p"), Data::from("q")]),
        ])
    }

    #[test]
    fn test_marshal_record() {
        let out = marshal(&record(), &record_data()).unwrap();
        assert_eq!(out, br#"{"a":"x","b":-42,"colors":["p","q"]}"#);
    }

    #[test]
    fn test_append_keeps_prefix() {
        let mut buf = b"[".to_vec();
        append(&mut buf, &Type::i64(), &Data::Int(1)).unwrap();
        buf.push(b']');
        assert_eq!(buf, b"[1]");
    }

    #[test]
    fn test_writer_receives_nothing_on_failure() {
        let mut sink = Vec::new();
        let list = Type::slice(&Type::f64());
        let data = Data::slice(vec![Data::from(1.0), Data::from(f64::NAN)]);
        assert!(matches!(to_writer(&mut sink, &list, &data), Err(Error::UnsupportedValue(_))));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_invalid_options_rejected_at_call_start() {
        let err = marshal_with(&Type::bool(), &Data::Bool(true), &[EncodeOption::TimeLayout(String::new())])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOption(_)));
    }

    #[test]
    fn test_default_encoder_is_valid() {
        let encoder = Encoder::default_ref();
        assert!(encoder.options().validate().is_ok());
        assert!(encoder.options().sort_map_keys);
        assert!(encoder.options().context.is_none());
        assert_eq!(encoder.encode(&Type::string(), &Data::from("<")).unwrap(), br#""\u003c""#);
    }

    #[test]
    fn test_encoder_with_private_cache() {
        let cache = InstructionCache::new();
        let encoder = Encoder::new(EncodeOptions::default()).unwrap().with_cache(cache.clone());
        encoder.encode(&record(), &record_data()).unwrap();
        assert_eq!(cache.compile_count(), 4);
        encoder.encode(&record(), &record_data()).unwrap();
        // a second `record()` is a distinct type
        assert_eq!(cache.compile_count(), 5);
    }
}
