//! Data handles traversed by compiled plans.
//!
//! A value view is the pair of a [`Type`] and a [`Data`]. The type says how to read
//! the data; the data is a tagged union whose variants mirror [`Kind`](crate::Kind)s.
//! Plans borrow the data and never copy it.
//!
//! ## Usage Patterns
//!
//! ```rust
//! use planjson::{marshal, Data, FieldDecl, Type};
//!
//! let point = Type::structure("Point", vec![
//!     FieldDecl::new("X", Type::i64()).tag("x"),
//!     FieldDecl::new("Y", Type::i64()).tag("y"),
//! ]);
//! let data = Data::Struct(vec![Data::Int(1), Data::Int(2)]);
//! assert_eq!(marshal(&point, &data).unwrap(), br#"{"x":1,"y":2}"#);
//! ```
//!
//! Nil-able kinds (pointers, slices, maps, dynamic slots, byte slices, raw payloads)
//! carry an `Option`; `None` is nil.

use crate::types::Type;
use chrono::{DateTime, FixedOffset};
use dashmap::DashMap;
use num_bigint::BigInt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Storage for one value. Which variant is expected is decided by the value's type.
#[derive(Clone, Debug)]
pub enum Data {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    /// Byte string; may hold invalid UTF-8.
    String(Vec<u8>),
    /// Byte slice or fixed-length byte array. Those types also take `Slice` or
    /// `Array` of `Uint` elements, each at most 255.
    Bytes(Option<Vec<u8>>),
    Time(DateTime<FixedOffset>),
    /// Nanoseconds.
    Duration(i64),
    /// Number literal text.
    Number(String),
    /// Pre-encoded JSON.
    Raw(Option<Vec<u8>>),
    BigInt(BigInt),
    Array(Vec<Data>),
    Slice(Option<Vec<Data>>),
    /// One entry per declared field, in declaration order.
    Struct(Vec<Data>),
    Map(Option<Vec<(Data, Data)>>),
    SyncMap(Arc<DashMap<Dynamic, Dynamic>>),
    Ptr(Option<Box<Data>>),
    Any(Option<Box<Dynamic>>),
}

/// An owned value of a type known only at run time.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Dynamic {
    pub ty: Type,
    pub data: Data,
}

impl Dynamic {
    pub fn new(ty: Type, data: impl Into<Data>) -> Self {
        Dynamic {
            ty,
            data: data.into(),
        }
    }
}

impl Data {
    /// A non-nil pointer to `data`.
    pub fn ptr(data: impl Into<Data>) -> Self {
        Data::Ptr(Some(Box::new(data.into())))
    }

    pub fn nil_ptr() -> Self {
        Data::Ptr(None)
    }

    /// A non-nil slice.
    pub fn slice(items: Vec<Data>) -> Self {
        Data::Slice(Some(items))
    }

    /// A non-nil map with entries in the given order.
    pub fn map(entries: Vec<(Data, Data)>) -> Self {
        Data::Map(Some(entries))
    }

    /// A dynamic slot holding `data` of type `ty`.
    pub fn any(ty: Type, data: impl Into<Data>) -> Self {
        Data::Any(Some(Box::new(Dynamic::new(ty, data))))
    }

    pub fn nil_any() -> Self {
        Data::Any(None)
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Data::Bytes(Some(bytes.into()))
    }

    pub fn raw(json: impl Into<Vec<u8>>) -> Self {
        Data::Raw(Some(json.into()))
    }

    pub fn number(literal: impl Into<String>) -> Self {
        Data::Number(literal.into())
    }

    /// Name of the variant, for diagnostics.
    #[must_use]
    pub const fn variant_name(&self) -> &'static str {
        match self {
            Data::Bool(_) => "bool",
            Data::Int(_) => "int",
            Data::Uint(_) => "uint",
            Data::Float(_) => "float",
            Data::String(_) => "string",
            Data::Bytes(_) => "bytes",
            Data::Time(_) => "time",
            Data::Duration(_) => "duration",
            Data::Number(_) => "number",
            Data::Raw(_) => "raw",
            Data::BigInt(_) => "bigint",
            Data::Array(_) => "array",
            Data::Slice(_) => "slice",
            Data::Struct(_) => "struct",
            Data::Map(_) => "map",
            Data::SyncMap(_) => "sync_map",
            Data::Ptr(_) => "pointer",
            Data::Any(_) => "any",
        }
    }

    /// `true` for a nil pointer, slice, map, dynamic slot, byte slice or raw payload.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(
            self,
            Data::Ptr(None)
                | Data::Slice(None)
                | Data::Map(None)
                | Data::Any(None)
                | Data::Bytes(None)
                | Data::Raw(None)
        )
    }

    /// The emptiness test behind `omitempty`.
    ///
    /// Structs, time instants, big integers and concurrent maps are never empty.
    #[must_use]
    pub fn is_empty_value(&self) -> bool {
        match self {
            Data::Bool(b) => !b,
            Data::Int(v) | Data::Duration(v) => *v == 0,
            Data::Uint(v) => *v == 0,
            Data::Float(v) => *v == 0.0,
            Data::String(s) => s.is_empty(),
            Data::Number(s) => s.is_empty(),
            Data::Bytes(b) | Data::Raw(b) => b.as_ref().map_or(true, Vec::is_empty),
            Data::Array(items) => items.is_empty(),
            Data::Slice(items) => items.as_ref().map_or(true, Vec::is_empty),
            Data::Map(entries) => entries.as_ref().map_or(true, Vec::is_empty),
            Data::Ptr(p) => p.is_none(),
            Data::Any(d) => d.is_none(),
            Data::Time(_) | Data::BigInt(_) | Data::Struct(_) | Data::SyncMap(_) => false,
        }
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Data::Bool(a), Data::Bool(b)) => a == b,
            (Data::Int(a), Data::Int(b)) => a == b,
            (Data::Uint(a), Data::Uint(b)) => a == b,
            // bitwise, so keys stay hashable
            (Data::Float(a), Data::Float(b)) => a.to_bits() == b.to_bits(),
            (Data::String(a), Data::String(b)) => a == b,
            (Data::Bytes(a), Data::Bytes(b)) => a == b,
            (Data::Time(a), Data::Time(b)) => a == b && a.offset() == b.offset(),
            (Data::Duration(a), Data::Duration(b)) => a == b,
            (Data::Number(a), Data::Number(b)) => a == b,
            (Data::Raw(a), Data::Raw(b)) => a == b,
            (Data::BigInt(a), Data::BigInt(b)) => a == b,
            (Data::Array(a), Data::Array(b)) => a == b,
            (Data::Slice(a), Data::Slice(b)) => a == b,
            (Data::Struct(a), Data::Struct(b)) => a == b,
            (Data::Map(a), Data::Map(b)) => a == b,
            (Data::SyncMap(a), Data::SyncMap(b)) => Arc::ptr_eq(a, b),
            (Data::Ptr(a), Data::Ptr(b)) => a == b,
            (Data::Any(a), Data::Any(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Data {}

impl Hash for Data {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Data::Bool(v) => v.hash(state),
            Data::Int(v) | Data::Duration(v) => v.hash(state),
            Data::Uint(v) => v.hash(state),
            Data::Float(v) => v.to_bits().hash(state),
            Data::String(v) => v.hash(state),
            Data::Bytes(v) | Data::Raw(v) => v.hash(state),
            Data::Time(v) => v.hash(state),
            Data::Number(v) => v.hash(state),
            Data::BigInt(v) => v.hash(state),
            Data::Array(v) | Data::Struct(v) => v.hash(state),
            Data::Slice(v) => v.hash(state),
            Data::Map(v) => v.hash(state),
            Data::SyncMap(v) => (Arc::as_ptr(v) as usize).hash(state),
            Data::Ptr(v) => v.hash(state),
            Data::Any(v) => v.hash(state),
        }
    }
}

impl From<bool> for Data {
    fn from(v: bool) -> Self {
        Data::Bool(v)
    }
}

macro_rules! from_signed {
    ($($t:ty),*) => {$(
        impl From<$t> for Data {
            fn from(v: $t) -> Self {
                Data::Int(i64::from(v))
            }
        }
    )*};
}

macro_rules! from_unsigned {
    ($($t:ty),*) => {$(
        impl From<$t> for Data {
            fn from(v: $t) -> Self {
                Data::Uint(u64::from(v))
            }
        }
    )*};
}

from_signed!(i8, i16, i32, i64);
from_unsigned!(u8, u16, u32, u64);

impl From<f32> for Data {
    fn from(v: f32) -> Self {
        Data::Float(f64::from(v))
    }
}

impl From<f64> for Data {
    fn from(v: f64) -> Self {
        Data::Float(v)
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::String(s.as_bytes().to_vec())
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::String(s.into_bytes())
    }
}

impl From<DateTime<FixedOffset>> for Data {
    fn from(t: DateTime<FixedOffset>) -> Self {
        Data::Time(t)
    }
}

impl From<BigInt> for Data {
    fn from(v: BigInt) -> Self {
        Data::BigInt(v)
    }
}

impl From<Vec<Data>> for Data {
    fn from(items: Vec<Data>) -> Self {
        Data::Slice(Some(items))
    }
}
