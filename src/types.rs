//! Runtime type descriptors.
//!
//! A [`Type`] describes the shape of the data the engine is asked to encode: its
//! [`Kind`], its display name, the extension hooks it carries and, for structs, its
//! declared fields. Plans are compiled from types and cached by [`TypeId`].
//!
//! Struct types are declared first and defined afterwards, which is how
//! self-referential graphs are described:
//!
//! ```rust
//! use planjson::{FieldDecl, Type};
//!
//! let node = Type::declare_struct("Node");
//! node.define_fields(vec![
//!     FieldDecl::new("Value", Type::i64()).tag("value"),
//!     FieldDecl::new("Next", Type::ptr(&node)).tag("next,omitempty"),
//! ])
//! .unwrap();
//! assert_eq!(node.fields().unwrap().len(), 2);
//! ```
//!
//! Descriptors live for the whole process. Cyclic graphs are never torn down.

use crate::error::BoxError;
use crate::value::Data;
use crate::{Error, Result};
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Externally supplied value handed to append-with-context hooks.
pub type Context = Arc<dyn Any + Send + Sync>;

pub type AppendContextFn =
    Arc<dyn Fn(&Data, &mut Vec<u8>, Option<&Context>) -> std::result::Result<(), BoxError> + Send + Sync>;
pub type AppendFn = Arc<dyn Fn(&Data, &mut Vec<u8>) -> std::result::Result<(), BoxError> + Send + Sync>;
pub type JsonFn = Arc<dyn Fn(&Data) -> std::result::Result<Vec<u8>, BoxError> + Send + Sync>;
pub type TextFn = Arc<dyn Fn(&Data) -> std::result::Result<String, BoxError> + Send + Sync>;

/// Process-unique identity of a [`Type`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u64);

static NEXT_TYPE_ID: AtomicU64 = AtomicU64::new(1);

impl TypeId {
    fn next() -> Self {
        TypeId(NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

/// The shape of a type.
#[derive(Clone, Debug)]
pub enum Kind {
    Bool,
    Int(IntWidth),
    Uint(IntWidth),
    F32,
    F64,
    String,
    /// Date-time instant.
    Time,
    /// Signed nanosecond count.
    Duration,
    /// Pre-validated number literal passed through as text.
    Number,
    /// Pre-encoded JSON payload.
    RawMessage,
    /// Arbitrary-precision integer.
    BigInt,
    /// Concurrent map with dynamically typed keys and values.
    SyncMap,
    Array { elem: Type, len: usize },
    Slice(Type),
    Struct,
    Map { key: Type, value: Type },
    Ptr(Type),
    /// Open slot holding a value of any type.
    Any,
    Chan,
    Func,
    Complex64,
    Complex128,
}

impl Kind {
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Kind::Int(_) | Kind::Uint(_))
    }
}

/// Whether a hook was declared on the value itself or on a reference to it.
///
/// Reference hooks only apply where a reference can be formed: behind a pointer,
/// inside a slice, or inside a container that is itself addressable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Receiver {
    Value,
    Reference,
}

#[derive(Clone)]
pub struct Hook<F> {
    pub receiver: Receiver,
    pub func: F,
}

impl<F> Hook<F> {
    /// Whether the hook may be used where a reference can be formed iff `addressable`.
    #[inline]
    pub(crate) fn applies(&self, addressable: bool) -> bool {
        self.receiver == Receiver::Value || addressable
    }
}

/// Extension hooks a type may carry, tried in field order.
#[derive(Clone, Default)]
pub struct Hooks {
    pub append_context: Option<Hook<AppendContextFn>>,
    pub append: Option<Hook<AppendFn>>,
    pub json: Option<Hook<JsonFn>>,
    pub text: Option<Hook<TextFn>>,
}

impl Hooks {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.append_context.is_none()
            && self.append.is_none()
            && self.json.is_none()
            && self.text.is_none()
    }
}

/// A declared struct field.
#[derive(Clone, Debug)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Type,
    /// Tag text in the `name[,opt,...]` grammar.
    pub tag: Option<String>,
    pub embedded: bool,
    pub exported: bool,
}

impl FieldDecl {
    /// An exported, non-embedded field.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        FieldDecl {
            name: name.into(),
            ty,
            tag: None,
            embedded: false,
            exported: true,
        }
    }

    /// An embedded field named after its type (the pointee's, for pointers).
    pub fn embedded(ty: Type) -> Self {
        FieldDecl {
            name: ty.base_name().to_string(),
            ty,
            tag: None,
            embedded: true,
            exported: true,
        }
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn unexported(mut self) -> Self {
        self.exported = false;
        self
    }
}

struct TypeInner {
    id: TypeId,
    name: String,
    kind: Kind,
    hooks: Hooks,
    fields: OnceCell<Vec<FieldDecl>>,
}

/// Handle to a type descriptor. Cloning is cheap; equality is identity.
#[derive(Clone)]
pub struct Type(Arc<TypeInner>);

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.0.name)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum CompositeKey {
    Slice(TypeId),
    Array(TypeId, usize),
    Map(TypeId, TypeId),
    Ptr(TypeId),
}

// unnamed composite types are interned so `[T]` built twice is the same type
static COMPOSITES: Lazy<DashMap<CompositeKey, Type>> = Lazy::new(DashMap::new);

macro_rules! builtin {
    ($($fn_name:ident => $name:literal, $kind:expr;)*) => {
        $(
            #[doc = concat!("The built-in `", $name, "` type.")]
            pub fn $fn_name() -> Type {
                static TYPE: Lazy<Type> = Lazy::new(|| Type::new($name, $kind, Hooks::default()));
                TYPE.clone()
            }
        )*
    };
}

impl Type {
    fn new(name: impl Into<String>, kind: Kind, hooks: Hooks) -> Self {
        Type(Arc::new(TypeInner {
            id: TypeId::next(),
            name: name.into(),
            kind,
            hooks,
            fields: OnceCell::new(),
        }))
    }

    builtin! {
        bool => "bool", Kind::Bool;
        i8 => "i8", Kind::Int(IntWidth::W8);
        i16 => "i16", Kind::Int(IntWidth::W16);
        i32 => "i32", Kind::Int(IntWidth::W32);
        i64 => "i64", Kind::Int(IntWidth::W64);
        u8 => "u8", Kind::Uint(IntWidth::W8);
        u16 => "u16", Kind::Uint(IntWidth::W16);
        u32 => "u32", Kind::Uint(IntWidth::W32);
        u64 => "u64", Kind::Uint(IntWidth::W64);
        f32 => "f32", Kind::F32;
        f64 => "f64", Kind::F64;
        string => "string", Kind::String;
        time => "time", Kind::Time;
        duration => "duration", Kind::Duration;
        number => "number", Kind::Number;
        raw_message => "raw", Kind::RawMessage;
        big_int => "bigint", Kind::BigInt;
        sync_map => "sync_map", Kind::SyncMap;
        any => "any", Kind::Any;
    }

    fn interned(key: CompositeKey, make: impl FnOnce() -> (String, Kind)) -> Type {
        COMPOSITES
            .entry(key)
            .or_insert_with(|| {
                let (name, kind) = make();
                Type::new(name, kind, Hooks::default())
            })
            .clone()
    }

    /// The unnamed slice type `[elem]`.
    pub fn slice(elem: &Type) -> Type {
        Self::interned(CompositeKey::Slice(elem.id()), || {
            (format!("[{}]", elem), Kind::Slice(elem.clone()))
        })
    }

    /// The unnamed fixed-length array type `[elem; len]`.
    pub fn array(elem: &Type, len: usize) -> Type {
        Self::interned(CompositeKey::Array(elem.id(), len), || {
            (format!("[{}; {}]", elem, len), Kind::Array { elem: elem.clone(), len })
        })
    }

    /// The unnamed map type `Map<key, value>`.
    pub fn map(key: &Type, value: &Type) -> Type {
        Self::interned(CompositeKey::Map(key.id(), value.id()), || {
            (
                format!("Map<{}, {}>", key, value),
                Kind::Map {
                    key: key.clone(),
                    value: value.clone(),
                },
            )
        })
    }

    /// The unnamed pointer type `*elem`.
    pub fn ptr(elem: &Type) -> Type {
        Self::interned(CompositeKey::Ptr(elem.id()), || {
            (format!("*{}", elem), Kind::Ptr(elem.clone()))
        })
    }

    /// Declares a struct type whose fields are supplied later by [`Type::define_fields`].
    pub fn declare_struct(name: impl Into<String>) -> Type {
        Type::new(name, Kind::Struct, Hooks::default())
    }

    /// Declares and defines a struct type in one step.
    pub fn structure(name: impl Into<String>, fields: Vec<FieldDecl>) -> Type {
        let ty = Type::declare_struct(name);
        // a freshly declared struct has no fields yet
        let _ = ty.0.fields.set(fields);
        ty
    }

    /// Starts building a named type with hooks.
    pub fn builder(name: impl Into<String>, kind: Kind) -> TypeBuilder {
        TypeBuilder {
            name: name.into(),
            kind,
            hooks: Hooks::default(),
        }
    }

    /// Supplies the fields of a declared struct type.
    ///
    /// # Errors
    ///
    /// Fails if the type is not a struct or its fields were already defined.
    pub fn define_fields(&self, fields: Vec<FieldDecl>) -> Result<()> {
        if !matches!(self.0.kind, Kind::Struct) {
            return Err(Error::unsupported_type(&self.0.name, "only struct types have fields"));
        }
        self.0
            .fields
            .set(fields)
            .map_err(|_| Error::unsupported_type(&self.0.name, "struct fields already defined"))
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.0.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &Kind {
        &self.0.kind
    }

    #[inline]
    #[must_use]
    pub fn hooks(&self) -> &Hooks {
        &self.0.hooks
    }

    /// Declared fields of a struct type, `None` until defined.
    #[must_use]
    pub fn fields(&self) -> Option<&[FieldDecl]> {
        self.0.fields.get().map(Vec::as_slice)
    }

    #[must_use]
    pub fn is_ptr(&self) -> bool {
        matches!(self.0.kind, Kind::Ptr(_))
    }

    /// Name of the type, or of the pointee for pointer types.
    #[must_use]
    pub fn base_name(&self) -> &str {
        match &self.0.kind {
            Kind::Ptr(elem) => elem.name(),
            _ => self.name(),
        }
    }

    /// The type itself, or the pointee for pointer types.
    #[must_use]
    pub fn deref(&self) -> &Type {
        match &self.0.kind {
            Kind::Ptr(elem) => elem,
            _ => self,
        }
    }
}

/// Builder for named types carrying extension hooks.
///
/// ```rust
/// use planjson::{marshal, Data, Kind, Receiver, Type};
///
/// let upper = Type::builder("Upper", Kind::String)
///     .text_hook(Receiver::Value, |data| match data {
///         Data::String(s) => Ok(String::from_utf8_lossy(s).to_uppercase()),
///         _ => Err("not a string".into()),
///     })
///     .build();
/// assert_eq!(marshal(&upper, &Data::from("abc")).unwrap(), br#""ABC""#);
/// ```
pub struct TypeBuilder {
    name: String,
    kind: Kind,
    hooks: Hooks,
}

impl TypeBuilder {
    #[must_use]
    pub fn append_context_hook<F>(mut self, receiver: Receiver, func: F) -> Self
    where
        F: Fn(&Data, &mut Vec<u8>, Option<&Context>) -> std::result::Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.append_context = Some(Hook {
            receiver,
            func: Arc::new(func),
        });
        self
    }

    #[must_use]
    pub fn append_hook<F>(mut self, receiver: Receiver, func: F) -> Self
    where
        F: Fn(&Data, &mut Vec<u8>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.hooks.append = Some(Hook {
            receiver,
            func: Arc::new(func),
        });
        self
    }

    #[must_use]
    pub fn json_hook<F>(mut self, receiver: Receiver, func: F) -> Self
    where
        F: Fn(&Data) -> std::result::Result<Vec<u8>, BoxError> + Send + Sync + 'static,
    {
        self.hooks.json = Some(Hook {
            receiver,
            func: Arc::new(func),
        });
        self
    }

    #[must_use]
    pub fn text_hook<F>(mut self, receiver: Receiver, func: F) -> Self
    where
        F: Fn(&Data) -> std::result::Result<String, BoxError> + Send + Sync + 'static,
    {
        self.hooks.text = Some(Hook {
            receiver,
            func: Arc::new(func),
        });
        self
    }

    #[must_use]
    pub fn build(self) -> Type {
        Type::new(self.name, self.kind, self.hooks)
    }

    /// Builds a struct type and defines its fields.
    pub fn build_struct(self, fields: Vec<FieldDecl>) -> Result<Type> {
        let ty = self.build();
        ty.define_fields(fields)?;
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_singletons() {
        assert_eq!(Type::string(), Type::string());
        assert_ne!(Type::string().id(), Type::i64().id());
    }

    #[test]
    fn test_composites_are_interned() {
        let a = Type::slice(&Type::i32());
        let b = Type::slice(&Type::i32());
        assert_eq!(a, b);
        assert_eq!(a.name(), "[i32]");
        assert_eq!(Type::map(&Type::string(), &a).name(), "Map<string, [i32]>");
        assert_eq!(Type::array(&Type::u8(), 4).name(), "[u8; 4]");
    }

    #[test]
    fn test_named_types_are_distinct() {
        let a = Type::builder("Celsius", Kind::F64).build();
        let b = Type::builder("Celsius", Kind::F64).build();
        assert_ne!(a, b);
    }

    #[test]
    fn test_define_fields_once() {
        let node = Type::declare_struct("Node");
        assert!(node.fields().is_none());
        node.define_fields(vec![FieldDecl::new("Next", Type::ptr(&node))])
            .unwrap();
        assert!(node.define_fields(vec![]).is_err());
        assert!(Type::i64().define_fields(vec![]).is_err());
    }

    #[test]
    fn test_embedded_field_name() {
        let inner = Type::structure("Inner", vec![]);
        assert_eq!(FieldDecl::embedded(Type::ptr(&inner)).name, "Inner");
        assert_eq!(Type::ptr(&inner).deref(), &inner);
    }
}
