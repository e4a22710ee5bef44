//! Compiled plans and their execution.
//!
//! An [`Instruction`] is bound to one type. Running it walks the data handle,
//! appends to the output buffer and recurses into child instructions. Plans carry
//! no per-call state; everything mutable lives in the pooled [`EncodeState`].

use crate::bytes::{append_base64, append_byte_array, append_raw_string, compact};
use crate::cache::{CacheRef, Slot};
use crate::error::HookKind;
use crate::escape::append_quoted;
use crate::fields::{Field, Step};
use crate::map::{self, MapPlan};
use crate::number::{append_float, append_i64, append_u64, is_valid_number, FloatBits};
use crate::options::EncodeOptions;
use crate::pool::{EncodeState, BUFFERS, STATES};
use crate::time::{append_duration, append_time, append_unix};
use crate::types::{AppendContextFn, AppendFn, JsonFn, Kind, TextFn, Type};
use crate::value::Data;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// A compiled, type-specific rendering function.
///
/// Cheap to clone; safe to run from any number of threads.
#[derive(Clone)]
pub struct Instruction(Arc<Compiled>);

struct Compiled {
    ty: Type,
    plan: Plan,
}

/// The hook a plan calls.
#[derive(Clone)]
pub(crate) enum HookFn {
    AppendContext(AppendContextFn),
    Append(AppendFn),
    Json(JsonFn),
    Text(TextFn),
}

impl HookFn {
    pub(crate) fn kind(&self) -> HookKind {
        match self {
            HookFn::AppendContext(_) => HookKind::AppendContext,
            HookFn::Append(_) => HookKind::Append,
            HookFn::Json(_) => HookKind::Json,
            HookFn::Text(_) => HookKind::Text,
        }
    }
}

pub(crate) struct FieldPlan {
    pub field: Field,
    pub instruction: Instruction,
}

pub(crate) enum Plan {
    Bool,
    Int,
    Uint,
    Float(FloatBits),
    Str,
    /// The `string` field option: the inner rendering wrapped in a JSON string.
    Quoted(Instruction),
    Time,
    Duration,
    Number,
    Raw,
    BigInt,
    Hook {
        hook: HookFn,
        /// Plan for occurrences that cannot take a reference. Only set for
        /// reference-receiver hooks.
        fallback: Option<Instruction>,
    },
    Slice(Instruction),
    ByteSlice,
    ByteArray(usize),
    Array { elem: Instruction, len: usize },
    Struct(Vec<FieldPlan>),
    Map(MapPlan),
    SyncMap(CacheRef),
    Ptr(Instruction),
    /// Dispatches on the dynamic type found in the slot.
    Dynamic(CacheRef),
    /// Stand-in for a type that was still compiling when this plan was built.
    Deferred { slot: Arc<Slot>, cache: CacheRef },
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instruction({})", self.0.ty)
    }
}

#[inline]
fn mismatch(ty: &Type, data: &Data) -> Error {
    Error::type_mismatch(ty.name(), data.variant_name())
}

impl Instruction {
    pub(crate) fn new(ty: &Type, plan: Plan) -> Self {
        Instruction(Arc::new(Compiled { ty: ty.clone(), plan }))
    }

    /// The type this plan was compiled for.
    pub fn ty(&self) -> &Type {
        &self.0.ty
    }

    /// Whether both handles refer to the same compiled plan.
    pub fn same_plan(&self, other: &Instruction) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Appends the JSON form of `data` to `out`.
    ///
    /// # Errors
    ///
    /// Fails on invalid options, on data that disagrees with the plan's type, on
    /// unrepresentable values and on hook failures. `out` may then hold a partial
    /// fragment.
    pub fn encode(&self, data: &Data, out: &mut Vec<u8>, options: &EncodeOptions) -> Result<()> {
        options.validate()?;
        STATES.borrow_mut(|state| self.run(data, out, options, state))
    }

    pub(crate) fn run(
        &self,
        data: &Data,
        out: &mut Vec<u8>,
        options: &EncodeOptions,
        state: &mut EncodeState,
    ) -> Result<()> {
        let ty = &self.0.ty;
        match (&self.0.plan, data) {
            (Plan::Bool, Data::Bool(v)) => {
                out.extend_from_slice(if *v { &b"true"[..] } else { b"false" });
                Ok(())
            }
            (Plan::Int, Data::Int(v)) => {
                append_i64(out, *v);
                Ok(())
            }
            (Plan::Uint, Data::Uint(v)) => {
                append_u64(out, *v);
                Ok(())
            }
            (Plan::Float(bits), Data::Float(v)) => append_float(out, *v, *bits),
            (Plan::Str, Data::String(s)) => {
                append_quoted(out, s, options.escape());
                Ok(())
            }
            (Plan::Quoted(inner), data) => run_quoted(inner, data, out, options, state),
            (Plan::Time, Data::Time(t)) => {
                if options.unix_time {
                    append_unix(out, t);
                    Ok(())
                } else {
                    append_time(out, t, &options.time_layout, options.escape())
                }
            }
            (Plan::Duration, Data::Duration(nanos)) => {
                append_duration(out, *nanos, options.duration_format)
            }
            (Plan::Number, Data::Number(literal)) => append_number(out, literal, options),
            (Plan::Raw, Data::Raw(raw)) => append_raw(out, raw.as_deref(), options),
            (Plan::BigInt, Data::BigInt(v)) => {
                out.extend_from_slice(v.to_str_radix(10).as_bytes());
                Ok(())
            }
            (Plan::Hook { hook, fallback }, data) => {
                if !state.addressable {
                    if let Some(fallback) = fallback {
                        return fallback.run(data, out, options, state);
                    }
                }
                run_hook(ty, hook, data, out, options)
            }
            (Plan::Slice(elem), Data::Slice(items)) => match items {
                None => {
                    out.extend_from_slice(if options.nil_slice_as_empty { &b"[]"[..] } else { b"null" });
                    Ok(())
                }
                Some(items) => {
                    state.enter(ty.name())?;
                    let saved = state.addressable;
                    state.addressable = true;
                    let result = run_items(elem, items, out, options, state);
                    state.addressable = saved;
                    state.leave();
                    result
                }
            },
            (Plan::ByteSlice, Data::Bytes(bytes)) => {
                append_byte_slice(out, bytes.as_deref(), options);
                Ok(())
            }
            (Plan::ByteSlice, Data::Slice(items)) => {
                let bytes = items.as_deref().map(|items| collect_bytes(ty, items)).transpose()?;
                append_byte_slice(out, bytes.as_deref(), options);
                Ok(())
            }
            (Plan::ByteArray(len), Data::Bytes(Some(bytes))) if bytes.len() == *len => {
                append_byte_array_as(out, bytes, options);
                Ok(())
            }
            (Plan::ByteArray(len), Data::Array(items)) if items.len() == *len => {
                append_byte_array_as(out, &collect_bytes(ty, items)?, options);
                Ok(())
            }
            (Plan::Array { elem, len }, Data::Array(items)) if items.len() == *len => {
                state.enter(ty.name())?;
                let result = run_items(elem, items, out, options, state);
                state.leave();
                result
            }
            (Plan::Struct(fields), Data::Struct(values)) => {
                state.enter(ty.name())?;
                let result = run_struct(ty, fields, values, out, options, state);
                state.leave();
                result
            }
            (Plan::Map(plan), data) => map::encode_map(ty, plan, data, out, options, state),
            (Plan::SyncMap(cache), Data::SyncMap(entries)) => {
                map::encode_sync_map(ty, cache, entries, out, options, state)
            }
            (Plan::Ptr(elem), Data::Ptr(target)) => match target {
                None => {
                    out.extend_from_slice(b"null");
                    Ok(())
                }
                Some(target) => {
                    state.enter(ty.name())?;
                    let saved = state.addressable;
                    state.addressable = true;
                    let result = elem.run(target, out, options, state);
                    state.addressable = saved;
                    state.leave();
                    result
                }
            },
            (Plan::Dynamic(cache), Data::Any(slot)) => match slot {
                None => {
                    out.extend_from_slice(b"null");
                    Ok(())
                }
                Some(dynamic) => {
                    let plan = cache.get(&dynamic.ty)?;
                    state.enter(ty.name())?;
                    let saved = state.addressable;
                    state.addressable = false;
                    let result = plan.run(&dynamic.data, out, options, state);
                    state.addressable = saved;
                    state.leave();
                    result
                }
            },
            (Plan::Deferred { slot, cache }, data) => {
                // a failed slot may have been retried since; ask the cache again
                let plan = slot.wait().or_else(|_| cache.get(ty))?;
                plan.run(data, out, options, state)
            }
            (_, data) => Err(mismatch(ty, data)),
        }
    }
}

// Kept out of `run` so the recursive frame stays small.
fn run_quoted(
    inner: &Instruction,
    data: &Data,
    out: &mut Vec<u8>,
    options: &EncodeOptions,
    state: &mut EncodeState,
) -> Result<()> {
    if data.is_nil() {
        out.extend_from_slice(b"null");
        return Ok(());
    }
    BUFFERS.borrow_mut(|scratch| {
        inner.run(data, scratch, options, state)?;
        append_quoted(out, scratch, options.escape());
        Ok(())
    })
}

fn append_number(out: &mut Vec<u8>, literal: &str, options: &EncodeOptions) -> Result<()> {
    if literal.is_empty() {
        out.push(b'0');
        return Ok(());
    }
    if options.validate_numbers && !is_valid_number(literal.as_bytes()) {
        return Err(Error::unsupported_value(format!("invalid number literal {:?}", literal)));
    }
    out.extend_from_slice(literal.as_bytes());
    Ok(())
}

fn append_raw(out: &mut Vec<u8>, raw: Option<&[u8]>, options: &EncodeOptions) -> Result<()> {
    match raw {
        None | Some([]) => {
            out.extend_from_slice(b"null");
            Ok(())
        }
        Some(json) if options.compact_raw => compact(out, json, options.escape_html)
            .map_err(|msg| Error::unsupported_value(format!("invalid raw JSON: {}", msg))),
        Some(json) => {
            out.extend_from_slice(json);
            Ok(())
        }
    }
}

/// Byte sequences may also arrive element by element, as unsigned integers.
fn collect_bytes(ty: &Type, items: &[Data]) -> Result<Vec<u8>> {
    items
        .iter()
        .map(|item| match item {
            Data::Uint(v) => u8::try_from(*v)
                .map_err(|_| Error::unsupported_value(format!("{} does not fit in a byte of {}", v, ty.name()))),
            other => Err(mismatch(ty, other)),
        })
        .collect()
}

fn append_byte_slice(out: &mut Vec<u8>, bytes: Option<&[u8]>, options: &EncodeOptions) {
    match bytes {
        None => out.extend_from_slice(if options.nil_slice_as_empty { &b"\"\""[..] } else { b"null" }),
        Some(bytes) => append_bytes(out, bytes, options),
    }
}

fn append_byte_array_as(out: &mut Vec<u8>, bytes: &[u8], options: &EncodeOptions) {
    if options.byte_array_as_string {
        append_bytes(out, bytes, options);
    } else {
        append_byte_array(out, bytes);
    }
}

#[inline]
fn append_bytes(out: &mut Vec<u8>, bytes: &[u8], options: &EncodeOptions) {
    if options.raw_byte_slice {
        append_raw_string(out, bytes, options.escape());
    } else {
        append_base64(out, bytes);
    }
}

fn run_items(
    elem: &Instruction,
    items: &[Data],
    out: &mut Vec<u8>,
    options: &EncodeOptions,
    state: &mut EncodeState,
) -> Result<()> {
    out.push(b'[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        elem.run(item, out, options, state)?;
    }
    out.push(b']');
    Ok(())
}

/// Follows `path` from the outer struct's values to the field's data.
///
/// Returns `None` when an embedded pointer on the way is nil; the field is then
/// left out. The flag reports whether the field is addressable.
fn locate<'a>(
    owner: &Type,
    mut values: &'a [Data],
    path: &[Step],
    mut addressable: bool,
) -> Result<Option<(&'a Data, bool)>> {
    let missing = || Error::type_mismatch(owner.name(), "struct with too few fields");
    let Some((last, hops)) = path.split_last() else {
        return Err(missing());
    };
    for step in hops {
        let mut value = values.get(step.index).ok_or_else(missing)?;
        if step.through_ptr {
            match value {
                Data::Ptr(Some(target)) => {
                    value = &**target;
                    addressable = true;
                }
                Data::Ptr(None) => return Ok(None),
                other => return Err(mismatch(owner, other)),
            }
        }
        match value {
            Data::Struct(inner) => values = inner.as_slice(),
            other => return Err(mismatch(owner, other)),
        }
    }
    let value = values.get(last.index).ok_or_else(missing)?;
    Ok(Some((value, addressable)))
}

fn run_struct(
    ty: &Type,
    fields: &[FieldPlan],
    values: &[Data],
    out: &mut Vec<u8>,
    options: &EncodeOptions,
    state: &mut EncodeState,
) -> Result<()> {
    let escape = options.escape();
    let filtered = options.filters_fields();
    out.push(b'{');
    let mut first = true;
    for plan in fields {
        let field = &plan.field;
        if filtered && !options.field_allowed(&field.name) {
            continue;
        }
        let Some((value, addressable)) = locate(ty, values, &field.path, state.addressable)? else {
            continue;
        };
        if field.omit_nil {
            if value.is_nil() {
                continue;
            }
        } else if field.omit_empty && value.is_empty_value() {
            continue;
        }

        if !first {
            out.push(b',');
        }
        first = false;
        out.extend_from_slice(field.key(escape));

        let saved = state.addressable;
        state.addressable = addressable;
        let result = plan.instruction.run(value, out, options, state);
        state.addressable = saved;
        result?;
    }
    out.push(b'}');
    Ok(())
}

fn run_hook(ty: &Type, hook: &HookFn, data: &Data, out: &mut Vec<u8>, options: &EncodeOptions) -> Result<()> {
    if matches!(ty.kind(), Kind::Ptr(_)) && data.is_nil() {
        out.extend_from_slice(b"null");
        return Ok(());
    }
    let kind = hook.kind();
    let failed = |err| Error::extension(kind, ty.name(), err);
    match hook {
        HookFn::AppendContext(func) => BUFFERS.borrow_mut(|scratch| {
            func(data, scratch, options.context()).map_err(failed)?;
            splice(ty, kind, scratch, out, options)
        }),
        HookFn::Append(func) => BUFFERS.borrow_mut(|scratch| {
            func(data, scratch).map_err(failed)?;
            splice(ty, kind, scratch, out, options)
        }),
        HookFn::Json(func) => {
            let json = func(data).map_err(failed)?;
            splice(ty, kind, &json, out, options)
        }
        HookFn::Text(func) => {
            let text = func(data).map_err(failed)?;
            append_quoted(out, text.as_bytes(), options.escape());
            Ok(())
        }
    }
}

/// Appends hook output, validating and compacting it unless compaction is off.
fn splice(ty: &Type, kind: HookKind, json: &[u8], out: &mut Vec<u8>, options: &EncodeOptions) -> Result<()> {
    if !options.compact_raw {
        out.extend_from_slice(json);
        return Ok(());
    }
    compact(out, json, options.escape_html)
        .map_err(|msg| Error::extension(kind, ty.name(), format!("invalid JSON output: {}", msg).into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InstructionCache;
    use crate::types::{FieldDecl, Receiver};

    fn encode(ty: &Type, data: &Data, options: &EncodeOptions) -> Result<String> {
        let plan = InstructionCache::global().get(ty)?;
        let mut out = Vec::new();
        plan.encode(data, &mut out, options)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn text_of(data: &Data) -> std::result::Result<String, crate::error::BoxError> {
        match data {
            Data::Int(v) => Ok(format!("#{}", v)),
            _ => Err("not an int".into()),
        }
    }

    #[test]
    fn test_reference_hook_needs_addressable_value() {
        let id = Type::builder("Id", Kind::Int(crate::types::IntWidth::W64))
            .text_hook(Receiver::Reference, text_of)
            .build();
        let options = EncodeOptions::default();
        assert_eq!(encode(&id, &Data::Int(7), &options).unwrap(), "7");
        assert_eq!(encode(&Type::ptr(&id), &Data::ptr(7i64), &options).unwrap(), r##""#7""##);
        assert_eq!(
            encode(&Type::slice(&id), &Data::slice(vec![Data::Int(1)]), &options).unwrap(),
            r##"["#1"]"##
        );
        assert_eq!(encode(&Type::array(&id, 1), &Data::Array(vec![Data::Int(1)]), &options).unwrap(), "[1]");
    }

    #[test]
    fn test_value_hook_applies_everywhere() {
        let id = Type::builder("ValueId", Kind::Int(crate::types::IntWidth::W64))
            .text_hook(Receiver::Value, text_of)
            .build();
        let holder = Type::structure("Holder", vec![FieldDecl::new("Id", id.clone())]);
        let options = EncodeOptions::default();
        assert_eq!(encode(&id, &Data::Int(3), &options).unwrap(), r##""#3""##);
        assert_eq!(
            encode(&holder, &Data::Struct(vec![Data::Int(4)]), &options).unwrap(),
            r##"{"Id":"#4"}"##
        );
    }

    #[test]
    fn test_hook_output_is_compacted_and_checked() {
        let pretty = Type::builder("Pretty", Kind::Struct)
            .json_hook(Receiver::Value, |_| Ok(b"{ \"a\" : 1 }".to_vec()))
            .build_struct(vec![])
            .unwrap();
        let broken = Type::builder("Broken", Kind::Struct)
            .append_hook(Receiver::Value, |_, out| {
                out.extend_from_slice(b"{");
                Ok(())
            })
            .build_struct(vec![])
            .unwrap();
        let options = EncodeOptions::default();
        assert_eq!(encode(&pretty, &Data::Struct(vec![]), &options).unwrap(), r#"{"a":1}"#);
        assert!(matches!(
            encode(&broken, &Data::Struct(vec![]), &options),
            Err(Error::Extension { hook: HookKind::Append, .. })
        ));
        let verbatim = options.clone().with_raw_compaction(false);
        assert_eq!(encode(&pretty, &Data::Struct(vec![]), &verbatim).unwrap(), "{ \"a\" : 1 }");
    }

    #[test]
    fn test_mismatched_data() {
        let err = encode(&Type::bool(), &Data::Int(1), &EncodeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        let arr = Type::array(&Type::i64(), 2);
        assert!(encode(&arr, &Data::Array(vec![Data::Int(1)]), &EncodeOptions::default()).is_err());
    }

    #[test]
    fn test_quoted_plan() {
        let ty = Type::structure(
            "Quoted",
            vec![
                FieldDecl::new("N", Type::i64()).tag("n,string"),
                FieldDecl::new("S", Type::string()).tag("s,string"),
                FieldDecl::new("P", Type::ptr(&Type::bool())).tag("p,string"),
            ],
        );
        let data = Data::Struct(vec![Data::Int(5), Data::from("x"), Data::nil_ptr()]);
        assert_eq!(
            encode(&ty, &data, &EncodeOptions::default()).unwrap(),
            r#"{"n":"5","s":"\"x\"","p":null}"#
        );
    }
}
