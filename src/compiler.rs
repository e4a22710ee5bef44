//! Plan selection.
//!
//! For a given type the first matching rule wins:
//!
//! 1. built-in special kinds (time, duration, number literal, raw payload, big
//!    integer, concurrent map), so a hook on such a type never shadows them;
//! 2. extension hooks, in the order append-with-context, append, json, text;
//! 3. primitive kinds;
//! 4. composite kinds: arrays, slices, structs, maps, pointers, dynamic slots;
//! 5. everything else is unsupported.
//!
//! A hook declared for references only gets a second plan built without it,
//! used wherever the value is not addressable. If that plan cannot be built, the
//! type fails to compile.

use crate::cache::Session;
use crate::encode::{FieldPlan, HookFn, Instruction, Plan};
use crate::fields;
use crate::map::MapPlan;
use crate::number::FloatBits;
use crate::types::{Hooks, IntWidth, Kind, Receiver, Type};
use crate::{Error, Result};
use tracing::trace;

pub(crate) fn compile(ty: &Type, session: &mut Session<'_>) -> Result<Instruction> {
    compile_with(ty, session, true)
}

fn compile_with(ty: &Type, session: &mut Session<'_>, reference_hooks: bool) -> Result<Instruction> {
    if is_special(ty.kind()) {
        return kind_plan(ty, session).map(|plan| Instruction::new(ty, plan));
    }

    if let Some((hook, receiver)) = select_hook(ty.hooks(), reference_hooks) {
        trace!(ty = %ty, hook = %hook.kind(), ?receiver, "using extension hook");
        let fallback = match receiver {
            Receiver::Value => None,
            Receiver::Reference => Some(compile_with(ty, session, false)?),
        };
        return Ok(Instruction::new(ty, Plan::Hook { hook, fallback }));
    }

    kind_plan(ty, session).map(|plan| Instruction::new(ty, plan))
}

fn is_special(kind: &Kind) -> bool {
    matches!(
        kind,
        Kind::Time | Kind::Duration | Kind::Number | Kind::RawMessage | Kind::BigInt | Kind::SyncMap
    )
}

fn select_hook(hooks: &Hooks, reference_hooks: bool) -> Option<(HookFn, Receiver)> {
    if let Some(h) = hooks.append_context.as_ref().filter(|h| h.applies(reference_hooks)) {
        return Some((HookFn::AppendContext(h.func.clone()), h.receiver));
    }
    if let Some(h) = hooks.append.as_ref().filter(|h| h.applies(reference_hooks)) {
        return Some((HookFn::Append(h.func.clone()), h.receiver));
    }
    if let Some(h) = hooks.json.as_ref().filter(|h| h.applies(reference_hooks)) {
        return Some((HookFn::Json(h.func.clone()), h.receiver));
    }
    if let Some(h) = hooks.text.as_ref().filter(|h| h.applies(reference_hooks)) {
        return Some((HookFn::Text(h.func.clone()), h.receiver));
    }
    None
}

/// `u8` elements without hooks turn slices and arrays into byte sequences.
fn is_plain_byte(elem: &Type) -> bool {
    matches!(elem.kind(), Kind::Uint(IntWidth::W8)) && elem.hooks().is_empty()
}

fn kind_plan(ty: &Type, session: &mut Session<'_>) -> Result<Plan> {
    let plan = match ty.kind() {
        Kind::Time => Plan::Time,
        Kind::Duration => Plan::Duration,
        Kind::Number => Plan::Number,
        Kind::RawMessage => Plan::Raw,
        Kind::BigInt => Plan::BigInt,
        Kind::SyncMap => Plan::SyncMap(session.cache_ref()),
        Kind::Bool => Plan::Bool,
        Kind::Int(_) => Plan::Int,
        Kind::Uint(_) => Plan::Uint,
        Kind::F32 => Plan::Float(FloatBits::F32),
        Kind::F64 => Plan::Float(FloatBits::F64),
        Kind::String => Plan::Str,
        Kind::Slice(elem) if is_plain_byte(elem) => Plan::ByteSlice,
        Kind::Slice(elem) => Plan::Slice(session.instruction(elem)?),
        Kind::Array { elem, len } if is_plain_byte(elem) => Plan::ByteArray(*len),
        Kind::Array { elem, len } => Plan::Array {
            elem: session.instruction(elem)?,
            len: *len,
        },
        Kind::Struct => struct_plan(ty, session)?,
        Kind::Map { key, value } => Plan::Map(MapPlan::new(key, session.instruction(value)?)?),
        Kind::Ptr(elem) => Plan::Ptr(session.instruction(elem)?),
        Kind::Any => Plan::Dynamic(session.cache_ref()),
        Kind::Chan => return Err(Error::unsupported_type(ty.name(), "channels cannot be encoded")),
        Kind::Func => return Err(Error::unsupported_type(ty.name(), "functions cannot be encoded")),
        Kind::Complex64 | Kind::Complex128 => {
            return Err(Error::unsupported_type(ty.name(), "complex numbers cannot be encoded"))
        }
    };
    Ok(plan)
}

fn struct_plan(ty: &Type, session: &mut Session<'_>) -> Result<Plan> {
    let resolved = fields::resolve(ty)?;
    let mut plans = Vec::with_capacity(resolved.len());
    for field in resolved.iter() {
        let mut instruction = session.instruction(&field.ty)?;
        // hooks render themselves; the `string` option only affects kind-based plans
        if field.quoted && field.ty.deref().hooks().is_empty() {
            instruction = Instruction::new(&field.ty, Plan::Quoted(instruction));
        }
        plans.push(FieldPlan {
            field: field.clone(),
            instruction,
        });
    }
    Ok(Plan::Struct(plans))
}

#[cfg(test)]
mod tests {
    use crate::cache::InstructionCache;
    use crate::types::{FieldDecl, Kind, Receiver, Type};
    use crate::value::Data;
    use crate::EncodeOptions;

    fn encode(ty: &Type, data: &Data) -> crate::Result<String> {
        let mut out = Vec::new();
        InstructionCache::global()
            .get(ty)?
            .encode(data, &mut out, &EncodeOptions::default())?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_hook_precedence() {
        let ty = Type::builder("Both", Kind::Bool)
            .text_hook(Receiver::Value, |_| Ok("text".to_string()))
            .json_hook(Receiver::Value, |_| Ok(b"\"json\"".to_vec()))
            .build();
        assert_eq!(encode(&ty, &Data::Bool(true)).unwrap(), r#""json""#);
    }

    #[test]
    fn test_special_kind_ignores_hooks() {
        let ty = Type::builder("Timeout", Kind::Duration)
            .json_hook(Receiver::Value, |_| Ok(b"\"hooked\"".to_vec()))
            .build();
        assert_eq!(encode(&ty, &Data::Duration(1_500_000_000)).unwrap(), r#""1.5s""#);
    }

    #[test]
    fn test_byte_sequences() {
        let bytes = Type::slice(&Type::u8());
        assert_eq!(encode(&bytes, &Data::bytes(b"hi".to_vec())).unwrap(), r#""aGk=""#);
        let array = Type::array(&Type::u8(), 2);
        assert_eq!(encode(&array, &Data::bytes(vec![1, 2])).unwrap(), "[1,2]");
        let list = Type::slice(&Type::u16());
        assert_eq!(encode(&list, &Data::slice(vec![Data::Uint(1)])).unwrap(), "[1]");
    }

    #[test]
    fn test_unsupported_kinds() {
        for kind in [Kind::Chan, Kind::Func, Kind::Complex64, Kind::Complex128] {
            let ty = Type::builder("Odd", kind).build();
            assert!(InstructionCache::global().get(&ty).unwrap_err().is_compile_error());
        }
    }

    #[test]
    fn test_dynamic_dispatch() {
        let ty = Type::slice(&Type::any());
        let data = Data::slice(vec![
            Data::any(Type::i64(), 1i64),
            Data::any(Type::string(), "s"),
            Data::nil_any(),
            Data::any(Type::slice(&Type::bool()), vec![Data::Bool(true)]),
        ]);
        assert_eq!(encode(&ty, &data).unwrap(), r#"[1,"s",null,[true]]"#);
    }

    #[test]
    fn test_reference_hook_requires_encodable_kind() {
        let by_ref = Type::builder("Callback", Kind::Func)
            .text_hook(Receiver::Reference, |_| Ok("f".to_string()))
            .build();
        assert!(InstructionCache::global().get(&by_ref).unwrap_err().is_compile_error());
        let by_value = Type::builder("Callback", Kind::Func)
            .text_hook(Receiver::Value, |_| Ok("f".to_string()))
            .build();
        assert_eq!(encode(&by_value, &Data::Bool(false)).unwrap(), r#""f""#);
    }

    #[test]
    fn test_quoted_field_on_hooked_type_is_ignored() {
        let hooked = Type::builder("Hooked", Kind::Int(crate::types::IntWidth::W64))
            .text_hook(Receiver::Value, |_| Ok("h".to_string()))
            .build();
        let ty = Type::structure("S", vec![FieldDecl::new("H", hooked).tag("h,string")]);
        assert_eq!(encode(&ty, &Data::Struct(vec![Data::Int(1)])).unwrap(), r#"{"h":"h"}"#);
    }
}
