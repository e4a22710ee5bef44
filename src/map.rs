//! Map rendering.
//!
//! Keys become JSON strings. A string-kind key is used as is, even if its type
//! also carries a text hook; otherwise the key type's text hook renders it;
//! otherwise integer keys are printed in decimal and quoted. Any other key type
//! is rejected when the map's plan is compiled.
//!
//! By default entries are sorted by their rendered key bytes. Each pair is rendered
//! once into a pooled scratch buffer, its byte ranges are recorded, and the pairs
//! are copied out in key order.

use crate::cache::CacheRef;
use crate::encode::Instruction;
use crate::error::HookKind;
use crate::escape::{append_quoted, Escape};
use crate::number::{append_i64, append_u64};
use crate::options::EncodeOptions;
use crate::pool::{EncodeState, EntryRange, MapCursor, BUFFERS, CURSORS};
use crate::types::{Kind, TextFn, Type};
use crate::value::{Data, Dynamic};
use crate::{Error, Result};
use dashmap::DashMap;

/// How keys of one map type are rendered.
#[derive(Clone)]
pub(crate) enum KeyPlan {
    Str,
    Text(TextFn),
    Int,
    Uint,
}

impl KeyPlan {
    /// Picks the key rendering for `key`.
    pub(crate) fn for_type(key: &Type) -> Result<KeyPlan> {
        if matches!(key.kind(), Kind::String) {
            return Ok(KeyPlan::Str);
        }
        if let Some(hook) = &key.hooks().text {
            return Ok(KeyPlan::Text(hook.func.clone()));
        }
        match key.kind() {
            Kind::Int(_) => Ok(KeyPlan::Int),
            Kind::Uint(_) => Ok(KeyPlan::Uint),
            _ => Err(Error::unsupported_type(
                key.name(),
                "map keys must be strings, integers or have a text hook",
            )),
        }
    }

    fn write(&self, key_ty: &Type, key: &Data, out: &mut Vec<u8>, escape: Escape) -> Result<()> {
        match (self, key) {
            (KeyPlan::Str, Data::String(s)) => append_quoted(out, s, escape),
            (KeyPlan::Text(func), key) => {
                let text = func(key).map_err(|err| Error::extension(HookKind::Text, key_ty.name(), err))?;
                append_quoted(out, text.as_bytes(), escape);
            }
            (KeyPlan::Int, Data::Int(v)) => {
                out.push(b'"');
                append_i64(out, *v);
                out.push(b'"');
            }
            (KeyPlan::Uint, Data::Uint(v)) => {
                out.push(b'"');
                append_u64(out, *v);
                out.push(b'"');
            }
            (_, key) => return Err(Error::type_mismatch(key_ty.name(), key.variant_name())),
        }
        Ok(())
    }
}

pub(crate) struct MapPlan {
    key_ty: Type,
    key: KeyPlan,
    value: Instruction,
}

impl MapPlan {
    pub(crate) fn new(key_ty: &Type, value: Instruction) -> Result<Self> {
        Ok(MapPlan {
            key_ty: key_ty.clone(),
            key: KeyPlan::for_type(key_ty)?,
            value,
        })
    }
}

/// Destination for rendered pairs: straight into the output, or into a scratch
/// buffer for sorting.
enum Sink<'a> {
    Direct { out: &'a mut Vec<u8>, first: bool },
    Sorted { scratch: &'a mut Vec<u8>, cursor: &'a mut MapCursor },
}

impl Sink<'_> {
    /// Renders one `"key":value` pair. `render` returns the end of the key.
    fn pair(&mut self, render: impl FnOnce(&mut Vec<u8>) -> Result<usize>) -> Result<()> {
        match self {
            Sink::Direct { out, first } => {
                if !*first {
                    out.push(b',');
                }
                *first = false;
                render(out)?;
            }
            Sink::Sorted { scratch, cursor } => {
                let pair_start = scratch.len();
                let key_end = render(scratch)?;
                // ranges exclude the key's quotes
                cursor.entries.push(EntryRange {
                    key_start: pair_start + 1,
                    key_end: key_end - 1,
                    pair_start,
                    pair_end: scratch.len(),
                });
            }
        }
        Ok(())
    }
}

fn with_sink(
    sorted: bool,
    out: &mut Vec<u8>,
    body: impl FnOnce(&mut Sink<'_>) -> Result<()>,
) -> Result<()> {
    if !sorted {
        out.push(b'{');
        body(&mut Sink::Direct {
            out: &mut *out,
            first: true,
        })?;
        out.push(b'}');
        return Ok(());
    }
    BUFFERS.borrow_mut(|scratch| {
        CURSORS.borrow_mut(|cursor| {
            body(&mut Sink::Sorted {
                scratch: &mut *scratch,
                cursor: &mut *cursor,
            })?;
            let entries = &mut cursor.entries;
            entries.sort_by(|a, b| scratch[a.key_start..a.key_end].cmp(&scratch[b.key_start..b.key_end]));
            out.reserve(scratch.len() + entries.len() + 1);
            out.push(b'{');
            for (i, entry) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(&scratch[entry.pair_start..entry.pair_end]);
            }
            out.push(b'}');
            Ok(())
        })
    })
}

#[allow(clippy::too_many_arguments)]
fn render_pair(
    buf: &mut Vec<u8>,
    key_ty: &Type,
    key_plan: &KeyPlan,
    key: &Data,
    value_plan: &Instruction,
    value: &Data,
    options: &EncodeOptions,
    state: &mut EncodeState,
) -> Result<usize> {
    key_plan.write(key_ty, key, buf, options.escape())?;
    let key_end = buf.len();
    buf.push(b':');
    value_plan.run(value, buf, options, state)?;
    Ok(key_end)
}

pub(crate) fn encode_map(
    ty: &Type,
    plan: &MapPlan,
    data: &Data,
    out: &mut Vec<u8>,
    options: &EncodeOptions,
    state: &mut EncodeState,
) -> Result<()> {
    let entries = match data {
        Data::Map(None) => {
            out.extend_from_slice(if options.nil_map_as_empty { &b"{}"[..] } else { b"null" });
            return Ok(());
        }
        Data::Map(Some(entries)) => entries,
        other => return Err(Error::type_mismatch(ty.name(), other.variant_name())),
    };

    state.enter(ty.name())?;
    // map values are never addressable
    let saved = state.addressable;
    state.addressable = false;
    let sorted = options.sort_map_keys && entries.len() > 1;
    let result = with_sink(sorted, out, |sink| {
        for (key, value) in entries {
            sink.pair(|buf| render_pair(buf, &plan.key_ty, &plan.key, key, &plan.value, value, options, state))?;
        }
        Ok(())
    });
    state.addressable = saved;
    state.leave();
    result
}

/// Renders a concurrent map. Every entry carries its own types, so key and value
/// plans are looked up per entry.
pub(crate) fn encode_sync_map(
    ty: &Type,
    cache: &CacheRef,
    map: &DashMap<Dynamic, Dynamic>,
    out: &mut Vec<u8>,
    options: &EncodeOptions,
    state: &mut EncodeState,
) -> Result<()> {
    state.enter(ty.name())?;
    let saved = state.addressable;
    state.addressable = false;
    let result = with_sink(options.sort_map_keys, out, |sink| {
        for entry in map.iter() {
            let (key, value) = entry.pair();
            let key_plan = KeyPlan::for_type(&key.ty)?;
            let value_plan = cache.get(&value.ty)?;
            sink.pair(|buf| {
                render_pair(buf, &key.ty, &key_plan, &key.data, &value_plan, &value.data, options, state)
            })?;
        }
        Ok(())
    });
    state.addressable = saved;
    state.leave();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InstructionCache;
    use crate::types::Receiver;
    use std::sync::Arc;

    fn encode(ty: &Type, data: &Data, options: &EncodeOptions) -> Result<String> {
        let mut out = Vec::new();
        InstructionCache::global().get(ty)?.encode(data, &mut out, options)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn entries(pairs: &[(&str, i64)]) -> Data {
        Data::map(pairs.iter().map(|(k, v)| (Data::from(*k), Data::Int(*v))).collect())
    }

    #[test]
    fn test_sorted_by_key_bytes() {
        let ty = Type::map(&Type::string(), &Type::i64());
        let data = entries(&[("b", 2), ("a", 1), ("B", 0), ("ab", 3)]);
        assert_eq!(
            encode(&ty, &data, &EncodeOptions::default()).unwrap(),
            r#"{"B":0,"a":1,"ab":3,"b":2}"#
        );
    }

    #[test]
    fn test_unsorted_keeps_every_entry() {
        let ty = Type::map(&Type::string(), &Type::i64());
        let data = entries(&[("b", 2), ("a", 1)]);
        let options = EncodeOptions::default().with_map_sort(false);
        assert_eq!(encode(&ty, &data, &options).unwrap(), r#"{"b":2,"a":1}"#);
    }

    #[test]
    fn test_integer_keys_are_quoted() {
        let ty = Type::map(&Type::i32(), &Type::bool());
        let data = Data::map(vec![(Data::Int(10), Data::Bool(true)), (Data::Int(-2), Data::Bool(false))]);
        assert_eq!(
            encode(&ty, &data, &EncodeOptions::default()).unwrap(),
            r#"{"-2":false,"10":true}"#
        );
    }

    #[test]
    fn test_string_kind_beats_text_hook() {
        let key = Type::builder("Shouty", Kind::String)
            .text_hook(Receiver::Value, |_| Ok("ignored".to_string()))
            .build();
        let ty = Type::map(&key, &Type::i64());
        assert_eq!(encode(&ty, &entries(&[("k", 1)]), &EncodeOptions::default()).unwrap(), r#"{"k":1}"#);
    }

    #[test]
    fn test_reference_text_hook_applies_to_keys() {
        let key = Type::builder("Point", Kind::Uint(crate::types::IntWidth::W8))
            .text_hook(Receiver::Reference, |data| match data {
                Data::Uint(v) => Ok(format!("p{}", v)),
                _ => Err("bad key".into()),
            })
            .build();
        let ty = Type::map(&key, &Type::string());
        let data = Data::map(vec![(Data::Uint(2), Data::from("two")), (Data::Uint(1), Data::from("one"))]);
        assert_eq!(
            encode(&ty, &data, &EncodeOptions::default()).unwrap(),
            r#"{"p1":"one","p2":"two"}"#
        );
    }

    #[test]
    fn test_unsupported_key_type() {
        let ty = Type::map(&Type::f64(), &Type::i64());
        assert!(InstructionCache::global().get(&ty).unwrap_err().is_compile_error());
    }

    #[test]
    fn test_nil_and_empty_maps() {
        let ty = Type::map(&Type::string(), &Type::i64());
        let options = EncodeOptions::default();
        assert_eq!(encode(&ty, &Data::Map(None), &options).unwrap(), "null");
        assert_eq!(encode(&ty, &Data::map(vec![]), &options).unwrap(), "{}");
        let empty = options.with_nil_map_as_empty(true);
        assert_eq!(encode(&ty, &Data::Map(None), &empty).unwrap(), "{}");
    }

    #[test]
    fn test_sync_map_entries() {
        let map = DashMap::new();
        map.insert(Dynamic::new(Type::string(), "z"), Dynamic::new(Type::i64(), 26i64));
        map.insert(Dynamic::new(Type::i64(), 1i64), Dynamic::new(Type::string(), "one"));
        let data = Data::SyncMap(Arc::new(map));
        assert_eq!(
            encode(&Type::sync_map(), &data, &EncodeOptions::default()).unwrap(),
            r#"{"1":"one","z":26}"#
        );
    }

    #[test]
    fn test_nested_maps_sort_independently() {
        let inner = Type::map(&Type::string(), &Type::i64());
        let outer = Type::map(&Type::string(), &inner);
        let data = Data::map(vec![
            (Data::from("y"), entries(&[("d", 4), ("c", 3)])),
            (Data::from("x"), entries(&[("b", 2), ("a", 1)])),
        ]);
        assert_eq!(
            encode(&outer, &data, &EncodeOptions::default()).unwrap(),
            r#"{"x":{"a":1,"b":2},"y":{"c":3,"d":4}}"#
        );
    }
}
