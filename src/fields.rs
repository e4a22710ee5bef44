//! Struct field resolution.
//!
//! Embedded structs promote their fields into the embedding struct. When several
//! fields end up with the same key, the shallowest wins; at equal depth a
//! tag-named field beats an untagged one; anything still tied is dropped
//! altogether. Resolution runs once per struct type and the result is cached.
//!
//! ```rust
//! use planjson::{FieldDecl, Type};
//! use planjson::fields::resolve;
//!
//! let inner = Type::structure("Inner", vec![FieldDecl::new("S", Type::string())]);
//! let outer = Type::structure("Outer", vec![
//!     FieldDecl::embedded(inner),
//!     FieldDecl::new("N", Type::i64()).tag("n"),
//! ]);
//! let names: Vec<_> = resolve(&outer).unwrap().iter().map(|f| f.name.clone()).collect();
//! assert_eq!(names, ["S", "n"]);
//! ```

use crate::escape::{append_quoted, Escape};
use crate::types::{Kind, Type, TypeId};
use crate::{Error, Result};
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One hop from a struct to one of its declared fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step {
    /// Declaration index within the containing struct.
    pub index: usize,
    /// The field is a pointer that must be followed to reach the next struct.
    pub through_ptr: bool,
}

/// A field that survived promotion.
#[derive(Clone, Debug)]
pub struct Field {
    /// The JSON key.
    pub name: String,
    /// Path from the outermost struct to the field, one step per nesting level.
    pub path: Vec<Step>,
    pub ty: Type,
    /// The key came from the tag rather than the field name.
    pub tagged: bool,
    pub omit_empty: bool,
    pub omit_nil: bool,
    /// The `string` option applies to this field's type.
    pub quoted: bool,
    key_html: Box<[u8]>,
    key_plain: Box<[u8]>,
    key_raw: Box<[u8]>,
}

impl Field {
    /// The `"key":` prefix rendered for the given escaping mode.
    #[inline]
    pub fn key(&self, escape: Escape) -> &[u8] {
        if escape.disabled {
            &self.key_raw
        } else if escape.html {
            &self.key_html
        } else {
            &self.key_plain
        }
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

/// A parsed field tag.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tag<'a> {
    pub name: &'a str,
    pub omit_empty: bool,
    pub omit_nil: bool,
    pub quoted: bool,
}

/// Parses `name[,opt,...]`. Returns `None` for `-`, which excludes the field.
///
/// ```rust
/// use planjson::fields::parse_tag;
///
/// assert!(parse_tag("-").is_none());
/// assert_eq!(parse_tag("-,").unwrap().name, "-");
/// let tag = parse_tag("id,omitempty,string").unwrap();
/// assert!(tag.omit_empty && tag.quoted && !tag.omit_nil);
/// ```
pub fn parse_tag(tag: &str) -> Option<Tag<'_>> {
    if tag == "-" {
        return None;
    }
    let mut parts = tag.split(',');
    let mut parsed = Tag {
        name: parts.next().unwrap_or(""),
        ..Tag::default()
    };
    for opt in parts {
        match opt {
            "omitempty" => parsed.omit_empty = true,
            "omitnil" => parsed.omit_nil = true,
            "string" => parsed.quoted = true,
            _ => {}
        }
    }
    Some(parsed)
}

/// Whether `name` may be used as a key: letters, ASCII digits and a fixed set of
/// punctuation. Other names fall back to the field name.
pub fn is_valid_tag_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| is_letter(c) || c.is_ascii_digit() || TAG_PUNCTUATION.contains(c))
}

const TAG_PUNCTUATION: &str = "!#$%&()*+-./:;<=>?@[]^_{|}~ ";

// letter numbers such as `Ⅻ` are alphabetic too
fn is_letter(c: char) -> bool {
    c.is_alphabetic() && !c.is_numeric()
}

fn quotable(ty: &Type) -> bool {
    matches!(
        ty.deref().kind(),
        Kind::Bool | Kind::Int(_) | Kind::Uint(_) | Kind::F32 | Kind::F64 | Kind::String | Kind::Number
    )
}

fn render_key(name: &str, escape: Escape) -> Box<[u8]> {
    let mut key = Vec::with_capacity(name.len() + 3);
    append_quoted(&mut key, name.as_bytes(), escape);
    key.push(b':');
    key.into_boxed_slice()
}

fn new_field(name: String, path: Vec<Step>, ty: Type, tagged: bool, tag: &Tag<'_>) -> Field {
    let quoted = tag.quoted && quotable(&ty);
    let key_html = render_key(&name, Escape::default());
    let key_plain = render_key(
        &name,
        Escape {
            html: false,
            ..Escape::default()
        },
    );
    let key_raw = render_key(
        &name,
        Escape {
            disabled: true,
            ..Escape::default()
        },
    );
    Field {
        name,
        path,
        ty,
        tagged,
        omit_empty: tag.omit_empty,
        omit_nil: tag.omit_nil,
        quoted,
        key_html,
        key_plain,
        key_raw,
    }
}

struct Pending {
    ty: Type,
    path: Vec<Step>,
}

fn compare_paths(a: &[Step], b: &[Step]) -> Ordering {
    a.iter().map(|s| s.index).cmp(b.iter().map(|s| s.index))
}

/// Walks embedding levels breadth-first and applies the dominance rules.
fn compute(ty: &Type) -> Result<Vec<Field>> {
    let mut fields: Vec<Field> = Vec::new();
    let mut next = vec![Pending {
        ty: ty.clone(),
        path: Vec::new(),
    }];
    let mut next_count: HashMap<TypeId, usize> = HashMap::new();
    let mut visited: HashSet<TypeId> = HashSet::new();

    while !next.is_empty() {
        let current = std::mem::take(&mut next);
        let count = std::mem::take(&mut next_count);

        for pending in current {
            if !visited.insert(pending.ty.id()) {
                continue;
            }
            let decls = pending.ty.fields().ok_or_else(|| {
                Error::unsupported_type(pending.ty.name(), "struct fields are not defined")
            })?;

            for (index, decl) in decls.iter().enumerate() {
                let target = decl.ty.deref();
                if decl.embedded {
                    if !decl.exported && !matches!(target.kind(), Kind::Struct) {
                        continue;
                    }
                } else if !decl.exported {
                    continue;
                }

                let tag = match decl.tag.as_deref() {
                    Some(text) => match parse_tag(text) {
                        Some(tag) => tag,
                        None => continue,
                    },
                    None => Tag::default(),
                };
                let tag_name = if is_valid_tag_name(tag.name) { tag.name } else { "" };

                let mut path = pending.path.clone();
                path.push(Step {
                    index,
                    through_ptr: decl.ty.is_ptr(),
                });

                if !tag_name.is_empty() || !decl.embedded || !matches!(target.kind(), Kind::Struct) {
                    let tagged = !tag_name.is_empty();
                    let name = if tagged { tag_name.to_string() } else { decl.name.clone() };
                    fields.push(new_field(name, path, decl.ty.clone(), tagged, &tag));
                    // a second copy is enough for the ambiguity rule to drop the name
                    if count.get(&pending.ty.id()).copied().unwrap_or(0) > 1 {
                        let dup = fields[fields.len() - 1].clone();
                        fields.push(dup);
                    }
                    continue;
                }

                let seen = next_count.entry(target.id()).or_insert(0);
                *seen += 1;
                if *seen == 1 {
                    next.push(Pending {
                        ty: target.clone(),
                        path,
                    });
                }
            }
        }
    }

    fields.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then(a.depth().cmp(&b.depth()))
            .then(b.tagged.cmp(&a.tagged))
            .then_with(|| compare_paths(&a.path, &b.path))
    });

    let mut survivors = Vec::with_capacity(fields.len());
    let mut rest = fields.as_slice();
    while let Some(first) = rest.first() {
        let run = rest.iter().take_while(|f| f.name == first.name).count();
        let cluster = &rest[..run];
        let ambiguous =
            run > 1 && cluster[0].depth() == cluster[1].depth() && cluster[0].tagged == cluster[1].tagged;
        if !ambiguous {
            survivors.push(cluster[0].clone());
        }
        rest = &rest[run..];
    }

    survivors.sort_by(|a, b| compare_paths(&a.path, &b.path));
    Ok(survivors)
}

type FieldList = Arc<[Field]>;

static FIELD_CACHE: Lazy<DashMap<TypeId, Arc<OnceCell<FieldList>>>> = Lazy::new(DashMap::new);

/// Returns the encodable fields of a struct type in declaration order.
///
/// # Errors
///
/// Returns [`Error::UnsupportedType`] if a struct reached through embedding has
/// no field definitions yet. Failures are not cached.
pub fn resolve(ty: &Type) -> Result<FieldList> {
    let cell = FIELD_CACHE.entry(ty.id()).or_default().clone();
    cell.get_or_try_init(|| compute(ty).map(Arc::from)).cloned()
}
