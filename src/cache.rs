//! Memoized plan compilation.
//!
//! Each type is compiled at most once per cache. Compilations into one cache are
//! serialized: a session publishes a pending slot for every type it starts, and
//! callers on other threads that find a pending slot wait on it instead of
//! compiling. Inside a session, a nested reference to a type still being compiled
//! by that same session becomes a deferred plan that resolves the slot when it is
//! first invoked. Self-referential and mutually recursive type graphs therefore
//! terminate without deadlock, and a session never depends on another thread's
//! unfinished work.
//!
//! A session succeeds or fails as a whole. On failure every slot it published is
//! removed and the error is remembered for the types that caused it, so repeated
//! attempts fail fast until [`InstructionCache::forget_failure`].

use crate::compiler;
use crate::encode::{Instruction, Plan};
use crate::types::{Type, TypeId};
use crate::{Error, Result};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// One-shot gate holding the outcome of an in-flight compilation.
pub(crate) struct Slot {
    outcome: OnceCell<Result<Instruction>>,
    lock: Mutex<()>,
    ready: Condvar,
}

impl Slot {
    fn new() -> Self {
        Slot {
            outcome: OnceCell::new(),
            lock: Mutex::new(()),
            ready: Condvar::new(),
        }
    }

    fn fill(&self, outcome: Result<Instruction>) {
        let _guard = self.lock.lock();
        // a slot is filled exactly once, by the session that published it
        let _ = self.outcome.set(outcome);
        self.ready.notify_all();
    }

    /// Blocks until the slot is filled.
    pub(crate) fn wait(&self) -> Result<Instruction> {
        if let Some(outcome) = self.outcome.get() {
            return outcome.clone();
        }
        let mut guard = self.lock.lock();
        loop {
            if let Some(outcome) = self.outcome.get() {
                return outcome.clone();
            }
            self.ready.wait(&mut guard);
        }
    }
}

enum Entry {
    Ready(Instruction),
    Pending(Arc<Slot>),
}

struct Inner {
    entries: RwLock<HashMap<TypeId, Entry>>,
    // held for the whole of a session
    compiling: Mutex<()>,
    failures: RwLock<HashMap<TypeId, Error>>,
    compiles: AtomicUsize,
}

/// Cache of compiled plans keyed by type identity.
///
/// ```rust
/// use planjson::{Data, EncodeOptions, InstructionCache, Type};
///
/// let cache = InstructionCache::new();
/// let plan = cache.get(&Type::slice(&Type::i64())).unwrap();
/// let mut out = Vec::new();
/// plan.encode(&Data::slice(vec![Data::Int(1), Data::Int(2)]), &mut out, &EncodeOptions::default())
///     .unwrap();
/// assert_eq!(out, b"[1,2]");
/// assert_eq!(cache.compile_count(), 2);
/// ```
#[derive(Clone)]
pub struct InstructionCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InstructionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionCache")
            .field("plans", &self.len())
            .field("compiles", &self.compile_count())
            .finish()
    }
}

static GLOBAL: Lazy<InstructionCache> = Lazy::new(InstructionCache::new);

impl Default for InstructionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InstructionCache {
    /// Creates an empty cache. Most callers use [`InstructionCache::global`].
    pub fn new() -> Self {
        InstructionCache {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                compiling: Mutex::new(()),
                failures: RwLock::new(HashMap::new()),
                compiles: AtomicUsize::new(0),
            }),
        }
    }

    /// The process-wide cache used by the top-level entry points.
    pub fn global() -> &'static InstructionCache {
        &GLOBAL
    }

    /// Returns the plan for `ty`, compiling it on first use.
    ///
    /// If another thread is compiling `ty`, waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedType`] if `ty`, or a type it contains, has no
    /// JSON representation.
    pub fn get(&self, ty: &Type) -> Result<Instruction> {
        let pending = match self.inner.entries.read().get(&ty.id()) {
            Some(Entry::Ready(instruction)) => return Ok(instruction.clone()),
            Some(Entry::Pending(slot)) => Some(Arc::clone(slot)),
            None => None,
        };
        if let Some(slot) = pending {
            trace!(ty = %ty, "waiting for in-flight compilation");
            return slot.wait();
        }
        if let Some(err) = self.inner.failures.read().get(&ty.id()) {
            return Err(err.clone());
        }

        let compiling = self.inner.compiling.lock();
        let mut session = Session {
            cache: self,
            owned: Vec::new(),
            finished: HashMap::new(),
        };
        match session.lookup(ty) {
            Ok(Lookup::Compiled(instruction)) => {
                session.publish();
                Ok(instruction)
            }
            // finished by the session that held the lock before us
            Ok(Lookup::Existing(instruction)) => Ok(instruction),
            Ok(Lookup::InFlight(slot)) => {
                drop(compiling);
                slot.wait()
            }
            Err(err) => {
                session.abandon(&err);
                Err(err)
            }
        }
    }

    /// Number of finished plans.
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .read()
            .values()
            .filter(|e| matches!(e, Entry::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of type compilations performed so far, successful or not.
    pub fn compile_count(&self) -> usize {
        self.inner.compiles.load(Ordering::Relaxed)
    }

    /// Whether a failed compilation of `ty` is remembered.
    pub fn has_failed(&self, ty: &Type) -> bool {
        self.inner.failures.read().contains_key(&ty.id())
    }

    /// Forgets a remembered failure so the next lookup compiles `ty` again.
    pub fn forget_failure(&self, ty: &Type) -> bool {
        self.inner.failures.write().remove(&ty.id()).is_some()
    }

    pub(crate) fn downgrade(&self) -> CacheRef {
        CacheRef(Arc::downgrade(&self.inner))
    }
}

/// Weak handle from a plan back to the cache that compiled it.
#[derive(Clone)]
pub(crate) struct CacheRef(Weak<Inner>);

impl CacheRef {
    /// Looks `ty` up in the originating cache, or the global one if it is gone.
    pub(crate) fn get(&self, ty: &Type) -> Result<Instruction> {
        match self.0.upgrade() {
            Some(inner) => InstructionCache { inner }.get(ty),
            None => InstructionCache::global().get(ty),
        }
    }
}

pub(crate) enum Lookup {
    /// Compiled by this session.
    Compiled(Instruction),
    /// Already in the cache.
    Existing(Instruction),
    /// Being compiled by this session further up the stack.
    InFlight(Arc<Slot>),
}

/// Bookkeeping for one top-level compilation.
pub(crate) struct Session<'a> {
    cache: &'a InstructionCache,
    owned: Vec<(TypeId, Arc<Slot>)>,
    finished: HashMap<TypeId, Instruction>,
}

impl Session<'_> {
    pub(crate) fn cache_ref(&self) -> CacheRef {
        self.cache.downgrade()
    }

    /// Returns a plan for a type referenced while compiling another one.
    pub(crate) fn instruction(&mut self, ty: &Type) -> Result<Instruction> {
        match self.lookup(ty)? {
            Lookup::Compiled(instruction) | Lookup::Existing(instruction) => Ok(instruction),
            Lookup::InFlight(slot) => Ok(Instruction::new(
                ty,
                Plan::Deferred {
                    slot,
                    cache: self.cache_ref(),
                },
            )),
        }
    }

    fn lookup(&mut self, ty: &Type) -> Result<Lookup> {
        let id = ty.id();
        if let Some(instruction) = self.finished.get(&id) {
            return Ok(Lookup::Existing(instruction.clone()));
        }
        let inner = &self.cache.inner;
        {
            let mut entries = inner.entries.write();
            match entries.get(&id) {
                Some(Entry::Ready(instruction)) => return Ok(Lookup::Existing(instruction.clone())),
                Some(Entry::Pending(slot)) => return Ok(Lookup::InFlight(Arc::clone(slot))),
                None => {}
            }
            if let Some(err) = inner.failures.read().get(&id) {
                return Err(err.clone());
            }
            let slot = Arc::new(Slot::new());
            entries.insert(id, Entry::Pending(Arc::clone(&slot)));
            self.owned.push((id, slot));
        }

        inner.compiles.fetch_add(1, Ordering::Relaxed);
        debug!(ty = %ty, "compiling plan");
        match compiler::compile(ty, self) {
            Ok(instruction) => {
                self.finished.insert(id, instruction.clone());
                Ok(Lookup::Compiled(instruction))
            }
            Err(err) => {
                debug!(ty = %ty, error = %err, "compilation failed");
                inner.failures.write().insert(id, err.clone());
                Err(err)
            }
        }
    }

    /// Installs every plan this session compiled and opens their gates.
    fn publish(self) {
        let mut outcomes = Vec::with_capacity(self.owned.len());
        {
            let mut entries = self.cache.inner.entries.write();
            for (id, slot) in &self.owned {
                match self.finished.get(id) {
                    Some(instruction) => {
                        entries.insert(*id, Entry::Ready(instruction.clone()));
                        outcomes.push((slot, Ok(instruction.clone())));
                    }
                    // unreachable while every compile error aborts the session
                    None => {
                        entries.remove(id);
                        outcomes.push((slot, Err(Error::custom("compilation abandoned"))));
                    }
                }
            }
        }
        for (slot, outcome) in outcomes {
            slot.fill(outcome);
        }
        debug!(plans = self.finished.len(), "installed compiled plans");
    }

    /// Removes every slot this session published and fails waiters with `err`.
    fn abandon(self, err: &Error) {
        {
            let mut entries = self.cache.inner.entries.write();
            for (id, _) in &self.owned {
                entries.remove(id);
            }
        }
        for (_, slot) in &self.owned {
            slot.fill(Err(err.clone()));
        }
        trace!(slots = self.owned.len(), "removed pending slots after failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldDecl, Kind};
    use crate::value::Data;
    use crate::EncodeOptions;
    use std::sync::Barrier;
    use std::thread;

    fn linked_list() -> Type {
        let node = Type::declare_struct("Node");
        node.define_fields(vec![
            FieldDecl::new("Value", Type::i64()).tag("value"),
            FieldDecl::new("Next", Type::ptr(&node)).tag("next"),
        ])
        .unwrap();
        node
    }

    #[test]
    fn test_compiles_once() {
        let cache = InstructionCache::new();
        let ty = Type::slice(&Type::string());
        let a = cache.get(&ty).unwrap();
        let b = cache.get(&ty).unwrap();
        assert!(a.same_plan(&b));
        assert_eq!(cache.compile_count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_self_reference_terminates() {
        let cache = InstructionCache::new();
        let node = linked_list();
        let plan = cache.get(&node).unwrap();
        let data = Data::Struct(vec![
            Data::Int(1),
            Data::ptr(Data::Struct(vec![Data::Int(2), Data::nil_ptr()])),
        ]);
        let mut out = Vec::new();
        plan.encode(&data, &mut out, &EncodeOptions::default()).unwrap();
        assert_eq!(out, br#"{"value":1,"next":{"value":2,"next":null}}"#);
        assert_eq!(cache.compile_count(), 3);
    }

    #[test]
    fn test_mutual_recursion() {
        let cache = InstructionCache::new();
        let a = Type::declare_struct("A");
        let b = Type::structure("B", vec![FieldDecl::new("A", Type::slice(&a))]);
        a.define_fields(vec![FieldDecl::new("B", Type::ptr(&b))]).unwrap();
        assert!(cache.get(&a).is_ok());
        assert!(cache.get(&b).is_ok());
    }

    #[test]
    fn test_failure_is_remembered_and_not_poisoning() {
        let cache = InstructionCache::new();
        let func = Type::builder("Callback", Kind::Func).build();
        let holder = Type::structure("Holder", vec![FieldDecl::new("F", func.clone())]);

        assert!(cache.get(&Type::i64()).is_ok());
        assert!(cache.get(&holder).unwrap_err().is_compile_error());
        let attempts = cache.compile_count();
        assert!(cache.get(&holder).is_err());
        assert_eq!(cache.compile_count(), attempts);
        assert!(cache.has_failed(&func));
        assert!(cache.has_failed(&holder));
        assert_eq!(cache.len(), 1);

        assert!(cache.forget_failure(&holder));
        assert!(cache.get(&holder).is_err());
        assert_eq!(cache.compile_count(), attempts + 1);
    }

    #[test]
    fn test_concurrent_first_use() {
        let cache = InstructionCache::new();
        let node = linked_list();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let node = node.clone();
                thread::spawn(move || cache.get(&node).unwrap())
            })
            .collect();
        let plans: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(plans.windows(2).all(|w| w[0].same_plan(&w[1])));
        assert_eq!(cache.compile_count(), 3);
    }

    fn race<T: Send + 'static>(
        cache: &InstructionCache,
        types: Vec<Type>,
        f: fn(InstructionCache, Type) -> T,
    ) -> Vec<T> {
        let barrier = Arc::new(Barrier::new(types.len()));
        let handles: Vec<_> = types
            .into_iter()
            .map(|ty| {
                let cache = cache.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    f(cache, ty)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_mutual_recursion_across_threads() {
        for _ in 0..50 {
            let cache = InstructionCache::new();
            let x = Type::declare_struct("X");
            let y = Type::structure("Y", vec![FieldDecl::new("X", Type::ptr(&x))]);
            x.define_fields(vec![FieldDecl::new("Y", Type::ptr(&y))]).unwrap();

            let results = race(&cache, vec![x.clone(), y.clone()], |cache, ty| cache.get(&ty).is_ok());
            assert_eq!(results, vec![true, true]);
            assert_eq!(cache.compile_count(), 4);
            assert_eq!(cache.len(), 4);

            let data = Data::Struct(vec![Data::ptr(Data::Struct(vec![Data::nil_ptr()]))]);
            let mut out = Vec::new();
            cache.get(&x).unwrap().encode(&data, &mut out, &EncodeOptions::default()).unwrap();
            assert_eq!(out, br#"{"Y":{"X":null}}"#);
        }
    }

    #[test]
    fn test_failure_on_another_thread_is_never_published() {
        for _ in 0..50 {
            let cache = InstructionCache::new();
            let mut fields: Vec<FieldDecl> = (0..64)
                .map(|i| {
                    let inner = Type::structure(format!("S{}", i), vec![FieldDecl::new("V", Type::i64())]);
                    FieldDecl::new(format!("F{}", i), inner)
                })
                .collect();
            fields.push(FieldDecl::new("Bad", Type::builder("Callback", Kind::Func).build()));
            let y = Type::structure("Y", fields);
            let x = Type::structure("X", vec![FieldDecl::new("Y", y.clone())]);

            let results = race(&cache, vec![y.clone(), x.clone()], |cache, ty| {
                cache.get(&ty).map_err(|e| e.is_compile_error())
            });
            assert!(results.iter().all(|r| matches!(r, Err(true))));
            assert!(cache.has_failed(&x));
            assert!(cache.has_failed(&y));
            assert!(cache.get(&x).unwrap_err().is_compile_error());
            assert_eq!(cache.len(), 0);
        }
    }
}
