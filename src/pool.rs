//! Process-wide pools for scratch buffers, per-call state and map cursors.
//!
//! Pools are split into segments so concurrent callers usually contend on
//! different locks. A borrowed item is reset when it comes back, before anyone
//! else can see it.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

const NUM_SEGMENTS: usize = 16;

// buffers that grew past this are dropped instead of pooled
const MAX_POOLED_CAPACITY: usize = 1 << 20;

static THREAD_COUNTER: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static SEGMENT_INDEX: Cell<usize> =
        Cell::new(THREAD_COUNTER.fetch_add(1, Ordering::Relaxed) % NUM_SEGMENTS);
}

/// Logical reset performed when an item is returned to its pool.
pub trait Reset {
    fn reset(&mut self);

    /// Whether the item is worth keeping.
    fn reusable(&self) -> bool {
        true
    }
}

impl Reset for Vec<u8> {
    fn reset(&mut self) {
        self.clear();
    }

    fn reusable(&self) -> bool {
        self.capacity() <= MAX_POOLED_CAPACITY
    }
}

/// A segmented object pool.
pub struct Pool<T> {
    segments: [Mutex<Vec<T>>; NUM_SEGMENTS],
    factory: fn() -> T,
}

impl<T: Reset> Pool<T> {
    pub fn new(factory: fn() -> T) -> Self {
        Pool {
            segments: std::array::from_fn(|_| Mutex::new(Vec::new())),
            factory,
        }
    }

    /// Borrows an item for the duration of `handler`.
    ///
    /// The segment lock is not held while `handler` runs, so handlers may borrow
    /// from the same pool again.
    #[inline]
    pub fn borrow_mut<R>(&self, handler: impl FnOnce(&mut T) -> R) -> R {
        let segment = &self.segments[SEGMENT_INDEX.with(Cell::get)];
        let mut item = segment.lock().pop().unwrap_or_else(self.factory);
        let result = handler(&mut item);
        if item.reusable() {
            item.reset();
            segment.lock().push(item);
        }
        result
    }

    /// Number of idle items across all segments.
    #[cfg(test)]
    pub fn idle(&self) -> usize {
        self.segments.iter().map(|s| s.lock().len()).sum()
    }
}

// nesting beyond this is treated as a reference cycle
pub(crate) const MAX_DEPTH: usize = 128;

/// Mutable state for one top-level call.
#[derive(Debug, Default)]
pub struct EncodeState {
    /// A reference to the value being encoded can be formed.
    pub(crate) addressable: bool,
    depth: usize,
}

impl EncodeState {
    /// Enters one level of nesting.
    #[inline]
    pub(crate) fn enter(&mut self, type_name: &str) -> crate::Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(crate::Error::unsupported_value(format!(
                "nesting deeper than {} levels while encoding {}",
                MAX_DEPTH, type_name
            )));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn leave(&mut self) {
        self.depth -= 1;
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Reset for EncodeState {
    fn reset(&mut self) {
        self.addressable = false;
        self.depth = 0;
    }
}

/// Byte ranges of one rendered map entry inside a scratch buffer.
#[derive(Clone, Copy, Debug)]
pub(crate) struct EntryRange {
    pub key_start: usize,
    pub key_end: usize,
    pub pair_start: usize,
    pub pair_end: usize,
}

/// Records collected while iterating a map in sorted mode.
#[derive(Debug, Default)]
pub struct MapCursor {
    pub(crate) entries: Vec<EntryRange>,
}

impl Reset for MapCursor {
    fn reset(&mut self) {
        self.entries.clear();
    }

    fn reusable(&self) -> bool {
        self.entries.capacity() <= MAX_POOLED_CAPACITY / 32
    }
}

pub(crate) static BUFFERS: Lazy<Pool<Vec<u8>>> = Lazy::new(|| Pool::new(|| Vec::with_capacity(256)));
pub(crate) static STATES: Lazy<Pool<EncodeState>> = Lazy::new(|| Pool::new(EncodeState::default));
pub(crate) static CURSORS: Lazy<Pool<MapCursor>> = Lazy::new(|| Pool::new(MapCursor::default));

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_items_are_reset_on_return() {
        let pool: Pool<Vec<u8>> = Pool::new(Vec::new);
        pool.borrow_mut(|buf| buf.extend_from_slice(b"dirty"));
        pool.borrow_mut(|buf| assert!(buf.is_empty()));
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_nested_borrow() {
        let pool: Pool<Vec<u8>> = Pool::new(Vec::new);
        pool.borrow_mut(|outer| {
            outer.push(1);
            pool.borrow_mut(|inner| {
                assert!(inner.is_empty());
                inner.push(2);
            });
            assert_eq!(outer, &[1]);
        });
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_oversized_buffers_are_dropped() {
        let pool: Pool<Vec<u8>> = Pool::new(Vec::new);
        pool.borrow_mut(|buf| buf.reserve(MAX_POOLED_CAPACITY + 1));
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_concurrent_borrow() {
        let pool: Arc<Pool<Vec<u8>>> = Arc::new(Pool::new(Vec::new));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..100 {
                        pool.borrow_mut(|buf| {
                            assert!(buf.is_empty());
                            buf.push(i);
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.idle() <= 8);
    }

    #[test]
    fn test_depth_limit() {
        let mut state = EncodeState::default();
        for _ in 0..MAX_DEPTH {
            state.enter("T").unwrap();
        }
        assert!(state.enter("T").is_err());
        state.reset();
        assert_eq!(state.depth(), 0);
    }
}
