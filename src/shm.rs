//! Anonymous shared memory: the thin allocator collaborator the accept lock is built on.
//!
//! A region is mapped `MAP_SHARED | MAP_ANONYMOUS` before `fork()`; the mapping (and therefore
//! every value placed in it) stays valid and shared in every child after `fork()` without any
//! further IPC — this is the standard trick prefork servers use to share a handful of words of
//! state across otherwise-unrelated processes.

use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};

use crate::error::Error;

/// A `T` placed in an anonymous shared-memory mapping, visible identically from every process
/// that inherited the mapping via `fork()`.
///
/// `T` must be safe to share across processes with no notion of an owning thread/pid baked into
/// its representation — plain atomics are the intended payload, not anything lock-like that
/// records ownership (a `std::sync::Mutex` would not be safe to put here).
pub struct SharedRegion<T> {
    ptr: NonNull<T>,
}

// SAFETY: the whole point of this type is cross-process sharing of a plain-old-data value;
// within a single process it behaves like an `Arc<T>` over memory nobody else in-process holds
// a conflicting reference to.
unsafe impl<T: Sync> Sync for SharedRegion<T> {}
unsafe impl<T: Send> Send for SharedRegion<T> {}

impl<T> SharedRegion<T> {
    /// Map a new shared region and move `init` into it.
    pub fn new(init: T) -> Result<Self, Error> {
        let len = NonZeroUsize::new(std::mem::size_of::<T>().max(1))
            .expect("size_of::<T>() clamped to at least 1");
        // SAFETY: anonymous mapping, no file descriptor involved.
        let ptr = unsafe {
            mmap_anonymous(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )
        }
        .map_err(Error::SharedMemory)?;
        let ptr = ptr.cast::<T>();
        // SAFETY: freshly mapped, appropriately aligned (mmap returns page-aligned memory, and
        // no `T` we place here needs more than page alignment), and nothing else has a
        // reference into it yet.
        unsafe { ptr.as_ptr().write(init) };
        Ok(SharedRegion { ptr })
    }

    /// Borrow the shared value. Any synchronization between processes is `T`'s job (e.g. via
    /// atomics), not this wrapper's.
    pub fn get(&self) -> &T {
        // SAFETY: the mapping outlives every process that can observe this reference (it is
        // unmapped only by the master's `Drop`, and workers never drop their copy on a clean
        // shutdown path — see module docs on `std::process::exit` bypassing destructors).
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> Drop for SharedRegion<T> {
    fn drop(&mut self) {
        let len = std::mem::size_of::<T>().max(1);
        // SAFETY: `ptr` was produced by `mmap_anonymous` with this exact length in `new`.
        unsafe {
            let _ = munmap(self.ptr.cast(), len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn round_trips_a_value() {
        let region = SharedRegion::new(AtomicU32::new(7)).unwrap();
        assert_eq!(region.get().load(Ordering::SeqCst), 7);
        region.get().store(9, Ordering::SeqCst);
        assert_eq!(region.get().load(Ordering::SeqCst), 9);
    }

    #[test]
    fn visible_across_threads_like_it_would_across_processes() {
        let region = std::sync::Arc::new(SharedRegion::new(AtomicU32::new(0)).unwrap());
        let other = region.clone();
        let handle = std::thread::spawn(move || {
            other.get().store(42, Ordering::SeqCst);
        });
        handle.join().unwrap();
        assert_eq!(region.get().load(Ordering::SeqCst), 42);
    }
}
