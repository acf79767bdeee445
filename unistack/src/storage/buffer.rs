//! The pool of network buffers shared by the NIC and the protocol layers.
//!
//! All memory is reserved when the store is constructed, split into `pools` slabs of
//! `buffer_count` buffers of `buffer_size` bytes each. Afterwards the store never allocates. The
//! free list of each slab is a bounded lock-free queue of buffer indices, so `get_buffer` and
//! `release` may run concurrently from the receive interrupt and the processing context without
//! any blocking lock.
use core::{cell, fmt, ops, ptr, slice};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crossbeam_queue::ArrayQueue;

/// Failures of the buffer store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// No buffer is available in any of the slabs.
    ///
    /// Expected under load. The caller drops the frame it wanted to store.
    PoolExhausted,

    /// The pointer does not start a buffer of this store.
    Foreign,

    /// The buffer was not lent out when it was released.
    DoubleRelease,
}

/// What to do when a handle finds that its buffer can not be released.
///
/// Both failure kinds indicate a broken invariant in the caller, not a runtime condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReleasePolicy {
    /// Abort loudly.
    Panic,
    /// Log the violation and continue.
    Ignore,
}

/// Dimensions of a buffer store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Config {
    /// Size of each buffer in bytes. This is also the stride between buffers.
    pub buffer_size: usize,
    /// Number of buffers per slab.
    pub buffer_count: usize,
    /// Number of chained slabs.
    pub pools: usize,
    /// Handling of invalid releases through `Buffer` handles.
    pub release_policy: ReleasePolicy,
}

/// A fixed-capacity pool of equally-sized network buffers.
pub struct BufferStore {
    slabs: Box<[Slab]>,
    buffer_size: usize,
    release_policy: ReleasePolicy,
    exhausted: AtomicUsize,
}

struct Slab {
    /// The entirety of the memory of this slab.
    ///
    /// Inside an `UnsafeCell` since we loan out parts of it via a shared reference.
    memory: Box<cell::UnsafeCell<[u8]>>,

    /// The indices of all buffers not currently lent.
    free: ArrayQueue<usize>,

    /// Per buffer, whether it is currently lent.
    lent: Box<[AtomicBool]>,
}

/// An owned handle to one lent buffer.
///
/// Returns the buffer to its store when dropped.
pub struct Buffer {
    store: Arc<BufferStore>,
    ptr: NonNull<u8>,
}

// The memory regions handed out are disjoint and each is accessed only by the holder of the
// corresponding lent flag.
unsafe impl Sync for BufferStore {}
unsafe impl Send for BufferStore {}

// A `Buffer` is the exclusive owner of its region.
unsafe impl Send for Buffer {}

impl Default for ReleasePolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            ReleasePolicy::Panic
        } else {
            ReleasePolicy::Ignore
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            buffer_size: 2048,
            buffer_count: 256,
            pools: 1,
            release_policy: ReleasePolicy::default(),
        }
    }
}

impl BufferStore {
    /// Reserve all memory for the store.
    ///
    /// # Panics
    /// This function panics if any of the dimensions is zero.
    pub fn new(config: Config) -> Self {
        assert!(config.buffer_size > 0, "Buffers must not be empty");
        assert!(config.buffer_count > 0, "A slab must hold at least one buffer");
        assert!(config.pools > 0, "A store needs at least one slab");

        let slabs = (0..config.pools)
            .map(|_| Slab::new(config.buffer_size, config.buffer_count))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        BufferStore {
            slabs,
            buffer_size: config.buffer_size,
            release_policy: config.release_policy,
            exhausted: AtomicUsize::new(0),
        }
    }

    /// Take a free buffer out of the store.
    ///
    /// Slabs are tried in order so the store behaves like one pool chained to the next.
    pub fn get_buffer(&self) -> Result<NonNull<u8>, Error> {
        for slab in self.slabs.iter() {
            if let Some(idx) = slab.free.pop() {
                let was_lent = slab.lent[idx].swap(true, Ordering::AcqRel);
                debug_assert!(!was_lent, "Free list contained a lent buffer");
                return Ok(slab.buffer_ptr(idx, self.buffer_size));
            }
        }

        self.exhausted.fetch_add(1, Ordering::Relaxed);
        net_trace!("buffer store exhausted ({} buffers lent)", self.total_buffers());
        Err(Error::PoolExhausted)
    }

    /// Lend a buffer wrapped in an owning handle.
    pub fn lend(this: &Arc<Self>) -> Result<Buffer, Error> {
        let ptr = this.get_buffer()?;
        Ok(Buffer {
            store: Arc::clone(this),
            ptr,
        })
    }

    /// Return a buffer previously obtained from `get_buffer`.
    ///
    /// The pointer must lie within one slab and on a buffer boundary, and the buffer must be
    /// currently lent. Otherwise nothing is modified and an error is returned.
    pub fn release(&self, ptr: NonNull<u8>) -> Result<(), Error> {
        let addr = ptr.as_ptr() as usize;
        let (slab, offset) = self.slabs.iter()
            .find_map(|slab| slab.offset_of(addr).map(|offset| (slab, offset)))
            .ok_or(Error::Foreign)?;

        if offset % self.buffer_size != 0 {
            return Err(Error::Foreign);
        }

        let idx = offset / self.buffer_size;
        slab.lent[idx]
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::DoubleRelease)?;

        // Every index is in the queue at most once and the queue holds all of them.
        slab.free.push(idx).map_err(|_| Error::DoubleRelease)
    }

    /// The number of buffers currently free.
    pub fn available(&self) -> usize {
        self.slabs.iter().map(|slab| slab.free.len()).sum()
    }

    /// The number of buffers in all slabs together.
    pub fn total_buffers(&self) -> usize {
        self.slabs.iter().map(|slab| slab.lent.len()).sum()
    }

    /// The number of buffers currently lent out.
    pub fn lent(&self) -> usize {
        self.total_buffers() - self.available()
    }

    /// The size of every buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// The number of chained slabs.
    pub fn pools(&self) -> usize {
        self.slabs.len()
    }

    /// How often `get_buffer` failed since construction.
    pub fn exhausted(&self) -> usize {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Whether a pointer starts one of this store's buffers.
    pub fn is_from_store(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        self.slabs.iter()
            .filter_map(|slab| slab.offset_of(addr))
            .any(|offset| offset % self.buffer_size == 0)
    }

    fn release_handle(&self, ptr: NonNull<u8>) {
        if let Err(err) = self.release(ptr) {
            match self.release_policy {
                ReleasePolicy::Panic => panic!("invalid buffer release {:?} of {:p}", err, ptr),
                ReleasePolicy::Ignore => net_warn!("ignoring invalid buffer release {:?}", err),
            }
        }
    }
}

impl Slab {
    fn new(buffer_size: usize, buffer_count: usize) -> Self {
        let total_len = buffer_size.checked_mul(buffer_count)
            .expect("Slab size overflows the address space");
        let slice = alloc::vec![0; total_len].into_boxed_slice();
        let memory = unsafe {
            Box::from_raw(Box::into_raw(slice) as *mut cell::UnsafeCell<[u8]>)
        };

        let free = ArrayQueue::new(buffer_count);
        for idx in 0..buffer_count {
            // The queue has exactly enough capacity.
            let _ = free.push(idx);
        }

        let lent = (0..buffer_count)
            .map(|_| AtomicBool::new(false))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Slab { memory, free, lent }
    }

    fn mem_ptr(&self) -> *mut u8 {
        cell::UnsafeCell::get(&*self.memory) as *mut u8
    }

    fn len(&self) -> usize {
        // The slice metadata survives the cast through `UnsafeCell`.
        unsafe { (&*self.memory.get()).len() }
    }

    fn buffer_ptr(&self, idx: usize, buffer_size: usize) -> NonNull<u8> {
        debug_assert!(idx < self.lent.len());
        let ptr = unsafe { self.mem_ptr().add(idx * buffer_size) };
        // Derived from a non-null allocation.
        unsafe { NonNull::new_unchecked(ptr) }
    }

    /// The byte offset of `addr` within this slab, if it falls inside.
    fn offset_of(&self, addr: usize) -> Option<usize> {
        let base = self.mem_ptr() as usize;
        if addr >= base && addr < base + self.len() {
            Some(addr - base)
        } else {
            None
        }
    }
}

impl Buffer {
    /// The store this buffer will return to.
    pub fn store(&self) -> &Arc<BufferStore> {
        &self.store
    }

    /// The start of the buffer memory.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl ops::Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.store.buffer_size) }
    }
}

impl ops::DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.store.buffer_size) }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.store.release_handle(self.ptr);
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("ptr", &self.ptr)
            .field("len", &self.store.buffer_size)
            .finish()
    }
}

impl fmt::Debug for BufferStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferStore")
            .field("buffer_size", &self.buffer_size)
            .field("pools", &self.slabs.len())
            .field("available", &self.available())
            .field("total", &self.total_buffers())
            .finish()
    }
}

impl fmt::Display for BufferStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BufferStore {}/{} available ({} x {} bytes in {} pools, {} exhausted)",
            self.available(), self.total_buffers(),
            self.total_buffers(), self.buffer_size, self.slabs.len(),
            self.exhausted())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::PoolExhausted => write!(f, "buffer pool exhausted"),
            Error::Foreign => write!(f, "buffer does not belong to the pool"),
            Error::DoubleRelease => write!(f, "buffer released twice"),
        }
    }
}

// Compare by address only, the store is not inspected.
impl PartialEq for Buffer {
    fn eq(&self, other: &Buffer) -> bool {
        ptr::eq(self.ptr.as_ptr(), other.ptr.as_ptr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::{SeedableRng, rngs::StdRng};

    fn store(count: usize, pools: usize) -> BufferStore {
        BufferStore::new(Config {
            buffer_size: 128,
            buffer_count: count,
            pools,
            release_policy: ReleasePolicy::Panic,
        })
    }

    #[test]
    fn conservation() {
        let store = store(8, 1);
        let mut lent = Vec::new();
        for i in 0..8 {
            assert_eq!(store.available() + lent.len(), 8);
            lent.push(store.get_buffer().unwrap());
            assert_eq!(store.lent(), i + 1);
        }
        assert_eq!(store.get_buffer(), Err(Error::PoolExhausted));
        assert_eq!(store.exhausted(), 1);

        while let Some(ptr) = lent.pop() {
            assert_eq!(store.release(ptr), Ok(()));
            assert_eq!(store.available() + lent.len(), 8);
        }
    }

    #[test]
    fn chained_random_release() {
        const COUNT: usize = 100;
        const POOLS: usize = 4;
        let store = store(COUNT, POOLS);
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..3 {
            let mut lent: Vec<_> = (0..COUNT * POOLS)
                .map(|_| store.get_buffer().unwrap())
                .collect();
            assert_eq!(store.available(), 0);
            assert!(store.get_buffer().is_err());

            lent.shuffle(&mut rng);
            for ptr in lent {
                assert!(store.is_from_store(ptr));
                store.release(ptr).unwrap();
            }
            assert_eq!(store.available(), COUNT * POOLS);
        }
    }

    #[test]
    fn double_release() {
        let store = store(4, 2);
        let ptr = store.get_buffer().unwrap();
        assert_eq!(store.release(ptr), Ok(()));
        assert_eq!(store.release(ptr), Err(Error::DoubleRelease));
        assert_eq!(store.available(), 8);

        // The free list is intact: no buffer is handed out twice.
        let mut all: Vec<_> = (0..8).map(|_| store.get_buffer().unwrap()).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 8);
    }

    #[test]
    fn foreign_pointer() {
        let store = store(4, 1);
        let other = self::store(4, 1);
        let theirs = other.get_buffer().unwrap();
        assert_eq!(store.release(theirs), Err(Error::Foreign));

        let ours = store.get_buffer().unwrap();
        let inside = unsafe { NonNull::new_unchecked(ours.as_ptr().add(1)) };
        assert_eq!(store.release(inside), Err(Error::Foreign));
        assert!(!store.is_from_store(inside));
        assert_eq!(store.release(ours), Ok(()));
    }

    #[test]
    fn handle_returns_on_drop() {
        let store = Arc::new(store(2, 1));
        {
            let mut buffer = BufferStore::lend(&store).unwrap();
            assert_eq!(buffer.len(), 128);
            buffer[0] = 0xab;
            assert_eq!(store.available(), 1);
        }
        assert_eq!(store.available(), 2);
    }

    #[test]
    fn release_from_other_thread() {
        let store = Arc::new(store(64, 1));
        let (tx, rx) = std::sync::mpsc::channel::<Buffer>();
        let releaser = std::thread::spawn(move || {
            rx.into_iter().count()
        });

        for _ in 0..1000 {
            loop {
                match BufferStore::lend(&store) {
                    Ok(buffer) => { tx.send(buffer).unwrap(); break }
                    Err(Error::PoolExhausted) => std::thread::yield_now(),
                    Err(other) => panic!("{}", other),
                }
            }
        }
        drop(tx);
        assert_eq!(releaser.join().unwrap(), 1000);
        assert_eq!(store.available(), 64);
    }

    #[test]
    fn display() {
        let store = store(4, 2);
        let _held = store.get_buffer().unwrap();
        assert_eq!(format!("{}", store),
            "BufferStore 7/8 available (8 x 128 bytes in 2 pools, 0 exhausted)");
    }
}
