use std::alloc::{self, Layout};
use std::io;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use super::mailbox::Mailbox;

/// Alignment of the region and of the byte buffer following the header.
const REGION_ALIGN: usize = 64;

/// The fixed layout of a cache, decided once when enabling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub buffer_size: i64,
    pub sector_size: i64,
    /// How much already-read data is kept behind the reader.
    pub back_size: i64,
    /// The worker does not read with less free space than this.
    pub fill_limit: i64,
    pub seek_limit: i64,
    pub seekable: bool,
}

/// Cursors, flags and the control mailbox shared between the consumer and
/// the worker.
///
/// Stream positions are absolute byte offsets. The buffer holds the bytes
/// `[min_filepos, max_filepos)`, the byte at position `p` living at index
/// `(p - offset).rem_euclid(buffer_size)`.
#[repr(C)]
pub(crate) struct CacheState {
    pub geometry: Geometry,

    // Written by the worker.
    pub min_filepos: AtomicI64,
    pub max_filepos: AtomicI64,
    pub offset: AtomicI64,
    /// Bumped each time the buffer contents are dropped.
    pub generation: AtomicU64,
    pub idle: AtomicBool,
    time_length: AtomicU64,
    time_pos: AtomicU64,
    stream_size: AtomicI64,

    // Written by the consumer.
    pub read_filepos: AtomicI64,
    /// Bumped by every consumer seek.
    pub seeks: AtomicU64,

    /// Set by the worker, cleared by both sides. Only accessed with `SeqCst`.
    pub eof: AtomicBool,

    pub mailbox: Mailbox,
}

impl CacheState {
    pub fn new(geometry: Geometry, start: i64) -> Self {
        Self {
            geometry,
            min_filepos: AtomicI64::new(start),
            max_filepos: AtomicI64::new(start),
            offset: AtomicI64::new(start),
            generation: AtomicU64::new(0),
            idle: AtomicBool::new(false),
            time_length: AtomicU64::new(0f64.to_bits()),
            time_pos: AtomicU64::new(f64::NAN.to_bits()),
            stream_size: AtomicI64::new(-1),
            read_filepos: AtomicI64::new(start),
            seeks: AtomicU64::new(0),
            eof: AtomicBool::new(false),
            mailbox: Mailbox::new(),
        }
    }

    /// The cached duration in seconds, `0.0` if unknown.
    pub fn time_length(&self) -> f64 {
        f64::from_bits(self.time_length.load(Ordering::Relaxed))
    }

    pub fn set_time_length(&self, len: f64) {
        self.time_length.store(len.to_bits(), Ordering::Relaxed);
    }

    /// The cached current time in seconds.
    pub fn time_pos(&self) -> Option<f64> {
        let t = f64::from_bits(self.time_pos.load(Ordering::Relaxed));
        if t.is_nan() {
            None
        } else {
            Some(t)
        }
    }

    pub fn set_time_pos(&self, t: Option<f64>) {
        self.time_pos
            .store(t.unwrap_or(f64::NAN).to_bits(), Ordering::Relaxed);
    }

    /// The cached stream size in bytes.
    pub fn stream_size(&self) -> Option<u64> {
        u64::try_from(self.stream_size.load(Ordering::Relaxed)).ok()
    }

    pub fn set_stream_size(&self, size: Option<u64>) {
        let size = size.and_then(|s| i64::try_from(s).ok()).unwrap_or(-1);
        self.stream_size.store(size, Ordering::Relaxed);
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }

    pub fn set_eof(&self, eof: bool) {
        self.eof.store(eof, Ordering::SeqCst);
    }

    /// Buffer index of stream position `pos`.
    pub fn index_of(&self, pos: i64, offset: i64) -> usize {
        // Always in `0..buffer_size`, which fits in `usize`.
        (pos - offset).rem_euclid(self.geometry.buffer_size) as usize
    }
}

enum Backing {
    Heap(Layout),
    #[cfg(unix)]
    Mapping(usize),
}

/// A [`CacheState`] followed by the ring buffer, in one block of memory that
/// both the consumer and the worker can see.
///
/// For a thread worker this is a heap allocation. For a process worker it is
/// an anonymous shared mapping, which stays shared across `fork`.
pub(crate) struct SharedRegion {
    ptr: NonNull<u8>,
    buffer_size: usize,
    backing: Backing,
}

// Everything in the region is either atomic, sequenced by the mailbox, or a
// buffer byte range handed out by the fill/read protocol.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

fn header_len() -> usize {
    let len = mem::size_of::<CacheState>();
    (len + REGION_ALIGN - 1) / REGION_ALIGN * REGION_ALIGN
}

impl SharedRegion {
    /// Allocate a region for `state`. If `cross_process` is true, the memory
    /// stays shared with children forked afterwards.
    pub fn new(state: CacheState, cross_process: bool) -> io::Result<Self> {
        let buffer_size = usize::try_from(state.geometry.buffer_size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "negative buffer size"))?;
        let len = header_len()
            .checked_add(buffer_size)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "buffer too large"))?;

        let (ptr, backing) = if cross_process {
            map_shared(len)?
        } else {
            alloc_heap(len)?
        };

        // Safe because the block is at least `header_len()` bytes long and
        // aligned to `REGION_ALIGN`, which satisfies `CacheState`.
        unsafe {
            ptr.as_ptr().cast::<CacheState>().write(state);
        }

        Ok(Self {
            ptr,
            buffer_size,
            backing,
        })
    }

    pub fn state(&self) -> &CacheState {
        // Safe because the state was written in `new` and lives as long as `self`.
        unsafe { &*self.ptr.as_ptr().cast::<CacheState>() }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn buffer_ptr(&self) -> *mut u8 {
        // Safe because the allocation is `header_len() + buffer_size` bytes long.
        unsafe { self.ptr.as_ptr().add(header_len()) }
    }

    /// Copy buffer bytes starting at `index` into `dst`.
    ///
    /// # Safety
    ///
    /// `index + dst.len()` must not exceed the buffer size. The bytes may be
    /// overwritten concurrently, so the caller has to validate the copy
    /// afterwards.
    pub unsafe fn copy_out(&self, index: usize, dst: &mut [u8]) {
        debug_assert!(index + dst.len() <= self.buffer_size);
        std::ptr::copy_nonoverlapping(self.buffer_ptr().add(index), dst.as_mut_ptr(), dst.len());
    }

    /// Copy `src` into the buffer starting at `index`.
    ///
    /// # Safety
    ///
    /// `index + src.len()` must not exceed the buffer size, and only the worker
    /// may write, to bytes outside the window the consumer reads from.
    pub unsafe fn copy_in(&self, index: usize, src: &[u8]) {
        debug_assert!(index + src.len() <= self.buffer_size);
        std::ptr::copy_nonoverlapping(src.as_ptr(), self.buffer_ptr().add(index), src.len());
    }

    /// A writable view of `len` buffer bytes starting at `index`.
    ///
    /// # Safety
    ///
    /// Same as [`SharedRegion::copy_in`], and the view must be dropped before
    /// the bytes are published by raising `max_filepos`.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn buffer_mut(&self, index: usize, len: usize) -> &mut [u8] {
        debug_assert!(index + len <= self.buffer_size);
        std::slice::from_raw_parts_mut(self.buffer_ptr().add(index), len)
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // Safe because nothing borrows the state anymore.
        unsafe {
            std::ptr::drop_in_place(self.ptr.as_ptr().cast::<CacheState>());
        }

        match self.backing {
            Backing::Heap(layout) => unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) },
            #[cfg(unix)]
            Backing::Mapping(len) => {
                let res = unsafe { libc::munmap(self.ptr.as_ptr().cast(), len) };
                if res != 0 {
                    log::warn!(
                        "Failed to unmap cache buffer: {}",
                        io::Error::last_os_error()
                    );
                }
            }
        }
    }
}

fn alloc_heap(len: usize) -> io::Result<(NonNull<u8>, Backing)> {
    let layout = Layout::from_size_align(len, REGION_ALIGN)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // Safe because `len` is never zero, the header alone is non-empty.
    let ptr = unsafe { alloc::alloc_zeroed(layout) };

    NonNull::new(ptr)
        .map(|ptr| (ptr, Backing::Heap(layout)))
        .ok_or_else(|| io::Error::new(io::ErrorKind::OutOfMemory, "out of memory"))
}

#[cfg(unix)]
fn map_shared(len: usize) -> io::Result<(NonNull<u8>, Backing)> {
    // Safe because this creates a fresh mapping not aliasing anything.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    // Page aligned, so also `REGION_ALIGN` aligned.
    NonNull::new(ptr.cast::<u8>())
        .map(|ptr| (ptr, Backing::Mapping(len)))
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
}

#[cfg(not(unix))]
fn map_shared(_len: usize) -> io::Result<(NonNull<u8>, Backing)> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "shared mappings are only available on unix",
    ))
}
