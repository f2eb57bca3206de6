use std::io;

use crate::control::{ControlRequest, ControlStatus};

/// The sector size used when a stream does not impose one.
pub const DEFAULT_SECTOR_SIZE: usize = 2048;

/// A blocking, seekable source of bytes (a file, a network connection, a disc).
///
/// While caching is enabled, a stream is owned by the cache worker and every
/// method is called from the worker only. With [`WorkerKind::Process`] the
/// stream is duplicated by `fork`, so it must not rely on state shared with
/// other threads of the parent process.
///
/// [`WorkerKind::Process`]: crate::WorkerKind::Process
pub trait Stream: Send + 'static {
    /// Read up to `buf.len()` bytes at the current position. This may block.
    ///
    /// Returning `Ok(0)` signals the end of the stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Move the read position to the given byte.
    fn seek(&mut self, pos: u64) -> io::Result<()>;

    /// The current read position.
    fn pos(&self) -> u64;

    /// Handle an out-of-band request. Requests that move the stream (seeking by
    /// time or chapter, switching angle or title) must only change the position
    /// when they return [`ControlStatus::Ok`].
    fn control(&mut self, _req: &mut ControlRequest) -> ControlStatus {
        ControlStatus::Unsupported
    }

    /// Whether [`Stream::control`] handles anything at all. If this is false, the
    /// cache answers every request with [`ControlStatus::Unsupported`] without
    /// asking the worker.
    fn supports_control(&self) -> bool {
        false
    }

    /// The I/O alignment of the stream. `0` means [`DEFAULT_SECTOR_SIZE`].
    fn sector_size(&self) -> usize {
        0
    }

    /// The largest amount of bytes the cache should request in one read.
    fn read_chunk(&self) -> usize {
        4 * effective_sector_size(self.sector_size())
    }

    /// Whether arbitrary seeks are possible.
    fn is_seekable(&self) -> bool {
        true
    }

    /// The total size in bytes, if known.
    fn size(&self) -> Option<u64> {
        None
    }
}

/// The sector size a stream reporting `sector_size` is cached with.
pub fn effective_sector_size(sector_size: usize) -> usize {
    if sector_size == 0 {
        DEFAULT_SECTOR_SIZE
    } else {
        sector_size
    }
}

impl<S: Stream + ?Sized> Stream for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        (**self).seek(pos)
    }

    fn pos(&self) -> u64 {
        (**self).pos()
    }

    fn control(&mut self, req: &mut ControlRequest) -> ControlStatus {
        (**self).control(req)
    }

    fn supports_control(&self) -> bool {
        (**self).supports_control()
    }

    fn sector_size(&self) -> usize {
        (**self).sector_size()
    }

    fn read_chunk(&self) -> usize {
        (**self).read_chunk()
    }

    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }

    fn size(&self) -> Option<u64> {
        (**self).size()
    }
}
