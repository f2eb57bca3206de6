use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::shared::SharedRegion;
use crate::interrupt::{sleep_or_interrupted, Interrupt};

/// After this many polls without the window growing, a read warns that the
/// cache cannot keep up.
const STALL_WARN_POLLS: u32 = 10;

/// The consumer's half of a cache: it copies out of the ring buffer and moves
/// `read_filepos`.
pub(crate) struct ReadSide {
    region: Arc<SharedRegion>,
    /// Mirrors the shared `read_filepos`, which only the consumer writes.
    read_filepos: i64,
    poll_interval: Duration,
}

impl ReadSide {
    pub fn new(region: Arc<SharedRegion>, poll_interval: Duration) -> Self {
        let read_filepos = region.state().read_filepos.load(Ordering::Relaxed);

        Self {
            region,
            read_filepos,
            poll_interval,
        }
    }

    pub fn read_filepos(&self) -> i64 {
        self.read_filepos
    }

    /// How many bytes are buffered ahead of the reader.
    pub fn fill_level(&self) -> i64 {
        let max = self.region.state().max_filepos.load(Ordering::Acquire);
        (max - self.read_filepos).max(0)
    }

    /// Copy up to `buf.len()` bytes at `read_filepos` out of the buffer, waiting
    /// for the worker when nothing is buffered.
    ///
    /// Returns fewer bytes only at the end of the stream or when interrupted.
    /// An interrupt leaves the shared state alone, so the next read waits for
    /// the worker again.
    pub fn read(&mut self, buf: &mut [u8], interrupt: &dyn Interrupt) -> usize {
        let region = &*self.region;
        let state = region.state();
        let bs = state.geometry.buffer_size;

        let mut total = 0;
        let mut last_max = state.max_filepos.load(Ordering::Acquire);
        let mut stalled_polls = 0;

        while total < buf.len() {
            let generation = state.generation.load(Ordering::Acquire);
            let max = state.max_filepos.load(Ordering::Acquire);
            let min = state.min_filepos.load(Ordering::Acquire);
            let offset = state.offset.load(Ordering::Acquire);
            let read = self.read_filepos;

            if read < min || read >= max {
                if state.is_eof() {
                    break;
                }

                if max == last_max {
                    stalled_polls += 1;
                    if stalled_polls == STALL_WARN_POLLS {
                        log::warn!(
                            "Cache not filling, consider increasing the cache size and/or the prefill amount"
                        );
                    }
                } else {
                    last_max = max;
                    stalled_polls = 0;
                }

                if sleep_or_interrupted(interrupt, self.poll_interval) {
                    log::debug!("Cache read interrupted at {}", read);
                    break;
                }
                continue;
            }

            let index = state.index_of(read, offset);
            let len = (max - read)
                .min(bs - index as i64)
                .min((buf.len() - total) as i64) as usize;

            // Safe because `index + len` does not pass the end of the buffer. The
            // copy is validated below.
            unsafe {
                region.copy_out(index, &mut buf[total..total + len]);
            }

            fence(Ordering::SeqCst);
            if state.generation.load(Ordering::Relaxed) != generation
                || state.min_filepos.load(Ordering::Relaxed) > read
            {
                // The worker reused these bytes while they were copied.
                continue;
            }

            self.read_filepos += len as i64;
            state
                .read_filepos
                .store(self.read_filepos, Ordering::Release);
            total += len;
        }

        total
    }

    /// Move the reader to `pos`.
    ///
    /// For an unseekable stream this fails unless `pos` is inside the cached
    /// window.
    pub fn seek(&mut self, pos: i64) -> bool {
        let state = self.region.state();

        if !state.geometry.seekable {
            let min = state.min_filepos.load(Ordering::Acquire);
            let max = state.max_filepos.load(Ordering::Acquire);

            if pos > max {
                log::error!(
                    "Cannot seek to {} past the cached data (at most {}) in an unseekable stream",
                    pos,
                    max
                );
                return false;
            }
            if pos < min {
                log::error!(
                    "Cannot seek to {} before the cached data (at least {}) in an unseekable stream",
                    pos,
                    min
                );
                return false;
            }
        }

        self.move_to(pos);
        true
    }

    /// Adopt the position the worker moved the stream to while serving a
    /// control request.
    pub fn reset_to(&mut self, pos: i64) {
        self.move_to(pos);
    }

    fn move_to(&mut self, pos: i64) {
        let state = self.region.state();

        self.read_filepos = pos;
        state.read_filepos.store(pos, Ordering::SeqCst);
        state.seeks.fetch_add(1, Ordering::SeqCst);
        state.set_eof(false);
    }
}
