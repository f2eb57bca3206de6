use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

mod fill;
mod mailbox;
mod reader;
mod shared;
mod worker;

use mailbox::Reply;
use reader::ReadSide;
use shared::{CacheState, Geometry, SharedRegion};
use worker::AnyWorker;

pub(crate) use fill::WriteSide;

use crate::interrupt::{sleep_or_interrupted, Interrupt};
use crate::options::{CacheOptions, WorkerKind};
use crate::stream::effective_sector_size;
use crate::{CacheError, ControlRequest, ControlStatus, Stream};

/// The smallest cache, in sectors.
pub const MIN_CACHE_SECTORS: u64 = 16;

/// The worker never reads with less than this many sectors free.
const FILL_LIMIT_SECTORS: i64 = 8;

/// A snapshot of the cache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// The size of the ring buffer in bytes.
    pub size: u64,
    /// How many bytes are buffered ahead of the reader.
    pub fill: u64,
    /// Whether the worker has nothing to do (buffer full or end of stream).
    pub idle: bool,
}

/// The result of a control request made through the cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ControlOutcome {
    pub status: ControlStatus,
    /// Where the reader was moved to if the cache was flushed.
    pub moved_to: Option<u64>,
    /// The wait for the worker was given up.
    pub interrupted: bool,
}

impl ControlOutcome {
    fn ok() -> Self {
        Self {
            status: ControlStatus::Ok,
            moved_to: None,
            interrupted: false,
        }
    }

    fn unsupported() -> Self {
        Self {
            status: ControlStatus::Unsupported,
            moved_to: None,
            interrupted: false,
        }
    }
}

pub(crate) enum Enabled<S: Stream> {
    Running(Cache<S>),
    /// The prefill wait was interrupted and the worker stopped again.
    Interrupted(Option<S>),
}

/// A running cache: the shared region, the consumer's read side and the
/// worker that owns the stream.
pub(crate) struct Cache<S: Stream> {
    region: Arc<SharedRegion>,
    reader: ReadSide,
    worker: Option<AnyWorker<S>>,
    supports_control: bool,
    opts: CacheOptions,
}

impl<S: Stream> Cache<S> {
    /// Start caching `stream` from its current position.
    ///
    /// Waits until `opts.min_prefill` bytes are buffered, the stream ends, the
    /// buffer is full or `interrupt` fires. On error the stream is handed back
    /// untouched.
    pub fn enable(
        stream: S,
        opts: CacheOptions,
        interrupt: &dyn Interrupt,
    ) -> Result<Enabled<S>, (S, CacheError)> {
        if opts.size == 0 {
            return Err((stream, CacheError::InvalidSize(opts.size)));
        }

        let sector_size = effective_sector_size(stream.sector_size()) as u64;
        let num_sectors = ((opts.size / sector_size)
            + u64::from(opts.size % sector_size != 0))
        .max(MIN_CACHE_SECTORS);
        let buffer_size = match num_sectors.checked_mul(sector_size) {
            Some(bs) if bs <= isize::MAX as u64 => bs as i64,
            _ => return Err((stream, CacheError::TooLarge(opts.size))),
        };

        let sector_size = sector_size as i64;
        let fill_limit = FILL_LIMIT_SECTORS * sector_size;
        let max_limit = buffer_size - fill_limit;
        let seek_limit = (opts.seek_limit.min(max_limit as u64)) as i64;
        let min_prefill = opts.min_prefill.min(max_limit as u64) as i64;

        let geometry = Geometry {
            buffer_size,
            sector_size,
            back_size: buffer_size / 2,
            fill_limit,
            seek_limit,
            seekable: stream.is_seekable(),
        };

        log::info!("Cache size set to {} KiB", buffer_size / 1024);

        #[cfg(not(unix))]
        if opts.worker == WorkerKind::Process {
            return Err((stream, CacheError::NotSupported));
        }

        let start = stream.pos() as i64;
        let region = match SharedRegion::new(
            CacheState::new(geometry, start),
            opts.worker == WorkerKind::Process,
        ) {
            Ok(region) => Arc::new(region),
            Err(e) => {
                log::error!("Failed to allocate a {} byte cache buffer: {}", buffer_size, e);
                return Err((stream, CacheError::Alloc(e)));
            }
        };

        let supports_control = stream.supports_control();
        let write_side = WriteSide::new(Arc::clone(&region), stream, opts.controls_refresh_interval);

        let worker = match AnyWorker::spawn(opts.worker, write_side, opts.idle_backoff) {
            Ok(worker) => worker,
            Err((stream, e)) => {
                log::error!("Starting cache worker failed: {}", e);
                return Err((stream, e));
            }
        };

        let mut cache = Self {
            reader: ReadSide::new(Arc::clone(&region), opts.read_poll_interval),
            region,
            worker: Some(worker),
            supports_control,
            opts,
        };

        if min_prefill > 0 {
            log::debug!("Waiting for {} bytes of prefill", min_prefill);
        }

        loop {
            let state = cache.region.state();
            let read = cache.reader.read_filepos();
            let min = state.min_filepos.load(Ordering::Acquire);
            let fill = cache.reader.fill_level();

            if read >= min && fill >= min_prefill {
                break;
            }
            if state.is_eof() || state.idle.load(Ordering::Acquire) {
                break;
            }

            log::debug!(
                "Cache fill: {:5.2}% ({} bytes)",
                100.0 * fill as f64 / buffer_size as f64,
                fill
            );

            if sleep_or_interrupted(interrupt, opts.prefill_poll_interval) {
                log::info!("Cache prefill interrupted");
                return Ok(Enabled::Interrupted(cache.shutdown()));
            }
        }

        if min_prefill > 0 {
            log::info!("Cache prefill done, {} bytes buffered", cache.reader.fill_level());
        }

        Ok(Enabled::Running(cache))
    }

    pub fn read(&mut self, buf: &mut [u8], interrupt: &dyn Interrupt) -> usize {
        self.discard_stale_reply();

        let len = self.reader.read(buf, interrupt);

        // The worker may be sleeping on a full buffer that now has room.
        if self.region.state().idle.load(Ordering::Acquire) {
            self.wake();
        }

        len
    }

    /// Move the reader to `pos`. Fails for an unseekable stream if `pos` is
    /// outside the cached window.
    pub fn seek(&mut self, pos: u64) -> bool {
        let pos = match i64::try_from(pos) {
            Ok(pos) => pos,
            Err(_) => return false,
        };

        self.discard_stale_reply();

        if !self.reader.seek(pos) {
            return false;
        }

        self.wake();
        true
    }

    pub fn read_filepos(&self) -> u64 {
        self.reader.read_filepos() as u64
    }

    pub fn sector_size(&self) -> usize {
        self.region.state().geometry.sector_size as usize
    }

    /// Run a control request against the stream held by the worker.
    ///
    /// Duration, current time and size are answered from values the worker
    /// refreshes periodically. Everything else blocks until the worker has
    /// answered or `interrupt` fires.
    pub fn control(
        &mut self,
        req: &mut ControlRequest,
        interrupt: &dyn Interrupt,
    ) -> ControlOutcome {
        if !self.supports_control {
            return ControlOutcome::unsupported();
        }

        let region = Arc::clone(&self.region);
        let state = region.state();

        match req {
            ControlRequest::GetTimeLength(len) => {
                let cached = state.time_length();
                if cached == 0.0 {
                    return ControlOutcome::unsupported();
                }
                *len = cached;
                return ControlOutcome::ok();
            }
            ControlRequest::GetCurrentTime(t) => {
                return match state.time_pos() {
                    Some(cached) => {
                        *t = cached;
                        ControlOutcome::ok()
                    }
                    None => ControlOutcome::unsupported(),
                };
            }
            ControlRequest::GetSize(size) => {
                return match state.stream_size() {
                    Some(cached) => {
                        *size = cached;
                        ControlOutcome::ok()
                    }
                    None => ControlOutcome::unsupported(),
                };
            }
            _ => {}
        }

        self.discard_stale_reply();

        if !state.mailbox.post(*req) {
            log::warn!("Cache is busy, dropping control request {:?}", req);
            return ControlOutcome::unsupported();
        }

        log::debug!("Waiting for the cache worker to run {:?}", req);
        self.wake();

        let start = Instant::now();
        let mut warned = false;

        let reply = loop {
            if let Some(reply) = self.collect_reply() {
                break reply;
            }

            if !warned && start.elapsed() >= self.opts.control_warn_after {
                log::warn!("Cache not responding to {:?}", req);
                warned = true;
            }

            if sleep_or_interrupted(interrupt, self.opts.control_poll_interval) {
                log::debug!("Control request {:?} interrupted", req);
                return ControlOutcome {
                    interrupted: true,
                    ..ControlOutcome::unsupported()
                };
            }
        };

        if reply.status == ControlStatus::Ok {
            *req = reply.request;
        }

        ControlOutcome {
            status: reply.status,
            moved_to: reply.new_pos.map(|p| p as u64),
            interrupted: false,
        }
    }

    /// Collect an answered request from the mailbox, adopting a flush the
    /// worker did, and release the mailbox.
    fn collect_reply(&mut self) -> Option<Reply> {
        let reply = self.region.state().mailbox.reply()?;

        if let Some(pos) = reply.new_pos {
            self.reader.reset_to(pos);
        }
        self.region.state().mailbox.finish();

        Some(reply)
    }

    /// Release the mailbox from a request whose wait was interrupted.
    ///
    /// Nobody waits for that answer anymore. If the request flushed the cache,
    /// the reader keeps its position and the worker refills from there.
    fn discard_stale_reply(&self) {
        let mailbox = &self.region.state().mailbox;

        if let Some(reply) = mailbox.reply() {
            log::debug!(
                "Dropping the answer to interrupted request {:?}: {:?}",
                reply.request,
                reply.status
            );
            mailbox.finish();
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.region.state();

        CacheStats {
            size: state.geometry.buffer_size as u64,
            fill: self.reader.fill_level() as u64,
            idle: state.idle.load(Ordering::Acquire),
        }
    }

    /// Let the worker try again after the stream ended, for streams that grow.
    pub fn resume(&mut self) {
        self.region.state().set_eof(false);
        self.wake();
    }

    fn wake(&self) {
        if let Some(worker) = &self.worker {
            worker.wake();
        }
    }

    /// Stop the worker and take the stream back.
    pub fn disable(mut self) -> Option<S> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<S> {
        let worker = self.worker.take()?;

        log::debug!("Stopping cache worker");
        self.region.state().mailbox.post_quit();
        worker.wake();

        worker.join()
    }
}

impl<S: Stream> Drop for Cache<S> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
