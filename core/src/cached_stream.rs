use std::mem;
use std::sync::Arc;

use crate::cache::{Cache, CacheStats, Enabled};
use crate::interrupt::{Interrupt, NoInterrupt};
use crate::stream::effective_sector_size;
use crate::{CacheError, CacheOptions, ControlRequest, ControlStatus, EnableStatus, Stream};

enum Source<S: Stream> {
    Direct(S),
    Cached(Cache<S>),
    /// The stream was lost with a worker that died.
    Gone,
}

/// A [`Stream`] with an optional read-ahead cache in front of it.
///
/// Without a cache, every call goes straight to the stream. With a cache, a
/// worker thread or process reads ahead into a ring buffer while this side
/// copies out of it, so slow reads on the stream do not stall the caller.
///
/// Bytes are handed out in sector-sized refills of a small front buffer, as
/// with any buffered reader.
pub struct CachedStream<S: Stream> {
    source: Source<S>,

    buffer: Vec<u8>,
    buf_pos: usize,
    buf_len: usize,
    /// The stream position right after the front buffer.
    pos: u64,
    eof: bool,

    interrupt: Arc<dyn Interrupt>,
}

impl<S: Stream> CachedStream<S> {
    /// Wrap `stream` without a cache.
    pub fn new(stream: S) -> Self {
        let sector_size = effective_sector_size(stream.sector_size());
        let pos = stream.pos();

        Self {
            source: Source::Direct(stream),
            buffer: vec![0; sector_size],
            buf_pos: 0,
            buf_len: 0,
            pos,
            eof: false,
            interrupt: Arc::new(NoInterrupt),
        }
    }

    /// Set the predicate that aborts blocking waits on the cache.
    pub fn set_interrupt(&mut self, interrupt: Arc<dyn Interrupt>) {
        self.interrupt = interrupt;
    }

    pub fn is_cached(&self) -> bool {
        matches!(self.source, Source::Cached(_))
    }

    /// Start caching from the current stream position.
    ///
    /// On error the stream keeps working without a cache. If the prefill wait
    /// is interrupted, [`EnableStatus::Interrupted`] is returned and the stream
    /// is also used without a cache.
    pub fn enable_cache(&mut self, opts: CacheOptions) -> Result<EnableStatus, CacheError> {
        let stream = match mem::replace(&mut self.source, Source::Gone) {
            Source::Direct(stream) => stream,
            other => {
                self.source = other;
                return Err(CacheError::AlreadyEnabled);
            }
        };

        match Cache::enable(stream, opts, &*self.interrupt) {
            Ok(Enabled::Running(cache)) => {
                self.source = Source::Cached(cache);
                Ok(EnableStatus::Enabled)
            }
            Ok(Enabled::Interrupted(stream)) => {
                if let Some(stream) = stream {
                    self.source = Source::Direct(stream);
                    self.resync();
                }
                Ok(EnableStatus::Interrupted)
            }
            Err((stream, e)) => {
                self.source = Source::Direct(stream);
                Err(e)
            }
        }
    }

    /// Stop the cache and go back to reading the stream directly. Does nothing
    /// if no cache is running.
    pub fn disable_cache(&mut self) {
        if let Source::Cached(cache) = mem::replace(&mut self.source, Source::Gone) {
            if let Some(stream) = cache.disable() {
                self.source = Source::Direct(stream);
                self.resync();
            }
        }
    }

    /// Move the stream to the end of the front buffer after the cache let go
    /// of it, so direct reads continue where cached ones stopped.
    fn resync(&mut self) {
        if let Source::Direct(stream) = &mut self.source {
            if stream.pos() != self.pos {
                if let Err(e) = stream.seek(self.pos) {
                    log::warn!("Failed to seek stream back to {}: {}", self.pos, e);
                }
            }
        }
    }

    /// Stop the cache, if any, and take the stream back.
    pub fn into_inner(mut self) -> Option<S> {
        self.disable_cache();

        match mem::replace(&mut self.source, Source::Gone) {
            Source::Direct(stream) => Some(stream),
            _ => None,
        }
    }

    /// Refill the front buffer with the next sector of data. Returns the number
    /// of bytes read, `0` at the end of the stream.
    pub fn fill_buffer(&mut self) -> usize {
        let len = match &mut self.source {
            Source::Direct(stream) => match stream.read(&mut self.buffer) {
                Ok(len) => len,
                Err(e) => {
                    log::warn!("Failed to read stream at {}: {}", self.pos, e);
                    0
                }
            },
            Source::Cached(cache) => {
                if cache.read_filepos() != self.pos {
                    log::error!(
                        "Cache read position {} differs from stream position {}, report this bug",
                        cache.read_filepos(),
                        self.pos
                    );
                }
                cache.read(&mut self.buffer, &*self.interrupt)
            }
            Source::Gone => 0,
        };

        self.buf_pos = 0;
        self.buf_len = len;
        self.pos += len as u64;
        self.eof = len == 0;

        len
    }

    /// Seek to an absolute position. The front buffer is refilled from the
    /// sector containing `pos`.
    pub fn seek_long(&mut self, pos: u64) -> bool {
        match &mut self.source {
            Source::Direct(stream) => {
                if let Err(e) = stream.seek(pos) {
                    log::warn!("Failed to seek stream to {}: {}", pos, e);
                    return false;
                }
                self.reset_front(pos);
                true
            }
            Source::Cached(cache) => {
                let sector_size = cache.sector_size() as u64;
                let aligned = pos - pos % sector_size;

                if !cache.seek(aligned) {
                    return false;
                }
                self.reset_front(aligned);

                self.fill_buffer();

                let delta = (pos - aligned) as usize;
                if delta <= self.buf_len {
                    self.buf_pos = delta;
                    // Landing exactly on the end is not the end of the stream.
                    self.eof = false;
                    true
                } else {
                    log::warn!("Cache cannot seek to {:#x}, stream ends before it", pos);
                    false
                }
            }
            Source::Gone => false,
        }
    }

    fn reset_front(&mut self, pos: u64) {
        self.pos = pos;
        self.buf_pos = 0;
        self.buf_len = 0;
        self.eof = false;
    }

    /// Seek to an absolute position, staying in the front buffer if possible.
    pub fn seek(&mut self, pos: u64) -> bool {
        let buf_start = self.pos - self.buf_len as u64;
        if pos >= buf_start && pos <= self.pos {
            self.buf_pos = (pos - buf_start) as usize;
            self.eof = false;
            return true;
        }

        self.seek_long(pos)
    }

    /// Read up to `buf.len()` bytes. Returns fewer only at the end of the stream
    /// or when interrupted.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut total = 0;

        while total < buf.len() {
            if self.buf_pos >= self.buf_len && self.fill_buffer() == 0 {
                break;
            }

            let len = (self.buf_len - self.buf_pos).min(buf.len() - total);
            buf[total..total + len].copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + len]);
            self.buf_pos += len;
            total += len;
        }

        total
    }

    /// The position of the next byte [`CachedStream::read`] returns.
    pub fn tell(&self) -> u64 {
        self.pos - (self.buf_len - self.buf_pos) as u64
    }

    /// Whether a read hit the end of the stream.
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Run a control request, through the cache worker if a cache is running.
    ///
    /// A successful request that moves the stream (seeking by time or chapter,
    /// switching angle or title) discards the front buffer and continues from
    /// the stream's new position.
    pub fn do_control(&mut self, req: &mut ControlRequest) -> ControlStatus {
        let (status, moved_to) = match &mut self.source {
            Source::Direct(stream) => {
                if !stream.supports_control() {
                    return ControlStatus::Unsupported;
                }

                let old_pos = stream.pos();
                let status = stream.control(req);
                let new_pos = stream.pos();

                let moved = new_pos != old_pos || (status == ControlStatus::Ok && req.moves_stream());
                (status, if moved { Some(new_pos) } else { None })
            }
            Source::Cached(cache) => {
                let outcome = cache.control(req, &*self.interrupt);
                if outcome.interrupted {
                    self.eof = true;
                }
                (outcome.status, outcome.moved_to)
            }
            Source::Gone => return ControlStatus::Unsupported,
        };

        if let Some(pos) = moved_to {
            self.reset_front(pos);
        }

        status
    }

    /// The cache state, if a cache is running.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        match &self.source {
            Source::Cached(cache) => Some(cache.stats()),
            _ => None,
        }
    }

    /// Let a cache that hit the end of the stream try reading again.
    pub fn resume_cache(&mut self) {
        if let Source::Cached(cache) = &mut self.source {
            cache.resume();
            self.eof = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use float_cmp::approx_eq;

    use super::*;
    use crate::test_util::{pattern, ProbeStream};
    use crate::{InterruptFlag, MemoryStream, MemoryStreamOptions, WorkerKind};

    fn opts() -> CacheOptions {
        CacheOptions::new(131072, 4096, 8192)
    }

    fn read_all(stream: &mut CachedStream<impl Stream>, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let len = stream.read(&mut buf);
            if len == 0 {
                break;
            }
            out.extend_from_slice(&buf[..len]);
        }
        out
    }

    #[test]
    fn sequential_read_through_cache() {
        let data = pattern(1_000_000);
        let (probe, counters) = ProbeStream::new(MemoryStream::new(data.clone()));
        let mut stream = CachedStream::new(probe);

        assert_eq!(stream.enable_cache(opts()).unwrap(), EnableStatus::Enabled);
        assert!(stream.is_cached());

        let out = read_all(&mut stream, 500);
        assert_eq!(out.len(), data.len());
        assert!(out == data);
        assert!(stream.eof());
        assert_eq!(stream.tell(), 1_000_000);
        assert_eq!(counters.seeks(), 0);

        // Reads stay at the end.
        let mut buf = [0u8; 10];
        assert_eq!(stream.read(&mut buf), 0);
    }

    #[test]
    fn prefill_is_reached() {
        let data = pattern(1_000_000);
        let mut stream = CachedStream::new(MemoryStream::new(data));

        stream.enable_cache(opts()).unwrap();

        let stats = stream.cache_stats().unwrap();
        assert_eq!(stats.size, 131072);
        assert!(stats.fill >= 4096);
    }

    #[test]
    fn far_seek_reseeks_stream() {
        let data = pattern(1_000_000);
        let (probe, counters) = ProbeStream::new(MemoryStream::new(data.clone()));
        let mut stream = CachedStream::new(probe);
        stream.enable_cache(opts()).unwrap();

        let mut buf = vec![0u8; 1000];
        assert_eq!(stream.read(&mut buf), 1000);

        assert!(stream.seek(900_000));
        assert_eq!(stream.tell(), 900_000);
        assert_eq!(stream.read(&mut buf), 1000);
        assert_eq!(buf[..], data[900_000..901_000]);
        assert_eq!(counters.seeks(), 1);
    }

    #[test]
    fn near_seek_reads_through() {
        let data = pattern(1_000_000);
        let (probe, counters) = ProbeStream::new(MemoryStream::new(data.clone()));
        let mut stream = CachedStream::new(probe);
        stream.enable_cache(opts()).unwrap();

        let mut buf = vec![0u8; 100];
        assert_eq!(stream.read(&mut buf), 100);

        // Wait for the worker to stop reading ahead.
        while !stream.cache_stats().unwrap().idle {
            std::thread::sleep(Duration::from_millis(1));
        }

        // The front buffer took one sector out of the cache.
        let max = 2048 + stream.cache_stats().unwrap().fill;
        let target = max + 3000;
        assert!(stream.seek(target));
        assert_eq!(stream.read(&mut buf), 100);
        assert_eq!(buf[..], data[target as usize..target as usize + 100]);
        assert_eq!(counters.seeks(), 0);
    }

    #[test]
    fn backward_seek_inside_window() {
        let data = pattern(100_000);
        let (probe, counters) = ProbeStream::new(MemoryStream::new(data.clone()));
        let mut stream = CachedStream::new(probe);
        stream.enable_cache(opts()).unwrap();

        let mut buf = vec![0u8; 30_000];
        assert_eq!(stream.read(&mut buf), 30_000);

        assert!(stream.seek(12_345));
        let mut buf = vec![0u8; 5000];
        assert_eq!(stream.read(&mut buf), 5000);
        assert_eq!(buf[..], data[12_345..17_345]);
        assert_eq!(counters.seeks(), 0);
    }

    #[test]
    fn seek_to_time_flushes_cache() {
        let data = pattern(1_000_000);
        let mem = MemoryStream::with_options(
            data.clone(),
            MemoryStreamOptions {
                bytes_per_second: Some(10_000.0),
                ..Default::default()
            },
        );
        let mut stream = CachedStream::new(mem);
        stream.enable_cache(opts()).unwrap();

        let mut buf = vec![0u8; 100];
        assert_eq!(stream.read(&mut buf), 100);

        let mut req = ControlRequest::SeekToTime(30.0);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Ok);
        assert_eq!(stream.tell(), 300_000);
        assert!(!stream.eof());

        assert_eq!(stream.read(&mut buf), 100);
        assert_eq!(buf[..], data[300_000..300_100]);

        // Answered from the values the worker keeps.
        let mut req = ControlRequest::GetTimeLength(0.0);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Ok);
        match req {
            ControlRequest::GetTimeLength(len) => assert!(approx_eq!(f64, len, 100.0)),
            other => panic!("unexpected reply {:?}", other),
        }

        let mut req = ControlRequest::GetSize(0);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Ok);
        assert_eq!(req, ControlRequest::GetSize(1_000_000));
    }

    #[test]
    fn seek_to_time_after_eof_clears_it() {
        let data = pattern(50_000);
        let mem = MemoryStream::with_options(
            data.clone(),
            MemoryStreamOptions {
                bytes_per_second: Some(1000.0),
                ..Default::default()
            },
        );
        let mut stream = CachedStream::new(mem);
        stream.enable_cache(opts()).unwrap();

        assert_eq!(read_all(&mut stream, 4096).len(), 50_000);
        assert!(stream.eof());

        let mut req = ControlRequest::SeekToTime(10.0);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Ok);
        assert!(!stream.eof());

        let rest = read_all(&mut stream, 4096);
        assert!(rest == data[10_000..]);
    }

    #[test]
    fn forwarded_control_round_trip() {
        let mem = MemoryStream::with_options(
            pattern(100_000),
            MemoryStreamOptions {
                chapters: vec![0, 40_000, 80_000],
                ..Default::default()
            },
        );
        let mut stream = CachedStream::new(mem);
        stream.enable_cache(opts()).unwrap();

        let mut req = ControlRequest::GetNumChapters(0);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Ok);
        assert_eq!(req, ControlRequest::GetNumChapters(3));

        let mut req = ControlRequest::SeekToChapter(2);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Ok);
        assert_eq!(stream.tell(), 80_000);

        let mut req = ControlRequest::GetCurrentChapter(0);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Ok);
        assert_eq!(req, ControlRequest::GetCurrentChapter(2));

        let mut req = ControlRequest::SeekToChapter(7);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Error);
        assert_eq!(stream.tell(), 80_000);

        let mut req = ControlRequest::GetNumAngles(0);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Unsupported);
    }

    #[test]
    fn control_without_support_is_unsupported() {
        let mut stream = CachedStream::new(MemoryStream::new(pattern(10_000)));
        stream.enable_cache(opts()).unwrap();

        let mut req = ControlRequest::GetTimeLength(0.0);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Unsupported);
        let mut req = ControlRequest::SeekToTime(1.0);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Unsupported);
        assert_eq!(stream.tell(), 0);
    }

    #[test]
    fn unseekable_stream_rejects_seek_outside_window() {
        let data = pattern(1_000_000);
        let mem = MemoryStream::with_options(
            data.clone(),
            MemoryStreamOptions {
                seekable: false,
                ..Default::default()
            },
        );
        let mut stream = CachedStream::new(mem);
        stream.enable_cache(opts()).unwrap();

        assert!(!stream.seek(900_000));

        let mut buf = vec![0u8; 2000];
        assert_eq!(stream.read(&mut buf), 2000);
        assert!(stream.seek(3000));
        assert_eq!(stream.read(&mut buf[..10]), 10);
        assert_eq!(buf[..10], data[3000..3010]);
    }

    #[test]
    fn interrupt_returns_short_read() {
        let data = pattern(100_000);
        let (probe, _counters) = ProbeStream::new(MemoryStream::new(data.clone()));
        // The worker never gets past this point.
        let probe = probe.stall_at(20_000);
        let mut stream = CachedStream::new(probe);
        let interrupt = InterruptFlag::new();
        stream.set_interrupt(Arc::new(interrupt.clone()));
        stream.enable_cache(opts()).unwrap();

        interrupt.raise();
        let mut buf = vec![0u8; 30_000];
        let len = stream.read(&mut buf);
        assert!(len < 30_000);
        assert!(buf[..len] == data[..len]);
        assert!(stream.eof());
    }

    #[test]
    fn reads_resume_after_interrupt() {
        let data = pattern(200_000);
        let (probe, _) = ProbeStream::new(MemoryStream::new(data.clone()));
        let mut stream = CachedStream::new(probe.read_delay(Duration::from_millis(10)));
        let interrupt = InterruptFlag::new();
        stream.set_interrupt(Arc::new(interrupt.clone()));
        stream
            .enable_cache(CacheOptions::new(131072, 0, 8192))
            .unwrap();

        interrupt.raise();
        let mut buf = vec![0u8; 100_000];
        let first = stream.read(&mut buf);
        assert!(first < 100_000);
        assert!(stream.eof());
        interrupt.clear();

        let mut out = buf[..first].to_vec();
        out.extend(read_all(&mut stream, 3000));
        assert_eq!(out.len(), data.len());
        assert!(out == data);
        assert!(stream.eof());
    }

    #[test]
    fn interrupted_control_does_not_stall_reads() {
        let data = pattern(500_000);
        let inner = MemoryStream::with_options(
            data.clone(),
            MemoryStreamOptions {
                chapters: vec![0, 250_000],
                ..Default::default()
            },
        );
        let (probe, _) = ProbeStream::new(inner);
        let mut stream = CachedStream::new(probe.control_delay(Duration::from_millis(20)));
        let interrupt = InterruptFlag::new();
        stream.set_interrupt(Arc::new(interrupt.clone()));
        stream.enable_cache(opts()).unwrap();

        interrupt.raise();
        let mut req = ControlRequest::GetNumChapters(0);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Unsupported);
        assert!(stream.eof());
        interrupt.clear();

        assert!(stream.seek_long(0));
        assert!(!stream.eof());
        assert!(read_all(&mut stream, 4096) == data);
    }

    #[test]
    fn empty_stream() {
        let mut stream = CachedStream::new(MemoryStream::new(Vec::<u8>::new()));
        assert_eq!(stream.enable_cache(opts()).unwrap(), EnableStatus::Enabled);

        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf), 0);
        assert!(stream.eof());
    }

    #[test]
    fn enable_errors_keep_stream_usable() {
        let data = pattern(5000);
        let mut stream = CachedStream::new(MemoryStream::new(data.clone()));

        match stream.enable_cache(CacheOptions::new(0, 0, 0)) {
            Err(CacheError::InvalidSize(0)) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!stream.is_cached());

        match stream.enable_cache(CacheOptions::from_kib(u64::MAX)) {
            Err(CacheError::TooLarge(_)) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!stream.is_cached());

        stream.enable_cache(opts()).unwrap();
        match stream.enable_cache(opts()) {
            Err(CacheError::AlreadyEnabled) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert!(stream.is_cached());

        assert!(read_all(&mut stream, 999) == data);
    }

    #[test]
    fn small_size_rounds_up_to_minimum() {
        let mut stream = CachedStream::new(MemoryStream::new(pattern(100_000)));
        stream.enable_cache(CacheOptions::new(1, 0, 0)).unwrap();

        assert_eq!(stream.cache_stats().unwrap().size, 16 * 2048);
    }

    #[test]
    fn disable_continues_directly() {
        let data = pattern(300_000);
        let mut stream = CachedStream::new(MemoryStream::new(data.clone()));
        stream.enable_cache(opts()).unwrap();

        let mut first = vec![0u8; 12_345];
        assert_eq!(stream.read(&mut first), 12_345);

        stream.disable_cache();
        assert!(!stream.is_cached());
        assert!(stream.cache_stats().is_none());

        let mut out = first;
        out.extend(read_all(&mut stream, 7000));
        assert!(out == data);
    }

    #[test]
    fn interrupted_prefill_falls_back_to_direct() {
        let data = pattern(1_000_000);
        let mut stream = CachedStream::new(MemoryStream::new(data.clone()));
        let interrupt = InterruptFlag::new();
        interrupt.raise();
        stream.set_interrupt(Arc::new(interrupt));

        // More prefill than the worker can produce before the first check.
        let opts = CacheOptions::new(8 * 1024 * 1024, 4 * 1024 * 1024, 0);
        assert_eq!(stream.enable_cache(opts).unwrap(), EnableStatus::Interrupted);
        assert!(!stream.is_cached());

        let mut buf = vec![0u8; 3000];
        assert_eq!(stream.read(&mut buf), 3000);
        assert!(buf == data[..3000]);
    }

    #[test]
    fn resume_clears_eof() {
        let mut stream = CachedStream::new(MemoryStream::new(pattern(4096)));
        stream.enable_cache(opts()).unwrap();

        assert_eq!(read_all(&mut stream, 1024).len(), 4096);
        assert!(stream.eof());

        stream.resume_cache();
        assert!(!stream.eof());
    }

    #[test]
    fn direct_mode_controls() {
        let mem = MemoryStream::with_options(
            pattern(100_000),
            MemoryStreamOptions {
                bytes_per_second: Some(1000.0),
                ..Default::default()
            },
        );
        let mut stream = CachedStream::new(mem);

        let mut buf = vec![0u8; 10];
        assert_eq!(stream.read(&mut buf), 10);

        let mut req = ControlRequest::SeekToTime(5.0);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Ok);
        assert_eq!(stream.tell(), 5000);

        let mut req = ControlRequest::GetCurrentTime(0.0);
        assert_eq!(stream.do_control(&mut req), ControlStatus::Ok);
        match req {
            ControlRequest::GetCurrentTime(t) => assert!(approx_eq!(f64, t, 5.0)),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn window_never_exceeds_buffer() {
        let data = pattern(400_000);
        let mut stream = CachedStream::new(MemoryStream::new(data.clone()));
        stream.enable_cache(CacheOptions::new(32768, 0, 8192)).unwrap();

        let mut buf = vec![0u8; 777];
        let mut pos = 0;
        while pos < data.len() {
            let len = stream.read(&mut buf);
            assert!(len > 0);
            assert!(buf[..len] == data[pos..pos + len]);
            pos += len;

            let stats = stream.cache_stats().unwrap();
            assert!(stats.fill <= stats.size);
        }
    }

    #[cfg(unix)]
    #[test]
    fn process_worker_reads_and_seeks() {
        let data = pattern(500_000);
        let mut stream = CachedStream::new(MemoryStream::new(data.clone()));
        let opts = CacheOptions {
            worker: WorkerKind::Process,
            ..opts()
        };
        assert_eq!(stream.enable_cache(opts).unwrap(), EnableStatus::Enabled);

        let mut buf = vec![0u8; 4000];
        assert_eq!(stream.read(&mut buf), 4000);
        assert!(buf == data[..4000]);

        assert!(stream.seek(400_000));
        assert_eq!(stream.read(&mut buf), 4000);
        assert!(buf == data[400_000..404_000]);

        let rest = read_all(&mut stream, 10_000);
        assert_eq!(rest.len(), 500_000 - 404_000);

        stream.disable_cache();
        assert!(!stream.is_cached());
    }
}
