use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::{ControlRequest, ControlStatus, Stream};

/// Bytes whose values do not repeat with any power of two period.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Counts what happened to a [`ProbeStream`], readable from the test.
#[derive(Debug, Clone, Default)]
pub struct ProbeCounters {
    seeks: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl ProbeCounters {
    pub fn seeks(&self) -> usize {
        self.seeks.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Wraps a stream and records the calls made to it.
pub struct ProbeStream<S: Stream> {
    inner: S,
    counters: ProbeCounters,
    stall_at: Option<u64>,
    read_delay: Option<Duration>,
    control_delay: Option<Duration>,
    fail_moves_to: Option<u64>,
}

impl<S: Stream> ProbeStream<S> {
    pub fn new(inner: S) -> (Self, ProbeCounters) {
        let counters = ProbeCounters::default();

        (
            Self {
                inner,
                counters: counters.clone(),
                stall_at: None,
                read_delay: None,
                control_delay: None,
                fail_moves_to: None,
            },
            counters,
        )
    }

    /// From `pos` on, every read fails with [`io::ErrorKind::Interrupted`], so
    /// the cache neither gets data nor sees the end of the stream.
    pub fn stall_at(mut self, pos: u64) -> Self {
        self.stall_at = Some(pos);
        self
    }

    /// Every read blocks for `delay` first.
    pub fn read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Forwarded control requests block for `delay`. The values the cache
    /// refreshes on its own (duration, time, size) stay fast.
    pub fn control_delay(mut self, delay: Duration) -> Self {
        self.control_delay = Some(delay);
        self
    }

    /// Requests that move the stream jump to `pos` and then report an error.
    pub fn fail_moves_to(mut self, pos: u64) -> Self {
        self.fail_moves_to = Some(pos);
        self
    }
}

impl<S: Stream> Stream for ProbeStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            thread::sleep(delay);
        }

        match self.stall_at {
            Some(stall) if self.inner.pos() >= stall => {
                Err(io::Error::new(io::ErrorKind::Interrupted, "stalled"))
            }
            Some(stall) => {
                let len = buf.len().min((stall - self.inner.pos()) as usize);
                self.inner.read(&mut buf[..len])
            }
            None => self.inner.read(buf),
        }
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.counters.seeks.fetch_add(1, Ordering::SeqCst);
        self.inner.seek(pos)
    }

    fn pos(&self) -> u64 {
        self.inner.pos()
    }

    fn control(&mut self, req: &mut ControlRequest) -> ControlStatus {
        let refreshed = matches!(
            req,
            ControlRequest::GetTimeLength(_)
                | ControlRequest::GetCurrentTime(_)
                | ControlRequest::GetSize(_)
        );
        if let (Some(delay), false) = (self.control_delay, refreshed) {
            thread::sleep(delay);
        }

        match self.fail_moves_to {
            Some(pos) if req.moves_stream() => {
                let _ = self.inner.seek(pos);
                ControlStatus::Error
            }
            _ => self.inner.control(req),
        }
    }

    fn supports_control(&self) -> bool {
        self.inner.supports_control()
    }

    fn sector_size(&self) -> usize {
        self.inner.sector_size()
    }

    fn read_chunk(&self) -> usize {
        self.inner.read_chunk()
    }

    fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    fn size(&self) -> Option<u64> {
        self.inner.size()
    }
}
