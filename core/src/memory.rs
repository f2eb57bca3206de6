use std::io;
use std::sync::Arc;

use crate::control::{ControlRequest, ControlStatus};
use crate::Stream;

/// Options for a [`MemoryStream`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStreamOptions {
    /// The sector size reported to the cache. `0` means the default.
    pub sector_size: usize,

    /// The largest read the cache should request. `0` means the default of
    /// four sectors.
    pub read_chunk: usize,

    /// If false, only seeking to the current position succeeds.
    pub seekable: bool,

    /// A constant bitrate. If set, the stream answers time based requests
    /// (seek to time, duration, current time).
    pub bytes_per_second: Option<f64>,

    /// Byte offsets of chapter starts, in ascending order. If not empty, the
    /// stream answers chapter requests.
    pub chapters: Vec<u64>,
}

impl Default for MemoryStreamOptions {
    fn default() -> Self {
        Self {
            sector_size: 0,
            read_chunk: 0,
            seekable: true,
            bytes_per_second: None,
            chapters: Vec::new(),
        }
    }
}

/// A [`Stream`] over bytes in memory.
///
/// Handy for tests and for data that was downloaded up front. Cloning is cheap,
/// the bytes are shared.
#[derive(Debug, Clone)]
pub struct MemoryStream {
    data: Arc<[u8]>,
    pos: u64,
    opts: MemoryStreamOptions,
}

impl MemoryStream {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self::with_options(data, MemoryStreamOptions::default())
    }

    pub fn with_options(data: impl Into<Arc<[u8]>>, opts: MemoryStreamOptions) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            opts,
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn current_chapter(&self) -> Option<u32> {
        let passed = self
            .opts
            .chapters
            .iter()
            .take_while(|start| **start <= self.pos)
            .count();
        u32::try_from(passed.checked_sub(1)?).ok()
    }
}

impl Stream for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.pos.min(self.len()) as usize;
        let len = buf.len().min(self.data.len() - start);

        buf[..len].copy_from_slice(&self.data[start..start + len]);
        self.pos += len as u64;

        Ok(len)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        if !self.opts.seekable && pos != self.pos {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream is not seekable",
            ));
        }

        self.pos = pos;
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn control(&mut self, req: &mut ControlRequest) -> ControlStatus {
        let len = self.len();

        match (req, self.opts.bytes_per_second) {
            (ControlRequest::SeekToTime(t), Some(bps)) => {
                if !t.is_finite() || *t < 0.0 {
                    return ControlStatus::Error;
                }
                self.pos = ((*t * bps) as u64).min(len);
                ControlStatus::Ok
            }
            (ControlRequest::GetTimeLength(out), Some(bps)) => {
                *out = len as f64 / bps;
                ControlStatus::Ok
            }
            (ControlRequest::GetCurrentTime(out), Some(bps)) => {
                *out = self.pos as f64 / bps;
                ControlStatus::Ok
            }
            (ControlRequest::SeekToChapter(n), _) if !self.opts.chapters.is_empty() => {
                match self.opts.chapters.get(*n as usize) {
                    Some(start) => {
                        self.pos = (*start).min(len);
                        ControlStatus::Ok
                    }
                    None => ControlStatus::Error,
                }
            }
            (ControlRequest::GetNumChapters(out), _) if !self.opts.chapters.is_empty() => {
                *out = self.opts.chapters.len() as u32;
                ControlStatus::Ok
            }
            (ControlRequest::GetCurrentChapter(out), _) if !self.opts.chapters.is_empty() => {
                match self.current_chapter() {
                    Some(n) => {
                        *out = n;
                        ControlStatus::Ok
                    }
                    None => ControlStatus::Error,
                }
            }
            (ControlRequest::GetSize(out), _) => {
                *out = len;
                ControlStatus::Ok
            }
            _ => ControlStatus::Unsupported,
        }
    }

    fn supports_control(&self) -> bool {
        self.opts.bytes_per_second.is_some() || !self.opts.chapters.is_empty()
    }

    fn sector_size(&self) -> usize {
        self.opts.sector_size
    }

    fn read_chunk(&self) -> usize {
        if self.opts.read_chunk == 0 {
            4 * crate::stream::effective_sector_size(self.opts.sector_size)
        } else {
            self.opts.read_chunk
        }
    }

    fn is_seekable(&self) -> bool {
        self.opts.seekable
    }

    fn size(&self) -> Option<u64> {
        Some(self.len())
    }
}
