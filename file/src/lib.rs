#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(clippy::missing_panics_doc)]
#![warn(clippy::clone_on_ref_ptr)]
#![forbid(unsafe_code)]

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sluice_core::{ControlRequest, ControlStatus, Stream};

mod error;
pub use error::OpenError;

/// Options for a [`FileStream`].
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FileStreamOptions {
    /// The sector size reported to the cache. `0` means the default of 2048.
    pub sector_size: usize,

    /// The largest read the cache should request. `0` means four sectors.
    pub read_chunk: usize,

    /// A constant bitrate for the file's contents. If set, the stream answers
    /// time based control requests.
    pub bytes_per_second: Option<f64>,
}

/// A [`Stream`] reading a file on disk.
///
/// The read position is kept here rather than in the file descriptor, so a
/// copy of the stream in a forked cache worker does not move the parent's
/// position.
pub struct FileStream {
    file: File,
    path: PathBuf,
    pos: u64,
    opts: FileStreamOptions,
}

impl FileStream {
    pub fn open<P: AsRef<Path>>(path: P, opts: FileStreamOptions) -> Result<Self, OpenError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        if !file.metadata()?.is_file() {
            return Err(OpenError::NotAFile(path));
        }

        log::debug!("Opened file stream {:?}", &path);

        Ok(Self {
            file,
            path,
            pos: 0,
            opts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current file length. Files that are still being written grow.
    fn len(&self) -> Option<u64> {
        match self.file.metadata() {
            Ok(meta) => Some(meta.len()),
            Err(e) => {
                log::warn!("Failed to query the size of {:?}: {}", &self.path, e);
                None
            }
        }
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8]) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;

        self.file.read_at(buf, self.pos)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8]) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;

        self.file.seek_read(buf, self.pos)
    }

    #[cfg(not(any(unix, windows)))]
    fn read_at(&self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = &self.file;
        file.seek(SeekFrom::Start(self.pos))?;
        file.read(buf)
    }
}

impl Stream for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.read_at(buf)?;
        self.pos += len as u64;

        Ok(len)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn control(&mut self, req: &mut ControlRequest) -> ControlStatus {
        match (req, self.opts.bytes_per_second) {
            (ControlRequest::SeekToTime(t), Some(bps)) => {
                if !t.is_finite() || *t < 0.0 {
                    return ControlStatus::Error;
                }
                let target = (*t * bps) as u64;
                match self.len() {
                    Some(len) if target <= len => {
                        self.pos = target;
                        ControlStatus::Ok
                    }
                    _ => ControlStatus::Error,
                }
            }
            (ControlRequest::GetTimeLength(out), Some(bps)) => match self.len() {
                Some(len) => {
                    *out = len as f64 / bps;
                    ControlStatus::Ok
                }
                None => ControlStatus::Error,
            },
            (ControlRequest::GetCurrentTime(out), Some(bps)) => {
                *out = self.pos as f64 / bps;
                ControlStatus::Ok
            }
            (ControlRequest::GetSize(out), _) => match self.len() {
                Some(len) => {
                    *out = len;
                    ControlStatus::Ok
                }
                None => ControlStatus::Error,
            },
            _ => ControlStatus::Unsupported,
        }
    }

    fn supports_control(&self) -> bool {
        self.opts.bytes_per_second.is_some()
    }

    fn sector_size(&self) -> usize {
        self.opts.sector_size
    }

    fn read_chunk(&self) -> usize {
        if self.opts.read_chunk == 0 {
            4 * sluice_core::effective_sector_size(self.opts.sector_size)
        } else {
            self.opts.read_chunk
        }
    }

    fn size(&self) -> Option<u64> {
        self.len()
    }
}
