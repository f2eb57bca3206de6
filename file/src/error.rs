use std::io;
use std::path::PathBuf;

/// An error while opening a file stream.
#[derive(Debug)]
pub enum OpenError {
    /// IO error
    Io(io::Error),
    /// The path exists but is not a regular file.
    NotAFile(PathBuf),
}

impl std::error::Error for OpenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OpenError::Io(e) => Some(e),
            OpenError::NotAFile(_) => None,
        }
    }
}

impl std::fmt::Display for OpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenError::Io(e) => write!(f, "IO error: {}", e),
            OpenError::NotAFile(path) => write!(f, "{:?} is not a regular file", path),
        }
    }
}

impl From<io::Error> for OpenError {
    fn from(e: io::Error) -> Self {
        OpenError::Io(e)
    }
}
