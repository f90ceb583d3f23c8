use std::{fmt, io};

#[derive(Debug)]
pub enum SpzError {
    /// The underlying source or sink failed, or the gzip stream is corrupt.
    Io(io::Error),
    InvalidMagic(u32),
    UnsupportedVersion(u32),
    /// The decompressed stream ended before the header or a section was filled.
    UnexpectedEof,
}

impl SpzError {
    /// Maps a failed `read_exact` into the reader's error kinds.
    pub(crate) fn from_read(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SpzError::UnexpectedEof
        } else {
            SpzError::Io(e)
        }
    }
}

impl fmt::Display for SpzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpzError::Io(e) => {
                write!(f, "An I/O error occurred: {}", e)
            }
            SpzError::InvalidMagic(magic) => {
                write!(
                    f,
                    "Invalid magic number: expected {:#010x}, found {:#010x}",
                    crate::structures::MAGIC,
                    magic
                )
            }
            SpzError::UnsupportedVersion(version) => {
                write!(f, "Unsupported SPZ version {} (expected 2 or 3)", version)
            }
            SpzError::UnexpectedEof => {
                write!(f, "Unexpected end of SPZ data")
            }
        }
    }
}

impl std::error::Error for SpzError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SpzError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SpzError {
    fn from(e: io::Error) -> Self {
        SpzError::Io(e)
    }
}
