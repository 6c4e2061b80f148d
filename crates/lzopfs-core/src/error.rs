//! Error kinds for archive parsing and reading.
//!
//! Modeled by hand, in the same style as `decmpfs::DecodeError` in the
//! teacher codebase this crate is grounded on, rather than via `thiserror`.

use std::{fmt, io};

/// Everything that can go wrong while registering or reading an archive.
#[derive(Debug)]
pub enum Error {
    /// The archive violates its format specification.
    Format { path: String, message: String },
    /// An underlying OS failure.
    Io(io::Error),
    /// Unexpected end of file during a header or block scan.
    ///
    /// Always promoted to [`Error::Format`] before it reaches a caller
    /// outside this crate; kept as a distinct variant internally so parsing
    /// code can tell truncation apart from other IO failures.
    Eof,
    /// The LZO decoder rejected a block's compressed payload.
    Decode { path: String, message: String },
    /// An open was attempted with a non-read-only mode.
    AccessDenied,
    /// The requested virtual path has no registered archive.
    NotFound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Format { path, message } => write!(f, "{path}: {message}"),
            Error::Io(e) => write!(f, "{e}"),
            Error::Eof => f.write_str("unexpected end of file"),
            Error::Decode { path, message } => write!(f, "{path}: decode error: {message}"),
            Error::AccessDenied => f.write_str("access denied"),
            Error::NotFound => f.write_str("no such file"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::Eof
        } else {
            Error::Io(e)
        }
    }
}

impl Error {
    pub fn format(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn decode(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Decode {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Maps this error to the negative `errno` value FUSE expects from a
    /// `read` callback.
    #[must_use]
    pub fn to_fuse_errno(&self) -> i32 {
        match self {
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::Eof | Error::Format { .. } | Error::Decode { .. } => libc::EIO,
            Error::AccessDenied => libc::EACCES,
            Error::NotFound => libc::ENOENT,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
