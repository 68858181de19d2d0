//! Devfs error types.

use std::io;

use devfs_types::LayoutError;
use thiserror::Error;

/// Devfs error type.
///
/// `Clone` so the driver registry can replay a recorded load outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DevfsError {
    /// Path, name or node ID does not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// Something already occupies the target name.
    #[error("already exists: {0}")]
    FileExists(String),

    /// Node is of the wrong kind for the operation.
    #[error("wrong node type: {0}")]
    BadType(String),

    /// Malformed or disallowed argument.
    #[error("bad value: {0}")]
    BadValue(String),

    /// Structurally disallowed operation.
    #[error("not allowed: {0}")]
    NotAllowed(String),

    /// Allocation failure (node ID space or cookie space exhausted).
    #[error("out of memory")]
    NoMemory,

    /// Deliberately unimplemented operation.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// New entries cannot be created through the VFS.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Caller's buffer cannot hold the result.
    #[error("buffer too small, {needed} bytes needed")]
    BufferOverflow { needed: usize },

    /// Status reported by a driver, passed through unchanged.
    #[error("driver error {code}: {message}")]
    Driver { code: i32, message: String },
}

impl DevfsError {
    /// Create a NotFound error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a FileExists error.
    pub fn file_exists(what: impl Into<String>) -> Self {
        Self::FileExists(what.into())
    }

    /// Create a BadType error.
    pub fn bad_type(what: impl Into<String>) -> Self {
        Self::BadType(what.into())
    }

    /// Create a BadValue error.
    pub fn bad_value(what: impl Into<String>) -> Self {
        Self::BadValue(what.into())
    }

    /// Create a NotAllowed error.
    pub fn not_allowed(what: impl Into<String>) -> Self {
        Self::NotAllowed(what.into())
    }

    /// Create a NotSupported error.
    pub fn not_supported(what: impl Into<String>) -> Self {
        Self::NotSupported(what.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(what: impl Into<String>) -> Self {
        Self::NotADirectory(what.into())
    }

    /// Create a driver error carrying the driver's own status code.
    pub fn driver(code: i32, message: impl Into<String>) -> Self {
        Self::Driver {
            code,
            message: message.into(),
        }
    }

    /// The POSIX errno a VFS caller sees for this error.
    pub fn errno(&self) -> i32 {
        match self {
            DevfsError::NotFound(_) => libc::ENOENT,
            DevfsError::FileExists(_) => libc::EEXIST,
            DevfsError::BadType(_) => libc::EPROTOTYPE,
            DevfsError::BadValue(_) => libc::EINVAL,
            DevfsError::NotAllowed(_) => libc::EPERM,
            DevfsError::NoMemory => libc::ENOMEM,
            DevfsError::NotSupported(_) => libc::EOPNOTSUPP,
            DevfsError::NotADirectory(_) => libc::ENOTDIR,
            DevfsError::ReadOnly => libc::EROFS,
            DevfsError::BufferOverflow { .. } => libc::EOVERFLOW,
            DevfsError::Driver { code, .. } => *code,
        }
    }
}

impl From<LayoutError> for DevfsError {
    fn from(e: LayoutError) -> Self {
        DevfsError::BadValue(e.to_string())
    }
}

/// Driver image stat failures and I/O errors raised inside drivers.
impl From<io::Error> for DevfsError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => DevfsError::NotFound(e.to_string()),
            io::ErrorKind::PermissionDenied => DevfsError::NotAllowed(e.to_string()),
            _ => DevfsError::Driver {
                code: e.raw_os_error().unwrap_or(libc::EIO),
                message: e.to_string(),
            },
        }
    }
}

/// Convert DevfsError to std::io::Error for callers living in std land.
impl From<DevfsError> for io::Error {
    fn from(e: DevfsError) -> Self {
        match e {
            DevfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            DevfsError::FileExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            DevfsError::BadType(msg) | DevfsError::BadValue(msg) => {
                io::Error::new(io::ErrorKind::InvalidInput, msg)
            }
            DevfsError::NotAllowed(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            DevfsError::NoMemory => io::Error::new(io::ErrorKind::OutOfMemory, "out of memory"),
            DevfsError::NotSupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            DevfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            DevfsError::ReadOnly => {
                io::Error::new(io::ErrorKind::ReadOnlyFilesystem, "filesystem is read-only")
            }
            e @ DevfsError::BufferOverflow { .. } => {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            }
            DevfsError::Driver { code, .. } => io::Error::from_raw_os_error(code),
        }
    }
}

/// Devfs result type.
pub type DevfsResult<T> = Result<T, DevfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(DevfsError::not_found("x").errno(), libc::ENOENT);
        assert_eq!(DevfsError::file_exists("x").errno(), libc::EEXIST);
        assert_eq!(DevfsError::ReadOnly.errno(), libc::EROFS);
        assert_eq!(DevfsError::driver(-42, "busted").errno(), -42);
    }

    #[test]
    fn test_io_conversion() {
        let io_err: io::Error = DevfsError::not_a_directory("disk").into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotADirectory);

        let io_err: io::Error = DevfsError::driver(libc::EIO, "media").into();
        assert_eq!(io_err.raw_os_error(), Some(libc::EIO));

        let back: DevfsError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(back, DevfsError::NotFound(_)));
    }
}
