//! Error taxonomy for the reactor: argument errors, resource errors, and
//! the wire-level `ErrorCode` that crosses completion-callback boundaries.

/// Reserved `ErrorCode` values, matching the wire protocol's conventions.
pub const TIMEOUT: ErrorCode = 1024;
pub const CLOSE: ErrorCode = 1025;

/// The signed-integer result code carried by completion callbacks and
/// `on_error`/`on_close` handlers. Negative values mirror POSIX errno;
/// `TIMEOUT`/`CLOSE` are reserved positive values; zero is success.
pub type ErrorCode = i32;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("priority or event type out of range")]
    OutOfRange,
    #[error("invalid argument")]
    Invalid,
    #[error("no handler registered for this event type")]
    NoHandler,
    #[error("out of memory")]
    OutOfMemory,
    #[error("descriptor already registered")]
    AlreadyRegistered,
    #[error("not found")]
    NotFound,
    #[error("operation timed out")]
    Timeout,
    #[error("peer closed the connection")]
    Close,
    #[error("not implemented")]
    NotImplemented,
    #[error("errno {0}")]
    Errno(i32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Maps this error onto its wire-level `ErrorCode`.
    pub fn to_code(&self) -> ErrorCode {
        match self {
            Error::OutOfRange => -libc::ERANGE,
            Error::Invalid => -libc::EINVAL,
            Error::NoHandler => -libc::ENOENT,
            Error::OutOfMemory => -libc::ENOMEM,
            Error::AlreadyRegistered => -libc::EEXIST,
            Error::NotFound => -libc::ENOENT,
            Error::Timeout => TIMEOUT,
            Error::Close => CLOSE,
            Error::NotImplemented => -libc::ENOSYS,
            Error::Errno(errno) => -errno.abs(),
            Error::Io(io) => io.raw_os_error().map(|c| -c).unwrap_or(-libc::EIO),
        }
    }
}

impl From<Error> for ErrorCode {
    fn from(e: Error) -> ErrorCode {
        e.to_code()
    }
}

impl From<&Error> for ErrorCode {
    fn from(e: &Error) -> ErrorCode {
        e.to_code()
    }
}
