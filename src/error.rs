use thiserror::Error;

use crate::io::IoError;

/// Failures of the image pipeline. Once an error is produced, the component
/// that produced it is pinned: subsequent calls return the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("image too large")]
    ImageTooLarge,

    #[error("image too small")]
    ImageTooSmall,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("unsupported image format")]
    UnsupportedFormat,

    /// End of stream where more data was required.
    #[error("unexpected end of stream in {0}")]
    UnexpectedEof(String),

    #[error("i/o error: {0}")]
    Io(#[from] IoError),

    /// No encoder can take this image.
    #[error("no encode path: {0}")]
    NoEncodePath(String),

    #[error("read frame error: {0}")]
    ReadFrame(String),

    #[error("write frame error: {0}")]
    WriteFrame(String),

    #[error("{0}")]
    Failed(String),
}

/// What a pumping operation did.
///
/// `Pending` is not an error: the operation is blocked on input or output
/// and the call should be repeated later. `Finished` signals normal
/// termination of an iterative driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Ready,
    Pending,
    Finished,
}

pub type OpResult = Result<Step, Error>;

/// Unwraps `Io::Ready`, returning `Step::Pending` out of the enclosing
/// function on `Io::Pending` and an `UnexpectedEof` error naming `$what` on
/// `Io::Eof`.
macro_rules! try_ready {
    ($io:expr, $what:expr) => {
        match $io? {
            $crate::io::Io::Ready(value) => value,
            $crate::io::Io::Pending => return Ok($crate::error::Step::Pending),
            $crate::io::Io::Eof => {
                return Err($crate::error::Error::UnexpectedEof($what.to_string()))
            }
        }
    };
}

pub(crate) use try_ready;
