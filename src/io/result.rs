use thiserror::Error;

/// Errors that can occur on the byte-stream layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IoError {
    /// A sink callback refused more data.
    #[error("write aborted by sink")]
    WriteAborted,

    /// Writing is not possible because there is no underlying writer.
    #[error("no underlying writer")]
    NoWriter,

    #[error("{0}")]
    Failed(String),
}

/// Outcome of a non-blocking I/O operation.
///
/// `Pending` means "no data and the source is still open" and is never an
/// error; `Eof` means "no data and the source is closed". Failures travel in
/// the `Err` leg of [`IoResult`] so `?` composes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Io<T> {
    Ready(T),
    Pending,
    Eof,
}

pub type IoResult<T> = Result<Io<T>, IoError>;

impl<T> Io<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Io::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Io::Pending)
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Io::Eof)
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Io<U> {
        match self {
            Io::Ready(v) => Io::Ready(f(v)),
            Io::Pending => Io::Pending,
            Io::Eof => Io::Eof,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_keeps_shape() {
        assert_eq!(Io::Ready(2).map(|n| n * 2), Io::Ready(4));
        assert_eq!(Io::<u32>::Pending.map(|n| n * 2), Io::Pending);
        assert_eq!(Io::<u32>::Eof.map(|n| n * 2), Io::Eof);
    }
}
