use std::fmt;
use std::sync::Arc;

/// A contiguous byte range with shared-ownership backing storage.
///
/// Cloning and slicing are cheap: both share the underlying buffer, and a
/// slice keeps its parent's buffer alive for as long as the slice exists.
#[derive(Clone)]
pub struct Chunk {
    buf: Arc<[u8]>,
    start: usize,
    len: usize,
}

/// An ordered sequence of chunks, appended at the tail and consumed from the
/// head. The unit of vectored I/O.
pub type ChunkList = std::collections::VecDeque<Chunk>;

impl Chunk {
    /// Copies `data` into a freshly owned chunk.
    pub fn copy(data: &[u8]) -> Chunk {
        Chunk::own(data.to_vec())
    }

    /// Takes ownership of `data` without copying.
    pub fn own(data: Vec<u8>) -> Chunk {
        let len = data.len();
        Chunk {
            buf: Arc::from(data),
            start: 0,
            len,
        }
    }

    pub fn from_string(data: String) -> Chunk {
        Chunk::own(data.into_bytes())
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.start + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns a chunk covering `[start, start + len)` of this one. The
    /// result shares this chunk's storage.
    ///
    /// # Panics
    ///
    /// Panics if the requested range is out of bounds.
    pub fn slice(&self, start: usize, len: usize) -> Chunk {
        assert!(start + len <= self.len, "chunk slice out of bounds");
        Chunk {
            buf: Arc::clone(&self.buf),
            start: self.start + start,
            len,
        }
    }

    /// Copies all chunks of `list` into one owned contiguous chunk.
    pub fn merge<'a, I>(list: I) -> Chunk
    where
        I: IntoIterator<Item = &'a Chunk>,
    {
        let mut data = Vec::new();
        for chunk in list {
            data.extend_from_slice(chunk.data());
        }
        Chunk::own(data)
    }

    /// Copies this chunk's bytes out into an independent buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data().to_vec()
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk").field("len", &self.len).finish()
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}
