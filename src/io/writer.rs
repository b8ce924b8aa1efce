use super::chunk::{Chunk, ChunkList};
use super::result::{Io, IoError, IoResult};

/// A byte sink accepting one chunk at a time.
pub trait Writer {
    fn write(&mut self, chunk: &Chunk) -> IoResult<usize>;
}

/// A byte sink accepting a whole chunk list at once.
pub trait VectorWriter {
    fn write_vec(&mut self, chunks: ChunkList) -> IoResult<usize>;
}

/// Swallows everything.
#[derive(Default)]
pub struct DevNull;

impl Writer for DevNull {
    fn write(&mut self, chunk: &Chunk) -> IoResult<usize> {
        Ok(Io::Ready(chunk.len()))
    }
}

impl VectorWriter for DevNull {
    fn write_vec(&mut self, chunks: ChunkList) -> IoResult<usize> {
        Ok(Io::Ready(chunks.iter().map(Chunk::len).sum()))
    }
}

/// Collecting chunks into a list is itself a form of writing.
impl Writer for ChunkList {
    fn write(&mut self, chunk: &Chunk) -> IoResult<usize> {
        self.push_back(chunk.clone());
        Ok(Io::Ready(chunk.len()))
    }
}

/// Buffers writes into a single fixed-size buffer, flushing to the
/// underlying writer when full.
///
/// A `Pending` from the underlying writer leaves the buffer in a flushing
/// state: further writes are refused until a retry [`BufWriter::flush`]
/// completes. A detached instance (no underlying writer) is used to assemble
/// byte runs whose exact length is known late; the result is taken with
/// [`BufWriter::release_buffer`].
pub struct BufWriter {
    buf_size: usize,
    buffer: Option<Box<[u8]>>,
    start: usize,
    offset: usize,
    flushing: bool,
    underlying: Option<Box<dyn Writer>>,
}

impl BufWriter {
    pub fn new(buf_size: usize, underlying: Box<dyn Writer>) -> BufWriter {
        BufWriter {
            buf_size,
            buffer: None,
            start: 0,
            offset: 0,
            flushing: false,
            underlying: Some(underlying),
        }
    }

    /// A writer with no destination; contents are taken back with
    /// [`BufWriter::release_buffer`].
    pub fn detached(buf_size: usize) -> BufWriter {
        BufWriter {
            buf_size,
            buffer: None,
            start: 0,
            offset: 0,
            flushing: false,
            underlying: None,
        }
    }

    pub fn available(&self) -> usize {
        self.buf_size - self.offset
    }

    pub fn buffered(&self) -> usize {
        self.offset
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> IoResult<usize> {
        if self.flushing {
            return Ok(Io::Pending);
        }
        if self.buffer.is_none() {
            self.buffer = Some(vec![0u8; self.buf_size].into_boxed_slice());
        }

        let mut nwrite = 0;
        loop {
            let take = self.available().min(data.len() - nwrite);
            if let Some(buffer) = self.buffer.as_mut() {
                buffer[self.offset..self.offset + take]
                    .copy_from_slice(&data[nwrite..nwrite + take]);
            }
            self.offset += take;
            nwrite += take;

            if self.available() == 0 {
                match self.flush()? {
                    Io::Pending => return Ok(Io::Ready(nwrite)),
                    _ => {
                        debug_assert_eq!(self.start, 0);
                        debug_assert_eq!(self.offset, 0);
                    }
                }
            }

            if nwrite == data.len() {
                return Ok(Io::Ready(nwrite));
            }
        }
    }

    /// Pushes buffered bytes to the underlying writer, accepting partial
    /// progress. `Pending` keeps the flushing state set.
    pub fn flush(&mut self) -> IoResult<usize> {
        let underlying = match self.underlying.as_mut() {
            Some(w) => w,
            None => return Err(IoError::NoWriter),
        };
        let buffer = match self.buffer.as_ref() {
            Some(b) => b,
            None => return Ok(Io::Ready(0)),
        };

        self.flushing = true;
        let mut nwrite = 0;
        loop {
            let to_write = Chunk::copy(&buffer[self.start..self.offset]);
            match underlying.write(&to_write) {
                Ok(Io::Ready(n)) => {
                    self.start += n;
                    nwrite += n;
                    if self.start == self.offset {
                        self.start = 0;
                        self.offset = 0;
                        self.flushing = false;
                        return Ok(Io::Ready(nwrite));
                    }
                }
                Ok(Io::Pending) => return Ok(Io::Pending),
                Ok(Io::Eof) => {
                    self.flushing = false;
                    return Err(IoError::Failed("write past end of sink".to_string()));
                }
                Err(e) => {
                    self.flushing = false;
                    return Err(e);
                }
            }
        }
    }

    /// Detaches the buffered contents as a chunk and resets the writer.
    pub fn release_buffer(&mut self) -> Chunk {
        let chunk = match self.buffer.take() {
            Some(buffer) => Chunk::own(buffer.into_vec()).slice(self.start, self.offset - self.start),
            None => Chunk::own(Vec::new()),
        };
        self.start = 0;
        self.offset = 0;
        self.flushing = false;
        chunk
    }
}

impl Writer for BufWriter {
    fn write(&mut self, chunk: &Chunk) -> IoResult<usize> {
        self.write_bytes(chunk.data())
    }
}

/// Accumulates written bytes into a growing list of fixed-size chunks.
///
/// Unlike [`BufWriter`] there is no destination: the collected chunks are
/// taken with [`BufferWriter::release_chunks`]. Supports taking back the
/// last `n` written bytes, which the GIF parser needs to strip the XMP magic
/// trailer.
pub struct BufferWriter {
    chunk_size: usize,
    total_size: usize,
    chunks: Vec<Vec<u8>>,
}

impl BufferWriter {
    pub fn new(chunk_size: usize) -> BufferWriter {
        BufferWriter {
            chunk_size: chunk_size.max(1),
            total_size: 0,
            chunks: Vec::new(),
        }
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn write_bytes(&mut self, mut data: &[u8]) -> usize {
        let written = data.len();
        while !data.is_empty() {
            let need_new = match self.chunks.last() {
                Some(last) => last.len() == self.chunk_size,
                None => true,
            };
            if need_new {
                self.chunks.push(Vec::with_capacity(self.chunk_size));
            }
            let last = self.chunks.last_mut().expect("chunk was just ensured");
            let take = (self.chunk_size - last.len()).min(data.len());
            last.extend_from_slice(&data[..take]);
            data = &data[take..];
        }
        self.total_size += written;
        written
    }

    /// Takes back up to `n` bytes from the tail. Returns how many were
    /// removed.
    pub fn unwrite_n(&mut self, n: usize) -> usize {
        let mut left = n;
        while left > 0 {
            let last = match self.chunks.last_mut() {
                Some(last) => last,
                None => break,
            };
            let take = last.len().min(left);
            last.truncate(last.len() - take);
            left -= take;
            if last.is_empty() {
                self.chunks.pop();
            }
        }
        let removed = n - left;
        self.total_size -= removed;
        removed
    }

    /// Hands out everything written so far and resets the writer.
    pub fn release_chunks(&mut self) -> ChunkList {
        self.total_size = 0;
        self.chunks.drain(..).map(Chunk::own).collect()
    }
}
