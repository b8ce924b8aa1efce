//! Suspendable byte-stream plumbing: chunks, the buffered source, and the
//! read/write facades the codecs are built on.

mod chunk;
mod reader;
mod result;
mod source;
mod writer;

pub use chunk::{Chunk, ChunkList};
pub use reader::BufReader;
pub use result::{Io, IoError, IoResult};
pub use source::BufSource;
pub use writer::{BufWriter, BufferWriter, DevNull, VectorWriter, Writer};
