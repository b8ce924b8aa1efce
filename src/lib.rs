//! Streaming image optimization: decode JPEG, PNG, GIF or WebP from a
//! chunked byte source and re-encode as WebP, preserving animation frames
//! and ICC/EXIF/XMP metadata.
//!
//! The pipeline is a cooperative state machine. Nothing blocks: every
//! stage reports `Pending` when its input runs dry and resumes where it
//! left off once more bytes arrive, so arbitrarily large images can be
//! processed without buffering the whole input up front.
//!
//! ```no_run
//! use webpipe::io::{BufReader, BufSource, Chunk, ChunkList, Io, IoResult, VectorWriter};
//! use webpipe::optimize::{ConvertToWebpStrategy, ImageOptimizer};
//! use webpipe::Step;
//!
//! struct Stdout;
//! impl VectorWriter for Stdout {
//!     fn write_vec(&mut self, chunks: ChunkList) -> IoResult<usize> {
//!         use std::io::Write;
//!         let mut total = 0;
//!         for chunk in chunks {
//!             std::io::stdout().write_all(chunk.data()).unwrap();
//!             total += chunk.len();
//!         }
//!         Ok(Io::Ready(total))
//!     }
//! }
//!
//! let mut optimizer = ImageOptimizer::new(
//!     Box::<ConvertToWebpStrategy>::default(),
//!     BufReader::new(BufSource::new()),
//!     Box::new(Stdout),
//! );
//! optimizer.add_input_chunk(Chunk::copy(&std::fs::read("in.gif").unwrap()));
//! optimizer.send_eof();
//! while optimizer.process().unwrap() != Step::Finished {}
//! ```

pub mod codecs;
mod decoder;
mod error;
mod frame;
mod info;
pub mod io;
mod metadata;
pub mod optimize;
mod reading;
mod writing;

#[cfg(test)]
pub(crate) mod testutil;

pub use decoder::{DecodeParams, ImageDecoder};
pub use error::{Error, OpResult, Step};
pub use frame::{ColorScheme, DisposalMethod, FrameStatus, ImageFrame};
pub use info::{ImageFormat, ImageInfo};
pub use metadata::{ImageMetadata, MetadataKind};
pub use reading::{DecodingReader, ImageReader};
pub use writing::{
    ImageEncoder, ImageWriter, MultiFrameWriter, OptimizationStats, SingleFrameWriter,
};
