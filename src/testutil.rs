//! Shared test fixtures: synthesized GIF streams and capturing sinks.

use std::cell::RefCell;
use std::rc::Rc;

use crate::io::{Chunk, ChunkList, Io, IoResult, VectorWriter};

/// A `VectorWriter` whose collected bytes stay readable from the test body.
#[derive(Clone, Default)]
pub struct SharedSink {
    data: Rc<RefCell<Vec<u8>>>,
}

impl SharedSink {
    pub fn new() -> SharedSink {
        SharedSink::default()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }
}

impl VectorWriter for SharedSink {
    fn write_vec(&mut self, chunks: ChunkList) -> IoResult<usize> {
        let mut total = 0;
        let mut data = self.data.borrow_mut();
        for chunk in chunks {
            data.extend_from_slice(chunk.data());
            total += chunk.len();
        }
        Ok(Io::Ready(total))
    }
}

/// Splits `bytes` into chunks of the given sizes (the tail of `bytes`
/// becomes one more chunk) for feeding a source piecewise.
pub fn chunked(bytes: &[u8], sizes: &[usize]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut at = 0;
    for &size in sizes {
        let end = (at + size).min(bytes.len());
        if end > at {
            chunks.push(Chunk::copy(&bytes[at..end]));
        }
        at = end;
    }
    if at < bytes.len() {
        chunks.push(Chunk::copy(&bytes[at..]));
    }
    chunks
}

/// Hand-assembled GIF streams.
pub mod gif {
    use byteorder::{ByteOrder, LittleEndian};

    use crate::codecs::gif::LzwEncoder;

    /// Four-colour palette used by all fixtures: red, green, blue, white.
    pub const PALETTE: [[u8; 3]; 4] = [
        [0xFF, 0x00, 0x00],
        [0x00, 0xFF, 0x00],
        [0x00, 0x00, 0xFF],
        [0xFF, 0xFF, 0xFF],
    ];

    fn u16le(value: u16) -> [u8; 2] {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        buf
    }

    /// Signature plus logical screen descriptor, no global colour table.
    pub fn screen_header(width: u16, height: u16) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"GIF89a");
        bytes.extend_from_slice(&u16le(width));
        bytes.extend_from_slice(&u16le(height));
        bytes.push(0x70); // no global table, colour resolution 7
        bytes.push(0x00); // background colour index
        bytes.push(0x00); // pixel aspect ratio
        bytes
    }

    /// Signature, screen descriptor and the four-colour global table.
    pub fn screen_header_with_palette(width: u16, height: u16) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"GIF89a");
        bytes.extend_from_slice(&u16le(width));
        bytes.extend_from_slice(&u16le(height));
        bytes.push(0xF1); // global table of 4, colour resolution 7
        bytes.push(0x00);
        bytes.push(0x00);
        for rgb in PALETTE {
            bytes.extend_from_slice(&rgb);
        }
        bytes
    }

    pub fn lzw_compress(indices: &[u8], data_size: u8) -> Vec<u8> {
        let mut compressed = Vec::new();
        let mut sink = |bytes: &[u8]| {
            compressed.extend_from_slice(bytes);
            true
        };
        let mut encoder = LzwEncoder::new(data_size, 64).expect("fixture code size");
        encoder.encode(indices, &mut sink).expect("fixture encode");
        encoder.finish(&mut sink).expect("fixture finish");
        compressed
    }

    /// Image descriptor + LZW-compressed `indices` wrapped in sub-blocks.
    pub fn image_block(width: u16, height: u16, indices: &[u8]) -> Vec<u8> {
        image_block_at(0, 0, width, height, indices, false)
    }

    /// Like [`image_block`], with an explicit canvas offset and interlace
    /// flag. `indices` must already be in stream order (interlace pass
    /// order for interlaced frames).
    pub fn image_block_at(
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        indices: &[u8],
        interlaced: bool,
    ) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.push(b',');
        bytes.extend_from_slice(&u16le(x));
        bytes.extend_from_slice(&u16le(y));
        bytes.extend_from_slice(&u16le(width));
        bytes.extend_from_slice(&u16le(height));
        bytes.push(if interlaced { 0x40 } else { 0x00 }); // no local table
        bytes.push(2); // minimum code size
        let compressed = lzw_compress(indices, 2);
        for sub_block in compressed.chunks(255) {
            bytes.push(sub_block.len() as u8);
            bytes.extend_from_slice(sub_block);
        }
        bytes.push(0x00);
        bytes
    }

    fn graphic_control(duration_hundredths: u16, transparent: Option<u8>) -> Vec<u8> {
        let mut bytes = vec![b'!', 0xF9, 0x04];
        bytes.push(if transparent.is_some() { 0x01 } else { 0x00 });
        bytes.extend_from_slice(&u16le(duration_hundredths));
        bytes.push(transparent.unwrap_or(0));
        bytes.push(0x00);
        bytes
    }

    fn netscape_loop(loop_count: u16) -> Vec<u8> {
        let mut bytes = vec![b'!', 0xFF, 0x0B];
        bytes.extend_from_slice(b"NETSCAPE2.0");
        bytes.push(0x03);
        bytes.push(0x01);
        bytes.extend_from_slice(&u16le(loop_count));
        bytes.push(0x00);
        bytes
    }

    /// An application extension carrying `payload` under `signature`,
    /// split into sub-blocks of at most 255 bytes.
    pub fn application_extension(signature: &[u8; 11], payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![b'!', 0xFF, 0x0B];
        bytes.extend_from_slice(signature);
        for sub_block in payload.chunks(255) {
            bytes.push(sub_block.len() as u8);
            bytes.extend_from_slice(sub_block);
        }
        bytes.push(0x00);
        bytes
    }

    /// A complete single-frame 2×2 image whose pixels are palette entries
    /// 0, 1, 2, 3 in reading order.
    pub fn single_frame_2x2() -> Vec<u8> {
        let mut bytes = screen_header_with_palette(2, 2);
        bytes.extend_from_slice(&image_block(2, 2, &[0, 1, 2, 3]));
        bytes.push(b';');
        bytes
    }

    /// An animation of `frames` solid-colour frames, 40 ms each, looping
    /// forever. Frame `i` is filled with palette index `i % 4`.
    pub fn animated(width: u16, height: u16, frames: usize, transparent: Option<u8>) -> Vec<u8> {
        let mut bytes = screen_header_with_palette(width, height);
        bytes.extend_from_slice(&netscape_loop(0));
        for i in 0..frames {
            bytes.extend_from_slice(&graphic_control(4, transparent));
            let indices = vec![(i % 4) as u8; width as usize * height as usize];
            bytes.extend_from_slice(&image_block(width, height, &indices));
        }
        bytes.push(b';');
        bytes
    }

    /// A 2×2 image whose image data sub-block ends before the LZW stream
    /// covers the frame.
    pub fn truncated_image_data() -> Vec<u8> {
        let mut bytes = screen_header_with_palette(2, 2);
        bytes.push(b',');
        bytes.extend_from_slice(&u16le(0));
        bytes.extend_from_slice(&u16le(0));
        bytes.extend_from_slice(&u16le(2));
        bytes.extend_from_slice(&u16le(2));
        bytes.push(0x00);
        bytes.push(2); // minimum code size
        let compressed = lzw_compress(&[0, 1, 2, 3], 2);
        // Claim a single byte of image data, then terminate the block.
        bytes.push(0x01);
        bytes.push(compressed[0]);
        bytes.push(0x00);
        bytes.push(b';');
        bytes
    }
}
