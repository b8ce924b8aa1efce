//! GIF-flavoured LZW: variable-width codes read LSB-first, a 4096-entry
//! prefix/suffix dictionary, and clear / end-of-information control codes.
//!
//! See <http://www.matthewflickinger.com/lab/whatsinagif/lzw_image_data.asp>
//! for a walkthrough of the scheme.

use std::collections::HashMap;

use crate::io::{Io, IoError, IoResult};

const MAX_CODE_SIZE: u32 = 12;
const MAX_DICT_SIZE: usize = 1 << MAX_CODE_SIZE;
const NO_CODE: u16 = u16::MAX;

/// Receives decoded (or encoded) bytes in fixed-size slices. Returning
/// false aborts the codec with [`IoError::WriteAborted`].
pub type LzwSink<'a> = &'a mut dyn FnMut(&[u8]) -> bool;

/// A dictionary entry is some earlier entry plus one byte, so it is stored
/// as a prefix reference and a suffix byte; `len` caches the reconstructed
/// length so output can be written right-to-left in one pass.
#[derive(Clone, Copy, Default)]
struct Entry {
    prefix: u16,
    len: u16,
    suffix: u8,
}

pub struct LzwDecoder {
    data_size: u32,
    clear_code: u16,
    eoi: u16,

    dict: Vec<Entry>,
    next_entry: usize,

    // Previous code and the first byte of its sequence, for dictionary
    // construction and the KwKwK case.
    prev_code: u16,
    prev_first_byte: u8,

    // LSB-first shift buffer over the input byte stream.
    bit_buffer: u32,
    unread_bits: u32,
    code_size: u32,
    code_mask: u32,

    output: Vec<u8>,
    output_len: usize,
    chunk_size: usize,
}

impl LzwDecoder {
    /// `data_size` is the GIF minimum code size; codes start at
    /// `data_size + 1` bits. Output is handed to the sink in
    /// `output_chunk_size`-byte slices (typically the image row width).
    pub fn new(data_size: u8, output_chunk_size: usize) -> Result<LzwDecoder, IoError> {
        if u32::from(data_size) > MAX_CODE_SIZE {
            return Err(IoError::Failed(format!(
                "unsupported LZW minimum code size {data_size}"
            )));
        }
        let data_size = u32::from(data_size);
        let clear_code = 1u16 << data_size;
        let chunk_size = output_chunk_size.max(1);

        let mut dict = vec![Entry::default(); MAX_DICT_SIZE];
        for (i, entry) in dict.iter_mut().enumerate().take(clear_code as usize) {
            *entry = Entry {
                prefix: NO_CODE,
                len: 1,
                suffix: i as u8,
            };
        }

        let mut decoder = LzwDecoder {
            data_size,
            clear_code,
            eoi: clear_code + 1,
            dict,
            next_entry: 0,
            prev_code: NO_CODE,
            prev_first_byte: 0,
            bit_buffer: 0,
            unread_bits: 0,
            code_size: 0,
            code_mask: 0,
            output: vec![0; chunk_size + MAX_DICT_SIZE],
            output_len: 0,
            chunk_size,
        };
        decoder.reset();
        Ok(decoder)
    }

    fn reset(&mut self) {
        self.code_size = self.data_size + 1;
        self.code_mask = (1 << self.code_size) - 1;
        self.next_entry = self.eoi as usize + 1;
        self.prev_code = NO_CODE;
        self.prev_first_byte = 0;
    }

    /// Decodes `data`, pushing output rows into `sink`. Returns
    /// `Io::Ready(data.len())` when the input is exhausted and
    /// `Io::Eof` when the end-of-information code was seen.
    pub fn decode(&mut self, data: &[u8], sink: LzwSink<'_>) -> IoResult<usize> {
        let mut input = data.iter();
        loop {
            while self.unread_bits < self.code_size {
                match input.next() {
                    Some(&byte) => {
                        self.bit_buffer |= u32::from(byte) << self.unread_bits;
                        self.unread_bits += 8;
                    }
                    None => return Ok(Io::Ready(data.len())),
                }
            }
            let code = (self.bit_buffer & self.code_mask) as u16;
            self.bit_buffer >>= self.code_size;
            self.unread_bits -= self.code_size;

            if code == self.clear_code {
                self.reset();
                continue;
            }
            if code == self.eoi {
                self.flush_full_chunks(sink)?;
                return Ok(Io::Eof);
            }

            self.output_code(code)?;
            self.update_dictionary();

            // Grow once the next code to be assigned stops fitting.
            if self.next_entry < MAX_DICT_SIZE && self.next_entry as u32 > self.code_mask {
                self.code_size += 1;
                self.code_mask = (1 << self.code_size) - 1;
            }

            self.prev_code = code;
            self.flush_full_chunks(sink)?;
        }
    }

    /// Reconstructs the byte sequence for `code` at the tail of the output
    /// buffer, walking prefix references right-to-left.
    fn output_code(&mut self, code: u16) -> Result<(), IoError> {
        if (code as usize) < self.next_entry {
            let len = self.dict[code as usize].len as usize;
            let end = self.output_len + len;
            self.write_sequence(code, end);
            self.output_len = end;
        } else if code as usize == self.next_entry && self.prev_code != NO_CODE {
            // The classic KwKwK case: the sequence is the previous one
            // followed by its own first byte.
            let len = self.dict[self.prev_code as usize].len as usize + 1;
            let end = self.output_len + len;
            self.output[end - 1] = self.prev_first_byte;
            self.write_sequence(self.prev_code, end - 1);
            self.output_len = end;
        } else {
            return Err(IoError::Failed("invalid LZW code".to_string()));
        }
        Ok(())
    }

    fn write_sequence(&mut self, mut code: u16, end: usize) {
        let mut at = end;
        while code >= self.clear_code {
            let entry = self.dict[code as usize];
            at -= 1;
            self.output[at] = entry.suffix;
            code = entry.prefix;
        }
        let first = self.dict[code as usize].suffix;
        at -= 1;
        self.output[at] = first;
        self.prev_first_byte = first;
    }

    fn update_dictionary(&mut self) {
        if self.next_entry < MAX_DICT_SIZE && self.prev_code != NO_CODE {
            self.dict[self.next_entry] = Entry {
                prefix: self.prev_code,
                len: self.dict[self.prev_code as usize].len + 1,
                suffix: self.prev_first_byte,
            };
            self.next_entry += 1;
        }
    }

    fn flush_full_chunks(&mut self, sink: LzwSink<'_>) -> Result<(), IoError> {
        let mut start = 0;
        while self.output_len - start >= self.chunk_size {
            if !sink(&self.output[start..start + self.chunk_size]) {
                return Err(IoError::WriteAborted);
            }
            start += self.chunk_size;
        }
        if start > 0 {
            self.output.copy_within(start..self.output_len, 0);
            self.output_len -= start;
        }
        Ok(())
    }
}

pub struct LzwEncoder {
    data_size: u32,
    clear_code: u16,
    eoi: u16,
    next_code: u16,

    code_size: u32,

    table: HashMap<Vec<u8>, u16>,
    index_buffer: Vec<u8>,
    started: bool,

    bit_buffer: u32,
    bits_in_buffer: u32,

    output: Vec<u8>,
    chunk_size: usize,
}

impl LzwEncoder {
    pub fn new(data_size: u8, output_chunk_size: usize) -> Result<LzwEncoder, IoError> {
        if u32::from(data_size) > MAX_CODE_SIZE {
            return Err(IoError::Failed(format!(
                "unsupported LZW minimum code size {data_size}"
            )));
        }
        let data_size = u32::from(data_size);
        let clear_code = 1u16 << data_size;
        let mut encoder = LzwEncoder {
            data_size,
            clear_code,
            eoi: clear_code + 1,
            next_code: clear_code + 2,
            code_size: data_size + 1,
            table: HashMap::new(),
            index_buffer: Vec::new(),
            started: false,
            bit_buffer: 0,
            bits_in_buffer: 0,
            output: Vec::with_capacity(output_chunk_size.max(1)),
            chunk_size: output_chunk_size.max(1),
        };
        encoder.seed_table();
        Ok(encoder)
    }

    fn seed_table(&mut self) {
        self.table.clear();
        for i in 0..self.clear_code {
            self.table.insert(vec![i as u8], i);
        }
    }

    pub fn encode(&mut self, data: &[u8], sink: LzwSink<'_>) -> IoResult<usize> {
        let mut input = data.iter();

        if !self.started {
            let first = match input.next() {
                Some(&first) => first,
                None => return Ok(Io::Ready(0)),
            };
            if u16::from(first) >= self.clear_code {
                return Err(IoError::Failed("LZW symbol out of range".to_string()));
            }
            self.started = true;
            self.emit(self.clear_code, sink)?;
            self.index_buffer.push(first);
        }

        for &symbol in input {
            if u16::from(symbol) >= self.clear_code {
                return Err(IoError::Failed("LZW symbol out of range".to_string()));
            }
            self.index_buffer.push(symbol);
            if self.table.contains_key(&self.index_buffer) {
                continue;
            }

            let new_entry = std::mem::take(&mut self.index_buffer);
            let prefix_code = match self.table.get(&new_entry[..new_entry.len() - 1]) {
                Some(&code) => code,
                None => return Err(IoError::Failed("LZW index buffer lost".to_string())),
            };

            // The prefix goes out at the current width; only then may the
            // table change the width for subsequent codes.
            self.emit(prefix_code, sink)?;
            let assigned = self.next_code;
            self.table.insert(new_entry, assigned);
            self.next_code += 1;

            if self.next_code as usize == MAX_DICT_SIZE {
                // Table full: reset, as the decoder will on the clear code.
                self.emit(self.clear_code, sink)?;
                self.code_size = self.data_size + 1;
                self.next_code = self.eoi + 1;
                self.seed_table();
            } else if u32::from(assigned) == 1 << self.code_size {
                self.code_size += 1;
            }

            self.index_buffer.push(symbol);
        }

        Ok(Io::Ready(data.len()))
    }

    /// Emits the trailing code, the end-of-information code, and any
    /// remaining bits, then drains the output buffer.
    pub fn finish(&mut self, sink: LzwSink<'_>) -> IoResult<usize> {
        if !self.started {
            self.emit(self.clear_code, sink)?;
        } else if !self.index_buffer.is_empty() {
            let code = match self.table.get(&self.index_buffer[..]) {
                Some(&code) => code,
                None => return Err(IoError::Failed("LZW index buffer lost".to_string())),
            };
            self.emit(code, sink)?;
            self.index_buffer.clear();
        }
        self.emit(self.eoi, sink)?;

        if self.bits_in_buffer > 0 {
            // Pad the final partial byte with zero bits on the high side,
            // where the decoder's LSB-first reads never reach.
            let byte = (self.bit_buffer & 0xFF) as u8;
            self.push_byte(byte, sink)?;
            self.bit_buffer = 0;
            self.bits_in_buffer = 0;
        }

        let flushed = self.output.len();
        if !self.output.is_empty() {
            if !sink(&self.output) {
                return Err(IoError::WriteAborted);
            }
            self.output.clear();
        }
        Ok(Io::Ready(flushed))
    }

    fn emit(&mut self, code: u16, sink: LzwSink<'_>) -> Result<(), IoError> {
        debug_assert!(self.bits_in_buffer < 8);
        self.bit_buffer |= u32::from(code) << self.bits_in_buffer;
        self.bits_in_buffer += self.code_size;
        while self.bits_in_buffer >= 8 {
            let byte = (self.bit_buffer & 0xFF) as u8;
            self.bit_buffer >>= 8;
            self.bits_in_buffer -= 8;
            self.push_byte(byte, sink)?;
        }
        Ok(())
    }

    fn push_byte(&mut self, byte: u8, sink: LzwSink<'_>) -> Result<(), IoError> {
        self.output.push(byte);
        if self.output.len() == self.chunk_size {
            if !sink(&self.output) {
                return Err(IoError::WriteAborted);
            }
            self.output.clear();
        }
        Ok(())
    }
}
