use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use super::lzw::LzwDecoder;
use super::{ColorTable, GifFrame, GifImage, GIF87A, GIF89A};
use crate::error::{try_ready, Error, OpResult, Step};
use crate::frame::DisposalMethod;
use crate::io::{BufReader, BufferWriter, Io};
use crate::metadata::MetadataKind;

/// XMP in GIF carries a 257-byte "magic" suffix that makes the sub-block
/// lengths self-describing; it is stripped from the payload.
const XMP_MAGIC_TRAILER_LEN: usize = 257;

const EXTENSION_INTRODUCER: u8 = b'!';
const IMAGE_SEPARATOR: u8 = b',';
const TRAILER: u8 = b';';

const GRAPHIC_CONTROL_LABEL: u8 = 0xF9;
const PLAIN_TEXT_LABEL: u8 = 0x01;
const APPLICATION_LABEL: u8 = 0xFF;
const COMMENT_LABEL: u8 = 0xFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Version,
    ScreenDescriptor,
    GlobalColorTable,
    BlockType,
    ExtensionType,
    SubBlockLength,
    BlockData,
    ImageDescriptor,
    LocalColorTable,
    MinimumCodeSize,
    Done,
}

/// What the body of the current sub-block means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Control,
    Application,
    Netscape,
    Metadata(MetadataKind),
    LzwData,
    Skip,
}

/// Builds one frame: collects control-extension attributes, then pumps the
/// LZW stream into the palette-index buffer, row by row.
struct FrameBuilder {
    frame: GifFrame,
    lzw: Option<LzwDecoder>,
    current_row: u32,
    interlace_pass: usize,
    rows_written: u32,
    eoi_seen: bool,
}

/// Row schedule for interlaced frames: pass start rows and steps.
const INTERLACE: [(u32, u32); 4] = [(0, 8), (4, 8), (2, 4), (1, 2)];

impl FrameBuilder {
    fn new() -> FrameBuilder {
        FrameBuilder {
            frame: GifFrame::new(),
            lzw: None,
            current_row: 0,
            interlace_pass: 0,
            rows_written: 0,
            eoi_seen: false,
        }
    }

    fn init_decoder(&mut self, minimum_code_size: u8) -> Result<(), Error> {
        let row = self.frame.width as usize;
        self.lzw = Some(
            LzwDecoder::new(minimum_code_size, row)
                .map_err(|_| Error::Decode("too big minimum code size".to_string()))?,
        );
        Ok(())
    }

    fn process_image_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.eoi_seen {
            // Trailing bytes after the end-of-information code; GIFs in the
            // wild have them, they mean nothing.
            return Ok(());
        }
        let FrameBuilder {
            frame,
            lzw,
            current_row,
            interlace_pass,
            rows_written,
            ..
        } = self;
        let lzw = match lzw.as_mut() {
            Some(lzw) => lzw,
            None => return Err(Error::Decode("image data before code size".to_string())),
        };

        let width = frame.width as usize;
        let height = u32::from(frame.height);
        let interlaced = frame.interlaced;
        let mut sink = |row: &[u8]| -> bool {
            if row.len() < width || *current_row >= height {
                return false;
            }
            if frame.data.is_empty() {
                frame.data = vec![0; width * height as usize];
            }
            let at = *current_row as usize * width;
            frame.data[at..at + width].copy_from_slice(&row[..width]);
            *rows_written += 1;

            if !interlaced {
                *current_row += 1;
            } else {
                *current_row += INTERLACE[*interlace_pass].1;
                while *current_row >= height && *interlace_pass < 3 {
                    *interlace_pass += 1;
                    *current_row = INTERLACE[*interlace_pass].0;
                }
            }
            true
        };

        match lzw.decode(data, &mut sink) {
            Ok(Io::Ready(_)) => Ok(()),
            Ok(Io::Eof) => {
                self.eoi_seen = true;
                if self.rows_written < u32::from(self.frame.height) {
                    Err(Error::Decode("Image data too short".to_string()))
                } else {
                    Ok(())
                }
            }
            Ok(Io::Pending) => Ok(()),
            Err(e) => Err(Error::Decode(format!("LZW stream error: {e}"))),
        }
    }

    /// Validates completeness and hands the frame over.
    fn finish(self) -> Result<GifFrame, Error> {
        if self.rows_written < u32::from(self.frame.height) {
            return Err(Error::Decode("Image data too short".to_string()));
        }
        Ok(self.frame)
    }
}

/// The GIF block/sub-block state machine.
///
/// A push parser: each call to [`GifParser::parse`] consumes whatever the
/// source has and returns `Pending` when it runs dry, keeping its position
/// in the block structure. [`GifParser::parse_header`] runs the same
/// machine but stops at the first image descriptor.
pub struct GifParser {
    state: State,
    block_kind: BlockKind,
    image: GifImage,
    error: Option<Error>,
    complete: bool,
    header_complete: bool,
    screen_complete: bool,
    remaining_block: usize,
    /// Set while the tail of the current sub-block is being discarded;
    /// cleared when the next sub-block length is due.
    skip_remainder: bool,
    frame_builder: Option<FrameBuilder>,
    metadata_writer: Option<BufferWriter>,
}

impl Default for GifParser {
    fn default() -> Self {
        GifParser::new()
    }
}

impl GifParser {
    pub fn new() -> GifParser {
        GifParser {
            state: State::Version,
            block_kind: BlockKind::Skip,
            image: GifImage::new(),
            error: None,
            complete: false,
            header_complete: false,
            screen_complete: false,
            remaining_block: 0,
            skip_remainder: false,
            frame_builder: None,
            metadata_writer: None,
        }
    }

    pub fn image(&self) -> &GifImage {
        &self.image
    }

    /// True once the logical screen descriptor is known (dimensions are
    /// valid).
    pub fn screen_complete(&self) -> bool {
        self.screen_complete
    }

    /// True once the first image descriptor was seen.
    pub fn header_complete(&self) -> bool {
        self.header_complete
    }

    pub fn complete(&self) -> bool {
        self.complete
    }

    /// Runs the machine until the first image descriptor.
    pub fn parse_header(&mut self, source: &mut BufReader) -> OpResult {
        self.run(source, true)
    }

    /// Runs the machine until it blocks, fails, or reaches the trailer.
    pub fn parse(&mut self, source: &mut BufReader) -> OpResult {
        self.run(source, false)
    }

    fn run(&mut self, source: &mut BufReader, header_only: bool) -> OpResult {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if self.complete || (header_only && self.header_complete) {
            return Ok(Step::Finished);
        }
        loop {
            match self.step(source, header_only) {
                Ok(Step::Ready) => continue,
                Ok(done) => return Ok(done),
                Err(error) => {
                    self.error = Some(error.clone());
                    return Err(error);
                }
            }
        }
    }

    fn step(&mut self, source: &mut BufReader, header_only: bool) -> OpResult {
        match self.state {
            State::Version => self.parse_version(source),
            State::ScreenDescriptor => self.parse_screen_descriptor(source),
            State::GlobalColorTable => {
                let table = match self.image.global_color_table.as_mut() {
                    Some(table) => table,
                    None => return Err(Error::Decode("missing global color table".to_string())),
                };
                match build_color_table(source, table)? {
                    Step::Ready => {
                        self.state = State::BlockType;
                        Ok(Step::Ready)
                    }
                    other => Ok(other),
                }
            }
            State::BlockType => self.parse_block_type(source),
            State::ExtensionType => self.parse_extension_type(source),
            State::SubBlockLength => self.parse_sub_block_length(source),
            State::BlockData => self.parse_block_data(source),
            State::ImageDescriptor => self.parse_image_descriptor(source, header_only),
            State::LocalColorTable => {
                let table = match self
                    .frame_builder
                    .as_mut()
                    .and_then(|b| b.frame.local_color_table.as_mut())
                {
                    Some(table) => table,
                    None => return Err(Error::Decode("missing local color table".to_string())),
                };
                match build_color_table(source, table)? {
                    Step::Ready => {
                        self.state = State::MinimumCodeSize;
                        Ok(Step::Ready)
                    }
                    other => Ok(other),
                }
            }
            State::MinimumCodeSize => self.parse_minimum_code_size(source),
            State::Done => Ok(Step::Finished),
        }
    }

    fn parse_version(&mut self, source: &mut BufReader) -> OpResult {
        let mut signature = [0u8; 6];
        try_ready!(source.read_n_into(&mut signature), "GIF signature");
        if &signature == GIF89A {
            self.image.version = 89;
        } else if &signature == GIF87A {
            self.image.version = 87;
        } else {
            return Err(Error::Decode("Unknown GIF version".to_string()));
        }
        self.state = State::ScreenDescriptor;
        Ok(Step::Ready)
    }

    fn parse_screen_descriptor(&mut self, source: &mut BufReader) -> OpResult {
        let mut buf = [0u8; 7];
        try_ready!(source.read_n_into(&mut buf), "GIF logical screen descriptor");

        self.image.screen_width = LittleEndian::read_u16(&buf[0..2]);
        self.image.screen_height = LittleEndian::read_u16(&buf[2..4]);
        let packed = buf[4];
        let background = buf[5];
        // buf[6] is the pixel aspect ratio, which nothing renders.

        self.image.color_resolution = (packed & 0x70) >> 4;

        let global_table_len = 1usize << ((packed & 0x07) + 1);
        if packed & 0x80 != 0 {
            self.image.global_color_table = Some(ColorTable::new(global_table_len));
            self.state = State::GlobalColorTable;
        } else {
            self.state = State::BlockType;
        }

        if background != 0 {
            if self.image.global_color_table.is_none() {
                warn!("background color without global color table");
            } else {
                self.image.background_color_index = Some(background);
            }
        }

        self.screen_complete = true;
        Ok(Step::Ready)
    }

    fn parse_block_type(&mut self, source: &mut BufReader) -> OpResult {
        let mut byte = [0u8; 1];
        match source.read_n_into(&mut byte)? {
            Io::Ready(_) => {}
            Io::Pending => return Ok(Step::Pending),
            Io::Eof => {
                // End of input instead of a trailer is fine once at least
                // one frame was parsed.
                if self.image.frames.is_empty() {
                    return Err(Error::UnexpectedEof("GIF block stream".to_string()));
                }
                self.complete = true;
                self.state = State::Done;
                return Ok(Step::Ready);
            }
        }

        match byte[0] {
            EXTENSION_INTRODUCER => self.state = State::ExtensionType,
            IMAGE_SEPARATOR => self.state = State::ImageDescriptor,
            TRAILER => {
                self.complete = true;
                self.state = State::Done;
            }
            other => {
                // Extraneous data between blocks. GIF87a says keep
                // scanning, GIF89a calls the file corrupt; like Mozilla we
                // act as if the file were correctly terminated so it still
                // displays.
                warn!("corrupt GIF format: unexpected block type 0x{other:02x}");
                self.complete = true;
                self.state = State::Done;
            }
        }
        Ok(Step::Ready)
    }

    fn parse_extension_type(&mut self, source: &mut BufReader) -> OpResult {
        let mut byte = [0u8; 1];
        try_ready!(source.read_n_into(&mut byte), "GIF extension type");
        self.block_kind = match byte[0] {
            GRAPHIC_CONTROL_LABEL => BlockKind::Control,
            APPLICATION_LABEL => BlockKind::Application,
            // Plain text and comments carry nothing we keep.
            PLAIN_TEXT_LABEL | COMMENT_LABEL => BlockKind::Skip,
            _ => BlockKind::Skip,
        };
        self.state = State::SubBlockLength;
        Ok(Step::Ready)
    }

    fn parse_sub_block_length(&mut self, source: &mut BufReader) -> OpResult {
        let mut byte = [0u8; 1];
        try_ready!(source.read_n_into(&mut byte), "GIF sub-block length");
        let length = byte[0];

        if length == 0 {
            self.end_of_block()?;
            self.state = State::BlockType;
            return Ok(Step::Ready);
        }

        self.remaining_block = length as usize;
        self.start_of_subblock(length);
        self.state = State::BlockData;
        Ok(Step::Ready)
    }

    fn start_of_subblock(&mut self, length: u8) {
        match self.block_kind {
            BlockKind::Metadata(kind) => {
                let writer = self
                    .metadata_writer
                    .get_or_insert_with(|| BufferWriter::new(length as usize));
                if kind == MetadataKind::Xmp {
                    // The XMP-in-GIF convention: the length byte itself is
                    // part of the payload.
                    writer.write_bytes(&[length]);
                }
            }
            _ => {}
        }
    }

    fn end_of_block(&mut self) -> Result<(), Error> {
        match self.block_kind {
            BlockKind::Metadata(kind) => {
                if let Some(mut writer) = self.metadata_writer.take() {
                    if kind == MetadataKind::Xmp && writer.total_size() > XMP_MAGIC_TRAILER_LEN {
                        writer.unwrite_n(XMP_MAGIC_TRAILER_LEN);
                    }
                    for chunk in writer.release_chunks() {
                        self.image.metadata.append(kind, chunk);
                    }
                    self.image.metadata.freeze(kind);
                }
            }
            BlockKind::LzwData => {
                let builder = self
                    .frame_builder
                    .take()
                    .ok_or_else(|| Error::Decode("image data without descriptor".to_string()))?;
                self.image.frames.push(builder.finish()?);
            }
            _ => {}
        }
        Ok(())
    }

    fn parse_block_data(&mut self, source: &mut BufReader) -> OpResult {
        if self.skip_remainder {
            match consume_remainder(source, &mut self.remaining_block)? {
                Step::Ready => {
                    self.skip_remainder = false;
                    self.state = State::SubBlockLength;
                    return Ok(Step::Ready);
                }
                other => return Ok(other),
            }
        }
        match self.block_kind {
            BlockKind::Control => self.parse_control_extension(source),
            BlockKind::Application => self.parse_application_extension(source),
            BlockKind::Netscape => self.parse_netscape_extension(source),
            BlockKind::Metadata(_) => self.consume_metadata(source),
            BlockKind::LzwData => self.read_lzw_data(source),
            BlockKind::Skip => {
                self.skip_remainder = true;
                Ok(Step::Ready)
            }
        }
    }

    fn parse_control_extension(&mut self, source: &mut BufReader) -> OpResult {
        // The spec mandates 4 bytes; larger blocks occur in the wild and
        // the excess is ignored, shorter ones are corrupt.
        const LENGTH: usize = 4;
        if self.remaining_block < LENGTH {
            return Err(Error::Decode(
                "graphics control extension must be at least 4 bytes".to_string(),
            ));
        }

        let mut buf = [0u8; LENGTH];
        try_ready!(source.read_n_into(&mut buf), "GIF graphics control extension");
        self.remaining_block -= LENGTH;

        let packed = buf[0];
        let duration = LittleEndian::read_u16(&buf[1..3]);

        let builder = self.frame_builder.get_or_insert_with(FrameBuilder::new);
        builder.frame.disposal_method = match (packed >> 2) & 0x07 {
            2 => DisposalMethod::Background,
            // 3 per GIF89a; 4 per the older spec revision.
            3 | 4 => DisposalMethod::RestorePrevious,
            _ => DisposalMethod::None,
        };
        // Duration is in hundredths of a second.
        builder.frame.duration_ms = u32::from(duration) * 10;
        if packed & 0x01 != 0 {
            builder.frame.transparent_index = Some(buf[3]);
        }

        // Whatever else the block carries is ignored; later sub-blocks of
        // this extension are skipped wholesale.
        self.block_kind = BlockKind::Skip;
        self.skip_remainder = true;
        Ok(Step::Ready)
    }

    fn parse_application_extension(&mut self, source: &mut BufReader) -> OpResult {
        const LENGTH: usize = 11;
        if self.remaining_block < LENGTH {
            warn!("application extension header must be 11 bytes, skipping block");
            self.block_kind = BlockKind::Skip;
            return Ok(Step::Ready);
        }

        let mut signature = [0u8; LENGTH];
        try_ready!(source.read_n_into(&mut signature), "GIF application extension");
        self.remaining_block -= LENGTH;

        if &signature == b"NETSCAPE2.0" || &signature == b"ANIMEXTS1.0" {
            self.block_kind = BlockKind::Netscape;
        } else if &signature == b"ICCRGBG1012" && !self.image.metadata.has(MetadataKind::Icc) {
            // Only the first metadata block of each kind is kept.
            self.metadata_writer = Some(BufferWriter::new(256));
            self.block_kind = BlockKind::Metadata(MetadataKind::Icc);
        } else if &signature == b"XMP DataXMP" && !self.image.metadata.has(MetadataKind::Xmp) {
            self.metadata_writer = Some(BufferWriter::new(256));
            self.block_kind = BlockKind::Metadata(MetadataKind::Xmp);
        } else {
            warn!("unsupported application extension");
            self.block_kind = BlockKind::Skip;
        }
        // Anything after the identifier in this sub-block is an
        // application authentication code; the payload starts with the
        // next sub-block.
        self.skip_remainder = true;
        Ok(Step::Ready)
    }

    fn parse_netscape_extension(&mut self, source: &mut BufReader) -> OpResult {
        const LENGTH: usize = 3;
        if self.remaining_block < LENGTH {
            warn!("netscape extension must be at least 3 bytes, skipping");
            self.block_kind = BlockKind::Skip;
            self.skip_remainder = true;
            return Ok(Step::Ready);
        }
        let mut buf = [0u8; LENGTH];
        try_ready!(source.read_n_into(&mut buf), "GIF netscape extension");
        self.remaining_block -= LENGTH;

        match buf[0] & 0x07 {
            1 => {
                let loop_count = LittleEndian::read_u16(&buf[1..3]);
                self.image.loop_count = if loop_count == 0 {
                    None
                } else {
                    Some(loop_count)
                };
            }
            2 => {
                // "Wait for this many bytes" buffering hint; buffered
                // streaming makes it meaningless.
            }
            _ => {
                return Err(Error::Decode("unknown netscape extension".to_string()));
            }
        }

        self.skip_remainder = true;
        Ok(Step::Ready)
    }

    fn consume_metadata(&mut self, source: &mut BufReader) -> OpResult {
        while self.remaining_block > 0 {
            let bytes = try_ready!(
                source.read_at_most_n(self.remaining_block),
                "GIF metadata sub-block"
            );
            if let Some(writer) = self.metadata_writer.as_mut() {
                writer.write_bytes(bytes);
            }
            self.remaining_block -= bytes.len();
        }
        self.state = State::SubBlockLength;
        Ok(Step::Ready)
    }

    fn read_lzw_data(&mut self, source: &mut BufReader) -> OpResult {
        while self.remaining_block > 0 {
            let consumed = {
                let bytes = try_ready!(
                    source.read_at_most_n(self.remaining_block),
                    "GIF image data"
                );
                let builder = self
                    .frame_builder
                    .as_mut()
                    .ok_or_else(|| Error::Decode("image data without descriptor".to_string()))?;
                builder.process_image_data(bytes)?;
                bytes.len()
            };
            self.remaining_block -= consumed;
        }
        self.state = State::SubBlockLength;
        Ok(Step::Ready)
    }

    fn parse_image_descriptor(&mut self, source: &mut BufReader, header_only: bool) -> OpResult {
        let mut buf = [0u8; 9];
        try_ready!(source.read_n_into(&mut buf), "GIF image descriptor");

        let x_offset = LittleEndian::read_u16(&buf[0..2]);
        let y_offset = LittleEndian::read_u16(&buf[2..4]);
        let mut width = LittleEndian::read_u16(&buf[4..6]);
        let mut height = LittleEndian::read_u16(&buf[6..8]);
        let packed = buf[8];

        if self.image.frames.is_empty() {
            // Frames that overflow the declared canvas exist in the wild;
            // for the first frame the canvas is enlarged to fit (later ones
            // would change the established image size and get cropped
            // instead).
            let frame_right = (u32::from(x_offset) + u32::from(width)).min(u32::from(u16::MAX));
            let frame_bottom = (u32::from(y_offset) + u32::from(height)).min(u32::from(u16::MAX));
            self.image.screen_width = self.image.screen_width.max(frame_right as u16);
            self.image.screen_height = self.image.screen_height.max(frame_bottom as u16);
        }

        // Zero image dimensions are another real-world breakage; fall back
        // to the canvas.
        if width == 0 || height == 0 {
            width = self.image.screen_width;
            height = self.image.screen_height;
            if width == 0 || height == 0 {
                return Err(Error::Decode("invalid image width/height".to_string()));
            }
        }

        let builder = self.frame_builder.get_or_insert_with(FrameBuilder::new);
        builder.frame.x_offset = x_offset;
        builder.frame.y_offset = y_offset;
        builder.frame.width = width;
        builder.frame.height = height;
        if packed & 0x40 != 0 {
            builder.frame.interlaced = true;
        }

        if packed & 0x80 != 0 {
            let table_len = 1usize << ((packed & 0x07) + 1);
            builder.frame.local_color_table = Some(ColorTable::new(table_len));
            self.state = State::LocalColorTable;
        } else {
            self.state = State::MinimumCodeSize;
        }

        self.header_complete = true;
        if header_only {
            return Ok(Step::Finished);
        }
        Ok(Step::Ready)
    }

    fn parse_minimum_code_size(&mut self, source: &mut BufReader) -> OpResult {
        let mut byte = [0u8; 1];
        try_ready!(source.read_n_into(&mut byte), "GIF minimum code size");
        let builder = self.frame_builder.get_or_insert_with(FrameBuilder::new);
        builder.init_decoder(byte[0])?;
        self.block_kind = BlockKind::LzwData;
        self.state = State::SubBlockLength;
        Ok(Step::Ready)
    }
}

fn build_color_table(source: &mut BufReader, table: &mut ColorTable) -> OpResult {
    while !table.is_full() {
        let mut rgb = [0u8; 3];
        try_ready!(source.read_n_into(&mut rgb), "GIF color table");
        table.push(rgb);
    }
    Ok(Step::Ready)
}

fn consume_remainder(source: &mut BufReader, remaining: &mut usize) -> OpResult {
    while *remaining > 0 {
        let bytes = try_ready!(source.read_at_most_n(*remaining), "GIF sub-block");
        *remaining -= bytes.len();
    }
    Ok(Step::Ready)
}
