//! WebP decoding: a RIFF chunk scanner runs natively on the suspendable
//! source and answers every header question (canvas, animation parameters,
//! and ICCP/EXIF/XMP, including chunks that trail the image data), while
//! pixel decode bridges to `image-webp` over the buffered window once the
//! stream is complete.

use byteorder::{ByteOrder, LittleEndian};

use crate::decoder::{DecodeParams, ImageDecoder};
use crate::error::{try_ready, Error, OpResult, Step};
use crate::frame::{ColorScheme, FrameStatus, ImageFrame};
use crate::info::{ImageFormat, ImageInfo};
use crate::io::{BufReader, Chunk, Io};
use crate::metadata::{ImageMetadata, MetadataKind};

const VP8_MAGIC: [u8; 3] = [0x9D, 0x01, 0x2A];
const VP8L_SIGNATURE: u8 = 0x2F;

const FLAG_ANIMATION: u32 = 0x02;
const FLAG_ALPHA: u32 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    RiffHeader,
    ChunkHeader,
    /// Parsing the interesting head of the current chunk's payload, or
    /// collecting it wholly (metadata); `skip` bytes follow to the next
    /// chunk boundary.
    ChunkBody(ChunkBody),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkBody {
    Vp8Header,
    Vp8lHeader,
    Vp8xBody,
    AnimBody,
    Metadata(MetadataKind),
    Skip,
}

pub struct WebpDecoder {
    source: BufReader,
    #[allow(dead_code)]
    params: DecodeParams,
    state: ScanState,

    /// Payload length of the chunk being scanned.
    chunk_len: usize,
    /// Bytes left to skip before the next chunk header (tail + padding).
    skip_len: usize,

    image_info: ImageInfo,
    frames: Vec<ImageFrame>,
    metadata: ImageMetadata,

    dimensions_known: bool,
    animated: bool,
    anim_parsed: bool,
    has_alpha: bool,
    lossless: bool,
    num_frames: usize,

    pixels_decoded: bool,
    error: Option<Error>,
}

impl WebpDecoder {
    pub fn new(params: DecodeParams, source: BufReader) -> WebpDecoder {
        WebpDecoder {
            source,
            params,
            state: ScanState::RiffHeader,
            chunk_len: 0,
            skip_len: 0,
            image_info: ImageInfo::new(ImageFormat::WebP),
            frames: Vec::new(),
            metadata: ImageMetadata::new(),
            dimensions_known: false,
            animated: false,
            anim_parsed: false,
            has_alpha: false,
            lossless: false,
            num_frames: 0,
            pixels_decoded: false,
            error: None,
        }
    }

    fn fail(&mut self, error: Error) -> OpResult {
        self.error = Some(error.clone());
        Err(error)
    }

    fn info_complete(&self) -> bool {
        self.dimensions_known && (!self.animated || self.anim_parsed)
    }

    fn scan(&mut self, until_info: bool) -> OpResult {
        loop {
            if until_info && self.info_complete() {
                return Ok(Step::Ready);
            }
            match self.scan_step() {
                Ok(Step::Ready) => continue,
                other => return other,
            }
        }
    }

    fn scan_step(&mut self) -> OpResult {
        match self.state {
            ScanState::RiffHeader => {
                let mut buf = [0u8; 12];
                try_ready!(self.source.read_n_into(&mut buf), "WebP RIFF header");
                if &buf[0..4] != b"RIFF" || &buf[8..12] != b"WEBP" {
                    return Err(Error::Decode("invalid WebP RIFF header".to_string()));
                }
                self.image_info.size = u64::from(LittleEndian::read_u32(&buf[4..8])) + 8;
                self.state = ScanState::ChunkHeader;
                Ok(Step::Ready)
            }
            ScanState::ChunkHeader => {
                let mut buf = [0u8; 8];
                match self.source.read_n_into(&mut buf)? {
                    Io::Ready(_) => {}
                    Io::Pending => return Ok(Step::Pending),
                    Io::Eof => {
                        // The chunk walk ran off the end of the container;
                        // scanning is complete.
                        if !self.dimensions_known {
                            return Err(Error::UnexpectedEof("WebP chunks".to_string()));
                        }
                        self.finish_scan();
                        return Ok(Step::Ready);
                    }
                }
                let size = LittleEndian::read_u32(&buf[4..8]) as usize;
                let padded = size + (size & 1);
                self.chunk_len = size;
                self.skip_len = padded;

                let body = match &buf[0..4] {
                    b"VP8 " if !self.dimensions_known => ChunkBody::Vp8Header,
                    b"VP8L" if !self.dimensions_known => ChunkBody::Vp8lHeader,
                    b"VP8X" => ChunkBody::Vp8xBody,
                    b"ANIM" => ChunkBody::AnimBody,
                    b"ANMF" => {
                        self.num_frames += 1;
                        ChunkBody::Skip
                    }
                    b"ALPH" => {
                        self.has_alpha = true;
                        ChunkBody::Skip
                    }
                    b"ICCP" => ChunkBody::Metadata(MetadataKind::Icc),
                    b"EXIF" => ChunkBody::Metadata(MetadataKind::Exif),
                    b"XMP " => ChunkBody::Metadata(MetadataKind::Xmp),
                    _ => ChunkBody::Skip,
                };
                self.state = ScanState::ChunkBody(body);
                Ok(Step::Ready)
            }
            ScanState::ChunkBody(body) => self.scan_chunk_body(body),
            ScanState::Done => Ok(Step::Finished),
        }
    }

    fn scan_chunk_body(&mut self, body: ChunkBody) -> OpResult {
        match body {
            ChunkBody::Vp8Header => {
                const HEAD: usize = 10;
                if self.chunk_len < HEAD {
                    return Err(Error::Decode("truncated VP8 chunk".to_string()));
                }
                let mut buf = [0u8; HEAD];
                try_ready!(self.source.read_n_into(&mut buf), "VP8 header");
                self.skip_len -= HEAD;

                let tag = LittleEndian::read_u24(&buf[0..3]);
                if tag & 1 != 0 {
                    return Err(Error::Decode("VP8 stream starts mid-frame".to_string()));
                }
                if buf[3..6] != VP8_MAGIC {
                    return Err(Error::Decode("invalid VP8 magic".to_string()));
                }
                let width = LittleEndian::read_u16(&buf[6..8]) & 0x3FFF;
                let height = LittleEndian::read_u16(&buf[8..10]) & 0x3FFF;
                self.set_dimensions(u32::from(width), u32::from(height));
                self.to_skip()
            }
            ChunkBody::Vp8lHeader => {
                const HEAD: usize = 5;
                if self.chunk_len < HEAD {
                    return Err(Error::Decode("truncated VP8L chunk".to_string()));
                }
                let mut buf = [0u8; HEAD];
                try_ready!(self.source.read_n_into(&mut buf), "VP8L header");
                self.skip_len -= HEAD;

                if buf[0] != VP8L_SIGNATURE {
                    return Err(Error::Decode("invalid VP8L signature".to_string()));
                }
                let header = LittleEndian::read_u32(&buf[1..5]);
                if header >> 29 != 0 {
                    return Err(Error::Decode("invalid VP8L version".to_string()));
                }
                let width = (header & 0x3FFF) + 1;
                let height = ((header >> 14) & 0x3FFF) + 1;
                self.lossless = true;
                self.has_alpha = self.has_alpha || (header >> 28) & 1 != 0;
                self.set_dimensions(width, height);
                self.to_skip()
            }
            ChunkBody::Vp8xBody => {
                const HEAD: usize = 10;
                if self.chunk_len < HEAD {
                    return Err(Error::Decode("truncated VP8X chunk".to_string()));
                }
                let mut buf = [0u8; HEAD];
                try_ready!(self.source.read_n_into(&mut buf), "VP8X header");
                self.skip_len -= HEAD;

                let flags = LittleEndian::read_u32(&buf[0..4]);
                self.animated = flags & FLAG_ANIMATION != 0;
                self.has_alpha = self.has_alpha || flags & FLAG_ALPHA != 0;
                let width = LittleEndian::read_u24(&buf[4..7]) + 1;
                let height = LittleEndian::read_u24(&buf[7..10]) + 1;
                self.set_dimensions(width, height);
                self.to_skip()
            }
            ChunkBody::AnimBody => {
                const HEAD: usize = 6;
                if self.chunk_len < HEAD {
                    return Err(Error::Decode("truncated ANIM chunk".to_string()));
                }
                let mut buf = [0u8; HEAD];
                try_ready!(self.source.read_n_into(&mut buf), "ANIM chunk");
                self.skip_len -= HEAD;

                // Stored blue, green, red, alpha.
                self.image_info.bg_color = Some([buf[2], buf[1], buf[0], buf[3]]);
                self.image_info.loop_count = match LittleEndian::read_u16(&buf[4..6]) {
                    0 => None,
                    n => Some(n),
                };
                self.anim_parsed = true;
                self.to_skip()
            }
            ChunkBody::Metadata(kind) => {
                let payload = {
                    let bytes = try_ready!(self.source.read_n(self.chunk_len), "WebP metadata");
                    Chunk::copy(bytes)
                };
                self.skip_len -= self.chunk_len;
                if !self.metadata.has(kind) {
                    self.metadata.append(kind, payload);
                    self.metadata.freeze(kind);
                }
                self.to_skip()
            }
            ChunkBody::Skip => {
                if self.skip_len > 0 {
                    match self.source.skip_n(self.skip_len)? {
                        Io::Ready(_) => {}
                        Io::Pending => return Ok(Step::Pending),
                        // Files in the wild drop the final padding byte.
                        Io::Eof => {
                            if !self.dimensions_known {
                                return Err(Error::UnexpectedEof("WebP chunk".to_string()));
                            }
                            self.finish_scan();
                            return Ok(Step::Ready);
                        }
                    }
                    self.skip_len = 0;
                }
                self.state = ScanState::ChunkHeader;
                Ok(Step::Ready)
            }
        }
    }

    fn to_skip(&mut self) -> OpResult {
        self.state = ScanState::ChunkBody(ChunkBody::Skip);
        Ok(Step::Ready)
    }

    fn set_dimensions(&mut self, width: u32, height: u32) {
        self.image_info.width = width;
        self.image_info.height = height;
        self.dimensions_known = true;
    }

    fn finish_scan(&mut self) {
        self.image_info.multiframe = self.animated;
        self.image_info.quality = if self.lossless { Some(100) } else { None };
        self.metadata.freeze_all();
        self.state = ScanState::Done;
    }

    /// Replays the buffered container through `image-webp`.
    fn decode_pixels(&mut self) -> OpResult {
        let offset = self.source.offset();
        self.source.unread_n(offset);
        let total = self.source.source().size();

        let frames = {
            let window = try_ready!(self.source.read_n(total), "WebP stream");
            let mut decoder = image_webp::WebPDecoder::new(std::io::Cursor::new(window))
                .map_err(|e| Error::Decode(format!("webp decode: {e}")))?;

            let (width, height) = decoder.dimensions();
            let bpp = if decoder.has_alpha() { 4 } else { 3 };
            let scheme = if decoder.has_alpha() {
                ColorScheme::Rgba
            } else {
                ColorScheme::Rgb
            };
            let frame_quality = self.image_info.quality;

            let mut frames = Vec::new();
            if decoder.is_animated() {
                for _ in 0..decoder.num_frames() {
                    let mut buf = vec![0u8; width as usize * height as usize * bpp];
                    let delay = match decoder.read_frame(&mut buf) {
                        Ok(delay) => delay,
                        Err(image_webp::DecodingError::NoMoreFrames) => break,
                        Err(e) => {
                            return Err(Error::Decode(format!("webp frame decode: {e}")))
                        }
                    };
                    frames.push(build_frame(width, height, scheme, buf, delay, frame_quality));
                }
            } else {
                let mut buf = vec![0u8; width as usize * height as usize * bpp];
                decoder
                    .read_image(&mut buf)
                    .map_err(|e| Error::Decode(format!("webp decode: {e}")))?;
                frames.push(build_frame(width, height, scheme, buf, 0, frame_quality));
            }
            frames
        };

        self.frames = frames;
        self.pixels_decoded = true;
        Ok(Step::Ready)
    }
}

fn build_frame(
    width: u32,
    height: u32,
    scheme: ColorScheme,
    pixels: Vec<u8>,
    duration_ms: u32,
    quality: Option<u8>,
) -> ImageFrame {
    let mut frame = ImageFrame::new();
    frame.set_size(width, height);
    frame.set_color_scheme(scheme);
    frame.init();
    frame.pixels_mut().copy_from_slice(&pixels);
    frame.set_duration_ms(duration_ms);
    frame.set_quality(quality);
    frame.set_status(FrameStatus::Complete);
    frame
}

impl ImageDecoder for WebpDecoder {
    fn image_info(&self) -> &ImageInfo {
        &self.image_info
    }

    fn is_image_info_complete(&self) -> bool {
        self.info_complete()
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn is_multiframe(&self) -> bool {
        self.animated
    }

    fn is_frame_complete(&self, index: usize) -> bool {
        self.frames
            .get(index)
            .map(|f| f.status() == FrameStatus::Complete)
            .unwrap_or(false)
    }

    fn frame_at(&self, index: usize) -> Option<&ImageFrame> {
        self.frames.get(index)
    }

    fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    fn is_all_metadata_complete(&self) -> bool {
        self.metadata.is_all_completed()
    }

    fn is_all_frames_complete(&self) -> bool {
        self.pixels_decoded
    }

    fn is_image_complete(&self) -> bool {
        self.pixels_decoded
    }

    fn decode(&mut self) -> OpResult {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if self.pixels_decoded {
            return Ok(Step::Ready);
        }
        if self.state != ScanState::Done {
            match self.scan(false) {
                Ok(Step::Ready) | Ok(Step::Finished) => {}
                Ok(Step::Pending) => return Ok(Step::Pending),
                Err(error) => return self.fail(error),
            }
        }
        if self.state != ScanState::Done {
            return Ok(Step::Pending);
        }
        match self.decode_pixels() {
            Ok(step) => Ok(step),
            Err(error) => self.fail(error),
        }
    }

    fn decode_image_info(&mut self) -> OpResult {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if self.info_complete() {
            return Ok(Step::Ready);
        }
        match self.scan(true) {
            Ok(Step::Ready) | Ok(Step::Finished) => Ok(Step::Ready),
            Ok(Step::Pending) => Ok(Step::Pending),
            Err(error) => self.fail(error),
        }
    }

    fn source_mut(&mut self) -> &mut BufReader {
        &mut self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::webp::{WebpEncoder, WebpEncoderParams};
    use crate::io::BufSource;
    use crate::testutil::SharedSink;
    use crate::writing::ImageEncoder;

    fn solid_frame(width: u32, height: u32, rgba: [u8; 4], duration_ms: u32) -> ImageFrame {
        let mut frame = ImageFrame::new();
        frame.set_size(width, height);
        frame.set_color_scheme(ColorScheme::Rgba);
        frame.init();
        for pixel in frame.pixels_mut().chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
        frame.set_duration_ms(duration_ms);
        frame
    }

    /// An animated WebP with EXIF behind the frames, produced by the
    /// crate's own muxer.
    fn animated_fixture() -> Vec<u8> {
        let mut info = ImageInfo::new(ImageFormat::Gif);
        info.width = 6;
        info.height = 4;
        info.multiframe = true;
        info.loop_count = Some(3);
        info.bg_color = Some([9, 8, 7, 0xFF]);

        let mut metadata = ImageMetadata::new();
        metadata.append(MetadataKind::Exif, Chunk::copy(b"exif-bytes"));
        metadata.freeze_all();

        let sink = SharedSink::new();
        let mut encoder = WebpEncoder::new(WebpEncoderParams::default(), Box::new(sink.clone()));
        encoder.initialize(&info).unwrap();
        encoder.set_metadata(&metadata);
        for i in 0..3u8 {
            encoder
                .encode_frame(Some(&solid_frame(6, 4, [i * 80, 10, 10, 0xFF], 25)), false)
                .unwrap();
        }
        encoder.encode_frame(None, true).unwrap();
        encoder.finish().unwrap();
        sink.bytes()
    }

    fn single_fixture() -> Vec<u8> {
        let mut info = ImageInfo::new(ImageFormat::Jpeg);
        info.width = 5;
        info.height = 3;

        let sink = SharedSink::new();
        let mut encoder = WebpEncoder::new(WebpEncoderParams::default(), Box::new(sink.clone()));
        encoder.initialize(&info).unwrap();
        let mut frame = solid_frame(5, 3, [1, 2, 3, 255], 0);
        frame.set_quality(Some(80));
        encoder.encode_frame(Some(&frame), true).unwrap();
        encoder.finish().unwrap();
        sink.bytes()
    }

    fn decoder_for(bytes: &[u8], chunk_size: usize, eof: bool) -> WebpDecoder {
        let mut source = BufSource::new();
        for part in bytes.chunks(chunk_size) {
            source.add_chunk(Chunk::copy(part));
        }
        if eof {
            source.send_eof();
        }
        WebpDecoder::new(DecodeParams::rgb_only(), BufReader::new(source))
    }

    #[test]
    fn simple_file_header() {
        let bytes = single_fixture();
        let mut decoder = decoder_for(&bytes, 7, false);

        assert_eq!(decoder.decode_image_info().unwrap(), Step::Ready);
        let info = decoder.image_info();
        assert_eq!((info.width, info.height), (5, 3));
        assert!(!info.multiframe);
        // Lossy input: the source quality is unknown.
        assert_eq!(info.quality, None);
    }

    #[test]
    fn animated_header_has_animation_parameters() {
        let bytes = animated_fixture();
        let mut decoder = decoder_for(&bytes, 11, false);

        assert_eq!(decoder.decode_image_info().unwrap(), Step::Ready);
        let info = decoder.image_info();
        assert_eq!((info.width, info.height), (6, 4));
        assert!(info.multiframe);
        assert_eq!(info.loop_count, Some(3));
        assert_eq!(info.bg_color, Some([9, 8, 7, 0xFF]));
    }

    #[test]
    fn trailing_metadata_is_collected_by_the_full_scan() {
        let bytes = animated_fixture();
        let mut decoder = decoder_for(&bytes, 13, true);

        // EXIF sits after the frames, so it is not there at header time...
        assert_eq!(decoder.decode_image_info().unwrap(), Step::Ready);
        assert!(!decoder.metadata().has(MetadataKind::Exif));

        // ...and appears once the image was read till the end.
        assert_eq!(decoder.decode().unwrap(), Step::Ready);
        assert!(decoder.is_image_complete());
        assert_eq!(
            decoder.metadata().merged(MetadataKind::Exif).unwrap().data(),
            b"exif-bytes"
        );
    }

    #[test]
    fn frames_are_decoded_with_durations() {
        let bytes = animated_fixture();
        let mut decoder = decoder_for(&bytes, 64, true);

        assert_eq!(decoder.decode().unwrap(), Step::Ready);
        assert_eq!(decoder.frame_count(), 3);
        let frame = decoder.frame_at(0).unwrap();
        assert_eq!(frame.width(), 6);
        assert_eq!(frame.duration_ms(), 25);
        assert!(decoder.is_frame_complete(2));
        assert!(!decoder.is_frame_complete(3));
    }

    #[test]
    fn pends_without_eof() {
        let bytes = animated_fixture();
        let mut decoder = decoder_for(&bytes[..bytes.len() - 4], 64, false);

        // The scan cannot finish while the source is open.
        assert_eq!(decoder.decode().unwrap(), Step::Pending);
    }

    #[test]
    fn garbage_riff_header_is_a_decode_error() {
        let mut decoder = decoder_for(b"RIFFxxxxJUNKxxxxxxxx", 64, true);
        assert!(matches!(decoder.decode_image_info(), Err(Error::Decode(_))));
    }
}
