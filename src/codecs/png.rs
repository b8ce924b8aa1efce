//! PNG decoding over the `png` crate: the header is parsed truly
//! incrementally through `png::StreamingDecoder` (bytes are pushed until
//! the first IDAT chunk, then the unconsumed tail is unread, mirroring a
//! progressive reader's header pause); the pixel pass replays the buffered
//! window through `png::Reader`, which also handles Adam7 and palette /
//! bit-depth expansion.

use log::warn;

use crate::decoder::{DecodeParams, ImageDecoder};
use crate::error::{try_ready, Error, OpResult, Step};
use crate::frame::{ColorScheme, FrameStatus, ImageFrame};
use crate::info::{ImageFormat, ImageInfo};
use crate::io::{BufReader, Chunk};
use crate::metadata::{ImageMetadata, MetadataKind};

/// iTXt keyword under which XMP rides in a PNG.
const XMP_KEYWORD: &str = "XML:com.adobe.xmp";

pub struct PngDecoder {
    source: BufReader,
    params: DecodeParams,
    stream: png::StreamingDecoder,
    /// Width, height, colour type and interlace flag from the IHDR event.
    seen_header: Option<(u32, u32, png::ColorType, bool)>,

    image_info: ImageInfo,
    frame: ImageFrame,
    metadata: ImageMetadata,

    header_complete: bool,
    pixels_decoded: bool,
    error: Option<Error>,
}

impl PngDecoder {
    pub fn new(params: DecodeParams, source: BufReader) -> PngDecoder {
        PngDecoder {
            source,
            params,
            stream: png::StreamingDecoder::new(),
            seen_header: None,
            image_info: ImageInfo::new(ImageFormat::Png),
            frame: ImageFrame::new(),
            metadata: ImageMetadata::new(),
            header_complete: false,
            pixels_decoded: false,
            error: None,
        }
    }

    fn fail(&mut self, error: Error) -> OpResult {
        self.error = Some(error.clone());
        Err(error)
    }

    /// Pushes source bytes into the streaming decoder until it has seen
    /// everything ahead of the image data.
    fn scan_header(&mut self) -> OpResult {
        loop {
            let (unconsumed, done, header) = {
                let bytes = try_ready!(self.source.read_some(), "PNG header");
                let stream = &mut self.stream;
                let mut at = 0;
                let mut done = false;
                let mut header = None;
                while at < bytes.len() {
                    // Image data is not wanted here; a throwaway sink keeps
                    // the decoder moving.
                    let mut sink = Vec::new();
                    let (consumed, decoded) = stream
                        .update(&bytes[at..], &mut sink)
                        .map_err(|e| Error::Decode(format!("png: {e}")))?;
                    at += consumed;
                    match decoded {
                        png::Decoded::Header(width, height, _, color_type, interlaced) => {
                            header = Some((width, height, color_type, interlaced));
                        }
                        png::Decoded::ChunkBegin(_, png::chunk::IDAT)
                        | png::Decoded::ImageData
                        | png::Decoded::ImageDataFlushed
                        | png::Decoded::ImageEnd => {
                            done = true;
                            break;
                        }
                        _ => {}
                    }
                }
                (bytes.len() - at, done, header)
            };
            if header.is_some() {
                self.seen_header = header;
            }

            if done {
                // The streaming decoder stopped inside the first IDAT
                // chunk; give the overshoot back so the pixel pass sees a
                // byte-exact stream.
                self.source.unread_n(unconsumed);
                self.finish_header()?;
                return Ok(Step::Ready);
            }
        }
    }

    fn finish_header(&mut self) -> Result<(), Error> {
        let (width, height, color_type, interlaced) = match self.seen_header {
            Some(header) => header,
            None => return Err(Error::Decode("png image data before header".to_string())),
        };
        let info = match self.stream.info() {
            Some(info) => info,
            None => return Err(Error::Decode("png header without info".to_string())),
        };
        let has_trns = info.trns.is_some();

        let base_scheme = match color_type {
            png::ColorType::Grayscale => {
                if has_trns {
                    ColorScheme::GrayscaleAlpha
                } else {
                    ColorScheme::Grayscale
                }
            }
            png::ColorType::GrayscaleAlpha => ColorScheme::GrayscaleAlpha,
            png::ColorType::Indexed | png::ColorType::Rgb => {
                if has_trns {
                    ColorScheme::Rgba
                } else {
                    ColorScheme::Rgb
                }
            }
            png::ColorType::Rgba => ColorScheme::Rgba,
        };
        let scheme = if self.params.color_scheme_allowed(base_scheme) {
            base_scheme
        } else if base_scheme.has_alpha() {
            ColorScheme::Rgba
        } else {
            ColorScheme::Rgb
        };

        if let Some(icc) = info.icc_profile.as_ref() {
            self.metadata.append(MetadataKind::Icc, Chunk::copy(icc));
        }
        self.metadata.freeze(MetadataKind::Icc);
        // EXIF in PNG is rare enough that the bridge does not surface it.
        self.metadata.freeze(MetadataKind::Exif);

        self.image_info.width = width;
        self.image_info.height = height;
        self.image_info.progressive = interlaced;
        self.image_info.quality = Some(100);

        self.frame.set_size(width, height);
        self.frame.set_color_scheme(scheme);
        self.frame.set_progressive(interlaced);
        self.frame.set_quality(Some(100));
        self.frame.set_status(FrameStatus::HeaderComplete);
        self.header_complete = true;
        Ok(())
    }

    fn decode_pixels(&mut self) -> OpResult {
        if !self.source.source().eof_received() {
            return Ok(Step::Pending);
        }

        let offset = self.source.offset();
        self.source.unread_n(offset);
        let total = self.source.source().size();

        let (pixels, out_color) = {
            let window = try_ready!(self.source.read_n(total), "PNG stream");
            let mut decoder = png::Decoder::new(std::io::Cursor::new(window));
            decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
            let mut reader = decoder
                .read_info()
                .map_err(|e| Error::Decode(format!("png: {e}")))?;
            let mut buf = vec![0u8; reader.output_buffer_size()];
            let out = reader
                .next_frame(&mut buf)
                .map_err(|e| Error::Decode(format!("png: {e}")))?;
            buf.truncate(out.buffer_size());

            // Run to IEND so text chunks trailing the image data surface.
            if let Err(e) = reader.finish() {
                warn!("png trailer: {e}");
            }
            for text in &reader.info().utf8_text {
                if text.keyword == XMP_KEYWORD && !self.metadata.has(MetadataKind::Xmp) {
                    match text.get_text() {
                        Ok(xmp) => self
                            .metadata
                            .append(MetadataKind::Xmp, Chunk::own(xmp.into_bytes())),
                        Err(e) => warn!("undecodable XMP text chunk: {e}"),
                    }
                }
            }

            (buf, out.color_type)
        };
        self.metadata.freeze(MetadataKind::Xmp);

        self.frame.init();
        self.frame.set_status(FrameStatus::Partial);
        write_pixels(&mut self.frame, &pixels, out_color)?;
        self.frame.set_status(FrameStatus::Complete);
        self.pixels_decoded = true;
        Ok(Step::Ready)
    }
}

/// Copies decoded scanline data into the frame, expanding grayscale to
/// RGB(A) where the frame asks for it.
fn write_pixels(
    frame: &mut ImageFrame,
    data: &[u8],
    out_color: png::ColorType,
) -> Result<(), Error> {
    let pixel_count = frame.width() as usize * frame.height() as usize;
    match (out_color, frame.color_scheme()) {
        (png::ColorType::Rgb, ColorScheme::Rgb)
        | (png::ColorType::Rgba, ColorScheme::Rgba)
        | (png::ColorType::Grayscale, ColorScheme::Grayscale)
        | (png::ColorType::GrayscaleAlpha, ColorScheme::GrayscaleAlpha) => {
            if data.len() != frame.pixels().len() {
                return Err(Error::Decode("png scanline size mismatch".to_string()));
            }
            frame.pixels_mut().copy_from_slice(data);
        }
        (png::ColorType::Grayscale, ColorScheme::Rgb) => {
            if data.len() != pixel_count {
                return Err(Error::Decode("png scanline size mismatch".to_string()));
            }
            for (pixel, &gray) in frame.pixels_mut().chunks_exact_mut(3).zip(data) {
                pixel.fill(gray);
            }
        }
        (png::ColorType::Grayscale, ColorScheme::Rgba) => {
            if data.len() != pixel_count {
                return Err(Error::Decode("png scanline size mismatch".to_string()));
            }
            for (pixel, &gray) in frame.pixels_mut().chunks_exact_mut(4).zip(data) {
                pixel[..3].fill(gray);
                pixel[3] = 0xFF;
            }
        }
        (png::ColorType::GrayscaleAlpha, ColorScheme::Rgba) => {
            if data.len() != pixel_count * 2 {
                return Err(Error::Decode("png scanline size mismatch".to_string()));
            }
            for (pixel, ga) in frame
                .pixels_mut()
                .chunks_exact_mut(4)
                .zip(data.chunks_exact(2))
            {
                pixel[..3].fill(ga[0]);
                pixel[3] = ga[1];
            }
        }
        (png::ColorType::Rgb, ColorScheme::Rgba) => {
            if data.len() != pixel_count * 3 {
                return Err(Error::Decode("png scanline size mismatch".to_string()));
            }
            for (pixel, rgb) in frame
                .pixels_mut()
                .chunks_exact_mut(4)
                .zip(data.chunks_exact(3))
            {
                pixel[..3].copy_from_slice(rgb);
                pixel[3] = 0xFF;
            }
        }
        (out_color, scheme) => {
            return Err(Error::Decode(format!(
                "unexpected png output {out_color:?} for {scheme:?}"
            )));
        }
    }
    Ok(())
}

impl ImageDecoder for PngDecoder {
    fn image_info(&self) -> &ImageInfo {
        &self.image_info
    }

    fn is_image_info_complete(&self) -> bool {
        self.header_complete
    }

    fn frame_count(&self) -> usize {
        usize::from(self.pixels_decoded)
    }

    fn is_multiframe(&self) -> bool {
        false
    }

    fn is_frame_complete(&self, index: usize) -> bool {
        index == 0 && self.pixels_decoded
    }

    fn frame_at(&self, index: usize) -> Option<&ImageFrame> {
        (index == 0 && self.pixels_decoded).then_some(&self.frame)
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
        if !self.header_complete {
            match self.scan_header() {
                Ok(Step::Ready) | Ok(Step::Finished) => {}
                Ok(Step::Pending) => return Ok(Step::Pending),
                Err(error) => return self.fail(error),
            }
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
        if self.header_complete {
            return Ok(Step::Ready);
        }
        match self.scan_header() {
            Ok(Step::Ready) | Ok(Step::Finished) => Ok(Step::Ready),
            Ok(Step::Pending) => Ok(Step::Pending),
            Err(error) => self.fail(error),
        }
    }

    fn source_mut(&mut self) -> &mut BufReader {
        &mut self.source
    }
}
