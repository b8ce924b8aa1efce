use log::warn;

use super::GifParser;
use crate::decoder::{DecodeParams, ImageDecoder};
use crate::error::{Error, OpResult, Step};
use crate::frame::{ColorScheme, DisposalMethod, FrameStatus, ImageFrame};
use crate::info::{ImageFormat, ImageInfo};
use crate::io::BufReader;
use crate::metadata::ImageMetadata;

/// GIF decoder: drives [`GifParser`] and converts finished palette frames
/// into RGB(A) [`ImageFrame`]s.
pub struct GifDecoder {
    source: BufReader,
    params: DecodeParams,
    parser: GifParser,
    frames: Vec<ImageFrame>,
    image_info: ImageInfo,
    info_reported: bool,
    error: Option<Error>,
}

impl GifDecoder {
    pub fn new(params: DecodeParams, source: BufReader) -> GifDecoder {
        GifDecoder {
            source,
            params,
            parser: GifParser::new(),
            frames: Vec::new(),
            image_info: ImageInfo::new(ImageFormat::Gif),
            info_reported: false,
            error: None,
        }
    }

    fn fail(&mut self, error: Error) -> OpResult {
        self.error = Some(error.clone());
        Err(error)
    }

    /// Folds newly available parser state into the decoder outputs.
    fn sync_from_parser(&mut self) -> Result<(), Error> {
        if !self.info_reported && self.parser.screen_complete() {
            self.info_reported = true;
            let image = self.parser.image();
            self.image_info.width = u32::from(image.screen_width);
            self.image_info.height = u32::from(image.screen_height);
            self.image_info.multiframe = true;
            // Palette sources are effectively lossless.
            self.image_info.quality = Some(100);
        }

        let image = self.parser.image();
        self.image_info.loop_count = image.loop_count;

        while self.frames.len() < image.frames.len() {
            let index = self.frames.len();
            let gif_frame = &image.frames[index];
            let color_table = match image.color_table_for(index) {
                Some(table) => table,
                None => return Err(Error::Decode("Missing color table".to_string())),
            };

            if gif_frame.interlaced {
                self.image_info.progressive = true;
            }

            if index == 0 {
                if let (Some(table), Some(bg_index)) =
                    (image.global_color_table.as_ref(), image.background_color_index)
                {
                    if let Some([r, g, b]) = table.color(bg_index as usize) {
                        self.image_info.bg_color = Some([r, g, b, 0xFF]);
                    }
                }
            } else if index == 1 && image.background_color_index.is_none() {
                warn!("no background color for animated image");
            }

            let scheme = if gif_frame.transparent_index.is_some()
                || !self.params.color_scheme_allowed(ColorScheme::Rgb)
            {
                ColorScheme::Rgba
            } else {
                ColorScheme::Rgb
            };

            let mut frame = ImageFrame::new();
            frame.set_offset(u32::from(gif_frame.x_offset), u32::from(gif_frame.y_offset));
            frame.set_size(u32::from(gif_frame.width), u32::from(gif_frame.height));
            frame.set_color_scheme(scheme);
            frame.init();
            frame.set_duration_ms(gif_frame.duration_ms);
            frame.set_progressive(gif_frame.interlaced);
            frame.set_quality(Some(100));
            frame.set_disposal_method(gif_frame.disposal_method);
            if gif_frame.disposal_method == DisposalMethod::RestorePrevious && index > 0 {
                frame.set_required_previous_frame(Some(index - 1));
            }

            for y in 0..gif_frame.height {
                for x in 0..gif_frame.width {
                    let palette_index = gif_frame.index_at(x, y);
                    let color = match color_table.color(palette_index as usize) {
                        Some(color) => color,
                        None => return Err(Error::Decode("Invalid color index".to_string())),
                    };
                    let pixel = frame.pixel_mut(u32::from(x), u32::from(y));
                    match scheme {
                        ColorScheme::Rgba => {
                            if gif_frame.transparent_index == Some(palette_index) {
                                pixel.copy_from_slice(&[0xFF, 0xFF, 0xFF, 0x00]);
                            } else {
                                pixel.copy_from_slice(&[color[0], color[1], color[2], 0xFF]);
                            }
                        }
                        _ => pixel.copy_from_slice(&color),
                    }
                }
            }

            frame.set_status(FrameStatus::Complete);
            self.frames.push(frame);
        }

        Ok(())
    }
}

impl ImageDecoder for GifDecoder {
    fn image_info(&self) -> &ImageInfo {
        &self.image_info
    }

    fn is_image_info_complete(&self) -> bool {
        self.info_reported
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn is_multiframe(&self) -> bool {
        true
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
        &self.parser.image().metadata
    }

    fn is_all_metadata_complete(&self) -> bool {
        self.parser.complete()
    }

    fn is_all_frames_complete(&self) -> bool {
        self.parser.complete()
    }

    fn is_image_complete(&self) -> bool {
        self.parser.complete()
    }

    fn decode(&mut self) -> OpResult {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let result = match self.parser.parse(&mut self.source) {
            Ok(step) => step,
            Err(error) => return self.fail(error),
        };
        if let Err(error) = self.sync_from_parser() {
            return self.fail(error);
        }
        // The parser never rewinds, so consumed chunks can go; this is what
        // keeps arbitrarily long animations memory-bounded.
        self.source.source_mut().free_as_much_as_possible();
        match result {
            Step::Finished | Step::Ready => Ok(Step::Ready),
            Step::Pending => Ok(Step::Pending),
        }
    }

    fn decode_image_info(&mut self) -> OpResult {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let result = match self.parser.parse_header(&mut self.source) {
            Ok(step) => step,
            Err(error) => return self.fail(error),
        };
        if let Err(error) = self.sync_from_parser() {
            return self.fail(error);
        }
        match result {
            Step::Finished | Step::Ready => Ok(Step::Ready),
            // The screen descriptor alone already answers every header
            // question a GIF can be asked.
            Step::Pending if self.info_reported => Ok(Step::Ready),
            Step::Pending => Ok(Step::Pending),
        }
    }

    fn source_mut(&mut self) -> &mut BufReader {
        &mut self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{BufSource, Chunk};
    use crate::testutil::gif;

    fn feed(bytes: &[u8], chunk_sizes: &[usize]) -> BufReader {
        let mut source = BufSource::new();
        let mut at = 0;
        for &size in chunk_sizes {
            let end = (at + size).min(bytes.len());
            source.add_chunk(Chunk::copy(&bytes[at..end]));
            at = end;
        }
        if at < bytes.len() {
            source.add_chunk(Chunk::copy(&bytes[at..]));
        }
        source.send_eof();
        BufReader::new(source)
    }

    #[test]
    fn header_only_after_screen_descriptor() {
        // The first 13 bytes (signature + logical screen descriptor) of a
        // 32×32 image, split 5/5/3, without EOF.
        let bytes = gif::screen_header(32, 32);
        assert_eq!(bytes.len(), 13);

        let mut source = BufSource::new();
        source.add_chunk(Chunk::copy(&bytes[0..5]));
        source.add_chunk(Chunk::copy(&bytes[5..10]));
        source.add_chunk(Chunk::copy(&bytes[10..13]));
        let mut decoder = GifDecoder::new(DecodeParams::rgb_only(), BufReader::new(source));

        assert_eq!(decoder.decode_image_info().unwrap(), Step::Ready);
        assert!(decoder.is_image_info_complete());
        assert_eq!(decoder.image_info().width, 32);
        assert_eq!(decoder.image_info().height, 32);
        assert!(decoder.image_info().multiframe);
        assert!(!decoder.is_frame_complete(0));
    }

    #[test]
    fn single_frame_decodes_to_rgb() {
        let bytes = gif::single_frame_2x2();
        let mut decoder = GifDecoder::new(DecodeParams::rgb_only(), feed(&bytes, &[7, 9, 4]));

        assert_eq!(decoder.decode().unwrap(), Step::Ready);
        assert!(decoder.is_image_complete());
        assert_eq!(decoder.frame_count(), 1);

        let frame = decoder.frame_at(0).unwrap();
        assert_eq!(frame.color_scheme(), ColorScheme::Rgb);
        assert_eq!(frame.pixel(0, 0), &[0xFF, 0x00, 0x00]);
        assert_eq!(frame.pixel(1, 0), &[0x00, 0xFF, 0x00]);
        assert_eq!(frame.pixel(0, 1), &[0x00, 0x00, 0xFF]);
        assert_eq!(frame.pixel(1, 1), &[0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn transparency_upgrades_to_rgba() {
        let bytes = gif::animated(3, 4, 2, Some(0));
        let mut decoder = GifDecoder::new(DecodeParams::rgb_only(), feed(&bytes, &[11]));

        assert_eq!(decoder.decode().unwrap(), Step::Ready);
        assert_eq!(decoder.frame_count(), 2);
        let frame = decoder.frame_at(0).unwrap();
        assert_eq!(frame.color_scheme(), ColorScheme::Rgba);
        // Palette index 0 is the transparent pixel.
        assert_eq!(frame.pixel(0, 0)[3], 0x00);
    }

    #[test]
    fn animated_gif_reports_loop_count_and_durations() {
        let bytes = gif::animated(4, 4, 3, None);
        let mut decoder = GifDecoder::new(DecodeParams::rgb_only(), feed(&bytes, &[5, 8, 13]));

        loop {
            match decoder.decode().unwrap() {
                Step::Ready if decoder.is_image_complete() => break,
                Step::Ready | Step::Pending => {}
                Step::Finished => break,
            }
        }

        assert_eq!(decoder.frame_count(), 3);
        // The synthesized animation loops forever and every frame lasts
        // 40 ms (4 hundredths).
        assert_eq!(decoder.image_info().loop_count, None);
        assert_eq!(decoder.frame_at(1).unwrap().duration_ms(), 40);
        assert!(decoder.is_multiframe());
    }

    #[test]
    fn truncated_lzw_stream_is_a_decode_error() {
        let bytes = gif::truncated_image_data();
        let mut decoder = GifDecoder::new(DecodeParams::rgb_only(), feed(&bytes, &[bytes.len()]));

        let error = loop {
            match decoder.decode() {
                Ok(Step::Pending) => {}
                Ok(other) => panic!("expected decode error, got {other:?}"),
                Err(error) => break error,
            }
        };
        assert_eq!(error, Error::Decode("Image data too short".to_string()));

        // The decoder stays pinned on the same error.
        assert_eq!(decoder.decode(), Err(error));
    }

    #[test]
    fn pending_until_data_arrives() {
        let bytes = gif::single_frame_2x2();
        let mut source = BufSource::new();
        source.add_chunk(Chunk::copy(&bytes[0..3]));
        let mut decoder = GifDecoder::new(DecodeParams::rgb_only(), BufReader::new(source));

        assert_eq!(decoder.decode().unwrap(), Step::Pending);
        decoder
            .source_mut()
            .source_mut()
            .add_chunk(Chunk::copy(&bytes[3..]));
        decoder.source_mut().source_mut().send_eof();
        assert_eq!(decoder.decode().unwrap(), Step::Ready);
        assert!(decoder.is_image_complete());
    }
}
