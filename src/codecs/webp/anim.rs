use byteorder::{ByteOrder, LittleEndian};

use super::container::{
    chunk_total_len, metadata_payload, vp8x_chunk, LeWriter, MetadataParts, CHUNK_HEADER_SIZE,
    FLAG_ALPHA, FLAG_ANIM, RIFF_HEADER_SIZE,
};
use super::{compress_pixels, WebpEncoderParams};
use crate::error::Error;
use crate::frame::{ColorScheme, DisposalMethod, ImageFrame};
use crate::info::ImageInfo;
use crate::io::{Chunk, ChunkList, VectorWriter};
use crate::metadata::ImageMetadata;
use crate::writing::OptimizationStats;

/// ANMF header: 2×u24 offset, 2×u24 size minus one, u24 duration, flags.
const ANMF_HEADER_SIZE: usize = 16;
/// Frames are full-canvas, so never blended and never disposed.
const ANMF_NO_BLEND: u8 = 0x02;

/// The animated path: every frame is composited onto a persistent RGBA
/// canvas (honouring the source disposal method), encoded on its own, and
/// its image-data chunks are wrapped into ANMF records of an in-crate RIFF
/// assembly. Compositing to the full canvas sidesteps the container's
/// even-offset rule and the blending edge cases.
pub(crate) struct MultiframeWebpEncoder {
    width: u32,
    height: u32,
    bg_color: Option<[u8; 4]>,
    loop_count: Option<u16>,
    canvas: Vec<u8>,
    saved_canvas: Option<Vec<u8>>,
    frames: Vec<EncodedFrame>,
    has_alpha: bool,
}

struct EncodedFrame {
    duration_ms: u32,
    /// ALPH/VP8/VP8L chunks of the encoded frame, headers and padding
    /// included.
    payload: Vec<u8>,
}

impl MultiframeWebpEncoder {
    pub fn new(info: &ImageInfo) -> MultiframeWebpEncoder {
        MultiframeWebpEncoder {
            width: info.width,
            height: info.height,
            bg_color: info.bg_color,
            loop_count: info.loop_count,
            canvas: vec![0; info.width as usize * info.height as usize * 4],
            saved_canvas: None,
            frames: Vec::new(),
            has_alpha: false,
        }
    }

    pub fn encode_frame(
        &mut self,
        params: &WebpEncoderParams,
        frame: &ImageFrame,
    ) -> Result<(), Error> {
        if frame.disposal_method() == DisposalMethod::RestorePrevious {
            self.saved_canvas = Some(self.canvas.clone());
        }

        self.composite(frame)?;

        let encoded = compress_pixels(
            params,
            frame.quality(),
            &self.canvas,
            self.width,
            self.height,
            true,
        )?;
        let (payload, frame_has_alpha) = extract_image_chunks(&encoded)?;
        self.has_alpha = self.has_alpha || frame_has_alpha;
        self.frames.push(EncodedFrame {
            duration_ms: frame.duration_ms(),
            payload,
        });

        // Disposal applies between this frame and the next.
        match frame.disposal_method() {
            DisposalMethod::None => {}
            DisposalMethod::Background => self.clear_rect(
                frame.x_offset(),
                frame.y_offset(),
                frame.width(),
                frame.height(),
            ),
            DisposalMethod::RestorePrevious => {
                if let Some(saved) = self.saved_canvas.take() {
                    self.canvas = saved;
                }
            }
        }
        Ok(())
    }

    /// Draws `frame` at its offset; transparent source pixels leave the
    /// canvas untouched.
    fn composite(&mut self, frame: &ImageFrame) -> Result<(), Error> {
        let copy_width = frame.width().min(self.width.saturating_sub(frame.x_offset()));
        let copy_height = frame.height().min(self.height.saturating_sub(frame.y_offset()));

        for y in 0..copy_height {
            let canvas_y = (frame.y_offset() + y) as usize;
            for x in 0..copy_width {
                let canvas_at = (canvas_y * self.width as usize + (frame.x_offset() + x) as usize) * 4;
                let src = frame.pixel(x, y);
                let rgba = match frame.color_scheme() {
                    ColorScheme::Rgb => [src[0], src[1], src[2], 0xFF],
                    ColorScheme::Rgba => {
                        if src[3] == 0 {
                            continue;
                        }
                        [src[0], src[1], src[2], src[3]]
                    }
                    ColorScheme::Grayscale => [src[0], src[0], src[0], 0xFF],
                    ColorScheme::GrayscaleAlpha => {
                        if src[1] == 0 {
                            continue;
                        }
                        [src[0], src[0], src[0], src[1]]
                    }
                    scheme => {
                        return Err(Error::Encode(format!(
                            "invalid color scheme for webp encoding: {scheme:?}"
                        )))
                    }
                };
                self.canvas[canvas_at..canvas_at + 4].copy_from_slice(&rgba);
            }
        }
        Ok(())
    }

    fn clear_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        let right = (x + width).min(self.width);
        let bottom = (y + height).min(self.height);
        for row in y..bottom {
            let start = (row * self.width + x) as usize * 4;
            let end = (row * self.width + right) as usize * 4;
            self.canvas[start..end].fill(0);
        }
    }

    pub fn finish(
        &mut self,
        params: &WebpEncoderParams,
        metadata: Option<&ImageMetadata>,
        dest: &mut dyn VectorWriter,
    ) -> Result<OptimizationStats, Error> {
        if self.frames.is_empty() {
            return Ok(OptimizationStats::default());
        }

        let parts = MetadataParts::select(
            metadata,
            params.write_icc,
            params.write_exif,
            params.write_xmp,
        );
        let parts = if params.should_write_metadata() {
            parts
        } else {
            MetadataParts::default()
        };

        // Animation parameters only make sense once more than one frame
        // was actually encoded.
        let animated = self.frames.len() > 1;

        let mut flags = parts.flags();
        if animated {
            flags |= FLAG_ANIM;
        }
        if self.has_alpha {
            flags |= FLAG_ALPHA;
        }

        let frames_size: usize = if animated {
            self.frames
                .iter()
                .map(|f| chunk_total_len(ANMF_HEADER_SIZE + f.payload.len()))
                .sum()
        } else {
            self.frames[0].payload.len()
        };
        let anim_size = if animated { chunk_total_len(6) } else { 0 };
        let riff_size =
            4 + chunk_total_len(10) + parts.total_size() + anim_size + frames_size;

        let mut output = ChunkList::new();

        let mut header = LeWriter::new(RIFF_HEADER_SIZE);
        header.write_bytes(b"RIFF").map_err(Error::from)?;
        header.write_u32_le(riff_size as u32).map_err(Error::from)?;
        header.write_bytes(b"WEBP").map_err(Error::from)?;
        output.push_back(header.release());
        output.push_back(vp8x_chunk(flags, self.width, self.height)?);

        if let Some(iccp) = parts.iccp.clone() {
            output.extend(metadata_payload(b"ICCP", iccp)?);
        }

        if animated {
            let mut anim = LeWriter::new(chunk_total_len(6));
            anim.write_bytes(b"ANIM").map_err(Error::from)?;
            anim.write_u32_le(6).map_err(Error::from)?;
            let bg = self.bg_color.unwrap_or([0, 0, 0, 0]);
            // Stored blue, green, red, alpha.
            anim.write_bytes(&[bg[2], bg[1], bg[0], bg[3]])
                .map_err(Error::from)?;
            anim.write_bytes(&self.loop_count.unwrap_or(0).to_le_bytes())
                .map_err(Error::from)?;
            output.push_back(anim.release());

            for frame in self.frames.drain(..) {
                let mut anmf = LeWriter::new(CHUNK_HEADER_SIZE + ANMF_HEADER_SIZE);
                anmf.write_bytes(b"ANMF").map_err(Error::from)?;
                anmf.write_u32_le((ANMF_HEADER_SIZE + frame.payload.len()) as u32)
                    .map_err(Error::from)?;
                anmf.write_u24_le(0).map_err(Error::from)?; // x / 2
                anmf.write_u24_le(0).map_err(Error::from)?; // y / 2
                anmf.write_u24_le(self.width - 1).map_err(Error::from)?;
                anmf.write_u24_le(self.height - 1).map_err(Error::from)?;
                anmf.write_u24_le(frame.duration_ms).map_err(Error::from)?;
                anmf.write_bytes(&[ANMF_NO_BLEND]).map_err(Error::from)?;
                output.push_back(anmf.release());
                output.push_back(Chunk::own(frame.payload));
            }
        } else {
            let frame = self.frames.remove(0);
            output.push_back(Chunk::own(frame.payload));
        }

        if let Some(exif) = parts.exif.clone() {
            output.extend(metadata_payload(b"EXIF", exif)?);
        }
        if let Some(xmp) = parts.xmp.clone() {
            output.extend(metadata_payload(b"XMP ", xmp)?);
        }

        let coded_size = output.iter().map(Chunk::len).sum::<usize>() as u64;
        dest.write_vec(output)?;

        Ok(OptimizationStats {
            coded_size,
            psnr: None,
        })
    }
}

/// Pulls the image-data chunks (ALPH first, then VP8 or VP8L) out of a
/// complete encoder output, keeping their headers and padding. Returns the
/// bytes and whether they carry alpha.
fn extract_image_chunks(webp: &[u8]) -> Result<(Vec<u8>, bool), Error> {
    if webp.len() < RIFF_HEADER_SIZE || &webp[0..4] != b"RIFF" || &webp[8..12] != b"WEBP" {
        return Err(Error::Encode("invalid encoder output".to_string()));
    }

    let mut payload = Vec::new();
    let mut has_alpha = false;
    let mut has_image = false;
    let mut at = RIFF_HEADER_SIZE;
    while at + CHUNK_HEADER_SIZE <= webp.len() {
        let fourcc = &webp[at..at + 4];
        let size = LittleEndian::read_u32(&webp[at + 4..at + 8]) as usize;
        let padded = size + (size & 1);
        let end = (at + CHUNK_HEADER_SIZE + padded).min(webp.len());
        match fourcc {
            b"ALPH" => {
                has_alpha = true;
                payload.extend_from_slice(&webp[at..end]);
            }
            b"VP8 " => {
                has_image = true;
                payload.extend_from_slice(&webp[at..end]);
            }
            b"VP8L" => {
                has_image = true;
                has_alpha = has_alpha
                    || webp
                        .get(at + CHUNK_HEADER_SIZE + 4)
                        .map(|&b| b & 0x10 != 0)
                        .unwrap_or(false);
                payload.extend_from_slice(&webp[at..end]);
            }
            _ => {}
        }
        at += CHUNK_HEADER_SIZE + padded;
    }

    if !has_image {
        return Err(Error::Encode("no image data in encoder output".to_string()));
    }
    Ok((payload, has_alpha))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameStatus;
    use crate::info::ImageFormat;
    use crate::testutil::SharedSink;

    fn solid_frame(width: u32, height: u32, rgba: [u8; 4], duration_ms: u32) -> ImageFrame {
        let mut frame = ImageFrame::new();
        frame.set_size(width, height);
        frame.set_color_scheme(ColorScheme::Rgba);
        frame.init();
        for pixel in frame.pixels_mut().chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
        frame.set_duration_ms(duration_ms);
        frame.set_status(FrameStatus::Complete);
        frame
    }

    fn anim_info(width: u32, height: u32) -> ImageInfo {
        let mut info = ImageInfo::new(ImageFormat::Gif);
        info.width = width;
        info.height = height;
        info.multiframe = true;
        info.loop_count = None;
        info.bg_color = Some([0, 0, 0, 0xFF]);
        info
    }

    #[test]
    fn multi_frame_output_decodes_with_matching_frame_count() {
        let info = anim_info(10, 8);
        let mut encoder = MultiframeWebpEncoder::new(&info);
        let params = WebpEncoderParams::default();

        for i in 0..4u8 {
            let frame = solid_frame(10, 8, [i * 60, 255 - i * 60, 0, 0xFF], 40);
            encoder.encode_frame(&params, &frame).unwrap();
        }

        let sink = SharedSink::new();
        let mut sink_writer = sink.clone();
        let stats = encoder.finish(&params, None, &mut sink_writer).unwrap();
        assert_eq!(stats.coded_size, sink.len() as u64);

        let bytes = sink.bytes();
        let mut decoder =
            image_webp::WebPDecoder::new(std::io::Cursor::new(&bytes)).expect("valid webp");
        assert!(decoder.is_animated());
        assert_eq!(decoder.num_frames(), 4);
        assert_eq!(decoder.dimensions(), (10, 8));

        let bpp = if decoder.has_alpha() { 4 } else { 3 };
        let mut buf = vec![0u8; 10 * 8 * bpp];
        let duration = decoder.read_frame(&mut buf).expect("first frame");
        assert_eq!(duration, 40);
    }

    #[test]
    fn single_frame_through_muxer_is_a_plain_extended_file() {
        let info = anim_info(6, 6);
        let mut encoder = MultiframeWebpEncoder::new(&info);
        let params = WebpEncoderParams::default();
        encoder
            .encode_frame(&params, &solid_frame(6, 6, [1, 2, 3, 255], 0))
            .unwrap();

        let sink = SharedSink::new();
        let mut sink_writer = sink.clone();
        encoder.finish(&params, None, &mut sink_writer).unwrap();

        let bytes = sink.bytes();
        let mut decoder =
            image_webp::WebPDecoder::new(std::io::Cursor::new(&bytes)).expect("valid webp");
        assert!(!decoder.is_animated());
        assert_eq!(decoder.dimensions(), (6, 6));
    }

    #[test]
    fn restore_previous_disposal_restores_the_canvas() {
        let info = anim_info(4, 4);
        let mut encoder = MultiframeWebpEncoder::new(&info);
        let params = WebpEncoderParams::default();

        let mut first = solid_frame(4, 4, [10, 20, 30, 255], 10);
        first.set_disposal_method(DisposalMethod::RestorePrevious);
        encoder.encode_frame(&params, &first).unwrap();
        // The canvas the second frame composites over is the pre-first
        // state (all transparent), not the first frame.
        assert!(encoder.canvas.iter().all(|&b| b == 0));
    }

    #[test]
    fn background_disposal_clears_the_frame_rect() {
        let info = anim_info(4, 4);
        let mut encoder = MultiframeWebpEncoder::new(&info);
        let params = WebpEncoderParams::default();

        let mut frame = solid_frame(4, 4, [10, 20, 30, 255], 10);
        frame.set_disposal_method(DisposalMethod::Background);
        encoder.encode_frame(&params, &frame).unwrap();
        assert!(encoder.canvas.iter().all(|&b| b == 0));
    }

    #[test]
    fn extract_image_chunks_requires_image_data() {
        let mut bogus = Vec::new();
        bogus.extend_from_slice(b"RIFF");
        bogus.extend_from_slice(&4u32.to_le_bytes());
        bogus.extend_from_slice(b"WEBP");
        assert!(extract_image_chunks(&bogus).is_err());
    }
}
