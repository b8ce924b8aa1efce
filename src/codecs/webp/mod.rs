//! WebP encoding facade: one [`ImageEncoder`] regardless of frame count.
//! Single-frame sources take the simple path (encode, then rewrite the
//! container when metadata is wanted); animated sources go through the
//! in-crate RIFF muxer over per-frame encodes.

mod anim;
mod container;
mod simple;

use std::borrow::Cow;
use std::rc::Rc;

use anim::MultiframeWebpEncoder;
use simple::SimpleWebpEncoder;

use crate::error::{Error, OpResult, Step};
use crate::frame::{ColorScheme, ImageFrame};
use crate::info::ImageInfo;
use crate::io::VectorWriter;
use crate::metadata::ImageMetadata;
use crate::writing::{ImageEncoder, OptimizationStats};

/// How frames are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WebpCompression {
    #[default]
    Lossy,
    Lossless,
    /// Try both per frame, keep the smaller encoding.
    Mixed,
}

/// Returning false aborts the encode.
pub type ProgressCallback = Rc<dyn Fn() -> bool>;

#[derive(Clone)]
pub struct WebpEncoderParams {
    /// Requested quality, 0–100. The effective quality never exceeds the
    /// measured quality of the source frame, when one is known: there is
    /// no point re-encoding a low-quality source at a higher nominal
    /// quality.
    pub quality: f32,
    pub compression: WebpCompression,
    pub write_icc: bool,
    pub write_exif: bool,
    pub write_xmp: bool,
    pub progress: Option<ProgressCallback>,
}

impl Default for WebpEncoderParams {
    fn default() -> Self {
        WebpEncoderParams {
            quality: 50.0,
            compression: WebpCompression::default(),
            write_icc: true,
            write_exif: true,
            write_xmp: true,
            progress: None,
        }
    }
}

impl WebpEncoderParams {
    pub fn should_write_metadata(&self) -> bool {
        self.write_icc || self.write_exif || self.write_xmp
    }

    fn effective_quality(&self, frame_quality: Option<u8>) -> f32 {
        match frame_quality {
            Some(measured) if self.quality > f32::from(measured) => f32::from(measured),
            _ => self.quality,
        }
    }

    fn check_progress(&self) -> Result<(), Error> {
        if let Some(progress) = &self.progress {
            if !progress() {
                return Err(Error::Encode("aborted by progress callback".to_string()));
            }
        }
        Ok(())
    }
}

enum Inner {
    Idle,
    Simple(SimpleWebpEncoder),
    Multi(MultiframeWebpEncoder),
}

/// The encoder behind both the single- and the multi-frame writer.
pub struct WebpEncoder {
    params: WebpEncoderParams,
    dest: Box<dyn VectorWriter>,
    image_info: Option<ImageInfo>,
    metadata: Option<ImageMetadata>,
    inner: Inner,
}

impl WebpEncoder {
    pub fn new(params: WebpEncoderParams, dest: Box<dyn VectorWriter>) -> WebpEncoder {
        WebpEncoder {
            params,
            dest,
            image_info: None,
            metadata: None,
            inner: Inner::Idle,
        }
    }
}

impl ImageEncoder for WebpEncoder {
    fn initialize(&mut self, info: &ImageInfo) -> OpResult {
        self.image_info = Some(info.clone());
        Ok(Step::Ready)
    }

    fn set_metadata(&mut self, metadata: &ImageMetadata) {
        self.metadata = Some(metadata.clone());
    }

    fn encode_frame(&mut self, frame: Option<&ImageFrame>, last_frame: bool) -> OpResult {
        match (&mut self.inner, frame) {
            (Inner::Idle, Some(frame)) if last_frame => {
                // Single-frame image: the simple path, no muxing.
                let mut encoder = SimpleWebpEncoder::new();
                encoder.encode_frame(&self.params, frame)?;
                self.inner = Inner::Simple(encoder);
                Ok(Step::Ready)
            }
            (Inner::Idle, Some(frame)) => {
                let info = self
                    .image_info
                    .as_ref()
                    .ok_or_else(|| Error::Encode("encoder not initialized".to_string()))?;
                let mut encoder = MultiframeWebpEncoder::new(info);
                encoder.encode_frame(&self.params, frame)?;
                self.inner = Inner::Multi(encoder);
                Ok(Step::Ready)
            }
            (Inner::Multi(encoder), Some(frame)) => {
                encoder.encode_frame(&self.params, frame)?;
                Ok(Step::Ready)
            }
            (Inner::Simple(_), Some(_)) => Err(Error::Encode(
                "single-frame encode already finished".to_string(),
            )),
            // A flush without a frame; assembly happens in finish().
            (_, None) => Ok(Step::Ready),
        }
    }

    fn finish(&mut self) -> Result<OptimizationStats, Error> {
        let metadata = self.metadata.as_ref();
        match &mut self.inner {
            Inner::Idle => Ok(OptimizationStats::default()),
            Inner::Simple(encoder) => {
                encoder.finish(&self.params, metadata, self.dest.as_mut())
            }
            Inner::Multi(encoder) => {
                encoder.finish(&self.params, metadata, self.dest.as_mut())
            }
        }
    }
}

/// Compresses one RGB(A) buffer according to the compression mode and the
/// quality rule.
fn compress_pixels(
    params: &WebpEncoderParams,
    frame_quality: Option<u8>,
    pixels: &[u8],
    width: u32,
    height: u32,
    has_alpha: bool,
) -> Result<Vec<u8>, Error> {
    params.check_progress()?;
    let encoder = if has_alpha {
        webp::Encoder::from_rgba(pixels, width, height)
    } else {
        webp::Encoder::from_rgb(pixels, width, height)
    };
    let quality = params.effective_quality(frame_quality);

    let encoded: Vec<u8> = match params.compression {
        WebpCompression::Lossy => encoder.encode(quality).to_vec(),
        WebpCompression::Lossless => encoder.encode_lossless().to_vec(),
        WebpCompression::Mixed => {
            let lossy = encoder.encode(quality);
            let lossless = encoder.encode_lossless();
            if lossless.len() < lossy.len() {
                lossless.to_vec()
            } else {
                lossy.to_vec()
            }
        }
    };
    params.check_progress()?;
    Ok(encoded)
}

/// Pixel rows the `webp` importer can take: RGB(A) frames pass through,
/// grayscale is expanded, YUV has no import path here.
fn import_pixels(frame: &ImageFrame) -> Result<(Cow<'_, [u8]>, bool), Error> {
    match frame.color_scheme() {
        ColorScheme::Rgb => Ok((Cow::Borrowed(frame.pixels()), false)),
        ColorScheme::Rgba => Ok((Cow::Borrowed(frame.pixels()), true)),
        ColorScheme::Grayscale => {
            let mut rgb = Vec::with_capacity(frame.pixels().len() * 3);
            for &gray in frame.pixels() {
                rgb.extend_from_slice(&[gray, gray, gray]);
            }
            Ok((Cow::Owned(rgb), false))
        }
        ColorScheme::GrayscaleAlpha => {
            let mut rgba = Vec::with_capacity(frame.pixels().len() * 2);
            for ga in frame.pixels().chunks_exact(2) {
                rgba.extend_from_slice(&[ga[0], ga[0], ga[0], ga[1]]);
            }
            Ok((Cow::Owned(rgba), true))
        }
        scheme => Err(Error::Encode(format!(
            "invalid color scheme for webp encoding: {scheme:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameStatus;
    use crate::info::ImageFormat;
    use crate::metadata::MetadataKind;
    use crate::testutil::SharedSink;

    fn rgb_frame(width: u32, height: u32) -> ImageFrame {
        let mut frame = ImageFrame::new();
        frame.set_size(width, height);
        frame.set_color_scheme(ColorScheme::Rgb);
        frame.init();
        for (i, byte) in frame.pixels_mut().iter_mut().enumerate() {
            *byte = (i * 7) as u8;
        }
        frame.set_status(FrameStatus::Complete);
        frame
    }

    fn encode_single(params: WebpEncoderParams, metadata: Option<&ImageMetadata>) -> Vec<u8> {
        let sink = SharedSink::new();
        let mut encoder = WebpEncoder::new(params, Box::new(sink.clone()));
        let mut info = ImageInfo::new(ImageFormat::Jpeg);
        info.width = 8;
        info.height = 8;
        encoder.initialize(&info).unwrap();
        if let Some(metadata) = metadata {
            encoder.set_metadata(metadata);
        }
        let frame = rgb_frame(8, 8);
        encoder.encode_frame(Some(&frame), true).unwrap();
        let stats = encoder.finish().unwrap();
        assert_eq!(stats.coded_size, sink.len() as u64);
        sink.bytes()
    }

    #[test]
    fn single_frame_output_is_valid_webp() {
        let bytes = encode_single(WebpEncoderParams::default(), None);
        let mut decoder =
            image_webp::WebPDecoder::new(std::io::Cursor::new(&bytes)).expect("valid webp");
        assert_eq!(decoder.dimensions(), (8, 8));
        assert!(!decoder.is_animated());
    }

    #[test]
    fn metadata_is_spliced_into_the_container() {
        let mut metadata = ImageMetadata::new();
        metadata.append(MetadataKind::Icc, crate::io::Chunk::copy(b"icc-profile"));
        metadata.append(MetadataKind::Xmp, crate::io::Chunk::copy(b"<xmp/>"));
        metadata.freeze_all();

        let bytes = encode_single(WebpEncoderParams::default(), Some(&metadata));
        let mut decoder =
            image_webp::WebPDecoder::new(std::io::Cursor::new(&bytes)).expect("valid webp");
        assert_eq!(
            decoder.icc_profile().unwrap().as_deref(),
            Some(&b"icc-profile"[..])
        );
        assert_eq!(
            decoder.xmp_metadata().unwrap().as_deref(),
            Some(&b"<xmp/>"[..])
        );
    }

    #[test]
    fn quality_is_capped_by_the_source_estimate() {
        let params = WebpEncoderParams {
            quality: 80.0,
            ..Default::default()
        };
        assert_eq!(params.effective_quality(Some(40)), 40.0);
        assert_eq!(params.effective_quality(Some(90)), 80.0);
        assert_eq!(params.effective_quality(None), 80.0);
    }

    #[test]
    fn refusing_progress_callback_aborts() {
        let params = WebpEncoderParams {
            progress: Some(Rc::new(|| false)),
            ..Default::default()
        };
        let sink = SharedSink::new();
        let mut encoder = WebpEncoder::new(params, Box::new(sink));
        let frame = rgb_frame(4, 4);
        assert!(matches!(
            encoder.encode_frame(Some(&frame), true),
            Err(Error::Encode(_))
        ));
    }

    #[test]
    fn second_frame_after_simple_encode_is_rejected() {
        let sink = SharedSink::new();
        let mut encoder = WebpEncoder::new(WebpEncoderParams::default(), Box::new(sink));
        let frame = rgb_frame(4, 4);
        encoder.encode_frame(Some(&frame), true).unwrap();
        assert!(encoder.encode_frame(Some(&frame), false).is_err());
    }
}
