//! Per-format codecs and the factory the optimization strategy uses to
//! instantiate them.

pub mod gif;
pub mod jpeg;
pub mod png;
pub mod webp;
mod webp_decoder;

pub use webp_decoder::WebpDecoder;

use crate::decoder::{DecodeParams, ImageDecoder};
use crate::error::Error;
use crate::info::ImageFormat;
use crate::io::{BufReader, VectorWriter};
use crate::writing::ImageEncoder;

/// Creates decoders and encoders for the pipeline.
pub trait CodecFactory {
    fn create_decoder(
        &self,
        format: ImageFormat,
        source: BufReader,
    ) -> Result<Box<dyn ImageDecoder>, Error>;

    fn create_encoder(
        &self,
        format: ImageFormat,
        dest: Box<dyn VectorWriter>,
    ) -> Result<Box<dyn ImageEncoder>, Error>;
}

/// The stock factory: one decoder per supported input format, WebP as the
/// only encode target.
pub struct DefaultCodecFactory {
    pub decode_params: DecodeParams,
    pub encoder_params: webp::WebpEncoderParams,
}

impl Default for DefaultCodecFactory {
    fn default() -> Self {
        DefaultCodecFactory {
            decode_params: DecodeParams::rgb_only(),
            encoder_params: webp::WebpEncoderParams::default(),
        }
    }
}

impl CodecFactory for DefaultCodecFactory {
    fn create_decoder(
        &self,
        format: ImageFormat,
        source: BufReader,
    ) -> Result<Box<dyn ImageDecoder>, Error> {
        let params = self.decode_params.clone();
        Ok(match format {
            ImageFormat::Jpeg => Box::new(jpeg::JpegDecoder::new(params, source)),
            ImageFormat::Png => Box::new(png::PngDecoder::new(params, source)),
            ImageFormat::Gif => Box::new(gif::GifDecoder::new(params, source)),
            ImageFormat::WebP => Box::new(WebpDecoder::new(params, source)),
        })
    }

    fn create_encoder(
        &self,
        format: ImageFormat,
        dest: Box<dyn VectorWriter>,
    ) -> Result<Box<dyn ImageEncoder>, Error> {
        match format {
            ImageFormat::WebP => Ok(Box::new(webp::WebpEncoder::new(
                self.encoder_params.clone(),
                dest,
            ))),
            other => Err(Error::NoEncodePath(format!(
                "no encoder for {other:?}"
            ))),
        }
    }
}
