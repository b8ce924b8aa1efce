use std::collections::HashSet;

use crate::error::OpResult;
use crate::frame::{ColorScheme, ImageFrame};
use crate::info::ImageInfo;
use crate::io::BufReader;
use crate::metadata::ImageMetadata;

/// Decoder tuning shared by all formats.
#[derive(Debug, Clone, Default)]
pub struct DecodeParams {
    /// Colour schemes the caller can consume. Decoders upgrade anything
    /// else (grayscale to RGB, palette to RGB(A)) on the way out.
    pub allowed_color_schemes: HashSet<ColorScheme>,
}

impl DecodeParams {
    /// RGB and RGBA only, the set the WebP conversion pipeline wants.
    pub fn rgb_only() -> DecodeParams {
        let mut params = DecodeParams::default();
        params.allowed_color_schemes.insert(ColorScheme::Rgb);
        params.allowed_color_schemes.insert(ColorScheme::Rgba);
        params
    }

    pub fn allow(mut self, scheme: ColorScheme) -> DecodeParams {
        self.allowed_color_schemes.insert(scheme);
        self
    }

    pub fn color_scheme_allowed(&self, scheme: ColorScheme) -> bool {
        self.allowed_color_schemes.contains(&scheme)
    }
}

/// A push-fed image decoder: header first, then frames, metadata on the
/// side.
///
/// `decode_image_info` and `decode` return `Step::Pending` whenever the
/// underlying source runs dry; the caller adds data and calls again. A
/// header-only decode retains enough state for a later full decode to
/// resume where it left off.
pub trait ImageDecoder {
    /// Header facts. Meaningful once [`ImageDecoder::is_image_info_complete`]
    /// returns true.
    fn image_info(&self) -> &ImageInfo;

    fn is_image_info_complete(&self) -> bool;

    /// Number of frames decoded so far; not the total frame count unless
    /// [`ImageDecoder::is_all_frames_complete`].
    fn frame_count(&self) -> usize;

    /// True if this image format can carry more than one frame.
    fn is_multiframe(&self) -> bool;

    fn is_frame_complete(&self, index: usize) -> bool;

    fn frame_at(&self, index: usize) -> Option<&ImageFrame>;

    fn metadata(&self) -> &ImageMetadata;

    fn is_all_metadata_complete(&self) -> bool;

    fn is_all_frames_complete(&self) -> bool;

    fn is_image_complete(&self) -> bool;

    /// Decodes as far as the available data allows.
    fn decode(&mut self) -> OpResult;

    /// Decodes only the header.
    fn decode_image_info(&mut self) -> OpResult;

    /// The suspendable byte source this decoder reads from. New input
    /// chunks are appended here.
    fn source_mut(&mut self) -> &mut BufReader;
}
