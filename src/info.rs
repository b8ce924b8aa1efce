/// Recognized source image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    WebP,
}

/// Header-level facts about an image, available before any frame decodes.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// Source size in bytes, when known; 0 otherwise.
    pub size: u64,
    pub multiframe: bool,
    pub progressive: bool,
    /// Estimated encoder quality 0–100; `None` if unknown.
    pub quality: Option<u8>,
    /// Animation loop count; `None` loops forever.
    pub loop_count: Option<u16>,
    /// Background colour, RGBA.
    pub bg_color: Option<[u8; 4]>,
}

impl ImageInfo {
    pub fn new(format: ImageFormat) -> ImageInfo {
        ImageInfo {
            format,
            width: 0,
            height: 0,
            size: 0,
            multiframe: false,
            progressive: false,
            quality: None,
            loop_count: Some(1),
            bg_color: None,
        }
    }
}
