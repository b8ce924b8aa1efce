/// Pixel layout of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorScheme {
    Grayscale,
    GrayscaleAlpha,
    Rgb,
    Rgba,
    Yuv,
    Yuva,
    Unknown,
}

impl ColorScheme {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorScheme::Grayscale => 1,
            ColorScheme::GrayscaleAlpha => 2,
            ColorScheme::Rgb => 3,
            ColorScheme::Rgba => 4,
            // Packed planar 4:2:0; treated as opaque by the pixel accessors.
            ColorScheme::Yuv | ColorScheme::Yuva => 1,
            ColorScheme::Unknown => 0,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(
            self,
            ColorScheme::GrayscaleAlpha | ColorScheme::Rgba | ColorScheme::Yuva
        )
    }
}

/// How far along a frame's decode is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameStatus {
    Empty,
    HeaderComplete,
    Partial,
    Complete,
}

/// How a frame is cleared before the next one of an animation renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisposalMethod {
    #[default]
    None,
    Background,
    RestorePrevious,
}

/// A decoded pixel container.
///
/// Geometry and colour scheme are set first; [`ImageFrame::init`] then
/// allocates the pixel buffer and freezes both.
pub struct ImageFrame {
    status: FrameStatus,
    x_offset: u32,
    y_offset: u32,
    width: u32,
    height: u32,
    color_scheme: ColorScheme,
    data: Vec<u8>,
    inited: bool,
    duration_ms: u32,
    disposal_method: DisposalMethod,
    progressive: bool,
    quality: Option<u8>,
    required_previous_frame: Option<usize>,
}

impl Default for ImageFrame {
    fn default() -> Self {
        ImageFrame {
            status: FrameStatus::Empty,
            x_offset: 0,
            y_offset: 0,
            width: 0,
            height: 0,
            color_scheme: ColorScheme::Unknown,
            data: Vec::new(),
            inited: false,
            duration_ms: 0,
            disposal_method: DisposalMethod::None,
            progressive: false,
            quality: None,
            required_previous_frame: None,
        }
    }
}

impl ImageFrame {
    pub fn new() -> ImageFrame {
        ImageFrame::default()
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        debug_assert!(!self.inited, "frame geometry frozen by init");
        self.width = width;
        self.height = height;
    }

    pub fn set_offset(&mut self, x: u32, y: u32) {
        self.x_offset = x;
        self.y_offset = y;
    }

    pub fn set_color_scheme(&mut self, color_scheme: ColorScheme) {
        debug_assert!(!self.inited, "frame colour scheme frozen by init");
        self.color_scheme = color_scheme;
    }

    /// Allocates the pixel buffer for the configured geometry and freezes
    /// size and colour scheme.
    pub fn init(&mut self) {
        debug_assert!(!self.inited);
        self.data = vec![0; self.stride() as usize * self.height as usize];
        self.inited = true;
    }

    pub fn is_inited(&self) -> bool {
        self.inited
    }

    pub fn status(&self) -> FrameStatus {
        self.status
    }

    pub fn set_status(&mut self, status: FrameStatus) {
        self.status = status;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn x_offset(&self) -> u32 {
        self.x_offset
    }

    pub fn y_offset(&self) -> u32 {
        self.y_offset
    }

    pub fn color_scheme(&self) -> ColorScheme {
        self.color_scheme
    }

    pub fn bpp(&self) -> usize {
        self.color_scheme.bytes_per_pixel()
    }

    pub fn stride(&self) -> u32 {
        self.width * self.bpp() as u32
    }

    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    pub fn set_duration_ms(&mut self, duration_ms: u32) {
        self.duration_ms = duration_ms;
    }

    pub fn disposal_method(&self) -> DisposalMethod {
        self.disposal_method
    }

    pub fn set_disposal_method(&mut self, method: DisposalMethod) {
        self.disposal_method = method;
    }

    pub fn is_progressive(&self) -> bool {
        self.progressive
    }

    pub fn set_progressive(&mut self, progressive: bool) {
        self.progressive = progressive;
    }

    /// Estimated encoder quality of the source, 0–100; `None` if unknown.
    pub fn quality(&self) -> Option<u8> {
        self.quality
    }

    pub fn set_quality(&mut self, quality: Option<u8>) {
        self.quality = quality;
    }

    pub fn required_previous_frame(&self) -> Option<usize> {
        self.required_previous_frame
    }

    pub fn set_required_previous_frame(&mut self, index: Option<usize>) {
        self.required_previous_frame = index;
    }

    pub fn has_alpha(&self) -> bool {
        self.color_scheme.has_alpha()
    }

    pub fn is_grayscale(&self) -> bool {
        matches!(
            self.color_scheme,
            ColorScheme::Grayscale | ColorScheme::GrayscaleAlpha
        )
    }

    pub fn is_rgb(&self) -> bool {
        matches!(self.color_scheme, ColorScheme::Rgb | ColorScheme::Rgba)
    }

    pub fn is_yuv(&self) -> bool {
        matches!(self.color_scheme, ColorScheme::Yuv | ColorScheme::Yuva)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride() as usize;
        &self.data[y as usize * stride..(y as usize + 1) * stride]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let stride = self.stride() as usize;
        &mut self.data[y as usize * stride..(y as usize + 1) * stride]
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.bpp();
        let at = self.stride() as usize * y as usize + bpp * x as usize;
        &self.data[at..at + bpp]
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let bpp = self.bpp();
        let at = self.stride() as usize * y as usize + bpp * x as usize;
        &mut self.data[at..at + bpp]
    }
}
