use crate::error::{Error, OpResult};
use crate::frame::ImageFrame;
use crate::info::ImageInfo;
use crate::metadata::ImageMetadata;

/// What came out of an optimization run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizationStats {
    /// Bytes of encoded output.
    pub coded_size: u64,
    /// Overall PSNR of the encode, when the encoder reports one.
    pub psnr: Option<f64>,
}

/// A frame sink backed by some specific encoder.
pub trait ImageEncoder {
    fn initialize(&mut self, info: &ImageInfo) -> OpResult;

    /// Stores a snapshot of the source metadata to be embedded in the
    /// output.
    fn set_metadata(&mut self, metadata: &ImageMetadata);

    /// Encodes `frame`; `frame == None` with `last_frame == true` flushes a
    /// multi-frame encode.
    fn encode_frame(&mut self, frame: Option<&ImageFrame>, last_frame: bool) -> OpResult;

    fn finish(&mut self) -> Result<OptimizationStats, Error>;
}

/// Where the optimization driver puts frames.
pub trait ImageWriter {
    fn initialize(&mut self, info: &ImageInfo) -> OpResult;
    fn set_metadata(&mut self, metadata: &ImageMetadata);
    fn write_frame(&mut self, frame: &ImageFrame) -> OpResult;
    fn finish_write(&mut self) -> Result<OptimizationStats, Error>;
}

/// Writer for single-frame images; a second frame is a caller bug.
pub struct SingleFrameWriter {
    encoder: Box<dyn ImageEncoder>,
    frame_written: bool,
}

impl SingleFrameWriter {
    pub fn new(encoder: Box<dyn ImageEncoder>) -> SingleFrameWriter {
        SingleFrameWriter {
            encoder,
            frame_written: false,
        }
    }
}

impl ImageWriter for SingleFrameWriter {
    fn initialize(&mut self, info: &ImageInfo) -> OpResult {
        self.encoder.initialize(info)
    }

    fn set_metadata(&mut self, metadata: &ImageMetadata) {
        self.encoder.set_metadata(metadata);
    }

    fn write_frame(&mut self, frame: &ImageFrame) -> OpResult {
        if self.frame_written {
            return Err(Error::Failed(
                "attempt to write multiple frames using SingleFrameWriter".to_string(),
            ));
        }
        self.frame_written = true;
        self.encoder.encode_frame(Some(frame), true)
    }

    fn finish_write(&mut self) -> Result<OptimizationStats, Error> {
        self.encoder.finish()
    }
}

/// Writer for animations: every frame is forwarded, the flush happens at
/// the end.
pub struct MultiFrameWriter {
    encoder: Box<dyn ImageEncoder>,
}

impl MultiFrameWriter {
    pub fn new(encoder: Box<dyn ImageEncoder>) -> MultiFrameWriter {
        MultiFrameWriter { encoder }
    }
}

impl ImageWriter for MultiFrameWriter {
    fn initialize(&mut self, info: &ImageInfo) -> OpResult {
        self.encoder.initialize(info)
    }

    fn set_metadata(&mut self, metadata: &ImageMetadata) {
        self.encoder.set_metadata(metadata);
    }

    fn write_frame(&mut self, frame: &ImageFrame) -> OpResult {
        self.encoder.encode_frame(Some(frame), false)
    }

    fn finish_write(&mut self) -> Result<OptimizationStats, Error> {
        self.encoder.encode_frame(None, true)?;
        self.encoder.finish()
    }
}
