use crate::codecs::{CodecFactory, DefaultCodecFactory};
use crate::error::{Error, OpResult, Step};
use crate::info::ImageFormat;
use crate::io::{BufReader, VectorWriter};
use crate::reading::{DecodingReader, ImageReader};
use crate::writing::{ImageWriter, MultiFrameWriter, SingleFrameWriter};

/// Policy object of the optimization driver: whether to run at all, which
/// codecs carry the image, and whether trailing metadata is worth a drain
/// pass.
pub trait OptimizationStrategy {
    /// A `Finished` result stops the pipeline before it reads anything
    /// (e.g. the image is known to be too small to be worth optimizing).
    fn should_even_bother(&mut self) -> OpResult {
        Ok(Step::Ready)
    }

    fn create_image_reader(
        &mut self,
        format: ImageFormat,
        source: BufReader,
    ) -> Result<Box<dyn ImageReader>, Error>;

    fn create_image_writer(
        &mut self,
        dest: Box<dyn VectorWriter>,
        reader: &mut dyn ImageReader,
    ) -> Result<Box<dyn ImageWriter>, Error>;

    /// When true, the driver drains the reader after the last frame so
    /// metadata stored behind the image data (WebP EXIF/XMP) is picked up.
    fn should_wait_for_metadata(&self) -> bool {
        false
    }
}

/// The stock strategy: decode whatever arrives, re-encode as WebP, multi-
/// frame writer for animated sources.
pub struct ConvertToWebpStrategy {
    factory: Box<dyn CodecFactory>,
    wait_for_metadata: bool,
}

impl Default for ConvertToWebpStrategy {
    fn default() -> Self {
        ConvertToWebpStrategy::new(Box::<DefaultCodecFactory>::default())
    }
}

impl ConvertToWebpStrategy {
    pub fn new(factory: Box<dyn CodecFactory>) -> ConvertToWebpStrategy {
        ConvertToWebpStrategy {
            factory,
            wait_for_metadata: false,
        }
    }

    pub fn wait_for_metadata(mut self, wait: bool) -> ConvertToWebpStrategy {
        self.wait_for_metadata = wait;
        self
    }
}

impl OptimizationStrategy for ConvertToWebpStrategy {
    fn create_image_reader(
        &mut self,
        format: ImageFormat,
        source: BufReader,
    ) -> Result<Box<dyn ImageReader>, Error> {
        let decoder = self.factory.create_decoder(format, source)?;
        Ok(Box::new(DecodingReader::new(decoder)))
    }

    fn create_image_writer(
        &mut self,
        dest: Box<dyn VectorWriter>,
        reader: &mut dyn ImageReader,
    ) -> Result<Box<dyn ImageWriter>, Error> {
        let multiframe = reader
            .image_info()
            .ok_or_else(|| Error::Failed("image info not read yet".to_string()))?
            .multiframe;

        let encoder = self.factory.create_encoder(ImageFormat::WebP, dest)?;
        Ok(if multiframe {
            Box::new(MultiFrameWriter::new(encoder))
        } else {
            Box::new(SingleFrameWriter::new(encoder))
        })
    }

    fn should_wait_for_metadata(&self) -> bool {
        self.wait_for_metadata
    }
}
