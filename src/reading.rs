use crate::decoder::ImageDecoder;
use crate::error::{Error, OpResult, Step};
use crate::frame::ImageFrame;
use crate::info::ImageInfo;
use crate::io::BufReader;
use crate::metadata::ImageMetadata;

/// Frame-oriented view of a decoding image, as the optimization driver
/// consumes it.
pub trait ImageReader {
    /// True while another frame may still be produced. Conservative: also
    /// true before the header is known.
    fn has_more_frames(&self) -> bool;

    fn metadata(&self) -> &ImageMetadata;

    fn num_frames_read(&self) -> usize;

    /// Advances the decoder until the header is available.
    fn read_image_info(&mut self) -> OpResult;

    /// Header facts, once [`ImageReader::read_image_info`] returned
    /// `Ready`.
    fn image_info(&self) -> Option<&ImageInfo>;

    /// Advances the decoder until one more frame is complete. On `Ready`
    /// the new frame is the last one reported by
    /// [`ImageReader::num_frames_read`].
    fn read_next_frame(&mut self) -> OpResult;

    /// Random access to already-read frames.
    fn frame_at(&self, index: usize) -> Option<&ImageFrame>;

    /// Reads the remainder of the image, picking up anything that trails
    /// the frames (e.g. WebP EXIF/XMP chunks).
    fn read_till_the_end(&mut self) -> OpResult;

    /// Input side of the underlying decoder, for feeding more data.
    fn source_mut(&mut self) -> &mut BufReader;
}

/// [`ImageReader`] over an [`ImageDecoder`].
pub struct DecodingReader {
    decoder: Box<dyn ImageDecoder>,
    num_frames_read: usize,
    image_info: Option<ImageInfo>,
}

impl DecodingReader {
    pub fn new(decoder: Box<dyn ImageDecoder>) -> DecodingReader {
        DecodingReader {
            decoder,
            num_frames_read: 0,
            image_info: None,
        }
    }

    fn advance_decode(&mut self, header_only: bool) -> OpResult {
        if self.image_info.is_none() {
            match self.decoder.decode_image_info()? {
                Step::Ready | Step::Finished => {}
                Step::Pending => return Ok(Step::Pending),
            }
            self.image_info = Some(self.decoder.image_info().clone());
        }

        if header_only {
            return Ok(Step::Ready);
        }
        self.decoder.decode()
    }
}

impl ImageReader for DecodingReader {
    fn has_more_frames(&self) -> bool {
        if self.image_info.is_none() {
            return true;
        }
        if !self.decoder.is_all_frames_complete() {
            return true;
        }
        self.num_frames_read < self.decoder.frame_count()
    }

    fn metadata(&self) -> &ImageMetadata {
        self.decoder.metadata()
    }

    fn num_frames_read(&self) -> usize {
        self.num_frames_read
    }

    fn read_image_info(&mut self) -> OpResult {
        self.advance_decode(true)
    }

    fn image_info(&self) -> Option<&ImageInfo> {
        self.image_info.as_ref()
    }

    fn read_next_frame(&mut self) -> OpResult {
        let result = self.advance_decode(false)?;

        if self.decoder.is_frame_complete(self.num_frames_read) {
            self.num_frames_read += 1;
            return Ok(Step::Ready);
        }

        match result {
            Step::Pending => Ok(Step::Pending),
            Step::Ready | Step::Finished => {
                // The decoder cannot produce the frame the caller asked
                // for; has_more_frames() should have gated this call.
                Err(Error::ReadFrame("no frame available".to_string()))
            }
        }
    }

    fn frame_at(&self, index: usize) -> Option<&ImageFrame> {
        if index >= self.num_frames_read {
            return None;
        }
        self.decoder.frame_at(index)
    }

    fn read_till_the_end(&mut self) -> OpResult {
        while !self.decoder.is_image_complete() {
            match self.advance_decode(false)? {
                Step::Ready | Step::Finished => {}
                Step::Pending => return Ok(Step::Pending),
            }
        }
        Ok(Step::Ready)
    }

    fn source_mut(&mut self) -> &mut BufReader {
        self.decoder.source_mut()
    }
}
