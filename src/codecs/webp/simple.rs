use super::container::{splice_metadata, MetadataParts};
use super::{compress_pixels, import_pixels, WebpEncoderParams};
use crate::error::Error;
use crate::frame::ImageFrame;
use crate::io::{Chunk, ChunkList, VectorWriter};
use crate::metadata::ImageMetadata;
use crate::writing::OptimizationStats;

/// The single-frame path: one library encode, then either a pass-through
/// write or the metadata container rewrite.
pub(crate) struct SimpleWebpEncoder {
    encoded: Option<Encoded>,
}

struct Encoded {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

impl SimpleWebpEncoder {
    pub fn new() -> SimpleWebpEncoder {
        SimpleWebpEncoder { encoded: None }
    }

    pub fn encode_frame(
        &mut self,
        params: &WebpEncoderParams,
        frame: &ImageFrame,
    ) -> Result<(), Error> {
        let (pixels, has_alpha) = import_pixels(frame)?;
        let bytes = compress_pixels(
            params,
            frame.quality(),
            &pixels,
            frame.width(),
            frame.height(),
            has_alpha,
        )?;
        self.encoded = Some(Encoded {
            bytes,
            width: frame.width(),
            height: frame.height(),
        });
        Ok(())
    }

    pub fn finish(
        &mut self,
        params: &WebpEncoderParams,
        metadata: Option<&ImageMetadata>,
        dest: &mut dyn VectorWriter,
    ) -> Result<OptimizationStats, Error> {
        let encoded = match self.encoded.take() {
            Some(encoded) => encoded,
            None => return Ok(OptimizationStats::default()),
        };

        let parts = MetadataParts::select(
            metadata,
            params.write_icc,
            params.write_exif,
            params.write_xmp,
        );

        let output = if !params.should_write_metadata() || parts.is_empty() {
            let mut list = ChunkList::new();
            list.push_back(Chunk::own(encoded.bytes));
            list
        } else {
            let mut list = ChunkList::new();
            list.push_back(Chunk::own(encoded.bytes));
            splice_metadata(list, encoded.width, encoded.height, &parts)?
        };

        let coded_size = output.iter().map(Chunk::len).sum::<usize>() as u64;
        // Finalization has nothing left that could suspend; a pending sink
        // has already taken ownership of the chunks.
        dest.write_vec(output)?;

        Ok(OptimizationStats {
            coded_size,
            psnr: None,
        })
    }
}
