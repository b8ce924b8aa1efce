//! JPEG decoding: an incremental marker scanner covers the header work
//! (geometry, progressive flag, quality estimate, ICC/EXIF/XMP) directly on
//! the suspendable source; pixel decode bridges to `zune-jpeg` over the
//! buffered window once the stream is complete, after rewinding to the
//! start so the library sees an exact replay.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};
use log::warn;

use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder as ZuneJpegDecoder;

use crate::decoder::{DecodeParams, ImageDecoder};
use crate::error::{try_ready, Error, OpResult, Step};
use crate::frame::{ColorScheme, FrameStatus, ImageFrame};
use crate::info::{ImageFormat, ImageInfo};
use crate::io::{BufReader, Chunk};
use crate::metadata::{ImageMetadata, MetadataKind};

const MARKER_SOI: u8 = 0xD8;
const MARKER_EOI: u8 = 0xD9;
const MARKER_SOS: u8 = 0xDA;
const MARKER_DQT: u8 = 0xDB;
const MARKER_APP1: u8 = 0xE1;
const MARKER_APP2: u8 = 0xE2;

const EXIF_SIGNATURE: &[u8] = b"Exif\0\0";
const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const ICC_SIGNATURE: &[u8] = b"ICC_PROFILE\0";
// Signature plus sequence and count bytes.
const ICC_SKIP_LEN: usize = ICC_SIGNATURE.len() + 2;

/// Standard luminance quantization table, JPEG spec section K.1.
const STD_LUMINANCE_QUANT: [u16; 64] = [
    16, 11, 10, 16, 24, 40, 51, 61, 12, 12, 14, 19, 26, 58, 60, 55, 14, 13, 16, 24, 40, 57, 69,
    56, 14, 17, 22, 29, 51, 87, 80, 62, 18, 22, 37, 56, 68, 109, 103, 77, 24, 35, 55, 64, 81,
    104, 113, 92, 49, 64, 78, 87, 103, 121, 120, 101, 72, 92, 95, 98, 112, 100, 103, 99,
];

/// Standard chrominance quantization table, JPEG spec section K.1.
const STD_CHROMINANCE_QUANT: [u16; 64] = [
    17, 18, 24, 47, 99, 99, 99, 99, 18, 21, 26, 66, 99, 99, 99, 99, 24, 26, 56, 99, 99, 99, 99,
    99, 47, 66, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
    99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Expecting the SOI marker pair.
    Soi,
    /// Expecting the next `FF xx` marker pair.
    Marker,
    /// Reading a marker segment; the length is parsed first, then the
    /// payload, so a suspension between the two resumes cleanly.
    Segment { marker: u8, length: Option<usize> },
    /// Past SOS. The remaining bytes are entropy-coded data for the pixel
    /// bridge; the scanner is done.
    EntropyData,
}

pub struct JpegDecoder {
    source: BufReader,
    params: DecodeParams,
    state: ScanState,

    image_info: ImageInfo,
    frame: ImageFrame,
    metadata: ImageMetadata,

    icc_segments: BTreeMap<u8, Vec<u8>>,
    icc_expected: usize,
    icc_valid: bool,
    quant_tables: [Option<[u16; 64]>; 2],

    header_complete: bool,
    pixels_decoded: bool,
    error: Option<Error>,
}

impl JpegDecoder {
    pub fn new(params: DecodeParams, source: BufReader) -> JpegDecoder {
        JpegDecoder {
            source,
            params,
            state: ScanState::Soi,
            image_info: ImageInfo::new(ImageFormat::Jpeg),
            frame: ImageFrame::new(),
            metadata: ImageMetadata::new(),
            icc_segments: BTreeMap::new(),
            icc_expected: 0,
            icc_valid: true,
            quant_tables: [None, None],
            header_complete: false,
            pixels_decoded: false,
            error: None,
        }
    }

    fn fail(&mut self, error: Error) -> OpResult {
        self.error = Some(error.clone());
        Err(error)
    }

    /// Drives the marker scanner until SOS, an error, or starvation.
    fn scan_header(&mut self) -> OpResult {
        loop {
            match self.scan_step() {
                Ok(Step::Ready) => continue,
                other => return other,
            }
        }
    }

    fn scan_step(&mut self) -> OpResult {
        match self.state {
            ScanState::Soi => {
                let mut buf = [0u8; 2];
                try_ready!(self.source.read_n_into(&mut buf), "JPEG signature");
                if buf != [0xFF, MARKER_SOI] {
                    return Err(Error::Decode("missing JPEG SOI marker".to_string()));
                }
                self.state = ScanState::Marker;
                Ok(Step::Ready)
            }
            ScanState::Marker => {
                let mut buf = [0u8; 2];
                try_ready!(self.source.read_n_into(&mut buf), "JPEG marker");
                if buf[0] != 0xFF {
                    return Err(Error::Decode("invalid JPEG marker prefix".to_string()));
                }
                match buf[1] {
                    // Fill byte; rescan from the second FF.
                    0xFF => {
                        self.source.unread_n(1);
                    }
                    0x00 => {
                        return Err(Error::Decode("stuffed byte outside scan".to_string()));
                    }
                    MARKER_EOI => {
                        return Err(Error::Decode(
                            "JPEG ended before image data".to_string(),
                        ));
                    }
                    // Standalone markers carry no segment.
                    0x01 | 0xD0..=0xD7 | MARKER_SOI => {}
                    marker => {
                        self.state = ScanState::Segment {
                            marker,
                            length: None,
                        };
                    }
                }
                Ok(Step::Ready)
            }
            ScanState::Segment { marker, length } => {
                let payload_len = match length {
                    Some(len) => len,
                    None => {
                        let mut buf = [0u8; 2];
                        try_ready!(self.source.read_n_into(&mut buf), "JPEG segment length");
                        let total = BigEndian::read_u16(&buf) as usize;
                        if total < 2 {
                            return Err(Error::Decode("invalid JPEG segment length".to_string()));
                        }
                        let len = total - 2;
                        self.state = ScanState::Segment {
                            marker,
                            length: Some(len),
                        };
                        return Ok(Step::Ready);
                    }
                };

                if segment_is_interesting(marker) {
                    let payload: Vec<u8> = {
                        let bytes = try_ready!(self.source.read_n(payload_len), "JPEG segment");
                        bytes.to_vec()
                    };
                    self.parse_segment(marker, &payload)?;
                } else {
                    try_ready!(self.source.skip_n(payload_len), "JPEG segment");
                }

                if marker == MARKER_SOS {
                    self.finish_header()?;
                    self.state = ScanState::EntropyData;
                } else {
                    self.state = ScanState::Marker;
                }
                Ok(Step::Ready)
            }
            ScanState::EntropyData => Ok(Step::Finished),
        }
    }

    fn parse_segment(&mut self, marker: u8, payload: &[u8]) -> Result<(), Error> {
        match marker {
            m if is_sof(m) => self.parse_sof(m, payload),
            MARKER_DQT => {
                self.parse_dqt(payload);
                Ok(())
            }
            MARKER_APP1 => {
                self.parse_app1(payload);
                Ok(())
            }
            MARKER_APP2 => {
                self.parse_app2(payload);
                Ok(())
            }
            MARKER_SOS => Ok(()),
            _ => Ok(()),
        }
    }

    fn parse_sof(&mut self, marker: u8, payload: &[u8]) -> Result<(), Error> {
        if payload.len() < 6 {
            return Err(Error::Decode("truncated JPEG frame header".to_string()));
        }
        let height = BigEndian::read_u16(&payload[1..3]);
        let width = BigEndian::read_u16(&payload[3..5]);
        let components = payload[5];

        self.image_info.width = u32::from(width);
        self.image_info.height = u32::from(height);
        // Progressive DCT, Huffman or arithmetic, plus their differential
        // forms.
        self.image_info.progressive = matches!(marker, 0xC2 | 0xC6 | 0xCA | 0xCE);

        let scheme = match components {
            1 => {
                if self.params.color_scheme_allowed(ColorScheme::Grayscale) {
                    ColorScheme::Grayscale
                } else {
                    ColorScheme::Rgb
                }
            }
            3 => ColorScheme::Rgb,
            _ => {
                return Err(Error::Decode("Unsupported color scheme".to_string()));
            }
        };
        self.frame.set_size(u32::from(width), u32::from(height));
        self.frame.set_color_scheme(scheme);
        Ok(())
    }

    fn parse_dqt(&mut self, payload: &[u8]) {
        let mut at = 0;
        while at < payload.len() {
            let precision = payload[at] >> 4;
            let table_id = (payload[at] & 0x0F) as usize;
            at += 1;
            let entry_size = if precision == 0 { 1 } else { 2 };
            if at + 64 * entry_size > payload.len() {
                return;
            }
            let mut table = [0u16; 64];
            for (i, entry) in table.iter_mut().enumerate() {
                *entry = if entry_size == 1 {
                    u16::from(payload[at + i])
                } else {
                    BigEndian::read_u16(&payload[at + 2 * i..])
                };
            }
            at += 64 * entry_size;
            if table_id < 2 {
                self.quant_tables[table_id] = Some(table);
            }
        }
    }

    fn parse_app1(&mut self, payload: &[u8]) {
        if payload.starts_with(EXIF_SIGNATURE) {
            if self.metadata.has(MetadataKind::Exif) {
                warn!("ignoring additional Exif segment");
                return;
            }
            self.metadata.append(
                MetadataKind::Exif,
                Chunk::copy(&payload[EXIF_SIGNATURE.len()..]),
            );
        } else if payload.starts_with(XMP_SIGNATURE) {
            if self.metadata.has(MetadataKind::Xmp) {
                warn!("ignoring additional XMP segment");
                return;
            }
            self.metadata.append(
                MetadataKind::Xmp,
                Chunk::copy(&payload[XMP_SIGNATURE.len()..]),
            );
        }
    }

    /// ICC profiles may span numbered APP2 segments; they are reassembled
    /// in sequence order. Any numbering inconsistency drops the profile.
    fn parse_app2(&mut self, payload: &[u8]) {
        if !payload.starts_with(ICC_SIGNATURE) || payload.len() <= ICC_SKIP_LEN || !self.icc_valid
        {
            return;
        }
        let seq = payload[ICC_SIGNATURE.len()];
        let count = payload[ICC_SIGNATURE.len() + 1] as usize;
        let segment = &payload[ICC_SKIP_LEN..];

        if seq == 0 || count == 0 || segment.is_empty() {
            warn!("ICC segment with zero size, count or sequence number");
            self.drop_icc();
            return;
        }
        if self.icc_expected == 0 {
            self.icc_expected = count;
        } else if count != self.icc_expected {
            warn!(
                "inconsistent ICC segment count ({} / {count})",
                self.icc_expected
            );
            self.drop_icc();
            return;
        }
        if self.icc_segments.contains_key(&seq) {
            warn!("duplicate ICC segment number {seq}");
            self.drop_icc();
            return;
        }
        self.icc_segments.insert(seq, segment.to_vec());
    }

    fn drop_icc(&mut self) {
        self.icc_valid = false;
        self.icc_segments.clear();
    }

    /// Header scan reached SOS: freeze the header-derived state.
    fn finish_header(&mut self) -> Result<(), Error> {
        if self.frame.width() == 0 || self.frame.height() == 0 {
            return Err(Error::Decode("JPEG scan before frame header".to_string()));
        }

        if self.icc_valid && !self.icc_segments.is_empty() {
            let contiguous = self
                .icc_segments
                .keys()
                .zip(1u8..)
                .all(|(&seq, expected)| seq == expected);
            if !contiguous || self.icc_segments.len() != self.icc_expected {
                warn!(
                    "ICC segment count {} does not match expected {}",
                    self.icc_segments.len(),
                    self.icc_expected
                );
            } else {
                for segment in std::mem::take(&mut self.icc_segments).into_values() {
                    self.metadata.append(MetadataKind::Icc, Chunk::own(segment));
                }
            }
        }
        self.metadata.freeze_all();

        let quality = self.estimate_quality();
        self.frame.set_quality(quality);
        self.frame.set_progressive(self.image_info.progressive);
        self.frame.set_status(FrameStatus::HeaderComplete);
        self.image_info.quality = quality;
        self.header_complete = true;
        Ok(())
    }

    /// Quality estimation from the quantization tables, inverting the
    /// reference encoder's scaling of the spec K.1 base tables.
    fn estimate_quality(&self) -> Option<u8> {
        fn entries_sum(table: &[u16; 64], std_table: &[u16; 64]) -> f64 {
            let mut sum = 0.0;
            for (&value, &std_value) in table.iter().zip(std_table.iter()) {
                if value == 1 {
                    // 1 is the smallest legal divisor and means quality 100.
                    sum += 1.0;
                } else {
                    let scale = f64::from(value) / f64::from(std_value);
                    sum += if scale > 1.0 {
                        0.5 / scale
                    } else {
                        (2.0 - scale) / 2.0
                    };
                }
            }
            sum
        }

        let mut sum = 0.0;
        let mut count = 0.0;
        if let Some(table) = &self.quant_tables[0] {
            sum += entries_sum(table, &STD_LUMINANCE_QUANT);
            count += 64.0;
        }
        if let Some(table) = &self.quant_tables[1] {
            sum += entries_sum(table, &STD_CHROMINANCE_QUANT);
            count += 64.0;
        }
        if count == 0.0 {
            return None;
        }
        Some(((sum * 100.0 / count) + 0.5).min(100.0) as u8)
    }

    /// Runs the pixel bridge over the whole buffered stream.
    fn decode_pixels(&mut self) -> OpResult {
        if !self.source.source().eof_received() {
            // The slice-based bridge needs the complete entropy stream; a
            // truncated one would be indistinguishable from a corrupt one.
            return Ok(Step::Pending);
        }

        // Replay from the very start; the scanner's reads are all within
        // the retained window because nothing was freed.
        let offset = self.source.offset();
        self.source.unread_n(offset);
        let total = self.source.source().size();

        let scheme = self.frame.color_scheme();
        let out_colorspace = match scheme {
            ColorScheme::Grayscale => ColorSpace::Luma,
            _ => ColorSpace::RGB,
        };

        let pixels = {
            let window = try_ready!(self.source.read_n(total), "JPEG stream");
            let options = DecoderOptions::default().jpeg_set_out_colorspace(out_colorspace);
            let mut decoder = ZuneJpegDecoder::new_with_options(window, options);
            decoder
                .decode()
                .map_err(|e| Error::Decode(format!("jpeg decode: {e:?}")))?
        };

        let expected = self.frame.width() as usize
            * self.frame.height() as usize
            * self.frame.color_scheme().bytes_per_pixel();
        if pixels.len() != expected {
            return Err(Error::Decode(format!(
                "jpeg decode produced {} bytes, expected {expected}",
                pixels.len()
            )));
        }

        self.frame.init();
        self.frame.set_status(FrameStatus::Partial);
        self.frame.pixels_mut().copy_from_slice(&pixels);
        self.frame.set_status(FrameStatus::Complete);
        self.pixels_decoded = true;
        Ok(Step::Ready)
    }
}

fn is_sof(marker: u8) -> bool {
    matches!(
        marker,
        0xC0 | 0xC1 | 0xC2 | 0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF
    )
}

fn segment_is_interesting(marker: u8) -> bool {
    is_sof(marker) || matches!(marker, MARKER_DQT | MARKER_APP1 | MARKER_APP2 | MARKER_SOS)
}

impl ImageDecoder for JpegDecoder {
    fn image_info(&self) -> &ImageInfo {
        &self.image_info
    }

    fn is_image_info_complete(&self) -> bool {
        self.header_complete
    }

    fn frame_count(&self) -> usize {
        usize::from(self.pixels_decoded)
    }

    fn is_multiframe(&self) -> bool {
        false
    }

    fn is_frame_complete(&self, index: usize) -> bool {
        index == 0 && self.pixels_decoded
    }

    fn frame_at(&self, index: usize) -> Option<&ImageFrame> {
        (index == 0 && self.pixels_decoded).then_some(&self.frame)
    }

    fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    fn is_all_metadata_complete(&self) -> bool {
        self.header_complete
    }

    fn is_all_frames_complete(&self) -> bool {
        self.pixels_decoded
    }

    fn is_image_complete(&self) -> bool {
        self.pixels_decoded
    }

    fn decode(&mut self) -> OpResult {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if self.pixels_decoded {
            return Ok(Step::Ready);
        }
        if !self.header_complete {
            match self.scan_header() {
                Ok(Step::Ready) | Ok(Step::Finished) => {}
                Ok(Step::Pending) => return Ok(Step::Pending),
                Err(error) => return self.fail(error),
            }
        }
        match self.decode_pixels() {
            Ok(step) => Ok(step),
            Err(error) => self.fail(error),
        }
    }

    fn decode_image_info(&mut self) -> OpResult {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if self.header_complete {
            return Ok(Step::Ready);
        }
        match self.scan_header() {
            Ok(Step::Ready) | Ok(Step::Finished) => Ok(Step::Ready),
            Ok(Step::Pending) => Ok(Step::Pending),
            Err(error) => self.fail(error),
        }
    }

    fn source_mut(&mut self) -> &mut BufReader {
        &mut self.source
    }
}
