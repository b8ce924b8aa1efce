//! RIFF-level plumbing for WebP output: little-endian chunk assembly,
//! metadata chunk framing, and the VP8X rewrite that turns a bare encoder
//! output into an extended container with ICC/EXIF/XMP spliced in at the
//! positions the format requires (ICC before the image body, EXIF and XMP
//! after it).

use crate::error::Error;
use crate::io::{BufReader, BufSource, BufWriter, Chunk, ChunkList, Io, IoError};
use crate::metadata::{ImageMetadata, MetadataKind};

pub(crate) const TAG_SIZE: usize = 4;
pub(crate) const CHUNK_HEADER_SIZE: usize = 8;
pub(crate) const RIFF_HEADER_SIZE: usize = 12;
/// Chunk header plus the 10-byte VP8X payload.
pub(crate) const VP8X_CHUNK_SIZE: usize = 18;

pub(crate) const FLAG_ICCP: u32 = 0x20;
pub(crate) const FLAG_ALPHA: u32 = 0x10;
pub(crate) const FLAG_EXIF: u32 = 0x08;
pub(crate) const FLAG_XMP: u32 = 0x04;
pub(crate) const FLAG_ANIM: u32 = 0x02;

/// Little-endian writer over a detached [`BufWriter`]; the assembled bytes
/// are taken back as one chunk.
pub(crate) struct LeWriter {
    buf: BufWriter,
}

impl LeWriter {
    pub fn new(capacity: usize) -> LeWriter {
        LeWriter {
            // One byte of slack: a detached BufWriter filled to the brim
            // would try to flush.
            buf: BufWriter::detached(capacity + 1),
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        match self.buf.write_bytes(bytes)? {
            Io::Ready(n) if n == bytes.len() => Ok(()),
            _ => Err(IoError::Failed("header buffer overflow".to_string())),
        }
    }

    pub fn write_u32_le(&mut self, value: u32) -> Result<(), IoError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u24_le(&mut self, value: u32) -> Result<(), IoError> {
        self.write_bytes(&value.to_le_bytes()[..3])
    }

    pub fn release(mut self) -> Chunk {
        self.buf.release_buffer()
    }
}

/// The metadata chunks an encode wants to embed, already merged.
#[derive(Default)]
pub(crate) struct MetadataParts {
    pub iccp: Option<Chunk>,
    pub exif: Option<Chunk>,
    pub xmp: Option<Chunk>,
}

impl MetadataParts {
    /// Picks the completed kinds the parameters ask for.
    pub fn select(
        metadata: Option<&ImageMetadata>,
        write_icc: bool,
        write_exif: bool,
        write_xmp: bool,
    ) -> MetadataParts {
        let mut parts = MetadataParts::default();
        if let Some(metadata) = metadata {
            let mut pick = |needed: bool, kind: MetadataKind| {
                if needed && metadata.is_completed(kind) {
                    metadata.merged(kind)
                } else {
                    None
                }
            };
            parts.iccp = pick(write_icc, MetadataKind::Icc);
            parts.exif = pick(write_exif, MetadataKind::Exif);
            parts.xmp = pick(write_xmp, MetadataKind::Xmp);
        }
        parts
    }

    pub fn is_empty(&self) -> bool {
        self.iccp.is_none() && self.exif.is_none() && self.xmp.is_none()
    }

    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.iccp.is_some() {
            flags |= FLAG_ICCP;
        }
        if self.exif.is_some() {
            flags |= FLAG_EXIF;
        }
        if self.xmp.is_some() {
            flags |= FLAG_XMP;
        }
        flags
    }

    /// Total container bytes the metadata chunks will occupy.
    pub fn total_size(&self) -> usize {
        [&self.iccp, &self.exif, &self.xmp]
            .into_iter()
            .flatten()
            .map(|chunk| chunk_total_len(chunk.len()))
            .sum()
    }
}

/// Bytes a chunk with `data_len` payload occupies, header and padding
/// included.
pub(crate) fn chunk_total_len(data_len: usize) -> usize {
    CHUNK_HEADER_SIZE + data_len + (data_len & 1)
}

/// Frames `data` as a `fourcc` chunk (header, payload, pad byte when odd).
pub(crate) fn metadata_payload(fourcc: &[u8; 4], data: Chunk) -> Result<ChunkList, Error> {
    let mut header = LeWriter::new(CHUNK_HEADER_SIZE);
    header.write_bytes(fourcc).map_err(Error::from)?;
    header.write_u32_le(data.len() as u32).map_err(Error::from)?;

    let mut list = ChunkList::new();
    let need_padding = data.len() & 1 != 0;
    list.push_back(header.release());
    list.push_back(data);
    if need_padding {
        list.push_back(Chunk::copy(&[0]));
    }
    Ok(list)
}

/// Builds the 18-byte VP8X chunk.
pub(crate) fn vp8x_chunk(flags: u32, width: u32, height: u32) -> Result<Chunk, Error> {
    let mut writer = LeWriter::new(VP8X_CHUNK_SIZE);
    writer.write_bytes(b"VP8X").map_err(Error::from)?;
    writer.write_u32_le(10).map_err(Error::from)?;
    writer.write_u32_le(flags).map_err(Error::from)?;
    writer.write_u24_le(width - 1).map_err(Error::from)?;
    writer.write_u24_le(height - 1).map_err(Error::from)?;
    Ok(writer.release())
}

/// Rewrites a complete single-image WebP so that it carries `parts`: the
/// RIFF size is recomputed, a VP8X header is inserted (or its flag byte
/// OR-ed) and the metadata chunks are spliced around the image body.
pub(crate) fn splice_metadata(
    webp: ChunkList,
    width: u32,
    height: u32,
    parts: &MetadataParts,
) -> Result<ChunkList, Error> {
    let mut reader = BufReader::new(BufSource::from_chunks(webp));
    let webp_size = reader.source().size();

    if !matches!(reader.skip_n(RIFF_HEADER_SIZE)?, Io::Ready(_)) {
        return Err(Error::Encode("encoder output too short".to_string()));
    }
    let mut tag = [0u8; TAG_SIZE];
    if !matches!(reader.peek_n_into(&mut tag)?, Io::Ready(_)) {
        return Err(Error::Encode("encoder output too short".to_string()));
    }
    let has_vp8x = &tag == b"VP8X";

    let mut flags = parts.flags();
    let mut riff_size = webp_size - CHUNK_HEADER_SIZE + parts.total_size();
    if !has_vp8x {
        riff_size += VP8X_CHUNK_SIZE;
    }

    let mut header = LeWriter::new(RIFF_HEADER_SIZE + VP8X_CHUNK_SIZE);
    header.write_bytes(b"RIFF").map_err(Error::from)?;
    header.write_u32_le(riff_size as u32).map_err(Error::from)?;
    header.write_bytes(b"WEBP").map_err(Error::from)?;

    if has_vp8x {
        let mut vp8x = [0u8; VP8X_CHUNK_SIZE];
        if !matches!(reader.read_n_into(&mut vp8x)?, Io::Ready(_)) {
            return Err(Error::Encode("truncated VP8X chunk".to_string()));
        }
        vp8x[CHUNK_HEADER_SIZE] |= (flags & 0xFF) as u8;
        header.write_bytes(&vp8x).map_err(Error::from)?;
    } else {
        if &tag == b"VP8L" {
            // The alpha bit lives in bit 28 of the VP8L stream header.
            let mut vp8l = [0u8; CHUNK_HEADER_SIZE + 5];
            if matches!(reader.peek_n_into(&mut vp8l)?, Io::Ready(_))
                && vp8l[CHUNK_HEADER_SIZE + 4] & 0x10 != 0
            {
                flags |= FLAG_ALPHA;
            }
        }
        let vp8x = vp8x_chunk(flags, width, height)?;
        header.write_bytes(vp8x.data()).map_err(Error::from)?;
    }

    let mut out = ChunkList::new();
    out.push_back(header.release());
    if let Some(iccp) = parts.iccp.clone() {
        out.extend(metadata_payload(b"ICCP", iccp)?);
    }
    out.extend(reader.source_mut().release_rest());
    if let Some(exif) = parts.exif.clone() {
        out.extend(metadata_payload(b"EXIF", exif)?);
    }
    if let Some(xmp) = parts.xmp.clone() {
        out.extend(metadata_payload(b"XMP ", xmp)?);
    }
    Ok(out)
}
