use crate::io::{Chunk, ChunkList};

/// Supported kinds of image metadata. Each is treated as an opaque byte
/// blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    Icc,
    Exif,
    Xmp,
}

impl MetadataKind {
    pub const ALL: [MetadataKind; 3] = [MetadataKind::Icc, MetadataKind::Exif, MetadataKind::Xmp];
}

#[derive(Default, Clone)]
struct Holder {
    data: ChunkList,
    frozen: bool,
}

/// Per-kind metadata accumulators. Chunks are appended while a decoder runs
/// and the kind is frozen once it is known to be complete.
#[derive(Default, Clone)]
pub struct ImageMetadata {
    icc: Holder,
    exif: Holder,
    xmp: Holder,
}

impl ImageMetadata {
    pub fn new() -> ImageMetadata {
        ImageMetadata::default()
    }

    fn holder(&self, kind: MetadataKind) -> &Holder {
        match kind {
            MetadataKind::Icc => &self.icc,
            MetadataKind::Exif => &self.exif,
            MetadataKind::Xmp => &self.xmp,
        }
    }

    fn holder_mut(&mut self, kind: MetadataKind) -> &mut Holder {
        match kind {
            MetadataKind::Icc => &mut self.icc,
            MetadataKind::Exif => &mut self.exif,
            MetadataKind::Xmp => &mut self.xmp,
        }
    }

    pub fn append(&mut self, kind: MetadataKind, data: Chunk) {
        self.holder_mut(kind).data.push_back(data);
    }

    pub fn freeze(&mut self, kind: MetadataKind) {
        self.holder_mut(kind).frozen = true;
    }

    pub fn freeze_all(&mut self) {
        for kind in MetadataKind::ALL {
            self.freeze(kind);
        }
    }

    pub fn has(&self, kind: MetadataKind) -> bool {
        !self.holder(kind).data.is_empty()
    }

    pub fn is_completed(&self, kind: MetadataKind) -> bool {
        self.holder(kind).frozen
    }

    pub fn is_all_completed(&self) -> bool {
        MetadataKind::ALL.iter().all(|&k| self.is_completed(k))
    }

    pub fn is_empty(&self) -> bool {
        !MetadataKind::ALL.iter().any(|&k| self.has(k))
    }

    pub fn get(&self, kind: MetadataKind) -> &ChunkList {
        &self.holder(kind).data
    }

    /// All chunks of `kind` merged into one, if any were collected.
    pub fn merged(&self, kind: MetadataKind) -> Option<Chunk> {
        if !self.has(kind) {
            return None;
        }
        Some(Chunk::merge(self.get(kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_freeze() {
        let mut metadata = ImageMetadata::new();
        assert!(metadata.is_empty());
        assert!(!metadata.has(MetadataKind::Icc));

        metadata.append(MetadataKind::Icc, Chunk::copy(b"pro"));
        metadata.append(MetadataKind::Icc, Chunk::copy(b"file"));
        assert!(metadata.has(MetadataKind::Icc));
        assert!(!metadata.is_completed(MetadataKind::Icc));
        assert!(!metadata.is_empty());

        metadata.freeze(MetadataKind::Icc);
        assert!(metadata.is_completed(MetadataKind::Icc));
        assert!(!metadata.is_all_completed());

        assert_eq!(metadata.merged(MetadataKind::Icc).unwrap().data(), b"profile");
        assert!(metadata.merged(MetadataKind::Exif).is_none());

        metadata.freeze_all();
        assert!(metadata.is_all_completed());
    }
}
