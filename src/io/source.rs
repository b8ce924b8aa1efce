use super::chunk::{Chunk, ChunkList};

/// An append-only queue of chunks with a read cursor.
///
/// Producers append chunks and eventually signal EOF; a consumer reads
/// through the queue without copying, except for [`BufSource::read_n`],
/// which may coalesce several chunks into one owned chunk to hand out a
/// contiguous slice. Consumed chunks stay around until explicitly released
/// with one of the `free_*` calls, so the cursor can be moved back with
/// [`BufSource::unread_n`]. Compaction is never automatic: callers that
/// save a rewind position free only at points where no saved position can be
/// invalidated.
#[derive(Default)]
pub struct BufSource {
    chunks: Vec<Chunk>,
    /// Index of the active chunk; `chunks.len()` when everything is consumed.
    current: usize,
    offset_in_chunk: usize,
    /// Read position in bytes, relative to the first retained chunk.
    offset: usize,
    /// Total bytes retained (ever added minus freed prefix).
    total_size: usize,
    eof_received: bool,
}

impl BufSource {
    pub fn new() -> BufSource {
        BufSource::default()
    }

    /// Builds a source over an already-complete chunk list.
    pub fn from_chunks(chunks: ChunkList) -> BufSource {
        let mut source = BufSource::new();
        for chunk in chunks {
            source.add_chunk(chunk);
        }
        source.send_eof();
        source
    }

    /// Appends a chunk. Empty chunks are dropped; chunks arriving after EOF
    /// are ignored.
    pub fn add_chunk(&mut self, chunk: Chunk) {
        if self.eof_received || chunk.is_empty() {
            return;
        }
        self.total_size += chunk.len();
        self.chunks.push(chunk);
    }

    /// Marks the end of input. Sticky.
    pub fn send_eof(&mut self) {
        self.eof_received = true;
    }

    pub fn eof_received(&self) -> bool {
        self.eof_received
    }

    pub fn have_some(&self) -> bool {
        self.current < self.chunks.len()
    }

    pub fn have_n(&self, n: usize) -> bool {
        self.total_size - self.offset >= n
    }

    pub fn eof_reached(&self) -> bool {
        !self.have_some() && self.eof_received
    }

    /// Read position in bytes relative to the first retained chunk.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total retained bytes.
    pub fn size(&self) -> usize {
        self.total_size
    }

    /// Returns the largest contiguous slice at the cursor and advances past
    /// it. The caller must have checked [`BufSource::have_some`].
    pub fn read_some(&mut self) -> &[u8] {
        debug_assert!(self.have_some());
        let cur = self.current;
        let start = self.offset_in_chunk;
        let nread = self.chunks[cur].len() - start;
        self.offset += nread;
        self.offset_in_chunk = 0;
        self.current += 1;
        &self.chunks[cur].data()[start..]
    }

    /// Like [`BufSource::read_some`] but never returns more than `desired`
    /// bytes.
    pub fn read_at_most_n(&mut self, desired: usize) -> &[u8] {
        debug_assert!(self.have_some());
        let in_chunk = self.chunks[self.current].len() - self.offset_in_chunk;
        if desired >= in_chunk {
            return self.read_some();
        }
        let cur = self.current;
        let start = self.offset_in_chunk;
        self.offset_in_chunk += desired;
        self.offset += desired;
        &self.chunks[cur].data()[start..start + desired]
    }

    /// Returns exactly `n` contiguous bytes, coalescing chunks when the run
    /// spans more than one. The caller must have checked
    /// [`BufSource::have_n`]. Coalescing replaces the spanned chunks with a
    /// single owned chunk; earlier borrows into them do not survive the call
    /// (the borrow checker enforces what the contract states).
    pub fn read_n(&mut self, n: usize) -> &[u8] {
        debug_assert!(self.have_n(n));
        let in_chunk = self
            .chunks
            .get(self.current)
            .map(|c| c.len() - self.offset_in_chunk)
            .unwrap_or(0);
        if n <= in_chunk {
            return self.read_at_most_n(n);
        }

        // Find the run of chunks covering the next n bytes.
        let start = self.current;
        let mut end = self.current;
        let mut stored = 0;
        while stored < self.offset_in_chunk + n {
            stored += self.chunks[end].len();
            end += 1;
        }

        let mut merged = Vec::with_capacity(stored);
        for chunk in &self.chunks[start..end] {
            merged.extend_from_slice(chunk.data());
        }
        self.chunks
            .splice(start..end, std::iter::once(Chunk::own(merged)));

        self.read_at_most_n(n)
    }

    /// Moves the cursor back by up to `n` bytes; bytes whose chunks were
    /// freed cannot be restored. Returns how far the cursor actually moved.
    pub fn unread_n(&mut self, n: usize) -> usize {
        if n == 0 || self.total_size == 0 {
            return 0;
        }

        if n >= self.offset {
            // Everything retained is unread again.
            self.current = 0;
            self.offset_in_chunk = 0;
            return std::mem::replace(&mut self.offset, 0);
        }

        if n <= self.offset_in_chunk && self.current < self.chunks.len() {
            self.offset -= n;
            self.offset_in_chunk -= n;
            return n;
        }

        // Walk back over whole chunks.
        let mut left = n - self.offset_in_chunk;
        let mut unread = self.offset_in_chunk;
        self.offset -= self.offset_in_chunk;
        self.offset_in_chunk = 0;
        while left > 0 {
            self.current -= 1;
            let chunk_len = self.chunks[self.current].len();
            if left >= chunk_len {
                unread += chunk_len;
                self.offset -= chunk_len;
                left -= chunk_len;
            } else {
                unread += left;
                self.offset -= left;
                self.offset_in_chunk = chunk_len - left;
                left = 0;
            }
        }
        unread
    }

    /// Drops fully consumed chunks from the front, at most `n` bytes worth.
    /// Never drops the active chunk. Returns the number of bytes freed;
    /// `offset` and `size` shrink together by that amount.
    pub fn free_at_most_n(&mut self, n: usize) -> usize {
        let mut count = 0;
        let mut freed = 0;
        while count < self.current {
            let chunk_len = self.chunks[count].len();
            if freed + chunk_len > n {
                break;
            }
            freed += chunk_len;
            count += 1;
        }
        self.chunks.drain(..count);
        self.current -= count;
        self.total_size -= freed;
        self.offset -= freed;
        freed
    }

    /// Drops every fully consumed chunk before the cursor.
    pub fn free_as_much_as_possible(&mut self) -> usize {
        self.free_at_most_n(self.total_size)
    }

    /// Detaches everything at and after the cursor, leaving the source
    /// empty. The active chunk is sliced at the intra-chunk offset.
    pub fn release_rest(&mut self) -> ChunkList {
        let mut rest = ChunkList::new();
        if self.current < self.chunks.len() {
            let active = &self.chunks[self.current];
            if self.offset_in_chunk < active.len() {
                rest.push_back(
                    active.slice(self.offset_in_chunk, active.len() - self.offset_in_chunk),
                );
            }
            for chunk in &self.chunks[self.current + 1..] {
                rest.push_back(chunk.clone());
            }
        }
        self.chunks.clear();
        self.current = 0;
        self.offset_in_chunk = 0;
        self.offset = 0;
        self.total_size = 0;
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with(parts: &[&[u8]]) -> BufSource {
        let mut source = BufSource::new();
        for part in parts {
            source.add_chunk(Chunk::copy(part));
        }
        source
    }

    #[test]
    fn empty_source() {
        let mut source = BufSource::new();
        assert!(!source.have_some());
        assert!(!source.eof_reached());
        source.send_eof();
        assert!(source.eof_reached());
    }

    #[test]
    fn chunks_after_eof_are_ignored() {
        let mut source = BufSource::new();
        source.send_eof();
        source.add_chunk(Chunk::copy(b"late"));
        assert!(!source.have_some());
        assert_eq!(source.size(), 0);
    }

    #[test]
    fn empty_chunks_are_dropped() {
        let mut source = BufSource::new();
        source.add_chunk(Chunk::copy(b""));
        assert!(!source.have_some());
    }

    #[test]
    fn read_some_returns_whole_chunks() {
        let mut source = source_with(&[b"abc", b"defg"]);
        assert!(source.have_some());
        assert_eq!(source.read_some(), b"abc");
        assert_eq!(source.read_some(), b"defg");
        assert!(!source.have_some());
        assert_eq!(source.offset(), 7);
    }

    #[test]
    fn read_at_most_n_stays_inside_chunk() {
        let mut source = source_with(&[b"abcdef"]);
        assert_eq!(source.read_at_most_n(2), b"ab");
        assert_eq!(source.read_at_most_n(100), b"cdef");
        assert!(!source.have_some());
    }

    #[test]
    fn read_n_coalesces_across_chunks() {
        let mut source = source_with(&[b"ab", b"cd", b"ef"]);
        assert!(source.have_n(5));
        assert_eq!(source.read_n(5), b"abcde");
        assert_eq!(source.read_some(), b"f");
        assert_eq!(source.offset(), 6);
        assert_eq!(source.size(), 6);
    }

    #[test]
    fn read_n_with_intra_chunk_offset() {
        let mut source = source_with(&[b"abc", b"def"]);
        assert_eq!(source.read_at_most_n(1), b"a");
        assert_eq!(source.read_n(4), b"bcde");
        assert_eq!(source.read_some(), b"f");
    }

    #[test]
    fn unread_within_chunk() {
        let mut source = source_with(&[b"abcdef"]);
        assert_eq!(source.read_at_most_n(4), b"abcd");
        assert_eq!(source.unread_n(2), 2);
        assert_eq!(source.read_at_most_n(4), b"cdef");
    }

    #[test]
    fn unread_across_chunks() {
        let mut source = source_with(&[b"ab", b"cd", b"ef"]);
        assert_eq!(source.read_some(), b"ab");
        assert_eq!(source.read_some(), b"cd");
        assert_eq!(source.read_at_most_n(1), b"e");
        assert_eq!(source.unread_n(3), 3);
        assert_eq!(source.offset(), 2);
        assert_eq!(source.read_some(), b"cd");
        assert_eq!(source.read_some(), b"ef");
    }

    #[test]
    fn unread_more_than_read_resets_to_start() {
        let mut source = source_with(&[b"ab", b"cd"]);
        assert_eq!(source.read_some(), b"ab");
        assert_eq!(source.unread_n(100), 2);
        assert_eq!(source.offset(), 0);
        assert_eq!(source.read_some(), b"ab");
    }

    #[test]
    fn unread_then_reread_yields_same_bytes() {
        let mut source = source_with(&[b"abc", b"def", b"ghi"]);
        let first: Vec<u8> = source.read_n(7).to_vec();
        assert_eq!(source.unread_n(7), 7);
        assert_eq!(source.read_n(7), &first[..]);
    }

    #[test]
    fn free_drops_only_consumed_chunks() {
        let mut source = source_with(&[b"ab", b"cd", b"ef"]);
        source.read_some();
        source.read_some();
        source.read_at_most_n(1);

        // The active chunk is never dropped, even though one byte of it is
        // already consumed.
        assert_eq!(source.free_at_most_n(100), 4);
        assert_eq!(source.offset(), 1);
        assert_eq!(source.size(), 2);
        assert_eq!(source.read_some(), b"f");
    }

    #[test]
    fn free_at_most_respects_limit() {
        let mut source = source_with(&[b"ab", b"cd", b"ef"]);
        source.read_some();
        source.read_some();
        source.read_some();
        assert_eq!(source.free_at_most_n(3), 2);
        assert_eq!(source.size(), 4);
    }

    #[test]
    fn read_n_coalesces_in_place() {
        let mut source = source_with(&[b"ab", b"cd", b"ef"]);
        source.read_n(6);
        // The three chunks were replaced by one merged chunk, so a partial
        // free has nothing it can drop.
        assert_eq!(source.free_at_most_n(3), 0);
        assert_eq!(source.free_as_much_as_possible(), 6);
        assert_eq!(source.size(), 0);
        assert_eq!(source.offset(), 0);
    }

    #[test]
    fn freed_bytes_cannot_be_unread() {
        let mut source = source_with(&[b"ab", b"cd"]);
        source.read_some();
        source.read_some();
        source.free_at_most_n(2);
        assert_eq!(source.unread_n(4), 2);
        assert_eq!(source.read_some(), b"cd");
    }

    #[test]
    fn eof_reached_only_after_consuming_everything() {
        let mut source = source_with(&[b"ab"]);
        source.send_eof();
        assert!(!source.eof_reached());
        source.read_some();
        assert!(source.eof_reached());
    }

    #[test]
    fn release_rest_detaches_unconsumed_tail() {
        let mut source = source_with(&[b"abc", b"def"]);
        source.read_at_most_n(1);
        let rest = source.release_rest();
        let merged = Chunk::merge(&rest);
        assert_eq!(merged.data(), b"bcdef");
        assert_eq!(source.size(), 0);
        assert!(!source.have_some());
    }
}
