use super::result::{Io, IoResult};
use super::source::BufSource;

/// Typed, non-blocking reads over a [`BufSource`].
///
/// Every method distinguishes "no data yet" (`Pending`) from "no data and
/// the source is closed" (`Eof`). Methods that need `n` bytes either return
/// all of them or consume nothing.
pub struct BufReader {
    source: BufSource,
}

impl BufReader {
    pub fn new(source: BufSource) -> BufReader {
        BufReader { source }
    }

    pub fn empty() -> BufReader {
        BufReader::new(BufSource::new())
    }

    pub fn source(&self) -> &BufSource {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut BufSource {
        &mut self.source
    }

    pub fn offset(&self) -> usize {
        self.source.offset()
    }

    pub fn have_some(&self) -> bool {
        self.source.have_some()
    }

    /// Largest contiguous slice at the cursor; advances past it.
    pub fn read_some(&mut self) -> IoResult<&[u8]> {
        if !self.source.have_some() {
            return Ok(self.starved());
        }
        Ok(Io::Ready(self.source.read_some()))
    }

    /// Contiguous slice of at most `n` bytes; advances past it.
    pub fn read_at_most_n(&mut self, n: usize) -> IoResult<&[u8]> {
        if !self.source.have_some() {
            return Ok(self.starved());
        }
        Ok(Io::Ready(self.source.read_at_most_n(n)))
    }

    /// Contiguous slice of exactly `n` bytes. May coalesce chunks in the
    /// underlying source.
    pub fn read_n(&mut self, n: usize) -> IoResult<&[u8]> {
        if n == 0 {
            return Ok(Io::Ready(&[]));
        }
        if !self.source.have_n(n) {
            return Ok(self.starved());
        }
        Ok(Io::Ready(self.source.read_n(n)))
    }

    /// Copies exactly `out.len()` bytes into `out`; advances.
    pub fn read_n_into(&mut self, out: &mut [u8]) -> IoResult<usize> {
        if !self.source.have_n(out.len()) {
            return Ok(self.starved());
        }
        let mut filled = 0;
        while filled < out.len() {
            let part = self.source.read_at_most_n(out.len() - filled);
            out[filled..filled + part.len()].copy_from_slice(part);
            filled += part.len();
        }
        Ok(Io::Ready(filled))
    }

    /// Copies exactly `out.len()` bytes into `out` without advancing.
    pub fn peek_n_into(&mut self, out: &mut [u8]) -> IoResult<usize> {
        let result = self.read_n_into(out)?;
        if let Io::Ready(n) = result {
            debug_assert_eq!(n, out.len());
            self.unread_n(n);
        }
        Ok(result)
    }

    /// Skips exactly `n` bytes.
    pub fn skip_n(&mut self, n: usize) -> IoResult<usize> {
        if !self.source.have_n(n) {
            return Ok(self.starved());
        }
        let mut left = n;
        while left > 0 {
            let part = self.source.read_at_most_n(left);
            left -= part.len();
        }
        Ok(Io::Ready(n))
    }

    /// Moves the cursor back by up to `n` bytes; returns how far it moved.
    pub fn unread_n(&mut self, n: usize) -> usize {
        self.source.unread_n(n)
    }

    /// Outcome for a request the source cannot satisfy right now: `Eof`
    /// once the source is closed (it will never be satisfied), `Pending`
    /// while more data may still arrive.
    fn starved<T>(&self) -> Io<T> {
        if self.source.eof_received() {
            Io::Eof
        } else {
            Io::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Chunk;

    fn reader_with(parts: &[&[u8]]) -> BufReader {
        let mut source = BufSource::new();
        for part in parts {
            source.add_chunk(Chunk::copy(part));
        }
        BufReader::new(source)
    }

    #[test]
    fn read_some_pending_then_eof() {
        let mut reader = BufReader::empty();
        assert_eq!(reader.read_some().unwrap(), Io::Pending);
        reader.source_mut().send_eof();
        assert_eq!(reader.read_some().unwrap(), Io::Eof);
    }

    #[test]
    fn read_n_pends_until_enough_data() {
        let mut reader = reader_with(&[b"ab"]);
        assert_eq!(reader.read_n(4).unwrap(), Io::Pending);
        reader.source_mut().add_chunk(Chunk::copy(b"cd"));
        assert_eq!(reader.read_n(4).unwrap(), Io::Ready(&b"abcd"[..]));
    }

    #[test]
    fn read_n_into_copies_across_chunks() {
        let mut reader = reader_with(&[b"ab", b"cd", b"e"]);
        let mut buf = [0u8; 5];
        assert_eq!(reader.read_n_into(&mut buf).unwrap(), Io::Ready(5));
        assert_eq!(&buf, b"abcde");
        assert_eq!(reader.offset(), 5);
    }

    #[test]
    fn peek_does_not_advance() {
        let mut reader = reader_with(&[b"abcd"]);
        let mut buf = [0u8; 3];
        assert_eq!(reader.peek_n_into(&mut buf).unwrap(), Io::Ready(3));
        assert_eq!(&buf, b"abc");
        assert_eq!(reader.offset(), 0);
        assert_eq!(reader.read_some().unwrap(), Io::Ready(&b"abcd"[..]));
    }

    #[test]
    fn skip_advances_exactly() {
        let mut reader = reader_with(&[b"ab", b"cd"]);
        assert_eq!(reader.skip_n(3).unwrap(), Io::Ready(3));
        assert_eq!(reader.read_some().unwrap(), Io::Ready(&b"d"[..]));
    }

    #[test]
    fn short_data_after_eof_reports_eof() {
        let mut reader = reader_with(&[b"ab"]);
        reader.source_mut().send_eof();
        // A four-byte request can never be satisfied any more.
        assert_eq!(reader.read_n(4).unwrap(), Io::Eof);
        // The remaining bytes are still readable.
        assert_eq!(reader.read_some().unwrap(), Io::Ready(&b"ab"[..]));
        assert_eq!(reader.read_some().unwrap(), Io::Eof);
    }
}
