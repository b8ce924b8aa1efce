use super::strategy::OptimizationStrategy;
use crate::error::{Error, OpResult, Step};
use crate::info::ImageFormat;
use crate::io::{BufReader, Chunk, Io, VectorWriter};
use crate::reading::ImageReader;
use crate::writing::{ImageWriter, OptimizationStats};

/// `RIFF????WEBPVP` is the longest signature that must be inspected.
pub const LONGEST_SIGNATURE_MATCH: usize = 14;

/// Recognizes a source format from the first
/// [`LONGEST_SIGNATURE_MATCH`] bytes.
pub fn choose_image_format(signature: &[u8; LONGEST_SIGNATURE_MATCH]) -> Option<ImageFormat> {
    if signature.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(ImageFormat::Jpeg);
    }
    if signature.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(ImageFormat::Png);
    }
    if signature.starts_with(b"GIF87a") || signature.starts_with(b"GIF89a") {
        return Some(ImageFormat::Gif);
    }
    if signature.starts_with(b"RIFF") && &signature[8..14] == b"WEBPVP" {
        return Some(ImageFormat::WebP);
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    ReadingFormat,
    ReadingImageInfo,
    ReadFrame,
    WriteFrame(usize),
    Drain,
    Finish,
    Complete,
    None,
}

/// The top-level pipeline state machine:
///
/// `Init → ReadingFormat → ReadingImageInfo → ReadFrame ⇄ WriteFrame →
/// Drain? → Finish → Complete`.
///
/// [`ImageOptimizer::process`] advances until it suspends on I/O
/// (`Pending`, re-invoke later), fails (the error is remembered and
/// returned from then on), or finishes. Input bytes are fed through
/// [`ImageOptimizer::add_input_chunk`] / [`ImageOptimizer::send_eof`] at
/// any time.
pub struct ImageOptimizer {
    state: State,
    strategy: Box<dyn OptimizationStrategy>,
    source: Option<BufReader>,
    dest: Option<Box<dyn VectorWriter>>,
    reader: Option<Box<dyn ImageReader>>,
    writer: Option<Box<dyn ImageWriter>>,
    stats: OptimizationStats,
    last_result: OpResult,
}

impl ImageOptimizer {
    pub fn new(
        strategy: Box<dyn OptimizationStrategy>,
        source: BufReader,
        dest: Box<dyn VectorWriter>,
    ) -> ImageOptimizer {
        ImageOptimizer {
            state: State::Init,
            strategy,
            source: Some(source),
            dest: Some(dest),
            reader: None,
            writer: None,
            stats: OptimizationStats::default(),
            last_result: Ok(Step::Ready),
        }
    }

    /// Feeds more input. Valid in any state; bytes arriving after the
    /// pipeline finished are dropped.
    pub fn add_input_chunk(&mut self, chunk: Chunk) {
        if let Some(source) = self.source.as_mut() {
            source.source_mut().add_chunk(chunk);
        } else if let Some(reader) = self.reader.as_mut() {
            reader.source_mut().source_mut().add_chunk(chunk);
        }
    }

    /// Signals that no more input will arrive.
    pub fn send_eof(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.source_mut().send_eof();
        } else if let Some(reader) = self.reader.as_mut() {
            reader.source_mut().source_mut().send_eof();
        }
    }

    pub fn finished(&self) -> bool {
        self.state == State::None
    }

    pub fn stats(&self) -> &OptimizationStats {
        &self.stats
    }

    /// Runs the state machine as far as the available I/O allows.
    pub fn process(&mut self) -> OpResult {
        if self.state == State::None {
            return self.last_result.clone();
        }

        loop {
            let result = match self.state {
                State::Init => self.do_init(),
                State::ReadingFormat => self.do_read_image_format(),
                State::ReadingImageInfo => self.do_read_image_info(),
                State::ReadFrame => self.do_read_frame(),
                State::WriteFrame(index) => self.do_write_frame(index),
                State::Drain => self.do_drain(),
                State::Finish => self.do_finish(),
                State::Complete => Ok(Step::Finished),
                State::None => self.last_result.clone(),
            };

            match result {
                Ok(Step::Ready) => continue,
                Ok(Step::Pending) => return Ok(Step::Pending),
                Ok(Step::Finished) => {
                    self.state = State::None;
                    self.last_result = Ok(Step::Finished);
                    return Ok(Step::Finished);
                }
                Err(error) => {
                    self.state = State::None;
                    self.last_result = Err(error.clone());
                    return Err(error);
                }
            }
        }
    }

    fn do_init(&mut self) -> OpResult {
        match self.strategy.should_even_bother()? {
            Step::Finished => Ok(Step::Finished),
            _ => {
                self.state = State::ReadingFormat;
                Ok(Step::Ready)
            }
        }
    }

    fn do_read_image_format(&mut self) -> OpResult {
        let format = {
            let source = self
                .source
                .as_mut()
                .ok_or_else(|| Error::Failed("input source already consumed".to_string()))?;
            let mut signature = [0u8; LONGEST_SIGNATURE_MATCH];
            match source.peek_n_into(&mut signature)? {
                Io::Ready(_) => {}
                Io::Pending => return Ok(Step::Pending),
                Io::Eof => {
                    return Err(Error::UnexpectedEof("image signature".to_string()));
                }
            }
            choose_image_format(&signature).ok_or(Error::UnsupportedFormat)?
        };

        let source = self
            .source
            .take()
            .ok_or_else(|| Error::Failed("input source already consumed".to_string()))?;
        self.reader = Some(self.strategy.create_image_reader(format, source)?);
        self.state = State::ReadingImageInfo;
        Ok(Step::Ready)
    }

    fn do_read_image_info(&mut self) -> OpResult {
        let reader = self
            .reader
            .as_deref_mut()
            .ok_or_else(|| Error::Failed("no image reader".to_string()))?;
        match reader.read_image_info()? {
            Step::Ready | Step::Finished => {}
            Step::Pending => return Ok(Step::Pending),
        }

        let dest = self
            .dest
            .take()
            .ok_or_else(|| Error::Failed("output sink already consumed".to_string()))?;
        let mut writer = self.strategy.create_image_writer(dest, reader)?;

        let info = reader
            .image_info()
            .ok_or_else(|| Error::Failed("image info not read yet".to_string()))?;
        writer.initialize(info)?;
        writer.set_metadata(reader.metadata());

        self.writer = Some(writer);
        self.state = State::ReadFrame;
        Ok(Step::Ready)
    }

    fn do_read_frame(&mut self) -> OpResult {
        let reader = self
            .reader
            .as_deref_mut()
            .ok_or_else(|| Error::Failed("no image reader".to_string()))?;

        if !reader.has_more_frames() {
            self.state = if self.strategy.should_wait_for_metadata() {
                State::Drain
            } else {
                State::Finish
            };
            return Ok(Step::Ready);
        }

        match reader.read_next_frame()? {
            Step::Ready | Step::Finished => {
                self.state = State::WriteFrame(reader.num_frames_read() - 1);
                Ok(Step::Ready)
            }
            Step::Pending => Ok(Step::Pending),
        }
    }

    fn do_write_frame(&mut self, index: usize) -> OpResult {
        let reader = self
            .reader
            .as_deref()
            .ok_or_else(|| Error::Failed("no image reader".to_string()))?;
        let writer = self
            .writer
            .as_deref_mut()
            .ok_or_else(|| Error::Failed("no image writer".to_string()))?;
        let frame = reader
            .frame_at(index)
            .ok_or_else(|| Error::ReadFrame(format!("frame {index} not available")))?;

        match writer.write_frame(frame)? {
            Step::Ready | Step::Finished => {
                self.state = State::ReadFrame;
                Ok(Step::Ready)
            }
            Step::Pending => Ok(Step::Pending),
        }
    }

    fn do_drain(&mut self) -> OpResult {
        let reader = self
            .reader
            .as_deref_mut()
            .ok_or_else(|| Error::Failed("no image reader".to_string()))?;
        match reader.read_till_the_end()? {
            Step::Ready | Step::Finished => {
                self.state = State::Finish;
                Ok(Step::Ready)
            }
            Step::Pending => Ok(Step::Pending),
        }
    }

    fn do_finish(&mut self) -> OpResult {
        let reader = self
            .reader
            .as_deref()
            .ok_or_else(|| Error::Failed("no image reader".to_string()))?;
        let writer = self
            .writer
            .as_deref_mut()
            .ok_or_else(|| Error::Failed("no image writer".to_string()))?;

        // Metadata may have grown since the snapshot at initialization
        // (trailing chunks picked up by the drain).
        writer.set_metadata(reader.metadata());
        self.stats = writer.finish_write()?;
        self.state = State::Complete;
        Ok(Step::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ImageFrame;
    use crate::info::ImageInfo;
    use crate::io::BufSource;
    use crate::metadata::ImageMetadata;
    use crate::optimize::ConvertToWebpStrategy;
    use crate::testutil::{chunked, gif, SharedSink};
    use std::cell::Cell;
    use std::rc::Rc;

    fn optimizer_with(strategy: Box<dyn OptimizationStrategy>) -> (ImageOptimizer, SharedSink) {
        let sink = SharedSink::new();
        let optimizer = ImageOptimizer::new(
            strategy,
            BufReader::new(BufSource::new()),
            Box::new(sink.clone()),
        );
        (optimizer, sink)
    }

    fn run_to_completion(optimizer: &mut ImageOptimizer) -> OpResult {
        loop {
            match optimizer.process() {
                Ok(Step::Pending) => panic!("pipeline stalled on a complete input"),
                other => return other,
            }
        }
    }

    #[test]
    fn empty_input_is_an_unexpected_eof() {
        let (mut optimizer, _sink) = optimizer_with(Box::<ConvertToWebpStrategy>::default());
        optimizer.send_eof();
        assert_eq!(
            optimizer.process(),
            Err(Error::UnexpectedEof("image signature".to_string()))
        );
        assert!(optimizer.finished());
        // The error is sticky.
        assert_eq!(
            optimizer.process(),
            Err(Error::UnexpectedEof("image signature".to_string()))
        );
    }

    #[test]
    fn unknown_signature_is_unsupported() {
        let (mut optimizer, _sink) = optimizer_with(Box::<ConvertToWebpStrategy>::default());
        optimizer.add_input_chunk(Chunk::copy(b"BM_not_an_image_we_know"));
        optimizer.send_eof();
        assert_eq!(optimizer.process(), Err(Error::UnsupportedFormat));
    }

    #[test]
    fn single_frame_gif_becomes_webp() {
        let (mut optimizer, sink) = optimizer_with(Box::<ConvertToWebpStrategy>::default());
        optimizer.add_input_chunk(Chunk::copy(&gif::single_frame_2x2()));
        optimizer.send_eof();

        assert_eq!(run_to_completion(&mut optimizer).unwrap(), Step::Finished);
        assert!(optimizer.finished());

        let bytes = sink.bytes();
        assert_eq!(optimizer.stats().coded_size, bytes.len() as u64);
        let mut decoder =
            image_webp::WebPDecoder::new(std::io::Cursor::new(&bytes)).expect("valid webp");
        assert_eq!(decoder.dimensions(), (2, 2));
        // GIF goes through the multi-frame writer, but one frame never
        // becomes an animation.
        assert!(!decoder.is_animated());
    }

    #[test]
    fn animated_gif_keeps_its_frame_count() {
        let (mut optimizer, sink) = optimizer_with(Box::<ConvertToWebpStrategy>::default());
        optimizer.add_input_chunk(Chunk::copy(&gif::animated(16, 16, 8, None)));
        optimizer.send_eof();

        assert_eq!(run_to_completion(&mut optimizer).unwrap(), Step::Finished);

        let bytes = sink.bytes();
        let mut decoder =
            image_webp::WebPDecoder::new(std::io::Cursor::new(&bytes)).expect("valid webp");
        assert!(decoder.is_animated());
        assert_eq!(decoder.num_frames(), 8);
        assert_eq!(decoder.dimensions(), (16, 16));
    }

    #[test]
    fn chunked_processing_matches_oneshot() {
        let bytes = gif::animated(8, 8, 3, Some(0));

        let (mut oneshot, oneshot_sink) =
            optimizer_with(Box::<ConvertToWebpStrategy>::default());
        oneshot.add_input_chunk(Chunk::copy(&bytes));
        oneshot.send_eof();
        assert_eq!(run_to_completion(&mut oneshot).unwrap(), Step::Finished);

        let (mut trickled, trickle_sink) =
            optimizer_with(Box::<ConvertToWebpStrategy>::default());
        let mut pending_seen = false;
        for chunk in chunked(&bytes, &vec![3; bytes.len() / 3]) {
            trickled.add_input_chunk(chunk);
            match trickled.process().unwrap() {
                Step::Pending => pending_seen = true,
                Step::Ready | Step::Finished => {}
            }
        }
        trickled.send_eof();
        assert_eq!(run_to_completion(&mut trickled).unwrap(), Step::Finished);

        assert!(pending_seen);
        assert_eq!(oneshot_sink.bytes(), trickle_sink.bytes());
    }

    #[test]
    fn malformed_gif_pins_the_driver() {
        let (mut optimizer, _sink) = optimizer_with(Box::<ConvertToWebpStrategy>::default());
        optimizer.add_input_chunk(Chunk::copy(&gif::truncated_image_data()));
        optimizer.send_eof();

        let error = run_to_completion(&mut optimizer).unwrap_err();
        assert_eq!(error, Error::Decode("Image data too short".to_string()));
        assert_eq!(optimizer.process(), Err(error));
    }

    #[test]
    fn gif_metadata_travels_into_the_webp() {
        let icc_payload = b"fake-icc-profile-bytes";
        let mut bytes = gif::screen_header_with_palette(2, 2);
        bytes.extend_from_slice(&gif::application_extension(b"ICCRGBG1012", icc_payload));
        bytes.extend_from_slice(&gif::image_block(2, 2, &[0, 1, 2, 3]));
        bytes.push(b';');

        let (mut optimizer, sink) = optimizer_with(Box::<ConvertToWebpStrategy>::default());
        optimizer.add_input_chunk(Chunk::copy(&bytes));
        optimizer.send_eof();
        assert_eq!(run_to_completion(&mut optimizer).unwrap(), Step::Finished);

        let out = sink.bytes();
        let mut decoder =
            image_webp::WebPDecoder::new(std::io::Cursor::new(&out)).expect("valid webp");
        assert_eq!(
            decoder.icc_profile().unwrap().as_deref(),
            Some(&icc_payload[..])
        );
    }

    #[test]
    fn strategy_can_stop_early() {
        struct NotWorthIt;
        impl OptimizationStrategy for NotWorthIt {
            fn should_even_bother(&mut self) -> OpResult {
                Ok(Step::Finished)
            }
            fn create_image_reader(
                &mut self,
                _format: ImageFormat,
                _source: BufReader,
            ) -> Result<Box<dyn ImageReader>, Error> {
                unreachable!("reader requested after early stop")
            }
            fn create_image_writer(
                &mut self,
                _dest: Box<dyn VectorWriter>,
                _reader: &mut dyn ImageReader,
            ) -> Result<Box<dyn ImageWriter>, Error> {
                unreachable!("writer requested after early stop")
            }
        }

        let (mut optimizer, sink) = optimizer_with(Box::new(NotWorthIt));
        assert_eq!(optimizer.process().unwrap(), Step::Finished);
        assert_eq!(sink.len(), 0);
    }

    /// An [`ImageReader`] wrapper that records drain calls.
    struct SpyReader {
        inner: Box<dyn ImageReader>,
        drained: Rc<Cell<bool>>,
    }

    impl ImageReader for SpyReader {
        fn has_more_frames(&self) -> bool {
            self.inner.has_more_frames()
        }
        fn metadata(&self) -> &ImageMetadata {
            self.inner.metadata()
        }
        fn num_frames_read(&self) -> usize {
            self.inner.num_frames_read()
        }
        fn read_image_info(&mut self) -> OpResult {
            self.inner.read_image_info()
        }
        fn image_info(&self) -> Option<&ImageInfo> {
            self.inner.image_info()
        }
        fn read_next_frame(&mut self) -> OpResult {
            self.inner.read_next_frame()
        }
        fn frame_at(&self, index: usize) -> Option<&ImageFrame> {
            self.inner.frame_at(index)
        }
        fn read_till_the_end(&mut self) -> OpResult {
            self.drained.set(true);
            self.inner.read_till_the_end()
        }
        fn source_mut(&mut self) -> &mut BufReader {
            self.inner.source_mut()
        }
    }

    struct SpyStrategy {
        inner: ConvertToWebpStrategy,
        drained: Rc<Cell<bool>>,
        wait: bool,
    }

    impl OptimizationStrategy for SpyStrategy {
        fn create_image_reader(
            &mut self,
            format: ImageFormat,
            source: BufReader,
        ) -> Result<Box<dyn ImageReader>, Error> {
            let inner = self.inner.create_image_reader(format, source)?;
            Ok(Box::new(SpyReader {
                inner,
                drained: Rc::clone(&self.drained),
            }))
        }
        fn create_image_writer(
            &mut self,
            dest: Box<dyn VectorWriter>,
            reader: &mut dyn ImageReader,
        ) -> Result<Box<dyn ImageWriter>, Error> {
            self.inner.create_image_writer(dest, reader)
        }
        fn should_wait_for_metadata(&self) -> bool {
            self.wait
        }
    }

    #[test]
    fn drain_runs_only_when_the_strategy_waits_for_metadata() {
        for wait in [false, true] {
            let drained = Rc::new(Cell::new(false));
            let strategy = SpyStrategy {
                inner: ConvertToWebpStrategy::default(),
                drained: Rc::clone(&drained),
                wait,
            };
            let (mut optimizer, _sink) = optimizer_with(Box::new(strategy));
            optimizer.add_input_chunk(Chunk::copy(&gif::single_frame_2x2()));
            optimizer.send_eof();
            assert_eq!(run_to_completion(&mut optimizer).unwrap(), Step::Finished);
            assert_eq!(drained.get(), wait);
        }
    }

    #[test]
    fn signature_detection_covers_all_formats() {
        let mut sig = [0u8; LONGEST_SIGNATURE_MATCH];

        sig[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
        assert_eq!(choose_image_format(&sig), Some(ImageFormat::Jpeg));

        sig = [0u8; LONGEST_SIGNATURE_MATCH];
        sig[..8].copy_from_slice(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
        assert_eq!(choose_image_format(&sig), Some(ImageFormat::Png));

        sig = [0u8; LONGEST_SIGNATURE_MATCH];
        sig[..6].copy_from_slice(b"GIF89a");
        assert_eq!(choose_image_format(&sig), Some(ImageFormat::Gif));

        sig = [0u8; LONGEST_SIGNATURE_MATCH];
        sig[..4].copy_from_slice(b"RIFF");
        sig[8..14].copy_from_slice(b"WEBPVP");
        assert_eq!(choose_image_format(&sig), Some(ImageFormat::WebP));

        assert_eq!(choose_image_format(&[0u8; LONGEST_SIGNATURE_MATCH]), None);
    }

    #[test]
    fn webp_input_is_reencoded() {
        // First produce a WebP through the pipeline, then feed it back in.
        let (mut first, first_sink) = optimizer_with(Box::<ConvertToWebpStrategy>::default());
        first.add_input_chunk(Chunk::copy(&gif::single_frame_2x2()));
        first.send_eof();
        assert_eq!(run_to_completion(&mut first).unwrap(), Step::Finished);
        let webp_bytes = first_sink.bytes();

        let (mut second, second_sink) =
            optimizer_with(Box::<ConvertToWebpStrategy>::default());
        for chunk in chunked(&webp_bytes, &vec![5; webp_bytes.len() / 5]) {
            second.add_input_chunk(chunk);
            let _ = second.process().unwrap();
        }
        second.send_eof();
        assert_eq!(run_to_completion(&mut second).unwrap(), Step::Finished);

        let out = second_sink.bytes();
        let mut decoder =
            image_webp::WebPDecoder::new(std::io::Cursor::new(&out)).expect("valid webp");
        assert_eq!(decoder.dimensions(), (2, 2));
    }
}
