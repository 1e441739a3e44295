use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use flate2::{Decompress, FlushDecompress, Status};
use micro_channel::codec::MessageDecoder;
use micro_channel::protocol::Message;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{CompressionError, EngineStatus, ZlibWrapper};

/// Smallest scratch region handed to the engine per pass, so empty and tiny inputs
/// still make progress.
const MIN_SCRATCH_SIZE: usize = 64;

/// Inflates a compressed byte stream that arrives in arbitrary chunks.
///
/// Every byte chunk is fed to the engine as soon as it arrives and whatever could be
/// inflated so far is emitted as one [`Message::Buffer`]. Chunks that complete nothing
/// yet produce no message at all.
///
/// Once the end of the compressed stream has been seen the engine is released and every
/// following message passes through untouched, which lets a protocol switch from
/// compressed to plain data on the same channel. Non-buffer messages always pass
/// through.
///
/// A corrupt stream fails the decode call with [`CompressionError::Decompression`];
/// the engine is released on the spot and later byte chunks are dropped.
///
/// The decoder is `Sync`: share it through an `Arc` to probe [`is_closed`](Self::is_closed)
/// from outside the pipeline.
pub struct ZlibDecoder {
    wrapper: ZlibWrapper,
    dictionary: Option<Bytes>,
    engine: Mutex<Option<Decompress>>,
    finished: AtomicBool,
    failed: AtomicBool,
}

impl ZlibDecoder {
    /// Creates a decoder for zlib framed streams.
    pub fn new() -> Self {
        Self::with_wrapper(ZlibWrapper::Zlib)
    }

    pub fn with_wrapper(wrapper: ZlibWrapper) -> Self {
        Self::from_parts(wrapper, None)
    }

    /// Creates a zlib decoder with a preset dictionary. zlib is the only framing that
    /// supports one.
    ///
    /// # Errors
    ///
    /// Returns [`CompressionError::Initialization`] if the dictionary is empty.
    pub fn with_dictionary<B: Into<Bytes>>(dictionary: B) -> Result<Self, CompressionError> {
        Self::try_new(ZlibWrapper::Zlib, Some(dictionary.into()))
    }

    /// Creates a decoder from a wrapper and an optional preset dictionary.
    ///
    /// The dictionary is handed to the engine when the stream header asks for it.
    ///
    /// # Errors
    ///
    /// Returns [`CompressionError::Initialization`] if a dictionary is given with a
    /// wrapper other than [`ZlibWrapper::Zlib`], or if it is empty.
    pub fn try_new(wrapper: ZlibWrapper, dictionary: Option<Bytes>) -> Result<Self, CompressionError> {
        if let Some(dictionary) = &dictionary {
            if !wrapper.supports_dictionary() {
                return Err(CompressionError::initialization(
                    EngineStatus::InvalidArgument,
                    format!("{wrapper} streams can't use a preset dictionary"),
                ));
            }
            if dictionary.is_empty() {
                return Err(CompressionError::initialization(EngineStatus::InvalidArgument, "empty preset dictionary"));
            }
        }
        Ok(Self::from_parts(wrapper, dictionary))
    }

    fn from_parts(wrapper: ZlibWrapper, dictionary: Option<Bytes>) -> Self {
        Self {
            wrapper,
            dictionary,
            engine: Mutex::new(Some(wrapper.engine())),
            finished: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        }
    }

    /// Returns true once the end of the compressed stream has been reached.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Returns true once decoding failed; the decoder stays failed for good.
    #[inline]
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn wrapper(&self) -> ZlibWrapper {
        self.wrapper
    }

    /// Compressed bytes consumed so far, 0 once the engine is released
    pub fn total_in(&self) -> u64 {
        self.engine.lock().as_ref().map_or(0, Decompress::total_in)
    }

    /// Bytes inflated so far, 0 once the engine is released
    pub fn total_out(&self) -> u64 {
        self.engine.lock().as_ref().map_or(0, Decompress::total_out)
    }

    /// Releases the engine. Safe to call any number of times.
    pub fn close(&self) {
        if self.engine.lock().take().is_some() {
            debug!(wrapper = %self.wrapper, "inflate engine released");
        }
    }

    /// Inflates `input` with a sync flush until the engine needs more input.
    ///
    /// Returns the inflated bytes and whether the stream ended.
    fn inflate(&self, engine: &mut Decompress, input: &[u8]) -> Result<(BytesMut, bool), CompressionError> {
        let mut scratch = vec![0_u8; (input.len() << 1).max(MIN_SCRATCH_SIZE)];
        let mut decoded = BytesMut::new();
        let mut remaining = input;

        loop {
            let (before_in, before_out) = (engine.total_in(), engine.total_out());
            let result = engine.decompress(remaining, &mut scratch, FlushDecompress::Sync);
            // the counters move on failures too
            let consumed = (engine.total_in() - before_in) as usize;
            let produced = (engine.total_out() - before_out) as usize;
            remaining = &remaining[consumed..];
            if produced > 0 {
                decoded.extend_from_slice(&scratch[..produced]);
            }
            let progressed = consumed > 0 || produced > 0;

            match result {
                Ok(Status::StreamEnd) => {
                    if !remaining.is_empty() {
                        debug!(wrapper = %self.wrapper, trailing = remaining.len(), "ignore bytes after the end of the stream");
                    }
                    return Ok((decoded, true));
                }
                Ok(Status::Ok) if remaining.is_empty() && !progressed => return Ok((decoded, false)),
                Ok(Status::Ok) => {}
                Ok(Status::BufError) if remaining.is_empty() => return Ok((decoded, false)),
                Ok(Status::BufError) if !progressed => {
                    debug!(wrapper = %self.wrapper, remaining = remaining.len(), "inflate engine stalled");
                    return Ok((decoded, false));
                }
                Ok(Status::BufError) => {}
                Err(e) if e.needs_dictionary().is_some() => {
                    let Some(dictionary) = &self.dictionary else {
                        return Err(CompressionError::decompression(
                            EngineStatus::NeedDictionary,
                            "stream requires a preset dictionary",
                        ));
                    };
                    engine.set_dictionary(dictionary).map_err(|e| {
                        CompressionError::decompression(
                            EngineStatus::DataError,
                            format!("failed to set the dictionary: {e}"),
                        )
                    })?;
                    trace!(len = dictionary.len(), "preset dictionary applied");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Default for ZlibDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ZlibDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZlibDecoder")
            .field("wrapper", &self.wrapper)
            .field("dictionary", &self.dictionary.as_ref().map(Bytes::len))
            .field("finished", &self.is_closed())
            .field("failed", &self.has_failed())
            .finish()
    }
}

impl MessageDecoder for ZlibDecoder {
    type Error = CompressionError;

    /// # Errors
    ///
    /// Returns [`CompressionError::Decompression`] when the engine reports corrupt input
    /// or a dictionary it can't use. The decoder is failed afterwards.
    fn decode(&self, msg: Message) -> Result<Option<Message>, Self::Error> {
        if self.is_closed() {
            return Ok(Some(msg));
        }
        let input = match msg {
            Message::Buffer(input) => input,
            other => return Ok(Some(other)),
        };

        let mut guard = self.engine.lock();
        // finished may have been set while waiting for the lock
        if self.is_closed() {
            return Ok(Some(Message::Buffer(input)));
        }
        let Some(engine) = guard.as_mut() else {
            trace!(len = input.len(), failed = self.has_failed(), "drop bytes, inflate engine is released");
            return Ok(None);
        };

        match self.inflate(engine, &input) {
            Ok((decoded, finished)) => {
                if finished {
                    self.finished.store(true, Ordering::Release);
                    guard.take();
                    debug!(wrapper = %self.wrapper, "end of compressed stream, inflate engine released");
                }
                trace!(consumed = input.len(), produced = decoded.len(), "inflated chunk");
                Ok((!decoded.is_empty()).then_some(Message::Buffer(decoded)))
            }
            Err(e) => {
                self.failed.store(true, Ordering::Release);
                guard.take();
                debug!(wrapper = %self.wrapper, cause = %e, "inflate failed, engine released");
                Err(e)
            }
        }
    }

    fn release(&self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::{Compress, FlushCompress};
    use std::io::Write;

    /// Deterministic, poorly compressible bytes.
    fn noise(len: usize) -> Vec<u8> {
        let mut state: u32 = 0x9e37_79b9;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn zlib_with_dictionary(data: &[u8], dictionary: &[u8]) -> Vec<u8> {
        let mut compress = Compress::new(Compression::default(), true);
        compress.set_dictionary(dictionary).unwrap();
        let mut out = Vec::with_capacity(data.len() + 1024);
        let status = compress.compress_vec(data, &mut out, FlushCompress::Finish).unwrap();
        assert_eq!(status, Status::StreamEnd);
        out
    }

    /// Feeds `chunks` one by one and concatenates everything the decoder emits.
    fn inflate_chunks<'a>(
        decoder: &ZlibDecoder,
        chunks: impl IntoIterator<Item = &'a [u8]>,
    ) -> Result<Vec<u8>, CompressionError> {
        let mut out = Vec::new();
        for chunk in chunks {
            if let Some(msg) = decoder.decode(Message::from(BytesMut::from(chunk)))? {
                out.extend_from_slice(msg.as_buffer().unwrap());
            }
        }
        Ok(out)
    }

    #[test]
    fn test_round_trip() {
        let compressible: Vec<u8> = b"micro-channel ".iter().copied().cycle().take(1 << 20).collect();
        for data in [Vec::new(), vec![b'x'], noise(65536), compressible] {
            let decoder = ZlibDecoder::new();
            let compressed = zlib(&data);

            let out = inflate_chunks(&decoder, [&compressed[..]]).unwrap();

            assert_eq!(out, data, "length {}", data.len());
            assert!(decoder.is_closed());
        }
    }

    #[test]
    fn test_output_grows_across_passes() {
        // 1 MiB of a short pattern deflates to a few KiB, far beyond a single scratch region
        let data: Vec<u8> = b"abcd".iter().copied().cycle().take(1 << 20).collect();
        let compressed = zlib(&data);
        assert!(compressed.len() * 2 * 4 < data.len());

        let decoder = ZlibDecoder::new();
        assert_eq!(inflate_chunks(&decoder, [&compressed[..]]).unwrap(), data);
    }

    #[test]
    fn test_chunk_size_invariance() {
        let data = noise(10_000);
        let compressed = zlib(&data);

        let whole = inflate_chunks(&ZlibDecoder::new(), [&compressed[..]]).unwrap();
        let decoder = ZlibDecoder::new();
        let bytewise = inflate_chunks(&decoder, compressed.chunks(1)).unwrap();

        assert_eq!(whole, data);
        assert_eq!(bytewise, whole);
        assert!(decoder.is_closed());
    }

    #[test]
    fn test_partial_input_emits_nothing_yet() {
        let compressed = zlib(b"hello");
        let decoder = ZlibDecoder::new();

        // the zlib header alone inflates to nothing
        assert!(decoder.decode(Message::from(BytesMut::from(&compressed[..2]))).unwrap().is_none());
        assert!(!decoder.is_closed());
        assert_eq!(decoder.total_in(), 2);

        let out = inflate_chunks(&decoder, [&compressed[2..]]).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn test_passthrough_after_finish() {
        let decoder = ZlibDecoder::new();
        let compressed = zlib(b"payload");
        inflate_chunks(&decoder, [&compressed[..]]).unwrap();
        assert!(decoder.is_closed());
        assert_eq!(decoder.total_in(), 0);

        let plain = decoder.decode(Message::from(&b"not compressed"[..])).unwrap().unwrap();
        assert_eq!(&plain.as_buffer().unwrap()[..], b"not compressed");
        assert_eq!(decoder.total_out(), 0);
    }

    #[test]
    fn test_trailing_bytes_after_stream_end_ignored() {
        let mut compressed = zlib(b"payload");
        compressed.extend_from_slice(b"garbage");

        let decoder = ZlibDecoder::new();
        assert_eq!(inflate_chunks(&decoder, [&compressed[..]]).unwrap(), b"payload");
        assert!(decoder.is_closed());
    }

    #[test]
    fn test_objects_pass_through() {
        let decoder = ZlibDecoder::new();
        let msg = decoder.decode(Message::object(42_u32)).unwrap().unwrap();
        assert_eq!(msg.downcast_ref::<u32>(), Some(&42));
        assert_eq!(decoder.total_in(), 0);
    }

    #[test]
    fn test_gzip_and_raw_wrappers() {
        let data = noise(4096);

        let mut gzip = GzEncoder::new(Vec::new(), Compression::fast());
        gzip.write_all(&data).unwrap();
        let decoder = ZlibDecoder::with_wrapper(ZlibWrapper::Gzip);
        assert_eq!(inflate_chunks(&decoder, [&gzip.finish().unwrap()[..]]).unwrap(), data);
        assert!(decoder.is_closed());

        let mut raw = DeflateEncoder::new(Vec::new(), Compression::best());
        raw.write_all(&data).unwrap();
        let decoder = ZlibDecoder::with_wrapper(ZlibWrapper::Raw);
        assert_eq!(inflate_chunks(&decoder, raw.finish().unwrap().chunks(100)).unwrap(), data);
        assert!(decoder.is_closed());
        assert_eq!(decoder.wrapper(), ZlibWrapper::Raw);
    }

    #[test]
    fn test_dictionary() {
        let dictionary = b"the quick brown fox jumps over the lazy dog";
        let data = b"the lazy dog jumps over the quick brown fox";
        let compressed = zlib_with_dictionary(data, dictionary);

        let decoder = ZlibDecoder::with_dictionary(&dictionary[..]).unwrap();
        assert_eq!(inflate_chunks(&decoder, [&compressed[..]]).unwrap(), data);
        assert!(decoder.is_closed());

        let decoder = ZlibDecoder::new();
        let error = inflate_chunks(&decoder, [&compressed[..]]).unwrap_err();
        assert_eq!(error.status(), EngineStatus::NeedDictionary);
        assert!(decoder.has_failed());

        let decoder = ZlibDecoder::with_dictionary(&b"some other dictionary"[..]).unwrap();
        let error = inflate_chunks(&decoder, [&compressed[..]]).unwrap_err();
        assert!(matches!(error, CompressionError::Decompression { .. }));
    }

    #[test]
    fn test_invalid_dictionary_rejected() {
        let error = ZlibDecoder::with_dictionary(Bytes::new()).unwrap_err();
        assert!(matches!(error, CompressionError::Initialization { status: EngineStatus::InvalidArgument, .. }));

        let error = ZlibDecoder::try_new(ZlibWrapper::Gzip, Some(Bytes::from_static(b"dict"))).unwrap_err();
        assert!(matches!(error, CompressionError::Initialization { .. }));
    }

    #[test]
    fn test_corruption_fails_and_halts() {
        let data = noise(2048);
        let mut compressed = zlib(&data);
        let last = compressed.len() - 1;
        // the Adler-32 trailer no longer matches
        compressed[last] ^= 0xff;

        let decoder = ZlibDecoder::new();
        let error = inflate_chunks(&decoder, [&compressed[..]]).unwrap_err();

        assert!(matches!(error, CompressionError::Decompression { status: EngineStatus::DataError, .. }));
        assert!(decoder.has_failed());
        assert!(!decoder.is_closed());
        assert_eq!(decoder.total_in(), 0);

        // no further decoding
        assert!(decoder.decode(Message::from(BytesMut::from(&zlib(b"again")[..]))).unwrap().is_none());
        assert!(decoder.decode(Message::object("ping")).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_deflate_body_fails() {
        let data = noise(4096);

        // stored blocks carry the bytes verbatim, so a flipped data byte breaks the Adler-32 check
        let mut stored = {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::none());
            encoder.write_all(&data).unwrap();
            encoder.finish().unwrap()
        };
        let middle = stored.len() / 2;
        stored[middle] ^= 0x01;

        // first block header byte after the 2-byte zlib header, BTYPE = 0b11 is reserved
        let mut reserved_block = zlib(&data);
        reserved_block[2] |= 0b110;

        for corrupted in [stored, reserved_block] {
            let decoder = ZlibDecoder::new();
            let error = inflate_chunks(&decoder, corrupted.chunks(512)).unwrap_err();

            assert!(matches!(error, CompressionError::Decompression { status: EngineStatus::DataError, .. }));
            assert!(decoder.has_failed());
            assert!(decoder.decode(Message::from(BytesMut::from(&zlib(b"again")[..]))).unwrap().is_none());
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let decoder = ZlibDecoder::new();
        decoder.close();
        decoder.close();
        decoder.release();

        assert!(!decoder.is_closed());
        assert!(decoder.decode(Message::from(BytesMut::from(&zlib(b"x")[..]))).unwrap().is_none());
    }
}
