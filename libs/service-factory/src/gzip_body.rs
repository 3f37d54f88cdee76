//! Lazily decompressing response body.
//!
//! [`GzipBody`] wraps a gzip-compressed [`http_body::Body`] and yields the
//! inflated bytes as the caller polls it. The gzip member header and trailer
//! are parsed here; the deflate payload goes through a raw `flate2`
//! [`Decompress`] writing into a fixed-size buffer, so no single poll produces
//! more than [`MAX_FRAME_LEN`] bytes however well the input compresses.

use bytes::{Buf, Bytes, BytesMut};
use flate2::{Crc, Decompress, FlushDecompress, Status};
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

/// Upper bound on the length of a data frame yielded by [`GzipBody`]
pub const MAX_FRAME_LEN: usize = 32 * 1024;

/// Longest gzip member header accepted (file name and comment included)
const MAX_HEADER_LEN: usize = 64 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const METHOD_DEFLATE: u8 = 8;
const TRAILER_LEN: usize = 8;

const FLAG_HCRC: u8 = 0x02;
const FLAG_EXTRA: u8 = 0x04;
const FLAG_NAME: u8 = 0x08;
const FLAG_COMMENT: u8 = 0x10;
const FLAG_RESERVED: u8 = 0xE0;

fn corrupt(msg: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Length of the gzip member header at the start of `buf`, or `None` if
/// more bytes are needed.
fn header_len(buf: &[u8]) -> io::Result<Option<usize>> {
    let magic_len = buf.len().min(GZIP_MAGIC.len());
    if buf.get(..magic_len) != GZIP_MAGIC.get(..magic_len) {
        return Err(corrupt("not a gzip stream"));
    }
    let (Some(&method), Some(&flags)) = (buf.get(2), buf.get(3)) else {
        return Ok(None);
    };
    if method != METHOD_DEFLATE {
        return Err(corrupt(format!("unsupported gzip compression method {method}")));
    }
    if flags & FLAG_RESERVED != 0 {
        return Err(corrupt("reserved gzip header flags set"));
    }

    // ID1 ID2 CM FLG MTIME(4) XFL OS
    let mut pos = 10;
    if flags & FLAG_EXTRA != 0 {
        let Some(len) = buf.get(pos..pos + 2) else {
            return Ok(None);
        };
        pos += 2 + usize::from(u16::from_le_bytes([len[0], len[1]]));
    }
    for flag in [FLAG_NAME, FLAG_COMMENT] {
        if flags & flag == 0 {
            continue;
        }
        let Some(rest) = buf.get(pos..) else {
            return Ok(None);
        };
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            return Ok(None);
        };
        pos += nul + 1;
    }
    if flags & FLAG_HCRC != 0 {
        pos += 2;
    }

    Ok((buf.len() >= pos).then_some(pos))
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    u32::from_le_bytes(word)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Header,
    Deflate,
    Trailer,
    Finished,
}

enum Step {
    Data(Bytes),
    NeedInput,
    Finished,
}

/// Push decoder for a single gzip member
struct Decoder {
    stage: Stage,
    pending: BytesMut,
    inflater: Decompress,
    crc: Crc,
}

impl Decoder {
    fn new() -> Self {
        Self {
            stage: Stage::Header,
            pending: BytesMut::new(),
            inflater: Decompress::new(false),
            crc: Crc::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        // Bytes after the member trailer are ignored
        if self.stage != Stage::Finished {
            self.pending.extend_from_slice(chunk);
        }
    }

    fn step(&mut self) -> io::Result<Step> {
        loop {
            match self.stage {
                Stage::Header => match header_len(&self.pending)? {
                    Some(len) => {
                        self.pending.advance(len);
                        self.stage = Stage::Deflate;
                    }
                    None if self.pending.len() > MAX_HEADER_LEN => {
                        return Err(corrupt("gzip header too long"));
                    }
                    None => return Ok(Step::NeedInput),
                },
                Stage::Deflate => {
                    let mut out = Vec::with_capacity(MAX_FRAME_LEN);
                    let before = self.inflater.total_in();
                    let status = self
                        .inflater
                        .decompress_vec(&self.pending, &mut out, FlushDecompress::None)
                        .map_err(corrupt)?;
                    let consumed = usize::try_from(self.inflater.total_in() - before)
                        .map_err(|_| corrupt("deflate input counter overflow"))?;
                    self.pending.advance(consumed);

                    if status == Status::StreamEnd {
                        self.stage = Stage::Trailer;
                    }
                    if !out.is_empty() {
                        self.crc.update(&out);
                        return Ok(Step::Data(Bytes::from(out)));
                    }
                    if status != Status::StreamEnd && consumed == 0 {
                        return Ok(Step::NeedInput);
                    }
                }
                Stage::Trailer => {
                    let Some(trailer) = self.pending.get(..TRAILER_LEN) else {
                        return Ok(Step::NeedInput);
                    };
                    if read_u32_le(&trailer[..4]) != self.crc.sum() {
                        return Err(corrupt("gzip checksum mismatch"));
                    }
                    if read_u32_le(&trailer[4..]) != self.crc.amount() {
                        return Err(corrupt("gzip length mismatch"));
                    }
                    self.pending.clear();
                    self.stage = Stage::Finished;
                }
                Stage::Finished => return Ok(Step::Finished),
            }
        }
    }
}

pin_project! {
    /// Body presenting a gzip-compressed body as its decompressed bytes.
    ///
    /// Takes exclusive ownership of the compressed body. Errors surface as
    /// [`std::io::Error`] at the point of read:
    /// - `InvalidData` when the compressed stream is corrupt, truncated, or
    ///   fails its checksum
    /// - `Other` wrapping the inner body's own error (connection dropped,
    ///   timeout, ...)
    ///
    /// Data frames are at most [`MAX_FRAME_LEN`] bytes. Trailers of the inner
    /// body are held back and yielded after the last data frame. The
    /// decompressed length is never known up front, so [`Body::size_hint`] is
    /// always unbounded.
    pub struct GzipBody<B> {
        #[pin]
        inner: B,
        decoder: Decoder,
        trailers: Option<HeaderMap>,
        inner_done: bool,
        done: bool,
    }
}

impl<B> GzipBody<B> {
    /// Wrap a gzip-compressed body.
    #[must_use]
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            decoder: Decoder::new(),
            trailers: None,
            inner_done: false,
            done: false,
        }
    }
}

impl<B> std::fmt::Debug for GzipBody<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipBody")
            .field("stage", &self.decoder.stage)
            .field("pending_input", &self.decoder.pending.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<B> Body for GzipBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        loop {
            if *this.done {
                return Poll::Ready(None);
            }

            match this.decoder.step() {
                Ok(Step::Data(out)) => return Poll::Ready(Some(Ok(Frame::data(out)))),
                Ok(Step::Finished) if *this.inner_done => {
                    *this.done = true;
                    return Poll::Ready(this.trailers.take().map(|t| Ok(Frame::trailers(t))));
                }
                // Drain the inner body for its trailers
                Ok(Step::Finished | Step::NeedInput) => {}
                Err(e) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
            }

            if *this.inner_done {
                *this.done = true;
                return Poll::Ready(Some(Err(corrupt("gzip stream ended early"))));
            }

            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(chunk) => this.decoder.push(&chunk),
                    Err(frame) => {
                        if let Ok(trailers) = frame.into_trailers() {
                            this.trailers.get_or_insert_with(HeaderMap::new).extend(trailers);
                        }
                    }
                },
                Some(Err(e)) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(io::Error::other(e))));
                }
                None => *this.inner_done = true,
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use futures::stream;
    use http_body_util::{BodyExt, Full, StreamBody};
    use std::convert::Infallible;
    use std::io::Write;

    fn gzip_compress(data: &[u8]) -> Vec<u8> {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// Split `data` into frames of `size` bytes each.
    fn chunked(
        data: &[u8],
        size: usize,
    ) -> StreamBody<impl futures::Stream<Item = Result<Frame<Bytes>, Infallible>> + use<>> {
        let frames: Vec<_> = data
            .chunks(size)
            .map(|c| Ok(Frame::data(Bytes::copy_from_slice(c))))
            .collect();
        StreamBody::new(stream::iter(frames))
    }

    /// Text that does not collapse into a handful of deflate blocks.
    fn sample_text(lines: usize) -> Vec<u8> {
        (0..lines)
            .map(|i| format!("line {i}: the quick brown fox jumps over {} lazy dogs\n", i * 7))
            .collect::<String>()
            .into_bytes()
    }

    #[tokio::test]
    async fn test_single_frame_decompressed() {
        let plain = br#"{"name":"PETER","id":"123"}"#;
        let body = GzipBody::new(Full::new(Bytes::from(gzip_compress(plain))));

        let out = body.collect().await.unwrap().to_bytes();
        assert_eq!(out.as_ref(), plain);
    }

    #[tokio::test]
    async fn test_many_small_frames_decompressed() {
        let plain = sample_text(200);
        let body = GzipBody::new(chunked(&gzip_compress(&plain), 3));

        let out = body.collect().await.unwrap().to_bytes();
        assert_eq!(out.as_ref(), plain.as_slice());
    }

    #[tokio::test]
    async fn test_output_is_streamed_in_several_frames() {
        let plain = sample_text(5000);
        let mut body = GzipBody::new(chunked(&gzip_compress(&plain), 512));

        let mut frames = 0usize;
        let mut collected = Vec::new();
        while let Some(frame) = body.frame().await {
            let frame = frame.unwrap();
            if let Some(data) = frame.data_ref() {
                frames += 1;
                collected.extend_from_slice(data);
            }
        }

        assert!(frames > 1, "expected incremental output, got {frames} frame(s)");
        assert_eq!(collected, plain);
        assert!(body.is_end_stream());
    }

    #[tokio::test]
    async fn test_truncated_stream_is_invalid_data() {
        let compressed = gzip_compress(&sample_text(50));
        let truncated = Bytes::copy_from_slice(&compressed[..compressed.len() / 2]);
        let body = GzipBody::new(Full::new(truncated));

        let err = body.collect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_invalid_data() {
        let mut compressed = gzip_compress(b"checksum me");
        // CRC32 sits in the 8-byte trailer, right before ISIZE
        let crc_pos = compressed.len() - 8;
        compressed[crc_pos] ^= 0xFF;
        let body = GzipBody::new(Full::new(Bytes::from(compressed)));

        let err = body.collect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_not_gzip_at_all_is_invalid_data() {
        let body = GzipBody::new(Full::new(Bytes::from_static(b"plain text, no magic")));

        let err = body.collect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_inner_error_propagates_with_source() {
        let compressed = gzip_compress(&sample_text(50));
        let frames: Vec<Result<Frame<Bytes>, io::Error>> = vec![
            Ok(Frame::data(Bytes::copy_from_slice(&compressed[..20]))),
            Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
        ];
        let body = GzipBody::new(StreamBody::new(stream::iter(frames)));

        let err = body.collect().await.unwrap_err();
        let source_kind = err
            .get_ref()
            .and_then(|e| e.downcast_ref::<io::Error>())
            .map(io::Error::kind);
        assert_eq!(source_kind, Some(io::ErrorKind::ConnectionReset));
    }

    #[tokio::test]
    async fn test_no_frames_after_error() {
        let body = GzipBody::new(Full::new(Bytes::from_static(b"garbage")));
        let mut body = std::pin::pin!(body);

        assert!(body.frame().await.unwrap().is_err());
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn test_highly_compressible_frame_yields_bounded_frames() {
        let plain = vec![0u8; 4 * 1024 * 1024];
        let compressed = gzip_compress(&plain);
        assert!(compressed.len() < 16 * 1024);
        let mut body = GzipBody::new(Full::new(Bytes::from(compressed)));

        let mut total = 0usize;
        let mut frames = 0usize;
        while let Some(frame) = body.frame().await {
            let data = frame.unwrap().into_data().unwrap();
            assert!(
                data.len() <= MAX_FRAME_LEN,
                "frame of {} bytes exceeds {MAX_FRAME_LEN}",
                data.len()
            );
            assert!(data.iter().all(|&b| b == 0));
            total += data.len();
            frames += 1;
        }

        assert_eq!(total, plain.len());
        assert!(frames >= plain.len() / MAX_FRAME_LEN);
    }

    #[tokio::test]
    async fn test_trailers_yielded_after_all_data() {
        let plain = sample_text(300);
        let compressed = gzip_compress(&plain);
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", http::HeaderValue::from_static("abc"));

        let (head, tail) = compressed.split_at(compressed.len() - 4);
        let frames: Vec<Result<Frame<Bytes>, Infallible>> = vec![
            Ok(Frame::data(Bytes::copy_from_slice(head))),
            Ok(Frame::trailers(trailers)),
            Ok(Frame::data(Bytes::copy_from_slice(tail))),
        ];
        let mut body = GzipBody::new(StreamBody::new(stream::iter(frames)));

        let mut collected = Vec::new();
        let mut seen_trailers = None;
        while let Some(frame) = body.frame().await {
            let frame = frame.unwrap();
            assert!(seen_trailers.is_none(), "frame after trailers");
            match frame.into_data() {
                Ok(data) => collected.extend_from_slice(&data),
                Err(frame) => seen_trailers = frame.into_trailers().ok(),
            }
        }

        assert_eq!(collected, plain);
        assert_eq!(seen_trailers.unwrap()["x-checksum"], "abc");
    }

    #[tokio::test]
    async fn test_header_with_file_name_and_comment() {
        use flate2::{Compression, GzBuilder};

        let plain = br#"{"name":"PETER","id":"123"}"#;
        let mut encoder = GzBuilder::new()
            .filename("people.json")
            .comment("exported")
            .extra(vec![1, 2, 3])
            .write(Vec::new(), Compression::default());
        encoder.write_all(plain).unwrap();
        let compressed = encoder.finish().unwrap();

        let body = GzipBody::new(chunked(&compressed, 2));
        let out = body.collect().await.unwrap().to_bytes();
        assert_eq!(out.as_ref(), plain);
    }

    #[tokio::test]
    async fn test_length_mismatch_is_invalid_data() {
        let mut compressed = gzip_compress(b"length me");
        let isize_pos = compressed.len() - 4;
        compressed[isize_pos] ^= 0x01;
        let body = GzipBody::new(Full::new(Bytes::from(compressed)));

        let err = body.collect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_size_hint_is_unknown() {
        let compressed = gzip_compress(b"abc");
        let body = GzipBody::new(Full::new(Bytes::from(compressed)));

        assert_eq!(body.size_hint().exact(), None);
        assert!(!body.is_end_stream());
    }
}
