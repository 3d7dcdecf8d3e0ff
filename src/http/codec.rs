//! Transport encoding of request and response bodies.
//!
//! Git clients gzip large `upload-pack` requests.  Bodies are decoded
//! incrementally, chunk by chunk, so a request never has to be held in memory
//! as a whole; malformed or truncated input is reported as soon as it is
//! seen instead of stalling the helper.

use std::io::Write;

use axum::http::{header, HeaderMap};
use bytes::{Buf, Bytes, BytesMut};
use flate2::write::GzEncoder;
use flate2::{Compression, Crc, Decompress, FlushDecompress, Status};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported content encoding {0:?}")]
    Unsupported(String),
    #[error("invalid gzip request body")]
    Corrupt(#[source] std::io::Error),
}

/// Body encodings understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
}

impl ContentEncoding {
    /// Parse a `Content-Encoding` header value.
    pub fn parse(value: &str) -> Result<Self, CodecError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Ok(Self::Identity),
            "gzip" | "x-gzip" => Ok(Self::Gzip),
            other => Err(CodecError::Unsupported(other.to_string())),
        }
    }

    /// The encoding of a request body, from its `Content-Encoding` header.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, CodecError> {
        match headers.get(header::CONTENT_ENCODING) {
            None => Ok(Self::Identity),
            Some(value) => {
                let value = value
                    .to_str()
                    .map_err(|_| CodecError::Unsupported(format!("{value:?}")))?;
                Self::parse(value)
            }
        }
    }

    /// Whether an `Accept-Encoding` header admits a gzip response.
    pub fn client_accepts_gzip(headers: &HeaderMap) -> bool {
        headers
            .get_all(header::ACCEPT_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|item| {
                let mut parts = item.split(';').map(str::trim);
                let coding = parts.next().unwrap_or_default();
                let refused = parts.any(|p| {
                    p.strip_prefix("q=")
                        .and_then(|q| q.parse::<f32>().ok())
                        .is_some_and(|q| q == 0.0)
                });
                (coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip"))
                    && !refused
            })
    }

    pub fn header_value(self) -> Option<&'static str> {
        match self {
            Self::Identity => None,
            Self::Gzip => Some("gzip"),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Largest piece of plain output a [`Decoder`] hands out at once.
pub const MAX_DECODED_PIECE: usize = 32 * 1024;

/// Upper bound on a gzip member header, optional name and comment included.
const MAX_GZIP_HEADER: usize = 64 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZIP_METHOD_DEFLATE: u8 = 8;
const GZIP_FIXED_HEADER_LEN: usize = 10;
const GZIP_TRAILER_LEN: usize = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const FRESERVED: u8 = 0xe0;

/// Incremental request-body decoder.
///
/// Encoded input is queued with [`push`](Decoder::push) and plain output is
/// drained with [`next_piece`](Decoder::next_piece) until it returns `None`.
/// No piece is larger than [`MAX_DECODED_PIECE`], however well the input
/// compresses, so the output of one network chunk is never held at once.
pub struct Decoder {
    kind: DecoderKind,
}

enum DecoderKind {
    Identity(Bytes),
    Gzip(Box<Gunzip>),
}

impl Decoder {
    pub fn new(encoding: ContentEncoding) -> Self {
        let kind = match encoding {
            ContentEncoding::Identity => DecoderKind::Identity(Bytes::new()),
            ContentEncoding::Gzip => DecoderKind::Gzip(Box::new(Gunzip::new())),
        };
        Self { kind }
    }

    /// Queue one chunk of encoded input.
    pub fn push(&mut self, chunk: Bytes) {
        match &mut self.kind {
            DecoderKind::Identity(pending) if pending.is_empty() => *pending = chunk,
            DecoderKind::Identity(pending) => {
                let mut joined = BytesMut::with_capacity(pending.len() + chunk.len());
                joined.extend_from_slice(pending);
                joined.extend_from_slice(&chunk);
                *pending = joined.freeze();
            }
            DecoderKind::Gzip(gz) => gz.input.extend_from_slice(&chunk),
        }
    }

    /// The next piece of plain output, or `None` once the queued input is
    /// used up.
    pub fn next_piece(&mut self) -> Result<Option<Bytes>, CodecError> {
        match &mut self.kind {
            DecoderKind::Identity(pending) if pending.is_empty() => Ok(None),
            DecoderKind::Identity(pending) => {
                let len = pending.len().min(MAX_DECODED_PIECE);
                Ok(Some(pending.split_to(len)))
            }
            DecoderKind::Gzip(gz) => gz.next_piece(),
        }
    }

    /// Signal end of input.  Fails if the compressed stream was cut short or
    /// its checksum does not match.  Call only after draining
    /// [`next_piece`](Decoder::next_piece).
    pub fn finish(self) -> Result<(), CodecError> {
        match self.kind {
            DecoderKind::Identity(_) => Ok(()),
            DecoderKind::Gzip(gz) => match gz.stage {
                GzipStage::MemberEnd if gz.input.is_empty() => Ok(()),
                _ => Err(corrupt("gzip stream ended early")),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GzipStage {
    Header,
    Deflate,
    Trailer,
    /// At least one member was read in full; another may follow.
    MemberEnd,
}

/// Gzip member framing around a raw inflate stream.
struct Gunzip {
    stage: GzipStage,
    input: BytesMut,
    inflate: Decompress,
    crc: Crc,
    scratch: Vec<u8>,
}

impl Gunzip {
    fn new() -> Self {
        Self {
            stage: GzipStage::Header,
            input: BytesMut::new(),
            inflate: Decompress::new(false),
            crc: Crc::new(),
            scratch: vec![0; MAX_DECODED_PIECE],
        }
    }

    fn next_piece(&mut self) -> Result<Option<Bytes>, CodecError> {
        loop {
            match self.stage {
                GzipStage::Header | GzipStage::MemberEnd => {
                    if self.input.is_empty() {
                        return Ok(None);
                    }
                    let Some(len) = gzip_header_len(&self.input)? else {
                        if self.input.len() > MAX_GZIP_HEADER {
                            return Err(corrupt("gzip header too long"));
                        }
                        return Ok(None);
                    };
                    self.input.advance(len);
                    self.inflate.reset(false);
                    self.crc.reset();
                    self.stage = GzipStage::Deflate;
                }
                GzipStage::Deflate => {
                    let in_before = self.inflate.total_in();
                    let out_before = self.inflate.total_out();
                    // Called even without new input: the previous call may
                    // have stopped on a full output buffer.
                    let status = self
                        .inflate
                        .decompress(&self.input, &mut self.scratch, FlushDecompress::None)
                        .map_err(|e| CodecError::Corrupt(e.into()))?;
                    let consumed = (self.inflate.total_in() - in_before) as usize;
                    let produced = (self.inflate.total_out() - out_before) as usize;
                    self.input.advance(consumed);
                    if status == Status::StreamEnd {
                        self.stage = GzipStage::Trailer;
                    }
                    if produced > 0 {
                        let piece = &self.scratch[..produced];
                        self.crc.update(piece);
                        return Ok(Some(Bytes::copy_from_slice(piece)));
                    }
                    if consumed == 0 && status != Status::StreamEnd {
                        return Ok(None);
                    }
                }
                GzipStage::Trailer => {
                    if self.input.len() < GZIP_TRAILER_LEN {
                        return Ok(None);
                    }
                    let trailer = self.input.split_to(GZIP_TRAILER_LEN);
                    let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
                    let size = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
                    if crc != self.crc.sum() || size != self.crc.amount() {
                        return Err(corrupt("gzip checksum mismatch"));
                    }
                    self.stage = GzipStage::MemberEnd;
                }
            }
        }
    }
}

/// Length of the gzip member header at the start of `buf`, or `None` while
/// it is still incomplete.
fn gzip_header_len(buf: &[u8]) -> Result<Option<usize>, CodecError> {
    let magic = buf.len().min(GZIP_MAGIC.len());
    if buf[..magic] != GZIP_MAGIC[..magic] {
        return Err(corrupt("not a gzip stream"));
    }
    if buf.len() < GZIP_FIXED_HEADER_LEN {
        return Ok(None);
    }
    if buf[2] != GZIP_METHOD_DEFLATE {
        return Err(corrupt("unknown gzip compression method"));
    }
    let flags = buf[3];
    if flags & FRESERVED != 0 {
        return Err(corrupt("reserved gzip flags set"));
    }

    let mut pos = GZIP_FIXED_HEADER_LEN;
    if flags & FEXTRA != 0 {
        let Some(xlen) = buf.get(pos..pos + 2) else {
            return Ok(None);
        };
        pos += 2 + usize::from(u16::from_le_bytes([xlen[0], xlen[1]]));
    }
    for flag in [FNAME, FCOMMENT] {
        if flags & flag != 0 {
            let Some(nul) = buf.get(pos..).and_then(|rest| rest.iter().position(|&b| b == 0)) else {
                return Ok(None);
            };
            pos += nul + 1;
        }
    }
    if flags & FHCRC != 0 {
        pos += 2;
    }
    Ok((buf.len() >= pos).then_some(pos))
}

fn corrupt(reason: &'static str) -> CodecError {
    CodecError::Corrupt(std::io::Error::new(std::io::ErrorKind::InvalidData, reason))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Incremental response-body encoder.
pub struct Encoder {
    gzip: Option<GzEncoder<Vec<u8>>>,
}

impl Encoder {
    pub fn new(encoding: ContentEncoding) -> Self {
        let gzip = match encoding {
            ContentEncoding::Identity => None,
            ContentEncoding::Gzip => Some(GzEncoder::new(Vec::new(), Compression::default())),
        };
        Self { gzip }
    }

    /// Compress one chunk.  The result may be empty while the compressor
    /// buffers input.
    pub fn encode(&mut self, chunk: Bytes) -> std::io::Result<Bytes> {
        let Some(gz) = self.gzip.as_mut() else {
            return Ok(chunk);
        };
        gz.write_all(&chunk)?;
        Ok(Bytes::from(std::mem::take(gz.get_mut())))
    }

    /// Flush the compressor and emit the trailer.
    pub fn finish(self) -> std::io::Result<Bytes> {
        match self.gzip {
            None => Ok(Bytes::new()),
            Some(gz) => gz.finish().map(Bytes::from),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
