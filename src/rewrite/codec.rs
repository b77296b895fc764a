//! Content-encoding codec adapter.
//!
//! Decodes a backend body per its `Content-Encoding` and re-encodes the
//! rewritten body with the same coding. Pure transforms over byte buffers;
//! callers run them on the blocking pool.
//!
//! # Supported Codings
//! - `identity` (or absent): pass-through
//! - `gzip` / `x-gzip`: RFC 1952, multi-member streams accepted
//! - `deflate`: zlib-wrapped per RFC 9110, raw RFC 1951 streams also accepted when decoding
//! - `br`: RFC 7932 Brotli

use std::fmt;
use std::io::{self, Read, Write};

use flate2::{
    read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder},
    write::{GzEncoder, ZlibEncoder},
    Compression,
};
use thiserror::Error;

/// Upper bound on a decoded body (decompression bomb guard).
pub const DEFAULT_DECODE_LIMIT: usize = 64 * 1024 * 1024;

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_LGWIN: u32 = 22;

/// A content coding the proxy can decode and re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Gzip,
    Deflate,
    Brotli,
}

impl Encoding {
    /// Parse a `Content-Encoding` value.
    ///
    /// Returns `None` for codings we cannot handle, including stacked
    /// codings such as `gzip, br`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Some(Encoding::Identity),
            "gzip" | "x-gzip" => Some(Encoding::Gzip),
            "deflate" => Some(Encoding::Deflate),
            "br" => Some(Encoding::Brotli),
            _ => None,
        }
    }

    /// Token used in the `Content-Encoding` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Brotli => "br",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec failures. Never fatal to a request; see the interceptor policy.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{encoding} decode failed: {source}")]
    DecodeFailed {
        encoding: Encoding,
        #[source]
        source: io::Error,
    },

    #[error("{encoding} encode failed: {source}")]
    EncodeFailed {
        encoding: Encoding,
        #[source]
        source: io::Error,
    },

    #[error("decoded body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Decode `body` with the default size limit.
pub fn decode(body: &[u8], encoding: Encoding) -> Result<Vec<u8>, CodecError> {
    decode_limited(body, encoding, DEFAULT_DECODE_LIMIT)
}

/// Decode `body`, failing once the output would exceed `limit` bytes.
pub fn decode_limited(body: &[u8], encoding: Encoding, limit: usize) -> Result<Vec<u8>, CodecError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let decoded = match encoding {
        Encoding::Identity => {
            if body.len() > limit {
                return Err(CodecError::TooLarge { limit });
            }
            return Ok(body.to_vec());
        }
        Encoding::Gzip => read_limited(MultiGzDecoder::new(body), limit),
        Encoding::Deflate => match read_limited(ZlibDecoder::new(body), limit) {
            Ok(decoded) => Ok(decoded),
            Err(ReadError::Io(_)) => read_limited(DeflateDecoder::new(body), limit),
            Err(e) => Err(e),
        },
        Encoding::Brotli => read_limited(brotli::Decompressor::new(body, BROTLI_BUFFER_SIZE), limit),
    };

    decoded.map_err(|e| match e {
        ReadError::Io(source) => CodecError::DecodeFailed { encoding, source },
        ReadError::TooLarge => CodecError::TooLarge { limit },
    })
}

/// Encode `body` with `encoding`.
pub fn encode(body: &[u8], encoding: Encoding) -> Result<Vec<u8>, CodecError> {
    let encoded = match encoding {
        Encoding::Identity => return Ok(body.to_vec()),
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
            encoder.write_all(body).and_then(|_| encoder.finish())
        }
        Encoding::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
            encoder.write_all(body).and_then(|_| encoder.finish())
        }
        Encoding::Brotli => {
            let mut out = Vec::with_capacity(body.len() / 2);
            brotli::CompressorReader::new(body, BROTLI_BUFFER_SIZE, BROTLI_QUALITY, BROTLI_LGWIN)
                .read_to_end(&mut out)
                .map(|_| out)
        }
    };

    encoded.map_err(|source| CodecError::EncodeFailed { encoding, source })
}

enum ReadError {
    Io(io::Error),
    TooLarge,
}

fn read_limited<R: Read>(reader: R, limit: usize) -> Result<Vec<u8>, ReadError> {
    let mut out = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(ReadError::Io)?;
    if out.len() > limit {
        return Err(ReadError::TooLarge);
    }
    Ok(out)
}
