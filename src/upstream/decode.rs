//! Upstream body decoding.
//!
//! Bodies that are re-serialized by the proxy lose their `Content-Encoding`
//! header, so they must be decoded first. Decoding never fails the request:
//! on error the raw bytes are kept and the fallback is reported.

use std::io::{Cursor, Read};

use brotli::Decompressor;
use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

/// Why decoding fell back to the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingFallback {
    pub encoding: String,
    pub reason: String,
    /// The decoded output would have exceeded the limit.
    pub oversized: bool,
}

struct Failure {
    reason: String,
    oversized: bool,
}

impl Failure {
    fn corrupt(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            oversized: false,
        }
    }
}

/// A body with every content coding removed, or the raw bytes plus the fallback.
#[derive(Debug, Clone)]
pub struct DecodedBody {
    pub bytes: Bytes,
    pub fallback: Option<EncodingFallback>,
}

/// True when `content_encoding` names anything other than identity.
pub fn is_encoded(content_encoding: Option<&str>) -> bool {
    codings(content_encoding).next().is_some()
}

fn codings(content_encoding: Option<&str>) -> impl DoubleEndedIterator<Item = String> + '_ {
    content_encoding
        .unwrap_or_default()
        .split(',')
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty() && token != "identity")
        .collect::<Vec<_>>()
        .into_iter()
}

/// Undo every coding in `content_encoding` (applied in listed order, so
/// removed in reverse). Output is capped at `limit` bytes.
pub fn decode_body(raw: Bytes, content_encoding: Option<&str>, limit: usize) -> DecodedBody {
    let mut current = raw.clone();

    for coding in codings(content_encoding).rev() {
        let result = match coding.as_str() {
            "gzip" | "x-gzip" => read_limited(GzDecoder::new(&current[..]), limit),
            "deflate" => read_limited(ZlibDecoder::new(&current[..]), limit)
                .or_else(|failure| {
                    if failure.oversized {
                        Err(failure)
                    } else {
                        read_limited(DeflateDecoder::new(&current[..]), limit)
                    }
                }),
            "br" => read_limited(Decompressor::new(Cursor::new(&current[..]), 4096), limit),
            other => Err(Failure::corrupt(format!("unsupported content-encoding {other}"))),
        };

        match result {
            Ok(decoded) => current = Bytes::from(decoded),
            Err(Failure { reason, oversized }) => {
                tracing::warn!(
                    encoding = %coding,
                    encoding_fallback = true,
                    reason = %reason,
                    "Body decoding failed, using raw bytes"
                );
                crate::observability::metrics::record_encoding_fallback(&coding);
                return DecodedBody {
                    bytes: raw,
                    fallback: Some(EncodingFallback {
                        encoding: coding,
                        reason,
                        oversized,
                    }),
                };
            }
        }
    }

    DecodedBody {
        bytes: current,
        fallback: None,
    }
}

fn read_limited<R: Read>(reader: R, limit: usize) -> Result<Vec<u8>, Failure> {
    let mut out = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| Failure::corrupt(e.to_string()))?;
    if out.len() > limit {
        return Err(Failure {
            reason: format!("decoded body exceeds {limit} bytes"),
            oversized: true,
        });
    }
    Ok(out)
}
