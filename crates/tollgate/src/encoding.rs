//! Content-encoding helpers

use axum::http::{HeaderMap, header};
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;

use crate::error::{Result, TollgateError};

/// Whether the headers declare a gzip body
pub fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|e| e.trim().eq_ignore_ascii_case("gzip")))
        .unwrap_or(false)
}

pub fn gunzip(body: &[u8]) -> Result<Bytes> {
    let mut decoder = GzDecoder::new(body);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| TollgateError::General(format!("Failed to decompress gzip body: {e}")))?;
    Ok(Bytes::from(out))
}

/// The body as plain bytes, gunzipped when the headers say so
pub fn decode_body(headers: &HeaderMap, body: &Bytes) -> Result<Bytes> {
    if is_gzip(headers) {
        gunzip(body)
    } else {
        Ok(body.clone())
    }
}

/// Best-effort variant for logging: falls back to the raw bytes
pub fn decode_for_logging(headers: &HeaderMap, body: &Bytes) -> Bytes {
    decode_body(headers, body).unwrap_or_else(|e| {
        tracing::debug!("Logging raw body: {e}");
        body.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_decode_gzip_body() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let body = Bytes::from(gzip(br#"{"error":"rate limited"}"#));
        let decoded = decode_body(&headers, &body).unwrap();
        assert_eq!(&decoded[..], br#"{"error":"rate limited"}"#);
    }

    #[test]
    fn test_plain_body_untouched() {
        let body = Bytes::from_static(b"plain");
        assert_eq!(decode_body(&HeaderMap::new(), &body).unwrap(), body);
    }

    #[test]
    fn test_corrupt_gzip_falls_back_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let body = Bytes::from_static(b"not gzip");
        assert!(decode_body(&headers, &body).is_err());
        assert_eq!(decode_for_logging(&headers, &body), body);
    }
}
