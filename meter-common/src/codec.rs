use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// Compresses a payload with gzip at the fastest compression level.
///
/// Every payload leaving the agent goes through this function before it is optionally encrypted
/// and signed.
pub fn pack(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompresses a gzip payload produced by [`pack`].
///
/// An empty input yields an empty output, since a request body may legitimately be empty.
pub fn unpack(data: &[u8]) -> io::Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let mut decoder = GzDecoder::new(data);
    let mut output = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut output)?;
    Ok(output)
}

/// Returned when a `Content-Encoding` is neither gzip nor identity.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unsupported content encoding {0:?}")]
pub struct UnsupportedEncoding(pub String);

/// The content encodings understood on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ContentEncoding {
    /// No transformation.
    #[default]
    Identity,
    /// Gzip, see [`pack`] and [`unpack`].
    Gzip,
}

impl ContentEncoding {
    /// Parses a `Content-Encoding` header value.
    ///
    /// A missing or blank header is treated as identity.
    pub fn parse(value: &str) -> Result<Self, UnsupportedEncoding> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Ok(Self::Identity),
            "gzip" | "x-gzip" => Ok(Self::Gzip),
            other => Err(UnsupportedEncoding(other.to_owned())),
        }
    }

    /// Returns the header value for this encoding, `None` for identity.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::Identity => None,
            Self::Gzip => Some("gzip"),
        }
    }

    /// Decodes a body in this encoding.
    pub fn decode(self, data: Vec<u8>) -> io::Result<Vec<u8>> {
        match self {
            Self::Identity => Ok(data),
            Self::Gzip => unpack(&data),
        }
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or("identity"))
    }
}

impl FromStr for ContentEncoding {
    type Err = UnsupportedEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl_str_serde!(ContentEncoding, "a content encoding (gzip or identity)");

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_pack_unpack() {
        let payload = br#"[{"id":"PollCount","type":"counter","delta":1}]"#;
        let packed = pack(payload).unwrap();
        assert_ne!(packed.as_slice(), payload.as_slice());
        assert_eq!(unpack(&packed).unwrap(), payload.to_vec());
    }

    #[test]
    fn test_pack_empty() {
        let packed = pack(&[]).unwrap();
        assert!(!packed.is_empty());
        assert!(unpack(&packed).unwrap().is_empty());
    }

    #[test]
    fn test_unpack_empty_input() {
        assert!(unpack(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_unpack_garbage() {
        assert!(unpack(b"definitely not gzip").is_err());
    }

    #[test]
    fn test_parse_encoding() {
        assert_eq!(ContentEncoding::parse("").unwrap(), ContentEncoding::Identity);
        assert_eq!(ContentEncoding::parse("identity").unwrap(), ContentEncoding::Identity);
        assert_eq!(ContentEncoding::parse("gzip").unwrap(), ContentEncoding::Gzip);
        assert_eq!(ContentEncoding::parse(" GZIP ").unwrap(), ContentEncoding::Gzip);
        assert_eq!(ContentEncoding::parse("x-gzip").unwrap(), ContentEncoding::Gzip);
        assert_eq!(
            ContentEncoding::parse("br").unwrap_err(),
            UnsupportedEncoding("br".to_owned())
        );
    }

    #[test]
    fn test_encoding_serde() {
        let encoding: ContentEncoding = serde_json::from_str(r#""gzip""#).unwrap();
        assert_eq!(encoding, ContentEncoding::Gzip);
        assert_eq!(serde_json::to_string(&encoding).unwrap(), r#""gzip""#);
        assert!(serde_json::from_str::<ContentEncoding>(r#""zstd""#).is_err());
    }
}
