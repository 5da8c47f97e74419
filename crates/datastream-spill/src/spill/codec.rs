//! Compression facade for spill blocks (feature-gated).
//!
//! Keep this tiny and synchronous. We only support `None`, `Zstd`, `Lz4`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum Codec {
    #[default]
    None = 0,
    Zstd = 1,
    Lz4 = 2,
}

impl Codec {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Codec::None),
            1 => Ok(Codec::Zstd),
            2 => Ok(Codec::Lz4),
            other => Err(Error::CodecUnsupported(format!("tag {other}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Zstd => "zstd",
            Codec::Lz4 => "lz4",
        }
    }

    /// Whether this build can actually encode with the codec.
    pub fn is_available(self) -> bool {
        match self {
            Codec::None => true,
            Codec::Zstd => cfg!(feature = "zstd"),
            Codec::Lz4 => cfg!(feature = "lz4"),
        }
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Codec::None),
            "zstd" => Ok(Codec::Zstd),
            "lz4" => Ok(Codec::Lz4),
            other => Err(Error::CodecUnsupported(other.to_string())),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn compress(codec: Codec, input: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Codec::None => Ok(input.to_vec()),
        Codec::Zstd => {
            #[cfg(feature = "zstd")]
            {
                let lvl = 3;
                let mut out = Vec::new();
                zstd::stream::copy_encode(input, &mut out, lvl)
                    .map_err(|e| Error::Codec(format!("zstd: {e}")))?;
                Ok(out)
            }
            #[cfg(not(feature = "zstd"))]
            {
                Err(Error::CodecUnsupported("zstd".into()))
            }
        }
        Codec::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                Ok(lz4_flex::compress_prepend_size(input))
            }
            #[cfg(not(feature = "lz4"))]
            {
                Err(Error::CodecUnsupported("lz4".into()))
            }
        }
    }
}

pub fn decompress(codec: Codec, input: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Codec::None => Ok(input.to_vec()),
        Codec::Zstd => {
            #[cfg(feature = "zstd")]
            {
                let mut out = Vec::new();
                zstd::stream::copy_decode(input, &mut out)
                    .map_err(|e| Error::Codec(format!("zstd: {e}")))?;
                Ok(out)
            }
            #[cfg(not(feature = "zstd"))]
            {
                Err(Error::CodecUnsupported("zstd".into()))
            }
        }
        Codec::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                lz4_flex::decompress_size_prepended(input)
                    .map_err(|e| Error::Codec(format!("lz4: {e}")))
            }
            #[cfg(not(feature = "lz4"))]
            {
                Err(Error::CodecUnsupported("lz4".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names() {
        assert_eq!("none".parse::<Codec>().unwrap(), Codec::None);
        assert_eq!(" ZSTD ".parse::<Codec>().unwrap(), Codec::Zstd);
        assert_eq!("lz4".parse::<Codec>().unwrap(), Codec::Lz4);
        assert!("snappy".parse::<Codec>().is_err());
        assert!(Codec::from_u8(9).is_err());
    }

    #[cfg(not(feature = "zstd"))]
    #[test]
    fn missing_backend_is_reported() {
        assert!(!Codec::Zstd.is_available());
        assert!(matches!(
            compress(Codec::Zstd, b"abc"),
            Err(Error::CodecUnsupported(_))
        ));
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn lz4_roundtrip() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbb".repeat(8);
        let packed = compress(Codec::Lz4, &data).unwrap();
        assert_eq!(decompress(Codec::Lz4, &packed).unwrap(), data);
    }
}
