use std::fmt;

use flate2::Decompress;

/// The framing around a deflate payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum ZlibWrapper {
    /// zlib header and Adler-32 trailer, RFC 1950
    #[default]
    Zlib,
    /// gzip header and CRC-32 trailer, RFC 1952
    Gzip,
    /// bare deflate blocks, RFC 1951
    Raw,
}

impl ZlibWrapper {
    /// Only the zlib header can announce a preset dictionary.
    #[inline]
    pub fn supports_dictionary(self) -> bool {
        matches!(self, ZlibWrapper::Zlib)
    }

    pub(crate) fn engine(self) -> Decompress {
        match self {
            ZlibWrapper::Zlib => Decompress::new(true),
            ZlibWrapper::Gzip => Decompress::new_gzip(15),
            ZlibWrapper::Raw => Decompress::new(false),
        }
    }
}

impl fmt::Display for ZlibWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ZlibWrapper::Zlib => "zlib",
            ZlibWrapper::Gzip => "gzip",
            ZlibWrapper::Raw => "raw",
        };
        f.write_str(name)
    }
}
