//! Codec frame protocol (C1, spec.md §4.1): a stateful byte transformer with
//! lifecycle `init(options) -> update(chunk)* -> final() -> result`. Codecs
//! run either inline on the orchestration side or inside a worker pool lease
//! (`crate::worker_pool`) — the trait object itself is transport-agnostic.

#[cfg(feature = "encryption")]
mod aes;
mod deflate;
mod store;

#[cfg(feature = "encryption")]
pub use aes::{AesWrapperCodec, AES256_STRENGTH_CODE};
pub use deflate::DeflateCodec;
pub use store::StoreCodec;

use crate::error::ArchiveError;

/// Values computed alongside the final chunk (spec.md §4.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecTotals {
    pub input_bytes: u64,
    pub output_bytes: u64,
    /// CRC-32 of the input bytes, unless the concrete codec defines otherwise
    /// (the AES wrapper reports the CRC of its plaintext input; callers
    /// decide whether to suppress it in the central directory per spec.md §6).
    pub signature: u32,
}

pub trait Codec: Send {
    /// Feed one input chunk, returning zero or more output byte chunks.
    /// Once a codec has failed, every subsequent call must fail too.
    fn update(&mut self, chunk: &[u8]) -> Result<Vec<u8>, ArchiveError>;

    /// Flush any buffered state and return the trailing output chunk plus
    /// the totals computed over the codec's whole lifetime.
    fn finish(&mut self) -> Result<(Vec<u8>, CodecTotals), ArchiveError>;

    /// The on-disk `compressionMethod` this codec records (spec.md §6).
    fn compression_method(&self) -> u16;
}

/// `compressionMethod` domain this crate writes: store, deflate, or the
/// WinZIP AES wrapper (inner method recorded in the AES extra field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Store,
    Deflate,
    AesWrapper,
}

impl CompressionMethod {
    pub fn zip_code(self) -> u16 {
        match self {
            CompressionMethod::Store => crate::constants::COMPRESSION_METHOD_STORE,
            CompressionMethod::Deflate => crate::constants::COMPRESSION_METHOD_DEFLATE,
            CompressionMethod::AesWrapper => crate::constants::COMPRESSION_METHOD_AES,
        }
    }

    pub fn version_needed(self) -> u16 {
        match self {
            CompressionMethod::AesWrapper => crate::constants::VERSION_NEEDED_AES,
            _ => crate::constants::VERSION_NEEDED_BASE,
        }
    }

    /// Pick the method for an entry from its declared options (spec.md §3:
    /// "compression level (0 = store, >0 = deflate)").
    pub fn from_options(level: u8, encrypted: bool) -> Self {
        if encrypted {
            CompressionMethod::AesWrapper
        } else if level == 0 {
            CompressionMethod::Store
        } else {
            CompressionMethod::Deflate
        }
    }
}
