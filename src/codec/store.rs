use crc32fast::Hasher;

use super::{Codec, CodecTotals};
use crate::constants::COMPRESSION_METHOD_STORE;
use crate::error::ArchiveError;

/// Identity codec: output == input, signature == CRC-32(input) (spec.md §4.1).
#[derive(Debug, Default)]
pub struct StoreCodec {
    hasher: Hasher,
    input_bytes: u64,
    poisoned: bool,
}

impl StoreCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Codec for StoreCodec {
    fn update(&mut self, chunk: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        if self.poisoned {
            return Err(ArchiveError::codec("store codec already failed"));
        }
        self.hasher.update(chunk);
        self.input_bytes += chunk.len() as u64;
        Ok(chunk.to_vec())
    }

    fn finish(&mut self) -> Result<(Vec<u8>, CodecTotals), ArchiveError> {
        if self.poisoned {
            return Err(ArchiveError::codec("store codec already failed"));
        }
        self.poisoned = true;
        let signature = std::mem::take(&mut self.hasher).finalize();
        Ok((
            Vec::new(),
            CodecTotals {
                input_bytes: self.input_bytes,
                output_bytes: self.input_bytes,
                signature,
            },
        ))
    }

    fn compression_method(&self) -> u16 {
        COMPRESSION_METHOD_STORE
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_store_roundtrips_and_hashes() {
        let mut codec = StoreCodec::new();
        let mut out = codec.update(b"hello ").unwrap();
        out.extend(codec.update(b"world").unwrap());
        let (trailer, totals) = codec.finish().unwrap();
        assert!(trailer.is_empty());
        assert_eq!(out, b"hello world");
        assert_eq!(totals.input_bytes, 11);
        assert_eq!(totals.output_bytes, 11);

        let mut expected = Hasher::new();
        expected.update(b"hello world");
        assert_eq!(totals.signature, expected.finalize());
    }

    #[test]
    fn test_store_poisoned_after_finish() {
        let mut codec = StoreCodec::new();
        codec.finish().unwrap();
        assert!(codec.update(b"x").is_err());
    }
}
