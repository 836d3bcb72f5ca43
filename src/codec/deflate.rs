use crc32fast::Hasher;
use flate2::{Compress, Compression, FlushCompress, Status};

use super::{Codec, CodecTotals};
use crate::constants::COMPRESSION_METHOD_DEFLATE;
use crate::error::ArchiveError;

/// RFC 1951 raw deflate (no zlib/gzip wrapper), via `flate2`'s streaming
/// `Compress` so output chunks can be produced incrementally rather than
/// buffering the whole entry (spec.md §4.1 "Deflate" variant).
pub struct DeflateCodec {
    compress: Compress,
    hasher: Hasher,
    input_bytes: u64,
    output_bytes: u64,
    poisoned: bool,
}

impl DeflateCodec {
    pub fn new(level: u8) -> Self {
        Self {
            compress: Compress::new(Compression::new(level.min(9) as u32), false),
            hasher: Hasher::new(),
            input_bytes: 0,
            output_bytes: 0,
            poisoned: false,
        }
    }

    fn drain(&mut self, input: &[u8], flush: FlushCompress) -> Result<Vec<u8>, ArchiveError> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64 * 1024];
        let mut input_offset = 0usize;

        loop {
            let before_in = self.compress.total_in();
            let before_out = self.compress.total_out();

            let status = self
                .compress
                .compress(&input[input_offset..], &mut buf, flush)
                .map_err(|e| ArchiveError::codec(format!("deflate failure: {e}")))?;

            input_offset += (self.compress.total_in() - before_in) as usize;
            let produced = (self.compress.total_out() - before_out) as usize;
            out.extend_from_slice(&buf[..produced]);

            if status == Status::StreamEnd {
                break;
            }
            if input_offset >= input.len() && produced == 0 {
                break;
            }
        }

        Ok(out)
    }
}

impl Codec for DeflateCodec {
    fn update(&mut self, chunk: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        if self.poisoned {
            return Err(ArchiveError::codec("deflate codec already failed"));
        }
        self.hasher.update(chunk);
        self.input_bytes += chunk.len() as u64;
        let out = self.drain(chunk, FlushCompress::None)?;
        self.output_bytes += out.len() as u64;
        Ok(out)
    }

    fn finish(&mut self) -> Result<(Vec<u8>, CodecTotals), ArchiveError> {
        if self.poisoned {
            return Err(ArchiveError::codec("deflate codec already failed"));
        }
        self.poisoned = true;
        let trailer = self.drain(&[], FlushCompress::Finish)?;
        self.output_bytes += trailer.len() as u64;
        let signature = std::mem::take(&mut self.hasher).finalize();

        Ok((
            trailer,
            CodecTotals {
                input_bytes: self.input_bytes,
                output_bytes: self.output_bytes,
                signature,
            },
        ))
    }

    fn compression_method(&self) -> u16 {
        COMPRESSION_METHOD_DEFLATE
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::read::DeflateDecoder;
    use std::io::Read;

    #[test]
    fn test_deflate_round_trips() {
        let input = b"the quick brown fox jumps over the lazy dog ".repeat(50);
        let mut codec = DeflateCodec::new(6);
        let mut compressed = codec.update(&input).unwrap();
        let (trailer, totals) = codec.finish().unwrap();
        compressed.extend(trailer);

        assert_eq!(totals.input_bytes, input.len() as u64);
        assert_eq!(totals.output_bytes, compressed.len() as u64);
        assert!(compressed.len() < input.len());

        let mut decoder = DeflateDecoder::new(compressed.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, input);

        let mut expected = Hasher::new();
        expected.update(&input);
        assert_eq!(totals.signature, expected.finalize());
    }
}
