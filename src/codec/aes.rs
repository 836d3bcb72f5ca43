//! WinZIP AE-2 encryption wrapper (spec.md §4.1 "AES-encrypted wrapper").
//! Wraps an inner codec (store or deflate); output is `salt || password
//! verifier || AES-CTR ciphertext || 10-byte truncated HMAC-SHA1 tag`.
//!
//! Key derivation matches WinZIP's AE-2: PBKDF2-HMAC-SHA1 over the password,
//! salted, 1000 iterations, deriving `2*key_size + 2` bytes split into an
//! AES key, an HMAC key, and a 2-byte password verifier. Unlike the hand-rolled
//! pseudo-random salt generator in some WinZIP ports, salts here come from
//! `getrandom`, a real CSPRNG.

use aes::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

use super::{Codec, CodecTotals};
use crate::constants::COMPRESSION_METHOD_AES;
use crate::error::ArchiveError;

type Aes256Ctr = Ctr128BE<aes::Aes256>;
type HmacSha1 = Hmac<Sha1>;

const SALT_SIZE: usize = 16;
const KEY_SIZE: usize = 32;
const PBKDF2_ITERATIONS: u32 = 1000;
const AUTH_CODE_SIZE: usize = 10;

/// AE-2 strength code recorded in the AES extra field (spec.md §6): 0x03 for
/// AES-256.
pub const AES256_STRENGTH_CODE: u8 = 0x03;

pub struct AesWrapperCodec {
    inner: Box<dyn Codec>,
    cipher: Option<Aes256Ctr>,
    hmac: Option<HmacSha1>,
    header_written: bool,
    header: Vec<u8>,
    poisoned: bool,
}

impl AesWrapperCodec {
    pub fn new(inner: Box<dyn Codec>, password: &str) -> Self {
        let mut salt = [0u8; SALT_SIZE];
        getrandom::getrandom(&mut salt).expect("OS CSPRNG unavailable");

        let mut derived = [0u8; KEY_SIZE * 2 + 2];
        pbkdf2_hmac::<Sha1>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut derived);

        let encryption_key = &derived[0..KEY_SIZE];
        let hmac_key = &derived[KEY_SIZE..KEY_SIZE * 2];
        let verifier = &derived[KEY_SIZE * 2..];

        let cipher = Aes256Ctr::new(encryption_key.into(), &[0u8; 16].into());
        let hmac = HmacSha1::new_from_slice(hmac_key).expect("HMAC accepts any key length");

        let mut header = Vec::with_capacity(SALT_SIZE + 2);
        header.extend_from_slice(&salt);
        header.extend_from_slice(verifier);

        Self {
            inner,
            cipher: Some(cipher),
            hmac: Some(hmac),
            header_written: false,
            header,
            poisoned: false,
        }
    }

    fn encrypt(&mut self, mut plaintext: Vec<u8>) -> Vec<u8> {
        let cipher = self.cipher.as_mut().expect("cipher present while not poisoned");
        cipher.apply_keystream(&mut plaintext);
        self.hmac
            .as_mut()
            .expect("hmac present while not poisoned")
            .update(&plaintext);
        plaintext
    }

    pub fn inner_compression_method(&self) -> u16 {
        self.inner.compression_method()
    }
}

impl Codec for AesWrapperCodec {
    fn update(&mut self, chunk: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        if self.poisoned {
            return Err(ArchiveError::codec("AES codec already failed"));
        }
        let plaintext_out = self.inner.update(chunk)?;
        let mut out = self.encrypt(plaintext_out);

        if !self.header_written {
            self.header_written = true;
            let mut framed = std::mem::take(&mut self.header);
            framed.append(&mut out);
            return Ok(framed);
        }

        Ok(out)
    }

    fn finish(&mut self) -> Result<(Vec<u8>, CodecTotals), ArchiveError> {
        if self.poisoned {
            return Err(ArchiveError::codec("AES codec already failed"));
        }
        self.poisoned = true;

        let (trailer_plain, inner_totals) = self.inner.finish()?;
        let mut out = self.encrypt(trailer_plain);

        if !self.header_written {
            let mut framed = std::mem::take(&mut self.header);
            framed.append(&mut out);
            out = framed;
        }

        let hmac = self.hmac.take().expect("hmac present before finish consumes it");
        let tag = hmac.finalize().into_bytes();
        out.extend_from_slice(&tag[..AUTH_CODE_SIZE]);

        Ok((
            out,
            CodecTotals {
                input_bytes: inner_totals.input_bytes,
                output_bytes: SALT_SIZE as u64 + 2 + inner_totals.output_bytes + AUTH_CODE_SIZE as u64,
                signature: inner_totals.signature,
            },
        ))
    }

    fn compression_method(&self) -> u16 {
        COMPRESSION_METHOD_AES
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::StoreCodec;

    #[test]
    fn test_aes_wrapper_frames_salt_verifier_and_tag() {
        let mut codec = AesWrapperCodec::new(Box::new(StoreCodec::new()), "hunter2");
        let mut out = codec.update(b"secret payload").unwrap();
        let (trailer, totals) = codec.finish().unwrap();
        out.extend(trailer);

        // salt(16) + verifier(2) + ciphertext(len of plaintext) + tag(10)
        assert_eq!(out.len(), 16 + 2 + 14 + 10);
        assert_eq!(totals.output_bytes, out.len() as u64);
        assert_eq!(totals.input_bytes, 14);
    }

    #[test]
    fn test_aes_wrapper_poisoned_after_finish() {
        let mut codec = AesWrapperCodec::new(Box::new(StoreCodec::new()), "pw");
        codec.finish().unwrap();
        assert!(codec.update(b"x").is_err());
    }
}
