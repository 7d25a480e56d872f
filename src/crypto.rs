use core::fmt;

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};

/// A secret (password, Kg) that zeroizes its contents on drop and never prints.
#[derive(Clone, Default)]
pub(crate) struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// The secret as a 20-byte RAKP key: truncated, then zero-padded.
    pub(crate) fn to_key_sha1(&self) -> Zeroizing<[u8; 20]> {
        let mut out = Zeroizing::new([0u8; 20]);
        let n = self.0.len().min(20);
        out[..n].copy_from_slice(&self.0[..n]);
        out
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<secret>")
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

type HmacSha1 = Hmac<Sha1>;

pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

pub(crate) fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 20]> {
    let mut mac =
        <HmacSha1 as Mac>::new_from_slice(key).map_err(|_| Error::Crypto("invalid HMAC key"))?;
    for part in parts {
        mac.update(part);
    }
    let bytes = mac.finalize().into_bytes();
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes[..]);
    Ok(out)
}

pub(crate) fn hmac_sha1_96(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 12]> {
    let full = hmac_sha1(key, parts)?;
    let mut out = [0u8; 12];
    out.copy_from_slice(&full[..12]);
    Ok(out)
}

/// Keying material of an established RMCP+ session.
///
/// K1 signs packets (HMAC-SHA1-96); the first 16 bytes of K2 are the
/// AES-CBC-128 key.
#[derive(Clone)]
pub(crate) struct SessionKeys {
    k1: Zeroizing<[u8; 20]>,
    aes_key: Zeroizing<[u8; 16]>,
}

impl SessionKeys {
    /// Derive K1 = HMAC(SIK, 0x01 * 20) and K2 = HMAC(SIK, 0x02 * 20).
    pub(crate) fn derive(sik: &[u8; 20]) -> Result<Self> {
        let k1 = hmac_sha1(sik, &[&[0x01u8; 20][..]])?;
        let k2 = Zeroizing::new(hmac_sha1(sik, &[&[0x02u8; 20][..]])?);
        let mut aes_key = Zeroizing::new([0u8; 16]);
        aes_key.copy_from_slice(&k2[..16]);
        Ok(Self {
            k1: Zeroizing::new(k1),
            aes_key,
        })
    }

    /// Integrity code length in the session trailer.
    pub(crate) const AUTH_CODE_LEN: usize = 12;

    pub(crate) fn sign(&self, data: &[u8]) -> Result<[u8; 12]> {
        hmac_sha1_96(&self.k1[..], &[data])
    }

    pub(crate) fn verify(&self, data: &[u8], auth_code: &[u8]) -> Result<bool> {
        Ok(ct_eq(&self.sign(data)?, auth_code))
    }

    /// Encrypt an IPMI payload with the confidentiality trailer; returns `iv || ciphertext`.
    pub(crate) fn encrypt_payload(&self, plaintext: &[u8], iv: &[u8; 16]) -> Result<Vec<u8>> {
        // Trailer: pad bytes 01h, 02h, .. then the pad length.
        let base = plaintext.len() + 1;
        let pad_len = (16 - (base % 16)) % 16;

        let mut block = Vec::with_capacity(base + pad_len);
        block.extend_from_slice(plaintext);
        block.extend((1..=pad_len).map(|i| i as u8));
        block.push(pad_len as u8);

        let ciphertext = aes128_cbc_encrypt(&self.aes_key, iv, &block)?;
        let mut out = Vec::with_capacity(16 + ciphertext.len());
        out.extend_from_slice(iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Reverse of [`SessionKeys::encrypt_payload`].
    pub(crate) fn decrypt_payload(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() < 32 {
            return Err(Error::Protocol("encrypted payload too short"));
        }
        let (iv, ciphertext) = payload.split_at(16);
        let iv: [u8; 16] = iv.try_into().map_err(|_| Error::Protocol("invalid IV"))?;

        let mut plaintext = aes128_cbc_decrypt(&self.aes_key, &iv, ciphertext)?;
        let pad_len = *plaintext
            .last()
            .ok_or(Error::Protocol("missing confidentiality pad length"))? as usize;
        if pad_len >= plaintext.len() {
            return Err(Error::Protocol("invalid confidentiality pad length"));
        }

        let trailer_start = plaintext.len() - 1 - pad_len;
        let pad_ok = plaintext[trailer_start..plaintext.len() - 1]
            .iter()
            .enumerate()
            .all(|(i, &b)| b == i as u8 + 1);
        if !pad_ok {
            return Err(Error::Protocol("invalid confidentiality pad bytes"));
        }

        plaintext.truncate(trailer_start);
        Ok(plaintext)
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys(<secret>)")
    }
}

/// AES-128-CBC without padding; `plaintext.len()` must be a multiple of 16.
fn aes128_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Result<Vec<u8>> {
    if !plaintext.len().is_multiple_of(16) {
        return Err(Error::Crypto(
            "AES-CBC plaintext length must be a multiple of 16",
        ));
    }
    let cipher = Aes128::new_from_slice(key).map_err(|_| Error::Crypto("invalid AES-128 key"))?;

    let mut out = Vec::with_capacity(plaintext.len());
    let mut prev = *iv;
    for block in plaintext.chunks(16) {
        let mut ga = GenericArray::clone_from_slice(block);
        for (b, p) in ga.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        cipher.encrypt_block(&mut ga);
        prev.copy_from_slice(&ga);
        out.extend_from_slice(&ga);
    }
    Ok(out)
}

fn aes128_cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(16) {
        return Err(Error::Crypto(
            "AES-CBC ciphertext length must be a non-zero multiple of 16",
        ));
    }
    let cipher = Aes128::new_from_slice(key).map_err(|_| Error::Crypto("invalid AES-128 key"))?;

    let mut out = Vec::with_capacity(ciphertext.len());
    let mut prev: &[u8] = iv;
    for block in ciphertext.chunks(16) {
        let mut ga = GenericArray::clone_from_slice(block);
        cipher.decrypt_block(&mut ga);
        out.extend(ga.iter().zip(prev.iter()).map(|(b, p)| b ^ p));
        prev = block;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha1_vectors() {
        let key = b"key";
        let msg: &[u8] = b"The quick brown fox jumps over the lazy dog";

        let mac = hmac_sha1(key, &[msg]).expect("hmac");
        assert_eq!(
            mac,
            [
                0xDE, 0x7C, 0x9B, 0x85, 0xB8, 0xB7, 0x8A, 0xA6, 0xBC, 0x8A, 0x7A, 0x36, 0xF7, 0x0A,
                0x90, 0x70, 0x1C, 0x9D, 0xB4, 0xD9,
            ]
        );

        // Split input hashes the same as contiguous input.
        let split = hmac_sha1_96(key, &[&msg[..10], &msg[10..]]).expect("hmac96");
        assert_eq!(split, mac[..12]);
    }

    #[test]
    fn session_key_derivation_vectors() {
        let mut sik = [0u8; 20];
        for (i, b) in sik.iter_mut().enumerate() {
            *b = i as u8;
        }

        let keys = SessionKeys::derive(&sik).expect("derive");
        assert_eq!(
            *keys.k1,
            [
                0x34, 0xE5, 0x1C, 0x57, 0x1C, 0x5C, 0x39, 0x24, 0x60, 0xE6, 0x77, 0x5D, 0xD5, 0xEC,
                0xFA, 0x79, 0xF4, 0xA7, 0xF5, 0x05,
            ]
        );
        assert_eq!(
            *keys.aes_key,
            [
                0xC1, 0x30, 0x76, 0xED, 0x19, 0x57, 0xA5, 0x9E, 0x8C, 0x7A, 0xBB, 0x24, 0x60, 0xD2,
                0x2C, 0x1A,
            ]
        );
    }

    #[test]
    fn aes128_cbc_vectors() {
        let key: [u8; 16] = core::array::from_fn(|i| i as u8);
        let iv: [u8; 16] = core::array::from_fn(|i| 0x10 + i as u8);
        let plaintext = b"0123456789abcdef";

        let ciphertext = aes128_cbc_encrypt(&key, &iv, plaintext).expect("encrypt");
        assert_eq!(
            ciphertext,
            [
                0xEB, 0x9E, 0x5B, 0xA4, 0x1B, 0x90, 0x2D, 0xB8, 0x25, 0x29, 0x82, 0xAA, 0x1A, 0x23,
                0xF4, 0xBE,
            ]
        );

        let decrypted = aes128_cbc_decrypt(&key, &iv, &ciphertext).expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn confidentiality_trailer_round_trips_odd_lengths() {
        let keys = SessionKeys::derive(&[0x5A; 20]).expect("derive");
        let iv = [0x33; 16];
        for len in [0usize, 1, 14, 15, 16, 31] {
            let plaintext: Vec<u8> = (0..len as u8).collect();
            let sealed = keys.encrypt_payload(&plaintext, &iv).expect("encrypt");
            assert_eq!(sealed.len() % 16, 0);
            assert_eq!(keys.decrypt_payload(&sealed).expect("decrypt"), plaintext);
        }
    }

    #[test]
    fn rakp_key_is_truncated_and_padded() {
        let secret = SecretBytes::new(b"password".to_vec());
        let key = secret.to_key_sha1();
        assert_eq!(&key[..8], b"password");
        assert!(key[8..].iter().all(|&b| b == 0));
        assert_eq!(format!("{secret:?}"), "<secret>");
    }
}
