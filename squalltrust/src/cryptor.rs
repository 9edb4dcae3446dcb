//! RSA payload transform, packaged as a packet mutator.
//!
//! Only the payload is transformed; header fields and pure ACKs pass
//! through untouched, so length-prefixed framing stays decodable even
//! though ciphertext is longer than plaintext.
//!
//! The payload is processed in blocks. With `k` the modulus byte length,
//! each plaintext chunk of at most `min(k - 2, 255)` bytes becomes a
//! `k - 1` byte block `[chunk_len][chunk][zero padding]`, which as a
//! big-endian integer is always below the modulus; each ciphertext block
//! is emitted left-padded to exactly `k` bytes. The layout makes both directions
//! deterministic in length, and the per-block length byte recovers the
//! exact plaintext on the way back.
//!
//! Applied on transmit with one exponent and on receive with the inverse,
//! the composition is the identity on payloads. This is textbook RSA:
//! deterministic and unpadded, fit for studying the transport, not for
//! protecting secrets.

use bytes::Bytes;
use num_bigint::BigUint;
use squallstream::{Mutator, Packet};

use crate::error::{Result, SquallTrustError};
use crate::keys::RsaKey;

enum Direction {
    Encrypt,
    Decrypt,
}

pub struct RsaCryptor {
    key: BigUint,
    modulus: BigUint,
    /// Modulus length in bytes; the ciphertext block size.
    block_len: usize,
    direction: Direction,
}

impl RsaCryptor {
    /// A cryptor that encrypts payloads with the given exponent.
    pub fn encryptor(key: RsaKey) -> Result<Self> {
        Self::new(key, Direction::Encrypt)
    }

    /// A cryptor that decrypts payloads produced by the inverse exponent.
    pub fn decryptor(key: RsaKey) -> Result<Self> {
        Self::new(key, Direction::Decrypt)
    }

    fn new(key: RsaKey, direction: Direction) -> Result<Self> {
        let block_len = ((key.modulus.bits() + 7) / 8) as usize;
        if block_len < 3 {
            return Err(SquallTrustError::ModulusTooSmall { bytes: block_len });
        }
        Ok(Self {
            key: key.key,
            modulus: key.modulus,
            block_len,
            direction,
        })
    }

    /// Largest plaintext chunk per block: one byte goes to the length
    /// header, and the whole block stays one byte short of the modulus
    /// width so its integer value is always in range.
    fn chunk_len(&self) -> usize {
        (self.block_len - 2).min(255)
    }

    pub fn encrypt_payload(&self, plain: &[u8]) -> Bytes {
        let chunk_len = self.chunk_len();
        let blocks = plain.len().div_ceil(chunk_len);
        let mut out = Vec::with_capacity(blocks * self.block_len);

        for chunk in plain.chunks(chunk_len) {
            let mut block = vec![0u8; self.block_len - 1];
            block[0] = chunk.len() as u8;
            block[1..1 + chunk.len()].copy_from_slice(chunk);

            let m = BigUint::from_bytes_be(&block);
            let c = m.modpow(&self.key, &self.modulus);
            out.extend_from_slice(&to_fixed_be(&c, self.block_len));
        }
        Bytes::from(out)
    }

    pub fn decrypt_payload(&self, cipher: &[u8]) -> Result<Bytes> {
        if cipher.len() % self.block_len != 0 {
            return Err(SquallTrustError::CiphertextLength {
                len: cipher.len(),
                block: self.block_len,
            });
        }

        let mut out = Vec::with_capacity(cipher.len());
        for block in cipher.chunks(self.block_len) {
            let c = BigUint::from_bytes_be(block);
            if c >= self.modulus {
                return Err(SquallTrustError::CiphertextRange);
            }
            let m = c.modpow(&self.key, &self.modulus);
            let plain = to_fixed_be(&m, self.block_len - 1);

            let len = plain[0] as usize;
            if 1 + len > plain.len() {
                return Err(SquallTrustError::BlockCorrupt);
            }
            out.extend_from_slice(&plain[1..1 + len]);
        }
        Ok(Bytes::from(out))
    }
}

/// Big-endian encoding left-padded with zeros to exactly `width` bytes.
fn to_fixed_be(value: &BigUint, width: usize) -> Vec<u8> {
    let raw = value.to_bytes_be();
    let mut out = vec![0u8; width];
    out[width - raw.len()..].copy_from_slice(&raw);
    out
}

impl Mutator for RsaCryptor {
    fn apply(&self, packet: Packet) -> Option<Packet> {
        if packet.is_ack() || packet.data.is_empty() {
            return Some(packet);
        }

        let data = match self.direction {
            Direction::Encrypt => self.encrypt_payload(&packet.data),
            Direction::Decrypt => match self.decrypt_payload(&packet.data) {
                Ok(plain) => plain,
                Err(err) => {
                    // Mismatched keys produce garbage forever; dropping at
                    // least keeps it out of the delivery queue.
                    tracing::warn!(%err, "payload does not decrypt, dropping packet");
                    return None;
                }
            },
        };

        Some(Packet::new(
            packet.read_offset,
            packet.write_offset,
            packet.recv_window_size,
            data,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keypair;

    fn cryptor_pair() -> (RsaCryptor, RsaCryptor) {
        let (public, private) = generate_keypair(64);
        (
            RsaCryptor::encryptor(private).unwrap(),
            RsaCryptor::decryptor(public).unwrap(),
        )
    }

    #[test]
    fn payload_roundtrip() {
        let (enc, dec) = cryptor_pair();
        let plain = b"the payload under test";
        let cipher = enc.encrypt_payload(plain);
        assert_ne!(&cipher[..], &plain[..]);
        assert_eq!(&dec.decrypt_payload(&cipher).unwrap()[..], plain);
    }

    #[test]
    fn multi_block_payload_roundtrip() {
        let (enc, dec) = cryptor_pair();
        // Far larger than one block for a 64-bit-prime modulus.
        let plain: Vec<u8> = (0..2048u32).map(|i| (i % 256) as u8).collect();
        let cipher = enc.encrypt_payload(&plain);
        assert_eq!(cipher.len() % enc.block_len, 0);
        assert_eq!(&dec.decrypt_payload(&cipher).unwrap()[..], &plain[..]);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let (enc, dec) = cryptor_pair();
        let cipher = enc.encrypt_payload(b"");
        assert!(cipher.is_empty());
        assert!(dec.decrypt_payload(&cipher).unwrap().is_empty());
    }

    #[test]
    fn mutators_compose_to_identity() {
        let (enc, dec) = cryptor_pair();
        let packet = Packet::new(3, 7, 5, Bytes::from_static(b"sealed in transit"));

        let sealed = enc.apply(packet.clone()).unwrap();
        assert_ne!(sealed.data, packet.data);
        assert_eq!(sealed.write_offset, packet.write_offset);
        assert_eq!(sealed.read_offset, packet.read_offset);

        let opened = dec.apply(sealed).unwrap();
        assert_eq!(opened, packet);
    }

    #[test]
    fn acks_pass_through_untouched() {
        let (enc, dec) = cryptor_pair();
        let ack = Packet::ack(9, 4);
        assert_eq!(enc.apply(ack.clone()), Some(ack.clone()));
        assert_eq!(dec.apply(ack.clone()), Some(ack));
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let (enc, dec) = cryptor_pair();
        let cipher = enc.encrypt_payload(b"whole");
        let err = dec.decrypt_payload(&cipher[..cipher.len() - 1]).unwrap_err();
        assert!(matches!(err, SquallTrustError::CiphertextLength { .. }));
    }
}
