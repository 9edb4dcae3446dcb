//! RSA key generation and persistence.
//!
//! Keys are `(k, n)` pairs: the exponent and the shared modulus. The
//! public exponent is the conventional 65537; primes are drawn at random,
//! Fermat-tested, and filtered so that `p - 1` stays coprime to the
//! exponent, which guarantees the private exponent `d = e^-1 mod phi(n)`
//! exists.
//!
//! Key files are JSON objects `{"k": "<decimal>", "n": "<decimal>"}`.
//! The integers are far beyond 64 bits, so they are rendered as decimal
//! strings rather than JSON numbers.

use std::fs;
use std::path::Path;

use num_bigint::{BigUint, RandBigInt};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SquallTrustError};

/// The conventional RSA public exponent.
pub const PUBLIC_EXPONENT: u32 = 65537;

/// Prime size used by the keygen front-end.
pub const DEFAULT_PRIME_BITS: u64 = 512;

const FERMAT_ROUNDS: usize = 10;

/// One half of a keypair: an exponent and the modulus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaKey {
    pub key: BigUint,
    pub modulus: BigUint,
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    k: String,
    n: String,
}

impl RsaKey {
    /// Write the key as JSON to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = KeyFile {
            k: self.key.to_str_radix(10),
            n: self.modulus.to_str_radix(10),
        };
        let json = serde_json::to_string(&file)
            .map_err(|e| SquallTrustError::KeyFormat(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a key previously written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let file: KeyFile = serde_json::from_str(&json)
            .map_err(|e| SquallTrustError::KeyFormat(e.to_string()))?;
        let key = parse_decimal(&file.k)?;
        let modulus = parse_decimal(&file.n)?;
        Ok(Self { key, modulus })
    }
}

fn parse_decimal(digits: &str) -> Result<BigUint> {
    BigUint::parse_bytes(digits.as_bytes(), 10)
        .ok_or_else(|| SquallTrustError::KeyFormat(format!("not a decimal integer: {digits:?}")))
}

/// Generate a fresh `(public, private)` keypair with primes of the given
/// bit size.
pub fn generate_keypair(prime_bits: u64) -> (RsaKey, RsaKey) {
    let e = BigUint::from(PUBLIC_EXPONENT);
    loop {
        let p = generate_prime(prime_bits, &e);
        let q = generate_prime(prime_bits, &e);
        if p == q {
            continue;
        }
        let n = &p * &q;
        let phi = (&p - 1u32) * (&q - 1u32);
        // The coprimality filter in generate_prime makes the inverse
        // exist, but a fresh draw costs little if it ever does not.
        let Some(d) = e.modinv(&phi) else { continue };

        return (
            RsaKey {
                key: e.clone(),
                modulus: n.clone(),
            },
            RsaKey {
                key: d,
                modulus: n,
            },
        );
    }
}

/// Draw random odd candidates of exactly `bits` bits until one passes the
/// Fermat test and keeps `candidate - 1` coprime to `e`.
fn generate_prime(bits: u64, e: &BigUint) -> BigUint {
    let mut rng = rand::thread_rng();
    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(0, true);

        if is_probable_prime(&candidate, FERMAT_ROUNDS)
            && e.modinv(&(&candidate - 1u32)).is_some()
        {
            return candidate;
        }
    }
}

/// Fermat primality test: `a^(n-1) mod n == 1` for random witnesses.
fn is_probable_prime(n: &BigUint, rounds: usize) -> bool {
    let two = BigUint::from(2u32);
    let three = BigUint::from(3u32);
    if *n <= three {
        return *n >= two;
    }
    if !n.bit(0) {
        return false;
    }

    let mut rng = rand::thread_rng();
    let one = BigUint::from(1u32);
    let n_minus_1 = n - &one;
    for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_1);
        if a.modpow(&n_minus_1, n) != one {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_keypair() -> (RsaKey, RsaKey) {
        // Small primes keep the test fast; still multi-byte moduli.
        generate_keypair(64)
    }

    #[test]
    fn exponents_invert_each_other() {
        let (public, private) = toy_keypair();
        assert_eq!(public.modulus, private.modulus);

        let message = BigUint::from(0x1234_5678u32);
        let cipher = message.modpow(&public.key, &public.modulus);
        let plain = cipher.modpow(&private.key, &private.modulus);
        assert_eq!(plain, message);
    }

    #[test]
    fn fermat_rejects_composites() {
        assert!(is_probable_prime(&BigUint::from(65537u32), 10));
        assert!(is_probable_prime(&BigUint::from(104729u32), 10));
        assert!(!is_probable_prime(&BigUint::from(65536u32), 10));
        assert!(!is_probable_prime(&BigUint::from(104730u32), 10));
    }

    #[test]
    fn key_file_roundtrip() {
        let (public, _) = toy_keypair();
        let path = std::env::temp_dir().join(format!(
            "squalltrust-key-{}-{}.json",
            std::process::id(),
            public.modulus.to_str_radix(16)
        ));

        public.save(&path).unwrap();
        let loaded = RsaKey::load(&path).unwrap();
        assert_eq!(loaded, public);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn malformed_key_file_is_rejected() {
        let path = std::env::temp_dir().join(format!(
            "squalltrust-badkey-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{"k": "not-a-number", "n": "17"}"#).unwrap();
        assert!(matches!(
            RsaKey::load(&path),
            Err(SquallTrustError::KeyFormat(_))
        ));
        let _ = std::fs::remove_file(&path);
    }
}
