//! SquallTrust -- RSA key material for the squall transport.
//!
//! Provides keypair generation with JSON persistence and [`RsaCryptor`],
//! a packet mutator that transforms payloads with modular exponentiation.
//! Configured symmetrically on both endpoints (encrypt on transmit with
//! one exponent, decrypt on receive with the inverse) the transform is
//! invisible to the transport in between.

pub mod cryptor;
pub mod error;
pub mod keys;

pub use cryptor::RsaCryptor;
pub use error::{Result, SquallTrustError};
pub use keys::{generate_keypair, RsaKey, DEFAULT_PRIME_BITS, PUBLIC_EXPONENT};
