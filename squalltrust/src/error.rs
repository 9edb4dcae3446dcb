use thiserror::Error;

/// All errors produced by the SquallTrust key and cryptor layer.
#[derive(Debug, Error)]
pub enum SquallTrustError {
    #[error("cannot access key file: {0}")]
    KeyIo(#[from] std::io::Error),

    #[error("malformed key file: {0}")]
    KeyFormat(String),

    #[error("modulus too small: {bytes} bytes, need at least 3")]
    ModulusTooSmall { bytes: usize },

    #[error("ciphertext length {len} is not a multiple of the {block} byte block size")]
    CiphertextLength { len: usize, block: usize },

    #[error("ciphertext block decodes outside the message space")]
    CiphertextRange,

    #[error("decrypted block is corrupt")]
    BlockCorrupt,
}

pub type Result<T> = std::result::Result<T, SquallTrustError>;
