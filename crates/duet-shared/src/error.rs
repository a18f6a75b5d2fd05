use thiserror::Error;

#[derive(Error, Debug)]
pub enum DuetError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("Invalid key derivation parameters: {0}")]
    InvalidDerivation(String),

    #[error("Malformed encrypted payload: {0}")]
    MalformedPayload(String),
}
