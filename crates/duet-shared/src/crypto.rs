//! Per-room text encryption.
//!
//! The room key is PBKDF2-HMAC-SHA256 over the room id with an application
//! wide salt, so anyone who knows the room id and the salt can derive it.
//! This hides message text from passive inspection of the transport and of
//! server storage. It is not confidentiality against someone who knows the
//! scheme.
//!
//! Text travels as a JSON object `{"cipher": <base64>, "iv": <hex>}` with a
//! fresh 16-byte IV per message. Empty text is never encrypted.

use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::constants::{IV_SIZE, ROOM_KEY_BITS, ROOM_KEY_ITERATIONS};
use crate::error::CryptoError;
use crate::types::RoomId;

/// Symmetric key bound to one room.
#[derive(Clone, PartialEq, Eq)]
pub struct RoomKey(Vec<u8>);

impl RoomKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        match bytes.len() {
            16 | 24 | 32 => Ok(Self(bytes.to_vec())),
            n => Err(CryptoError::InvalidKeyLength(n)),
        }
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s.trim()).map_err(|_| CryptoError::InvalidKeyLength(s.len() / 2))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RoomKey({} bits)", self.0.len() * 8)
    }
}

/// Key derivation inputs shared by every client of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    pub salt: String,
    pub iterations: u32,
    pub key_bits: u32,
}

impl KdfParams {
    pub fn new(salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            iterations: ROOM_KEY_ITERATIONS,
            key_bits: ROOM_KEY_BITS,
        }
    }
}

pub fn derive_room_key(room_id: &RoomId, params: &KdfParams) -> Result<RoomKey, CryptoError> {
    derive_key(room_id.as_str(), &params.salt, params.iterations, params.key_bits)
}

// PBKDF2-HMAC-SHA256; `bits` must be an AES key size
pub fn derive_key(password: &str, salt: &str, iterations: u32, bits: u32) -> Result<RoomKey, CryptoError> {
    if iterations == 0 {
        return Err(CryptoError::InvalidDerivation("iteration count must be positive".into()));
    }
    if !matches!(bits, 128 | 192 | 256) {
        return Err(CryptoError::InvalidDerivation(format!("unsupported key length {bits} bits")));
    }

    let mut key = vec![0u8; (bits / 8) as usize];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut key);
    Ok(RoomKey(key))
}

/// Ciphertext and the IV it was produced with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedText {
    /// Base64 AES-CBC ciphertext (PKCS#7 padded).
    pub cipher: String,
    /// Hex-encoded 16-byte IV.
    pub iv: String,
}

impl EncryptedText {
    pub fn to_json(&self) -> Result<String, CryptoError> {
        serde_json::to_string(self).map_err(|e| CryptoError::MalformedPayload(e.to_string()))
    }

    pub fn from_json(s: &str) -> Result<Self, CryptoError> {
        serde_json::from_str(s).map_err(|e| CryptoError::MalformedPayload(e.to_string()))
    }
}

pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

pub fn encrypt_text(plaintext: &str, key: &RoomKey) -> Result<EncryptedText, CryptoError> {
    let iv = generate_iv();
    let ciphertext = encrypt_with_iv(key, &iv, plaintext.as_bytes())?;
    Ok(EncryptedText {
        cipher: BASE64.encode(ciphertext),
        iv: hex::encode(iv),
    })
}

pub fn decrypt_text(payload: &EncryptedText, key: &RoomKey) -> Result<String, CryptoError> {
    let iv = hex::decode(&payload.iv).map_err(|e| CryptoError::MalformedPayload(format!("iv: {e}")))?;
    if iv.len() != IV_SIZE {
        return Err(CryptoError::MalformedPayload(format!("iv must be {IV_SIZE} bytes")));
    }
    let ciphertext = BASE64
        .decode(&payload.cipher)
        .map_err(|e| CryptoError::MalformedPayload(format!("cipher: {e}")))?;

    let plaintext = decrypt_with_iv(key, &iv, &ciphertext)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
}

/// Text as it goes on the wire: empty stays empty, anything else becomes
/// the JSON envelope.
pub fn seal_text(plaintext: &str, key: &RoomKey) -> Result<String, CryptoError> {
    if plaintext.is_empty() {
        return Ok(String::new());
    }
    encrypt_text(plaintext, key)?.to_json()
}

/// Inverse of [`seal_text`].
pub fn open_text(wire: &str, key: &RoomKey) -> Result<String, CryptoError> {
    if wire.is_empty() {
        return Ok(String::new());
    }
    let payload = EncryptedText::from_json(wire)?;
    decrypt_text(&payload, key)
}

fn encrypt_with_iv(key: &RoomKey, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = key.as_bytes();
    let out = match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::EncryptionFailed)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::EncryptionFailed)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::EncryptionFailed)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        n => return Err(CryptoError::InvalidKeyLength(n)),
    };
    Ok(out)
}

fn decrypt_with_iv(key: &RoomKey, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = key.as_bytes();
    let out = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        n => return Err(CryptoError::InvalidKeyLength(n)),
    };
    out.map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> KdfParams {
        KdfParams::new("test-salt")
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = derive_room_key(&RoomId::new("room-1"), &params()).unwrap();
        let long = "x".repeat(4096);
        for text in ["a", "Salam, chetori?", "ünïcödé ✓", long.as_str()] {
            let sealed = seal_text(text, &key).unwrap();
            assert_ne!(sealed, text);
            assert_eq!(open_text(&sealed, &key).unwrap(), text);
        }
    }

    #[test]
    fn test_empty_text_bypasses_cipher() {
        let key = derive_room_key(&RoomId::new("room-1"), &params()).unwrap();
        assert_eq!(seal_text("", &key).unwrap(), "");
        assert_eq!(open_text("", &key).unwrap(), "");
    }

    #[test]
    fn test_room_key_derivation_deterministic() {
        let room = RoomId::new("room-42");
        let key1 = derive_room_key(&room, &params()).unwrap();
        let key2 = derive_room_key(&room, &params()).unwrap();
        assert_eq!(key1, key2);
        assert_eq!(key1.to_hex().len(), 32);
    }

    #[test]
    fn test_different_rooms_different_keys() {
        let key1 = derive_room_key(&RoomId::new("room-1"), &params()).unwrap();
        let key2 = derive_room_key(&RoomId::new("room-2"), &params()).unwrap();
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_pbkdf2_sha256_known_vector() {
        // RFC 7914 section 11 test vector, first 16 bytes
        let key = derive_key("passwd", "salt", 1, 128).unwrap();
        assert_eq!(key.to_hex(), "55ac046e56e3089fec1691c22544b605");
    }

    #[test]
    fn test_fresh_iv_per_message() {
        let key = derive_room_key(&RoomId::new("room-1"), &params()).unwrap();
        let a = encrypt_text("same", &key).unwrap();
        let b = encrypt_text("same", &key).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_eq!(hex::decode(&a.iv).unwrap().len(), IV_SIZE);
    }

    #[test]
    fn test_wire_format_is_json_object() {
        let key = derive_room_key(&RoomId::new("room-1"), &params()).unwrap();
        let sealed = seal_text("hello", &key).unwrap();
        let value: serde_json::Value = serde_json::from_str(&sealed).unwrap();
        assert!(value["cipher"].is_string());
        assert!(value["iv"].is_string());
    }

    #[test]
    fn test_wrong_room_fails() {
        let key1 = derive_room_key(&RoomId::new("room-1"), &params()).unwrap();
        let key2 = derive_room_key(&RoomId::new("room-2"), &params()).unwrap();
        let sealed = seal_text("Secret message", &key1).unwrap();
        match open_text(&sealed, &key2) {
            Ok(text) => assert_ne!(text, "Secret message"),
            Err(e) => assert!(matches!(e, CryptoError::DecryptionFailed)),
        }
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let key = derive_room_key(&RoomId::new("room-1"), &params()).unwrap();
        assert!(matches!(open_text("plain text", &key), Err(CryptoError::MalformedPayload(_))));
        let bad_iv = r#"{"cipher":"AAAA","iv":"zz"}"#;
        assert!(matches!(open_text(bad_iv, &key), Err(CryptoError::MalformedPayload(_))));
    }

    #[test]
    fn test_256_bit_keys_supported() {
        let key = derive_key("room", "salt", 10, 256).unwrap();
        let sealed = seal_text("wide key", &key).unwrap();
        assert_eq!(open_text(&sealed, &key).unwrap(), "wide key");
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(derive_key("room", "salt", 0, 128).is_err());
        assert!(derive_key("room", "salt", 10, 100).is_err());
        assert!(RoomKey::from_bytes(&[0u8; 5]).is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = RoomKey::from_hex(&"ab".repeat(16)).unwrap();
        assert_eq!(format!("{key:?}"), "RoomKey(128 bits)");
    }
}
