//! SM4-ECB secure channel primitives
//!
//! Commands are ciphered with a per-drone 128-bit SM4 key in electronic
//! codebook mode (Pkcs7 padded) and shipped as base64 text. Decryption with
//! the wrong key fails at unpadding or at JSON parsing; either way the caller
//! gets an error and must drop the command rather than execute it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use thiserror::Error;

use crate::envelope::FlightCommand;

/// SM4 key length in bytes (128-bit).
pub const KEY_LEN: usize = 16;

/// Errors from the secure channel. Any of these means the command must not
/// be executed.
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("key must be {KEY_LEN} bytes ({} hex chars expected)", KEY_LEN * 2)]
    InvalidKey(usize),

    #[error("ciphertext is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decryption failed (wrong key or corrupted ciphertext)")]
    Decrypt,

    #[error("decrypted payload is not a valid command: {0}")]
    Payload(#[from] serde_json::Error),
}

/// An agreed per-drone symmetric key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Sm4Key([u8; KEY_LEN]);

impl Sm4Key {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key from its 32-char hex representation (the key store's
    /// storage format).
    pub fn from_hex(hex_str: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(hex_str).map_err(|_| CipherError::InvalidKey(hex_str.len()))?;
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CipherError::InvalidKey(hex_str.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

// Keys never appear in logs.
impl std::fmt::Debug for Sm4Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Sm4Key(..)")
    }
}

/// Encrypt a plaintext with SM4-ECB/Pkcs7.
pub fn encrypt(key: &Sm4Key, plaintext: &[u8]) -> Vec<u8> {
    ecb::Encryptor::<sm4::Sm4>::new(key.as_bytes().into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt an SM4-ECB/Pkcs7 ciphertext. Fails cleanly on a wrong key rather
/// than returning corrupted data.
pub fn decrypt(key: &Sm4Key, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
    ecb::Decryptor::<sm4::Sm4>::new(key.as_bytes().into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CipherError::Decrypt)
}

/// Serialize, cipher, and base64-encode a command for transmission.
pub fn seal_command(key: &Sm4Key, command: &FlightCommand) -> Result<String, CipherError> {
    let plaintext = serde_json::to_vec(command)?;
    Ok(BASE64.encode(encrypt(key, &plaintext)))
}

/// Decode, decipher, and parse a received ciphertext into a command.
pub fn open_command(key: &Sm4Key, ciphertext_b64: &str) -> Result<FlightCommand, CipherError> {
    let ciphertext = BASE64.decode(ciphertext_b64)?;
    let plaintext = decrypt(key, &ciphertext)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::SpecialInstruction;

    fn test_key() -> Sm4Key {
        Sm4Key::from_hex("000102030405060708090a0b0c0d0e0f").unwrap()
    }

    fn other_key() -> Sm4Key {
        Sm4Key::from_hex("f0e0d0c0b0a090807060504030201000").unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let plaintext = b"forward 2 meters";
        let ciphertext = encrypt(&key, plaintext);
        assert_ne!(&ciphertext[..], &plaintext[..]);
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_ciphertext_is_block_aligned() {
        let ciphertext = encrypt(&test_key(), b"x");
        assert_eq!(ciphertext.len() % KEY_LEN, 0);
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let command = FlightCommand {
            x: 1.5,
            y: -0.5,
            z: 0.0,
            special_instruction: SpecialInstruction::ContinueStart,
        };

        let sealed = seal_command(&key, &command).unwrap();
        let opened = open_command(&key, &sealed).unwrap();
        assert_eq!(opened, command);
    }

    #[test]
    fn test_wrong_key_fails_cleanly() {
        let sealed = seal_command(
            &test_key(),
            &FlightCommand::instruction(SpecialInstruction::Land),
        )
        .unwrap();

        // Wrong-key decryption must surface an error, never a bogus command.
        assert!(open_command(&other_key(), &sealed).is_err());
    }

    #[test]
    fn test_garbage_base64_is_rejected() {
        assert!(matches!(
            open_command(&test_key(), "not!!base64"),
            Err(CipherError::Base64(_))
        ));
    }

    #[test]
    fn test_key_from_bad_hex() {
        assert!(Sm4Key::from_hex("abcd").is_err());
        assert!(Sm4Key::from_hex("zz0102030405060708090a0b0c0d0e0f").is_err());
    }
}
