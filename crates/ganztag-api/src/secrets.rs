//! AES-GCM encryption for sensitive settings.
//!
//! The key length picks the cipher: 16 bytes → AES-128, 24 → AES-192,
//! 32 → AES-256. Ciphertexts are stored as base64(`nonce || ciphertext`) with
//! a fresh 96-bit nonce per value.

use aes_gcm::{
  Aes128Gcm, Aes256Gcm, AesGcm,
  aead::{Aead, AeadCore, KeyInit, consts::U12, generic_array::GenericArray},
  aes::Aes192,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use rand_core::{OsRng, RngCore as _};
use thiserror::Error;

type Aes192Gcm = AesGcm<Aes192, U12>;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SecretError {
  #[error("encryption key must be 16, 24 or 32 bytes, got {0}")]
  KeyLength(usize),

  #[error("encryption key is not valid base64")]
  KeyEncoding,

  #[error("ciphertext is malformed")]
  Malformed,

  #[error("encryption failed")]
  Encrypt,

  #[error("decryption failed")]
  Decrypt,
}

enum Cipher {
  Aes128(Box<Aes128Gcm>),
  Aes192(Box<Aes192Gcm>),
  Aes256(Box<Aes256Gcm>),
}

pub struct SettingsCipher {
  cipher: Cipher,
}

impl SettingsCipher {
  pub fn from_key(key: &[u8]) -> Result<Self, SecretError> {
    let cipher = match key.len() {
      16 => Cipher::Aes128(Box::new(Aes128Gcm::new_from_slice(key).map_err(|_| SecretError::KeyLength(16))?)),
      24 => Cipher::Aes192(Box::new(Aes192Gcm::new_from_slice(key).map_err(|_| SecretError::KeyLength(24))?)),
      32 => Cipher::Aes256(Box::new(Aes256Gcm::new_from_slice(key).map_err(|_| SecretError::KeyLength(32))?)),
      n => return Err(SecretError::KeyLength(n)),
    };
    Ok(Self { cipher })
  }

  /// Decode a base64 key as found in `SETTINGS_ENCRYPTION_KEY`.
  pub fn from_base64(encoded: &str) -> Result<Self, SecretError> {
    let key = B64.decode(encoded.trim()).map_err(|_| SecretError::KeyEncoding)?;
    Self::from_key(&key)
  }

  /// A fresh AES-256 key that lives only as long as the process.
  pub fn random() -> Self {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    Self { cipher: Cipher::Aes256(Box::new(Aes256Gcm::new(&key.into()))) }
  }

  pub fn key_bits(&self) -> usize {
    match self.cipher {
      Cipher::Aes128(_) => 128,
      Cipher::Aes192(_) => 192,
      Cipher::Aes256(_) => 256,
    }
  }

  pub fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = match &self.cipher {
      Cipher::Aes128(c) => c.encrypt(&nonce, plaintext.as_bytes()),
      Cipher::Aes192(c) => c.encrypt(&nonce, plaintext.as_bytes()),
      Cipher::Aes256(c) => c.encrypt(&nonce, plaintext.as_bytes()),
    }
    .map_err(|_| SecretError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(B64.encode(out))
  }

  pub fn decrypt(&self, encoded: &str) -> Result<String, SecretError> {
    let raw = B64.decode(encoded).map_err(|_| SecretError::Malformed)?;
    if raw.len() < NONCE_LEN {
      return Err(SecretError::Malformed);
    }
    let (nonce, sealed) = raw.split_at(NONCE_LEN);
    let nonce = GenericArray::<u8, U12>::from_slice(nonce);

    let plain = match &self.cipher {
      Cipher::Aes128(c) => c.decrypt(nonce, sealed),
      Cipher::Aes192(c) => c.decrypt(nonce, sealed),
      Cipher::Aes256(c) => c.decrypt(nonce, sealed),
    }
    .map_err(|_| SecretError::Decrypt)?;
    String::from_utf8(plain).map_err(|_| SecretError::Decrypt)
  }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  const SAMPLES: &[&str] = &["", "smtp-passwort", "ä ö ü ß 🚸", "line\nbreak", "x"];

  #[test]
  fn round_trips_for_every_key_size() {
    for len in [16, 24, 32] {
      let cipher = SettingsCipher::from_key(&vec![7u8; len]).unwrap();
      assert_eq!(cipher.key_bits(), len * 8);
      for sample in SAMPLES {
        let sealed = cipher.encrypt(sample).unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), *sample);
      }
    }
  }

  #[test]
  fn nonces_differ_per_value() {
    let cipher = SettingsCipher::random();
    assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
  }

  #[test]
  fn wrong_key_fails() {
    let a = SettingsCipher::from_key(&[1u8; 32]).unwrap();
    let b = SettingsCipher::from_key(&[2u8; 32]).unwrap();
    let sealed = a.encrypt("geheim").unwrap();
    assert!(matches!(b.decrypt(&sealed), Err(SecretError::Decrypt)));
  }

  #[test]
  fn rejects_bad_keys_and_ciphertexts() {
    assert!(matches!(SettingsCipher::from_key(&[0u8; 20]), Err(SecretError::KeyLength(20))));
    assert!(matches!(SettingsCipher::from_base64("not base64!"), Err(SecretError::KeyEncoding)));

    let cipher = SettingsCipher::random();
    assert!(matches!(cipher.decrypt("AAAA"), Err(SecretError::Malformed)));
    assert!(matches!(cipher.decrypt("%%%"), Err(SecretError::Malformed)));
  }

  #[test]
  fn base64_key_selects_cipher() {
    let key = B64.encode([9u8; 24]);
    assert_eq!(SettingsCipher::from_base64(&key).unwrap().key_bits(), 192);
  }

  fn any_key() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![Just(16usize), Just(24), Just(32)]
      .prop_flat_map(|len| proptest::collection::vec(any::<u8>(), len))
  }

  proptest! {
    #[test]
    fn any_value_round_trips(key in any_key(), value in any::<String>()) {
      let cipher = SettingsCipher::from_key(&key).unwrap();
      prop_assert_eq!(cipher.key_bits(), key.len() * 8);
      let sealed = cipher.encrypt(&value).unwrap();
      prop_assert_eq!(cipher.decrypt(&sealed).unwrap(), value);
    }

    #[test]
    fn flipped_bytes_never_decrypt(key in any_key(), value in ".{0,64}", at in any::<prop::sample::Index>()) {
      let cipher = SettingsCipher::from_key(&key).unwrap();
      let mut raw = B64.decode(cipher.encrypt(&value).unwrap()).unwrap();
      let i = at.index(raw.len());
      raw[i] ^= 0x01;
      prop_assert!(cipher.decrypt(&B64.encode(&raw)).is_err());
    }
  }
}
