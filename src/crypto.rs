//! Cryptography module for handling encryption and decryption.
//!
//! The format fixes AES-256-CBC with PKCS#7 padding. Key and IV are both
//! derived from the user password with PBKDF2-HMAC-SHA256 against a salt
//! that is part of the format: changing it would orphan every existing
//! archive, so it stays fixed despite being a known weakness (rainbow
//! tables against common passwords). There is no MAC; the archive's CRC32
//! guards against accident, not tampering.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::PackError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const KEY_SIZE: usize = 32; // 256 bits for AES-256
const IV_SIZE: usize = 16; // one CBC block
const BLOCK_SIZE: usize = 16;
const PBKDF2_ROUNDS: u32 = 10_000;

/// Fixed by the archive format; see the module docs.
const KDF_SALT: &[u8] = b"BackupManagerSalt";

/// Derives the AES key and IV from a password: 48 bytes of PBKDF2 output,
/// split as key (first 32) and IV (next 16).
pub fn derive_key_iv(password: &str) -> ([u8; KEY_SIZE], [u8; IV_SIZE]) {
    let mut okm = [0u8; KEY_SIZE + IV_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), KDF_SALT, PBKDF2_ROUNDS, &mut okm);

    let mut key = [0u8; KEY_SIZE];
    let mut iv = [0u8; IV_SIZE];
    key.copy_from_slice(&okm[..KEY_SIZE]);
    iv.copy_from_slice(&okm[KEY_SIZE..]);
    (key, iv)
}

/// Encrypts `plaintext`, returning ciphertext with PKCS#7 padding included.
pub fn encrypt(password: &str, plaintext: &[u8]) -> Vec<u8> {
    let (key, iv) = derive_key_iv(password);
    Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypts `ciphertext`. A failed padding check means a wrong password or
/// a corrupted body; the two are indistinguishable by design.
pub fn decrypt(password: &str, ciphertext: &[u8]) -> Result<Vec<u8>, PackError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(PackError::BadKeyOrCorrupt);
    }
    let (key, iv) = derive_key_iv(password);
    Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| PackError::BadKeyOrCorrupt)
}
