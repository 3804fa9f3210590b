use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::CryptoError;

const BLOCK_SIZE: usize = 16;

/// Encrypts `plaintext` with AES-128-ECB, applying PKCS7 padding.
///
/// The key must be exactly 16 bytes.
pub fn encrypt_ecb(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;
    let mut data = pkcs7_pad(plaintext);
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(data)
}

/// Decrypts AES-128-ECB ciphertext and strips PKCS7 padding.
pub fn decrypt_ecb(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidPadding);
    }
    let mut data = ciphertext.to_vec();
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    pkcs7_unpad(data)
}

/// Encrypts a string with ECB and returns lowercase hex, or an empty
/// string on failure.
pub fn encrypt_hex_ecb(key: &[u8], plaintext: &str) -> String {
    match encrypt_ecb(key, plaintext.as_bytes()) {
        Ok(data) => hex::encode(data),
        Err(_) => String::new(),
    }
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let padding = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + padding);
    padded.extend_from_slice(data);
    padded.extend(std::iter::repeat(padding as u8).take(padding));
    padded
}

fn pkcs7_unpad(mut data: Vec<u8>) -> Result<Vec<u8>, CryptoError> {
    let padding = *data.last().ok_or(CryptoError::InvalidPadding)? as usize;
    if padding == 0 || padding > BLOCK_SIZE || padding > data.len() {
        return Err(CryptoError::InvalidPadding);
    }
    if data[data.len() - padding..].iter().any(|&b| b as usize != padding) {
        return Err(CryptoError::InvalidPadding);
    }
    data.truncate(data.len() - padding);
    Ok(data)
}
