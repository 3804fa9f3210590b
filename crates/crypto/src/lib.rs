//! Crypto primitives for the 189-cloud wire protocol.
//!
//! Everything here is deterministic plumbing for the signing pipeline:
//! AES-128-ECB with PKCS7 padding (encrypted query parameters), RSA
//! PKCS1v15 (login credentials and upload key exchange), HMAC-SHA1
//! (request signatures), MD5 (file and slice checksums), plus the
//! canonical parameter encodings the signatures are computed over.

mod aes_ecb;
mod hmac_sha1;
mod md5sum;
mod params;
mod random;
mod rsa_enc;

pub use aes_ecb::{decrypt_ecb, encrypt_ecb, encrypt_hex_ecb};
pub use hmac_sha1::{sign, sign_bytes};
pub use md5sum::{digest_bytes, digest_file, digest_reader, digest_string};
pub use params::{encode_form, encode_values_sorted, query_escape};
pub use random::{random_string, secure_random_hex, uuid_v4};
pub use rsa_enc::rsa_encrypt;

/// Errors produced by the crypto primitives.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("AES key must be 16 bytes")]
    InvalidKey,

    #[error("invalid PKCS7 padding")]
    InvalidPadding,

    #[error("invalid RSA public key: {0}")]
    PublicKey(String),

    #[error("RSA encryption failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
