use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

use crate::CryptoError;

/// Encrypts `data` with an RSA public key using PKCS1v15.
///
/// The key may be a full PEM document or a bare base64 body (the server
/// sends the latter); SPKI is tried first, then PKCS1.
pub fn rsa_encrypt(public_key: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let der = decode_key_body(public_key)?;
    let key = RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|e| CryptoError::PublicKey(e.to_string()))?;
    Ok(key.encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, data)?)
}

/// Strips any PEM armor and whitespace, returning the raw DER bytes.
fn decode_key_body(public_key: &str) -> Result<Vec<u8>, CryptoError> {
    let body: String = public_key
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect::<Vec<_>>()
        .concat()
        .split_whitespace()
        .collect();
    if body.is_empty() {
        return Err(CryptoError::PublicKey("empty key".into()));
    }
    BASE64
        .decode(body.as_bytes())
        .map_err(|e| CryptoError::PublicKey(e.to_string()))
}
