use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Computes the HMAC-SHA1 signature of `message` and returns lowercase hex.
pub fn sign(message: &str, key: &str) -> String {
    hex::encode(sign_bytes(message.as_bytes(), key.as_bytes()))
}

/// Computes the raw HMAC-SHA1 digest.
pub fn sign_bytes(message: &[u8], key: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}
