use std::io::Read;
use std::path::Path;

use md5::{Digest, Md5};

use crate::CryptoError;

/// MD5 of a byte slice, lowercase hex.
pub fn digest_bytes(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// MD5 of a string, lowercase hex.
pub fn digest_string(s: &str) -> String {
    digest_bytes(s.as_bytes())
}

/// Streaming MD5 over a reader, lowercase hex.
pub fn digest_reader<R: Read>(mut reader: R) -> Result<String, CryptoError> {
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// MD5 of a file's contents, lowercase hex.
pub fn digest_file(path: &Path) -> Result<String, CryptoError> {
    let file = std::fs::File::open(path)?;
    digest_reader(file)
}
