use rand::Rng;

/// Generates a random hex string of `n` bytes (2n hex chars) from a CSPRNG.
pub fn secure_random_hex(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::thread_rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}

/// Generates a version-4 UUID in the standard 8-4-4-4-12 form.
pub fn uuid_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generates an `n`-character random string drawn from `charset`.
///
/// Returns an empty string when `n` is zero or the charset is empty.
pub fn random_string(n: usize, charset: &str) -> String {
    let chars: Vec<char> = charset.chars().collect();
    if n == 0 || chars.is_empty() {
        return String::new();
    }
    let mut rng = rand::thread_rng();
    (0..n).map(|_| chars[rng.gen_range(0..chars.len())]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_length_and_alphabet() {
        let out = secure_random_hex(8);
        assert_eq!(out.len(), 16);
        assert!(out.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(secure_random_hex(0), "");
    }

    #[test]
    fn uuid_shape() {
        let id = uuid_v4();
        let groups: Vec<&str> = id.split('-').collect();
        assert_eq!(groups.len(), 5);
        assert_eq!(
            groups.iter().map(|g| g.len()).collect::<Vec<_>>(),
            vec![8, 4, 4, 4, 12]
        );
        // Version and variant nibbles.
        assert_eq!(&groups[2][..1], "4");
        assert!(matches!(&groups[3][..1], "8" | "9" | "a" | "b"));
        assert_ne!(uuid_v4(), id);
    }

    #[test]
    fn random_string_respects_charset() {
        let out = random_string(64, "abc");
        assert_eq!(out.len(), 64);
        assert!(out.chars().all(|c| "abc".contains(c)));
        assert_eq!(random_string(0, "abc"), "");
        assert_eq!(random_string(5, ""), "");
    }
}
