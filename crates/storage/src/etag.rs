//! Content identifiers: FNV-1a 64, hex encoded.

const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const PRIME: u64 = 0x100000001b3;

/// Incremental FNV-1a 64 hasher.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a(u64);

impl Default for Fnv1a {
    fn default() -> Self {
        Self(OFFSET_BASIS)
    }
}

impl Fnv1a {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= *byte as u64;
            self.0 = self.0.wrapping_mul(PRIME);
        }
    }

    pub fn finish(&self) -> u64 {
        self.0
    }

    pub fn hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

/// Etag of a complete buffer.
pub fn etag_of(bytes: &[u8]) -> String {
    let mut hasher = Fnv1a::new();
    hasher.update(bytes);
    hasher.hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(etag_of(b""), "cbf29ce484222325");
        assert_eq!(etag_of(b"a"), "af63dc4c8601ec8c");
    }

    #[test]
    fn test_incremental_matches_whole() {
        let mut hasher = Fnv1a::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.hex(), etag_of(b"hello world"));
    }
}
