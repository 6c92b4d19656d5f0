//! Stable 32-bit hashing and path-safe encoding (component A).
//!
//! Every key in the database ultimately bottoms out in a 32-bit
//! xxHash-32 value encoded through [`encode`]. Collisions are resolved
//! by chained rehashing: `h = h32(seed = h, name)`, which is exactly
//! [`rehash`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use xxhash_rust::xxh32::xxh32;

/// Hash a byte string with the given seed.
pub fn hash_bytes(seed: u32, data: &[u8]) -> u32 {
    xxh32(data, seed)
}

/// Hash a UTF-8 string with the given seed.
pub fn hash_str(seed: u32, data: &str) -> u32 {
    hash_bytes(seed, data.as_bytes())
}

/// Perturb a hash value using `name` as a disambiguator, per the
/// chained-rehash collision policy (`h = h32(h).update(name)`).
pub fn rehash(h: u32, name: &str) -> u32 {
    hash_str(h, name)
}

/// Encode a 32-bit hash into a fixed-length, path-safe string. Four
/// bytes of input always yield exactly six output characters under
/// unpadded URL-safe base64, so keys built from this are fixed-width.
pub fn encode(h: u32) -> String {
    URL_SAFE_NO_PAD.encode(h.to_be_bytes())
}

/// Decode a string produced by [`encode`] back into a hash value.
/// Returns `None` if the string isn't a valid encoding of a 4-byte value.
pub fn decode(s: &str) -> Option<u32> {
    let bytes = URL_SAFE_NO_PAD.decode(s).ok()?;
    let arr: [u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_be_bytes(arr))
}

/// Compute the fragment hash for a root path (§4.A / GLOSSARY "Fragment hash").
pub fn fragment_hash(root_path: &str) -> u32 {
    hash_str(0, root_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        for h in [0u32, 1, 42, u32::MAX, 0xdead_beef] {
            let enc = encode(h);
            assert_eq!(enc.len(), 6, "fixed-length encoding for {h}");
            assert_eq!(decode(&enc), Some(h));
        }
    }

    #[test]
    fn encode_contains_alphanumeric_characters() {
        // The encoded form must not be a pure-punctuation string: any
        // regex asserting "only non-alphanumeric characters" should fail
        // to match a real key built from this encoding.
        let enc = encode(0x1234_5678);
        assert!(enc.chars().any(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_str(7, "same/path.mp3"), hash_str(7, "same/path.mp3"));
    }

    #[test]
    fn rehash_changes_the_value() {
        let h = hash_str(0, "root");
        let rehashed = rehash(h, "disambiguator");
        assert_ne!(h, rehashed);
    }

    #[test]
    fn fragment_hash_is_path_sensitive() {
        assert_ne!(fragment_hash("/a"), fragment_hash("/b"));
    }
}
