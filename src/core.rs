use std::hash::{Hash, Hasher};

/// A 32-byte BLAKE3 hash used as a value fingerprint.
///
/// In `floopy`, this serves two purposes:
/// 1. A node remembers the fingerprints of the upstream values it read during
///    its last computation, so a dirty node can prove it is still valid
///    without calling its function again.
/// 2. The [`DataManager`](crate::DataManager) keys recorded entries by the
///    fingerprint of their coordinate, which makes re-recording the same
///    coordinate an overwrite.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    /// Fingerprint anything that implements [`Hash`].
    pub(crate) fn of<T: Hash + ?Sized>(item: &T) -> Self {
        let mut hasher = Blake3Hasher::default();
        item.hash(&mut hasher);
        hasher.into()
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", &self.to_hex()[..16])
    }
}

#[derive(Default)]
pub(crate) struct Blake3Hasher(blake3::Hasher);

impl From<Blake3Hasher> for Hash32 {
    fn from(value: Blake3Hasher) -> Self {
        let bytes: [u8; 32] = value.0.finalize().into();
        Hash32::from(bytes)
    }
}

impl Hasher for Blake3Hasher {
    fn finish(&self) -> u64 {
        let mut output = [0u8; 8];
        self.0.finalize_xof().fill(&mut output);
        u64::from_le_bytes(output)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(Hash32::of(&(1u8, "a")), Hash32::of(&(1u8, "a")));
        assert_ne!(Hash32::of(&(1u8, "a")), Hash32::of(&(2u8, "a")));
    }

    #[test]
    fn test_hex_length() {
        assert_eq!(Hash32::of("x").to_hex().len(), 64);
        assert_eq!(Hash32::default().to_hex(), "0".repeat(64));
    }
}
