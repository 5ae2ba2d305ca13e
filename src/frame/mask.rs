//!  Mask flag and key.

/// Payload mask with a 32-bit key.
///
/// Clients mask every outgoing frame with a fresh key; servers never
/// mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mask {
    Key([u8; 4]),
    None,
}

impl Mask {
    /// Get the flag byte.
    #[inline]
    pub const fn to_flag(&self) -> u8 {
        match self {
            Mask::Key(_) => 0x80,
            Mask::None => 0x00,
        }
    }
}

/// Generate a new random key.
///
/// The per-frame nonce; drawn from the system CSPRNG.
#[inline]
pub fn new_rand_key() -> [u8; 4] { rand::random::<[u8; 4]>() }

/// Mask the buffer, byte by byte.
#[inline]
pub fn apply_mask(key: [u8; 4], buf: &mut [u8]) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b ^= key[i & 0x03];
    }
}

/// Mask the buffer starting at key offset `idx`, returns the offset
/// after the last byte. Lets a frame be masked in more than one run.
#[inline]
pub fn apply_mask_from(key: [u8; 4], idx: u32, buf: &mut [u8]) -> u32 {
    for (i, b) in buf.iter_mut().enumerate() {
        *b ^= key[(idx as usize + i) & 0x03];
    }
    idx.wrapping_add(buf.len() as u32)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mask_flag() {
        assert_eq!(Mask::Key([1, 2, 3, 4]).to_flag(), 0x80);
        assert_eq!(Mask::None.to_flag(), 0x00);
    }

    #[test]
    fn mask_byte() {
        let key: [u8; 4] = rand::random();
        let buf: Vec<u8> =
            std::iter::repeat(rand::random::<u8>()).take(1024).collect();

        assert_eq!(buf.len(), 1024);

        let mut buf2 = buf.clone();
        apply_mask(key, &mut buf2);
        apply_mask(key, &mut buf2);

        assert_eq!(buf, buf2);
    }

    #[test]
    fn mask_split_runs() {
        for split in 0..=64 {
            let key: [u8; 4] = rand::random();
            let buf: Vec<u8> =
                std::iter::repeat(rand::random::<u8>()).take(64).collect();

            let mut whole = buf.clone();
            apply_mask(key, &mut whole);

            let mut parts = buf.clone();
            let (a, b) = parts.split_at_mut(split);
            let idx = apply_mask_from(key, 0, a);
            apply_mask_from(key, idx, b);

            assert_eq!(whole, parts);
        }
    }
}
