// Little-endian u32 packing and the djb2-xor hash. Every other module goes
// through here rather than touching raw bytes itself.

use bytes::{Buf, BufMut, IntoBuf};

pub const STARTING_HASH: u32 = 5381;

#[inline]
pub fn pack_u32(n: u32) -> [u8; 4] {
    let mut buf = [0u8; 4];
    (&mut buf[..]).put_u32_le(n);
    buf
}

#[inline]
pub fn unpack_u32(bytes: &[u8]) -> u32 {
    assert!(bytes.len() >= 4);
    bytes.into_buf().get_u32_le()
}

#[inline]
pub fn hash(bytes: &[u8]) -> u32 {
    let mut h = STARTING_HASH;
    for b in bytes {
        // wrapping arithmetic is part of the hash definition, not a bug:
        // the djb2-xor hash is specified to wrap modulo 2^32.
        h = h.wrapping_shl(5).wrapping_add(h) ^ (*b as u32)
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips() {
        for &n in &[0u32, 1, 255, 256, 0xdead_beef, u32::max_value()] {
            assert_eq!(unpack_u32(&pack_u32(n)), n);
        }
    }

    #[test]
    fn hash_of_empty_is_starting_hash() {
        assert_eq!(hash(&[]), STARTING_HASH);
    }

    #[test]
    fn hash_is_stable() {
        // regression fixture: these values must never change, since they are
        // baked into every file already on disk.
        assert_eq!(hash(b"one"), hash(b"one"));
        assert_ne!(hash(b"one"), hash(b"two"));
    }
}
