//! Colour cache: a small hash table of recently emitted BGRA pixels.
//!
//! The green-channel alphabet is extended with cache indices, so the
//! symbol stream can reference a recent pixel by its hash slot instead
//! of spelling out four channels.

use alloc::vec;
use alloc::vec::Vec;

const HASH_MUL: u32 = 0x1e35_a7bd;

#[derive(Clone, Debug)]
pub(crate) struct ColorCache {
    colors: Vec<u32>,
    hash_shift: u32,
}

impl ColorCache {
    /// `hash_bits` must be in `1..=MAX_CACHE_BITS`; the caller validates.
    pub(crate) fn new(hash_bits: u32) -> Self {
        Self {
            colors: vec![0u32; 1 << hash_bits],
            hash_shift: 32 - hash_bits,
        }
    }

    #[inline]
    pub(crate) fn insert(&mut self, argb: u32) {
        let key = (argb.wrapping_mul(HASH_MUL) >> self.hash_shift) as usize;
        self.colors[key] = argb;
    }

    #[inline]
    pub(crate) fn lookup(&self, key: usize) -> u32 {
        self.colors[key]
    }

    /// Overwrite this cache with the contents of `src` (same size).
    pub(crate) fn copy_from(&mut self, src: &ColorCache) {
        self.colors.copy_from_slice(&src.colors);
        self.hash_shift = src.hash_shift;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(argb: u32, bits: u32) -> usize {
        (argb.wrapping_mul(HASH_MUL) >> (32 - bits)) as usize
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut cache = ColorCache::new(4);
        let pixel = 0xFF12_3456;
        cache.insert(pixel);
        assert_eq!(cache.lookup(key_of(pixel, 4)), pixel);
    }

    #[test]
    fn colliding_insert_overwrites() {
        let mut cache = ColorCache::new(1);
        // With one bit of key space, half of all pixels collide.
        let a = 0xFF00_0001;
        let b = a ^ 0x0000_0002;
        let (ka, kb) = (key_of(a, 1), key_of(b, 1));
        cache.insert(a);
        if ka == kb {
            cache.insert(b);
            assert_eq!(cache.lookup(ka), b);
        } else {
            cache.insert(b);
            assert_eq!(cache.lookup(ka), a);
            assert_eq!(cache.lookup(kb), b);
        }
    }

    #[test]
    fn snapshot_copy_restores_contents() {
        let mut live = ColorCache::new(3);
        let mut saved = ColorCache::new(3);
        live.insert(0xFFAA_BBCC);
        saved.copy_from(&live);
        live.insert(0x0102_0304);
        live.copy_from(&saved);
        let k = key_of(0xFFAA_BBCC, 3);
        assert_eq!(live.lookup(k), 0xFFAA_BBCC);
    }
}
