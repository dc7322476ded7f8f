//! Seeded deterministic PRNG over string seeds.
//!
//! A 32-bit avalanche hash folds an arbitrary seed string into generator
//! state; a multiplicative mixing step advances it and emits uniform
//! floats in [0,1). The worker bootstrap embeds the same two routines in
//! JS, so the constants here are load-bearing: parent and worker realms
//! must draw identical sequences from identical seed strings.

/// Fold a seed string into a 32-bit state (xmur3-style avalanche).
pub fn hash_seed_str(seed: &str) -> u32 {
    let mut h: u32 = 1_779_033_703 ^ seed.len() as u32;
    for c in seed.chars() {
        h = (h ^ c as u32).wrapping_mul(3_432_918_353);
        h = h.rotate_left(13);
    }
    h = (h ^ (h >> 16)).wrapping_mul(2_246_822_507);
    h = (h ^ (h >> 13)).wrapping_mul(3_266_489_909);
    h ^ (h >> 16)
}

/// Mulberry32-style generator. Cheap, portable, and exactly
/// reproducible across realms.
#[derive(Debug, Clone)]
pub struct SeededPrng {
    state: u32,
}

impl SeededPrng {
    pub fn from_seed_str(seed: &str) -> Self {
        SeededPrng {
            state: hash_seed_str(seed),
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(0x6D2B_79F5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    /// Uniform float in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SeededPrng::from_seed_str("priv_P1_1");
        let mut b = SeededPrng::from_seed_str("priv_P1_1");
        for _ in 0..1000 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = SeededPrng::from_seed_str("priv_P1_1");
        let mut b = SeededPrng::from_seed_str("priv_P1_2");
        let draws_a: Vec<u32> = (0..16).map(|_| a.next_u32()).collect();
        let draws_b: Vec<u32> = (0..16).map(|_| b.next_u32()).collect();
        assert_ne!(draws_a, draws_b);
    }

    #[test]
    fn floats_in_unit_interval() {
        let mut p = SeededPrng::from_seed_str("compat_P1");
        for _ in 0..10_000 {
            let f = p.next_f64();
            assert!((0.0..1.0).contains(&f));
        }
    }

    #[test]
    fn floats_roughly_uniform() {
        let mut p = SeededPrng::from_seed_str("uniformity_check");
        let n = 10_000;
        let mean: f64 = (0..n).map(|_| p.next_f64()).sum::<f64>() / n as f64;
        assert!((mean - 0.5).abs() < 0.02, "mean drifted: {}", mean);
    }

    #[test]
    fn hash_is_stable_for_empty_and_unicode() {
        assert_eq!(hash_seed_str(""), hash_seed_str(""));
        assert_eq!(hash_seed_str("日本"), hash_seed_str("日本"));
        assert_ne!(hash_seed_str("a"), hash_seed_str("b"));
    }
}
