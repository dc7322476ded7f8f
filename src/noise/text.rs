//! Text-metrics jitter.
//!
//! A single small multiplicative factor on the reported width, seeded
//! from the working seed and the measured string's length. Width is the
//! only field touched; everything else in the metrics object passes
//! through untouched.

use crate::noise::SeededPrng;

/// Peak relative jitter (±0.05%). Sub-pixel at realistic font sizes.
const JITTER_MAGNITUDE: f64 = 1e-3;

/// Multiplicative width factor in (1 - 5e-4, 1 + 5e-4).
pub fn width_factor(working_seed: &str, text_len: usize) -> f64 {
    let mut prng = SeededPrng::from_seed_str(&format!("{}{}", working_seed, text_len));
    1.0 + (prng.next_f64() - 0.5) * JITTER_MAGNITUDE
}

pub fn jitter_width(width: f64, working_seed: &str, text_len: usize) -> f64 {
    width * width_factor(working_seed, text_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_is_deterministic() {
        assert_eq!(width_factor("compat_P1", 11), width_factor("compat_P1", 11));
    }

    #[test]
    fn factor_varies_with_seed_and_length() {
        assert_ne!(width_factor("compat_P1", 11), width_factor("compat_P2", 11));
        assert_ne!(width_factor("compat_P1", 11), width_factor("compat_P1", 12));
    }

    #[test]
    fn jitter_is_bounded() {
        for len in 0..64 {
            let w = jitter_width(100.0, "priv_P1_1", len);
            assert!((w - 100.0).abs() < 100.0 * JITTER_MAGNITUDE);
            assert!(w != 100.0, "zero jitter at len {}", len);
        }
    }
}
