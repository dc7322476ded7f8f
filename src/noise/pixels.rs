//! Pixel-buffer perturbation for canvas and WebGL reads.
//!
//! The noise pattern is a function of what is being hidden, not just of
//! the identity: the working seed is re-hashed together with a fragment
//! of the true pixel bytes and a surface label before seeding the
//! generator. Repeated sampling of a static scene therefore cannot
//! average the noise away, while a fixed (seed, content) pair always
//! produces the same perturbation.

use crate::hashing::{content_snippet, sha256_hex, sha256_hex_str, HashTriple};
use crate::noise::SeededPrng;

/// Content-bound seed: SHA-256 over seed + content fragment + surface.
pub fn derived_pixel_seed(working_seed: &str, data: &[u8], surface: &str) -> String {
    let input = format!("{}_{}_{}", working_seed, content_snippet(data), surface);
    sha256_hex_str(&input)
}

/// Flip the low bit of every `stride`-th byte when the draw exceeds 0.5.
pub fn perturb_pixels(data: &mut [u8], working_seed: &str, surface: &str, stride: usize) {
    debug_assert!(stride > 0);
    let derived = derived_pixel_seed(working_seed, data, surface);
    let mut prng = SeededPrng::from_seed_str(&derived);
    let mut i = 0;
    while i < data.len() {
        if prng.next_f64() > 0.5 {
            data[i] ^= 1;
        }
        i += stride;
    }
}

/// Perturb in place and return the provenance triple
/// (stimulus = hash of the clean bytes).
pub fn apply_pixel_noise(
    data: &mut [u8],
    working_seed: &str,
    surface: &str,
    stride: usize,
) -> HashTriple {
    let clean = sha256_hex(data);
    perturb_pixels(data, working_seed, surface, stride);
    HashTriple {
        spoofed: sha256_hex(data),
        stimulus: clean.clone(),
        clean,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn same_seed_same_content_same_noise() {
        let mut a = gradient(4096);
        let mut b = gradient(4096);
        perturb_pixels(&mut a, "compat_P1", "Canvas2D", 32);
        perturb_pixels(&mut b, "compat_P1", "Canvas2D", 32);
        assert_eq!(a, b);
    }

    #[test]
    fn noise_actually_perturbs() {
        let mut data = gradient(4096);
        let triple = apply_pixel_noise(&mut data, "priv_P1_1", "Canvas2D", 32);
        assert!(triple.lied());
        assert_eq!(triple.stimulus, triple.clean);
        assert_ne!(data, gradient(4096));
    }

    #[test]
    fn different_epoch_seeds_diverge_on_spoofed_only() {
        let mut e1 = gradient(4096);
        let mut e2 = gradient(4096);
        let t1 = apply_pixel_noise(&mut e1, "priv_P1_1", "Canvas2D", 32);
        let t2 = apply_pixel_noise(&mut e2, "priv_P1_2", "Canvas2D", 32);
        assert_eq!(t1.clean, t2.clean);
        assert_eq!(t1.stimulus, t2.stimulus);
        assert_ne!(t1.spoofed, t2.spoofed);
    }

    #[test]
    fn surface_label_binds_the_pattern() {
        let mut a = gradient(4096);
        let mut b = gradient(4096);
        perturb_pixels(&mut a, "compat_P1", "Canvas2D", 32);
        perturb_pixels(&mut b, "compat_P1", "WebGLRenderingContext", 32);
        assert_ne!(a, b);
    }

    #[test]
    fn content_binds_the_pattern() {
        // Same seed, different scene — perturbation positions differ.
        let mut a = gradient(4096);
        let mut b = vec![200u8; 4096];
        let pattern_a: Vec<u8> = {
            let clean = gradient(4096);
            perturb_pixels(&mut a, "compat_P1", "Canvas2D", 32);
            a.iter().zip(clean.iter()).map(|(x, y)| x ^ y).collect()
        };
        let pattern_b: Vec<u8> = {
            let clean = vec![200u8; 4096];
            perturb_pixels(&mut b, "compat_P1", "Canvas2D", 32);
            b.iter().zip(clean.iter()).map(|(x, y)| x ^ y).collect()
        };
        assert_ne!(pattern_a, pattern_b);
    }

    #[test]
    fn only_low_bits_at_stride_positions_change() {
        let clean = gradient(8192);
        let mut noisy = clean.clone();
        perturb_pixels(&mut noisy, "compat_P1", "Canvas2D", 64);
        for (i, (c, n)) in clean.iter().zip(noisy.iter()).enumerate() {
            if c != n {
                assert_eq!(c ^ n, 1, "non-low-bit flip at {}", i);
                assert_eq!(i % 64, 0, "flip off stride at {}", i);
            }
        }
    }

    #[test]
    fn empty_buffer_is_a_noop() {
        let mut data: Vec<u8> = Vec::new();
        let triple = apply_pixel_noise(&mut data, "compat_P1", "Canvas2D", 32);
        assert!(!triple.lied());
    }
}
