//! Deterministic noise engine.
//!
//! One seeded generator ([`prng::SeededPrng`]) and one algorithm per
//! capability surface. Everything here is pure buffer math — no browser
//! types — so the reproducibility properties the whole system depends on
//! are testable natively: same seed string ⇒ identical output, different
//! seed ⇒ divergent output.

pub mod audio;
pub mod pixels;
pub mod prng;
pub mod text;

pub use prng::SeededPrng;
