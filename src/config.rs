//! Run configuration supplied by the external injection mechanism.
//!
//! The loader writes a plain object into the `__VEIL_CONFIG__` global slot
//! before this module boots; it is read exactly once per realm. Every
//! field is optional — an absent field falls back to a disabled/"unknown"
//! value rather than guessing, and unknown mode strings normalize to
//! [`Mode::Disabled`].

use serde::{Deserialize, Deserializer, Serialize};

/// Operating mode controlling the stability/unlinkability trade-off.
///
/// - `Compat`: working seed is a pure function of the persona id; spoofed
///   outputs are stable across epochs.
/// - `Privacy`: working seed mixes the epoch id; spoofed outputs are
///   unlinkable across epochs.
/// - `Disabled`: pass-through monitoring. No seed is ever derived and no
///   noise is applied, regardless of what downstream code requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Compat,
    Privacy,
    #[default]
    Disabled,
}

impl<'de> Deserialize<'de> for Mode {
    /// Unknown mode strings ("monitor", typos, future modes) normalize
    /// to `Disabled` instead of failing the whole config.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "compat" => Mode::Compat,
            "privacy" => Mode::Privacy,
            _ => Mode::Disabled,
        })
    }
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Compat => "compat",
            Mode::Privacy => "privacy",
            Mode::Disabled => "disabled",
        }
    }
}

/// Configuration record read once at realm boot.
///
/// Defaults: `mode` → [`Mode::Disabled`]; every identifier → `None`
/// (reported as `"unknown"` in telemetry). With neither `seed` nor
/// `persona_id` present, noise is disabled entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: Mode,
    pub run_id: Option<String>,
    pub site_visit_id: Option<String>,
    pub persona_id: Option<String>,
    pub epoch_id: Option<u32>,
    pub top_level_site: Option<String>,
    /// Explicit working-seed override. Used verbatim when present;
    /// intended for deterministic test runs.
    pub seed: Option<String>,
}

impl RunConfig {
    /// Whether this configuration can ever produce noise. The seed
    /// derivation in [`crate::seed`] makes the final call per mode.
    pub fn noise_possible(&self) -> bool {
        self.seed.is_some() || self.persona_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mode_normalizes_to_disabled() {
        let cfg: RunConfig = serde_json::from_str(r#"{"mode": "monitor"}"#).unwrap();
        assert_eq!(cfg.mode, Mode::Disabled);

        let cfg: RunConfig = serde_json::from_str(r#"{"mode": "banana"}"#).unwrap();
        assert_eq!(cfg.mode, Mode::Disabled);
    }

    #[test]
    fn known_modes_parse() {
        let cfg: RunConfig = serde_json::from_str(r#"{"mode": "privacy"}"#).unwrap();
        assert_eq!(cfg.mode, Mode::Privacy);
        let cfg: RunConfig = serde_json::from_str(r#"{"mode": "compat"}"#).unwrap();
        assert_eq!(cfg.mode, Mode::Compat);
    }

    #[test]
    fn empty_object_gets_defaults() {
        let cfg: RunConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.mode, Mode::Disabled);
        assert!(cfg.run_id.is_none());
        assert!(cfg.seed.is_none());
        assert!(!cfg.noise_possible());
    }

    #[test]
    fn noise_possible_with_seed_or_persona() {
        let cfg: RunConfig = serde_json::from_str(r#"{"seed": "s1"}"#).unwrap();
        assert!(cfg.noise_possible());
        let cfg: RunConfig = serde_json::from_str(r#"{"persona_id": "p1"}"#).unwrap();
        assert!(cfg.noise_possible());
    }
}
