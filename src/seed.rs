//! Working-seed derivation and the per-realm identity cache.
//!
//! This is the single point controlling the stability/unlinkability
//! trade-off: compat seeds are epoch-invariant, privacy seeds change with
//! the epoch, an explicit seed always overrides, and every other mode
//! yields no seed at all — which every noise algorithm downstream must
//! treat as "disabled".

use serde::{Deserialize, Serialize};

use crate::config::{Mode, RunConfig};
use crate::persona::{GpuFacts, NavigatorFacts, Persona, ScreenFacts};

/// Derive the working seed for a realm. Deterministic and side-effect
/// free.
///
/// Priority: explicit `config.seed` verbatim; else per mode from the
/// persona id (`priv_<persona>_<epoch>` / `compat_<persona>`); else
/// `None`. A missing epoch in privacy mode defaults to 0 rather than
/// failing — the telemetry stream still records what was actually used.
pub fn derive_working_seed(config: &RunConfig) -> Option<String> {
    if let Some(seed) = &config.seed {
        return Some(seed.clone());
    }
    let persona_id = config.persona_id.as_deref()?;
    match config.mode {
        Mode::Privacy => Some(format!(
            "priv_{}_{}",
            persona_id,
            config.epoch_id.unwrap_or(0)
        )),
        Mode::Compat => Some(format!("compat_{}", persona_id)),
        Mode::Disabled => None,
    }
}

/// Noise stride per posture: denser under privacy, sparser under compat.
pub fn noise_stride(mode: Mode) -> usize {
    match mode {
        Mode::Privacy => 32,
        _ => 64,
    }
}

/// Realm-scoped live identity. Shared by reference within a realm,
/// replicated (never shared) into child realms as a serialized snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityCache {
    pub seed: Option<String>,
    pub mode: Mode,
    pub run_id: Option<String>,
    pub site_visit_id: Option<String>,
    pub persona_id: Option<String>,
    pub blueprint_id: Option<String>,
    pub epoch_id: u32,
    pub navigator: Option<NavigatorFacts>,
    pub screen: Option<ScreenFacts>,
    pub webgl: Option<GpuFacts>,
}

impl IdentityCache {
    /// Cache for an externally-configured identity (experiment runs that
    /// pass `persona_id`/`seed` directly, without the policy store).
    pub fn from_config(config: &RunConfig) -> Self {
        IdentityCache {
            seed: derive_working_seed(config),
            mode: config.mode,
            run_id: config.run_id.clone(),
            site_visit_id: config.site_visit_id.clone(),
            persona_id: config.persona_id.clone(),
            blueprint_id: None,
            epoch_id: config.epoch_id.unwrap_or(0),
            navigator: None,
            screen: None,
            webgl: None,
        }
    }

    /// Cache for a policy-issued persona. The persona id feeds seed
    /// derivation; the resolved facts feed the navigator/screen/WebGL
    /// spoofing surfaces.
    pub fn from_persona(config: &RunConfig, persona: &Persona) -> Self {
        let mut derived = config.clone();
        derived.persona_id = Some(persona.id.clone());
        if derived.epoch_id.is_none() {
            derived.epoch_id = Some(persona.epoch_id);
        }
        IdentityCache {
            seed: derive_working_seed(&derived),
            mode: config.mode,
            run_id: config.run_id.clone(),
            site_visit_id: config.site_visit_id.clone(),
            persona_id: Some(persona.id.clone()),
            blueprint_id: Some(persona.blueprint_id.clone()),
            epoch_id: derived.epoch_id.unwrap_or(0),
            navigator: Some(persona.navigator.clone()),
            screen: Some(persona.screen.clone()),
            webgl: Some(persona.webgl.clone()),
        }
    }

    /// Noise is applied iff a working seed exists. Mode gates only the
    /// derivation above and the stride density.
    pub fn noise_active(&self) -> bool {
        self.seed.is_some()
    }

    pub fn stride(&self) -> usize {
        noise_stride(self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(mode: Mode, persona: Option<&str>, epoch: Option<u32>, seed: Option<&str>) -> RunConfig {
        RunConfig {
            mode,
            persona_id: persona.map(String::from),
            epoch_id: epoch,
            seed: seed.map(String::from),
            ..RunConfig::default()
        }
    }

    #[test]
    fn explicit_seed_wins_verbatim() {
        let c = cfg(Mode::Privacy, Some("P1"), Some(4), Some("fixed_seed"));
        assert_eq!(derive_working_seed(&c).as_deref(), Some("fixed_seed"));
        let c = cfg(Mode::Disabled, None, None, Some("fixed_seed"));
        assert_eq!(derive_working_seed(&c).as_deref(), Some("fixed_seed"));
    }

    #[test]
    fn privacy_seed_changes_with_epoch() {
        let e1 = derive_working_seed(&cfg(Mode::Privacy, Some("P1"), Some(1), None)).unwrap();
        let e2 = derive_working_seed(&cfg(Mode::Privacy, Some("P1"), Some(2), None)).unwrap();
        assert_ne!(e1, e2);
        assert_eq!(e1, "priv_P1_1");
    }

    #[test]
    fn compat_seed_ignores_epoch() {
        let e1 = derive_working_seed(&cfg(Mode::Compat, Some("P1"), Some(1), None)).unwrap();
        let e3 = derive_working_seed(&cfg(Mode::Compat, Some("P1"), Some(3), None)).unwrap();
        assert_eq!(e1, e3);
        assert_eq!(e1, "compat_P1");
    }

    #[test]
    fn disabled_mode_yields_no_seed() {
        assert!(derive_working_seed(&cfg(Mode::Disabled, Some("P1"), Some(1), None)).is_none());
    }

    #[test]
    fn missing_persona_yields_no_seed() {
        assert!(derive_working_seed(&cfg(Mode::Privacy, None, Some(1), None)).is_none());
        assert!(derive_working_seed(&cfg(Mode::Compat, None, None, None)).is_none());
    }

    #[test]
    fn privacy_missing_epoch_defaults_to_zero() {
        let s = derive_working_seed(&cfg(Mode::Privacy, Some("P1"), None, None)).unwrap();
        assert_eq!(s, "priv_P1_0");
    }

    #[test]
    fn stride_denser_under_privacy() {
        assert!(noise_stride(Mode::Privacy) < noise_stride(Mode::Compat));
    }

    #[test]
    fn cache_roundtrips_as_json() {
        let c = cfg(Mode::Privacy, Some("P1"), Some(2), None);
        let cache = IdentityCache::from_config(&c);
        let json = serde_json::to_string(&cache).unwrap();
        let back: IdentityCache = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seed, cache.seed);
        assert_eq!(back.epoch_id, 2);
        assert!(back.noise_active());
    }
}
