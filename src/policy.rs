//! Origin → persona policy: daily stability with explicit rotation.
//!
//! A given origin keeps the same persona for the remainder of the
//! calendar day; crossing a UTC day boundary between reads replaces it.
//! The decision logic is pure ([`PolicyCore`]) and browser persistence is
//! a thin wrapper ([`PolicyStore`]) over `localStorage`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::persona::{now_ms, Evolved, Persona, PersonaGenerator};

const POLICY_STORAGE_KEY: &str = "__VEIL_POLICY__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub persona: Persona,
    /// UTC `YYYY-MM-DD` stamp of the day the persona was issued.
    pub day_stamp: String,
}

/// How the returned persona came to be; feeds the telemetry
/// `policy_decision` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    /// Non-addressable scheme; never persisted.
    Ephemeral,
    /// First request for this origin.
    Created,
    /// Stored persona, still fresh today.
    Resumed,
    /// Day boundary crossed since the stored stamp.
    RotatedDayChange,
    /// User-triggered identity shift.
    RotatedExplicit,
}

/// Pure per-origin state machine:
/// {absent} → {present, fresh-today} → {present, stale} → {present,
/// fresh-today (new persona)} → …
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PolicyCore {
    entries: HashMap<String, PolicyEntry>,
}

impl PolicyCore {
    pub fn persona_for(
        &mut self,
        origin: &str,
        today: &str,
        mut make: impl FnMut() -> Persona,
    ) -> (Persona, PolicyDecision) {
        if !is_addressable(origin) {
            return (make(), PolicyDecision::Ephemeral);
        }

        match self.entries.get(origin) {
            Some(entry) if entry.day_stamp == today => {
                (entry.persona.clone(), PolicyDecision::Resumed)
            }
            Some(_) => {
                let persona = make();
                self.entries.insert(
                    origin.to_string(),
                    PolicyEntry {
                        persona: persona.clone(),
                        day_stamp: today.to_string(),
                    },
                );
                (persona, PolicyDecision::RotatedDayChange)
            }
            None => {
                let persona = make();
                self.entries.insert(
                    origin.to_string(),
                    PolicyEntry {
                        persona: persona.clone(),
                        day_stamp: today.to_string(),
                    },
                );
                (persona, PolicyDecision::Created)
            }
        }
    }

    /// Unconditional replacement, bypassing the daily-stability rule.
    pub fn rotate_for(
        &mut self,
        origin: &str,
        today: &str,
        mut make: impl FnMut() -> Persona,
    ) -> (Persona, PolicyDecision) {
        let persona = make();
        if is_addressable(origin) {
            self.entries.insert(
                origin.to_string(),
                PolicyEntry {
                    persona: persona.clone(),
                    day_stamp: today.to_string(),
                },
            );
        }
        (persona, PolicyDecision::RotatedExplicit)
    }

    /// Evolve the stored persona for an origin in place (software-update
    /// drift). Returns `None` when nothing is stored for the origin.
    pub fn evolve_for(&mut self, origin: &str) -> Option<(Persona, Evolved)> {
        let entry = self.entries.get_mut(origin)?;
        let outcome = PersonaGenerator::evolve(&mut entry.persona);
        Some((entry.persona.clone(), outcome))
    }

    /// Factory reset.
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Origins without a usable origin concept (browser-internal pages,
/// about:, data:) get ephemeral personas.
pub fn is_addressable(origin: &str) -> bool {
    origin.starts_with("http://") || origin.starts_with("https://") || origin.starts_with("file://")
}

/// UTC calendar day (`YYYY-MM-DD`) for a unix-epoch millisecond stamp.
/// Civil-from-days arithmetic; proleptic Gregorian.
pub fn utc_day_stamp(unix_ms: u64) -> String {
    let days = (unix_ms / 86_400_000) as i64;
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    format!("{:04}-{:02}-{:02}", year, month, day)
}

/// `localStorage`-backed policy store for window realms. All storage
/// failures degrade to in-memory behavior (the map simply does not
/// survive the page).
pub struct PolicyStore {
    core: PolicyCore,
}

impl PolicyStore {
    pub fn load() -> Self {
        let core = local_storage()
            .and_then(|s| s.get_item(POLICY_STORAGE_KEY).ok().flatten())
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default();
        PolicyStore { core }
    }

    pub fn persona_for(&mut self, origin: &str) -> (Persona, PolicyDecision) {
        let today = utc_day_stamp(now_ms());
        let result = self
            .core
            .persona_for(origin, &today, PersonaGenerator::generate);
        if result.1 != PolicyDecision::Ephemeral && result.1 != PolicyDecision::Resumed {
            self.save();
        }
        result
    }

    pub fn rotate_for(&mut self, origin: &str) -> (Persona, PolicyDecision) {
        let today = utc_day_stamp(now_ms());
        let result = self
            .core
            .rotate_for(origin, &today, PersonaGenerator::generate);
        self.save();
        result
    }

    pub fn evolve_for(&mut self, origin: &str) -> Option<(Persona, Evolved)> {
        let result = self.core.evolve_for(origin);
        if result.is_some() {
            self.save();
        }
        result
    }

    pub fn clear_all(&mut self) {
        self.core.clear_all();
        if let Some(storage) = local_storage() {
            let _ = storage.remove_item(POLICY_STORAGE_KEY);
        }
    }

    fn save(&self) {
        let Some(storage) = local_storage() else {
            return;
        };
        if let Ok(json) = serde_json::to_string(&self.core) {
            if storage.set_item(POLICY_STORAGE_KEY, &json).is_err() {
                log::warn!("policy map not persisted (storage quota or access denied)");
            }
        }
    }
}

fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window().and_then(|w| w.local_storage().ok().flatten())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::PersonaGenerator;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn persona(rng: &mut StdRng) -> Persona {
        PersonaGenerator::generate_with_rng(rng)
    }

    #[test]
    fn same_day_is_stable() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut core = PolicyCore::default();
        let (a, d1) = core.persona_for("https://example.com", "2026-08-07", || persona(&mut rng));
        assert_eq!(d1, PolicyDecision::Created);
        let mut rng2 = StdRng::seed_from_u64(2);
        let (b, d2) = core.persona_for("https://example.com", "2026-08-07", || persona(&mut rng2));
        assert_eq!(d2, PolicyDecision::Resumed);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn day_rollover_replaces_persona() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut core = PolicyCore::default();
        let (a, _) = core.persona_for("https://example.com", "2026-08-07", || persona(&mut rng));
        let (b, d) = core.persona_for("https://example.com", "2026-08-08", || persona(&mut rng));
        assert_eq!(d, PolicyDecision::RotatedDayChange);
        assert_ne!(a.id, b.id);
        // New persona is now stable for the new day.
        let (c, d) = core.persona_for("https://example.com", "2026-08-08", || persona(&mut rng));
        assert_eq!(d, PolicyDecision::Resumed);
        assert_eq!(b.id, c.id);
    }

    #[test]
    fn explicit_rotation_bypasses_day_rule() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut core = PolicyCore::default();
        let (a, _) = core.persona_for("https://example.com", "2026-08-07", || persona(&mut rng));
        let (b, d) = core.rotate_for("https://example.com", "2026-08-07", || persona(&mut rng));
        assert_eq!(d, PolicyDecision::RotatedExplicit);
        assert_ne!(a.id, b.id);
        let (c, _) = core.persona_for("https://example.com", "2026-08-07", || persona(&mut rng));
        assert_eq!(b.id, c.id);
    }

    #[test]
    fn non_addressable_origins_are_ephemeral() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut core = PolicyCore::default();
        let (a, d) = core.persona_for("chrome://settings", "2026-08-07", || persona(&mut rng));
        assert_eq!(d, PolicyDecision::Ephemeral);
        let (b, _) = core.persona_for("chrome://settings", "2026-08-07", || persona(&mut rng));
        assert_ne!(a.id, b.id);
        assert!(core.is_empty());
    }

    #[test]
    fn evolve_keeps_identity_but_bumps_version() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut core = PolicyCore::default();
        let (a, _) = core.persona_for("https://example.com", "2026-08-07", || persona(&mut rng));
        let (evolved, outcome) = core.evolve_for("https://example.com").unwrap();
        assert!(matches!(outcome, Evolved::VersionBumped { .. }));
        assert_eq!(evolved.id, a.id);
        assert_eq!(evolved.seed, a.seed);
        assert_ne!(evolved.navigator.user_agent, a.navigator.user_agent);
        assert!(core.evolve_for("https://missing.test").is_none());
    }

    #[test]
    fn clear_all_resets() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut core = PolicyCore::default();
        core.persona_for("https://a.test", "2026-08-07", || persona(&mut rng));
        core.persona_for("https://b.test", "2026-08-07", || persona(&mut rng));
        assert_eq!(core.len(), 2);
        core.clear_all();
        assert!(core.is_empty());
    }

    #[test]
    fn day_stamp_known_values() {
        assert_eq!(utc_day_stamp(0), "1970-01-01");
        assert_eq!(utc_day_stamp(86_400_000), "1970-01-02");
        // 2000-03-01 00:00:00 UTC
        assert_eq!(utc_day_stamp(951_868_800_000), "2000-03-01");
        // 2026-08-07 12:00:00 UTC
        assert_eq!(utc_day_stamp(1_786_104_000_000), "2026-08-07");
        // Leap day 2024-02-29
        assert_eq!(utc_day_stamp(1_709_164_800_000), "2024-02-29");
    }

    #[test]
    fn addressable_schemes() {
        assert!(is_addressable("https://example.com"));
        assert!(is_addressable("http://localhost:8080"));
        assert!(is_addressable("file:///tmp/index.html"));
        assert!(!is_addressable("chrome://newtab"));
        assert!(!is_addressable("about:blank"));
        assert!(!is_addressable(""));
    }
}
