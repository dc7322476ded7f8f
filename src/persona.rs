//! Persona generation: concrete, internally-coherent synthetic identities.
//!
//! A persona is a resolved draw from one blueprint — one resolution, one
//! GPU pair, one hardware option set, one browser version — plus a fresh
//! high-entropy identity seed. The seed is the device's "soul": it
//! survives software-update evolution and only changes when the identity
//! is rotated.

use rand::Rng;
use serde::{Deserialize, Serialize};
use web_time::{SystemTime, UNIX_EPOCH};

use crate::blueprints::{Blueprint, BLUEPRINTS};

/// Supported browser major-version range for freshly minted personas.
const VERSION_RANGE: std::ops::RangeInclusive<u32> = 120..=123;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigatorFacts {
    pub user_agent: String,
    pub platform: String,
    pub hardware_concurrency: u32,
    pub device_memory: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenFacts {
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
    pub pixel_depth: u32,
    pub avail_width: u32,
    pub avail_height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuFacts {
    pub vendor: String,
    pub renderer: String,
}

/// A concrete resolved identity. Copy-on-write from the holder's point of
/// view: nothing mutates a persona except [`PersonaGenerator::evolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub blueprint_id: String,
    pub epoch_id: u32,
    /// Opaque high-entropy identity seed driving noise derivation.
    pub seed: String,
    pub created_ms: u64,
    pub last_updated_ms: u64,
    pub navigator: NavigatorFacts,
    pub screen: ScreenFacts,
    pub webgl: GpuFacts,
}

/// Outcome of an evolve pass. A missing version token is a defined no-op,
/// surfaced explicitly so callers can tell the two cases apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evolved {
    VersionBumped { from: u32, to: u32 },
    NoVersionToken,
}

pub struct PersonaGenerator;

impl PersonaGenerator {
    /// Draw a fresh persona: weighted blueprint pick, uniform hardware
    /// resolution, fresh identity seed. Pure construction — persistence
    /// is the caller's decision.
    pub fn generate() -> Persona {
        Self::generate_with_rng(&mut rand::thread_rng())
    }

    pub fn generate_with_rng<R: Rng>(rng: &mut R) -> Persona {
        let bp = pick_weighted(rng, BLUEPRINTS);

        let version = rng.gen_range(VERSION_RANGE);
        let resolution = bp.resolutions[rng.gen_range(0..bp.resolutions.len())];
        let gpu = bp.gpu_pairs[rng.gen_range(0..bp.gpu_pairs.len())];
        let concurrency = bp.hardware_concurrency_options
            [rng.gen_range(0..bp.hardware_concurrency_options.len())];
        let memory = bp.device_memory_options[rng.gen_range(0..bp.device_memory_options.len())];

        let user_agent = bp.ua_template.replace("{version}", &version.to_string());
        let now = now_ms();

        Persona {
            id: uuid_v4(rng),
            blueprint_id: bp.id.to_string(),
            epoch_id: 1,
            seed: uuid_v4(rng),
            created_ms: now,
            last_updated_ms: now,
            navigator: NavigatorFacts {
                user_agent,
                platform: bp.platform.to_string(),
                hardware_concurrency: concurrency,
                device_memory: memory,
            },
            screen: ScreenFacts {
                width: resolution.width,
                height: resolution.height,
                color_depth: 24,
                pixel_depth: 24,
                avail_width: resolution.width,
                avail_height: resolution.height,
            },
            webgl: GpuFacts {
                vendor: gpu.vendor.to_string(),
                renderer: gpu.renderer.to_string(),
            },
        }
    }

    /// Simulate a software update: bump the trailing browser-version
    /// token in the UA by one, keeping the identity seed (and therefore
    /// the noise fingerprint) unchanged. A UA without a recognizable
    /// version token is left untouched and reported as such.
    pub fn evolve(persona: &mut Persona) -> Evolved {
        let ua = persona.navigator.user_agent.clone();
        let Some((start, end, current)) = find_version_token(&ua) else {
            return Evolved::NoVersionToken;
        };
        let next = current + 1;
        let mut rewritten = String::with_capacity(ua.len() + 1);
        rewritten.push_str(&ua[..start]);
        rewritten.push_str(&next.to_string());
        rewritten.push_str(&ua[end..]);
        persona.navigator.user_agent = rewritten;
        persona.last_updated_ms = now_ms();
        Evolved::VersionBumped {
            from: current,
            to: next,
        }
    }
}

/// Locate the major-version digits following `Chrome/` in a UA string.
/// Returns (start, end, parsed value) of the digit run.
fn find_version_token(ua: &str) -> Option<(usize, usize, u32)> {
    let marker = "Chrome/";
    let at = ua.find(marker)? + marker.len();
    let digits: String = ua[at..].chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let value: u32 = digits.parse().ok()?;
    Some((at, at + digits.len(), value))
}

fn pick_weighted<'a, R: Rng>(rng: &mut R, items: &'a [Blueprint]) -> &'a Blueprint {
    let total: u32 = items.iter().map(|b| b.market_share_weight).sum();
    let mut r = rng.gen_range(0..total);
    for item in items {
        if r < item.market_share_weight {
            return item;
        }
        r -= item.market_share_weight;
    }
    &items[0]
}

/// RFC 4122 v4 identifier from the supplied RNG.
pub fn uuid_v4<R: Rng>(rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    format!(
        "{}-{}-{}-{}-{}",
        hex::encode(&bytes[0..4]),
        hex::encode(&bytes[4..6]),
        hex::encode(&bytes[6..8]),
        hex::encode(&bytes[8..10]),
        hex::encode(&bytes[10..16]),
    )
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn generated_persona_is_coherent() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let p = PersonaGenerator::generate_with_rng(&mut rng);
            let bp = BLUEPRINTS
                .iter()
                .find(|b| b.id == p.blueprint_id)
                .expect("blueprint exists");
            assert_eq!(p.navigator.platform, bp.platform);
            assert!(bp
                .gpu_pairs
                .iter()
                .any(|g| g.vendor == p.webgl.vendor && g.renderer == p.webgl.renderer));
            assert!(bp
                .resolutions
                .iter()
                .any(|r| r.width == p.screen.width && r.height == p.screen.height));
            assert!(bp
                .hardware_concurrency_options
                .contains(&p.navigator.hardware_concurrency));
            assert!(p.navigator.user_agent.contains("Chrome/12"));
            assert!(!p.navigator.user_agent.contains("{version}"));
        }
    }

    #[test]
    fn ids_and_seeds_are_distinct() {
        let mut rng = StdRng::seed_from_u64(11);
        let a = PersonaGenerator::generate_with_rng(&mut rng);
        let b = PersonaGenerator::generate_with_rng(&mut rng);
        assert_ne!(a.id, b.id);
        assert_ne!(a.seed, b.seed);
        assert_ne!(a.id, a.seed);
    }

    #[test]
    fn uuid_shape() {
        let mut rng = StdRng::seed_from_u64(3);
        let id = uuid_v4(&mut rng);
        assert_eq!(id.len(), 36);
        assert_eq!(id.as_bytes()[14], b'4');
        let variant = id.as_bytes()[19];
        assert!(matches!(variant, b'8' | b'9' | b'a' | b'b'));
    }

    #[test]
    fn evolve_bumps_version_and_keeps_seed() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut p = PersonaGenerator::generate_with_rng(&mut rng);
        let seed_before = p.seed.clone();
        let (_, _, ver_before) = find_version_token(&p.navigator.user_agent).unwrap();

        let outcome = PersonaGenerator::evolve(&mut p);
        assert_eq!(
            outcome,
            Evolved::VersionBumped {
                from: ver_before,
                to: ver_before + 1
            }
        );
        assert_eq!(p.seed, seed_before);
        assert!(p
            .navigator
            .user_agent
            .contains(&format!("Chrome/{}.0.0.0", ver_before + 1)));
    }

    #[test]
    fn evolve_without_token_is_explicit_noop() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut p = PersonaGenerator::generate_with_rng(&mut rng);
        p.navigator.user_agent = "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101".to_string();
        let ua_before = p.navigator.user_agent.clone();

        assert_eq!(PersonaGenerator::evolve(&mut p), Evolved::NoVersionToken);
        assert_eq!(p.navigator.user_agent, ua_before);
    }

    #[test]
    fn weighted_pick_covers_all_blueprints() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(PersonaGenerator::generate_with_rng(&mut rng).blueprint_id);
        }
        assert_eq!(seen.len(), BLUEPRINTS.len());
    }
}
