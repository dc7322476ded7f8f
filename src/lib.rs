//! # persona-veil
//!
//! Browser identity obfuscation layer compiled to WebAssembly.
//!
//! Intercepts a page's calls into fingerprinting-relevant surfaces
//! (2D canvas, WebGL, audio buffers, navigator/screen, WebRTC ICE) and
//! returns perturbed or spoofed values that stay internally coherent,
//! stable within a controlled scope (same site, same day) and unlinkable
//! across scopes under a stronger privacy posture. Every intercepted
//! call emits a clean/spoofed/stimulus hash triple so spoofing
//! correctness and drift can be verified offline.
//!
//! ## Architecture
//!
//! ```text
//! Policy Store ──> Persona ──> Seed Derivation ──> Identity Cache
//!                                                      │
//!                            ┌─────────────────────────┤
//!                            ▼                         ▼
//!                      Hook Installer            Propagation
//!                   (per-surface wrappers)   (frames / workers /
//!                            │                  broadcast)
//!                            ▼
//!                  Noise Engine + Telemetry
//! ```
//!
//! The loader (content script, extension glue — out of scope) writes a
//! configuration object into `__VEIL_CONFIG__` and calls [`boot`]; the
//! telemetry stream comes back as `__VEIL_TELEM__:`-prefixed JSON lines
//! on the console channel.

use wasm_bindgen::prelude::*;

pub mod blueprints;
pub mod config;
pub mod error;
pub mod hashing;
pub mod hooks;
pub mod noise;
pub mod persona;
pub mod policy;
pub mod propagation;
pub mod realm;
pub mod seed;
pub mod telemetry;

pub use config::{Mode, RunConfig};
pub use error::{Result, VeilError};
pub use hashing::HashTriple;
pub use persona::{Evolved, Persona, PersonaGenerator};
pub use policy::{PolicyCore, PolicyDecision, PolicyStore};
pub use seed::{derive_working_seed, IdentityCache};
pub use telemetry::{TelemetryEvent, TelemetryLogger, TELEMETRY_PREFIX};

use serde::Serialize;

use crate::realm::RealmContext;

#[wasm_bindgen(start)]
pub fn start() {
    console_log::init_with_level(log::Level::Info).unwrap();
}

/// What [`boot`] reports back to the loader.
#[derive(Serialize)]
struct BootSummary {
    installed: Vec<String>,
    noise_active: bool,
    mode: Mode,
    persona_id: Option<String>,
    frame_type: String,
}

/// Boot the engine in the current realm.
///
/// Reads the run configuration from `options` (or, when absent, from the
/// `__VEIL_CONFIG__` global slot), resolves the identity — explicit
/// experiment configuration first, then same-session recovery, then the
/// per-origin policy store — installs every hook into this realm and
/// starts cross-realm propagation. Safe to call more than once; repeated
/// injection is a no-op.
#[wasm_bindgen]
pub fn boot(options: JsValue) -> std::result::Result<JsValue, JsValue> {
    // Repeated injection re-uses the live context: the hook closures
    // hold it, so replacing it would orphan them from later rotations.
    if let Some(existing) = RealmContext::current() {
        return boot_summary(&existing);
    }

    let config: RunConfig = if options.is_undefined() || options.is_null() {
        realm::read_config_from_global()
    } else {
        serde_wasm_bindgen::from_value(options).unwrap_or_else(|e| {
            log::warn!("malformed boot options: {} — running disabled", e);
            RunConfig::default()
        })
    };

    let identity = resolve_identity(&config);
    log::info!(
        "🎭 booting: mode={} persona={} seed_active={}",
        identity.mode.as_str(),
        identity.persona_id.as_deref().unwrap_or("unknown"),
        identity.noise_active()
    );

    let ctx = RealmContext::activate(config, identity);
    let realm_global: JsValue = js_sys::global().into();
    hooks::install_into(&realm_global, &ctx)?;
    propagation::start(&realm_global, &ctx);

    boot_summary(&ctx)
}

fn boot_summary(ctx: &std::rc::Rc<RealmContext>) -> std::result::Result<JsValue, JsValue> {
    let identity = ctx.identity.borrow();
    let summary = BootSummary {
        installed: hooks::installed_hooks()
            .into_iter()
            .map(|h| format!("{}.{}", h.surface, h.api))
            .collect(),
        noise_active: identity.noise_active(),
        mode: identity.mode,
        persona_id: identity.persona_id.clone(),
        frame_type: realm::detect_realm_info().frame_type.as_str().to_string(),
    };
    serde_wasm_bindgen::to_value(&summary).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// User-triggered identity shift for the current origin: a replacement
/// persona bypassing the daily-stability rule, applied locally and
/// broadcast to every realm on this window.
#[wasm_bindgen]
pub fn rotate_identity() -> std::result::Result<JsValue, JsValue> {
    let ctx = RealmContext::current()
        .ok_or_else(|| JsValue::from_str("engine not booted in this realm"))?;

    let origin = realm::current_origin();
    let mut store = PolicyStore::load();
    let (persona, decision) = store.rotate_for(&origin);
    log::info!("🔄 identity shifted for {} ({:?})", origin, decision);

    realm::clear_session_cache();
    let cache = IdentityCache::from_persona(&ctx.config, &persona);
    ctx.set_identity(cache.clone());
    if let Err(e) = propagation::broadcast::broadcast_update(&cache) {
        log::warn!("rotation broadcast failed: {:?}", e);
    }
    serde_wasm_bindgen::to_value(&persona).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Simulate a software update for the current origin's persona: the UA
/// version bumps, the identity seed (and noise fingerprint) stays.
#[wasm_bindgen]
pub fn evolve_identity() -> std::result::Result<JsValue, JsValue> {
    let ctx = RealmContext::current()
        .ok_or_else(|| JsValue::from_str("engine not booted in this realm"))?;

    let origin = realm::current_origin();
    let mut store = PolicyStore::load();
    let Some((persona, outcome)) = store.evolve_for(&origin) else {
        return Err(JsValue::from_str("no stored persona for this origin"));
    };
    match outcome {
        Evolved::VersionBumped { from, to } => {
            log::info!("🎭 persona {} evolved: {} -> {}", persona.id, from, to)
        }
        Evolved::NoVersionToken => {
            log::warn!("persona {} has no version token; left unchanged", persona.id)
        }
    }

    let cache = IdentityCache::from_persona(&ctx.config, &persona);
    ctx.set_identity(cache.clone());
    if let Err(e) = propagation::broadcast::broadcast_update(&cache) {
        log::warn!("evolve broadcast failed: {:?}", e);
    }
    serde_wasm_bindgen::to_value(&persona).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Snapshot of the identity currently active in this realm.
#[wasm_bindgen]
pub fn active_identity() -> JsValue {
    match RealmContext::current() {
        Some(ctx) => {
            serde_wasm_bindgen::to_value(&*ctx.identity.borrow()).unwrap_or(JsValue::UNDEFINED)
        }
        None => JsValue::UNDEFINED,
    }
}

/// Factory reset of the per-origin policy map.
#[wasm_bindgen]
pub fn clear_policies() {
    PolicyStore::load().clear_all();
    log::info!("policy map cleared");
}

/// Identity resolution order: explicit experiment configuration, then
/// same-session recovery, then the per-origin policy store. Disabled
/// mode never consults the policy store — pass-through monitoring
/// reports the true device.
fn resolve_identity(config: &RunConfig) -> IdentityCache {
    if config.persona_id.is_some() || config.seed.is_some() {
        return IdentityCache::from_config(config);
    }
    if config.mode == Mode::Disabled {
        return IdentityCache::from_config(config);
    }
    if let Some(recovered) = realm::recover_session_cache() {
        log::info!("identity recovered from session store");
        return recovered;
    }

    let origin = realm::current_origin();
    if origin.is_empty() {
        return IdentityCache::from_config(config);
    }
    let mut store = PolicyStore::load();
    let (persona, decision) = store.persona_for(&origin);
    log::info!("policy decision for {}: {:?}", origin, decision);
    IdentityCache::from_persona(config, &persona)
}
