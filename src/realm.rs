//! Per-realm execution context.
//!
//! Each realm (top frame, child frame, worker) owns exactly one
//! [`RealmContext`]: the live identity cache, the telemetry logger and
//! the boot configuration, passed explicitly to every hook installer
//! instead of floating as ambient globals. A JSON snapshot of the cache
//! is additionally mirrored into the `__VEIL_CACHE__` global slot and
//! `sessionStorage` so same-origin children and same-session reloads can
//! recover it without a round trip.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Reflect;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::console;

use crate::config::RunConfig;
use crate::persona::uuid_v4;
use crate::seed::IdentityCache;
use crate::telemetry::{
    EventScope, FrameType, RealmInfo, TelemetryLogger, TelemetrySink,
};

/// Global slot the loader writes the run configuration into.
pub const CONFIG_SLOT: &str = "__VEIL_CONFIG__";
/// Global slot mirroring the active identity cache.
pub const CACHE_SLOT: &str = "__VEIL_CACHE__";
/// Realm-level single-shot installation marker.
pub const INSTALL_MARKER: &str = "__VEIL_INSTALLED__";
/// `sessionStorage` key for same-session identity recovery.
pub const SESSION_CACHE_KEY: &str = "__VEIL_CACHE__";
/// Broadcast message tag carrying an identity update payload.
pub const UPDATE_MESSAGE_TYPE: &str = "VEIL_UPDATE";

thread_local! {
    static CURRENT: RefCell<Option<Rc<RealmContext>>> = const { RefCell::new(None) };
}

pub struct RealmContext {
    pub config: RunConfig,
    pub identity: RefCell<IdentityCache>,
    pub telemetry: TelemetryLogger,
}

impl RealmContext {
    /// Build the realm's context and register it as current.
    pub fn activate(config: RunConfig, identity: IdentityCache) -> Rc<RealmContext> {
        let info = detect_realm_info();
        let scope = event_scope(&config, &identity);
        let ctx = Rc::new(RealmContext {
            config,
            identity: RefCell::new(identity),
            telemetry: TelemetryLogger::new(info, scope, Box::new(ConsoleSink)),
        });
        mirror_cache(&ctx.identity.borrow());
        CURRENT.with(|c| *c.borrow_mut() = Some(ctx.clone()));
        ctx
    }

    pub fn current() -> Option<Rc<RealmContext>> {
        CURRENT.with(|c| c.borrow().clone())
    }

    /// Idempotent overwrite on rotation or broadcast update: the cache,
    /// its global mirror, the session store and the telemetry scope all
    /// move together.
    pub fn set_identity(&self, cache: IdentityCache) {
        self.telemetry.update_scope(event_scope(&self.config, &cache));
        mirror_cache(&cache);
        *self.identity.borrow_mut() = cache;
        self.telemetry.system_event("identity_update");
    }
}

fn event_scope(config: &RunConfig, cache: &IdentityCache) -> EventScope {
    EventScope {
        run_id: config.run_id.clone(),
        site_visit_id: config.site_visit_id.clone(),
        persona_id: cache.persona_id.clone(),
        epoch_id: cache.epoch_id,
        mode: cache.mode,
        top_level_site: config.top_level_site.clone(),
    }
}

/// Console + best-effort `postMessage` sink. Works identically from
/// window and worker realms.
pub struct ConsoleSink;

impl TelemetrySink for ConsoleSink {
    fn emit(&self, line: &str) {
        console::log_1(&JsValue::from_str(line));
        let global = js_sys::global();
        if let Ok(post) = Reflect::get(&global, &JsValue::from_str("postMessage")) {
            if let Some(post) = post.dyn_ref::<js_sys::Function>() {
                let msg = JsValue::from_str(line);
                // Window postMessage wants a target origin; worker scope
                // takes the message alone.
                let sent = if Reflect::has(&global, &JsValue::from_str("document")).unwrap_or(false)
                {
                    post.call2(&global, &msg, &JsValue::from_str("*"))
                } else {
                    post.call1(&global, &msg)
                };
                let _ = sent;
            }
        }
    }
}

/// Classify the current realm and record where it sits in the frame
/// tree. Any access failure is treated as "cross-origin, iframe" — the
/// conservative reading.
pub fn detect_realm_info() -> RealmInfo {
    let global = js_sys::global();
    let frame_type = detect_frame_type(&global);
    RealmInfo {
        frame_type,
        frame_id: uuid_v4(&mut rand::thread_rng()),
        full_origin: location_href(&global),
        is_cross_origin: frame_type == FrameType::Iframe && is_cross_origin_frame(&global),
    }
}

fn detect_frame_type(global: &JsValue) -> FrameType {
    let ctor_name = Reflect::get(global, &JsValue::from_str("constructor"))
        .and_then(|c| Reflect::get(&c, &JsValue::from_str("name")))
        .ok()
        .and_then(|n| n.as_string())
        .unwrap_or_default();

    if ctor_name.contains("SharedWorkerGlobalScope") {
        return FrameType::SharedWorker;
    }
    if ctor_name.contains("ServiceWorkerGlobalScope") {
        return FrameType::ServiceWorker;
    }
    if ctor_name.contains("WorkerGlobalScope") {
        return FrameType::Worker;
    }

    let top = Reflect::get(global, &JsValue::from_str("top")).unwrap_or(JsValue::UNDEFINED);
    let slf = Reflect::get(global, &JsValue::from_str("self")).unwrap_or(JsValue::NULL);
    if js_sys::Object::is(&top, &slf) {
        FrameType::Top
    } else {
        FrameType::Iframe
    }
}

fn is_cross_origin_frame(global: &JsValue) -> bool {
    let origin_of = |scope: &JsValue| -> Option<String> {
        Reflect::get(scope, &JsValue::from_str("location"))
            .and_then(|l| Reflect::get(&l, &JsValue::from_str("origin")))
            .ok()
            .and_then(|o| o.as_string())
    };
    let parent = match Reflect::get(global, &JsValue::from_str("parent")) {
        Ok(p) => p,
        Err(_) => return true,
    };
    match (origin_of(&parent), origin_of(global)) {
        (Some(a), Some(b)) => a != b,
        _ => true,
    }
}

fn location_href(global: &JsValue) -> String {
    Reflect::get(global, &JsValue::from_str("location"))
        .and_then(|l| Reflect::get(&l, &JsValue::from_str("href")))
        .ok()
        .and_then(|h| h.as_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Origin of the current realm, for policy keying.
pub fn current_origin() -> String {
    let global = js_sys::global();
    Reflect::get(&global, &JsValue::from_str("location"))
        .and_then(|l| Reflect::get(&l, &JsValue::from_str("origin")))
        .ok()
        .and_then(|o| o.as_string())
        .unwrap_or_default()
}

/// Read the run configuration from the `__VEIL_CONFIG__` slot. Missing
/// or malformed objects yield the all-defaults (disabled) config.
pub fn read_config_from_global() -> RunConfig {
    let global = js_sys::global();
    match Reflect::get(&global, &JsValue::from_str(CONFIG_SLOT)) {
        Ok(v) if !v.is_undefined() && !v.is_null() => serde_wasm_bindgen::from_value(v)
            .unwrap_or_else(|e| {
                log::warn!("malformed {}: {} — running disabled", CONFIG_SLOT, e);
                RunConfig::default()
            }),
        _ => RunConfig::default(),
    }
}

/// Mirror the cache into the global slot (as a live JS object) and the
/// session store (as JSON). Either half failing is non-fatal.
pub fn mirror_cache(cache: &IdentityCache) {
    let global = js_sys::global();
    if let Ok(js) = serde_wasm_bindgen::to_value(cache) {
        let _ = Reflect::set(&global, &JsValue::from_str(CACHE_SLOT), &js);
    }
    if let Ok(json) = serde_json::to_string(cache) {
        if let Some(storage) = session_storage() {
            let _ = storage.set_item(SESSION_CACHE_KEY, &json);
        }
    }
}

/// Same-session identity recovery after a reload.
pub fn recover_session_cache() -> Option<IdentityCache> {
    let json = session_storage()?.get_item(SESSION_CACHE_KEY).ok()??;
    serde_json::from_str(&json).ok()
}

pub fn clear_session_cache() {
    if let Some(storage) = session_storage() {
        let _ = storage.remove_item(SESSION_CACHE_KEY);
    }
}

fn session_storage() -> Option<web_sys::Storage> {
    web_sys::window().and_then(|w| w.session_storage().ok().flatten())
}

/// Millisecond timer for hook timing. `web-time` maps this to
/// `performance.now()` under WASM.
pub fn timer_start() -> web_time::Instant {
    web_time::Instant::now()
}

pub fn timer_elapsed_ms(start: &web_time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
