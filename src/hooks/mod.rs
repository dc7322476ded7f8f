//! Hook installation: central interception routine and per-surface
//! wrappers.
//!
//! Each wrapper follows the same contract: time the call, invoke the
//! original, apply the relevant noise algorithm when a seed is active,
//! log one telemetry event, return the (possibly modified) result — and
//! on any internal failure, return the clean result instead of throwing
//! into page code. Replacements are installed via `Proxy` apply traps so
//! `name`/`length` forward to the original for free, with property
//! redefinition that preserves the original descriptor's enumerability
//! and stays configurable.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Array, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::realm::{RealmContext, CACHE_SLOT, INSTALL_MARKER};
use crate::telemetry::EvasionVector;

pub mod audio;
pub mod canvas;
pub mod navigator;
pub mod stealth;
pub mod webgl;
pub mod webrtc;

/// Marker property identifying an installed wrapper; the re-install
/// check that keeps every hook single-shot.
const WRAP_MARKER: &str = "__veil_wrapped__";

/// One row of the interception table: which (surface, api) pairs were
/// actually wrapped in this realm.
#[derive(Debug, Clone)]
pub struct HookRecord {
    pub surface: &'static str,
    pub api: String,
}

thread_local! {
    static REGISTRY: RefCell<Vec<HookRecord>> = const { RefCell::new(Vec::new()) };
}

pub fn installed_hooks() -> Vec<HookRecord> {
    REGISTRY.with(|r| r.borrow().clone())
}

/// Install every capability hook into the given realm's globals.
/// Idempotent: the realm-level marker makes repeated injection a no-op,
/// and each individual hook refuses to wrap an existing wrapper.
/// Individual surface failures are logged and skipped — never fatal.
pub fn install_into(realm: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    if Reflect::get(realm, &JsValue::from_str(INSTALL_MARKER))
        .map(|v| v.is_truthy())
        .unwrap_or(false)
    {
        return Ok(());
    }
    let _ = Reflect::set(realm, &JsValue::from_str(INSTALL_MARKER), &JsValue::TRUE);

    // Replicate the identity snapshot into this realm's global slot so
    // scripts (and nested bootstraps) can read it locally.
    if let Ok(snapshot) = serde_wasm_bindgen::to_value(&*ctx.identity.borrow()) {
        let _ = Reflect::set(realm, &JsValue::from_str(CACHE_SLOT), &snapshot);
    }

    ctx.telemetry.system_event("init");
    evasion_self_check(realm, ctx);

    if let Err(e) = stealth::install_tostring_guard(realm) {
        // Weaker stealth, never a crash.
        log::warn!("toString guard not installed: {:?}", e);
    }

    let surfaces: &[(&str, fn(&JsValue, &Rc<RealmContext>) -> Result<(), JsValue>)] = &[
        ("canvas", canvas::install),
        ("webgl", webgl::install),
        ("audio", audio::install),
        ("navigator", navigator::install),
        ("webrtc", webrtc::install),
    ];
    for (name, install) in surfaces {
        if let Err(e) = install(realm, ctx) {
            log::warn!("{} hooks skipped: {:?}", name, e);
            ctx.telemetry.system_event(&format!("install_skipped_{}", name));
        }
    }

    install_breakage_monitor(realm, ctx);
    Ok(())
}

/// Structured anti-evasion self-check, logged once per realm before the
/// guard is installed: does introspection still look native here?
fn evasion_self_check(realm: &JsValue, ctx: &Rc<RealmContext>) {
    let check = || -> Result<(bool, bool), JsValue> {
        let function_ctor = Reflect::get(realm, &JsValue::from_str("Function"))?;
        let proto = Reflect::get(&function_ctor, &JsValue::from_str("prototype"))?;
        let tostring = Reflect::get(&proto, &JsValue::from_str("toString"))?;
        let reported = call_function(&tostring, &tostring, &Array::new().into())?
            .as_string()
            .unwrap_or_default();
        let tostring_ok = reported == "function toString() { [native code] }";

        let desc = Object::get_own_property_descriptor(
            proto.unchecked_ref::<Object>(),
            &JsValue::from_str("toString"),
        );
        let descriptor_ok = !desc.is_undefined();
        Ok((tostring_ok, descriptor_ok))
    };
    if let Ok((tostring_ok, descriptor_ok)) = check() {
        ctx.telemetry.evasion_result(vec![
            EvasionVector {
                name: "tostring_integrity".to_string(),
                pass: tostring_ok,
                score: tostring_ok as u8,
            },
            EvasionVector {
                name: "descriptor_integrity".to_string(),
                pass: descriptor_ok,
                score: descriptor_ok as u8,
            },
        ]);
    }
}

/// Capture page errors that may be caused by the injection itself.
fn install_breakage_monitor(realm: &JsValue, ctx: &Rc<RealmContext>) {
    let listen = |event_type: &str, api: &'static str, ctx: Rc<RealmContext>| {
        let handler = Closure::wrap(Box::new(move |event: JsValue| {
            let message = Reflect::get(&event, &JsValue::from_str("message"))
                .ok()
                .and_then(|m| m.as_string())
                .or_else(|| {
                    Reflect::get(&event, &JsValue::from_str("reason"))
                        .ok()
                        .map(|r| format!("{:?}", r))
                })
                .unwrap_or_else(|| "script error".to_string());
            ctx.telemetry
                .api_call("Breakage", api, None, Some(message), 0.0);
        }) as Box<dyn FnMut(JsValue)>);

        let added = add_event_listener(&js_sys::global().into(), event_type, handler.as_ref());
        if added.is_ok() {
            handler.forget();
        }
    };
    listen("error", "error", ctx.clone());
    listen("unhandledrejection", "rejection", ctx.clone());

    if let Ok(document) = Reflect::get(realm, &JsValue::from_str("document")) {
        if !document.is_undefined() && !document.is_null() {
            let ctx = ctx.clone();
            let handler = Closure::wrap(Box::new(move |event: JsValue| {
                let directive = Reflect::get(&event, &JsValue::from_str("violatedDirective"))
                    .ok()
                    .and_then(|d| d.as_string())
                    .unwrap_or_default();
                let blocked = Reflect::get(&event, &JsValue::from_str("blockedURI"))
                    .ok()
                    .and_then(|b| b.as_string())
                    .unwrap_or_default();
                ctx.telemetry.api_call(
                    "Breakage",
                    "csp",
                    None,
                    Some(format!("CSP: {} blocked {}", directive, blocked)),
                    0.0,
                );
            }) as Box<dyn FnMut(JsValue)>);
            if add_event_listener(&document, "securitypolicyviolation", handler.as_ref()).is_ok() {
                handler.forget();
            }
        }
    }
}

// ---------------------------------------------------------------------
// Interception plumbing
// ---------------------------------------------------------------------

/// Wrap `proto[api]` with an apply-trap Proxy built from `trap`,
/// preserving descriptor metadata and registering the disguise. Skips
/// silently (with a log note) when the method is absent, and refuses to
/// wrap an already-wrapped method.
pub fn safe_hook_method(
    proto: &JsValue,
    api: &str,
    surface: &'static str,
    trap: Closure<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>,
) -> Result<(), JsValue> {
    let original = Reflect::get(proto, &JsValue::from_str(api))?;
    if !original.is_function() {
        log::debug!("{}.{} absent, hook skipped", surface, api);
        return Ok(());
    }
    if is_wrapped(&original) {
        return Ok(());
    }

    let wrapper = proxy_with_apply(&original, trap)?;
    stealth::register_disguise(&wrapper, &original);
    mark_wrapped(&wrapper);

    let enumerable = descriptor_enumerable(proto, api).unwrap_or(true);
    define_value(proto, api, &wrapper, enumerable)?;

    REGISTRY.with(|r| {
        r.borrow_mut().push(HookRecord {
            surface,
            api: api.to_string(),
        })
    });
    Ok(())
}

/// Replace a property with a getter, disguising it as the original
/// getter when one exists.
pub fn hook_getter(
    proto: &JsValue,
    prop: &str,
    surface: &'static str,
    getter: Closure<dyn FnMut() -> JsValue>,
) -> Result<(), JsValue> {
    let desc = Object::get_own_property_descriptor(proto.unchecked_ref::<Object>(), &JsValue::from_str(prop));
    let mut enumerable = true;
    if !desc.is_undefined() {
        if let Ok(e) = Reflect::get(&desc, &JsValue::from_str("enumerable")) {
            enumerable = e.is_truthy();
        }
        if let Ok(orig_get) = Reflect::get(&desc, &JsValue::from_str("get")) {
            if orig_get.is_function() {
                if is_wrapped(&orig_get) {
                    return Ok(());
                }
                stealth::register_disguise(getter.as_ref(), &orig_get);
            }
        }
    }
    mark_wrapped(getter.as_ref());

    let descriptor = Object::new();
    Reflect::set(&descriptor, &JsValue::from_str("get"), getter.as_ref())?;
    Reflect::set(
        &descriptor,
        &JsValue::from_str("configurable"),
        &JsValue::TRUE,
    )?;
    Reflect::set(
        &descriptor,
        &JsValue::from_str("enumerable"),
        &JsValue::from_bool(enumerable),
    )?;
    Object::define_property(proto.unchecked_ref::<Object>(), &JsValue::from_str(prop), &descriptor);
    getter.forget();

    REGISTRY.with(|r| {
        r.borrow_mut().push(HookRecord {
            surface,
            api: prop.to_string(),
        })
    });
    Ok(())
}

/// Define `{get, set}` on an object, configurable and non-enumerable.
pub fn define_accessor(
    obj: &JsValue,
    prop: &str,
    getter: &JsValue,
    setter: &JsValue,
) -> Result<(), JsValue> {
    let descriptor = Object::new();
    Reflect::set(&descriptor, &JsValue::from_str("get"), getter)?;
    Reflect::set(&descriptor, &JsValue::from_str("set"), setter)?;
    Reflect::set(
        &descriptor,
        &JsValue::from_str("configurable"),
        &JsValue::TRUE,
    )?;
    Object::define_property(obj.unchecked_ref::<Object>(), &JsValue::from_str(prop), &descriptor);
    Ok(())
}

/// Define a data property with explicit enumerability; always writable
/// and configurable so later installers (or the page) see a live-looking
/// descriptor.
pub fn define_value(
    obj: &JsValue,
    prop: &str,
    value: &JsValue,
    enumerable: bool,
) -> Result<(), JsValue> {
    let descriptor = Object::new();
    Reflect::set(&descriptor, &JsValue::from_str("value"), value)?;
    Reflect::set(&descriptor, &JsValue::from_str("writable"), &JsValue::TRUE)?;
    Reflect::set(
        &descriptor,
        &JsValue::from_str("configurable"),
        &JsValue::TRUE,
    )?;
    Reflect::set(
        &descriptor,
        &JsValue::from_str("enumerable"),
        &JsValue::from_bool(enumerable),
    )?;
    Object::define_property(obj.unchecked_ref::<Object>(), &JsValue::from_str(prop), &descriptor);
    Ok(())
}

pub fn is_wrapped(f: &JsValue) -> bool {
    Reflect::get(f, &JsValue::from_str(WRAP_MARKER))
        .map(|v| v.is_truthy())
        .unwrap_or(false)
}

fn mark_wrapped(f: &JsValue) {
    let descriptor = Object::new();
    let _ = Reflect::set(&descriptor, &JsValue::from_str("value"), &JsValue::TRUE);
    Object::define_property(
        f.unchecked_ref::<Object>(),
        &JsValue::from_str(WRAP_MARKER),
        &descriptor,
    );
}

fn descriptor_enumerable(proto: &JsValue, prop: &str) -> Option<bool> {
    let desc = Object::get_own_property_descriptor(proto.unchecked_ref::<Object>(), &JsValue::from_str(prop));
    if desc.is_undefined() {
        return None;
    }
    Reflect::get(&desc, &JsValue::from_str("enumerable"))
        .ok()
        .map(|e| e.is_truthy())
}

/// Look up a constructor's prototype on a specific realm's global.
pub fn get_prototype(realm: &JsValue, constructor_name: &str) -> Result<JsValue, JsValue> {
    let ctor = Reflect::get(realm, &JsValue::from_str(constructor_name))?;
    if ctor.is_undefined() || ctor.is_null() {
        return Ok(JsValue::UNDEFINED);
    }
    Reflect::get(&ctor, &JsValue::from_str("prototype"))
}

/// `Reflect.apply` with an argument list that may be any array-like.
pub fn call_function(func: &JsValue, this_arg: &JsValue, args: &JsValue) -> Result<JsValue, JsValue> {
    let func: &js_sys::Function = func.unchecked_ref();
    Reflect::apply(func, this_arg, args.unchecked_ref())
}

/// Proxy a target function with an `apply` trap.
pub fn proxy_with_apply(
    target: &JsValue,
    trap: Closure<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>,
) -> Result<JsValue, JsValue> {
    let handler = Object::new();
    Reflect::set(&handler, &JsValue::from_str("apply"), trap.as_ref())?;
    trap.forget();
    let proxy = js_sys::Proxy::new(target, &handler);
    Ok(proxy.into())
}

/// Proxy a constructor with a `construct` trap.
pub fn proxy_with_construct(
    target: &JsValue,
    trap: Closure<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>,
) -> Result<JsValue, JsValue> {
    let handler = Object::new();
    Reflect::set(&handler, &JsValue::from_str("construct"), trap.as_ref())?;
    trap.forget();
    let proxy = js_sys::Proxy::new(target, &handler);
    Ok(proxy.into())
}

/// `target.addEventListener(type, listener, capture)` via Reflect.
pub fn add_event_listener(
    target: &JsValue,
    event_type: &str,
    listener: &JsValue,
) -> Result<(), JsValue> {
    let ael = Reflect::get(target, &JsValue::from_str("addEventListener"))?;
    if !ael.is_function() {
        return Err(JsValue::from_str("no addEventListener"));
    }
    let ael: &js_sys::Function = ael.unchecked_ref();
    ael.call3(
        target,
        &JsValue::from_str(event_type),
        listener,
        &JsValue::TRUE,
    )?;
    Ok(())
}

/// Render a thrown JS value into a log-safe string.
pub fn js_error_string(e: &JsValue) -> String {
    if let Some(s) = e.as_string() {
        return s;
    }
    Reflect::get(e, &JsValue::from_str("message"))
        .ok()
        .and_then(|m| m.as_string())
        .unwrap_or_else(|| format!("{:?}", e))
}
