//! WebRTC interception: ICE candidate filtering.
//!
//! The `RTCPeerConnection` constructor is wrapped with a construct trap;
//! every instance gets its `icecandidate` delivery filtered. Candidates
//! that expose a server-reflexive (public) address are always dropped
//! under an active posture; privacy mode drops host candidates too,
//! compat drops only obviously-private host addresses. Disabled mode
//! passes everything through.

use std::rc::Rc;

use js_sys::{Array, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::{
    call_function, define_accessor, define_value, is_wrapped, js_error_string, proxy_with_apply,
    proxy_with_construct, stealth,
};
use crate::config::Mode;
use crate::realm::{timer_elapsed_ms, timer_start, RealmContext};

const RAW_HANDLER_SLOT: &str = "__veil_onicecandidate__";

pub fn install(realm: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    let ctor = Reflect::get(realm, &JsValue::from_str("RTCPeerConnection"))?;
    if !ctor.is_function() || is_wrapped(&ctor) {
        return Ok(());
    }

    let ctx_trap = ctx.clone();
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, args: JsValue, _new_target: JsValue| -> Result<JsValue, JsValue> {
            let start = timer_start();
            let args_arr: &Array = args.unchecked_ref();
            let pc = match Reflect::construct(target.unchecked_ref::<js_sys::Function>(), args_arr) {
                Ok(pc) => pc,
                Err(e) => {
                    ctx_trap.telemetry.api_call(
                        "WebRTC",
                        "RTCPeerConnection",
                        None,
                        Some(js_error_string(&e)),
                        timer_elapsed_ms(&start),
                    );
                    return Err(e);
                }
            };
            if let Err(e) = guard_ice_candidates(&pc, &ctx_trap) {
                log::warn!("ICE candidate guard not attached: {:?}", e);
            }
            ctx_trap.telemetry.api_call(
                "WebRTC",
                "RTCPeerConnection",
                None,
                None,
                timer_elapsed_ms(&start),
            );
            Ok(pc)
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);

    let wrapped = proxy_with_construct(&ctor, trap)?;
    stealth::register_disguise(&wrapped, &ctor);
    define_value(realm, "RTCPeerConnection", &wrapped, false)?;
    mark(&wrapped);

    // Vendor-prefixed aliases follow the wrapped constructor.
    for alias in ["webkitRTCPeerConnection", "mozRTCPeerConnection"] {
        let existing = Reflect::get(realm, &JsValue::from_str(alias))?;
        if existing.is_function() {
            let _ = Reflect::set(realm, &JsValue::from_str(alias), &wrapped);
        }
    }
    Ok(())
}

fn mark(f: &JsValue) {
    let _ = define_value(f, "__veil_wrapped__", &JsValue::TRUE, false);
}

/// Filter `icecandidate` delivery on one peer connection: both the
/// `addEventListener` path and the `onicecandidate` property path.
fn guard_ice_candidates(pc: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    let native_ael = Reflect::get(pc, &JsValue::from_str("addEventListener"))?;
    if !native_ael.is_function() {
        return Ok(());
    }

    // addEventListener: wrap icecandidate listeners in a filtering shim.
    let ctx_ael = ctx.clone();
    let native_for_trap = native_ael.clone();
    let ael_trap = Closure::wrap(Box::new(
        move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
            let args_arr: &Array = args.unchecked_ref();
            let event_type = args_arr.get(0).as_string().unwrap_or_default();
            if event_type != "icecandidate" {
                return call_function(&target, &this_arg, &args);
            }
            let listener = args_arr.get(1);
            if !listener.is_function() {
                return call_function(&target, &this_arg, &args);
            }
            let wrapped = filtering_listener(listener, ctx_ael.clone());
            let forwarded = Array::new();
            forwarded.push(&args_arr.get(0));
            forwarded.push(&wrapped);
            for i in 2..args_arr.length() {
                forwarded.push(&args_arr.get(i));
            }
            call_function(&native_for_trap, &this_arg, &forwarded.into())
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
    let wrapped_ael = proxy_with_apply(&native_ael, ael_trap)?;
    stealth::register_disguise(&wrapped_ael, &native_ael);
    define_value(pc, "addEventListener", &wrapped_ael, false)?;

    // onicecandidate: setter registers a filtered listener, getter
    // returns whatever the page assigned.
    let pc_for_set = pc.clone();
    let ctx_set = ctx.clone();
    let native_for_set = native_ael.clone();
    let setter = Closure::wrap(Box::new(move |handler: JsValue| {
        let _ = Reflect::set(
            &pc_for_set,
            &JsValue::from_str(RAW_HANDLER_SLOT),
            &handler,
        );
        if !handler.is_function() {
            return;
        }
        let wrapped = filtering_listener(handler, ctx_set.clone());
        let _ = call_function(
            &native_for_set,
            &pc_for_set,
            &Array::of2(&JsValue::from_str("icecandidate"), &wrapped).into(),
        );
    }) as Box<dyn FnMut(JsValue)>);

    let pc_for_get = pc.clone();
    let getter = Closure::wrap(Box::new(move || -> JsValue {
        Reflect::get(&pc_for_get, &JsValue::from_str(RAW_HANDLER_SLOT))
            .unwrap_or(JsValue::NULL)
    }) as Box<dyn FnMut() -> JsValue>);

    define_accessor(pc, "onicecandidate", getter.as_ref(), setter.as_ref())?;
    getter.forget();
    setter.forget();
    Ok(())
}

/// Wrap a page listener so filtered candidates never reach it.
fn filtering_listener(listener: JsValue, ctx: Rc<RealmContext>) -> JsValue {
    let shim = Closure::wrap(Box::new(move |event: JsValue| {
        let candidate_str = Reflect::get(&event, &JsValue::from_str("candidate"))
            .ok()
            .filter(|c| !c.is_null() && !c.is_undefined())
            .and_then(|c| {
                Reflect::get(&c, &JsValue::from_str("candidate"))
                    .ok()
                    .and_then(|s| s.as_string())
            });
        if let Some(cand) = &candidate_str {
            let mode = ctx.identity.borrow().mode;
            if !is_safe_candidate(cand, mode) {
                ctx.telemetry
                    .api_call("WebRTC", "icecandidate_blocked", None, None, 0.0);
                let _ = stop_propagation(&event);
                return;
            }
        }
        let this = Reflect::get(&event, &JsValue::from_str("currentTarget"))
            .unwrap_or(JsValue::NULL);
        let f: &js_sys::Function = listener.unchecked_ref();
        let _ = f.call1(&this, &event);
    }) as Box<dyn FnMut(JsValue)>);
    let js = shim.as_ref().clone();
    shim.forget();
    js
}

fn stop_propagation(event: &JsValue) -> Result<(), JsValue> {
    for method in ["stopImmediatePropagation", "stopPropagation"] {
        let f = Reflect::get(event, &JsValue::from_str(method))?;
        if f.is_function() {
            let f: &js_sys::Function = f.unchecked_ref();
            let _ = f.call0(event);
        }
    }
    Ok(())
}

/// Candidate admission per posture. End-of-candidates (null) events are
/// always delivered.
pub fn is_safe_candidate(candidate: &str, mode: Mode) -> bool {
    if mode == Mode::Disabled {
        return true;
    }
    // Server-reflexive candidates carry the public IP.
    if candidate.contains("typ srflx") {
        return false;
    }
    if candidate.contains("typ host") {
        if mode == Mode::Privacy {
            return false;
        }
        // Compat blocks only clearly-private LAN addresses.
        if candidate.contains("192.168.") {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRFLX: &str = "candidate:842163049 1 udp 1677729535 203.0.113.7 54400 typ srflx raddr 192.168.1.4 rport 54400";
    const HOST_LAN: &str = "candidate:2999745851 1 udp 2122260223 192.168.1.4 54400 typ host";
    const HOST_MDNS: &str =
        "candidate:1510613869 1 udp 2122260223 f2f0a133-b17f-4bf1-931b-2a9d6d96a661.local 54400 typ host";
    const RELAY: &str =
        "candidate:3098175849 1 udp 41885695 198.51.100.3 61025 typ relay raddr 0.0.0.0 rport 0";

    #[test]
    fn srflx_blocked_under_any_active_posture() {
        assert!(!is_safe_candidate(SRFLX, Mode::Privacy));
        assert!(!is_safe_candidate(SRFLX, Mode::Compat));
        assert!(is_safe_candidate(SRFLX, Mode::Disabled));
    }

    #[test]
    fn privacy_blocks_all_host_candidates() {
        assert!(!is_safe_candidate(HOST_LAN, Mode::Privacy));
        assert!(!is_safe_candidate(HOST_MDNS, Mode::Privacy));
    }

    #[test]
    fn compat_blocks_only_private_hosts() {
        assert!(!is_safe_candidate(HOST_LAN, Mode::Compat));
        assert!(is_safe_candidate(HOST_MDNS, Mode::Compat));
    }

    #[test]
    fn relay_candidates_always_pass() {
        assert!(is_safe_candidate(RELAY, Mode::Privacy));
        assert!(is_safe_candidate(RELAY, Mode::Compat));
        assert!(is_safe_candidate(RELAY, Mode::Disabled));
    }
}
