//! Anti-evasion: function-introspection disguise.
//!
//! One global override of `Function.prototype.toString`, backed by a
//! WeakMap association table mapping wrapper → the original function's
//! source string. The override special-cases itself: introspecting the
//! override returns the native `toString` string, as if untouched.
//! Unregistered functions fall through to the real `toString`, so the
//! observable behavior is byte-identical for everything we didn't wrap.

use js_sys::Reflect;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::{call_function, define_value, proxy_with_apply};

const NATIVE_TOSTRING_STR: &str = "function toString() { [native code] }";
const TOSTRING_MARKER: &str = "__VEIL_TOSTRING_HOOKED__";

thread_local! {
    static HOOK_MAP: js_sys::WeakMap = js_sys::WeakMap::new();
}

/// Associate `wrapper` with `original`'s source string, so introspection
/// of the wrapper reports the original.
pub fn register_disguise(wrapper: &JsValue, original: &JsValue) {
    let Some(original) = original.dyn_ref::<js_sys::Function>() else {
        return;
    };
    let source: String = original.to_string().into();
    HOOK_MAP.with(|map| {
        map.set(wrapper.unchecked_ref(), &JsValue::from_str(&source));
    });
}

/// Install the `toString` override on the given realm's
/// `Function.prototype`. Idempotent per realm.
pub fn install_tostring_guard(realm: &JsValue) -> Result<(), JsValue> {
    let function_ctor = Reflect::get(realm, &JsValue::from_str("Function"))?;
    if function_ctor.is_undefined() {
        return Err(JsValue::from_str("no Function constructor in realm"));
    }
    let proto = Reflect::get(&function_ctor, &JsValue::from_str("prototype"))?;
    if Reflect::get(&proto, &JsValue::from_str(TOSTRING_MARKER))?.is_truthy() {
        return Ok(());
    }

    let original = Reflect::get(&proto, &JsValue::from_str("toString"))?;
    if !original.is_function() {
        return Err(JsValue::from_str("Function.prototype.toString missing"));
    }
    let original_fn = original.clone();

    let trap = Closure::wrap(Box::new(
        move |_target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
            let disguised = HOOK_MAP.with(|map| {
                if map.has(this_arg.unchecked_ref()) {
                    Some(map.get(this_arg.unchecked_ref()))
                } else {
                    None
                }
            });
            if let Some(source) = disguised {
                return Ok(source);
            }
            call_function(&original_fn, &this_arg, &args)
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);

    let guard = proxy_with_apply(&original, trap)?;

    // The guard vouches for itself.
    HOOK_MAP.with(|map| {
        map.set(guard.unchecked_ref(), &JsValue::from_str(NATIVE_TOSTRING_STR));
    });

    // Engines define toString as non-enumerable; keep it that way.
    define_value(&proto, "toString", &guard, false)?;
    Reflect::set(
        &proto,
        &JsValue::from_str(TOSTRING_MARKER),
        &JsValue::TRUE,
    )?;
    Ok(())
}
