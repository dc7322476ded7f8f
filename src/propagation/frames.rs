//! Same-origin frame propagation.
//!
//! Two complementary channels bound the window in which a child frame
//! can run unhooked: the `contentWindow` / `contentDocument` accessors
//! re-install on every read, and a MutationObserver catches frames
//! inserted after load (re-checking again on each frame's `load` event,
//! since the inner realm is replaced on navigation). Cross-origin access
//! failures are swallowed — those realms fall back to native behavior.

use std::rc::Rc;

use js_sys::{Array, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::hooks::{self, add_event_listener, call_function, get_prototype, proxy_with_apply, stealth};
use crate::realm::RealmContext;

pub fn install(realm: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    hook_frame_accessors(realm, ctx)?;
    observe_frame_insertions(ctx)?;
    Ok(())
}

/// Intercept the frame-handle accessors themselves: any code path that
/// reaches into a child frame re-applies installation first.
fn hook_frame_accessors(realm: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    let proto = get_prototype(realm, "HTMLIFrameElement")?;
    if proto.is_undefined() {
        return Ok(());
    }

    hook_accessor(&proto, "contentWindow", ctx, |window| Some(window.clone()))?;
    hook_accessor(&proto, "contentDocument", ctx, |document| {
        Reflect::get(document, &JsValue::from_str("defaultView")).ok()
    })?;
    Ok(())
}

fn hook_accessor(
    proto: &JsValue,
    prop: &str,
    ctx: &Rc<RealmContext>,
    to_realm: fn(&JsValue) -> Option<JsValue>,
) -> Result<(), JsValue> {
    let desc = Object::get_own_property_descriptor(proto.unchecked_ref::<Object>(), &JsValue::from_str(prop));
    if desc.is_undefined() {
        return Ok(());
    }
    let orig_get = Reflect::get(&desc, &JsValue::from_str("get"))?;
    if !orig_get.is_function() || hooks::is_wrapped(&orig_get) {
        return Ok(());
    }

    let ctx = ctx.clone();
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
            let result = call_function(&target, &this_arg, &args)?;
            if !result.is_null() && !result.is_undefined() {
                if let Some(child) = to_realm(&result) {
                    if !child.is_null() && !child.is_undefined() {
                        // Denied access to a cross-origin realm lands
                        // here; the child simply stays native.
                        let _ = hooks::install_into(&child, &ctx);
                    }
                }
            }
            Ok(result)
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);

    let wrapped_get = proxy_with_apply(&orig_get, trap)?;
    stealth::register_disguise(&wrapped_get, &orig_get);

    let enumerable = Reflect::get(&desc, &JsValue::from_str("enumerable"))
        .map(|e| e.is_truthy())
        .unwrap_or(true);
    let descriptor = Object::new();
    Reflect::set(&descriptor, &JsValue::from_str("get"), &wrapped_get)?;
    Reflect::set(&descriptor, &JsValue::from_str("configurable"), &JsValue::TRUE)?;
    Reflect::set(
        &descriptor,
        &JsValue::from_str("enumerable"),
        &JsValue::from_bool(enumerable),
    )?;
    Object::define_property(proto.unchecked_ref::<Object>(), &JsValue::from_str(prop), &descriptor);
    Ok(())
}

/// Watch for frames appearing after initial load, including ones nested
/// inside inserted subtrees.
fn observe_frame_insertions(ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    let Some(window) = web_sys::window() else {
        return Ok(());
    };
    let Some(document) = window.document() else {
        return Ok(());
    };

    // Frames that already exist at install time.
    let existing = document.query_selector_all("iframe, frame")?;
    for i in 0..existing.length() {
        if let Some(node) = existing.get(i) {
            attach_to_frame(&node.into(), ctx);
        }
    }

    let ctx_observer = ctx.clone();
    let callback = Closure::wrap(Box::new(move |mutations: JsValue, _observer: JsValue| {
        let records: &Array = mutations.unchecked_ref();
        for i in 0..records.length() {
            let record = records.get(i);
            let Ok(added) = Reflect::get(&record, &JsValue::from_str("addedNodes")) else {
                continue;
            };
            let length = Reflect::get(&added, &JsValue::from_str("length"))
                .ok()
                .and_then(|l| l.as_f64())
                .unwrap_or(0.0) as u32;
            for j in 0..length {
                if let Ok(node) = Reflect::get_u32(&added, j) {
                    visit_inserted_node(&node, &ctx_observer);
                }
            }
        }
    }) as Box<dyn FnMut(JsValue, JsValue)>);

    let observer = web_sys::MutationObserver::new(callback.as_ref().unchecked_ref())?;
    callback.forget();

    let options = web_sys::MutationObserverInit::new();
    options.set_child_list(true);
    options.set_subtree(true);
    let root: web_sys::Node = match document.document_element() {
        Some(el) => el.into(),
        None => document.into(),
    };
    observer.observe_with_options(&root, &options)?;
    Ok(())
}

fn visit_inserted_node(node: &JsValue, ctx: &Rc<RealmContext>) {
    if node.is_null() || node.is_undefined() {
        return;
    }
    let node_name = Reflect::get(node, &JsValue::from_str("nodeName"))
        .ok()
        .and_then(|n| n.as_string())
        .unwrap_or_default()
        .to_uppercase();
    if node_name == "IFRAME" || node_name == "FRAME" {
        attach_to_frame(node, ctx);
    }

    if let Ok(children) = Reflect::get(node, &JsValue::from_str("childNodes")) {
        let length = Reflect::get(&children, &JsValue::from_str("length"))
            .ok()
            .and_then(|l| l.as_f64())
            .unwrap_or(0.0) as u32;
        for i in 0..length {
            if let Ok(child) = Reflect::get_u32(&children, i) {
                visit_inserted_node(&child, ctx);
            }
        }
    }
}

/// Try the frame's realm now, and again on every `load` — a navigation
/// replaces the inner realm, dropping whatever was installed in the old
/// one.
fn attach_to_frame(frame: &JsValue, ctx: &Rc<RealmContext>) {
    install_into_frame(frame, ctx);

    let frame_for_load = frame.clone();
    let ctx_for_load = ctx.clone();
    let on_load = Closure::wrap(Box::new(move |_event: JsValue| {
        install_into_frame(&frame_for_load, &ctx_for_load);
    }) as Box<dyn FnMut(JsValue)>);
    if add_event_listener(frame, "load", on_load.as_ref()).is_ok() {
        on_load.forget();
    }
}

fn install_into_frame(frame: &JsValue, ctx: &Rc<RealmContext>) {
    let Ok(window) = Reflect::get(frame, &JsValue::from_str("contentWindow")) else {
        return;
    };
    if window.is_null() || window.is_undefined() {
        return;
    }
    let _ = hooks::install_into(&window, ctx);
}
