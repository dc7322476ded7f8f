//! Identity-update broadcast channel.
//!
//! Rotation (user-triggered shift, loader re-supply) is pushed to every
//! already-running realm as an in-page message. Each realm overwrites
//! its local cache and session store on receipt — idempotent overwrite,
//! no coordination needed.

use std::rc::Rc;

use js_sys::{Object, Reflect};
use wasm_bindgen::prelude::*;

use crate::hooks::add_event_listener;
use crate::realm::{RealmContext, UPDATE_MESSAGE_TYPE};
use crate::seed::IdentityCache;

/// Start listening for identity updates in this realm.
pub fn listen(ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    let ctx = ctx.clone();
    let handler = Closure::wrap(Box::new(move |event: JsValue| {
        // In a window realm, only same-window messages update identity.
        let source = Reflect::get(&event, &JsValue::from_str("source")).unwrap_or(JsValue::NULL);
        if let Some(window) = web_sys::window() {
            let window: JsValue = window.into();
            if !js_sys::Object::is(&source, &window) {
                return;
            }
        }

        let Ok(data) = Reflect::get(&event, &JsValue::from_str("data")) else {
            return;
        };
        let message_type = Reflect::get(&data, &JsValue::from_str("type"))
            .ok()
            .and_then(|t| t.as_string());
        if message_type.as_deref() != Some(UPDATE_MESSAGE_TYPE) {
            return;
        }
        let Ok(detail) = Reflect::get(&data, &JsValue::from_str("detail")) else {
            return;
        };
        match serde_wasm_bindgen::from_value::<IdentityCache>(detail) {
            Ok(cache) => ctx.set_identity(cache),
            Err(e) => log::warn!("identity update payload rejected: {}", e),
        }
    }) as Box<dyn FnMut(JsValue)>);

    let global: JsValue = js_sys::global().into();
    add_event_listener(&global, "message", handler.as_ref())?;
    handler.forget();
    Ok(())
}

/// Push an identity update to every realm listening on this window.
pub fn broadcast_update(cache: &IdentityCache) -> Result<(), JsValue> {
    let detail = serde_wasm_bindgen::to_value(cache)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    let message = Object::new();
    Reflect::set(
        &message,
        &JsValue::from_str("type"),
        &JsValue::from_str(UPDATE_MESSAGE_TYPE),
    )?;
    Reflect::set(&message, &JsValue::from_str("detail"), &detail)?;

    let Some(window) = web_sys::window() else {
        return Ok(());
    };
    window.post_message(&message, "*")?;
    Ok(())
}
