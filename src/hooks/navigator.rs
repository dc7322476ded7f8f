//! Navigator and screen property spoofing.
//!
//! Getters read the live identity on every access, so a rotation
//! broadcast takes effect without re-installation. Properties are
//! patched on the prototypes (`Navigator.prototype`, `Screen.prototype`)
//! with an instance fallback for engines that put them elsewhere.

use std::rc::Rc;

use js_sys::Reflect;
use wasm_bindgen::prelude::*;

use super::{get_prototype, hook_getter};
use crate::realm::RealmContext;

pub fn install(realm: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    // Without persona facts there is nothing coherent to report;
    // leaving the native values is better than inventing them.
    if ctx.identity.borrow().navigator.is_none() && ctx.identity.borrow().screen.is_none() {
        return Ok(());
    }
    install_navigator(realm, ctx)?;
    install_screen(realm, ctx)?;
    Ok(())
}

fn install_navigator(realm: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    if ctx.identity.borrow().navigator.is_none() {
        return Ok(());
    }
    let target = patch_target(realm, "Navigator", "navigator")?;
    if target.is_undefined() {
        return Ok(());
    }

    macro_rules! nav_getter {
        ($prop:literal, $extract:expr) => {{
            let ctx = ctx.clone();
            let getter = Closure::wrap(Box::new(move || -> JsValue {
                match ctx.identity.borrow().navigator.as_ref() {
                    Some(nav) => $extract(nav),
                    None => JsValue::UNDEFINED,
                }
            }) as Box<dyn FnMut() -> JsValue>);
            hook_getter(&target, $prop, "Navigator", getter)?;
        }};
    }

    nav_getter!("userAgent", |nav: &crate::persona::NavigatorFacts| {
        JsValue::from_str(&nav.user_agent)
    });
    nav_getter!("platform", |nav: &crate::persona::NavigatorFacts| {
        JsValue::from_str(&nav.platform)
    });
    nav_getter!("appVersion", |nav: &crate::persona::NavigatorFacts| {
        // appVersion mirrors the UA without its "Mozilla/" prefix.
        JsValue::from_str(nav.user_agent.strip_prefix("Mozilla/").unwrap_or(&nav.user_agent))
    });
    nav_getter!(
        "hardwareConcurrency",
        |nav: &crate::persona::NavigatorFacts| { JsValue::from_f64(nav.hardware_concurrency as f64) }
    );
    nav_getter!("deviceMemory", |nav: &crate::persona::NavigatorFacts| {
        JsValue::from_f64(nav.device_memory as f64)
    });

    Ok(())
}

fn install_screen(realm: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    if ctx.identity.borrow().screen.is_none() {
        return Ok(());
    }
    let target = patch_target(realm, "Screen", "screen")?;
    if target.is_undefined() {
        return Ok(());
    }

    macro_rules! screen_getter {
        ($prop:literal, $field:ident) => {{
            let ctx = ctx.clone();
            let getter = Closure::wrap(Box::new(move || -> JsValue {
                match ctx.identity.borrow().screen.as_ref() {
                    Some(screen) => JsValue::from_f64(screen.$field as f64),
                    None => JsValue::UNDEFINED,
                }
            }) as Box<dyn FnMut() -> JsValue>);
            hook_getter(&target, $prop, "Screen", getter)?;
        }};
    }

    screen_getter!("width", width);
    screen_getter!("height", height);
    screen_getter!("availWidth", avail_width);
    screen_getter!("availHeight", avail_height);
    screen_getter!("colorDepth", color_depth);
    screen_getter!("pixelDepth", pixel_depth);

    Ok(())
}

/// Prototype of the named constructor, falling back to the global
/// instance when the prototype is unavailable in this realm.
fn patch_target(
    realm: &JsValue,
    constructor_name: &str,
    instance_name: &str,
) -> Result<JsValue, JsValue> {
    let proto = get_prototype(realm, constructor_name)?;
    if !proto.is_undefined() {
        return Ok(proto);
    }
    Reflect::get(realm, &JsValue::from_str(instance_name))
}
