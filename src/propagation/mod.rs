//! Cross-realm identity propagation.
//!
//! Realms share no memory; the identity has to be replicated, not
//! shared. Frames inherit by re-installation from the parent
//! ([`frames`]), workers by source-level bootstrap ([`workers`] +
//! [`bootstrap`]), and running realms converge on updates through the
//! broadcast channel ([`broadcast`]). Every channel fails open: a realm
//! the propagation cannot reach behaves like an unmodified browser.

use std::rc::Rc;

use wasm_bindgen::prelude::*;

use crate::realm::RealmContext;

pub mod bootstrap;
pub mod broadcast;
pub mod frames;
pub mod workers;

/// Start all propagation channels for a window realm. Worker
/// interception also applies inside workers themselves (nested workers);
/// frame observation and broadcast listening are window-only concerns
/// that no-op elsewhere.
pub fn start(realm: &JsValue, ctx: &Rc<RealmContext>) {
    if let Err(e) = frames::install(realm, ctx) {
        log::warn!("frame propagation not started: {:?}", e);
    }
    if let Err(e) = workers::install(realm, ctx) {
        log::warn!("worker interception not started: {:?}", e);
    }
    if let Err(e) = broadcast::listen(ctx) {
        log::warn!("identity broadcast listener not started: {:?}", e);
    }
}
