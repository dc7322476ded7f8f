//! Worker construction interception.
//!
//! A worker realm starts executing before any outside code can touch it,
//! so the only way in is to rebuild the worker from modified source: the
//! constructor wrapper returns a relay object immediately (queueing
//! listeners and messages), fetches the original script text, prepends
//! the self-contained bootstrap, and constructs the real worker from a
//! Blob URL. Fetch failure falls back to an `importScripts` bootstrap;
//! if even construction from a Blob fails, the original script runs
//! unhooked — the page never loses its worker.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use js_sys::{Array, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use super::bootstrap::bootstrap_source;
use crate::hooks::{
    call_function, define_accessor, define_value, is_wrapped, proxy_with_construct, stealth,
};
use crate::realm::RealmContext;

pub fn install(realm: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    wrap_worker_constructor(realm, ctx)?;
    log_shared_worker(realm, ctx)?;
    Ok(())
}

/// Listener/message buffer standing in for the worker while the real
/// one is being assembled.
#[derive(Default)]
struct RelayState {
    real: RefCell<Option<JsValue>>,
    queue: RefCell<Vec<(JsValue, JsValue)>>,
    listeners: RefCell<Vec<(String, JsValue)>>,
    onmessage: RefCell<JsValue>,
    onerror: RefCell<JsValue>,
    terminated: Cell<bool>,
}

fn wrap_worker_constructor(realm: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    let ctor = Reflect::get(realm, &JsValue::from_str("Worker"))?;
    if !ctor.is_function() || is_wrapped(&ctor) {
        return Ok(());
    }

    let ctx_trap = ctx.clone();
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, args: JsValue, _new_target: JsValue| -> Result<JsValue, JsValue> {
            let args_arr: &Array = args.unchecked_ref();
            let script_url = args_arr.get(0).as_string().unwrap_or_default();
            let options = args_arr.get(1);

            if script_url.is_empty() {
                // Blob/module URLs we cannot refetch sensibly: construct
                // natively rather than break the page.
                return Reflect::construct(target.unchecked_ref::<js_sys::Function>(), args_arr);
            }

            let state = Rc::new(RelayState::default());
            let relay = build_relay_object(&state)?;

            let bootstrap = {
                let identity = ctx_trap.identity.borrow();
                bootstrap_source(&identity, &ctx_trap.config)
            };
            match bootstrap {
                Ok(bootstrap) => {
                    ctx_trap
                        .telemetry
                        .api_call("Worker", "construct", None, None, 0.0);
                    wasm_bindgen_futures::spawn_local(assemble_real_worker(
                        state,
                        target,
                        script_url,
                        options,
                        bootstrap,
                    ));
                    Ok(relay)
                }
                Err(e) => {
                    log::warn!("worker bootstrap unavailable: {}", e);
                    Reflect::construct(target.unchecked_ref::<js_sys::Function>(), args_arr)
                }
            }
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);

    let wrapped = proxy_with_construct(&ctor, trap)?;
    stealth::register_disguise(&wrapped, &ctor);
    define_value(realm, "Worker", &wrapped, false)?;
    define_value(&wrapped, "__veil_wrapped__", &JsValue::TRUE, false)?;
    Ok(())
}

/// The stand-in object handed back to page code synchronously.
fn build_relay_object(state: &Rc<RelayState>) -> Result<JsValue, JsValue> {
    let relay: JsValue = Object::new().into();

    {
        let state = state.clone();
        let post = Closure::wrap(Box::new(move |msg: JsValue, transfer: JsValue| {
            if let Some(real) = state.real.borrow().as_ref() {
                forward_post_message(real, &msg, &transfer);
                return;
            }
            state.queue.borrow_mut().push((msg, transfer));
        }) as Box<dyn FnMut(JsValue, JsValue)>);
        Reflect::set(&relay, &JsValue::from_str("postMessage"), post.as_ref())?;
        post.forget();
    }

    {
        let state = state.clone();
        let add = Closure::wrap(Box::new(move |event_type: JsValue, listener: JsValue| {
            let event_type = event_type.as_string().unwrap_or_default();
            if let Some(real) = state.real.borrow().as_ref() {
                let _ = crate::hooks::add_event_listener(real, &event_type, &listener);
            }
            state.listeners.borrow_mut().push((event_type, listener));
        }) as Box<dyn FnMut(JsValue, JsValue)>);
        Reflect::set(&relay, &JsValue::from_str("addEventListener"), add.as_ref())?;
        add.forget();
    }

    {
        let state = state.clone();
        let remove = Closure::wrap(Box::new(move |event_type: JsValue, listener: JsValue| {
            let event_type = event_type.as_string().unwrap_or_default();
            state
                .listeners
                .borrow_mut()
                .retain(|(t, l)| *t != event_type || *l != listener);
            if let Some(real) = state.real.borrow().as_ref() {
                if let Ok(rel) = Reflect::get(real, &JsValue::from_str("removeEventListener")) {
                    if rel.is_function() {
                        let f: &js_sys::Function = rel.unchecked_ref();
                        let _ = f.call2(real, &JsValue::from_str(&event_type), &listener);
                    }
                }
            }
        }) as Box<dyn FnMut(JsValue, JsValue)>);
        Reflect::set(
            &relay,
            &JsValue::from_str("removeEventListener"),
            remove.as_ref(),
        )?;
        remove.forget();
    }

    {
        let state = state.clone();
        let terminate = Closure::wrap(Box::new(move || {
            state.terminated.set(true);
            if let Some(real) = state.real.borrow().as_ref() {
                if let Ok(t) = Reflect::get(real, &JsValue::from_str("terminate")) {
                    if t.is_function() {
                        let f: &js_sys::Function = t.unchecked_ref();
                        let _ = f.call0(real);
                    }
                }
            }
        }) as Box<dyn FnMut()>);
        Reflect::set(&relay, &JsValue::from_str("terminate"), terminate.as_ref())?;
        terminate.forget();
    }

    install_handler_accessor(&relay, state, "onmessage")?;
    install_handler_accessor(&relay, state, "onerror")?;
    Ok(relay)
}

fn handler_slot<'a>(state: &'a RelayState, name: &str) -> &'a RefCell<JsValue> {
    if name == "onmessage" {
        &state.onmessage
    } else {
        &state.onerror
    }
}

fn install_handler_accessor(
    relay: &JsValue,
    state: &Rc<RelayState>,
    name: &'static str,
) -> Result<(), JsValue> {
    let state_get = state.clone();
    let getter = Closure::wrap(Box::new(move || -> JsValue {
        handler_slot(&state_get, name).borrow().clone()
    }) as Box<dyn FnMut() -> JsValue>);

    let state_set = state.clone();
    let setter = Closure::wrap(Box::new(move |handler: JsValue| {
        *handler_slot(&state_set, name).borrow_mut() = handler.clone();
        if let Some(real) = state_set.real.borrow().as_ref() {
            let _ = Reflect::set(real, &JsValue::from_str(name), &handler);
        }
    }) as Box<dyn FnMut(JsValue)>);

    define_accessor(relay, name, getter.as_ref(), setter.as_ref())?;
    getter.forget();
    setter.forget();
    Ok(())
}

/// Fetch + rebuild + attach. Every failure path steps down one level of
/// interception rather than losing the worker.
async fn assemble_real_worker(
    state: Rc<RelayState>,
    native_ctor: JsValue,
    script_url: String,
    options: JsValue,
    bootstrap: String,
) {
    if state.terminated.get() {
        return;
    }

    let combined = match fetch_text(&script_url).await {
        Ok(source) => format!("{}\n{}", bootstrap, source),
        Err(_) => {
            // Deferred load from inside the worker; same-origin classic
            // workers only, which is also the only case fetch covers.
            let escaped = script_url.replace('\\', "\\\\").replace('\'', "\\'");
            format!("{}\nimportScripts('{}');", bootstrap, escaped)
        }
    };

    let real = construct_from_blob(&native_ctor, &combined, &options)
        .or_else(|e| {
            log::warn!("worker blob construction failed, running unhooked: {:?}", e);
            let args = Array::of2(&JsValue::from_str(&script_url), &options);
            Reflect::construct(native_ctor.unchecked_ref::<js_sys::Function>(), &args)
        });
    let real = match real {
        Ok(r) => r,
        Err(e) => {
            log::warn!("worker construction failed entirely: {:?}", e);
            return;
        }
    };

    if state.terminated.get() {
        if let Ok(t) = Reflect::get(&real, &JsValue::from_str("terminate")) {
            if t.is_function() {
                let f: &js_sys::Function = t.unchecked_ref();
                let _ = f.call0(&real);
            }
        }
        return;
    }

    // Wire up everything the page registered while we were assembling.
    let onmessage = state.onmessage.borrow().clone();
    if !onmessage.is_undefined() && !onmessage.is_null() {
        let _ = Reflect::set(&real, &JsValue::from_str("onmessage"), &onmessage);
    }
    let onerror = state.onerror.borrow().clone();
    if !onerror.is_undefined() && !onerror.is_null() {
        let _ = Reflect::set(&real, &JsValue::from_str("onerror"), &onerror);
    }
    for (event_type, listener) in state.listeners.borrow().iter() {
        let _ = crate::hooks::add_event_listener(&real, event_type, listener);
    }
    for (msg, transfer) in state.queue.borrow_mut().drain(..) {
        forward_post_message(&real, &msg, &transfer);
    }
    *state.real.borrow_mut() = Some(real);
}

fn construct_from_blob(
    native_ctor: &JsValue,
    code: &str,
    options: &JsValue,
) -> Result<JsValue, JsValue> {
    let parts = Array::new();
    parts.push(&JsValue::from_str(code));
    let props = web_sys::BlobPropertyBag::new();
    props.set_type("application/javascript");
    let blob = web_sys::Blob::new_with_str_sequence_and_options(&parts, &props)?;
    let url = web_sys::Url::create_object_url_with_blob(&blob)?;
    let args = Array::of2(&JsValue::from_str(&url), options);
    Reflect::construct(native_ctor.unchecked_ref::<js_sys::Function>(), &args)
}

async fn fetch_text(url: &str) -> Result<String, JsValue> {
    let global = js_sys::global();
    let fetch = Reflect::get(&global, &JsValue::from_str("fetch"))?;
    if !fetch.is_function() {
        return Err(JsValue::from_str("no fetch in realm"));
    }
    let fetch: &js_sys::Function = fetch.unchecked_ref();
    let promise: js_sys::Promise = fetch
        .call1(&global, &JsValue::from_str(url))?
        .dyn_into()
        .map_err(|_| JsValue::from_str("fetch did not return a promise"))?;
    let response = JsFuture::from(promise).await?;
    let response: web_sys::Response = response
        .dyn_into()
        .map_err(|_| JsValue::from_str("fetch did not return a Response"))?;
    if !response.ok() {
        return Err(JsValue::from_str("worker script fetch failed"));
    }
    let text = JsFuture::from(response.text()?).await?;
    text.as_string()
        .ok_or_else(|| JsValue::from_str("worker script body is not text"))
}

/// SharedWorkers get no bootstrap (their lifetime outlives any one
/// document); construction is logged pass-through so the stream records
/// the blind spot.
fn log_shared_worker(realm: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    let ctor = Reflect::get(realm, &JsValue::from_str("SharedWorker"))?;
    if !ctor.is_function() || is_wrapped(&ctor) {
        return Ok(());
    }
    let ctx = ctx.clone();
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, args: JsValue, _new_target: JsValue| -> Result<JsValue, JsValue> {
            ctx.telemetry
                .api_call("SharedWorker", "construct", None, None, 0.0);
            let args_arr: &Array = args.unchecked_ref();
            Reflect::construct(target.unchecked_ref::<js_sys::Function>(), args_arr)
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
    let wrapped = proxy_with_construct(&ctor, trap)?;
    stealth::register_disguise(&wrapped, &ctor);
    define_value(realm, "SharedWorker", &wrapped, false)?;
    define_value(&wrapped, "__veil_wrapped__", &JsValue::TRUE, false)?;
    Ok(())
}

fn forward_post_message(real: &JsValue, msg: &JsValue, transfer: &JsValue) {
    let Ok(post) = Reflect::get(real, &JsValue::from_str("postMessage")) else {
        return;
    };
    if !post.is_function() {
        return;
    }
    let args = Array::new();
    args.push(msg);
    if !transfer.is_undefined() {
        args.push(transfer);
    }
    let _ = call_function(&post, real, &args.into());
}
