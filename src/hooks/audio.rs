//! Audio interception: `AudioBuffer` channel reads.
//!
//! A constant per-channel offset is added to the returned samples the
//! first time a buffer instance is read; the instance is then marked so
//! repeated reads (or `copyFromChannel`) see the already-noised data and
//! are never noised twice.

use std::rc::Rc;

use js_sys::{Array, Float32Array, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::{call_function, get_prototype, js_error_string, safe_hook_method};
use crate::hashing::{sha256_hex, HashTriple};
use crate::noise::audio::{apply_channel_noise, audio_stimulus};
use crate::realm::{timer_elapsed_ms, timer_start, RealmContext};

/// Marker on the AudioBuffer instance recording that noise was applied.
const NOISED_MARKER: &str = "__veil_noised__";

pub fn install(realm: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    let proto = get_prototype(realm, "AudioBuffer")?;
    if proto.is_undefined() {
        return Ok(());
    }
    hook_get_channel_data(&proto, ctx)?;
    hook_copy_from_channel(&proto)?;
    Ok(())
}

fn hook_get_channel_data(proto: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    let ctx = ctx.clone();
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
            let start = timer_start();
            let data = match call_function(&target, &this_arg, &args) {
                Ok(d) => d,
                Err(e) => {
                    ctx.telemetry.api_call(
                        "AudioBuffer",
                        "getChannelData",
                        None,
                        Some(js_error_string(&e)),
                        timer_elapsed_ms(&start),
                    );
                    return Err(e);
                }
            };

            let args_arr: &Array = args.unchecked_ref();
            let channel = args_arr.get(0).as_f64().unwrap_or(0.0) as u32;
            let length = Reflect::get(&this_arg, &JsValue::from_str("length"))
                .ok()
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0) as u32;
            let sample_rate = Reflect::get(&this_arg, &JsValue::from_str("sampleRate"))
                .ok()
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0) as f32;
            let stimulus = audio_stimulus(length, sample_rate, channel);

            let Some(arr) = data.dyn_ref::<Float32Array>() else {
                ctx.telemetry.api_call(
                    "AudioBuffer",
                    "getChannelData",
                    None,
                    None,
                    timer_elapsed_ms(&start),
                );
                return Ok(data);
            };
            let mut samples = vec![0f32; arr.length() as usize];
            arr.copy_to(&mut samples);
            let clean = sha256_hex(&f32_bytes(&samples));

            let seed = ctx.identity.borrow().seed.clone();
            let already_noised = Reflect::get(&this_arg, &JsValue::from_str(NOISED_MARKER))
                .map(|v| v.is_truthy())
                .unwrap_or(false);

            let triple = match seed {
                // Noise at most once per buffer instance.
                Some(seed) if !already_noised => {
                    apply_channel_noise(&mut samples, &seed, channel);
                    arr.copy_from(&samples);
                    let _ =
                        Reflect::set(&this_arg, &JsValue::from_str(NOISED_MARKER), &JsValue::TRUE);
                    HashTriple {
                        spoofed: sha256_hex(&f32_bytes(&samples)),
                        clean,
                        stimulus,
                    }
                }
                _ => HashTriple {
                    spoofed: clean.clone(),
                    clean,
                    stimulus,
                },
            };
            ctx.telemetry.api_call(
                "AudioBuffer",
                "getChannelData",
                Some(triple),
                None,
                timer_elapsed_ms(&start),
            );
            Ok(data)
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
    safe_hook_method(proto, "getChannelData", "AudioBuffer", trap)
}

/// `copyFromChannel` routes through the hooked `getChannelData` first so
/// the buffer gets noised (once) before the copy happens.
fn hook_copy_from_channel(proto: &JsValue) -> Result<(), JsValue> {
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
            let args_arr: &Array = args.unchecked_ref();
            let channel = args_arr.get(1);
            if let Ok(get_channel_data) =
                Reflect::get(&this_arg, &JsValue::from_str("getChannelData"))
            {
                if get_channel_data.is_function() {
                    let f: &js_sys::Function = get_channel_data.unchecked_ref();
                    let _ = f.call1(&this_arg, &channel);
                }
            }
            call_function(&target, &this_arg, &args)
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
    safe_hook_method(proto, "copyFromChannel", "AudioBuffer", trap)
}

fn f32_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}
