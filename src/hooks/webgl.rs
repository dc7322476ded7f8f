//! WebGL interception: framebuffer reads and high-entropy parameters.
//!
//! `readPixels` output buffers get the same content-bound perturbation
//! as canvas reads. The unmasked vendor/renderer parameters are never
//! noised — they are answered directly from the active persona's
//! resolved GPU pair so they stay coherent with the rest of the
//! identity.

use std::rc::Rc;

use js_sys::{Array, Reflect, Uint8Array};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::{call_function, get_prototype, js_error_string, safe_hook_method};
use crate::hashing::{sha256_hex, sha256_hex_str, HashTriple};
use crate::noise::pixels::perturb_pixels;
use crate::realm::{timer_elapsed_ms, timer_start, RealmContext};

const UNMASKED_VENDOR_WEBGL: u32 = 0x9245;
const UNMASKED_RENDERER_WEBGL: u32 = 0x9246;
const GL_VENDOR: u32 = 0x1F00;
const GL_RENDERER: u32 = 0x1F01;

const GL_CONTEXTS: [&str; 2] = ["WebGLRenderingContext", "WebGL2RenderingContext"];

pub fn install(realm: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    for name in GL_CONTEXTS {
        let proto = get_prototype(realm, name)?;
        if proto.is_undefined() {
            continue;
        }
        hook_read_pixels(&proto, name, ctx)?;
        hook_get_parameter(&proto, ctx)?;
    }
    Ok(())
}

fn hook_read_pixels(
    proto: &JsValue,
    context_name: &'static str,
    ctx: &Rc<RealmContext>,
) -> Result<(), JsValue> {
    let ctx = ctx.clone();
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
            let start = timer_start();
            if let Err(e) = call_function(&target, &this_arg, &args) {
                ctx.telemetry.api_call(
                    "WebGL",
                    "readPixels",
                    None,
                    Some(js_error_string(&e)),
                    timer_elapsed_ms(&start),
                );
                return Err(e);
            }

            let args_arr: &Array = args.unchecked_ref();
            if args_arr.length() >= 7 {
                let geometry: Vec<f64> = (0..4)
                    .map(|i| args_arr.get(i).as_f64().unwrap_or(0.0))
                    .collect();
                let stimulus = sha256_hex_str(&format!(
                    "{}_{}_{}_{}_{}",
                    context_name, geometry[0], geometry[1], geometry[2], geometry[3]
                ));

                let pixels = args_arr.get(6);
                if let Ok(arr) = pixels.dyn_into::<Uint8Array>() {
                    let mut buffer = vec![0u8; arr.length() as usize];
                    arr.copy_to(&mut buffer);
                    let clean = sha256_hex(&buffer);

                    let (seed, stride) = {
                        let identity = ctx.identity.borrow();
                        (identity.seed.clone(), identity.stride())
                    };
                    let triple = match seed {
                        Some(seed) => {
                            perturb_pixels(&mut buffer, &seed, context_name, stride);
                            arr.copy_from(&buffer);
                            HashTriple {
                                spoofed: sha256_hex(&buffer),
                                clean,
                                stimulus,
                            }
                        }
                        None => HashTriple {
                            spoofed: clean.clone(),
                            clean,
                            stimulus,
                        },
                    };
                    ctx.telemetry.api_call(
                        "WebGL",
                        "readPixels",
                        Some(triple),
                        None,
                        timer_elapsed_ms(&start),
                    );
                }
            }
            Ok(JsValue::UNDEFINED)
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
    safe_hook_method(proto, "readPixels", "WebGL", trap)
}

fn hook_get_parameter(proto: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    let ctx = ctx.clone();
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
            let args_arr: &Array = args.unchecked_ref();
            let param = args_arr.get(0).as_f64().unwrap_or(0.0) as u32;

            let spoofed_value = {
                let identity = ctx.identity.borrow();
                identity.webgl.as_ref().and_then(|gpu| match param {
                    UNMASKED_VENDOR_WEBGL | GL_VENDOR => Some(gpu.vendor.clone()),
                    UNMASKED_RENDERER_WEBGL | GL_RENDERER => Some(gpu.renderer.clone()),
                    _ => None,
                })
            };

            let Some(spoofed) = spoofed_value else {
                // Everything that is not a high-entropy identity
                // parameter passes through unlogged.
                return call_function(&target, &this_arg, &args);
            };

            let start = timer_start();
            // Invoke the original anyway: the clean hash is the proof
            // that a lie happened.
            let clean = call_function(&target, &this_arg, &args)
                .ok()
                .and_then(|v| v.as_string())
                .unwrap_or_default();
            let triple = HashTriple {
                clean: sha256_hex_str(&clean),
                spoofed: sha256_hex_str(&spoofed),
                stimulus: sha256_hex_str(&param.to_string()),
            };
            ctx.telemetry.api_call(
                "WebGL",
                "getParameter",
                Some(triple),
                None,
                timer_elapsed_ms(&start),
            );
            Ok(JsValue::from_str(&spoofed))
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
    safe_hook_method(proto, "getParameter", "WebGL", trap)
}
