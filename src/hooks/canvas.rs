//! Canvas interception: 2D pixel reads, serialization, text metrics,
//! OffscreenCanvas.
//!
//! `getImageData` perturbs the returned buffer in place. `toDataURL` and
//! `toBlob` serialize a shadow canvas carrying the perturbed content so
//! the visible canvas is never mutated. `measureText` jitters only the
//! reported width.

use std::rc::Rc;

use js_sys::{Array, Reflect, Uint8ClampedArray};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::{call_function, define_value, get_prototype, js_error_string, safe_hook_method};
use crate::hashing::{sha256_hex, sha256_hex_str, HashTriple};
use crate::noise::pixels::apply_pixel_noise;
use crate::noise::text::jitter_width;
use crate::realm::{timer_elapsed_ms, timer_start, RealmContext};

pub fn install(realm: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    // Native getImageData is captured before it gets wrapped: the shadow
    // canvas path needs the clean bytes, not the hooked view of them.
    let ctx2d_proto = get_prototype(realm, "CanvasRenderingContext2D")?;
    if !ctx2d_proto.is_undefined() {
        let native_get_image_data =
            Reflect::get(&ctx2d_proto, &JsValue::from_str("getImageData"))?;
        hook_get_image_data(&ctx2d_proto, "Canvas", ctx)?;
        hook_measure_text(&ctx2d_proto, ctx)?;

        let canvas_proto = get_prototype(realm, "HTMLCanvasElement")?;
        if !canvas_proto.is_undefined() {
            hook_serializer(&canvas_proto, "toDataURL", &native_get_image_data, ctx)?;
            hook_serializer(&canvas_proto, "toBlob", &native_get_image_data, ctx)?;
        }
    }

    let offscreen_ctx_proto = get_prototype(realm, "OffscreenCanvasRenderingContext2D")?;
    if !offscreen_ctx_proto.is_undefined() {
        let native_get_image_data =
            Reflect::get(&offscreen_ctx_proto, &JsValue::from_str("getImageData"))?;
        hook_get_image_data(&offscreen_ctx_proto, "OffscreenCanvas", ctx)?;

        let offscreen_proto = get_prototype(realm, "OffscreenCanvas")?;
        if !offscreen_proto.is_undefined() {
            hook_convert_to_blob(&offscreen_proto, &native_get_image_data, ctx)?;
        }
    }

    Ok(())
}

/// Surface label fed into content-bound seed derivation. Distinct per
/// context type so the same scene on different surfaces draws different
/// noise.
fn pixel_surface_label(surface: &'static str) -> &'static str {
    match surface {
        "OffscreenCanvas" => "OffscreenCanvas2D",
        _ => "Canvas2D",
    }
}

fn hook_get_image_data(
    proto: &JsValue,
    surface: &'static str,
    ctx: &Rc<RealmContext>,
) -> Result<(), JsValue> {
    let ctx = ctx.clone();
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
            let start = timer_start();
            let result = match call_function(&target, &this_arg, &args) {
                Ok(r) => r,
                Err(e) => {
                    ctx.telemetry.api_call(
                        surface,
                        "getImageData",
                        None,
                        Some(js_error_string(&e)),
                        timer_elapsed_ms(&start),
                    );
                    return Err(e);
                }
            };

            match noise_image_data(&ctx, &result, pixel_surface_label(surface)) {
                Ok(triple) => {
                    ctx.telemetry.api_call(
                        surface,
                        "getImageData",
                        Some(triple),
                        None,
                        timer_elapsed_ms(&start),
                    );
                }
                Err(e) => {
                    ctx.telemetry.api_call(
                        surface,
                        "getImageData",
                        None,
                        Some(js_error_string(&e)),
                        timer_elapsed_ms(&start),
                    );
                }
            }
            // Clean or noised, the original ImageData is what returns.
            Ok(result)
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
    safe_hook_method(proto, "getImageData", surface, trap)
}

/// Perturb an ImageData's backing array in place; returns the hash
/// triple. With no active seed the triple is clean-only.
fn noise_image_data(
    ctx: &Rc<RealmContext>,
    image_data: &JsValue,
    surface_label: &str,
) -> Result<HashTriple, JsValue> {
    let data_val = Reflect::get(image_data, &JsValue::from_str("data"))?;
    let arr: Uint8ClampedArray = data_val
        .dyn_into()
        .map_err(|_| JsValue::from_str("ImageData.data is not a Uint8ClampedArray"))?;

    let mut buffer = vec![0u8; arr.length() as usize];
    arr.copy_to(&mut buffer);

    let (seed, stride) = {
        let identity = ctx.identity.borrow();
        (identity.seed.clone(), identity.stride())
    };
    let triple = match seed {
        Some(seed) => {
            let triple = apply_pixel_noise(&mut buffer, &seed, surface_label, stride);
            arr.copy_from(&buffer);
            triple
        }
        None => {
            let clean = sha256_hex(&buffer);
            HashTriple::clean_only(clean.clone(), clean)
        }
    };
    Ok(triple)
}

/// Hook a canvas serializer (`toDataURL` / `toBlob`): serialize a shadow
/// canvas carrying the perturbed pixels instead of the element itself.
fn hook_serializer(
    canvas_proto: &JsValue,
    api: &'static str,
    native_get_image_data: &JsValue,
    ctx: &Rc<RealmContext>,
) -> Result<(), JsValue> {
    let ctx = ctx.clone();
    let native_gid = native_get_image_data.clone();
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
            let start = timer_start();
            let seed = ctx.identity.borrow().seed.clone();
            let stride = ctx.identity.borrow().stride();

            let Some(seed) = seed else {
                // Pass-through; still record the call with a hash of the
                // clean serialization when it is a string.
                let result = match call_function(&target, &this_arg, &args) {
                    Ok(r) => r,
                    Err(e) => {
                        ctx.telemetry.api_call(
                            "Canvas",
                            api,
                            None,
                            Some(js_error_string(&e)),
                            timer_elapsed_ms(&start),
                        );
                        return Err(e);
                    }
                };
                let output = result.as_string().map(|s| {
                    let clean = sha256_hex_str(&s);
                    HashTriple::clean_only(clean.clone(), clean)
                });
                ctx.telemetry
                    .api_call("Canvas", api, output, None, timer_elapsed_ms(&start));
                return Ok(result);
            };

            match serialize_spoofed(&target, &this_arg, &args, &native_gid, &seed, stride) {
                Ok((result, triple)) => {
                    ctx.telemetry.api_call(
                        "Canvas",
                        api,
                        Some(triple),
                        None,
                        timer_elapsed_ms(&start),
                    );
                    Ok(result)
                }
                Err(e) => {
                    // Fail open: log the noise failure, return the clean
                    // serialization.
                    ctx.telemetry.api_call(
                        "Canvas",
                        api,
                        None,
                        Some(js_error_string(&e)),
                        timer_elapsed_ms(&start),
                    );
                    call_function(&target, &this_arg, &args)
                }
            }
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
    safe_hook_method(canvas_proto, api, "Canvas", trap)
}

/// Build a same-size shadow canvas, copy the element's pixels into it,
/// perturb them, and run the serializer against the shadow. The visible
/// canvas stays untouched, so repeated serializations see the same clean
/// scene and derive the same noise.
fn serialize_spoofed(
    serializer: &JsValue,
    canvas: &JsValue,
    args: &JsValue,
    native_get_image_data: &JsValue,
    seed: &str,
    stride: usize,
) -> Result<(JsValue, HashTriple), JsValue> {
    let width = Reflect::get(canvas, &JsValue::from_str("width"))?
        .as_f64()
        .unwrap_or(0.0);
    let height = Reflect::get(canvas, &JsValue::from_str("height"))?
        .as_f64()
        .unwrap_or(0.0);
    if width <= 0.0 || height <= 0.0 {
        let result = call_function(serializer, canvas, args)?;
        let clean = result
            .as_string()
            .map(|s| sha256_hex_str(&s))
            .unwrap_or_default();
        return Ok((result, HashTriple::clean_only(clean.clone(), clean)));
    }

    let document = Reflect::get(canvas, &JsValue::from_str("ownerDocument"))?;
    let create: js_sys::Function = Reflect::get(&document, &JsValue::from_str("createElement"))?
        .dyn_into()
        .map_err(|_| JsValue::from_str("no createElement"))?;
    let shadow = create.call1(&document, &JsValue::from_str("canvas"))?;
    Reflect::set(&shadow, &JsValue::from_str("width"), &JsValue::from_f64(width))?;
    Reflect::set(
        &shadow,
        &JsValue::from_str("height"),
        &JsValue::from_f64(height),
    )?;

    let get_context: js_sys::Function = Reflect::get(&shadow, &JsValue::from_str("getContext"))?
        .dyn_into()
        .map_err(|_| JsValue::from_str("no getContext"))?;
    let shadow_ctx = get_context.call1(&shadow, &JsValue::from_str("2d"))?;
    if shadow_ctx.is_null() || shadow_ctx.is_undefined() {
        return Err(JsValue::from_str("no 2d context for shadow canvas"));
    }

    let draw: js_sys::Function = Reflect::get(&shadow_ctx, &JsValue::from_str("drawImage"))?
        .dyn_into()
        .map_err(|_| JsValue::from_str("no drawImage"))?;
    draw.call3(
        &shadow_ctx,
        canvas,
        &JsValue::from_f64(0.0),
        &JsValue::from_f64(0.0),
    )?;

    let gid_args = Array::of4(
        &JsValue::from_f64(0.0),
        &JsValue::from_f64(0.0),
        &JsValue::from_f64(width),
        &JsValue::from_f64(height),
    );
    let image_data = call_function(native_get_image_data, &shadow_ctx, &gid_args.into())?;
    let data_val = Reflect::get(&image_data, &JsValue::from_str("data"))?;
    let arr: Uint8ClampedArray = data_val
        .dyn_into()
        .map_err(|_| JsValue::from_str("ImageData.data is not a Uint8ClampedArray"))?;
    let mut buffer = vec![0u8; arr.length() as usize];
    arr.copy_to(&mut buffer);
    let triple = apply_pixel_noise(&mut buffer, seed, "Canvas2D", stride);
    arr.copy_from(&buffer);

    let put: js_sys::Function = Reflect::get(&shadow_ctx, &JsValue::from_str("putImageData"))?
        .dyn_into()
        .map_err(|_| JsValue::from_str("no putImageData"))?;
    put.call3(
        &shadow_ctx,
        &image_data,
        &JsValue::from_f64(0.0),
        &JsValue::from_f64(0.0),
    )?;

    let result = call_function(serializer, &shadow, args)?;
    Ok((result, triple))
}

fn hook_measure_text(proto: &JsValue, ctx: &Rc<RealmContext>) -> Result<(), JsValue> {
    let ctx = ctx.clone();
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
            let start = timer_start();
            let metrics = match call_function(&target, &this_arg, &args) {
                Ok(m) => m,
                Err(e) => {
                    ctx.telemetry.api_call(
                        "Canvas",
                        "measureText",
                        None,
                        Some(js_error_string(&e)),
                        timer_elapsed_ms(&start),
                    );
                    return Err(e);
                }
            };

            let seed = ctx.identity.borrow().seed.clone();
            if let Some(seed) = seed {
                let args_arr: &Array = args.unchecked_ref();
                let text = args_arr.get(0).as_string().unwrap_or_default();
                if let Ok(width_val) = Reflect::get(&metrics, &JsValue::from_str("width")) {
                    if let Some(width) = width_val.as_f64() {
                        let spoofed = jitter_width(width, &seed, text.chars().count());
                        // TextMetrics.width is a readonly accessor; shadow
                        // it with an own data property.
                        let _ = define_value(
                            &metrics,
                            "width",
                            &JsValue::from_f64(spoofed),
                            true,
                        );
                        let triple = HashTriple {
                            clean: sha256_hex_str(&width.to_string()),
                            spoofed: sha256_hex_str(&spoofed.to_string()),
                            stimulus: sha256_hex_str(&text),
                        };
                        ctx.telemetry.api_call(
                            "Canvas",
                            "measureText",
                            Some(triple),
                            None,
                            timer_elapsed_ms(&start),
                        );
                    }
                }
            }
            Ok(metrics)
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
    safe_hook_method(proto, "measureText", "Canvas", trap)
}

/// OffscreenCanvas serialization: perturb through the (already hooked)
/// context read, then let the native serializer run on the perturbed
/// content.
fn hook_convert_to_blob(
    offscreen_proto: &JsValue,
    native_get_image_data: &JsValue,
    ctx: &Rc<RealmContext>,
) -> Result<(), JsValue> {
    let ctx = ctx.clone();
    let native_gid = native_get_image_data.clone();
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
            let start = timer_start();
            let seed = ctx.identity.borrow().seed.clone();
            let stride = ctx.identity.borrow().stride();

            if let Some(seed) = seed {
                if let Err(e) =
                    perturb_offscreen_content(&this_arg, &native_gid, &seed, stride)
                {
                    ctx.telemetry.api_call(
                        "OffscreenCanvas",
                        "convertToBlob",
                        None,
                        Some(js_error_string(&e)),
                        timer_elapsed_ms(&start),
                    );
                    return call_function(&target, &this_arg, &args);
                }
            }
            let result = call_function(&target, &this_arg, &args);
            ctx.telemetry.api_call(
                "OffscreenCanvas",
                "convertToBlob",
                None,
                result.as_ref().err().map(js_error_string),
                timer_elapsed_ms(&start),
            );
            result
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
    safe_hook_method(offscreen_proto, "convertToBlob", "OffscreenCanvas", trap)
}

fn perturb_offscreen_content(
    canvas: &JsValue,
    native_get_image_data: &JsValue,
    seed: &str,
    stride: usize,
) -> Result<(), JsValue> {
    let width = Reflect::get(canvas, &JsValue::from_str("width"))?
        .as_f64()
        .unwrap_or(0.0);
    let height = Reflect::get(canvas, &JsValue::from_str("height"))?
        .as_f64()
        .unwrap_or(0.0);
    if width <= 0.0 || height <= 0.0 {
        return Ok(());
    }
    let get_context: js_sys::Function = Reflect::get(canvas, &JsValue::from_str("getContext"))?
        .dyn_into()
        .map_err(|_| JsValue::from_str("no getContext"))?;
    let ctx2d = get_context.call1(canvas, &JsValue::from_str("2d"))?;
    if ctx2d.is_null() || ctx2d.is_undefined() {
        return Ok(());
    }
    let gid_args = Array::of4(
        &JsValue::from_f64(0.0),
        &JsValue::from_f64(0.0),
        &JsValue::from_f64(width),
        &JsValue::from_f64(height),
    );
    let image_data = call_function(native_get_image_data, &ctx2d, &gid_args.into())?;
    let data_val = Reflect::get(&image_data, &JsValue::from_str("data"))?;
    let arr: Uint8ClampedArray = data_val
        .dyn_into()
        .map_err(|_| JsValue::from_str("ImageData.data is not a Uint8ClampedArray"))?;
    let mut buffer = vec![0u8; arr.length() as usize];
    arr.copy_to(&mut buffer);
    apply_pixel_noise(&mut buffer, seed, "OffscreenCanvas2D", stride);
    arr.copy_from(&buffer);

    let put: js_sys::Function = Reflect::get(&ctx2d, &JsValue::from_str("putImageData"))?
        .dyn_into()
        .map_err(|_| JsValue::from_str("no putImageData"))?;
    put.call3(
        &ctx2d,
        &image_data,
        &JsValue::from_f64(0.0),
        &JsValue::from_f64(0.0),
    )?;
    Ok(())
}
