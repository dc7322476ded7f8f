//! Identity Engine WASM Integration Tests
//!
//! Run with: wasm-pack test --headless --chrome
//! (or --firefox)

#![cfg(target_arch = "wasm32")]

use js_sys::{Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

/// Boot once for the whole test page; the realm-level install marker
/// makes every later call a no-op returning the live summary.
fn ensure_booted() -> JsValue {
    let options = Object::new();
    Reflect::set(
        &options,
        &JsValue::from_str("mode"),
        &JsValue::from_str("compat"),
    )
    .unwrap();
    Reflect::set(
        &options,
        &JsValue::from_str("run_id"),
        &JsValue::from_str("wasm-test"),
    )
    .unwrap();
    persona_veil::boot(options.into()).expect("boot should succeed")
}

fn active_seed() -> Option<String> {
    let identity = persona_veil::active_identity();
    Reflect::get(&identity, &JsValue::from_str("seed"))
        .ok()
        .and_then(|s| s.as_string())
}

// ===== Boot / identity =====

#[wasm_bindgen_test]
fn boot_installs_hooks_and_derives_seed() {
    let summary = ensure_booted();

    let noise_active = Reflect::get(&summary, &JsValue::from_str("noise_active"))
        .unwrap()
        .as_bool()
        .unwrap();
    assert!(noise_active, "compat mode with a policy persona must noise");

    let installed = Reflect::get(&summary, &JsValue::from_str("installed")).unwrap();
    let arr: &js_sys::Array = installed.unchecked_ref();
    assert!(
        arr.length() >= 5,
        "expected several installed hooks, got {}",
        arr.length()
    );

    let identity = persona_veil::active_identity();
    let persona_id = Reflect::get(&identity, &JsValue::from_str("persona_id"))
        .unwrap()
        .as_string()
        .expect("policy persona id");
    let seed = active_seed().expect("working seed");
    assert_eq!(seed, format!("compat_{}", persona_id));
}

#[wasm_bindgen_test]
fn repeated_boot_is_a_noop() {
    let first = ensure_booted();
    let second = ensure_booted();
    let id = |s: &JsValue| {
        Reflect::get(s, &JsValue::from_str("persona_id"))
            .unwrap()
            .as_string()
    };
    assert_eq!(id(&first), id(&second), "identity must survive reinjection");
}

#[wasm_bindgen_test]
fn reinjection_does_not_double_wrap() {
    ensure_booted();
    let before = js_sys::eval("CanvasRenderingContext2D.prototype.getImageData").unwrap();
    ensure_booted();
    let after = js_sys::eval("CanvasRenderingContext2D.prototype.getImageData").unwrap();
    assert!(
        js_sys::Object::is(&before, &after),
        "hook was re-wrapped on reinjection"
    );
}

// ===== Canvas =====

const SCENE: &str = "var c = document.createElement('canvas'); \
     c.width = 64; c.height = 64; \
     var x = c.getContext('2d'); \
     x.fillStyle = 'rgb(120,10,200)'; x.fillRect(0, 0, 64, 64); \
     Array.from(x.getImageData(0, 0, 64, 64).data).join(',')";

#[wasm_bindgen_test]
fn canvas_noise_is_deterministic_per_scene() {
    ensure_booted();
    let a = js_sys::eval(SCENE).unwrap().as_string().unwrap();
    let b = js_sys::eval(SCENE).unwrap().as_string().unwrap();
    assert_eq!(a, b, "same seed + same scene must draw the same noise");
}

#[wasm_bindgen_test]
fn canvas_noise_actually_perturbs() {
    ensure_booted();
    let noisy = js_sys::eval(SCENE).unwrap().as_string().unwrap();
    // The clean scene is a solid opaque fill: every pixel [120,10,200,255].
    let expected: Vec<&str> = ["120", "10", "200", "255"]
        .iter()
        .cycle()
        .take(64 * 64 * 4)
        .copied()
        .collect();
    let actual: Vec<&str> = noisy.split(',').collect();
    assert_eq!(actual.len(), expected.len());
    let diffs = actual
        .iter()
        .zip(expected.iter())
        .filter(|(a, e)| a != e)
        .count();
    assert!(diffs > 0, "no pixel was perturbed");
}

// ===== Anti-evasion =====

#[wasm_bindgen_test]
fn hooked_method_introspects_as_native() {
    ensure_booted();
    let source = js_sys::eval(
        "CanvasRenderingContext2D.prototype.getImageData.toString()",
    )
    .unwrap()
    .as_string()
    .unwrap();
    assert!(
        source.contains("[native code]"),
        "wrapper leaked its source: {}",
        source
    );

    let tostring_self = js_sys::eval(
        "Function.prototype.toString.call(Function.prototype.toString)",
    )
    .unwrap()
    .as_string()
    .unwrap();
    assert_eq!(tostring_self, "function toString() { [native code] }");
}

#[wasm_bindgen_test]
fn hooked_descriptor_stays_configurable() {
    ensure_booted();
    let configurable = js_sys::eval(
        "Object.getOwnPropertyDescriptor(CanvasRenderingContext2D.prototype, 'getImageData').configurable",
    )
    .unwrap();
    assert_eq!(configurable, JsValue::TRUE);
}

// ===== Coherence =====

#[wasm_bindgen_test]
fn navigator_reports_the_persona() {
    ensure_booted();
    let identity = persona_veil::active_identity();
    let navigator = Reflect::get(&identity, &JsValue::from_str("navigator")).unwrap();
    let expected_ua = Reflect::get(&navigator, &JsValue::from_str("user_agent"))
        .unwrap()
        .as_string()
        .unwrap();
    let expected_platform = Reflect::get(&navigator, &JsValue::from_str("platform"))
        .unwrap()
        .as_string()
        .unwrap();

    let ua = js_sys::eval("navigator.userAgent").unwrap().as_string().unwrap();
    let platform = js_sys::eval("navigator.platform").unwrap().as_string().unwrap();
    assert_eq!(ua, expected_ua);
    assert_eq!(platform, expected_platform);
}

#[wasm_bindgen_test]
fn webgl_vendor_comes_from_the_persona() {
    ensure_booted();
    let identity = persona_veil::active_identity();
    let gpu = Reflect::get(&identity, &JsValue::from_str("webgl")).unwrap();
    let expected_vendor = Reflect::get(&gpu, &JsValue::from_str("vendor"))
        .unwrap()
        .as_string()
        .unwrap();

    // Headless runs may have no GL context at all; null skips the check.
    let reported = js_sys::eval(
        "(function () { \
           var c = document.createElement('canvas'); \
           var gl = c.getContext('webgl') || c.getContext('webgl2'); \
           if (!gl) return null; \
           return gl.getParameter(0x9245); \
         })()",
    )
    .unwrap();
    if !reported.is_null() {
        assert_eq!(reported.as_string().unwrap(), expected_vendor);
    }
}

// ===== Worker propagation =====

#[wasm_bindgen_test]
async fn worker_inherits_the_working_seed() {
    ensure_booted();
    let parent_seed = active_seed().expect("parent seed");

    let promise: js_sys::Promise = js_sys::eval(
        "new Promise(function (resolve) { \
           var code = \"postMessage({veilSeed: (self.__VEIL_CACHE__ || {}).seed || null});\"; \
           var url = URL.createObjectURL(new Blob([code], {type: 'application/javascript'})); \
           var w = new Worker(url); \
           var done = false; \
           w.addEventListener('message', function (e) { \
             if (!done && e.data && typeof e.data === 'object' && 'veilSeed' in e.data) { \
               done = true; resolve(e.data.veilSeed); \
             } \
           }); \
           setTimeout(function () { if (!done) resolve('timeout'); }, 8000); \
         })",
    )
    .unwrap()
    .unchecked_into();

    let seed = JsFuture::from(promise).await.unwrap();
    assert_eq!(
        seed.as_string().as_deref(),
        Some(parent_seed.as_str()),
        "worker realm must carry the parent's working seed"
    );
}

// ===== Bootstrap numeric parity =====

/// Extract a section of the worker bootstrap and eval it in the page:
/// the embedded JS generator must draw the same sequence as the Rust
/// port, or worker hashes would silently diverge from parent hashes.
fn bootstrap_section(from: &str, to: &str) -> String {
    let cache = persona_veil::IdentityCache::default();
    let config = persona_veil::RunConfig::default();
    let source =
        persona_veil::propagation::bootstrap::bootstrap_source(&cache, &config).unwrap();
    let start = source.find(from).expect("section start");
    let end = source[start..].find(to).expect("section end") + start;
    source[start..end].to_string()
}

#[wasm_bindgen_test]
fn bootstrap_prng_matches_rust_port() {
    let prng_js = bootstrap_section("function veilSeed", "var SHA_K");
    for seed in ["compat_P1", "priv_P1_1", "priv_P1_2", ""] {
        // Draws scale back to exact u32s, so no float-formatting
        // ambiguity enters the comparison.
        let script = format!(
            "(function () {{ {} var r = veilRand('{}'); \
               return [r() * 4294967296, r() * 4294967296, r() * 4294967296].join(','); }})()",
            prng_js, seed
        );
        let js_draws = js_sys::eval(&script).unwrap().as_string().unwrap();

        let mut prng = persona_veil::noise::SeededPrng::from_seed_str(seed);
        let rust_draws: Vec<String> = (0..3).map(|_| prng.next_u32().to_string()).collect();
        assert_eq!(
            js_draws,
            rust_draws.join(","),
            "PRNG divergence for seed {:?}",
            seed
        );
    }
}

#[wasm_bindgen_test]
fn bootstrap_sha256_matches_rust_port() {
    let prng_js = bootstrap_section("function veilSeed", "var SHA_K");
    let sha_js = bootstrap_section("var SHA_K", "function snippet");
    for input in ["abc", "", "compat_P1_0,1,2,3_Canvas2D"] {
        let script = format!(
            "(function () {{ {} {} return veilSha256('{}'); }})()",
            prng_js, sha_js, input
        );
        let js_hash = js_sys::eval(&script).unwrap().as_string().unwrap();
        assert_eq!(
            js_hash,
            persona_veil::hashing::sha256_hex_str(input),
            "SHA-256 divergence for {:?}",
            input
        );
    }
}
