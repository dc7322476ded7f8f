//! Self-contained worker bootstrap builder.
//!
//! Workers cannot be hooked from outside, so the `Worker` constructor
//! wrapper prepends this unit — serialized identity snapshot, a minimal
//! telemetry relay and the interception set — to the worker's own script
//! body. The JS here mirrors `noise::prng` and the pixel algorithm
//! constant-for-constant: a worker realm must derive the same spoofed
//! hash as its parent for the same stimulus, or the provenance stream
//! would read as drift.

use crate::config::RunConfig;
use crate::error::{Result, VeilError};
use crate::seed::IdentityCache;

/// Build the bootstrap prelude for one worker, embedding the current
/// identity snapshot and run configuration as JSON literals.
pub fn bootstrap_source(cache: &IdentityCache, config: &RunConfig) -> Result<String> {
    let cache_json =
        serde_json::to_string(cache).map_err(|e| VeilError::Propagation(e.to_string()))?;
    let config_json =
        serde_json::to_string(config).map_err(|e| VeilError::Propagation(e.to_string()))?;
    Ok(BOOTSTRAP_TEMPLATE
        .replace("__CACHE_JSON__", &cache_json)
        .replace("__CONFIG_JSON__", &config_json))
}

const BOOTSTRAP_TEMPLATE: &str = r#"(function () {
  var g = (typeof self !== "undefined") ? self : globalThis;
  if (g.__VEIL_INSTALLED__) return;
  g.__VEIL_INSTALLED__ = true;
  g.__VEIL_CONFIG__ = __CONFIG_JSON__;
  var cache = __CACHE_JSON__;
  g.__VEIL_CACHE__ = cache;

  var callIndex = 0;
  function uuid() {
    return "xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx".replace(/[xy]/g, function (c) {
      var r = (Math.random() * 16) | 0;
      return (c === "x" ? r : (r & 0x3) | 0x8).toString(16);
    });
  }
  var frameId = uuid();
  function emit(surface, api, output, err, ms) {
    try {
      callIndex += 1;
      var lied = !!(output && output.clean !== output.spoofed);
      var ev = {
        event_type: "api_call",
        timestamp_ms: Date.now(),
        run_id: cache.run_id || "unknown",
        site_visit_id: cache.site_visit_id || "unknown",
        persona_id: cache.persona_id || "unknown",
        epoch_id: cache.epoch_id || 0,
        mode: cache.mode || "disabled",
        top_level_site: "unknown",
        frame_id: frameId,
        frame_type: "worker",
        full_origin: (g.location && g.location.href) || "unknown",
        is_cross_origin_frame: false,
        surface_name: surface,
        api_name: api,
        call_index: callIndex,
        output: output || undefined,
        output_class: err ? "THREW_EXCEPTION" : (output ? "VALUE_HASHED" : "SYSTEM_SIGNAL"),
        error_flag: !!err,
        error_message: err ? String(err).slice(0, 100) : undefined,
        timing_ms: ms || 0,
        lie_flags: lied ? ["noise_injected"] : [],
        trace_id: uuid()
      };
      var line = "__VEIL_TELEM__:" + JSON.stringify(ev);
      console.log(line);
      try { postMessage(line); } catch (e) {}
    } catch (e) {}
  }

  function veilSeed(str) {
    var h = 1779033703 ^ str.length;
    for (var i = 0; i < str.length; i++) {
      h = Math.imul(h ^ str.charCodeAt(i), 3432918353);
      h = (h << 13) | (h >>> 19);
    }
    h = Math.imul(h ^ (h >>> 16), 2246822507);
    h = Math.imul(h ^ (h >>> 13), 3266489909);
    return (h ^ (h >>> 16)) >>> 0;
  }
  function veilRand(seedStr) {
    var a = veilSeed(seedStr);
    return function () {
      a = (a + 0x6D2B79F5) | 0;
      var t = a;
      t = Math.imul(t ^ (t >>> 15), t | 1);
      t ^= t + Math.imul(t ^ (t >>> 7), t | 61);
      return ((t ^ (t >>> 14)) >>> 0) / 4294967296;
    };
  }

  var SHA_K = [
    0x428a2f98, 0x71374491, 0xb5c0fbcf, 0xe9b5dba5, 0x3956c25b, 0x59f111f1, 0x923f82a4, 0xab1c5ed5,
    0xd807aa98, 0x12835b01, 0x243185be, 0x550c7dc3, 0x72be5d74, 0x80deb1fe, 0x9bdc06a7, 0xc19bf174,
    0xe49b69c1, 0xefbe4786, 0x0fc19dc6, 0x240ca1cc, 0x2de92c6f, 0x4a7484aa, 0x5cb0a9dc, 0x76f988da,
    0x983e5152, 0xa831c66d, 0xb00327c8, 0xbf597fc7, 0xc6e00bf3, 0xd5a79147, 0x06ca6351, 0x14292967,
    0x27b70a85, 0x2e1b2138, 0x4d2c6dfc, 0x53380d13, 0x650a7354, 0x766a0abb, 0x81c2c92e, 0x92722c85,
    0xa2bfe8a1, 0xa81a664b, 0xc24b8b70, 0xc76c51a3, 0xd192e819, 0xd6990624, 0xf40e3585, 0x106aa070,
    0x19a4c116, 0x1e376c08, 0x2748774c, 0x34b0bcb5, 0x391c0cb3, 0x4ed8aa4a, 0x5b9cca4f, 0x682e6ff3,
    0x748f82ee, 0x78a5636f, 0x84c87814, 0x8cc70208, 0x90befffa, 0xa4506ceb, 0xbef9a3f7, 0xc67178f2
  ];
  function veilSha256(input) {
    var bytes = [];
    if (typeof input === "string") {
      for (var i = 0; i < input.length; i++) {
        var c = input.charCodeAt(i);
        if (c < 128) bytes.push(c);
        else if (c < 2048) bytes.push(192 | (c >> 6), 128 | (c & 63));
        else bytes.push(224 | (c >> 12), 128 | ((c >> 6) & 63), 128 | (c & 63));
      }
    } else {
      bytes = Array.prototype.slice.call(input);
    }
    function rr(v, a) { return (v >>> a) | (v << (32 - a)); }
    var H = [0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19];
    var bitLen = bytes.length * 8;
    bytes.push(0x80);
    while (bytes.length % 64 !== 56) bytes.push(0);
    for (var i = 7; i >= 0; i--) bytes.push((bitLen / Math.pow(2, 8 * i)) & 255);
    var w = new Array(64);
    for (var off = 0; off < bytes.length; off += 64) {
      for (var i = 0; i < 16; i++) {
        w[i] = (bytes[off + 4 * i] << 24) | (bytes[off + 4 * i + 1] << 16) |
               (bytes[off + 4 * i + 2] << 8) | bytes[off + 4 * i + 3];
      }
      for (var i = 16; i < 64; i++) {
        var s0 = rr(w[i - 15], 7) ^ rr(w[i - 15], 18) ^ (w[i - 15] >>> 3);
        var s1 = rr(w[i - 2], 17) ^ rr(w[i - 2], 19) ^ (w[i - 2] >>> 10);
        w[i] = (w[i - 16] + s0 + w[i - 7] + s1) | 0;
      }
      var a = H[0], b = H[1], c = H[2], d = H[3], e = H[4], f = H[5], gg = H[6], h = H[7];
      for (var i = 0; i < 64; i++) {
        var S1 = rr(e, 6) ^ rr(e, 11) ^ rr(e, 25);
        var ch = (e & f) ^ (~e & gg);
        var t1 = (h + S1 + ch + SHA_K[i] + w[i]) | 0;
        var S0 = rr(a, 2) ^ rr(a, 13) ^ rr(a, 22);
        var maj = (a & b) ^ (a & c) ^ (b & c);
        var t2 = (S0 + maj) | 0;
        h = gg; gg = f; f = e; e = (d + t1) | 0; d = c; c = b; b = a; a = (t1 + t2) | 0;
      }
      H[0] = (H[0] + a) | 0; H[1] = (H[1] + b) | 0; H[2] = (H[2] + c) | 0; H[3] = (H[3] + d) | 0;
      H[4] = (H[4] + e) | 0; H[5] = (H[5] + f) | 0; H[6] = (H[6] + gg) | 0; H[7] = (H[7] + h) | 0;
    }
    var out = "";
    for (var i = 0; i < 8; i++) out += ("00000000" + ((H[i] >>> 0).toString(16))).slice(-8);
    return out;
  }

  function snippet(data) { return Array.prototype.slice.call(data, 0, 100).join(","); }
  function perturb(data, seed, surface) {
    var derived = veilSha256(seed + "_" + snippet(data) + "_" + surface);
    var rand = veilRand(derived);
    var stride = (cache.mode === "privacy") ? 32 : 64;
    for (var i = 0; i < data.length; i += stride) {
      if (rand() > 0.5) data[i] = data[i] ^ 1;
    }
  }

  var hookMap = (typeof WeakMap !== "undefined") ? new WeakMap() : null;
  function disguise(wrapped, original) {
    if (!hookMap) return;
    try { hookMap.set(wrapped, Function.prototype.toString.call(original)); } catch (e) {}
  }
  (function () {
    try {
      if (!hookMap) return;
      var proto = Function.prototype;
      if (proto.__VEIL_TOSTRING_HOOKED__) return;
      var native = proto.toString;
      var nativeStr = native.call(native);
      var guard = function toString() {
        if (hookMap.has(this)) return hookMap.get(this);
        if (this === guard) return nativeStr;
        return native.apply(this, arguments);
      };
      hookMap.set(guard, nativeStr);
      Object.defineProperty(proto, "toString", {
        value: guard, writable: true, configurable: true, enumerable: false
      });
      proto.__VEIL_TOSTRING_HOOKED__ = true;
    } catch (e) {}
  })();

  function hookMethod(proto, name, makeWrapper) {
    try {
      if (!proto || typeof proto[name] !== "function") return;
      var original = proto[name];
      if (original.__veil_wrapped__) return;
      var wrapped = makeWrapper(original);
      Object.defineProperty(wrapped, "__veil_wrapped__", { value: true });
      disguise(wrapped, original);
      var desc = Object.getOwnPropertyDescriptor(proto, name);
      Object.defineProperty(proto, name, {
        value: wrapped, writable: true, configurable: true,
        enumerable: desc ? desc.enumerable : true
      });
    } catch (e) {}
  }

  if (g.OffscreenCanvasRenderingContext2D) {
    hookMethod(g.OffscreenCanvasRenderingContext2D.prototype, "getImageData", function (original) {
      return function () {
        var t0 = Date.now();
        var result = original.apply(this, arguments);
        try {
          var data = result.data;
          var clean = veilSha256(Array.prototype.slice.call(data));
          if (cache.seed) {
            perturb(data, cache.seed, "OffscreenCanvas2D");
            var spoofed = veilSha256(Array.prototype.slice.call(data));
            emit("OffscreenCanvas", "getImageData",
                 { clean: clean, spoofed: spoofed, stimulus: clean }, null, Date.now() - t0);
          } else {
            emit("OffscreenCanvas", "getImageData",
                 { clean: clean, spoofed: clean, stimulus: clean }, null, Date.now() - t0);
          }
        } catch (e) {
          emit("OffscreenCanvas", "getImageData", null, e && e.message, Date.now() - t0);
        }
        return result;
      };
    });
  }

  ["WebGLRenderingContext", "WebGL2RenderingContext"].forEach(function (name) {
    var ctor = g[name];
    if (!ctor) return;
    hookMethod(ctor.prototype, "readPixels", function (original) {
      return function (x, y, w, h, format, type, pixels) {
        var t0 = Date.now();
        original.apply(this, arguments);
        try {
          if (pixels && pixels.length) {
            var clean = veilSha256(Array.prototype.slice.call(pixels));
            var stim = veilSha256(name + "_" + x + "_" + y + "_" + w + "_" + h);
            if (cache.seed) {
              perturb(pixels, cache.seed, name);
              var spoofed = veilSha256(Array.prototype.slice.call(pixels));
              emit("WebGL", "readPixels",
                   { clean: clean, spoofed: spoofed, stimulus: stim }, null, Date.now() - t0);
            } else {
              emit("WebGL", "readPixels",
                   { clean: clean, spoofed: clean, stimulus: stim }, null, Date.now() - t0);
            }
          }
        } catch (e) {
          emit("WebGL", "readPixels", null, e && e.message, Date.now() - t0);
        }
      };
    });
    hookMethod(ctor.prototype, "getParameter", function (original) {
      return function (p) {
        if (cache.webgl) {
          if (p === 0x9245 || p === 0x1F00) return cache.webgl.vendor;
          if (p === 0x9246 || p === 0x1F01) return cache.webgl.renderer;
        }
        return original.apply(this, arguments);
      };
    });
  });

  try {
    if (cache.navigator && g.WorkerNavigator) {
      var navProto = g.WorkerNavigator.prototype;
      var props = {
        userAgent: cache.navigator.user_agent,
        platform: cache.navigator.platform,
        hardwareConcurrency: cache.navigator.hardware_concurrency,
        deviceMemory: cache.navigator.device_memory
      };
      Object.keys(props).forEach(function (prop) {
        try {
          Object.defineProperty(navProto, prop, {
            get: function () { return props[prop]; },
            configurable: true, enumerable: true
          });
        } catch (e) {}
      });
    }
  } catch (e) {}

  g.addEventListener && g.addEventListener("message", function (event) {
    try {
      if (event.data && event.data.type === "VEIL_UPDATE") {
        cache = event.data.detail || cache;
        g.__VEIL_CACHE__ = cache;
      }
    } catch (e) {}
  });

  emit("system", "init", null, null, 0);
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    fn sample_cache() -> IdentityCache {
        IdentityCache {
            seed: Some("compat_P1".to_string()),
            mode: Mode::Compat,
            persona_id: Some("P1".to_string()),
            epoch_id: 1,
            ..IdentityCache::default()
        }
    }

    #[test]
    fn bootstrap_embeds_cache_and_config() {
        let src = bootstrap_source(&sample_cache(), &RunConfig::default()).unwrap();
        assert!(src.contains(r#""seed":"compat_P1""#));
        assert!(src.contains(r#""persona_id":"P1""#));
        assert!(!src.contains("__CACHE_JSON__"));
        assert!(!src.contains("__CONFIG_JSON__"));
    }

    #[test]
    fn bootstrap_is_guarded_and_self_contained() {
        let src = bootstrap_source(&sample_cache(), &RunConfig::default()).unwrap();
        assert!(src.contains("__VEIL_INSTALLED__"));
        assert!(src.contains("__VEIL_TELEM__:"));
        assert!(src.contains("VEIL_UPDATE"));
        // The embedded generator carries the same constants as the Rust
        // port; a drifted constant would desynchronize worker hashes.
        for constant in ["1779033703", "3432918353", "2246822507", "3266489909", "0x6D2B79F5"] {
            assert!(src.contains(constant), "missing PRNG constant {}", constant);
        }
    }

    #[test]
    fn cache_json_is_inert_in_template() {
        // A malicious-looking seed must not escape the JSON literal.
        let mut cache = sample_cache();
        cache.seed = Some("\");} alert(1); //".to_string());
        let src = bootstrap_source(&cache, &RunConfig::default()).unwrap();
        assert!(src.contains(r#"\");} alert(1); //"#));
    }
}
