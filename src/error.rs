//! Error taxonomy for the identity obfuscation engine.
//!
//! Every failure class here degrades to "behave like an unmodified
//! browser": installation failures skip the hook, noise failures return
//! the clean result, propagation failures leave the realm unhooked.
//! Nothing in this taxonomy is ever thrown into page code.

use thiserror::Error;
use wasm_bindgen::JsValue;

pub type Result<T> = std::result::Result<T, VeilError>;

#[derive(Error, Debug, Clone)]
pub enum VeilError {
    /// A targeted native method was absent or already wrapped.
    #[error("install skipped on {surface}.{api}: {reason}")]
    Install {
        surface: String,
        api: String,
        reason: String,
    },

    /// A per-surface noise algorithm failed mid-application.
    #[error("noise application failed: {0}")]
    Noise(String),

    /// Cross-realm access denied or message delivery failure.
    #[error("propagation failed: {0}")]
    Propagation(String),

    /// Policy map or session store could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// Malformed or missing run configuration.
    #[error("config error: {0}")]
    Config(String),

    /// RNG failure while minting a persona or identity seed.
    #[error("entropy failure: {0}")]
    Entropy(String),

    /// The introspection guard could not be installed.
    #[error("introspection guard failed: {0}")]
    Introspection(String),
}

impl VeilError {
    pub fn install(surface: &str, api: &str, reason: impl Into<String>) -> Self {
        VeilError::Install {
            surface: surface.to_string(),
            api: api.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<VeilError> for JsValue {
    fn from(e: VeilError) -> JsValue {
        JsValue::from_str(&e.to_string())
    }
}

impl From<JsValue> for VeilError {
    fn from(v: JsValue) -> VeilError {
        VeilError::Propagation(v.as_string().unwrap_or_else(|| format!("{:?}", v)))
    }
}
