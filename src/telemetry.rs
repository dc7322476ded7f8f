//! Telemetry: one structured event per intercepted call, flushed
//! immediately.
//!
//! The event stream is the sole contract with the offline analysis
//! tooling: newline-delimited JSON, each line prefixed with
//! [`TELEMETRY_PREFIX`] on the console channel (and best-effort
//! `postMessage`). The buffer flushes after every single event —
//! batching efficiency is deliberately traded for delivery reliability,
//! since a navigating page can drop a held buffer at any moment.

use std::cell::{Cell, RefCell};

use serde::Serialize;

use crate::config::Mode;
use crate::hashing::HashTriple;
use crate::persona::{now_ms, uuid_v4};

/// Console-line marker the collector greps for.
pub const TELEMETRY_PREFIX: &str = "__VEIL_TELEM__:";

/// Events buffered before a flush. 1 = synchronous per-event flush.
const FLUSH_THRESHOLD: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ApiCall,
    EvasionResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Top,
    Iframe,
    Worker,
    SharedWorker,
    ServiceWorker,
}

impl FrameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Top => "top",
            FrameType::Iframe => "iframe",
            FrameType::Worker => "worker",
            FrameType::SharedWorker => "shared_worker",
            FrameType::ServiceWorker => "service_worker",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputClass {
    ValueHashed,
    ThrewException,
    SystemSignal,
    Unsupported,
}

/// One anti-evasion self-check vector.
#[derive(Debug, Clone, Serialize)]
pub struct EvasionVector {
    pub name: String,
    pub pass: bool,
    pub score: u8,
}

/// Immutable record of one intercepted call or lifecycle point.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub event_type: EventType,
    pub timestamp_ms: u64,
    pub run_id: String,
    pub site_visit_id: String,
    pub persona_id: String,
    pub epoch_id: u32,
    pub mode: Mode,
    pub top_level_site: String,

    pub frame_id: String,
    pub frame_type: FrameType,
    pub full_origin: String,
    pub is_cross_origin_frame: bool,

    pub surface_name: String,
    pub api_name: String,
    pub call_index: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<HashTriple>,
    pub output_class: OutputClass,

    pub error_flag: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub timing_ms: f64,
    pub lie_flags: Vec<String>,
    pub trace_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_pass: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vectors: Option<Vec<EvasionVector>>,
}

/// Where flushed lines go. The browser sink writes console +
/// `postMessage`; tests collect lines in memory.
pub trait TelemetrySink {
    fn emit(&self, line: &str);
}

/// Identity fields stamped onto every event; refreshed on rotation.
#[derive(Debug, Clone, Default)]
pub struct EventScope {
    pub run_id: Option<String>,
    pub site_visit_id: Option<String>,
    pub persona_id: Option<String>,
    pub epoch_id: u32,
    pub mode: Mode,
    pub top_level_site: Option<String>,
}

/// Where in the frame tree this realm sits; fixed for the realm's life.
#[derive(Debug, Clone)]
pub struct RealmInfo {
    pub frame_type: FrameType,
    pub frame_id: String,
    pub full_origin: String,
    pub is_cross_origin: bool,
}

impl Default for RealmInfo {
    fn default() -> Self {
        RealmInfo {
            frame_type: FrameType::Top,
            frame_id: uuid_v4(&mut rand::thread_rng()),
            full_origin: "unknown".to_string(),
            is_cross_origin: false,
        }
    }
}

/// Per-realm logger. Single-threaded by construction (one realm, one
/// call stack), hence `Cell`/`RefCell` interior mutability.
pub struct TelemetryLogger {
    info: RealmInfo,
    scope: RefCell<EventScope>,
    call_index: Cell<u64>,
    buffer: RefCell<Vec<TelemetryEvent>>,
    sink: Box<dyn TelemetrySink>,
}

impl TelemetryLogger {
    pub fn new(info: RealmInfo, scope: EventScope, sink: Box<dyn TelemetrySink>) -> Self {
        TelemetryLogger {
            info,
            scope: RefCell::new(scope),
            call_index: Cell::new(0),
            buffer: RefCell::new(Vec::new()),
            sink,
        }
    }

    /// Re-stamp identity fields after a rotation or broadcast update.
    pub fn update_scope(&self, scope: EventScope) {
        *self.scope.borrow_mut() = scope;
    }

    pub fn call_count(&self) -> u64 {
        self.call_index.get()
    }

    /// Record an intercepted API call.
    pub fn api_call(
        &self,
        surface: &str,
        api: &str,
        output: Option<HashTriple>,
        error: Option<String>,
        timing_ms: f64,
    ) {
        let lied = output.as_ref().map(|t| t.lied()).unwrap_or(false);
        let output_class = if error.is_some() {
            OutputClass::ThrewException
        } else if output.is_some() {
            OutputClass::ValueHashed
        } else {
            OutputClass::Unsupported
        };
        let mut event = self.base_event(EventType::ApiCall, surface, api);
        event.output = output;
        event.output_class = output_class;
        event.error_flag = error.is_some();
        event.error_message = error.map(|m| m.chars().take(100).collect());
        event.timing_ms = timing_ms;
        if lied {
            event.lie_flags.push("noise_injected".to_string());
        }
        self.push(event);
    }

    /// Record a lifecycle point (realm init, hook installation note).
    pub fn system_event(&self, api: &str) {
        let mut event = self.base_event(EventType::ApiCall, "system", api);
        event.output_class = OutputClass::SystemSignal;
        self.push(event);
    }

    /// Record the once-per-realm anti-evasion self-check.
    pub fn evasion_result(&self, vectors: Vec<EvasionVector>) {
        let mut event = self.base_event(EventType::EvasionResult, "system", "evasion_check");
        event.output_class = OutputClass::SystemSignal;
        event.overall_pass = Some(vectors.iter().all(|v| v.pass));
        event.vectors = Some(vectors);
        self.push(event);
    }

    fn base_event(&self, event_type: EventType, surface: &str, api: &str) -> TelemetryEvent {
        let index = self.call_index.get() + 1;
        self.call_index.set(index);
        let scope = self.scope.borrow();
        TelemetryEvent {
            event_type,
            timestamp_ms: now_ms(),
            run_id: unknown_or(&scope.run_id),
            site_visit_id: unknown_or(&scope.site_visit_id),
            persona_id: unknown_or(&scope.persona_id),
            epoch_id: scope.epoch_id,
            mode: scope.mode,
            top_level_site: unknown_or(&scope.top_level_site),
            frame_id: self.info.frame_id.clone(),
            frame_type: self.info.frame_type,
            full_origin: self.info.full_origin.clone(),
            is_cross_origin_frame: self.info.is_cross_origin,
            surface_name: surface.to_string(),
            api_name: api.to_string(),
            call_index: index,
            output: None,
            output_class: OutputClass::Unsupported,
            error_flag: false,
            error_message: None,
            timing_ms: 0.0,
            lie_flags: Vec::new(),
            trace_id: uuid_v4(&mut rand::thread_rng()),
            overall_pass: None,
            vectors: None,
        }
    }

    fn push(&self, event: TelemetryEvent) {
        self.buffer.borrow_mut().push(event);
        if self.buffer.borrow().len() >= FLUSH_THRESHOLD {
            self.flush();
        }
    }

    /// Drain the buffer to the sink, one JSON line per event.
    pub fn flush(&self) {
        let events: Vec<TelemetryEvent> = self.buffer.borrow_mut().drain(..).collect();
        for event in events {
            match serde_json::to_string(&event) {
                Ok(json) => self.sink.emit(&format!("{}{}", TELEMETRY_PREFIX, json)),
                Err(e) => log::warn!("telemetry event not serializable: {}", e),
            }
        }
    }
}

fn unknown_or(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[derive(Default)]
    struct CollectorSink {
        lines: RefCell<Vec<String>>,
    }

    impl TelemetrySink for Rc<CollectorSink> {
        fn emit(&self, line: &str) {
            self.lines.borrow_mut().push(line.to_string());
        }
    }

    fn logger() -> (TelemetryLogger, Rc<CollectorSink>) {
        let sink = Rc::new(CollectorSink::default());
        let scope = EventScope {
            run_id: Some("r1".into()),
            persona_id: Some("P1".into()),
            epoch_id: 2,
            mode: Mode::Privacy,
            ..EventScope::default()
        };
        let logger = TelemetryLogger::new(RealmInfo::default(), scope, Box::new(sink.clone()));
        (logger, sink)
    }

    #[test]
    fn every_event_flushes_immediately() {
        let (logger, sink) = logger();
        logger.system_event("init");
        assert_eq!(sink.lines.borrow().len(), 1);
        logger.api_call("Canvas", "getImageData", None, None, 0.4);
        assert_eq!(sink.lines.borrow().len(), 2);
    }

    #[test]
    fn lines_carry_prefix_and_schema_fields() {
        let (logger, sink) = logger();
        let triple = HashTriple {
            clean: "c".into(),
            spoofed: "s".into(),
            stimulus: "x".into(),
        };
        logger.api_call("Canvas", "getImageData", Some(triple), None, 1.25);

        let line = sink.lines.borrow()[0].clone();
        assert!(line.starts_with(TELEMETRY_PREFIX));
        let json: serde_json::Value =
            serde_json::from_str(line.strip_prefix(TELEMETRY_PREFIX).unwrap()).unwrap();
        assert_eq!(json["event_type"], "api_call");
        assert_eq!(json["run_id"], "r1");
        assert_eq!(json["persona_id"], "P1");
        assert_eq!(json["epoch_id"], 2);
        assert_eq!(json["mode"], "privacy");
        assert_eq!(json["frame_type"], "top");
        assert_eq!(json["surface_name"], "Canvas");
        assert_eq!(json["api_name"], "getImageData");
        assert_eq!(json["call_index"], 1);
        assert_eq!(json["output"]["clean"], "c");
        assert_eq!(json["output"]["spoofed"], "s");
        assert_eq!(json["output"]["stimulus"], "x");
        assert_eq!(json["output_class"], "VALUE_HASHED");
        assert_eq!(json["error_flag"], false);
        assert_eq!(json["lie_flags"][0], "noise_injected");
    }

    #[test]
    fn call_index_is_monotonic() {
        let (logger, sink) = logger();
        for _ in 0..5 {
            logger.api_call("Canvas", "getImageData", None, None, 0.0);
        }
        let indices: Vec<u64> = sink
            .lines
            .borrow()
            .iter()
            .map(|l| {
                let json: serde_json::Value =
                    serde_json::from_str(l.strip_prefix(TELEMETRY_PREFIX).unwrap()).unwrap();
                json["call_index"].as_u64().unwrap()
            })
            .collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn errors_are_truncated_and_flagged() {
        let (logger, sink) = logger();
        let long = "x".repeat(500);
        logger.api_call("Canvas", "toDataURL", None, Some(long), 0.0);
        let json: serde_json::Value = serde_json::from_str(
            sink.lines.borrow()[0]
                .strip_prefix(TELEMETRY_PREFIX)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(json["error_flag"], true);
        assert_eq!(json["output_class"], "THREW_EXCEPTION");
        assert_eq!(json["error_message"].as_str().unwrap().len(), 100);
    }

    #[test]
    fn clean_only_output_has_no_lie_flag() {
        let (logger, sink) = logger();
        let triple = HashTriple::clean_only("c".into(), "x".into());
        logger.api_call("Canvas", "getImageData", Some(triple), None, 0.0);
        let json: serde_json::Value = serde_json::from_str(
            sink.lines.borrow()[0]
                .strip_prefix(TELEMETRY_PREFIX)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(json["lie_flags"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn evasion_event_shape() {
        let (logger, sink) = logger();
        logger.evasion_result(vec![
            EvasionVector {
                name: "tostring_integrity".into(),
                pass: true,
                score: 1,
            },
            EvasionVector {
                name: "descriptor_integrity".into(),
                pass: false,
                score: 0,
            },
        ]);
        let json: serde_json::Value = serde_json::from_str(
            sink.lines.borrow()[0]
                .strip_prefix(TELEMETRY_PREFIX)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(json["event_type"], "evasion_result");
        assert_eq!(json["overall_pass"], false);
        assert_eq!(json["vectors"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn scope_update_restamps_identity() {
        let (logger, sink) = logger();
        logger.update_scope(EventScope {
            persona_id: Some("P2".into()),
            epoch_id: 9,
            mode: Mode::Compat,
            ..EventScope::default()
        });
        logger.system_event("identity_update");
        let json: serde_json::Value = serde_json::from_str(
            sink.lines.borrow()[0]
                .strip_prefix(TELEMETRY_PREFIX)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(json["persona_id"], "P2");
        assert_eq!(json["epoch_id"], 9);
        assert_eq!(json["mode"], "compat");
    }
}
