//! Mock hardware adapters for integration tests.
//!
//! Every mock keeps its observable state behind an `Arc` so tests can
//! hand the mock to a link or a task (which takes ownership) and still
//! assert on the full call history afterwards.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use embedded_hal::digital::{ErrorType, OutputPin};
use seizen::app::link::Value;
use seizen::app::ports::{Clock, LinkEvents, LinkPort, RadioPort, ValueSource};
use seizen::config::PairingConfig;
use seizen::error::LinkError;

// ── Radio call record ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RadioCall {
    Init(String),
    Security(PairingConfig),
    CreateService {
        service: u128,
        characteristic: u128,
        initial: String,
    },
    StartAdvertising,
    Write(String),
}

#[derive(Default)]
pub struct RadioLog {
    pub calls: Mutex<Vec<RadioCall>>,
    pub fail_init: AtomicBool,
    pub fail_advertising: AtomicBool,
    pub fail_writes: AtomicBool,
    events: Mutex<Option<Weak<dyn LinkEvents>>>,
}

#[allow(dead_code)]
impl RadioLog {
    pub fn calls(&self) -> Vec<RadioCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RadioCall::Write(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn advert_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == RadioCall::StartAdvertising)
            .count()
    }

    /// The link as the stack sees it, if it is still alive.
    pub fn events(&self) -> Option<Arc<dyn LinkEvents>> {
        self.events.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }
}

// ── MockRadio ─────────────────────────────────────────────────

pub struct MockRadio {
    log: Arc<RadioLog>,
    has_characteristic: bool,
}

impl MockRadio {
    pub fn new() -> (Self, Arc<RadioLog>) {
        let log = Arc::new(RadioLog::default());
        let radio = Self {
            log: Arc::clone(&log),
            has_characteristic: false,
        };
        (radio, log)
    }

    fn record(&self, call: RadioCall) {
        self.log.calls.lock().unwrap().push(call);
    }
}

impl RadioPort for MockRadio {
    fn init(&mut self, device_name: &str, events: Weak<dyn LinkEvents>) -> Result<(), LinkError> {
        if self.log.fail_init.load(Ordering::SeqCst) {
            return Err(LinkError::InitFailed);
        }
        *self.log.events.lock().unwrap() = Some(events);
        self.record(RadioCall::Init(device_name.to_owned()));
        Ok(())
    }

    fn configure_security(&mut self, pairing: &PairingConfig) -> Result<(), LinkError> {
        self.record(RadioCall::Security(*pairing));
        Ok(())
    }

    fn create_service(
        &mut self,
        service_uuid: u128,
        characteristic_uuid: u128,
        initial: &[u8],
    ) -> Result<(), LinkError> {
        self.has_characteristic = true;
        self.record(RadioCall::CreateService {
            service: service_uuid,
            characteristic: characteristic_uuid,
            initial: String::from_utf8_lossy(initial).into_owned(),
        });
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<(), LinkError> {
        if self.log.fail_advertising.load(Ordering::SeqCst) {
            return Err(LinkError::InitFailed);
        }
        self.record(RadioCall::StartAdvertising);
        Ok(())
    }

    fn has_characteristic(&self) -> bool {
        self.has_characteristic
    }

    fn write_characteristic(&mut self, data: &[u8]) -> Result<(), LinkError> {
        if self.log.fail_writes.load(Ordering::SeqCst) {
            return Err(LinkError::WriteFailed);
        }
        self.record(RadioCall::Write(String::from_utf8_lossy(data).into_owned()));
        Ok(())
    }
}

// ── MockPin ───────────────────────────────────────────────────

/// Output pin that records every level written.
#[derive(Clone, Default)]
pub struct MockPin {
    pub history: Arc<Mutex<Vec<bool>>>,
}

#[allow(dead_code)]
impl MockPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> Vec<bool> {
        self.history.lock().unwrap().clone()
    }

    pub fn level(&self) -> Option<bool> {
        self.history.lock().unwrap().last().copied()
    }
}

impl ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.history.lock().unwrap().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.history.lock().unwrap().push(true);
        Ok(())
    }
}

// ── ManualClock ───────────────────────────────────────────────

#[derive(Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

#[allow(dead_code)]
impl ManualClock {
    pub fn now(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// ── MockLink ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MockLink {
    pub connected: AtomicBool,
    pub fail_writes: AtomicBool,
    pub pushed: Mutex<Vec<Value>>,
}

#[allow(dead_code)]
impl MockLink {
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn pushed(&self) -> Vec<Value> {
        self.pushed.lock().unwrap().clone()
    }
}

impl LinkPort for MockLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn push_value(&self, value: &Value) -> Result<(), LinkError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LinkError::WriteFailed);
        }
        self.pushed.lock().unwrap().push(*value);
        Ok(())
    }
}

// ── ScriptedSource ────────────────────────────────────────────

/// Shared controls for a [`ScriptedSource`] owned by a task.
#[derive(Default)]
pub struct SourceControl {
    /// Forced `should_update()` answer; `generate()` clears it, like a
    /// refresh timer restarting.
    pub due: AtomicBool,
    pub generated: AtomicU32,
    /// Dropped (set disconnected) from inside `generate()`.
    pub disconnect_on_generate: Mutex<Option<Arc<MockLink>>>,
}

/// Value source producing 100, 101, 102, ... on demand.
pub struct ScriptedSource {
    control: Arc<SourceControl>,
    current: Value,
}

impl ScriptedSource {
    pub fn new() -> (Self, Arc<SourceControl>) {
        let control = Arc::new(SourceControl::default());
        let source = Self {
            control: Arc::clone(&control),
            current: Value::default(),
        };
        (source, control)
    }
}

impl ValueSource for ScriptedSource {
    fn should_update(&self) -> bool {
        self.control.due.load(Ordering::SeqCst)
    }

    fn generate(&mut self) -> Value {
        if let Some(link) = self.control.disconnect_on_generate.lock().unwrap().as_ref() {
            link.set_connected(false);
        }
        self.control.due.store(false, Ordering::SeqCst);
        let n = self.control.generated.fetch_add(1, Ordering::SeqCst);
        self.current = Value::new(100 + n as u16);
        self.current
    }

    fn current(&self) -> Value {
        self.current
    }
}
