//! BLE peripheral link: connection state machine and characteristic owner.
//!
//! ```text
//!            open()                 on_connect()
//!   ───────▶ Disconnected ───────────────────────▶ Connected
//!            (advertising) ◀─────────────────────
//!                              on_disconnect()
//!                              + restart advertising
//! ```
//!
//! The connection flag is a single atomic written only from the BLE
//! stack's callback context and read lock-free by every task. The radio
//! (service, characteristic, advertiser) sits behind a mutex that is only
//! held for the duration of one stack request, never across a sleep.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, error, info, warn};

use crate::app::ports::{LinkEvents, LinkPort, RadioPort};
use crate::config::PairingConfig;
use crate::error::LinkError;

// ───────────────────────────────────────────────────────────────
// GATT identity
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID: u128 = 0x12345678_1234_1234_1234_123456789abc;
pub const CHARACTERISTIC_UUID: u128 = 0x87654321_4321_4321_4321_abcdefabcdef;

/// Characteristic value before the first publish.
pub const INITIAL_VALUE: &str = "Hello from SeiZen!";

// ───────────────────────────────────────────────────────────────
// Value
// ───────────────────────────────────────────────────────────────

/// A published reading. Sent over the air as decimal UTF-8 text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Value(u16);

impl Value {
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    /// Characteristic payload: the reading as decimal text.
    pub fn encode(self) -> heapless::String<8> {
        use core::fmt::Write;
        let mut s = heapless::String::new();
        // u16::MAX is five digits, always fits.
        write!(s, "{}", self.0).ok();
        s
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ───────────────────────────────────────────────────────────────
// Connection state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl From<bool> for ConnectionState {
    fn from(connected: bool) -> Self {
        if connected {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Peripheral link
// ───────────────────────────────────────────────────────────────

pub struct PeripheralLink<R: RadioPort> {
    radio: Mutex<R>,
    device_name: heapless::String<32>,
    connected: AtomicBool,
    opened: AtomicBool,
    advertising_starts: AtomicU32,
    auth_failures: AtomicU32,
    /// Passkey on display for the pairing in progress, [`NO_PASSKEY`] if none.
    displayed_passkey: AtomicU32,
}

const NO_PASSKEY: u32 = u32::MAX;

impl<R: RadioPort + 'static> PeripheralLink<R> {
    pub fn new(radio: R, device_name: heapless::String<32>) -> Self {
        Self {
            radio: Mutex::new(radio),
            device_name,
            connected: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            advertising_starts: AtomicU32::new(0),
            auth_failures: AtomicU32::new(0),
            displayed_passkey: AtomicU32::new(NO_PASSKEY),
        }
    }

    /// Bring up the stack, apply the pairing policy, register the GATT
    /// service, and start advertising.
    ///
    /// Takes `&Arc<Self>` because the stack keeps a weak reference back to
    /// the link for connect/disconnect delivery. Calling `open` again after
    /// success is a no-op.
    pub fn open(self: &Arc<Self>, pairing: &PairingConfig) -> Result<(), LinkError> {
        if self.opened.load(Ordering::Acquire) {
            debug!("Link: already open");
            return Ok(());
        }
        if let Err(e) = pairing.validate() {
            error!("Link: rejecting pairing config ({})", e);
            return Err(LinkError::InitFailed);
        }

        let mut radio = self.lock_radio();
        let weak = Arc::downgrade(self);
        let events: Weak<dyn LinkEvents> = weak;

        radio.init(&self.device_name, events)?;
        // Security goes in before the service so the characteristic is
        // created with the matching access permissions, and before the
        // first advertisement so no central connects unauthenticated.
        radio.configure_security(pairing)?;
        radio.create_service(SERVICE_UUID, CHARACTERISTIC_UUID, INITIAL_VALUE.as_bytes())?;
        radio
            .start_advertising()
            .map_err(|_| LinkError::InitFailed)?;
        self.advertising_starts.fetch_add(1, Ordering::Relaxed);
        self.opened.store(true, Ordering::Release);

        info!(
            "Link: open, advertising as '{}' (auth=0x{:02x}, io_cap={:?}, passkey={})",
            self.device_name,
            pairing.auth.bits(),
            pairing.io_capability,
            if pairing.passkey.is_some() { "fixed" } else { "random" },
        );
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.connected.load(Ordering::Acquire).into()
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Successful advertising starts, including the one in [`open`](Self::open).
    pub fn advertising_starts(&self) -> u32 {
        self.advertising_starts.load(Ordering::Relaxed)
    }

    pub fn auth_failures(&self) -> u32 {
        self.auth_failures.load(Ordering::Relaxed)
    }

    /// Passkey the user has to enter on the central for the pairing in
    /// progress. Cleared once pairing completes either way.
    pub fn displayed_passkey(&self) -> Option<u32> {
        match self.displayed_passkey.load(Ordering::Acquire) {
            NO_PASSKEY => None,
            passkey => Some(passkey),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn restart_advertising(&self) {
        match self.lock_radio().start_advertising() {
            Ok(()) => {
                self.advertising_starts.fetch_add(1, Ordering::Relaxed);
                info!("Link: advertising restarted");
            }
            Err(e) => error!("Link: advertising restart failed ({})", e),
        }
    }

    // The radio holds no invariant a panicking writer could break halfway.
    fn lock_radio(&self) -> MutexGuard<'_, R> {
        self.radio.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: RadioPort + 'static> LinkEvents for PeripheralLink<R> {
    fn on_connect(&self) {
        if self
            .connected
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("Link: central connected");
        } else {
            warn!("Link: connect event while already connected, ignored");
        }
    }

    fn on_disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!("Link: central disconnected");
        } else {
            warn!("Link: disconnect event while not connected");
        }
        // Without this the device stays undiscoverable after the first drop.
        self.restart_advertising();
    }

    fn on_auth_complete(&self, success: bool) {
        self.displayed_passkey.store(NO_PASSKEY, Ordering::Release);
        if success {
            info!("Link: authentication success");
        } else {
            self.auth_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Link: authentication failed");
        }
    }

    fn on_passkey_display(&self, passkey: u32) {
        self.displayed_passkey.store(passkey, Ordering::Release);
        // The serial console is the only display this board has.
        info!("Link: pairing passkey {:06}", passkey);
    }
}

impl<R: RadioPort + 'static> LinkPort for PeripheralLink<R> {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn push_value(&self, value: &Value) -> Result<(), LinkError> {
        let mut radio = self.lock_radio();
        if !radio.has_characteristic() {
            debug!("Link: no characteristic yet, dropping value {}", value);
            return Ok(());
        }
        let payload = value.encode();
        radio
            .write_characteristic(payload.as_bytes())
            .map_err(|_| LinkError::WriteFailed)
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
