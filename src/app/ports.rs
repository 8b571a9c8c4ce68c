//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   BLE stack ──▶ RadioPort / LinkEvents ──▶ PeripheralLink
//!   RNG + clock ──▶ ValueSource ──▶ PublisherTask ──▶ LinkPort
//!                                   IndicatorTask ──▶ LinkPort
//! ```
//!
//! Adapters (Bluedroid radio, ESP timer, dummy sensor) implement these
//! traits. The tasks and the link consume them via generics, so the
//! domain core never touches the BLE stack or GPIO directly.

use std::sync::{Arc, Weak};

use crate::app::link::Value;
use crate::config::PairingConfig;
use crate::error::LinkError;

// ───────────────────────────────────────────────────────────────
// Radio port (driven adapter: domain → BLE stack)
// ───────────────────────────────────────────────────────────────

/// What the peripheral link needs from the wireless transport.
///
/// Implementations are owned by [`PeripheralLink`](super::link::PeripheralLink)
/// behind a mutex, so every call happens with exclusive access. None of
/// these calls may block on a stack event; they only issue requests.
pub trait RadioPort: Send {
    /// Bring up the controller and host stack, set the local name, and
    /// remember where to deliver connect/disconnect notifications.
    fn init(&mut self, device_name: &str, events: Weak<dyn LinkEvents>) -> Result<(), LinkError>;

    /// Apply authentication mode, I/O capability, key masks and passkey.
    /// Called before [`create_service`](Self::create_service) so the
    /// characteristic can be created with matching access permissions.
    fn configure_security(&mut self, pairing: &PairingConfig) -> Result<(), LinkError>;

    /// Register the primary service with one read+write characteristic
    /// holding `initial` as its value.
    fn create_service(
        &mut self,
        service_uuid: u128,
        characteristic_uuid: u128,
        initial: &[u8],
    ) -> Result<(), LinkError>;

    /// (Re)start connectable undirected advertising.
    fn start_advertising(&mut self) -> Result<(), LinkError>;

    /// Whether the characteristic exists yet (creation completes
    /// asynchronously on Bluedroid).
    fn has_characteristic(&self) -> bool;

    /// Replace the characteristic value.
    fn write_characteristic(&mut self, data: &[u8]) -> Result<(), LinkError>;
}

// ───────────────────────────────────────────────────────────────
// Link events (driving adapter: BLE stack → domain)
// ───────────────────────────────────────────────────────────────

/// Inbound notifications from the BLE stack.
///
/// Called on the stack's own task. Implementations must return quickly:
/// flip state, re-arm advertising, log, nothing more.
pub trait LinkEvents: Send + Sync {
    fn on_connect(&self);
    fn on_disconnect(&self);
    fn on_auth_complete(&self, success: bool);

    /// The stack generated `passkey` and the user must read it off this
    /// device to type it on the central.
    fn on_passkey_display(&self, _passkey: u32) {}
}

// ───────────────────────────────────────────────────────────────
// Link port (tasks → link)
// ───────────────────────────────────────────────────────────────

/// The slice of the peripheral link the periodic tasks are allowed to see.
pub trait LinkPort: Send + Sync {
    /// Non-blocking read of the connection state.
    fn is_connected(&self) -> bool;

    /// Push a new value toward the central.
    fn push_value(&self, value: &Value) -> Result<(), LinkError>;
}

impl<T: LinkPort + ?Sized> LinkPort for Arc<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn push_value(&self, value: &Value) -> Result<(), LinkError> {
        (**self).push_value(value)
    }
}

// ───────────────────────────────────────────────────────────────
// Value source port (driven adapter: sensor → publisher)
// ───────────────────────────────────────────────────────────────

/// Produces the values the publisher pushes.
pub trait ValueSource: Send {
    /// True once the refresh interval has elapsed since the last
    /// [`generate`](Self::generate).
    fn should_update(&self) -> bool;

    /// Produce a new value and restart the refresh interval.
    fn generate(&mut self) -> Value;

    /// Last generated value, no side effects.
    fn current(&self) -> Value;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic milliseconds since boot.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}
