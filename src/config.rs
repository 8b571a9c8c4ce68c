//! System configuration parameters
//!
//! All tunable parameters for the SeiZen peripheral. Defaults match the
//! shipped firmware; a JSON override document can be compiled in via the
//! `SEIZEN_CONFIG` environment variable (see `main.rs`).

use core::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::drivers::task_pin::Core;
use crate::error::ConfigError;
use crate::supervisor::MIN_STACK_KB;

/// Longest local name that still fits a legacy advertising payload
/// next to the flags field.
pub const MAX_DEVICE_NAME_LEN: usize = 29;

/// Upper bound on the indicator re-check quantum.
pub const MAX_POLL_INTERVAL_MS: u32 = 100;

/// Largest six-digit BLE passkey.
pub const MAX_PASSKEY: u32 = 999_999;

// ───────────────────────────────────────────────────────────────
// Pairing
// ───────────────────────────────────────────────────────────────

/// Authentication requirement sent in the pairing request.
///
/// Values are the Bluetooth Core `AuthReq` bit patterns
/// (bond = 0x01, MITM = 0x04, secure connections = 0x08), which is also
/// what Bluedroid's `ESP_LE_AUTH_REQ_*` constants expand to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    /// LE Secure Connections with MITM protection and bonding.
    SecureMitmBond,
    /// LE Secure Connections with bonding, no MITM ("just works").
    SecureBond,
}

impl AuthMode {
    pub const fn bits(self) -> u8 {
        match self {
            Self::SecureMitmBond => 0x0D,
            Self::SecureBond => 0x09,
        }
    }

    pub const fn requires_mitm(self) -> bool {
        self.bits() & 0x04 != 0
    }
}

/// Local I/O capability advertised during pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoCapability {
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    NoInputNoOutput,
    KeyboardDisplay,
}

impl IoCapability {
    /// Bluetooth Core I/O capability code (`ESP_IO_CAP_*`).
    pub const fn code(self) -> u8 {
        match self {
            Self::DisplayOnly => 0,
            Self::DisplayYesNo => 1,
            Self::KeyboardOnly => 2,
            Self::NoInputNoOutput => 3,
            Self::KeyboardDisplay => 4,
        }
    }

    /// Whether the peripheral can show a passkey to the user.
    pub const fn can_display(self) -> bool {
        matches!(
            self,
            Self::DisplayOnly | Self::DisplayYesNo | Self::KeyboardDisplay
        )
    }
}

/// Key distribution mask (`ESP_BLE_*_KEY_MASK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMask(pub u8);

impl KeyMask {
    pub const ENC: Self = Self(0x01);
    pub const ID: Self = Self(0x02);
    pub const CSR: Self = Self(0x04);
    pub const LINK: Self = Self(0x08);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for KeyMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Six-digit static passkey shared out of band with the central.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passkey(u32);

impl Passkey {
    pub fn new(value: u32) -> Result<Self, ConfigError> {
        if value > MAX_PASSKEY {
            return Err(ConfigError::ValidationFailed("passkey must be at most 6 digits"));
        }
        Ok(Self(value))
    }

    /// Parse the `SEIZEN_PASSKEY` form: exactly six ASCII digits.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let text = text.trim();
        if text.len() != 6 || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::ValidationFailed("passkey must be six digits"));
        }
        let value = text
            .parse::<u32>()
            .map_err(|_| ConfigError::ValidationFailed("passkey must be six digits"))?;
        Self::new(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }
}

// Keeps the passkey out of log output.
impl core::fmt::Debug for Passkey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Passkey(******)")
    }
}

/// Security parameters applied once when the link is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingConfig {
    pub auth: AuthMode,
    pub io_capability: IoCapability,
    /// Keys the peripheral asks the central to distribute.
    pub init_keys: KeyMask,
    /// Keys the peripheral distributes itself.
    pub rsp_keys: KeyMask,
    /// Maximum encryption key size in bytes (7..=16).
    pub max_key_size: u8,
    /// Fixed passkey; `None` lets the stack generate one per pairing.
    pub passkey: Option<Passkey>,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            auth: AuthMode::SecureMitmBond,
            io_capability: IoCapability::DisplayOnly,
            init_keys: KeyMask::ENC | KeyMask::ID,
            rsp_keys: KeyMask::ENC | KeyMask::ID,
            max_key_size: 16,
            passkey: None,
        }
    }
}

impl PairingConfig {
    /// Just-works bonding variant: no MITM, no I/O.
    pub fn just_works() -> Self {
        Self {
            auth: AuthMode::SecureBond,
            io_capability: IoCapability::NoInputNoOutput,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_passkey(mut self, passkey: Passkey) -> Self {
        self.passkey = Some(passkey);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(7..=16).contains(&self.max_key_size) {
            return Err(ConfigError::ValidationFailed("max_key_size must be 7..=16"));
        }
        if let Some(passkey) = self.passkey {
            if passkey.value() > MAX_PASSKEY {
                return Err(ConfigError::ValidationFailed("passkey must be at most 6 digits"));
            }
        }
        // The GAP handler rejects numeric comparison and passkey entry.
        if !matches!(
            self.io_capability,
            IoCapability::DisplayOnly | IoCapability::NoInputNoOutput
        ) {
            return Err(ConfigError::ValidationFailed(
                "io_capability must be DisplayOnly or NoInputNoOutput",
            ));
        }
        if self.auth.requires_mitm() && !self.io_capability.can_display() {
            return Err(ConfigError::ValidationFailed(
                "MITM pairing needs an I/O capability that can display a passkey",
            ));
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Tasks
// ───────────────────────────────────────────────────────────────

/// Scheduling budget for one periodic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub stack_kb: usize,
    pub priority: u8,
    pub core: Core,
}

// ───────────────────────────────────────────────────────────────
// System
// ───────────────────────────────────────────────────────────────

/// Core system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Advertised local name.
    pub device_name: heapless::String<32>,

    // --- Indicator ---
    /// Half period of the disconnected blink (milliseconds).
    pub blink_interval_ms: u32,
    /// Re-check quantum while connected and inside a blink phase.
    pub poll_interval_ms: u32,

    // --- Publisher ---
    /// Publisher tick (milliseconds).
    pub send_interval_ms: u32,
    /// Minimum age of a value before a fresh one is generated.
    pub refresh_interval_ms: u32,

    // --- Main loop ---
    /// Connection status log cadence (milliseconds).
    pub status_interval_ms: u32,

    // --- Tasks ---
    pub indicator_task: TaskConfig,
    pub publisher_task: TaskConfig,

    // --- Security ---
    pub pairing: PairingConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let mut device_name = heapless::String::new();
        let _ = device_name.push_str("SeiZen-v1");
        Self {
            device_name,

            blink_interval_ms: 500,
            poll_interval_ms: 100,

            send_interval_ms: 1000,
            refresh_interval_ms: 3000,

            status_interval_ms: 1000,

            indicator_task: TaskConfig {
                stack_kb: 4,
                priority: 1,
                core: Core::App,
            },
            publisher_task: TaskConfig {
                stack_kb: 8,
                priority: 1,
                core: Core::App,
            },

            pairing: PairingConfig::default(),
        }
    }
}

impl SystemConfig {
    /// Parse and validate a JSON override document. Missing fields keep
    /// their defaults.
    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(doc).map_err(|_| ConfigError::Malformed)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.is_empty() || self.device_name.len() > MAX_DEVICE_NAME_LEN {
            return Err(ConfigError::ValidationFailed("device_name must be 1..=29 bytes"));
        }
        if self.blink_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("blink_interval_ms must be non-zero"));
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::ValidationFailed("poll_interval_ms must be 1..=100"));
        }
        if self.send_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("send_interval_ms must be non-zero"));
        }
        if self.refresh_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("refresh_interval_ms must be non-zero"));
        }
        if self.status_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("status_interval_ms must be non-zero"));
        }
        if self.indicator_task.stack_kb < MIN_STACK_KB || self.publisher_task.stack_kb < MIN_STACK_KB
        {
            return Err(ConfigError::ValidationFailed("task stack below supervisor minimum"));
        }
        self.pairing.validate()
    }
}
