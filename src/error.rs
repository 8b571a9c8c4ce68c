//! Unified error types for the SeiZen firmware.
//!
//! One small enum per subsystem, all funnelling into [`Error`] so the
//! startup path can treat failures uniformly. Every variant is `Copy`;
//! errors cross thread boundaries (publisher task, BLE callback context)
//! without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The BLE peripheral link failed.
    Link(LinkError),
    /// A periodic task could not be created.
    Supervisor(SupervisorError),
    /// Configuration is invalid or could not be parsed.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Supervisor(e) => write!(f, "supervisor: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The BLE stack could not be brought up. Nothing can advertise, so
    /// this is fatal at startup.
    InitFailed,
    /// A single characteristic write did not go through. The publisher
    /// retries with fresh data on its next tick.
    WriteFailed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitFailed => write!(f, "BLE stack init failed"),
            Self::WriteFailed => write!(f, "characteristic write failed"),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Supervisor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorError {
    /// The scheduler could not allocate the execution context (stack
    /// budget too small, task table full, or thread creation refused).
    CreateFailed,
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateFailed => write!(f, "task creation failed"),
        }
    }
}

impl std::error::Error for SupervisorError {}

impl From<SupervisorError> for Error {
    fn from(e: SupervisorError) -> Self {
        Self::Supervisor(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The override document is not valid JSON for [`SystemConfig`](crate::config::SystemConfig).
    Malformed,
    /// A field failed range validation. The message names the field.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed config document"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
