//! SeiZen firmware entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │   BleRadio (RadioPort)   StatusLed (OutputPin)               │
//! │   Esp32TimeAdapter (Clock)   DummySensor (ValueSource)       │
//! │                                                              │
//! │   ─────────────── Port Trait Boundary ────────────────       │
//! │                                                              │
//! │   PeripheralLink ◀── IndicatorTask   PublisherTask           │
//! │                      └───── TaskSupervisor ─────┘            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Build-time overrides:
//! - `SEIZEN_CONFIG`: JSON `SystemConfig` document (missing fields keep
//!   their defaults).
//! - `SEIZEN_PASSKEY`: six-digit static pairing passkey.

#![deny(unused_must_use)]

use std::sync::Arc;

use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use log::{error, info, warn};

use seizen::adapters::ble::BleRadio;
use seizen::adapters::time::Esp32TimeAdapter;
use seizen::app::indicator::{self, IndicatorTask};
use seizen::app::link::PeripheralLink;
use seizen::app::ports::LinkPort;
use seizen::app::publisher::{self, PublisherTask};
use seizen::config::{Passkey, SystemConfig};
use seizen::drivers::status_led::StatusLed;
use seizen::pins;
use seizen::sensors::dummy::DummySensor;
use seizen::supervisor::{TaskSpec, TaskSupervisor};

// ── Configuration ─────────────────────────────────────────────

fn load_config() -> SystemConfig {
    let mut config = match option_env!("SEIZEN_CONFIG") {
        Some(doc) => match SystemConfig::from_json(doc) {
            Ok(cfg) => {
                info!("Config: build-time override applied");
                cfg
            }
            Err(e) => {
                warn!("Config: override rejected ({}), using defaults", e);
                SystemConfig::default()
            }
        },
        None => SystemConfig::default(),
    };

    match option_env!("SEIZEN_PASSKEY").map(Passkey::parse) {
        Some(Ok(passkey)) => config.pairing = config.pairing.with_passkey(passkey),
        Some(Err(e)) => error!("Config: SEIZEN_PASSKEY ignored ({})", e),
        None => {}
    }
    config
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  SeiZen v{}                          ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let config = load_config();
    let clock = Arc::new(Esp32TimeAdapter::new());

    // ── 2. BLE link (fatal on failure) ────────────────────────
    let link = Arc::new(PeripheralLink::new(BleRadio::new(), config.device_name.clone()));
    if let Err(e) = link.open(&config.pairing) {
        error!("BLE link bring-up failed: {}, halting", e);
        return Err(e.into());
    }

    // ── 3. Periodic tasks (degraded on failure) ───────────────
    let mut supervisor = TaskSupervisor::new();

    match StatusLed::new(pins::STATUS_LED_GPIO) {
        Ok(led) => {
            let task = IndicatorTask::new(
                led,
                Arc::clone(&link),
                Arc::clone(&clock),
                config.blink_interval_ms,
                config.poll_interval_ms,
            );
            let spec = TaskSpec::new(indicator::TASK_NAME, config.indicator_task);
            if let Err(e) = supervisor.start(task, spec) {
                warn!("Running without connection indicator ({})", e);
            }
        }
        Err(e) => warn!("Status LED unavailable ({}), running without indicator", e),
    }

    let sensor = DummySensor::new(Arc::clone(&clock), config.refresh_interval_ms);
    let task = PublisherTask::new(sensor, Arc::clone(&link), config.send_interval_ms);
    let spec = TaskSpec::new(publisher::TASK_NAME, config.publisher_task);
    if let Err(e) = supervisor.start(task, spec) {
        warn!("Running without value publisher ({})", e);
    }

    info!(
        "Startup complete: {} task(s) running, advertising as '{}'",
        supervisor.running_count(),
        link.device_name()
    );

    // ── 4. Status loop ────────────────────────────────────────
    loop {
        if link.is_connected() {
            info!("Status: central connected");
        } else {
            info!("Status: waiting for central");
        }
        FreeRtos::delay_ms(config.status_interval_ms);
    }
}
