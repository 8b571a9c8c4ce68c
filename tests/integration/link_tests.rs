//! Integration tests for the peripheral link over both the recording
//! mock radio and the simulated Bluedroid radio.

use std::sync::Arc;

use seizen::adapters::ble::BleRadio;
use seizen::app::link::{
    CHARACTERISTIC_UUID, ConnectionState, INITIAL_VALUE, PeripheralLink, SERVICE_UUID, Value,
};
use seizen::app::ports::LinkPort;
use seizen::config::{PairingConfig, Passkey, SystemConfig};
use seizen::error::LinkError;

use crate::mock_hw::{MockRadio, RadioCall};

fn name(s: &str) -> heapless::String<32> {
    let mut n = heapless::String::new();
    n.push_str(s).unwrap();
    n
}

fn sim_link() -> (Arc<PeripheralLink<BleRadio>>, Arc<seizen::adapters::ble::SimCentral>) {
    let radio = BleRadio::new();
    let central = radio.central();
    let link = Arc::new(PeripheralLink::new(radio, SystemConfig::default().device_name));
    (link, central)
}

// ── Bring-up ──────────────────────────────────────────────────

#[test]
fn open_sequences_radio_calls() {
    let (radio, log) = MockRadio::new();
    let link = Arc::new(PeripheralLink::new(radio, name("SeiZen-v1")));
    let pairing = PairingConfig::default().with_passkey(Passkey::new(123_456).unwrap());
    link.open(&pairing).unwrap();

    assert_eq!(
        log.calls(),
        vec![
            RadioCall::Init("SeiZen-v1".into()),
            RadioCall::Security(pairing),
            RadioCall::CreateService {
                service: SERVICE_UUID,
                characteristic: CHARACTERISTIC_UUID,
                initial: INITIAL_VALUE.into(),
            },
            RadioCall::StartAdvertising,
        ]
    );
    assert!(log.events().is_some());
}

#[test]
fn init_failure_is_fatal_and_nothing_advertises() {
    let (radio, log) = MockRadio::new();
    log.fail_init.store(true, std::sync::atomic::Ordering::SeqCst);
    let link = Arc::new(PeripheralLink::new(radio, name("SeiZen-v1")));

    assert_eq!(link.open(&PairingConfig::default()), Err(LinkError::InitFailed));
    assert_eq!(log.advert_calls(), 0);
    assert!(!link.is_open());
}

#[test]
fn advertising_failure_at_open_is_init_failure() {
    let (radio, log) = MockRadio::new();
    log.fail_advertising.store(true, std::sync::atomic::Ordering::SeqCst);
    let link = Arc::new(PeripheralLink::new(radio, name("SeiZen-v1")));
    assert_eq!(link.open(&PairingConfig::default()), Err(LinkError::InitFailed));
}

#[test]
fn sim_radio_advertises_service_with_initial_value() {
    let (link, central) = sim_link();
    link.open(&PairingConfig::default()).unwrap();

    assert!(central.is_advertising());
    assert_eq!(central.advertised_name(), "SeiZen-v1");
    assert_eq!(central.service(), Some((SERVICE_UUID, CHARACTERISTIC_UUID)));
    assert_eq!(central.read().as_deref(), Some(INITIAL_VALUE.as_bytes()));
}

// ── Connection lifecycle ──────────────────────────────────────

#[test]
fn connect_disconnect_rearms_advertising() {
    let (link, central) = sim_link();
    link.open(&PairingConfig::default()).unwrap();

    assert!(central.connect());
    assert_eq!(link.state(), ConnectionState::Connected);
    assert!(!central.is_advertising());

    central.disconnect();
    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert!(central.is_advertising(), "device must be discoverable again");
    assert_eq!(link.advertising_starts(), 2);
    assert_eq!(central.advertising_starts(), 2);

    // A second central can now connect.
    assert!(central.connect());
    assert!(link.is_connected());
}

#[test]
fn failed_readvertise_leaves_link_disconnected() {
    let (link, central) = sim_link();
    link.open(&PairingConfig::default()).unwrap();
    central.connect();

    central.fail_advertising(true);
    central.disconnect();
    assert!(!link.is_connected());
    assert_eq!(link.advertising_starts(), 1);
}

#[test]
fn auth_outcomes_are_reported() {
    let (link, central) = sim_link();
    link.open(&PairingConfig::default()).unwrap();
    central.connect();
    central.complete_pairing(false);
    central.complete_pairing(true);
    assert_eq!(link.auth_failures(), 1);
}

// ── Publishing ────────────────────────────────────────────────

#[test]
fn pushed_value_is_readable_by_central() {
    let (link, central) = sim_link();
    link.open(&PairingConfig::default()).unwrap();
    central.connect();

    link.push_value(&Value::new(742)).unwrap();
    assert_eq!(central.read().as_deref(), Some(&b"742"[..]));
}

#[test]
fn push_before_open_is_a_noop() {
    let (link, central) = sim_link();
    assert_eq!(link.push_value(&Value::new(5)), Ok(()));
    assert_eq!(central.read(), None);
}

#[test]
fn write_failure_is_surfaced_to_caller() {
    let (link, central) = sim_link();
    link.open(&PairingConfig::default()).unwrap();
    central.fail_writes(true);
    assert_eq!(link.push_value(&Value::new(1)), Err(LinkError::WriteFailed));
    assert_eq!(central.read().as_deref(), Some(INITIAL_VALUE.as_bytes()));
}

#[test]
fn just_works_pairing_reaches_radio() {
    let (link, central) = sim_link();
    link.open(&PairingConfig::just_works()).unwrap();
    assert_eq!(central.pairing(), Some(PairingConfig::just_works()));
}

#[test]
fn default_pairing_displays_passkey_the_central_can_enter() {
    let (link, central) = sim_link();
    let config = SystemConfig::default();
    config.validate().unwrap();
    link.open(&config.pairing).unwrap();
    central.connect();

    let shown = central.begin_pairing().expect("MITM pairing shows a passkey");
    assert!(shown <= 999_999);
    assert_eq!(link.displayed_passkey(), Some(shown));

    assert!(central.enter_passkey(shown));
    assert_eq!(link.auth_failures(), 0);
    assert_eq!(link.displayed_passkey(), None);
}

#[test]
fn wrong_passkey_fails_pairing() {
    let (link, central) = sim_link();
    let pairing = PairingConfig::default().with_passkey(Passkey::new(246_810).unwrap());
    link.open(&pairing).unwrap();
    central.connect();

    assert_eq!(central.begin_pairing(), Some(246_810));
    assert!(!central.enter_passkey(135_790));
    assert_eq!(link.auth_failures(), 1);
}

#[test]
fn just_works_pairing_shows_no_passkey() {
    let (link, central) = sim_link();
    link.open(&PairingConfig::just_works()).unwrap();
    central.connect();
    assert_eq!(central.begin_pairing(), None);
    assert_eq!(link.displayed_passkey(), None);
}
