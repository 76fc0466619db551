//! Verified output selection against simulated devices

mod helpers;

use helpers::{fast_verification, DeviceBehavior, SimBackend};
use serial_test::serial;
use showdeck_audio::audio::{BufferSource, SampleFormat};
use showdeck_audio::output::OutputManager;
use showdeck_audio::playback::SampleMixer;
use showdeck_audio::{EngineEvent, Error, OutputTier};
use showdeck_common::EventBus;
use std::sync::Arc;

use DeviceBehavior::{Dead, Healthy, StallAfter};

struct Rig {
    manager: OutputManager,
    primary: Arc<SimBackend>,
    compatibility: Arc<SimBackend>,
    mixer: Arc<SampleMixer>,
    events: EventBus,
}

fn rig(primary: &[(&str, DeviceBehavior)], compatibility: &[(&str, DeviceBehavior)]) -> Rig {
    let mixer = Arc::new(SampleMixer::new(SampleFormat::new(1000, 1)));
    let primary = Arc::new(SimBackend::new(OutputTier::Primary, primary));
    let compatibility = Arc::new(SimBackend::new(OutputTier::Compatibility, compatibility));
    let events = EventBus::new(64);
    let manager = OutputManager::new(
        Arc::clone(&mixer),
        primary.clone(),
        compatibility.clone(),
        fast_verification(),
        1.0,
        events.clone(),
        true,
    );
    Rig {
        manager,
        primary,
        compatibility,
        mixer,
        events,
    }
}

#[test]
#[serial]
fn test_healthy_primary_is_selected() {
    let rig = rig(&[("speakers", Healthy)], &[("speakers", Healthy)]);
    let mut rx = rig.events.subscribe();

    let session = rig.manager.initialize(None).unwrap();

    assert_eq!(session.tier, OutputTier::Primary);
    assert_eq!(session.device_name, "speakers");
    assert!(session.follows_default());
    assert!(session.flow.successes >= 8);
    assert!(rig.manager.is_playing());
    assert_eq!(rig.compatibility.opens(), 0);
    assert!(matches!(
        rx.try_recv().unwrap(),
        EngineEvent::OutputSelected { tier: OutputTier::Primary, .. }
    ));
}

#[test]
#[serial]
fn test_burst_then_silence_fails_sustained_check() {
    let rig = rig(&[("bluetooth", StallAfter(2))], &[]);

    let result = rig.manager.try_initialize_output(rig.primary.as_ref(), Some("bluetooth"));

    match result {
        Err(Error::FlowStalled { device, successes, checks }) => {
            assert_eq!(device, "bluetooth");
            assert!(successes < 8);
            assert_eq!(checks, 10);
        }
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("burst device was accepted"),
    }
}

#[test]
#[serial]
fn test_device_that_never_pulls_fails_first_window() {
    let rig = rig(&[("virtual", Dead)], &[]);

    let result = rig.manager.try_initialize_output(rig.primary.as_ref(), Some("virtual"));

    assert!(matches!(result, Err(Error::FlowNotEstablished { window_ms: 60, .. })));
    assert_eq!(rig.mixer.last_read_position(), 0);
}

#[test]
#[serial]
fn test_dead_device_falls_back_to_primary_default() {
    let rig = rig(&[("speakers", Healthy), ("hdmi", Dead)], &[]);

    let session = rig.manager.initialize(Some("hdmi")).unwrap();

    assert_eq!(session.tier, OutputTier::Primary);
    assert_eq!(session.device_name, "speakers");
    assert!(session.device_id.is_none());
}

#[test]
#[serial]
fn test_primary_failure_falls_back_to_compatibility_same_device() {
    let rig = rig(&[("speakers", Dead)], &[("speakers", Healthy)]);

    let session = rig.manager.initialize(Some("speakers")).unwrap();

    assert_eq!(session.tier, OutputTier::Compatibility);
    assert_eq!(session.device_id.as_deref(), Some("speakers"));
    // "speakers" is the primary default, so no separate default attempt
    assert_eq!(rig.primary.opens(), 1);
}

#[test]
#[serial]
fn test_unlisted_device_uses_compatibility_default() {
    let rig = rig(&[("speakers", Dead), ("usb", Dead)], &[("speakers", Healthy)]);

    let session = rig.manager.initialize(Some("usb")).unwrap();

    assert_eq!(session.tier, OutputTier::Compatibility);
    assert!(session.device_id.is_none());
    assert_eq!(session.device_name, "speakers");
}

#[test]
#[serial]
fn test_ghost_device_exhausts_every_tier() {
    let rig = rig(&[("speakers", Dead)], &[("speakers", Dead)]);
    let mut rx = rig.events.subscribe();

    let result = rig.manager.initialize(Some("ghost"));

    match result {
        Err(Error::BackendExhausted { attempts }) => assert_eq!(attempts.len(), 3),
        other => panic!("expected exhaustion, got {:?}", other.map(|s| s.to_string())),
    }
    assert!(!rig.manager.is_playing());
    assert!(rig.manager.active_session().is_none());
    assert!(matches!(rx.try_recv().unwrap(), EngineEvent::OutputLost { .. }));
}

#[test]
#[serial]
fn test_change_device_keeps_mixer_inputs() {
    let rig = rig(&[("speakers", Healthy), ("headphones", Healthy)], &[]);
    rig.mixer
        .add_persistent_source(Box::new(BufferSource::new(vec![0.1; 8], SampleFormat::new(1000, 1))))
        .unwrap();

    rig.manager.initialize(None).unwrap();
    let session = rig.manager.change_device(Some("headphones")).unwrap();

    assert_eq!(session.device_name, "headphones");
    assert_eq!(rig.mixer.source_count(), 1);
    assert!(rig.manager.is_playing());
}

#[test]
#[serial]
fn test_failed_change_restores_previous_device() {
    let rig = rig(&[("broken-default", Dead), ("usb", Healthy)], &[("broken-default", Dead)]);

    rig.manager.initialize(Some("usb")).unwrap();
    let result = rig.manager.change_device(Some("ghost"));

    assert!(matches!(result, Err(Error::BackendExhausted { .. })));
    let session = rig.manager.active_session().unwrap();
    assert_eq!(session.device_id.as_deref(), Some("usb"));
    assert!(rig.manager.is_playing());
}

#[test]
#[serial]
fn test_list_devices_puts_system_default_first() {
    let rig = rig(&[("speakers", Healthy), ("usb", Healthy)], &[]);

    let devices = rig.manager.list_devices().unwrap();

    assert_eq!(devices.len(), 3);
    assert!(devices[0].is_system_default());
    assert!(devices[1].is_default);
    assert_eq!(devices[2].name, "usb");
}

#[test]
#[serial]
fn test_disposed_manager_refuses_work() {
    let rig = rig(&[("speakers", Healthy)], &[]);
    rig.manager.initialize(None).unwrap();

    rig.manager.dispose();

    assert!(!rig.manager.is_playing());
    assert!(matches!(rig.manager.initialize(None), Err(Error::Disposed)));
}
