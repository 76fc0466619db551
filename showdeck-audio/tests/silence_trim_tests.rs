//! Silence trimming through the cue queue

mod helpers;

use showdeck_audio::audio::{BufferSource, SampleFormat, SampleSource, SymphoniaLoader};
use showdeck_audio::playback::{CueQueue, SilenceGate};
use showdeck_audio::{CuePriority, EngineEvent};
use showdeck_common::config::{QueueConfig, SilenceConfig};
use showdeck_common::{EventBus, FadeCurve};
use std::sync::Arc;

fn mono_1k() -> SampleFormat {
    SampleFormat::new(1000, 1)
}

fn silence_config() -> SilenceConfig {
    SilenceConfig {
        threshold_db: -50.0,
        duration_ms: 30,
        fade_ms: 10,
    }
}

/// `loud` samples at 0.5 followed by `quiet` zeros
fn tail(loud: usize, quiet: usize) -> BufferSource {
    let mut samples = vec![0.5; loud];
    samples.extend(std::iter::repeat(0.0).take(quiet));
    BufferSource::new(samples, mono_1k())
}

#[test]
fn test_silent_tail_ends_within_duration_plus_fade() {
    let events = EventBus::new(16);
    let mut rx = events.subscribe();
    let mut gate = SilenceGate::new(tail(20, 1000), &silence_config()).with_events(events, "outro");

    let mut total = 0;
    let mut buf = [0.0; 7];
    loop {
        let n = gate.read(&mut buf);
        if n == 0 {
            break;
        }
        total += n;
    }

    assert_eq!(total, 60);
    assert!(gate.is_finished());

    match rx.try_recv().unwrap() {
        EngineEvent::SilenceDetected { label, position, .. } => {
            assert_eq!(label, "outro");
            assert_eq!(position, 50);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_trimmed_cue_hands_over_early() {
    let config = QueueConfig {
        limit: 10,
        crossfade_ms: 0,
        crossfade_curve: FadeCurve::EqualPower,
        trim_silence: true,
    };
    let queue = CueQueue::new(
        mono_1k(),
        config,
        silence_config(),
        Arc::new(SymphoniaLoader),
        EventBus::new(64),
    );

    queue
        .enqueue_source(Box::new(tail(20, 1000)), "answer", CuePriority::Normal)
        .unwrap();
    queue
        .enqueue_source(Box::new(BufferSource::new(vec![0.25; 10], mono_1k())), "sting", CuePriority::Normal)
        .unwrap();

    let mut source = queue.source();
    let mut buf = vec![0.0; 200];
    assert_eq!(source.read(&mut buf), 70);

    assert!(buf[..20].iter().all(|s| *s == 0.5));
    assert!(buf[60..70].iter().all(|s| *s == 0.25));
    assert!(queue.is_idle());
}

#[test]
fn test_quiet_passage_shorter_than_duration_is_kept() {
    let mut samples = vec![0.5; 20];
    samples.extend(std::iter::repeat(0.0).take(25));
    samples.extend(std::iter::repeat(0.5).take(20));
    let mut gate = SilenceGate::new(BufferSource::new(samples, mono_1k()), &silence_config());

    let mut buf = vec![0.0; 100];
    assert_eq!(gate.read(&mut buf), 65);
    assert!(!gate.is_fading());
    assert!(buf[45..65].iter().all(|s| *s == 0.5));
}
