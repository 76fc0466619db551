//! Cue queue integration tests
//!
//! Most tests run at 1kHz mono so one sample is one millisecond.

mod helpers;

use helpers::{constant_source, generate_marked_wav};
use showdeck_audio::audio::{SampleFormat, SampleSource, SourceLoader, SymphoniaLoader};
use showdeck_audio::playback::CueQueue;
use showdeck_audio::{CuePriority, EngineEvent, Error, Result};
use showdeck_common::config::{QueueConfig, SilenceConfig};
use showdeck_common::{EventBus, FadeCurve};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

fn mono_1k() -> SampleFormat {
    SampleFormat::new(1000, 1)
}

struct MissingLoader;

impl SourceLoader for MissingLoader {
    fn load(&self, path: &Path, _format: SampleFormat) -> Result<Box<dyn SampleSource>> {
        Err(Error::Decode(format!("Failed to open file {}", path.display())))
    }
}

fn queue(limit: usize, crossfade_ms: u64, events: &EventBus) -> CueQueue {
    let config = QueueConfig {
        limit,
        crossfade_ms,
        crossfade_curve: FadeCurve::EqualPower,
        trim_silence: false,
    };
    CueQueue::new(
        mono_1k(),
        config,
        SilenceConfig::default(),
        Arc::new(MissingLoader),
        events.clone(),
    )
}

fn started_labels(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<String> {
    let mut labels = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::CueStarted { label, .. } = event {
            labels.push(label);
        }
    }
    labels
}

#[test]
fn test_cues_play_back_to_back_in_fifo_order() {
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let queue = queue(10, 0, &events);

    for (label, value) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
        queue
            .enqueue_source(Box::new(constant_source(mono_1k(), 10, value)), label, CuePriority::Normal)
            .unwrap();
    }

    let mut source = queue.source();
    let mut buf = vec![0.0; 40];
    assert_eq!(source.read(&mut buf), 30);

    assert!(buf[0..10].iter().all(|s| *s == 1.0));
    assert!(buf[10..20].iter().all(|s| *s == 2.0));
    assert!(buf[20..30].iter().all(|s| *s == 3.0));
    assert_eq!(started_labels(&mut rx), vec!["a", "b", "c"]);
    assert!(queue.is_idle());
}

#[test]
fn test_immediate_cue_plays_next_and_defers_staged_cue() {
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let queue = queue(10, 10, &events);

    queue
        .enqueue_source(Box::new(constant_source(mono_1k(), 100, 1.0)), "x", CuePriority::Normal)
        .unwrap();
    queue
        .enqueue_source(Box::new(constant_source(mono_1k(), 100, 3.0)), "y", CuePriority::Normal)
        .unwrap();

    let mut source = queue.source();
    let mut buf = vec![0.0; 20];
    source.read(&mut buf);

    queue
        .enqueue_source(Box::new(constant_source(mono_1k(), 100, 2.0)), "imm", CuePriority::Immediate)
        .unwrap();
    assert_eq!(queue.next_cue().unwrap().label, "imm");

    let mut rest = vec![0.0; 400];
    source.read(&mut rest);

    assert_eq!(started_labels(&mut rx), vec!["x", "imm", "y"]);
}

#[test]
fn test_crossfade_holds_equal_power() {
    let events = EventBus::new(64);
    let queue = queue(10, 10, &events);

    queue
        .enqueue_source(Box::new(constant_source(mono_1k(), 30, 1.0)), "out", CuePriority::Normal)
        .unwrap();
    queue
        .enqueue_source(Box::new(constant_source(mono_1k(), 30, 1.0)), "in", CuePriority::Normal)
        .unwrap();

    let mut source = queue.source();
    let mut buf = vec![0.0; 50];
    assert_eq!(source.read(&mut buf), 50);

    // Two full-scale signals under sqrt gains sum to sqrt(1-p) + sqrt(p)
    for (frame, sample) in buf[20..30].iter().enumerate() {
        let p = (frame + 1) as f32 / 10.0;
        let expected = (1.0 - p).sqrt() + p.sqrt();
        assert!((sample - expected).abs() < 1e-5, "frame {}: {} vs {}", frame, sample, expected);
    }
    assert!(buf[30..50].iter().all(|s| *s == 1.0));
}

#[test]
fn test_queue_limit_rejects_overflow() {
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let queue = queue(2, 0, &events);

    // current, next, and two waiting
    for i in 0..4 {
        queue
            .enqueue_source(Box::new(constant_source(mono_1k(), 10, 1.0)), format!("cue{}", i), CuePriority::Normal)
            .unwrap();
    }
    assert_eq!(queue.len(), 4);
    assert_eq!(queue.waiting(), 2);

    let overflow = queue.enqueue_source(Box::new(constant_source(mono_1k(), 10, 1.0)), "cue4", CuePriority::Normal);
    assert!(matches!(overflow, Err(Error::QueueFull { limit: 2 })));
    assert_eq!(queue.len(), 4);

    assert!(!queue.queue_audio(Path::new("/cues/late.wav"), CuePriority::Normal));
    let rejected = std::iter::from_fn(|| rx.try_recv().ok())
        .any(|event| matches!(event, EngineEvent::CueRejected { ref label, .. } if label == "late.wav"));
    assert!(rejected);
}

#[test]
fn test_immediate_cue_ignores_limit() {
    let events = EventBus::new(64);
    let queue = queue(1, 0, &events);

    for label in ["a", "b", "c"] {
        queue
            .enqueue_source(Box::new(constant_source(mono_1k(), 10, 1.0)), label, CuePriority::Normal)
            .unwrap();
    }
    assert!(queue
        .enqueue_source(Box::new(constant_source(mono_1k(), 10, 1.0)), "d", CuePriority::Normal)
        .is_err());

    queue
        .enqueue_source(Box::new(constant_source(mono_1k(), 10, 1.0)), "now", CuePriority::Immediate)
        .unwrap();
    assert_eq!(queue.len(), 4);
    assert_eq!(queue.next_cue().unwrap().label, "now");
}

#[test]
fn test_decode_failure_leaves_queue_untouched() {
    let events = EventBus::new(64);
    let queue = queue(10, 0, &events);

    queue
        .enqueue_source(Box::new(constant_source(mono_1k(), 10, 1.0)), "a", CuePriority::Normal)
        .unwrap();
    assert!(!queue.queue_audio(Path::new("/missing.wav"), CuePriority::Immediate));

    assert_eq!(queue.len(), 1);
    assert_eq!(queue.current_cue().unwrap().label, "a");
}

#[test]
fn test_decoded_cue_starts_at_first_sample() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intro.wav");
    generate_marked_wav(&path, 44100, 2, 250, 0.5).unwrap();

    let format = SampleFormat::stereo_44k();
    let queue = CueQueue::new(
        format,
        QueueConfig::default(),
        SilenceConfig::default(),
        Arc::new(SymphoniaLoader),
        EventBus::new(64),
    );
    queue.try_queue_audio(&path, CuePriority::Normal).unwrap();
    assert_eq!(queue.current_cue().unwrap().label, "intro.wav");

    let mut source = queue.source();
    let mut buf = vec![0.0; 1024];
    assert_eq!(source.read(&mut buf), 1024);

    assert!((buf[0] - 0.5).abs() < 1e-3, "first sample was {}", buf[0]);
    assert!((buf[1] - 0.5).abs() < 1e-3);
    assert!(buf[2..].iter().all(|s| s.abs() < 1e-6));
}
