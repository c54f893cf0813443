//! End-to-end lifecycle tests for EncoderController against mock and
//! unavailable backends.
//!
//! ```bash
//! cargo test -p sidecar-core --test lifecycle_integration
//! ```

use sidecar_core::backend::{BackendLimits, EncoderBackend, UnavailableBackend};
use sidecar_core::capabilities::{AudioInput, Capabilities};
use sidecar_core::preprocessing::MelConfig;
use sidecar_core::testing::{fixtures, MockBackend};
use sidecar_core::types::NormalizedTensorBatch;
use sidecar_core::{EncoderController, EncoderError, EncoderKind, ModelPaths, ModelState};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn vision_controller(backend: &MockBackend) -> EncoderController {
    EncoderController::new(
        EncoderKind::Vision,
        ModelPaths::new("llava.gguf").with_mmproj("mmproj.gguf"),
        Arc::new(backend.clone()),
    )
}

fn audio_controller(backend: &MockBackend) -> EncoderController {
    EncoderController::new(
        EncoderKind::Audio,
        ModelPaths::new("whisper-base.bin"),
        Arc::new(backend.clone()),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend conformance
// ─────────────────────────────────────────────────────────────────────────────

/// Contract every EncoderBackend must follow when it cannot load.
fn unavailable_conformance<B: EncoderBackend + Clone + 'static>(backend: &B, label: &str) {
    assert!(!backend.name().is_empty(), "{}: empty name", label);
    assert!(!backend.is_available(), "{}: should report unavailable", label);

    let controller = EncoderController::new(
        EncoderKind::Vision,
        ModelPaths::new("llava.gguf").with_mmproj("mmproj.gguf"),
        Arc::new(backend.clone()),
    );
    let err = controller.load().unwrap_err();
    assert!(
        matches!(err, EncoderError::UnsupportedFormat(_)),
        "{}: expected UnsupportedFormat, got {:?}",
        label,
        err
    );
    assert_eq!(controller.state(), ModelState::Uninitialized);
}

#[test]
fn test_unavailable_backends_fail_explicitly() {
    unavailable_conformance(&UnavailableBackend::new("not linked"), "unavailable");

    #[cfg(not(feature = "native"))]
    unavailable_conformance(
        &sidecar_core::backend::native::NativeBackend::default(),
        "native-without-feature",
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_full_vision_lifecycle() {
    let backend = MockBackend::with_embedding(vec![0.5; 64]).with_limits(BackendLimits {
        image_size: Some(336),
        embedding_dims: Some(64),
        ..Default::default()
    });
    let controller = vision_controller(&backend);

    assert_eq!(controller.get_capabilities(), Capabilities::vision_defaults());
    assert!(controller.load().unwrap());
    assert_eq!(controller.get_capabilities().embedding_dims, Some(64));

    for channels in 1..=4u32 {
        let pixels = fixtures::solid_image(2, 2, channels, 200);
        let result = controller.process_image(&pixels, 2, 2, channels).unwrap();
        assert_eq!(result.dims, 64);
        match backend.last_batch() {
            Some(NormalizedTensorBatch::Vision(batch)) => {
                assert_eq!(batch.shape(), [1, 3, 2, 2]);
                assert_eq!(&batch.images[0][..3], &[200, 200, 200]);
            }
            other => panic!("channels={}: unexpected batch {:?}", channels, other),
        }
    }

    controller.dispose();
    controller.dispose();
    assert_eq!(backend.free_count(), 1);
    assert!(matches!(
        controller.process_image(&[0; 12], 2, 2, 3),
        Err(EncoderError::Disposed(_))
    ));
    assert!(matches!(
        controller.load(),
        Err(EncoderError::AlreadyDisposed(_))
    ));
}

#[test]
fn test_full_audio_lifecycle() {
    let backend = MockBackend::with_transcript(vec![0.1; 16], "the quick brown fox", 0.87);
    let controller = audio_controller(&backend);
    controller.load().unwrap();
    controller.set_language("en").unwrap();

    let samples: Vec<f32> = fixtures::sine_wave(440.0, 8000, 1.0)
        .into_iter()
        .map(|s| s * 2.0)
        .collect();
    let result = controller.process_audio(&samples, 8000).unwrap();
    assert_eq!(result.transcript.as_deref(), Some("the quick brown fox"));
    assert_eq!(result.confidence, Some(0.87));

    match backend.last_batch() {
        Some(NormalizedTensorBatch::Audio(batch)) => {
            assert_eq!(batch.language, "en");
            let waveform = batch.waveform().unwrap();
            assert!((waveform.len() as i64 - 16000).abs() <= 1);
            let peak = waveform.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            assert!((peak - 1.0).abs() < 1e-6);
        }
        other => panic!("unexpected batch {:?}", other),
    }
}

#[test]
fn test_audio_mel_input_when_backend_requests_it() {
    let backend = MockBackend::with_transcript(vec![0.1; 8], "", 0.5).with_limits(BackendLimits {
        audio_input: AudioInput::Mel(MelConfig::whisper()),
        ..Default::default()
    });
    let controller = audio_controller(&backend);
    controller.load().unwrap();
    controller
        .process_audio(&fixtures::sine_wave(300.0, 16000, 0.5), 16000)
        .unwrap();

    match backend.last_batch() {
        Some(NormalizedTensorBatch::Audio(batch)) => {
            assert_eq!(batch.shape(), vec![1, 80, 3000]);
        }
        other => panic!("unexpected batch {:?}", other),
    }
}

#[test]
fn test_settings_survive_rejected_updates() {
    let backend = MockBackend::with_embedding(vec![0.1]);
    let controller = audio_controller(&backend);
    controller.set_sample_rate(22050).unwrap();
    assert!(matches!(
        controller.set_sample_rate(99999),
        Err(EncoderError::Validation(_))
    ));
    assert_eq!(controller.sample_rate(), 22050);
    assert!(matches!(
        controller.set_language("klingon"),
        Err(EncoderError::Validation(_))
    ));
    assert_eq!(controller.language(), "auto");
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_dispose_waits_for_inflight_encode() {
    let backend = MockBackend::with_embedding(vec![0.3; 8])
        .with_encode_delay(Duration::from_millis(150));
    let controller = Arc::new(vision_controller(&backend));
    controller.load().unwrap();

    let worker = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || controller.process_image(&[1; 3], 1, 1, 3))
    };
    thread::sleep(Duration::from_millis(30));
    controller.dispose();
    let encodes_at_dispose = backend.encode_count();

    match worker.join().unwrap() {
        // encode got the lock first, so dispose returned only after it finished
        Ok(_) => assert_eq!(encodes_at_dispose, 1),
        Err(e) => assert!(matches!(e, EncoderError::Disposed(_)), "{:?}", e),
    }
    assert_eq!(controller.state(), ModelState::Disposed);
    assert_eq!(backend.free_count(), 1);
}

#[test]
fn test_concurrent_loads_create_one_context() {
    let backend = MockBackend::with_embedding(vec![0.1]);
    let controller = Arc::new(audio_controller(&backend));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let controller = Arc::clone(&controller);
            thread::spawn(move || controller.load())
        })
        .collect();
    for h in handles {
        assert!(h.join().unwrap().unwrap());
    }
    assert_eq!(backend.load_count(), 1);
}

#[test]
fn test_independent_controllers() {
    let vision_backend = MockBackend::with_embedding(vec![0.2; 4]);
    let audio_backend = MockBackend::with_transcript(vec![0.4; 4], "hi", 0.9);
    let vision = vision_controller(&vision_backend);
    let audio = audio_controller(&audio_backend);
    vision.load().unwrap();
    audio.load().unwrap();

    vision.dispose();
    assert!(audio.process_audio(&[0.2; 1600], 16000).is_ok());
    assert_eq!(vision_backend.free_count(), 1);
    assert_eq!(audio_backend.free_count(), 0);
}
