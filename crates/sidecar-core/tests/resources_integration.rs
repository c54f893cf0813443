//! Concurrency tests for BackendResourceManager.

use sidecar_core::testing::MockGlobalBackend;
use sidecar_core::{BackendResourceManager, BackendState, EncoderError};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_init_calls_backend_once() {
    let mock = MockGlobalBackend::new().with_init_delay(Duration::from_millis(50));
    let manager = BackendResourceManager::new(Arc::new(mock.clone()));
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let manager = manager.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                manager.init().wait()
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap().unwrap();
    }
    assert_eq!(mock.init_count(), 1);
    assert_eq!(manager.state(), BackendState::Ready);
}

#[test]
fn test_concurrent_dispose_frees_once() {
    let mock = MockGlobalBackend::new();
    let manager = BackendResourceManager::new(Arc::new(mock.clone()));
    manager.init().wait().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            thread::spawn(move || manager.dispose().wait())
        })
        .collect();
    for h in handles {
        h.join().unwrap().unwrap();
    }
    manager.shutdown();

    assert_eq!(mock.free_count(), 1);
    assert_eq!(manager.state(), BackendState::Disposed);
}

#[test]
fn test_pending_callers_share_completion() {
    let mock = MockGlobalBackend::new().with_init_delay(Duration::from_millis(100));
    let manager = BackendResourceManager::new(Arc::new(mock.clone()));

    let first = manager.init();
    let second = manager.init();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(!first.is_resolved());

    first.wait().unwrap();
    assert!(second.is_resolved());
}

#[test]
fn test_init_after_dispose_is_rejected() {
    let mock = MockGlobalBackend::new();
    let manager = BackendResourceManager::new(Arc::new(mock.clone()));
    manager.init().wait().unwrap();
    manager.dispose().wait().unwrap();

    assert!(matches!(
        manager.init().wait(),
        Err(EncoderError::Disposed(_))
    ));
    assert_eq!(mock.init_count(), 1);
}

#[test]
fn test_shutdown_without_init() {
    let mock = MockGlobalBackend::new();
    let manager = BackendResourceManager::new(Arc::new(mock.clone()));
    manager.shutdown();
    manager.shutdown();
    assert_eq!(mock.free_count(), 0);
    assert_eq!(manager.state(), BackendState::Disposed);
}
