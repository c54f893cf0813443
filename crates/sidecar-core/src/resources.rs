//! Process-wide backend resource management.
//!
//! The native libraries keep global state that must be initialized once
//! before any context is created and freed once at the end. The
//! [`BackendResourceManager`] owns that state and makes both operations
//! single-flight:
//!
//! ```text
//! init()    ──► Completion ◄── init()      (shared while pending)
//!                  │
//!            worker "sidecar-backend-init": GlobalBackend::init
//!                  │
//!                  ├─ dispose requested meanwhile? ─► GlobalBackend::free
//!                  └─ otherwise initialized = true
//!
//! dispose() ──► Completion ◄── dispose()
//!                  │
//!            worker "sidecar-backend-dispose": free if initialized
//! ```
//!
//! `initialized` and `disposed` live under one mutex, so the backend is freed
//! at most once per successful init regardless of how the two interleave.
//! The native `init`/`free` calls themselves run outside that mutex, so
//! `state()`, `init()` and `dispose()` never wait on a slow teardown.

use crate::backend::{default_global_backend, GlobalBackend};
use crate::error::{EncoderError, EncoderResult};
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::Duration;

// ============================================================================
// Completion
// ============================================================================

#[derive(Debug, Clone)]
enum Failure {
    Disposed(String),
    Backend(String),
}

impl Failure {
    fn into_error(self) -> EncoderError {
        match self {
            Failure::Disposed(msg) => EncoderError::Disposed(msg),
            Failure::Backend(msg) => EncoderError::BackendInit(msg),
        }
    }
}

/// Result of a pending init or dispose. Resolves exactly once; every waiter
/// sees the same outcome.
#[derive(Debug, Default)]
pub struct Completion {
    outcome: Mutex<Option<Result<(), Failure>>>,
    resolved: Condvar,
}

impl Completion {
    fn pending() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn ready(outcome: Result<(), Failure>) -> Arc<Self> {
        let completion = Self::pending();
        completion.resolve(outcome);
        completion
    }

    fn lock(&self) -> MutexGuard<'_, Option<Result<(), Failure>>> {
        self.outcome.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// First call wins; later calls are ignored.
    fn resolve(&self, outcome: Result<(), Failure>) {
        let mut slot = self.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.resolved.notify_all();
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.lock().is_some()
    }

    /// Block until resolved.
    pub fn wait(&self) -> EncoderResult<()> {
        let mut slot = self.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone().map_err(Failure::into_error);
            }
            slot = self.resolved.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Block for at most `timeout`. `None` if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<EncoderResult<()>> {
        let slot = self.lock();
        let (slot, _) = self
            .resolved
            .wait_timeout_while(slot, timeout, |s| s.is_none())
            .unwrap_or_else(|e| e.into_inner());
        slot.as_ref().map(|o| o.clone().map_err(Failure::into_error))
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Lifecycle view of the global backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendState {
    Uninitialized,
    Initializing,
    Ready,
    Disposed,
}

#[derive(Default)]
struct Flags {
    initialized: bool,
    disposed: bool,
    pending_init: Option<Arc<Completion>>,
    pending_dispose: Option<Arc<Completion>>,
}

struct Inner {
    backend: Arc<dyn GlobalBackend>,
    flags: Mutex<Flags>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the initialized backend for freeing. Caller holds the flags
    /// lock; the actual `free` must run after the lock is released.
    fn take_initialized(flags: &mut Flags) -> bool {
        std::mem::replace(&mut flags.initialized, false)
    }

    /// Call into the backend. Never called with the flags lock held.
    fn free_backend(&self) -> Result<(), Failure> {
        match self.backend.free() {
            Ok(()) => {
                log::info!(target: "sidecar_core", "global backend '{}' freed", self.backend.name());
                Ok(())
            }
            Err(e) => {
                log::warn!(target: "sidecar_core", "global backend free failed: {}", e);
                Err(Failure::Backend(e.to_string()))
            }
        }
    }

    fn run_init(&self, completion: &Completion) {
        let result = self.backend.init();
        let mut flags = self.lock();

        let (outcome, free_now) = match result {
            // Dispose ran while we were initializing and found nothing to free.
            Ok(()) if flags.disposed => (
                Err(Failure::Disposed("backend disposed during init".to_string())),
                true,
            ),
            Ok(()) => {
                flags.initialized = true;
                log::info!(target: "sidecar_core", "global backend '{}' initialized", self.backend.name());
                (Ok(()), false)
            }
            Err(e) => {
                log::warn!(target: "sidecar_core", "global backend init failed: {}", e);
                (Err(Failure::Backend(e.to_string())), false)
            }
        };
        if !free_now {
            flags.pending_init = None;
        }
        drop(flags);

        if free_now {
            let _ = self.free_backend();
            // Still registered until here so shutdown() waits for this free.
            self.lock().pending_init = None;
        }
        completion.resolve(outcome);
    }

    fn run_dispose(&self, completion: &Completion) {
        let owned = Self::take_initialized(&mut self.lock());
        let outcome = if owned { self.free_backend() } else { Ok(()) };
        // Cleared only after the free so later dispose() calls keep sharing
        // this completion until the backend is actually released.
        self.lock().pending_dispose = None;
        completion.resolve(outcome);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let flags = self.flags.get_mut().unwrap_or_else(|e| e.into_inner());
        if flags.initialized {
            flags.initialized = false;
            if let Err(e) = self.backend.free() {
                log::warn!(target: "sidecar_core", "global backend free on drop failed: {}", e);
            }
        }
    }
}

/// Owner of the process-wide backend state.
///
/// Use [`BackendResourceManager::global`] in applications; [`new`](Self::new)
/// creates isolated instances for tests.
#[derive(Clone)]
pub struct BackendResourceManager {
    inner: Arc<Inner>,
}

static GLOBAL: OnceLock<BackendResourceManager> = OnceLock::new();

impl BackendResourceManager {
    pub fn new(backend: Arc<dyn GlobalBackend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                flags: Mutex::new(Flags::default()),
            }),
        }
    }

    /// The process-wide manager over the compiled-in global backend.
    pub fn global() -> &'static BackendResourceManager {
        GLOBAL.get_or_init(|| Self::new(default_global_backend()))
    }

    /// Initialize the backend. Concurrent callers share one completion and
    /// the backend sees exactly one `init` call.
    pub fn init(&self) -> Arc<Completion> {
        let mut flags = self.inner.lock();
        if flags.disposed {
            return Completion::ready(Err(Failure::Disposed(
                "backend resources already disposed".to_string(),
            )));
        }
        if flags.initialized {
            return Completion::ready(Ok(()));
        }
        if let Some(pending) = &flags.pending_init {
            return Arc::clone(pending);
        }

        let completion = Completion::pending();
        flags.pending_init = Some(Arc::clone(&completion));
        drop(flags);

        let inner = Arc::clone(&self.inner);
        let worker_completion = Arc::clone(&completion);
        let spawned = thread::Builder::new()
            .name("sidecar-backend-init".to_string())
            .spawn(move || inner.run_init(&worker_completion));

        if let Err(e) = spawned {
            self.inner.lock().pending_init = None;
            completion.resolve(Err(Failure::Backend(format!(
                "failed to spawn init worker: {}",
                e
            ))));
        }
        completion
    }

    /// Release the backend. The first call marks the manager disposed; later
    /// calls share its completion or resolve immediately.
    pub fn dispose(&self) -> Arc<Completion> {
        let mut flags = self.inner.lock();
        if let Some(pending) = &flags.pending_dispose {
            return Arc::clone(pending);
        }
        if flags.disposed {
            return Completion::ready(Ok(()));
        }
        flags.disposed = true;

        let completion = Completion::pending();
        flags.pending_dispose = Some(Arc::clone(&completion));
        drop(flags);

        let inner = Arc::clone(&self.inner);
        let worker_completion = Arc::clone(&completion);
        let spawned = thread::Builder::new()
            .name("sidecar-backend-dispose".to_string())
            .spawn(move || inner.run_dispose(&worker_completion));

        if let Err(e) = spawned {
            log::warn!(target: "sidecar_core", "dispose worker spawn failed, freeing inline: {}", e);
            self.inner.run_dispose(&completion);
        }
        completion
    }

    /// Synchronous teardown for process exit. Idempotent.
    ///
    /// Waits for any in-flight init or dispose worker, so the backend is
    /// released by the time this returns.
    pub fn shutdown(&self) {
        let (owned, in_flight) = {
            let mut flags = self.inner.lock();
            flags.disposed = true;
            let in_flight = [flags.pending_init.clone(), flags.pending_dispose.clone()];
            (Inner::take_initialized(&mut flags), in_flight)
        };
        if owned {
            let _ = self.inner.free_backend();
        }
        for pending in in_flight.into_iter().flatten() {
            let _ = pending.wait();
        }
    }

    pub fn state(&self) -> BackendState {
        let flags = self.inner.lock();
        if flags.disposed {
            BackendState::Disposed
        } else if flags.initialized {
            BackendState::Ready
        } else if flags.pending_init.is_some() {
            BackendState::Initializing
        } else {
            BackendState::Uninitialized
        }
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }
}
