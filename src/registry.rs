//! # Manual Route Registry
//!
//! Escape hatch for routes that cannot be expressed by discovery or module
//! config: callers queue registration callbacks with an id and a priority,
//! and a single `register_all` pass plays them against the server
//! capability. Entries with a higher priority register strictly before
//! lower ones; within one priority tier callbacks run concurrently in
//! batches bounded by `max_concurrency`.
//!
//! The registry is a small state machine. Adding entries moves it from
//! `Empty` to `Populated`; `register_all` holds `Registering` for the
//! duration of the pass and lands on `Registered` or `Failed`. A failed
//! pass stops before lower tiers run. `clear` always resets to `Empty`.

use crate::runtime_config::RuntimeConfig;
use crate::server::ServerCapability;
use may::coroutine;
use may::sync::mpsc;
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Registration callback. Receives the server capability and performs its
/// own `register` calls.
pub type RegisterFn = Arc<dyn Fn(Arc<dyn ServerCapability>) -> anyhow::Result<()> + Send + Sync>;

/// One queued manual registration.
#[derive(Clone)]
pub struct ManualRouteEntry {
    pub id: String,
    /// Higher registers earlier. Equal priorities form one concurrent tier.
    pub priority: i32,
    pub register: RegisterFn,
}

impl ManualRouteEntry {
    pub fn new(
        id: impl Into<String>,
        priority: i32,
        register: impl Fn(Arc<dyn ServerCapability>) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            register: Arc::new(register),
        }
    }
}

impl std::fmt::Debug for ManualRouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualRouteEntry")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Registry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Empty,
    Populated,
    Registering,
    Registered,
    Failed,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Ids are unique; the second add with the same id is rejected at add
    /// time, not during registration.
    #[error("manual route id {id:?} is already queued")]
    DuplicateId { id: String },
    #[error("registration pass already in progress")]
    RegistrationInProgress,
    #[error("manual route {id:?} failed to register: {message}")]
    RegistrationFailed { id: String, message: String },
}

/// Outcome counters for one registration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryReport {
    pub registered: usize,
    pub tiers: usize,
}

struct Inner {
    entries: Vec<ManualRouteEntry>,
    state: RegistryState,
}

/// Priority-ordered manual route registry.
pub struct ManualRouteRegistry {
    inner: Mutex<Inner>,
    runtime: RuntimeConfig,
}

impl ManualRouteRegistry {
    pub fn new(runtime: RuntimeConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                state: RegistryState::Empty,
            }),
            runtime,
        }
    }

    /// Queue an entry. Fails synchronously on a duplicate id.
    pub fn add(&self, entry: ManualRouteEntry) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if inner.state == RegistryState::Registering {
            return Err(RegistryError::RegistrationInProgress);
        }
        if inner.entries.iter().any(|e| e.id == entry.id) {
            return Err(RegistryError::DuplicateId { id: entry.id });
        }
        debug!(id = %entry.id, priority = entry.priority, "Manual route queued");
        inner.entries.push(entry);
        inner.state = RegistryState::Populated;
        Ok(())
    }

    /// Queue several entries; stops at the first duplicate id.
    pub fn add_all(
        &self,
        entries: impl IntoIterator<Item = ManualRouteEntry>,
    ) -> Result<(), RegistryError> {
        for entry in entries {
            self.add(entry)?;
        }
        Ok(())
    }

    pub fn state(&self) -> RegistryState {
        self.inner.lock().expect("registry lock poisoned").state
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued entry and reset to `Empty`, whatever the current
    /// state.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.entries.clear();
        inner.state = RegistryState::Empty;
    }

    /// Play every queued entry against `server`, highest priority first.
    ///
    /// The first failing entry aborts the pass: its own tier finishes the
    /// batch it started, lower tiers never run, and the registry lands in
    /// `Failed`. The entry queue is kept so a caller can inspect or clear
    /// it.
    pub fn register_all(
        &self,
        server: Arc<dyn ServerCapability>,
    ) -> Result<RegistryReport, RegistryError> {
        let snapshot = {
            let mut inner = self.inner.lock().expect("registry lock poisoned");
            if inner.state == RegistryState::Registering {
                return Err(RegistryError::RegistrationInProgress);
            }
            inner.state = RegistryState::Registering;
            inner.entries.clone()
        };

        let mut ordered = snapshot;
        ordered.sort_by_key(|e| std::cmp::Reverse(e.priority));

        let mut report = RegistryReport::default();
        let mut failure: Option<RegistryError> = None;

        'tiers: for tier in ordered.chunk_by(|a, b| a.priority == b.priority) {
            report.tiers += 1;
            for batch in tier.chunks(self.runtime.max_concurrency.max(1)) {
                let results = self.run_batch(batch, &server);
                for (id, result) in results {
                    match result {
                        Ok(()) => report.registered += 1,
                        Err(message) => {
                            warn!(id = %id, error = %message, "Manual route registration failed");
                            if failure.is_none() {
                                failure = Some(RegistryError::RegistrationFailed { id, message });
                            }
                        }
                    }
                }
                if failure.is_some() {
                    break 'tiers;
                }
            }
        }

        let mut inner = self.inner.lock().expect("registry lock poisoned");
        match failure {
            Some(error) => {
                inner.state = RegistryState::Failed;
                Err(error)
            }
            None => {
                inner.state = RegistryState::Registered;
                info!(
                    registered = report.registered,
                    tiers = report.tiers,
                    "Manual route registration complete"
                );
                Ok(report)
            }
        }
    }

    /// Run one batch of same-priority entries concurrently and join them.
    fn run_batch(
        &self,
        batch: &[ManualRouteEntry],
        server: &Arc<dyn ServerCapability>,
    ) -> Vec<(String, Result<(), String>)> {
        let (tx, rx) = mpsc::channel::<(usize, Result<(), String>)>();
        for (idx, entry) in batch.iter().enumerate() {
            let co_tx = tx.clone();
            let server = Arc::clone(server);
            let register = Arc::clone(&entry.register);

            // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by
            // the may runtime. The closure is Send + 'static and reports
            // exactly once through the channel.
            #[allow(unsafe_code)]
            let spawned = unsafe {
                coroutine::Builder::new()
                    .stack_size(self.runtime.stack_size)
                    .spawn(move || {
                        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                            register(server)
                        }));
                        let result = match outcome {
                            Ok(Ok(())) => Ok(()),
                            Ok(Err(e)) => Err(e.to_string()),
                            Err(panic) => Err(format!("registration panicked: {panic:?}")),
                        };
                        let _ = co_tx.send((idx, result));
                    })
            };
            if let Err(e) = spawned {
                let _ = tx.send((idx, Err(format!("coroutine spawn failed: {e}"))));
            }
        }
        drop(tx);

        let mut results: Vec<(usize, Result<(), String>)> = rx.into_iter().collect();
        results.sort_by_key(|(idx, _)| *idx);
        results
            .into_iter()
            .map(|(idx, result)| (batch[idx].id.clone(), result))
            .collect()
    }
}

static GLOBAL: Lazy<ManualRouteRegistry> =
    Lazy::new(|| ManualRouteRegistry::new(RuntimeConfig::from_env()));

/// Process-wide default registry.
pub fn global() -> &'static ManualRouteRegistry {
    &GLOBAL
}
