//! Hot-Reload Watcher
//!
//! Polls the skills directory and reloads the registry when the set of skill
//! files or any modification time changes. The host is told about each
//! reload through a callback so it can refresh the tool list it hands out.

use super::registry::{RegistrySnapshot, SkillRegistry};
use super::types::panic_message;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Called after every reload the watcher triggers
pub type ReloadCallback = Arc<dyn Fn(&RegistrySnapshot) + Send + Sync>;

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Background poller driving [`SkillRegistry::load`]
pub struct SkillWatcher {
    registry: Arc<SkillRegistry>,
    interval: Duration,
    running: Mutex<Option<Running>>,
    reloads: Arc<AtomicU64>,
}

impl SkillWatcher {
    pub fn new(registry: Arc<SkillRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            running: Mutex::new(None),
            reloads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start polling. Returns false if the watcher is already running.
    pub fn start<F>(&self, callback: F) -> bool
    where
        F: Fn(&RegistrySnapshot) + Send + Sync + 'static,
    {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(&self.registry);
        let callback: ReloadCallback = Arc::new(callback);
        let reloads = Arc::clone(&self.reloads);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            info!(
                "Skill watcher started on {} (every {}ms)",
                registry.dir().display(),
                interval.as_millis()
            );

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {
                        let cycle = AssertUnwindSafe(poll_once(&registry, &callback)).catch_unwind().await;
                        match cycle {
                            Ok(true) => {
                                reloads.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(false) => {}
                            Err(payload) => {
                                warn!("Skill watcher error: {}", panic_message(payload.as_ref()));
                            }
                        }
                    }
                }
            }

            debug!("Skill watcher stopped");
        });

        *running = Some(Running { shutdown, handle });
        true
    }

    /// Signal the poller to stop and wait up to `wait` for it to finish.
    ///
    /// Returns whether the task finished in time. A task still reloading is
    /// left to finish on its own and keeps counting as running until it does.
    pub async fn stop(&self, wait: Duration) -> bool {
        let running = self.running.lock().take();
        let Some(mut running) = running else {
            return true;
        };

        let _ = running.shutdown.send(true);
        if tokio::time::timeout(wait, &mut running.handle).await.is_ok() {
            return true;
        }

        warn!("Skill watcher still busy after {}ms", wait.as_millis());
        let mut slot = self.running.lock();
        if slot.is_none() {
            *slot = Some(running);
        }
        false
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Number of reloads triggered since creation
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }
}

impl Drop for SkillWatcher {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

/// One polling cycle; returns whether a reload happened
async fn poll_once(registry: &SkillRegistry, callback: &ReloadCallback) -> bool {
    let current = match registry.discover() {
        Ok(current) => current,
        Err(e) => {
            warn!("Skill watcher error: {}", e);
            return false;
        }
    };
    if current == registry.tracked_files() {
        return false;
    }

    debug!("Skill files changed, reloading");
    let snapshot = registry.load().await;
    callback(&snapshot);
    true
}
