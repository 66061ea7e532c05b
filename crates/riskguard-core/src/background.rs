//! Periodic refresh tasks with explicit shutdown.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::rule_engine::RuleEngine;
use crate::word_store::SensitiveWordStore;

/// Owns the background tasks of a checker.
///
/// Every task stops when [`shutdown`](Self::shutdown) is called or the handle
/// is dropped.
pub struct BackgroundTasks {
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Returns a receiver that fires on shutdown.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Takes ownership of a task so shutdown waits for it.
    pub fn track(&self, handle: JoinHandle<()>) {
        self.handles.lock().push(handle);
    }

    /// Number of tracked tasks.
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Runs `tick` every `interval` until shutdown.
    pub fn spawn_periodic<F>(&self, name: &'static str, interval: Duration, mut tick: F)
    where
        F: FnMut() + Send + 'static,
    {
        let mut shutdown_rx = self.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick(),
                    _ = shutdown_rx.recv() => {
                        info!(task = name, "Background task stopped");
                        break;
                    }
                }
            }
        });
        self.track(handle);
    }

    /// Reloads the word list every `interval`.
    pub fn spawn_word_refresh(&self, words: Arc<SensitiveWordStore>, interval: Duration) {
        self.spawn_periodic("word_refresh", interval, move || {
            words.update();
        });
    }

    /// Reloads the rule file every `interval`. Failures keep the active set.
    pub fn spawn_rule_reload(&self, rules: Arc<RuleEngine>, interval: Duration) {
        self.spawn_periodic("rule_reload", interval, move || {
            if let Err(e) = rules.reload() {
                error!(error = %e, "Rule reload failed, keeping current rule set");
            }
        });
    }

    /// Signals every task and waits for them to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl std::fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTasks")
            .field("tasks", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn periodic_task_ticks_until_shutdown() {
        let tasks = BackgroundTasks::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        tasks.spawn_periodic("test", Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        tasks.shutdown().await;
        assert!(tasks.is_empty());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn word_refresh_picks_up_file_changes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "first").unwrap();
        let words = Arc::new(SensitiveWordStore::load(vec![file.path().to_path_buf()]));
        assert_eq!(words.all_words(), vec!["first"]);

        let tasks = BackgroundTasks::new();
        tasks.spawn_word_refresh(Arc::clone(&words), Duration::from_secs(60));

        std::fs::write(file.path(), "second\n").unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(words.all_words(), vec!["second"]);

        tasks.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rule_reload_keeps_active_set() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"rules": []}"#).unwrap();
        let rules = Arc::new(RuleEngine::from_file(file.path()).unwrap());

        let tasks = BackgroundTasks::new();
        tasks.spawn_rule_reload(Arc::clone(&rules), Duration::from_secs(5));
        std::fs::write(file.path(), "broken").unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(rules.snapshot().unwrap().version, 1);
        tasks.shutdown().await;
    }
}
