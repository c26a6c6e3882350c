//! Heartbeat Reaper (§4.7).
//!
//! Staleness detection is a tracked-registry scan comparing elapsed time
//! since last-seen against a threshold; forced-timeout removal additionally
//! flips a shared `Arc<AtomicBool>` cancellation handle so the owning
//! dispatch can observe it was reaped mid-flight. The background cadence
//! loop is a plain `tokio::spawn` + `tokio::time::sleep` polling loop.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::RwLock;

use crate::atoms::types::{AgentActivity, AgentStatus};
use crate::engine::config::HeartbeatConfig;

/// A dispatch's cooperative cancellation handle. The Dispatcher holds the
/// original; the Heartbeat Reaper holds only a clone ("weak reference" in
/// spec terms — both sides share the same underlying flag, but only the
/// reaper is expected to ever set it to cancelled on someone else's behalf).
#[derive(Clone)]
pub struct CancellationSignal(Arc<AtomicBool>);

impl CancellationSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaperSignal {
    Stale(String),
    Timeout(String),
}

struct Entry {
    activity: AgentActivity,
    signal: CancellationSignal,
}

/// Single reader-writer lock over the whole map is acceptable per §5; the
/// reaper takes the write lock only to remove timed-out entries.
pub struct HeartbeatMap {
    entries: RwLock<HashMap<String, Entry>>,
    stale_signaled: Mutex<HashSet<String>>,
}

impl Default for HeartbeatMap {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatMap {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()), stale_signaled: Mutex::new(HashSet::new()) }
    }

    /// Created on dispatch start. Returns the cancellation signal the
    /// dispatch must check at every suspension point.
    pub async fn register(&self, task_id: &str, agent_id: &str) -> CancellationSignal {
        let signal = CancellationSignal::new();
        let now = Utc::now();
        let activity = AgentActivity {
            agent_id: agent_id.to_string(),
            task_id: task_id.to_string(),
            started_at: now,
            last_activity_at: now,
            status: AgentStatus::Running,
        };
        self.entries.write().await.insert(task_id.to_string(), Entry { activity, signal: signal.clone() });
        signal
    }

    /// Touched on upstream progress.
    pub async fn touch(&self, task_id: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(task_id) {
            entry.activity.last_activity_at = Utc::now();
        }
    }

    /// Deleted on completion (success, terminal failure, or cancellation).
    pub async fn unregister(&self, task_id: &str) {
        self.entries.write().await.remove(task_id);
        self.stale_signaled.lock().remove(task_id);
    }

    pub async fn in_flight_count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn contains(&self, task_id: &str) -> bool {
        self.entries.read().await.contains_key(task_id)
    }

    /// One reaper sweep. Stale signals are at-most-once per task-id until
    /// the next registration with the same id; timeout signals terminate
    /// the record (at-most-once by construction — the record is gone after).
    pub async fn check(&self, stale_threshold_s: u64, timeout_threshold_s: u64) -> Vec<ReaperSignal> {
        let now = Utc::now();
        let mut signals = Vec::new();
        let mut to_remove = Vec::new();

        {
            let entries = self.entries.read().await;
            for (task_id, entry) in entries.iter() {
                let since_start = (now - entry.activity.started_at).num_seconds().max(0) as u64;
                let since_activity = (now - entry.activity.last_activity_at).num_seconds().max(0) as u64;

                if since_start > timeout_threshold_s {
                    to_remove.push(task_id.clone());
                    continue;
                }
                if since_activity > stale_threshold_s && entry.activity.status == AgentStatus::Running {
                    let mut signaled = self.stale_signaled.lock();
                    if signaled.insert(task_id.clone()) {
                        signals.push(ReaperSignal::Stale(task_id.clone()));
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            let mut entries = self.entries.write().await;
            for task_id in &to_remove {
                if let Some(entry) = entries.remove(task_id) {
                    entry.signal.cancel();
                    signals.push(ReaperSignal::Timeout(task_id.clone()));
                }
                self.stale_signaled.lock().remove(task_id);
            }
        }

        signals
    }
}

/// Background cadence loop (§4.7 "Wakes on a fixed cadence"): a plain
/// `tokio::spawn(async move { loop { ...; sleep(interval) } })` task.
pub fn spawn_reaper_loop(map: Arc<HeartbeatMap>, config: HeartbeatConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(config.check_interval_s);
        loop {
            tokio::time::sleep(interval).await;
            let signals = map.check(config.stale_threshold_s, config.timeout_threshold_s).await;
            for signal in signals {
                match signal {
                    ReaperSignal::Stale(task_id) => {
                        log::warn!("heartbeat: task {task_id} is stale (no progress within threshold)");
                    }
                    ReaperSignal::Timeout(task_id) => {
                        log::error!("heartbeat: task {task_id} timed out, forcibly released");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_unregister_removes_entry() {
        let map = HeartbeatMap::new();
        map.register("t1", "a1").await;
        assert!(map.contains("t1").await);
        map.unregister("t1").await;
        assert!(!map.contains("t1").await);
    }

    #[tokio::test]
    async fn check_emits_no_signals_for_fresh_entry() {
        let map = HeartbeatMap::new();
        map.register("t1", "a1").await;
        let signals = map.check(300, 1800).await;
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn check_emits_stale_at_most_once_per_task() {
        let map = HeartbeatMap::new();
        map.register("t1", "a1").await;
        // Back-date last_activity_at past the stale threshold.
        {
            let mut entries = map.entries.write().await;
            let entry = entries.get_mut("t1").unwrap();
            entry.activity.last_activity_at = Utc::now() - chrono::Duration::seconds(400);
        }
        let first = map.check(300, 1800).await;
        assert_eq!(first, vec![ReaperSignal::Stale("t1".into())]);
        let second = map.check(300, 1800).await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn check_times_out_and_cancels_signal() {
        let map = HeartbeatMap::new();
        let signal = map.register("t1", "a1").await;
        {
            let mut entries = map.entries.write().await;
            let entry = entries.get_mut("t1").unwrap();
            entry.activity.started_at = Utc::now() - chrono::Duration::seconds(2_000);
        }
        let signals = map.check(300, 1800).await;
        assert_eq!(signals, vec![ReaperSignal::Timeout("t1".into())]);
        assert!(signal.is_cancelled());
        assert!(!map.contains("t1").await);
    }

    #[tokio::test]
    async fn touch_resets_staleness_clock() {
        let map = HeartbeatMap::new();
        map.register("t1", "a1").await;
        {
            let mut entries = map.entries.write().await;
            let entry = entries.get_mut("t1").unwrap();
            entry.activity.last_activity_at = Utc::now() - chrono::Duration::seconds(400);
        }
        map.touch("t1").await;
        let signals = map.check(300, 1800).await;
        assert!(signals.is_empty());
    }
}
