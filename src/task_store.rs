use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::log_task_event;
use crate::models::{LiveTaskStatus, TaskStatusUpdate};

/// In-memory task status table with age and capacity based eviction.
///
/// Holds the live view of every in-flight generation task. Entries are
/// advisory: the durable task row outlives them, so eviction of a finished
/// entry loses detail, never existence. All writes go through [`update`],
/// which enforces the monotonic rules (progress never decreases, stages
/// never regress, terminal statuses stick).
///
/// [`update`]: TaskStatusTable::update
#[derive(Debug, Clone)]
pub struct TaskStatusTable {
    entries: Arc<RwLock<HashMap<String, LiveTaskStatus>>>,
    max_entries: usize,
    max_age_hours: i64,
}

impl TaskStatusTable {
    pub fn new(max_entries: usize, max_age_hours: i64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries,
            max_age_hours,
        }
    }

    /// Insert a fresh entry. An existing entry under the same id is never
    /// overwritten; that would wipe live progress.
    pub async fn create(&self, status: LiveTaskStatus) -> bool {
        let mut entries = self.entries.write().await;

        if entries.contains_key(&status.task_id) {
            error!(
                task_id = %status.task_id,
                "Refusing to overwrite existing live task entry"
            );
            return false;
        }

        debug!(
            task_id = %status.task_id,
            table_size = entries.len() + 1,
            "Created live task entry"
        );
        entries.insert(status.task_id.clone(), status);
        true
    }

    pub async fn get(&self, task_id: &str) -> Option<LiveTaskStatus> {
        let entries = self.entries.read().await;
        entries.get(task_id).cloned()
    }

    /// Merge a partial update into an entry. Updates for unknown ids are
    /// dropped with a warning: the task may already have been evicted.
    pub async fn update(&self, task_id: &str, update: TaskStatusUpdate) {
        let mut entries = self.entries.write().await;

        let Some(entry) = entries.get_mut(task_id) else {
            warn!(task_id = %task_id, "Status update for unknown or evicted task ignored");
            return;
        };

        if let Some(status) = update.status {
            if entry.status.is_terminal() && status != entry.status {
                warn!(
                    task_id = %task_id,
                    from = entry.status.as_str(),
                    to = status.as_str(),
                    "Ignoring status change after terminal state"
                );
            } else {
                entry.status = status;
            }
        }

        if let Some(stage) = update.stage {
            match entry.stage {
                Some(current) if stage.rank() < current.rank() => {
                    warn!(
                        task_id = %task_id,
                        from = current.as_str(),
                        to = stage.as_str(),
                        "Ignoring stage regression"
                    );
                }
                _ => entry.stage = Some(stage),
            }
        }

        if let Some(progress) = update.progress {
            let clamped = progress.clamp(0.0, 100.0);
            if clamped >= entry.progress {
                entry.progress = clamped;
            } else {
                debug!(
                    task_id = %task_id,
                    current = entry.progress,
                    proposed = clamped,
                    "Ignoring progress decrease"
                );
            }
        }

        if let Some(message) = update.message {
            entry.message = Some(message);
        }
        if let Some(path_id) = update.learning_path_id {
            entry.learning_path_id = Some(path_id);
        }
        if let Some(task_error) = update.error {
            entry.errors.push(task_error);
        }
        if let Some(details) = update.error_details {
            entry.error_details = Some(details);
        }
        if let Some(section) = update.section {
            entry.sections.insert(section.section_id, section);
        }
        if let Some(expected) = update.cards_expected {
            entry.cards_expected = expected;
        }
        if let Some(completed) = update.cards_completed {
            entry.cards_completed = completed;
        }
        if let Some(started) = update.started_at {
            entry.started_at.get_or_insert(started);
        }
        if let Some(ended) = update.ended_at {
            entry.ended_at.get_or_insert(ended);
        }

        entry.updated_at = Utc::now();
    }

    /// Current number of live entries
    pub async fn size(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }

    /// Remove entries last touched before the age cutoff, then the oldest
    /// entries beyond the size cap. The key set is snapshotted first and each
    /// candidate re-verified under the write lock, so an entry touched during
    /// the sweep survives until the next pass.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let cutoff = now - Duration::hours(self.max_age_hours);

        let snapshot: Vec<(String, DateTime<Utc>)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .map(|(id, entry)| (id.clone(), entry.updated_at))
                .collect()
        };

        let mut doomed: Vec<String> = snapshot
            .iter()
            .filter(|(_, touched)| *touched <= cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        let survivors = snapshot.len() - doomed.len();
        if survivors > self.max_entries {
            let mut remaining: Vec<&(String, DateTime<Utc>)> = snapshot
                .iter()
                .filter(|(id, _)| !doomed.contains(id))
                .collect();
            remaining.sort_by_key(|(_, touched)| *touched);
            for (id, _) in remaining.into_iter().take(survivors - self.max_entries) {
                doomed.push(id.clone());
            }
        }

        if doomed.is_empty() {
            return 0;
        }

        let mut removed = 0;
        let remaining_count;
        {
            let mut entries = self.entries.write().await;
            for id in &doomed {
                if let Some(entry) = entries.get(id) {
                    if entry.updated_at <= cutoff || entries.len() > self.max_entries {
                        entries.remove(id);
                        removed += 1;
                    }
                }
            }
            remaining_count = entries.len();
        }

        if removed > 0 {
            log_task_event!(reaped, count = removed, remaining = remaining_count);
        }

        removed
    }

    /// Spawn the periodic reaper. The returned handle aborts the loop when
    /// dropped by the caller that keeps it.
    pub fn spawn_reaper(&self, every: std::time::Duration) -> JoinHandle<()> {
        let table = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                table.sweep().await;
            }
        })
    }
}
