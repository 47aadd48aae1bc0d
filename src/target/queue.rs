//! Durable per-target request queue.
//!
//! An insertion-ordered set of builds waiting to be published. Every mutation
//! happens under the queue's lock, writes the affected build's status record
//! and rewrites the queue file before returning.
//!
//! The in-memory queue is authoritative while the process runs. The file only
//! serves crash recovery, so a failed write is logged and the mutation stands.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::builds::BuildStore;
use crate::persistence::{PersistedQueue, load_queue, queue_path, save_queue};
use crate::status::StatusTracker;
use crate::types::{BuildKey, BuildRef, StatusRecord, TargetName};

/// Ordered, duplicate-free queue of builds for one target.
#[derive(Debug)]
pub struct RequestQueue {
    target: TargetName,
    path: PathBuf,
    entries: Mutex<VecDeque<BuildRef>>,
    /// Persisted keys that failed to resolve at load. They stay in the file
    /// so a later restart can pick them up again.
    unreadable: Vec<BuildKey>,
    notify: Notify,
    tracker: Arc<StatusTracker>,
}

impl RequestQueue {
    /// Creates an empty queue persisted under `state_dir`.
    pub fn new(target: TargetName, state_dir: &Path, tracker: Arc<StatusTracker>) -> Self {
        RequestQueue {
            path: queue_path(state_dir, &target),
            target,
            entries: Mutex::new(VecDeque::new()),
            unreadable: Vec::new(),
            notify: Notify::new(),
            tracker,
        }
    }

    /// Loads the persisted queue, resolving every entry against `store`.
    ///
    /// Entries whose build no longer exists are dropped. Entries that exist
    /// but cannot be read stay in the file without being queued. An unreadable
    /// queue file is moved aside to `<target>.json.corrupt` and the queue
    /// starts empty.
    pub fn load(
        target: TargetName,
        state_dir: &Path,
        store: &dyn BuildStore,
        tracker: Arc<StatusTracker>,
    ) -> Self {
        let mut queue = RequestQueue::new(target, state_dir, tracker);

        let persisted = match load_queue(&queue.path) {
            Ok(Some(persisted)) => persisted.entries,
            Ok(None) => Vec::new(),
            Err(e) => {
                let backup = corrupt_path(&queue.path);
                warn!(remote = %queue.target, path = %queue.path.display(), backup = %backup.display(), error = %e, "Moving unreadable queue file aside");
                if let Err(e) = std::fs::rename(&queue.path, &backup) {
                    warn!(remote = %queue.target, error = %e, "Failed to back up queue file");
                }
                Vec::new()
            }
        };

        let mut entries = VecDeque::with_capacity(persisted.len());
        for key in persisted {
            if entries.iter().any(|b: &BuildRef| b.key == key) || queue.unreadable.contains(&key) {
                continue;
            }
            match store.resolve(&key) {
                Ok(Some(build)) => entries.push_back(build),
                Ok(None) => info!(remote = %queue.target, build = %key, "Dropping deleted build from queue"),
                Err(e) => {
                    warn!(remote = %queue.target, build = %key, error = %e, "Keeping unreadable build in queue file");
                    queue.unreadable.push(key);
                }
            }
        }

        {
            let mut guard = queue.lock();
            *guard = entries;
            queue.persist(&guard);
        }
        queue
    }

    pub fn target(&self) -> &TargetName {
        &self.target
    }

    /// Adds `build` at the tail unless already queued, and attaches `status`.
    ///
    /// Returns true if the build was not queued before. The status record is
    /// written either way.
    pub fn enqueue(&self, build: BuildRef, status: StatusRecord) -> bool {
        let mut entries = self.lock();

        let added = !entries.iter().any(|b| b.key == build.key);
        self.write_status(&build, status);
        if added {
            entries.push_back(build);
        }
        self.persist(&entries);
        drop(entries);

        self.notify.notify_one();
        added
    }

    /// Adds `build` at the tail only if it is not queued yet.
    ///
    /// `status` computes the record to attach and runs under the queue lock,
    /// so nothing can queue the build between the check and the insert.
    /// Returns `Ok(None)` if the build was already queued.
    pub fn enqueue_if_absent<E>(
        &self,
        build: BuildRef,
        status: impl FnOnce(&BuildRef) -> Result<StatusRecord, E>,
    ) -> Result<Option<StatusRecord>, E> {
        let mut entries = self.lock();
        if entries.iter().any(|b| b.key == build.key) {
            return Ok(None);
        }

        let record = status(&build)?;
        self.write_status(&build, record.clone());
        entries.push_back(build);
        self.persist(&entries);
        drop(entries);

        self.notify.notify_one();
        Ok(Some(record))
    }

    /// Waits until the queue is non-empty and returns its head.
    ///
    /// The head stays queued.
    pub async fn next_blocking(&self) -> BuildRef {
        loop {
            if let Some(head) = self.lock().front().cloned() {
                return head;
            }
            self.notify.notified().await;
        }
    }

    /// Removes a build and attaches `status` to it.
    ///
    /// Does nothing if the build is not queued, so a late final status never
    /// overwrites an operator's decision.
    pub fn remove(&self, key: &BuildKey, status: StatusRecord) -> Option<BuildRef> {
        let mut entries = self.lock();
        let index = entries.iter().position(|b| &b.key == key)?;
        let build = entries.remove(index)?;

        self.write_status(&build, status);
        self.persist(&entries);
        Some(build)
    }

    /// Drops a build without touching its status, for builds that no longer exist.
    pub fn forget(&self, key: &BuildKey) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|b| &b.key != key);
        let removed = entries.len() != before;
        if removed {
            self.persist(&entries);
        }
        removed
    }

    /// Moves a queued build to the tail and attaches `status`.
    ///
    /// Returns false if the build is no longer queued.
    pub fn move_to_tail(&self, key: &BuildKey, status: StatusRecord) -> bool {
        let mut entries = self.lock();
        let Some(index) = entries.iter().position(|b| &b.key == key) else {
            return false;
        };
        let Some(build) = entries.remove(index) else {
            return false;
        };

        self.write_status(&build, status);
        entries.push_back(build);
        self.persist(&entries);
        true
    }

    /// Attaches `status` to a build only while it is still queued.
    pub fn update_status(&self, key: &BuildKey, status: StatusRecord) -> bool {
        let entries = self.lock();
        match entries.iter().find(|b| &b.key == key) {
            Some(build) => {
                self.write_status(build, status);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &BuildKey) -> bool {
        self.lock().iter().any(|b| &b.key == key)
    }

    /// Returns the queued build keys in order.
    pub fn snapshot(&self) -> Vec<BuildKey> {
        self.lock().iter().map(|b| b.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<BuildRef>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_status(&self, build: &BuildRef, status: StatusRecord) {
        if let Err(e) = self.tracker.record(build, status) {
            warn!(remote = %self.target, build = %build.key, error = %e, "Failed to record publish status");
        }
    }

    fn persist(&self, entries: &VecDeque<BuildRef>) {
        let mut keys: Vec<BuildKey> = entries.iter().map(|b| b.key.clone()).collect();
        for key in &self.unreadable {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        let persisted = PersistedQueue::new(self.target.clone(), keys);
        if let Err(e) = save_queue(&self.path, &persisted) {
            warn!(remote = %self.target, path = %self.path.display(), error = %e, "Failed to persist queue");
        }
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".corrupt");
    PathBuf::from(name)
}
