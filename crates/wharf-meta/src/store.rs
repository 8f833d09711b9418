use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::error::MetaError;
use crate::topology::Topology;
use crate::types::MigrationStatus;

/// The metadata store: a settled [`Topology`] snapshot behind a single-writer
/// transactional boundary.
///
/// Readers clone the current `Arc` snapshot and never block on a writer. A
/// writer takes the store-wide mutation lock, applies its transaction to a
/// copy, verifies every invariant, persists, and only then publishes the new
/// snapshot with a bumped epoch. A failing transaction is discarded in full.
pub struct MetaStore {
    current: RwLock<Arc<Topology>>,
    writer: Mutex<()>,
    snapshot_path: Option<PathBuf>,
}

impl MetaStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Topology::new())),
            writer: Mutex::new(()),
            snapshot_path: None,
        }
    }

    /// Opens a store persisted at `path`, creating it empty if the file does
    /// not exist yet.
    ///
    /// Any migration found non-terminal in the loaded snapshot is transitioned
    /// to `Failed`: its transfer task died with the previous process, and a
    /// record left `Running` would pin its nodes forever.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MetaError> {
        let path = path.into();
        let mut topology = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            Topology::new()
        };

        let interrupted = fail_interrupted_migrations(&mut topology);
        if interrupted > 0 {
            tracing::warn!(
                count = interrupted,
                "failed interrupted migrations from persisted snapshot"
            );
            topology.epoch += 1;
            write_snapshot(&path, &topology)?;
        }
        topology.verify()?;

        Ok(Self {
            current: RwLock::new(Arc::new(topology)),
            writer: Mutex::new(()),
            snapshot_path: Some(path),
        })
    }

    /// The latest settled snapshot.
    pub fn snapshot(&self) -> Arc<Topology> {
        self.current.read().expect("store lock poisoned").clone()
    }

    /// Runs `f` against the latest settled snapshot.
    pub fn read<R>(&self, f: impl FnOnce(&Topology) -> R) -> R {
        f(&self.snapshot())
    }

    /// Current consistency epoch.
    pub fn epoch(&self) -> u64 {
        self.snapshot().epoch
    }

    /// Applies `f` as one serialized transaction.
    ///
    /// At most one transaction executes at a time across the whole store. The
    /// transaction sees (and may freely mutate) a private copy of the
    /// topology; nothing becomes visible to readers unless `f` succeeds, the
    /// invariants verify, and the snapshot (when persistence is configured)
    /// hits disk.
    pub async fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Topology) -> Result<R, MetaError>,
    ) -> Result<R, MetaError> {
        let _guard = self.writer.lock().await;

        let mut next = Topology::clone(&self.snapshot());
        let out = f(&mut next)?;
        next.verify()?;
        next.epoch += 1;

        if let Some(path) = &self.snapshot_path {
            write_snapshot(path, &next)?;
        }

        *self.current.write().expect("store lock poisoned") = Arc::new(next);
        Ok(out)
    }
}

impl Default for MetaStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks every non-terminal migration `Failed` and returns how many were hit.
fn fail_interrupted_migrations(topology: &mut Topology) -> usize {
    let mut count = 0;
    for migration in &mut topology.migrations {
        if migration.status.is_active() {
            migration.status = MigrationStatus::Failed;
            migration.error = Some("broker restarted during transfer".to_string());
            count += 1;
        }
    }
    count
}

/// Writes the snapshot to a temp file in the same directory, then renames it
/// into place so readers of the file never observe a torn write.
fn write_snapshot(path: &Path, topology: &Topology) -> Result<(), MetaError> {
    let bytes = serde_json::to_vec_pretty(topology)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
