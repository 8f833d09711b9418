use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ErrorKind, MetaError};
use crate::store::MetaStore;
use crate::topology::Topology;
use crate::types::{Migration, MigrationMode, MigrationStatus, Role, SlotRange};

/// How a Half migration decides which slots move.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SplitPolicy {
    /// Move the upper half of the source's owned slot count, rounded down.
    Midpoint,
}

impl SplitPolicy {
    /// Number of slots to move out of `total` owned by the source.
    pub fn move_count(&self, total: u32) -> u32 {
        match self {
            SplitPolicy::Midpoint => total / 2,
        }
    }
}

/// Tuning for the background transfer task.
#[derive(Copy, Clone, Debug)]
pub struct MigrationSettings {
    /// Delay between transfer checkpoints
    pub tick: Duration,
    /// Number of checkpoints before the move commits
    pub steps: u32,
    /// Slot split policy for Half mode
    pub split: SplitPolicy,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(200),
            steps: 10,
            split: SplitPolicy::Midpoint,
        }
    }
}

impl Topology {
    /// Creates a migration record for `src` → `dst` in `cluster`, pins both
    /// nodes, and marks it Running. The data move itself happens outside the
    /// transaction.
    pub fn begin_migration(
        &mut self,
        cluster: &str,
        src: &str,
        dst: &str,
        mode: MigrationMode,
    ) -> Result<Migration, MetaError> {
        let members = self
            .clusters
            .get(cluster)
            .ok_or_else(|| MetaError::ClusterNotFound(cluster.to_string()))?;

        let pair_err = |reason: &str| MetaError::InvalidNodePair {
            src: src.to_string(),
            dst: dst.to_string(),
            reason: reason.to_string(),
        };
        if src == dst {
            return Err(pair_err("source and destination are the same node"));
        }
        if !members.contains(src) {
            return Err(pair_err("source is not a cluster member"));
        }
        if !members.contains(dst) {
            return Err(pair_err("destination is not a cluster member"));
        }

        let src_node = self.node(src).ok_or_else(|| pair_err("source unknown"))?;
        if src_node.slots.is_empty() {
            return Err(pair_err("source owns no slots"));
        }
        let dst_node = self
            .node(dst)
            .ok_or_else(|| pair_err("destination unknown"))?;
        if dst_node.role != Role::Master {
            return Err(pair_err("destination is not a master"));
        }

        for address in [src, dst] {
            if self.node_pinned(address) {
                return Err(MetaError::MigrationConflict(address.to_string()));
            }
        }
        // An All move removes the source from the cluster at completion; its
        // replicas must be detached before that can be allowed to start.
        if mode == MigrationMode::All && !self.replicas_of(src).is_empty() {
            return Err(MetaError::NodeHasReplica(src.to_string()));
        }

        let mut migration =
            Migration::new(cluster.to_string(), src.to_string(), dst.to_string(), mode);
        migration.status = MigrationStatus::Running;
        self.migrations.push(migration.clone());
        Ok(migration)
    }

    /// Records transfer progress for a Running migration.
    pub fn set_migration_progress(&mut self, id: Uuid, progress: u8) -> Result<(), MetaError> {
        let migration = self.running_migration_mut(id)?;
        migration.progress = progress.min(100);
        Ok(())
    }

    /// Commits a finished transfer: applies the mode's ownership change and
    /// marks the record Completed.
    pub fn complete_migration(
        &mut self,
        id: Uuid,
        split: SplitPolicy,
    ) -> Result<Migration, MetaError> {
        let migration = self.running_migration_mut(id)?.clone();

        let src_slots = {
            let src = self
                .node_mut(&migration.src_node)
                .expect("pinned source is registered");
            std::mem::take(&mut src.slots)
        };

        match migration.mode {
            MigrationMode::Half => {
                let total: u32 = src_slots.iter().map(SlotRange::len).sum();
                let (kept, moved) = split_upper(&src_slots, split.move_count(total));
                self.node_mut(&migration.src_node)
                    .expect("pinned source is registered")
                    .slots = kept;
                self.node_mut(&migration.dst_node)
                    .expect("pinned destination is registered")
                    .slots
                    .extend(moved);
            }
            MigrationMode::All => {
                self.node_mut(&migration.dst_node)
                    .expect("pinned destination is registered")
                    .slots
                    .extend(src_slots);
                self.clusters
                    .get_mut(&migration.cluster)
                    .expect("pinned migration references a live cluster")
                    .nodes
                    .retain(|n| n != &migration.src_node);
                let src = self
                    .node_mut(&migration.src_node)
                    .expect("pinned source is registered");
                src.cluster = None;
                src.role = Role::Free;
            }
        }

        let record = self
            .running_migration_mut(id)
            .expect("record checked above");
        record.status = MigrationStatus::Completed;
        record.progress = 100;
        Ok(record.clone())
    }

    /// Cancels the active migration between `src` and `dst` in `cluster`.
    ///
    /// Ownership is left exactly as it stood; nothing is rolled back. The
    /// record turns Cancelled and both nodes are unpinned.
    pub fn cancel_migration(
        &mut self,
        cluster: &str,
        src: &str,
        dst: &str,
    ) -> Result<Migration, MetaError> {
        let migration = self
            .migrations
            .iter_mut()
            .find(|m| m.is_active() && m.matches_pair(cluster, src, dst))
            .ok_or_else(|| MetaError::MigrationNotFound {
                cluster: cluster.to_string(),
                src: src.to_string(),
                dst: dst.to_string(),
            })?;
        migration.status = MigrationStatus::Cancelled;
        Ok(migration.clone())
    }

    /// Marks an active migration Failed, recording the reason.
    pub fn fail_migration(&mut self, id: Uuid, reason: &str) -> Result<Migration, MetaError> {
        let migration = self.running_migration_mut(id)?;
        migration.status = MigrationStatus::Failed;
        migration.error = Some(reason.to_string());
        Ok(migration.clone())
    }

    fn running_migration_mut(&mut self, id: Uuid) -> Result<&mut Migration, MetaError> {
        let position = self
            .migrations
            .iter()
            .position(|m| m.id == id && m.status == MigrationStatus::Running);
        match position {
            Some(i) => Ok(&mut self.migrations[i]),
            None => {
                let (cluster, src, dst) = self
                    .migrations
                    .iter()
                    .find(|m| m.id == id)
                    .map(|m| (m.cluster.clone(), m.src_node.clone(), m.dst_node.clone()))
                    .unwrap_or_else(|| (String::new(), String::new(), id.to_string()));
                Err(MetaError::MigrationNotFound { cluster, src, dst })
            }
        }
    }
}

/// Splits `slots` so that the upper `take` slots are moved out.
///
/// Returns `(kept, moved)`; ranges are cut where needed, order preserved.
fn split_upper(slots: &[SlotRange], mut take: u32) -> (Vec<SlotRange>, Vec<SlotRange>) {
    let mut kept = Vec::new();
    let mut moved = Vec::new();
    for range in slots.iter().rev() {
        if take == 0 {
            kept.push(*range);
            continue;
        }
        let len = range.len();
        if len <= take {
            moved.push(*range);
            take -= len;
        } else {
            let cut = range.end - (take as u16) + 1;
            kept.push(SlotRange::new(range.start, cut - 1));
            moved.push(SlotRange::new(cut, range.end));
            take = 0;
        }
    }
    kept.reverse();
    moved.reverse();
    (kept, moved)
}

/// Drives migration lifecycles: bookkeeping through the store, the transfer
/// itself on a background task with cooperative cancellation.
#[derive(Clone)]
pub struct MigrationCoordinator {
    store: Arc<MetaStore>,
    settings: MigrationSettings,
    tasks: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl MigrationCoordinator {
    /// Creates a coordinator backed by `store`.
    pub fn new(store: Arc<MetaStore>, settings: MigrationSettings) -> Self {
        Self {
            store,
            settings,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts a migration and hands the move to a background task.
    pub async fn start_migration(
        &self,
        cluster: &str,
        src: &str,
        dst: &str,
        mode: MigrationMode,
    ) -> Result<Migration, MetaError> {
        let migration = self
            .store
            .mutate(|t| t.begin_migration(cluster, src, dst, mode))
            .await?;
        tracing::info!(
            cluster,
            src,
            dst,
            %mode,
            id = %migration.id,
            "migration started"
        );

        let token = CancellationToken::new();
        self.tasks
            .lock()
            .expect("task map lock poisoned")
            .insert(migration.id, token.clone());

        let coordinator = self.clone();
        let id = migration.id;
        tokio::spawn(async move {
            coordinator.run_transfer(id, token).await;
            coordinator
                .tasks
                .lock()
                .expect("task map lock poisoned")
                .remove(&id);
        });

        Ok(migration)
    }

    /// Cancels the active migration for the pair and signals its task.
    pub async fn stop_migration(
        &self,
        cluster: &str,
        src: &str,
        dst: &str,
    ) -> Result<Migration, MetaError> {
        let migration = self
            .store
            .mutate(|t| t.cancel_migration(cluster, src, dst))
            .await?;
        if let Some(token) = self
            .tasks
            .lock()
            .expect("task map lock poisoned")
            .remove(&migration.id)
        {
            token.cancel();
        }
        tracing::info!(cluster, src, dst, id = %migration.id, "migration cancelled");
        Ok(migration)
    }

    /// Advances the transfer checkpoint by checkpoint, committing progress in
    /// short transactions, then commits the ownership change. A cancellation
    /// (token or a concurrent stop observed as a rejected transaction) ends
    /// the task quietly; any other failure marks the record Failed.
    async fn run_transfer(&self, id: Uuid, token: CancellationToken) {
        for step in 1..=self.settings.steps {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(id = %id, "transfer task observed cancellation");
                    return;
                }
                _ = tokio::time::sleep(self.settings.tick) => {}
            }

            if step < self.settings.steps {
                let progress = (step * 100 / self.settings.steps) as u8;
                let update = self
                    .store
                    .mutate(|t| t.set_migration_progress(id, progress))
                    .await;
                match update {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => return,
                    Err(e) => {
                        self.abort(id, &e).await;
                        return;
                    }
                }
            }
        }

        let split = self.settings.split;
        match self.store.mutate(|t| t.complete_migration(id, split)).await {
            Ok(migration) => {
                tracing::info!(
                    cluster = %migration.cluster,
                    src = %migration.src_node,
                    dst = %migration.dst_node,
                    "migration completed"
                );
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => self.abort(id, &e).await,
        }
    }

    async fn abort(&self, id: Uuid, cause: &MetaError) {
        tracing::error!(id = %id, error = %cause, "migration transfer failed");
        let reason = cause.to_string();
        if let Err(e) = self
            .store
            .mutate(|t| t.fail_migration(id, &reason))
            .await
        {
            tracing::error!(id = %id, error = %e, "could not mark migration failed");
        }
    }
}
