use std::sync::Arc;

use crate::error::MetaError;
use crate::store::MetaStore;
use crate::topology::Topology;
use crate::types::{ReplicationPair, Role};

impl Topology {
    /// Pairs `replica` (a Free node) with `master` (a master member of
    /// `cluster`), making the replica a Replica member of the same cluster.
    pub fn assign_replica(
        &mut self,
        cluster: &str,
        master: &str,
        replica: &str,
    ) -> Result<ReplicationPair, MetaError> {
        let members = self
            .clusters
            .get(cluster)
            .ok_or_else(|| MetaError::ClusterNotFound(cluster.to_string()))?;
        if !members.contains(master) {
            return Err(MetaError::MasterNotInCluster {
                cluster: cluster.to_string(),
                master: master.to_string(),
            });
        }
        if self.node(master).map(|n| n.role) != Some(Role::Master) {
            return Err(MetaError::NodeNotMaster(master.to_string()));
        }

        let replica_node = self
            .node(replica)
            .ok_or_else(|| MetaError::NodeNotFound(replica.to_string()))?;
        if let Some(pair) = self.replication_of(replica) {
            return Err(MetaError::ReplicaAlreadyOwned {
                replica: replica.to_string(),
                master: pair.master_node.clone(),
            });
        }
        if replica_node.role != Role::Free {
            return Err(MetaError::ReplicaNotFree(replica.to_string()));
        }

        let pair = ReplicationPair {
            cluster: cluster.to_string(),
            master_node: master.to_string(),
            replica_node: replica.to_string(),
        };
        self.replications.push(pair.clone());
        self.clusters
            .get_mut(cluster)
            .expect("cluster checked above")
            .nodes
            .push(replica.to_string());
        let node = self.node_mut(replica).expect("replica checked above");
        node.cluster = Some(cluster.to_string());
        node.role = Role::Replica;
        Ok(pair)
    }
}

/// Assigns free nodes as replicas of cluster masters.
#[derive(Clone)]
pub struct ReplicationCoordinator {
    store: Arc<MetaStore>,
}

impl ReplicationCoordinator {
    /// Creates a coordinator backed by `store`.
    pub fn new(store: Arc<MetaStore>) -> Self {
        Self { store }
    }

    /// Pairs a free node with a cluster master; see
    /// [`Topology::assign_replica`].
    pub async fn assign_replica(
        &self,
        cluster: &str,
        master: &str,
        replica: &str,
    ) -> Result<ReplicationPair, MetaError> {
        let pair = self
            .store
            .mutate(|t| t.assign_replica(cluster, master, replica))
            .await?;
        tracing::info!(cluster, master, replica, "assigned replica");
        Ok(pair)
    }

    /// All replication pairs.
    pub fn list_pairs(&self) -> Vec<ReplicationPair> {
        self.store.read(|t| t.replications.clone())
    }
}
