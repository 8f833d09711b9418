use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::MetaError;
use crate::types::{Cluster, Host, Migration, Node, ReplicationPair, Role};

/// The authoritative topology graph: hosts, clusters, migrations and
/// replication pairs, stamped with a global consistency epoch.
///
/// `Topology` is a plain owned value. All mutation happens through the pure
/// operations defined across the component modules (`hosts`, `clusters`,
/// `migration`, `replication`); the [`MetaStore`](crate::store::MetaStore)
/// applies them copy-on-write under its single-writer lock.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    /// Bumped on every committed mutation
    pub epoch: u64,
    /// Registered hosts, keyed by proxy address
    pub hosts: BTreeMap<String, Host>,
    /// Named clusters
    pub clusters: BTreeMap<String, Cluster>,
    /// Migration records, terminal ones retained for observability
    pub migrations: Vec<Migration>,
    /// Master/replica pairs
    pub replications: Vec<ReplicationPair>,
}

impl Topology {
    /// Creates an empty topology at epoch zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a node anywhere in the fleet.
    pub fn node(&self, address: &str) -> Option<&Node> {
        self.hosts.values().find_map(|h| h.nodes.get(address))
    }

    /// Mutable node lookup.
    pub fn node_mut(&mut self, address: &str) -> Option<&mut Node> {
        self.hosts
            .values_mut()
            .find_map(|h| h.nodes.get_mut(address))
    }

    /// Proxy address of the host fronting `address`, if registered.
    pub fn host_of_node(&self, address: &str) -> Option<&str> {
        self.node(address).map(|n| n.proxy_address.as_str())
    }

    /// Addresses of all Free nodes across every host, sorted.
    pub fn free_node_addresses(&self) -> Vec<String> {
        let mut free: Vec<String> = self
            .hosts
            .values()
            .flat_map(|h| h.nodes.values())
            .filter(|n| n.role == Role::Free)
            .map(|n| n.address.clone())
            .collect();
        free.sort();
        free
    }

    /// The active migration between `a` and `b` (unordered) in `cluster`.
    pub fn active_migration(&self, cluster: &str, a: &str, b: &str) -> Option<&Migration> {
        self.migrations
            .iter()
            .find(|m| m.is_active() && m.matches_pair(cluster, a, b))
    }

    /// Returns true if any active migration references `address`.
    pub fn node_pinned(&self, address: &str) -> bool {
        self.migrations.iter().any(|m| m.pins(address))
    }

    /// The replication pair in which `address` is the replica, if any.
    pub fn replication_of(&self, address: &str) -> Option<&ReplicationPair> {
        self.replications
            .iter()
            .find(|p| p.replica_node == address)
    }

    /// Replicas attached to the master at `address`.
    pub fn replicas_of(&self, address: &str) -> Vec<&ReplicationPair> {
        self.replications
            .iter()
            .filter(|p| p.master_node == address)
            .collect()
    }

    /// Returns true if any replication pair references `address`.
    pub fn node_replicating(&self, address: &str) -> bool {
        self.replications
            .iter()
            .any(|p| p.master_node == address || p.replica_node == address)
    }

    /// Verifies every topology invariant, returning the first violation.
    ///
    /// The store runs this before committing any transaction; operations are
    /// expected to validate up front, so a failure here aborts the commit.
    pub fn verify(&self) -> Result<(), MetaError> {
        let mut seen = HashSet::new();
        for host in self.hosts.values() {
            for (key, node) in &host.nodes {
                if *key != node.address {
                    return Err(MetaError::Invariant(format!(
                        "node {} stored under key {}",
                        node.address, key
                    )));
                }
                if node.proxy_address != host.proxy_address {
                    return Err(MetaError::Invariant(format!(
                        "node {} back-references host {} but lives under {}",
                        node.address, node.proxy_address, host.proxy_address
                    )));
                }
                if !seen.insert(node.address.clone()) {
                    return Err(MetaError::Invariant(format!(
                        "node {} appears under more than one host",
                        node.address
                    )));
                }
                self.verify_node(node)?;
            }
        }

        for cluster in self.clusters.values() {
            let mut members = HashSet::new();
            for address in &cluster.nodes {
                if !members.insert(address.clone()) {
                    return Err(MetaError::Invariant(format!(
                        "cluster {} lists {} twice",
                        cluster.name, address
                    )));
                }
                match self.node(address) {
                    None => {
                        return Err(MetaError::Invariant(format!(
                            "cluster {} references unregistered node {}",
                            cluster.name, address
                        )))
                    }
                    Some(node) if node.cluster.as_deref() != Some(cluster.name.as_str()) => {
                        return Err(MetaError::Invariant(format!(
                            "node {} is listed in cluster {} but references {:?}",
                            address, cluster.name, node.cluster
                        )))
                    }
                    Some(_) => {}
                }
            }
            self.verify_cluster_slots(cluster)?;
        }

        for migration in self.migrations.iter().filter(|m| m.is_active()) {
            for address in [&migration.src_node, &migration.dst_node] {
                let member = self
                    .clusters
                    .get(&migration.cluster)
                    .map(|c| c.contains(address))
                    .unwrap_or(false);
                if !member {
                    return Err(MetaError::Invariant(format!(
                        "active migration {} references {} outside cluster {}",
                        migration.id, address, migration.cluster
                    )));
                }
            }
        }

        let mut replicas = HashSet::new();
        for pair in &self.replications {
            if !replicas.insert(pair.replica_node.clone()) {
                return Err(MetaError::Invariant(format!(
                    "node {} replicates more than one master",
                    pair.replica_node
                )));
            }
            for (address, want) in [
                (&pair.master_node, Role::Master),
                (&pair.replica_node, Role::Replica),
            ] {
                match self.node(address) {
                    None => {
                        return Err(MetaError::Invariant(format!(
                            "replication pair references unregistered node {}",
                            address
                        )))
                    }
                    Some(node) if node.role != want => {
                        return Err(MetaError::Invariant(format!(
                            "replication pair expects {} to be {} but it is {}",
                            address, want, node.role
                        )))
                    }
                    Some(node) if node.cluster.as_deref() != Some(pair.cluster.as_str()) => {
                        return Err(MetaError::Invariant(format!(
                            "replication pair in {} references {} outside the cluster",
                            pair.cluster, address
                        )))
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }

    fn verify_node(&self, node: &Node) -> Result<(), MetaError> {
        match (&node.cluster, node.role) {
            (None, Role::Free) => {
                if !node.slots.is_empty() {
                    return Err(MetaError::Invariant(format!(
                        "free node {} owns slots",
                        node.address
                    )));
                }
                if self.node_pinned(&node.address) {
                    return Err(MetaError::Invariant(format!(
                        "free node {} is pinned by an active migration",
                        node.address
                    )));
                }
            }
            (None, role) => {
                return Err(MetaError::Invariant(format!(
                    "node {} has role {} but no cluster",
                    node.address, role
                )))
            }
            (Some(_), Role::Free) => {
                return Err(MetaError::Invariant(format!(
                    "node {} is cluster-assigned but marked free",
                    node.address
                )))
            }
            (Some(name), _) => {
                let listed = self
                    .clusters
                    .get(name)
                    .map(|c| c.contains(&node.address))
                    .unwrap_or(false);
                if !listed {
                    return Err(MetaError::Invariant(format!(
                        "node {} references cluster {} which does not list it",
                        node.address, name
                    )));
                }
                if node.role == Role::Replica && !node.slots.is_empty() {
                    return Err(MetaError::Invariant(format!(
                        "replica {} owns slots",
                        node.address
                    )));
                }
            }
        }
        Ok(())
    }

    fn verify_cluster_slots(&self, cluster: &Cluster) -> Result<(), MetaError> {
        let mut ranges = Vec::new();
        for address in &cluster.nodes {
            if let Some(node) = self.node(address) {
                for range in &node.slots {
                    for (other_addr, other) in &ranges {
                        if range.overlaps(other) {
                            return Err(MetaError::Invariant(format!(
                                "cluster {}: slot ranges of {} and {} overlap",
                                cluster.name, address, other_addr
                            )));
                        }
                    }
                    ranges.push((address.clone(), *range));
                }
            }
        }
        Ok(())
    }
}
