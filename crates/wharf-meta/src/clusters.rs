use std::sync::Arc;

use crate::error::MetaError;
use crate::store::MetaStore;
use crate::topology::Topology;
use crate::types::{Cluster, Node, Role, SlotRange};

impl Topology {
    /// Creates an empty cluster named `name`.
    pub fn create_cluster(&mut self, name: &str) -> Result<Cluster, MetaError> {
        if self.clusters.contains_key(name) {
            return Err(MetaError::ClusterAlreadyExists(name.to_string()));
        }
        let cluster = Cluster::new(name.to_string());
        self.clusters.insert(name.to_string(), cluster.clone());
        Ok(cluster)
    }

    /// Deletes the cluster named `name`; it must be empty.
    pub fn delete_cluster(&mut self, name: &str) -> Result<(), MetaError> {
        let cluster = self
            .clusters
            .get(name)
            .ok_or_else(|| MetaError::ClusterNotFound(name.to_string()))?;
        if !cluster.nodes.is_empty() {
            return Err(MetaError::ClusterNotEmpty(name.to_string()));
        }
        self.clusters.remove(name);
        Ok(())
    }

    /// Assigns the lowest-address Free node to `cluster` as a master.
    pub fn add_cluster_node(&mut self, cluster: &str) -> Result<Node, MetaError> {
        if !self.clusters.contains_key(cluster) {
            return Err(MetaError::ClusterNotFound(cluster.to_string()));
        }
        let address = self
            .free_node_addresses()
            .into_iter()
            .next()
            .ok_or(MetaError::NoFreeNodeAvailable)?;
        self.assign_master(cluster, &address)
    }

    /// Assigns a specific Free node to `cluster` (operator-directed placement).
    pub fn add_cluster_node_at(
        &mut self,
        cluster: &str,
        address: &str,
    ) -> Result<Node, MetaError> {
        if !self.clusters.contains_key(cluster) {
            return Err(MetaError::ClusterNotFound(cluster.to_string()));
        }
        let node = self
            .node(address)
            .ok_or_else(|| MetaError::NodeNotFound(address.to_string()))?;
        if node.role != Role::Free {
            return Err(MetaError::NodeInUse(address.to_string()));
        }
        self.assign_master(cluster, address)
    }

    /// Detaches `node_address` (fronted by `proxy_address`) from `cluster`,
    /// returning it to Free.
    ///
    /// A node pinned by an active migration cannot leave; a master must have
    /// its replicas detached first. A departing replica takes its replication
    /// pair with it.
    pub fn remove_cluster_node(
        &mut self,
        cluster: &str,
        proxy_address: &str,
        node_address: &str,
    ) -> Result<(), MetaError> {
        if !self.clusters.contains_key(cluster) {
            return Err(MetaError::ClusterNotFound(cluster.to_string()));
        }
        let host = self
            .hosts
            .get(proxy_address)
            .ok_or_else(|| MetaError::HostNotFound(proxy_address.to_string()))?;
        if !host.nodes.contains_key(node_address) {
            return Err(MetaError::NodeNotFound(node_address.to_string()));
        }

        let member = self.clusters[cluster].contains(node_address);
        if !member {
            return Err(MetaError::NodeNotInCluster {
                cluster: cluster.to_string(),
                node: node_address.to_string(),
            });
        }
        if self.node_pinned(node_address) {
            return Err(MetaError::NodePinnedByMigration(node_address.to_string()));
        }
        if !self.replicas_of(node_address).is_empty() {
            return Err(MetaError::NodeHasReplica(node_address.to_string()));
        }

        self.replications.retain(|p| p.replica_node != node_address);
        self.clusters
            .get_mut(cluster)
            .expect("cluster checked above")
            .nodes
            .retain(|n| n != node_address);
        let node = self.node_mut(node_address).expect("node checked above");
        node.cluster = None;
        node.role = Role::Free;
        node.slots.clear();
        Ok(())
    }

    fn assign_master(&mut self, cluster: &str, address: &str) -> Result<Node, MetaError> {
        let first_member = self.clusters[cluster].nodes.is_empty();
        self.clusters
            .get_mut(cluster)
            .expect("cluster checked by callers")
            .nodes
            .push(address.to_string());

        let node = self.node_mut(address).expect("node checked by callers");
        node.cluster = Some(cluster.to_string());
        node.role = Role::Master;
        // The first master owns the whole keyspace; later members start empty
        // and take slots through migrations.
        if first_member {
            node.slots = vec![SlotRange::full()];
        }
        Ok(node.clone())
    }
}

/// Manages named clusters and their membership.
#[derive(Clone)]
pub struct ClusterDirectory {
    store: Arc<MetaStore>,
}

impl ClusterDirectory {
    /// Creates a directory backed by `store`.
    pub fn new(store: Arc<MetaStore>) -> Self {
        Self { store }
    }

    /// Creates an empty cluster.
    pub async fn create_cluster(&self, name: &str) -> Result<Cluster, MetaError> {
        let cluster = self.store.mutate(|t| t.create_cluster(name)).await?;
        tracing::info!(cluster = name, "created cluster");
        Ok(cluster)
    }

    /// Deletes an empty cluster.
    pub async fn delete_cluster(&self, name: &str) -> Result<(), MetaError> {
        self.store.mutate(|t| t.delete_cluster(name)).await?;
        tracing::info!(cluster = name, "deleted cluster");
        Ok(())
    }

    /// Assigns the lowest-address Free node to the cluster.
    pub async fn add_node(&self, cluster: &str) -> Result<Node, MetaError> {
        let node = self.store.mutate(|t| t.add_cluster_node(cluster)).await?;
        tracing::info!(cluster, node = %node.address, "assigned node to cluster");
        Ok(node)
    }

    /// Assigns a specific Free node to the cluster.
    pub async fn add_node_at(&self, cluster: &str, address: &str) -> Result<Node, MetaError> {
        let node = self
            .store
            .mutate(|t| t.add_cluster_node_at(cluster, address))
            .await?;
        tracing::info!(cluster, node = %node.address, "assigned node to cluster");
        Ok(node)
    }

    /// Detaches a node from the cluster.
    pub async fn remove_node(
        &self,
        cluster: &str,
        proxy_address: &str,
        node_address: &str,
    ) -> Result<(), MetaError> {
        self.store
            .mutate(|t| t.remove_cluster_node(cluster, proxy_address, node_address))
            .await?;
        tracing::info!(cluster, node = node_address, "detached node from cluster");
        Ok(())
    }

    /// All cluster names, ordered.
    pub fn list_names(&self) -> Vec<String> {
        self.store.read(|t| t.clusters.keys().cloned().collect())
    }

    /// One cluster's detail.
    pub fn get_cluster(&self, name: &str) -> Result<Cluster, MetaError> {
        self.store.read(|t| {
            t.clusters
                .get(name)
                .cloned()
                .ok_or_else(|| MetaError::ClusterNotFound(name.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SLOT_COUNT;

    fn seeded() -> Topology {
        let mut topo = Topology::new();
        topo.register_host(
            "127.0.0.1:7000",
            &["127.0.0.1:6000".to_string(), "127.0.0.1:6001".to_string()],
        )
        .unwrap();
        topo.register_host("127.0.0.2:7000", &["127.0.0.2:6002".to_string()])
            .unwrap();
        topo
    }

    #[test]
    fn test_create_cluster_rejects_duplicate() {
        let mut topo = Topology::new();
        topo.create_cluster("testdb").unwrap();
        assert!(matches!(
            topo.create_cluster("testdb"),
            Err(MetaError::ClusterAlreadyExists(_))
        ));
    }

    #[test]
    fn test_delete_cluster_requires_empty() {
        let mut topo = seeded();
        topo.create_cluster("testdb").unwrap();
        topo.add_cluster_node("testdb").unwrap();
        assert!(matches!(
            topo.delete_cluster("testdb"),
            Err(MetaError::ClusterNotEmpty(_))
        ));
        topo.remove_cluster_node("testdb", "127.0.0.1:7000", "127.0.0.1:6000")
            .unwrap();
        topo.delete_cluster("testdb").unwrap();
        assert!(matches!(
            topo.delete_cluster("testdb"),
            Err(MetaError::ClusterNotFound(_))
        ));
    }

    #[test]
    fn test_add_node_picks_lowest_free_address() {
        let mut topo = seeded();
        topo.create_cluster("testdb").unwrap();
        let node = topo.add_cluster_node("testdb").unwrap();
        assert_eq!(node.address, "127.0.0.1:6000");
        assert_eq!(node.role, Role::Master);
        assert!(topo.verify().is_ok());
    }

    #[test]
    fn test_first_member_owns_full_keyspace() {
        let mut topo = seeded();
        topo.create_cluster("testdb").unwrap();
        let first = topo.add_cluster_node("testdb").unwrap();
        assert_eq!(first.slots, vec![SlotRange::full()]);
        assert_eq!(first.slot_count(), u32::from(SLOT_COUNT));
        let second = topo.add_cluster_node("testdb").unwrap();
        assert!(second.slots.is_empty());
        assert!(topo.verify().is_ok());
    }

    #[test]
    fn test_add_node_exhausts_free_pool() {
        let mut topo = seeded();
        topo.create_cluster("testdb").unwrap();
        for _ in 0..3 {
            topo.add_cluster_node("testdb").unwrap();
        }
        assert!(matches!(
            topo.add_cluster_node("testdb"),
            Err(MetaError::NoFreeNodeAvailable)
        ));
    }

    #[test]
    fn test_add_node_at_requires_free_node() {
        let mut topo = seeded();
        topo.create_cluster("testdb").unwrap();
        topo.create_cluster("otherdb").unwrap();
        let node = topo.add_cluster_node_at("testdb", "127.0.0.2:6002").unwrap();
        assert_eq!(node.address, "127.0.0.2:6002");
        assert!(matches!(
            topo.add_cluster_node_at("otherdb", "127.0.0.2:6002"),
            Err(MetaError::NodeInUse(_))
        ));
        assert!(matches!(
            topo.add_cluster_node_at("testdb", "127.0.0.9:6000"),
            Err(MetaError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_remove_node_not_in_cluster() {
        let mut topo = seeded();
        topo.create_cluster("testdb").unwrap();
        let err = topo
            .remove_cluster_node("testdb", "127.0.0.1:7000", "127.0.0.1:6000")
            .unwrap_err();
        assert!(matches!(err, MetaError::NodeNotInCluster { .. }));
    }

    #[test]
    fn test_remove_node_returns_it_to_free() {
        let mut topo = seeded();
        topo.create_cluster("testdb").unwrap();
        topo.add_cluster_node("testdb").unwrap();
        topo.remove_cluster_node("testdb", "127.0.0.1:7000", "127.0.0.1:6000")
            .unwrap();
        let node = topo.node("127.0.0.1:6000").unwrap();
        assert_eq!(node.role, Role::Free);
        assert!(node.cluster.is_none());
        assert!(node.slots.is_empty());
        assert!(topo.verify().is_ok());
    }

    #[test]
    fn test_remove_master_with_replica_fails() {
        let mut topo = seeded();
        topo.create_cluster("testdb").unwrap();
        topo.add_cluster_node("testdb").unwrap();
        topo.assign_replica("testdb", "127.0.0.1:6000", "127.0.0.2:6002")
            .unwrap();
        let err = topo
            .remove_cluster_node("testdb", "127.0.0.1:7000", "127.0.0.1:6000")
            .unwrap_err();
        assert!(matches!(err, MetaError::NodeHasReplica(_)));
    }

    #[test]
    fn test_remove_replica_detaches_pair() {
        let mut topo = seeded();
        topo.create_cluster("testdb").unwrap();
        topo.add_cluster_node("testdb").unwrap();
        topo.assign_replica("testdb", "127.0.0.1:6000", "127.0.0.2:6002")
            .unwrap();
        topo.remove_cluster_node("testdb", "127.0.0.2:7000", "127.0.0.2:6002")
            .unwrap();
        assert!(topo.replications.is_empty());
        assert_eq!(topo.node("127.0.0.2:6002").unwrap().role, Role::Free);
        assert!(topo.verify().is_ok());
    }

    #[tokio::test]
    async fn test_directory_listing_is_ordered() {
        let store = Arc::new(MetaStore::new());
        let directory = ClusterDirectory::new(store);
        directory.create_cluster("betadb").await.unwrap();
        directory.create_cluster("alphadb").await.unwrap();
        assert_eq!(directory.list_names(), vec!["alphadb", "betadb"]);
        assert!(matches!(
            directory.get_cluster("gammadb"),
            Err(MetaError::ClusterNotFound(_))
        ));
    }
}
