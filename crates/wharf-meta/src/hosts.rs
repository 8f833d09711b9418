use std::sync::Arc;

use crate::error::MetaError;
use crate::store::MetaStore;
use crate::topology::Topology;
use crate::types::{Host, Node};

impl Topology {
    /// Registers (or extends) the host at `proxy_address` with `nodes`.
    ///
    /// Idempotent: an existing host merges the node set. A node address
    /// already fronted by a different host is rejected.
    pub fn register_host(
        &mut self,
        proxy_address: &str,
        nodes: &[String],
    ) -> Result<Host, MetaError> {
        for address in nodes {
            if let Some(owner) = self.host_of_node(address) {
                if owner != proxy_address {
                    return Err(MetaError::NodeAlreadyOwned {
                        node: address.clone(),
                        owner: owner.to_string(),
                    });
                }
            }
        }

        let host = self
            .hosts
            .entry(proxy_address.to_string())
            .or_insert_with(|| Host::new(proxy_address.to_string()));
        for address in nodes {
            host.nodes
                .entry(address.clone())
                .or_insert_with(|| Node::new(address.clone(), proxy_address.to_string()));
        }
        Ok(host.clone())
    }

    /// Removes `node_address` from the host at `proxy_address`.
    ///
    /// The node must be idle: not cluster-assigned, not pinned by an active
    /// migration, not part of a replication pair. An emptied host is removed.
    pub fn remove_host_node(
        &mut self,
        proxy_address: &str,
        node_address: &str,
    ) -> Result<(), MetaError> {
        let host = self
            .hosts
            .get(proxy_address)
            .ok_or_else(|| MetaError::HostNotFound(proxy_address.to_string()))?;
        let node = host
            .nodes
            .get(node_address)
            .ok_or_else(|| MetaError::NodeNotFound(node_address.to_string()))?;

        if node.cluster.is_some()
            || self.node_pinned(node_address)
            || self.node_replicating(node_address)
        {
            return Err(MetaError::NodeInUse(node_address.to_string()));
        }

        let host = self
            .hosts
            .get_mut(proxy_address)
            .expect("host checked above");
        host.nodes.remove(node_address);
        if host.nodes.is_empty() {
            self.hosts.remove(proxy_address);
        }
        Ok(())
    }
}

/// Manages proxy registration: which proxy address fronts which node set.
#[derive(Clone)]
pub struct HostRegistry {
    store: Arc<MetaStore>,
}

impl HostRegistry {
    /// Creates a registry backed by `store`.
    pub fn new(store: Arc<MetaStore>) -> Self {
        Self { store }
    }

    /// Registers a host and its node set; see [`Topology::register_host`].
    pub async fn register_host(
        &self,
        proxy_address: &str,
        nodes: Vec<String>,
    ) -> Result<Host, MetaError> {
        let host = self
            .store
            .mutate(|t| t.register_host(proxy_address, &nodes))
            .await?;
        tracing::info!(
            proxy = proxy_address,
            nodes = host.nodes.len(),
            "registered host"
        );
        Ok(host)
    }

    /// Removes a node from its host; see [`Topology::remove_host_node`].
    pub async fn remove_node(
        &self,
        proxy_address: &str,
        node_address: &str,
    ) -> Result<(), MetaError> {
        self.store
            .mutate(|t| t.remove_host_node(proxy_address, node_address))
            .await?;
        tracing::info!(proxy = proxy_address, node = node_address, "removed node");
        Ok(())
    }

    /// All registered hosts, ordered by proxy address.
    pub fn list_hosts(&self) -> Vec<Host> {
        self.store.read(|t| t.hosts.values().cloned().collect())
    }

    /// All proxy addresses, ordered.
    pub fn list_addresses(&self) -> Vec<String> {
        self.store.read(|t| t.hosts.keys().cloned().collect())
    }

    /// One host's detail.
    pub fn get_host(&self, proxy_address: &str) -> Result<Host, MetaError> {
        self.store.read(|t| {
            t.hosts
                .get(proxy_address)
                .cloned()
                .ok_or_else(|| MetaError::HostNotFound(proxy_address.to_string()))
        })
    }
}
