use serde::Serialize;
use thiserror::Error;

/// Coarse classification of broker errors, used by the API layer to pick a
/// response status.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A referenced host, node, cluster or migration does not exist
    NotFound,
    /// The resource already exists or is already owned/assigned
    Conflict,
    /// The operation is not legal given the current role or status
    InvalidState,
    /// No free node is available to satisfy the request
    ResourceExhausted,
    /// Snapshot persistence or other broker-internal failure
    Internal,
}

/// Errors produced by topology operations and the metadata store.
#[derive(Debug, Error)]
pub enum MetaError {
    /// No host registered under the given proxy address.
    #[error("host {0} not found")]
    HostNotFound(String),

    /// No node registered under the given address.
    #[error("node {0} not found")]
    NodeNotFound(String),

    /// No cluster with the given name.
    #[error("cluster {0} not found")]
    ClusterNotFound(String),

    /// No active migration for the given (cluster, src, dst) pair.
    #[error("no active migration for {src} -> {dst} in cluster {cluster}")]
    MigrationNotFound {
        /// Cluster name
        cluster: String,
        /// Source node address
        src: String,
        /// Destination node address
        dst: String,
    },

    /// The node is not a member of the named cluster.
    #[error("node {node} is not a member of cluster {cluster}")]
    NodeNotInCluster {
        /// Cluster name
        cluster: String,
        /// Node address
        node: String,
    },

    /// The node address is already fronted by a different host.
    #[error("node {node} is already owned by host {owner}")]
    NodeAlreadyOwned {
        /// Node address
        node: String,
        /// Proxy address of the current owner
        owner: String,
    },

    /// A cluster with that name already exists.
    #[error("cluster {0} already exists")]
    ClusterAlreadyExists(String),

    /// One of the nodes already participates in an active migration.
    #[error("node {0} already participates in an active migration")]
    MigrationConflict(String),

    /// The node already replicates a different master.
    #[error("node {replica} already replicates {master}")]
    ReplicaAlreadyOwned {
        /// Replica node address
        replica: String,
        /// Master it currently replicates
        master: String,
    },

    /// The node is cluster-assigned or referenced by a migration/replication.
    #[error("node {0} is in use")]
    NodeInUse(String),

    /// Only empty clusters can be deleted.
    #[error("cluster {0} is not empty")]
    ClusterNotEmpty(String),

    /// An active migration pins this node.
    #[error("node {0} is pinned by an active migration")]
    NodePinnedByMigration(String),

    /// A master with live replicas; replicas must be detached first.
    #[error("node {0} has attached replicas")]
    NodeHasReplica(String),

    /// src == dst, or one of the pair is not a usable cluster member.
    #[error("invalid migration pair {src} -> {dst}: {reason}")]
    InvalidNodePair {
        /// Source node address
        src: String,
        /// Destination node address
        dst: String,
        /// Why the pair was rejected
        reason: String,
    },

    /// The named master is not a member of the cluster.
    #[error("master {master} is not a member of cluster {cluster}")]
    MasterNotInCluster {
        /// Cluster name
        cluster: String,
        /// Master node address
        master: String,
    },

    /// The named master is a cluster member but not a master.
    #[error("node {0} is not a master")]
    NodeNotMaster(String),

    /// The replica target is not a free node.
    #[error("node {0} is not free")]
    ReplicaNotFree(String),

    /// Every registered node is already assigned.
    #[error("no free node available")]
    NoFreeNodeAvailable,

    /// A transaction would have left the topology violating an invariant.
    #[error("topology invariant violated: {0}")]
    Invariant(String),

    /// Writing or reading the persisted snapshot failed.
    #[error("snapshot persistence failed: {0}")]
    Persist(#[from] std::io::Error),

    /// The persisted snapshot could not be decoded.
    #[error("snapshot decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

impl MetaError {
    /// Maps the error to its coarse kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetaError::HostNotFound(_)
            | MetaError::NodeNotFound(_)
            | MetaError::ClusterNotFound(_)
            | MetaError::MigrationNotFound { .. }
            | MetaError::NodeNotInCluster { .. } => ErrorKind::NotFound,

            MetaError::NodeAlreadyOwned { .. }
            | MetaError::ClusterAlreadyExists(_)
            | MetaError::MigrationConflict(_)
            | MetaError::ReplicaAlreadyOwned { .. } => ErrorKind::Conflict,

            MetaError::NodeInUse(_)
            | MetaError::ClusterNotEmpty(_)
            | MetaError::NodePinnedByMigration(_)
            | MetaError::NodeHasReplica(_)
            | MetaError::InvalidNodePair { .. }
            | MetaError::MasterNotInCluster { .. }
            | MetaError::NodeNotMaster(_)
            | MetaError::ReplicaNotFree(_) => ErrorKind::InvalidState,

            MetaError::NoFreeNodeAvailable => ErrorKind::ResourceExhausted,

            MetaError::Invariant(_) | MetaError::Persist(_) | MetaError::Decode(_) => {
                ErrorKind::Internal
            }
        }
    }
}
