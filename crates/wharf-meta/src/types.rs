use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Number of keyspace slots a cluster is divided into.
pub const SLOT_COUNT: u16 = 16384;

/// An inclusive range of keyspace slots owned by a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    /// First slot of the range
    pub start: u16,
    /// Last slot of the range (inclusive)
    pub end: u16,
}

impl SlotRange {
    /// Creates a range covering `start..=end`.
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// The full keyspace, `0..=16383`.
    pub fn full() -> Self {
        Self {
            start: 0,
            end: SLOT_COUNT - 1,
        }
    }

    /// Number of slots covered by this range.
    pub fn len(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            u32::from(self.end) - u32::from(self.start) + 1
        }
    }

    /// Returns true if the range covers no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `slot` falls inside this range.
    pub fn contains(&self, slot: u16) -> bool {
        self.start <= slot && slot <= self.end
    }

    /// Returns true if this range shares any slot with `other`.
    pub fn overlaps(&self, other: &SlotRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Role of a storage node within the fleet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns a portion of a cluster's keyspace
    Master,
    /// Replicates a master node
    Replica,
    /// Registered but not assigned to any cluster
    Free,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Replica => write!(f, "replica"),
            Role::Free => write!(f, "free"),
        }
    }
}

/// A physical storage-owning unit, identified by `"ip:port"` address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node address, unique across the fleet
    pub address: String,
    /// Address of the proxy fronting this node
    pub proxy_address: String,
    /// Cluster this node currently belongs to, if any
    pub cluster: Option<String>,
    /// Current role
    pub role: Role,
    /// Slot ranges owned by this node (masters only)
    pub slots: Vec<SlotRange>,
}

impl Node {
    /// Creates a fresh, unassigned node fronted by `proxy_address`.
    pub fn new(address: String, proxy_address: String) -> Self {
        Self {
            address,
            proxy_address,
            cluster: None,
            role: Role::Free,
            slots: Vec::new(),
        }
    }

    /// Total number of slots owned across all ranges.
    pub fn slot_count(&self) -> u32 {
        self.slots.iter().map(SlotRange::len).sum()
    }
}

/// A proxy process fronting one or more storage nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Proxy address, unique key
    pub proxy_address: String,
    /// Nodes fronted by this proxy, keyed (and ordered) by address
    pub nodes: BTreeMap<String, Node>,
}

impl Host {
    /// Creates a host with no nodes yet.
    pub fn new(proxy_address: String) -> Self {
        Self {
            proxy_address,
            nodes: BTreeMap::new(),
        }
    }

    /// Addresses of the nodes this host fronts, in order.
    pub fn node_addresses(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }
}

/// A named logical keyspace made of assigned nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster name, unique key
    pub name: String,
    /// Addresses of member nodes, ordered
    pub nodes: Vec<String>,
}

impl Cluster {
    /// Creates an empty cluster.
    pub fn new(name: String) -> Self {
        Self {
            name,
            nodes: Vec::new(),
        }
    }

    /// Returns true if `address` is a member of this cluster.
    pub fn contains(&self, address: &str) -> bool {
        self.nodes.iter().any(|n| n == address)
    }
}

/// How much of the source node's keyspace a migration moves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    /// Move roughly half of the source's slots; both nodes stay masters
    Half,
    /// Move everything; the source leaves the cluster and becomes free
    All,
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationMode::Half => write!(f, "half"),
            MigrationMode::All => write!(f, "all"),
        }
    }
}

/// Lifecycle state of a migration record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    /// Created, transfer not yet handed off
    Pending,
    /// Transfer in flight
    Running,
    /// Transfer finished and ownership committed
    Completed,
    /// Stopped by an operator; ownership left as it stood
    Cancelled,
    /// Transfer aborted by the broker (task error or restart)
    Failed,
}

impl MigrationStatus {
    /// Returns true for states from which no further transition is legal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed | MigrationStatus::Cancelled | MigrationStatus::Failed
        )
    }

    /// Returns true while the migration still pins its nodes.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStatus::Pending => write!(f, "pending"),
            MigrationStatus::Running => write!(f, "running"),
            MigrationStatus::Completed => write!(f, "completed"),
            MigrationStatus::Cancelled => write!(f, "cancelled"),
            MigrationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A controlled transfer of slot ownership between two nodes of one cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Record id
    pub id: Uuid,
    /// Cluster both nodes belong to
    pub cluster: String,
    /// Node giving up slots
    pub src_node: String,
    /// Node receiving slots
    pub dst_node: String,
    /// Half or All
    pub mode: MigrationMode,
    /// Lifecycle state
    pub status: MigrationStatus,
    /// Transfer progress, 0-100
    pub progress: u8,
    /// Failure detail when status is Failed
    pub error: Option<String>,
}

impl Migration {
    /// Creates a new record in `Pending`.
    pub fn new(cluster: String, src_node: String, dst_node: String, mode: MigrationMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            cluster,
            src_node,
            dst_node,
            mode,
            status: MigrationStatus::Pending,
            progress: 0,
            error: None,
        }
    }

    /// Returns true while the record pins its nodes.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Returns true if this record is an active migration between `a` and `b`
    /// (unordered) in `cluster`.
    pub fn matches_pair(&self, cluster: &str, a: &str, b: &str) -> bool {
        self.cluster == cluster
            && ((self.src_node == a && self.dst_node == b)
                || (self.src_node == b && self.dst_node == a))
    }

    /// Returns true if an active record references `address` as src or dst.
    pub fn pins(&self, address: &str) -> bool {
        self.is_active() && (self.src_node == address || self.dst_node == address)
    }
}

/// A master/replica association between two nodes in the same cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPair {
    /// Cluster both nodes belong to
    pub cluster: String,
    /// Master node address
    pub master_node: String,
    /// Replica node address
    pub replica_node: String,
}
