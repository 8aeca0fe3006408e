//! Network topology as an arena of nodes, devices and channels.
//!
//! Nodes, devices and channels form a cyclic object graph, so the arena
//! stores flat records addressed by integer handles ([`NodeId`],
//! [`DeviceId`], [`ChannelId`]) instead of owning pointers. The partitioner
//! only needs read access to the graph plus the ability to relabel node
//! system ids, which keeps this representation natural and `Send`.
//!
//! Every rank of a distributed run builds the same global topology; rank
//! ownership is declared per node at construction time and partitioning
//! later fills in the logical-process half of each local node's
//! [`SystemId`].

mod partition;

pub use partition::{auto_lookahead, label_partitions, PartitionError};

use lockstep_core::SimTime;

/// Handle to a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Handle to a device (one attachment point of a node to a channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

/// Handle to a channel connecting two or more devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u32);

/// Composite system id of a node: high 16 bits hold the local id of the
/// owning logical process, low 16 bits the owning OS-process rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(u32);

impl SystemId {
    /// Compose from a logical-process id and a rank.
    pub const fn new(lp: u16, rank: u16) -> Self {
        SystemId((lp as u32) << 16 | rank as u32)
    }

    /// Local id of the owning logical process (0 until partitioned).
    pub const fn lp(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Rank of the owning OS process.
    pub const fn rank(self) -> u16 {
        self.0 as u16
    }

    /// Raw composite value.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug)]
struct NodeRecord {
    system_id: SystemId,
    devices: Vec<DeviceId>,
}

#[derive(Debug)]
struct DeviceRecord {
    node: NodeId,
    channel: ChannelId,
    point_to_point: bool,
}

#[derive(Debug)]
struct ChannelRecord {
    delay: SimTime,
    devices: Vec<DeviceId>,
}

/// The topology arena.
///
/// Immutable after construction except for node system ids, which the
/// partitioner assigns exactly once per run.
#[derive(Debug, Default)]
pub struct Topology {
    nodes: Vec<NodeRecord>,
    devices: Vec<DeviceRecord>,
    channels: Vec<ChannelRecord>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node owned by `rank`. Its logical-process id starts at zero and
    /// is filled in by partitioning.
    pub fn add_node(&mut self, rank: u16) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeRecord {
            system_id: SystemId::new(0, rank),
            devices: Vec::new(),
        });
        id
    }

    fn attach(&mut self, node: NodeId, channel: ChannelId, point_to_point: bool) -> DeviceId {
        let id = DeviceId(self.devices.len() as u32);
        self.devices.push(DeviceRecord {
            node,
            channel,
            point_to_point,
        });
        self.nodes[node.0 as usize].devices.push(id);
        self.channels[channel.0 as usize].devices.push(id);
        id
    }

    /// Connect two nodes with a point-to-point link of the given delay.
    pub fn connect(&mut self, a: NodeId, b: NodeId, delay: SimTime) -> ChannelId {
        let channel = ChannelId(self.channels.len() as u32);
        self.channels.push(ChannelRecord {
            delay,
            devices: Vec::new(),
        });
        self.attach(a, channel, true);
        self.attach(b, channel, true);
        channel
    }

    /// Connect a set of nodes with a shared (broadcast) channel. Shared
    /// channels are never partition cuts.
    pub fn connect_shared(&mut self, nodes: &[NodeId], delay: SimTime) -> ChannelId {
        let channel = ChannelId(self.channels.len() as u32);
        self.channels.push(ChannelRecord {
            delay,
            devices: Vec::new(),
        });
        for &node in nodes {
            self.attach(node, channel, false);
        }
        channel
    }

    /// Number of nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// System id of a node.
    pub fn system_id(&self, node: NodeId) -> SystemId {
        self.nodes[node.0 as usize].system_id
    }

    /// Relabel a node. Used by the partitioner only.
    pub(crate) fn set_system_id(&mut self, node: NodeId, system_id: SystemId) {
        self.nodes[node.0 as usize].system_id = system_id;
    }

    /// True when the node is owned by `rank`.
    pub fn is_local(&self, node: NodeId, rank: u16) -> bool {
        self.system_id(node).rank() == rank
    }

    /// Devices attached to a node.
    pub fn devices(&self, node: NodeId) -> &[DeviceId] {
        &self.nodes[node.0 as usize].devices
    }

    /// Channel a device is attached to.
    pub fn channel(&self, device: DeviceId) -> ChannelId {
        self.devices[device.0 as usize].channel
    }

    /// True for devices on point-to-point links.
    pub fn is_point_to_point(&self, device: DeviceId) -> bool {
        self.devices[device.0 as usize].point_to_point
    }

    /// Propagation delay of a channel.
    pub fn delay(&self, channel: ChannelId) -> SimTime {
        self.channels[channel.0 as usize].delay
    }

    /// Nodes reachable over a channel, including the querying side.
    pub fn endpoints<'a>(&'a self, channel: ChannelId) -> impl Iterator<Item = NodeId> + 'a {
        self.channels[channel.0 as usize]
            .devices
            .iter()
            .map(|d| self.devices[d.0 as usize].node)
    }

    /// All node handles.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }
}
