//! Routing tables deciding which peers a node relays blocks to.

use std::fmt::Debug;

use dyn_clone::DynClone;

use super::NodeId;
use crate::topology::RegionId;

/// What a node knows about a neighbour: its address and the relay features
/// it advertised when the connection was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub id: NodeId,
    pub region: RegionId,
    pub uses_compact_relay: bool,
}

/// The set of neighbours of a single node.
pub trait RoutingTable: Debug + DynClone + Send + Sync {
    /// Id of the node owning this table.
    fn owner(&self) -> NodeId;

    /// Number of outbound connections this table tries to hold.
    fn target_degree(&self) -> usize;

    /// Returns true while more outbound connections can be made.
    fn has_outbound_capacity(&self) -> bool;

    /// Adds an outbound connection. Returns false if `peer` is the owner,
    /// already a neighbour, or no outbound capacity is left.
    fn add_outbound(&mut self, peer: Peer) -> bool;

    /// Records an inbound connection made by `peer`. Returns false if the
    /// connection is refused.
    fn add_inbound(&mut self, peer: Peer) -> bool;

    /// Removes `id` from both directions. Returns true if it was present.
    fn remove(&mut self, id: NodeId) -> bool;

    /// Removes every neighbour.
    fn clear(&mut self);

    /// All neighbours relayed to, outbound connections first.
    fn neighbors(&self) -> Vec<Peer>;

    fn outbound(&self) -> &[Peer];

    /// Returns true if a connection made by one side is also recorded as an
    /// inbound connection at the other side.
    fn is_symmetric(&self) -> bool;

    fn contains(&self, id: NodeId) -> bool {
        self.neighbors().iter().any(|peer| peer.id == id)
    }

    fn name(&self) -> &'static str;
}

dyn_clone::clone_trait_object!(RoutingTable);

/// Selectable routing table implementations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RoutingTableKind {
    /// [BitcoinCoreTable]
    #[default]
    BitcoinCore,
    /// [OutboundOnlyTable]
    OutboundOnly,
}

impl RoutingTableKind {
    pub fn build(&self, owner: NodeId, degree: usize) -> Box<dyn RoutingTable> {
        match self {
            Self::BitcoinCore => Box::new(BitcoinCoreTable::new(owner, degree)),
            Self::OutboundOnly => Box::new(OutboundOnlyTable::new(owner, degree)),
        }
    }
}

/// Bitcoin Core style table: a bounded list of outbound connections plus an
/// unbounded list of inbound connections. Blocks are relayed to both.
#[derive(Debug, Clone)]
pub struct BitcoinCoreTable {
    owner: NodeId,
    degree: usize,
    outbound: Vec<Peer>,
    inbound: Vec<Peer>,
}

impl BitcoinCoreTable {
    pub fn new(owner: NodeId, degree: usize) -> Self {
        BitcoinCoreTable {
            owner,
            degree,
            outbound: Vec::with_capacity(degree),
            inbound: vec![],
        }
    }

    pub fn inbound(&self) -> &[Peer] {
        &self.inbound
    }

    fn is_connected(&self, id: NodeId) -> bool {
        self.outbound.iter().chain(&self.inbound).any(|p| p.id == id)
    }
}

impl RoutingTable for BitcoinCoreTable {
    fn owner(&self) -> NodeId {
        self.owner
    }

    fn target_degree(&self) -> usize {
        self.degree
    }

    fn has_outbound_capacity(&self) -> bool {
        self.outbound.len() < self.degree
    }

    fn add_outbound(&mut self, peer: Peer) -> bool {
        if peer.id == self.owner
            || self.is_connected(peer.id)
            || !self.has_outbound_capacity()
        {
            return false;
        }

        self.outbound.push(peer);
        true
    }

    fn add_inbound(&mut self, peer: Peer) -> bool {
        if peer.id == self.owner || self.is_connected(peer.id) {
            return false;
        }

        self.inbound.push(peer);
        true
    }

    fn remove(&mut self, id: NodeId) -> bool {
        let before = self.outbound.len() + self.inbound.len();
        self.outbound.retain(|p| p.id != id);
        self.inbound.retain(|p| p.id != id);

        before != self.outbound.len() + self.inbound.len()
    }

    fn clear(&mut self) {
        self.outbound.clear();
        self.inbound.clear();
    }

    fn neighbors(&self) -> Vec<Peer> {
        self.outbound.iter().chain(&self.inbound).copied().collect()
    }

    fn outbound(&self) -> &[Peer] {
        &self.outbound
    }

    fn is_symmetric(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "BitcoinCore"
    }
}

/// Directed table: blocks are only relayed along outbound connections, and
/// peers are not told about connections made to them.
#[derive(Debug, Clone)]
pub struct OutboundOnlyTable {
    owner: NodeId,
    degree: usize,
    outbound: Vec<Peer>,
}

impl OutboundOnlyTable {
    pub fn new(owner: NodeId, degree: usize) -> Self {
        OutboundOnlyTable { owner, degree, outbound: Vec::with_capacity(degree) }
    }
}

impl RoutingTable for OutboundOnlyTable {
    fn owner(&self) -> NodeId {
        self.owner
    }

    fn target_degree(&self) -> usize {
        self.degree
    }

    fn has_outbound_capacity(&self) -> bool {
        self.outbound.len() < self.degree
    }

    fn add_outbound(&mut self, peer: Peer) -> bool {
        if peer.id == self.owner
            || self.outbound.iter().any(|p| p.id == peer.id)
            || !self.has_outbound_capacity()
        {
            return false;
        }

        self.outbound.push(peer);
        true
    }

    fn add_inbound(&mut self, _peer: Peer) -> bool {
        false
    }

    fn remove(&mut self, id: NodeId) -> bool {
        let before = self.outbound.len();
        self.outbound.retain(|p| p.id != id);

        before != self.outbound.len()
    }

    fn clear(&mut self) {
        self.outbound.clear();
    }

    fn neighbors(&self) -> Vec<Peer> {
        self.outbound.clone()
    }

    fn outbound(&self) -> &[Peer] {
        &self.outbound
    }

    fn is_symmetric(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "OutboundOnly"
    }
}
