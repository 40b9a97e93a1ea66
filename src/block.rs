use serde::Serialize;

use crate::node::NodeId;

/// Representation of a minted block. Blocks carry no transactions; they are
/// causally ordered events with a minter, a parent link and a size.
#[derive(Debug, Clone)]
pub struct Block {
    /// Identity of this block.
    pub id: BlockId,
    /// Length of the path from this block to the genesis block.
    pub height: u64,
    /// The block this one extends, `None` for genesis.
    pub parent: Option<BlockId>,
    /// The node which minted this block.
    pub minter: NodeId,
    /// Simulated time (ms) at which this block was minted.
    pub time: u64,
    /// Size of the block in bytes.
    pub size: u64,
}

/// A unique identifier assigned to each [Block]. Ids are handed out
/// sequentially by [BlockTree](crate::blockchain::BlockTree), so they also
/// reflect minting order.
#[derive(
    Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize,
)]
pub struct BlockId(pub(crate) u64);

impl BlockId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for BlockId {
    fn from(value: u64) -> Self {
        BlockId(value)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Block {
    #[inline]
    pub fn is_genesis(&self) -> bool {
        self.parent.is_none()
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Block {}

impl PartialOrd for Block {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Block {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}
