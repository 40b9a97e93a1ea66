//! Units of work executed by the [Scheduler](crate::scheduler::Scheduler).

use crate::{
    block::BlockId,
    node::{routing::Peer, NodeId},
};

/// A scheduled unit of work. A task is executed at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// `minter` attempts to mint a block on top of `parent`.
    Minting { minter: NodeId, parent: BlockId },
    /// A message arriving at its destination after network delay.
    Message(Message),
    /// Toggles the reachability of a churn node.
    Churn { node: NodeId },
}

/// A message travelling between two neighbouring nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: Peer,
    pub to: Peer,
    /// Simulated time at which the message left `from`.
    pub sent_at: u64,
    pub kind: MessageKind,
}

/// Kinds of relay messages exchanged between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Announces that the sender holds a block.
    Inv(BlockId),
    /// Requests the announced block from the sender of an [MessageKind::Inv].
    GetData(BlockId),
    /// Requests the `missing` bytes of transactions which could not be
    /// recovered after a failed compact block reconstruction.
    GetBlockTxn { block: BlockId, missing: u64 },
    /// Full block transfer.
    Block(BlockId),
    /// Compact block transfer, which may fail to reconstruct at the receiver.
    CompactBlock(BlockId),
}

impl MessageKind {
    /// The block this message refers to.
    pub fn block(&self) -> BlockId {
        match *self {
            Self::Inv(id)
            | Self::GetData(id)
            | Self::GetBlockTxn { block: id, .. }
            | Self::Block(id)
            | Self::CompactBlock(id) => id,
        }
    }

    /// Returns true for messages occupying the sender's upload slot.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Block(_) | Self::CompactBlock(_))
    }
}
