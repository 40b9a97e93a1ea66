use std::{cmp::Ordering, ops::Index};

use thiserror::Error;

use crate::{
    block::{Block, BlockId},
    node::NodeId,
};

/// Arena holding every block minted during a simulation run. Blocks form a
/// tree through their parent ids; nodes refer to blocks only by [BlockId], so
/// many nodes can share the same tree without any ownership ambiguity.
#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    /// Indexed by [BlockId].
    blocks: Vec<BlockData>,
    /// Maximum height of any block in the tree.
    max_height: u64,
}

/// A block and its associated metadata as held within a [BlockTree].
#[derive(Debug, Clone)]
pub struct BlockData {
    pub block: Block,
    /// All blocks which directly point to `block`.
    pub children: Vec<BlockId>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockInsertionError {
    #[error("a genesis block already exists in this tree")]
    DuplicateGenesis,
    #[error("parent block {0} was not found in this tree")]
    ParentNotFound(BlockId),
    #[error("block time {time} precedes the time {parent_time} of its parent")]
    TimeBeforeParent { time: u64, parent_time: u64 },
}

impl BlockTree {
    /// Creates an empty tree. A genesis block must be added with
    /// [BlockTree::genesis] before anything can be minted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the genesis block (height 0, no parent).
    pub fn genesis(
        &mut self,
        minter: NodeId,
        time: u64,
        size: u64,
    ) -> Result<BlockId, BlockInsertionError> {
        if !self.blocks.is_empty() {
            return Err(BlockInsertionError::DuplicateGenesis);
        }

        let id = BlockId(0);
        let block = Block { id, height: 0, parent: None, minter, time, size };
        self.blocks.push(BlockData { block, children: vec![] });

        Ok(id)
    }

    /// Adds a new block extending `parent`.
    pub fn mint(
        &mut self,
        parent: BlockId,
        minter: NodeId,
        time: u64,
        size: u64,
    ) -> Result<BlockId, BlockInsertionError> {
        use BlockInsertionError::*;

        let id = BlockId(self.blocks.len() as u64);
        let parent_data = self
            .blocks
            .get_mut(parent.0 as usize)
            .ok_or(ParentNotFound(parent))?;

        if time < parent_data.block.time {
            return Err(TimeBeforeParent {
                time,
                parent_time: parent_data.block.time,
            });
        }
        parent_data.children.push(id);

        let height = parent_data.block.height + 1;
        if self.max_height.cmp(&height) == Ordering::Less {
            self.max_height = height;
        }

        let block = Block { id, height, parent: Some(parent), minter, time, size };
        self.blocks.push(BlockData { block, children: vec![] });

        Ok(id)
    }

    /// Returns true iff the given block ID is associated with a block in
    /// the tree.
    #[inline]
    pub fn contains(&self, id: BlockId) -> bool {
        (id.0 as usize) < self.blocks.len()
    }

    #[inline]
    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0 as usize).map(|data| &data.block)
    }

    /// Returns the parent of the block with the given ID.
    #[inline]
    pub fn parent_of(&self, id: BlockId) -> Option<BlockId> {
        self.get(id).and_then(|block| block.parent)
    }

    /// Returns the ID of the genesis block, if it has been added.
    #[inline]
    pub fn genesis_id(&self) -> Option<BlockId> {
        self.blocks.first().map(|data| data.block.id)
    }

    /// Maximum height of any block in the tree.
    #[inline]
    pub fn max_height(&self) -> u64 {
        self.max_height
    }

    /// Number of blocks in the tree.
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Iterates over all blocks in minting order.
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().map(|data| &data.block)
    }

    /// Returns the ancestor of `id` at the given height, or `None` if `height`
    /// exceeds the height of `id`.
    pub fn ancestor_at_height(&self, id: BlockId, height: u64) -> Option<BlockId> {
        let mut curr = self.get(id)?;
        if height > curr.height {
            return None;
        }

        while curr.height > height {
            curr = &self[curr.parent?];
        }

        Some(curr.id)
    }

    /// Returns true iff `ancestor` lies on the path from `id` to genesis
    /// (a block is its own ancestor).
    pub fn is_ancestor(&self, ancestor: BlockId, id: BlockId) -> bool {
        match self.get(ancestor) {
            Some(block) => self.ancestor_at_height(id, block.height) == Some(ancestor),
            None => false,
        }
    }

    /// Returns true iff one of the two blocks is an ancestor of the other.
    pub fn is_on_same_chain(&self, a: BlockId, b: BlockId) -> bool {
        self.is_ancestor(a, b) || self.is_ancestor(b, a)
    }

    /// Returns the IDs of all blocks on the path from the given block ID to the
    /// genesis block, in ascending order of height and including the given
    /// block ID.
    ///
    /// ## Panics
    /// If a block with [BlockId] `id` is not present in the tree.
    pub fn ancestors_of(&self, id: BlockId) -> Vec<BlockId> {
        assert!(
            self.contains(id),
            "block tree does not contain a block with ID: {:?}",
            id
        );

        let mut ancestors = vec![id];
        let mut curr = id;
        while let Some(parent) = self.parent_of(curr) {
            ancestors.push(parent);
            curr = parent;
        }

        ancestors.reverse();
        ancestors
    }

    /// Returns the IDs of the blocks directly extending `id`.
    pub fn children_of(&self, id: BlockId) -> &[BlockId] {
        self.blocks
            .get(id.0 as usize)
            .map(|data| data.children.as_slice())
            .unwrap_or_default()
    }
}

impl Index<BlockId> for BlockTree {
    type Output = Block;

    fn index(&self, index: BlockId) -> &Self::Output {
        &self.blocks[index.0 as usize].block
    }
}

impl Index<&BlockId> for BlockTree {
    type Output = Block;

    fn index(&self, index: &BlockId) -> &Self::Output {
        &self.blocks[index.0 as usize].block
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockInsertionError, BlockTree};
    use crate::node::NodeId;

    fn forked_tree() -> BlockTree {
        // 0 <- 1 <- 2
        //        \- 3 <- 4
        let mut tree = BlockTree::new();
        let minter = NodeId::from(1);
        let g = tree.genesis(minter, 0, 10).unwrap();
        let a = tree.mint(g, minter, 5, 10).unwrap();
        tree.mint(a, minter, 9, 10).unwrap();
        let c = tree.mint(a, minter, 10, 10).unwrap();
        tree.mint(c, minter, 12, 10).unwrap();

        tree
    }

    #[test]
    fn heights_follow_parents() {
        let tree = forked_tree();

        for block in tree.iter() {
            if let Some(parent) = block.parent {
                assert_eq!(block.height, tree[parent].height + 1);
                assert!(block.time >= tree[parent].time);
            }
        }
        assert_eq!(tree.max_height(), 3);
    }

    #[test]
    fn same_chain_detection() {
        let tree = forked_tree();

        assert!(tree.is_on_same_chain(1.into(), 4.into()));
        assert!(tree.is_on_same_chain(4.into(), 0.into()));
        assert!(!tree.is_on_same_chain(2.into(), 3.into()));
        assert!(!tree.is_on_same_chain(2.into(), 4.into()));
        assert_eq!(
            tree.ancestors_of(4.into()),
            vec![0.into(), 1.into(), 3.into(), 4.into()]
        );
        assert_eq!(tree.children_of(1.into()), &[2.into(), 3.into()]);
    }

    #[test]
    fn rejects_invalid_blocks() {
        let mut tree = forked_tree();
        let minter = NodeId::from(1);

        assert_eq!(
            tree.genesis(minter, 0, 1),
            Err(BlockInsertionError::DuplicateGenesis)
        );
        assert_eq!(
            tree.mint(99.into(), minter, 20, 1),
            Err(BlockInsertionError::ParentNotFound(99.into()))
        );
        assert_eq!(
            tree.mint(4.into(), minter, 1, 1),
            Err(BlockInsertionError::TimeBeforeParent {
                time: 1,
                parent_time: 12
            })
        );
    }
}
