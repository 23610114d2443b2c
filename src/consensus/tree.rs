// Layered block tree.
//
// Layer d holds every known block whose shortest path to genesis has d
// edges; a block's layer is fixed at insertion. The parent scan walks the
// deepest layer first, so when a truncated 16-bit id appears at several
// layers the deepest match wins. That mis-parents under collisions by
// construction; fork-choice only ever reads the deepest layer.

use crate::config::{GENESIS_ID, MAX_CLOCK_SKEW_SECS};
use crate::primitives::block::{Block, CodecError, RawBlock, block_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// The tree grew in depth; the miner must restart on the new tip
    NewTip { layer: usize },
    /// A sibling joined an existing layer; the longest chain is unchanged
    Extended { layer: usize },
}

impl Insert {
    pub fn layer(&self) -> usize {
        match self {
            Insert::NewTip { layer } | Insert::Extended { layer } => *layer,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error(transparent)]
    Malformed(#[from] CodecError),
    #[error("block timestamp more than {MAX_CLOCK_SKEW_SECS}s from local time")]
    StaleTimestamp,
    #[error("no known block matches prev_id {0:#06x}")]
    UnknownParent(u16),
}

#[derive(Debug, Default)]
pub struct BlockTree {
    layers: Vec<Vec<RawBlock>>,
}

impl BlockTree {
    pub fn new() -> Self {
        BlockTree { layers: Vec::new() }
    }

    /// Number of layers, i.e. the length of the longest chain
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn total_blocks(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    pub fn layer(&self, d: usize) -> &[RawBlock] {
        &self.layers[d]
    }

    pub fn layer_contains(&self, d: usize, raw: &RawBlock) -> bool {
        d < self.layers.len() && self.layers[d].contains(raw)
    }

    /// Where the next block should be mined: the id of the first block of
    /// the deepest layer and the layer that block would occupy. On an empty
    /// tree that is genesis.
    pub fn prev_id_to_mine_on(&self) -> (u16, usize) {
        match self.layers.last() {
            None => (GENESIS_ID, 0),
            Some(tip_layer) => (block_id(&tip_layer[0]), self.layers.len()),
        }
    }

    /// Validate and place a received block. `now` is the local wall clock
    /// in seconds since the epoch.
    pub fn try_insert(&mut self, raw: &[u8], now: u64) -> Result<Insert, TreeError> {
        let block = Block::decode(raw)?;
        if (now as i64 - block.timestamp as i64).unsigned_abs() > MAX_CLOCK_SKEW_SECS {
            return Err(TreeError::StaleTimestamp);
        }
        let raw: RawBlock = raw.try_into().expect("length checked by decode");

        // Deepest layer first; the first id match wins.
        for d in (0..self.layers.len()).rev() {
            for stored in &self.layers[d] {
                if block_id(stored) == block.prev_id {
                    return Ok(self.place(raw, d + 1));
                }
            }
        }

        if block.prev_id == GENESIS_ID {
            return Ok(self.place(raw, 0));
        }
        Err(TreeError::UnknownParent(block.prev_id))
    }

    /// Append `raw` at layer `d`, creating the layer when it is one past
    /// the current depth. Also the single call site through which the
    /// selfish strategy publishes withheld blocks.
    pub fn place(&mut self, raw: RawBlock, d: usize) -> Insert {
        if d < self.layers.len() {
            self.layers[d].push(raw);
            Insert::Extended { layer: d }
        } else {
            self.layers.push(vec![raw]);
            Insert::NewTip { layer: d }
        }
    }

    /// Path from a deepest-layer tip back to layer 0, returned genesis end
    /// first. Ties at every layer break by first arrival.
    pub fn longest_chain(&self) -> Vec<RawBlock> {
        let Some(tip_layer) = self.layers.last() else {
            return Vec::new();
        };
        let mut chain = vec![tip_layer[0]];
        let mut wanted = Block::decode(&tip_layer[0]).expect("stored blocks are valid").prev_id;
        for d in (0..self.layers.len() - 1).rev() {
            for stored in &self.layers[d] {
                if block_id(stored) == wanted {
                    chain.push(*stored);
                    wanted = Block::decode(stored).expect("stored blocks are valid").prev_id;
                    break;
                }
            }
        }
        chain.reverse();
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::block::Block;

    fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn block(prev_id: u16, nonce: u16) -> RawBlock {
        Block {
            prev_id,
            nonce,
            timestamp: now() as u32,
        }
        .encode()
    }

    /// Search nonces (and nearby valid timestamps) for a block with the
    /// requested id.
    fn block_with_id(prev_id: u16, wanted_id: u16) -> RawBlock {
        let ts = now() as u32;
        for offset in 0..600 {
            for nonce in 0..=u16::MAX {
                let raw = Block {
                    prev_id,
                    nonce,
                    timestamp: ts - offset,
                }
                .encode();
                if block_id(&raw) == wanted_id {
                    return raw;
                }
            }
        }
        panic!("no nonce yields id {wanted_id:#06x}");
    }

    #[test]
    fn test_genesis_insertion() {
        let mut tree = BlockTree::new();
        let b = block(GENESIS_ID, 0x1234);
        let res = tree.try_insert(&b, now()).unwrap();
        assert_eq!(res, Insert::NewTip { layer: 0 });
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.layer(0), &[b]);
    }

    #[test]
    fn test_stale_block_rejected() {
        let mut tree = BlockTree::new();
        let t = now();
        let old = Block {
            prev_id: GENESIS_ID,
            nonce: 1,
            timestamp: (t - 7200) as u32,
        }
        .encode();
        assert!(matches!(
            tree.try_insert(&old, t),
            Err(TreeError::StaleTimestamp)
        ));
        assert!(tree.is_empty());

        let future = Block {
            prev_id: GENESIS_ID,
            nonce: 1,
            timestamp: (t + 7200) as u32,
        }
        .encode();
        assert!(matches!(
            tree.try_insert(&future, t),
            Err(TreeError::StaleTimestamp)
        ));
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let mut tree = BlockTree::new();
        let orphan = block(0x0001, 7);
        // 0x0001 is not genesis and nothing is stored yet
        assert!(matches!(
            tree.try_insert(&orphan, now()),
            Err(TreeError::UnknownParent(0x0001))
        ));
        assert_eq!(tree.total_blocks(), 0);
    }

    #[test]
    fn test_malformed_rejected() {
        let mut tree = BlockTree::new();
        assert!(matches!(
            tree.try_insert(&[0u8; 5], now()),
            Err(TreeError::Malformed(_))
        ));
    }

    #[test]
    fn test_fork_then_extension() {
        let mut tree = BlockTree::new();
        let b1 = block(GENESIS_ID, 1);
        let b2 = block(GENESIS_ID, 2);
        let b3 = block(block_id(&b1), 3);

        assert_eq!(
            tree.try_insert(&b1, now()).unwrap(),
            Insert::NewTip { layer: 0 }
        );
        assert_eq!(
            tree.try_insert(&b2, now()).unwrap(),
            Insert::Extended { layer: 0 }
        );
        assert_eq!(
            tree.try_insert(&b3, now()).unwrap(),
            Insert::NewTip { layer: 1 }
        );

        assert_eq!(tree.layer(0), &[b1, b2]);
        assert_eq!(tree.layer(1), &[b3]);
        assert_eq!(tree.longest_chain(), vec![b1, b3]);
    }

    #[test]
    fn test_layering_invariant() {
        let mut tree = BlockTree::new();
        let b1 = block(GENESIS_ID, 1);
        let b2 = block(block_id(&b1), 2);
        let b3 = block(block_id(&b2), 3);
        let b4 = block(block_id(&b1), 4);
        for b in [b1, b2, b3, b4] {
            tree.try_insert(&b, now()).unwrap();
        }
        for d in 1..tree.depth() {
            for stored in tree.layer(d) {
                let prev = Block::decode(stored).unwrap().prev_id;
                assert!(
                    tree.layer(d - 1).iter().any(|p| block_id(p) == prev),
                    "block at layer {d} has no parent at layer {}",
                    d - 1
                );
            }
        }
    }

    #[test]
    fn test_mine_point_follows_first_tip() {
        let mut tree = BlockTree::new();
        assert_eq!(tree.prev_id_to_mine_on(), (GENESIS_ID, 0));

        let b1 = block(GENESIS_ID, 1);
        let b2 = block(GENESIS_ID, 2);
        tree.try_insert(&b1, now()).unwrap();
        tree.try_insert(&b2, now()).unwrap();
        // first arrival at the deepest layer wins the tie
        assert_eq!(tree.prev_id_to_mine_on(), (block_id(&b1), 1));
    }

    #[test]
    fn test_deepest_id_match_wins_on_collision() {
        let mut tree = BlockTree::new();
        let shared = 0x00AB;
        let b1 = block_with_id(GENESIS_ID, shared);
        tree.try_insert(&b1, now()).unwrap();
        let b2 = block_with_id(shared, shared);
        // b2 extends b1 and happens to carry the same id
        assert_eq!(
            tree.try_insert(&b2, now()).unwrap(),
            Insert::NewTip { layer: 1 }
        );

        // a child of the colliding id must attach under the deeper holder
        let child = block(shared, 9);
        assert_eq!(
            tree.try_insert(&child, now()).unwrap(),
            Insert::NewTip { layer: 2 }
        );
    }
}
