// Withholding strategy (Eyal-Sirer selfish mining).
//
// The strategy owns a private branch of self-mined blocks paired with the
// layer each occupies, plus a watermark of how many prefix entries have
// already been published. All publication into the public tree goes through
// BlockTree::place so a block can never be appended twice.
//
// The lead machine branches four ways on every honest tip:
//   lead < 0   overtaken, stop withholding and race from the public tip
//   lead == 0  answer with one secret block to force a tie
//   lead == 1  about to lose, drain the whole withheld suffix
//   lead >= 2  comfortable, stay quiet

use crate::consensus::tree::BlockTree;
use crate::primitives::block::{RawBlock, block_id};

#[derive(Debug, Default)]
pub struct SelfishState {
    /// Self-mined blocks, public or withheld, with their layers
    private: Vec<(RawBlock, usize)>,
    /// How many prefix entries of `private` are already published
    private_point: usize,
}

impl SelfishState {
    pub fn new() -> Self {
        SelfishState::default()
    }

    pub fn private_len(&self) -> usize {
        self.private.len()
    }

    pub fn private_point(&self) -> usize {
        self.private_point
    }

    pub fn withheld(&self) -> usize {
        self.private.len() - self.private_point
    }

    fn latest_private_layer(&self) -> Option<usize> {
        self.private.last().map(|(_, layer)| *layer)
    }

    /// Parent choice for the next mined block: the private tip while the
    /// secret branch is still at least level with the public tree, the
    /// public tip once the public chain has run ahead.
    pub fn mine_parent(&self, tree: &BlockTree) -> (u16, usize) {
        match self.private.last() {
            None => tree.prev_id_to_mine_on(),
            Some((raw, layer)) => {
                if layer + 1 < tree.depth() {
                    tree.prev_id_to_mine_on()
                } else {
                    (block_id(raw), layer + 1)
                }
            }
        }
    }

    /// Record a freshly mined block. Once the private branch has grown
    /// exactly two past the watermark the newest block is published at
    /// once (appended as the local public tip) and returned for
    /// broadcast; in every other case it stays withheld.
    pub fn on_mined(&mut self, raw: RawBlock, layer: usize, tree: &mut BlockTree) -> Option<RawBlock> {
        self.private.push((raw, layer));
        if self.private.len() - self.private_point == 2 {
            // record where the block really landed so later publication
            // and the final merge cannot double-place it
            let tip = tree.depth();
            tree.place(raw, tip);
            self.private.last_mut().expect("just pushed").1 = tip;
            self.private_point = self.private.len();
            return Some(raw);
        }
        None
    }

    /// React to an honest block that deepened the public tree to layer
    /// `honest_layer`. Returns whether the miner must restart and which
    /// withheld blocks to publish.
    pub fn on_honest_tip(&mut self, honest_layer: usize, tree: &mut BlockTree) -> (bool, Vec<RawBlock>) {
        let lead = match self.latest_private_layer() {
            None => -1,
            Some(layer) => layer as i64 - honest_layer as i64,
        };

        if lead < 0 {
            self.private_point = self.private.len();
            (true, Vec::new())
        } else if lead == 0 {
            let (last, _) = self.private[self.private.len() - 1];
            tree.place(last, tree.depth() - 1);
            (false, vec![last])
        } else if lead == 1 {
            let drained = self.private[self.private_point..].to_vec();
            for (raw, layer) in &drained {
                tree.place(*raw, *layer);
            }
            self.private_point = self.private.len();
            (false, drained.into_iter().map(|(raw, _)| raw).collect())
        } else {
            (false, Vec::new())
        }
    }

    /// Place every still-missing private block into the tree so the final
    /// statistics see the complete fork structure. SIGINT report only.
    pub fn merge_remaining(&self, tree: &mut BlockTree) {
        for (raw, layer) in &self.private {
            if !tree.layer_contains(*layer, raw) {
                tree.place(*raw, (*layer).min(tree.depth()));
            }
        }
    }

    /// How many self-mined blocks ended up on the given chain
    pub fn blocks_on_chain(&self, chain: &[RawBlock]) -> usize {
        self.private
            .iter()
            .filter(|(raw, _)| chain.contains(raw))
            .count()
    }
}
