use crate::error::{CfbError, Result};

/// Tracks which blocks a traversal has already visited
///
/// A chain that reaches the same block twice is corrupt; walking it would
/// never terminate. Indices past the end of the bitmap belong to blocks that
/// were allocated after the detector was made and are not tracked.
#[derive(Debug, Clone)]
pub struct ChainLoopDetector {
    claimed: Vec<bool>,
}

impl ChainLoopDetector {
    pub fn new(block_count: usize) -> Self {
        ChainLoopDetector {
            claimed: vec![false; block_count],
        }
    }

    /// Mark `index` as visited, failing if it already was
    pub fn claim(&mut self, index: u32) -> Result<()> {
        match self.claimed.get_mut(index as usize) {
            None => Ok(()),
            Some(true) => Err(CfbError::ChainLoop { block: index }),
            Some(slot) => {
                *slot = true;
                Ok(())
            }
        }
    }

    pub fn is_claimed(&self, index: u32) -> bool {
        self.claimed.get(index as usize).copied().unwrap_or(false)
    }

    pub fn capacity(&self) -> usize {
        self.claimed.len()
    }
}
