//! Chained block streams
//!
//! A stream is a chain of blocks in one store, identified by its first block.
//! The same code serves main-store and mini-store chains.

use crate::allocator::{
    is_reserved, BlockRead, BlockStore, ChainLoopDetector, END_OF_CHAIN, UNUSED_BLOCK,
};
use crate::error::{CfbError, Result};
use tracing::debug;

/// Lazily reads the blocks of a chain
///
/// Each step claims its block in a detector owned by this iterator, so a
/// looping chain ends in [`CfbError::ChainLoop`] instead of spinning forever.
pub struct ChainBlocks<'s, S: BlockRead + ?Sized> {
    store: &'s S,
    next: u32,
    detector: ChainLoopDetector,
    failed: bool,
}

impl<'s, S: BlockRead + ?Sized> ChainBlocks<'s, S> {
    pub fn new(store: &'s S, start: u32) -> Self {
        ChainBlocks {
            store,
            next: start,
            detector: store.new_loop_detector(),
            failed: false,
        }
    }

    fn step(&mut self) -> Result<Vec<u8>> {
        let current = self.next;
        if is_reserved(current) {
            return Err(CfbError::InvalidBlockIndex(current));
        }
        self.detector.claim(current)?;
        self.next = self.store.successor(current)?;
        self.store.read_block(current)
    }
}

impl<S: BlockRead + ?Sized> Iterator for ChainBlocks<'_, S> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next == END_OF_CHAIN {
            return None;
        }

        let item = self.step();
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}

/// Read a chain into memory, truncated to `len` bytes when given
pub fn read_chain<S: BlockRead + ?Sized>(
    store: &S,
    start: u32,
    len: Option<usize>,
) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    for block in ChainBlocks::new(store, start) {
        data.extend_from_slice(&block?);
        if len.is_some_and(|len| data.len() >= len) {
            break;
        }
    }

    if let Some(len) = len {
        data.truncate(len);
    }
    Ok(data)
}

/// A chain in a mutable store
pub struct ChainStream<'s, S: BlockStore + ?Sized> {
    store: &'s mut S,
    start: u32,
}

impl<'s, S: BlockStore + ?Sized> ChainStream<'s, S> {
    /// Stream over an existing chain
    pub fn new(store: &'s mut S, start: u32) -> Self {
        ChainStream { store, start }
    }

    /// Stream with no blocks yet
    pub fn empty(store: &'s mut S) -> Self {
        ChainStream {
            store,
            start: END_OF_CHAIN,
        }
    }

    /// First block, or `END_OF_CHAIN` for an empty stream
    pub fn first_block(&self) -> u32 {
        self.start
    }

    pub fn blocks(&self) -> ChainBlocks<'_, S> {
        ChainBlocks::new(&*self.store, self.start)
    }

    pub fn block_indices(&self) -> Result<Vec<u32>> {
        crate::allocator::chain_indices(&*self.store, self.start)
    }

    pub fn read_all(&self, len: Option<usize>) -> Result<Vec<u8>> {
        read_chain(&*self.store, self.start, len)
    }

    /// Replace the stream's contents with `data`
    ///
    /// Existing blocks are rewritten in place, extra blocks are allocated when
    /// the chain runs out, and blocks left over from a longer previous chain
    /// are freed. Returns the (possibly new) first block.
    pub fn overwrite(&mut self, data: &[u8]) -> Result<u32> {
        self.write_chain(data, None)
    }

    /// Like [`ChainStream::overwrite`], filling the tail of the last block with `fill`
    pub fn overwrite_padded(&mut self, data: &[u8], fill: u8) -> Result<u32> {
        self.write_chain(data, Some(fill))
    }

    fn write_chain(&mut self, data: &[u8], fill: Option<u8>) -> Result<u32> {
        let block_size = self.store.block_size();
        let mut detector = self.store.new_loop_detector();

        let mut previous = END_OF_CHAIN;
        let mut next = self.start;
        let mut reused = 0usize;
        let mut allocated = 0usize;

        for chunk in data.chunks(block_size) {
            let current = if next == END_OF_CHAIN {
                let fresh = self.store.allocate_free_block()?;
                detector.claim(fresh)?;
                self.store.set_next_of(fresh, END_OF_CHAIN)?;
                if previous == END_OF_CHAIN {
                    self.start = fresh;
                } else {
                    self.store.set_next_of(previous, fresh)?;
                }
                self.store.ensure_block(fresh)?;
                allocated += 1;
                fresh
            } else {
                let existing = next;
                detector.claim(existing)?;
                next = self.store.successor(existing)?;
                reused += 1;
                existing
            };

            match fill {
                Some(byte) if chunk.len() < block_size => {
                    let mut padded = chunk.to_vec();
                    padded.resize(block_size, byte);
                    self.store.write_block(current, &padded)?;
                }
                _ => self.store.write_block(current, chunk)?,
            }
            previous = current;
        }

        // Release whatever the previous contents used beyond the new length
        let leftover = if previous == END_OF_CHAIN {
            let whole = self.start;
            self.start = END_OF_CHAIN;
            whole
        } else {
            self.store.set_next_of(previous, END_OF_CHAIN)?;
            next
        };
        let released = release_chain(&mut *self.store, leftover, &mut detector)?;

        debug!(
            "Stream overwrite: {} bytes, {} blocks reused, {} allocated, {} released",
            data.len(),
            reused,
            allocated,
            released
        );
        Ok(self.start)
    }

    /// Return every block of the chain to the store
    pub fn free(&mut self) -> Result<()> {
        let mut detector = self.store.new_loop_detector();
        release_chain(&mut *self.store, self.start, &mut detector)?;
        self.start = END_OF_CHAIN;
        Ok(())
    }
}

fn release_chain<S: BlockStore + ?Sized>(
    store: &mut S,
    start: u32,
    detector: &mut ChainLoopDetector,
) -> Result<usize> {
    let mut released = 0;
    let mut current = start;

    while current != END_OF_CHAIN {
        if is_reserved(current) {
            return Err(CfbError::InvalidBlockIndex(current));
        }
        detector.claim(current)?;
        let next = store.successor(current)?;
        store.set_next_of(current, UNUSED_BLOCK)?;
        released += 1;
        current = next;
    }

    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{MainStore, MiniState, MiniStore, MiniView};
    use crate::header::BlockSize;
    use crate::io::Medium;

    fn store() -> MainStore {
        MainStore::create(Medium::memory(), BlockSize::Small).unwrap()
    }

    #[test]
    fn test_write_and_read_chain() {
        let mut main = store();
        let data: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();

        let mut stream = ChainStream::empty(&mut main);
        let start = stream.overwrite(&data).unwrap();
        assert_eq!(stream.block_indices().unwrap().len(), 3);
        assert_eq!(stream.read_all(Some(data.len())).unwrap(), data);

        let blocks: Vec<_> = stream.blocks().collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(start, 2);
    }

    #[test]
    fn test_overwrite_reuses_blocks() {
        let mut main = store();
        let mut stream = ChainStream::empty(&mut main);
        stream.overwrite(&[1u8; 2048]).unwrap();
        let before = stream.block_indices().unwrap();

        stream.overwrite(&[2u8; 2048]).unwrap();
        assert_eq!(stream.block_indices().unwrap(), before);
        assert_eq!(stream.read_all(None).unwrap(), vec![2u8; 2048]);
    }

    #[test]
    fn test_overwrite_trims_leftover() {
        let mut main = store();
        let free_before = main.free_block_count();

        let start = {
            let mut stream = ChainStream::empty(&mut main);
            stream.overwrite(&[1u8; 512 * 5]).unwrap();
            stream.overwrite(&[3u8; 700]).unwrap()
        };

        assert_eq!(main.free_block_count(), free_before - 2);
        assert_eq!(crate::allocator::chain_indices(&main, start).unwrap().len(), 2);
    }

    #[test]
    fn test_overwrite_empty_frees_everything() {
        let mut main = store();
        let free_before = main.free_block_count();

        let mut stream = ChainStream::empty(&mut main);
        stream.overwrite(&[9u8; 3000]).unwrap();
        assert_eq!(stream.overwrite(&[]).unwrap(), END_OF_CHAIN);
        assert_eq!(stream.first_block(), END_OF_CHAIN);
        assert_eq!(main.free_block_count(), free_before);
    }

    #[test]
    fn test_padded_tail() {
        let mut main = store();
        let start = ChainStream::empty(&mut main)
            .overwrite_padded(b"abc", 0xFF)
            .unwrap();

        let block = main.read_block(start).unwrap();
        assert_eq!(&block[..3], b"abc");
        assert!(block[3..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_loop_is_detected() {
        let mut main = store();
        let start = ChainStream::empty(&mut main).overwrite(&[0u8; 1536]).unwrap();
        let indices = crate::allocator::chain_indices(&main, start).unwrap();

        // Point the last block back at the first
        main.set_next_of(indices[2], indices[0]).unwrap();

        let results: Vec<_> = ChainBlocks::new(&main, start).collect();
        assert_eq!(results.len(), 4);
        assert!(matches!(
            results[3],
            Err(CfbError::ChainLoop { block }) if block == indices[0]
        ));
        assert!(matches!(
            read_chain(&main, start, None),
            Err(CfbError::ChainLoop { .. })
        ));
        assert!(ChainStream::new(&mut main, start).free().is_err());
    }

    #[test]
    fn test_mini_chain() {
        let mut main = store();
        let mut state = MiniState::new();
        let data: Vec<u8> = (0..200u8).collect();

        let start = {
            let mut mini = MiniStore::new(&mut main, &mut state);
            ChainStream::empty(&mut mini).overwrite(&data).unwrap()
        };

        let view = MiniView::new(&main, &state);
        assert_eq!(read_chain(&view, start, Some(200)).unwrap(), data);
        assert_eq!(crate::allocator::chain_indices(&view, start).unwrap(), vec![0, 1, 2, 3]);
    }
}
