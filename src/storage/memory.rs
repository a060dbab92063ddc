use std::cell::{Cell, RefCell};

use anyhow::{bail, Result};

use crate::disk_format::block::{Block, EMPTY_BLOCK};
use crate::mfs::BlockNumber;

use super::mfs_storage::MfsStorage;

/// An image held in memory.
pub struct MemoryStorage {
    blocks: RefCell<Vec<Block>>,
    syncs: Cell<usize>,
}

impl MemoryStorage {
    /// Constructs a zeroed image of `num_blocks` blocks.
    #[must_use]
    pub fn new(num_blocks: usize) -> Self {
        Self {
            blocks: RefCell::new(vec![EMPTY_BLOCK; num_blocks]),
            syncs: Cell::new(0),
        }
    }

    /// How many times [`MfsStorage::sync`] has been called.
    pub fn sync_count(&self) -> usize {
        self.syncs.get()
    }
}

impl MfsStorage for MemoryStorage {
    fn read_block(&self, block_number: BlockNumber) -> Result<Block> {
        match self.blocks.borrow().get(block_number) {
            Some(block) => Ok(*block),
            None => bail!("block number out of bounds: {block_number}"),
        }
    }

    fn write_block(&self, block_number: BlockNumber, block: Block) -> Result<()> {
        match self.blocks.borrow_mut().get_mut(block_number) {
            Some(slot) => *slot = block,
            None => bail!("block number out of bounds: {block_number}"),
        }

        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.syncs.set(self.syncs.get() + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::disk_format::block::BLOCK_SIZE;

    use super::*;

    #[test]
    fn test_new_image_is_zeroed() {
        let storage = MemoryStorage::new(2);
        assert_eq!(storage.read_block(1).unwrap(), EMPTY_BLOCK);
    }

    #[test]
    fn test_read_out_of_bounds_block() {
        let storage = MemoryStorage::new(2);
        assert!(storage.read_block(2).is_err());
        assert!(storage.write_block(2, EMPTY_BLOCK).is_err());
    }

    #[test]
    fn test_write_then_read() {
        let storage = MemoryStorage::new(2);
        storage.write_block(0, [0xfe; BLOCK_SIZE]).unwrap();

        assert_eq!(storage.read_block(0).unwrap(), [0xfe; BLOCK_SIZE]);
        assert_eq!(storage.read_block(1).unwrap(), EMPTY_BLOCK);
    }

    #[test]
    fn test_sync_is_counted() {
        let storage = MemoryStorage::new(1);
        storage.sync().unwrap();
        storage.sync().unwrap();
        assert_eq!(storage.sync_count(), 2);
    }
}
