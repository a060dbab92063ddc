use anyhow::Result;

use crate::disk_format::block::Block;
use crate::mfs::BlockNumber;

pub trait MfsStorage {
    fn read_block(&self, block_number: BlockNumber) -> Result<Block>;

    fn write_block(&self, block_number: BlockNumber, block: Block) -> Result<()>;

    /// Forces written blocks to persistent storage.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
