use std::fs::File;
use std::os::unix::prelude::FileExt;

use anyhow::{Context, Result};

use crate::disk_format::block::{Block, BLOCK_SIZE};
use crate::mfs::BlockNumber;

use super::mfs_storage::MfsStorage;

pub struct FileBackedStorage(File);

impl FileBackedStorage {
    pub fn new(file: File) -> Self {
        FileBackedStorage(file)
    }
}

impl MfsStorage for FileBackedStorage {
    fn read_block(&self, block_number: BlockNumber) -> Result<Block> {
        let mut buf = [0; BLOCK_SIZE];
        let position = block_number * BLOCK_SIZE;

        self.0
            .read_exact_at(&mut buf, position as u64)
            .with_context(|| format!("reading block {block_number}"))?;

        Ok(buf)
    }

    fn write_block(&self, block_number: BlockNumber, block: Block) -> Result<()> {
        let position = block_number * BLOCK_SIZE;

        self.0
            .write_all_at(&block, position as u64)
            .with_context(|| format!("writing block {block_number}"))?;

        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.0.sync_all().context("syncing image file")
    }
}
