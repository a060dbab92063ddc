use std::mem::size_of;

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

use super::{
    block::{BITS_PER_BLOCK, BLOCK_SIZE},
    inode::INODES_PER_BLOCK,
};

/// The number of bytes occupied by the superblock.
pub const SUPERBLOCK_SIZE: usize = 40;
const_assert!(size_of::<Superblock>() == SUPERBLOCK_SIZE);

/// The block that holds the superblock. The superblock occupies the first
/// [`SUPERBLOCK_SIZE`] bytes of that block.
pub const SUPERBLOCK_BLOCK_NUMBER: usize = 0;

/// The region layout of an image. Addresses and lengths count blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Superblock {
    pub inode_bitmap_addr: i32,
    pub inode_bitmap_len: i32,
    pub data_bitmap_addr: i32,
    pub data_bitmap_len: i32,
    pub inode_region_addr: i32,
    pub inode_region_len: i32,
    pub data_region_addr: i32,
    pub data_region_len: i32,
    pub num_inodes: i32,
    pub num_data: i32,
}

impl Superblock {
    /// Checks that the regions follow each other in order without overlapping and are large
    /// enough for the object counts they describe.
    pub fn validate(&self) -> Result<()> {
        let regions = [
            ("inode bitmap", self.inode_bitmap_addr, self.inode_bitmap_len),
            ("data bitmap", self.data_bitmap_addr, self.data_bitmap_len),
            ("inode table", self.inode_region_addr, self.inode_region_len),
            ("data region", self.data_region_addr, self.data_region_len),
        ];

        // block 0 belongs to the superblock
        let mut end = 1;
        for (name, addr, len) in regions {
            if len < 1 {
                bail!("invalid {name} length: {len}");
            }
            if addr < end {
                bail!("{name} at block {addr} overlaps the preceding region");
            }
            end = match addr.checked_add(len) {
                Some(end) => end,
                None => bail!("{name} runs past the addressable range"),
            };
        }

        ensure!(
            self.num_inodes >= 1,
            "invalid number of inodes: {}",
            self.num_inodes
        );
        ensure!(
            self.inode_bitmap_len as usize * BITS_PER_BLOCK >= self.num_inodes as usize,
            "inode bitmap is too small for {} inodes",
            self.num_inodes
        );
        ensure!(
            self.inode_region_len as usize * INODES_PER_BLOCK >= self.num_inodes as usize,
            "inode table is too small for {} inodes",
            self.num_inodes
        );
        ensure!(
            self.data_bitmap_len as usize * BITS_PER_BLOCK >= self.data_region_len as usize,
            "data bitmap is too small for {} blocks",
            self.data_region_len
        );

        Ok(())
    }

    /// The number of blocks the image spans.
    pub fn num_blocks(&self) -> usize {
        (self.data_region_addr + self.data_region_len) as usize
    }

    /// Byte position of inode `index` in the image.
    pub fn inode_position(&self, index: usize) -> usize {
        self.inode_region_addr as usize * BLOCK_SIZE + index * super::inode::INODE_SIZE
    }
}
