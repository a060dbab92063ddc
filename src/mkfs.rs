//! Creates empty images: a superblock, cleared bitmaps and a root directory.

use anyhow::{ensure, Context, Result};
use log::info;

use crate::allocator::BitmapAllocator;
use crate::disk_format::{
    block::{BITS_PER_BLOCK, BLOCK_SIZE, EMPTY_BLOCK},
    directory_entry::{
        serialize_entries, DirectoryEntry, DirectoryEntryName, DIRECTORY_ENTRY_SIZE,
    },
    inode::{Inode, InodeType, INODES_PER_BLOCK, INODE_SIZE, ROOT_INODE},
    superblock::{Superblock, SUPERBLOCK_BLOCK_NUMBER, SUPERBLOCK_SIZE},
};
use crate::storage::MfsStorage;

/// How many inodes and data blocks an image holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub num_inodes: usize,
    pub num_data: usize,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            num_inodes: 32,
            num_data: 32,
        }
    }
}

impl Geometry {
    /// Lays the regions out back to back after the superblock block.
    pub fn superblock(&self) -> Superblock {
        let inode_bitmap_len = self.num_inodes.div_ceil(BITS_PER_BLOCK).max(1);
        let data_bitmap_len = self.num_data.div_ceil(BITS_PER_BLOCK).max(1);
        let inode_region_len = self.num_inodes.div_ceil(INODES_PER_BLOCK).max(1);

        let inode_bitmap_addr = SUPERBLOCK_BLOCK_NUMBER + 1;
        let data_bitmap_addr = inode_bitmap_addr + inode_bitmap_len;
        let inode_region_addr = data_bitmap_addr + data_bitmap_len;
        let data_region_addr = inode_region_addr + inode_region_len;

        Superblock {
            inode_bitmap_addr: inode_bitmap_addr as i32,
            inode_bitmap_len: inode_bitmap_len as i32,
            data_bitmap_addr: data_bitmap_addr as i32,
            data_bitmap_len: data_bitmap_len as i32,
            inode_region_addr: inode_region_addr as i32,
            inode_region_len: inode_region_len as i32,
            data_region_addr: data_region_addr as i32,
            data_region_len: self.num_data as i32,
            num_inodes: self.num_inodes as i32,
            num_data: self.num_data as i32,
        }
    }

    /// The total number of blocks in the image.
    pub fn num_blocks(&self) -> usize {
        self.superblock().num_blocks()
    }
}

/// Writes an empty filesystem to `storage`, which must hold [`Geometry::num_blocks`] blocks.
pub fn format<S: MfsStorage>(storage: &S, geometry: Geometry) -> Result<Superblock> {
    ensure!(
        geometry.num_inodes >= 1 && geometry.num_data >= 1,
        "an image needs at least one inode and one data block"
    );
    ensure!(
        geometry.num_inodes <= i32::MAX as usize && geometry.num_data <= i32::MAX as usize,
        "geometry does not fit the on-disk format"
    );

    let superblock = geometry.superblock();
    superblock.validate()?;

    for block_number in 0..superblock.data_region_addr as usize {
        storage.write_block(block_number, EMPTY_BLOCK)?;
    }

    let mut block = EMPTY_BLOCK;
    block[..SUPERBLOCK_SIZE].copy_from_slice(&bincode::serialize(&superblock)?);
    storage.write_block(SUPERBLOCK_BLOCK_NUMBER, block)?;

    let mut inode_bitmap = BitmapAllocator::load(
        storage,
        "inode table",
        superblock.inode_bitmap_addr as usize,
        superblock.inode_bitmap_len as usize,
        geometry.num_inodes,
    )?;
    let mut data_bitmap = BitmapAllocator::load(
        storage,
        "data region",
        superblock.data_bitmap_addr as usize,
        superblock.data_bitmap_len as usize,
        geometry.num_data,
    )?;

    let root = inode_bitmap.allocate(storage)?;
    ensure!(root == ROOT_INODE as usize, "root inode must be inode 0");
    let root_block = superblock.data_region_addr as usize + data_bitmap.allocate(storage)?;

    let entries = [
        DirectoryEntry::new(ROOT_INODE, DirectoryEntryName::DOT),
        DirectoryEntry::new(ROOT_INODE, DirectoryEntryName::DOT_DOT),
    ];
    storage
        .write_block(root_block, serialize_entries(&entries)?)
        .context("writing root directory")?;

    let mut root_inode = Inode::new(InodeType::Directory);
    root_inode.direct[0] = root_block as i32;
    root_inode.size = (entries.len() * DIRECTORY_ENTRY_SIZE) as i32;

    let position = superblock.inode_position(root);
    let block_number = position / BLOCK_SIZE;
    let offset = position % BLOCK_SIZE;
    let mut block = storage.read_block(block_number)?;
    block[offset..offset + INODE_SIZE].copy_from_slice(&bincode::serialize(&root_inode)?);
    storage.write_block(block_number, block)?;

    storage.sync()?;

    info!(
        "formatted image: {} inodes, {} data blocks, {} blocks total",
        geometry.num_inodes,
        geometry.num_data,
        superblock.num_blocks()
    );

    Ok(superblock)
}

#[cfg(test)]
mod tests {
    use crate::storage::MemoryStorage;

    use super::*;

    #[test]
    fn test_default_layout() {
        let superblock = Geometry::default().superblock();

        assert_eq!(superblock.inode_bitmap_addr, 1);
        assert_eq!(superblock.data_bitmap_addr, 2);
        assert_eq!(superblock.inode_region_addr, 3);
        assert_eq!(superblock.inode_region_len, 1);
        assert_eq!(superblock.data_region_addr, 4);
        assert_eq!(Geometry::default().num_blocks(), 36);
    }

    #[test]
    fn test_inode_table_spans_blocks() {
        let geometry = Geometry {
            num_inodes: INODES_PER_BLOCK + 1,
            num_data: 4,
        };
        assert_eq!(geometry.superblock().inode_region_len, 2);
    }

    #[test]
    fn test_format_writes_superblock() {
        let geometry = Geometry::default();
        let storage = MemoryStorage::new(geometry.num_blocks());
        let written = format(&storage, geometry).unwrap();

        let block = storage.read_block(SUPERBLOCK_BLOCK_NUMBER).unwrap();
        let read: Superblock = bincode::deserialize(&block[..SUPERBLOCK_SIZE]).unwrap();
        assert_eq!(read, written);
        assert_eq!(storage.sync_count(), 1);
    }

    #[test]
    fn test_format_marks_root() {
        let geometry = Geometry::default();
        let storage = MemoryStorage::new(geometry.num_blocks());
        let superblock = format(&storage, geometry).unwrap();

        let inode_bitmap = storage
            .read_block(superblock.inode_bitmap_addr as usize)
            .unwrap();
        assert_eq!(inode_bitmap[..4], 0x8000_0000u32.to_le_bytes());

        let data_bitmap = storage
            .read_block(superblock.data_bitmap_addr as usize)
            .unwrap();
        assert_eq!(data_bitmap[..4], 0x8000_0000u32.to_le_bytes());
    }

    #[test]
    fn test_format_too_small_storage() {
        let storage = MemoryStorage::new(2);
        assert!(format(&storage, Geometry::default()).is_err());
    }

    #[test]
    fn test_format_empty_geometry() {
        let storage = MemoryStorage::new(8);
        let geometry = Geometry {
            num_inodes: 0,
            num_data: 4,
        };
        assert!(format(&storage, geometry).is_err());
    }
}
