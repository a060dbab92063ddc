use std::mem::size_of;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::error::FsError;
use crate::mfs::{BlockNumber, InodeNumber};

use super::block::BLOCK_SIZE;

pub const INODE_SIZE: usize = 128;
const_assert!(size_of::<Inode>() == INODE_SIZE);

pub const DIRECT_PTRS: usize = 30;

const_assert!(BLOCK_SIZE % INODE_SIZE == 0);
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// The largest size any inode can reach through its direct pointers.
pub const MAX_FILE_SIZE: usize = DIRECT_PTRS * BLOCK_SIZE;

/// Marks a direct pointer that has no block behind it.
pub const UNALLOCATED: i32 = -1;

pub const ROOT_INODE: InodeNumber = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Inode {
    /// file type (directory or regular)
    pub type_: InodeType,
    /// file size in bytes
    pub size: i32,
    /// absolute block numbers of the data blocks, [`UNALLOCATED`] when unused
    pub direct: [i32; DIRECT_PTRS],
}

impl Inode {
    /// A zero-sized inode with no blocks.
    pub const fn new(type_: InodeType) -> Inode {
        Inode {
            type_,
            size: 0,
            direct: [UNALLOCATED; DIRECT_PTRS],
        }
    }

    /// The size in bytes. Negative sizes on disk read as empty.
    pub fn len(&self) -> usize {
        self.size.max(0) as usize
    }

    /// The block behind direct pointer `n`, if one is allocated.
    pub fn block(&self, n: usize) -> Option<BlockNumber> {
        match self.direct.get(n) {
            Some(&b) if b >= 0 => Some(b as BlockNumber),
            _ => None,
        }
    }

    /// The allocated blocks, in direct pointer order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockNumber> + '_ {
        (0..DIRECT_PTRS).filter_map(|n| self.block(n))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(i32)]
pub enum InodeType {
    /// This inode describes a directory.
    Directory = 0,
    /// This inode describes a regular data file.
    Regular = 1,
}

impl TryFrom<i32> for InodeType {
    type Error = FsError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(InodeType::Directory),
            1 => Ok(InodeType::Regular),
            _ => Err(FsError::InvalidArgument("unknown inode type")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_size() {
        let inode = Inode::new(InodeType::Regular);
        assert_eq!(bincode::serialize(&inode).unwrap().len(), INODE_SIZE);
    }

    #[test]
    fn test_layout_matches_c_struct() {
        let mut inode = Inode::new(InodeType::Regular);
        inode.size = 6;
        inode.direct[0] = 9;

        let bytes = bincode::serialize(&inode).unwrap();
        assert_eq!(bytes[0..4], 1i32.to_le_bytes());
        assert_eq!(bytes[4..8], 6i32.to_le_bytes());
        assert_eq!(bytes[8..12], 9i32.to_le_bytes());
        assert_eq!(bytes[12..16], [0xff; 4]);
    }

    #[test]
    fn test_blocks_skip_unallocated() {
        let mut inode = Inode::new(InodeType::Directory);
        inode.direct[0] = 4;
        inode.direct[2] = 7;

        assert_eq!(inode.block(0), Some(4));
        assert_eq!(inode.block(1), None);
        assert_eq!(inode.block(DIRECT_PTRS), None);
        assert_eq!(inode.blocks().collect::<Vec<_>>(), vec![4, 7]);
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(InodeType::try_from(0).unwrap(), InodeType::Directory);
        assert_eq!(InodeType::try_from(1).unwrap(), InodeType::Regular);
        assert!(InodeType::try_from(2).is_err());
    }
}
