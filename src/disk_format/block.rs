use std::mem::size_of;

/// size of a block in bytes
pub const BLOCK_SIZE: usize = 4096;

pub type Block = [u8; BLOCK_SIZE];
const_assert!(size_of::<Block>() == BLOCK_SIZE);

/// A block filled with zeroes.
pub const EMPTY_BLOCK: Block = [0; BLOCK_SIZE];

/// Number of allocation bits one bitmap block holds.
pub const BITS_PER_BLOCK: usize = BLOCK_SIZE * 8;
