/// Perform a const assertion.
macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    }
}

/// MFS blocks.
pub mod block;
/// Directory entries and entry names.
pub mod directory_entry;
/// Inodes.
pub mod inode;
/// The superblock describing the region layout.
pub mod superblock;
