/// File-backed MFS storage.
mod file;
/// Memory-backed MFS storage.
mod memory;
/// The MFS storage abstraction.
mod mfs_storage;

pub use file::*;
pub use memory::*;
pub use mfs_storage::*;
