#[macro_use]
pub mod disk_format;

pub mod allocator;
pub mod client;
pub mod error;
pub mod mfs;
pub mod mkfs;
pub mod protocol;
pub mod scope;
pub mod server;
pub mod storage;
pub mod transport;
