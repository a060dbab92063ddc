use std::{
    fmt::{self, Debug},
    hash::{Hash, Hasher},
    mem::size_of,
};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::FsError;
use crate::mfs::InodeNumber;

use super::block::{Block, BLOCK_SIZE};

/// The number of bytes occupied by a directory entry.
pub const DIRECTORY_ENTRY_SIZE: usize = 32;
const_assert!(size_of::<DirectoryEntry>() == DIRECTORY_ENTRY_SIZE);

const_assert!(BLOCK_SIZE % DIRECTORY_ENTRY_SIZE == 0);
/// The number of directory entries that fit in a block.
pub const DIRECTORY_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIRECTORY_ENTRY_SIZE;

/// The maximum supported size of a file or directory name. Names of exactly this length are
/// stored without a nul-terminator.
pub const MAX_NAME_LEN: usize = 28;
const_assert!(size_of::<DirectoryEntryName>() == MAX_NAME_LEN);

/// The inode number stored in a free (tombstoned) slot.
pub const FREE_INUM: i32 = -1;

/// A free directory entry.
pub const TOMBSTONE: DirectoryEntry = DirectoryEntry {
    name: DirectoryEntryName([0; MAX_NAME_LEN]),
    inum: FREE_INUM,
};

/// A directory entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(C)]
pub struct DirectoryEntry {
    /// The name of the entry.
    pub name: DirectoryEntryName,
    /// The inode number, or [`FREE_INUM`].
    pub inum: i32,
}

impl DirectoryEntry {
    /// Constructs a new [`DirectoryEntry`] instance.
    pub fn new(inum: InodeNumber, name: DirectoryEntryName) -> DirectoryEntry {
        DirectoryEntry {
            name,
            inum: inum as i32,
        }
    }

    pub fn is_free(&self) -> bool {
        self.inum < 0
    }
}

/// A name, as used in [`DirectoryEntry`]. Names compare up to the first nul, so bytes left
/// after it by other writers are ignored.
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
#[repr(C)]
pub struct DirectoryEntryName([u8; MAX_NAME_LEN]);

impl DirectoryEntryName {
    pub const DOT: DirectoryEntryName = DirectoryEntryName::from_literal(".");
    pub const DOT_DOT: DirectoryEntryName = DirectoryEntryName::from_literal("..");

    const fn from_literal(name: &str) -> DirectoryEntryName {
        let bytes = name.as_bytes();
        let mut converted = [0; MAX_NAME_LEN];
        let mut i = 0;
        while i < bytes.len() {
            converted[i] = bytes[i];
            i += 1;
        }
        DirectoryEntryName(converted)
    }

    /// Wraps raw bytes as they appear on disk or on the wire.
    pub const fn from_raw(raw: [u8; MAX_NAME_LEN]) -> DirectoryEntryName {
        DirectoryEntryName(raw)
    }

    pub const fn into_raw(self) -> [u8; MAX_NAME_LEN] {
        self.0
    }

    /// The name bytes up to the first nul.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        &self.0[..len]
    }

    pub fn is_dot_or_dot_dot(&self) -> bool {
        *self == Self::DOT || *self == Self::DOT_DOT
    }
}

impl PartialEq for DirectoryEntryName {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for DirectoryEntryName {}

impl Hash for DirectoryEntryName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl Debug for DirectoryEntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DirectoryEntryName")
            .field(&String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

impl TryFrom<&str> for DirectoryEntryName {
    type Error = FsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let bytes = value.as_bytes();
        if bytes.is_empty() {
            return Err(FsError::InvalidArgument("name is empty"));
        }
        if bytes.len() > MAX_NAME_LEN {
            return Err(FsError::InvalidArgument("name is more than 28 bytes long"));
        }
        if bytes.contains(&0) {
            return Err(FsError::InvalidArgument("name contains a nul byte"));
        }

        let mut converted = [0; MAX_NAME_LEN];
        converted[0..bytes.len()].copy_from_slice(bytes);

        Ok(DirectoryEntryName(converted))
    }
}

impl fmt::Display for DirectoryEntryName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Ok(string) = std::str::from_utf8(self.as_bytes()) else {
            return Err(fmt::Error);
        };

        write!(f, "{string}")
    }
}

/// Parses every slot of a directory block, tombstones included.
pub fn parse_entries(block: &Block) -> Result<Vec<DirectoryEntry>> {
    block
        .chunks_exact(DIRECTORY_ENTRY_SIZE)
        .map(bincode::deserialize::<DirectoryEntry>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| err.into())
}

/// Serializes a block's worth of entries. Missing trailing slots are written as tombstones.
pub fn serialize_entries(entries: &[DirectoryEntry]) -> Result<Block> {
    let mut block = [0; BLOCK_SIZE];
    let slots = block.chunks_exact_mut(DIRECTORY_ENTRY_SIZE);

    for (i, slot) in slots.enumerate() {
        let entry = entries.get(i).unwrap_or(&TOMBSTONE);
        slot.copy_from_slice(&bincode::serialize(entry)?);
    }

    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_size() {
        let entry = DirectoryEntry::new(3, "a.txt".try_into().unwrap());
        let bytes = bincode::serialize(&entry).unwrap();

        assert_eq!(bytes.len(), DIRECTORY_ENTRY_SIZE);
        assert_eq!(&bytes[..5], b"a.txt");
        assert_eq!(bytes[28..], 3i32.to_le_bytes());
    }

    #[test]
    fn test_name_limits() {
        assert!(DirectoryEntryName::try_from("").is_err());
        assert!(DirectoryEntryName::try_from("a\0b").is_err());
        assert!(DirectoryEntryName::try_from("x".repeat(29).as_str()).is_err());

        let longest = "x".repeat(MAX_NAME_LEN);
        let name = DirectoryEntryName::try_from(longest.as_str()).unwrap();
        assert_eq!(name.as_bytes().len(), MAX_NAME_LEN);
        assert_eq!(name.to_string(), longest);
    }

    #[test]
    fn test_dot_names() {
        assert_eq!(DirectoryEntryName::try_from(".").unwrap(), DirectoryEntryName::DOT);
        assert_eq!(
            DirectoryEntryName::try_from("..").unwrap(),
            DirectoryEntryName::DOT_DOT
        );
        assert!(DirectoryEntryName::DOT_DOT.is_dot_or_dot_dot());
        assert!(!DirectoryEntryName::try_from("...").unwrap().is_dot_or_dot_dot());
    }

    #[test]
    fn test_bytes_after_nul_are_ignored() {
        let mut raw = [0xaa; MAX_NAME_LEN];
        raw[0] = b'.';
        raw[1] = 0;
        let dot = DirectoryEntryName::from_raw(raw);

        assert_eq!(dot, DirectoryEntryName::DOT);
        assert!(dot.is_dot_or_dot_dot());

        raw[1] = b'.';
        raw[2] = 0;
        assert_eq!(DirectoryEntryName::from_raw(raw), DirectoryEntryName::DOT_DOT);
        assert_ne!(DirectoryEntryName::from_raw(raw), DirectoryEntryName::DOT);
    }

    #[test]
    fn test_block_pads_with_tombstones() {
        let entries = [DirectoryEntry::new(0, DirectoryEntryName::DOT)];
        let block = serialize_entries(&entries).unwrap();
        let parsed = parse_entries(&block).unwrap();

        assert_eq!(parsed.len(), DIRECTORY_ENTRIES_PER_BLOCK);
        assert_eq!(parsed[0], entries[0]);
        assert!(parsed[1..].iter().all(|entry| *entry == TOMBSTONE));
    }
}
