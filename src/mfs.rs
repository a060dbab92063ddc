use anyhow::{anyhow, ensure, Context, Result};
use log::{debug, info};

use crate::{
    allocator::BitmapAllocator,
    disk_format::{
        block::{Block, BLOCK_SIZE, EMPTY_BLOCK},
        directory_entry::{
            parse_entries, serialize_entries, DirectoryEntry, DirectoryEntryName,
            DIRECTORY_ENTRIES_PER_BLOCK, DIRECTORY_ENTRY_SIZE, TOMBSTONE,
        },
        inode::{Inode, InodeType, DIRECT_PTRS, INODE_SIZE, MAX_FILE_SIZE, ROOT_INODE},
        superblock::{Superblock, SUPERBLOCK_BLOCK_NUMBER, SUPERBLOCK_SIZE},
    },
    error::FsError,
    scope::{Scope, Step},
    storage::MfsStorage,
};

// inode numbers are stored as `i32`s on the disk and on the wire, where -1 means "none", but
// we use `u32`s for logical accuracy
pub type InodeNumber = u32;

// block numbers are stored as `i32`s on the disk, but we use `usize`s to avoid littering
// the code with casts.
pub type BlockNumber = usize;

/// What `stat` reports about an inode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stat {
    pub type_: InodeType,
    pub size: usize,
}

/// The outcome of [`Mfs::create`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Created {
    /// A new inode was allocated and linked.
    New(InodeNumber),
    /// The name was already taken. Nothing was allocated.
    Existing(InodeNumber),
}

impl Created {
    pub fn inum(self) -> InodeNumber {
        match self {
            Created::New(inum) | Created::Existing(inum) => inum,
        }
    }
}

/// Where a live directory entry sits.
struct Slot {
    inum: InodeNumber,
    block_number: BlockNumber,
    /// Byte offset of the entry within the directory's contents.
    offset: usize,
}

/// Reads and validates the superblock.
pub fn load_superblock<S: MfsStorage>(storage: &S) -> Result<Superblock> {
    let block = storage.read_block(SUPERBLOCK_BLOCK_NUMBER)?;
    let superblock: Superblock = bincode::deserialize(&block[..SUPERBLOCK_SIZE])
        .context("unable to parse superblock")?;

    superblock.validate().context("invalid superblock")?;

    Ok(superblock)
}

/// A filesystem image: superblock, allocation bitmaps, inode table and data region.
pub struct Mfs<S: MfsStorage> {
    pub storage: S,
    superblock: Superblock,
    inode_bitmap: BitmapAllocator,
    data_bitmap: BitmapAllocator,
}

impl<S: MfsStorage> Mfs<S> {
    pub fn load(storage: S) -> Result<Self> {
        let superblock = load_superblock(&storage)?;

        let inode_bitmap = BitmapAllocator::load(
            &storage,
            "inode table",
            superblock.inode_bitmap_addr as usize,
            superblock.inode_bitmap_len as usize,
            superblock.num_inodes as usize,
        )?;
        let data_bitmap = BitmapAllocator::load(
            &storage,
            "data region",
            superblock.data_bitmap_addr as usize,
            superblock.data_bitmap_len as usize,
            superblock.data_region_len as usize,
        )?;

        // check that the last block is accessible
        let _ = storage
            .read_block(superblock.num_blocks() - 1)
            .context("image is shorter than its superblock describes")?;

        let mfs = Self {
            storage,
            superblock,
            inode_bitmap,
            data_bitmap,
        };

        let root = mfs
            .read_inode(ROOT_INODE)
            .context("root inode is not allocated")?;
        ensure!(
            root.type_ == InodeType::Directory,
            "root inode does not represent a directory"
        );

        info!("{} total inodes", superblock.num_inodes);
        info!("{} total data blocks", superblock.data_region_len);

        Ok(mfs)
    }

    /// Lets unlinked inodes and their blocks be handed out again. Off by default.
    #[must_use]
    pub fn with_reclamation(mut self, enabled: bool) -> Self {
        self.inode_bitmap = self.inode_bitmap.with_reclamation(enabled);
        self.data_bitmap = self.data_bitmap.with_reclamation(enabled);
        self
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn allocate_inode(&mut self, type_: InodeType) -> Result<InodeNumber> {
        let inum = self.inode_bitmap.allocate(&self.storage)? as InodeNumber;
        self.write_inode(inum, Inode::new(type_))?;

        debug!("[inode #{inum}] allocated as {type_:?}");
        Ok(inum)
    }

    pub fn allocate_data_block(&mut self) -> Result<BlockNumber> {
        let index = self.data_bitmap.allocate(&self.storage)?;
        Ok(self.superblock.data_region_addr as usize + index)
    }

    pub fn read_inode(&self, inum: InodeNumber) -> Result<Inode> {
        ensure!(
            self.inode_bitmap.is_allocated(inum as usize),
            FsError::NotFound
        );

        let (block_number, offset) = self.inode_location(inum);
        let block = self.storage.read_block(block_number)?;
        let inode = &block[offset..offset + INODE_SIZE];

        bincode::deserialize(inode).with_context(|| format!("parsing inode {inum}"))
    }

    pub fn write_inode(&self, inum: InodeNumber, inode: Inode) -> Result<()> {
        ensure!(
            (inum as usize) < self.superblock.num_inodes as usize,
            FsError::InvalidArgument("inode number out of range")
        );

        let inode_serialized = bincode::serialize(&inode).context("serializing inode")?;

        let (block_number, offset) = self.inode_location(inum);
        let mut block = self.storage.read_block(block_number)?;
        block[offset..offset + INODE_SIZE].copy_from_slice(&inode_serialized);

        self.storage.write_block(block_number, block)
    }

    pub fn lookup(&self, parent_inum: InodeNumber, name: &str) -> Result<InodeNumber> {
        let name = DirectoryEntryName::try_from(name)?;
        let slot = self
            .find_entry(parent_inum, &name)?
            .ok_or(FsError::NotFound)?;

        Ok(slot.inum)
    }

    pub fn stat(&self, inum: InodeNumber) -> Result<Stat> {
        let inode = self.read_inode(inum)?;

        Ok(Stat {
            type_: inode.type_,
            size: inode.len(),
        })
    }

    pub fn create(
        &mut self,
        parent_inum: InodeNumber,
        type_: InodeType,
        name: &str,
    ) -> Result<Created> {
        info!("[inode #{parent_inum}] creating {type_:?} {name:?}");

        let name = DirectoryEntryName::try_from(name)?;
        if let Some(existing) = self.find_entry(parent_inum, &name)? {
            debug!("[inode #{parent_inum}] {name} already exists");
            return Ok(Created::Existing(existing.inum));
        }

        let parent_inode = self.read_inode(parent_inum)?;
        ensure!(
            parent_inode.len() + DIRECTORY_ENTRY_SIZE <= MAX_FILE_SIZE,
            FsError::ResourceExhausted("directory")
        );

        let mut scope = Scope::begin("create");

        let new_inum = scope.step(Step::AllocateInode, || self.allocate_inode(type_))?;

        if type_ == InodeType::Directory {
            let block_number = scope.step(Step::AllocateBlock, || self.allocate_data_block())?;
            scope.step(Step::SeedDirectory, || {
                self.seed_directory(new_inum, parent_inum, block_number)
            })?;
        }

        let new_entry = DirectoryEntry::new(new_inum, name);
        scope.step(Step::LinkEntry, || {
            self.append_directory_entry(parent_inum, &new_entry)
        })?;

        info!("[inode #{parent_inum}] linked {name} to inode #{new_inum}");
        Ok(Created::New(new_inum))
    }

    pub fn write_file(&mut self, inum: InodeNumber, offset: usize, data: &[u8]) -> Result<()> {
        self.write_contents(inum, offset, data, InodeType::Regular)
    }

    /// Reads `size` bytes at `offset`. The read is not clamped to the file size.
    pub fn read_file(&self, inum: InodeNumber, offset: usize, size: usize) -> Result<Vec<u8>> {
        info!("[inode #{inum}] reading file (offset = {offset}; size = {size})");

        ensure!(
            size <= BLOCK_SIZE,
            FsError::InvalidArgument("read is longer than a block")
        );
        let block_index = offset / BLOCK_SIZE;
        ensure!(
            block_index < DIRECT_PTRS,
            FsError::InvalidArgument("offset is past the last direct block")
        );

        let inode = self.read_inode(inum)?;

        let start_offset = offset % BLOCK_SIZE;
        let head_len = size.min(BLOCK_SIZE - start_offset);
        let spans_blocks = size > head_len;
        ensure!(
            !spans_blocks || block_index + 1 < DIRECT_PTRS,
            FsError::ResourceExhausted("direct block list")
        );

        let block = self.read_file_block(inum, inode, block_index)?;
        let mut data = block[start_offset..start_offset + head_len].to_vec();

        if spans_blocks {
            let block = self.read_file_block(inum, inode, block_index + 1)?;
            data.extend_from_slice(&block[..size - head_len]);
        }

        Ok(data)
    }

    pub fn unlink(&mut self, parent_inum: InodeNumber, name: &str) -> Result<()> {
        info!("[inode #{parent_inum}] unlinking {name:?}");

        let name = DirectoryEntryName::try_from(name)?;
        ensure!(
            !name.is_dot_or_dot_dot(),
            FsError::InvalidArgument("cannot unlink '.' or '..'")
        );

        let slot = self
            .find_entry(parent_inum, &name)?
            .ok_or(FsError::NotFound)?;

        let entry_inode = self.read_inode(slot.inum)?;
        if entry_inode.type_ == InodeType::Directory {
            ensure!(
                !self.has_entries(slot.inum, entry_inode)?,
                FsError::DirectoryNotEmpty
            );
        }

        let mut scope = Scope::begin("unlink");

        scope.step(Step::Tombstone, || {
            let data = bincode::serialize(&TOMBSTONE)?;
            self.write_range(slot.block_number, slot.offset % BLOCK_SIZE, &data)
        })?;
        scope.step(Step::ShrinkParent, || {
            self.shrink_directory(parent_inum, slot.offset)
        })?;
        scope.step(Step::Release, || self.release_inode(slot.inum, entry_inode))?;

        info!("[inode #{parent_inum}] unlinked {name} (inode #{})", slot.inum);
        Ok(())
    }

    /// Forces everything written so far to persistent storage.
    pub fn sync(&self) -> Result<()> {
        info!("syncing image");
        self.storage.sync()
    }

    fn inode_location(&self, inum: InodeNumber) -> (BlockNumber, usize) {
        let position = self.superblock.inode_position(inum as usize);
        (position / BLOCK_SIZE, position % BLOCK_SIZE)
    }

    /// Writes within at most two consecutive blocks. Every direct pointer up to the last
    /// block touched is allocated, even ones the write skips over.
    fn write_contents(
        &mut self,
        inum: InodeNumber,
        offset: usize,
        data: &[u8],
        expected: InodeType,
    ) -> Result<()> {
        info!(
            "[inode #{inum}] writing file (offset = {offset}; data.len() = {})",
            data.len()
        );

        ensure!(
            data.len() <= BLOCK_SIZE,
            FsError::InvalidArgument("write is longer than a block")
        );
        let block_index = offset / BLOCK_SIZE;
        ensure!(
            block_index < DIRECT_PTRS,
            FsError::InvalidArgument("offset is past the last direct block")
        );

        let mut inode = self.read_inode(inum)?;
        ensure!(inode.type_ == expected, FsError::TypeMismatch);

        let start_offset = offset % BLOCK_SIZE;
        let (head, tail) = data.split_at(data.len().min(BLOCK_SIZE - start_offset));
        let last_index = if tail.is_empty() {
            block_index
        } else {
            block_index + 1
        };
        ensure!(
            last_index < DIRECT_PTRS,
            FsError::ResourceExhausted("direct block list")
        );

        for n in 0..=last_index {
            if inode.block(n).is_none() {
                let block_number = self.allocate_data_block()?;
                self.storage
                    .write_block(block_number, Self::fresh_block(inode.type_)?)?;
                inode.direct[n] = block_number as i32;
                // recorded at once so a later exhaustion leaves no claimed block unowned
                self.write_inode(inum, inode)?;
                debug!("[inode #{inum}] direct[{n}] = block {block_number}");
            }
        }

        self.write_range(self.file_block_number(inum, inode, block_index)?, start_offset, head)?;
        if !tail.is_empty() {
            self.write_range(self.file_block_number(inum, inode, block_index + 1)?, 0, tail)?;
        }

        inode.size = inode.size.max((offset + data.len()) as i32);
        self.write_inode(inum, inode)?;

        info!("[inode #{inum}] wrote {} bytes", data.len());
        Ok(())
    }

    /// The initial contents of a block newly given to an inode of `type_`.
    fn fresh_block(type_: InodeType) -> Result<Block> {
        match type_ {
            InodeType::Directory => serialize_entries(&[]),
            InodeType::Regular => Ok(EMPTY_BLOCK),
        }
    }

    fn write_range(&self, block_number: BlockNumber, offset: usize, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut block = self.storage.read_block(block_number)?;
        block[offset..offset + data.len()].copy_from_slice(data);
        self.storage.write_block(block_number, block)
    }

    fn read_file_block(&self, inum: InodeNumber, inode: Inode, n: usize) -> Result<Block> {
        let block_number = self.file_block_number(inum, inode, n)?;
        self.storage.read_block(block_number)
    }

    fn file_block_number(&self, inum: InodeNumber, inode: Inode, n: usize) -> Result<BlockNumber> {
        inode
            .block(n)
            .ok_or(FsError::NotFound)
            .with_context(|| format!("inode #{inum} has no block {n}"))
    }

    fn read_directory_inode(&self, inum: InodeNumber) -> Result<Inode> {
        let inode = self.read_inode(inum)?;
        ensure!(inode.type_ == InodeType::Directory, FsError::TypeMismatch);
        Ok(inode)
    }

    /// The blocks holding a directory's entries, `ceil(size / BLOCK_SIZE)` of them.
    fn directory_block_numbers(&self, inum: InodeNumber, inode: Inode) -> Result<Vec<BlockNumber>> {
        (0..inode.len().div_ceil(BLOCK_SIZE))
            .map(|n| {
                inode
                    .block(n)
                    .ok_or_else(|| anyhow!("directory #{inum} is missing block {n}"))
            })
            .collect()
    }

    /// Scans every slot of every directory block for a live entry called `name`.
    fn find_entry(&self, parent_inum: InodeNumber, name: &DirectoryEntryName) -> Result<Option<Slot>> {
        let parent_inode = self.read_directory_inode(parent_inum)?;

        for (n, block_number) in self
            .directory_block_numbers(parent_inum, parent_inode)?
            .into_iter()
            .enumerate()
        {
            let block = self.storage.read_block(block_number)?;
            for (i, entry) in parse_entries(&block)?.into_iter().enumerate() {
                if !entry.is_free() && entry.name == *name {
                    return Ok(Some(Slot {
                        inum: entry.inum as InodeNumber,
                        block_number,
                        offset: n * BLOCK_SIZE + i * DIRECTORY_ENTRY_SIZE,
                    }));
                }
            }
        }

        Ok(None)
    }

    /// Whether a directory has live entries besides `.` and `..`.
    fn has_entries(&self, inum: InodeNumber, inode: Inode) -> Result<bool> {
        let valid_slots = inode.len() / DIRECTORY_ENTRY_SIZE;

        for (n, block_number) in self
            .directory_block_numbers(inum, inode)?
            .into_iter()
            .enumerate()
        {
            let block = self.storage.read_block(block_number)?;
            for (i, entry) in parse_entries(&block)?.into_iter().enumerate() {
                if n * DIRECTORY_ENTRIES_PER_BLOCK + i >= valid_slots {
                    return Ok(false);
                }
                if !entry.is_free() && !entry.name.is_dot_or_dot_dot() {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    fn seed_directory(
        &self,
        inum: InodeNumber,
        parent_inum: InodeNumber,
        block_number: BlockNumber,
    ) -> Result<()> {
        // a full block is written so that leftover bytes are never read as entries
        let entries = [
            DirectoryEntry::new(inum, DirectoryEntryName::DOT),
            DirectoryEntry::new(parent_inum, DirectoryEntryName::DOT_DOT),
        ];
        self.storage
            .write_block(block_number, serialize_entries(&entries)?)?;

        let mut inode = self.read_inode(inum)?;
        inode.direct[0] = block_number as i32;
        inode.size = (entries.len() * DIRECTORY_ENTRY_SIZE) as i32;
        self.write_inode(inum, inode)
    }

    fn append_directory_entry(&mut self, inum: InodeNumber, entry: &DirectoryEntry) -> Result<()> {
        let inode = self.read_inode(inum)?;
        let data = bincode::serialize(entry)?;
        self.write_contents(inum, inode.len(), &data, InodeType::Directory)
    }

    /// Drops the entry at `offset` from the directory's size if it was the last one.
    fn shrink_directory(&self, inum: InodeNumber, offset: usize) -> Result<()> {
        let mut inode = self.read_inode(inum)?;

        if offset + DIRECTORY_ENTRY_SIZE == inode.len() {
            inode.size = offset as i32;
            self.write_inode(inum, inode)?;
            debug!("[inode #{inum}] directory size trimmed to {offset}");
        }

        Ok(())
    }

    fn release_inode(&mut self, inum: InodeNumber, inode: Inode) -> Result<()> {
        let data_region_addr = self.superblock.data_region_addr as usize;

        for block_number in inode.blocks() {
            let index = block_number
                .checked_sub(data_region_addr)
                .with_context(|| format!("block {block_number} is outside the data region"))?;
            self.data_bitmap.release(&self.storage, index)?;
        }

        self.inode_bitmap.release(&self.storage, inum as usize)
    }
}
