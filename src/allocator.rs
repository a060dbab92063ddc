//! Set-only bitmap allocation for inodes and data blocks.

use anyhow::{ensure, Result};
use bitvec::prelude::*;
use log::{debug, trace};

use crate::disk_format::block::BLOCK_SIZE;
use crate::error::FsError;
use crate::mfs::BlockNumber;
use crate::storage::MfsStorage;

const WORD_SIZE: usize = std::mem::size_of::<u32>();

/// Hands out indices from one on-disk bitmap.
///
/// Allocation advances a high-water mark, so an index is never handed out twice. Released
/// indices stay marked as used unless reclamation is enabled.
pub struct BitmapAllocator {
    /// What the bitmap tracks, for error messages.
    what: &'static str,
    /// First block of the bitmap region.
    start: BlockNumber,
    /// Number of allocatable indices.
    capacity: usize,
    /// A value of `true` represents "occupied".
    bits: BitVec<u32, Msb0>,
    high_water: Option<usize>,
    reclaim: bool,
    released: Vec<usize>,
}

impl BitmapAllocator {
    /// Reads `len` blocks of bitmap starting at `start`.
    pub fn load<S: MfsStorage>(
        storage: &S,
        what: &'static str,
        start: BlockNumber,
        len: usize,
        capacity: usize,
    ) -> Result<Self> {
        let mut words = Vec::with_capacity(len * BLOCK_SIZE / WORD_SIZE);
        for block_number in start..start + len {
            let block = storage.read_block(block_number)?;
            words.extend(block.chunks_exact(WORD_SIZE).map(|word| {
                u32::from_le_bytes(word.try_into().expect("chunks are exactly one word long"))
            }));
        }

        let bits = BitVec::from_vec(words);
        ensure!(
            bits.len() >= capacity,
            "{what} bitmap is too small for {capacity} entries"
        );

        // `last_one` is not safe to call on a slice with no bits set
        let used = &bits[..capacity];
        let high_water = if used.any() { used.last_one() } else { None };
        debug!("{what} bitmap loaded, high-water mark {high_water:?}");

        Ok(Self {
            what,
            start,
            capacity,
            bits,
            high_water,
            reclaim: false,
            released: vec![],
        })
    }

    /// Enables or disables reuse of released indices. Holes below the high-water mark become
    /// reusable when enabled.
    #[must_use]
    pub fn with_reclamation(mut self, enabled: bool) -> Self {
        let mut holes: Vec<usize> = match (enabled, self.high_water) {
            (true, Some(high_water)) => self.bits[..high_water].iter_zeros().collect(),
            _ => vec![],
        };
        // lowest hole is reused first
        holes.reverse();

        self.reclaim = enabled;
        self.released = holes;
        self
    }

    pub fn is_allocated(&self, index: usize) -> bool {
        index < self.capacity && self.bits[index]
    }

    /// The highest index handed out so far.
    pub fn high_water(&self) -> Option<usize> {
        self.high_water
    }

    pub fn allocate<S: MfsStorage>(&mut self, storage: &S) -> Result<usize> {
        let index = match self.released.pop() {
            Some(index) => index,
            None => {
                let next = self.high_water.map_or(0, |high_water| high_water + 1);
                ensure!(next < self.capacity, FsError::ResourceExhausted(self.what));
                self.high_water = Some(next);
                next
            }
        };

        // a bit may already be set if the image was written by something else; setting it
        // again is harmless
        self.mark(storage, index, true)?;
        trace!("allocated {} {index}", self.what);

        Ok(index)
    }

    /// Gives `index` back. A no-op unless reclamation is enabled.
    pub fn release<S: MfsStorage>(&mut self, storage: &S, index: usize) -> Result<()> {
        if !self.reclaim {
            trace!("{} {index} stays allocated", self.what);
            return Ok(());
        }

        ensure!(self.is_allocated(index), FsError::NotFound);
        self.mark(storage, index, false)?;
        self.released.push(index);

        Ok(())
    }

    /// Updates one bit and writes the word that holds it back to disk.
    fn mark<S: MfsStorage>(&mut self, storage: &S, index: usize, value: bool) -> Result<()> {
        self.bits.set(index, value);

        let word_index = index / u32::BITS as usize;
        let word = self.bits.as_raw_slice()[word_index];

        let position = word_index * WORD_SIZE;
        let block_number = self.start + position / BLOCK_SIZE;
        let offset = position % BLOCK_SIZE;

        let mut block = storage.read_block(block_number)?;
        block[offset..offset + WORD_SIZE].copy_from_slice(&word.to_le_bytes());
        storage.write_block(block_number, block)
    }
}
