//! Read-only diagnostics over the allocator's state.
//!
//! Nothing here mutates the arena. [`collect`] reports the free list the
//! way the allocator sees it, in list order; [`walk`] re-derives the whole
//! partition from the headers alone, in address order, which is also what
//! the invariant tests lean on.

use std::fmt;

use crate::{
    arena::Arena,
    error::Result,
    freelist::FreeList,
    header::{AllocHeader, BlockTag, FreeHeader, ALLOC_HEADER_SIZE},
    Offset,
};

/// One free block as reported by [`crate::ArenaAllocator::stats`], in list
/// order starting at the head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeBlockStat {
    /// Arena offset of the block.
    pub offset: Offset,
    /// Block size in bytes, header included.
    pub size: u32,
    /// Offset of the previous free block in list order.
    pub prev: Offset,
    /// Offset of the next free block in list order.
    pub next: Offset,
}

/// One block of the arena partition, in address order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockStat {
    /// Arena offset of the block.
    pub offset: Offset,
    /// Block size in bytes, header included.
    pub size: u32,
    /// Whether the block is on the free list.
    pub free: bool,
}

/// Snapshot of the free list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaStats {
    /// Arena capacity in bytes.
    pub capacity: u32,
    /// Every free block, in list order.
    pub free_blocks: Vec<FreeBlockStat>,
    /// Sum of all free block sizes, headers included.
    pub total_free: u32,
    /// Usable payload of the largest free block, or 0 when none is left.
    pub largest_free_payload: u32,
}

/// Builds an [`ArenaStats`] snapshot from the free list.
pub(crate) fn collect(arena: &Arena, free: &FreeList) -> Result<ArenaStats> {
    let mut free_blocks = Vec::new();
    let mut total_free = 0;
    let mut largest = 0;

    for block in free.blocks(arena) {
        let (offset, header) = block?;

        largest = largest.max(header.size);
        total_free += header.size;
        free_blocks.push(FreeBlockStat {
            offset,
            size: header.size,
            prev: header.prev,
            next: header.next,
        });
    }

    Ok(ArenaStats {
        capacity: arena.capacity(),
        free_blocks,
        total_free,
        largest_free_payload: largest.saturating_sub(ALLOC_HEADER_SIZE),
    })
}

/// Walks the partition block by block from offset 0. Each header's size
/// points at the next header, so this visits every block exactly once, or
/// reports corruption when a header does not decode.
pub(crate) fn walk(arena: &Arena) -> Result<Vec<BlockStat>> {
    let mut blocks = Vec::new();
    let mut offset = 0;

    while offset < arena.capacity() {
        let (size, free) = match BlockTag::load(arena, offset)? {
            BlockTag::Free => (FreeHeader::load(arena, offset)?.size, true),
            BlockTag::Allocated => (AllocHeader::load(arena, offset)?.size, false),
        };

        blocks.push(BlockStat { offset, size, free });
        offset += size;
    }

    Ok(blocks)
}

impl fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (counter, block) in self.free_blocks.iter().enumerate() {
            writeln!(
                f,
                "free block {} at offset {}, size {}, prev {}, next {}",
                counter + 1,
                block.offset,
                block.size,
                block.prev,
                block.next,
            )?;
        }
        write!(
            f,
            "largest available capacity is {} bytes ({} free in {} blocks of {})",
            self.largest_free_payload,
            self.total_free,
            self.free_blocks.len(),
            self.capacity,
        )
    }
}
