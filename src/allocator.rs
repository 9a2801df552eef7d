//! The operations layer: init, allocate, deallocate, shutdown.
//!
//! [`ArenaAllocator`] ties the arena, the free list and the fit strategy
//! together and is the only public way to mutate them. Allocation carves
//! blocks out of free ones, splitting when the remainder is big enough to
//! live on as a free block:
//!
//! **Before**, one free block, request rounds up to `actual` bytes:
//!
//! ```text
//! +--------+--------------------------------------+
//! | Header |               free                   |
//! +--------+--------------------------------------+
//! ```
//!
//! **After**, the first `actual` bytes are handed out and the rest becomes
//! a new free block that takes over the old one's list position:
//!
//! ```text
//! +--------+-----------+--------+-----------------+
//! | Header | allocated | Header |      free       |
//! +--------+-----------+--------+-----------------+
//!          ^
//!          +-- returned handle points here
//! ```
//!
//! Deallocation reverses this: the block is re-tagged, spliced back into
//! the offset-ordered list and coalesced with any physical neighbors.

use log::{debug, trace};

use crate::{
    align,
    arena::Arena,
    error::{AllocatorError, Result},
    fit::{Candidate, FitStrategy},
    freelist::FreeList,
    header::{
        self, AllocHeader, ALLOC_HEADER_SIZE, FREE_HEADER_SIZE, MAX_BLOCK_SIZE, MIN_PAYLOAD,
    },
    stats::{self, ArenaStats, BlockStat},
    Offset,
};

/// Handle to an allocated payload, addressing the byte right after the
/// block's header. Obtained from [`ArenaAllocator::allocate`] and given
/// back to [`ArenaAllocator::deallocate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(Offset);

impl Handle {
    /// Builds a handle from a raw payload offset. Nothing is validated
    /// here; [`ArenaAllocator::deallocate`] rejects handles that do not
    /// address a live allocation.
    pub fn from_offset(offset: Offset) -> Self {
        Self(offset)
    }

    /// Arena offset of the payload this handle refers to.
    pub fn offset(self) -> Offset {
        self.0
    }
}

/// Allocator over one fixed-capacity arena.
///
/// Instances are independent: each owns its arena and free list, so tests
/// and programs can run as many allocators side by side as they want. The
/// allocator is single-threaded; wrap it in a lock if it must be shared.
pub struct ArenaAllocator {
    arena: Option<Arena>,
    free: FreeList,
    strategy: FitStrategy,
}

impl ArenaAllocator {
    /// An uninitialized allocator using [`FitStrategy::BestFit`].
    pub const fn new() -> Self {
        Self::with_strategy(FitStrategy::BestFit)
    }

    /// An uninitialized allocator using the given fit strategy.
    pub const fn with_strategy(strategy: FitStrategy) -> Self {
        Self {
            arena: None,
            free: FreeList::new(),
            strategy,
        }
    }

    /// The configured fit strategy.
    pub fn strategy(&self) -> FitStrategy {
        self.strategy
    }

    /// Whether [`Self::init`] has run and [`Self::shutdown`] has not.
    pub fn is_initialized(&self) -> bool {
        self.arena.is_some()
    }

    /// Arena capacity in bytes, once initialized.
    pub fn capacity(&self) -> Option<u32> {
        self.arena.as_ref().map(Arena::capacity)
    }

    /// Acquires the arena and seeds the free list with one block spanning
    /// it. The capacity is the smallest power-of-two multiple of 1024 that
    /// holds `requested` bytes.
    ///
    /// Calling `init` on an already initialized allocator is a no-op, no
    /// matter what size is requested.
    ///
    /// # Errors
    ///
    /// [`AllocatorError::InsufficientMemory`] when the buffer cannot be
    /// acquired.
    pub fn init(&mut self, requested: u32) -> Result<()> {
        if self.arena.is_some() {
            return Ok(());
        }

        let mut arena = Arena::acquire(requested)?;
        let capacity = arena.capacity();

        let mut free = FreeList::new();
        free.seed(&mut arena, 0, capacity)?;

        self.arena = Some(arena);
        self.free = free;

        debug!("arena initialized: requested {requested} bytes, capacity {capacity}");
        Ok(())
    }

    /// Releases the arena. Every other operation fails with
    /// [`AllocatorError::Uninitialized`] until [`Self::init`] runs again.
    pub fn shutdown(&mut self) {
        if let Some(arena) = self.arena.take() {
            debug!("arena shut down: {} bytes released", arena.capacity());
        }
        self.free = FreeList::new();
    }

    /// Allocates a block whose payload holds at least `n` bytes and returns
    /// a handle to the payload. The payload granted is `n` rounded up to a
    /// multiple of 4 (at least 8), and can be larger still when splitting
    /// the chosen block would leave a remainder too small to ever host a
    /// free block.
    ///
    /// # Errors
    ///
    /// [`AllocatorError::AllocationFailed`] when no free block is large
    /// enough; the arena is left exactly as it was.
    pub fn allocate(&mut self, n: u32) -> Result<Handle> {
        let strategy = self.strategy;
        let (arena, free) = self.parts_mut()?;

        let actual = block_size_for(n);

        let mut candidates = Vec::new();
        for block in free.blocks(arena) {
            let (offset, header) = block?;
            if header.size >= actual {
                candidates.push(Candidate {
                    offset,
                    size: header.size,
                });
            }
        }

        let Some(chosen) = strategy.select(candidates.into_iter()) else {
            debug!("allocation failed: no free block holds {actual} bytes (request was {n})");
            return Err(AllocatorError::AllocationFailed { requested: n });
        };

        if chosen.size - actual < 2 * FREE_HEADER_SIZE {
            // The remainder could never host a usable free block, so the
            // caller gets the whole thing. This may empty the free list.
            free.remove(arena, chosen.offset)?;
            AllocHeader { size: chosen.size }.store(arena, chosen.offset)?;
        } else {
            let remainder = chosen.offset + actual;
            free.replace(arena, chosen.offset, remainder, chosen.size - actual)?;
            AllocHeader { size: actual }.store(arena, chosen.offset)?;
        }

        // The old link words sit at the start of the new payload; wipe them.
        header::clear_links(arena, chosen.offset)?;

        trace!("allocated block at offset {} for a {n} byte request", chosen.offset);
        Ok(Handle(chosen.offset + ALLOC_HEADER_SIZE))
    }

    /// Returns the block behind `handle` to the free list and coalesces it
    /// with any physically adjacent free blocks.
    ///
    /// # Errors
    ///
    /// [`AllocatorError::InvalidPointer`] when the handle does not address
    /// a payload inside the arena, and
    /// [`AllocatorError::DoubleFreeOrCorruption`] when the block behind it
    /// is not tagged as allocated. Neither failure mutates anything.
    pub fn deallocate(&mut self, handle: Handle) -> Result<()> {
        let (arena, free) = self.parts_mut()?;

        let block = Self::block_of(arena, handle)?;
        let header = AllocHeader::load(arena, block)?;

        free.insert(arena, block, header.size)?;
        free.coalesce(arena)?;

        trace!("deallocated block at offset {block} ({} bytes)", header.size);
        Ok(())
    }

    /// Borrows the payload behind `handle`.
    pub fn payload(&self, handle: Handle) -> Result<&[u8]> {
        let arena = self.arena()?;
        let block = Self::block_of(arena, handle)?;
        let header = AllocHeader::load(arena, block)?;

        arena.bytes(handle.offset(), header.size - ALLOC_HEADER_SIZE)
    }

    /// Mutably borrows the payload behind `handle`.
    pub fn payload_mut(&mut self, handle: Handle) -> Result<&mut [u8]> {
        let (arena, _) = self.parts_mut()?;
        let block = Self::block_of(arena, handle)?;
        let header = AllocHeader::load(arena, block)?;

        arena.bytes_mut(handle.offset(), header.size - ALLOC_HEADER_SIZE)
    }

    /// Free-list report: every free block in list order plus aggregate
    /// numbers. Read-only.
    pub fn stats(&self) -> Result<ArenaStats> {
        stats::collect(self.arena()?, &self.free)
    }

    /// Whole-arena partition walk: every block, free or allocated, in
    /// address order. Read-only.
    pub fn blocks(&self) -> Result<Vec<BlockStat>> {
        stats::walk(self.arena()?)
    }

    /// Maps a payload handle to its block offset, validating the range
    /// first. The payload must start far enough in for its header and lie
    /// strictly inside the arena.
    fn block_of(arena: &Arena, handle: Handle) -> Result<Offset> {
        let offset = handle.offset();

        if offset < ALLOC_HEADER_SIZE || offset >= arena.capacity() || !align::is_aligned(offset) {
            return Err(AllocatorError::InvalidPointer { offset });
        }

        Ok(offset - ALLOC_HEADER_SIZE)
    }

    fn arena(&self) -> Result<&Arena> {
        self.arena.as_ref().ok_or(AllocatorError::Uninitialized)
    }

    fn parts_mut(&mut self) -> Result<(&mut Arena, &mut FreeList)> {
        match self.arena.as_mut() {
            Some(arena) => Ok((arena, &mut self.free)),
            None => Err(AllocatorError::Uninitialized),
        }
    }
}

impl Default for ArenaAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// The block size actually carved out for an `n` byte request: header plus
/// the payload rounded up to granularity, floored at the minimum payload
/// and clamped to the largest representable block.
fn block_size_for(n: u32) -> u32 {
    let payload = align::round_up(u64::from(n)).max(u64::from(MIN_PAYLOAD));
    let actual = payload + u64::from(ALLOC_HEADER_SIZE);

    actual.min(u64::from(MAX_BLOCK_SIZE)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::MIN_BLOCK_SIZE;

    fn initialized(capacity: u32) -> ArenaAllocator {
        let mut heap = ArenaAllocator::new();
        heap.init(capacity).unwrap();
        heap
    }

    /// The partition invariant: every byte of the arena belongs to exactly
    /// one block, and all sizes add up to the capacity.
    fn assert_partitioned(heap: &ArenaAllocator) {
        let blocks = heap.blocks().unwrap();
        let mut expected_offset = 0;

        for block in &blocks {
            assert_eq!(block.offset, expected_offset);
            assert!(block.size >= MIN_BLOCK_SIZE);
            assert_eq!(block.size % 4, 0);
            expected_offset += block.size;
        }
        assert_eq!(expected_offset, heap.capacity().unwrap());

        // No two adjacent free blocks survive.
        for pair in blocks.windows(2) {
            assert!(!(pair[0].free && pair[1].free), "adjacent free blocks: {pair:?}");
        }
    }

    #[test]
    fn request_rounding() {
        assert_eq!(block_size_for(0), 16);
        assert_eq!(block_size_for(1), 16);
        assert_eq!(block_size_for(8), 16);
        assert_eq!(block_size_for(9), 20);
        assert_eq!(block_size_for(100), 112);
        assert_eq!(block_size_for(u32::MAX), MAX_BLOCK_SIZE);
    }

    #[test]
    fn allocate_splits_the_spanning_block() {
        let mut heap = initialized(1024);

        let handle = heap.allocate(100).unwrap();
        assert_eq!(handle.offset(), ALLOC_HEADER_SIZE);

        let stats = heap.stats().unwrap();
        assert_eq!(stats.free_blocks.len(), 1);
        assert_eq!(stats.free_blocks[0].offset, 112);
        assert_eq!(stats.free_blocks[0].size, 912);

        assert_partitioned(&heap);
    }

    #[test]
    fn whole_block_is_granted_when_remainder_is_too_small() {
        let mut heap = initialized(1024);

        // actual = 1016, remainder 8 < two free headers.
        let handle = heap.allocate(1008).unwrap();

        let stats = heap.stats().unwrap();
        assert!(stats.free_blocks.is_empty());
        assert_eq!(stats.largest_free_payload, 0);

        let blocks = heap.blocks().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, 1024);
        assert!(!blocks[0].free);

        // An empty free list is a legal terminal state; freeing the block
        // reseeds it.
        heap.deallocate(handle).unwrap();
        assert_eq!(heap.stats().unwrap().free_blocks.len(), 1);
        assert_partitioned(&heap);
    }

    #[test]
    fn failed_allocation_changes_nothing() {
        let mut heap = initialized(1024);
        let _keep = heap.allocate(100).unwrap();

        let before = heap.blocks().unwrap();
        assert_eq!(
            heap.allocate(2000),
            Err(AllocatorError::AllocationFailed { requested: 2000 })
        );
        assert_eq!(heap.blocks().unwrap(), before);
    }

    #[test]
    fn deallocate_merges_neighbors() {
        let mut heap = initialized(1024);

        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(100).unwrap();
        let c = heap.allocate(100).unwrap();

        // Free the middle one first, then its neighbors; every step must
        // keep the partition sound and end in one spanning block.
        heap.deallocate(b).unwrap();
        assert_partitioned(&heap);

        heap.deallocate(a).unwrap();
        assert_partitioned(&heap);

        heap.deallocate(c).unwrap();
        assert_partitioned(&heap);

        let stats = heap.stats().unwrap();
        assert_eq!(stats.free_blocks.len(), 1);
        assert_eq!(stats.free_blocks[0].offset, 0);
        assert_eq!(stats.free_blocks[0].size, 1024);
    }

    #[test]
    fn freed_block_is_reused() {
        let mut heap = initialized(1024);

        let a = heap.allocate(100).unwrap();
        let _b = heap.allocate(100).unwrap();

        heap.deallocate(a).unwrap();
        let c = heap.allocate(100).unwrap();

        assert_eq!(c, a);
        assert_partitioned(&heap);
    }

    #[test]
    fn best_fit_prefers_the_tightest_hole() {
        let mut heap = initialized(2048);

        // Carve out two holes: one of 112 bytes and one of 240 bytes, kept
        // apart by live allocations.
        let hole_small = heap.allocate(100).unwrap();
        let _sep1 = heap.allocate(40).unwrap();
        let hole_big = heap.allocate(228).unwrap();
        let _sep2 = heap.allocate(40).unwrap();

        heap.deallocate(hole_small).unwrap();
        heap.deallocate(hole_big).unwrap();

        // 100 bytes fit both holes; best fit must pick the small one.
        let again = heap.allocate(100).unwrap();
        assert_eq!(again, hole_small);
        assert_partitioned(&heap);
    }

    #[test]
    fn worst_fit_prefers_the_biggest_hole() {
        let mut heap = ArenaAllocator::with_strategy(FitStrategy::WorstFit);
        heap.init(2048).unwrap();

        let hole_small = heap.allocate(100).unwrap();
        let _sep = heap.allocate(40).unwrap();

        heap.deallocate(hole_small).unwrap();

        // The tail block is far larger than the 112 byte hole.
        let pick = heap.allocate(100).unwrap();
        assert_ne!(pick, hole_small);
        assert_partitioned(&heap);
    }

    #[test]
    fn random_fit_allocates_successfully() {
        let mut heap = ArenaAllocator::with_strategy(FitStrategy::RandomFit);
        heap.init(2048).unwrap();

        let handles: Vec<_> = (0..5).map(|_| heap.allocate(64).unwrap()).collect();
        assert_partitioned(&heap);

        for handle in handles {
            heap.deallocate(handle).unwrap();
        }
        assert_eq!(heap.stats().unwrap().free_blocks.len(), 1);
    }

    #[test]
    fn payload_survives_neighboring_operations() {
        let mut heap = initialized(1024);

        let a = heap.allocate(32).unwrap();
        let b = heap.allocate(32).unwrap();

        heap.payload_mut(a).unwrap().fill(69);
        heap.payload_mut(b).unwrap().fill(42);

        let c = heap.allocate(64).unwrap();
        heap.payload_mut(c).unwrap().fill(7);
        heap.deallocate(b).unwrap();

        assert!(heap.payload(a).unwrap().iter().all(|&byte| byte == 69));
        assert!(heap.payload(c).unwrap().iter().all(|&byte| byte == 7));
    }

    #[test]
    fn payload_is_at_least_the_rounded_request() {
        let mut heap = initialized(1024);

        let handle = heap.allocate(10).unwrap();
        assert_eq!(heap.payload(handle).unwrap().len(), 12);

        let handle = heap.allocate(0).unwrap();
        assert_eq!(heap.payload(handle).unwrap().len(), 8);
    }

    #[test]
    fn double_free_is_detected() {
        let mut heap = initialized(1024);

        let handle = heap.allocate(100).unwrap();
        heap.deallocate(handle).unwrap();

        assert_eq!(
            heap.deallocate(handle),
            Err(AllocatorError::DoubleFreeOrCorruption { offset: 0 })
        );
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let mut heap = initialized(1024);
        let _live = heap.allocate(100).unwrap();

        // Outside the arena.
        assert_eq!(
            heap.deallocate(Handle::from_offset(4096)),
            Err(AllocatorError::InvalidPointer { offset: 4096 })
        );
        // Before the first possible payload.
        assert_eq!(
            heap.deallocate(Handle::from_offset(0)),
            Err(AllocatorError::InvalidPointer { offset: 0 })
        );
        // Mid-payload: the words there are not an allocated header.
        assert!(matches!(
            heap.deallocate(Handle::from_offset(24)),
            Err(AllocatorError::DoubleFreeOrCorruption { .. })
        ));
    }

    #[test]
    fn init_is_idempotent() {
        let mut heap = initialized(1024);
        let handle = heap.allocate(100).unwrap();

        // A second init with a bigger size must not touch anything.
        heap.init(8192).unwrap();
        assert_eq!(heap.capacity(), Some(1024));
        assert_eq!(heap.payload(handle).unwrap().len(), 104);
    }

    #[test]
    fn operations_require_init() {
        let mut heap = ArenaAllocator::new();

        assert_eq!(heap.allocate(10), Err(AllocatorError::Uninitialized));
        assert_eq!(
            heap.deallocate(Handle::from_offset(8)),
            Err(AllocatorError::Uninitialized)
        );
        assert_eq!(heap.stats().err(), Some(AllocatorError::Uninitialized));
    }

    #[test]
    fn shutdown_then_reinit() {
        let mut heap = initialized(1024);
        let _handle = heap.allocate(100).unwrap();

        heap.shutdown();
        assert!(!heap.is_initialized());
        assert_eq!(heap.allocate(10), Err(AllocatorError::Uninitialized));

        heap.init(2048).unwrap();
        assert_eq!(heap.capacity(), Some(2048));
        assert_eq!(heap.stats().unwrap().free_blocks.len(), 1);
        assert_partitioned(&heap);
    }
}
