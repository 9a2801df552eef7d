//! The free list: a circular, doubly linked list of free blocks threaded
//! through the arena, ordered by ascending block offset.
//!
//! The list has no nodes of its own. Each free block's header carries the
//! `next` and `prev` offsets, and the only state held here is the offset of
//! the head, which is always the lowest-offset free block:
//!
//! ```text
//!    head
//!     |
//!     v
//! +-------+           +-------+           +-------+
//! | Free  | --next--> | Free  | --next--> | Free  | --+
//! |       | <--prev-- |       | <--prev-- |       |   |
//! +-------+           +-------+           +-------+   |
//!     ^                                               |
//!     +------------------- next ----------------------+
//! ```
//!
//! When exactly one free block exists its links point at itself, and when no
//! free block survives (the arena is fully allocated) the head is `None`.
//! That empty list is a legal state: the next deallocation reseeds it.
//!
//! Every traversal is bounded by the largest number of blocks the arena
//! could possibly hold, so a corrupted link that forms a rogue cycle is
//! reported instead of spinning forever.

use log::trace;

use crate::{
    arena::Arena,
    error::{AllocatorError, Result},
    header::{self, FreeHeader, MIN_BLOCK_SIZE},
    Offset,
};

/// Handle on the circular list of free blocks inside an arena.
pub(crate) struct FreeList {
    head: Option<Offset>,
}

impl FreeList {
    /// An empty list, not attached to any free block yet.
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// Offset of the lowest-offset free block, or `None` when the arena is
    /// fully allocated. Not needed internally, for now only the tests want
    /// to peek at it.
    #[cfg(test)]
    pub fn head(&self) -> Option<Offset> {
        self.head
    }

    /// Upper bound on list length, used to cut rogue cycles short.
    fn max_blocks(arena: &Arena) -> u32 {
        arena.capacity() / MIN_BLOCK_SIZE + 1
    }

    /// Installs a sole self-linked free block and points the head at it.
    pub fn seed(&mut self, arena: &mut Arena, offset: Offset, size: u32) -> Result<()> {
        FreeHeader {
            size,
            next: offset,
            prev: offset,
        }
        .store(arena, offset)?;

        self.head = Some(offset);
        Ok(())
    }

    /// Walks one full circuit of the list in order, starting at the head.
    pub fn blocks<'a>(&self, arena: &'a Arena) -> Blocks<'a> {
        Blocks {
            arena,
            head: self.head,
            next: self.head,
            remaining: Self::max_blocks(arena),
        }
    }

    /// Splices the block at `offset` into its offset-ordered position.
    ///
    /// The neighbor pair bracketing `offset` is found by walking from the
    /// head; offsets below the head or above the tail are bracketed by the
    /// wrap-around pair (tail, head). The head moves down whenever the new
    /// block sits below it.
    pub fn insert(&mut self, arena: &mut Arena, offset: Offset, size: u32) -> Result<()> {
        let Some(head) = self.head else {
            return self.seed(arena, offset, size);
        };

        let head_header = FreeHeader::load(arena, head)?;
        let tail = head_header.prev;

        let (prev, next) = if offset < head || offset > tail {
            (tail, head)
        } else {
            let mut curr = head;
            let mut curr_header = head_header;
            let mut remaining = Self::max_blocks(arena);

            loop {
                if curr < offset && offset < curr_header.next {
                    break (curr, curr_header.next);
                }

                curr = curr_header.next;
                remaining -= 1;
                if curr == head || remaining == 0 {
                    // Walked the whole circle without finding a bracket, so
                    // the ordering invariant is already broken.
                    return Err(AllocatorError::DoubleFreeOrCorruption { offset });
                }
                curr_header = FreeHeader::load(arena, curr)?;
            }
        };

        FreeHeader { size, next, prev }.store(arena, offset)?;

        if prev == next {
            // The list had a single member; it becomes both neighbors.
            let mut sole = FreeHeader::load(arena, prev)?;
            sole.next = offset;
            sole.prev = offset;
            sole.store(arena, prev)?;
        } else {
            let mut before = FreeHeader::load(arena, prev)?;
            before.next = offset;
            before.store(arena, prev)?;

            let mut after = FreeHeader::load(arena, next)?;
            after.prev = offset;
            after.store(arena, next)?;
        }

        if offset < head {
            self.head = Some(offset);
        }
        Ok(())
    }

    /// Unlinks the block at `offset`. Removing the last member leaves the
    /// list empty.
    pub fn remove(&mut self, arena: &mut Arena, offset: Offset) -> Result<()> {
        let removed = FreeHeader::load(arena, offset)?;

        if removed.next == offset {
            self.head = None;
            return Ok(());
        }

        let mut before = FreeHeader::load(arena, removed.prev)?;
        before.next = removed.next;
        before.store(arena, removed.prev)?;

        // Reload in case prev and next are the same block.
        let mut after = FreeHeader::load(arena, removed.next)?;
        after.prev = removed.prev;
        after.store(arena, removed.next)?;

        if self.head == Some(offset) {
            self.head = Some(removed.next);
        }
        Ok(())
    }

    /// Hands the list position of the block at `old` over to a new free
    /// block at `new`, which inherits the old block's neighbors. Used when
    /// splitting: the remainder replaces the chosen block in the list.
    ///
    /// `new` must lie between `old` and the old block's end, so the
    /// offset ordering is untouched.
    pub fn replace(&mut self, arena: &mut Arena, old: Offset, new: Offset, size: u32) -> Result<()> {
        let replaced = FreeHeader::load(arena, old)?;

        if replaced.next == old {
            FreeHeader {
                size,
                next: new,
                prev: new,
            }
            .store(arena, new)?;
        } else {
            FreeHeader {
                size,
                next: replaced.next,
                prev: replaced.prev,
            }
            .store(arena, new)?;

            let mut before = FreeHeader::load(arena, replaced.prev)?;
            before.next = new;
            before.store(arena, replaced.prev)?;

            let mut after = FreeHeader::load(arena, replaced.next)?;
            after.prev = new;
            after.store(arena, replaced.next)?;
        }

        if self.head == Some(old) {
            self.head = Some(new);
        }
        Ok(())
    }

    /// Combines physically adjacent free blocks until none remain.
    ///
    /// Each pass scans from the head and combines the first pair it finds
    /// whose end and start offsets touch. Combining can create a fresh
    /// adjacency with the surrounding blocks, so the scan restarts from the
    /// head after every combination and the loop only ends once a full pass
    /// finds nothing. Termination: every combination removes one block from
    /// the list.
    pub fn coalesce(&mut self, arena: &mut Arena) -> Result<()> {
        let Some(head) = self.head else {
            return Ok(());
        };

        while self.coalesce_pass(arena, head)? {}
        Ok(())
    }

    /// One scan from the head. Combines at most one adjacent pair and
    /// reports whether it did.
    fn coalesce_pass(&mut self, arena: &mut Arena, head: Offset) -> Result<bool> {
        let mut curr = head;
        let mut remaining = Self::max_blocks(arena);

        loop {
            let current = FreeHeader::load(arena, curr)?;

            if current.next == head {
                // Wrapped around. The tail and the head are never physically
                // adjacent: the head is the lowest offset in the arena.
                return Ok(false);
            }

            if curr + current.size == current.next {
                let absorbed = FreeHeader::load(arena, current.next)?;

                FreeHeader {
                    size: current.size + absorbed.size,
                    next: absorbed.next,
                    prev: current.prev,
                }
                .store(arena, curr)?;

                // Re-point the new successor at the grown block. When the
                // list collapses to one member this self-links `curr`.
                let mut successor = FreeHeader::load(arena, absorbed.next)?;
                successor.prev = curr;
                successor.store(arena, absorbed.next)?;

                header::clear_free_header(arena, current.next)?;

                trace!(
                    "coalesced block at offset {} into {} ({} bytes total)",
                    current.next,
                    curr,
                    current.size + absorbed.size
                );
                return Ok(true);
            }

            curr = current.next;
            remaining -= 1;
            if remaining == 0 {
                return Err(AllocatorError::DoubleFreeOrCorruption { offset: curr });
            }
        }
    }
}

/// Cursor yielded by [`FreeList::blocks`]: one full circuit in list order.
pub(crate) struct Blocks<'a> {
    arena: &'a Arena,
    head: Option<Offset>,
    next: Option<Offset>,
    remaining: u32,
}

impl Iterator for Blocks<'_> {
    type Item = Result<(Offset, FreeHeader)>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next?;

        if self.remaining == 0 {
            self.next = None;
            return Some(Err(AllocatorError::DoubleFreeOrCorruption { offset }));
        }
        self.remaining -= 1;

        match FreeHeader::load(self.arena, offset) {
            Ok(header) => {
                self.next = (Some(header.next) != self.head).then_some(header.next);
                Some(Ok((offset, header)))
            }
            Err(err) => {
                self.next = None;
                Some(Err(err))
            }
        }
    }
}
