//! Walkthrough of the allocator lifecycle, printing the free-list report
//! after each step. Run with:
//!
//! ```bash
//! RUST_LOG=trace cargo run --example stats
//! ```

use arenalloc::{ArenaAllocator, FitStrategy};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut heap = ArenaAllocator::with_strategy(FitStrategy::BestFit);
    heap.init(4096)?;

    println!("fresh arena:\n{}\n", heap.stats()?);

    let a = heap.allocate(100)?;
    let b = heap.allocate(500)?;
    let c = heap.allocate(64)?;
    println!("after three allocations:\n{}\n", heap.stats()?);

    heap.payload_mut(b)?.fill(0x42);

    heap.deallocate(b)?;
    println!("after freeing the middle block:\n{}\n", heap.stats()?);

    heap.deallocate(a)?;
    heap.deallocate(c)?;
    println!("after freeing everything:\n{}", heap.stats()?);

    heap.shutdown();
    Ok(())
}
