use std::ptr::NonNull;

use crate::Pointer;

/// Abstraction for platform specific memory handling. The arena only needs
/// one buffer acquired at init time and returned at shutdown, so this is all
/// the surface we ask of the underlying kernel or libraries.
trait PlatformSpecificMemory {
    /// Requests a memory region where `length` bytes can be written safely.
    /// Returns `None` when the platform refuses.
    unsafe fn request_memory(length: usize) -> Pointer<u8>;

    /// Returns `length` bytes starting from `address` to the platform.
    unsafe fn return_memory(address: NonNull<u8>, length: usize);
}

/// Zero sized type that implements [`PlatformSpecificMemory`] for each OS.
struct Platform;

/// Convenience wrapper for [`PlatformSpecificMemory::request_memory`].
#[inline]
pub(crate) fn request_memory(length: usize) -> Pointer<u8> {
    unsafe { Platform::request_memory(length) }
}

/// Convenience wrapper for [`PlatformSpecificMemory::return_memory`].
///
/// # Safety
///
/// `address` must have been obtained from [`request_memory`] with the same
/// `length`, and must not be used afterwards.
#[inline]
pub(crate) unsafe fn return_memory(address: NonNull<u8>, length: usize) {
    Platform::return_memory(address, length)
}

#[cfg(all(unix, not(miri)))]
mod unix {
    use std::ptr::{self, NonNull};

    use super::{Platform, PlatformSpecificMemory};
    use crate::Pointer;

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            // Memory protection. Read-Write only.
            let protection = libc::PROT_READ | libc::PROT_WRITE;

            // Memory should be private to our process and not mapped to any
            // file. For all the options that `mmap` accepts see
            // https://man7.org/linux/man-pages/man2/mmap.2.html
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            match libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0) {
                libc::MAP_FAILED => None,
                address => Some(NonNull::new_unchecked(address).cast()),
            }
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            if libc::munmap(address.cast().as_ptr(), length) != 0 {
                // Unmapping can only fail on a bogus address or length, and
                // we pass exactly what mmap gave us. Nothing sensible to do.
            }
        }
    }
}

#[cfg(any(miri, not(unix)))]
mod fallback {
    //! Without `mmap` (non-unix targets, or Miri where there is no FFI
    //! support) we lean on the global allocator to mock the platform layer.
    //! This also lets Miri track the arena buffer and catch leaks.

    use std::{alloc, ptr::NonNull};

    use super::{Platform, PlatformSpecificMemory};
    use crate::Pointer;

    fn to_layout(length: usize) -> Option<alloc::Layout> {
        alloc::Layout::from_size_align(length, 8).ok()
    }

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            // Zeroed to match what anonymous mmap hands out.
            NonNull::new(alloc::alloc_zeroed(to_layout(length)?))
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            if let Some(layout) = to_layout(length) {
                alloc::dealloc(address.as_ptr(), layout);
            }
        }
    }
}
