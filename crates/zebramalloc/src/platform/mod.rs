//! OS primitives used by the zebra heap: reserving the arena and toggling
//! page protection on odd pages.

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub use linux as sys;

#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "macos")]
pub use macos as sys;

use core::ptr::NonNull;

/// Reserve `size` bytes of anonymous, page-aligned, read-write memory.
/// Returns `None` on failure.
///
/// # Safety
/// Caller must ensure `size` is page-aligned and non-zero.
#[inline]
pub unsafe fn reserve(size: usize) -> Option<NonNull<u8>> {
    NonNull::new(sys::map_anonymous(size))
}

/// Release a region previously returned by `reserve`, regardless of the
/// protection of the pages inside it.
///
/// # Safety
/// `ptr` must have been returned by `reserve` and `size` must match.
#[inline]
pub unsafe fn release(ptr: NonNull<u8>, size: usize) {
    sys::unmap(ptr.as_ptr(), size);
}

/// Protect a memory region as inaccessible. Returns false if the OS refused.
///
/// # Safety
/// `ptr` and `size` must refer to a valid mapped region and be page-aligned.
#[inline]
#[must_use]
pub unsafe fn protect_none(ptr: *mut u8, size: usize) -> bool {
    sys::protect_none(ptr, size)
}

/// Mark memory as read-write. Returns false if the OS refused.
///
/// # Safety
/// `ptr` and `size` must refer to a valid mapped region and be page-aligned.
#[inline]
#[must_use]
pub unsafe fn protect_read_write(ptr: *mut u8, size: usize) -> bool {
    sys::protect_read_write(ptr, size)
}
