//! The allocator pair the host calls to place and release guest buffers.
//!
//! Both functions go through the global allocator, so buffers the host
//! allocates here and buffers lowered by [`crate::codec`] share one heap
//! and one release path.

use std::alloc::{self, Layout};

/// Grows, shrinks or frees an allocation on behalf of the host.
///
/// A null `ptr` with `old_size` zero is a fresh allocation. A `new_size`
/// of zero releases the allocation and returns a dangling, well-aligned
/// pointer. Allocation failure aborts; the host has no way to recover
/// from guest memory exhaustion mid-call.
#[cfg_attr(target_arch = "wasm32", export_name = "canonical_abi_realloc")]
pub extern "C" fn canonical_abi_realloc(
    ptr: *mut u8,
    old_size: usize,
    align: usize,
    new_size: usize,
) -> *mut u8 {
    if new_size == 0 {
        if !ptr.is_null() && old_size != 0 {
            let layout = layout_for(old_size, align);
            unsafe { alloc::dealloc(ptr, layout) };
        }
        return align as *mut u8;
    }

    let new_layout = layout_for(new_size, align);
    let new_ptr = if ptr.is_null() || old_size == 0 {
        unsafe { alloc::alloc(new_layout) }
    } else {
        let old_layout = layout_for(old_size, align);
        unsafe { alloc::realloc(ptr, old_layout, new_size) }
    };
    if new_ptr.is_null() {
        alloc::handle_alloc_error(new_layout);
    }
    new_ptr
}

/// Releases a buffer previously produced by [`canonical_abi_realloc`] or
/// by lowering. A zero `size` is a no-op regardless of the pointer value.
#[cfg_attr(target_arch = "wasm32", export_name = "canonical_abi_free")]
pub extern "C" fn canonical_abi_free(ptr: *mut u8, size: usize, align: usize) {
    if size == 0 {
        return;
    }
    let layout = layout_for(size, align);
    unsafe { alloc::dealloc(ptr, layout) };
}

fn layout_for(size: usize, align: usize) -> Layout {
    // The host passes alignments of 1, 4 or 8; anything else is a
    // contract violation worth aborting over.
    match Layout::from_size_align(size, align) {
        Ok(layout) => layout,
        Err(_) => std::process::abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_write_free() {
        let ptr = canonical_abi_realloc(std::ptr::null_mut(), 0, 1, 16);
        assert!(!ptr.is_null());
        unsafe {
            std::ptr::write_bytes(ptr, 0xab, 16);
        }
        canonical_abi_free(ptr, 16, 1);
    }

    #[test]
    fn grow_preserves_prefix() {
        let ptr = canonical_abi_realloc(std::ptr::null_mut(), 0, 1, 4);
        unsafe {
            ptr.copy_from(b"abcd".as_ptr(), 4);
        }
        let grown = canonical_abi_realloc(ptr, 4, 1, 32);
        let prefix = unsafe { std::slice::from_raw_parts(grown, 4) };
        assert_eq!(prefix, b"abcd");
        canonical_abi_free(grown, 32, 1);
    }

    #[test]
    fn zero_new_size_frees_and_returns_aligned() {
        let ptr = canonical_abi_realloc(std::ptr::null_mut(), 0, 8, 8);
        let dangling = canonical_abi_realloc(ptr, 8, 8, 0);
        assert_eq!(dangling as usize, 8);
    }

    #[test]
    fn zero_size_free_is_a_no_op() {
        canonical_abi_free(std::ptr::null_mut(), 0, 1);
    }
}
