use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::ptr::NonNull;

/// Elements in this model are at most 8-aligned (pointer-sized words and
/// smaller, or aggregates thereof).
const ELEM_ALIGN: usize = 8;

/// Raw header of a decoded sequence: a typed array of `cap` elements of
/// which the first `len` are initialized. Layout is `#[repr(C)]` so
/// destinations can be described by schema offsets.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceHeader {
    pub data: *mut u8,
    pub len: usize,
    pub cap: usize,
}

impl SliceHeader {
    pub const fn empty() -> Self {
        SliceHeader {
            data: core::ptr::null_mut(),
            len: 0,
            cap: 0,
        }
    }
}

impl Default for SliceHeader {
    fn default() -> Self {
        SliceHeader::empty()
    }
}

// A header is a unique owner of its array; moving it across threads moves
// ownership with it, exactly as for a Vec.
unsafe impl Send for SliceHeader {}
unsafe impl Sync for SliceHeader {}

fn layout(elem_size: usize, n: usize) -> Layout {
    Layout::from_size_align(elem_size * n, ELEM_ALIGN).expect("typed array layout")
}

/// Allocate a zero-initialized contiguous array of `n` elements of
/// `elem_size` bytes. Zero-length arrays share one well-aligned dangling
/// pointer, so a non-null `data` does not imply a live allocation; pair
/// every call with [`free_typed_array`] using the same `n`.
pub fn new_typed_array(elem_size: usize, n: usize) -> *mut u8 {
    if elem_size * n == 0 {
        return NonNull::<u64>::dangling().as_ptr() as *mut u8;
    }
    let layout = layout(elem_size, n);
    let data = unsafe { alloc_zeroed(layout) };
    if data.is_null() {
        handle_alloc_error(layout);
    }
    data
}

/// Release an array obtained from [`new_typed_array`]. Null pointers and
/// zero-sized arrays are accepted and ignored.
pub fn free_typed_array(data: *mut u8, elem_size: usize, n: usize) {
    if data.is_null() || elem_size * n == 0 {
        return;
    }
    unsafe { dealloc(data, layout(elem_size, n)) };
}

/// Copy `n` elements between typed arrays. Elements in this model move by
/// bitwise copy.
///
/// # Safety
/// Both pointers must cover `n * elem_size` readable/writable bytes and the
/// ranges must not overlap.
pub unsafe fn typed_slice_copy(elem_size: usize, dst: *mut u8, src: *const u8, n: usize) {
    unsafe { core::ptr::copy_nonoverlapping(src, dst, n * elem_size) };
}

/// Construct the element's default (all-zero) value in place.
///
/// # Safety
/// `p` must cover `elem_size` writable bytes.
pub unsafe fn zero_elem(p: *mut u8, elem_size: usize) {
    unsafe { core::ptr::write_bytes(p, 0, elem_size) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_arrays_are_non_null() {
        let p = new_typed_array(8, 0);
        assert!(!p.is_null());
        free_typed_array(p, 8, 0);
    }

    #[test]
    fn arrays_start_zeroed() {
        let p = new_typed_array(8, 4);
        let words = unsafe { core::slice::from_raw_parts(p as *const u64, 4) };
        assert_eq!(words, &[0, 0, 0, 0]);
        free_typed_array(p, 8, 4);
    }
}
