use parking_lot::Mutex;

use crate::alloc::{self, SliceHeader};

/// Initial capacity of a pooled scratch buffer.
pub const DEFAULT_SLICE_CAPACITY: usize = 2;

/// Free list of reusable scratch buffers for one element stride.
///
/// `get` returns a logically empty buffer (`len == 0`, capacity at least
/// [`DEFAULT_SLICE_CAPACITY`]); `put` makes a buffer eligible for reuse and
/// transfers ownership back, so the releaser must not touch it afterwards.
/// Safe for concurrent use: decoder instances holding a pool may be shared
/// across threads.
pub struct ScratchPool {
    elem_size: usize,
    free: Mutex<Vec<SliceHeader>>,
}

impl ScratchPool {
    pub fn new(elem_size: usize) -> Self {
        ScratchPool {
            elem_size,
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self) -> SliceHeader {
        if let Some(mut scratch) = self.free.lock().pop() {
            scratch.len = 0;
            return scratch;
        }
        SliceHeader {
            data: alloc::new_typed_array(self.elem_size, DEFAULT_SLICE_CAPACITY),
            len: 0,
            cap: DEFAULT_SLICE_CAPACITY,
        }
    }

    pub fn put(&self, scratch: SliceHeader) {
        self.free.lock().push(scratch);
    }

    #[cfg(test)]
    pub(crate) fn pooled(&self) -> usize {
        self.free.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn pooled_caps(&self) -> Vec<usize> {
        self.free.lock().iter().map(|s| s.cap).collect()
    }
}

impl Drop for ScratchPool {
    fn drop(&mut self) {
        for scratch in self.free.get_mut().drain(..) {
            alloc::free_typed_array(scratch.data, self.elem_size, scratch.cap);
        }
    }
}
