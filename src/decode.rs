use crate::alloc::{self, SliceHeader};
use crate::error::Error;
use crate::pool::ScratchPool;
use crate::schema::{Kind, Ty, Types};
use crate::stream::{NUL, Stream};

/// Hard bound on bracket nesting; exceeding it fails the decode rather
/// than the stack.
pub const MAX_DECODE_NESTING_DEPTH: usize = 10_000;

/// A decoder that consumes JSON bytes and populates a destination through
/// a raw pointer.
///
/// Contract shared by both entry points: on success the destination holds a
/// valid value of the decoder's element type and the cursor is advanced past
/// the last consumed byte; whitespace after the value is not consumed. On
/// error the destination is unspecified and must be discarded.
pub trait Decode: Send + Sync {
    /// Decode from a random-access buffer starting at `cursor`.
    ///
    /// # Safety
    /// `dst` must point to writable memory of the decoder's element size,
    /// zero-initialized or previously written by this crate's decoders.
    unsafe fn decode(
        &self,
        buf: &[u8],
        cursor: usize,
        depth: usize,
        dst: *mut u8,
    ) -> Result<usize, Error>;

    /// Decode from a refillable stream.
    ///
    /// # Safety
    /// Same destination requirements as [`Decode::decode`].
    unsafe fn decode_stream(
        &self,
        stream: &mut Stream,
        depth: usize,
        dst: *mut u8,
    ) -> Result<(), Error>;
}

/// Advance past ASCII whitespace, stopping at the end of the buffer.
pub(crate) fn skip_white_space(buf: &[u8], mut cursor: usize) -> usize {
    while cursor < buf.len() {
        match buf[cursor] {
            b' ' | b'\t' | b'\n' | b'\r' => cursor += 1,
            _ => break,
        }
    }
    cursor
}

/// Consume the literal at `cursor`, returning the cursor past it. The
/// reported offset is the literal's start.
pub(crate) fn expect_literal(
    buf: &[u8],
    cursor: usize,
    literal: &'static [u8],
    production: &'static str,
) -> Result<usize, Error> {
    if cursor + literal.len() > buf.len() {
        return Err(Error::unexpected_end(production, cursor));
    }
    for (i, &expected) in literal.iter().enumerate() {
        if buf[cursor + i] != expected {
            return Err(Error::invalid_character(buf[cursor + i], production, cursor));
        }
    }
    Ok(cursor + literal.len())
}

/// Streaming form of [`expect_literal`], refilling between bytes.
pub(crate) fn expect_literal_stream(
    s: &mut Stream,
    literal: &'static [u8],
    production: &'static str,
) -> Result<(), Error> {
    for &expected in literal {
        loop {
            let c = s.char();
            if c == NUL {
                if s.read() {
                    continue;
                }
                return Err(Error::unexpected_end(production, s.total_offset()));
            }
            if c != expected {
                return Err(Error::invalid_character(c, production, s.total_offset()));
            }
            s.cursor += 1;
            break;
        }
    }
    Ok(())
}

/// Streaming decoder for JSON sequences (`[ ... ]`).
///
/// Elements land in a pooled scratch buffer that doubles on demand; only
/// the final copy touches the caller-owned destination, because the
/// destination's capacity is unknown while the element count is.
/// Constructed once per element type and safely shareable across threads.
pub struct SliceDecoder {
    elem_size: usize,
    /// Element is pointer-shaped; its slot is nulled before each decode so
    /// the sub-decoder never sees a stale pointer.
    is_elem_pointer_type: bool,
    /// A pointer to the element consumes raw JSON itself; its slot is
    /// default-constructed before each decode.
    is_elem_unmarshal_json: bool,
    /// Element embeds owned arrays (nested sequences, strings, records);
    /// a recycled scratch must not leak a stale header into the
    /// sub-decoder, which would alias or double-free the previous
    /// decode's result.
    is_elem_owning: bool,
    value_decoder: Box<dyn Decode>,
    pool: ScratchPool,
    slice_name: String,
    struct_name: String,
    field_name: String,
}

impl SliceDecoder {
    pub fn new(
        types: &Types,
        elem: Ty,
        value_decoder: Box<dyn Decode>,
        struct_name: &str,
        field_name: &str,
    ) -> Self {
        let elem_size = types.size(elem);
        SliceDecoder {
            elem_size,
            is_elem_pointer_type: matches!(types.kind(elem), Kind::Ptr | Kind::Map),
            is_elem_unmarshal_json: types.get(elem).unmarshal_json,
            is_elem_owning: matches!(
                types.kind(elem),
                Kind::Slice | Kind::Array | Kind::Struct | Kind::String | Kind::Dyn
            ),
            value_decoder,
            pool: ScratchPool::new(elem_size),
            slice_name: format!("[{}]", types.display(elem)),
            struct_name: struct_name.to_owned(),
            field_name: field_name.to_owned(),
        }
    }

    fn err_number(&self, offset: usize) -> Error {
        Error::TypeMismatch {
            value: "number",
            ty: self.slice_name.clone(),
            struct_name: self.struct_name.clone(),
            field_name: self.field_name.clone(),
            offset,
        }
    }

    /// Hand the live array back to the pool on an exit path.
    fn release(&self, mut scratch: SliceHeader, data: *mut u8, cap: usize) {
        scratch.data = data;
        scratch.cap = cap;
        self.pool.put(scratch);
    }

    /// Double the scratch array, abandoning the outgrown allocation (it
    /// never returns to the pool).
    fn grow(&self, data: *mut u8, cap: usize, len: usize) -> (*mut u8, usize) {
        let new_cap = cap * 2;
        let new_data = alloc::new_typed_array(self.elem_size, new_cap);
        unsafe { alloc::typed_slice_copy(self.elem_size, new_data, data, len) };
        alloc::free_typed_array(data, self.elem_size, cap);
        (new_data, new_cap)
    }

    /// Give the sub-decoder a defined starting state in the element slot.
    unsafe fn init_elem_slot(&self, ep: *mut u8) {
        if self.is_elem_unmarshal_json {
            unsafe { alloc::zero_elem(ep, self.elem_size) };
        } else if self.is_elem_pointer_type {
            unsafe { (ep as *mut *mut u8).write(core::ptr::null_mut()) };
        } else if self.is_elem_owning {
            unsafe { alloc::zero_elem(ep, self.elem_size) };
        }
    }

    /// Size the destination to `len` and copy the scratch into it.
    unsafe fn finish(&self, dst: *mut u8, scratch: SliceHeader, len: usize) {
        let dst = unsafe { &mut *(dst as *mut SliceHeader) };
        dst.len = len;
        if dst.len > dst.cap {
            alloc::free_typed_array(dst.data, self.elem_size, dst.cap);
            dst.data = alloc::new_typed_array(self.elem_size, dst.len);
            dst.cap = dst.len;
        }
        unsafe { alloc::typed_slice_copy(self.elem_size, dst.data, scratch.data, dst.len) };
        self.pool.put(scratch);
    }

    /// `null` zeroes the whole destination header, releasing any array the
    /// destination still owns.
    unsafe fn write_null(&self, dst: *mut u8) {
        let dst = unsafe { &mut *(dst as *mut SliceHeader) };
        alloc::free_typed_array(dst.data, self.elem_size, dst.cap);
        *dst = SliceHeader::empty();
    }

    /// Empty-sequence case: reuse the destination array when there is one.
    unsafe fn finish_empty(&self, dst: *mut u8) {
        let dst = unsafe { &mut *(dst as *mut SliceHeader) };
        if dst.data.is_null() {
            dst.data = alloc::new_typed_array(self.elem_size, 0);
        } else {
            dst.len = 0;
        }
    }

    unsafe fn decode_elems(
        &self,
        buf: &[u8],
        cursor: usize,
        depth: usize,
        dst: *mut u8,
    ) -> Result<usize, Error> {
        let mut cursor = skip_white_space(buf, cursor + 1);
        if cursor >= buf.len() {
            return Err(Error::unexpected_end("slice", cursor));
        }
        if buf[cursor] == b']' {
            unsafe { self.finish_empty(dst) };
            return Ok(cursor + 1);
        }

        let mut idx = 0;
        let mut scratch = self.pool.get();
        let mut cap = scratch.cap;
        let mut data = scratch.data;
        loop {
            if cap <= idx {
                (data, cap) = self.grow(data, cap, idx);
            }
            let ep = unsafe { data.add(idx * self.elem_size) };
            unsafe { self.init_elem_slot(ep) };
            cursor = match unsafe { self.value_decoder.decode(buf, cursor, depth, ep) } {
                Ok(cursor) => cursor,
                Err(err) => {
                    self.release(scratch, data, cap);
                    return Err(err);
                }
            };
            cursor = skip_white_space(buf, cursor);
            if cursor >= buf.len() {
                self.release(scratch, data, cap);
                return Err(Error::unexpected_end("slice", cursor));
            }
            match buf[cursor] {
                b']' => {
                    scratch.data = data;
                    scratch.len = idx + 1;
                    scratch.cap = cap;
                    unsafe { self.finish(dst, scratch, idx + 1) };
                    return Ok(cursor + 1);
                }
                b',' => idx += 1,
                c => {
                    self.release(scratch, data, cap);
                    return Err(Error::invalid_character(c, "slice", cursor));
                }
            }
            cursor += 1;
        }
    }

    unsafe fn decode_stream_elems(
        &self,
        s: &mut Stream,
        depth: usize,
        dst: *mut u8,
    ) -> Result<(), Error> {
        s.cursor += 1;
        s.skip_white_space();
        if s.char() == b']' {
            unsafe { self.finish_empty(dst) };
            s.cursor += 1;
            return Ok(());
        }

        let mut idx = 0;
        let mut scratch = self.pool.get();
        let mut cap = scratch.cap;
        let mut data = scratch.data;
        loop {
            if cap <= idx {
                (data, cap) = self.grow(data, cap, idx);
            }
            let ep = unsafe { data.add(idx * self.elem_size) };
            unsafe { self.init_elem_slot(ep) };
            if let Err(err) = unsafe { self.value_decoder.decode_stream(s, depth, ep) } {
                self.release(scratch, data, cap);
                return Err(err);
            }
            s.skip_white_space();
            loop {
                match s.char() {
                    b']' => {
                        scratch.data = data;
                        scratch.len = idx + 1;
                        scratch.cap = cap;
                        unsafe { self.finish(dst, scratch, idx + 1) };
                        s.cursor += 1;
                        return Ok(());
                    }
                    b',' => {
                        idx += 1;
                        break;
                    }
                    NUL => {
                        if s.read() {
                            continue;
                        }
                        self.release(scratch, data, cap);
                        return Err(Error::unexpected_end("slice", s.total_offset()));
                    }
                    c => {
                        self.release(scratch, data, cap);
                        return Err(Error::invalid_character(c, "slice", s.total_offset()));
                    }
                }
            }
            s.cursor += 1;
        }
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &ScratchPool {
        &self.pool
    }
}

impl Decode for SliceDecoder {
    unsafe fn decode(
        &self,
        buf: &[u8],
        cursor: usize,
        depth: usize,
        dst: *mut u8,
    ) -> Result<usize, Error> {
        let depth = depth + 1;
        if depth > MAX_DECODE_NESTING_DEPTH {
            return Err(Error::exceeded_max_depth(cursor));
        }

        let mut cursor = cursor;
        while cursor < buf.len() {
            match buf[cursor] {
                b' ' | b'\t' | b'\n' | b'\r' => cursor += 1,
                b'n' => {
                    let cursor = expect_literal(buf, cursor, b"null", "null")?;
                    unsafe { self.write_null(dst) };
                    return Ok(cursor);
                }
                b'[' => return unsafe { self.decode_elems(buf, cursor, depth, dst) },
                b'-' | b'0'..=b'9' => return Err(self.err_number(cursor)),
                _ => break,
            }
        }
        Err(Error::unexpected_end("slice", cursor))
    }

    unsafe fn decode_stream(
        &self,
        s: &mut Stream,
        depth: usize,
        dst: *mut u8,
    ) -> Result<(), Error> {
        let depth = depth + 1;
        if depth > MAX_DECODE_NESTING_DEPTH {
            return Err(Error::exceeded_max_depth(s.total_offset()));
        }

        loop {
            match s.char() {
                b' ' | b'\t' | b'\n' | b'\r' => s.cursor += 1,
                b'n' => {
                    s.cursor += 1;
                    expect_literal_stream(s, b"ull", "null")?;
                    unsafe { self.write_null(dst) };
                    return Ok(());
                }
                b'[' => return unsafe { self.decode_stream_elems(s, depth, dst) },
                b'-' | b'0'..=b'9' => return Err(self.err_number(s.total_offset())),
                NUL => {
                    if !s.read() {
                        break;
                    }
                }
                _ => break,
            }
        }
        Err(Error::unexpected_end("slice", s.total_offset()))
    }
}
