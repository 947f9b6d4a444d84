//! Scalar value decoders: the per-element decoders a [`SliceDecoder`]
//! (or a higher layer) delegates to.
//!
//! Shared conventions: leading whitespace is consumed, trailing whitespace
//! is not, and `null` leaves the destination's zero value in place.
//!
//! [`SliceDecoder`]: crate::decode::SliceDecoder

use crate::decode::{Decode, expect_literal, expect_literal_stream, skip_white_space};
use crate::error::Error;
use crate::schema::{Ty, Types};
use crate::stream::{NUL, Stream};

fn diag(types: &Types, ty: Ty, struct_name: &str, field_name: &str) -> Diag {
    Diag {
        ty_name: types.display(ty),
        struct_name: struct_name.to_owned(),
        field_name: field_name.to_owned(),
    }
}

/// Diagnostic context shared by the scalar decoders.
struct Diag {
    ty_name: String,
    struct_name: String,
    field_name: String,
}

impl Diag {
    fn out_of_range(&self, offset: usize) -> Error {
        Error::TypeMismatch {
            value: "number",
            ty: self.ty_name.clone(),
            struct_name: self.struct_name.clone(),
            field_name: self.field_name.clone(),
            offset,
        }
    }
}

/// Collect the digit run at `cursor` into `value`, reporting how many
/// digits were seen. `value` saturates into an out-of-range report later;
/// i128 holds any 20-digit run a u64 could need.
fn digits(buf: &[u8], mut cursor: usize, value: &mut i128) -> (usize, usize) {
    let mut count = 0;
    while cursor < buf.len() {
        match buf[cursor] {
            c @ b'0'..=b'9' => {
                *value = value.saturating_mul(10).saturating_add((c - b'0') as i128);
                cursor += 1;
                count += 1;
            }
            _ => break,
        }
    }
    (cursor, count)
}

fn digits_stream(s: &mut Stream, value: &mut i128) -> usize {
    let mut count = 0;
    loop {
        match s.char() {
            c @ b'0'..=b'9' => {
                *value = value.saturating_mul(10).saturating_add((c - b'0') as i128);
                s.cursor += 1;
                count += 1;
            }
            NUL => {
                if !s.read() {
                    return count;
                }
            }
            _ => return count,
        }
    }
}

fn no_digits(byte: Option<u8>, offset: usize) -> Error {
    match byte {
        Some(c) => Error::invalid_character(c, "number", offset),
        None => Error::unexpected_end("number", offset),
    }
}

unsafe fn write_signed(dst: *mut u8, width: usize, value: i64) {
    unsafe {
        match width {
            1 => (dst as *mut i8).write(value as i8),
            2 => (dst as *mut i16).write(value as i16),
            4 => (dst as *mut i32).write(value as i32),
            _ => (dst as *mut i64).write(value),
        }
    }
}

unsafe fn write_unsigned(dst: *mut u8, width: usize, value: u64) {
    unsafe {
        match width {
            1 => dst.write(value as u8),
            2 => (dst as *mut u16).write(value as u16),
            4 => (dst as *mut u32).write(value as u32),
            _ => (dst as *mut u64).write(value),
        }
    }
}

fn signed_bounds(width: usize) -> (i128, i128) {
    match width {
        1 => (i8::MIN as i128, i8::MAX as i128),
        2 => (i16::MIN as i128, i16::MAX as i128),
        4 => (i32::MIN as i128, i32::MAX as i128),
        _ => (i64::MIN as i128, i64::MAX as i128),
    }
}

fn unsigned_max(width: usize) -> i128 {
    match width {
        1 => u8::MAX as i128,
        2 => u16::MAX as i128,
        4 => u32::MAX as i128,
        _ => u64::MAX as i128,
    }
}

/// Decoder for signed integer elements, writing at the width of its
/// schema kind.
pub struct IntDecoder {
    width: usize,
    diag: Diag,
}

impl IntDecoder {
    pub fn new(types: &Types, ty: Ty, struct_name: &str, field_name: &str) -> Self {
        IntDecoder {
            width: types.size(ty),
            diag: diag(types, ty, struct_name, field_name),
        }
    }
}

impl Decode for IntDecoder {
    unsafe fn decode(
        &self,
        buf: &[u8],
        cursor: usize,
        _depth: usize,
        dst: *mut u8,
    ) -> Result<usize, Error> {
        let mut cursor = skip_white_space(buf, cursor);
        if cursor >= buf.len() {
            return Err(Error::unexpected_end("number", cursor));
        }
        if buf[cursor] == b'n' {
            return expect_literal(buf, cursor, b"null", "null");
        }
        let start = cursor;
        let negative = buf[cursor] == b'-';
        if negative {
            cursor += 1;
        }
        let mut value: i128 = 0;
        let (after, count) = digits(buf, cursor, &mut value);
        cursor = after;
        if count == 0 {
            return Err(no_digits(buf.get(cursor).copied(), cursor));
        }
        if negative {
            value = -value;
        }
        let (min, max) = signed_bounds(self.width);
        if value < min || value > max {
            return Err(self.diag.out_of_range(start));
        }
        unsafe { write_signed(dst, self.width, value as i64) };
        Ok(cursor)
    }

    unsafe fn decode_stream(
        &self,
        s: &mut Stream,
        _depth: usize,
        dst: *mut u8,
    ) -> Result<(), Error> {
        s.skip_white_space();
        if s.char() == b'n' {
            s.cursor += 1;
            return expect_literal_stream(s, b"ull", "null");
        }
        let start = s.total_offset();
        let negative = s.char() == b'-';
        if negative {
            s.cursor += 1;
        }
        let mut value: i128 = 0;
        let count = digits_stream(s, &mut value);
        if count == 0 {
            let byte = match s.char() {
                NUL => None,
                c => Some(c),
            };
            return Err(no_digits(byte, s.total_offset()));
        }
        if negative {
            value = -value;
        }
        let (min, max) = signed_bounds(self.width);
        if value < min || value > max {
            return Err(self.diag.out_of_range(start));
        }
        unsafe { write_signed(dst, self.width, value as i64) };
        Ok(())
    }
}

/// Decoder for unsigned integer elements.
pub struct UintDecoder {
    width: usize,
    diag: Diag,
}

impl UintDecoder {
    pub fn new(types: &Types, ty: Ty, struct_name: &str, field_name: &str) -> Self {
        UintDecoder {
            width: types.size(ty),
            diag: diag(types, ty, struct_name, field_name),
        }
    }
}

impl Decode for UintDecoder {
    unsafe fn decode(
        &self,
        buf: &[u8],
        cursor: usize,
        _depth: usize,
        dst: *mut u8,
    ) -> Result<usize, Error> {
        let mut cursor = skip_white_space(buf, cursor);
        if cursor >= buf.len() {
            return Err(Error::unexpected_end("number", cursor));
        }
        if buf[cursor] == b'n' {
            return expect_literal(buf, cursor, b"null", "null");
        }
        let start = cursor;
        let mut value: i128 = 0;
        let (after, count) = digits(buf, cursor, &mut value);
        cursor = after;
        if count == 0 {
            return Err(no_digits(buf.get(cursor).copied(), cursor));
        }
        if value > unsigned_max(self.width) {
            return Err(self.diag.out_of_range(start));
        }
        unsafe { write_unsigned(dst, self.width, value as u64) };
        Ok(cursor)
    }

    unsafe fn decode_stream(
        &self,
        s: &mut Stream,
        _depth: usize,
        dst: *mut u8,
    ) -> Result<(), Error> {
        s.skip_white_space();
        if s.char() == b'n' {
            s.cursor += 1;
            return expect_literal_stream(s, b"ull", "null");
        }
        let start = s.total_offset();
        let mut value: i128 = 0;
        let count = digits_stream(s, &mut value);
        if count == 0 {
            let byte = match s.char() {
                NUL => None,
                c => Some(c),
            };
            return Err(no_digits(byte, s.total_offset()));
        }
        if value > unsigned_max(self.width) {
            return Err(self.diag.out_of_range(start));
        }
        unsafe { write_unsigned(dst, self.width, value as u64) };
        Ok(())
    }
}

fn is_number_byte(c: u8) -> bool {
    matches!(c, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
}

/// Decoder for floating-point elements (`f32` or `f64` by schema width).
pub struct FloatDecoder {
    width: usize,
    diag: Diag,
}

impl FloatDecoder {
    pub fn new(types: &Types, ty: Ty, struct_name: &str, field_name: &str) -> Self {
        FloatDecoder {
            width: types.size(ty),
            diag: diag(types, ty, struct_name, field_name),
        }
    }

    unsafe fn write(&self, dst: *mut u8, value: f64) {
        unsafe {
            if self.width == 4 {
                (dst as *mut f32).write(value as f32);
            } else {
                (dst as *mut f64).write(value);
            }
        }
    }

    fn parse(&self, text: &[u8], offset: usize) -> Result<f64, Error> {
        core::str::from_utf8(text)
            .ok()
            .and_then(|t| t.parse::<f64>().ok())
            .ok_or_else(|| self.diag.out_of_range(offset))
    }
}

impl Decode for FloatDecoder {
    unsafe fn decode(
        &self,
        buf: &[u8],
        cursor: usize,
        _depth: usize,
        dst: *mut u8,
    ) -> Result<usize, Error> {
        let mut cursor = skip_white_space(buf, cursor);
        if cursor >= buf.len() {
            return Err(Error::unexpected_end("number", cursor));
        }
        if buf[cursor] == b'n' {
            return expect_literal(buf, cursor, b"null", "null");
        }
        let start = cursor;
        while cursor < buf.len() && is_number_byte(buf[cursor]) {
            cursor += 1;
        }
        if cursor == start {
            return Err(no_digits(Some(buf[cursor]), cursor));
        }
        let value = self.parse(&buf[start..cursor], start)?;
        unsafe { self.write(dst, value) };
        Ok(cursor)
    }

    unsafe fn decode_stream(
        &self,
        s: &mut Stream,
        _depth: usize,
        dst: *mut u8,
    ) -> Result<(), Error> {
        s.skip_white_space();
        if s.char() == b'n' {
            s.cursor += 1;
            return expect_literal_stream(s, b"ull", "null");
        }
        let start = s.total_offset();
        let mut text = Vec::new();
        loop {
            match s.char() {
                c if is_number_byte(c) => {
                    text.push(c);
                    s.cursor += 1;
                }
                NUL => {
                    if !s.read() {
                        break;
                    }
                }
                _ => break,
            }
        }
        if text.is_empty() {
            let byte = match s.char() {
                NUL => None,
                c => Some(c),
            };
            return Err(no_digits(byte, s.total_offset()));
        }
        let value = self.parse(&text, start)?;
        unsafe { self.write(dst, value) };
        Ok(())
    }
}

/// Decoder for boolean elements.
pub struct BoolDecoder;

impl Decode for BoolDecoder {
    unsafe fn decode(
        &self,
        buf: &[u8],
        cursor: usize,
        _depth: usize,
        dst: *mut u8,
    ) -> Result<usize, Error> {
        let cursor = skip_white_space(buf, cursor);
        if cursor >= buf.len() {
            return Err(Error::unexpected_end("bool", cursor));
        }
        match buf[cursor] {
            b't' => {
                let cursor = expect_literal(buf, cursor, b"true", "bool")?;
                unsafe { (dst as *mut bool).write(true) };
                Ok(cursor)
            }
            b'f' => {
                let cursor = expect_literal(buf, cursor, b"false", "bool")?;
                unsafe { (dst as *mut bool).write(false) };
                Ok(cursor)
            }
            b'n' => expect_literal(buf, cursor, b"null", "null"),
            c => Err(Error::invalid_character(c, "bool", cursor)),
        }
    }

    unsafe fn decode_stream(
        &self,
        s: &mut Stream,
        _depth: usize,
        dst: *mut u8,
    ) -> Result<(), Error> {
        s.skip_white_space();
        match s.char() {
            b't' => {
                expect_literal_stream(s, b"true", "bool")?;
                unsafe { (dst as *mut bool).write(true) };
                Ok(())
            }
            b'f' => {
                expect_literal_stream(s, b"false", "bool")?;
                unsafe { (dst as *mut bool).write(false) };
                Ok(())
            }
            b'n' => {
                s.cursor += 1;
                expect_literal_stream(s, b"ull", "null")
            }
            NUL => Err(Error::unexpected_end("bool", s.total_offset())),
            c => Err(Error::invalid_character(c, "bool", s.total_offset())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Kind;

    fn int_decoder() -> (Types, IntDecoder) {
        let mut types = Types::new();
        let i = types.scalar(Kind::Int);
        let dec = IntDecoder::new(&types, i, "", "");
        (types, dec)
    }

    #[test]
    fn int_skips_leading_whitespace_only() {
        let (_types, dec) = int_decoder();
        let mut out = 0i64;
        let cursor = unsafe {
            dec.decode(b"  -42  ", 0, 0, &mut out as *mut i64 as *mut u8)
        }
        .unwrap();
        assert_eq!(out, -42);
        // trailing whitespace is left for the caller
        assert_eq!(cursor, 5);
    }

    #[test]
    fn int_null_leaves_zero_value() {
        let (_types, dec) = int_decoder();
        let mut out = 7i64;
        let cursor =
            unsafe { dec.decode(b"null", 0, 0, &mut out as *mut i64 as *mut u8) }.unwrap();
        assert_eq!(cursor, 4);
        assert_eq!(out, 7);
    }

    #[test]
    fn int8_range_is_enforced() {
        let mut types = Types::new();
        let i8_ty = types.scalar(Kind::Int8);
        let dec = IntDecoder::new(&types, i8_ty, "S", "f");
        let mut out = 0i8;
        let err = unsafe { dec.decode(b"200", 0, 0, &mut out as *mut i8 as *mut u8) }
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { offset: 0, .. }));
    }

    #[test]
    fn int_stream_split_across_refills() {
        let (_types, dec) = int_decoder();
        let mut s = Stream::new(std::io::Cursor::new(b"12345".to_vec()));
        let mut out = 0i64;
        unsafe { dec.decode_stream(&mut s, 0, &mut out as *mut i64 as *mut u8) }.unwrap();
        assert_eq!(out, 12345);
    }

    #[test]
    fn bool_literals() {
        let dec = BoolDecoder;
        let mut out = false;
        unsafe { dec.decode(b" true", 0, 0, &mut out as *mut bool as *mut u8) }.unwrap();
        assert!(out);
        unsafe { dec.decode(b"false", 0, 0, &mut out as *mut bool as *mut u8) }.unwrap();
        assert!(!out);
    }

    #[test]
    fn float_width_4_writes_f32() {
        let mut types = Types::new();
        let f32_ty = types.scalar(Kind::Float32);
        let dec = FloatDecoder::new(&types, f32_ty, "", "");
        let mut out = 0f32;
        unsafe { dec.decode(b"1.5e2", 0, 0, &mut out as *mut f32 as *mut u8) }.unwrap();
        assert_eq!(out, 150.0);
    }
}
